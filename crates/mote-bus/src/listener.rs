//! Listener contract and the per-type listener registry.
//!
//! Listener lists are copy-on-write: register and deregister replace the
//! whole list for a type under a brief write lock, while dispatch clones the
//! current `Arc<Vec<_>>` under a read lock and iterates that snapshot with no
//! lock held.  Changes made while a dispatch is running are therefore only
//! seen by the next dispatch.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use mote_core::{DecodedMessage, DeviceId, MessageType};

/// One inbound message as handed to listeners.
///
/// Borrowed for the duration of the callback only; listeners must copy what
/// they want to keep.
#[derive(Debug, Clone, Copy)]
pub struct Delivery<'a> {
    pub message_type: MessageType,
    pub device_id: Option<DeviceId>,
    /// Receipt time in milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// The complete received bytes, including any wire header.
    pub raw: &'a [u8],
    pub record: &'a DecodedMessage,
}

/// Receives decoded messages of the types it is registered for.
pub trait Listener: Send + Sync {
    /// Handles one message; returns `false` if it could not be processed
    /// (for example, storage unavailable).  A `false` from any listener
    /// suppresses the acknowledgement for that message.
    fn on_message(&self, delivery: &Delivery<'_>) -> bool;

    /// Name used in log lines.
    fn name(&self) -> &str {
        "listener"
    }
}

/// Snapshot of the listeners of one type.
pub type ListenerList = Arc<Vec<Arc<dyn Listener>>>;

/// Message type → listener list, copy-on-write.
#[derive(Default)]
pub struct ListenerRegistry {
    lists: RwLock<HashMap<MessageType, ListenerList>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `listener` to the list for `message_type`.
    ///
    /// Returns `false` if that exact listener was already registered.
    pub fn register(&self, message_type: MessageType, listener: Arc<dyn Listener>) -> bool {
        let mut lists = self.lists.write().unwrap_or_else(PoisonError::into_inner);
        let current = lists.entry(message_type).or_default();
        if current.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(listener);
        *current = Arc::new(next);
        true
    }

    /// Removes `listener` from the list for `message_type`.
    ///
    /// Returns `false` (and changes nothing) if it was not registered.
    pub fn deregister(&self, message_type: MessageType, listener: &Arc<dyn Listener>) -> bool {
        let mut lists = self.lists.write().unwrap_or_else(PoisonError::into_inner);
        let Some(current) = lists.get_mut(&message_type) else {
            return false;
        };
        if !current.iter().any(|l| same_listener(l, listener)) {
            return false;
        }
        let next: Vec<Arc<dyn Listener>> = current
            .iter()
            .filter(|l| !same_listener(l, listener))
            .cloned()
            .collect();
        if next.is_empty() {
            lists.remove(&message_type);
        } else {
            *current = Arc::new(next);
        }
        true
    }

    /// The current listener list for `message_type` (empty if none).
    pub fn snapshot(&self, message_type: MessageType) -> ListenerList {
        self.lists
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&message_type)
            .cloned()
            .unwrap_or_default()
    }

    pub fn count(&self, message_type: MessageType) -> usize {
        self.snapshot(message_type).len()
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lists = self.lists.read().unwrap_or_else(PoisonError::into_inner);
        let counts: HashMap<MessageType, usize> = lists.iter().map(|(t, l)| (*t, l.len())).collect();
        f.debug_struct("ListenerRegistry").field("listeners", &counts).finish()
    }
}

/// Identity comparison on the data pointer only; vtable pointers of the same
/// object may differ between codegen units.
fn same_listener(a: &Arc<dyn Listener>, b: &Arc<dyn Listener>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
