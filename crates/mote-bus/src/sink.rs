//! Hand-off of decoded records to storage.

use mote_core::DecodedMessage;

/// Destination for decoded records (a database, a log, a file).
///
/// `store` is called synchronously from dispatch; it returns `false` when the
/// record could not be persisted, which withholds the acknowledgement so the
/// device resends later.
pub trait RecordSink: Send + Sync {
    fn store(&self, source: &str, record: &DecodedMessage) -> bool;
}

impl<F> RecordSink for F
where
    F: Fn(&str, &DecodedMessage) -> bool + Send + Sync,
{
    fn store(&self, source: &str, record: &DecodedMessage) -> bool {
        self(source, record)
    }
}
