//! JSON-lines record sink.
//!
//! Every stored record becomes one line:
//!
//! ```text
//! {"source":"base-station/0x88","record":{"timestamp":1000,"generation_time":1000,...}}
//! ```

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use mote_bus::RecordSink;
use mote_core::DecodedMessage;
use serde::Serialize;
use tracing::warn;

#[derive(Serialize)]
struct Line<'a> {
    source: &'a str,
    record: &'a DecodedMessage,
}

pub struct JsonLinesSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesSink {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out: Mutex::new(out) }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    /// Appends to `path`, creating the file when missing.
    pub fn append_to(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(Box::new(io::BufWriter::new(file))))
    }

    fn write_line(&self, source: &str, record: &DecodedMessage) -> io::Result<()> {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        serde_json::to_writer(&mut *out, &Line { source, record })?;
        out.write_all(b"\n")?;
        out.flush()
    }
}

impl RecordSink for JsonLinesSink {
    fn store(&self, source: &str, record: &DecodedMessage) -> bool {
        match self.write_line(source, record) {
            Ok(()) => true,
            Err(e) => {
                warn!("{source}: failed to write record: {e}");
                false
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
