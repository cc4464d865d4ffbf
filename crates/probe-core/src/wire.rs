//! Raw byte logging stage.

use std::fmt::Write as _;

use tracing::info;

use crate::errors::PipelineError;
use crate::pipeline::{Event, Message, Stage};

const ROW: usize = 16;

/// Logs every raw byte chunk crossing it, in both directions, as a hex
/// dump. Register it first so it sits next to the transport.
#[derive(Debug, Default)]
pub struct WireLogger;

impl WireLogger {
    /// New wire logger.
    pub fn new() -> Self {
        Self
    }
}

impl Stage for WireLogger {
    fn name(&self) -> &'static str {
        "wire-logger"
    }

    fn inbound(&mut self, event: Event, out: &mut Vec<Event>) -> Result<(), PipelineError> {
        if let Event::Read(Message::Bytes(bytes)) = &event {
            info!(target: "probe::wire", len = bytes.len(), "READ\n{}", hex_dump(bytes));
        }
        out.push(event);
        Ok(())
    }

    fn outbound(&mut self, message: Message, out: &mut Vec<Message>) -> Result<(), PipelineError> {
        if let Message::Bytes(bytes) = &message {
            info!(target: "probe::wire", len = bytes.len(), "WRITE\n{}", hex_dump(bytes));
        }
        out.push(message);
        Ok(())
    }
}

/// Render `data` as rows of 16 bytes: offset, hex, printable ASCII.
pub fn hex_dump(data: &[u8]) -> String {
    let mut dump = String::with_capacity(data.len().div_ceil(ROW) * 78);
    for (row, chunk) in data.chunks(ROW).enumerate() {
        let _ = write!(dump, "{:08x} ", row * ROW);
        for idx in 0..ROW {
            match chunk.get(idx) {
                Some(byte) => {
                    let _ = write!(dump, " {byte:02x}");
                }
                None => dump.push_str("   "),
            }
        }
        dump.push_str("  |");
        dump.extend(chunk.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                char::from(b)
            } else {
                '.'
            }
        }));
        dump.push_str("|\n");
    }
    dump
}
