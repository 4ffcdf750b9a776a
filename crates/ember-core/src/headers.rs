//! Response header assembly

use crate::buffer::{CapacityPolicy, OutputBuffer};
use tracing::trace;

/// Status line used when the interpreter never sets one
pub const DEFAULT_STATUS_LINE: &str = "HTTP/1.1 200 OK";

/// Classification of a header line emitted by the interpreter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    /// `HTTP/x.y NNN Reason` status line
    Status,
    /// Ordinary `Name: Value` field (passed through unvalidated)
    Field,
}

impl HeaderKind {
    /// Classify a header line by its leading token
    pub fn classify(line: &str) -> Self {
        if line.starts_with("HTTP/") {
            Self::Status
        } else {
            Self::Field
        }
    }
}

/// Collects header lines in emission order and keeps the status line apart
#[derive(Debug, Clone)]
pub struct HeaderAssembler {
    status_line: Option<String>,
    block: OutputBuffer,
}

impl HeaderAssembler {
    /// Create an empty assembler backed by its own header buffer
    pub fn new(policy: CapacityPolicy) -> Self {
        Self {
            status_line: None,
            block: OutputBuffer::new("headers", policy),
        }
    }

    /// Record one header line
    pub fn observe(&mut self, line: &str) -> HeaderKind {
        let kind = HeaderKind::classify(line);
        match kind {
            HeaderKind::Status => {
                trace!(status = line, "Status line set");
                self.status_line = Some(line.to_string());
            }
            HeaderKind::Field => {
                let mut framed = Vec::with_capacity(line.len() + 2);
                framed.extend_from_slice(line.as_bytes());
                framed.extend_from_slice(b"\r\n");
                self.block.append(&framed);
            }
        }
        kind
    }

    /// Clear the status line and all ordinary headers
    pub fn reset(&mut self) {
        self.status_line = None;
        self.block.reset();
    }

    /// Free the header buffer
    pub fn release(&mut self) {
        self.status_line = None;
        self.block.release();
    }

    /// Status line, or the default when none was observed
    pub fn status_line(&self) -> &str {
        self.status_line.as_deref().unwrap_or(DEFAULT_STATUS_LINE)
    }

    /// Whether the interpreter set a status line explicitly
    pub fn has_status_line(&self) -> bool {
        self.status_line.is_some()
    }

    /// Header block: every ordinary header followed by CRLF, in observed order
    pub fn finalize(&self) -> &[u8] {
        self.block.as_bytes()
    }

    /// Underlying header buffer
    pub fn buffer(&self) -> &OutputBuffer {
        &self.block
    }
}
