//! Per-invocation capture state

use ember_core::{compose, CapacityPolicy, HeaderAssembler, OutputBuffer, Result};
use ember_scripting::OutputSink;
use tracing::{trace, warn};

/// Secondary stream written through the standard-output handle.
///
/// Each write remembers the body length at the time it was made so the two
/// streams can be interleaved in emission order.
#[derive(Debug, Default)]
struct StdoutStream {
    segments: Vec<(usize, Vec<u8>)>,
    len: usize,
}

/// Body buffer, header assembler and stdout stream of the current invocation
#[derive(Debug)]
pub struct InvocationContext {
    body: OutputBuffer,
    headers: HeaderAssembler,
    stdout: Option<StdoutStream>,
    policy: CapacityPolicy,
}

impl InvocationContext {
    /// Create a context whose buffers follow `policy`
    pub fn new(policy: CapacityPolicy) -> Self {
        Self {
            body: OutputBuffer::new("body", policy),
            headers: HeaderAssembler::new(policy),
            stdout: None,
            policy,
        }
    }

    /// Prepare for a new invocation
    pub fn reset(&mut self) {
        self.body.reset();
        self.headers.reset();
        self.stdout = None;
    }

    /// Free both buffers
    pub fn release(&mut self) {
        self.body.release();
        self.headers.release();
        self.stdout = None;
    }

    /// Open the secondary stdout stream for this invocation
    pub fn open_stdout(&mut self) {
        self.stdout = Some(StdoutStream::default());
    }

    /// Whether the secondary stdout stream is open
    pub fn stdout_open(&self) -> bool {
        self.stdout.is_some()
    }

    /// Fold the stdout stream into the body, closing it.
    pub fn merge_stdout(&mut self) {
        let Some(stream) = self.stdout.take() else {
            return;
        };
        if stream.segments.is_empty() {
            return;
        }

        trace!(
            segments = stream.segments.len(),
            bytes = stream.len,
            "Merging stdout stream into body"
        );

        let main = self.body.to_vec();
        self.body.reset();

        let mut cursor = 0;
        for (offset, bytes) in stream.segments {
            let offset = offset.min(main.len());
            self.body.append(&main[cursor..offset]);
            self.body.append(&bytes);
            cursor = offset;
        }
        self.body.append(&main[cursor..]);
    }

    /// Body buffer
    pub fn body(&self) -> &OutputBuffer {
        &self.body
    }

    /// Header assembler
    pub fn headers(&self) -> &HeaderAssembler {
        &self.headers
    }

    /// Compose the wire response from the captured status, headers and body
    pub fn compose(&self) -> Result<Vec<u8>> {
        compose(
            Some(self.headers.status_line()),
            self.headers.finalize(),
            self.body.as_bytes(),
        )
    }
}

impl OutputSink for InvocationContext {
    fn write(&mut self, bytes: &[u8]) {
        self.body.append(bytes);
    }

    fn header(&mut self, line: &str) {
        self.headers.observe(line);
    }

    fn write_stdout(&mut self, bytes: &[u8]) {
        let offset = self.body.len();
        let max_size = self.policy.max_size;
        match self.stdout.as_mut() {
            Some(stream) if stream.len + bytes.len() <= max_size => {
                stream.len += bytes.len();
                stream.segments.push((offset, bytes.to_vec()));
            }
            Some(stream) => {
                warn!(
                    buffer = "stdout",
                    current = stream.len,
                    dropped = bytes.len(),
                    max_size,
                    "Output truncated"
                );
            }
            None => self.body.append(bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> InvocationContext {
        InvocationContext::new(CapacityPolicy::new(16, 64))
    }

    #[test]
    fn test_sink_routes_output_and_headers() {
        let mut ctx = context();
        ctx.write(b"hello");
        ctx.header("HTTP/1.1 201 Created");
        ctx.header("X-Id: 7");

        assert_eq!(ctx.body().as_bytes(), b"hello");
        assert_eq!(ctx.headers().status_line(), "HTTP/1.1 201 Created");
        assert_eq!(ctx.headers().finalize(), b"X-Id: 7\r\n");
    }

    #[test]
    fn test_stdout_merged_in_emission_order() {
        let mut ctx = context();
        ctx.open_stdout();

        ctx.write(b"a");
        ctx.write_stdout(b"1");
        ctx.write(b"b");
        ctx.write_stdout(b"2");
        ctx.write_stdout(b"3");
        ctx.write(b"c");

        assert_eq!(ctx.body().as_bytes(), b"abc");
        ctx.merge_stdout();
        assert_eq!(ctx.body().as_bytes(), b"a1b23c");
        assert!(!ctx.stdout_open());
    }

    #[test]
    fn test_stdout_without_stream_goes_to_body() {
        let mut ctx = context();
        ctx.write(b"a");
        ctx.write_stdout(b"b");
        assert_eq!(ctx.body().as_bytes(), b"ab");
    }

    #[test]
    fn test_stdout_stream_respects_ceiling() {
        let mut ctx = context();
        ctx.open_stdout();
        ctx.write_stdout(&[b'x'; 60]);
        ctx.write_stdout(&[b'y'; 10]);
        ctx.merge_stdout();
        assert_eq!(ctx.body().len(), 60);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut ctx = context();
        ctx.open_stdout();
        ctx.write(b"body");
        ctx.header("HTTP/1.1 404 Not Found");
        ctx.header("X-A: 1");

        ctx.reset();

        assert!(ctx.body().is_empty());
        assert!(!ctx.headers().has_status_line());
        assert!(ctx.headers().finalize().is_empty());
        assert!(!ctx.stdout_open());
    }

    #[test]
    fn test_compose_uses_default_status() {
        let mut ctx = context();
        ctx.header("Content-Type: text/plain");
        ctx.write(b"ok");

        let bytes = ctx.compose().unwrap();
        assert_eq!(
            bytes,
            b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nok".to_vec()
        );
    }

    #[test]
    fn test_release_then_reset() {
        let mut ctx = context();
        ctx.write(b"data");
        ctx.release();
        assert_eq!(ctx.body().capacity(), 0);

        ctx.reset();
        assert_eq!(ctx.body().capacity(), 16);
        ctx.write(b"again");
        assert_eq!(ctx.body().as_bytes(), b"again");
    }
}
