//! Response composition and parsing

use crate::error::{Error, Result};
use crate::headers::DEFAULT_STATUS_LINE;
use bytes::Bytes;
use http::{HeaderName, HeaderValue, Response, StatusCode};
use http_body_util::Full;
use tracing::warn;

/// Body type alias
pub type Body = Full<Bytes>;

const CRLF: &[u8] = b"\r\n";

/// Compose `status CRLF header-block CRLF body` into one exactly-sized buffer.
///
/// The header block is expected to carry its own CRLF after every line; it is
/// copied verbatim. A missing status line becomes `HTTP/1.1 200 OK`.
pub fn compose(status_line: Option<&str>, header_block: &[u8], body: &[u8]) -> Result<Vec<u8>> {
    let status = status_line.unwrap_or(DEFAULT_STATUS_LINE).as_bytes();
    let total = status.len() + CRLF.len() + header_block.len() + CRLF.len() + body.len();

    let mut out = Vec::new();
    out.try_reserve_exact(total)
        .map_err(|e| Error::AllocationFailure(format!("{} byte response: {}", total, e)))?;

    out.extend_from_slice(status);
    out.extend_from_slice(CRLF);
    out.extend_from_slice(header_block);
    out.extend_from_slice(CRLF);
    out.extend_from_slice(body);
    Ok(out)
}

/// A composed response split into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMessage {
    status_line: String,
    headers: Vec<String>,
    body: Vec<u8>,
}

impl ResponseMessage {
    /// Create a message from parts
    pub fn new(status_line: impl Into<String>, headers: Vec<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status_line: status_line.into(),
            headers,
            body: body.into(),
        }
    }

    /// Split wire bytes produced by [`compose`] back into parts
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let (status, mut rest) = split_line(bytes)
            .ok_or_else(|| Error::MalformedResponse("missing status line".to_string()))?;
        if !status.starts_with(b"HTTP/") {
            return Err(Error::MalformedResponse(format!(
                "status line does not start with HTTP/: {:?}",
                String::from_utf8_lossy(status)
            )));
        }

        let mut headers = Vec::new();
        loop {
            if let Some(body) = rest.strip_prefix(CRLF) {
                return Ok(Self {
                    status_line: String::from_utf8_lossy(status).into_owned(),
                    headers,
                    body: body.to_vec(),
                });
            }
            let (line, tail) = split_line(rest)
                .ok_or_else(|| Error::MalformedResponse("unterminated header block".to_string()))?;
            headers.push(String::from_utf8_lossy(line).into_owned());
            rest = tail;
        }
    }

    /// Status line as emitted
    pub fn status_line(&self) -> &str {
        &self.status_line
    }

    /// Numeric status parsed from the status line
    pub fn status_code(&self) -> Option<StatusCode> {
        self.status_line
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse::<u16>().ok())
            .and_then(|code| StatusCode::from_u16(code).ok())
    }

    /// Ordinary header lines in emission order
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Values of every header named `name` (case-insensitive)
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers.iter().filter_map(move |line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim())
        })
    }

    /// First value of the header named `name`
    pub fn header<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        self.header_values(name).next()
    }

    /// Response body
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Header block (each line followed by CRLF)
    pub fn header_block(&self) -> Vec<u8> {
        let mut block = Vec::new();
        for line in &self.headers {
            block.extend_from_slice(line.as_bytes());
            block.extend_from_slice(CRLF);
        }
        block
    }

    /// Wire bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        compose(Some(&self.status_line), &self.header_block(), &self.body)
    }

    /// Convert into an `http::Response`.
    ///
    /// Header lines that are not valid HTTP fields are skipped.
    pub fn into_http_response(self) -> Result<Response<Body>> {
        let status = self.status_code().ok_or_else(|| {
            Error::MalformedResponse(format!("unparsable status line {:?}", self.status_line))
        })?;

        let mut response = Response::builder().status(status);
        for line in &self.headers {
            let Some((name, value)) = line.split_once(':') else {
                warn!(header = %line, "Skipping header line without colon");
                continue;
            };
            match (
                HeaderName::from_bytes(name.trim().as_bytes()),
                HeaderValue::from_str(value.trim()),
            ) {
                (Ok(name), Ok(value)) => response = response.header(name, value),
                _ => warn!(header = %line, "Skipping invalid header line"),
            }
        }

        Ok(response.body(Full::new(Bytes::from(self.body)))?)
    }
}

fn split_line(bytes: &[u8]) -> Option<(&[u8], &[u8])> {
    let pos = bytes.windows(2).position(|w| w == CRLF)?;
    Some((&bytes[..pos], &bytes[pos + 2..]))
}

/// Canned responses produced by the bridge itself
pub mod responses {
    use super::*;

    /// 500 with a plain-text body
    pub fn internal_error(message: &str) -> Vec<u8> {
        format!(
            "HTTP/1.1 500 Internal Server Error\r\nContent-Type: text/plain\r\n\r\n{}",
            message
        )
        .into_bytes()
    }

    /// Interpreter could not be constructed or started
    pub fn startup_failure() -> Vec<u8> {
        internal_error("Interpreter init failed.")
    }

    /// The composed response could not be allocated
    pub fn allocation_failure() -> Vec<u8> {
        internal_error("Allocation failure")
    }
}
