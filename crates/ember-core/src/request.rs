//! Request description, cookie parsing and the server info map

use crate::error::{Error, Result};
use crate::types::ScriptValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Canonical JSON media type
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Canonical form media type
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Caller-supplied description of one request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestDescriptor {
    /// HTTP method
    pub method: String,
    /// Request URI, possibly with a query component
    pub uri: String,
    /// Content type supplied by the caller
    pub content_type: Option<String>,
    /// Request body; an empty body still counts as present
    pub body: Option<Vec<u8>>,
}

impl RequestDescriptor {
    /// Create a descriptor without body
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            content_type: None,
            body: None,
        }
    }

    /// `GET` request
    pub fn get(uri: impl Into<String>) -> Self {
        Self::new("GET", uri)
    }

    /// `POST` request with body
    pub fn post(uri: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self::new("POST", uri).with_body(body)
    }

    /// Set the content type
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Set the body
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Everything after the first `?`, or empty
    pub fn query_string(&self) -> &str {
        self.uri
            .split_once('?')
            .map(|(_, query)| query)
            .unwrap_or("")
    }

    /// URI without its query component
    pub fn path(&self) -> &str {
        self.uri
            .split_once('?')
            .map(|(path, _)| path)
            .unwrap_or(&self.uri)
    }

    /// Body length in bytes (0 without body)
    pub fn content_length(&self) -> usize {
        self.body.as_ref().map(Vec::len).unwrap_or(0)
    }

    /// Reject descriptors the interpreter cannot be seeded with
    pub fn validate(&self) -> Result<()> {
        if self.method.is_empty() || self.method.contains(char::is_whitespace) {
            return Err(Error::InvalidRequest(format!(
                "invalid method {:?}",
                self.method
            )));
        }
        if self.uri.is_empty() {
            return Err(Error::InvalidRequest("empty URI".to_string()));
        }
        Ok(())
    }
}

/// Content type the interpreter sees for a request carrying a body.
///
/// Anything mentioning `json` becomes `application/json`; everything else,
/// including a missing type, is forced to form-urlencoded so that older
/// clients posting forms without a proper header keep working.
pub fn normalize_content_type(content_type: Option<&str>) -> &'static str {
    match content_type {
        Some(ct) if ct.contains("json") => JSON_CONTENT_TYPE,
        _ => FORM_CONTENT_TYPE,
    }
}

/// Whether a body with the given (normalized) content type and method is
/// parsed into form parameters
pub fn parses_form_body(content_type: &str, method: &str) -> bool {
    content_type.contains(FORM_CONTENT_TYPE) || matches!(method, "POST" | "PUT" | "PATCH")
}

/// Cookie name → value map parsed from a `Cookie` header
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CookieMap(BTreeMap<String, String>);

impl CookieMap {
    /// Parse `name=value` pairs separated by `;`.
    ///
    /// Leading spaces of each segment are skipped, the value starts after the
    /// first `=`, segments without `=` are ignored and later duplicates win.
    pub fn parse(header: &str) -> Self {
        let cookies = header
            .split(';')
            .map(|segment| segment.trim_start_matches(' '))
            .filter(|segment| !segment.is_empty())
            .filter_map(|segment| segment.split_once('='))
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        Self(cookies)
    }

    /// Cookie value by name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Number of cookies
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(name, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl From<CookieMap> for ScriptValue {
    fn from(cookies: CookieMap) -> Self {
        ScriptValue::from(cookies.0)
    }
}

/// Static values baked into every server info map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConstants {
    /// `SCRIPT_NAME` and `SCRIPT_FILENAME`
    pub script_name: String,
    /// `PHP_SELF`
    pub self_path: String,
    /// `SERVER_PROTOCOL`
    pub protocol: String,
    /// `SERVER_NAME`
    pub server_name: String,
    /// `SERVER_PORT`
    pub server_port: u16,
    /// `REMOTE_ADDR`
    pub remote_addr: String,
    /// `REQUEST_SCHEME`
    pub scheme: String,
    /// `HTTP_HOST`
    pub http_host: String,
    /// `HTTPS`
    pub https: String,
    /// `HTTP_USER_AGENT`
    pub user_agent: String,
}

impl Default for ServerConstants {
    fn default() -> Self {
        Self {
            script_name: "/mobile_boot.php".to_string(),
            self_path: "/mobile_boot.php".to_string(),
            protocol: "HTTP/1.1".to_string(),
            server_name: "127.0.0.1".to_string(),
            server_port: 80,
            remote_addr: "127.0.0.1".to_string(),
            scheme: "http".to_string(),
            http_host: "127.0.0.1".to_string(),
            https: "off".to_string(),
            user_agent: "PHPNative/1.0".to_string(),
        }
    }
}

/// Synthesized server-variables table for one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo(BTreeMap<String, ScriptValue>);

impl ServerInfo {
    /// Build the map for `request` at `request_time` (unix seconds)
    pub fn build(request: &RequestDescriptor, constants: &ServerConstants, request_time: i64) -> Self {
        let mut map = BTreeMap::new();
        let mut put = |key: &str, value: ScriptValue| {
            map.insert(key.to_string(), value);
        };

        put("REQUEST_METHOD", request.method.as_str().into());
        put("REQUEST_URI", request.uri.as_str().into());
        put("QUERY_STRING", request.query_string().into());
        put("SCRIPT_NAME", constants.script_name.as_str().into());
        put("SCRIPT_FILENAME", constants.script_name.as_str().into());
        put("SERVER_PROTOCOL", constants.protocol.as_str().into());
        put("SERVER_NAME", constants.server_name.as_str().into());
        put("SERVER_PORT", constants.server_port.to_string().into());
        put("REMOTE_ADDR", constants.remote_addr.as_str().into());
        put("PHP_SELF", constants.self_path.as_str().into());
        put("REQUEST_SCHEME", constants.scheme.as_str().into());
        put("HTTP_HOST", constants.http_host.as_str().into());
        put("HTTPS", constants.https.as_str().into());
        put("HTTP_USER_AGENT", constants.user_agent.as_str().into());
        put("REQUEST_TIME", request_time.into());

        Self(map)
    }

    /// Build the map stamped with the current time
    pub fn now(request: &RequestDescriptor, constants: &ServerConstants) -> Self {
        Self::build(request, constants, chrono::Utc::now().timestamp())
    }

    /// Value by key
    pub fn get(&self, key: &str) -> Option<&ScriptValue> {
        self.0.get(key)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<ServerInfo> for ScriptValue {
    fn from(info: ServerInfo) -> Self {
        ScriptValue::Map(info.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_string() {
        assert_eq!(RequestDescriptor::get("/users?id=4&x=1").query_string(), "id=4&x=1");
        assert_eq!(RequestDescriptor::get("/users?a?b").query_string(), "a?b");
        assert_eq!(RequestDescriptor::get("/users").query_string(), "");
        assert_eq!(RequestDescriptor::get("/users?").query_string(), "");
        assert_eq!(RequestDescriptor::get("/users?id=4").path(), "/users");
    }

    #[test]
    fn test_validate() {
        assert!(RequestDescriptor::get("/").validate().is_ok());
        assert!(RequestDescriptor::new("", "/").validate().is_err());
        assert!(RequestDescriptor::new("GE T", "/").validate().is_err());
        assert!(RequestDescriptor::new("GET", "").validate().is_err());
    }

    #[test]
    fn test_cookie_parsing() {
        let cookies = CookieMap::parse("a=1; b=2;  c=3");
        assert_eq!(cookies.len(), 3);
        assert_eq!(cookies.get("a"), Some("1"));
        assert_eq!(cookies.get("b"), Some("2"));
        assert_eq!(cookies.get("c"), Some("3"));
    }

    #[test]
    fn test_cookie_segment_without_equals_is_dropped() {
        let cookies = CookieMap::parse("flag; session=abc=def;;");
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies.get("session"), Some("abc=def"));
        assert!(cookies.get("flag").is_none());
    }

    #[test]
    fn test_cookie_duplicates_last_wins() {
        let cookies = CookieMap::parse("a=1; a=2");
        assert_eq!(cookies.get("a"), Some("2"));
    }

    #[test]
    fn test_empty_cookie_header() {
        assert!(CookieMap::parse("").is_empty());
    }

    #[test]
    fn test_content_type_normalization() {
        assert_eq!(
            normalize_content_type(Some("application/json; charset=utf-8")),
            "application/json"
        );
        assert_eq!(normalize_content_type(Some("text/plain")), FORM_CONTENT_TYPE);
        assert_eq!(normalize_content_type(Some("multipart/form-data")), FORM_CONTENT_TYPE);
        assert_eq!(normalize_content_type(None), FORM_CONTENT_TYPE);
    }

    #[test]
    fn test_form_parsing_decision() {
        let normalized = normalize_content_type(Some("text/plain"));
        assert!(parses_form_body(normalized, "POST"));
        assert!(parses_form_body(FORM_CONTENT_TYPE, "GET"));
        assert!(parses_form_body(JSON_CONTENT_TYPE, "PATCH"));
        assert!(!parses_form_body(JSON_CONTENT_TYPE, "GET"));
        assert!(!parses_form_body(JSON_CONTENT_TYPE, "post"));
    }

    #[test]
    fn test_server_info() {
        let request = RequestDescriptor::get("/profile?tab=2");
        let info = ServerInfo::build(&request, &ServerConstants::default(), 1_700_000_000);

        assert_eq!(info.get("REQUEST_METHOD"), Some(&ScriptValue::from("GET")));
        assert_eq!(info.get("REQUEST_URI"), Some(&ScriptValue::from("/profile?tab=2")));
        assert_eq!(info.get("QUERY_STRING"), Some(&ScriptValue::from("tab=2")));
        assert_eq!(info.get("SERVER_PORT"), Some(&ScriptValue::from("80")));
        assert_eq!(info.get("HTTPS"), Some(&ScriptValue::from("off")));
        assert_eq!(info.get("REQUEST_TIME"), Some(&ScriptValue::Int(1_700_000_000)));
        assert_eq!(info.len(), 15);
    }
}
