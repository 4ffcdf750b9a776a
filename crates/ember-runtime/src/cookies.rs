//! Cookie jar for serve mode

use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::trace;

/// Cookies set by scripts, replayed on later requests as the ambient cookie
/// header
#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: RwLock<BTreeMap<String, String>>,
}

impl CookieJar {
    /// Empty jar
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one `Set-Cookie` header value.
    ///
    /// `Max-Age` of zero or less removes the cookie; other attributes are
    /// ignored.
    pub fn store(&self, set_cookie: &str) {
        let mut parts = set_cookie.split(';');
        let Some((name, value)) = parts.next().and_then(|pair| pair.split_once('=')) else {
            return;
        };
        let name = name.trim();
        if name.is_empty() {
            return;
        }

        let expired = parts.any(|attr| {
            attr.trim()
                .split_once('=')
                .filter(|(key, _)| key.trim().eq_ignore_ascii_case("max-age"))
                .and_then(|(_, age)| age.trim().parse::<i64>().ok())
                .is_some_and(|age| age <= 0)
        });

        let mut cookies = self.cookies.write();
        if expired {
            trace!(cookie = name, "Cookie expired");
            cookies.remove(name);
        } else {
            trace!(cookie = name, "Cookie stored");
            cookies.insert(name.to_string(), value.trim().to_string());
        }
    }

    /// Apply every `Set-Cookie` value in `headers`
    pub fn store_all<'a>(&self, headers: impl IntoIterator<Item = &'a str>) {
        for header in headers {
            self.store(header);
        }
    }

    /// Cookie header for the next request, `None` when the jar is empty
    pub fn header(&self) -> Option<String> {
        let cookies = self.cookies.read();
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Value of one cookie
    pub fn get(&self, name: &str) -> Option<String> {
        self.cookies.read().get(name).cloned()
    }

    /// Number of cookies held
    pub fn len(&self) -> usize {
        self.cookies.read().len()
    }

    /// Whether the jar is empty
    pub fn is_empty(&self) -> bool {
        self.cookies.read().is_empty()
    }

    /// Drop every cookie
    pub fn clear(&self) {
        self.cookies.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_header() {
        let jar = CookieJar::new();
        jar.store("sid=abc; Path=/; HttpOnly");
        jar.store("theme=dark");

        assert_eq!(jar.get("sid").as_deref(), Some("abc"));
        assert_eq!(jar.header().as_deref(), Some("sid=abc; theme=dark"));
    }

    #[test]
    fn test_overwrite_and_expire() {
        let jar = CookieJar::new();
        jar.store("sid=abc");
        jar.store("sid=def");
        assert_eq!(jar.get("sid").as_deref(), Some("def"));

        jar.store("sid=deleted; expires=Thu, 01 Jan 1970 00:00:01 GMT; Max-Age=0");
        assert!(jar.is_empty());
        assert!(jar.header().is_none());
    }

    #[test]
    fn test_invalid_set_cookie_ignored() {
        let jar = CookieJar::new();
        jar.store("novalue");
        jar.store("=orphan");
        assert_eq!(jar.len(), 0);
    }
}
