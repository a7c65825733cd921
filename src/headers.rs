//! Header fields as an ordered multimap.
//!
//! Relative field order is significant: it is preserved end-to-end through
//! the proxy, and duplicate names (`Set-Cookie`, `Via`) are legal. Names are
//! matched case-insensitively but stored with their original case.

use std::fmt;
use std::slice;

/// A single header field as it appeared on the wire.
///
/// The value holds the raw octets with surrounding optional whitespace
/// removed; it is not required to be UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: String,
    pub value: Vec<u8>,
}

impl HeaderField {
    pub fn new(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }
}

impl fmt::Display for HeaderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, String::from_utf8_lossy(&self.value))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    fields: Vec<HeaderField>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Appends a field at the end, keeping insertion order.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.fields.push(HeaderField::new(name, value));
    }

    /// First value for `name`, matched case-insensitively.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
            .map(|f| f.value.as_slice())
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| std::str::from_utf8(v).ok())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.fields
            .iter()
            .filter(move |f| f.name.eq_ignore_ascii_case(name))
            .map(|f| f.value.as_slice())
    }

    pub fn count(&self, name: &str) -> usize {
        self.get_all(name).count()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Removes every occurrence of `name`, returning how many were removed.
    pub fn remove_all(&mut self, name: &str) -> usize {
        let before = self.fields.len();
        self.fields.retain(|f| !f.name.eq_ignore_ascii_case(name));
        before - self.fields.len()
    }

    pub fn iter(&self) -> slice::Iter<'_, HeaderField> {
        self.fields.iter()
    }

    /// Lowercased comma-separated tokens across every occurrence of `name`,
    /// in wire order. Used for list-valued fields such as `Connection` and
    /// `Transfer-Encoding`.
    pub fn token_list(&self, name: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        for value in self.get_all(name) {
            let value = String::from_utf8_lossy(value);
            for token in value.split(',') {
                let token = token.trim_matches([' ', '\t']);
                if !token.is_empty() {
                    tokens.push(token.to_ascii_lowercase());
                }
            }
        }
        tokens
    }

    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.token_list(name).iter().any(|t| t == token)
    }
}

impl IntoIterator for HeaderMap {
    type Item = HeaderField;
    type IntoIter = std::vec::IntoIter<HeaderField>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl<'a> IntoIterator for &'a HeaderMap {
    type Item = &'a HeaderField;
    type IntoIter = slice::Iter<'a, HeaderField>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

impl FromIterator<HeaderField> for HeaderMap {
    fn from_iter<T: IntoIterator<Item = HeaderField>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// `tchar` per RFC 9110 §5.6.2.
pub fn is_tchar(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.'
        | b'^' | b'_' | b'`' | b'|' | b'~'
        | b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z')
}

pub fn is_token(s: &[u8]) -> bool {
    !s.is_empty() && s.iter().all(|&b| is_tchar(b))
}

/// Strips optional whitespace (SP / HTAB) from both ends.
pub fn trim_ows(mut s: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = s {
        s = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = s {
        s = rest;
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_and_duplicates_preserved() {
        let mut map = HeaderMap::new();
        map.append("Set-Cookie", "a=1");
        map.append("Host", "example.com");
        map.append("Set-Cookie", "b=2");

        let names: Vec<&str> = map.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["Set-Cookie", "Host", "Set-Cookie"]);

        let cookies: Vec<&[u8]> = map.get_all("set-cookie").collect();
        assert_eq!(cookies, [b"a=1".as_slice(), b"b=2".as_slice()]);
    }

    #[test]
    fn case_insensitive_lookup() {
        let mut map = HeaderMap::new();
        map.append("Content-Length", "5");
        assert_eq!(map.get("content-length"), Some(b"5".as_slice()));
        assert_eq!(map.get_str("CONTENT-LENGTH"), Some("5"));
        assert!(map.contains("Content-length"));
        assert!(!map.contains("Content-Type"));
    }

    #[test]
    fn remove_all_removes_every_occurrence() {
        let mut map = HeaderMap::new();
        map.append("Via", "1.1 a");
        map.append("Host", "h");
        map.append("VIA", "1.1 b");
        assert_eq!(map.remove_all("via"), 2);
        assert_eq!(map.len(), 1);
        assert!(!map.contains("via"));
    }

    #[test]
    fn token_list_splits_across_occurrences() {
        let mut map = HeaderMap::new();
        map.append("Connection", "keep-alive, X-Debug");
        map.append("Connection", "close");
        assert_eq!(map.token_list("connection"), ["keep-alive", "x-debug", "close"]);
        assert!(map.has_token("connection", "close"));
        assert!(!map.has_token("connection", "upgrade"));
    }

    #[test]
    fn token_chars() {
        assert!(is_token(b"Content-Length"));
        assert!(is_token(b"x!#$%&'*+-.^_`|~09azAZ"));
        assert!(!is_token(b""));
        assert!(!is_token(b"bad header"));
        assert!(!is_token(b"bad:name"));
    }

    #[test]
    fn ows_trimming() {
        assert_eq!(trim_ows(b"  \t value \t "), b"value");
        assert_eq!(trim_ows(b"value"), b"value");
        assert_eq!(trim_ows(b" \t "), b"");
    }
}
