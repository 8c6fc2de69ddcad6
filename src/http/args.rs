//! Request arguments: query string and form fields
//!
//! Arguments keep insertion order and keep duplicate keys as separate
//! entries, so `?a=1&a=2` yields two arguments addressable by index.
//! Lookups by name are case-sensitive and return the first match.

/// Argument table with a fixed capacity
#[derive(Debug, Clone)]
pub struct Arguments {
    entries: Vec<(String, String)>,
    capacity: usize,
}

impl Arguments {
    /// Create an empty table holding up to `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Arguments {
            entries: Vec::new(),
            capacity,
        }
    }

    /// Append an argument; returns false if the table is full
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        if self.entries.len() >= self.capacity {
            log::warn!("argument table full ({}), dropping entry", self.capacity);
            return false;
        }
        self.entries.push((key.into(), value.into()));
        true
    }

    /// Value of the first argument named `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Whether an argument named `name` exists
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == name)
    }

    /// Name of the argument at `index`
    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|(k, _)| k.as_str())
    }

    /// Value of the argument at `index`
    pub fn value_at(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterate over `(name, value)` pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parse `a=1&b=2` style data and append every pair
    ///
    /// Segments without `=` become a key with an empty value; empty
    /// segments are skipped. Keys and values are percent-decoded.
    pub fn parse_urlencoded(&mut self, data: &str) {
        for segment in data.split('&') {
            if segment.is_empty() {
                continue;
            }

            let (key, value) = match segment.split_once('=') {
                Some((key, value)) => (key, value),
                None => (segment, ""),
            };

            if !self.push(url_decode(key), url_decode(value)) {
                break;
            }
        }
    }
}

impl Default for Arguments {
    fn default() -> Self {
        Self::with_capacity(32)
    }
}

/// Decode `application/x-www-form-urlencoded` text
///
/// `+` becomes a space and `%XX` with two hex digits becomes that byte. A
/// `%` not followed by two hex digits is kept literally. The decoded bytes
/// are interpreted as UTF-8, replacing invalid sequences.
pub fn url_decode(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => decoded.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        decoded.push(hi << 4 | lo);
                        i += 2;
                    }
                    _ => decoded.push(b'%'),
                }
            }
            byte => decoded.push(byte),
        }
        i += 1;
    }

    String::from_utf8_lossy(&decoded).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
