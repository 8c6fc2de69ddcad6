//! HTTP headers handling
//!
//! This module provides a bounded header table with case-insensitive
//! lookups and support for multiple values per header name. The same type
//! backs the collected request headers and the headers accumulated for a
//! response.

use super::{Error, Result, MAX_HEADERS};

/// HTTP headers collection
///
/// Headers are stored in insertion order and support:
/// - Case-insensitive header name lookups
/// - Multiple values for the same header name
/// - A fixed capacity; inserts beyond it are dropped
#[derive(Debug, Clone)]
pub struct Headers {
    headers: Vec<(String, String)>,
    capacity: usize,
}

impl Headers {
    /// Create a new empty headers collection holding up to `MAX_HEADERS`
    pub fn new() -> Self {
        Self::with_capacity(MAX_HEADERS)
    }

    /// Create a new empty headers collection holding up to `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Headers {
            headers: Vec::new(),
            capacity,
        }
    }

    /// Insert a header
    ///
    /// If a header with the same name (case-insensitive) already exists,
    /// this adds another value rather than replacing it. Returns false when
    /// the table is full and the header was dropped.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> bool {
        if self.headers.len() >= self.capacity {
            return false;
        }

        self.headers.push((name.into(), value.into()));
        true
    }

    /// Replace every value of `name` with a single new one
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> bool {
        let name = name.into();
        self.remove(&name);
        self.insert(name, value)
    }

    /// Get the first value for a header (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get all values for a header (case-insensitive)
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Name of the header at `index`
    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.headers.get(index).map(|(n, _)| n.as_str())
    }

    /// Value of the header at `index`
    pub fn value_at(&self, index: usize) -> Option<&str> {
        self.headers.get(index).map(|(_, v)| v.as_str())
    }

    /// Check if a header exists
    pub fn contains(&self, name: &str) -> bool {
        self.headers
            .iter()
            .any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Remove all instances of a header (case-insensitive)
    pub fn remove(&mut self, name: &str) -> usize {
        let initial_len = self.headers.len();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        initial_len - self.headers.len()
    }

    /// Get the number of headers
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Check if there are no headers
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Maximum number of headers retained
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Clear all headers
    pub fn clear(&mut self) {
        self.headers.clear();
    }

    /// Iterate over all headers
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Append the headers in wire format (`Name: value\r\n` each)
    pub fn write_wire(&self, buf: &mut Vec<u8>) {
        for (name, value) in &self.headers {
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
    }

    /// Parse a header line into name and value
    pub fn parse_header_line(line: &str) -> Result<(&str, &str)> {
        if let Some(colon_pos) = line.find(':') {
            let name = line[..colon_pos].trim();
            let value = line[colon_pos + 1..].trim();

            if name.is_empty() {
                return Err(Error::InvalidHeader("Empty header name".to_string()));
            }

            Ok((name, value))
        } else {
            Err(Error::InvalidHeader(format!("No colon in header: {}", line)))
        }
    }
}

impl Default for Headers {
    fn default() -> Self {
        Self::new()
    }
}

/// Allow-list of request header names worth keeping
///
/// Matching is case-insensitive. `Authorization` is always included so
/// basic authentication works regardless of what the caller collects.
#[derive(Debug, Clone)]
pub struct HeaderAllowList {
    names: Vec<String>,
}

impl HeaderAllowList {
    pub const AUTHORIZATION: &'static str = "Authorization";

    /// Build an allow-list from header names
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list = HeaderAllowList {
            names: vec![Self::AUTHORIZATION.to_string()],
        };
        for name in names {
            let name = name.into();
            if !list.allows(&name) {
                list.names.push(name);
            }
        }
        list
    }

    /// Whether `name` should be stored
    pub fn allows(&self, name: &str) -> bool {
        self.names.iter().any(|n| n.eq_ignore_ascii_case(name))
    }

    /// Number of names in the list
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Always false: the list carries `Authorization` at minimum
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for HeaderAllowList {
    fn default() -> Self {
        Self::new(std::iter::empty::<String>())
    }
}
