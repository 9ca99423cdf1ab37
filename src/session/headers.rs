//! Case-insensitive header set persisted per session.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::ser::{Serialize, SerializeMap, Serializer};
use thiserror::Error;

/// Rejected header name or value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidHeader {
    #[error("Invalid header name: '{0}'")]
    Name(String),
    #[error("Invalid value for header '{0}'")]
    Value(String),
}

/// Ordered header set with case-insensitive names.
///
/// Names keep the casing they were last inserted with so that callers read
/// back exactly what they set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    entries: Vec<(String, String)>,
}

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a validated set from name/value pairs. Later duplicates win.
    pub fn try_from_pairs<I, K, V>(pairs: I) -> Result<Self, InvalidHeader>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut set = Self::new();
        for (name, value) in pairs {
            set.try_insert(name.into(), value.into())?;
        }
        Ok(set)
    }

    /// Insert after validating the name and value as HTTP tokens.
    pub fn try_insert(&mut self, name: String, value: String) -> Result<(), InvalidHeader> {
        if HeaderName::from_bytes(name.as_bytes()).is_err() {
            return Err(InvalidHeader::Name(name));
        }
        if HeaderValue::from_str(&value).is_err() {
            return Err(InvalidHeader::Value(name));
        }
        match self.position(&name) {
            Some(i) => self.entries[i] = (name, value),
            None => self.entries.push((name, value)),
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.entries[i].1.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Copy of `self` with `overrides` applied on top; overrides win on collision.
    pub fn overlay(&self, overrides: &HeaderSet) -> HeaderSet {
        let mut merged = self.clone();
        for (name, value) in &overrides.entries {
            match merged.position(name) {
                Some(i) => merged.entries[i] = (name.clone(), value.clone()),
                None => merged.entries.push((name.clone(), value.clone())),
            }
        }
        merged
    }

    /// Convert for use on an outbound request.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.entries.len());
        for (name, value) in &self.entries {
            // entries are validated on insert
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                map.insert(name, value);
            }
        }
        map
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))
    }
}

impl Serialize for HeaderSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
