//! Common types for txmail

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Unique identifier for templates
pub type TemplateId = i64;

/// Unique identifier for subscribers
pub type SubscriberId = i64;

/// Header that, when present on an outgoing message, becomes the SMTP envelope sender
pub const HEADER_RETURN_PATH: &str = "Return-Path";

/// Body content type of an outgoing message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Html,
    Plain,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Html => "html",
            ContentType::Plain => "plain",
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered header multimap.
///
/// Names compare case-insensitively and keep the spelling of their first
/// insertion. A name may carry several values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, Vec<String>)>,
}

impl Headers {
    /// Create an empty header set
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))
    }

    /// Append a value, keeping any existing values under the same name
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        match self.position(&name) {
            Some(idx) => self.entries[idx].1.push(value.into()),
            None => self.entries.push((name, vec![value.into()])),
        }
    }

    /// Replace every value under `name` with a single value
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        match self.position(&name) {
            Some(idx) => self.entries[idx].1 = vec![value.into()],
            None => self.entries.push((name, vec![value.into()])),
        }
    }

    /// First value stored under `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name)
            .and_then(|idx| self.entries[idx].1.first())
            .map(String::as_str)
    }

    /// All values stored under `name`
    pub fn get_all(&self, name: &str) -> &[String] {
        match self.position(name) {
            Some(idx) => &self.entries[idx].1,
            None => &[],
        }
    }

    /// Remove `name` and return its values
    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.position(name).map(|idx| self.entries.remove(idx).1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Add every value of `other` after the values already present
    pub fn extend_from(&mut self, other: &Headers) {
        for (name, value) in other.iter() {
            self.add(name, value);
        }
    }

    /// Iterate over `(name, value)` pairs, one per value, in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().flat_map(|(name, values)| {
            values.iter().map(move |value| (name.as_str(), value.as_str()))
        })
    }

    /// Number of distinct header names
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.add(name, value);
        }
        headers
    }
}

/// Accepted wire shapes: `{name: value, ...}` or `[{name: value}, ...]`.
/// The list form preserves ordering across formats that sort map keys.
#[derive(Deserialize)]
#[serde(untagged)]
enum HeadersRepr {
    List(Vec<BTreeMap<String, String>>),
    Map(BTreeMap<String, String>),
}

impl<'de> Deserialize<'de> for Headers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let headers = match HeadersRepr::deserialize(deserializer)? {
            HeadersRepr::List(sets) => sets.into_iter().flatten().collect(),
            HeadersRepr::Map(map) => map.into_iter().collect(),
        };
        Ok(headers)
    }
}

impl Serialize for Headers {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let sets: Vec<BTreeMap<&str, &str>> = self
            .iter()
            .map(|(name, value)| BTreeMap::from([(name, value)]))
            .collect();
        sets.serialize(serializer)
    }
}

/// File attached to an outgoing message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    #[serde(default)]
    pub headers: Headers,
    pub content: Vec<u8>,
}

impl Attachment {
    /// MIME type from the attachment's `Content-Type` header, if any
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("Content-Type")
    }
}

/// Subscriber a transactional message is addressed to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    #[serde(default)]
    pub id: SubscriberId,
    #[serde(default)]
    pub uuid: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub attribs: serde_json::Map<String, serde_json::Value>,
    #[serde(default = "default_subscriber_status")]
    pub status: String,
}

fn default_subscriber_status() -> String {
    "enabled".to_string()
}

impl Subscriber {
    /// Unsaved subscriber carrying only an address
    pub fn synthetic(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            status: default_subscriber_status(),
            ..Default::default()
        }
    }

    /// Whether this subscriber exists in the subscriber store
    pub fn is_synthetic(&self) -> bool {
        self.id == 0
    }
}

/// Transactional template as held by the template store.
///
/// A metadata-only fetch leaves the sources empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    #[serde(default)]
    pub name: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub alt_body: Option<String>,
}

impl Template {
    /// Copy of this template without its sources
    pub fn metadata(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            updated_at: self.updated_at,
            subject: String::new(),
            body: String::new(),
            alt_body: None,
        }
    }
}

/// Transport-agnostic message handed to a messenger backend
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub to: Vec<String>,
    pub from: String,
    pub subject: String,
    pub content_type: ContentType,
    pub body: String,
    pub alt_body: Option<String>,
    pub headers: Headers,
    pub attachments: Vec<Attachment>,
    pub subscriber: Option<Subscriber>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_headers_case_insensitive_lookup() {
        let mut headers = Headers::new();
        headers.add("X-Campaign", "welcome");

        assert_eq!(headers.get("x-campaign"), Some("welcome"));
        assert!(headers.contains("X-CAMPAIGN"));
        assert_eq!(headers.get("X-Other"), None);
    }

    #[test]
    fn test_headers_add_keeps_duplicates() {
        let mut headers = Headers::new();
        headers.add("X-Tag", "a");
        headers.add("x-tag", "b");

        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get_all("X-Tag"), ["a".to_string(), "b".to_string()]);
        assert_eq!(
            headers.iter().collect::<Vec<_>>(),
            vec![("X-Tag", "a"), ("X-Tag", "b")]
        );
    }

    #[test]
    fn test_headers_set_replaces() {
        let mut headers = Headers::new();
        headers.add("X-Tag", "a");
        headers.add("X-Tag", "b");
        headers.set("x-tag", "c");

        assert_eq!(headers.get_all("X-Tag"), ["c".to_string()]);
    }

    #[test]
    fn test_headers_remove() {
        let mut headers: Headers = [("Return-Path", "bounce@example.com"), ("X-A", "1")]
            .into_iter()
            .collect();

        let removed = headers.remove("return-path");
        assert_eq!(removed, Some(vec!["bounce@example.com".to_string()]));
        assert!(!headers.contains("Return-Path"));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_headers_deserialize_list_and_map() {
        let list: Headers =
            serde_json::from_str(r#"[{"X-B": "2"}, {"X-A": "1"}, {"x-b": "3"}]"#).unwrap();
        assert_eq!(
            list.iter().collect::<Vec<_>>(),
            vec![("X-B", "2"), ("X-B", "3"), ("X-A", "1")]
        );

        let map: Headers = serde_json::from_str(r#"{"X-A": "1"}"#).unwrap();
        assert_eq!(map.get("X-A"), Some("1"));
    }

    #[test]
    fn test_subscriber_synthetic() {
        let sub = Subscriber::synthetic("x@y.com");
        assert!(sub.is_synthetic());
        assert_eq!(sub.email, "x@y.com");
        assert_eq!(sub.status, "enabled");
    }

    #[test]
    fn test_content_type_parse() {
        let ct: ContentType = serde_json::from_str(r#""plain""#).unwrap();
        assert_eq!(ct, ContentType::Plain);
        assert_eq!(ContentType::default(), ContentType::Html);
        assert!(serde_json::from_str::<ContentType>(r#""markdown""#).is_err());
    }
}
