//! Collaborator contracts supplied by the embedding host
//!
//! The engine never performs I/O itself. Instance `src` loads go through a
//! [`ResourceResolver`], submissions through [`SubmissionProcessor`]s, and the
//! optional hooks let a host override serialization or observe refreshes.

use std::rc::Rc;

use thiserror::Error;
use url::Url;

use crate::dom::XmlDocument;
use crate::engine::ControlView;

/// Failure reported by a [`ResourceResolver`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("resource unavailable: {0}")]
    Unavailable(String),
}

/// Fetches the bytes behind a URI
pub trait ResourceResolver {
    fn get(&self, uri: &Url) -> Result<Vec<u8>, ResolveError>;
}

/// How strongly a processor wants a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Ignore,
    Low,
    Normal,
    High,
}

/// Header multimap that keeps insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionHeaders {
    entries: Vec<(String, String)>,
}

impl SubmissionHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value, keeping earlier values for the same name
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value for `name` (case-insensitive)
    pub fn get<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        self.get_all(name).next()
    }

    /// Every value for `name` in insertion order (case-insensitive)
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Request handed to a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRequest {
    pub resource: Url,
    /// Lower-cased method name (`get`, `post`, `put`, ...)
    pub method: String,
    pub serialization: Option<String>,
    pub media_type: Option<String>,
    pub encoding: Option<String>,
    pub headers: SubmissionHeaders,
    /// Serialized instance data; `None` when serialization is `none`
    pub body: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStatus {
    Success,
    Error,
}

/// Transport answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionResponse {
    pub status: SubmissionStatus,
    pub body: Option<String>,
}

impl SubmissionResponse {
    pub fn success(body: Option<String>) -> Self {
        SubmissionResponse {
            status: SubmissionStatus::Success,
            body,
        }
    }

    pub fn error(body: Option<String>) -> Self {
        SubmissionResponse {
            status: SubmissionStatus::Error,
            body,
        }
    }
}

/// A pluggable submission transport
pub trait SubmissionProcessor {
    /// How much this processor wants `request`; `Ignore` declines it
    fn can_submit(&self, request: &SubmissionRequest) -> Priority;

    fn submit(&self, request: &SubmissionRequest) -> SubmissionResponse;
}

/// Overrides the body built for a submission
pub trait SerializeHook {
    /// Return `Some(body)` to replace the default XML serialization of `data`
    fn serialize(&self, request: &SubmissionRequest, data: &XmlDocument) -> Option<String>;
}

/// Called for every control after its binding is refreshed
pub trait RefreshHook {
    fn refresh(&self, control: &ControlView);
}

/// Transport that answers `get` requests through a [`ResourceResolver`]
pub struct ResolverProcessor {
    resolver: Rc<dyn ResourceResolver>,
}

impl ResolverProcessor {
    pub fn new(resolver: Rc<dyn ResourceResolver>) -> Self {
        ResolverProcessor { resolver }
    }
}

impl std::fmt::Debug for ResolverProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverProcessor").finish_non_exhaustive()
    }
}

impl SubmissionProcessor for ResolverProcessor {
    fn can_submit(&self, request: &SubmissionRequest) -> Priority {
        if request.method == "get" {
            Priority::Low
        } else {
            Priority::Ignore
        }
    }

    fn submit(&self, request: &SubmissionRequest) -> SubmissionResponse {
        match self.resolver.get(&request.resource) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(text) => SubmissionResponse::success(Some(text)),
                Err(_) => SubmissionResponse::error(None),
            },
            Err(err) => {
                tracing::warn!(resource = %request.resource, error = %err, "resolver submission failed");
                SubmissionResponse::error(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapResolver(HashMap<String, String>);

    impl ResourceResolver for MapResolver {
        fn get(&self, uri: &Url) -> Result<Vec<u8>, ResolveError> {
            self.0
                .get(uri.as_str())
                .map(|s| s.as_bytes().to_vec())
                .ok_or_else(|| ResolveError::NotFound(uri.to_string()))
        }
    }

    fn request(method: &str, uri: &str) -> SubmissionRequest {
        SubmissionRequest {
            resource: Url::parse(uri).unwrap(),
            method: method.to_string(),
            serialization: None,
            media_type: None,
            encoding: None,
            headers: SubmissionHeaders::new(),
            body: None,
        }
    }

    #[test]
    fn test_headers_keep_order_and_duplicates() {
        let mut headers = SubmissionHeaders::new();
        headers.append("Accept", "text/xml");
        headers.append("X-Trace", "1");
        headers.append("accept", "application/xml");
        assert_eq!(headers.get("ACCEPT"), Some("text/xml"));
        assert_eq!(headers.get_all("accept").collect::<Vec<_>>(), vec!["text/xml", "application/xml"]);
        assert_eq!(headers.len(), 3);
    }

    #[test]
    fn test_header_lookup_with_owned_name() {
        let mut headers = SubmissionHeaders::new();
        headers.append("Content-Type", "application/xml");
        let name = String::from("content-type");
        let value = headers.get(&name).map(str::to_string);
        assert_eq!(value.as_deref(), Some("application/xml"));
        assert_eq!(headers.get(&String::from("missing")), None);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Low > Priority::Ignore);
    }

    #[test]
    fn test_resolver_processor_answers_get_only() {
        let mut map = HashMap::new();
        map.insert("http://x/data".to_string(), "<a/>".to_string());
        let processor = ResolverProcessor::new(Rc::new(MapResolver(map)));

        assert_eq!(processor.can_submit(&request("get", "http://x/data")), Priority::Low);
        assert_eq!(processor.can_submit(&request("post", "http://x/data")), Priority::Ignore);

        let found = processor.submit(&request("get", "http://x/data"));
        assert_eq!(found, SubmissionResponse::success(Some("<a/>".to_string())));
        let missing = processor.submit(&request("get", "http://x/none"));
        assert_eq!(missing.status, SubmissionStatus::Error);
    }
}
