use std::{fmt, str::FromStr};

use crate::model::error::StubError;

/// Dotted identifier of a service class, e.g. `S3` or `DynamoDB.DocumentClient`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServicePath {
    segments: Vec<String>,
}

impl ServicePath {
    pub fn parse(path: &str) -> Result<Self, StubError> {
        let segments: Vec<String> = path.split('.').map(|s| s.to_string()).collect();

        if segments.iter().any(|s| !is_valid_segment(s)) {
            return Err(StubError::InvalidPath(path.to_string()));
        }

        Ok(Self { segments })
    }

    /// Single segment path for a service name known to be well formed.
    pub(crate) fn builtin(name: &str) -> Self {
        Self {
            segments: vec![name.to_string()],
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn leaf(&self) -> &str {
        // never empty, `parse` rejects ""
        self.segments.last().map(|s| s.as_str()).unwrap_or_default()
    }

    pub fn parent(&self) -> Option<ServicePath> {
        if self.segments.len() < 2 {
            return None;
        }

        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }
}

fn is_valid_segment(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }

    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl FromStr for ServicePath {
    type Err = StubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for ServicePath {
    type Error = StubError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl fmt::Display for ServicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}
