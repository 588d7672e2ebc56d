//! Hierarchical resource paths.
//!
//! A resource pattern such as `/publishers/{publisher}/books/{book}` is an
//! ordered list of literal segments and placeholders. Every placeholder but
//! the last names a parent resource; the last one is the resource's own
//! identifier slot.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::ProviderError;

/// One segment of a [`PathPattern`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal text, appended verbatim.
    Literal(String),
    /// A `{name}` placeholder.
    Placeholder(String),
}

/// A parsed resource path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Parse a `/literal/{placeholder}/...` pattern.
    ///
    /// The leading slash is optional. The pattern must end in a placeholder.
    pub fn parse(pattern: &str) -> Result<Self, ProviderError> {
        let mut segments = Vec::new();
        for raw in pattern.split('/').filter(|s| !s.is_empty()) {
            let segment = match (raw.strip_prefix('{'), raw.ends_with('}')) {
                (Some(inner), true) => {
                    let name = &inner[..inner.len() - 1];
                    if name.is_empty() || name.contains(['{', '}']) {
                        return Err(malformed(pattern));
                    }
                    Segment::Placeholder(name.to_string())
                },
                (None, false) if !raw.contains(['{', '}']) => Segment::Literal(raw.to_string()),
                _ => return Err(malformed(pattern)),
            };
            segments.push(segment);
        }

        match segments.last() {
            Some(Segment::Placeholder(_)) => Ok(Self { segments }),
            _ => Err(ProviderError::Path(format!(
                "pattern '{}' must end with an identifier placeholder",
                pattern
            ))),
        }
    }

    /// All segments, in order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Normalized names of the parent placeholders (all but the final one).
    pub fn parent_parameters(&self) -> Vec<String> {
        self.segments[..self.segments.len() - 1]
            .iter()
            .filter_map(|segment| match segment {
                Segment::Placeholder(name) => Some(parameter_name(name)),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Build the resource path.
    ///
    /// Without an identifier this is the collection path used for create and
    /// list. With one it is the instance path used for read, update and delete.
    /// Parent values that are themselves paths contribute their final segment.
    pub fn build(
        &self,
        parameters: &BTreeMap<String, String>,
        identifier: Option<&str>,
    ) -> Result<String, ProviderError> {
        let mut path = String::new();
        for segment in &self.segments[..self.segments.len() - 1] {
            path.push('/');
            match segment {
                Segment::Literal(text) => path.push_str(text),
                Segment::Placeholder(name) => {
                    let key = parameter_name(name);
                    let value = parameters
                        .get(&key)
                        .filter(|value| !value.is_empty())
                        .ok_or_else(|| {
                            ProviderError::Path(format!("missing value for parameter '{}'", key))
                        })?;
                    path.push_str(last_segment(value));
                },
            }
        }

        if let Some(identifier) = identifier {
            if identifier.is_empty() || identifier.contains('/') {
                return Err(ProviderError::Path(format!(
                    "invalid resource identifier '{}'",
                    identifier
                )));
            }
            path.push('/');
            path.push_str(identifier);
        }
        Ok(path)
    }

    /// Match a canonical path against this pattern.
    ///
    /// Returns the parent parameter values (each as the parent's own canonical
    /// path) and the resource identifier.
    pub fn match_path(&self, path: &str) -> Option<(BTreeMap<String, String>, String)> {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut parameters = BTreeMap::new();
        for (i, (segment, part)) in self.segments.iter().zip(&parts).enumerate() {
            match segment {
                Segment::Literal(text) if text.as_str() != *part => return None,
                Segment::Literal(_) => {},
                Segment::Placeholder(name) if i + 1 < parts.len() => {
                    let parent_path = format!("/{}", parts[..=i].join("/"));
                    parameters.insert(parameter_name(name), parent_path);
                },
                Segment::Placeholder(_) => {},
            }
        }
        Some((parameters, parts[parts.len() - 1].to_string()))
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => write!(f, "/{}", text)?,
                Segment::Placeholder(name) => write!(f, "/{{{}}}", name)?,
            }
        }
        Ok(())
    }
}

fn malformed(pattern: &str) -> ProviderError {
    ProviderError::Path(format!("malformed path pattern '{}'", pattern))
}

/// Normalize a placeholder name into a parameter key.
pub fn parameter_name(placeholder: &str) -> String {
    placeholder
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// The final `/`-separated component of a path.
pub fn last_segment(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

/// Derive the resource identifier from a server-returned canonical path.
///
/// The identifier is the path's final segment. A prior identifier held in
/// state must name the same resource, either as that segment or as the full
/// path; anything else means the remote system and local state disagree.
pub fn reconcile_identifier(
    prior: Option<&str>,
    response_path: &str,
) -> Result<String, ProviderError> {
    let identifier = last_segment(response_path);
    if identifier.is_empty() {
        return Err(ProviderError::Path(format!(
            "response path '{}' has no identifier segment",
            response_path
        )));
    }

    match prior {
        None => Ok(identifier.to_string()),
        Some(prior) if prior == identifier || prior == response_path => Ok(identifier.to_string()),
        Some(prior) => Err(ProviderError::Identity(format!(
            "id from server {} does not match state {}",
            identifier, prior
        ))),
    }
}

/// Join a base URL and an absolute resource path.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
