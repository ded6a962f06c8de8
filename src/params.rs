//! Route patterns and path-parameter extraction.
//!
//! A pattern is a `/`-separated list of segments. A segment written as
//! `:name` binds whatever the request has in that position; any other
//! segment must match literally. Empty segments are ignored on both sides,
//! so `/users//42/` and `/users/42` are the same path to the matcher.
//!
//! Matching is all-or-nothing: the segment counts must be equal. The single
//! exception is the pattern `*`, which matches every path and binds nothing.

use std::collections::HashMap;

use thiserror::Error;

/// Parameters bound by a successful match, keyed by name.
pub type Params = HashMap<String, String>;

/// Why a route pattern was refused at registration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("pattern `{0}` must start with `/` or be `*`")]
    NotAbsolute(String),

    #[error("pattern `{0}` has a parameter with no name")]
    EmptyParam(String),

    #[error("pattern `{pattern}` binds `{name}` more than once")]
    DuplicateParam { pattern: String, name: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A pre-parsed route pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pattern {
    raw: String,
    kind: Kind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Kind {
    Wildcard,
    Segments(Vec<Segment>),
}

impl Pattern {
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        if raw == "*" {
            return Ok(Self { raw: raw.to_owned(), kind: Kind::Wildcard });
        }
        if !raw.starts_with('/') {
            return Err(PatternError::NotAbsolute(raw.to_owned()));
        }

        let mut segments = Vec::new();
        for part in raw.split('/').filter(|s| !s.is_empty()) {
            let Some(name) = part.strip_prefix(':') else {
                segments.push(Segment::Literal(part.to_owned()));
                continue;
            };
            if name.is_empty() {
                return Err(PatternError::EmptyParam(raw.to_owned()));
            }
            let taken = segments.iter().any(|s| matches!(s, Segment::Param(n) if n == name));
            if taken {
                return Err(PatternError::DuplicateParam {
                    pattern: raw.to_owned(),
                    name: name.to_owned(),
                });
            }
            segments.push(Segment::Param(name.to_owned()));
        }

        Ok(Self { raw: raw.to_owned(), kind: Kind::Segments(segments) })
    }

    /// The pattern as it was registered.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_wildcard(&self) -> bool {
        self.kind == Kind::Wildcard
    }

    /// Matches `path` against this pattern.
    ///
    /// Returns the bound parameters (empty for a fully static pattern), or
    /// `None` when the segment counts differ or a literal disagrees.
    pub fn matches(&self, path: &str) -> Option<Params> {
        let segments = match &self.kind {
            Kind::Wildcard => return Some(Params::new()),
            Kind::Segments(segments) => segments,
        };

        let actual: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if actual.len() != segments.len() {
            return None;
        }

        let mut params = Params::new();
        for (expected, got) in segments.iter().zip(actual) {
            match expected {
                Segment::Literal(lit) if lit == got => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), got.to_owned());
                }
            }
        }
        Some(params)
    }
}

/// One-shot form of [`Pattern::matches`] for callers holding a raw pattern.
///
/// An invalid pattern never matches.
pub fn match_path(registered: &str, actual: &str) -> Option<Params> {
    Pattern::parse(registered).ok()?.matches(actual)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_a_single_param() {
        let params = match_path("/users/:id", "/users/42").unwrap();
        assert_eq!(params.get("id").map(String::as_str), Some("42"));
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn segment_count_must_agree() {
        assert!(match_path("/users/:id", "/users/42/extra").is_none());
        assert!(match_path("/users/:id", "/users").is_none());
    }

    #[test]
    fn static_match_yields_empty_params() {
        assert_eq!(match_path("/health", "/health"), Some(Params::new()));
        assert_eq!(match_path("/", "/"), Some(Params::new()));
        assert!(match_path("/health", "/Health").is_none());
    }

    #[test]
    fn empty_segments_are_ignored() {
        let params = match_path("/a/:b", "//a///x/").unwrap();
        assert_eq!(params["b"], "x");
    }

    #[test]
    fn mixes_literals_and_params() {
        let params = match_path("/orgs/:org/repos/:repo", "/orgs/rust/repos/cargo").unwrap();
        assert_eq!(params["org"], "rust");
        assert_eq!(params["repo"], "cargo");
        assert!(match_path("/orgs/:org/repos/:repo", "/orgs/rust/issues/cargo").is_none());
    }

    #[test]
    fn wildcard_matches_anything() {
        let p = Pattern::parse("*").unwrap();
        assert!(p.is_wildcard());
        assert_eq!(p.matches("/any/depth/at/all"), Some(Params::new()));
        assert_eq!(p.matches("/"), Some(Params::new()));
    }

    #[test]
    fn rejects_bad_patterns() {
        assert_eq!(
            Pattern::parse("users"),
            Err(PatternError::NotAbsolute("users".into()))
        );
        assert_eq!(
            Pattern::parse("/users/:"),
            Err(PatternError::EmptyParam("/users/:".into()))
        );
        assert!(matches!(
            Pattern::parse("/a/:id/b/:id"),
            Err(PatternError::DuplicateParam { .. })
        ));
    }
}
