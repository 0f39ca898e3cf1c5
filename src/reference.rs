//! Artifact reference parsing.

use crate::error::{Error, Result};

/// A parsed artifact reference: repository plus optional tag.
///
/// The tag is optional at parse time; build-time callers require it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    repository: String,
    tag: Option<String>,
}

impl Reference {
    /// Parse a `<repo>[:<tag>]` reference.
    ///
    /// A colon followed by a path separator belongs to a registry port
    /// (`localhost:5000/models/llama`), not a tag.
    pub fn parse(target: &str) -> Result<Self> {
        if target.is_empty() {
            return Err(Error::InvalidTarget(target.to_string()));
        }

        if let Some((repository, tag)) = target.rsplit_once(':') {
            if !tag.is_empty() && !tag.contains('/') {
                if repository.is_empty() {
                    return Err(Error::InvalidTarget(target.to_string()));
                }
                return Ok(Self {
                    repository: repository.to_string(),
                    tag: Some(tag.to_string()),
                });
            }
        }

        Ok(Self {
            repository: target.to_string(),
            tag: None,
        })
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "{}:{}", self.repository, tag),
            None => write!(f, "{}", self.repository),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_tag() {
        let r = Reference::parse("models/llama:v1").unwrap();
        assert_eq!(r.repository(), "models/llama");
        assert_eq!(r.tag(), Some("v1"));
    }

    #[test]
    fn test_parse_without_tag() {
        let r = Reference::parse("models/llama").unwrap();
        assert_eq!(r.repository(), "models/llama");
        assert_eq!(r.tag(), None);
    }

    #[test]
    fn test_parse_registry_port_is_not_a_tag() {
        let r = Reference::parse("localhost:5000/models/llama").unwrap();
        assert_eq!(r.repository(), "localhost:5000/models/llama");
        assert_eq!(r.tag(), None);

        let r = Reference::parse("localhost:5000/models/llama:v1").unwrap();
        assert_eq!(r.repository(), "localhost:5000/models/llama");
        assert_eq!(r.tag(), Some("v1"));
    }

    #[test]
    fn test_parse_empty_is_invalid() {
        assert!(Reference::parse("").is_err());
        assert!(Reference::parse(":tag").is_err());
    }

    #[test]
    fn test_parse_trailing_colon_has_no_tag() {
        let r = Reference::parse("models/llama:").unwrap();
        assert_eq!(r.tag(), None);
    }

    #[test]
    fn test_display_round_trip() {
        let r = Reference::parse("registry.example.com/models/llama:v2").unwrap();
        assert_eq!(r.to_string(), "registry.example.com/models/llama:v2");
    }
}
