//! Image tag references.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

/// A parsed `repository[:tag]` image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagReference {
    /// Repository including registry host, e.g. `registry.local/app`
    pub repository: String,
    /// Tag, `latest` when the reference carried none
    pub tag: String,
}

fn reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<repo>(?:[a-z0-9]+(?:[._-][a-z0-9]+)*:[0-9]+/)?[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*)*)(?::(?P<tag>[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}))?$",
        )
        .expect("static reference pattern is valid")
    })
}

impl TagReference {
    /// Parse a tag reference.
    pub fn parse(reference: &str) -> Result<Self, String> {
        let caps = reference_regex()
            .captures(reference)
            .ok_or_else(|| format!("invalid image reference '{reference}'"))?;
        Ok(Self {
            repository: caps["repo"].to_string(),
            tag: caps
                .name("tag")
                .map_or_else(|| "latest".to_string(), |m| m.as_str().to_string()),
        })
    }

    /// The same repository with a different tag
    #[must_use]
    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        Self {
            repository: self.repository.clone(),
            tag: tag.into(),
        }
    }
}

impl fmt::Display for TagReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}
