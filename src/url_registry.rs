// src/url_registry.rs
//!
//! `URLRegistry` tracks, for one build, which producer owns each emitted
//! URL. Claims are monotonic within a build: a higher-priority producer
//! may reclaim a URL a lower-priority one already owns; among equal
//! priority, re-claiming from the same source is a no-op, but a different
//! source claiming the same URL is a collision.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use crate::cache::UrlClaimEntry;

pub(crate) const PRIORITY_CONTENT: u32 = 100;
pub(crate) const PRIORITY_SECTION_INDEX: u32 = 90;
pub(crate) const PRIORITY_AUTODOC: u32 = 80;
pub(crate) const PRIORITY_TAXONOMY: u32 = 40;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "URL collision on {url}: already owned by {existing_owner} (source {existing_source:?}) at priority {existing_priority}, \
     {new_owner} attempted to claim it from {new_source:?} at the same priority"
)]
pub(crate) struct URLCollisionError {
    pub url: String,
    pub existing_owner: String,
    pub existing_source: String,
    pub existing_priority: u32,
    pub new_owner: String,
    pub new_source: String,
}

#[derive(Debug, Clone)]
pub(crate) struct UrlClaim {
    pub owner: String,
    pub source: String,
    pub priority: u32,
    pub version: Option<String>,
    pub lang: Option<String>,
}

/// Normalizes a claimed URL so two logically-identical URLs that differ only
/// in host case, trailing slash or `.`/`..` segments collide as the same
/// claim instead of silently double-claiming. Splits off an optional
/// `scheme://host` prefix, lowercases it, then resolves the path segments.
fn normalize_url(url: &str) -> String {
    let (prefix, path) = match url.split_once("://") {
        Some((scheme, rest)) => {
            let (host, rest) = rest.split_once('/').unwrap_or((rest, ""));
            (format!("{}://{}", scheme.to_lowercase(), host.to_lowercase()), format!("/{rest}"))
        }
        None => (String::new(), url.to_string()),
    };

    let had_trailing_slash = path.ends_with('/') && path != "/";
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let mut resolved = format!("/{}", segments.join("/"));
    if had_trailing_slash && resolved != "/" {
        resolved.push('/');
    }

    format!("{prefix}{resolved}")
}

/// Per-build registry of URL ownership. Not persisted directly — `snapshot`
/// produces the `url_claims` map stored in `BuildCache`.
#[derive(Debug, Default)]
pub(crate) struct URLRegistry {
    claims: HashMap<String, UrlClaim>,
}

impl URLRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Claims `url` for `owner`/`source` at `priority`. Returns `Ok(true)`
    /// if this claim changed ownership, `Ok(false)` if it was already
    /// idempotently held, and `Err` on a collision: same priority from a
    /// different source, or a lower-priority producer trying to claim a
    /// URL a higher-priority one already owns.
    pub(crate) fn claim(
        &mut self,
        url: &str,
        owner: &str,
        source: &str,
        priority: u32,
        version: Option<String>,
        lang: Option<String>,
    ) -> Result<bool, URLCollisionError> {
        let url = &normalize_url(url);
        match self.claims.get(url) {
            None => {
                self.insert(url, owner, source, priority, version, lang);
                Ok(true)
            }
            Some(existing) if priority > existing.priority => {
                debug!(
                    "url_registry::override {} {} (priority {}) -> {} (priority {})",
                    url, existing.owner, existing.priority, owner, priority
                );
                self.insert(url, owner, source, priority, version, lang);
                Ok(true)
            }
            Some(existing) if existing.source == source && existing.owner == owner => Ok(false),
            Some(existing) => Err(URLCollisionError {
                url: url.to_string(),
                existing_owner: existing.owner.clone(),
                existing_source: existing.source.clone(),
                existing_priority: existing.priority,
                new_owner: owner.to_string(),
                new_source: source.to_string(),
            }),
        }
    }

    fn insert(
        &mut self,
        url: &str,
        owner: &str,
        source: &str,
        priority: u32,
        version: Option<String>,
        lang: Option<String>,
    ) {
        self.claims.insert(
            url.to_string(),
            UrlClaim {
                owner: owner.to_string(),
                source: source.to_string(),
                priority,
                version,
                lang,
            },
        );
    }

    pub(crate) fn owner_of(&self, url: &str) -> Option<&str> {
        self.claims.get(url).map(|c| c.owner.as_str())
    }

    pub(crate) fn len(&self) -> usize {
        self.claims.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    /// Snapshot for persistence into `BuildCache.url_claims`.
    pub(crate) fn snapshot(&self) -> HashMap<String, UrlClaimEntry> {
        self.claims
            .iter()
            .map(|(url, claim)| {
                (
                    url.clone(),
                    UrlClaimEntry {
                        owner: claim.owner.clone(),
                        source: claim.source.clone(),
                        priority: claim.priority,
                        version: claim.version.clone(),
                        lang: claim.lang.clone(),
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_claim_succeeds() {
        let mut reg = URLRegistry::new();
        assert_eq!(
            reg.claim("/blog/post/", "content", "blog/post.md", PRIORITY_CONTENT, None, None),
            Ok(true)
        );
        assert_eq!(reg.owner_of("/blog/post/"), Some("content"));
    }

    #[test]
    fn idempotent_reclaim_from_same_source_is_a_no_op() {
        let mut reg = URLRegistry::new();
        reg.claim("/blog/post/", "content", "blog/post.md", PRIORITY_CONTENT, None, None)
            .unwrap();
        assert_eq!(
            reg.claim("/blog/post/", "content", "blog/post.md", PRIORITY_CONTENT, None, None),
            Ok(false)
        );
    }

    #[test]
    fn higher_priority_overrides_lower() {
        let mut reg = URLRegistry::new();
        reg.claim("/tags/rust/", "taxonomy", "tag:rust", PRIORITY_TAXONOMY, None, None)
            .unwrap();
        assert_eq!(
            reg.claim(
                "/tags/rust/",
                "section-index",
                "tags/rust/_index.md",
                PRIORITY_SECTION_INDEX,
                None,
                None
            ),
            Ok(true)
        );
        assert_eq!(reg.owner_of("/tags/rust/"), Some("section-index"));
    }

    #[test]
    fn lower_priority_claim_is_rejected_with_collision_error() {
        let mut reg = URLRegistry::new();
        reg.claim(
            "/tags/rust/",
            "section-index",
            "tags/rust/_index.md",
            PRIORITY_SECTION_INDEX,
            None,
            None,
        )
        .unwrap();
        let err = reg
            .claim("/tags/rust/", "taxonomy", "tag:rust", PRIORITY_TAXONOMY, None, None)
            .unwrap_err();
        assert_eq!(err.existing_owner, "section-index");
        assert_eq!(err.new_owner, "taxonomy");
        assert_eq!(reg.owner_of("/tags/rust/"), Some("section-index"));
    }

    #[test]
    fn urls_differing_only_by_trailing_slash_collide() {
        let mut reg = URLRegistry::new();
        reg.claim("/blog/post", "content", "blog/post.md", PRIORITY_CONTENT, None, None)
            .unwrap();
        let err = reg
            .claim("/blog/post/", "content", "blog/post-dup.md", PRIORITY_CONTENT, None, None)
            .unwrap_err();
        assert_eq!(err.existing_source, "blog/post.md");
    }

    #[test]
    fn dot_segments_are_resolved_before_comparison() {
        let mut reg = URLRegistry::new();
        reg.claim("/blog/./post/", "content", "blog/post.md", PRIORITY_CONTENT, None, None)
            .unwrap();
        assert_eq!(reg.owner_of("/blog/post/"), Some("content"));
    }

    #[test]
    fn equal_priority_different_source_collides() {
        let mut reg = URLRegistry::new();
        reg.claim("/blog/post/", "content", "blog/post.md", PRIORITY_CONTENT, None, None)
            .unwrap();
        let err = reg
            .claim("/blog/post/", "content", "blog/post-dup.md", PRIORITY_CONTENT, None, None)
            .unwrap_err();
        assert_eq!(err.existing_source, "blog/post.md");
        assert_eq!(err.new_source, "blog/post-dup.md");
    }
}
