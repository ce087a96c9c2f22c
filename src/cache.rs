// src/cache.rs
//!
//! `BuildCache` is the on-disk, cross-build persisted state the incremental
//! filter and orphan cleanup read and update each run. It is distinct from
//! the `ProvenanceCache` (see `incremental::provenance`), which is the
//! canonical per-page rebuild decision; `BuildCache` carries the auxiliary
//! indexes (fingerprints, dependency graphs, URL claims) that decision
//! needs and that postprocessing consumes.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

#[derive(Error, Debug)]
pub(crate) enum CacheError {
    #[error("I/O error reading cache file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt cache file {path:?}: {source}")]
    Deserialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize cache: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// `{hash, mtime, size}` fingerprint of one source file at the time it was
/// last processed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub(crate) struct FileFingerprint {
    pub hash: String,
    pub mtime: i64,
    pub size: u64,
}

/// `{html, toc, cascade_metadata_hash}` snapshot of a page's parsed content,
/// keyed by source path, reused across builds when the fingerprint matches.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub(crate) struct ParsedContentEntry {
    pub html: String,
    pub toc: Vec<String>,
    pub cascade_metadata_hash: String,
}

/// Snapshot of one `URLRegistry` claim, persisted so collisions and
/// ownership can be checked against the prior build without replaying it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub(crate) struct UrlClaimEntry {
    pub owner: String,
    pub source: String,
    pub priority: u32,
    pub version: Option<String>,
    pub lang: Option<String>,
}

/// Persisted, cross-build engine state.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub(crate) struct BuildCache {
    pub file_fingerprints: HashMap<String, FileFingerprint>,
    /// page source_path -> templates/data files/assets it consumes.
    pub dependencies: HashMap<String, HashSet<String>>,
    /// template/asset path -> pages that consume it.
    pub reverse_dependencies: HashMap<String, HashSet<String>>,
    /// output_path -> source_path, used to find and clean orphaned output.
    pub output_sources: HashMap<String, String>,
    /// page source_path -> tags, and tag slug -> page source_paths.
    pub taxonomy_pages: HashMap<String, HashSet<String>>,
    pub taxonomy_tags: HashMap<String, HashSet<String>>,
    pub parsed_content: HashMap<String, ParsedContentEntry>,
    pub autodoc_dependencies: HashMap<String, HashSet<String>>,
    pub autodoc_source_metadata: HashMap<String, String>,
    pub url_claims: HashMap<String, UrlClaimEntry>,
    /// (source_page, target_version, target_path) edges.
    pub cross_version_dependencies: Vec<(String, String, String)>,
    pub last_build: Option<String>,
    /// Hash of the last config this cache was built against; a mismatch
    /// forces a full rebuild since no partial signal can be trusted (spec
    /// §4.1 config-check phase).
    pub config_hash: Option<String>,
}

impl BuildCache {
    /// Loads the cache from `path`, returning an empty cache (not an error)
    /// when the file doesn't exist yet — the first build of a site has no
    /// prior cache to read.
    #[instrument]
    pub(crate) fn load(path: &Path) -> Result<BuildCache, CacheError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => {
                let cache = serde_json::from_str(&raw).map_err(|e| CacheError::Deserialize {
                    path: path.to_path_buf(),
                    source: e,
                })?;
                debug!("cache::load ← {:?} ({} bytes)", path, raw.len());
                Ok(cache)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("cache::load none, starting fresh cache");
                Ok(BuildCache::default())
            }
            Err(e) => Err(CacheError::Io {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    /// Serializes and atomically writes the cache back to `path` (write to
    /// a sibling temp file, then rename — never leaves a half-written
    /// cache visible to a concurrent reader).
    #[instrument(skip(self))]
    pub(crate) fn save(&self, path: &Path) -> Result<(), CacheError> {
        let serialized = serde_json::to_string_pretty(self)?;
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, &serialized).map_err(|e| CacheError::Io {
            path: tmp_path.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp_path, path).map_err(|e| CacheError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!("cache::save → {:?} ({} bytes)", path, serialized.len());
        Ok(())
    }

    /// Removes every cache entry keyed by `source_path` (fingerprint,
    /// dependencies, taxonomy membership, parsed content, autodoc state).
    /// Used by deleted-source cleanup.
    pub(crate) fn forget_source(&mut self, source_path: &str) {
        self.file_fingerprints.remove(source_path);
        self.dependencies.remove(source_path);
        self.parsed_content.remove(source_path);
        self.autodoc_dependencies.remove(source_path);
        self.autodoc_source_metadata.remove(source_path);
        for pages in self.reverse_dependencies.values_mut() {
            pages.remove(source_path);
        }
        if let Some(tags) = self.taxonomy_pages.remove(source_path) {
            for tag in tags {
                if let Some(pages) = self.taxonomy_tags.get_mut(&tag) {
                    pages.remove(source_path);
                }
            }
        }
    }

    /// Finds `(output_path, source_path)` pairs whose source no longer
    /// exists on disk — candidates for orphan output cleanup.
    pub(crate) fn orphaned_outputs(&self) -> Vec<(String, String)> {
        self.output_sources
            .iter()
            .filter(|(_, source)| !Path::new(source).exists())
            .map(|(output, source)| (output.clone(), source.clone()))
            .collect()
    }

    /// Deletes orphaned output files (per `orphaned_outputs`) and removes
    /// now-empty parent directories, then drops the matching cache entries.
    pub(crate) fn cleanup_deleted_sources(&mut self, output_dir: &Path) -> usize {
        let orphans = self.orphaned_outputs();
        let mut removed = 0;
        for (output_path, source_path) in &orphans {
            let path = Path::new(output_path);
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    warn!("cache::cleanup failed to remove {:?}: {}", path, e);
                    continue;
                }
                remove_empty_ancestors(path, output_dir);
                removed += 1;
            }
            self.output_sources.remove(output_path);
            self.forget_source(source_path);
        }
        removed
    }
}

fn remove_empty_ancestors(start: &Path, stop_at: &Path) {
    let mut dir = start.parent();
    while let Some(d) = dir {
        if d == stop_at || !d.starts_with(stop_at) {
            break;
        }
        match std::fs::read_dir(d) {
            Ok(mut entries) => {
                if entries.next().is_some() {
                    break;
                }
                if std::fs::remove_dir(d).is_err() {
                    break;
                }
                dir = d.parent();
            }
            _ => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_missing_cache_returns_default() {
        let dir = tempdir().unwrap();
        let cache = BuildCache::load(&dir.path().join("cache.json")).unwrap();
        assert!(cache.file_fingerprints.is_empty());
    }

    #[test]
    fn round_trips_through_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let mut cache = BuildCache::default();
        cache.file_fingerprints.insert(
            "blog/post.md".to_string(),
            FileFingerprint {
                hash: "abc".to_string(),
                mtime: 1000,
                size: 42,
            },
        );
        cache.save(&path).unwrap();

        let loaded = BuildCache::load(&path).unwrap();
        assert_eq!(
            loaded.file_fingerprints.get("blog/post.md").unwrap().hash,
            "abc"
        );
    }

    #[test]
    fn forget_source_clears_every_index() {
        let mut cache = BuildCache::default();
        cache
            .file_fingerprints
            .insert("a.md".into(), FileFingerprint { hash: "x".into(), mtime: 0, size: 0 });
        cache
            .taxonomy_pages
            .insert("a.md".into(), HashSet::from(["rust".to_string()]));
        cache
            .taxonomy_tags
            .insert("rust".into(), HashSet::from(["a.md".to_string()]));

        cache.forget_source("a.md");

        assert!(!cache.file_fingerprints.contains_key("a.md"));
        assert!(!cache.taxonomy_pages.contains_key("a.md"));
        assert!(cache.taxonomy_tags.get("rust").unwrap().is_empty());
    }

    #[test]
    fn cleanup_deleted_sources_removes_orphan_output_and_cache_entries() {
        let dir = tempdir().unwrap();
        let output_dir = dir.path().join("out");
        std::fs::create_dir_all(output_dir.join("blog")).unwrap();
        let output_file = output_dir.join("blog/gone.html");
        std::fs::write(&output_file, "stale").unwrap();

        let mut cache = BuildCache::default();
        cache.output_sources.insert(
            output_file.to_str().unwrap().to_string(),
            "content/blog/gone.md".to_string(),
        );

        let removed = cache.cleanup_deleted_sources(&output_dir);
        assert_eq!(removed, 1);
        assert!(!output_file.exists());
        assert!(cache.output_sources.is_empty());
    }
}
