// src/incremental/provenance.rs
//!
//! Provenance-based change detection, grounded on
//! `original_source/bengal/orchestration/build/provenance_filter.py`'s
//! `phase_incremental_filter_provenance`. Each page's `combined_hash` folds
//! its raw content, effective metadata, resolved template name, template
//! includes and upstream dependency hashes into one digest; a stored hash
//! that no longer matches is the only signal this detector needs — unlike
//! the legacy detector it carries no per-concern state of its own.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::content::{canonical_json, ContentGraph, Page};

use super::types::{FilterDecisionLog, FilterResult, RebuildReasonCode};

#[derive(Error, Debug)]
pub(crate) enum ProvenanceError {
    #[error("I/O error reading provenance cache {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt provenance cache {path:?}: {source}")]
    Deserialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize provenance cache: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Persisted `source_path -> combined_hash` map, one step simpler than
/// `BuildCache` since provenance carries no auxiliary indexes of its own.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub(crate) struct ProvenanceCache {
    pub entries: std::collections::HashMap<String, String>,
}

impl ProvenanceCache {
    pub(crate) fn load(path: &Path) -> Result<ProvenanceCache, ProvenanceError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| ProvenanceError::Deserialize {
                path: path.to_path_buf(),
                source: e,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ProvenanceCache::default()),
            Err(e) => Err(ProvenanceError::Io {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    pub(crate) fn save(&self, path: &Path) -> Result<(), ProvenanceError> {
        let serialized = serde_json::to_string_pretty(self)?;
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, &serialized).map_err(|e| ProvenanceError::Io {
            path: tmp_path.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp_path, path).map_err(|e| ProvenanceError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Digest of everything that determines a page's rendered output:
/// body text, effective (post-cascade) metadata, the template it resolves
/// to, its include set, and the hashes of anything it transitively depends
/// on. Two builds producing the same `combined_hash` are guaranteed to
/// produce the same HTML.
pub(crate) fn combined_hash(
    page: &Page,
    template_name: &str,
    include_set: &[String],
    dependency_hashes: &[String],
) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(page.raw_content.as_bytes());
    hasher.update(canonical_json(&page.metadata).as_bytes());
    hasher.update(template_name.as_bytes());
    for include in include_set {
        hasher.update(include.as_bytes());
    }
    let mut sorted_deps = dependency_hashes.to_vec();
    sorted_deps.sort();
    for dep in &sorted_deps {
        hasher.update(dep.as_bytes());
    }
    hasher.finalize()
}

/// Runs the provenance-based filter over every page in `graph`. Pages whose
/// `combined_hash` no longer matches the cached one (or that appear in
/// `forced_changed`) are selected for rebuild; the new hash is recorded
/// immediately, not deferred to a successful render, trading a small risk
/// of masking a mid-render crash for a simpler single-pass filter.
pub(crate) struct ProvenanceFilter<'a> {
    pub cache: &'a mut ProvenanceCache,
}

impl<'a> ProvenanceFilter<'a> {
    /// `template_dir` locates the `extends`/`include` chain on disk so a
    /// template body edit — not just a template rename — changes the
    /// `combined_hash` of every page that resolves to it.
    pub(crate) fn filter(
        &mut self,
        graph: &ContentGraph,
        template_dir: &str,
        template_of: impl Fn(&Page) -> String,
        forced_changed: &HashSet<PathBuf>,
    ) -> (FilterResult, FilterDecisionLog) {
        let mut log = FilterDecisionLog::default();
        let mut pages_to_build = HashSet::new();
        let mut changed_page_paths = HashSet::new();
        let mut template_fingerprints: std::collections::HashMap<String, (Vec<String>, Vec<String>)> =
            std::collections::HashMap::new();

        for page in graph.pages.values() {
            let template_name = template_of(page);
            let (includes, dependency_hashes) = template_fingerprints
                .entry(template_name.clone())
                .or_insert_with(|| crate::utils::template_dependency_fingerprint(template_dir, &template_name))
                .clone();
            let hash_hex = combined_hash(page, &template_name, &includes, &dependency_hashes).to_hex().to_string();
            let key = page.source_path.to_string_lossy().to_string();
            let forced = forced_changed.contains(&page.source_path);
            let prior = self.cache.entries.get(&key).cloned();
            let changed = prior.as_deref() != Some(hash_hex.as_str());

            if forced || changed {
                pages_to_build.insert(page.source_path.clone());
                changed_page_paths.insert(page.source_path.clone());
                let code = if forced {
                    RebuildReasonCode::Forced
                } else {
                    RebuildReasonCode::ContentChanged
                };
                debug!("provenance::changed {:?} {:?} -> {}", page.source_path, prior, hash_hex);
                log.reason(page.source_path.clone(), code, format!("combined_hash changed ({:?} -> {})", prior, hash_hex));
            }
            self.cache.entries.insert(key, hash_hex);
        }

        let result = FilterResult {
            pages_to_build,
            assets_to_process: HashSet::new(),
            affected_tags: HashSet::new(),
            changed_page_paths,
            affected_sections: HashSet::new(),
            skip: false,
        };
        (result, log)
    }
}
