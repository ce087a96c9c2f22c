// src/incremental/legacy.rs
//!
//! Legacy multi-signal change detector, kept alongside the provenance filter
//! for shadow-mode comparison. Where the provenance filter
//! collapses everything into one `combined_hash`, this detector runs one
//! pass per concern — file fingerprints, cascading metadata, templates,
//! taxonomy, adjacent-nav — matching the shape of the original multi-class
//! detector (`FileChangeDetector`/`CascadeTracker`/`TemplateChangeDetector`/
//! `TaxonomyChangeDetector`) it was distilled from.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::cache::{BuildCache, FileFingerprint};
use crate::content::{cascade_hash, ContentGraph};

use super::types::{FilterDecisionLog, FilterResult, RebuildReasonCode};

fn fingerprint_of(path: &Path) -> Option<FileFingerprint> {
    let metadata = std::fs::metadata(path).ok()?;
    let mtime = metadata
        .modified()
        .ok()?
        .duration_since(SystemTime::UNIX_EPOCH)
        .ok()?
        .as_secs() as i64;
    let size = metadata.len();
    let content = std::fs::read(path).ok()?;
    Some(FileFingerprint {
        hash: blake3::hash(&content).to_hex().to_string(),
        mtime,
        size,
    })
}

/// `FileChangeDetector`: a page needs rebuilding unless its current
/// fingerprint matches the one recorded last build.
fn source_unchanged(cache: &BuildCache, source_path: &Path) -> bool {
    let key = source_path.to_string_lossy().to_string();
    match (cache.file_fingerprints.get(&key), fingerprint_of(source_path)) {
        (Some(cached), Some(current)) => cached.hash == current.hash,
        _ => false,
    }
}

pub(crate) struct LegacyDetector<'a> {
    pub cache: &'a mut BuildCache,
}

impl<'a> LegacyDetector<'a> {
    /// Runs every legacy sub-detector over `graph`, returning the union of
    /// pages each one flags plus a decision log explaining why.
    pub(crate) fn detect(
        &mut self,
        graph: &ContentGraph,
        forced_changed: &HashSet<PathBuf>,
        nav_changed: &HashSet<PathBuf>,
    ) -> (FilterResult, FilterDecisionLog) {
        let mut log = FilterDecisionLog::default();
        let mut pages_to_build: HashSet<PathBuf> = HashSet::new();
        let mut changed_page_paths: HashSet<PathBuf> = HashSet::new();

        self.detect_file_changes(graph, forced_changed, &mut pages_to_build, &mut changed_page_paths, &mut log);
        self.detect_cascade_changes(graph, &mut pages_to_build, &mut log);
        self.detect_template_changes(forced_changed, &mut pages_to_build, &mut log);
        self.detect_adjacent_nav(graph, &mut pages_to_build, &mut log);

        for page_path in nav_changed {
            if pages_to_build.insert(page_path.clone()) {
                log.reason(page_path.clone(), RebuildReasonCode::NavChanged, "nav structure changed");
            }
        }

        let affected_tags = pages_to_build
            .iter()
            .filter_map(|p| graph.pages.get(p))
            .flat_map(|p| p.tags.iter().cloned())
            .collect();

        let result = FilterResult {
            pages_to_build,
            assets_to_process: HashSet::new(),
            affected_tags,
            changed_page_paths,
            affected_sections: HashSet::new(),
            skip: false,
        };
        (result, log)
    }

    fn detect_file_changes(
        &mut self,
        graph: &ContentGraph,
        forced_changed: &HashSet<PathBuf>,
        pages_to_build: &mut HashSet<PathBuf>,
        changed_page_paths: &mut HashSet<PathBuf>,
        log: &mut FilterDecisionLog,
    ) {
        for page in graph.pages.values() {
            let forced = forced_changed.contains(&page.source_path);
            if forced || !source_unchanged(self.cache, &page.source_path) {
                pages_to_build.insert(page.source_path.clone());
                changed_page_paths.insert(page.source_path.clone());
                let code = if forced { RebuildReasonCode::Forced } else { RebuildReasonCode::ContentChanged };
                log.reason(page.source_path.clone(), code, "fingerprint mismatch or forced change");
            }
            if let Some(fp) = fingerprint_of(&page.source_path) {
                self.cache.file_fingerprints.insert(page.source_path.to_string_lossy().to_string(), fp);
            }
        }
    }

    /// `CascadeTracker`: when a section's own cascade dict changes, every
    /// page it owns is flagged, not just the section's `_index` page.
    fn detect_cascade_changes(&mut self, graph: &ContentGraph, pages_to_build: &mut HashSet<PathBuf>, log: &mut FilterDecisionLog) {
        for section in graph.sections.values() {
            let Some(index_path) = &section.index_page else { continue };
            let cascade = section.cascade.clone().unwrap_or_default();
            let new_hash = cascade_hash(&cascade).to_hex().to_string();
            let key = index_path.to_string_lossy().to_string();
            let prior = self.cache.parsed_content.get(&key).map(|e| e.cascade_metadata_hash.clone());
            let cascade_changed = prior.as_deref().is_some_and(|h| h != new_hash);

            self.cache.parsed_content.entry(key).or_default().cascade_metadata_hash = new_hash;

            if cascade_changed {
                for page_path in &section.pages {
                    if pages_to_build.insert(page_path.clone()) {
                        log.reason(
                            page_path.clone(),
                            RebuildReasonCode::CascadeDependency,
                            format!("cascade changed on section {}", section.path),
                        );
                    }
                }
            }
        }
    }

    /// `TemplateChangeDetector`: a changed template forces a rebuild of
    /// every page recorded against it in `reverse_dependencies`.
    fn detect_template_changes(&self, forced_changed: &HashSet<PathBuf>, pages_to_build: &mut HashSet<PathBuf>, log: &mut FilterDecisionLog) {
        for (template, pages) in &self.cache.reverse_dependencies {
            if !forced_changed.contains(Path::new(template)) {
                continue;
            }
            for page_key in pages {
                let page_path = PathBuf::from(page_key);
                if pages_to_build.insert(page_path.clone()) {
                    log.reason(page_path, RebuildReasonCode::TemplateChanged, format!("template {template} changed"));
                }
            }
        }
    }

    /// Approximates the original's prev/next adjacency rebuild: a page
    /// already selected for rebuild pulls its weight-order siblings along,
    /// since their rendered prev/next links may now point at stale content.
    fn detect_adjacent_nav(&self, graph: &ContentGraph, pages_to_build: &mut HashSet<PathBuf>, log: &mut FilterDecisionLog) {
        let seed: Vec<PathBuf> = pages_to_build.iter().cloned().collect();
        for page_path in seed {
            let Some(page) = graph.pages.get(&page_path) else { continue };
            let Some(section) = graph.sections.get(&page.section_path) else { continue };
            let Some(idx) = section.pages.iter().position(|p| p == &page_path) else { continue };
            for neighbor_idx in [idx.checked_sub(1), Some(idx + 1)].into_iter().flatten() {
                if let Some(neighbor) = section.pages.get(neighbor_idx)
                    && pages_to_build.insert(neighbor.clone())
                {
                    log.reason(
                        neighbor.clone(),
                        RebuildReasonCode::AdjacentNavChanged,
                        format!("adjacent to changed page {}", page_path.display()),
                    );
                }
            }
        }
    }
}
