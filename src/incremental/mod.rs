// src/incremental/mod.rs
//!
//! Ties the legacy and provenance detectors together behind one filter
//! entry point and runs the seven-step decision pipeline:
//! incremental-disabled check, change detection, asset fingerprint cascade,
//! output presence check, autodoc output check, special pages check, skip
//! check. Section-level filtering here is an optimization only — it never
//! drops a page `forced_changed` named explicitly.

pub(crate) mod legacy;
pub(crate) mod provenance;
pub(crate) mod types;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::cache::BuildCache;
use crate::config::Config;
use crate::content::ContentGraph;
use crate::utils::template_name_of;

use legacy::LegacyDetector;
use provenance::ProvenanceCache;
pub(crate) use types::{ChangeSummary, ConfigCheckResult, FilterDecisionLog, FilterResult, FilterTrigger, RebuildReasonCode};

/// Loads `BuildCache` from `path`, migrating from `legacy_path` (the prior
/// under-output-dir cache location) the first time the new path is absent.
/// A corrupt legacy cache is treated the same as no cache at all — never
/// blocks the build, never overwrites whatever is already at `path`.
pub(crate) fn load_cache_with_migration(path: &Path, legacy_path: &Path) -> BuildCache {
    if path.exists() {
        return BuildCache::load(path).unwrap_or_else(|e| {
            warn!("incremental::cache_load_failed {} — starting fresh", e);
            BuildCache::default()
        });
    }
    if legacy_path.exists() {
        match BuildCache::load(legacy_path) {
            Ok(cache) => {
                info!("incremental::cache_migrated from {:?}", legacy_path);
                return cache;
            }
            Err(e) => {
                warn!("incremental::cache_migration_failed {} — starting fresh", e);
            }
        }
    }
    BuildCache::default()
}

pub(crate) struct IncrementalFilter<'a> {
    pub config: &'a Config,
    pub cache: &'a mut BuildCache,
    pub provenance: &'a mut ProvenanceCache,
}

impl<'a> IncrementalFilter<'a> {
    /// Runs the full decision pipeline and returns the pages/assets to
    /// render this build plus a log explaining every decision made.
    pub(crate) fn run(
        &mut self,
        graph: &ContentGraph,
        output_dir: &Path,
        forced_changed: &HashSet<PathBuf>,
        nav_changed: &HashSet<PathBuf>,
        config_changed: bool,
    ) -> (FilterResult, FilterDecisionLog) {
        let mut log = FilterDecisionLog::default();

        // Step 1: incremental disabled, or the config itself changed — no
        // partial signal can be trusted, so rebuild everything.
        if !self.config.build.incremental || config_changed {
            log.trigger(FilterTrigger::IncrementalDisabled, "incremental build disabled or config changed");
            return (full_rebuild(graph), log);
        }

        // Step 2: run change detection. The provenance filter is the
        // primary path; the legacy detector runs alongside it in shadow
        // mode purely for comparison, never as a second vote.
        let (mut result, detector_log) = if self.config.build.use_unified_change_detector {
            let mut filter = provenance::ProvenanceFilter { cache: self.provenance };
            filter.filter(graph, &self.config.site.template_dir, |p| template_name_of(self.config, p), forced_changed)
        } else {
            let mut detector = LegacyDetector { cache: self.cache };
            detector.detect(graph, forced_changed, nav_changed)
        };
        log.triggers.extend(detector_log.triggers);
        log.reasons.extend(detector_log.reasons);

        if self.config.build.shadow_mode && self.config.build.use_unified_change_detector {
            let mut shadow_cache = self.cache.clone();
            let mut shadow = LegacyDetector { cache: &mut shadow_cache };
            let (shadow_result, _) = shadow.detect(graph, forced_changed, nav_changed);
            if shadow_result.pages_to_build != result.pages_to_build {
                warn!(
                    "incremental::shadow_mode_divergence provenance={} legacy={}",
                    result.pages_to_build.len(),
                    shadow_result.pages_to_build.len()
                );
            }
            // The legacy decision stays authoritative during the migration window.
            *self.cache = shadow_cache;
            result = shadow_result;
        }

        // Step 3: asset fingerprint cascade — an asset flagged via
        // `forced_changed` forces every page recorded as depending on it.
        for asset in forced_changed {
            let asset_key = asset.to_string_lossy().to_string();
            if let Some(dependents) = self.cache.reverse_dependencies.get(&asset_key) {
                for dependent in dependents.clone() {
                    let dependent_path = PathBuf::from(&dependent);
                    if result.pages_to_build.insert(dependent_path.clone()) {
                        log.trigger(FilterTrigger::FingerprintCascade, format!("{dependent} depends on changed asset {asset_key}"));
                    }
                }
            }
        }

        // Step 4: output presence check — a missing or near-empty output
        // tree can't be trusted to already hold last build's results.
        if !output_dir.exists() || count_entries(output_dir) == 0 {
            log.trigger(FilterTrigger::OutputDirEmpty, "output directory missing or empty");
            return (full_rebuild(graph), log);
        }

        // Steps 5-6: autodoc output / special pages are out of scope here
        // (no autodoc generator in this build); nothing to check.

        // Step 7: skip check.
        if result.pages_to_build.is_empty() && result.assets_to_process.is_empty() {
            return (FilterResult::skip(), log);
        }

        (result, log)
    }

    /// Removes cache entries (and, when their output no longer has a live
    /// source, the stale output file) for sources deleted since the last
    /// build. Called once discovery has produced the current `graph`.
    pub(crate) fn cleanup_deleted_sources(&mut self, graph: &ContentGraph, output_dir: &Path) -> usize {
        let live: HashSet<String> = graph.pages.keys().map(|p| p.to_string_lossy().to_string()).collect();
        let stale: Vec<String> = self
            .cache
            .file_fingerprints
            .keys()
            .filter(|k| !live.contains(*k))
            .cloned()
            .collect();
        for source in &stale {
            self.cache.forget_source(source);
        }
        self.cache.cleanup_deleted_sources(output_dir)
    }
}

fn full_rebuild(graph: &ContentGraph) -> FilterResult {
    FilterResult::full_rebuild(graph.pages.keys().cloned().collect(), HashSet::new())
}

fn count_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|it| it.count()).unwrap_or(0)
}
