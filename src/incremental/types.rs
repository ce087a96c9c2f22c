// src/incremental/types.rs
//!
//! Typed results shared by both incremental filter implementations (spec
//! §4.1 "Typed phase results", §4.2). Kept distinct from `RunError` — these
//! describe a *decision*, never a failure.

use std::collections::HashSet;
use std::path::PathBuf;

/// Why the config-check phase forced (or didn't force) a full rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ConfigCheckResult {
    pub incremental: bool,
    pub config_changed: bool,
}

/// Reason codes recorded against every page placed in the build set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum RebuildReasonCode {
    ContentChanged,
    TemplateChanged,
    AssetFingerprintChanged,
    CascadeDependency,
    NavChanged,
    CrossVersionDependency,
    AdjacentNavChanged,
    Forced,
    FullRebuild,
    OutputMissing,
}

#[derive(Debug, Clone)]
pub(crate) struct RebuildReason {
    pub code: RebuildReasonCode,
    pub details: String,
}

/// Trigger codes for the structured `--explain` log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum FilterTrigger {
    IncrementalDisabled,
    OutputDirEmpty,
    OutputAssetsMissing,
    AutodocOutputMissing,
    FingerprintCascade,
}

#[derive(Debug, Clone)]
pub(crate) struct FilterDecisionLogEntry {
    pub trigger: FilterTrigger,
    pub details: String,
}

/// Accumulates `FilterDecisionLogEntry`s plus per-page reasons for the
/// `--explain` CLI surface.
#[derive(Debug, Clone, Default)]
pub(crate) struct FilterDecisionLog {
    pub triggers: Vec<FilterDecisionLogEntry>,
    pub reasons: Vec<(PathBuf, RebuildReason)>,
}

impl FilterDecisionLog {
    pub(crate) fn trigger(&mut self, trigger: FilterTrigger, details: impl Into<String>) {
        self.triggers.push(FilterDecisionLogEntry { trigger, details: details.into() });
    }

    pub(crate) fn reason(&mut self, page: PathBuf, code: RebuildReasonCode, details: impl Into<String>) {
        self.reasons.push((page, RebuildReason { code, details: details.into() }));
    }
}

/// What changed since the last build, independent of which pages that
/// implies need rebuilding.
#[derive(Debug, Clone, Default)]
pub(crate) struct ChangeSummary {
    pub modified_content: HashSet<PathBuf>,
    pub modified_assets: HashSet<PathBuf>,
    pub modified_templates: HashSet<PathBuf>,
    pub taxonomy_changes: HashSet<String>,
    pub extra_changes: HashSet<PathBuf>,
}

impl ChangeSummary {
    pub(crate) fn is_empty(&self) -> bool {
        self.modified_content.is_empty()
            && self.modified_assets.is_empty()
            && self.modified_templates.is_empty()
            && self.taxonomy_changes.is_empty()
            && self.extra_changes.is_empty()
    }
}

/// The incremental filter's final decision.
#[derive(Debug, Clone, Default)]
pub(crate) struct FilterResult {
    pub pages_to_build: HashSet<PathBuf>,
    pub assets_to_process: HashSet<PathBuf>,
    pub affected_tags: HashSet<String>,
    pub changed_page_paths: HashSet<PathBuf>,
    pub affected_sections: HashSet<String>,
    pub skip: bool,
}

impl FilterResult {
    pub(crate) fn full_rebuild(all_pages: HashSet<PathBuf>, all_assets: HashSet<PathBuf>) -> Self {
        Self {
            pages_to_build: all_pages,
            assets_to_process: all_assets,
            affected_tags: HashSet::new(),
            changed_page_paths: HashSet::new(),
            affected_sections: HashSet::new(),
            skip: false,
        }
    }

    pub(crate) fn skip() -> Self {
        Self { skip: true, ..Default::default() }
    }
}
