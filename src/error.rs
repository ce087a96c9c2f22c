// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

use crate::{
    cache::CacheError, config::ConfigError, content::ContentError, output::WriteError,
    url_registry::URLCollisionError,
};

/// Top-level error type returned by a single build attempt.
///
/// Fatal variants unwind straight to the orchestrator's teardown phase;
/// non-fatal per-page failures are instead collected into `BuildStats`
/// via `ErrorAggregator` and do not appear here unless the build runs
/// in strict mode.
#[derive(Error, Debug)]
pub(crate) enum RunError {
    //
    #[error("Failed to load configuration")]
    Config(#[from] ConfigError),
    //
    #[error("Failed to load content")]
    Content(#[from] ContentError),
    //
    #[error("Failed to render template")]
    Template(#[from] minijinja::Error),
    //
    #[error("Failed to process static files")]
    Static(#[from] StaticError),
    //
    #[error("Failed to write content")]
    Write(#[from] WriteError),
    //
    #[error("Build cache error")]
    Cache(#[from] CacheError),
    //
    #[error(transparent)]
    UrlCollision(#[from] URLCollisionError),
    //
    #[error("Menu graph contains a cycle: {0}")]
    MenuCycle(String),
    //
    #[error("{count} page(s) failed to render, exceeding the strict threshold of {threshold}")]
    StrictRenderingThreshold { count: usize, threshold: usize },
    //
    #[error("{0}")]
    IoError(String),
}

#[derive(Error, Debug)]
pub(crate) enum StaticError {
    #[error("I/O error processing static file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A single failure captured while rendering one page.
///
/// Carried in `BuildStats` for non-fatal reporting; never propagated as
/// a `RunError` unless strict mode converts the aggregate into a hard
/// failure (see `ErrorAggregator::enforce_strict`).
#[derive(Debug, Clone)]
pub(crate) struct PageError {
    pub(crate) source_path: PathBuf,
    pub(crate) kind: &'static str,
    pub(crate) message: String,
}

/// Collects and rate-limits per-page error logging within one phase.
///
/// After `max_samples` failures it stops logging individually and lets
/// `summarize` emit a single count at phase end.
#[derive(Debug)]
pub(crate) struct ErrorAggregator {
    errors: Vec<PageError>,
    max_samples: usize,
}

impl ErrorAggregator {
    pub(crate) fn new(max_samples: usize) -> Self {
        Self {
            errors: Vec::new(),
            max_samples,
        }
    }

    /// Record a failure, logging it immediately if still under the sample cap.
    pub(crate) fn record(&mut self, err: PageError) {
        if self.errors.len() < self.max_samples {
            tracing::error!(
                "render::error {} ({}): {}",
                err.source_path.display(),
                err.kind,
                err.message
            );
        }
        self.errors.push(err);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub(crate) fn count(&self) -> usize {
        self.errors.len()
    }

    pub(crate) fn errors(&self) -> &[PageError] {
        &self.errors
    }

    /// Emit the end-of-phase structured summary (always logged, even with zero errors).
    pub(crate) fn summarize(&self, phase: &str) {
        if self.errors.is_empty() {
            tracing::debug!("{}::errors none", phase);
        } else {
            tracing::warn!(
                "{}::errors {} total, {} shown above",
                phase,
                self.errors.len(),
                self.errors.len().min(self.max_samples)
            );
        }
    }

    /// Convert to a hard failure when running in strict mode and the
    /// configured threshold was exceeded.
    pub(crate) fn enforce_strict(&self, strict: bool, threshold: usize) -> Result<(), RunError> {
        if strict && self.errors.len() > threshold {
            return Err(RunError::StrictRenderingThreshold {
                count: self.errors.len(),
                threshold,
            });
        }
        Ok(())
    }
}

/// True if `message` looks like it came from a graceful shutdown signal
/// propagating out of the render thread pool, as opposed to a genuine
/// rendering failure.
pub(crate) fn is_shutdown_error(message: &str) -> bool {
    message.contains("shutdown") || message.contains("interrupted")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_aggregator_caps_logged_samples_but_counts_all() {
        let mut agg = ErrorAggregator::new(2);
        for i in 0..5 {
            agg.record(PageError {
                source_path: PathBuf::from(format!("page-{i}.md")),
                kind: "render",
                message: "boom".into(),
            });
        }
        assert_eq!(agg.count(), 5);
        assert!(!agg.is_empty());
    }

    #[test]
    fn strict_mode_fails_over_threshold() {
        let mut agg = ErrorAggregator::new(3);
        agg.record(PageError {
            source_path: PathBuf::from("a.md"),
            kind: "render",
            message: "x".into(),
        });
        assert!(agg.enforce_strict(true, 0).is_err());
        assert!(agg.enforce_strict(true, 1).is_ok());
        assert!(agg.enforce_strict(false, 0).is_ok());
    }

    #[test]
    fn shutdown_error_detection() {
        assert!(is_shutdown_error("worker pool shutdown requested"));
        assert!(is_shutdown_error("operation interrupted"));
        assert!(!is_shutdown_error("template not found"));
    }
}
