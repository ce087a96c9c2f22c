// src/render.rs
//!
//! Parallel render scheduler. Pages flagged by the incremental filter are
//! rendered across a `rayon` pool; a write-behind collector on dedicated
//! `std::thread` writers decouples rendering from disk latency. A build
//! generation counter lets a future long-lived worker notice a stale
//! thread-local pipeline and rebuild it — there is only one pipeline (the
//! `MinijinjaEngine`) per build in this implementation, so the counter
//! exists for generation/active-render bookkeeping rather than to drive
//! actual pipeline eviction.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::asset_hash::AssetManifest;
use crate::config::Config;
use crate::content::{ContentGraph, Page, Section};
use crate::error::{is_shutdown_error, ErrorAggregator, PageError};
use crate::nav::{render_tree_scaffold, NavTree, NavTreeContext, ScaffoldCache};
use crate::output::write_output_file;
use crate::template::{render_index, render_page, MinijinjaEngine};

/// Process-wide, monotonically increasing build identifier. Bumped once per `RenderScheduler::new`.
static BUILD_GENERATION: AtomicU64 = AtomicU64::new(0);

/// Count of renders currently in flight, incremented on entry and
/// decremented on exit of `render_one`. `CacheRegistry::clear_all_caches`
/// checks this (via `warn_if_active`) before invalidating shared caches.
static ACTIVE_RENDERS: AtomicUsize = AtomicUsize::new(0);

/// Warns (does not block) if a cache-invalidating operation runs while
/// renders are still in flight.
pub(crate) fn warn_if_active(operation: &str) {
    let active = ACTIVE_RENDERS.load(Ordering::SeqCst);
    if active > 0 {
        warn!("render::active_during_invalidation {} while {} renders in flight", operation, active);
    }
}

/// `get_optimal_workers`: for the render pool's mixed I/O+CPU
/// workload, `min(cpu_count, n)`; below a small batch the caller should
/// just run sequentially (see `RenderScheduler::run`).
pub(crate) fn get_optimal_workers(n: usize, max_workers: Option<usize>) -> usize {
    let cpu = max_workers.unwrap_or_else(num_cpus);
    cpu.max(1).min(n.max(1))
}

fn num_cpus() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Below this many pages, thread startup cost outweighs any parallel win.
const SEQUENTIAL_THRESHOLD: usize = 50;

/// A deterministic stand-in for directive/template complexity analysis:
/// raw byte length of the page body. Used only to order work within a
/// priority group when `build.complexity_ordering` is set — heavier pages go first so no single straggler stalls the
/// pool near the end of a batch.
fn complexity_score(page: &Page) -> usize {
    page.raw_content.len()
}

/// One unit of render output, handed to the write-behind collector.
struct RenderedUnit {
    output_path: PathBuf,
    html: String,
}

enum WriterMessage {
    Write(RenderedUnit),
}

/// Bounded write-behind collector: a channel feeding a small pool of writer
/// threads, each doing an atomic write-then-rename. `precreate_directories` is folded into `Config`'s
/// normal `create_dir_all`-per-write path here rather than a separate
/// walk, since each writer thread already creates its own parent dirs
/// through `write_output_file`.
struct WriteBehindCollector {
    sender: mpsc::SyncSender<WriterMessage>,
    handles: Vec<thread::JoinHandle<()>>,
    errors: Arc<std::sync::Mutex<Vec<PageError>>>,
}

impl WriteBehindCollector {
    fn new(worker_count: usize, queue_depth: usize) -> Self {
        let (sender, receiver) = mpsc::sync_channel::<WriterMessage>(queue_depth);
        let receiver = Arc::new(std::sync::Mutex::new(receiver));
        let errors = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut handles = Vec::with_capacity(worker_count);

        for _ in 0..worker_count.max(1) {
            let receiver = receiver.clone();
            let errors = errors.clone();
            handles.push(thread::spawn(move || loop {
                let message = {
                    let guard = receiver.lock().unwrap();
                    guard.recv()
                };
                match message {
                    Ok(WriterMessage::Write(unit)) => {
                        if let Err(e) = write_output_file(&unit.output_path, &unit.html) {
                            errors.lock().unwrap().push(PageError {
                                source_path: unit.output_path,
                                kind: "write",
                                message: e.to_string(),
                            });
                        }
                    }
                    Err(_) => break,
                }
            }));
        }

        Self { sender, handles, errors }
    }

    fn enqueue(&self, unit: RenderedUnit) {
        if self.sender.send(WriterMessage::Write(unit)).is_err() {
            warn!("render::write_behind_closed dropping a queued write");
        }
    }

    /// Joins render workers first (implicit: callers drop the producer side
    /// before calling this), drains the queue, then stops the writers.
    fn flush_and_close(self) -> Vec<PageError> {
        drop(self.sender);
        for handle in self.handles {
            let _ = handle.join();
        }
        Arc::try_unwrap(self.errors).map(|m| m.into_inner().unwrap()).unwrap_or_default()
    }
}

/// Everything a single page render needs that isn't already on the `Page`
/// itself: the resolved template name and an optional nav overlay.
pub(crate) struct RenderJob<'a> {
    pub page: &'a Page,
    pub template_name: String,
    pub nav: Option<NavTreeContext>,
    pub nav_scaffold: Option<Arc<str>>,
}

/// Outcome of running `RenderScheduler::run`.
#[derive(Debug, Default)]
pub(crate) struct RenderStats {
    pub rendered: usize,
    pub skipped_shutdown: bool,
}

pub(crate) struct RenderScheduler<'a> {
    config: &'a Config,
    engine: &'a MinijinjaEngine,
    generation: u64,
}

impl<'a> RenderScheduler<'a> {
    pub(crate) fn new(config: &'a Config, engine: &'a MinijinjaEngine) -> Self {
        let generation = BUILD_GENERATION.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("render::generation {}", generation);
        Self { config, engine, generation }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Orders `jobs` with forced-changed sources first, then (optionally)
    /// by descending complexity within each group.
    fn order_jobs<'j>(&self, jobs: Vec<RenderJob<'j>>, forced_changed: &HashSet<PathBuf>) -> Vec<RenderJob<'j>> {
        let (mut priority, mut normal): (Vec<_>, Vec<_>) =
            jobs.into_iter().partition(|j| forced_changed.contains(&j.page.source_path));

        if self.config.build.complexity_ordering {
            let worker_count = get_optimal_workers(priority.len().max(normal.len()), self.config.build.max_workers);
            if priority.len() > worker_count {
                priority.sort_by_key(|j| std::cmp::Reverse(complexity_score(j.page)));
            }
            if normal.len() > worker_count {
                normal.sort_by_key(|j| std::cmp::Reverse(complexity_score(j.page)));
            }
        }

        priority.extend(normal);
        priority
    }

    /// Renders every job, writing successful output through the
    /// write-behind collector (or synchronously when `build.write_behind`
    /// is off), and returns aggregate stats. Non-fatal per-page failures
    /// are recorded in `errors` rather than aborting the batch.
    pub(crate) fn run(
        &self,
        jobs: Vec<RenderJob<'_>>,
        forced_changed: &HashSet<PathBuf>,
        errors: &mut ErrorAggregator,
    ) -> RenderStats {
        let jobs = self.order_jobs(jobs, forced_changed);
        let total = jobs.len();
        if total == 0 {
            return RenderStats::default();
        }

        let worker_count = get_optimal_workers(total, self.config.build.max_workers);
        let write_behind = if self.config.build.write_behind {
            Some(WriteBehindCollector::new(worker_count.min(4), worker_count * 4))
        } else {
            None
        };

        let render_one = |job: &RenderJob<'_>| -> Result<(PathBuf, String), (PathBuf, String)> {
            ACTIVE_RENDERS.fetch_add(1, Ordering::SeqCst);
            let result = render_page(
                self.engine,
                job.page,
                self.config,
                &job.template_name,
                job.nav.as_ref(),
                job.nav_scaffold.as_deref(),
            )
            .map(|html| (job.page.output_path.clone(), html))
            .map_err(|e| (job.page.output_path.clone(), e.to_string()));
            ACTIVE_RENDERS.fetch_sub(1, Ordering::SeqCst);
            result
        };

        let results: Vec<Result<(PathBuf, String), (PathBuf, String)>> = if total < SEQUENTIAL_THRESHOLD {
            jobs.iter().map(render_one).collect()
        } else {
            jobs.par_iter()
                .with_max_len(1.max(total / worker_count.max(1)))
                .map(render_one)
                .collect()
        };

        let mut shutdown_seen = false;
        let mut rendered = 0;
        for result in results {
            match result {
                Ok((output_path, html)) => {
                    rendered += 1;
                    match &write_behind {
                        Some(collector) => collector.enqueue(RenderedUnit { output_path, html }),
                        None => {
                            if let Err(e) = write_output_file(&output_path, &html) {
                                errors.record(PageError { source_path: output_path, kind: "write", message: e.to_string() });
                            }
                        }
                    }
                }
                Err((path, message)) => {
                    if is_shutdown_error(&message) {
                        shutdown_seen = true;
                        break;
                    }
                    errors.record(PageError { source_path: path, kind: "render", message });
                }
            }
        }

        if let Some(collector) = write_behind {
            for write_error in collector.flush_and_close() {
                errors.record(write_error);
            }
        }

        RenderStats { rendered, skipped_shutdown: shutdown_seen }
    }
}

/// Builds a `RenderJob` per page in `pages_to_build`, resolving each page's
/// template and attaching the nav overlay for the tree it belongs to. When
/// `scaffold_cache` is given, every job in the same `(version_id, root_url)`
/// scope shares one rendered scaffold fragment instead of re-rendering the
/// nav tree's structural HTML per page.
pub(crate) fn build_jobs<'a>(
    graph: &'a ContentGraph,
    pages_to_build: &HashSet<PathBuf>,
    template_of: impl Fn(&Page) -> String,
    nav_tree: Option<&Arc<NavTree>>,
    scaffold_cache: Option<&ScaffoldCache>,
) -> Vec<RenderJob<'a>> {
    pages_to_build
        .iter()
        .filter_map(|path| graph.pages.get(path))
        .map(|page| {
            let nav_scaffold = match (nav_tree, scaffold_cache) {
                (Some(tree), Some(cache)) => {
                    Some(cache.get_or_render(&tree.version_id, &tree.root.url, || render_tree_scaffold(tree)))
                }
                _ => None,
            };
            RenderJob {
                page,
                template_name: template_of(page),
                nav: nav_tree.map(|tree| tree.context(&page._path)),
                nav_scaffold,
            }
        })
        .collect()
}

/// Renders a section's listing page (if it has a dedicated index template
/// distinct from its content template) through `render_index` rather than
/// `render_page`, honoring `_manifest` for asset URLs the same way single
/// pages do via `MinijinjaEngine`.
pub(crate) fn render_section_index(
    engine: &MinijinjaEngine,
    config: &Config,
    template_name: &str,
    section: &Section,
    graph: &ContentGraph,
    _manifest: Option<&AssetManifest>,
) -> Result<String, minijinja::Error> {
    let pages: Vec<&Page> = section.pages.iter().filter_map(|p| graph.pages.get(p)).collect();
    let all_pages: Vec<&Page> = graph.pages.values().collect();
    render_index(engine, config, template_name, &pages, &all_pages, Some(section))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Metadata;
    use std::fs;
    use tempfile::tempdir;

    fn test_config(template_dir: &std::path::Path, output_dir: &std::path::Path) -> Config {
        Config::from_str(&format!(
            r#"
[site]
title = "Test"
domain = "example.com"
output_dir = "{}"
content_dir = "content"
template_dir = "{}"
static_dir = "static"
site_index_template = "index.html"
"#,
            output_dir.to_str().unwrap().replace('\\', "/"),
            template_dir.to_str().unwrap().replace('\\', "/"),
        ))
        .unwrap()
    }

    fn sample_page(path: &str, output_path: PathBuf) -> Page {
        Page {
            source_path: PathBuf::from(path),
            metadata: Metadata::new(),
            raw_content: "# Hello".to_string(),
            tags: Vec::new(),
            version: None,
            section_path: "/".to_string(),
            content_type: "page".to_string(),
            weight: 0,
            output_path,
            _path: "/".to_string(),
            href: "/".to_string(),
            rendered_html: None,
            is_section_index: false,
        }
    }

    #[test]
    fn forced_changed_pages_render_before_the_rest() {
        let dir = tempdir().unwrap();
        let templates = dir.path().join("templates");
        let output = dir.path().join("out");
        fs::create_dir_all(&templates).unwrap();
        fs::write(templates.join("default.html"), "{{ page.title }}").unwrap();
        let config = test_config(&templates, &output);
        let engine = MinijinjaEngine::new(&config, None);

        let a = sample_page("a.md", output.join("a.html"));
        let b = sample_page("b.md", output.join("b.html"));
        let jobs = vec![
            RenderJob { page: &a, template_name: "default.html".to_string(), nav: None, nav_scaffold: None },
            RenderJob { page: &b, template_name: "default.html".to_string(), nav: None, nav_scaffold: None },
        ];

        let scheduler = RenderScheduler::new(&config, &engine);
        let forced = HashSet::from([PathBuf::from("b.md")]);
        let ordered = scheduler.order_jobs(jobs, &forced);
        assert_eq!(ordered[0].page.source_path, PathBuf::from("b.md"));
    }

    #[test]
    fn run_writes_every_rendered_page_to_disk() {
        let dir = tempdir().unwrap();
        let templates = dir.path().join("templates");
        let output = dir.path().join("out");
        fs::create_dir_all(&templates).unwrap();
        fs::write(templates.join("default.html"), "{{ page.title }}").unwrap();
        let config = test_config(&templates, &output);
        let engine = MinijinjaEngine::new(&config, None);

        let a = sample_page("a.md", output.join("a.html"));
        let jobs = vec![RenderJob { page: &a, template_name: "default.html".to_string(), nav: None, nav_scaffold: None }];

        let scheduler = RenderScheduler::new(&config, &engine);
        let mut errors = ErrorAggregator::new(10);
        let stats = scheduler.run(jobs, &HashSet::new(), &mut errors);

        assert_eq!(stats.rendered, 1);
        assert!(errors.is_empty());
        assert!(output.join("a.html").exists());
    }

    #[test]
    fn a_missing_template_is_recorded_as_a_non_fatal_page_error() {
        let dir = tempdir().unwrap();
        let templates = dir.path().join("templates");
        let output = dir.path().join("out");
        fs::create_dir_all(&templates).unwrap();
        let config = test_config(&templates, &output);
        let engine = MinijinjaEngine::new(&config, None);

        let a = sample_page("a.md", output.join("a.html"));
        let jobs = vec![RenderJob { page: &a, template_name: "missing.html".to_string(), nav: None, nav_scaffold: None }];

        let scheduler = RenderScheduler::new(&config, &engine);
        let mut errors = ErrorAggregator::new(10);
        let stats = scheduler.run(jobs, &HashSet::new(), &mut errors);

        assert_eq!(stats.rendered, 0);
        assert_eq!(errors.count(), 1);
    }

    #[test]
    fn generation_counter_is_monotonic_across_schedulers() {
        let dir = tempdir().unwrap();
        let templates = dir.path().join("templates");
        let output = dir.path().join("out");
        fs::create_dir_all(&templates).unwrap();
        let config = test_config(&templates, &output);
        let engine = MinijinjaEngine::new(&config, None);

        let first = RenderScheduler::new(&config, &engine);
        let second = RenderScheduler::new(&config, &engine);
        assert!(second.generation() > first.generation());
    }

    #[test]
    fn build_jobs_shares_one_scaffold_render_across_pages_in_the_same_scope() {
        use crate::nav::NavNode;

        let root = NavNode {
            id: "/".into(),
            title: "Home".into(),
            url: "/".into(),
            icon: None,
            weight: 0,
            children: Vec::new(),
            depth: 0,
            page_source: None,
            section_path: Some("/".into()),
            is_index: true,
        };
        let tree = Arc::new(NavTree::build(root, "default", vec!["default".to_string()]));

        let mut graph = ContentGraph::default();
        let a = sample_page("a.md", PathBuf::from("out/a.html"));
        let b = sample_page("b.md", PathBuf::from("out/b.html"));
        graph.pages.insert(a.source_path.clone(), a);
        graph.pages.insert(b.source_path.clone(), b);

        let scaffold_cache = ScaffoldCache::new();
        let pages_to_build: HashSet<PathBuf> = graph.pages.keys().cloned().collect();

        // Two jobs over the same (version_id, root_url) scope must share one
        // rendered Arc<str> — a cache hit, not a second render.
        let jobs = build_jobs(&graph, &pages_to_build, |_| "default.html".to_string(), Some(&tree), Some(&scaffold_cache));
        assert_eq!(jobs.len(), 2);
        let scaffolds: Vec<_> = jobs.iter().filter_map(|j| j.nav_scaffold.clone()).collect();
        assert_eq!(scaffolds.len(), 2);
        assert!(Arc::ptr_eq(&scaffolds[0], &scaffolds[1]));
    }
}
