// src/build.rs
//!
//! The build orchestrator: nine phases from config load to teardown. `run`
//! is the single phase pipeline; `build` and `build_with_spans` are thin
//! entry points that wrap it for the `build`/`watch` and `flame` subcommands
//! respectively.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use crate::asset_hash::{hash_static_assets, AssetManifest};
use crate::cache::BuildCache;
use crate::cache_registry::{CacheRegistry, InvalidationReason};
use crate::config::Config;
use crate::content::{self, ContentGraph};
use crate::error::{ErrorAggregator, PageError, RunError};
use crate::incremental::provenance::ProvenanceCache;
use crate::incremental::{load_cache_with_migration, IncrementalFilter};
use crate::nav::{self, detect_menu_cycle, NavTreeCache, ScaffoldCache};
use crate::output::{copy_static_files, write_output_file};
use crate::postprocess;
use crate::render::{build_jobs, render_section_index, RenderScheduler};
use crate::template::{MinijinjaEngine, TemplateEngine};
use crate::url_registry::{URLRegistry, PRIORITY_CONTENT, PRIORITY_SECTION_INDEX};
use crate::utils::{list_static_asset_keys, template_dependency_fingerprint, template_name_of};

const CACHE_DIR: &str = ".bengal";
const CACHE_FILE: &str = "cache.json";
const LEGACY_CACHE_FILE: &str = ".bengal-cache.json";
const PROVENANCE_FILE: &str = "provenance.json";

/// Outcome of one call to `run`.
#[derive(Debug, Default)]
pub(crate) struct BuildStats {
    pub(crate) pages_rendered: usize,
    pub(crate) pages_skipped: bool,
    pub(crate) errors: usize,
    pub(crate) duration_ms: u128,
}

/// Runs a normal, non-profiled build with no forced sources (the `build`
/// subcommand's default path). A one-shot build gets its own `NavTreeCache`
/// since there's no second build to reuse it; `build_watched` is the
/// entry point that actually benefits from a longer-lived one.
pub(crate) fn build(config_file: &str) -> Result<BuildStats, RunError> {
    let config = Config::load_from_file(config_file)?;
    run(&config, &HashSet::new(), &NavTreeCache::new())
}

/// Runs a build reusing `nav_tree_cache` across calls — the `watch`
/// subcommand's entry point, so the per-version nav tree only gets rebuilt
/// when `config.build.incremental` actually requires it, not on every
/// rebuild in the watch loop.
pub(crate) fn build_watched(config_file: &str, nav_tree_cache: &NavTreeCache) -> Result<BuildStats, RunError> {
    let config = Config::load_from_file(config_file)?;
    run(&config, &HashSet::new(), nav_tree_cache)
}

/// Runs a build with each phase wrapped in its own `tracing` span, so a
/// `tracing-chrome`/`tracing-flame` layer installed by the caller captures
/// per-phase timing (the `flame` subcommand's entry point).
#[instrument(name = "build", skip_all)]
pub(crate) fn build_with_spans(config_file: &str) -> Result<BuildStats, RunError> {
    let config = Config::load_from_file(config_file)?;
    run(&config, &HashSet::new(), &NavTreeCache::new())
}

/// Paths the `watch` subcommand should register a filesystem watch on:
/// content, templates and static directories, plus the config file itself.
pub(crate) fn get_paths_to_watch(config_file: &str, config: &Config) -> Vec<String> {
    vec![
        config_file.to_string(),
        config.site.content_dir.clone(),
        config.site.template_dir.clone(),
        config.site.static_dir.clone(),
    ]
}

fn config_hash(config: &Config) -> String {
    let serialized = serde_json::to_string(config).unwrap_or_default();
    blake3::hash(serialized.as_bytes()).to_hex().to_string()
}

/// The nine-phase pipeline. Fatal errors short-circuit to the
/// caller; non-fatal per-page failures are aggregated and only become a
/// `RunError` if `config.build.strict` demands it.
#[instrument(name = "run_build", skip_all)]
fn run(config: &Config, forced_changed: &HashSet<PathBuf>, nav_tree_cache: &NavTreeCache) -> Result<BuildStats, RunError> {
    let started = Instant::now();
    let output_dir = PathBuf::from(&config.site.output_dir);
    let cache_registry = CacheRegistry::new();
    let scaffold_cache = ScaffoldCache::new();

    // Phase 0: setup — static assets first so the manifest exists before
    // any template render references it.
    debug!("build::phase static");
    copy_static_files(config)?;
    let manifest: AssetManifest = if config.site.asset_hashing_enabled {
        hash_static_assets(&config.site.static_dir, &config.site.output_dir)?
    } else {
        AssetManifest::new()
    };

    let engine = MinijinjaEngine::new(config, Some(&manifest));

    // Phase 1.5: template validation. Broken templates are reported but
    // never block the build — a page that references one fails at render
    // time instead, where `ErrorAggregator` already handles it per-page.
    for problem in engine.validate() {
        warn!("template::invalid {}", problem);
    }

    // Phase 2: discovery.
    debug!("build::phase discover");
    let (mut graph, discovery_errors) = content::discover(config);
    for err in &discovery_errors {
        warn!("discovery::error {}", err);
    }
    if let Some(cycle_at) = detect_menu_cycle(&section_edges(&graph)) {
        return Err(RunError::MenuCycle(cycle_at));
    }

    // Phase 3/4: cache metadata + config check.
    let cache_dir = output_dir.join(CACHE_DIR);
    let cache_path = cache_dir.join(CACHE_FILE);
    let legacy_cache_path = output_dir.join(LEGACY_CACHE_FILE);
    let provenance_path = cache_dir.join(PROVENANCE_FILE);

    let mut cache = load_cache_with_migration(&cache_path, &legacy_cache_path);
    let mut provenance = ProvenanceCache::load(&provenance_path).unwrap_or_default();

    let new_config_hash = config_hash(config);
    let config_changed = cache.config_hash.as_deref() != Some(new_config_hash.as_str());
    if config_changed {
        cache_registry.clear_all_caches(InvalidationReason::ConfigChanged);
        // `nav_tree_cache` persists across `watch` builds now that it's
        // owned outside `run`; a config change still invalidates it same as
        // every other cache, since nav ordering can depend on config.
        nav_tree_cache.invalidate_all();
        scaffold_cache.invalidate_all();
    }

    let (filter_result, decision_log) = {
        let mut filter = IncrementalFilter { config, cache: &mut cache, provenance: &mut provenance };
        filter.cleanup_deleted_sources(&graph, &output_dir);
        filter.run(&graph, &output_dir, forced_changed, &HashSet::new(), config_changed)
    };
    for entry in &decision_log.triggers {
        debug!("incremental::trigger {:?} {}", entry.trigger, entry.details);
    }

    if filter_result.skip {
        info!("build::skip nothing changed");
        finalize_cache(&mut cache, &new_config_hash, &cache_dir, &cache_path, &provenance, &provenance_path)?;
        return Ok(BuildStats { pages_skipped: true, duration_ms: started.elapsed().as_millis(), ..Default::default() });
    }

    // Phase 6: render. `rendered_html` must be populated before `RenderJob`
    // borrows pages immutably, so the markdown pass runs as its own step.
    let mut errors = ErrorAggregator::new(20);
    render_markdown_pass(&mut graph, config, &filter_result.pages_to_build, &mut errors);

    let version_id = config.versioning.versions.first().cloned().unwrap_or_else(|| "default".to_string());
    let versions = config.versioning.versions.clone();
    // Any page rebuild can change the structure `NavTree` was built from
    // (a title, weight or icon edit, a new or removed page); invalidate
    // before reusing the cache across `watch` builds. A build that only
    // reprocesses assets with no page changes still hits the cached tree.
    if !filter_result.pages_to_build.is_empty() {
        nav_tree_cache.invalidate(&version_id);
        scaffold_cache.invalidate_all();
    }
    let nav_tree = nav_tree_cache.get_or_build(&version_id, || nav::build_from_content(&graph, &version_id, versions));

    let jobs = build_jobs(
        &graph,
        &filter_result.pages_to_build,
        |page| template_name_of(config, page),
        Some(&nav_tree),
        Some(&scaffold_cache),
    );

    let scheduler = RenderScheduler::new(config, &engine);
    let render_stats = scheduler.run(jobs, forced_changed, &mut errors);

    render_section_indexes(&engine, config, &graph, &mut errors);

    let mut url_registry = URLRegistry::new();
    claim_page_urls(&mut url_registry, &graph)?;
    cache.url_claims = url_registry.snapshot();

    // Phase 7: postprocess.
    run_postprocess(config, &graph, &output_dir)?;

    // Record each page's template/asset dependencies for the *next* build's
    // fingerprint cascade (step 3 in `incremental::mod::run`, which reads
    // the *previous* build's `reverse_dependencies` above — before this
    // point in the pipeline, never after).
    record_dependencies(&mut cache, config, &graph, &manifest);

    errors.summarize("render");

    // Phase 8: health check.
    if render_stats.skipped_shutdown {
        warn!("build::health render pool stopped early on a shutdown signal");
    }
    errors.enforce_strict(config.build.strict, config.build.strict_render_error_threshold)?;

    // Phase 9: teardown.
    finalize_cache(&mut cache, &new_config_hash, &cache_dir, &cache_path, &provenance, &provenance_path)?;

    Ok(BuildStats {
        pages_rendered: render_stats.rendered,
        pages_skipped: false,
        errors: errors.count(),
        duration_ms: started.elapsed().as_millis(),
    })
}

fn section_edges(graph: &ContentGraph) -> HashMap<String, Vec<String>> {
    graph.sections.iter().map(|(path, section)| (path.clone(), section.subsections.clone())).collect()
}

fn render_markdown_pass(
    graph: &mut ContentGraph,
    config: &Config,
    pages_to_build: &HashSet<PathBuf>,
    errors: &mut ErrorAggregator,
) {
    let mut rendered = Vec::with_capacity(pages_to_build.len());
    for path in pages_to_build {
        let Some(page) = graph.pages.get(path) else { continue };
        match content::render_markdown(
            &page.raw_content,
            &page.source_path,
            config.site.syntax_highlighting_enabled,
            &config.site.syntax_highlighting_theme,
            config.site.allow_dangerous_html,
            config.site.header_uri_fragment,
        ) {
            Ok(html) => rendered.push((path.clone(), html)),
            Err(e) => errors.record(PageError { source_path: path.clone(), kind: "markdown", message: e.to_string() }),
        }
    }
    for (path, html) in rendered {
        if let Some(page) = graph.pages.get_mut(&path) {
            page.rendered_html = Some(html);
        }
    }
}

fn render_section_indexes(engine: &MinijinjaEngine, config: &Config, graph: &ContentGraph, errors: &mut ErrorAggregator) {
    for section in graph.sections.values() {
        if section.pages.is_empty() && section.subsections.is_empty() {
            continue;
        }
        let template_name = section_index_template(config, section, graph);
        let output_path = section_index_output_path(config, &section.path);

        match render_section_index(engine, config, &template_name, section, graph, None) {
            Ok(html) => {
                if let Err(e) = write_output_file(&output_path, &html) {
                    errors.record(PageError { source_path: output_path, kind: "write", message: e.to_string() });
                }
            }
            Err(e) => errors.record(PageError { source_path: output_path, kind: "render", message: e.to_string() }),
        }
    }
}

fn section_index_template(config: &Config, section: &crate::content::Section, graph: &ContentGraph) -> String {
    if section.path == "/" {
        return config.site.site_index_template.clone();
    }
    let content_type = section.pages.first().and_then(|p| graph.pages.get(p)).map(|p| p.content_type.as_str());
    content_type
        .and_then(|ct| config.content.get(ct))
        .map(|ct| ct.index_template.clone())
        .unwrap_or_else(|| "index.html".to_string())
}

fn section_index_output_path(config: &Config, section_path: &str) -> PathBuf {
    Path::new(&config.site.output_dir).join(section_path.trim_start_matches('/')).join("index.html")
}

/// Populates `BuildCache.dependencies`/`reverse_dependencies` for every page
/// in `graph`: each page depends on its resolved template, that template's
/// `extends`/`include` chain, and every static asset (so an asset edit
/// cascades to the whole site until per-asset usage tracking exists).
/// `reverse_dependencies` is the inverse index `TemplateChangeDetector` and
/// the asset fingerprint cascade both key their lookups against.
fn record_dependencies(cache: &mut BuildCache, config: &Config, graph: &ContentGraph, manifest: &AssetManifest) {
    let asset_keys: Vec<String> = if manifest.is_empty() {
        list_static_asset_keys(&config.site.static_dir)
    } else {
        manifest.keys().cloned().collect()
    };

    cache.dependencies.clear();
    cache.reverse_dependencies.clear();

    for page in graph.pages.values() {
        let page_key = page.source_path.to_string_lossy().to_string();
        let template_name = template_name_of(config, page);
        let (includes, _) = template_dependency_fingerprint(&config.site.template_dir, &template_name);

        let mut deps: HashSet<String> = HashSet::new();
        deps.insert(template_name.clone());
        deps.extend(includes);
        deps.extend(asset_keys.iter().cloned());

        for dep in &deps {
            cache.reverse_dependencies.entry(dep.clone()).or_default().insert(page_key.clone());
        }
        cache.dependencies.insert(page_key, deps);
    }
}

fn claim_page_urls(registry: &mut URLRegistry, graph: &ContentGraph) -> Result<(), RunError> {
    for page in graph.pages.values() {
        let priority = if page.is_section_index { PRIORITY_SECTION_INDEX } else { PRIORITY_CONTENT };
        registry.claim(&page._path, "content", &page.source_path.to_string_lossy(), priority, page.version.clone(), None)?;
    }
    Ok(())
}

fn run_postprocess(config: &Config, graph: &ContentGraph, output_dir: &Path) -> Result<(), RunError> {
    if config.site.sitemap_enabled {
        let xml = postprocess::sitemap::generate_sitemap(config, graph);
        write_output_file(&output_dir.join("sitemap.xml"), &xml)?;
    }
    if config.site.rss_enabled {
        let xml = postprocess::rss::generate_rss(config, graph);
        write_output_file(&output_dir.join("feed.xml"), &xml)?;
    }
    if config.site.search_index_enabled {
        let json = postprocess::index::generate_search_index(config, graph);
        write_output_file(&output_dir.join("search-index.json"), &json)?;
    }
    if config.output_formats.llm_txt {
        let txt = postprocess::index::generate_llm_txt(config, graph);
        write_output_file(&output_dir.join("llm.txt"), &txt)?;
    }
    if config.output_formats.per_page_json {
        for page in graph.pages.values() {
            let json = postprocess::index::generate_page_json(config, page);
            write_output_file(&page.output_path.with_extension("json"), &json)?;
        }
    }

    let site_index = postprocess::index::generate_site_index(config, graph);
    write_output_file(&output_dir.join("index.json"), &site_index)?;

    Ok(())
}

fn finalize_cache(
    cache: &mut BuildCache,
    config_hash: &str,
    cache_dir: &Path,
    cache_path: &Path,
    provenance: &ProvenanceCache,
    provenance_path: &Path,
) -> Result<(), RunError> {
    std::fs::create_dir_all(cache_dir).map_err(|e| RunError::IoError(e.to_string()))?;
    cache.config_hash = Some(config_hash.to_string());
    cache.last_build = time::OffsetDateTime::now_utc().format(&time::format_description::well_known::Rfc3339).ok();
    cache.save(cache_path)?;
    provenance.save(provenance_path).map_err(|e| RunError::IoError(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_site(dir: &Path) {
        fs::create_dir_all(dir.join("content")).unwrap();
        fs::create_dir_all(dir.join("templates")).unwrap();
        fs::write(dir.join("content/hello.md"), "# Hello\n\nWorld.").unwrap();
        fs::write(dir.join("templates/default.html"), "<h1>{{ page.title }}</h1>{{ content | safe }}").unwrap();
        fs::write(dir.join("templates/index.html"), "{% for item in contents %}{{ item.title }}{% endfor %}").unwrap();
        fs::write(
            dir.join("bengal.toml"),
            format!(
                r#"
[site]
title = "Test Site"
domain = "example.com"
output_dir = "{output}"
content_dir = "{content}"
template_dir = "{templates}"
static_dir = "{static_dir}"
site_index_template = "index.html"
clean_urls = true
"#,
                output = dir.join("out").to_str().unwrap().replace('\\', "/"),
                content = dir.join("content").to_str().unwrap().replace('\\', "/"),
                templates = dir.join("templates").to_str().unwrap().replace('\\', "/"),
                static_dir = dir.join("static").to_str().unwrap().replace('\\', "/"),
            ),
        )
        .unwrap();
    }

    #[test]
    fn builds_a_minimal_site_end_to_end() {
        let dir = tempdir().unwrap();
        write_site(dir.path());
        let config_file = dir.path().join("bengal.toml");

        let stats = build(config_file.to_str().unwrap()).unwrap();
        assert_eq!(stats.pages_rendered, 1);
        assert!(dir.path().join("out/hello/index.html").exists());
        assert!(dir.path().join("out/index.json").exists());
    }

    #[test]
    fn second_build_with_no_changes_skips() {
        let dir = tempdir().unwrap();
        write_site(dir.path());
        let config_file = dir.path().join("bengal.toml");

        build(config_file.to_str().unwrap()).unwrap();
        let stats = build(config_file.to_str().unwrap()).unwrap();
        assert!(stats.pages_skipped);
    }

    #[test]
    fn changing_config_forces_a_full_rebuild() {
        let dir = tempdir().unwrap();
        write_site(dir.path());
        let config_file = dir.path().join("bengal.toml");
        build(config_file.to_str().unwrap()).unwrap();

        let mut contents = fs::read_to_string(&config_file).unwrap();
        contents.push_str("\n[build]\nstrict = false\n");
        fs::write(&config_file, &contents).unwrap();

        let stats = build(config_file.to_str().unwrap()).unwrap();
        assert!(!stats.pages_skipped);
    }

    #[test]
    fn build_records_each_pages_template_and_asset_dependencies() {
        let dir = tempdir().unwrap();
        write_site(dir.path());
        fs::create_dir_all(dir.path().join("static/css")).unwrap();
        fs::write(dir.path().join("static/css/style.css"), "body {}").unwrap();
        let config_file = dir.path().join("bengal.toml");

        build(config_file.to_str().unwrap()).unwrap();

        let cache = BuildCache::load(&dir.path().join("out/.bengal/cache.json")).unwrap();
        let hello_key = dir.path().join("content/hello.md").to_string_lossy().to_string();
        let deps = cache.dependencies.get(&hello_key).expect("hello.md should have recorded dependencies");
        assert!(deps.contains("default.html"));
        assert!(deps.contains("css/style.css"));
        assert!(cache.reverse_dependencies.get("default.html").unwrap().contains(&hello_key));
        assert!(cache.reverse_dependencies.get("css/style.css").unwrap().contains(&hello_key));
    }

    #[test]
    fn build_watched_reuses_one_nav_tree_cache_across_repeated_builds() {
        let dir = tempdir().unwrap();
        write_site(dir.path());
        let config_file = dir.path().join("bengal.toml");
        let nav_tree_cache = NavTreeCache::new();

        let first = build_watched(config_file.to_str().unwrap(), &nav_tree_cache).unwrap();
        assert_eq!(first.pages_rendered, 1);

        fs::write(dir.path().join("content/second.md"), "# Second\n\nMore.").unwrap();
        let second = build_watched(config_file.to_str().unwrap(), &nav_tree_cache).unwrap();
        assert_eq!(second.pages_rendered, 1);
        assert!(dir.path().join("out/second/index.html").exists());
    }
}
