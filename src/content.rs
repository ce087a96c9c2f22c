//src/content.rs
//!
//! Discovery walks the content tree into a `Page`/`Section` graph. Each page
//! carries a string-keyed metadata map built from its `.meta.toml` sidecar
//! plus whatever `cascade` dicts its ancestor sections contribute — a page's
//! own key always wins over a cascaded one (spec: cascade correctness).

use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::syntax::highlight_html;
use crate::utils::add_header_anchors;

/// File stem that marks a section's index content (`_index.md`).
pub(crate) const INDEX_STEM: &str = "_index";

fn markdown_options(allow_dangerous_html: bool) -> markdown::Options {
    markdown::Options {
        compile: markdown::CompileOptions {
            allow_dangerous_html,
            // Disable GFM tag filter when dangerous HTML is allowed
            // (otherwise <style>, <script>, etc. are still escaped)
            gfm_tagfilter: !allow_dangerous_html,
            ..markdown::CompileOptions::gfm()
        },
        ..markdown::Options::gfm()
    }
}

/// A string-keyed metadata mapping, shared by page metadata and section
/// cascade dicts. Backed by `serde_json` so it hashes and persists the same
/// way across the cache and the `--explain` JSON output.
pub(crate) type Metadata = serde_json::Map<String, serde_json::Value>;

/// Raw on-disk frontmatter for one content file, read from its `.meta.toml`
/// sidecar (`post.md` -> `post.meta.toml`).
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub(crate) struct Frontmatter {
    pub title: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub date: Option<OffsetDateTime>,
    pub author: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub template: Option<String>,
    pub cover: Option<String>,
    pub nav_title: Option<String>,
    pub icon: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub weight: i64,
    /// Only meaningful on a section's `_index` page; merged into every
    /// descendant page's metadata (see `effective_cascade`).
    #[serde(default)]
    pub cascade: Option<toml::value::Table>,
    #[serde(flatten)]
    pub extra: toml::value::Table,
}

#[derive(Error, Debug)]
pub(crate) enum ContentError {
    #[error("I/O error processing file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("TOML parsing error in metadata file {path:?}: {source}")]
    TomlParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Markdown parsing failed for file {path:?}: {message}")]
    MarkdownParsingFailed { path: PathBuf, message: String },
    #[error("Syntax highlighting failed for file {path:?}: {message}")]
    SyntaxHighlighting { path: PathBuf, message: String },
}

/// An individual content unit. Created during Discovery;
/// `rendered_html` is filled in during Render and never touched after.
#[derive(Debug, Clone)]
pub(crate) struct Page {
    pub source_path: PathBuf,
    pub metadata: Metadata,
    pub raw_content: String,
    pub tags: Vec<String>,
    pub version: Option<String>,
    /// `_path` of the section that owns this page. For a section's own
    /// index page this equals the page's own `_path`.
    pub section_path: String,
    pub content_type: String,
    pub weight: i64,
    pub output_path: PathBuf,
    /// Internal, baseurl-free URL. Canonical key in NavTree/URLRegistry.
    pub _path: String,
    /// Public, baseurl-applied URL used in emitted HTML.
    pub href: String,
    pub rendered_html: Option<String>,
    pub is_section_index: bool,
}

/// A node in the content hierarchy.
#[derive(Debug, Clone)]
pub(crate) struct Section {
    pub name: String,
    pub path: String,
    pub parent: Option<String>,
    pub subsections: Vec<String>,
    pub pages: Vec<PathBuf>,
    pub index_page: Option<PathBuf>,
    pub metadata: Metadata,
    /// Raw `[cascade]` table from this section's own `_index.md`, if any.
    /// Does not include inherited ancestor cascades — see `effective_cascade`.
    pub cascade: Option<Metadata>,
}

#[derive(Debug, Default)]
pub(crate) struct ContentGraph {
    pub pages: HashMap<PathBuf, Page>,
    pub sections: HashMap<String, Section>,
    pub root_path: String,
}

impl ContentGraph {
    pub(crate) fn section(&self, path: &str) -> Option<&Section> {
        self.sections.get(path)
    }

    pub(crate) fn pages_sorted_by_weight(&self) -> Vec<&Page> {
        let mut pages: Vec<&Page> = self.pages.values().collect();
        pages.sort_by(|a, b| a.weight.cmp(&b.weight).then_with(|| a._path.cmp(&b._path)));
        pages
    }
}

/// Walk `config.site.content_dir`, building the full `Page`/`Section` graph.
///
/// Discovery errors (malformed frontmatter, unreadable files) are reported
/// per-file through the returned `Vec<ContentError>` rather than aborting
/// the whole walk; only a fatal I/O failure on the root directory itself
/// short-circuits discovery.
#[instrument(skip(config))]
pub(crate) fn discover(config: &Config) -> (ContentGraph, Vec<ContentError>) {
    let content_dir = Path::new(&config.site.content_dir);
    let mut graph = ContentGraph {
        root_path: "/".to_string(),
        ..Default::default()
    };
    ensure_section_chain(&mut graph, "/");
    let mut errors = Vec::new();

    let mut files: Vec<PathBuf> = WalkDir::new(content_dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("md") | Some("markdown")))
        .collect();
    // Index files must be discovered before their siblings so cascades are
    // populated by the time descendant pages are built below.
    files.sort_by_key(|p| (!is_index_file(p), p.clone()));

    for path in files {
        match discover_one(&mut graph, config, content_dir, &path) {
            Ok(()) => {}
            Err(err) => {
                warn!("discovery::error {}", err);
                errors.push(err);
            }
        }
    }

    (graph, errors)
}

fn is_index_file(path: &Path) -> bool {
    path.file_stem().and_then(|s| s.to_str()) == Some(INDEX_STEM)
}

fn discover_one(
    graph: &mut ContentGraph,
    config: &Config,
    content_dir: &Path,
    path: &Path,
) -> Result<(), ContentError> {
    let rel = path.strip_prefix(content_dir).unwrap_or(path);
    let stem = rel.file_stem().and_then(|s| s.to_str()).unwrap_or("page");
    let parent_rel = rel.parent().unwrap_or_else(|| Path::new(""));
    let section_path = to_url_path(parent_rel);
    ensure_section_chain(graph, &section_path);

    let frontmatter = load_frontmatter(path)?;
    debug!("io::read ← {:?}", path);
    let raw_content = fs::read_to_string(path).map_err(|e| ContentError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    let content_type = super::utils::get_content_type(path, &config.site.content_dir);
    let is_index = stem == INDEX_STEM;
    let page_path = if is_index {
        section_path.clone()
    } else {
        page_url_path(&section_path, stem, config.site.clean_urls)
    };

    let own_metadata = frontmatter_to_metadata(&frontmatter);
    let cascade = effective_cascade(graph, &section_path);
    let metadata = merge_own_over_cascade(cascade, own_metadata.clone());
    let tags = frontmatter
        .tags
        .iter()
        .map(|t| normalize_tag_slug(t))
        .collect();

    let page = Page {
        source_path: path.to_path_buf(),
        metadata,
        raw_content,
        tags,
        version: frontmatter.version.clone(),
        section_path: section_path.clone(),
        content_type,
        weight: frontmatter.weight,
        output_path: output_path_for(config, &page_path),
        href: config.href_for(&page_path),
        _path: page_path,
        rendered_html: None,
        is_section_index: is_index,
    };

    if is_index {
        let section = graph
            .sections
            .get_mut(&section_path)
            .expect("section chain ensured above");
        section.index_page = Some(path.to_path_buf());
        section.metadata = own_metadata;
        section.cascade = frontmatter.cascade.clone().map(toml_table_to_metadata);
    } else if let Some(section) = graph.sections.get_mut(&section_path) {
        section.pages.push(path.to_path_buf());
    }

    graph.pages.insert(path.to_path_buf(), page);
    Ok(())
}

fn ensure_section_chain(graph: &mut ContentGraph, section_path: &str) {
    if graph.sections.contains_key(section_path) {
        return;
    }
    let parent_path = parent_section_path(section_path);
    if let Some(parent) = &parent_path {
        ensure_section_chain(graph, parent);
    }
    let name = section_path
        .trim_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("")
        .to_string();
    graph.sections.insert(
        section_path.to_string(),
        Section {
            name,
            path: section_path.to_string(),
            parent: parent_path.clone(),
            subsections: Vec::new(),
            pages: Vec::new(),
            index_page: None,
            metadata: Metadata::new(),
            cascade: None,
        },
    );
    if let Some(parent) = parent_path {
        if let Some(parent_section) = graph.sections.get_mut(&parent) {
            if !parent_section.subsections.contains(&section_path.to_string()) {
                parent_section.subsections.push(section_path.to_string());
            }
        }
    }
}

fn parent_section_path(section_path: &str) -> Option<String> {
    if section_path == "/" {
        return None;
    }
    let trimmed = section_path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((parent, _)) if parent.is_empty() => Some("/".to_string()),
        Some((parent, _)) => Some(format!("{parent}/")),
        None => Some("/".to_string()),
    }
}

fn to_url_path(rel_dir: &Path) -> String {
    let s = rel_dir.to_string_lossy().replace('\\', "/");
    let trimmed = s.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}/")
    }
}

fn page_url_path(section_path: &str, slug: &str, clean_urls: bool) -> String {
    if clean_urls {
        format!("{section_path}{slug}/")
    } else {
        format!("{section_path}{slug}.html")
    }
}

fn output_path_for(config: &Config, path: &str) -> PathBuf {
    let out = Path::new(&config.site.output_dir);
    let trimmed = path.trim_start_matches('/');
    if path.ends_with('/') {
        out.join(trimmed).join("index.html")
    } else {
        out.join(trimmed)
    }
}

/// Normalizes a raw tag into the slug form used by taxonomy indexing and
/// change detection.
pub(crate) fn normalize_tag_slug(tag: &str) -> String {
    tag.trim().to_lowercase().replace(' ', "-")
}

fn toml_table_to_metadata(table: toml::value::Table) -> Metadata {
    serde_json::to_value(toml::Value::Table(table))
        .ok()
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default()
}

fn frontmatter_to_metadata(fm: &Frontmatter) -> Metadata {
    let mut m = toml_table_to_metadata(fm.extra.clone());
    if let Some(t) = &fm.title {
        m.insert("title".into(), serde_json::Value::String(t.clone()));
    }
    if let Some(d) = &fm.date
        && let Ok(s) = d.format(&time::format_description::well_known::Rfc3339)
    {
        m.insert("date".into(), serde_json::Value::String(s));
    }
    if let Some(a) = &fm.author {
        m.insert("author".into(), serde_json::Value::String(a.clone()));
    }
    if !fm.tags.is_empty() {
        m.insert(
            "tags".into(),
            serde_json::Value::Array(fm.tags.iter().cloned().map(serde_json::Value::String).collect()),
        );
    }
    if let Some(t) = &fm.template {
        m.insert("template".into(), serde_json::Value::String(t.clone()));
    }
    if let Some(c) = &fm.cover {
        m.insert("cover".into(), serde_json::Value::String(c.clone()));
    }
    if let Some(n) = &fm.nav_title {
        m.insert("nav_title".into(), serde_json::Value::String(n.clone()));
    }
    if let Some(i) = &fm.icon {
        m.insert("icon".into(), serde_json::Value::String(i.clone()));
    }
    if let Some(v) = &fm.version {
        m.insert("version".into(), serde_json::Value::String(v.clone()));
    }
    m.insert("weight".into(), serde_json::Value::Number(fm.weight.into()));
    m
}

/// Merges ancestor `cascade` dicts, closer sections overriding farther ones,
/// into a single metadata map to apply underneath a page's own frontmatter.
fn effective_cascade(graph: &ContentGraph, section_path: &str) -> Metadata {
    let mut chain = Vec::new();
    let mut cur = Some(section_path.to_string());
    while let Some(p) = cur {
        let Some(section) = graph.sections.get(&p) else {
            break;
        };
        chain.push(p);
        cur = section.parent.clone();
    }
    chain.reverse();

    let mut merged = Metadata::new();
    for path in chain {
        if let Some(section) = graph.sections.get(&path)
            && let Some(cascade) = &section.cascade
        {
            for (k, v) in cascade {
                merged.insert(k.clone(), v.clone());
            }
        }
    }
    merged
}

fn merge_own_over_cascade(cascade: Metadata, own: Metadata) -> Metadata {
    let mut merged = cascade;
    for (k, v) in own {
        merged.insert(k, v);
    }
    merged
}

/// Canonical (sorted-key) JSON rendering of a metadata map, used to hash
/// `cascade` dicts for change detection and to
/// feed a page's provenance `combined_hash`.
pub(crate) fn canonical_json(value: &Metadata) -> String {
    fn sort_value(v: &serde_json::Value) -> serde_json::Value {
        match v {
            serde_json::Value::Object(map) => {
                let sorted: BTreeMap<String, serde_json::Value> =
                    map.iter().map(|(k, v)| (k.clone(), sort_value(v))).collect();
                serde_json::to_value(sorted).unwrap_or(serde_json::Value::Null)
            }
            serde_json::Value::Array(arr) => serde_json::Value::Array(arr.iter().map(sort_value).collect()),
            other => other.clone(),
        }
    }
    let root = serde_json::Value::Object(value.clone());
    serde_json::to_string(&sort_value(&root)).unwrap_or_default()
}

/// Hash of a section's own `cascade` dict (blake3, not SHA-256 — see
/// DESIGN.md: the engine standardizes on one hashing primitive throughout).
pub(crate) fn cascade_hash(cascade: &Metadata) -> blake3::Hash {
    blake3::hash(canonical_json(cascade).as_bytes())
}

fn load_frontmatter(markdown_path: &Path) -> Result<Frontmatter, ContentError> {
    let meta_path = markdown_path.with_extension("meta.toml");
    match fs::read_to_string(&meta_path) {
        Ok(raw) => {
            debug!("io::read {} bytes", raw.len());
            toml::from_str(&raw).map_err(|e| ContentError::TomlParse {
                path: meta_path,
                source: e,
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("content::frontmatter none for {:?}", markdown_path);
            Ok(Frontmatter::default())
        }
        Err(e) => Err(ContentError::Io {
            path: meta_path,
            source: e,
        }),
    }
}

/// Converts a page's raw markdown body to HTML, optionally adding header
/// anchors and syntax-highlighting fenced code blocks.
pub(crate) fn render_markdown(
    raw_content: &str,
    path: &Path,
    highlighting_enabled: bool,
    theme: &str,
    allow_dangerous_html: bool,
    header_uri_fragment: bool,
) -> Result<String, ContentError> {
    let mut html = match markdown::to_html_with_options(raw_content, &markdown_options(allow_dangerous_html)) {
        Ok(html) => html,
        Err(e) => {
            return Err(ContentError::MarkdownParsingFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            });
        }
    };

    if header_uri_fragment {
        html = add_header_anchors(&html);
    }

    if highlighting_enabled {
        highlight_html(&html, theme).map_err(|e| ContentError::SyntaxHighlighting {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    } else {
        Ok(html)
    }
}

/// Extracts an HTML excerpt from markdown content, using the text between
/// `summary_pattern` and the next heading.
pub(crate) fn get_excerpt_html(markdown: &str, summary_pattern: &str, allow_dangerous_html: bool) -> String {
    let Some(start_idx) = markdown.find(summary_pattern) else {
        return String::new();
    };
    if start_idx + summary_pattern.len() >= markdown.len() {
        return String::new();
    }

    let content_after_summary = &markdown[start_idx + summary_pattern.len()..];
    let end_idx = content_after_summary
        .find("\n##")
        .or_else(|| content_after_summary.find("\n###"))
        .or_else(|| content_after_summary.find("\n# "))
        .unwrap_or(content_after_summary.len());

    let excerpt_markdown = content_after_summary[..end_idx].trim();
    match markdown::to_html_with_options(excerpt_markdown, &markdown_options(allow_dangerous_html)) {
        Ok(html) => html,
        Err(e) => {
            warn!("Failed to convert excerpt to HTML: {}", e);
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_file(dir: &Path, rel: &str, contents: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        File::create(path).unwrap().write_all(contents.as_bytes()).unwrap();
    }

    fn test_config(content_dir: &Path) -> Config {
        let toml_str = format!(
            r#"
[site]
title = "Test"
domain = "example.com"
output_dir = "out"
content_dir = "{}"
template_dir = "templates"
static_dir = "static"
site_index_template = "index.html"
clean_urls = true
"#,
            content_dir.to_str().unwrap().replace('\\', "/")
        );
        Config::from_str(&toml_str).unwrap()
    }

    #[test]
    fn discovers_pages_and_sections() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "blog/post-one.md", "# Hello");
        write_file(dir.path(), "blog/_index.md", "# Blog");
        let config = test_config(dir.path());

        let (graph, errors) = discover(&config);
        assert!(errors.is_empty());
        assert!(graph.sections.contains_key("/blog/"));
        let section = graph.section("/blog/").unwrap();
        assert_eq!(section.pages.len(), 1);
        assert!(section.index_page.is_some());
    }

    #[test]
    fn clean_urls_produce_directory_style_paths() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "blog/post-one.md", "# Hello");
        let config = test_config(dir.path());

        let (graph, _) = discover(&config);
        let page = graph
            .pages
            .values()
            .find(|p| !p.is_section_index)
            .unwrap();
        assert_eq!(page._path, "/blog/post-one/");
        assert!(page.output_path.ends_with("blog/post-one/index.html"));
    }

    #[test]
    fn cascade_merges_through_nesting_and_page_wins() {
        let dir = tempdir().unwrap();
        write_file(
            dir.path(),
            "docs/_index.meta.toml",
            "[cascade]\nauthor = \"Section Author\"\nversion = \"1.0\"\n",
        );
        write_file(dir.path(), "docs/_index.md", "# Docs");
        write_file(
            dir.path(),
            "docs/guide.meta.toml",
            "author = \"Page Author\"\n",
        );
        write_file(dir.path(), "docs/guide.md", "# Guide");
        let config = test_config(dir.path());

        let (graph, errors) = discover(&config);
        assert!(errors.is_empty());
        let guide = graph
            .pages
            .values()
            .find(|p| p.source_path.ends_with("guide.md"))
            .unwrap();
        assert_eq!(
            guide.metadata.get("author").and_then(|v| v.as_str()),
            Some("Page Author")
        );
        assert_eq!(
            guide.metadata.get("version").and_then(|v| v.as_str()),
            Some("1.0")
        );
    }

    #[test]
    fn cascade_hash_is_stable_under_key_reordering() {
        let mut a = Metadata::new();
        a.insert("b".into(), serde_json::Value::String("2".into()));
        a.insert("a".into(), serde_json::Value::String("1".into()));

        let mut b = Metadata::new();
        b.insert("a".into(), serde_json::Value::String("1".into()));
        b.insert("b".into(), serde_json::Value::String("2".into()));

        assert_eq!(cascade_hash(&a), cascade_hash(&b));
    }

    #[test]
    fn tag_slugs_are_normalized() {
        assert_eq!(normalize_tag_slug(" Rust Lang "), "rust-lang");
    }

    #[test]
    fn get_excerpt_html_extracts_between_headings() {
        let markdown = "Intro.\n\n## Summary\nExcerpt text.\n\n## Main\nRest.";
        let excerpt = get_excerpt_html(markdown, "## Summary", false);
        assert!(excerpt.contains("Excerpt text"));
        assert!(!excerpt.contains("Rest"));
    }
}
