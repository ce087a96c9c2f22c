// src/template.rs
//!
//! `TemplateEngine` is the capability-flagged protocol templates render
//! through: any engine exposes `site`/`template_dirs`, a handful of
//! render/introspection methods, and a `capabilities` flag set so callers
//! can ask "does this engine support X" instead of hard-coding minijinja.
//! `MinijinjaEngine` is the only implementation.

use std::path::{Path, PathBuf};

use minijinja::{Environment, State, Value, context, path_loader};
use minijinja_contrib::add_to_environment;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::instrument;

use crate::asset_hash::{fallback_static_url, normalize_asset_key, AssetManifest};
use crate::config::Config;
use crate::content::{get_excerpt_html, Page, Section};
use crate::nav::{NavNodeProxy, NavTreeContext};

/// Optional behaviors an engine may or may not support. The build
/// orchestrator checks these before relying on a feature rather than
/// assuming every engine is minijinja.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EngineCapabilities(u8);

impl EngineCapabilities {
    pub(crate) const BLOCK_CACHING: Self = Self(1 << 0);
    pub(crate) const BLOCK_LEVEL_DETECTION: Self = Self(1 << 1);
    pub(crate) const INTROSPECTION: Self = Self(1 << 2);
    pub(crate) const PIPELINE_OPERATORS: Self = Self(1 << 3);
    pub(crate) const PATTERN_MATCHING: Self = Self(1 << 4);
    const NONE: Self = Self(0);

    pub(crate) fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for EngineCapabilities {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl Default for EngineCapabilities {
    fn default() -> Self {
        Self::NONE
    }
}

/// Format a date as "Month Day, Year" (e.g., "January 15, 2024").
fn format_date_long(date: OffsetDateTime) -> String {
    const FORMAT: &[time::format_description::FormatItem<'static>] =
        format_description!("[month repr:long] [day], [year]");
    date.format(&FORMAT).unwrap_or_else(|_| "Invalid date".to_string())
}

/// Marks a value as pre-escaped so `/` in URL paths isn't turned into `&#x2f;`.
fn url_filter(value: &str) -> Value {
    Value::from_safe_string(value.to_string())
}

/// Resolves a static asset path to its hashed form via the manifest global,
/// falling back to a normalized `/static/...` path when unhashed.
fn asset_hash_filter(state: &State, path: &str) -> Value {
    let normalized = normalize_asset_key(path);

    if let Some(manifest_value) = state.lookup("_asset_manifest")
        && let Ok(hashed) = manifest_value.get_item(&Value::from(normalized))
        && !hashed.is_undefined()
        && let Some(s) = hashed.as_str()
    {
        return Value::from_safe_string(s.to_string());
    }

    Value::from_safe_string(fallback_static_url(path))
}

fn configure_environment(env: &mut Environment<'static>) {
    add_to_environment(env);
    env.add_filter("url", url_filter);
    env.add_filter("asset_hash", asset_hash_filter);
}

/// Per-page view handed to templates: flattened metadata, the
/// rendered body, excerpt, a formatted date, and a `nav` entry point scoped
/// to this page's active trail.
#[derive(Debug, Clone, serde::Serialize)]
pub(crate) struct PageContext {
    pub title: String,
    pub content: String,
    pub excerpt: String,
    pub formatted_date: Option<String>,
    pub tags: Vec<String>,
    pub content_type: String,
    pub href: String,
    pub metadata: crate::content::Metadata,
}

pub(crate) fn page_context(page: &Page, config: &Config) -> PageContext {
    let title = page
        .metadata
        .get("title")
        .and_then(|v| v.as_str())
        .unwrap_or(&page.content_type)
        .to_string();
    let formatted_date = page
        .metadata
        .get("date")
        .and_then(|v| v.as_str())
        .and_then(|s| OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339).ok())
        .map(format_date_long);
    let excerpt = get_excerpt_html(&page.raw_content, "## Context", config.site.allow_dangerous_html);

    PageContext {
        title,
        content: page.rendered_html.clone().unwrap_or_default(),
        excerpt,
        formatted_date,
        tags: page.tags.clone(),
        content_type: page.content_type.clone(),
        href: page.href.clone(),
        metadata: page.metadata.clone(),
    }
}

/// Capability-flagged rendering protocol. Every method here mirrors the original's engine object:
/// `site`/`template_dirs` are exposed as fields, not methods, since there's
/// only ever one live engine per build and no need to virtualize access.
pub(crate) trait TemplateEngine {
    fn template_dirs(&self) -> &[PathBuf];
    fn capabilities(&self) -> EngineCapabilities;
    fn render_template(&self, name: &str, ctx: Value) -> Result<String, minijinja::Error>;
    fn render_string(&self, source: &str, ctx: Value) -> Result<String, minijinja::Error>;
    fn template_exists(&self, name: &str) -> bool;
    fn get_template_path(&self, name: &str) -> Option<PathBuf>;
    fn list_templates(&self) -> Vec<String>;
    fn validate(&self) -> Vec<String>;
}

/// The only engine this build ships: minijinja with `site`/`config`
/// auto-injected into every context.
pub(crate) struct MinijinjaEngine {
    env: Environment<'static>,
    template_dirs: Vec<PathBuf>,
    site_value: Value,
    config_value: Value,
}

impl MinijinjaEngine {
    #[instrument(skip(config, manifest))]
    pub(crate) fn new(config: &Config, manifest: Option<&AssetManifest>) -> Self {
        let mut env = Environment::new();
        env.set_loader(path_loader(&config.site.template_dir));
        configure_environment(&mut env);
        if let Some(m) = manifest {
            env.add_global("_asset_manifest", Value::from_serialize(m));
        }

        Self {
            env,
            template_dirs: vec![PathBuf::from(&config.site.template_dir)],
            site_value: Value::from_serialize(&config.site),
            config_value: Value::from_serialize(config),
        }
    }

    fn site_value(&self) -> Value {
        self.site_value.clone()
    }

    fn config_value(&self) -> Value {
        self.config_value.clone()
    }
}

impl TemplateEngine for MinijinjaEngine {
    fn template_dirs(&self) -> &[PathBuf] {
        &self.template_dirs
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities::BLOCK_CACHING | EngineCapabilities::INTROSPECTION | EngineCapabilities::PIPELINE_OPERATORS
    }

    fn render_template(&self, name: &str, ctx: Value) -> Result<String, minijinja::Error> {
        let tmpl = self.env.get_template(name)?;
        tmpl.render(ctx)
    }

    fn render_string(&self, source: &str, ctx: Value) -> Result<String, minijinja::Error> {
        let tmpl = self.env.template_from_str(source)?;
        tmpl.render(ctx)
    }

    fn template_exists(&self, name: &str) -> bool {
        self.env.get_template(name).is_ok()
    }

    fn get_template_path(&self, name: &str) -> Option<PathBuf> {
        self.template_dirs.iter().map(|dir| dir.join(name)).find(|p| p.exists())
    }

    fn list_templates(&self) -> Vec<String> {
        let mut names: Vec<String> = self.env.templates().map(|(name, _)| name.to_string()).collect();
        names.sort();
        names.dedup();
        names
    }

    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for name in self.list_templates() {
            if let Err(e) = self.env.get_template(&name) {
                errors.push(format!("{name}: {e}"));
            }
        }
        errors
    }
}

/// Renders one page's content template with `content`/`meta`/`nav` bound,
/// matching the context shape the original `render_html` exposed plus the
/// nav overlay.
pub(crate) fn render_page(
    engine: &MinijinjaEngine,
    page: &Page,
    config: &Config,
    template_name: &str,
    nav: Option<&NavTreeContext>,
    nav_scaffold: Option<&str>,
) -> Result<String, minijinja::Error> {
    let page_ctx = page_context(page, config);
    let content = Value::from_safe_string(page_ctx.content.clone());
    let nav = nav.map(nav_value).unwrap_or(Value::UNDEFINED);
    let nav_scaffold = nav_scaffold.map(|html| Value::from_safe_string(html.to_string())).unwrap_or(Value::UNDEFINED);

    let ctx = context! {
        site => engine.site_value(),
        config => engine.config_value(),
        page => page_ctx,
        content,
        meta => &page.metadata,
        nav,
        nav_scaffold,
    };
    engine.render_template(template_name, ctx)
}

/// Flattens the active-trail-aware nav overlay into an owned, serializable
/// tree once per render — simpler than exposing `NavNodeProxy`'s borrowed
/// lifetime to the template engine.
#[derive(Debug, Clone, serde::Serialize)]
struct NavViewNode {
    title: String,
    path: String,
    is_section: bool,
    is_current: bool,
    is_in_trail: bool,
    is_expanded: bool,
    children: Vec<NavViewNode>,
}

fn nav_view(node: NavNodeProxy<'_>) -> NavViewNode {
    NavViewNode {
        title: node.title().to_string(),
        path: node.path().to_string(),
        is_section: node.is_section(),
        is_current: node.is_current(),
        is_in_trail: node.is_in_trail(),
        is_expanded: node.is_expanded(),
        children: node.children().into_iter().map(nav_view).collect(),
    }
}

#[derive(serde::Serialize)]
struct NavView {
    root: NavViewNode,
}

fn nav_value(ctx: &NavTreeContext) -> Value {
    Value::from_serialize(NavView { root: nav_view(ctx.root()) })
}

/// Renders a content-type or site index template over a set of pages/sections
///, sorted newest-first by date when present.
pub(crate) fn render_index(
    engine: &MinijinjaEngine,
    config: &Config,
    template_name: &str,
    pages: &[&Page],
    all_pages: &[&Page],
    section: Option<&Section>,
) -> Result<String, minijinja::Error> {
    fn date_of(p: &PageContext) -> &str {
        p.metadata.get("date").and_then(|v| v.as_str()).unwrap_or("")
    }

    let mut contents: Vec<PageContext> = pages.iter().map(|p| page_context(p, config)).collect();
    contents.sort_by(|a, b| date_of(b).cmp(date_of(a)));

    let mut all_contents: Vec<PageContext> = all_pages.iter().map(|p| page_context(p, config)).collect();
    all_contents.sort_by(|a, b| date_of(b).cmp(date_of(a)));

    let section = section.map(section_context).map(Value::from_serialize).unwrap_or(Value::UNDEFINED);

    let ctx = context! {
        site => engine.site_value(),
        config => engine.config_value(),
        contents,
        all_content => all_contents,
        section,
    };
    engine.render_template(template_name, ctx)
}

#[derive(serde::Serialize)]
struct SectionContext {
    name: String,
    path: String,
    metadata: crate::content::Metadata,
}

fn section_context(section: &Section) -> SectionContext {
    SectionContext { name: section.name.clone(), path: section.path.clone(), metadata: section.metadata.clone() }
}
