// src/config.rs

use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::{collections::HashMap, fs};
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub(crate) struct Config {
    /// Site-wide settings.
    pub site: SiteConfig,

    /// Build engine behavior: incrementality, worker counts, ordering.
    #[serde(default)]
    pub build: BuildConfig,

    /// Versioned-docs support.
    #[serde(default)]
    pub versioning: VersioningConfig,

    /// Hover-preview behavior for cross-references (theme-facing only).
    #[serde(default)]
    pub link_previews: LinkPreviewsConfig,

    /// Per-page and site-wide output format selection.
    #[serde(default)]
    pub output_formats: OutputFormatsConfig,

    /// Per content-type rendering configuration, keyed by content type name.
    #[serde(default)]
    pub content: HashMap<String, ContentTypeConfig>,

    /// Custom variables accessible in templates.
    #[serde(default)]
    pub dynamic: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub(crate) struct SiteConfig {
    pub title: String,
    #[serde(default)]
    pub tagline: String,
    #[serde(default)]
    pub description: String,
    pub domain: String,
    #[serde(default)]
    pub author: String,
    /// URL prefix under which the site is served (`""`, `"/sub"`, or an absolute URL).
    /// Applied to every public `href`; never to an internal `_path`.
    #[serde(default)]
    pub baseurl: String,
    pub output_dir: String,
    pub content_dir: String,
    pub template_dir: String,
    pub static_dir: String,
    pub site_index_template: String,
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub syntax_highlighting_enabled: bool,
    #[serde(default = "default_highlight_theme")]
    pub syntax_highlighting_theme: String,
    #[serde(default)]
    pub allow_dangerous_html: bool,
    #[serde(default)]
    pub header_uri_fragment: bool,
    #[serde(default)]
    pub clean_urls: bool,
    #[serde(default = "default_true")]
    pub sitemap_enabled: bool,
    #[serde(default)]
    pub rss_enabled: bool,
    #[serde(default)]
    pub search_index_enabled: bool,
    #[serde(default)]
    pub asset_hashing_enabled: bool,
    #[serde(default)]
    pub asset_manifest_path: Option<String>,
    #[serde(default)]
    pub root_static: RootStaticConfig,
}

fn default_highlight_theme() -> String {
    crate::syntax::DEFAULT_THEME.to_string()
}

fn default_true() -> bool {
    true
}

/// Build engine behavior recognized under `[build]` in `bengal.toml`.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub(crate) struct BuildConfig {
    #[serde(default = "default_true")]
    pub incremental: bool,
    #[serde(default)]
    pub max_workers: Option<usize>,
    #[serde(default)]
    pub complexity_ordering: bool,
    #[serde(default = "default_true")]
    pub use_unified_change_detector: bool,
    #[serde(default)]
    pub shadow_mode: bool,
    #[serde(default = "default_true")]
    pub write_behind: bool,
    #[serde(default)]
    pub strict: bool,
    #[serde(default = "default_strict_threshold")]
    pub strict_render_error_threshold: usize,
}

fn default_strict_threshold() -> usize {
    0
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            incremental: true,
            max_workers: None,
            complexity_ordering: false,
            use_unified_change_detector: true,
            shadow_mode: false,
            write_behind: true,
            strict: false,
            strict_render_error_threshold: 0,
        }
    }
}

/// `[versioning]` — versioned documentation support.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub(crate) struct VersioningConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub versions: Vec<String>,
    /// Limits an incremental rebuild to this version plus shared (non-versioned) pages.
    #[serde(default)]
    pub version_scope: Option<String>,
}

/// `[link_previews]` — hover-preview behavior; consumed by themes, not the core engine.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub(crate) struct LinkPreviewsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_hover_delay")]
    pub hover_delay_ms: u64,
    #[serde(default = "default_hide_delay")]
    pub hide_delay_ms: u64,
    #[serde(default = "default_true")]
    pub show_tags: bool,
    #[serde(default = "default_true")]
    pub show_excerpt: bool,
    #[serde(default = "default_max_tags")]
    pub max_tags: usize,
    #[serde(default)]
    pub exclude_selectors: Vec<String>,
}

fn default_hover_delay() -> u64 {
    300
}
fn default_hide_delay() -> u64 {
    150
}
fn default_max_tags() -> usize {
    3
}

impl Default for LinkPreviewsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            hover_delay_ms: default_hover_delay(),
            hide_delay_ms: default_hide_delay(),
            show_tags: true,
            show_excerpt: true,
            max_tags: default_max_tags(),
            exclude_selectors: Vec::new(),
        }
    }
}

/// `[output_formats]` — which sidecar formats are emitted alongside HTML.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub(crate) struct OutputFormatsConfig {
    #[serde(default)]
    pub per_page_json: bool,
    #[serde(default)]
    pub llm_txt: bool,
}

#[derive(Error, Debug)]
pub(crate) enum ConfigError {
    #[error("IO error reading config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error in config file: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Config file not found: {0}")]
    FileNotFound(String),
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub(crate) struct ContentTypeConfig {
    pub index_template: String,
    pub content_template: String,
    #[serde(default)]
    pub url_pattern: Option<String>,
    /// Deprecated: `"date"` maps to `url_pattern = "{date}-{stem}"`.
    #[serde(default)]
    pub output_naming: Option<String>,
    /// `None` includes by default; `Some(false)` excludes from the RSS feed.
    #[serde(default)]
    pub rss_include: Option<bool>,
}

/// Output filename -> source path (relative to the static dir) for files
/// copied to the output root (favicon.ico, robots.txt, ...).
pub(crate) type RootStaticConfig = HashMap<String, String>;

impl Config {
    /// Parse a config from an already-loaded TOML string (used by tests and `--explain`).
    pub(crate) fn from_str(toml_str: &str) -> Result<Config, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Load and parse `bengal.toml` (or whatever path the caller names).
    #[instrument(fields(path = %path))]
    pub(crate) fn load_from_file(path: &str) -> Result<Config, ConfigError> {
        let config_content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                ConfigError::FileNotFound(path.to_string())
            } else {
                e.into()
            }
        })?;

        let config: Config = toml::from_str(&config_content)?;
        info!("config::load parsed {} bytes", config_content.len());
        Ok(config)
    }

    /// Apply `baseurl` to an internal `_path`, producing the public `href`.
    ///
    /// Never mutates `_path`.
    pub(crate) fn href_for(&self, internal_path: &str) -> String {
        if self.site.baseurl.is_empty() {
            internal_path.to_string()
        } else {
            format!(
                "{}{}",
                self.site.baseurl.trim_end_matches('/'),
                internal_path
            )
        }
    }
}
