// src/postprocess/mod.rs
//!
//! Phase 7 of the build orchestrator: everything derived from the
//! finished `ContentGraph` rather than rendered per-page — sitemap, RSS,
//! per-page/site JSON, and the search index. Each generator takes the graph
//! plus whatever pages survived the incremental filter and returns the
//! bytes to write; `build.rs` owns deciding which files actually get
//! written this run.

pub(crate) mod index;
pub(crate) mod rss;
pub(crate) mod sitemap;

use crate::config::Config;
use crate::content::Page;

/// Public URL a page or section index is reachable at, including `baseurl`.
pub(crate) fn page_url(config: &Config, path: &str) -> String {
    format!("https://{}{}", config.site.domain, config.href_for(path))
}

pub(crate) fn date_of(page: &Page) -> Option<time::OffsetDateTime> {
    let raw = page.metadata.get("date")?.as_str()?;
    time::OffsetDateTime::parse(raw, &time::format_description::well_known::Rfc3339).ok()
}

pub(crate) fn sorted_by_date_desc<'a>(pages: impl Iterator<Item = &'a Page>) -> Vec<&'a Page> {
    let mut pages: Vec<&Page> = pages.collect();
    pages.sort_by(|a, b| date_of(b).cmp(&date_of(a)));
    pages
}
