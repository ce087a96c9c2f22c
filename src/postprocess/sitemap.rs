// src/postprocess/sitemap.rs
//!
//! Sitemap generation over the `Page`/`ContentGraph` model, covering every
//! content type instead of a single fixed one.

use time::macros::format_description;

use crate::config::Config;
use crate::content::ContentGraph;

use super::page_url;

pub(crate) fn generate_sitemap(config: &Config, graph: &ContentGraph) -> String {
    let mut xml = String::new();
    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push('\n');
    xml.push_str(r#"<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">"#);
    xml.push('\n');

    let mut pages = graph.pages.values().collect::<Vec<_>>();
    pages.sort_by(|a, b| a._path.cmp(&b._path));

    for page in pages {
        let lastmod = super::date_of(page);
        xml.push_str(&format_url_entry(&page_url(config, &page._path), lastmod));
    }

    xml.push_str("</urlset>\n");
    xml
}

fn format_url_entry(loc: &str, lastmod: Option<time::OffsetDateTime>) -> String {
    let mut entry = String::new();
    entry.push_str("  <url>\n");
    entry.push_str(&format!("    <loc>{loc}</loc>\n"));
    if let Some(date) = lastmod {
        const FORMAT: &[time::format_description::FormatItem<'static>] = format_description!("[year]-[month]-[day]");
        if let Ok(formatted) = date.format(&FORMAT) {
            entry.push_str(&format!("    <lastmod>{formatted}</lastmod>\n"));
        }
    }
    entry.push_str("  </url>\n");
    entry
}
