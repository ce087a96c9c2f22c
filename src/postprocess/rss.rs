// src/postprocess/rss.rs
//!
//! RSS 2.0 feed generation over the `Page`/`ContentGraph` model, covering
//! every content type instead of a single fixed one.

use crate::config::Config;
use crate::content::{get_excerpt_html, ContentGraph, Page};

use super::{page_url, sorted_by_date_desc};

fn should_include(config: &Config, content_type: &str) -> bool {
    config.content.get(content_type).map(|ct| ct.rss_include.unwrap_or(true)).unwrap_or(true)
}

pub(crate) fn generate_rss(config: &Config, graph: &ContentGraph) -> String {
    let mut xml = String::new();
    let base_url = format!("https://{}", config.site.domain);

    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push('\n');
    xml.push_str(r#"<rss version="2.0" xmlns:atom="http://www.w3.org/2005/Atom">"#);
    xml.push('\n');
    xml.push_str("  <channel>\n");
    xml.push_str(&format!("    <title>{}</title>\n", xml_escape(&config.site.title)));
    xml.push_str(&format!("    <link>{base_url}</link>\n"));
    xml.push_str(&format!("    <description>{}</description>\n", xml_escape(&config.site.tagline)));
    xml.push_str("    <language>en</language>\n");
    xml.push_str(&format!("    <managingEditor>{}</managingEditor>\n", xml_escape(&config.site.author)));
    xml.push_str(&format!(
        "    <atom:link href=\"{base_url}/feed.xml\" rel=\"self\" type=\"application/rss+xml\"/>\n"
    ));

    let eligible = graph.pages.values().filter(|p| !p.is_section_index && should_include(config, &p.content_type));
    for page in sorted_by_date_desc(eligible) {
        xml.push_str(&format_item(config, page));
    }

    xml.push_str("  </channel>\n");
    xml.push_str("</rss>\n");
    xml
}

fn format_item(config: &Config, page: &Page) -> String {
    let mut item = String::new();
    item.push_str("    <item>\n");

    let title = page.metadata.get("title").and_then(|v| v.as_str()).unwrap_or(&page.content_type);
    item.push_str(&format!("      <title>{}</title>\n", xml_escape(title)));

    let url = page_url(config, &page._path);
    item.push_str(&format!("      <link>{url}</link>\n"));
    item.push_str(&format!("      <guid>{url}</guid>\n"));

    let excerpt = get_excerpt_html(&page.raw_content, "## Context", config.site.allow_dangerous_html);
    if !excerpt.is_empty() {
        item.push_str(&format!("      <description>{}</description>\n", xml_escape(&excerpt)));
    }

    if let Some(author) = page.metadata.get("author").and_then(|v| v.as_str()) {
        item.push_str(&format!("      <author>{}</author>\n", xml_escape(author)));
    }

    if let Some(date) = super::date_of(page) {
        item.push_str(&format!("      <pubDate>{}</pubDate>\n", format_rfc2822(date)));
    }

    item.push_str("    </item>\n");
    item
}

fn format_rfc2822(date: time::OffsetDateTime) -> String {
    date.format(&time::format_description::well_known::Rfc2822).unwrap_or_default()
}

fn xml_escape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' => result.push_str("&quot;"),
            '\'' => result.push_str("&apos;"),
            _ => result.push(c),
        }
    }
    result
}
