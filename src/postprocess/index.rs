// src/postprocess/index.rs
//!
//! JSON sidecars: the site-wide `index.json` (every page's metadata, for
//! downstream tooling and the search index), optional per-page JSON, and
//! the search index consumed by a theme's client-side search widget.

use serde::Serialize;
use serde_json::json;

use crate::config::Config;
use crate::content::{ContentGraph, Page};

use super::{page_url, sorted_by_date_desc};

#[derive(Serialize)]
struct SiteIndexEntry<'a> {
    path: &'a str,
    url: String,
    title: &'a str,
    tags: &'a [String],
    content_type: &'a str,
    date: Option<String>,
}

fn entry_for<'a>(config: &Config, page: &'a Page) -> SiteIndexEntry<'a> {
    SiteIndexEntry {
        path: &page._path,
        url: page_url(config, &page._path),
        title: page.metadata.get("title").and_then(|v| v.as_str()).unwrap_or(&page.content_type),
        tags: &page.tags,
        content_type: &page.content_type,
        date: page.metadata.get("date").and_then(|v| v.as_str()).map(str::to_string),
    }
}

/// Site-wide `index.json`: one entry per page, newest-dated first.
pub(crate) fn generate_site_index(config: &Config, graph: &ContentGraph) -> String {
    let pages = sorted_by_date_desc(graph.pages.values().filter(|p| !p.is_section_index));
    let entries: Vec<_> = pages.into_iter().map(|p| entry_for(config, p)).collect();
    serde_json::to_string_pretty(&entries).unwrap_or_else(|_| "[]".to_string())
}

/// Per-page JSON sidecar (spec `output_formats.per_page_json`): title, tags,
/// metadata and rendered HTML, written alongside the page's own HTML output.
pub(crate) fn generate_page_json(config: &Config, page: &Page) -> String {
    let body = json!({
        "path": page._path,
        "url": page_url(config, &page._path),
        "title": page.metadata.get("title").and_then(|v| v.as_str()).unwrap_or(&page.content_type),
        "tags": page.tags,
        "content_type": page.content_type,
        "metadata": page.metadata,
        "content": page.rendered_html.clone().unwrap_or_default(),
    });
    serde_json::to_string_pretty(&body).unwrap_or_else(|_| "{}".to_string())
}

#[derive(Serialize)]
struct SearchEntry<'a> {
    url: String,
    title: &'a str,
    excerpt: String,
}

/// Client-side search index: title plus a plain-text excerpt of each page's
/// rendered HTML (tags stripped), skipping section indexes.
pub(crate) fn generate_search_index(config: &Config, graph: &ContentGraph) -> String {
    let entries: Vec<_> = graph
        .pages
        .values()
        .filter(|p| !p.is_section_index)
        .map(|page| SearchEntry {
            url: page_url(config, &page._path),
            title: page.metadata.get("title").and_then(|v| v.as_str()).unwrap_or(&page.content_type),
            excerpt: strip_html(page.rendered_html.as_deref().unwrap_or("")).chars().take(500).collect(),
        })
        .collect();
    serde_json::to_string_pretty(&entries).unwrap_or_else(|_| "[]".to_string())
}

/// Plaintext `llm.txt` (spec `output_formats.llm_txt`): a flat, bot-friendly
/// digest of every page's title, URL and raw markdown body.
pub(crate) fn generate_llm_txt(config: &Config, graph: &ContentGraph) -> String {
    let mut out = format!("# {}\n\n{}\n\n", config.site.title, config.site.tagline);
    let pages = sorted_by_date_desc(graph.pages.values().filter(|p| !p.is_section_index));
    for page in pages {
        let title = page.metadata.get("title").and_then(|v| v.as_str()).unwrap_or(&page.content_type);
        out.push_str(&format!("## {title}\n{}\n\n{}\n\n", page_url(config, &page._path), page.raw_content));
    }
    out
}

fn strip_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Metadata;
    use std::path::PathBuf;

    fn config() -> Config {
        Config::from_str(
            r#"
[site]
title = "Test Site"
tagline = "Hello"
domain = "example.com"
output_dir = "out"
content_dir = "content"
template_dir = "templates"
static_dir = "static"
site_index_template = "index.html"
"#,
        )
        .unwrap()
    }

    fn sample_page(path: &str, title: &str, html: &str) -> Page {
        let mut metadata = Metadata::new();
        metadata.insert("title".into(), serde_json::Value::String(title.to_string()));
        Page {
            source_path: PathBuf::from(format!("content{path}.md")),
            metadata,
            raw_content: "body".to_string(),
            tags: vec!["rust".to_string()],
            version: None,
            section_path: "/".to_string(),
            content_type: "page".to_string(),
            weight: 0,
            output_path: PathBuf::from("out/index.html"),
            _path: path.to_string(),
            href: path.to_string(),
            rendered_html: Some(html.to_string()),
            is_section_index: false,
        }
    }

    #[test]
    fn site_index_lists_every_page() {
        let config = config();
        let mut graph = ContentGraph::default();
        let page = sample_page("/blog/post/", "Post", "<p>hi</p>");
        graph.pages.insert(page.source_path.clone(), page);

        let json = generate_site_index(&config, &graph);
        assert!(json.contains("\"title\": \"Post\""));
        assert!(json.contains("https://example.com/blog/post/"));
    }

    #[test]
    fn search_index_strips_html_tags_from_excerpt() {
        let config = config();
        let mut graph = ContentGraph::default();
        let page = sample_page("/blog/post/", "Post", "<p>Hello <b>world</b></p>");
        graph.pages.insert(page.source_path.clone(), page);

        let json = generate_search_index(&config, &graph);
        assert!(json.contains("Hello world"));
        assert!(!json.contains("<p>"));
    }

    #[test]
    fn llm_txt_includes_raw_markdown_body() {
        let config = config();
        let mut graph = ContentGraph::default();
        let page = sample_page("/blog/post/", "Post", "<p>hi</p>");
        graph.pages.insert(page.source_path.clone(), page);

        let txt = generate_llm_txt(&config, &graph);
        assert!(txt.contains("## Post"));
        assert!(txt.contains("body"));
    }
}
