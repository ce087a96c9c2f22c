// src/utils.rs

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::Config;
use crate::content::Page;

/// Extracts the content type from a file path relative to the content directory.
///
/// The content type is the first directory component after stripping the
/// content directory prefix. Falls back to `"page"` when the file sits
/// directly in the content root or isn't under it at all.
#[rustfmt::skip]
pub(crate) fn get_content_type(file: &Path, content_dir: &str) -> String {
    file.strip_prefix(content_dir)
        .ok()
        .and_then(|rel_path| rel_path.components().next())
        .and_then(|comp| comp.as_os_str().to_str())
        .unwrap_or("page")
        .to_string()
}

/// Lists every static asset's path relative to `static_dir`, in the same
/// key shape `AssetManifest` uses (e.g. `"css/style.css"`), so dependency
/// tracking can fall back to a plain file listing when asset hashing is
/// disabled and no manifest exists.
pub(crate) fn list_static_asset_keys(static_dir: &str) -> Vec<String> {
    let root = Path::new(static_dir);
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.path().strip_prefix(root).ok().map(|p| p.to_string_lossy().replace('\\', "/")))
        .collect()
}

/// Recursively finds all markdown files (`.md`/`.markdown`) under `content_dir`.
pub(crate) fn find_markdown_files(content_dir: &str) -> Vec<PathBuf> {
    let mut markdown_files = Vec::new();

    for entry in WalkDir::new(content_dir).into_iter().filter_map(Result::ok) {
        let path = entry.path();
        if entry.file_type().is_file()
            && let Some(ext) = path.extension()
            && (ext == "md" || ext == "markdown")
        {
            markdown_files.push(path.to_path_buf());
        }
    }

    markdown_files
}

/// Looks up the content-template path configured for `content_type`,
/// falling back to `"default.html"` when unconfigured.
pub(crate) fn get_content_type_template(config: &Config, content_type: &str) -> String {
    config
        .content
        .get(content_type)
        .map(|ct| ct.content_template.as_str())
        .unwrap_or("default.html")
        .to_string()
}

/// Resolves the template a page renders with: an explicit `template` key
/// in its frontmatter wins, otherwise the content type's configured
/// template. Shared by the incremental filter (to hash against the same
/// template the page will actually render with) and the render scheduler.
pub(crate) fn template_name_of(config: &Config, page: &Page) -> String {
    page.metadata
        .get("template")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| get_content_type_template(config, &page.content_type))
}

/// Pulls every `{% include "name" %}` / `{% extends "name" %}` target out of
/// a template's raw source. A plain lexical scan rather than a real parse —
/// good enough to find dependency edges without pulling the template engine
/// into the incremental filter.
fn extract_template_refs(source: &str) -> Vec<String> {
    let mut refs = Vec::new();
    for keyword in ["extends", "include"] {
        let mut cursor = 0;
        while let Some(found) = source[cursor..].find(keyword) {
            let after_keyword = cursor + found + keyword.len();
            let Some(quote_start) = source[after_keyword..].find('"') else { break };
            let value_start = after_keyword + quote_start + 1;
            let Some(quote_end) = source[value_start..].find('"') else { break };
            refs.push(source[value_start..value_start + quote_end].to_string());
            cursor = value_start + quote_end;
        }
    }
    refs
}

/// Walks the `extends`/`include` chain starting at `template_name`, reading
/// each file once under `template_dir`. Returns the sorted set of
/// referenced template names plus a blake3 content hash per file visited
/// (including `template_name` itself), so editing any file in the chain —
/// not just renaming the top-level template — changes the result.
pub(crate) fn template_dependency_fingerprint(template_dir: &str, template_name: &str) -> (Vec<String>, Vec<String>) {
    let mut visited = std::collections::HashSet::new();
    let mut queue = vec![template_name.to_string()];
    let mut includes = Vec::new();
    let mut hashes = Vec::new();

    while let Some(name) = queue.pop() {
        if !visited.insert(name.clone()) {
            continue;
        }
        let Ok(source) = std::fs::read_to_string(Path::new(template_dir).join(&name)) else {
            continue;
        };
        hashes.push(blake3::hash(source.as_bytes()).to_hex().to_string());
        for reference in extract_template_refs(&source) {
            if reference != template_name {
                includes.push(reference.clone());
            }
            queue.push(reference);
        }
    }

    includes.sort();
    includes.dedup();
    hashes.sort();
    (includes, hashes)
}

/// Slugifies a heading's text content into an anchor id: lowercase,
/// non-alphanumeric runs collapsed to a single hyphen, trimmed.
fn heading_slug(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut last_was_hyphen = true; // suppress a leading hyphen
    for ch in text.chars().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() {
            slug.push(ch);
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            slug.push('-');
            last_was_hyphen = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        "section".to_string()
    } else {
        slug
    }
}

fn strip_tags(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len());
    let mut in_tag = false;
    for ch in fragment.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

/// Adds an `id` attribute plus a trailing `#` anchor link to every `<h1>`-`<h6>`
/// in `html`, deduplicating slugs that collide within the same document.
pub(crate) fn add_header_anchors(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;
    let mut seen: Vec<String> = Vec::new();

    loop {
        let Some(open_start) = rest.find("<h") else {
            out.push_str(rest);
            break;
        };
        let after_open = &rest[open_start + 2..];
        let Some(level_char) = after_open.chars().next() else {
            out.push_str(rest);
            break;
        };
        if !('1'..='6').contains(&level_char) {
            out.push_str(&rest[..open_start + 2]);
            rest = after_open;
            continue;
        }
        let Some(tag_end) = after_open.find('>') else {
            out.push_str(rest);
            break;
        };
        let close_tag = format!("</h{level_char}>");
        let Some(close_start) = after_open[tag_end..].find(&close_tag) else {
            out.push_str(rest);
            break;
        };
        let inner_start = tag_end + 1;
        let inner_end = tag_end + close_start;
        let inner = &after_open[inner_start..inner_end];

        let mut slug = heading_slug(&strip_tags(inner));
        let mut suffix = 1;
        let base = slug.clone();
        while seen.contains(&slug) {
            suffix += 1;
            slug = format!("{base}-{suffix}");
        }
        seen.push(slug.clone());

        out.push_str(&rest[..open_start]);
        out.push_str(&format!(
            "<h{level_char} id=\"{slug}\">{inner}<a class=\"header-anchor\" href=\"#{slug}\">#</a>{close_tag}"
        ));
        rest = &after_open[inner_end + close_tag.len()..];
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs::{self, File};
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn create_test_config() -> Config {
        let mut content_types = HashMap::new();
        content_types.insert(
            "projects".to_string(),
            crate::config::ContentTypeConfig {
                content_template: "project.html".to_string(),
                index_template: "projects_index.html".to_string(),
                url_pattern: None,
                output_naming: Some("default".to_string()),
                rss_include: None,
            },
        );

        let toml_str = r#"
[site]
title = "Test Site"
domain = "test.com"
output_dir = "out"
content_dir = "src/content"
template_dir = "templates"
static_dir = "static"
site_index_template = "site_index.html"
"#;
        let mut config = Config::from_str(toml_str).unwrap();
        config.content = content_types;
        config
    }

    #[test]
    fn test_get_content_type_extracts_directory() {
        let input = PathBuf::from("src/content/projects/local-rs.md");
        assert_eq!(get_content_type(&input, "src/content"), "projects");
    }

    #[test]
    fn test_get_content_type_falls_back_to_page() {
        let input = PathBuf::from("different/path/file.md");
        assert_eq!(get_content_type(&input, "src/content"), "page");
    }

    #[test]
    fn test_get_content_type_template_returns_configured_template() {
        let config = create_test_config();
        assert_eq!(get_content_type_template(&config, "projects"), "project.html");
    }

    #[test]
    fn test_get_content_type_template_falls_back_to_default() {
        let config = create_test_config();
        assert_eq!(get_content_type_template(&config, "unknown"), "default.html");
    }

    #[test]
    fn test_find_markdown_files() {
        let temp_dir = tempdir().unwrap();
        let content_dir = temp_dir.path();

        fs::create_dir(content_dir.join("blog")).unwrap();
        File::create(content_dir.join("index.md")).unwrap().write_all(b"# Index").unwrap();
        File::create(content_dir.join("blog/post1.md")).unwrap().write_all(b"# Post 1").unwrap();
        File::create(content_dir.join("style.css")).unwrap().write_all(b"body {}").unwrap();

        let result = find_markdown_files(content_dir.to_str().unwrap());
        assert_eq!(result.len(), 2);
        assert!(!result.iter().any(|p| p.ends_with("style.css")));
    }

    #[test]
    fn test_add_header_anchors_adds_ids_and_links() {
        let html = "<h2>Getting Started</h2><p>text</p><h3>Getting Started</h3>";
        let out = add_header_anchors(html);
        assert!(out.contains("id=\"getting-started\""));
        assert!(out.contains("id=\"getting-started-2\""));
        assert!(out.contains("href=\"#getting-started\""));
    }

    #[test]
    fn test_add_header_anchors_leaves_plain_html_untouched() {
        let html = "<p>No headings here.</p>";
        assert_eq!(add_header_anchors(html), html);
    }

    #[test]
    fn template_dependency_fingerprint_follows_extends_and_include() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("base.html"), "<body>{% block content %}{% endblock %}</body>").unwrap();
        fs::write(dir.path().join("nav.html"), "<nav></nav>").unwrap();
        fs::write(
            dir.path().join("page.html"),
            "{% extends \"base.html\" %}{% include \"nav.html\" %}",
        )
        .unwrap();

        let (includes, hashes) = template_dependency_fingerprint(dir.path().to_str().unwrap(), "page.html");
        assert_eq!(includes, vec!["base.html".to_string(), "nav.html".to_string()]);
        assert_eq!(hashes.len(), 3);
    }

    #[test]
    fn template_dependency_fingerprint_changes_when_an_include_body_changes() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("nav.html"), "<nav></nav>").unwrap();
        fs::write(dir.path().join("page.html"), "{% include \"nav.html\" %}").unwrap();

        let (_, before) = template_dependency_fingerprint(dir.path().to_str().unwrap(), "page.html");

        fs::write(dir.path().join("nav.html"), "<nav class=\"v2\"></nav>").unwrap();
        let (_, after) = template_dependency_fingerprint(dir.path().to_str().unwrap(), "page.html");

        assert_ne!(before, after);
    }

    #[test]
    fn list_static_asset_keys_returns_paths_relative_to_static_dir() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("css")).unwrap();
        fs::write(dir.path().join("css/style.css"), "body {}").unwrap();
        fs::write(dir.path().join("favicon.ico"), "x").unwrap();

        let mut keys = list_static_asset_keys(dir.path().to_str().unwrap());
        keys.sort();
        assert_eq!(keys, vec!["css/style.css".to_string(), "favicon.ico".to_string()]);
    }

    #[test]
    fn template_dependency_fingerprint_tolerates_a_missing_template_dir() {
        let (includes, hashes) = template_dependency_fingerprint("does-not-exist", "page.html");
        assert!(includes.is_empty());
        assert!(hashes.is_empty());
    }
}
