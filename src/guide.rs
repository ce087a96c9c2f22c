// src/guide.rs

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prints the bengal guide to stdout.
pub(crate) fn print_guide() {
    print!(
        r####"# Bengal Guide

Bengal is a static site generator that builds a content graph from markdown
files (each with an optional `.meta.toml` frontmatter sidecar), renders it
through Jinja-style templates, and writes HTML, feeds and JSON sidecars to
an output directory — incrementally, when the previous build's cache is
still valid.

## Quick Start

```bash
bengal build              # Build the site
bengal build -c prod.toml # Build with a custom config
bengal watch              # Watch and rebuild on changes (macOS)
bengal flame              # Build with profiling, output flamechart.svg
bengal guide              # Show this guide
```

## Project Structure

```
my-site/
├── bengal.toml          # Site configuration
├── content/             # Markdown content files, organized by section
│   ├── blog/
│   │   ├── _index.md    # Section index (title, description, cascade)
│   │   └── hello.md     # Inline frontmatter or hello.meta.toml sidecar
│   └── pages/
│       └── about.md
├── templates/           # Jinja-style templates
│   ├── default.html
│   ├── post.html
│   └── index.html
├── static/              # Static assets (CSS, images, fonts)
└── output/              # Generated site (created by build)
    └── .bengal/         # Build cache + provenance (safe to delete)
```

## Configuration (bengal.toml)

```toml
[site]
title = "My Website"
tagline = "A personal blog"
domain = "example.com"
author = "Your Name"
content_dir = "content"
output_dir = "output"
template_dir = "templates"
static_dir = "static"
site_index_template = "index.html"

syntax_highlighting_enabled = true
syntax_highlighting_theme = "github_dark"
sitemap_enabled = true
rss_enabled = true
search_index_enabled = false
allow_dangerous_html = false
header_uri_fragment = false
clean_urls = false
asset_hashing_enabled = false

[site.root_static]
"favicon.ico" = "favicon.ico"
"robots.txt" = "robots.txt"

[build]
incremental = true                   # Skip unchanged pages on rebuild
max_workers = 0                      # 0 = auto-detect
complexity_ordering = false          # Schedule larger pages first
strict = false                       # Fail the build on render errors
strict_render_error_threshold = 0    # Errors allowed before strict mode fails

[versioning]
enabled = false
versions = []

[output_formats]
per_page_json = false                # Write a .json sidecar next to each page
llm_txt = false                      # Write a flat llm.txt digest

[content.blog]
index_template = "blog_index.html"
content_template = "post.html"
url_pattern = "{{date}}-{{stem}}"
rss_include = true

[content.pages]
index_template = "pages_index.html"
content_template = "page.html"
rss_include = false

[dynamic]
github_url = "https://github.com/user"
```

## Content

A page is any markdown file under `content_dir`; an `_index.md` in a
directory makes that directory a section with its own metadata, which
cascades to every page beneath it unless a page sets its own value for the
same key. Frontmatter lives in a sidecar `<name>.meta.toml` file next to
the markdown file:

```toml
title = "Hello World"
date = "2024-01-15T10:00:00+00:00"
author = "Your Name"
tags = ["intro", "blog"]
template = "custom.html"
weight = 10
```

## Templates (Minijinja)

- `page.title`, `page.content`, `page.excerpt`, `page.tags`, `page.href` —
  the current page.
- `meta.*` — the page's raw frontmatter.
- `nav` — the flattened navigation tree, with `is_current`/`is_in_trail`
  helpers for building menus.
- `contents`, `all_content`, `section` — available on index templates.
- Filters: `| safe`, `| url`, `| datetimeformat(...)`, `| asset_hash`.

## Incremental Builds

Every build hashes each page's content, frontmatter, template and template
includes into a provenance fingerprint stored in
`output/.bengal/provenance.json`. Unchanged pages are skipped entirely;
changing `bengal.toml` itself, or deleting the output directory, forces a
full rebuild. Delete `output/.bengal/` to force one manually.

## Flamechart Profiling

```bash
bengal flame                # Output: flamechart.svg
bengal flame --fold         # Also keep the raw folded stacks
bengal flame --time         # Also emit a Chrome DevTools trace
bengal flame -o build       # Custom output basename
```

---
Generated by bengal {version}
"####,
        version = VERSION
    );
}
