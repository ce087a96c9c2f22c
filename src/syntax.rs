// src/syntax.rs
//!
//! Syntax highlighting for fenced code blocks in rendered Markdown.
//! `autumnus` does the actual tokenizing/styling; this module maps the
//! language fence (``` ```rust ```) to its `Language` variant and splices
//! the highlighted HTML back into the page in place of the plain
//! `<pre><code>` markdown produced.

use autumnus::formatter::Formatter;
use autumnus::languages::Language;
use autumnus::{themes, HtmlInlineBuilder};
use thiserror::Error;

#[derive(Error, Debug)]
pub(crate) enum SyntaxError {
    #[error("Failed to highlight code: {0}")]
    Highlight(String),

    #[error("Invalid theme '{0}': {1}")]
    InvalidTheme(String, String),

    #[error("I/O error during highlighting: {0}")]
    Io(#[from] std::io::Error),
}

fn map_lang_to_autumnus(lang: &str) -> Option<Language> {
    match lang.trim().to_lowercase().as_str() {
        "rust" => Some(Language::Rust),
        "python" | "py" => Some(Language::Python),
        "javascript" | "js" => Some(Language::JavaScript),
        "typescript" | "ts" => Some(Language::TypeScript),
        "html" => Some(Language::HTML),
        "css" => Some(Language::CSS),
        "bash" | "sh" | "shell" => Some(Language::Bash),
        "json" => Some(Language::JSON),
        "toml" => Some(Language::Toml),
        "yaml" | "yml" => Some(Language::YAML),
        "plaintext" | "text" | "txt" => Some(Language::PlainText),
        _ => None,
    }
}

/// Highlights one code block. Unrecognized/missing languages fall back to
/// plain text rather than failing the page render.
pub(crate) fn highlight_code_block(code: &str, lang: Option<&str>, theme_name: &str) -> Result<String, SyntaxError> {
    let theme = themes::get(theme_name).map_err(|e| SyntaxError::InvalidTheme(theme_name.to_string(), e.to_string()))?;
    let autumnus_lang = lang.and_then(map_lang_to_autumnus).unwrap_or(Language::PlainText);

    let formatter = HtmlInlineBuilder::new()
        .source(code)
        .lang(autumnus_lang)
        .theme(Some(theme))
        .pre_class(Some("code-block"))
        .build()
        .map_err(|e| SyntaxError::Highlight(e.to_string()))?;

    let mut output = Vec::new();
    formatter.format(&mut output).map_err(|e| SyntaxError::Highlight(e.to_string()))?;
    String::from_utf8(output).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e).into())
}

fn extract_language_from_class(class: &str) -> Option<&str> {
    class.split_whitespace().find(|c| c.starts_with("language-")).map(|c| &c[9..])
}

/// Finds each `<pre><code ...>...</code></pre>` block markdown rendering
/// produced and replaces it with `autumnus`-highlighted markup, preserving
/// everything around it untouched. A hand-rolled scan rather than an HTML
/// parser since the input shape is constrained to what the markdown
/// renderer emits.
pub(crate) fn highlight_html(html: &str, theme_name: &str) -> Result<String, SyntaxError> {
    if !html.contains("<pre><code") && !html.contains("<pre>\n<code") {
        return Ok(html.to_string());
    }

    let mut result = String::with_capacity(html.len() * 2);
    let mut remaining = html;

    while let Some(start_idx) = remaining.find("<pre><code") {
        result.push_str(&remaining[..start_idx]);

        let tag_end = remaining[start_idx..]
            .find('>')
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "Malformed HTML: missing '>' in <code> tag"))?
            + start_idx
            + 1;
        let opening_tag = &remaining[start_idx..tag_end];

        let lang = opening_tag.find("class=\"").and_then(|class_start| {
            let class_start = class_start + 7;
            let class_end = opening_tag[class_start..].find('"')?;
            extract_language_from_class(&opening_tag[class_start..class_start + class_end])
        });

        let code_end_pattern = "</code></pre>";
        let code_end = remaining[tag_end..]
            .find(code_end_pattern)
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "Malformed HTML: missing closing </code></pre>"))?;

        let code_content = &remaining[tag_end..tag_end + code_end];
        let block_end = tag_end + code_end + code_end_pattern.len();

        result.push_str(&highlight_code_block(code_content, lang, theme_name)?);
        remaining = &remaining[block_end..];
    }

    result.push_str(remaining);
    Ok(result)
}

pub(crate) const DEFAULT_THEME: &str = "github_dark";
