//! Text renderers: Markdown, HTML and JSON.
//!
//! Each is a pure pre-order walk of the chapter tree: a chapter whose policy includes it emits a
//! heading and its content, then its children follow in order. Rendering the same tree twice
//! yields identical output.

use crate::model::Chapter;
use reqwest::Url;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Output format selector for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Markdown,
    Json,
    Html,
    Epub,
    Mobi,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Markdown => "md",
            OutputFormat::Json => "json",
            OutputFormat::Html => "html",
            OutputFormat::Epub => "epub",
            OutputFormat::Mobi => "mobi",
        }
    }
}

/// Errors from the text writers.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("Failed to write output: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// One file of a split Markdown render, relative to the output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownFile {
    pub path: PathBuf,
    pub content: String,
}

#[derive(Serialize)]
struct JsonBook<'a> {
    name: &'a str,
    content: String,
}

pub(crate) fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Sanitize a title to a safe file stem: lowercase, runs of other characters become `-`.
pub fn sanitize_title(title: &str) -> String {
    let mut s = title
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect::<String>();
    // Collapse multiple dashes and trim
    while s.contains("--") {
        s = s.replace("--", "-");
    }
    s = s.trim_matches('-').to_string();
    if s.is_empty() {
        s = "book".to_string();
    }
    s
}

/// Directory name for a chapter: its URL's host, or `book` when there is none.
pub fn host_dir(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(String::from))
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "book".to_string())
}

/// Markdown for the whole tree. Titles are underlined with `=`; content goes through html2md.
pub fn render_markdown(chapter: &Chapter) -> String {
    let mut out = String::new();
    push_markdown(chapter, &mut out);
    out
}

fn push_markdown(chapter: &Chapter, out: &mut String) {
    if chapter.policy.include {
        out.push_str(&chapter.title);
        out.push('\n');
        out.push_str(&"=".repeat(chapter.title.chars().count()));
        out.push_str("\n\n");
        let md = html2md::parse_html(&chapter.content);
        let md = md.trim();
        if !md.is_empty() {
            out.push_str(md);
            out.push_str("\n\n");
        }
    }
    for child in &chapter.children {
        push_markdown(child, out);
    }
}

/// One Markdown file per first-level child, under a directory named after the child's host.
/// Deeper chapters are flattened into their first-level ancestor's file. A root without
/// children becomes a single file.
pub fn split_markdown(root: &Chapter) -> Vec<MarkdownFile> {
    let parts: Vec<&Chapter> = if root.children.is_empty() {
        vec![root]
    } else {
        root.children.iter().collect()
    };
    let mut taken: HashSet<PathBuf> = HashSet::new();
    parts
        .into_iter()
        .map(|part| {
            let dir = PathBuf::from(host_dir(&part.url));
            let stem = sanitize_title(&part.title);
            let mut path = dir.join(format!("{}.md", stem));
            let mut n = 2;
            while taken.contains(&path) {
                path = dir.join(format!("{}-{}.md", stem, n));
                n += 1;
            }
            taken.insert(path.clone());
            MarkdownFile {
                path,
                content: render_markdown(part),
            }
        })
        .collect()
}

/// Write each split file under `out_dir`, creating host directories as needed.
pub fn write_split_markdown(root: &Chapter, out_dir: &Path) -> Result<Vec<PathBuf>, FormatError> {
    let mut written = Vec::new();
    for file in split_markdown(root) {
        let path = out_dir.join(&file.path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| FormatError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        write_text(&path, &file.content)?;
        info!(path = %path.display(), "markdown saved");
        written.push(path);
    }
    Ok(written)
}

/// HTML document with one `<h1>` section per included chapter.
pub fn render_html(chapter: &Chapter) -> String {
    let mut body = String::new();
    push_html(chapter, &mut body);
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n  <meta charset=\"UTF-8\"/>\n  <title>{}</title>\n</head>\n<body>\n{}</body>\n</html>\n",
        html_escape(&chapter.title),
        body
    )
}

fn push_html(chapter: &Chapter, out: &mut String) {
    if chapter.policy.include {
        out.push_str(&format!("<h1>{}</h1>\n", html_escape(&chapter.title)));
        out.push_str(&chapter.content);
        out.push('\n');
    }
    for child in &chapter.children {
        push_html(child, out);
    }
}

/// `{"name": <root title>, "content": <markdown of the whole tree>}`.
pub fn render_json(chapter: &Chapter) -> Result<String, FormatError> {
    let book = JsonBook {
        name: &chapter.title,
        content: render_markdown(chapter),
    };
    Ok(serde_json::to_string(&book)?)
}

/// Write `contents` to `path`, replacing any existing file.
pub fn write_text(path: &Path, contents: &str) -> Result<(), FormatError> {
    std::fs::write(path, contents).map_err(|e| FormatError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}
