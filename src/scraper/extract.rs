//! Content extraction: the fragment to keep, the page metadata, and the candidate child links.
//!
//! Everything here is best-effort. Malformed markup is parsed as well as html5ever can; an
//! invalid selector or a selector that matches nothing yields no links rather than an error.

use super::Page;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

/// Containers tried in order for the primary content fragment.
const CONTENT_CONTAINERS: [&str; 3] = ["article", "main", "body"];

/// A candidate child: absolute URL plus the anchor text that pointed at it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub url: String,
    pub text: String,
}

/// Everything the tree builder needs from one page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    pub title: Option<String>,
    pub author: Option<String>,
    pub content: String,
    pub links: Vec<Link>,
}

/// Parse `page` once and pull metadata, content and the links matched by `selector`.
pub fn extract(page: &Page, selector: &str) -> Extracted {
    let doc = Html::parse_document(&page.markup);
    Extracted {
        title: title(&doc),
        author: author(&doc),
        content: content(&doc),
        links: links(&doc, selector, &page.url),
    }
}

/// Parse a CSS selector; `None` when it is empty or invalid.
fn parse_selector(sel: &str) -> Option<Selector> {
    let sel = sel.trim();
    if sel.is_empty() {
        return None;
    }
    match Selector::parse(sel) {
        Ok(s) => Some(s),
        Err(e) => {
            debug!(selector = sel, error = %e, "invalid selector, no children");
            None
        }
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<String>())
}

/// Primary content fragment: inner HTML of the first non-empty `article`, `main` or `body`.
/// Empty when the document has no content at all.
pub fn content(doc: &Html) -> String {
    for name in CONTENT_CONTAINERS {
        let Some(sel) = parse_selector(name) else {
            continue;
        };
        if let Some(el) = doc.select(&sel).next() {
            let inner = el.inner_html();
            if !inner.trim().is_empty() {
                return inner.trim().to_string();
            }
        }
    }
    String::new()
}

/// Page title: `<title>`, then `og:title`, then first `h1`.
pub fn title(doc: &Html) -> Option<String> {
    let from_title = parse_selector("title")
        .and_then(|s| doc.select(&s).next().map(element_text))
        .filter(|t| !t.is_empty());
    from_title
        .or_else(|| meta_content(doc, "meta[property=\"og:title\"]"))
        .or_else(|| {
            parse_selector("h1")
                .and_then(|s| doc.select(&s).next().map(element_text))
                .filter(|t| !t.is_empty())
        })
}

/// Author hint: `meta[name=author]`, then `article:author`.
pub fn author(doc: &Html) -> Option<String> {
    meta_content(doc, "meta[name=\"author\"]")
        .or_else(|| meta_content(doc, "meta[property=\"article:author\"]"))
}

fn meta_content(doc: &Html, selector: &str) -> Option<String> {
    let sel = parse_selector(selector)?;
    doc.select(&sel)
        .next()
        .and_then(|e| e.value().attr("content"))
        .map(collapse_whitespace)
        .filter(|s| !s.is_empty())
}

/// Links found by `selector`, in document order, resolved against `base_url`.
///
/// An anchor match contributes its own `href`; any other element contributes its first
/// descendant `a[href]`. Fragment-only, `javascript:` and `mailto:` targets are dropped.
pub fn links(doc: &Html, selector: &str, base_url: &str) -> Vec<Link> {
    let Some(sel) = parse_selector(selector) else {
        return Vec::new();
    };
    let Some(anchor_sel) = parse_selector("a[href]") else {
        return Vec::new();
    };
    let base = Url::parse(base_url).ok();
    doc.select(&sel)
        .filter_map(|el| {
            let anchor = if el.value().name() == "a" && el.value().attr("href").is_some() {
                el
            } else {
                el.select(&anchor_sel).next()?
            };
            let href = anchor.value().attr("href")?.trim();
            let url = resolve(base.as_ref(), href)?;
            Some(Link {
                url,
                text: element_text(anchor),
            })
        })
        .collect()
}

fn resolve(base: Option<&Url>, href: &str) -> Option<String> {
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let lower = href.to_ascii_lowercase();
    if lower.starts_with("javascript:") || lower.starts_with("mailto:") {
        return None;
    }
    match base {
        Some(b) => b.join(href).ok().map(|u| u.to_string()),
        None => Url::parse(href).ok().map(|u| u.to_string()),
    }
}
