//! Fill an [EpubBuilder] from a chapter tree, embedding every referenced image.

use super::{EpubBuilder, EpubError};
use crate::formats::html_escape;
use crate::model::Chapter;
use crate::scraper::{Fetcher, Resource};
use reqwest::Url;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Simultaneous image downloads per chapter. Registration stays sequential.
const IMAGE_FETCH_WIDTH: usize = 4;

/// One `<img>` found in a chapter's content.
struct ImageRef {
    /// `src` exactly as written (decoded).
    raw: String,
    /// Absolute address with query and fragment removed; `None` when it cannot be fetched.
    address: Option<String>,
    alt: String,
}

/// Owns the package (and with it the image registry) for a single rendering pass.
pub struct EpubRenderer<'a, F: Fetcher + ?Sized> {
    fetcher: &'a F,
    package: EpubBuilder,
    /// Addresses whose download already failed; not retried within this pass.
    failed: HashSet<String>,
}

impl<'a, F: Fetcher + ?Sized> EpubRenderer<'a, F> {
    pub fn new(fetcher: &'a F, package: EpubBuilder) -> Self {
        Self {
            fetcher,
            package,
            failed: HashSet::new(),
        }
    }

    /// Append the table of contents (more than one top-level child) and one section per
    /// included chapter, in pre-order. Returns the filled package, ready to write.
    pub fn render(mut self, root: &Chapter) -> EpubBuilder {
        if root.children.len() > 1 {
            self.append_toc(root);
        }
        for chapter in root.walk() {
            if chapter.policy.include {
                self.append_chapter(chapter);
            }
        }
        debug!(
            sections = self.package.sections().len(),
            images = self.package.image_count(),
            "epub rendered"
        );
        self.package
    }

    fn append_toc(&mut self, root: &Chapter) {
        let mut html = String::from("<h1>Table of Contents</h1>\n<ol>\n");
        for child in &root.children {
            html.push_str(&format!("  <li>{}</li>\n", html_escape(&child.title)));
        }
        html.push_str("</ol>");
        self.package.add_section(&html, Some("Table of Contents"));
    }

    fn append_chapter(&mut self, chapter: &Chapter) {
        let images = find_images(&chapter.content, &chapter.base_url);
        self.register_images(&images);

        if chapter.policy.images_only {
            let html: String = images
                .iter()
                .map(|img| {
                    let src = self.local_or_raw(img);
                    format!(
                        "<img src=\"{}\" alt=\"{}\"/>\n",
                        html_escape(&src),
                        html_escape(&img.alt)
                    )
                })
                .collect();
            self.package.add_section(&html, None);
            return;
        }

        let mut content = chapter.content.clone();
        for img in &images {
            if let Some(local) = img
                .address
                .as_deref()
                .and_then(|a| self.package.image_path(a))
            {
                content = replace_src(&content, &img.raw, local);
            }
        }
        let html = format!("<h1>{}</h1>\n{}", html_escape(&chapter.title), content);
        self.package.add_section(&html, Some(&chapter.title));
    }

    /// Download the chapter's new addresses in parallel, then register them one at a time in
    /// document order.
    fn register_images(&mut self, images: &[ImageRef]) {
        let mut pending: Vec<&str> = Vec::new();
        for addr in images.iter().filter_map(|i| i.address.as_deref()) {
            if self.package.image_path(addr).is_none()
                && !self.failed.contains(addr)
                && !pending.contains(&addr)
            {
                pending.push(addr);
            }
        }
        if pending.is_empty() {
            return;
        }

        let slots: Vec<OnceLock<Option<Resource>>> =
            pending.iter().map(|_| OnceLock::new()).collect();
        let next = AtomicUsize::new(0);
        let fetcher = self.fetcher;
        let workers = IMAGE_FETCH_WIDTH.min(pending.len());
        std::thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| loop {
                    let i = next.fetch_add(1, Ordering::SeqCst);
                    let Some(addr) = pending.get(i) else { break };
                    let fetched = match fetcher.fetch_bytes(addr) {
                        Ok(resource) => Some(resource),
                        Err(e) => {
                            warn!(url = %addr, error = %e, "image fetch failed; left unresolved");
                            None
                        }
                    };
                    let _ = slots[i].set(fetched);
                });
            }
        });

        for (addr, slot) in pending.into_iter().zip(slots) {
            match slot.into_inner().flatten() {
                Some(resource) => {
                    let local = self.package.add_image(
                        addr,
                        resource.bytes,
                        resource.content_type.as_deref(),
                    );
                    debug!(url = %addr, path = %local, "image embedded");
                }
                None => {
                    self.failed.insert(addr.to_string());
                }
            }
        }
    }

    fn local_or_raw(&self, img: &ImageRef) -> String {
        img.address
            .as_deref()
            .and_then(|a| self.package.image_path(a))
            .map(String::from)
            .unwrap_or_else(|| img.raw.clone())
    }
}

/// Package for `root` with its metadata taken from the root chapter.
pub fn render_epub<F: Fetcher + ?Sized>(root: &Chapter, fetcher: &F, ncx: bool) -> EpubBuilder {
    let package = EpubBuilder::new(&root.title, &root.author)
        .identifier(first_url(root))
        .include_ncx(ncx);
    EpubRenderer::new(fetcher, package).render(root)
}

/// Render `root` as an EPUB at `path`, embedding images through `fetcher`.
pub fn write_epub<F: Fetcher + ?Sized>(
    root: &Chapter,
    fetcher: &F,
    path: &Path,
    ncx: bool,
) -> Result<(), EpubError> {
    render_epub(root, fetcher, ncx).write(path)?;
    info!(path = %path.display(), "epub saved");
    Ok(())
}

fn first_url(root: &Chapter) -> &str {
    root.walk()
        .into_iter()
        .map(|c| c.url.as_str())
        .find(|u| !u.is_empty())
        .unwrap_or("")
}

fn find_images(content: &str, base_url: &str) -> Vec<ImageRef> {
    let Ok(selector) = Selector::parse("img[src]") else {
        return Vec::new();
    };
    let fragment = Html::parse_fragment(content);
    let base = Url::parse(base_url).ok();
    fragment
        .select(&selector)
        .filter_map(|el| {
            let raw = el.value().attr("src")?.trim();
            if raw.is_empty() {
                return None;
            }
            Some(ImageRef {
                raw: raw.to_string(),
                address: image_address(base.as_ref(), raw),
                alt: el.value().attr("alt").unwrap_or("").to_string(),
            })
        })
        .collect()
}

/// Absolute address without query or fragment. Inline `data:` images need no fetch.
fn image_address(base: Option<&Url>, src: &str) -> Option<String> {
    if src.starts_with("data:") {
        return None;
    }
    let mut url = match base {
        Some(base) => base.join(src).ok()?,
        None => Url::parse(src).ok()?,
    };
    url.set_query(None);
    url.set_fragment(None);
    Some(url.to_string())
}

/// Point every `src` attribute holding `raw` at `local`. Handles both the decoded value and
/// its serialized (entity-escaped) form, in either quote style.
fn replace_src(content: &str, raw: &str, local: &str) -> String {
    let serialized = raw
        .replace('&', "&amp;")
        .replace('\u{a0}', "&nbsp;")
        .replace('"', "&quot;");
    let target = format!("src=\"{}\"", local);
    let mut out = content.to_string();
    for candidate in [serialized.as_str(), raw] {
        for quote in ['"', '\''] {
            let needle = format!("src={q}{c}{q}", q = quote, c = candidate);
            if out.contains(&needle) {
                out = out.replace(&needle, &target);
            }
        }
    }
    out
}
