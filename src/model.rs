//! Chapter tree produced by the tree builder and consumed by every renderer.

use crate::policy::LevelPolicy;
use std::sync::Arc;

/// One node of the book: a fetched page (or the synthetic root) and its ordered children.
///
/// Built bottom-up by [TreeBuilder](crate::scraper::TreeBuilder); renderers only read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    /// Source URL. Empty for the synthetic root.
    pub url: String,
    /// URL the page was served from after redirects. Base for relative references.
    pub base_url: String,
    pub title: String,
    /// Author hint of the root page, shared by the whole tree.
    pub author: String,
    /// Extracted HTML fragment.
    pub content: String,
    /// Children in selection order.
    pub children: Vec<Chapter>,
    /// Policy of the level that produced this chapter.
    pub policy: Arc<LevelPolicy>,
}

impl Chapter {
    /// Synthetic root grouping several seeds. Contributes no content of its own.
    /// The first seed's author becomes the author of every seed's subtree.
    pub fn synthetic_root(children: Vec<Chapter>) -> Self {
        let title = children
            .first()
            .map(|c| c.title.clone())
            .unwrap_or_default();
        let author = children
            .first()
            .map(|c| c.author.clone())
            .unwrap_or_default();
        let mut root = Self {
            url: String::new(),
            base_url: String::new(),
            title,
            author: String::new(),
            content: String::new(),
            children,
            policy: Arc::new(LevelPolicy::no_include()),
        };
        root.set_author(&author);
        root
    }

    /// Placeholder for a page that could not be fetched: no content, no children.
    pub fn failed(url: &str, title: &str, author: &str, policy: Arc<LevelPolicy>) -> Self {
        Self {
            url: url.to_string(),
            base_url: url.to_string(),
            title: title.to_string(),
            author: author.to_string(),
            content: String::new(),
            children: Vec::new(),
            policy,
        }
    }

    /// Depth of the subtree below this chapter (leaf = 0).
    pub fn depth(&self) -> usize {
        self.children
            .iter()
            .map(|c| c.depth() + 1)
            .max()
            .unwrap_or(0)
    }

    /// Pre-order walk over this chapter and all descendants.
    pub fn walk(&self) -> Vec<&Chapter> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.walk());
        }
        out
    }

    /// Set title and author on the root, and author on every descendant.
    pub fn set_book_identity(&mut self, title: Option<&str>, author: Option<&str>) {
        if let Some(t) = title {
            self.title = t.to_string();
        }
        if let Some(a) = author {
            self.set_author(a);
        }
    }

    fn set_author(&mut self, author: &str) {
        self.author = author.to_string();
        for child in &mut self.children {
            child.set_author(author);
        }
    }
}
