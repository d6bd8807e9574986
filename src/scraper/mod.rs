//! Acquisition: fetch pages and build the chapter tree under the level policies.

mod client;
mod error;
pub mod extract;

#[cfg(test)]
pub(crate) mod fake;

pub use client::{PoliteClient, PoliteClientBuilder};
pub use error::FetchError;
pub use extract::Link;

use crate::model::Chapter;
use crate::policy::{LevelPolicies, LevelPolicy, Schedule};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// Raw markup of one page and the URL it was served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub url: String,
    pub markup: String,
}

/// Binary resource (image) and its declared media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Source of pages and resources. No caching or retry contract; that belongs to the
/// implementation. `Sync` so one fetcher can serve a bounded-parallel sibling group.
pub trait Fetcher: Sync {
    fn fetch_page(&self, url: &str) -> Result<Page, FetchError>;
    fn fetch_bytes(&self, url: &str) -> Result<Resource, FetchError>;
}

/// Progress callback invoked once per page fetch attempt with the page URL.
pub type Progress<'a> = &'a (dyn Fn(&str) + Sync);

/// Recursive builder of the chapter tree.
///
/// Each call receives its depth's policy by reference and returns an owned subtree. Children
/// are always attached in selection order, whatever order their fetches complete in.
pub struct TreeBuilder<'a, F: Fetcher + ?Sized> {
    fetcher: &'a F,
    policies: &'a LevelPolicies,
    progress: Option<Progress<'a>>,
}

impl<'a, F: Fetcher + ?Sized> TreeBuilder<'a, F> {
    pub fn new(fetcher: &'a F, policies: &'a LevelPolicies) -> Self {
        Self {
            fetcher,
            policies,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Progress<'a>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Build every seed at depth 0. A single seed is the root itself; several seeds are grouped
    /// under a synthetic root so the tree always has one root.
    pub fn build_book(&self, seeds: &[String]) -> Chapter {
        let mut roots: Vec<Chapter> = seeds.iter().map(|u| self.build(u, 0, None)).collect();
        if roots.len() == 1 {
            if let Some(root) = roots.pop() {
                return root;
            }
        }
        Chapter::synthetic_root(roots)
    }

    /// Build the subtree rooted at `url`. `link_text` is the anchor text of the parent link.
    pub fn build(&self, url: &str, depth: usize, link_text: Option<&str>) -> Chapter {
        self.build_node(url, depth, link_text, None)
    }

    /// Fetch the root page only and return the first-level children the root policy selects.
    pub fn list_children(&self, url: &str) -> Result<Vec<Link>, FetchError> {
        let policy = self.policies.level(0);
        let page = self.fetcher.fetch_page(url)?;
        let extracted = extract::extract(&page, &policy.selector);
        Ok(policy.select(extracted.links))
    }

    fn build_node(
        &self,
        url: &str,
        depth: usize,
        link_text: Option<&str>,
        inherited_author: Option<&str>,
    ) -> Chapter {
        let policy = self.policies.level(depth);
        let link_title = link_text
            .filter(|t| policy.use_link_name && !t.trim().is_empty())
            .map(str::trim);

        let fetched = self.fetcher.fetch_page(url);
        if let Some(progress) = self.progress {
            progress(url);
        }
        let page = match fetched {
            Ok(p) => p,
            Err(e) => {
                warn!(url, depth, error = %e, "fetch failed; branch left empty");
                let title = link_title
                    .or(link_text.map(str::trim).filter(|t| !t.is_empty()))
                    .unwrap_or(url);
                return Chapter::failed(
                    url,
                    title,
                    inherited_author.unwrap_or_default(),
                    Arc::clone(policy),
                );
            }
        };

        let deepest = self.policies.is_deepest(depth);
        // Depth is a hard ceiling: the deepest level never looks for children.
        let selector = if deepest { "" } else { policy.selector.as_str() };
        let extracted = extract::extract(&page, selector);

        let title = link_title
            .map(String::from)
            .or(extracted.title)
            .unwrap_or_else(|| url.to_string());
        let author = match inherited_author {
            Some(a) => a.to_string(),
            None => extracted.author.unwrap_or_default(),
        };

        let children = if deepest {
            Vec::new()
        } else {
            let selected = policy.select(extracted.links);
            debug!(url, depth, count = selected.len(), "children selected");
            self.build_children(&selected, depth + 1, &author, policy)
        };

        Chapter {
            url: url.to_string(),
            base_url: page.url,
            title,
            author,
            content: extracted.content,
            children,
            policy: Arc::clone(policy),
        }
    }

    fn build_children(
        &self,
        links: &[Link],
        depth: usize,
        author: &str,
        parent_policy: &LevelPolicy,
    ) -> Vec<Chapter> {
        match parent_policy.schedule() {
            Schedule::Sequential => links
                .iter()
                .map(|l| self.build_node(&l.url, depth, Some(&l.text), Some(author)))
                .collect(),
            Schedule::Delayed(pause) => links
                .iter()
                .enumerate()
                .map(|(i, l)| {
                    if i > 0 {
                        std::thread::sleep(pause);
                    }
                    self.build_node(&l.url, depth, Some(&l.text), Some(author))
                })
                .collect(),
            Schedule::Parallel(width) => self.build_parallel(links, depth, author, width),
        }
    }

    /// Bounded pool: `width` workers pull the next selection index and fill that slot.
    fn build_parallel(
        &self,
        links: &[Link],
        depth: usize,
        author: &str,
        width: usize,
    ) -> Vec<Chapter> {
        let slots: Vec<OnceLock<Chapter>> = links.iter().map(|_| OnceLock::new()).collect();
        let next = AtomicUsize::new(0);
        let workers = width.min(links.len());
        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let i = next.fetch_add(1, Ordering::SeqCst);
                    let Some(link) = links.get(i) else {
                        break;
                    };
                    let chapter = self.build_node(&link.url, depth, Some(&link.text), Some(author));
                    let _ = slots[i].set(chapter);
                });
            }
        });
        let policy = self.policies.level(depth);
        slots
            .into_iter()
            .zip(links)
            .map(|(slot, link)| {
                slot.into_inner().unwrap_or_else(|| {
                    Chapter::failed(&link.url, &link.text, author, Arc::clone(policy))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeWeb;
    use super::*;
    use std::time::{Duration, Instant};

    fn toc_page(title: &str, links: &[&str]) -> String {
        let items: String = links
            .iter()
            .map(|l| format!(r#"<li><a class="toc" href="{l}">Link {l}</a></li>"#))
            .collect();
        format!(
            "<html><head><title>{title}</title><meta name=\"author\" content=\"Root Author\"></head>\
             <body><p>{title} body</p><ul>{items}</ul></body></html>"
        )
    }

    fn leaf_page(title: &str) -> String {
        format!(
            "<html><head><title>{title}</title><meta name=\"author\" content=\"Other\"></head>\
             <body><p>{title} body</p></body></html>"
        )
    }

    fn two_levels(root: LevelPolicy) -> LevelPolicies {
        LevelPolicies::new(vec![root, LevelPolicy::default()]).unwrap()
    }

    fn web_with_children(n: usize) -> FakeWeb {
        let links: Vec<String> = (0..n).map(|i| format!("/c{i}")).collect();
        let refs: Vec<&str> = links.iter().map(String::as_str).collect();
        let mut web = FakeWeb::new().page("https://site.test/", &toc_page("Root", &refs));
        for i in 0..n {
            web = web.page(
                &format!("https://site.test/c{i}"),
                &leaf_page(&format!("Child {i}")),
            );
        }
        web
    }

    fn titles(c: &Chapter) -> Vec<String> {
        c.children.iter().map(|c| c.title.clone()).collect()
    }

    #[test]
    fn offset_then_limit_selects_middle_links() {
        let web = web_with_children(4);
        let policies = two_levels(LevelPolicy {
            selector: "a.toc".into(),
            offset: 1,
            limit: 2,
            include: false,
            ..LevelPolicy::default()
        });
        let root = TreeBuilder::new(&web, &policies).build("https://site.test/", 0, None);
        assert_eq!(titles(&root), vec!["Child 1", "Child 2"]);
        assert!(!root.policy.include);
        assert!(root.children.iter().all(|c| c.policy.include));
        assert_eq!(web.fetch_count(), 3);
    }

    #[test]
    fn reverse_applies_after_offset() {
        let web = web_with_children(4);
        let policies = two_levels(LevelPolicy {
            selector: "a.toc".into(),
            offset: 1,
            reverse: true,
            ..LevelPolicy::default()
        });
        let root = TreeBuilder::new(&web, &policies).build("https://site.test/", 0, None);
        assert_eq!(titles(&root), vec!["Child 3", "Child 2", "Child 1"]);
    }

    #[test]
    fn deepest_level_never_has_children() {
        let web = web_with_children(3).page(
            "https://site.test/c0",
            &toc_page("Child 0", &["/g0", "/g1", "/g2"]),
        );
        let policies = LevelPolicies::new(vec![
            LevelPolicy {
                selector: "a.toc".into(),
                limit: 1,
                ..LevelPolicy::default()
            },
            LevelPolicy {
                selector: "a.toc".into(),
                ..LevelPolicy::default()
            },
        ])
        .unwrap();
        let root = TreeBuilder::new(&web, &policies).build("https://site.test/", 0, None);
        assert_eq!(root.children.len(), 1);
        assert!(root.children[0].children.is_empty());
        assert_eq!(root.depth(), 1);
        assert!(!web.fetched("https://site.test/g0"));
    }

    #[test]
    fn limit_zero_keeps_content_without_children() {
        let web = web_with_children(3);
        let policies = two_levels(LevelPolicy {
            selector: "a.toc".into(),
            limit: 0,
            include: true,
            ..LevelPolicy::default()
        });
        let root = TreeBuilder::new(&web, &policies).build("https://site.test/", 0, None);
        assert!(root.children.is_empty());
        assert!(root.content.contains("Root body"));
        assert_eq!(web.fetch_count(), 1);
    }

    #[test]
    fn empty_selector_terminates_branch() {
        let web = web_with_children(3);
        let policies = two_levels(LevelPolicy::default());
        let root = TreeBuilder::new(&web, &policies).build("https://site.test/", 0, None);
        assert!(root.children.is_empty());
    }

    #[test]
    fn failed_child_is_empty_and_siblings_survive() {
        let web = web_with_children(3).without("https://site.test/c1");
        let policies = two_levels(LevelPolicy {
            selector: "a.toc".into(),
            ..LevelPolicy::default()
        });
        let root = TreeBuilder::new(&web, &policies).build("https://site.test/", 0, None);
        assert_eq!(root.children.len(), 3);
        let failed = &root.children[1];
        assert_eq!(failed.title, "Link /c1");
        assert!(failed.content.is_empty());
        assert!(failed.children.is_empty());
        assert!(root.children[2].content.contains("Child 2 body"));
    }

    #[test]
    fn failed_root_is_empty_leaf() {
        let web = FakeWeb::new();
        let policies = two_levels(LevelPolicy {
            selector: "a".into(),
            ..LevelPolicy::default()
        });
        let root = TreeBuilder::new(&web, &policies).build("https://gone.test/", 0, None);
        assert_eq!(root.title, "https://gone.test/");
        assert!(root.content.is_empty());
        assert!(root.children.is_empty());
    }

    #[test]
    fn link_names_title_children_but_not_root() {
        let web = web_with_children(2);
        let policies = LevelPolicies::new(vec![
            LevelPolicy {
                selector: "a.toc".into(),
                use_link_name: true,
                ..LevelPolicy::default()
            },
            LevelPolicy {
                use_link_name: true,
                ..LevelPolicy::default()
            },
        ])
        .unwrap();
        let root = TreeBuilder::new(&web, &policies).build("https://site.test/", 0, Some("ignored"));
        assert_eq!(root.title, "Root");
        assert_eq!(titles(&root), vec!["Link /c0", "Link /c1"]);
    }

    #[test]
    fn author_comes_from_root_page() {
        let web = web_with_children(2);
        let policies = two_levels(LevelPolicy {
            selector: "a.toc".into(),
            ..LevelPolicy::default()
        });
        let root = TreeBuilder::new(&web, &policies).build("https://site.test/", 0, None);
        assert_eq!(root.author, "Root Author");
        assert!(root.children.iter().all(|c| c.author == "Root Author"));
    }

    #[test]
    fn child_order_is_independent_of_concurrency_width() {
        let mut web = web_with_children(6);
        // Earlier links finish last.
        for i in 0..6u64 {
            web = web.latency(
                &format!("https://site.test/c{i}"),
                Duration::from_millis(60 - i * 10),
            );
        }
        let build = |width: i64| {
            let policies = two_levels(LevelPolicy {
                selector: "a.toc".into(),
                concurrency: width,
                ..LevelPolicy::default()
            });
            web.reset_counters();
            let root = TreeBuilder::new(&web, &policies).build("https://site.test/", 0, None);
            (root, web.max_in_flight())
        };
        let (narrow, narrow_peak) = build(1);
        let (wide, wide_peak) = build(5);
        assert_eq!(titles(&narrow), titles(&wide));
        assert_eq!(
            titles(&wide),
            (0..6).map(|i| format!("Child {i}")).collect::<Vec<_>>()
        );
        assert_eq!(narrow.children.len(), wide.children.len());
        for (a, b) in narrow.children.iter().zip(&wide.children) {
            assert_eq!(a.url, b.url);
            assert_eq!(a.content, b.content);
        }
        assert_eq!(narrow_peak, 1);
        assert!(wide_peak > 1, "wide build never overlapped fetches");
        assert!(wide_peak <= 5);
    }

    #[test]
    fn delay_spaces_sequential_fetches() {
        let web = web_with_children(3);
        let policies = two_levels(LevelPolicy {
            selector: "a.toc".into(),
            delay_ms: 100,
            ..LevelPolicy::default()
        });
        let builder = TreeBuilder::new(&web, &policies);
        let started = Instant::now();
        let root = builder.build("https://site.test/", 0, None);
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(root.children.len(), 3);
        assert_eq!(web.max_in_flight(), 1);
        let windows = web.windows();
        for pair in windows.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "fetches overlapped");
        }
    }

    #[test]
    fn several_seeds_share_a_synthetic_root() {
        let web = FakeWeb::new()
            .page("https://a.test/", &leaf_page("A"))
            .page("https://b.test/", &leaf_page("B"));
        let policies = LevelPolicies::new(vec![LevelPolicy::default()]).unwrap();
        let root = TreeBuilder::new(&web, &policies)
            .build_book(&["https://a.test/".to_string(), "https://b.test/".to_string()]);
        assert_eq!(root.url, "");
        assert_eq!(root.title, "A");
        assert!(!root.policy.include);
        assert_eq!(titles(&root), vec!["A", "B"]);
    }

    #[test]
    fn later_seeds_take_the_book_author() {
        let web = FakeWeb::new()
            .page("https://a.test/", &toc_page("A", &["/a1"]))
            .page("https://a.test/a1", &leaf_page("A1"))
            .page("https://b.test/", &leaf_page("B"));
        let policies = two_levels(LevelPolicy {
            selector: "a.toc".into(),
            ..LevelPolicy::default()
        });
        let root = TreeBuilder::new(&web, &policies)
            .build_book(&["https://a.test/".to_string(), "https://b.test/".to_string()]);
        assert_eq!(root.author, "Root Author");
        assert!(root.walk().iter().all(|c| c.author == "Root Author"));
    }

    #[test]
    fn redirected_page_keeps_request_url_and_records_final_url() {
        let web = FakeWeb::new()
            .page("https://s.test/docs", &toc_page("Docs", &["intro"]))
            .redirect("https://s.test/docs", "https://s.test/docs/")
            .page("https://s.test/docs/intro", &leaf_page("Intro"));
        let policies = two_levels(LevelPolicy {
            selector: "a.toc".into(),
            ..LevelPolicy::default()
        });
        let root = TreeBuilder::new(&web, &policies).build("https://s.test/docs", 0, None);
        assert_eq!(root.url, "https://s.test/docs");
        assert_eq!(root.base_url, "https://s.test/docs/");
        assert_eq!(root.children[0].url, "https://s.test/docs/intro");
        assert_eq!(root.children[0].base_url, "https://s.test/docs/intro");
    }

    #[test]
    fn single_seed_is_the_root() {
        let web = FakeWeb::new().page("https://a.test/", &leaf_page("A"));
        let policies = LevelPolicies::new(vec![LevelPolicy::default()]).unwrap();
        let root = TreeBuilder::new(&web, &policies).build_book(&["https://a.test/".to_string()]);
        assert_eq!(root.url, "https://a.test/");
        assert!(root.policy.include);
    }

    #[test]
    fn list_children_applies_selection_without_fetching_children() {
        let web = web_with_children(4);
        let policies = two_levels(LevelPolicy {
            selector: "a.toc".into(),
            offset: 1,
            limit: 2,
            ..LevelPolicy::default()
        });
        let listed = TreeBuilder::new(&web, &policies)
            .list_children("https://site.test/")
            .unwrap();
        let urls: Vec<&str> = listed.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(urls, vec!["https://site.test/c1", "https://site.test/c2"]);
        assert_eq!(web.fetch_count(), 1);
    }

    #[test]
    fn progress_reports_every_fetch() {
        let web = web_with_children(2);
        let policies = two_levels(LevelPolicy {
            selector: "a.toc".into(),
            concurrency: 2,
            ..LevelPolicy::default()
        });
        let seen = AtomicUsize::new(0);
        let progress = |_: &str| {
            seen.fetch_add(1, Ordering::SeqCst);
        };
        TreeBuilder::new(&web, &policies)
            .with_progress(&progress)
            .build("https://site.test/", 0, None);
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }
}
