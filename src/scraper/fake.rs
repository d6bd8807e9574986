//! In-memory [Fetcher] for tests: canned pages and resources, fetch log, in-flight tracking and
//! optional per-URL latency.

use super::{FetchError, Fetcher, Page, Resource};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Default)]
pub(crate) struct FakeWeb {
    pages: HashMap<String, String>,
    /// Requested URL -> URL the page is reported as served from.
    redirects: HashMap<String, String>,
    resources: HashMap<String, Resource>,
    latency: HashMap<String, Duration>,
    log: Mutex<Vec<String>>,
    windows: Mutex<Vec<(Instant, Instant)>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeWeb {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn page(mut self, url: &str, markup: &str) -> Self {
        self.pages.insert(url.to_string(), markup.to_string());
        self
    }

    /// Serve the page registered under `from` as if the server redirected to `to`.
    pub(crate) fn redirect(mut self, from: &str, to: &str) -> Self {
        self.redirects.insert(from.to_string(), to.to_string());
        self
    }

    pub(crate) fn without(mut self, url: &str) -> Self {
        self.pages.remove(url);
        self
    }

    pub(crate) fn resource(mut self, url: &str, bytes: &[u8], content_type: Option<&str>) -> Self {
        self.resources.insert(
            url.to_string(),
            Resource {
                bytes: bytes.to_vec(),
                content_type: content_type.map(String::from),
            },
        );
        self
    }

    pub(crate) fn latency(mut self, url: &str, d: Duration) -> Self {
        self.latency.insert(url.to_string(), d);
        self
    }

    pub(crate) fn fetch_count(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    pub(crate) fn fetched(&self, url: &str) -> bool {
        self.log.lock().unwrap().iter().any(|u| u == url)
    }

    pub(crate) fn fetches_of(&self, url: &str) -> usize {
        self.log.lock().unwrap().iter().filter(|u| *u == url).count()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// (start, end) of every fetch, sorted by start.
    pub(crate) fn windows(&self) -> Vec<(Instant, Instant)> {
        let mut w = self.windows.lock().unwrap().clone();
        w.sort_by_key(|(start, _)| *start);
        w
    }

    pub(crate) fn reset_counters(&self) {
        self.log.lock().unwrap().clear();
        self.windows.lock().unwrap().clear();
        self.peak.store(0, Ordering::SeqCst);
    }

    fn enter(&self, url: &str) -> Instant {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.log.lock().unwrap().push(url.to_string());
        let start = Instant::now();
        if let Some(d) = self.latency.get(url) {
            std::thread::sleep(*d);
        }
        start
    }

    fn leave(&self, start: Instant) {
        self.windows.lock().unwrap().push((start, Instant::now()));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Fetcher for FakeWeb {
    fn fetch_page(&self, url: &str) -> Result<Page, FetchError> {
        let start = self.enter(url);
        let result = self
            .pages
            .get(url)
            .map(|markup| Page {
                url: self
                    .redirects
                    .get(url)
                    .cloned()
                    .unwrap_or_else(|| url.to_string()),
                markup: markup.clone(),
            })
            .ok_or_else(|| FetchError::NotFound {
                url: url.to_string(),
            });
        self.leave(start);
        result
    }

    fn fetch_bytes(&self, url: &str) -> Result<Resource, FetchError> {
        let start = self.enter(url);
        let result = self
            .resources
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::NotFound {
                url: url.to_string(),
            });
        self.leave(start);
        result
    }
}
