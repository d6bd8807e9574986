//! Per-depth scrape configuration. One [LevelPolicy] per tree level, index 0 = root.
//!
//! Policies are validated once, before any fetch, and shared read-only (via `Arc`) by every
//! chapter built at that depth.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Upper bound for a level's concurrency width. Parallelism is always finite.
pub const MAX_CONCURRENCY: i64 = 64;

/// Rejected configuration. Raised before acquisition starts, never mid-run.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Level {level}: delay and concurrency cannot be used at the same time.")]
    DelayAndConcurrency { level: usize },

    #[error("Level {level}: concurrency {width} exceeds the maximum of {max}.")]
    ConcurrencyTooHigh { level: usize, width: i64, max: i64 },

    #[error("At least one level policy is required.")]
    Empty,
}

/// How the children of one chapter are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// One at a time, pausing before every fetch after the first.
    Delayed(Duration),
    /// Up to this many fetches in flight.
    Parallel(usize),
    /// One at a time, no pause.
    Sequential,
}

/// Selection, scheduling and rendering configuration for one depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelPolicy {
    /// CSS selector for child links. Empty = keep content, no children.
    pub selector: String,
    /// Emit this level's own content into the output.
    pub include: bool,
    /// Max children, -1 = unbounded.
    pub limit: i64,
    /// Children skipped from the start of document order.
    pub offset: usize,
    /// Iterate the post-offset children in reverse.
    pub reverse: bool,
    /// Milliseconds between sequential child fetches, -1 = disabled.
    pub delay_ms: i64,
    /// Max simultaneous child fetches, -1 = disabled.
    pub concurrency: i64,
    /// Packaged output keeps only image elements for this level.
    pub images_only: bool,
    /// Title children with their anchor text instead of the page title.
    pub use_link_name: bool,
}

impl Default for LevelPolicy {
    fn default() -> Self {
        Self {
            selector: String::new(),
            include: false,
            limit: -1,
            offset: 0,
            reverse: false,
            delay_ms: -1,
            concurrency: -1,
            images_only: false,
            use_link_name: false,
        }
    }
}

impl LevelPolicy {
    /// Policy for a level that contributes nothing of its own (synthetic root).
    pub fn no_include() -> Self {
        Self::default()
    }

    /// Check the mutually exclusive and bounded fields. `level` is only used in messages.
    pub fn validate(&self, level: usize) -> Result<(), PolicyError> {
        if self.delay_ms >= 0 && self.concurrency > 0 {
            return Err(PolicyError::DelayAndConcurrency { level });
        }
        if self.concurrency > MAX_CONCURRENCY {
            return Err(PolicyError::ConcurrencyTooHigh {
                level,
                width: self.concurrency,
                max: MAX_CONCURRENCY,
            });
        }
        Ok(())
    }

    /// Child scheduling for this level. Delay wins the (already rejected) tie.
    pub fn schedule(&self) -> Schedule {
        if self.delay_ms >= 0 {
            Schedule::Delayed(Duration::from_millis(self.delay_ms as u64))
        } else if self.concurrency > 0 {
            Schedule::Parallel(self.concurrency as usize)
        } else {
            Schedule::Sequential
        }
    }

    /// Apply offset, then reverse, then limit, in that fixed order.
    pub fn select<T>(&self, candidates: Vec<T>) -> Vec<T> {
        let mut selected: Vec<T> = candidates.into_iter().skip(self.offset).collect();
        if self.reverse {
            selected.reverse();
        }
        if self.limit >= 0 {
            selected.truncate(self.limit as usize);
        }
        selected
    }
}

/// Validated, immutable stack of level policies.
///
/// Construction enforces the tree-wide rules: the root never uses link-name titling and the
/// deepest level is always included.
#[derive(Debug, Clone)]
pub struct LevelPolicies {
    levels: Vec<Arc<LevelPolicy>>,
}

impl LevelPolicies {
    pub fn new(mut levels: Vec<LevelPolicy>) -> Result<Self, PolicyError> {
        if levels.is_empty() {
            return Err(PolicyError::Empty);
        }
        for (i, level) in levels.iter().enumerate() {
            level.validate(i)?;
        }
        levels[0].use_link_name = false;
        if let Some(last) = levels.last_mut() {
            last.include = true;
        }
        Ok(Self {
            levels: levels.into_iter().map(Arc::new).collect(),
        })
    }

    /// Number of levels; the built tree is `len() - 1` deep.
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn get(&self, depth: usize) -> Option<&Arc<LevelPolicy>> {
        self.levels.get(depth)
    }

    /// Policy for `depth`, clamped to the deepest level.
    pub fn level(&self, depth: usize) -> &Arc<LevelPolicy> {
        &self.levels[depth.min(self.levels.len() - 1)]
    }

    /// True when `depth` is the deepest configured level.
    pub fn is_deepest(&self, depth: usize) -> bool {
        depth + 1 >= self.levels.len()
    }
}
