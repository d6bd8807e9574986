//! webbook: follow links from seed pages under per-depth policies and bind the pages into a
//! Markdown, HTML, JSON, EPUB or MOBI book.

pub mod cli;
pub mod config;
pub mod epub;
pub mod formats;
pub mod mobi;
pub mod model;
pub mod policy;
pub mod scraper;

// Re-exports for CLI and consumers.
pub use epub::{render_epub, write_epub, EpubBuilder, EpubError, EpubRenderer};
pub use formats::{
    render_html, render_json, render_markdown, write_text, FormatError, OutputFormat,
};
pub use mobi::{write_mobi, MobiError};
pub use model::Chapter;
pub use policy::{LevelPolicies, LevelPolicy, PolicyError, Schedule};
pub use scraper::{
    FetchError, Fetcher, Page, PoliteClient, PoliteClientBuilder, Resource, TreeBuilder,
};
