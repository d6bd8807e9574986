//! CLI parsing and orchestration. Parses args, builds the level policies, acquires the chapter
//! tree, then writes Markdown, JSON, HTML, EPUB or MOBI. Maps errors to exit codes.

use crate::config::{self, Config};
use crate::epub::{render_epub, write_epub, EpubError};
use crate::formats::{
    render_html, render_json, render_markdown, sanitize_title, split_markdown,
    write_split_markdown, write_text, FormatError, OutputFormat,
};
use crate::mobi::{mobi_paths, write_mobi, MobiError};
use crate::model::Chapter;
use crate::policy::{LevelPolicies, LevelPolicy, PolicyError};
use crate::scraper::{FetchError, Fetcher, TreeBuilder};
use crate::PoliteClient;
use clap::Parser;
use reqwest::Url;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const DEFAULT_CONVERTER: &str = "kindlegen";

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Policy(#[from] PolicyError),

    #[error("Nothing could be fetched from {0}.")]
    NothingFetched(String),

    #[error("{0}")]
    Fetch(#[from] FetchError),

    #[error("{0}")]
    Format(#[from] FormatError),

    #[error("{0}")]
    Epub(#[from] EpubError),

    #[error("{0}")]
    Mobi(#[from] MobiError),

    #[error("Failed to write to standard output: {0}")]
    Stdout(#[source] std::io::Error),
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_) | CliRunError::Policy(_) => 1,
            CliRunError::NothingFetched(_) | CliRunError::Fetch(_) => 2,
            CliRunError::Format(_)
            | CliRunError::Epub(_)
            | CliRunError::Mobi(_)
            | CliRunError::Stdout(_) => 3,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "webbook")]
#[command(about = "Follow links from web pages and bind them into a Markdown, HTML, JSON, EPUB or MOBI book")]
#[command(
    after_help = "Config file keys (output_dir, user_agent, timeout_secs, retry_count, retry_backoff_secs, converter, ncx) are read from ./webbook.toml or the user config directory. CLI flags override config."
)]
pub struct Args {
    /// Seed page URL(s). Several seeds are bound into one book.
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Book name (default: title of the first page).
    #[arg(short, long)]
    pub name: Option<String>,

    /// Book author (default: author found on the first page).
    #[arg(short, long)]
    pub author: Option<String>,

    /// Output format: md, json, html, epub or mobi.
    #[arg(short, long, default_value = "md", value_parser = parse_format)]
    pub format: OutputFormat,

    /// Output path. Default: {output_dir}/{sanitized-name}.{ext}. A directory for --separate-md-file.
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Print the result to standard output instead of writing a file.
    #[arg(long)]
    pub stdout: bool,

    /// Keep only images in EPUB and MOBI output.
    #[arg(long)]
    pub images: bool,

    /// Suppress progress output (errors only).
    #[arg(short, long)]
    pub quiet: bool,

    /// Debug logging and verbose error chain.
    #[arg(long)]
    pub verbose: bool,

    /// CSS selector of the links to follow, one per level (repeat or separate with commas).
    #[arg(short, long, value_delimiter = ',')]
    pub selector: Vec<String>,

    /// Number of link levels to follow.
    #[arg(short, long, default_value_t = 0)]
    pub depth: usize,

    /// Follow at most this many links per page (-1 = all). Implies --depth 1.
    #[arg(short, long, allow_hyphen_values = true)]
    pub limit: Option<i64>,

    /// Skip this many links per page.
    #[arg(short, long, default_value_t = 0)]
    pub offset: usize,

    /// Follow links in reverse order.
    #[arg(short, long)]
    pub reverse: bool,

    /// Milliseconds to wait before fetching each link after the first.
    #[arg(long, allow_hyphen_values = true)]
    pub delay: Option<i64>,

    /// Fetch up to this many links of one page at the same time.
    #[arg(short, long, allow_hyphen_values = true)]
    pub threads: Option<i64>,

    /// Include the content of pages that only list links.
    #[arg(short, long)]
    pub include: bool,

    /// Title chapters with the text of the link that led to them.
    #[arg(long)]
    pub use_link_name: bool,

    /// Markdown only: one file per first-level chapter, grouped by host.
    #[arg(long)]
    pub separate_md_file: bool,

    /// Print the links that would be followed from the seed page(s) and exit.
    #[arg(long)]
    pub list: bool,

    /// Include toc.ncx in EPUB output for legacy readers.
    #[arg(long)]
    pub ncx: bool,

    /// HTTP User-Agent (overrides config).
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Request timeout in seconds (overrides config; default 30).
    #[arg(long)]
    pub timeout: Option<u64>,
}

fn parse_format(s: &str) -> Result<OutputFormat, String> {
    match s.to_lowercase().as_str() {
        "md" | "markdown" => Ok(OutputFormat::Markdown),
        "json" => Ok(OutputFormat::Json),
        "html" => Ok(OutputFormat::Html),
        "epub" => Ok(OutputFormat::Epub),
        "mobi" => Ok(OutputFormat::Mobi),
        _ => Err(format!(
            "Invalid --format value: '{}'. Use md, json, html, epub or mobi.",
            s
        )),
    }
}

/// Values resolved from flags, config file and defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub output_dir: PathBuf,
    pub converter: String,
    pub ncx: bool,
}

impl Settings {
    pub fn resolve(args: &Args, config: &Config) -> Self {
        Self {
            output_dir: config
                .output_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(".")),
            converter: config
                .converter
                .clone()
                .unwrap_or_else(|| DEFAULT_CONVERTER.to_string()),
            ncx: args.ncx || config.ncx.unwrap_or(false),
        }
    }
}

/// One policy per level. Levels = max(selectors, depth) + 1; a limit without a depth
/// means depth 1. Every level shares the same flags.
pub fn build_policies(args: &Args) -> Result<LevelPolicies, CliRunError> {
    let depth = if args.limit.is_some() && args.depth == 0 {
        1
    } else {
        args.depth
    };
    let mut selectors: Vec<String> = args.selector.iter().map(|s| s.trim().to_string()).collect();
    selectors.push(String::new());
    while selectors.len() < depth + 1 {
        selectors.push(String::new());
    }
    let levels = selectors
        .into_iter()
        .map(|selector| LevelPolicy {
            selector,
            include: args.include,
            limit: args.limit.unwrap_or(-1),
            offset: args.offset,
            reverse: args.reverse,
            delay_ms: args.delay.unwrap_or(-1),
            concurrency: args.threads.unwrap_or(-1),
            images_only: args.images,
            use_link_name: args.use_link_name,
        })
        .collect();
    Ok(LevelPolicies::new(levels)?)
}

fn validate_seeds(urls: &[String]) -> Result<(), CliRunError> {
    for url in urls {
        let parsed = Url::parse(url).map_err(|e| {
            CliRunError::InvalidInput(format!(
                "Expected a page URL. Example: https://example.com/guide. Invalid: {}: {}",
                url, e
            ))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(CliRunError::InvalidInput(format!(
                "Unsupported URL scheme '{}' in {}. Use http or https.",
                parsed.scheme(),
                url
            )));
        }
    }
    Ok(())
}

/// Ensure output path parent exists.
fn validate_output_path(path: &Path) -> Result<(), CliRunError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(CliRunError::InvalidInput(format!(
                "Cannot write output: {}: parent directory does not exist.",
                path.display()
            )));
        }
    }
    Ok(())
}

fn default_output_path(args: &Args, settings: &Settings, title: &str) -> PathBuf {
    match &args.output {
        Some(p) => p.clone(),
        None => settings.output_dir.join(format!(
            "{}.{}",
            sanitize_title(title),
            args.format.extension()
        )),
    }
}

/// True when no page in the tree yielded any content, whatever placeholders it holds.
fn nothing_fetched(root: &Chapter) -> bool {
    root.walk().iter().all(|c| c.content.trim().is_empty())
}

/// Entry point for the CLI. Returns Ok(()) on success; Err with exit code and message on failure.
pub fn run(args: &Args) -> Result<(), CliRunError> {
    validate_seeds(&args.urls)?;
    let policies = build_policies(args)?;
    let config = config::load_config()
        .map_err(CliRunError::InvalidInput)?
        .unwrap_or_default();
    let settings = Settings::resolve(args, &config);

    const DEFAULT_TIMEOUT_SECS: u64 = 30;
    const DEFAULT_RETRY_COUNT: u32 = 3;
    let timeout_secs = args
        .timeout
        .or(config.timeout_secs)
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    let mut builder = PoliteClient::builder()
        .timeout_secs(timeout_secs)
        .retry_count(config.retry_count.unwrap_or(DEFAULT_RETRY_COUNT).max(1));
    if let Some(backoff) = config.retry_backoff_secs.clone() {
        builder = builder.retry_backoff_secs(backoff);
    }
    if let Some(ua) = args.user_agent.clone().or_else(|| config.user_agent.clone()) {
        builder = builder.user_agent(ua);
    }
    let client = builder
        .build()
        .map_err(|e| CliRunError::InvalidInput(format!("Failed to create HTTP client: {}", e)))?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    run_with(args, &settings, &policies, &client, &mut out)
}

/// Everything after client construction, over any fetcher and output sink.
pub fn run_with<F: Fetcher + ?Sized>(
    args: &Args,
    settings: &Settings,
    policies: &LevelPolicies,
    fetcher: &F,
    out: &mut dyn Write,
) -> Result<(), CliRunError> {
    let tree = TreeBuilder::new(fetcher, policies);

    if args.list {
        return list_links(args, &tree, out);
    }

    let show_progress = !args.quiet && !args.stdout;
    let pb = if show_progress {
        let bar = indicatif::ProgressBar::new_spinner();
        bar.set_style(
            indicatif::ProgressStyle::default_spinner()
                .template("{spinner} {msg} ({elapsed})")
                .unwrap_or_else(|_| indicatif::ProgressStyle::default_spinner())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    } else {
        indicatif::ProgressBar::hidden()
    };
    let progress = |url: &str| {
        pb.inc(1);
        pb.set_message(format!("Fetched {} pages, last: {}", pb.position(), url));
    };

    let mut root = tree.with_progress(&progress).build_book(&args.urls);
    pb.disable_steady_tick();
    pb.finish_and_clear();

    if nothing_fetched(&root) {
        return Err(CliRunError::NothingFetched(args.urls.join(", ")));
    }
    root.set_book_identity(args.name.as_deref(), args.author.as_deref());
    info!(
        title = %root.title,
        chapters = root.walk().len(),
        depth = root.depth(),
        "book acquired"
    );

    let written = write_output(args, settings, fetcher, &root, out)?;
    if !args.quiet {
        for path in written {
            eprintln!("Wrote {}", path.display());
        }
    }
    Ok(())
}

fn list_links<F: Fetcher + ?Sized>(
    args: &Args,
    tree: &TreeBuilder<'_, F>,
    out: &mut dyn Write,
) -> Result<(), CliRunError> {
    for url in &args.urls {
        let links = tree.list_children(url)?;
        debug!(url = %url, count = links.len(), "links selected");
        for (i, link) in links.iter().enumerate() {
            writeln!(out, "{}\t{}\t{}", i + 1, link.text, link.url).map_err(CliRunError::Stdout)?;
        }
    }
    Ok(())
}

/// Render `root` in the requested format. Returns the paths written (none for --stdout).
fn write_output<F: Fetcher + ?Sized>(
    args: &Args,
    settings: &Settings,
    fetcher: &F,
    root: &Chapter,
    out: &mut dyn Write,
) -> Result<Vec<PathBuf>, CliRunError> {
    if args.separate_md_file && args.format == OutputFormat::Markdown {
        if args.stdout {
            for file in split_markdown(root) {
                out.write_all(file.content.as_bytes())
                    .map_err(CliRunError::Stdout)?;
            }
            return Ok(Vec::new());
        }
        let dir = args.output.clone().unwrap_or_else(|| settings.output_dir.clone());
        return Ok(write_split_markdown(root, &dir)?);
    }

    let path = default_output_path(args, settings, &root.title);
    let text = match args.format {
        OutputFormat::Markdown => Some(render_markdown(root)),
        OutputFormat::Json => Some(render_json(root)?),
        OutputFormat::Html => Some(render_html(root)),
        OutputFormat::Epub | OutputFormat::Mobi => None,
    };

    if let Some(text) = text {
        if args.stdout {
            out.write_all(text.as_bytes()).map_err(CliRunError::Stdout)?;
            return Ok(Vec::new());
        }
        validate_output_path(&path)?;
        write_text(&path, &text)?;
        return Ok(vec![path]);
    }

    match args.format {
        OutputFormat::Epub if args.stdout => {
            let bytes = render_epub(root, fetcher, settings.ncx)
                .write_to(Cursor::new(Vec::new()))?
                .into_inner();
            out.write_all(&bytes).map_err(CliRunError::Stdout)?;
            Ok(Vec::new())
        }
        OutputFormat::Epub => {
            validate_output_path(&path)?;
            write_epub(root, fetcher, &path, settings.ncx)?;
            Ok(vec![path])
        }
        _ => {
            let (mobi, _) = mobi_paths(&path);
            validate_output_path(&mobi)?;
            let mobi = write_mobi(root, fetcher, &mobi, &settings.converter, settings.ncx)?;
            if args.stdout {
                // The converter can only write files; stream the result afterwards.
                let bytes = std::fs::read(&mobi).map_err(|e| {
                    CliRunError::Format(FormatError::Io {
                        path: mobi.clone(),
                        source: e,
                    })
                })?;
                out.write_all(&bytes).map_err(CliRunError::Stdout)?;
                return Ok(Vec::new());
            }
            Ok(vec![mobi])
        }
    }
}
