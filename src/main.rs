use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() {
    use clap::Parser;
    use std::error::Error;
    let args = webbook::cli::Args::parse();

    // RUST_LOG wins; otherwise warnings only, or debug for this crate with --verbose.
    let default_level = if args.verbose { "warn,webbook=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(e) = webbook::cli::run(&args) {
        eprintln!("{}", e);
        if args.verbose {
            let mut source = e.source();
            while let Some(s) = source {
                eprintln!("  cause: {}", s);
                source = s.source();
            }
        }
        std::process::exit(e.exit_code());
    }
}
