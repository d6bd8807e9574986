//! Optional config file loading. Search order: ./webbook.toml, then
//! $XDG_CONFIG_HOME/webbook/config.toml (or ~/.config/webbook/config.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Config file contents. All fields optional; only present keys override defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Directory for default output paths when --output is not set. Relative to CWD.
    pub output_dir: Option<PathBuf>,
    /// HTTP User-Agent header.
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Number of HTTP attempts for transient failures (default 3).
    pub retry_count: Option<u32>,
    /// Delay in seconds before each retry (e.g. [1, 2, 4]).
    pub retry_backoff_secs: Option<Vec<u64>>,
    /// Program that turns the intermediate EPUB into MOBI (default: kindlegen).
    pub converter: Option<String>,
    /// Add toc.ncx to EPUB output for older readers.
    pub ncx: Option<bool>,
}

/// Search order: (1) ./webbook.toml, (2) $XDG_CONFIG_HOME/webbook/config.toml.
/// Missing file returns Ok(None). Invalid TOML or I/O error reading a present file returns Err.
pub fn load_config() -> Result<Option<Config>, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Cannot determine current directory: {}", e))?;
    let mut paths = vec![cwd.join("webbook.toml")];
    if let Some(d) = dirs::config_dir() {
        paths.push(d.join("webbook").join("config.toml"));
    }
    for path in &paths {
        if path.exists() {
            return load_config_from(path).map(Some);
        }
    }
    Ok(None)
}

/// Read and parse one config file.
pub fn load_config_from(path: &Path) -> Result<Config, String> {
    let s = std::fs::read_to_string(path)
        .map_err(|e| format!("Cannot read config {}: {}", path.display(), e))?;
    toml::from_str(&s).map_err(|e| format!("Invalid config {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_config() {
        let c: Config = toml::from_str("").unwrap();
        assert!(c.output_dir.is_none());
        assert!(c.user_agent.is_none());
        assert!(c.timeout_secs.is_none());
        assert!(c.retry_count.is_none());
        assert!(c.retry_backoff_secs.is_none());
        assert!(c.converter.is_none());
        assert!(c.ncx.is_none());
    }

    #[test]
    fn parse_full_config() {
        let s = r#"
            output_dir = "books"
            user_agent = "Custom/1.0"
            timeout_secs = 60
            retry_count = 5
            retry_backoff_secs = [1, 2, 4, 8]
            converter = "/opt/kindlegen"
            ncx = true
        "#;
        let c: Config = toml::from_str(s).unwrap();
        assert_eq!(c.output_dir.as_deref(), Some(Path::new("books")));
        assert_eq!(c.user_agent.as_deref(), Some("Custom/1.0"));
        assert_eq!(c.timeout_secs, Some(60));
        assert_eq!(c.retry_count, Some(5));
        assert_eq!(
            c.retry_backoff_secs.as_deref(),
            Some([1, 2, 4, 8].as_slice())
        );
        assert_eq!(c.converter.as_deref(), Some("/opt/kindlegen"));
        assert_eq!(c.ncx, Some(true));
    }

    #[test]
    fn parse_partial_config() {
        let c: Config = toml::from_str("timeout_secs = 5").unwrap();
        assert!(c.output_dir.is_none());
        assert_eq!(c.timeout_secs, Some(5));
        assert!(c.converter.is_none());
    }

    #[test]
    fn invalid_toml_errors() {
        assert!(toml::from_str::<Config>("output_dir = [").is_err());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("webbook.toml");
        std::fs::write(&path, "converter = \"ebook-convert\"\n").unwrap();
        let c = load_config_from(&path).unwrap();
        assert_eq!(c.converter.as_deref(), Some("ebook-convert"));

        std::fs::write(&path, "ncx = \"yes\"\n").unwrap();
        let err = load_config_from(&path).unwrap_err();
        assert!(err.starts_with("Invalid config"));
    }
}
