//! Command-line interface definitions.
//!
//! All run policy knobs live here: which kinds to ingest, per-source caps,
//! timeouts, retries, and the optional run deadline. Changing any of these
//! changes cost, not merge semantics.

use clap::Parser;

/// Command-line arguments for the price_atlas binary.
///
/// # Examples
///
/// ```sh
/// # Ingest all built-in chains into ./out
/// price_atlas -o ./out
///
/// # One chain, first two price files, with geocoding
/// price_atlas -o ./out --chains kingstore --max-files 2 --geocode
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Output directory for the exported catalog and run report
    #[arg(short, long, default_value = "./out")]
    pub output_dir: String,

    /// Optional path to a YAML file of feed source definitions
    #[arg(short, long)]
    pub sources: Option<String>,

    /// Restrict the run to these chain codes (default: all configured)
    #[arg(long)]
    pub chains: Vec<String>,

    /// Cap on price files processed per source
    #[arg(long)]
    pub max_files: Option<usize>,

    /// Override each source's concurrent-download bound
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Retries per network call before a file is marked failed
    #[arg(long, default_value_t = 2)]
    pub retries: usize,

    /// Timeout for listing and resolution calls, in seconds
    #[arg(long, default_value_t = 30)]
    pub listing_timeout: u64,

    /// Timeout for file content downloads, in seconds
    #[arg(long, default_value_t = 120)]
    pub content_timeout: u64,

    /// Cancel the whole run after this many seconds
    #[arg(long, env = "PRICE_ATLAS_RUN_TIMEOUT")]
    pub run_timeout: Option<u64>,

    /// Ingest price files only
    #[arg(long, conflicts_with = "stores_only")]
    pub prices_only: bool,

    /// Ingest store directories only
    #[arg(long, conflicts_with = "prices_only")]
    pub stores_only: bool,

    /// Geocode stores the built-in city table does not cover (slow; uses
    /// the public Nominatim endpoint)
    #[arg(long, default_value_t = false)]
    pub geocode: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["price_atlas"]);
        assert_eq!(cli.output_dir, "./out");
        assert_eq!(cli.retries, 2);
        assert_eq!(cli.listing_timeout, 30);
        assert_eq!(cli.content_timeout, 120);
        assert!(!cli.geocode);
        assert!(cli.chains.is_empty());
    }

    #[test]
    fn test_cli_policy_flags() {
        let cli = Cli::parse_from([
            "price_atlas",
            "-o",
            "/tmp/out",
            "--chains",
            "kingstore",
            "--chains",
            "shufersal",
            "--max-files",
            "2",
            "--prices-only",
        ]);
        assert_eq!(cli.output_dir, "/tmp/out");
        assert_eq!(cli.chains, vec!["kingstore", "shufersal"]);
        assert_eq!(cli.max_files, Some(2));
        assert!(cli.prices_only);
    }

    #[test]
    fn test_prices_only_conflicts_with_stores_only() {
        let result = Cli::try_parse_from(["price_atlas", "--prices-only", "--stores-only"]);
        assert!(result.is_err());
    }
}
