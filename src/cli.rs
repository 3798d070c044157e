//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use sift_core::acquisition::DEFAULT_MAILTO;
use sift_core::{DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, DEFAULT_PER_HOST_CONCURRENCY};

/// Screen bibliographic records and acquire their full-text PDFs.
///
/// Sift filters exported literature searches for systematic reviews
/// (duplicates, language, article type, topic relevance) and downloads the
/// PDFs of the papers that remain.
#[derive(Parser, Debug)]
#[command(name = "sift")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the screening filters described by a TOML config
    Screen(ScreenArgs),

    /// Download PDFs for a URL list (.txt) or paper table (.csv/.tsv)
    Download(DownloadArgs),

    /// Download the attachments of a Zotero collection
    Zotero(ZoteroArgs),
}

#[derive(clap::Args, Debug)]
pub struct ScreenArgs {
    /// Screening configuration file
    pub config: PathBuf,
}

#[derive(clap::Args, Debug)]
pub struct DownloadArgs {
    /// Input file: one URL per line, or a CSV/TSV table with a header row
    pub input: PathBuf,

    /// Maximum concurrent downloads (1-100)
    #[arg(short = 'c', long, default_value_t = DEFAULT_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: u8,

    /// Maximum concurrent downloads per host (1-25)
    #[arg(long, default_value_t = DEFAULT_PER_HOST_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=25))]
    pub per_host: u8,

    /// Maximum retry attempts for transient failures (0-10)
    #[arg(short = 'r', long, default_value_t = DEFAULT_MAX_RETRIES as u8, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: u8,

    /// Directory for downloaded PDFs (defaults to the input file's directory)
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Contact email sent to Crossref and Unpaywall
    #[arg(long, env = "SIFT_MAILTO", default_value = DEFAULT_MAILTO)]
    pub mailto: String,

    /// Minimum delay between page/metadata requests to the same domain in milliseconds (0 to disable, max 60000)
    #[arg(short = 'l', long, default_value_t = 0, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub rate_limit: u64,

    /// Crossref API base URL
    #[arg(long, env = "SIFT_CROSSREF_URL", hide = true)]
    pub crossref_url: Option<String>,

    /// Unpaywall API base URL
    #[arg(long, env = "SIFT_UNPAYWALL_URL", hide = true)]
    pub unpaywall_url: Option<String>,

    /// DOI resolver prefix
    #[arg(long, env = "SIFT_DOI_RESOLVER", hide = true)]
    pub doi_resolver: Option<String>,
}

#[derive(clap::Args)]
pub struct ZoteroArgs {
    /// Zotero user ID
    #[arg(long, env = "ZOTERO_USER_ID")]
    pub user: String,

    /// Zotero API key
    #[arg(long, env = "ZOTERO_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Collection path, e.g. "Review/Included" (a group name may lead the path)
    pub collection: String,

    /// Directory that receives the `zotero/` output folder
    #[arg(short = 'o', long, default_value = ".")]
    pub parent_dir: PathBuf,

    /// Zotero API base URL
    #[arg(long, env = "SIFT_ZOTERO_URL", hide = true)]
    pub api_url: Option<String>,
}

impl std::fmt::Debug for ZoteroArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZoteroArgs")
            .field("user", &self.user)
            .field("api_key", &"[REDACTED]")
            .field("collection", &self.collection)
            .field("parent_dir", &self.parent_dir)
            .field("api_url", &self.api_url)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn download(args: &[&str]) -> DownloadArgs {
        let mut argv = vec!["sift", "download", "papers.csv"];
        argv.extend_from_slice(args);
        match Args::try_parse_from(argv).unwrap().command {
            Command::Download(download) => download,
            other => panic!("expected download, got {other:?}"),
        }
    }

    #[test]
    fn test_cli_subcommand_required() {
        assert!(Args::try_parse_from(["sift"]).is_err());
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["sift", "-v", "screen", "cfg.toml"]).unwrap();
        assert_eq!(args.verbose, 1);

        let args = Args::try_parse_from(["sift", "screen", "cfg.toml", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_quiet_flag_sets_quiet() {
        let args = Args::try_parse_from(["sift", "--quiet", "screen", "cfg.toml"]).unwrap();
        assert!(args.quiet);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["sift", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let err = Args::try_parse_from(["sift", "--invalid-flag"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    #[test]
    fn test_cli_screen_takes_config_path() {
        let args = Args::try_parse_from(["sift", "screen", "review.toml"]).unwrap();
        match args.command {
            Command::Screen(screen) => assert_eq!(screen.config, PathBuf::from("review.toml")),
            other => panic!("expected screen, got {other:?}"),
        }
    }

    // ==================== Download ====================

    #[test]
    fn test_cli_download_defaults() {
        let args = download(&[]);
        assert_eq!(args.input, PathBuf::from("papers.csv"));
        assert_eq!(args.concurrency, 25);
        assert_eq!(args.per_host, 4);
        assert_eq!(args.max_retries, 3);
        assert_eq!(args.rate_limit, 0);
        assert!(args.output_dir.is_none());
    }

    #[test]
    fn test_cli_concurrency_bounds() {
        assert_eq!(download(&["-c", "1"]).concurrency, 1);
        assert_eq!(download(&["--concurrency", "100"]).concurrency, 100);
        for bad in ["0", "101"] {
            let err =
                Args::try_parse_from(["sift", "download", "in.txt", "-c", bad]).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        }
    }

    #[test]
    fn test_cli_per_host_bounds() {
        assert_eq!(download(&["--per-host", "25"]).per_host, 25);
        let err = Args::try_parse_from(["sift", "download", "in.txt", "--per-host", "26"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_max_retries_bounds() {
        assert_eq!(download(&["-r", "0"]).max_retries, 0);
        assert_eq!(download(&["--max-retries", "10"]).max_retries, 10);
        let err =
            Args::try_parse_from(["sift", "download", "in.txt", "-r", "11"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_rate_limit_over_max_rejected() {
        assert_eq!(download(&["-l", "60000"]).rate_limit, 60000);
        let err =
            Args::try_parse_from(["sift", "download", "in.txt", "-l", "60001"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_output_dir_and_mailto() {
        let args = download(&["-o", "pdfs", "--mailto", "me@lab.org"]);
        assert_eq!(args.output_dir, Some(PathBuf::from("pdfs")));
        assert_eq!(args.mailto, "me@lab.org");
    }

    // ==================== Zotero ====================

    #[test]
    fn test_cli_zotero_args() {
        let args = Args::try_parse_from([
            "sift", "zotero", "--user", "42", "--api-key", "k", "Lab/Included", "-o", "out",
        ])
        .unwrap();
        match args.command {
            Command::Zotero(z) => {
                assert_eq!(z.user, "42");
                assert_eq!(z.api_key, "k");
                assert_eq!(z.collection, "Lab/Included");
                assert_eq!(z.parent_dir, PathBuf::from("out"));
            }
            other => panic!("expected zotero, got {other:?}"),
        }
    }

    #[test]
    fn test_cli_zotero_debug_hides_api_key() {
        let args = Args::try_parse_from([
            "sift", "zotero", "--user", "42", "--api-key", "secret-key", "Lab",
        ])
        .unwrap();
        assert!(!format!("{args:?}").contains("secret-key"));
    }
}
