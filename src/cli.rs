//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Download and organize manga chapters into a local cbz library.
///
/// mangadl tracks subscribed titles, fetches new chapter pages in
/// parallel, and packages each chapter into a cbz archive readable by
/// any comic reader.
#[derive(Parser, Debug)]
#[command(name = "mangadl")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Parallel page downloads per batch (1-100, overrides the configured value)
    #[arg(short = 'c', long, global = true, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Settings file path (default: ~/.mangadl.json)
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Library root directory (overrides the configured path)
    #[arg(long, global = true)]
    pub library: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search the configured site for titles matching a query
    Search {
        /// Text to search for
        query: String,
    },

    /// Subscribe to a title: fetch its metadata and chapter list
    Add {
        /// Title identifier as used by the site (e.g. "berserk")
        title: String,
    },

    /// Download new chapters for one title, or for the whole library
    Update {
        /// Restrict the update to a single title
        title: Option<String>,
    },

    /// Show subscribed titles and their tracked chapters
    Status,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_status_parses_with_defaults() {
        let args = Args::try_parse_from(["mangadl", "status"]).unwrap();
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(args.concurrency.is_none());
        assert!(matches!(args.command, Command::Status));
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["mangadl", "-v", "status"]).unwrap();
        assert_eq!(args.verbose, 1);

        let args = Args::try_parse_from(["mangadl", "status", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_search_takes_query() {
        let args = Args::try_parse_from(["mangadl", "search", "berserk"]).unwrap();
        match args.command {
            Command::Search { query } => assert_eq!(query, "berserk"),
            other => panic!("Expected Search, got: {other:?}"),
        }
    }

    #[test]
    fn test_cli_update_title_is_optional() {
        let args = Args::try_parse_from(["mangadl", "update"]).unwrap();
        assert!(matches!(args.command, Command::Update { title: None }));

        let args = Args::try_parse_from(["mangadl", "update", "berserk"]).unwrap();
        match args.command {
            Command::Update { title } => assert_eq!(title.as_deref(), Some("berserk")),
            other => panic!("Expected Update, got: {other:?}"),
        }
    }

    #[test]
    fn test_cli_concurrency_is_global_and_ranged() {
        let args = Args::try_parse_from(["mangadl", "update", "-c", "8"]).unwrap();
        assert_eq!(args.concurrency, Some(8));

        let result = Args::try_parse_from(["mangadl", "update", "-c", "0"]);
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::ValueValidation
        );

        let result = Args::try_parse_from(["mangadl", "update", "-c", "101"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_missing_subcommand_errors() {
        let result = Args::try_parse_from(["mangadl"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let result = Args::try_parse_from(["mangadl", "--help"]);
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::DisplayHelp
        );
    }
}
