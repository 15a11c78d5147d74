use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "docshelf",
    about = "Store documents and find them again by the words inside them"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Store one or more files and tag them by their text
    Upload(UploadArgs),
    /// Find stored files sharing word stems with a query
    Search(SearchArgs),
    /// Show a stored file and its tags
    Show(ShowArgs),
    /// List stored files
    List(ListArgs),
    /// Rename a stored file, keeping its extension
    Rename(RenameArgs),
    /// Delete a stored file and its bytes
    Delete(DeleteArgs),
    /// Write a stored file's bytes to a path or stdout
    Download(DownloadArgs),
    /// List every tag (a word stem, e.g. "happi") with the number of files using it
    Tags(TagsArgs),
    /// Show system status and statistics
    Status(StatusArgs),
    /// Manage external tool settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Start MCP server for AI agent integration
    Mcp,
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Upload --

#[derive(Debug, Parser)]
pub struct UploadArgs {
    /// Files to upload
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Output the stored records as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Number of results to return
    #[arg(short = 'n', long, default_value = "10")]
    pub count: usize,

    /// Return every matching file
    #[arg(long)]
    pub all: bool,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

impl SearchArgs {
    pub fn limit(&self) -> Option<usize> {
        (!self.all).then_some(self.count)
    }
}

// -- Show --

#[derive(Debug, Parser)]
pub struct ShowArgs {
    /// File id
    pub id: u64,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- List --

#[derive(Debug, Parser)]
pub struct ListArgs {
    /// Glob pattern applied to display names
    pub pattern: Option<String>,

    /// Output as JSON array
    #[arg(long)]
    pub json: bool,
}

// -- Rename --

#[derive(Debug, Parser)]
pub struct RenameArgs {
    /// File id
    pub id: u64,

    /// New name without extension
    pub new_name: String,
}

// -- Delete --

#[derive(Debug, Parser)]
pub struct DeleteArgs {
    /// File id
    pub id: u64,
}

// -- Download --

#[derive(Debug, Parser)]
pub struct DownloadArgs {
    /// File id
    pub id: u64,

    /// Write to this path instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

// -- Tags --

#[derive(Debug, Parser)]
pub struct TagsArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Config --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Show every setting with its effective value and source
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Persist a setting in the catalog
    Set {
        /// Setting name: ocr_command, ocr_language, or doc_command
        key: String,
        /// New value
        value: String,
    },
    /// Clear a stored setting (revert to default)
    Clear {
        /// Setting name
        key: String,
    },
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "docshelf",
            &mut std::io::stdout(),
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parse_search_defaults() {
        let cli = Cli::parse_from(["docshelf", "search", "budget"]);
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.query, "budget");
                assert_eq!(args.count, 10);
                assert!(!args.json);
                assert!(!args.all);
                assert_eq!(args.limit(), Some(10));
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn search_all_removes_limit() {
        let cli = Cli::parse_from(["docshelf", "search", "x", "-n", "3", "--all"]);
        match cli.command {
            Command::Search(args) => assert_eq!(args.limit(), None),
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn upload_requires_a_path() {
        assert!(Cli::try_parse_from(["docshelf", "upload"]).is_err());
        let cli =
            Cli::parse_from(["docshelf", "upload", "a.pdf", "b.png", "-v"]);
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Command::Upload(args) => assert_eq!(args.paths.len(), 2),
            _ => panic!("expected upload command"),
        }
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        assert!(
            Cli::try_parse_from(["docshelf", "-q", "-v", "status"]).is_err()
        );
    }

    #[test]
    fn tag_help_says_tags_are_stems() {
        let cmd = Cli::command();
        for name in ["tags", "search"] {
            let about = cmd
                .find_subcommand(name)
                .and_then(|c| c.get_about())
                .map(|a| a.to_string())
                .unwrap_or_default();
            assert!(about.contains("stem"), "{name}: {about}");
        }
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
