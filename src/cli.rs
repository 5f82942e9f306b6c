use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "docvault",
    version,
    about = "Employee document archive with keyword extraction and full-text search"
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
    /// Store, analyze and index a file or every supported file in a directory
    Ingest(IngestArgs),
    /// Print the keywords extracted from a text file (or stdin)
    Keywords(KeywordsArgs),
    /// Search indexed documents
    Search(SearchArgs),
    /// Complete a partial title, phrase or keyword
    Suggest(SuggestArgs),
    /// Find documents similar to a given one
    Similar(SimilarArgs),
    /// Show a document's metadata
    Get(IdArgs),
    /// Print the location of a document's file
    Resolve(IdArgs),
    /// Delete a document, its file and its index entry
    Delete(IdArgs),
    /// Send a document to the index again
    Reindex(IdArgs),
    /// List the most recently uploaded documents
    Recent(RecentArgs),
    /// Show repository statistics
    Stats(JsonArgs),
    /// Inspect or create the search index
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },
    /// Read or change persisted settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Ingest --

#[derive(Debug, Parser)]
pub struct IngestArgs {
    /// File or directory to ingest
    pub path: PathBuf,

    /// UUID of the employee the documents belong to
    #[arg(long)]
    pub employee: String,

    /// Employee display name
    #[arg(long)]
    pub employee_name: Option<String>,

    /// Employee national id, used in stored file names
    #[arg(long)]
    pub cedula: Option<String>,

    /// Document type (defaults to "documentos")
    #[arg(long = "type")]
    pub document_type: Option<String>,

    #[arg(long)]
    pub category: Option<String>,

    /// Comma-separated tags
    #[arg(long)]
    pub tags: Option<String>,

    /// Title (single files only; defaults to the file name)
    #[arg(long)]
    pub title: Option<String>,

    /// Description (single files only)
    #[arg(long)]
    pub description: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Keywords --

#[derive(Debug, Parser)]
pub struct KeywordsArgs {
    /// Text file to analyze; reads stdin when omitted or "-"
    pub file: Option<PathBuf>,

    /// Show scores
    #[arg(long)]
    pub scores: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// Free text matched against title, content, keywords and file name
    pub query: Option<String>,

    /// Text every result's content must match
    #[arg(long)]
    pub content: Option<String>,

    /// Exact keyword (repeatable)
    #[arg(short = 'k', long = "keyword")]
    pub keywords: Vec<String>,

    #[arg(long)]
    pub category: Option<String>,

    #[arg(long = "type")]
    pub document_type: Option<String>,

    /// Employee UUID
    #[arg(long)]
    pub employee: Option<String>,

    /// Mimetype or extension (e.g. pdf)
    #[arg(long)]
    pub file_type: Option<String>,

    /// Tag; documents with any of the given tags match (repeatable)
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    #[arg(long)]
    pub year: Option<i32>,

    /// Earliest upload date (YYYY-MM-DD or RFC 3339)
    #[arg(long)]
    pub date_from: Option<String>,

    /// Latest upload date (YYYY-MM-DD or RFC 3339)
    #[arg(long)]
    pub date_to: Option<String>,

    /// Number of results to return
    #[arg(short = 'n', long, default_value = "10")]
    pub size: usize,

    /// Number of results to skip
    #[arg(long, default_value = "0")]
    pub from: usize,

    /// relevance, date, size or filename
    #[arg(long, default_value = "relevance")]
    pub sort: String,

    /// Sort ascending instead of descending
    #[arg(long)]
    pub asc: bool,

    /// Tolerate typos in the free text
    #[arg(long)]
    pub fuzzy: bool,

    /// Double the weight of the free-text match
    #[arg(long)]
    pub boost: bool,

    /// Include highlighted fragments
    #[arg(long)]
    pub highlight: bool,

    /// Print facet counts
    #[arg(long)]
    pub facets: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Suggest --

#[derive(Debug, Parser)]
pub struct SuggestArgs {
    /// Partial text to complete
    pub text: String,

    /// title, content or keywords
    #[arg(short, long, default_value = "title")]
    pub field: String,

    #[arg(short = 'n', long, default_value = "5")]
    pub size: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Similar --

#[derive(Debug, Parser)]
pub struct SimilarArgs {
    /// Reference document id
    pub id: String,

    /// Minimum score for a match
    #[arg(long, default_value = "0.5")]
    pub min_score: f32,

    #[arg(short = 'n', long, default_value = "5")]
    pub size: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct IdArgs {
    /// Document id (UUID)
    pub id: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct RecentArgs {
    #[arg(short = 'n', long, default_value = "10")]
    pub limit: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct JsonArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Index --

#[derive(Debug, Subcommand)]
pub enum IndexAction {
    /// Check the connection and show the document count
    Status(JsonArgs),
    /// Create the index with its field mapping if it does not exist
    Create,
}

// -- Config --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the value of a setting
    Get { key: String },
    /// Persist a setting
    Set { key: String, value: String },
    /// Remove a setting, reverting to its default
    Unset { key: String },
    /// List the effective settings
    List(JsonArgs),
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
            "docvault",
            &mut std::io::stdout(),
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn search_defaults() {
        let cli = Cli::parse_from(["docvault", "search"]);
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.query, None);
                assert_eq!(args.size, 10);
                assert_eq!(args.from, 0);
                assert_eq!(args.sort, "relevance");
                assert!(!args.asc);
                assert!(args.keywords.is_empty());
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn repeated_filters() {
        let cli = Cli::parse_from([
            "docvault", "search", "contrato", "-k", "laboral", "-k", "indefinido", "--tag", "a",
            "--type", "contratos",
        ]);
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.keywords, ["laboral", "indefinido"]);
                assert_eq!(args.tags, ["a"]);
                assert_eq!(args.document_type.as_deref(), Some("contratos"));
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn similar_defaults() {
        let cli = Cli::parse_from(["docvault", "similar", "x"]);
        match cli.command {
            Command::Similar(args) => {
                assert_eq!(args.min_score, 0.5);
                assert_eq!(args.size, 5);
            }
            _ => panic!("expected similar command"),
        }
    }

    #[test]
    fn ingest_requires_employee() {
        assert!(Cli::try_parse_from(["docvault", "ingest", "a.pdf"]).is_err());
        let cli =
            Cli::try_parse_from(["docvault", "-v", "ingest", "a.pdf", "--employee", "e"]).unwrap();
        assert_eq!(cli.verbose, 1);
    }

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }
}
