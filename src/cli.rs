use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use appfront::job::{RefineFlags, RefreshKind};
use appfront::output::OutputFormat;

fn parse_refine(s: &str) -> Result<RefineFlags, String> {
    s.parse()
}

#[derive(Parser, Debug)]
#[command(
    name = "appfront",
    version,
    about = "Query and manage applications through pluggable software backends"
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Required data to refine on results, comma separated (e.g. icon,provenance)
    #[arg(long, value_parser = parse_refine, default_value = "icon")]
    pub refine: RefineFlags,

    /// Only use these plugins (repeatable)
    #[arg(long)]
    pub allow: Vec<String>,

    /// Never use these plugins (repeatable)
    #[arg(long)]
    pub deny: Vec<String>,

    /// Run the job this many times, logging each run's duration
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub repeat: u32,

    /// Abort on the first plugin failure instead of collecting warnings
    #[arg(long)]
    pub fail_fast: bool,

    /// Per-plugin timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Truncate list results
    #[arg(long)]
    pub max_results: Option<usize>,

    /// Settings file to use instead of the default location
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Debug logging to stderr
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List installed applications
    Installed,

    /// Search for applications
    Search {
        /// Search query
        query: String,
    },

    /// List available updates
    Updates,

    /// List distribution upgrades
    Upgrades,

    /// List software sources
    Sources,

    /// List popular applications
    Popular,

    /// List featured applications
    Featured,

    /// List application categories
    GetCategories,

    /// List applications in a category
    GetCategoryApps {
        /// Category id
        category: String,
    },

    /// Refine a single application and show it
    Refine {
        /// Unique id (origin/kind/name/arch/branch) or base id
        id: String,
    },

    /// Launch an application
    Launch {
        /// Unique id or base id
        id: String,
    },

    /// Install an application
    Install {
        /// Unique id or base id
        id: String,
    },

    /// Remove an application
    Remove {
        /// Unique id or base id
        id: String,
    },

    /// Update an application
    Update {
        /// Unique id or base id
        id: String,
    },

    /// Resolve a local file to an application
    FilenameToApp {
        path: PathBuf,
    },

    /// Resolve a URL (e.g. appstream:org.gnome.Maps) to an application
    UrlToApp {
        url: String,
    },

    /// Refresh plugin metadata and/or payloads
    Refresh {
        #[arg(value_enum, default_value = "metadata")]
        kind: RefreshArg,

        /// Skip plugins whose data is younger than this many seconds
        #[arg(long, default_value_t = 0)]
        cache_age: u64,
    },

    /// List plugins in run order
    Plugins,

    /// Generate shell completion script
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum RefreshArg {
    Metadata,
    Payload,
    All,
}

impl From<RefreshArg> for RefreshKind {
    fn from(arg: RefreshArg) -> Self {
        match arg {
            RefreshArg::Metadata => RefreshKind::Metadata,
            RefreshArg::Payload => RefreshKind::Payload,
            RefreshArg::All => RefreshKind::All,
        }
    }
}
