use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add a note
    Add {
        /// Note content
        content: String,

        /// Also extract and embed concepts for the note
        #[clap(long, default_value = "false")]
        enrich: bool,
    },

    /// Remove a note
    Remove {
        /// Note id
        id: String,
    },

    /// Semantic search over notes
    Search {
        /// Search query
        query: String,

        /// Maximum results
        #[clap(short, long, default_value = "10")]
        limit: usize,

        /// Minimum similarity score (config default when omitted)
        #[clap(short, long)]
        threshold: Option<f32>,
    },

    /// Propose categories for uncategorized notes
    Suggest {
        /// Also propose sub-categories inside each proposal
        #[clap(long, default_value = "false")]
        hierarchical: bool,

        /// Target cluster count (config default when omitted)
        #[clap(short = 'k', long)]
        clusters: Option<usize>,

        /// Minimum notes per proposal (config default when omitted)
        #[clap(long)]
        min_size: Option<usize>,

        /// Create categories from the proposals, asking per proposal
        #[clap(long, default_value = "false")]
        apply: bool,
    },

    /// Find the best existing category for a note
    Assign {
        /// Note id
        id: String,

        /// Move the note into the matched category
        #[clap(long, default_value = "false")]
        apply: bool,
    },

    /// Extract and embed concepts for a note
    Enrich {
        /// Note id
        id: String,
    },

    /// Re-embed all note content with the configured model
    Reindex,

    /// Show collection counts and service state
    Status,
}
