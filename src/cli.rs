use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use divine_dialogue::{
    indexer::DEFAULT_BATCH_SIZE,
    persona::Mentor,
    retriever::DEFAULT_K,
    settings::SettingKey,
};

#[derive(Debug, Parser)]
#[command(
    name = "divine-dialogue",
    about = "Ask Krishna, Buddha and Jesus, grounded in their scriptures"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override the embedding model ID or local model path
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load the scriptures and build the verse index
    Build(BuildArgs),
    /// Find verses from one mentor's scripture
    Search(SearchArgs),
    /// Ask all three mentors a question
    Ask(AskArgs),
    /// Ask one mentor a follow-up to a stored dialogue
    FollowUp(FollowUpArgs),
    /// Browse and export stored dialogues
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// Manage persisted settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show system status and statistics
    Status(StatusArgs),
    /// Start MCP server for AI agent integration
    Mcp,
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Build --

#[derive(Debug, Parser)]
pub struct BuildArgs {
    /// Directory holding the three scripture files (default: <data-dir>/corpus)
    #[arg(long)]
    pub corpus_dir: Option<PathBuf>,

    /// Bhagavad Gita verses JSON
    #[arg(long)]
    pub gita: Option<PathBuf>,

    /// Dhammapada JSON
    #[arg(long)]
    pub dhammapada: Option<PathBuf>,

    /// King James Bible JSON
    #[arg(long)]
    pub bible: Option<PathBuf>,

    /// Texts encoded per batch
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Also write the normalized records to this JSON file
    #[arg(long)]
    pub dump_records: Option<PathBuf>,

    /// Use the offline hashing embedder instead of the BERT model
    #[arg(long)]
    pub fake_embeddings: bool,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Whose scripture to search
    #[arg(short, long, value_enum)]
    pub mentor: Mentor,

    /// Number of verses to return
    #[arg(short = 'n', long, default_value_t = DEFAULT_K)]
    pub count: usize,

    /// Explain each verse in one line (calls the LLM)
    #[arg(long)]
    pub gloss: bool,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Ask --

#[derive(Debug, Parser)]
pub struct AskArgs {
    /// The question for the mentors
    pub question: String,

    /// A little about yourself, used to personalize the synthesis
    #[arg(short, long)]
    pub background: Option<String>,

    /// Output the dialogue as JSON
    #[arg(long)]
    pub json: bool,

    /// Also write a plain-text transcript to this file
    #[arg(long)]
    pub export: Option<PathBuf>,

    /// Do not store the dialogue in the history log
    #[arg(long)]
    pub no_save: bool,
}

// -- Follow-up --

#[derive(Debug, Parser)]
pub struct FollowUpArgs {
    /// The follow-up question
    pub question: String,

    /// The mentor to ask
    #[arg(short, long, value_enum)]
    pub mentor: Mentor,

    /// Stored dialogue to continue (default: the latest)
    #[arg(long)]
    pub dialogue: Option<u64>,

    /// Output the answer as JSON
    #[arg(long)]
    pub json: bool,
}

// -- History subcommands --

#[derive(Debug, Subcommand)]
pub enum HistoryAction {
    /// List stored dialogues
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print one stored dialogue
    Show {
        /// Dialogue id
        id: u64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write a stored dialogue as a plain-text transcript
    Export {
        /// Dialogue id
        id: u64,
        /// Output file
        path: PathBuf,
    },
    /// Delete every stored dialogue
    Clear,
}

// -- Config subcommands --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Show every setting and where its value comes from
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Persist a setting in config.redb
    Set {
        #[arg(value_enum)]
        key: SettingKey,
        value: String,
    },
    /// Clear a stored setting (revert to env or default)
    Clear {
        #[arg(value_enum)]
        key: SettingKey,
    },
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
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
            "divine-dialogue",
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
        let cli = Cli::parse_from(["divine-dialogue", "search", "inner peace", "-m", "buddha"]);
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.query, "inner peace");
                assert_eq!(args.mentor, Mentor::Buddha);
                assert_eq!(args.count, 3);
                assert!(!args.gloss);
                assert!(!args.json);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn parse_ask_with_background() {
        let cli = Cli::parse_from([
            "divine-dialogue",
            "-q",
            "ask",
            "How do I forgive?",
            "-b",
            "nurse, two kids",
            "--no-save",
        ]);
        assert!(cli.quiet);
        match cli.command {
            Command::Ask(args) => {
                assert_eq!(args.background.as_deref(), Some("nurse, two kids"));
                assert!(args.no_save);
                assert!(args.export.is_none());
            }
            _ => panic!("expected ask command"),
        }
    }

    #[test]
    fn parse_build_defaults() {
        let cli = Cli::parse_from(["divine-dialogue", "build", "--fake-embeddings"]);
        match cli.command {
            Command::Build(args) => {
                assert_eq!(args.batch_size, DEFAULT_BATCH_SIZE);
                assert!(args.fake_embeddings);
                assert!(args.corpus_dir.is_none());
            }
            _ => panic!("expected build command"),
        }
    }

    #[test]
    fn parse_config_set_key() {
        let cli = Cli::parse_from(["divine-dialogue", "config", "set", "llm_model", "mixtral"]);
        match cli.command {
            Command::Config {
                action: ConfigAction::Set { key, value },
            } => {
                assert_eq!(key, SettingKey::LlmModel);
                assert_eq!(value, "mixtral");
            }
            _ => panic!("expected config set"),
        }
    }

    #[test]
    fn follow_up_requires_mentor() {
        assert!(Cli::try_parse_from(["divine-dialogue", "follow-up", "and then?"]).is_err());
    }
}
