use crate::commands;
use crate::config::Config;
use crate::log_debug;
use crate::ui;
use anyhow::Context;
use clap::builder::{Styles, styling::AnsiColor};
use clap::{Args, Parser, Subcommand, crate_version};
use std::path::PathBuf;

const LOG_FILE: &str = "procurement-ai-debug.log";

/// CLI structure defining the available commands and global arguments
#[derive(Parser, Debug)]
#[command(
    author,
    version = crate_version!(),
    about = "procurement-ai: LLM analysis of public procurement tenders",
    long_about = "Filters tenders for relevance, rates promising ones on six dimensions and drafts bid documents, optionally grounded in a knowledge base of past bids.",
    disable_version_flag = true,
    styles = get_styles(),
)]
pub struct Cli {
    /// Subcommands available for the CLI
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to an alternative configuration file
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory of the persistent knowledge base (overrides `rag.knowledge_base_path`)
    #[arg(long = "kb-path", global = true, value_name = "DIR")]
    pub kb_path: Option<PathBuf>,

    /// Log debug messages to a file
    #[arg(short = 'l', long = "log", global = true)]
    pub log: bool,

    /// Specify a custom log file path
    #[arg(long = "log-file", global = true)]
    pub log_file: Option<String>,

    /// Suppress non-essential output (spinners, progress, banners)
    #[arg(short = 'q', long = "quiet", global = true)]
    pub quiet: bool,

    /// Display the version
    #[arg(short = 'v', long = "version", global = true)]
    pub version: bool,
}

/// Enumeration of available subcommands
#[derive(Subcommand, Debug)]
#[command(subcommand_negates_reqs = true)]
#[command(subcommand_precedence_over_arg = true)]
pub enum Commands {
    /// Run tenders through the filter, rating and generation stages
    #[command(
        about = "Analyze one tender or a JSON array of tenders",
        long_about = "Analyze a tender (JSON object) or a batch of tenders (JSON array). Relevant, high-scoring tenders get a generated bid document."
    )]
    Analyze {
        /// JSON file containing a tender or an array of tenders
        file: PathBuf,

        /// Print the pipeline results as JSON
        #[arg(long)]
        json: bool,

        /// Generate bids without knowledge-base examples
        #[arg(long)]
        no_rag: bool,

        /// Override the pursue threshold (0-10)
        #[arg(long, value_name = "SCORE")]
        threshold: Option<f64>,
    },

    /// Score the pipeline against a labelled dataset
    #[command(
        about = "Evaluate the pipeline on a labelled dataset",
        long_about = "Run every tender of a labelled dataset (JSON array of {\"tender\": .., \"expected\": ..}) through the pipeline and report filter, category, rating and calibration metrics."
    )]
    Evaluate {
        /// JSON file with labelled tenders
        dataset: PathBuf,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Also write a Markdown report to this path
        #[arg(long, value_name = "PATH")]
        markdown: Option<PathBuf>,

        /// List the outcome of every case
        #[arg(short = 'd', long)]
        detailed: bool,

        /// Evaluate without knowledge-base examples
        #[arg(long)]
        no_rag: bool,
    },

    /// Manage the knowledge base of exemplar bids
    #[command(subcommand)]
    Kb(KbCommands),

    /// Show or persist the effective configuration
    #[command(
        about = "Show the effective configuration",
        long_about = "Show the configuration after file and environment overrides, with the API key masked. Use --save to write it to the config file."
    )]
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        save: bool,
    },
}

/// Knowledge base subcommands
#[derive(Subcommand, Debug)]
pub enum KbCommands {
    /// Add a single example document
    Add(KbAddArgs),

    /// Import examples from a JSON array
    Import {
        file: PathBuf,
    },

    /// Export all examples as a JSON array
    Export {
        file: PathBuf,
    },

    /// Show document counts per category
    Stats,

    /// Search for examples similar to a query
    Search {
        query: String,

        /// Number of results
        #[arg(short = 'n', long, default_value_t = 3)]
        limit: usize,

        /// Minimum similarity (defaults to `rag.min_similarity`)
        #[arg(short = 's', long)]
        min_similarity: Option<f64>,

        /// Restrict to one category
        #[arg(short = 'c', long)]
        category: Option<String>,

        /// Print the full content of each result
        #[arg(long)]
        show_content: bool,
    },

    /// List stored examples
    List {
        /// Include metadata and a content preview
        #[arg(short = 'v', long)]
        verbose: bool,
    },

    /// Delete every stored example
    Reset {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Args, Debug)]
pub struct KbAddArgs {
    #[arg(long)]
    pub title: String,

    /// Free-form category label, e.g. cybersecurity
    #[arg(long)]
    pub category: String,

    /// Document text, or @path to read it from a file
    #[arg(long)]
    pub content: String,

    /// Explicit document id (generated when omitted)
    #[arg(long)]
    pub id: Option<String>,

    /// Extra metadata as key=value (repeatable)
    #[arg(long = "meta", value_name = "KEY=VALUE")]
    pub meta: Vec<String>,
}

/// Define custom styles for Clap
fn get_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default().bold())
        .usage(AnsiColor::Cyan.on_default().bold())
        .literal(AnsiColor::Green.on_default().bold())
        .placeholder(AnsiColor::Yellow.on_default())
        .valid(AnsiColor::Blue.on_default().bold())
        .invalid(AnsiColor::Red.on_default().bold())
        .error(AnsiColor::Red.on_default().bold())
}

/// Parse the command-line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Main function to parse arguments and handle the command
pub async fn main() -> anyhow::Result<()> {
    let cli = parse_args();

    if cli.version {
        ui::print_version(crate_version!());
        return Ok(());
    }

    if cli.log {
        crate::logger::enable_logging();
        let log_file = cli.log_file.as_deref().unwrap_or(LOG_FILE);
        crate::logger::set_log_file(log_file)?;
    } else {
        crate::logger::disable_logging();
    }

    if cli.quiet {
        ui::set_quiet_mode(true);
    }

    let Some(command) = cli.command else {
        let _ = Cli::parse_from(["procurement-ai", "--help"]);
        return Ok(());
    };

    let config = load_config(cli.config.as_deref(), cli.kb_path)?;
    handle_command(command, config).await
}

/// File, then environment, then command-line overrides
fn load_config(path: Option<&std::path::Path>, kb_path: Option<PathBuf>) -> anyhow::Result<Config> {
    let mut config = match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    config
        .apply_env_overrides()
        .context("Invalid environment override")?;
    if kb_path.is_some() {
        config.rag.knowledge_base_path = kb_path;
    }
    config.validate()?;
    log_debug!("Effective configuration: {:?}", config.masked());
    Ok(config)
}

/// Handle the command based on parsed arguments
pub async fn handle_command(command: Commands, mut config: Config) -> anyhow::Result<()> {
    match command {
        Commands::Analyze {
            file,
            json,
            no_rag,
            threshold,
        } => {
            if let Some(threshold) = threshold {
                config.pipeline.pursue_threshold = threshold;
                config.validate()?;
            }
            if no_rag {
                config.rag.enabled = false;
            }
            commands::handle_analyze_command(&config, &file, json).await
        }
        Commands::Evaluate {
            dataset,
            json,
            markdown,
            detailed,
            no_rag,
        } => {
            if no_rag {
                config.rag.enabled = false;
            }
            let output = commands::EvaluateOutput {
                json,
                markdown,
                detailed,
            };
            commands::handle_evaluate_command(&config, &dataset, &output).await
        }
        Commands::Kb(kb) => handle_kb(kb, &config).await,
        Commands::Config { save } => commands::handle_config_command(&config, save),
    }
}

async fn handle_kb(command: KbCommands, config: &Config) -> anyhow::Result<()> {
    log_debug!("Handling 'kb' command: {:?}", command);
    match command {
        KbCommands::Add(args) => commands::handle_kb_add_command(config, args).await,
        KbCommands::Import { file } => commands::handle_kb_import_command(config, &file).await,
        KbCommands::Export { file } => commands::handle_kb_export_command(config, &file),
        KbCommands::Stats => commands::handle_kb_stats_command(config),
        KbCommands::Search {
            query,
            limit,
            min_similarity,
            category,
            show_content,
        } => {
            let min_similarity = min_similarity.unwrap_or(config.rag.min_similarity);
            commands::handle_kb_search_command(
                config,
                &query,
                limit,
                min_similarity,
                category.as_deref(),
                show_content,
            )
            .await
        }
        KbCommands::List { verbose } => commands::handle_kb_list_command(config, verbose),
        KbCommands::Reset { yes } => commands::handle_kb_reset_command(config, yes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_analyze_flags() {
        let cli = Cli::parse_from([
            "procurement-ai",
            "--quiet",
            "analyze",
            "tenders.json",
            "--json",
            "--threshold",
            "6.5",
        ]);
        assert!(cli.quiet);
        match cli.command {
            Some(Commands::Analyze {
                file,
                json,
                no_rag,
                threshold,
            }) => {
                assert_eq!(file, PathBuf::from("tenders.json"));
                assert!(json);
                assert!(!no_rag);
                assert_eq!(threshold, Some(6.5));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_evaluate_outputs() {
        let cli = Cli::parse_from([
            "procurement-ai",
            "evaluate",
            "dataset.json",
            "--markdown",
            "reports/eval.md",
            "-d",
        ]);
        match cli.command {
            Some(Commands::Evaluate {
                dataset,
                json,
                markdown,
                detailed,
                no_rag,
            }) => {
                assert_eq!(dataset, PathBuf::from("dataset.json"));
                assert!(!json);
                assert_eq!(markdown, Some(PathBuf::from("reports/eval.md")));
                assert!(detailed);
                assert!(!no_rag);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_kb_search_with_global_kb_path() {
        let cli = Cli::parse_from([
            "procurement-ai",
            "kb",
            "search",
            "penetration testing",
            "-n",
            "5",
            "-c",
            "cybersecurity",
            "--kb-path",
            "/tmp/kb",
        ]);
        assert_eq!(cli.kb_path, Some(PathBuf::from("/tmp/kb")));
        match cli.command {
            Some(Commands::Kb(KbCommands::Search {
                query,
                limit,
                category,
                min_similarity,
                ..
            })) => {
                assert_eq!(query, "penetration testing");
                assert_eq!(limit, 5);
                assert_eq!(category.as_deref(), Some("cybersecurity"));
                assert_eq!(min_similarity, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn kb_add_collects_repeated_metadata() {
        let cli = Cli::parse_from([
            "procurement-ai",
            "kb",
            "add",
            "--title",
            "SOC rollout",
            "--category",
            "cybersecurity",
            "--content",
            "@bid.md",
            "--meta",
            "year=2023",
            "--meta",
            "won=true",
        ]);
        match cli.command {
            Some(Commands::Kb(KbCommands::Add(args))) => {
                assert_eq!(args.meta, vec!["year=2023", "won=true"]);
                assert_eq!(args.content, "@bid.md");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
