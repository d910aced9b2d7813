use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console::style;
use ragdesk::commands::{build_index, query, resolve_tickets, show_config, show_status};
use ragdesk::config::{Config, get_config_dir};
use ragdesk::{RagError, Result};

#[derive(Parser)]
#[command(name = "ragdesk")]
#[command(about = "Retrieval-augmented answer engine with an automated support ticket resolver")]
#[command(version)]
struct Cli {
    /// Override the configuration directory
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the active configuration
    Config,
    /// Build or update the vector index from a document directory
    Build {
        /// Directory containing the documents to index
        docs_dir: PathBuf,
        /// Discard the existing index and rebuild from scratch
        #[arg(long)]
        rebuild: bool,
        /// Override the chunk window size in tokens
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Override the chunk overlap in tokens
        #[arg(long)]
        overlap: Option<usize>,
    },
    /// Answer a question from the indexed documents
    Query {
        /// The question to answer
        text: String,
        /// Override the number of chunks to retrieve
        #[arg(long)]
        top_k: Option<usize>,
        /// Override the minimum relevance score
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Resolve open support tickets using the indexed documents
    Resolve {
        /// Path to the ticket file (defaults to tickets.json in the config dir)
        #[arg(long)]
        tickets: Option<PathBuf>,
        /// Maximum number of tickets to process
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Show index and pipeline status
    Status,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", style("error:").red().bold(), e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => get_config_dir().map_err(|e| RagError::InvalidConfig(e.to_string()))?,
    };
    let mut config =
        Config::load(&config_dir).map_err(|e| RagError::InvalidConfig(e.to_string()))?;

    match cli.command {
        Commands::Config => {
            show_config(&config)?;
        }
        Commands::Build {
            docs_dir,
            rebuild,
            chunk_size,
            overlap,
        } => {
            if let Some(chunk_size) = chunk_size {
                config.chunking.max_tokens = chunk_size;
            }
            if let Some(overlap) = overlap {
                config.chunking.overlap_tokens = overlap;
            }
            config
                .validate()
                .map_err(|e| RagError::InvalidConfig(e.to_string()))?;

            build_index(&config, &docs_dir, rebuild).await?;
        }
        Commands::Query {
            text,
            top_k,
            threshold,
        } => {
            if let Some(top_k) = top_k {
                config.retrieval.top_k = top_k;
            }
            if let Some(threshold) = threshold {
                config.retrieval.score_threshold = threshold;
            }
            config
                .validate()
                .map_err(|e| RagError::InvalidConfig(e.to_string()))?;

            query(&config, &text).await?;
        }
        Commands::Resolve { tickets, limit } => {
            resolve_tickets(&config, tickets, limit).await?;
        }
        Commands::Status => {
            show_status(&config)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn cli_parsing() {
        let cli = Cli::try_parse_from(["ragdesk", "status"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            matches!(parsed.command, Commands::Status);
        }
    }

    #[test]
    fn build_command_with_flags() {
        let cli = Cli::try_parse_from([
            "ragdesk",
            "build",
            "./docs",
            "--rebuild",
            "--chunk-size",
            "128",
            "--overlap",
            "16",
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Build {
                docs_dir,
                rebuild,
                chunk_size,
                overlap,
            } = parsed.command
            {
                assert_eq!(docs_dir, PathBuf::from("./docs"));
                assert!(rebuild);
                assert_eq!(chunk_size, Some(128));
                assert_eq!(overlap, Some(16));
            }
        }
    }

    #[test]
    fn query_command_with_overrides() {
        let cli = Cli::try_parse_from([
            "ragdesk",
            "query",
            "is a cracked screen covered?",
            "--top-k",
            "3",
            "--threshold",
            "0.5",
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Query {
                text,
                top_k,
                threshold,
            } = parsed.command
            {
                assert_eq!(text, "is a cracked screen covered?");
                assert_eq!(top_k, Some(3));
                assert_eq!(threshold, Some(0.5));
            }
        }
    }

    #[test]
    fn resolve_command_defaults() {
        let cli = Cli::try_parse_from(["ragdesk", "resolve"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Resolve { tickets, limit } = parsed.command {
                assert_eq!(tickets, None);
                assert_eq!(limit, 50);
            }
        }
    }

    #[test]
    fn config_dir_is_global() {
        let cli = Cli::try_parse_from(["ragdesk", "--config-dir", "/tmp/ragdesk", "status"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert_eq!(parsed.config_dir, Some(PathBuf::from("/tmp/ragdesk")));
        }
    }

    #[test]
    fn invalid_command() {
        let cli = Cli::try_parse_from(["ragdesk", "invalid"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        }
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["ragdesk", "--help"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        }
    }
}
