#![allow(clippy::needless_borrows_for_generic_args, clippy::useless_format)]

use chatsift_core::{ChatsiftConfig, ChatsiftError, CliErrorDisplay, LoggingConfig};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod render;

use commands::{
    cmd_analyze, cmd_classify, cmd_watch, handle_config_command, ConfigCommand, FilterArg, OutputFormat,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const NAME: &str = env!("CARGO_PKG_NAME");

#[derive(Parser)]
#[command(name = "chatsift")]
#[command(author)]
#[command(version = VERSION)]
#[command(about = "chatsift - Live chat triage with a language model")]
#[command(long_about = r#"
chatsift watches a live chat, batches new messages, asks a language model to
label each one as a QUESTION, a NOTE or NOISE, and shows the useful ones in a
filterable feed.

Use 'chatsift config set-key <KEY>' to store a Gemini API key, then pipe chat
lines of the form 'author: text' into 'chatsift watch'. 'chatsift analyze'
turns a video transcript into a summary, a timestamped outline and notes.
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Watch chat lines from stdin and show the classified feed")]
    Watch {
        #[arg(short, long, value_enum, default_value = "all", help = "Category to show")]
        filter: FilterArg,
    },

    #[command(about = "Classify a JSON array of chat messages once")]
    Classify {
        #[arg(help = "Path to a JSON file, or '-' for stdin")]
        input: PathBuf,

        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    #[command(about = "Summarize a video transcript with a timestamped outline and notes")]
    Analyze {
        #[arg(help = "Path to a transcript of '[MM:SS] text' lines, or '-' for stdin")]
        input: PathBuf,

        #[arg(long, help = "Video URL used to build seek links for the outline")]
        video_url: Option<String>,

        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    #[command(about = "Show configuration and manage the API key")]
    Config {
        #[command(subcommand)]
        action: Option<ConfigCommand>,
    },

    #[command(about = "Show version information")]
    Version {
        #[arg(short, long)]
        detailed: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match ChatsiftConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(cli.verbose, &config.logging);

    match run(cli, config).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<ChatsiftError>() {
                Some(err) => eprint!("{}: {}", "Error".red().bold(), CliErrorDisplay::new(err)),
                None => eprintln!("{}: {:#}", "Error".red().bold(), e),
            }
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool, logging: &LoggingConfig) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    let registry = tracing_subscriber::registry().with(filter);

    if logging.json_format {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn run(cli: Cli, config: ChatsiftConfig) -> anyhow::Result<()> {
    match cli.command {
        Commands::Watch { filter } => cmd_watch(config, filter.into()).await,
        Commands::Classify { input, format } => cmd_classify(config, &input, format).await,
        Commands::Analyze {
            input,
            video_url,
            format,
        } => cmd_analyze(config, &input, video_url, format).await,
        Commands::Config { action } => handle_config_command(action, &config),
        Commands::Version { detailed } => cmd_version(detailed),
    }
}

fn cmd_version(detailed: bool) -> anyhow::Result<()> {
    if detailed {
        println!("{}", "chatsift Version Information".cyan().bold());
        println!("{}", "═".repeat(40).dimmed());
        println!("  {:<15} {}", "Version:".bold(), VERSION);
        println!("  {:<15} {}", "Name:".bold(), NAME);
        println!("  {:<15} {}", "Core:".bold(), chatsift_core::VERSION);
        println!("  {:<15} Apache-2.0", "License:".bold());
        println!();
        println!("  {}", "Categories:".bold());
        println!("    ? QUESTION");
        println!("    ✎ NOTE");
        println!("    · NOISE (never shown)");
        println!();
        println!("  {}", "Build Information:".bold());
        println!("    Rust Edition: 2021");
        #[cfg(debug_assertions)]
        println!("    Build:        Debug");
        #[cfg(not(debug_assertions))]
        println!("    Build:        Release");
    } else {
        println!("chatsift {}", VERSION);
    }

    Ok(())
}
