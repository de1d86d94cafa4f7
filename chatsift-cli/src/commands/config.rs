use anyhow::{Context, Result};
use chatsift_core::{
    get_config_paths, mask_credential, ChatsiftConfig, CredentialStore, FileCredentialStore,
};
use clap::Subcommand;
use colored::Colorize;

#[derive(Subcommand)]
pub enum ConfigCommand {
    #[command(about = "Show the effective configuration and API key status")]
    Show,

    #[command(about = "List the files configuration is read from")]
    Path,

    #[command(about = "Save the API key used for classification")]
    SetKey {
        #[arg(help = "Gemini API key")]
        key: String,
    },

    #[command(about = "Remove the saved API key")]
    ClearKey,
}

pub fn handle_config_command(action: Option<ConfigCommand>, config: &ChatsiftConfig) -> Result<()> {
    match action {
        Some(ConfigCommand::Show) | None => cmd_config_show(config),
        Some(ConfigCommand::Path) => cmd_config_path(),
        Some(ConfigCommand::SetKey { key }) => cmd_config_set_key(&key),
        Some(ConfigCommand::ClearKey) => cmd_config_clear_key(),
    }
}

fn open_store() -> Result<FileCredentialStore> {
    FileCredentialStore::open_default().context("Failed to open settings")
}

fn cmd_config_show(config: &ChatsiftConfig) -> Result<()> {
    let store = open_store()?;
    let saved = store.get();
    let settings_path = store.path().display().to_string();
    let effective = store.with_env_fallback().get();

    let key_line = match (&saved, &effective) {
        (Some(key), _) => format!("{} {}", mask_credential(key), "(saved)".dimmed()),
        (None, Some(key)) => format!("{} {}", mask_credential(key), "(environment)".dimmed()),
        (None, None) => "not set".red().to_string(),
    };

    println!("{}", "chatsift Configuration".cyan().bold());
    println!("{}", "═".repeat(40).dimmed());
    println!();

    println!("  {}", "Credentials".yellow().bold());
    println!("    {:<20} {}", "API key:", key_line);
    println!("    {:<20} {}", "Settings file:", settings_path);
    println!();

    let classifier = &config.classifier;
    println!("  {}", "Classifier".yellow().bold());
    println!("    {:<20} {}", "Endpoint:", classifier.base_url);
    println!("    {:<20} {}", "Model:", classifier.model);
    println!("    {:<20} {}", "Max text chars:", classifier.max_text_chars);
    println!("    {:<20} {}s", "Request timeout:", classifier.request_timeout_secs);
    let backoff: Vec<String> = classifier
        .retry_config()
        .schedule()
        .iter()
        .map(|d| format!("{}ms", d.as_millis()))
        .collect();
    println!(
        "    {:<20} {} ({})",
        "Attempts:",
        classifier.max_attempts,
        if backoff.is_empty() {
            "no backoff".to_string()
        } else {
            format!("backoff {}", backoff.join(", "))
        }
    );
    println!();

    let batcher = &config.batcher;
    println!("  {}", "Batcher".yellow().bold());
    println!("    {:<20} {}", "Flush threshold:", batcher.flush_threshold);
    println!("    {:<20} {}", "Batch size:", batcher.batch_size);
    println!("    {:<20} {}ms", "Debounce:", batcher.debounce_ms);
    println!();

    let watcher = &config.watcher;
    println!("  {}", "Watcher".yellow().bold());
    println!("    {:<20} {}ms", "Poll interval:", watcher.poll_interval_ms);
    println!("    {:<20} {}ms", "Connect timeout:", watcher.connect_timeout_ms);
    println!("    {:<20} {}", "Min message chars:", watcher.min_message_chars);
    println!("    {:<20} {}", "Container:", watcher.selectors.container);
    println!();

    println!("  {}", "Transcript analysis".yellow().bold());
    println!("    {:<20} {}", "Model:", config.analysis.model);
    println!("    {:<20} {}", "Max input chars:", config.analysis.max_input_chars);
    println!();

    println!("  {}", "Logging".yellow().bold());
    println!("    {:<20} {}", "Level:", config.log_level());
    println!("    {:<20} {}", "JSON format:", config.logging.json_format);

    Ok(())
}

fn cmd_config_path() -> Result<()> {
    println!("{}", "Configuration files (later entries win)".cyan().bold());
    for path in get_config_paths() {
        let marker = if path.exists() {
            "✓".green().bold()
        } else {
            "·".dimmed()
        };
        println!("  {} {}", marker, path.display());
    }
    println!();

    let store = open_store()?;
    println!("  {:<15} {}", "Settings:".bold(), store.path().display());
    Ok(())
}

fn cmd_config_set_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        anyhow::bail!("API key must not be empty");
    }

    let store = open_store()?;
    store.set(Some(key.to_string()))?;
    println!(
        "{} API key saved ({}) to {}",
        "✓".green().bold(),
        mask_credential(key.trim()),
        store.path().display()
    );
    Ok(())
}

fn cmd_config_clear_key() -> Result<()> {
    let store = open_store()?;
    if store.get().is_none() {
        println!("{} No API key was saved", "→".blue());
        return Ok(());
    }

    store.set(None)?;
    println!("{} API key removed", "✓".green().bold());
    Ok(())
}
