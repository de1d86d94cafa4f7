use anyhow::{Context, Result};
use chatsift_core::{
    mask_credential, CardRenderer, CategoryFilter, ChatSelectors, ChatsiftConfig,
    CredentialStore, DispatchStats, Feed, FileCredentialStore, GeminiClassifier, MemoryDocument,
    MemoryNode, Pipeline, PipelineEvent, PipelineHandle,
};
use colored::Colorize;
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::render::{format_status, TerminalCardRenderer};

const DEFAULT_AUTHOR: &str = "viewer";
const DRAIN_CHECK_INTERVAL: Duration = Duration::from_millis(250);
const LISTENER_CHECK_INTERVAL: Duration = Duration::from_millis(20);

/// A line read from stdin while watching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputLine {
    Chat { author: String, text: String },
    Reload,
    Close,
    Stop,
    Start,
    Status,
    Filter(CategoryFilter),
    SetKey(String),
    Blank,
}

/// Lines starting with `::` are control commands; anything else is a chat
/// line `author: text`. A line without an author is attributed to a
/// default viewer.
pub fn parse_input(line: &str) -> Result<InputLine, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(InputLine::Blank);
    }

    if let Some(command) = line.strip_prefix("::") {
        let (name, arg) = match command.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (command, ""),
        };
        return match name {
            "reload" => Ok(InputLine::Reload),
            "close" => Ok(InputLine::Close),
            "stop" => Ok(InputLine::Stop),
            "start" => Ok(InputLine::Start),
            "status" => Ok(InputLine::Status),
            "filter" if arg.is_empty() => Err("usage: ::filter all|question|note".to_string()),
            "filter" => arg.parse().map(InputLine::Filter),
            "key" if arg.is_empty() => Err("usage: ::key <API_KEY>".to_string()),
            "key" => Ok(InputLine::SetKey(arg.to_string())),
            other => Err(format!("unknown command '::{}'", other)),
        };
    }

    match line.split_once(':') {
        Some((author, text)) if !author.trim().is_empty() && !author.contains(' ') => {
            Ok(InputLine::Chat {
                author: author.trim().to_string(),
                text: text.trim().to_string(),
            })
        }
        _ => Ok(InputLine::Chat {
            author: DEFAULT_AUTHOR.to_string(),
            text: line.to_string(),
        }),
    }
}

/// Reads stdin on a plain thread: a blocking read there cannot hold up
/// runtime shutdown.
fn spawn_stdin_reader() -> mpsc::Receiver<std::io::Result<String>> {
    let (tx, rx) = mpsc::channel(64);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

struct Session {
    document: Arc<MemoryDocument>,
    credentials: Arc<FileCredentialStore>,
    selectors: ChatSelectors,
    handle: PipelineHandle,
    feed: Feed,
}

impl Session {
    async fn handle_input(&mut self, input: InputLine) -> Result<()> {
        match input {
            InputLine::Blank => {}
            InputLine::Chat { author, text } => {
                let node = MemoryNode::chat_message(&self.selectors, &author, &text, None);
                if !self.document.append_nodes(vec![node.into_ref()]) {
                    println!(
                        "{} {}",
                        "!".yellow(),
                        "No chat container; line dropped (use ::reload)".yellow()
                    );
                }
            }
            InputLine::Reload => {
                let id = self.document.mount_container(self.selectors.container.clone());
                debug!(container = %id, "Mounted chat container");
            }
            InputLine::Close => {
                if self.document.remove_container().is_none() {
                    println!("{} No chat container to close", "!".yellow());
                }
            }
            InputLine::Stop => match self.handle.stop().await {
                Ok(()) => println!("{} Monitoring paused", "→".blue()),
                Err(e) => println!("{} {}", "!".yellow(), e),
            },
            InputLine::Start => match self.handle.start().await {
                Ok(()) => {
                    self.feed.clear();
                    println!("{} Monitoring resumed, feed cleared", "→".blue());
                }
                Err(e) => println!("{} {}", "!".yellow(), e),
            },
            InputLine::Status => {
                let snapshot = self.handle.snapshot().await?;
                println!(
                    "{} monitoring: {}, buffered: {}, in flight: {}, delivered: {}, failures: {}",
                    "→".blue(),
                    if snapshot.monitoring {
                        "on".green()
                    } else {
                        "off".yellow()
                    },
                    snapshot.buffered(),
                    snapshot.in_flight,
                    snapshot.stats.items_delivered,
                    snapshot.stats.failures
                );
            }
            InputLine::SetKey(key) => {
                self.credentials.set(Some(key.clone()))?;
                println!(
                    "{} API key saved ({})",
                    "✓".green().bold(),
                    mask_credential(&key)
                );
            }
            InputLine::Filter(filter) => {
                let visible = self.feed.set_filter(filter);
                println!(
                    "{} Filter: {} ({} of {} shown)",
                    "→".blue(),
                    filter.to_string().cyan(),
                    visible,
                    self.feed.len()
                );
                let mut cards = self.feed.render_visible(&TerminalCardRenderer);
                cards.reverse();
                for card in cards {
                    println!("  {}", card);
                }
            }
        }
        Ok(())
    }

    fn handle_event(&mut self, event: PipelineEvent) {
        render_event(&mut self.feed, event);
    }

    async fn is_drained(&self) -> Result<bool> {
        let snapshot = self.handle.snapshot().await?;
        Ok(snapshot.buffered() == 0 && snapshot.in_flight == 0)
    }
}

pub async fn cmd_watch(config: ChatsiftConfig, filter: CategoryFilter) -> Result<()> {
    let credentials = Arc::new(
        FileCredentialStore::open_default()
            .context("Failed to open settings")?
            .with_env_fallback(),
    );
    if credentials.get().is_none() {
        println!(
            "{} {}",
            "!".yellow(),
            "No API key saved. Messages will wait until one is set with '::key <API_KEY>'.".yellow()
        );
    }

    let selectors = config.watcher.selectors.clone();
    let connect_timeout = config.watcher.connect_timeout();
    let document = Arc::new(MemoryDocument::new());
    document.mount_container(selectors.container.clone());

    let classifier = GeminiClassifier::new(config.classifier.clone(), credentials.clone())?;

    println!("{}", "chatsift watch".cyan().bold());
    println!("{}", "═".repeat(40).dimmed());
    println!("  {:<15} {}", "Model:".bold(), config.classifier.model);
    println!("  {:<15} {}", "Filter:".bold(), filter);
    println!(
        "  {:<15} {}",
        "Controls:".bold(),
        "::filter <all|question|note>  ::key <KEY>  ::reload  ::close  ::stop  ::start  ::status"
            .dimmed()
    );
    println!();

    let handle = Pipeline::new(
        config,
        document.clone(),
        Arc::new(classifier),
        credentials.clone(),
    )
    .spawn();
    let mut events = handle.subscribe();

    let mut session = Session {
        document,
        credentials,
        selectors,
        handle,
        feed: Feed::new(filter),
    };

    // Chat lines appended before the watcher attaches would have no listener.
    if !wait_for_listener(&session.document, connect_timeout).await {
        warn!("Watcher did not attach in time; early lines may be dropped");
    }

    let mut lines = spawn_stdin_reader();
    let mut stdin_open = true;
    let mut drain_check = tokio::time::interval(DRAIN_CHECK_INTERVAL);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                println!();
                break;
            }
            line = lines.recv(), if stdin_open => {
                match line.transpose().context("Failed to read stdin")? {
                    Some(line) => match parse_input(&line) {
                        Ok(input) => session.handle_input(input).await?,
                        Err(message) => println!("{} {}", "✗".red(), message),
                    },
                    None => {
                        stdin_open = false;
                        drain_check.reset();
                        println!(
                            "{} {}",
                            "→".blue(),
                            "Input closed; waiting for pending messages (Ctrl-C to quit)".dimmed()
                        );
                    }
                }
            }
            event = events.recv() => match event {
                Ok(event) => session.handle_event(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Feed fell behind the pipeline");
                }
                Err(RecvError::Closed) => break,
            },
            _ = drain_check.tick(), if !stdin_open => {
                if session.is_drained().await? {
                    break;
                }
            }
        }
    }

    let Session { handle, mut feed, .. } = session;
    let stats = handle.shutdown().await?;
    while let Ok(event) = events.try_recv() {
        render_event(&mut feed, event);
    }
    print_summary(&stats, &feed);
    Ok(())
}

fn render_event(feed: &mut Feed, event: PipelineEvent) {
    match &event {
        PipelineEvent::Status(notice) => println!("{}", format_status(notice)),
        PipelineEvent::Results(_) => {
            let renderer = TerminalCardRenderer;
            let inserted = feed.apply_event(&event);
            // Feed order is newest first; print in arrival order.
            for entry in inserted.into_iter().rev().filter(|e| e.visible) {
                println!("{}", renderer.render(entry));
            }
        }
    }
}

/// Waits until the watcher has a listener on the container, up to `limit`.
async fn wait_for_listener(document: &MemoryDocument, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while document.observer_count() == 0 {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(LISTENER_CHECK_INTERVAL).await;
    }
    true
}

fn print_summary(stats: &DispatchStats, feed: &Feed) {
    println!("{}", "Session Summary".cyan().bold());
    println!("{}", "═".repeat(40).dimmed());
    println!("  {:<20} {}", "Batches delivered:".bold(), stats.batches_delivered);
    println!("  {:<20} {}", "Messages shown:".bold(), stats.items_delivered);
    println!("  {:<20} {}", "Empty batches:".bold(), stats.empty_batches);
    println!("  {:<20} {}", "Failed batches:".bold(), stats.failures);
    println!("  {:<20} {}", "Re-queued messages:".bold(), stats.requeued_messages);
    println!("  {:<20} {}", "Feed entries:".bold(), feed.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsift_core::Category;

    #[test]
    fn test_parse_chat_line() {
        assert_eq!(
            parse_input("ana: how do lifetimes work?").unwrap(),
            InputLine::Chat {
                author: "ana".to_string(),
                text: "how do lifetimes work?".to_string()
            }
        );
    }

    #[test]
    fn test_parse_line_without_author() {
        match parse_input("see you at 10: 30 then").unwrap() {
            InputLine::Chat { author, text } => {
                assert_eq!(author, DEFAULT_AUTHOR);
                assert_eq!(text, "see you at 10: 30 then");
            }
            other => panic!("unexpected input: {:?}", other),
        }
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_input("::reload").unwrap(), InputLine::Reload);
        assert_eq!(parse_input("  ::close ").unwrap(), InputLine::Close);
        assert_eq!(parse_input("::stop").unwrap(), InputLine::Stop);
        assert_eq!(parse_input("::start").unwrap(), InputLine::Start);
        assert_eq!(parse_input("::status").unwrap(), InputLine::Status);
        assert_eq!(
            parse_input("::filter question").unwrap(),
            InputLine::Filter(CategoryFilter::Only(Category::Question))
        );
        assert_eq!(
            parse_input("::filter ALL").unwrap(),
            InputLine::Filter(CategoryFilter::All)
        );
        assert_eq!(
            parse_input("::key  AIza-test ").unwrap(),
            InputLine::SetKey("AIza-test".to_string())
        );
        assert_eq!(parse_input("   ").unwrap(), InputLine::Blank);
    }

    #[test]
    fn test_parse_bad_commands() {
        assert!(parse_input("::filter").is_err());
        assert!(parse_input("::filter spam").is_err());
        assert!(parse_input("::key").is_err());
        assert!(parse_input("::rewind").is_err());
    }
}
