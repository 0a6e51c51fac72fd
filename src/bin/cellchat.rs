use anyhow::{Context, Result};
use cellchat::api::HttpBackend;
use cellchat::config::Config;
use cellchat::state::{ChatPanel, Message, PanelUpdate, TurnOutcome};
use cellchat::types::{ChatRequest, ConversationId, Role};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const CONVERSATION_ENV: &str = "CELLCHAT_CONVERSATION_ID";
const HELP: &str = "commands: /range <A1:B2> | /range | /stream on|off | /reload | /clear | /quit";

fn init_logging() {
    let filter = EnvFilter::try_from_env("CELLCHAT_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn conversation_from_args() -> Option<ConversationId> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--conversation" {
            return args.next().map(ConversationId::new);
        }
        if let Some(value) = arg.strip_prefix("--conversation=") {
            return Some(ConversationId::new(value));
        }
    }
    cellchat::util::env_non_empty(CONVERSATION_ENV).map(ConversationId::new)
}

fn print_message(message: &Message) {
    let speaker = match message.role {
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    match &message.context_range {
        Some(range) => println!("[{speaker} @ {range}] {}", message.content),
        None => println!("[{speaker}] {}", message.content),
    }
    for tool_call in message.tool_call_list() {
        println!("    - {}", tool_call.summary());
    }
}

/// Prints everything after the most recent user message.
fn print_reply(panel: &ChatPanel) {
    let messages = panel.messages();
    let start = messages
        .iter()
        .rposition(|message| message.role == Role::User)
        .map_or(0, |index| index + 1);
    messages[start..].iter().for_each(print_message);
}

fn spawn_update_printer(mut updates_rx: mpsc::UnboundedReceiver<PanelUpdate>) {
    tokio::spawn(async move {
        while let Some(update) = updates_rx.recv().await {
            match update {
                PanelUpdate::Notice(notice) => eprintln!("! {notice}"),
                PanelUpdate::ToolCallsChanged(Some(tool_calls)) => {
                    if let Some(latest) = tool_calls.last() {
                        eprintln!("  … {}", latest.summary());
                    }
                }
                PanelUpdate::TurnFinished { query } => {
                    tracing::debug!(query = %query, "turn finished");
                }
                _ => {}
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let config = Config::load()?;
    config.validate()?;

    let backend = Arc::new(HttpBackend::new(&config).context("failed to build HTTP backend")?);
    let (updates_tx, updates_rx) = mpsc::unbounded_channel();
    let mut panel = ChatPanel::new(backend, &config).with_updates(updates_tx);
    spawn_update_printer(updates_rx);

    panel.activate(conversation_from_args()).await?;
    panel.messages().iter().for_each(print_message);
    if panel.conversation_id().is_none() {
        eprintln!("no conversation selected; pass --conversation <id> or set {CONVERSATION_ENV}");
    }
    eprintln!("{HELP}");

    let mut selected_range: Option<String> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.split_once(' ').unwrap_or((line, "")) {
            ("/quit", _) => break,
            ("/help", _) => eprintln!("{HELP}"),
            ("/range", range) => {
                selected_range = Some(range.trim().to_string()).filter(|range| !range.is_empty());
                eprintln!("selection: {}", selected_range.as_deref().unwrap_or("none"));
            }
            ("/stream", flag) => match cellchat::util::parse_bool_str(flag.trim()) {
                Some(enabled) => panel.set_streaming_enabled(enabled),
                None => eprintln!("usage: /stream on|off"),
            },
            ("/reload", _) => match panel.reload_history().await {
                Ok(()) => panel.messages().iter().for_each(print_message),
                Err(error) => eprintln!("! {error}"),
            },
            ("/clear", _) => match panel.clear_history().await {
                Ok(()) => panel.messages().iter().for_each(print_message),
                // The failure was already reported as a notice.
                Err(cellchat::state::PanelError::Backend(_)) => {}
                Err(error) => eprintln!("! {error}"),
            },
            _ => {
                let mut request = ChatRequest::new(line);
                if let Some(range) = &selected_range {
                    request = request.with_selected_context(range.clone());
                }

                let cancel = CancellationToken::new();
                let interrupt = cancel.clone();
                let watcher = tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        interrupt.cancel();
                    }
                });

                let outcome = panel.send_message(request, Some(&cancel)).await;
                watcher.abort();
                match outcome {
                    Ok(TurnOutcome::Abandoned) => eprintln!("(stopped listening)"),
                    Ok(_) => print_reply(&panel),
                    Err(error) => eprintln!("! {error}"),
                }
            }
        }
    }

    Ok(())
}
