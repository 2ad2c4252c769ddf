use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::info;

use classhub_chat::config::ClientConfig;
use classhub_chat::conversation::ConversationSnapshot;
use classhub_chat::rest::RestClient;
use classhub_chat::view::{ConversationView, ViewOptions};
use classhub_transport::{ChatTransport, ConnectionManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr; stdout carries the conversation.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "classhub=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let conversation_id = std::env::args()
        .nth(1)
        .context("usage: classhub-chat <conversation-id>")?;

    let config = ClientConfig::from_env()?;
    let token = config.token.clone().context("CLASSHUB_TOKEN is not set")?;

    let manager = ConnectionManager::new(config.transport_config());
    let transport: Arc<dyn ChatTransport> = Arc::new(manager.clone());
    let api = Arc::new(RestClient::new(config.api_url.clone(), token.clone()));

    let view = ConversationView::open(
        transport,
        api,
        ViewOptions {
            conversation_id,
            local_user: config.user.clone(),
            token,
            typing_idle: config.typing_idle,
        },
    );
    info!("Chatting in {} as {}", view.conversation_id(), config.user.id);

    let printer = tokio::spawn(print_updates(view.subscribe()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let command = line.trim().to_string();
                match command.as_str() {
                    "/quit" => break,
                    "/hide" => view.set_visible(false),
                    "/show" => view.set_visible(true),
                    _ => {
                        view.input(line.clone());
                        view.send(line);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let last = view.close().await;
    manager.shutdown().await;
    let _ = printer.await;

    info!(
        "Closed {} with {} messages",
        last.conversation_id,
        last.messages.len()
    );
    Ok(())
}

/// Print confirmed messages once each, plus typing and connection changes.
async fn print_updates(mut state: watch::Receiver<ConversationSnapshot>) {
    let mut shown = HashSet::new();
    let mut peer_typing = false;
    let mut connection_error = false;

    loop {
        {
            let snapshot = state.borrow_and_update();
            for msg in snapshot.messages.iter().filter(|m| !m.is_optimistic()) {
                if !shown.insert(msg.id.to_string()) {
                    continue;
                }
                let who = if msg.is_local { "you" } else { msg.sender.name.as_str() };
                println!("[{}] {}: {}", msg.created_at.format("%H:%M"), who, msg.content);
            }

            if snapshot.peer_typing != peer_typing {
                peer_typing = snapshot.peer_typing;
                if peer_typing {
                    println!("(typing)");
                }
            }
            if snapshot.connection_error != connection_error {
                connection_error = snapshot.connection_error;
                println!(
                    "{}",
                    if connection_error { "(offline)" } else { "(online)" }
                );
            }
        }

        if state.changed().await.is_err() {
            break;
        }
    }
}
