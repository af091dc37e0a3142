//! Command implementations.
//!
//! `send` is a thin client of the running server. `sessions` and `orphans` ask the server
//! when it is up and read the session records and tmux directly otherwise.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use uuid::Uuid;

use super::args::{Cli, Commands};
use crate::config::Config;
use crate::host::Tmux;
use crate::models::{InboundMessage, SessionId, SessionRecord};
use crate::server::{self, MessageResponse};
use crate::store::RecordDir;

// === Server Communication ===

/// Deliver a message to the server and wait for its reply.
async fn post_message(port: u16, message: &InboundMessage) -> Result<MessageResponse> {
    let url = format!("http://127.0.0.1:{port}/api/messages");
    let resp = reqwest::Client::new()
        .post(&url)
        .json(message)
        .send()
        .await
        .context("Failed to send message to server")?;

    if !resp.status().is_success() {
        bail!("Server returned {}", resp.status());
    }

    resp.json().await.context("Failed to parse response")
}

async fn get_json<T: serde::de::DeserializeOwned>(port: u16, path: &str) -> Result<T> {
    let url = format!("http://127.0.0.1:{port}{path}");
    let resp = reqwest::Client::new()
        .get(&url)
        .send()
        .await
        .with_context(|| format!("Failed to query {path}"))?;

    if !resp.status().is_success() {
        bail!("Server returned {}", resp.status());
    }

    resp.json().await.context("Failed to parse response")
}

// === Command Execution ===

pub async fn execute(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Commands::Serve { port } => {
            let port = port.unwrap_or(config.server.port);
            server::start_server(config, port).await
        }
        Commands::Send {
            session,
            topic,
            sender,
            message,
        } => {
            let text = message.join(" ");
            if text.trim().is_empty() {
                bail!("Message is required for send command");
            }
            send_message(text, sender, session, topic).await
        }
        Commands::Sessions => list_sessions(&config).await,
        Commands::Orphans => list_orphans(&config).await,
        Commands::Check => check(&config, cli.config.as_deref()).await,
    }
}

async fn send_message(
    text: String,
    sender: String,
    session: Option<String>,
    topic: Option<String>,
) -> Result<()> {
    let port = server::get_server_port()
        .context("termbot server is not running; start it with `termbot serve`")?;
    let message = InboundMessage {
        text,
        sender,
        session,
        topic,
        message_id: Some(Uuid::now_v7().to_string()),
    };

    let response = post_message(port, &message).await?;
    match response.reply {
        Some(reply) => println!("{reply}"),
        None => println!("(duplicate message ignored)"),
    }
    Ok(())
}

async fn list_sessions(config: &Config) -> Result<()> {
    let records: Vec<SessionRecord> = match server::get_server_port() {
        Some(port) => get_json(port, "/api/sessions").await?,
        None => RecordDir::new(config.sessions.base_dir())
            .load_all()
            .context("Failed to read session records")?
            .into_iter()
            .filter(|r| r.state.is_live())
            .collect(),
    };

    if records.is_empty() {
        println!("No sessions.");
        return Ok(());
    }

    println!(
        "{:<5} {:<20} {:<11} {:<17} {}",
        "ID", "NAME", "STATE", "LAST ACTIVE", "WORKING DIR"
    );
    println!("{}", "-".repeat(72));
    for record in records {
        let last_active = record
            .last_active_at
            .unwrap_or(record.created_at)
            .format("%Y-%m-%d %H:%M")
            .to_string();
        println!(
            "{:<5} {:<20} {:<11} {:<17} {}",
            record.id,
            record.name,
            record.state,
            last_active,
            record.working_directory.display()
        );
    }
    Ok(())
}

async fn list_orphans(config: &Config) -> Result<()> {
    let orphans: Vec<String> = match server::get_server_port() {
        Some(port) => get_json(port, "/api/orphans").await?,
        None => {
            let known: BTreeSet<SessionId> = RecordDir::new(config.sessions.base_dir())
                .load_all()
                .context("Failed to read session records")?
                .into_iter()
                .filter(|r| r.state.is_live())
                .map(|r| r.id)
                .collect();
            let tmux = Tmux::new(&config.sessions.tmux_binary, &config.sessions.tmux_prefix);
            tmux.list_sessions()
                .await?
                .iter()
                .filter_map(|name| tmux.id_from_target(name))
                .filter(|id| !known.contains(id))
                .map(|id| id.to_string())
                .collect()
        }
    };

    if orphans.is_empty() {
        println!("No orphaned tmux sessions.");
    } else {
        println!("Orphaned tmux sessions (remove with /kill-session <id>):");
        for id in orphans {
            println!("  {id}");
        }
    }
    Ok(())
}

async fn check(config: &Config, config_path: Option<&Path>) -> Result<()> {
    let tmux = Tmux::new(&config.sessions.tmux_binary, &config.sessions.tmux_prefix);
    let mut ok = true;

    match tmux.version().await {
        Ok(version) => println!("tmux:      {version}"),
        Err(err) => {
            println!("tmux:      unavailable ({err})");
            ok = false;
        }
    }

    match which::which(&config.assistant.executable) {
        Ok(path) => println!("assistant: {}", path.display()),
        Err(_) => {
            println!(
                "assistant: `{}` not found on PATH",
                config.assistant.executable
            );
            ok = false;
        }
    }

    match config_path.map(Path::to_path_buf).or_else(Config::default_path) {
        Some(path) if path.exists() => println!("config:    {}", path.display()),
        _ => println!("config:    defaults"),
    }

    if !ok {
        bail!("termbot is not ready to run");
    }
    Ok(())
}
