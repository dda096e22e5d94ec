use std::{io, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{ClientEvent, RuntimeConfig, SessionHandle, SessionRuntime};
use shared::error::SessionError;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod identity;
mod render;

use commands::{parse_input, InputCommand, HELP_TEXT};
use config::{load_settings, Settings};
use identity::{resolve_identity, welcome_text};
use render::{status_line, Renderer};

#[derive(Parser, Debug)]
#[command(name = "stranger-chat", about = "Chat with a random stranger")]
struct Args {
    /// Config file; defaults to ./stranger_chat.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    telegram_id: Option<String>,
    /// Generate an anonymous id when no Telegram id is known.
    #[arg(long)]
    anonymous: Option<bool>,
    #[arg(long)]
    log_filter: Option<String>,
    /// Start searching right away.
    #[arg(long)]
    search: bool,
}

impl Args {
    fn apply(&self, settings: &mut Settings) {
        if let Some(v) = &self.server_url {
            settings.server_url = v.clone();
        }
        if let Some(v) = &self.telegram_id {
            settings.telegram_id = Some(v.clone());
        }
        if let Some(v) = self.anonymous {
            settings.anonymous = v;
        }
        if let Some(v) = &self.log_filter {
            settings.log_filter = v.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut settings = load_settings(args.config.as_deref())?;
    args.apply(&mut settings);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_filter))
        .context("invalid log filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let identity = resolve_identity(&settings);
    println!("{}", welcome_text(identity.as_ref()));
    println!("Type /help for commands.");

    let (handle, runtime_task) =
        SessionRuntime::spawn(RuntimeConfig::new(&settings.server_url), identity)
            .context("failed to start chat session")?;
    info!(server_url = %settings.server_url, "chat: session runtime started");

    let mut events = handle.subscribe_events();
    let render_task = tokio::spawn(async move {
        let mut renderer = Renderer::default();
        loop {
            match events.recv().await {
                Ok(ClientEvent::Updated(snapshot)) => {
                    if let Err(err) = renderer.render(&snapshot, &mut io::stdout()) {
                        warn!("chat: failed to render: {err}");
                    }
                }
                Ok(ClientEvent::Error(err)) => eprintln!("error: {err}"),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "chat: renderer lagged behind session updates");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    if args.search {
        report(handle.start_search().await);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                if !dispatch(&handle, parse_input(&line)).await {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.shutdown().await;
    let _ = runtime_task.await;
    render_task.abort();
    Ok(())
}

/// Returns `false` once the user asked to quit.
async fn dispatch(handle: &SessionHandle, command: InputCommand) -> bool {
    match command {
        InputCommand::Find => report(handle.start_search().await),
        InputCommand::Stop => report(handle.stop_search().await),
        InputCommand::Next => report(handle.next_partner().await),
        InputCommand::Leave => report(handle.disconnect().await),
        InputCommand::Say(text) => report(handle.send_message(text).await),
        InputCommand::Status => match handle.snapshot().await {
            Ok(snapshot) => println!("{}", status_line(&snapshot)),
            Err(err) => report(Err(err)),
        },
        InputCommand::Help => println!("{HELP_TEXT}"),
        InputCommand::Unknown(raw) => println!("unknown command {raw}, try /help"),
        InputCommand::Empty => {}
        InputCommand::Quit => return false,
    }
    true
}

fn report(result: Result<(), SessionError>) {
    if let Err(err) = result {
        eprintln!("error: {err}");
    }
}
