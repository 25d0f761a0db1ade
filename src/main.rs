//! pages-chat - terminal client for a hosted chat bot
//!
//! Reads lines from stdin, prints the transcript to stdout and logs to stderr.

use pages_chat::command::{Command, HELP};
use pages_chat::render::TranscriptRenderer;
use pages_chat::{ChatConfig, ChatSession, HttpTransport, LoggingTransport, Transport};
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    let json = std::env::var_os("PAGES_CHAT_LOG_JSON").is_some();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pages_chat=info".into()),
        )
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr)
        }))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();

    // Configuration
    let config = ChatConfig::from_env()?;
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::from_config(&config)?);
    let transport = LoggingTransport::new(transport);

    tracing::info!(
        bot = %transport.bot_id(),
        base_url = %config.base_url(),
        mode = ?config.session.default_mode,
        "Starting chat"
    );

    let session = Arc::new(ChatSession::new(config.session.clone(), transport));

    let renderer = Mutex::new(TranscriptRenderer::new());
    session
        .subscribe(move |snapshot| {
            let out = renderer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .render(snapshot);
            if !out.is_empty() {
                let mut stdout = std::io::stdout().lock();
                let _ = stdout.write_all(out.as_bytes());
                let _ = stdout.flush();
            }
        })
        .detach();

    session.bootstrap().await;

    let default_mode = config.session.default_mode;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match Command::parse(&line, default_mode) {
            Command::Send { text, mode } => {
                if !session.snapshot().can_send_message {
                    eprintln!("(still waiting for a reply)");
                    continue;
                }
                let session = Arc::clone(&session);
                tokio::spawn(async move { session.submit(text, mode).await });
            }
            Command::Context(entries) => session.set_context(entries),
            Command::Restart => session.restart_conversation(),
            Command::Reset => session.restart_with_transport().await,
            Command::Help => eprintln!("{HELP}"),
            Command::Quit => break,
            Command::Empty => {}
            Command::Unknown(input) => eprintln!("unknown command: {input} (try /help)"),
        }
    }

    tracing::info!(session = %session.session_id(), "Chat ended");
    Ok(())
}
