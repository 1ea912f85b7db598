//! Liveboard compose: write a post to a live thread from stdin.
//!
//! Every line read is appended to the post and streamed to the server as
//! it arrives. End of input closes the post.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use liveboard_collab::{
    insert_reference, ClientConfig, ClientEvent, CompositionState, ComposerConfig, Context,
    Dispatcher, PostComposer, SyncClient,
};
use liveboard_core::ThreadRegistry;
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(version, about = "Stream a post to a live thread, one stdin line at a time")]
struct Cli {
    /// WebSocket endpoint of the server.
    #[arg(long, default_value = "ws://127.0.0.1:8000/api/socket")]
    url: String,

    /// Board of the thread.
    #[arg(long)]
    board: String,

    /// Thread to post in.
    #[arg(long)]
    thread: u64,

    /// Poster name.
    #[arg(long)]
    name: Option<String>,

    /// Start the post by quoting this post.
    #[arg(long, value_name = "ID")]
    quote: Option<u64>,

    /// Seconds to wait for the connection and for the post allocation.
    #[arg(long, default_value = "10")]
    timeout: u64,
}

impl Cli {
    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            server_url: self.url.clone(),
            board: self.board.clone(),
            thread: self.thread,
            connect_timeout: Duration::from_secs(self.timeout),
        }
    }

    fn composer_config(&self) -> ComposerConfig {
        ComposerConfig {
            poster_name: self.name.clone(),
            ..ComposerConfig::default()
        }
    }
}

fn log_events(mut events: mpsc::Receiver<ClientEvent>) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ClientEvent::Allocated(id) => info!("Post allocated: >>{id}"),
                ClientEvent::PostInserted(id) => info!("New post >>{id}"),
                ClientEvent::Fatal(reason) => warn!("Server rejected the session: {reason}"),
                ClientEvent::Notification(text) => info!("Notification: {text}"),
                ClientEvent::Redirect(url) => info!("Server redirects to {url}"),
                ClientEvent::SyncCount(count) => {
                    info!("{} active of {} connected", count.active, count.total)
                }
                ClientEvent::CaptchaRequired => warn!("Server requires a captcha"),
                ClientEvent::ServerTime { offset, .. } if offset != 0 => {
                    info!("Clock is {offset}s off from the server")
                }
                other => log::debug!("{other:?}"),
            }
        }
    });
}

/// Wait for an in-flight allocation to resolve, so the final body is not
/// held back when the post is closed.
async fn settle(composer: &PostComposer, wait: Duration) {
    let mut states = composer.subscribe();
    let settled = states.wait_for(|s| *s != CompositionState::Allocating);
    if tokio::time::timeout(wait, settled).await.is_err() {
        warn!("No allocation response after {wait:?}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let config = cli.client_config();
    let wait = Duration::from_secs(cli.timeout);

    let client = Arc::new(SyncClient::new(config.clone()));
    let ctx = Context::new(
        Arc::new(ThreadRegistry::new()),
        client.clone(),
        config.board.clone(),
        config.thread,
    );
    let dispatcher = Arc::new(Dispatcher::new(ctx));
    if let Some(events) = dispatcher.take_event_rx() {
        log_events(events);
    }

    let reader = client
        .connect(dispatcher.clone())
        .await
        .with_context(|| format!("Failed to connect to {}", config.server_url))?;
    info!("Composing in /{}/{}", config.board, config.thread);

    let composer = dispatcher.new_composer(cli.composer_config());
    let mut body = String::new();
    if let Some(id) = cli.quote {
        body = insert_reference(&body, 0, id, None).0;
        composer.submit_edit(&body)?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if !body.is_empty() && !body.ends_with('\n') {
            body.push('\n');
        }
        body.push_str(&line);

        let outcome = composer.submit_edit(&body)?;
        if outcome.trimmed > 0 {
            warn!("Post too long, dropped {} characters", outcome.trimmed);
            body = composer.snapshot().input;
        }
        if composer.state() == CompositionState::Halted {
            break;
        }
    }

    settle(&composer, wait).await;
    composer.request_close(&body)?;
    if composer.id() != 0 {
        info!("Closed post >>{}", composer.id());
    }

    client.disconnect();
    if tokio::time::timeout(wait, reader).await.is_err() {
        warn!("Server did not close the connection");
    }
    Ok(())
}
