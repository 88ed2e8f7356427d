use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use trellis::config::Config;
use trellis::demo;
use trellis::protocol::wire::encode_server_batch;
use trellis::session::Session;
use trellis::telemetry::logging::{self, LogConfig, LogLevel};

/// Serves the demo UI to one client speaking JSON lines on stdin/stdout.
///
/// The first line written is the bootstrap `{"csrfToken": ...}`; every line
/// read after that is a client batch and is answered with a server batch.
#[derive(Parser, Debug)]
#[command(name = "trellis")]
struct Cli {
    #[arg(long, value_enum, default_value_t = LogLevel::Warn, env = "TRELLIS_LOG_LEVEL")]
    log_level: LogLevel,

    #[arg(long, env = "TRELLIS_LOG_FILE", help = "Write logs to a file instead of stderr")]
    log_file: Option<PathBuf>,

    #[arg(long, default_value_t = 0, help = "Milliseconds between server pushes (0 disables them)")]
    tick_ms: u64,

    #[arg(long, default_value_t = 200, help = "Rows in the demo grid")]
    rows: u32,

    #[arg(long, help = "Accept client messages without a CSRF token")]
    no_csrf: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = logging::init(&LogConfig {
        level: cli.log_level,
        file: cli.log_file.clone(),
    })?;

    let mut config = Config::from_env();
    if cli.no_csrf {
        config.csrf_check = false;
    }
    let store = demo::store().context("loading metadata bundles")?;
    let (ui, demo_ui) = demo::build(config, store, cli.rows).context("building demo ui")?;
    let session = Arc::new(Session::new(ui));
    let demo_ui = Arc::new(demo_ui);
    info!(rows = cli.rows, tick_ms = cli.tick_ms, "session ready");

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move { write_lines(tokio::io::stdout(), &mut out_rx).await });

    out_tx
        .send(json!({ "csrfToken": session.csrf_token() }).to_string())
        .context("stdout closed")?;

    if cli.tick_ms > 0 {
        let session = Arc::clone(&session);
        let demo_ui = Arc::clone(&demo_ui);
        let out_tx = out_tx.clone();
        let period = Duration::from_millis(cli.tick_ms);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            let mut n = 0u64;
            loop {
                interval.tick().await;
                n += 1;
                if let Err(err) = session.access(|ui| demo::tick(ui, &demo_ui, n)) {
                    warn!(error = %err, "tick failed");
                    continue;
                }
                let batch = session.push();
                if batch.is_empty() {
                    continue;
                }
                match encode_server_batch(&batch) {
                    Ok(body) => {
                        if out_tx.send(body).is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(error = %err, "failed to encode push"),
                }
            }
        });
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = match session.handle_message(&line) {
            Ok(body) => body,
            Err(err) => {
                warn!(error = %err, "rejected client message");
                json!({ "error": err.to_string() }).to_string()
            }
        };
        if out_tx.send(reply).is_err() {
            break;
        }
    }

    debug!("stdin closed; shutting down");
    drop(out_tx);
    if let Ok(joined) = tokio::time::timeout(Duration::from_millis(200), writer).await {
        joined.context("stdout writer panicked")?.context("writing stdout")?;
    }
    Ok(())
}

/// Writes each queued message as one line until the channel closes.
async fn write_lines(mut out: impl AsyncWrite + Unpin, rx: &mut mpsc::UnboundedReceiver<String>) -> std::io::Result<()> {
    while let Some(line) = rx.recv().await {
        out.write_all(line.as_bytes()).await?;
        out.write_all(b"\n").await?;
        out.flush().await?;
    }
    Ok(())
}
