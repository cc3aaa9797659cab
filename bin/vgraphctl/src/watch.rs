//! ---
//! vg_section: "05-networking-external-interfaces"
//! vg_subsection: "binary"
//! vg_type: "source"
//! vg_scope: "code"
//! vg_description: "Live listener stream printer."
//! vg_version: "v0.1.0"
//! vg_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use clap::Args;
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};
use vgraph_sim::Sample;

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Exit after this many samples.
    #[arg(long)]
    pub count: Option<usize>,
    /// Only print samples tagged with this chart id.
    #[arg(long = "chart-id")]
    pub chart_id: Option<String>,
}

/// Print one JSON sample per line until the stream ends, `--count` is reached
/// or ctrl-c is pressed.
pub async fn run(url: Url, args: WatchArgs) -> Result<()> {
    let (mut socket, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("failed to connect to {url}"))?;
    info!(%url, "listening for samples");

    let mut printed = 0usize;
    loop {
        if args.count.is_some_and(|count| printed >= count) {
            break;
        }
        let frame = tokio::select! {
            frame = socket.next() => frame,
            _ = tokio::signal::ctrl_c() => break,
        };
        let Some(frame) = frame else {
            info!("server closed the stream");
            break;
        };
        match frame.context("listener stream failed")? {
            Message::Text(text) => {
                if !keep(&text, args.chart_id.as_deref()) {
                    continue;
                }
                println!("{text}");
                printed += 1;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    if let Err(err) = socket.close(None).await {
        warn!(error = %err, "failed to close listener stream cleanly");
    }
    let _ = socket.flush().await;
    Ok(())
}

fn keep(text: &str, chart_id: Option<&str>) -> bool {
    let Some(wanted) = chart_id else {
        return true;
    };
    match serde_json::from_str::<Sample>(text) {
        Ok(sample) => sample.chart_id == wanted,
        Err(err) => {
            warn!(error = %err, "skipping unreadable frame");
            false
        }
    }
}
