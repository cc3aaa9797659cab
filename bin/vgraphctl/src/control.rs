//! ---
//! vg_section: "05-networking-external-interfaces"
//! vg_subsection: "binary"
//! vg_type: "source"
//! vg_scope: "code"
//! vg_description: "Generation control and historical read commands."
//! vg_version: "v0.1.0"
//! vg_owner: "tbd"
//! ---
use std::io::Write;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, ValueEnum};
use reqwest::{Client, RequestBuilder, Url};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::debug;
use vgraph_net::ChartResponse;

#[derive(Debug, Clone)]
pub struct ApiClient {
    base: Url,
    http: Client,
}

impl ApiClient {
    pub fn new(server: &str) -> Result<Self> {
        let mut base = Url::parse(server).with_context(|| format!("invalid server url {server}"))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            base,
            http: Client::new(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("failed to build url for {path}"))
    }

    /// Listener stream URL derived from the API base.
    pub fn websocket_url(&self) -> Result<Url> {
        let mut url = self.endpoint("ws")?;
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => bail!("unsupported server scheme {other}"),
        };
        url.set_scheme(scheme)
            .map_err(|_| anyhow!("cannot switch {url} to {scheme}"))?;
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value> {
        let response = request.send().await.context("request to daemon failed")?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .with_context(|| format!("daemon returned unreadable body ({status})"))?;
        debug!(%status, "daemon responded");
        if !status.is_success() {
            let reason = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("no error detail");
            bail!("{status}: {reason}");
        }
        Ok(body)
    }
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
}

#[derive(Debug, Args)]
pub struct StartArgs {
    /// Tick period in milliseconds; the daemon clamps it to its bounds.
    #[arg(long)]
    pub interval: Option<u64>,
    /// Chart identifier echoed on every sample.
    #[arg(long = "chart-id")]
    pub chart_id: Option<String>,
}

#[derive(Debug, Args)]
pub struct ReadFilter {
    /// Restrict to one quantity (current|voltage).
    #[arg(long = "type")]
    pub kind: Option<String>,
    #[arg(long = "chart-id")]
    pub chart_id: Option<String>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,
}

#[derive(Debug, Args)]
pub struct LatestArgs {
    #[arg(long, default_value_t = 100)]
    pub limit: usize,
    #[command(flatten)]
    pub filter: ReadFilter,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// Inclusive lower bound (RFC 3339).
    #[arg(long, value_parser = parse_rfc3339)]
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound (RFC 3339).
    #[arg(long, value_parser = parse_rfc3339)]
    pub end: Option<DateTime<Utc>>,
    #[arg(long)]
    pub limit: Option<usize>,
    #[command(flatten)]
    pub filter: ReadFilter,
}

fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| err.to_string())
}

pub async fn start(client: &ApiClient, args: StartArgs) -> Result<()> {
    let mut body = Map::new();
    if let Some(interval) = args.interval {
        body.insert("interval".into(), json!(interval));
    }
    if let Some(chart_id) = args.chart_id {
        body.insert("chartId".into(), json!(chart_id));
    }
    let request = client
        .http
        .post(client.endpoint("generation/start")?)
        .json(&Value::Object(body));
    print_json(&client.send(request).await?)
}

pub async fn stop(client: &ApiClient) -> Result<()> {
    let request = client.http.post(client.endpoint("generation/stop")?);
    print_json(&client.send(request).await?)
}

pub async fn status(client: &ApiClient) -> Result<()> {
    let request = client.http.get(client.endpoint("generation/status")?);
    print_json(&client.send(request).await?)
}

pub async fn latest(client: &ApiClient, args: LatestArgs) -> Result<()> {
    let mut query = vec![("limit", args.limit.to_string())];
    push_filter(&mut query, &args.filter);
    let request = client
        .http
        .get(client.endpoint("generation/latest")?)
        .query(&query);
    render(client.send(request).await?, args.filter.format)
}

pub async fn history(client: &ApiClient, args: HistoryArgs) -> Result<()> {
    let mut query = Vec::new();
    if let Some(start) = args.start {
        query.push(("startTime", start.to_rfc3339()));
    }
    if let Some(end) = args.end {
        query.push(("endTime", end.to_rfc3339()));
    }
    if let Some(limit) = args.limit {
        query.push(("limit", limit.to_string()));
    }
    push_filter(&mut query, &args.filter);
    let request = client
        .http
        .get(client.endpoint("generation/history")?)
        .query(&query);
    render(client.send(request).await?, args.filter.format)
}

fn push_filter(query: &mut Vec<(&'static str, String)>, filter: &ReadFilter) {
    if let Some(kind) = &filter.kind {
        query.push(("type", kind.clone()));
    }
    if let Some(chart_id) = &filter.chart_id {
        query.push(("chartId", chart_id.clone()));
    }
}

fn print_json(body: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(body)?);
    Ok(())
}

fn render(body: Value, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&body),
        OutputFormat::Csv => {
            let response: ChartResponse =
                serde_json::from_value(body).context("unexpected chart response shape")?;
            let stdout = std::io::stdout();
            write_csv(&response, stdout.lock())
        }
    }
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    time: f64,
    value: f64,
    #[serde(rename = "chartId")]
    chart_id: &'a str,
    timestamp: String,
    overload: bool,
}

pub(crate) fn write_csv<W: Write>(response: &ChartResponse, output: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(output);
    for sample in &response.data {
        writer.serialize(CsvRow {
            kind: sample.kind.as_ref(),
            time: sample.elapsed_seconds,
            value: sample.value,
            chart_id: &sample.chart_id,
            timestamp: sample.timestamp.to_rfc3339(),
            overload: sample.overload,
        })?;
    }
    writer.flush()?;
    Ok(())
}
