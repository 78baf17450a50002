use std::process::ExitCode;

use clap::Parser;
use serde_json::{Map, Value};

/// Publish one event to a running fan-out server.
#[derive(Parser)]
#[command(name = "fanout-publish")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "http://localhost:39100")]
    url: String,

    /// Bus channel to publish on
    #[arg(long)]
    channel: String,

    /// Event tag
    #[arg(long)]
    event: String,

    /// Event data as a JSON object
    #[arg(long, default_value = "{}")]
    data: String,
}

/// Publish endpoint for `channel`, with the channel as one escaped path segment.
fn events_endpoint(base: &str, channel: &str) -> String {
    format!(
        "{}/api/v1/channels/{}/events",
        base.trim_end_matches('/'),
        urlencoding::encode(channel)
    )
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let data: Map<String, Value> = match serde_json::from_str(&cli.data) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("--data must be a JSON object: {e}");
            return ExitCode::FAILURE;
        }
    };

    let endpoint = events_endpoint(&cli.url, &cli.channel);
    let body = serde_json::json!({ "event": cli.event, "data": data });

    let response = match reqwest::Client::new().post(&endpoint).json(&body).send().await {
        Ok(response) => response,
        Err(e) => {
            eprintln!("request to {endpoint} failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    println!("{status} {text}");

    if status.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
