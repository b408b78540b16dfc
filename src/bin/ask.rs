use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "virta-ask",
    about = "Ask virta-server a course question and print the cited answer"
)]
struct AskCli {
    /// Question to answer
    #[arg(long)]
    question: String,

    /// File holding OCR text extracted from an attached screenshot
    #[arg(long)]
    image_text: Option<PathBuf>,

    /// Server root
    #[arg(long, env = "VIRTA_SERVER_URL", default_value = "http://127.0.0.1:8000")]
    server_url: String,

    /// Only print the retrieved excerpts (skip answer generation)
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = AskCli::parse();
    let image_text = match &cli.image_text {
        Some(path) => Some(
            fs::read_to_string(path).with_context(|| format!("failed to read {:?}", path))?,
        ),
        None => None,
    };
    let client = Client::builder()
        .timeout(Duration::from_secs(cli.timeout_secs.max(1)))
        .build()
        .context("failed to build HTTP client")?;
    let request = AskRequest {
        question: &cli.question,
        image_text: image_text.as_deref(),
    };
    let base = cli.server_url.trim_end_matches('/');

    if cli.dry_run {
        let response: RetrieveResponse = post(&client, &format!("{base}/v1/retrieve"), &request)?;
        if response.meta.no_relevant_context {
            println!("no excerpt scored above {:.2}.", response.meta.threshold);
            return Ok(());
        }
        println!("--- Retrieved Excerpts ---");
        for (i, excerpt) in response.excerpts.iter().enumerate() {
            println!(
                "[{}] {} #{} ({}, score {:.4})\n{}\n---",
                i + 1,
                excerpt.source,
                excerpt.chunk_id,
                excerpt.origin,
                excerpt.score,
                excerpt.text.trim()
            );
        }
        println!("retrieval took {:.1} ms.", response.meta.latency_ms);
        return Ok(());
    }

    let answer: AnswerResponse = post(&client, &format!("{base}/api"), &request)?;
    println!("--- Answer ---\n{}", answer.answer);
    if !answer.links.is_empty() {
        println!("\n--- Links ---");
        for link in &answer.links {
            println!("- {} ({})", link.url, link.text);
        }
    }
    Ok(())
}

fn post<T: DeserializeOwned>(client: &Client, url: &str, body: &AskRequest) -> Result<T> {
    let resp = client
        .post(url)
        .json(body)
        .send()
        .with_context(|| format!("failed to call {url}"))?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp
            .text()
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        bail!("server returned {}: {}", status, body);
    }
    resp.json().context("failed to parse server response")
}

#[derive(Serialize)]
struct AskRequest<'a> {
    question: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_text: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct AnswerResponse {
    answer: String,
    links: Vec<LinkResponse>,
}

#[derive(Debug, Deserialize)]
struct LinkResponse {
    url: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct RetrieveResponse {
    excerpts: Vec<ExcerptResponse>,
    meta: RetrieveMeta,
}

#[derive(Debug, Deserialize)]
struct ExcerptResponse {
    text: String,
    source: String,
    chunk_id: usize,
    score: f32,
    origin: String,
}

#[derive(Debug, Deserialize)]
struct RetrieveMeta {
    threshold: f32,
    latency_ms: f64,
    no_relevant_context: bool,
}
