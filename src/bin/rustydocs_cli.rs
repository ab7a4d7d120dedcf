//! Command-line client for a running Rusty Docs server.
//!
//! Uploads files (or whole directory trees), polls document status, asks questions, and
//! downloads stored originals over the HTTP API.
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use reqwest::{Client, Response, multipart};
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(
    name = "rustydocs-cli",
    about = "Upload documents to and query a Rusty Docs server"
)]
struct Cli {
    /// Base URL of the server.
    #[arg(long, global = true, default_value = "http://127.0.0.1:4100")]
    server: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload files; directories are walked recursively.
    Upload {
        paths: Vec<PathBuf>,
        #[arg(long)]
        transaction_id: Option<String>,
        /// JSON object stored with each document.
        #[arg(long)]
        metadata: Option<String>,
        /// Poll until every upload reaches a terminal status.
        #[arg(long)]
        wait: bool,
    },
    /// Show a document's status and processing results.
    Status { document_id: String },
    /// Ask a question over processed documents.
    Query {
        question: String,
        #[arg(long)]
        transaction_id: Option<String>,
    },
    /// Save the original upload to disk.
    Download {
        document_id: String,
        #[arg(long)]
        output: PathBuf,
    },
    /// Show the audit record and whether it still verifies.
    Audit { document_id: String },
    /// Check backend reachability.
    Health,
}

#[tokio::main]
async fn main() {
    rustydocs::logging::init_cli_tracing();
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::builder()
        .user_agent("rusty-docs/cli")
        .build()
        .context("failed to build HTTP client")?;
    let base = cli.server.trim_end_matches('/').to_string();

    match cli.command {
        Command::Upload {
            paths,
            transaction_id,
            metadata,
            wait,
        } => {
            if let Some(raw) = &metadata {
                let parsed: Value =
                    serde_json::from_str(raw).context("--metadata must be valid JSON")?;
                if !parsed.is_object() {
                    bail!("--metadata must be a JSON object");
                }
            }
            let files = collect_files(&paths);
            if files.is_empty() {
                bail!("no files found to upload");
            }
            let mut uploaded = Vec::new();
            for file in files {
                let receipt = upload_file(
                    &client,
                    &base,
                    &file,
                    transaction_id.as_deref(),
                    metadata.as_deref(),
                )
                .await?;
                println!("{}", serde_json::to_string_pretty(&receipt)?);
                if let Some(id) = receipt.get("documentId").and_then(Value::as_str) {
                    uploaded.push(id.to_string());
                }
            }
            if wait {
                for id in uploaded {
                    let status = wait_for_terminal(&client, &base, &id).await?;
                    println!("{id}: {status}");
                }
            }
            Ok(())
        }
        Command::Status { document_id } => {
            let response = client
                .get(format!("{base}/documents/{document_id}"))
                .send()
                .await?;
            print_json(response).await
        }
        Command::Query {
            question,
            transaction_id,
        } => {
            let response = client
                .post(format!("{base}/search"))
                .json(&json!({ "query": question, "transactionId": transaction_id }))
                .send()
                .await?;
            print_json(response).await
        }
        Command::Download {
            document_id,
            output,
        } => download(&client, &base, &document_id, &output).await,
        Command::Audit { document_id } => {
            let response = client
                .get(format!("{base}/documents/{document_id}/audit"))
                .send()
                .await?;
            print_json(response).await
        }
        Command::Health => {
            let response = client.get(format!("{base}/health")).send().await?;
            let healthy = response.status().is_success();
            let body: Value = response.json().await.context("invalid health response")?;
            println!("{}", serde_json::to_string_pretty(&body)?);
            if !healthy {
                bail!("server reports unhealthy backends");
            }
            Ok(())
        }
    }
}

fn collect_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        for entry in WalkDir::new(path).follow_links(true) {
            match entry {
                Ok(entry) if entry.file_type().is_file() => {
                    let hidden = entry
                        .file_name()
                        .to_str()
                        .is_some_and(|name| name.starts_with('.'));
                    if !hidden {
                        files.push(entry.into_path());
                    }
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(error = %err, "Skipping unreadable path"),
            }
        }
    }
    files
}

async fn upload_file(
    client: &Client,
    base: &str,
    path: &Path,
    transaction_id: Option<&str>,
    metadata: Option<&str>,
) -> Result<Value> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("upload.bin")
        .to_string();
    let mime = mime_guess::from_path(path).first_or_octet_stream();

    let mut form = multipart::Form::new().part(
        "file",
        multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime.essence_str())?,
    );
    if let Some(transaction_id) = transaction_id {
        form = form.text("transactionId", transaction_id.to_string());
    }
    if let Some(metadata) = metadata {
        form = form.text("metadata", metadata.to_string());
    }

    let response = client
        .post(format!("{base}/documents"))
        .multipart(form)
        .send()
        .await
        .with_context(|| format!("failed to upload {}", path.display()))?;
    read_json(response).await
}

async fn wait_for_terminal(client: &Client, base: &str, document_id: &str) -> Result<String> {
    loop {
        let response = client
            .get(format!("{base}/documents/{document_id}"))
            .send()
            .await?;
        let view = read_json(response).await?;
        let status = view
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if matches!(status.as_str(), "processed" | "failed") {
            return Ok(status);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

async fn download(client: &Client, base: &str, document_id: &str, output: &Path) -> Result<()> {
    let response = client
        .get(format!("{base}/documents/{document_id}/download"))
        .send()
        .await?;
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        bail!("download failed with {status}: {body}");
    }
    let mut file = tokio::fs::File::create(output)
        .await
        .with_context(|| format!("failed to create {}", output.display()))?;
    let mut stream = response.bytes_stream();
    let mut written = 0usize;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("download interrupted")?;
        written += chunk.len();
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    println!("wrote {written} bytes to {}", output.display());
    Ok(())
}

async fn read_json(response: Response) -> Result<Value> {
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .with_context(|| format!("server returned {status} with a non-JSON body"))?;
    if !status.is_success() {
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("request failed");
        bail!("{status}: {message}");
    }
    Ok(body)
}

async fn print_json(response: Response) -> Result<()> {
    let body = read_json(response).await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
