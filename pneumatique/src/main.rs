mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use pneu_blob::in_memory::MemBlobStore;
use pneu_blob::BlobStore;
use pneu_mime::parse_message;

use config::Config;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the deployment configuration and print the resolved
    /// values
    CheckConfig {
        #[clap(flatten)]
        config: Config,
    },

    /// Run a local .eml file through the real streaming parser and print
    /// the derived email record as JSON; for debug & experimentation
    /// only
    Inspect {
        /// Path to the raw RFC 5322 message
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match Args::parse().command {
        Command::CheckConfig { config } => {
            println!("{:#?}", config);
            Ok(())
        }
        Command::Inspect { file } => inspect(file).await,
    }
}

async fn inspect(file: PathBuf) -> Result<()> {
    let raw = tokio::fs::read(&file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;

    let blobs = Arc::new(MemBlobStore::new());
    blobs.insert("local", "inspect", raw);
    let stream = blobs.stream("local", "inspect").await?;

    let parsed = parse_message(blobs.clone(), "local", "inspect", stream)
        .await
        .map_err(|abort| anyhow::anyhow!("parse failed: {}", abort.error))?;

    let report = serde_json::json!({
        "size": parsed.size,
        "headerSize": parsed.header_size,
        "subject": parsed.subject,
        "from": parsed.from,
        "to": parsed.to,
        "messageId": parsed.message_id,
        "inReplyTo": parsed.in_reply_to,
        "sentAt": parsed.sent_at,
        "hasAttachment": parsed.has_attachment,
        "preview": parsed.preview,
        "textBody": parsed.text_body,
        "htmlBody": parsed.html_body,
        "attachments": parsed.attachments,
        "bodyStructure": parsed.body_structure,
        "uploadedPartBlobs": parsed.uploaded_part_blobs,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
