use clap::{Parser, Subcommand};
use receiptpack::batch::{BatchError, BatchSender, SendReport, UploadOutcome, Uploader};
use receiptpack::cache::{DirStore, ReceiptStore};
use receiptpack::reader::Reader;
use receiptpack::{config, host, Receipt};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "receiptpack", about = "Display receipt codec and cache CLI")]
struct Cli {
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Override the receipt cache directory
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract a receipt from a push payload (JSON) and cache it
    Record {
        payload: PathBuf,
    },
    /// Unpack a cached receipt file and print its fields
    Inspect {
        input: PathBuf,
    },
    /// Decode any single encoded value and print it as JSON
    Decode {
        input: PathBuf,
    },
    /// List cached receipts, newest first
    List,
    /// Build an upload body from the cache
    Batch {
        #[arg(short, long)]
        output: PathBuf,
        /// Count the body as a send attempt and delete the cached receipts
        /// once it is written; without it the cache is left untouched
        #[arg(long)]
        commit: bool,
    },
}

/// Stands in for the network: "uploads" by writing the body to a file.
struct FileSink {
    path: PathBuf,
}

impl Uploader for FileSink {
    fn upload(&self, body: &[u8]) -> Result<UploadOutcome, BatchError> {
        std::fs::write(&self.path, body).map_err(|e| BatchError::Upload(e.to_string()))?;
        Ok(UploadOutcome::Accepted)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.cache_dir {
        cfg.cache.dir = dir;
    }

    match cli.command {

        // ── Record ───────────────────────────────────────────────────────────
        Commands::Record { payload } => {
            let json: serde_json::Value = serde_json::from_slice(&std::fs::read(&payload)?)?;
            let now = chrono::Utc::now().timestamp().max(0) as u64;
            let receipt = Receipt::from_payload(&json, now)?;
            let sender = BatchSender::with_max_depth(DirStore::open(&cfg.cache)?, cfg.decode.max_depth);
            let handle = sender.record(&receipt)?;
            println!("Cached: {handle}");
        }

        // ── Inspect ──────────────────────────────────────────────────────────
        Commands::Inspect { input } => {
            let data = std::fs::read(&input)?;
            let receipt = Receipt::read_from(&mut Reader::with_max_depth(&data, cfg.decode.max_depth))?;
            let view = serde_json::json!({
                "timestamp":    receipt.timestamp,
                "replay":       receipt.replay,
                "send_attempt": receipt.send_attempt,
                "od":           receipt.od.as_ref().map(host::map_to_json),
                "ed":           receipt.ed.as_ref().map(host::map_to_json),
            });
            println!("{}", serde_json::to_string_pretty(&view)?);
            println!("hex: {}", hex::encode(&data));
        }

        // ── Decode ───────────────────────────────────────────────────────────
        Commands::Decode { input } => {
            let data = std::fs::read(&input)?;
            let mut reader = Reader::with_max_depth(&data, cfg.decode.max_depth);
            let value = reader.read_value()?;
            if !reader.is_empty() {
                tracing::warn!("{} trailing byte(s) after the first value", reader.remaining());
            }
            println!("{}", serde_json::to_string_pretty(&host::to_json(&value))?);
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List => {
            let store = DirStore::open(&cfg.cache)?;
            let handles = store.list_cached()?;
            println!("Cache: {} ({} receipt(s))", store.dir().display(), handles.len());
            for handle in handles {
                let summary = match store.load(&handle).map(|d| Receipt::unpack_with(&d, cfg.decode.max_depth)) {
                    Ok(Ok(r))  => format!("ts={} attempt={} replay={}", r.timestamp, r.send_attempt, r.replay),
                    Ok(Err(e)) => format!("unreadable: {e}"),
                    Err(e)     => format!("unreadable: {e}"),
                };
                println!("  {handle}  {summary}");
            }
        }

        // ── Batch ────────────────────────────────────────────────────────────
        Commands::Batch { output, commit } => {
            let sender = BatchSender::with_max_depth(DirStore::open(&cfg.cache)?, cfg.decode.max_depth);
            if commit {
                match sender.send(&FileSink { path: output.clone() })? {
                    SendReport::Empty => println!("Nothing to send"),
                    SendReport::Sent { receipts, deleted } => {
                        println!("Wrote {receipts} receipt(s) → {}, deleted {deleted}", output.display());
                    }
                    SendReport::Rejected { status, .. } => println!("Rejected with status {status}"),
                }
            } else {
                match sender.preview()? {
                    None => println!("Nothing to send"),
                    Some(batch) => {
                        std::fs::write(&output, &batch.body)?;
                        println!("Wrote {} receipt(s) → {}", batch.receipts, output.display());
                    }
                }
            }
        }
    }

    Ok(())
}
