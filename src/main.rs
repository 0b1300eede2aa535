//! campusbot: school information assistant for parents.
//! LINE webhook → FAQ rules / hybrid retrieval → LLM answer.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use campusbot::ai::{self, AiConfig};
use campusbot::calendar::{self, SchoolCalendar};
use campusbot::clean;
use campusbot::db::KnowledgeDB;
use campusbot::enrich;
use campusbot::error::AssistantError;
use campusbot::faq::{self, Faq};
use campusbot::line::LineConfig;
use campusbot::record::{load_records, load_records_or_empty, save_records};
use campusbot::{api, AppState, EmbedCache, SharedDB};

#[derive(Parser)]
#[command(name = "campusbot", version, about = "School information assistant for parents")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the webhook / HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "5000", env = "CAMPUSBOT_PORT")]
        port: u16,

        /// SQLite database path (keeps the embedding cache between runs)
        #[arg(short, long, default_value = "campusbot.db", env = "CAMPUSBOT_DB")]
        db: String,

        /// Knowledge records (JSON array)
        #[arg(long, default_value = "nihs_knowledge_full.json", env = "CAMPUSBOT_RECORDS")]
        records: PathBuf,

        /// FAQ file; the built-in data is used when missing
        #[arg(long, default_value = "nihs_faq.json", env = "CAMPUSBOT_FAQ")]
        faq: PathBuf,

        /// Calendar events file
        #[arg(long, default_value = "nihs_calendar.json", env = "CAMPUSBOT_CALENDAR")]
        calendar: PathBuf,
    },
    /// Dedupe a record file and write the cleaned copy
    Clean {
        #[arg(long, default_value = "nihs_knowledge_full.json")]
        input: PathBuf,
        #[arg(long, default_value = "nihs_cleaned_data.json")]
        output: PathBuf,
    },
    /// Concatenate record files (announcements + static pages)
    Merge {
        #[arg(short, long, default_value = "nihs_knowledge_full.json")]
        output: PathBuf,
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Add tags and summaries to records that have none (needs AI)
    Enrich {
        #[arg(long, default_value = "nihs_knowledge_full.json")]
        file: PathBuf,
        #[arg(long, default_value_t = enrich::DEFAULT_MAX)]
        max: usize,
        /// Pause between model calls
        #[arg(long, default_value = "1000")]
        delay_ms: u64,
    },
    /// Extract traffic and phone data into the FAQ file (needs AI)
    Faq {
        #[arg(long, default_value = "nihs_knowledge_full.json")]
        records: PathBuf,
        #[arg(long, default_value = "nihs_faq.json")]
        output: PathBuf,
    },
    /// Print the announcement holding the official calendar PDF
    CalendarSource {
        #[arg(long, default_value = "nihs_knowledge_full.json")]
        records: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Serve { port, db, records, faq, calendar } => {
            serve(port, &db, records, faq, calendar).await
        }
        Command::Clean { input, output } => clean::clean_file(&input, &output).and_then(print_json),
        Command::Merge { output, inputs } => clean::merge_files(&inputs, &output).and_then(print_json),
        Command::Enrich { file, max, delay_ms } => run_enrich(file, max, delay_ms).await,
        Command::Faq { records, output } => run_faq(records, output).await,
        Command::CalendarSource { records } => run_calendar_source(records),
    };
    if let Err(e) = result {
        error!(error = %e, "failed");
        std::process::exit(1);
    }
}

fn print_json<T: serde::Serialize>(value: T) -> Result<(), AssistantError> {
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn require_ai() -> Result<AiConfig, AssistantError> {
    AiConfig::from_env().ok_or(AssistantError::AiNotConfigured)
}

async fn serve(
    port: u16,
    db_path: &str,
    records_path: PathBuf,
    faq_path: PathBuf,
    calendar_path: PathBuf,
) -> Result<(), AssistantError> {
    let (records, report) = clean::clean_records(load_records_or_empty(&records_path)?);
    if report.removed > 0 {
        info!(removed = report.removed, "duplicate records dropped");
    }

    let db: SharedDB = Arc::new(KnowledgeDB::open(db_path)?);
    db.replace_all(&records)?;

    let faq = Faq::load_or_fallback(&faq_path);
    let events = if calendar_path.exists() {
        calendar::load_calendar(&calendar_path).unwrap_or_else(|e| {
            warn!(error = %e, path = %calendar_path.display(), "calendar unreadable");
            vec![]
        })
    } else {
        vec![]
    };
    let source_url = calendar::find_official_calendar(&records)
        .map(|s| s.url)
        .unwrap_or_default();

    let ai_cfg = AiConfig::from_env();
    let ai_status = match &ai_cfg {
        Some(cfg) => {
            let mut parts = vec![];
            if cfg.has_llm() {
                parts.push(format!("llm={}", cfg.llm_model));
            }
            if cfg.has_embed() {
                parts.push(format!("embed={}", cfg.embed_model));
            }
            parts.join(", ")
        }
        None => "disabled".into(),
    };
    if let Some(cfg) = ai_cfg.as_ref().filter(|c| c.has_embed()) {
        campusbot::spawn_embed_backfill(db.clone(), cfg.clone());
    }

    let line = LineConfig::from_env();
    let api_key = std::env::var("CAMPUSBOT_API_KEY").ok().filter(|k| !k.is_empty());
    let auth_status = if api_key.is_some() { "enabled" } else { "disabled" };

    let state = AppState {
        db: db.clone(),
        ai: ai_cfg,
        line,
        api_key,
        embed_cache: EmbedCache::new(256),
        faq: Arc::new(faq),
        calendar: Arc::new(SchoolCalendar { events, source_url }),
        started_at: std::time::Instant::now(),
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port,
        records = db.count(),
        ai = %ai_status,
        line = state.line.is_some(),
        auth = auth_status,
        "campusbot starting"
    );

    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn run_enrich(file: PathBuf, max: usize, delay_ms: u64) -> Result<(), AssistantError> {
    let cfg = require_ai()?;
    let mut records = load_records(&file)?;
    let done = enrich::enrich_records(&cfg, &mut records, max, Duration::from_millis(delay_ms)).await;
    if done > 0 {
        save_records(&file, &records)?;
    }
    info!(enriched = done, file = %file.display(), "enrichment finished");
    Ok(())
}

async fn run_faq(records_path: PathBuf, output: PathBuf) -> Result<(), AssistantError> {
    let cfg = require_ai()?;
    let records = load_records(&records_path)?;
    let (traffic, contacts) = faq::filter_context(&records);
    let extracted = match ai::extract_faq(&cfg, &traffic, &contacts).await {
        Ok(f) => Some(f),
        Err(e) => {
            warn!(error = %e, "FAQ extraction failed, writing built-in data");
            None
        }
    };
    let merged = faq::merge_with_fallback(extracted);
    merged.save(&output)?;
    info!(contacts = merged.contacts.len(), output = %output.display(), "FAQ written");
    Ok(())
}

fn run_calendar_source(records_path: PathBuf) -> Result<(), AssistantError> {
    let records = load_records(&records_path)?;
    match calendar::find_official_calendar(&records) {
        Some(src) => print_json(src),
        None => Err(AssistantError::NotFound),
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down");
}
