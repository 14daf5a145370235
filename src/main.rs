use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;

use newsrelay::dedup::IngestOutcome;
use newsrelay::models::{ChannelLimits, RawItem};
use newsrelay::pipeline::{dlq, scheduler};
use newsrelay::{logging, AppContext, Config, Pipeline};

#[derive(Parser)]
#[command(
    name = "newsrelay",
    version,
    about = "News pipeline: dedup, scoring, LLM drafts and publishing",
    after_help = "Configuration is read from $NEWSRELAY_CONFIG or the user config directory."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline on a fixed interval until interrupted
    Run {
        /// Minutes between cycles (defaults to the configured interval)
        #[arg(long)]
        every: Option<u64>,
    },
    /// Run a single cycle and print the per-stage counts as JSON
    Once {
        #[arg(long)]
        dry_run: bool,
        /// Restrict the cycle to these item ids
        #[arg(long = "item", value_name = "ID")]
        items: Vec<i64>,
    },
    /// Ingest normalized items from a JSON file (one object or an array)
    Ingest { file: PathBuf },
    /// Item counts per status
    Status,
    /// Inspect and resolve dead-lettered items
    Dlq {
        #[command(subcommand)]
        action: DlqAction,
    },
    /// Read or change operator settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand)]
enum DlqAction {
    List {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Requeue the item before its failed stage
    Retry {
        id: i64,
        /// Run a cycle for the item right away
        #[arg(long)]
        run: bool,
        #[arg(long, requires = "run")]
        dry_run: bool,
    },
    /// Mark the item failed and remove the entry
    Drop { id: i64 },
}

#[derive(Subcommand)]
enum SettingsAction {
    Show,
    /// Block all publishing
    Pause,
    Resume,
    /// Per-channel rate limits
    Limit {
        channel: String,
        per_minute: u64,
        per_hour: u64,
    },
    /// Enable or disable a channel or feature
    Flag { name: String, state: Toggle },
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();

    let config = Config::load().context("loading configuration")?;
    let ctx = Arc::new(AppContext::from_config(config).await?);
    let pipeline = Arc::new(Pipeline::new(ctx.clone()));

    match cli.command {
        Command::Run { every } => {
            let minutes = every.unwrap_or(ctx.config.pipeline.run_every_minutes).max(1);
            let cancel = CancellationToken::new();
            let signals = scheduler::cancel_on_shutdown(cancel.clone());
            scheduler::run_loop(pipeline, Duration::from_secs(minutes * 60), cancel.clone()).await;
            cancel.cancel();
            let _ = signals.await;
        }
        Command::Once { dry_run, items } => {
            let ids = (!items.is_empty()).then_some(items);
            let run = pipeline.run_once(dry_run, ids).await?;
            println!("{}", serde_json::to_string_pretty(&run)?);
        }
        Command::Ingest { file } => ingest(&ctx, &file).await?,
        Command::Status => {
            for (status, count) in ctx.repo.count_by_status().await? {
                println!("{status:<10} {count}");
            }
        }
        Command::Dlq { action } => match action {
            DlqAction::List { limit } => {
                let entries = dlq::list(&ctx.repo, limit).await?;
                if entries.is_empty() {
                    println!("dead letter queue is empty");
                }
                for e in entries {
                    println!(
                        "#{:<5} item {:<6} {:<10} attempts {}  {}  {}",
                        e.id,
                        e.item_id,
                        e.stage.as_str(),
                        e.attempts,
                        e.last_seen.format("%Y-%m-%d %H:%M"),
                        e.error.as_deref().unwrap_or("")
                    );
                }
            }
            DlqAction::Retry { id, run, dry_run } => {
                let (entry, status) = dlq::retry(&ctx.repo, id).await?;
                println!("item {} requeued as {status}", entry.item_id);
                if run {
                    let result = pipeline.run_once(dry_run, Some(vec![entry.item_id])).await?;
                    println!("{}", serde_json::to_string_pretty(&result)?);
                }
            }
            DlqAction::Drop { id } => {
                let entry = dlq::drop(&ctx.repo, id).await?;
                println!("item {} marked failed", entry.item_id);
            }
        },
        Command::Settings { action } => settings(&ctx, action).await?,
    }

    Ok(())
}

async fn ingest(ctx: &AppContext, file: &Path) -> Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let value: serde_json::Value = serde_json::from_str(&content)?;
    let raws: Vec<RawItem> = match value {
        serde_json::Value::Array(_) => serde_json::from_value(value)?,
        serde_json::Value::Object(_) => vec![serde_json::from_value(value)?],
        _ => bail!("expected a JSON object or array of objects"),
    };

    let (mut inserted, mut touched, mut refreshed) = (0, 0, 0);
    for raw in raws {
        match ctx.dedup.ingest(&ctx.repo, raw).await? {
            IngestOutcome::Inserted(_) => inserted += 1,
            IngestOutcome::Touched(_) => touched += 1,
            IngestOutcome::Refreshed(_) => refreshed += 1,
        }
    }
    println!("inserted {inserted}, duplicates {touched}, refreshed {refreshed}");
    Ok(())
}

async fn settings(ctx: &AppContext, action: SettingsAction) -> Result<()> {
    let mut settings = ctx.repo.get_settings().await?;
    match action {
        SettingsAction::Show => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            return Ok(());
        }
        SettingsAction::Pause => settings.set_pause(true),
        SettingsAction::Resume => settings.set_pause(false),
        SettingsAction::Limit {
            channel,
            per_minute,
            per_hour,
        } => {
            if per_minute == 0 || per_hour == 0 {
                bail!("limits must be at least 1");
            }
            settings.set_channel_limits(&channel, ChannelLimits { per_minute, per_hour });
        }
        SettingsAction::Flag { name, state } => {
            settings.set_feature_flag(&name, matches!(state, Toggle::On));
        }
    }
    ctx.repo.save_settings(settings.clone()).await?;
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}
