//! Command line front end.
//!
//! Usage:
//!   stress-sense detect --subject alice photo.jpg
//!   stress-sense history --subject alice --json
//!   stress-sense policy set --subject alice --threshold high --count 3
//!   stress-sense watch --subject alice --frames ./frames

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;

use stress_sense_lib::{
    db::{
        repositories::{DEFAULT_HISTORY_LIMIT, DEFAULT_TREND_DAYS},
        AlertThreshold, PolicyInput, ReadingSource,
    },
    detection::ImagePayload,
    error::DetectionError,
    realtime::RealtimeController,
    service::{DetectionOutcome, DetectionRequest},
    utils::init_logging,
    AppState,
};

const CLIENT_ERROR_EXIT: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "stress-sense")]
#[command(author, version, about = "Facial stress scoring and escalation", long_about = None)]
struct Cli {
    /// Directory holding the database and settings.json
    #[arg(long, global = true, default_value = ".stress-sense")]
    data_dir: PathBuf,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Score one image and record the reading
    Detect(DetectArgs),
    /// List recent readings, newest first
    History {
        #[arg(long)]
        subject: String,
        #[arg(long, default_value_t = DEFAULT_HISTORY_LIMIT)]
        limit: u32,
    },
    /// Daily averages over the last few days
    Trend {
        #[arg(long)]
        subject: String,
        #[arg(long, default_value_t = DEFAULT_TREND_DAYS)]
        days: u32,
    },
    /// List alerts raised for a subject
    Alerts {
        #[arg(long)]
        subject: String,
        #[arg(long, default_value = "20")]
        limit: u32,
    },
    /// Show or change a subject's notification policy
    #[command(subcommand)]
    Policy(PolicyCommand),
    /// Score new frames dropped into a directory until Ctrl-C
    Watch {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        frames: PathBuf,
    },
}

#[derive(Args, Debug)]
struct DetectArgs {
    #[arg(long)]
    subject: String,

    /// Encoded image file
    image: PathBuf,

    /// The file holds base64 text (a data URL is fine) instead of image bytes
    #[arg(long)]
    base64: bool,

    #[arg(long, value_enum, default_value_t = SourceArg::Image)]
    source: SourceArg,

    #[arg(long)]
    notes: Option<String>,
}

#[derive(Subcommand, Debug)]
enum PolicyCommand {
    Show {
        #[arg(long)]
        subject: String,
    },
    Set {
        #[arg(long)]
        subject: String,
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        enabled: bool,
        #[arg(long, value_enum, default_value_t = ThresholdArg::High)]
        threshold: ThresholdArg,
        /// Elevated readings within the window needed to alert
        #[arg(long, default_value = "3")]
        count: u32,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SourceArg {
    Image,
    Video,
    Realtime,
}

impl From<SourceArg> for ReadingSource {
    fn from(value: SourceArg) -> Self {
        match value {
            SourceArg::Image => ReadingSource::Image,
            SourceArg::Video => ReadingSource::Video,
            SourceArg::Realtime => ReadingSource::Realtime,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ThresholdArg {
    High,
    Severe,
}

impl From<ThresholdArg> for AlertThreshold {
    fn from(value: ThresholdArg) -> Self {
        match value {
            ThresholdArg::High => AlertThreshold::High,
            ThresholdArg::Severe => AlertThreshold::Severe,
        }
    }
}

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        eprintln!("Error: {err:#}");
        let rejected = err
            .downcast_ref::<DetectionError>()
            .is_some_and(DetectionError::is_client_error);
        std::process::exit(if rejected { CLIENT_ERROR_EXIT } else { 1 });
    }
}

async fn run(cli: Cli) -> Result<()> {
    let state = AppState::bootstrap(&cli.data_dir)?;
    let service = &state.service;

    match cli.command {
        Command::Detect(args) => {
            let payload = if args.base64 {
                let text = std::fs::read_to_string(&args.image)
                    .with_context(|| format!("failed to read {}", args.image.display()))?;
                ImagePayload::Base64(text)
            } else {
                let bytes = std::fs::read(&args.image)
                    .with_context(|| format!("failed to read {}", args.image.display()))?;
                ImagePayload::Bytes(bytes)
            };

            let outcome = service
                .detect(DetectionRequest {
                    subject_id: args.subject,
                    source: args.source.into(),
                    payload,
                    notes: args.notes,
                })
                .await?;

            emit(cli.json, &outcome, format_outcome)?;
        }
        Command::History { subject, limit } => {
            let readings = service.history(&subject, limit).await?;
            emit(cli.json, &readings, |readings| {
                if readings.is_empty() {
                    return format!("No readings for {subject}");
                }
                readings
                    .iter()
                    .map(|r| {
                        format!(
                            "{}  {:>3}  {:<8} {:<8} conf {:.2}{}",
                            r.timestamp().format("%Y-%m-%d %H:%M:%S"),
                            r.score(),
                            r.level(),
                            r.source(),
                            r.confidence(),
                            if r.is_fallback() { "  (fallback)" } else { "" }
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })?;
        }
        Command::Trend { subject, days } => {
            let trend = service.trend(&subject, days).await?;
            emit(cli.json, &trend, |trend| {
                if trend.is_empty() {
                    return format!("No readings for {subject} in the last {days} days");
                }
                trend
                    .iter()
                    .map(|day| {
                        format!(
                            "{}  avg {:>5.1}  max {:>3}  readings {}",
                            day.date, day.avg_score, day.max_score, day.reading_count
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })?;
        }
        Command::Alerts { subject, limit } => {
            let alerts = service.alerts(&subject, limit).await?;
            emit(cli.json, &alerts, |alerts| {
                if alerts.is_empty() {
                    return format!("No alerts for {subject}");
                }
                alerts
                    .iter()
                    .map(|a| {
                        format!(
                            "{}  {}: {}",
                            a.created_at.format("%Y-%m-%d %H:%M:%S"),
                            a.title,
                            a.message
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })?;
        }
        Command::Policy(PolicyCommand::Show { subject }) => {
            let policy = service.policy(&subject).await?;
            emit(cli.json, &policy, |policy| match policy {
                Some(p) => format!(
                    "{}: {} at {} after {} elevated readings (last sent {})",
                    p.subject_id,
                    if p.enabled { "alerts" } else { "disabled" },
                    p.level_threshold,
                    p.consecutive_count_threshold,
                    p.last_sent
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "never".into())
                ),
                None => format!("No policy for {subject}"),
            })?;
        }
        Command::Policy(PolicyCommand::Set {
            subject,
            enabled,
            threshold,
            count,
        }) => {
            let policy = service
                .configure_policy(
                    &subject,
                    PolicyInput {
                        enabled,
                        level_threshold: threshold.into(),
                        consecutive_count_threshold: count,
                    },
                )
                .await?;
            emit(cli.json, &policy, |p| {
                format!(
                    "Policy for {} saved: enabled={} threshold={} count={}",
                    p.subject_id, p.enabled, p.level_threshold, p.consecutive_count_threshold
                )
            })?;
        }
        Command::Watch { subject, frames } => {
            let mut controller = RealtimeController::new();
            let token = controller.start(
                subject,
                frames,
                service.clone(),
                state.realtime_config(),
            )?;

            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    signal.context("failed to listen for Ctrl-C")?;
                    controller.stop().await?;
                }
                _ = token.cancelled() => {
                    controller.join().await?;
                }
            }
        }
    }

    Ok(())
}

fn emit<T, F>(json: bool, value: &T, human: F) -> Result<()>
where
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    let output = if json {
        serde_json::to_string_pretty(value)?
    } else {
        human(value)
    };
    println!("{output}");
    Ok(())
}

fn format_outcome(outcome: &DetectionOutcome) -> String {
    let reading = &outcome.reading;
    let mut lines = vec![
        format!(
            "Score {}/100 ({}), confidence {:.2}{}",
            reading.score(),
            reading.level(),
            reading.confidence(),
            if reading.is_fallback() { " [fallback scoring]" } else { "" }
        ),
        outcome.analysis.summary.to_string(),
        outcome.analysis.recommendation.to_string(),
    ];
    match &outcome.face {
        Some(face) => lines.push(format!(
            "Face at ({}, {}) {}x{}",
            face.x, face.y, face.width, face.height
        )),
        None => lines.push("No face found, scored the whole image".into()),
    }
    if let Some(alert) = &outcome.alert {
        lines.push(format!("{}: {}", alert.title, alert.message));
    }
    if let Some(warning) = &outcome.escalation_warning {
        lines.push(format!("Warning: {warning}"));
    }
    lines.join("\n")
}
