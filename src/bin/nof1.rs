//! nof1 CLI - drive the experiment engine from the command line
//!
//! Commands:
//! - replay: run an NDJSON script of create/checkin/event/cancel operations
//!   through an in-memory engine and print one outcome per line
//! - bands: print the target band table for an experiment type

use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use nof1_engine::{
    ActivityEvent, ActivityKind, CheckinInput, DataStore, EfficacyScores, ExperimentService,
    ExperimentType, MemoryStore, ENGINE_VERSION,
};

/// nof1 - staging engine for single-subject behavioral experiments
#[derive(Parser)]
#[command(name = "nof1")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Run adaptive N-of-1 experiment scripts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay an NDJSON operation script through an in-memory engine
    Replay {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Subject's UTC offset in minutes (e.g. -300 for UTC-5)
        #[arg(long, default_value = "0")]
        utc_offset_minutes: i32,
    },

    /// Print the target band table for an experiment type
    Bands {
        /// Experiment type tag (e.g. leisurehappiness)
        type_tag: String,
    },
}

/// One line of a replay script
#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ReplayOp {
    Create {
        #[serde(rename = "type")]
        type_tag: String,
        time: DateTime<Utc>,
        #[serde(default)]
        self_efficacy: i32,
        #[serde(default)]
        app_efficacy: i32,
        #[serde(default)]
        experiment_efficacy: i32,
    },
    Checkin {
        time: DateTime<Utc>,
        #[serde(default)]
        followed_instructions: i32,
        #[serde(default)]
        happiness: f64,
        #[serde(default)]
        stress: f64,
        #[serde(default)]
        productivity: f64,
        #[serde(default)]
        leisure_minutes: f64,
    },
    Event {
        kind: ActivityKind,
        source_id: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        #[serde(default)]
        steps: u32,
        #[serde(default)]
        awake_minutes: f64,
    },
    Cancel {
        time: DateTime<Utc>,
        reason: String,
    },
}

const SUBJECT: &str = "replay-subject";

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Commands::Replay {
            input,
            utc_offset_minutes,
        } => replay(&input, utc_offset_minutes),
        Commands::Bands { type_tag } => bands(&type_tag),
    }
}

fn read_input(path: &PathBuf) -> Result<String, String> {
    if path.as_os_str() == "-" {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .map_err(|e| format!("failed to read stdin: {e}"))?;
        Ok(buffer)
    } else {
        fs::read_to_string(path).map_err(|e| format!("failed to read {}: {e}", path.display()))
    }
}

fn replay(input: &PathBuf, utc_offset_minutes: i32) -> Result<(), String> {
    let script = read_input(input)?;
    let pretty = atty::is(atty::Stream::Stdout);

    let service = ExperimentService::new(MemoryStore::new());
    service
        .register_subject(SUBJECT, utc_offset_minutes)
        .map_err(|e| e.to_string())?;

    let mut experiment_key: Option<String> = None;

    for (line_no, line) in script.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let op: ReplayOp = serde_json::from_str(line)
            .map_err(|e| format!("line {}: bad operation: {e}", line_no + 1))?;

        match op {
            ReplayOp::Create {
                type_tag,
                time,
                self_efficacy,
                app_efficacy,
                experiment_efficacy,
            } => {
                let record = service
                    .create_experiment(
                        SUBJECT,
                        &type_tag,
                        EfficacyScores {
                            self_efficacy,
                            app_efficacy,
                            experiment_efficacy,
                        },
                        time,
                    )
                    .map_err(|e| format!("line {}: {e}", line_no + 1))?;
                experiment_key = Some(record.key.clone());
                emit(&serde_json::json!({"created": record.key}), pretty)?;
            }
            ReplayOp::Checkin {
                time,
                followed_instructions,
                happiness,
                stress,
                productivity,
                leisure_minutes,
            } => {
                let key = experiment_key
                    .as_deref()
                    .ok_or_else(|| format!("line {}: checkin before create", line_no + 1))?;
                let outcome = service
                    .record_checkin(
                        key,
                        CheckinInput {
                            followed_instructions,
                            happiness,
                            stress,
                            productivity,
                            leisure_minutes,
                            app_version: String::new(),
                        },
                        time,
                    )
                    .map_err(|e| format!("line {}: {e}", line_no + 1))?;
                let value =
                    serde_json::to_value(&outcome).map_err(|e| format!("line {}: {e}", line_no + 1))?;
                emit(&value, pretty)?;
            }
            ReplayOp::Event {
                kind,
                source_id,
                start,
                end,
                steps,
                awake_minutes,
            } => {
                let event = ActivityEvent::new(SUBJECT, kind, source_id, start, end)
                    .with_steps(steps)
                    .with_awake_minutes(awake_minutes);
                service
                    .store()
                    .upsert_event(event)
                    .map_err(|e| format!("line {}: {e}", line_no + 1))?;
            }
            ReplayOp::Cancel { time, reason } => {
                let key = experiment_key
                    .as_deref()
                    .ok_or_else(|| format!("line {}: cancel before create", line_no + 1))?;
                let record = service
                    .cancel(key, &reason, time)
                    .map_err(|e| format!("line {}: {e}", line_no + 1))?;
                emit(&serde_json::json!({"cancelled": record.key}), pretty)?;
            }
        }
    }

    Ok(())
}

fn bands(type_tag: &str) -> Result<(), String> {
    let experiment_type =
        ExperimentType::from_tag(type_tag).ok_or_else(|| format!("unknown type {type_tag}"))?;
    let value = serde_json::json!({
        "type": experiment_type.as_str(),
        "bands": experiment_type.bands(),
        "band_width": experiment_type.band_width(),
        "stable_range": experiment_type.stable_range(),
        "uses_variability": experiment_type.uses_variability(),
        "minimizes_result": experiment_type.minimizes_result(),
    });
    emit(&value, true)
}

fn emit(value: &serde_json::Value, pretty: bool) -> Result<(), String> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|e| e.to_string())?;
    println!("{rendered}");
    Ok(())
}
