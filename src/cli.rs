use crate::config::{build_config, DEFAULT_BASE_URL};
use crate::model::{ExportFormat, FilePayload};
use crate::orchestrator::{PipelineSession, Stage, StageRunner, TriggerOutcome};
use crate::query::QuerySpec;
use crate::stopwatch::TimerState;
use crate::text_summary::{self, TextSummary};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::future::Future;
use std::io::Write;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "student-pipeline",
    version,
    about = "Drive the student data pipeline: generate, convert, ingest, report and export"
)]
pub struct Cli {
    /// Base URL of the pipeline service
    #[arg(long, global = true, env = "PIPELINE_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Print the final outcome as JSON on stdout
    #[arg(long, global = true)]
    pub json: bool,

    /// Run silently: no live timer, only the JSON outcome and errors
    #[arg(long, global = true)]
    pub silent: bool,

    /// Stopwatch tick interval
    #[arg(long, global = true, default_value = "10ms")]
    pub tick: humantime::Duration,

    /// How often the live timer line is printed
    #[arg(long, global = true, default_value = "100ms")]
    pub render_every: humantime::Duration,

    /// Directory exports are saved to (defaults to the Downloads folder)
    #[arg(long, global = true)]
    pub download_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Generate a workbook of synthetic students on the server
    Generate {
        /// Number of records to generate
        #[arg(long, default_value = "1000")]
        count: NonZeroU32,
    },
    /// Upload an Excel workbook and convert it to CSV
    Convert {
        /// Excel file to upload
        file: PathBuf,
    },
    /// Upload a CSV file into the student store
    Ingest {
        /// CSV file to upload
        file: PathBuf,
    },
    /// Show one page of stored students
    Report {
        /// Zero-based page index
        #[arg(long, default_value_t = 0)]
        page: u32,

        /// Records per page
        #[arg(long, default_value = "10")]
        size: NonZeroU32,

        /// Only students whose ID matches
        #[arg(long)]
        student_id: Option<String>,

        /// Only students in this class
        #[arg(long)]
        class: Option<String>,
    },
    /// Download every stored student as a file
    Export {
        #[arg(value_enum)]
        format: ExportFormat,

        /// Save into this directory instead of --download-dir
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
}

/// Run one subcommand. Returns whether the stage succeeded.
pub async fn run(args: Cli) -> Result<bool> {
    // Validate that --silent can only be used with --json
    if args.silent && !args.json {
        return Err(anyhow::anyhow!(
            "--silent can only be used with --json. Use --silent --json together."
        ));
    }

    let mut cfg = build_config(&args);
    if let Command::Export {
        out_dir: Some(dir), ..
    } = &args.command
    {
        cfg.download_dir = dir.clone();
    }
    debug!(?cfg, "pipeline config");

    let session = PipelineSession::connect(&cfg).context("failed to set up the HTTP gateway")?;
    let (out_tx, out_handle) = spawn_output_writer();
    let out = Output {
        tx: out_tx,
        json: args.json,
        live: !args.silent,
        render_every: Duration::from(args.render_every),
    };

    let result = run_command(&args.command, &session, &out).await;

    session.shutdown();
    drop(out);
    let _ = out_handle.await;
    result
}

async fn run_command(command: &Command, session: &PipelineSession, out: &Output) -> Result<bool> {
    let ok = match command {
        Command::Generate { count } => {
            let stage = &session.generate;
            let outcome = out
                .drive(session, stage.runner(), stage.generate(*count))
                .await;
            out.settle(Stage::Generate, outcome, text_summary::generated)?
        }
        Command::Convert { file } => {
            let stage = &session.convert;
            stage.select_file(FilePayload::from_path(file).await?);
            let outcome = out.drive(session, stage.runner(), stage.convert()).await;
            out.settle(Stage::Convert, outcome, text_summary::converted)?
        }
        Command::Ingest { file } => {
            let stage = &session.ingest;
            stage.select_file(FilePayload::from_path(file).await?);
            let outcome = out.drive(session, stage.runner(), stage.ingest()).await;
            out.settle(Stage::Ingest, outcome, text_summary::ingested)?
        }
        Command::Report {
            page,
            size,
            student_id,
            class,
        } => {
            let report = &session.report;
            let spec = QuerySpec::new(*page, *size, student_id.as_deref(), class.as_deref());
            let outcome = out
                .drive(session, report.load_runner(), report.set_query(spec))
                .await;
            let spec = report.query_spec();
            out.settle(Stage::ReportLoad, outcome, |page, _| {
                text_summary::report(page, &spec)
            })?
        }
        Command::Export { format, .. } => {
            let report = &session.report;
            if !out.json {
                out.stderr(text_summary::exporting(*format));
            }
            let outcome = out
                .drive(session, report.export_runner(), report.export(*format))
                .await;
            out.settle(Stage::ReportExport, outcome, text_summary::exported)?
        }
    };
    Ok(ok)
}

struct Output {
    tx: mpsc::UnboundedSender<OutputLine>,
    json: bool,
    live: bool,
    render_every: Duration,
}

/// Final outcome as printed by `--json`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonOutcome<'a, T> {
    stage: &'static str,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    elapsed: Option<&'a str>,
    completed_at: String,
}

impl Output {
    fn stdout(&self, line: String) {
        let _ = self.tx.send(OutputLine::Stdout(line));
    }

    fn stderr(&self, line: String) {
        let _ = self.tx.send(OutputLine::Stderr(line));
    }

    /// Await a stage trigger while printing its stopwatch.
    ///
    /// Ctrl-C shuts the whole session down and abandons the request.
    async fn drive<T, F>(
        &self,
        session: &PipelineSession,
        runner: &StageRunner<T>,
        trigger: F,
    ) -> TriggerOutcome<T>
    where
        T: Clone,
        F: Future<Output = TriggerOutcome<T>>,
    {
        let mut timer = runner.timer();
        let mut redraw = tokio::time::interval(self.render_every);
        redraw.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(trigger);

        loop {
            tokio::select! {
                outcome = &mut trigger => return outcome,
                _ = tokio::signal::ctrl_c() => {
                    session.shutdown();
                    return TriggerOutcome::Disposed;
                }
                _ = redraw.tick(), if self.live => {
                    let state = timer.borrow_and_update().clone();
                    if state.running {
                        self.stderr(format!("{}: {}", runner.stage(), state.display_text));
                    }
                }
            }
        }
    }

    /// Print the outcome. Returns whether it was a success.
    fn settle<T: Serialize>(
        &self,
        stage: Stage,
        outcome: TriggerOutcome<T>,
        summary: impl FnOnce(&T, &TimerState) -> TextSummary,
    ) -> Result<bool> {
        let (status, result, message, elapsed) = match &outcome {
            TriggerOutcome::Succeeded { payload, elapsed } => {
                ("succeeded", Some(payload), None, Some(elapsed))
            }
            TriggerOutcome::Failed { message, elapsed } => {
                ("failed", None, Some(message.as_str()), Some(elapsed))
            }
            TriggerOutcome::Invalid { message } => ("invalid", None, Some(message.as_str()), None),
            TriggerOutcome::Busy => ("busy", None, Some("already in progress"), None),
            TriggerOutcome::Disposed => ("cancelled", None, Some("cancelled"), None),
        };

        if self.json {
            let doc = JsonOutcome {
                stage: stage.stopwatch_name(),
                status,
                result,
                message,
                elapsed: elapsed.map(|t| t.display_text.as_str()),
                completed_at: time::OffsetDateTime::now_utc()
                    .format(&time::format_description::well_known::Rfc3339)
                    .unwrap_or_else(|_| "now".into()),
            };
            self.stdout(serde_json::to_string_pretty(&doc)?);
        } else if let (Some(payload), Some(elapsed)) = (result, elapsed) {
            for line in summary(payload, elapsed).lines {
                self.stdout(line);
            }
        } else if let Some(message) = message {
            self.stderr(text_summary::failed(stage, message, elapsed));
        }

        Ok(outcome.is_success())
    }
}
