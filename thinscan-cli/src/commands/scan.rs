//! `thinscan scan` command

use std::sync::Arc;

use anyhow::{Context as _, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tabled::{settings::Style, Table, Tabled};
use thinscan_core::orchestrator::ProgressSnapshot;
use thinscan_core::{
    effective_concurrency, CancelHandle, JobResults, ReleaseScanner, ScanOrchestrator,
    TargetOutcome, TargetSelection,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{short_id, Context};
use crate::shutdown;

#[derive(Tabled)]
struct ReportRow {
    #[tabled(rename = "TARGET")]
    target: String,
    #[tabled(rename = "KIND")]
    kind: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "DETAIL")]
    detail: String,
    #[tabled(rename = "TIME")]
    time: String,
}

/// Run a scan over `selection` and print a summary.
pub async fn scan(
    ctx: &Context,
    selection: TargetSelection,
    number: Option<usize>,
    json: bool,
) -> Result<()> {
    let orchestrator = ScanOrchestrator::new(
        ctx.runtime.clone(),
        ctx.tools.clone(),
        Arc::new(ReleaseScanner::new()),
        ctx.config.clone(),
    );

    if !json {
        println!(
            "{} Scanning with {} workers",
            "→".blue(),
            effective_concurrency(number.or(ctx.config.concurrency)).to_string().yellow()
        );
    }

    let cancel = CancelHandle::new();
    let signals = shutdown::cancel_on_signal(cancel.clone());
    let progress = if json {
        None
    } else {
        Some(track_progress(orchestrator.subscribe_progress())?)
    };

    let outcome = orchestrator.run_selection(&selection, number, &cancel).await;

    signals.abort();
    if let Some((bar, task)) = progress {
        task.abort();
        bar.finish_and_clear();
    }

    let results = match outcome {
        Ok(results) => results,
        Err(e) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&e.to_report())?);
            }
            return Err(e).context("Scan failed");
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        print_summary(&results);
    }

    if results.was_cancelled() {
        anyhow::bail!("Scan cancelled");
    }
    let failed = results.failed().count();
    if failed > 0 {
        anyhow::bail!("{} of {} targets failed", failed, results.reports.len());
    }
    Ok(())
}

fn track_progress(
    mut rx: watch::Receiver<ProgressSnapshot>,
) -> Result<(ProgressBar, JoinHandle<()>)> {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("=>-"),
    );

    let updater = bar.clone();
    let task = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let snapshot = *rx.borrow_and_update();
            updater.set_length(snapshot.total as u64);
            updater.set_position(snapshot.completed as u64);
            updater.set_message(format!("{} active", snapshot.active));
        }
    });
    Ok((bar, task))
}

fn print_summary(results: &JobResults) {
    let rows: Vec<ReportRow> = results
        .reports
        .iter()
        .map(|r| {
            let (status, detail) = match &r.outcome {
                TargetOutcome::Scanned { summary } => {
                    let pretty = summary
                        .get("pretty_name")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    ("scanned".green().to_string(), pretty)
                }
                TargetOutcome::NotApplicable { reason } => {
                    ("not applicable".yellow().to_string(), reason.clone())
                }
                TargetOutcome::Failed { error } => ("failed".red().to_string(), error.clone()),
                TargetOutcome::Cancelled => ("cancelled".yellow().to_string(), String::new()),
            };
            let detail = match &r.cleanup_error {
                Some(e) => format!("{} (cleanup: {})", detail, e).trim().to_string(),
                None => detail,
            };
            ReportRow {
                target: r.target.clone(),
                kind: r.kind.to_string(),
                id: short_id(&r.canonical_id),
                status,
                detail,
                time: format!("{:.1}s", r.duration_ms as f64 / 1000.0),
            }
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::modern());
    println!("{}", table);

    let elapsed = (results.finished_at - results.started_at).num_milliseconds() as f64 / 1000.0;
    let failed = results.failed().count();
    let summary = format!(
        "{} succeeded, {} failed, {} total in {:.1}s",
        results.succeeded().count(),
        failed,
        results.reports.len(),
        elapsed
    );
    if results.is_clean() {
        println!("{}", summary.green());
    } else {
        println!("{}", summary.red());
    }

    for report in results.reports.iter().filter(|r| r.cleanup_error.is_some()) {
        if let Some(path) = &report.mount_path {
            println!(
                "{} {} was not fully torn down, check {}",
                "!".yellow().bold(),
                report.target,
                path.display()
            );
        }
    }
}
