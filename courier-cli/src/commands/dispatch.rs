//! Dispatch command handler

use anyhow::{Context, Result};
use colored::*;
use courier_client::{DispatchClient, DispatchOutcome, LogSink};
use courier_core::domain::job::JobDescriptor;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;

/// Prints worker log lines to stdout as they arrive
struct ConsoleLogSink;

impl LogSink for ConsoleLogSink {
    fn write_line(&self, job_id: &str, text: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{} {}", format!("[{}]", job_id).dimmed(), text);
    }
}

/// Discards worker log lines
struct QuietLogSink;

impl LogSink for QuietLogSink {
    fn write_line(&self, _job_id: &str, _text: &str) {}
}

/// Dispatch a job and map its outcome to an exit code
pub async fn handle_dispatch(
    config: &Config,
    job_id: &str,
    timeout_secs: u64,
    deadline_secs: Option<u64>,
    quiet: bool,
) -> Result<i32> {
    let job = JobDescriptor::new(job_id).context("Invalid job id")?;

    if timeout_secs == 0 {
        anyhow::bail!("inactivity timeout must be greater than 0");
    }

    let dispatch_config = config
        .dispatch_config()
        .with_inactivity_timeout(Duration::from_secs(timeout_secs))
        .with_deadline(deadline_secs.map(Duration::from_secs));

    let sink: Arc<dyn LogSink> = if quiet {
        Arc::new(QuietLogSink)
    } else {
        Arc::new(ConsoleLogSink)
    };

    eprintln!(
        "{} job {} via {}",
        "▸ Dispatching".cyan(),
        job.to_string().bold(),
        config.endpoint.to_string().dimmed()
    );

    let started = Instant::now();
    let outcome = DispatchClient::new(dispatch_config)
        .with_sink(sink)
        .dispatch(&job)
        .await;

    let bound = expired_bound(started.elapsed(), timeout_secs, deadline_secs);
    eprintln!("{}", describe_outcome(outcome, &bound));

    Ok(outcome.exit_code())
}

/// Names the bound that ends a timed-out dispatch
///
/// The overall deadline wins once the dispatch has run for that long;
/// otherwise the worker went quiet for the inactivity timeout.
fn expired_bound(elapsed: Duration, timeout_secs: u64, deadline_secs: Option<u64>) -> String {
    match deadline_secs {
        Some(deadline) if elapsed >= Duration::from_secs(deadline) => {
            format!("deadline {}s", deadline)
        }
        _ => format!("inactivity timeout {}s", timeout_secs),
    }
}

/// Human-readable summary line for an outcome
fn describe_outcome(outcome: DispatchOutcome, bound: &str) -> ColoredString {
    match outcome {
        DispatchOutcome::Success => "✓ Job succeeded".green().bold(),
        DispatchOutcome::Failure => "✗ Job failed".red().bold(),
        DispatchOutcome::Timeout => format!("⏱ No answer from worker ({} reached)", bound)
            .yellow()
            .bold(),
        DispatchOutcome::BrokerError => "✗ Broker error, job status unknown".red().bold(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expired_bound_names_deadline() {
        let bound = expired_bound(Duration::from_millis(60_050), 300, Some(60));
        assert_eq!(bound, "deadline 60s");
        assert!(
            describe_outcome(DispatchOutcome::Timeout, &bound)
                .to_string()
                .contains("deadline 60s reached")
        );
    }

    #[test]
    fn test_expired_bound_names_inactivity_timeout() {
        assert_eq!(
            expired_bound(Duration::from_secs(2), 2, None),
            "inactivity timeout 2s"
        );
        assert_eq!(
            expired_bound(Duration::from_secs(2), 2, Some(600)),
            "inactivity timeout 2s"
        );
    }
}
