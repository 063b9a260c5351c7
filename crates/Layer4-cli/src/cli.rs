//! Non-interactive request handling

use anyhow::Context;
use skillforge_agent::{
    Agent, AgentOutcome, CancellationToken, Router, SubTaskEvent, SubTaskStatus,
    VerificationOutcome, VerificationReport,
};
use skillforge_foundation::{AgentConfig, Request};
use skillforge_oracle::HttpOracle;
use skillforge_sandbox::build_runtime;
use skillforge_skill::FileSkillIndex;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

/// Run a single request to completion
pub async fn run_once(config: &AgentConfig, text: &str) -> anyhow::Result<ExitCode> {
    let oracle = HttpOracle::from_config(&config.oracle).context("cannot reach the oracle")?;
    let sandbox = build_runtime(&config.sandbox);
    if !sandbox.is_available().await {
        anyhow::bail!(
            "the {} sandbox is not available on this machine",
            sandbox.name()
        );
    }
    let skills_dir = config.skills.resolved_dir();
    let index = FileSkillIndex::open(&skills_dir)
        .await
        .with_context(|| format!("cannot open skill library at {}", skills_dir.display()))?;

    let agent = Agent::new(config, Arc::new(oracle), sandbox, Arc::new(index));

    // Save reports as they arrive; the stream closes when the agent shuts down
    let reports = agent.verification().map(|queue| {
        let mut rx = queue.subscribe();
        tokio::spawn(async move {
            let mut lines = Vec::new();
            loop {
                match rx.recv().await {
                    Ok(report) => lines.push(report_line(report)),
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Missed {} verification report(s)", missed);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            lines
        })
    });

    // Not awaited: the stream lives as long as the agent
    let mut events = agent.subscribe_progress();
    let progress = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(line) = progress_line(&event) {
                        eprintln!("{}", line);
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling the running plan");
            on_interrupt.cancel();
        }
    });

    let outcome = agent.handle(Request::new(text), cancel).await?;
    match &outcome {
        AgentOutcome::Direct { reply } => println!("{}", reply.trim_end()),
        AgentOutcome::Plan(result) => match &result.reply {
            Some(reply) => println!("{}", reply.trim_end()),
            None => println!("{}", result.summary()),
        },
    }
    progress.abort();

    // pending verifications finish before exit
    agent.shutdown().await;
    if let Some(reports) = reports {
        if let Ok(lines) = reports.await {
            for line in lines {
                eprintln!("{}", line);
            }
        }
    }

    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn progress_line(event: &SubTaskEvent) -> Option<String> {
    let label = format!("{} {}", event.subtask_id, truncate(&event.description, 60));
    match event.status {
        SubTaskStatus::Running if event.attempts == 0 => Some(format!("▶ {}", label)),
        SubTaskStatus::Running => event
            .detail
            .as_ref()
            .map(|d| format!("↻ {} attempt {} failed: {}", label, event.attempts, truncate(d, 80))),
        SubTaskStatus::Succeeded => Some(format!("✓ {}", label)),
        SubTaskStatus::Failed => Some(format!(
            "✗ {}: {}",
            label,
            truncate(event.detail.as_deref().unwrap_or("failed"), 80)
        )),
        SubTaskStatus::Pending => None,
    }
}

fn report_line(report: VerificationReport) -> String {
    match report.outcome {
        VerificationOutcome::Saved { name, replaced: false } => format!("📚 learned skill '{}'", name),
        VerificationOutcome::Saved { name, replaced: true } => format!("📚 updated skill '{}'", name),
        VerificationOutcome::Discarded { stage, reason } => {
            format!("· not saved ({} stage): {}", stage, truncate(&reason, 100))
        }
    }
}

/// Deterministic routing decision as JSON
pub fn print_route(config: &AgentConfig, text: &str) -> anyhow::Result<()> {
    let decision = Router::new(config.router.clone()).route(text);
    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}

/// Truncate a string for display
pub fn truncate(s: &str, max_len: usize) -> String {
    let s = s.replace('\n', " ");
    if s.chars().count() <= max_len {
        s
    } else {
        let cut: String = s.chars().take(max_len).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(status: SubTaskStatus, attempts: usize, detail: Option<&str>) -> SubTaskEvent {
        SubTaskEvent {
            subtask_id: skillforge_agent::SubTaskId::numbered(2),
            description: "Generate primes".into(),
            status,
            attempts,
            detail: detail.map(String::from),
        }
    }

    #[test]
    fn test_progress_lines() {
        assert_eq!(
            progress_line(&event(SubTaskStatus::Running, 0, None)).unwrap(),
            "▶ task_2 Generate primes"
        );
        assert_eq!(
            progress_line(&event(SubTaskStatus::Running, 1, Some("[sandbox_timeout] slow"))).unwrap(),
            "↻ task_2 Generate primes attempt 1 failed: [sandbox_timeout] slow"
        );
        assert!(progress_line(&event(SubTaskStatus::Running, 1, None)).is_none());
        assert!(progress_line(&event(SubTaskStatus::Failed, 3, Some("boom")))
            .unwrap()
            .starts_with("✗ task_2"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("line one\nline two", 8), "line one...");
        assert_eq!(truncate("ααααα", 2), "αα...");
    }
}
