use std::io::{BufRead, IsTerminal, Write};

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::{
    aggregator::{Aggregation, Aggregator, AuditRequest},
    cli::{commands::audit::AuditArgs, GlobalArgs},
    gitlab::GitLabClient,
    progress::ProgressBarObserver,
    reporter::{AccessReporter, ReportOutputFormat},
};

/// Run the `audit` command: list projects, collect rosters, and write the reports.
///
/// Returns the finished aggregation so the caller can tell a partial run from a complete one.
pub async fn run(global_args: &GlobalArgs, args: &AuditArgs) -> Result<Aggregation> {
    let token = resolve_token(args.token.as_deref())?;
    let client = GitLabClient::new(&args.server, &token, global_args.ignore_certs)?;

    let request = AuditRequest::new(
        &args.prefix,
        args.state.include_active(),
        args.state.include_archived(),
    )
    .with_repo_type(args.scope.into())
    .with_visibility(args.visibility.visibility());

    info!("Requesting list of projects from {}", client.server_url());
    let progress = ProgressBarObserver::new(global_args.use_progress());
    let aggregation = Aggregator::new(&client, &client)
        .concurrency(args.concurrency)
        .aggregate(&request, &progress)
        .await;
    progress.finish();
    let aggregation = aggregation.context("Permission check failed")?;

    let reporter = AccessReporter::new(client.server_url(), &aggregation);
    reporter.write_to_path(ReportOutputFormat::Html, &args.html_out)?;
    if let Some(json_out) = &args.json_out {
        reporter.write_to_path(ReportOutputFormat::Json, json_out)?;
    }

    let written = std::fs::canonicalize(&args.html_out).unwrap_or_else(|_| args.html_out.clone());
    info!("Permission check has been completed.");
    println!("Result has been written to {}", written.display());

    for failure in &aggregation.failures {
        warn!("No members collected for {}: {}", failure.repository, failure.message);
    }
    Ok(aggregation)
}

fn resolve_token(token: Option<&str>) -> Result<String> {
    if let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) {
        return Ok(token.to_string());
    }

    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        bail!("No GitLab token provided; pass --token or set GITLAB_TOKEN");
    }

    let mut stderr = std::io::stderr();
    write!(stderr, "Please enter your personal access token: ")?;
    stderr.flush()?;
    let mut line = String::new();
    stdin.lock().read_line(&mut line).context("Failed to read token from stdin")?;

    let token = line.trim();
    if token.is_empty() {
        bail!("No GitLab token provided");
    }
    Ok(token.to_string())
}
