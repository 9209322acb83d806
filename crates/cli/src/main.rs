//! shred - submit XML documents to the shredding engine and report per-tag
//! statistics once every job reaches a terminal state.

mod logging;

use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use shredder::{
  JobId, ShredderActor,
  config::Config,
  provider::ProviderRegistry,
  tagname::{StatsActor, StatsHandle, TAG_COUNT_DOC_TYPE, TagNameProvider, TagStatsSnapshot},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "shred", about = "Shred XML documents into per-tag statistics")]
struct Args {
  /// Path to a TOML config file
  #[arg(long)]
  config: Option<PathBuf>,

  /// Document type to submit the files as
  #[arg(long, default_value = TAG_COUNT_DOC_TYPE)]
  doc_type: String,

  /// Print final statistics as JSON
  #[arg(long)]
  json: bool,

  /// XML documents to shred
  #[arg(required = true)]
  files: Vec<PathBuf>,
}

/// Final per-job statistics, in declaration order of the input files.
#[derive(Serialize)]
struct JobReport {
  job_id: JobId,
  path: String,
  #[serde(flatten)]
  stats: TagStatsSnapshot,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  logging::init();
  let args = Args::parse();
  let config = Config::load(args.config.as_deref()).context("loading configuration")?;

  let cancel = CancellationToken::new();
  let stats = StatsActor::spawn(&config.stats, cancel.child_token());
  let mut registry = ProviderRegistry::new();
  registry.register(Arc::new(TagNameProvider::new(stats.clone())));

  let (event_tx, mut events) = mpsc::channel(args.files.len().max(1));
  let engine = ShredderActor::spawn(config.engine.clone(), registry, Some(event_tx), cancel.child_token());

  // Submit every file under a fresh sequential job id. Rejections are
  // immediate and final; accepted jobs report their outcome on the event
  // channel.
  let mut accepted: Vec<(JobId, PathBuf)> = Vec::new();
  let mut failures = 0usize;
  for (index, path) in args.files.iter().enumerate() {
    let job_id = (index + 1) as JobId;
    match engine.submit(args.doc_type.clone(), path.clone(), job_id).await {
      Ok(()) => accepted.push((job_id, path.clone())),
      Err(e) => {
        error!(path = %path.display(), error = %e, "submission rejected");
        failures += 1;
      }
    }
  }

  let mut outcomes: HashMap<JobId, bool> = HashMap::new();
  while outcomes.len() < accepted.len() {
    match events.recv().await {
      Some(event) => {
        if event.is_failure() {
          failures += 1;
        }
        outcomes.insert(event.job_id(), event.is_failure());
      }
      None => break,
    }
  }
  info!(jobs = accepted.len(), failures, "all jobs reached a terminal state");

  let mut reports = Vec::new();
  for (job_id, path) in &accepted {
    if outcomes.get(job_id) == Some(&false) {
      if let Some(snapshot) = finished_snapshot(&stats, *job_id).await {
        reports.push(JobReport {
          job_id: *job_id,
          path: path.display().to_string(),
          stats: snapshot,
        });
      }
    }
  }

  if args.json {
    println!("{}", serde_json::to_string_pretty(&reports)?);
  } else {
    for report in &reports {
      println!("job {} ({}): {}", report.job_id, report.path, report.stats);
    }
  }

  cancel.cancel();
  if failures > 0 {
    anyhow::bail!("{failures} job(s) failed");
  }
  Ok(())
}

/// Poll until the job's terminal fact is recorded; facts may still be in
/// flight when the engine reports completion.
async fn finished_snapshot(stats: &StatsHandle, job_id: JobId) -> Option<TagStatsSnapshot> {
  for _ in 0..100 {
    match stats.snapshot(job_id).await {
      Ok(Some(snapshot)) if snapshot.finished => return Some(snapshot),
      Ok(_) => tokio::time::sleep(Duration::from_millis(10)).await,
      Err(_) => return None,
    }
  }
  None
}
