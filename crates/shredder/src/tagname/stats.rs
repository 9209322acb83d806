//! Tag statistics actor
//!
//! The downstream consumer for tag-name shredding. Processors register per
//! job (the handshake), then stream element facts through a bounded queue
//! whose capacity is the system's backpressure bound: when the queue is
//! full, producing jobs pause until this actor catches up.
//!
//! The terminal fact travels through the same queue as element facts, so a
//! job's tally is complete when it is finalized.

use std::{
  collections::{BTreeMap, HashMap},
  fmt,
  time::Instant,
};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
  actor::{JobId, SendError},
  config::StatsConfig,
  sink::{self, BoundedSink},
};

// ============================================================================
// Facts and Messages
// ============================================================================

/// One unit of derived data flowing from a tag-name processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagFact {
  /// An element started in the job's document
  Element { job_id: JobId, name: String },
  /// No more facts will arrive for the job
  Finished { job_id: JobId },
}

/// Control message for the stats actor.
#[derive(Debug)]
pub enum StatsMessage {
  /// Handshake: start a tally for the job and reply with the fact sink
  Register {
    job_id: JobId,
    reply: mpsc::Sender<BoundedSink<TagFact>>,
  },
  /// Read the job's current tally
  Snapshot {
    job_id: JobId,
    reply: mpsc::Sender<Option<TagStatsSnapshot>>,
  },
}

// ============================================================================
// Tally
// ============================================================================

/// Per-job tag tally.
#[derive(Debug)]
struct TagStats {
  counters: HashMap<String, u64>,
  started: Instant,
  finished: Option<Instant>,
}

impl TagStats {
  fn new() -> Self {
    Self {
      counters: HashMap::new(),
      started: Instant::now(),
      finished: None,
    }
  }

  fn record(&mut self, name: String) {
    *self.counters.entry(name).or_insert(0) += 1;
  }

  fn finish(&mut self) {
    self.finished.get_or_insert_with(Instant::now);
  }

  fn snapshot(&self) -> TagStatsSnapshot {
    TagStatsSnapshot {
      counters: self.counters.iter().map(|(name, count)| (name.clone(), *count)).collect(),
      total_elements: self.counters.values().sum(),
      elapsed_ms: self.finished.unwrap_or_else(Instant::now).duration_since(self.started).as_millis() as u64,
      finished: self.finished.is_some(),
    }
  }
}

/// Point-in-time view of a job's tally. `finished` is false while facts may
/// still be in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagStatsSnapshot {
  /// Element-start count per tag name
  pub counters: BTreeMap<String, u64>,
  /// Sum over all counters
  pub total_elements: u64,
  /// Time from registration to the terminal fact (or to now)
  pub elapsed_ms: u64,
  /// Whether the terminal fact has been recorded
  pub finished: bool,
}

impl fmt::Display for TagStatsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[time = {}sec, ", self.elapsed_ms / 1000)?;
    for (name, count) in &self.counters {
      write!(f, "{name} = {count}, ")?;
    }
    write!(f, "total elements = {}]", self.total_elements)
  }
}

// ============================================================================
// Handle
// ============================================================================

/// Handle to communicate with a [`StatsActor`].
#[derive(Clone, Debug)]
pub struct StatsHandle {
  tx: mpsc::Sender<StatsMessage>,
}

impl StatsHandle {
  /// Create a new handle from a sender.
  pub fn new(tx: mpsc::Sender<StatsMessage>) -> Self {
    Self { tx }
  }

  /// Register a job and receive its fact sink. This is the handshake a
  /// tag-name processor performs on document start.
  pub async fn register(&self, job_id: JobId) -> Result<BoundedSink<TagFact>, SendError> {
    let (reply_tx, mut reply_rx) = mpsc::channel(1);
    self
      .tx
      .send(StatsMessage::Register { job_id, reply: reply_tx })
      .await
      .map_err(|_| SendError::ActorGone)?;
    reply_rx.recv().await.ok_or(SendError::ActorGone)
  }

  /// Read a job's current tally; `None` if the job never registered.
  pub async fn snapshot(&self, job_id: JobId) -> Result<Option<TagStatsSnapshot>, SendError> {
    let (reply_tx, mut reply_rx) = mpsc::channel(1);
    self
      .tx
      .send(StatsMessage::Snapshot { job_id, reply: reply_tx })
      .await
      .map_err(|_| SendError::ActorGone)?;
    reply_rx.recv().await.ok_or(SendError::ActorGone)
  }
}

// ============================================================================
// StatsActor
// ============================================================================

/// The tag statistics actor.
///
/// Owns every job's tally. Fact handling is prioritized over control
/// messages so snapshots observe the queue as drained as possible.
pub struct StatsActor {
  msg_rx: mpsc::Receiver<StatsMessage>,
  fact_rx: mpsc::Receiver<TagFact>,
  /// Prototype sink handed out on registration
  facts: BoundedSink<TagFact>,
  stats: HashMap<JobId, TagStats>,
  cancel: CancellationToken,
}

impl StatsActor {
  /// Spawn the actor and return a handle for registration and snapshots.
  pub fn spawn(config: &StatsConfig, cancel: CancellationToken) -> StatsHandle {
    let (tx, msg_rx) = mpsc::channel(32);
    let (facts, fact_rx) = sink::bounded(config.fact_capacity);
    let actor = Self {
      msg_rx,
      fact_rx,
      facts,
      stats: HashMap::new(),
      cancel,
    };
    tokio::spawn(actor.run());
    StatsHandle::new(tx)
  }

  /// Main actor loop.
  pub async fn run(mut self) {
    info!("tag statistics actor started");

    loop {
      tokio::select! {
          biased;

          _ = self.cancel.cancelled() => {
              info!("tag statistics actor shutting down (cancelled)");
              break;
          }

          fact = self.fact_rx.recv() => {
              match fact {
                  Some(fact) => self.record(fact),
                  None => break,
              }
          }

          msg = self.msg_rx.recv() => {
              match msg {
                  Some(msg) => self.handle_message(msg).await,
                  None => {
                      info!("tag statistics actor shutting down (channel closed)");
                      break;
                  }
              }
          }
      }
    }

    info!("tag statistics actor stopped");
  }

  async fn handle_message(&mut self, msg: StatsMessage) {
    match msg {
      StatsMessage::Register { job_id, reply } => {
        debug!(job_id, "registering job for tag statistics");
        self.stats.insert(job_id, TagStats::new());
        if reply.send(self.facts.clone()).await.is_err() {
          debug!(job_id, "registrant stopped waiting for the fact sink");
        }
      }
      StatsMessage::Snapshot { job_id, reply } => {
        let snapshot = self.stats.get(&job_id).map(TagStats::snapshot);
        let _ = reply.send(snapshot).await;
      }
    }
  }

  fn record(&mut self, fact: TagFact) {
    match fact {
      TagFact::Element { job_id, name } => match self.stats.get_mut(&job_id) {
        Some(stats) => stats.record(name),
        None => warn!(job_id, "element fact for unknown job"),
      },
      TagFact::Finished { job_id } => match self.stats.get_mut(&job_id) {
        Some(stats) => {
          stats.finish();
          info!(job_id, stats = %stats.snapshot(), "job statistics finalized");
        }
        None => warn!(job_id, "terminal fact for unknown job"),
      },
    }
  }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use pretty_assertions::assert_eq;

  use super::*;

  async fn finished_snapshot(handle: &StatsHandle, job_id: JobId) -> TagStatsSnapshot {
    for _ in 0..50 {
      if let Some(snapshot) = handle.snapshot(job_id).await.unwrap() {
        if snapshot.finished {
          return snapshot;
        }
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} never finalized");
  }

  #[tokio::test]
  async fn tallies_facts_per_job() {
    let cancel = CancellationToken::new();
    let handle = StatsActor::spawn(&StatsConfig::default(), cancel.clone());

    let sink = handle.register(1).await.unwrap();
    for name in ["book", "book", "library"] {
      sink
        .try_write(TagFact::Element {
          job_id: 1,
          name: name.to_string(),
        })
        .unwrap();
    }
    sink.try_write(TagFact::Finished { job_id: 1 }).unwrap();

    let snapshot = finished_snapshot(&handle, 1).await;
    assert_eq!(snapshot.total_elements, 3);
    assert_eq!(snapshot.counters, BTreeMap::from([("book".to_string(), 2), ("library".to_string(), 1)]));

    cancel.cancel();
  }

  #[tokio::test]
  async fn snapshot_of_unknown_job_is_none() {
    let cancel = CancellationToken::new();
    let handle = StatsActor::spawn(&StatsConfig::default(), cancel.clone());
    assert_eq!(handle.snapshot(42).await.unwrap(), None);
    cancel.cancel();
  }

  #[test]
  fn snapshot_renders_in_bracket_format() {
    let snapshot = TagStatsSnapshot {
      counters: BTreeMap::from([("book".to_string(), 40), ("title".to_string(), 2)]),
      total_elements: 42,
      elapsed_ms: 2_300,
      finished: true,
    };
    assert_eq!(snapshot.to_string(), "[time = 2sec, book = 40, title = 2, total elements = 42]");
  }

  #[test]
  fn tally_records_and_finishes() {
    let mut stats = TagStats::new();
    stats.record("a".to_string());
    stats.record("a".to_string());
    assert!(!stats.snapshot().finished);
    stats.finish();
    let snapshot = stats.snapshot();
    assert!(snapshot.finished);
    assert_eq!(snapshot.counters, BTreeMap::from([("a".to_string(), 2)]));
  }
}
