//! Drains the outbox to the backend.
//!
//! Triggered on reconnect, on an explicit background-sync signal, or at app
//! start while online. The drain is not transactional across records: a crash
//! mid-drain leaves some records synced and others pending, which is safe
//! because flipping `synced` is the only mutation and it is monotonic.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ApiConfig;
use crate::outbox::{Outbox, OutboxRecord, WriteKind};

/// Destination for outbox records.
#[async_trait]
pub trait RemoteWriter: Send + Sync {
  /// Deliver one record. Any non-2xx or transport error means the record
  /// stays pending; no distinction is made between permanent and transient
  /// failures, both are retried on the next trigger.
  async fn deliver(&self, record: &OutboxRecord) -> Result<()>;
}

/// Writer that POSTs each record's payload verbatim as a JSON body to the
/// endpoint for its kind.
pub struct HttpRemoteWriter {
  client: reqwest::Client,
  journal_url: String,
  habit_url: String,
}

impl HttpRemoteWriter {
  pub fn new(api: &ApiConfig) -> Self {
    Self {
      client: reqwest::Client::new(),
      journal_url: api.endpoint_url(&api.journal_endpoint),
      habit_url: api.endpoint_url(&api.habit_endpoint),
    }
  }
}

#[async_trait]
impl RemoteWriter for HttpRemoteWriter {
  async fn deliver(&self, record: &OutboxRecord) -> Result<()> {
    let url = match record.kind {
      WriteKind::JournalWrite => &self.journal_url,
      WriteKind::HabitCompletion => &self.habit_url,
    };

    let response = self
      .client
      .post(url)
      .json(&record.payload)
      .send()
      .await
      .map_err(|e| eyre!("Failed to deliver {}: {}", record.id, e))?;

    if !response.status().is_success() {
      return Err(eyre!(
        "Backend rejected {}: status {}",
        record.id,
        response.status()
      ));
    }

    Ok(())
  }
}

/// What prompted a drain attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainTrigger {
  /// Transition from offline to online
  Reconnect,
  /// Explicit background-sync signal
  BackgroundSync,
  /// App start while online
  AppStart,
}

/// Result of a drain attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
  Completed(DrainReport),
  /// Another drain already holds the guard; this trigger was dropped. The
  /// records it would have delivered are still pending and will go out on
  /// the next trigger.
  AlreadyRunning,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
  pub attempted: usize,
  pub delivered: usize,
  pub failed: usize,
  /// Synced records purged by the retention sweep
  pub swept: usize,
}

/// Coordinates outbox drains and the retention sweep.
pub struct SyncCoordinator<W: RemoteWriter> {
  outbox: Arc<Outbox>,
  writer: W,
  /// How long a synced record is kept before the sweep purges it
  retention: Duration,
  drain_guard: tokio::sync::Mutex<()>,
}

impl<W: RemoteWriter> SyncCoordinator<W> {
  pub fn new(outbox: Arc<Outbox>, writer: W) -> Self {
    Self {
      outbox,
      writer,
      retention: Duration::days(7),
      drain_guard: tokio::sync::Mutex::new(()),
    }
  }

  /// Set the retention horizon for synced records.
  pub fn with_retention(mut self, retention: Duration) -> Self {
    self.retention = retention;
    self
  }

  /// Attempt to deliver every pending record.
  ///
  /// Drains are mutually exclusive: a trigger arriving while one runs is
  /// dropped rather than double-processing the same snapshot. Failed records
  /// stay pending and are retried unconditionally on the next trigger. After
  /// a drain with zero failures, synced records past the retention horizon
  /// are purged.
  pub async fn drain(&self, trigger: DrainTrigger) -> DrainOutcome {
    let _guard = match self.drain_guard.try_lock() {
      Ok(guard) => guard,
      Err(_) => {
        debug!(?trigger, "drain already in progress, dropping trigger");
        return DrainOutcome::AlreadyRunning;
      }
    };

    // Snapshot: records enqueued from here on wait for the next trigger.
    // A store error is logged and treated as "no pending items", which is
    // ambiguous with truly-none; the next trigger resolves it.
    let pending = match self.outbox.list_unsynced(None) {
      Ok(records) => records,
      Err(err) => {
        warn!(%err, "could not read pending records");
        Vec::new()
      }
    };

    let mut report = DrainReport {
      attempted: pending.len(),
      ..Default::default()
    };

    for record in &pending {
      match self.writer.deliver(record).await {
        Ok(()) => match self.outbox.mark_synced(&record.id) {
          Ok(()) => report.delivered += 1,
          Err(err) => {
            // Delivered but not recorded: the next drain re-delivers, and
            // the backend's idempotent handling absorbs the duplicate.
            warn!(id = %record.id, %err, "delivered but could not mark synced");
            report.failed += 1;
          }
        },
        Err(err) => {
          warn!(id = %record.id, kind = %record.kind, %err, "delivery failed, leaving pending");
          report.failed += 1;
        }
      }
    }

    if report.failed == 0 {
      match self.outbox.sweep_synced_before(Utc::now() - self.retention) {
        Ok(swept) => report.swept = swept,
        Err(err) => warn!(%err, "retention sweep failed"),
      }
    }

    if report.attempted > 0 {
      info!(
        ?trigger,
        delivered = report.delivered,
        failed = report.failed,
        "drain finished"
      );
    }

    DrainOutcome::Completed(report)
  }
}
