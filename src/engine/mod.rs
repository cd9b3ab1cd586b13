pub mod availability;
pub mod calendar;
pub mod conflict;
mod error;
mod mutations;
mod queries;
pub mod slots;
mod store;

pub use availability::{compute_availability, slot_availability};
pub use calendar::{WindowSource, WorkingWindow, resolve_working_window};
pub use conflict::{first_conflict, is_stylist_free, overlaps};
pub use error::EngineError;
pub use slots::generate_slots;
pub use store::InMemoryStore;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::info;

use crate::config::BookingPolicy;
use crate::model::*;
use crate::notify::{self, Notification, NotificationKind, NotificationSink};
use crate::wal::Wal;

pub type SharedAppointment = Arc<RwLock<Appointment>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Takes the first append, drains whatever else is already
/// queued, then commits the whole batch with a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        flush_and_respond(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after a failed append so no partial frame leaks into the next batch.
    let flushed = wal.flush_sync();
    match append_err {
        Some(e) => Err(e),
        None => flushed,
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            flush_and_respond(wal, &mut batch);
        }
    }
}

/// One tenant's booking engine: documents, appointments, WAL and notifier.
pub struct Engine {
    pub(super) store: InMemoryStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) notifier: Arc<dyn NotificationSink>,
    pub(super) policy: BookingPolicy,
    /// Shared by every mutation from validation to apply; compaction takes it
    /// exclusively so its snapshot never misses an event already in the log.
    pub(super) commit_gate: RwLock<()>,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer task.
    pub fn new(
        wal_path: PathBuf,
        notifier: Arc<dyn NotificationSink>,
        policy: BookingPolicy,
    ) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = InMemoryStore::new();
        for event in &events {
            store.replay_event(event);
        }
        if !events.is_empty() {
            info!(
                path = %wal_path.display(),
                events = events.len(),
                branches = store.branch_count(),
                appointments = store.appointment_count(),
                "replayed WAL"
            );
        }

        Ok(Self {
            store,
            wal_tx,
            notifier,
            policy,
            commit_gate: RwLock::new(()),
        })
    }

    pub fn policy(&self) -> &BookingPolicy {
        &self.policy
    }

    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    /// Persist then apply a catalog event (branch or calendar).
    pub(super) async fn persist_catalog(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_catalog(event);
        Ok(())
    }

    /// Persist then apply an appointment update; the caller holds the write lock.
    pub(super) async fn persist_and_apply(
        &self,
        appointment: &mut Appointment,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        InMemoryStore::apply_to_appointment(appointment, event);
        Ok(())
    }

    /// Notify the client and every assigned stylist, without waiting.
    pub(super) fn announce(&self, kind: NotificationKind, appointment: &Appointment) {
        notify::fan_out(
            self.notifier.clone(),
            Notification::for_appointment(kind, appointment),
            notify::recipients(appointment),
        );
    }

    pub(super) fn appointment_handle(&self, id: ulid::Ulid) -> Result<SharedAppointment, EngineError> {
        self.store
            .get_appointment(&id)
            .ok_or_else(|| EngineError::not_found("appointment", id))
    }
}
