mod admin;
mod error;
mod generate;
mod queries;
mod reserve;
#[cfg(test)]
mod tests;

pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::dispatch::ConfirmationDispatcher;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::store::{ScheduleStore, SharedScheduleState};
use crate::wal::Wal;

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

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
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
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// Apply a slot-level event to a record (no locking — caller holds the lock).
/// Map-level events (create/delete/template/snapshot) are handled against the
/// store directly.
fn apply_to_record(rec: &mut ScheduleRecord, event: &Event) {
    match event {
        Event::SlotBooked { time, booking, .. } => {
            // Refused for an already-booked slot; stale events lose.
            let _ = rec.book_slot(time, booking.clone());
        }
        Event::SlotStatusSet { time, status, .. } => {
            let _ = rec.set_status(time, *status);
        }
        Event::TemplateReplaced { .. }
        | Event::ScheduleCreated { .. }
        | Event::ScheduleSnapshot { .. }
        | Event::ScheduleDeleted { .. } => {}
    }
}

/// One tenant's scheduling engine: in-memory store + WAL + event broadcast +
/// post-commit confirmation dispatch.
pub struct Engine {
    pub(super) store: ScheduleStore,
    wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) dispatch: Arc<ConfirmationDispatcher>,
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        dispatch: Arc<ConfirmationDispatcher>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: ScheduleStore::new(),
            wal_tx,
            notify,
            dispatch,
        };

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds (no contention). Never use blocking_write here because
        // this may run inside an async context (lazy tenant creation).
        for event in &events {
            match event {
                Event::TemplateReplaced { provider_id, week } => {
                    engine.store.set_template(AvailabilityTemplate {
                        provider_id: *provider_id,
                        week: week.clone(),
                    });
                }
                Event::ScheduleCreated {
                    date,
                    provider_id,
                    times,
                } => {
                    // Losers of a creation race logged duplicates; first wins.
                    let _ = engine
                        .store
                        .create_if_absent(ScheduleRecord::new(*date, *provider_id, times));
                }
                Event::ScheduleSnapshot {
                    date,
                    provider_id,
                    slots,
                    version,
                } => {
                    let _ = engine.store.create_if_absent(ScheduleRecord {
                        date: *date,
                        provider_id: *provider_id,
                        slots: slots.clone(),
                        version: *version,
                    });
                }
                Event::ScheduleDeleted { date } => {
                    engine.store.remove(date);
                }
                other => {
                    if let Some(date) = other.date()
                        && let Some(rec) = engine.store.find_by_date(&date)
                    {
                        let mut guard = rec.try_write().expect("replay: uncontended write");
                        apply_to_record(&mut guard, other);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_schedule(&self, date: &ScheduleDate) -> Option<SharedScheduleState> {
        self.store.find_by_date(date)
    }

    /// Compact the WAL down to the events needed to recreate current state:
    /// the template plus one snapshot per live record (snapshots carry the
    /// version counter, which per-slot events could not reproduce).
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();
        if let Some(template) = self.store.template() {
            events.push(Event::TemplateReplaced {
                provider_id: template.provider_id,
                week: template.week,
            });
        }
        for date in self.store.dates() {
            let Some(rec) = self.store.find_by_date(&date) else {
                continue;
            };
            let guard = rec.read().await;
            events.push(Event::ScheduleSnapshot {
                date: guard.date,
                provider_id: guard.provider_id,
                slots: guard.slots.clone(),
                version: guard.version,
            });
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
