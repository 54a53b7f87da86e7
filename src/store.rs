use std::sync::{Arc, RwLock as StdRwLock};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::engine::EngineError;
use crate::model::*;

pub type SharedScheduleState = Arc<RwLock<ScheduleRecord>>;

/// Mutation applied by `conditional_update_slot`.
#[derive(Debug, Clone)]
pub enum SlotPatch {
    Book(Booking),
    Status(SlotStatus),
}

/// In-memory Schedule Store: one lock per date record, so reservations on
/// different dates never contend. The per-record write lock is the
/// reservation transaction boundary.
pub struct ScheduleStore {
    schedules: DashMap<ScheduleDate, SharedScheduleState>,
    template: StdRwLock<Option<AvailabilityTemplate>>,
}

impl Default for ScheduleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ScheduleStore {
    pub fn new() -> Self {
        Self {
            schedules: DashMap::new(),
            template: StdRwLock::new(None),
        }
    }

    // ── Schedule records ─────────────────────────────────────

    pub fn schedule_count(&self) -> usize {
        self.schedules.len()
    }

    pub fn find_by_date(&self, date: &ScheduleDate) -> Option<SharedScheduleState> {
        self.schedules.get(date).map(|e| e.value().clone())
    }

    /// Insert unless a record for that date already exists. Exactly one
    /// record survives per date no matter how many creators race; losers get
    /// the winner's record back.
    pub fn create_if_absent(&self, record: ScheduleRecord) -> (SharedScheduleState, bool) {
        match self.schedules.entry(record.date) {
            Entry::Occupied(e) => (e.get().clone(), false),
            Entry::Vacant(v) => {
                let state = Arc::new(RwLock::new(record));
                v.insert(state.clone());
                (state, true)
            }
        }
    }

    pub fn remove(&self, date: &ScheduleDate) -> Option<SharedScheduleState> {
        self.schedules.remove(date).map(|(_, state)| state)
    }

    pub fn dates(&self) -> Vec<ScheduleDate> {
        let mut dates: Vec<ScheduleDate> = self.schedules.iter().map(|e| *e.key()).collect();
        dates.sort();
        dates
    }

    pub fn dates_on_or_after(&self, cutoff: ScheduleDate) -> Vec<ScheduleDate> {
        let mut dates: Vec<ScheduleDate> = self
            .schedules
            .iter()
            .map(|e| *e.key())
            .filter(|d| *d >= cutoff)
            .collect();
        dates.sort();
        dates
    }

    // ── Availability template ────────────────────────────────

    pub fn template(&self) -> Option<AvailabilityTemplate> {
        self.template.read().expect("template lock poisoned").clone()
    }

    pub fn set_template(&self, template: AvailabilityTemplate) {
        *self.template.write().expect("template lock poisoned") = Some(template);
    }

    // ── Conditional slot update ──────────────────────────────

    /// The one operation needing more than read-then-write: a compare-and-swap
    /// on `(slot state, version == expected)`, incrementing the version on
    /// success. The caller must hold the record's write lock; this function is
    /// the only sanctioned way to mutate a slot outside WAL replay.
    pub fn conditional_update_slot(
        record: &mut ScheduleRecord,
        time: &str,
        expected_version: u64,
        patch: SlotPatch,
    ) -> Result<(), EngineError> {
        if record.version != expected_version {
            return Err(EngineError::VersionMismatch {
                date: record.date,
                expected: expected_version,
                actual: record.version,
            });
        }
        match patch {
            SlotPatch::Book(booking) => {
                if !record.book_slot(time, booking) {
                    return Err(EngineError::SlotUnavailable {
                        date: record.date,
                        time: time.to_string(),
                    });
                }
            }
            SlotPatch::Status(status) => {
                if !record.set_status(time, status) {
                    return Err(EngineError::NotBooked {
                        date: record.date,
                        time: time.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn date(s: &str) -> ScheduleDate {
        ScheduleDate::parse(s).unwrap()
    }

    fn record(s: &str) -> ScheduleRecord {
        ScheduleRecord::new(date(s), Ulid::new(), &["09:00".into(), "10:00".into()])
    }

    fn booking(mobile: &str) -> Booking {
        Booking {
            id: Ulid::new(),
            patient: Patient {
                name: "A".into(),
                mobile: mobile.into(),
                email: None,
                reason: None,
            },
            status: SlotStatus::Pending,
        }
    }

    #[test]
    fn create_if_absent_keeps_first_record() {
        let store = ScheduleStore::new();
        let (_, first) = store.create_if_absent(record("2026-08-10"));
        assert!(first);

        let mut loser = record("2026-08-10");
        loser.slots.pop(); // different shape; must not replace the winner
        let (state, inserted) = store.create_if_absent(loser);
        assert!(!inserted);
        assert_eq!(state.try_read().unwrap().slots.len(), 2);
        assert_eq!(store.schedule_count(), 1);
    }

    #[test]
    fn dates_on_or_after_filters_and_sorts() {
        let store = ScheduleStore::new();
        for d in ["2026-08-12", "2026-08-10", "2026-08-11"] {
            store.create_if_absent(record(d));
        }
        assert_eq!(
            store.dates_on_or_after(date("2026-08-11")),
            vec![date("2026-08-11"), date("2026-08-12")]
        );
        assert_eq!(store.dates().len(), 3);
    }

    #[test]
    fn conditional_update_books_and_bumps_version() {
        let mut rec = record("2026-08-10");
        ScheduleStore::conditional_update_slot(&mut rec, "09:00", 0, SlotPatch::Book(booking("111")))
            .unwrap();
        assert_eq!(rec.version, 1);
        assert!(rec.slot("09:00").unwrap().is_booked());
    }

    #[test]
    fn conditional_update_rejects_stale_version() {
        let mut rec = record("2026-08-10");
        let result = ScheduleStore::conditional_update_slot(
            &mut rec,
            "09:00",
            7,
            SlotPatch::Book(booking("111")),
        );
        assert!(matches!(result, Err(EngineError::VersionMismatch { .. })));
        assert!(!rec.slot("09:00").unwrap().is_booked());
        assert_eq!(rec.version, 0);
    }

    #[test]
    fn conditional_update_rejects_taken_slot() {
        let mut rec = record("2026-08-10");
        ScheduleStore::conditional_update_slot(&mut rec, "09:00", 0, SlotPatch::Book(booking("111")))
            .unwrap();
        let result = ScheduleStore::conditional_update_slot(
            &mut rec,
            "09:00",
            1,
            SlotPatch::Book(booking("222")),
        );
        assert!(matches!(result, Err(EngineError::SlotUnavailable { .. })));
        assert_eq!(
            rec.slot("09:00").unwrap().booking().unwrap().patient.mobile,
            "111"
        );
    }

    #[test]
    fn conditional_status_update_requires_booking() {
        let mut rec = record("2026-08-10");
        let result = ScheduleStore::conditional_update_slot(
            &mut rec,
            "09:00",
            0,
            SlotPatch::Status(SlotStatus::Confirmed),
        );
        assert!(matches!(result, Err(EngineError::NotBooked { .. })));
    }

    #[test]
    fn template_round_trip() {
        let store = ScheduleStore::new();
        assert!(store.template().is_none());
        let template = AvailabilityTemplate {
            provider_id: Ulid::new(),
            week: WeekPlan::new(),
        };
        store.set_template(template.clone());
        assert_eq!(store.template(), Some(template));
    }
}
