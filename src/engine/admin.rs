use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::store::{ScheduleStore, SlotPatch};

use super::{Engine, EngineError};

fn validate_week(week: &WeekPlan) -> Result<(), EngineError> {
    for (_, times) in week.days() {
        if times.len() > MAX_SLOTS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many slots in one day"));
        }
        let mut seen = HashSet::new();
        for time in times {
            if time.is_empty() || time.len() > MAX_TIME_LABEL_LEN {
                return Err(EngineError::LimitExceeded("bad time label"));
            }
            if !seen.insert(time.as_str()) {
                return Err(EngineError::LimitExceeded("duplicate time label in one day"));
            }
        }
    }
    Ok(())
}

impl Engine {
    /// Replace the weekly availability wholesale, then drop future records
    /// with zero booked slots so they regenerate under the new template on
    /// next read. Records holding any booking are preserved untouched, even
    /// if stale relative to the new availability. Returns the purged dates.
    pub async fn replace_template(
        &self,
        provider_id: Ulid,
        week: WeekPlan,
    ) -> Result<Vec<ScheduleDate>, EngineError> {
        validate_week(&week)?;

        let event = Event::TemplateReplaced {
            provider_id,
            week: week.clone(),
        };
        self.wal_append(&event).await?;
        self.store
            .set_template(AvailabilityTemplate { provider_id, week });

        let purged = self
            .delete_future_unbooked(ScheduleDate::today_utc().succ())
            .await?;
        if !purged.is_empty() {
            info!("template replaced; purged {} future unbooked schedules", purged.len());
        }
        Ok(purged)
    }

    /// Remove every record on/after `on_or_after` that has zero booked
    /// slots. Each removal is decided and committed under that record's
    /// write lock, so it cannot race a reservation.
    pub async fn delete_future_unbooked(
        &self,
        on_or_after: ScheduleDate,
    ) -> Result<Vec<ScheduleDate>, EngineError> {
        let mut purged = Vec::new();
        for date in self.store.dates_on_or_after(on_or_after) {
            let Some(rec) = self.store.find_by_date(&date) else {
                continue;
            };
            let guard = rec.clone().write_owned().await;
            // Another sweep may have removed this record first; never delete
            // a record that is no longer the mapped one.
            if !self
                .store
                .find_by_date(&date)
                .is_some_and(|current| Arc::ptr_eq(&current, &rec))
            {
                continue;
            }
            if !guard.fully_unbooked() {
                continue;
            }
            let event = Event::ScheduleDeleted { date };
            self.wal_append(&event).await?;
            self.store.remove(&date);
            self.notify.send(date, &event);
            self.notify.remove(&date);
            drop(guard);
            purged.push(date);
        }
        metrics::counter!(crate::observability::SCHEDULES_PURGED_TOTAL)
            .increment(purged.len() as u64);
        Ok(purged)
    }

    /// Administrative status transition for a booked slot. Transitions are
    /// validated against the slot lifecycle; a booked slot never reopens.
    pub async fn set_slot_status(
        &self,
        date: ScheduleDate,
        time: &str,
        status: SlotStatus,
    ) -> Result<(), EngineError> {
        let rec = self
            .store
            .find_by_date(&date)
            .ok_or(EngineError::NotFound(date))?;
        let mut guard = rec.clone().write_owned().await;
        if !self
            .store
            .find_by_date(&date)
            .is_some_and(|current| Arc::ptr_eq(&current, &rec))
        {
            return Err(EngineError::NotFound(date));
        }

        let current = guard
            .slot(time)
            .ok_or_else(|| EngineError::NotBooked {
                date,
                time: time.to_string(),
            })?
            .booking()
            .ok_or_else(|| EngineError::NotBooked {
                date,
                time: time.to_string(),
            })?
            .status;
        if !current.can_transition_to(status) {
            return Err(EngineError::InvalidTransition {
                from: current,
                to: status,
            });
        }

        let expected_version = guard.version;
        let event = Event::SlotStatusSet {
            date,
            time: time.to_string(),
            status,
        };
        self.wal_append(&event).await?;
        ScheduleStore::conditional_update_slot(
            &mut guard,
            time,
            expected_version,
            SlotPatch::Status(status),
        )?;
        self.notify.send(date, &event);
        Ok(())
    }
}
