use tracing::warn;

use crate::limits::*;
use crate::model::*;
use crate::store::SharedScheduleState;

use super::Engine;

impl Engine {
    /// Look up the record for `date`, materializing it from the weekly
    /// template on first access. `None` means "no slots offered this day",
    /// a terminal state rather than an error: no template, no entry for the
    /// weekday, an empty entry, or a failed persist all land here, and
    /// nothing is written for such days.
    pub async fn get_or_create_schedule(&self, date: ScheduleDate) -> Option<SharedScheduleState> {
        if let Some(rec) = self.store.find_by_date(&date) {
            // Found records are returned unchanged, never merged with
            // later template edits.
            return Some(rec);
        }

        let template = match self.store.template() {
            Some(t) => t,
            None => {
                warn!("no availability template configured; {date} offers no slots");
                return None;
            }
        };
        let times = template.week.times_for(date.weekday());
        if times.is_empty() {
            return None;
        }
        if self.store.schedule_count() >= MAX_SCHEDULES_PER_TENANT {
            warn!("schedule cap reached; not generating {date}");
            return None;
        }

        let record = ScheduleRecord::new(date, template.provider_id, times);
        let event = Event::ScheduleCreated {
            date,
            provider_id: template.provider_id,
            times: times.to_vec(),
        };
        // Cache-fill path: a persistence failure degrades to "no slots
        // available" and the next read retries.
        if let Err(e) = self.wal_append(&event).await {
            warn!("schedule auto-generation for {date} failed: {e}");
            return None;
        }

        // First-access races are possible; exactly one record survives.
        // A loser's ScheduleCreated entry stays in the WAL and is ignored
        // on replay by the same first-wins rule.
        let (rec, created) = self.store.create_if_absent(record);
        if created {
            metrics::counter!(crate::observability::SCHEDULES_GENERATED_TOTAL).increment(1);
            self.notify.send(date, &event);
        }
        Some(rec)
    }
}
