use crate::model::*;

use super::Engine;

impl Engine {
    /// Public read path: `{time, is_booked}` only, patient data excluded.
    /// First access for a date materializes its record from the template.
    pub async fn slots_for_date(&self, date: ScheduleDate) -> Vec<SlotView> {
        match self.get_or_create_schedule(date).await {
            Some(rec) => {
                let guard = rec.read().await;
                guard
                    .slots
                    .iter()
                    .map(|s| SlotView {
                        time: s.time.clone(),
                        is_booked: s.is_booked(),
                    })
                    .collect()
            }
            None => Vec::new(),
        }
    }

    /// Administrative view with patient fields. Does not generate on miss.
    pub async fn schedule_detail(&self, date: ScheduleDate) -> Option<Vec<SlotDetail>> {
        let rec = self.store.find_by_date(&date)?;
        let guard = rec.read().await;
        Some(guard.slots.iter().map(SlotDetail::from_slot).collect())
    }

    /// One summary row per live record, date-ordered.
    pub async fn schedule_summaries(&self) -> Vec<ScheduleSummary> {
        let mut summaries = Vec::new();
        for date in self.store.dates() {
            let Some(rec) = self.store.find_by_date(&date) else {
                continue;
            };
            let guard = rec.read().await;
            summaries.push(ScheduleSummary {
                date: guard.date,
                provider_id: guard.provider_id,
                version: guard.version,
                booked: guard.booked_count(),
                open: guard.open_count(),
            });
        }
        summaries
    }

    pub fn template_view(&self) -> Option<AvailabilityTemplate> {
        self.store.template()
    }
}
