use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only instant type.
pub type Ms = i64;

/// All seven weekdays, Monday-first. The canonical iteration order for
/// template views and `WeekPlan` storage.
pub const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Calendar-date key, `YYYY-MM-DD`. Lexicographic order of the rendered form
/// equals chronological order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScheduleDate(NaiveDate);

impl ScheduleDate {
    /// Parse a `YYYY-MM-DD` key. Anything else is rejected.
    pub fn parse(s: &str) -> Option<Self> {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().map(Self)
    }

    pub fn weekday(&self) -> Weekday {
        self.0.weekday()
    }

    /// Long-form date used in confirmation messages, e.g. "Monday, August 10, 2026".
    pub fn long_form(&self) -> String {
        self.0.format("%A, %B %-d, %Y").to_string()
    }

    pub fn today_utc() -> Self {
        Self(chrono::Utc::now().date_naive())
    }

    /// The next calendar day. Saturates at the calendar's end.
    pub fn succ(&self) -> Self {
        Self(self.0.succ_opt().unwrap_or(self.0))
    }

    pub fn plus_days(&self, days: u64) -> Self {
        Self(
            self.0
                .checked_add_days(chrono::Days::new(days))
                .unwrap_or(self.0),
        )
    }
}

impl fmt::Display for ScheduleDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

/// Full weekday name for template views ("Monday", not chrono's "Mon").
pub fn day_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Accepts full names and chrono's abbreviations, case-insensitive.
pub fn parse_day_name(s: &str) -> Option<Weekday> {
    Weekday::from_str(s).ok()
}

/// Offerable time labels per weekday, Monday-first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekPlan([Vec<String>; 7]);

impl WeekPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, day: Weekday, times: Vec<String>) {
        self.0[day.num_days_from_monday() as usize] = times;
    }

    pub fn times_for(&self, day: Weekday) -> &[String] {
        &self.0[day.num_days_from_monday() as usize]
    }

    /// Iterate all seven days Monday-first, including empty ones.
    pub fn days(&self) -> impl Iterator<Item = (Weekday, &[String])> {
        WEEKDAYS.iter().map(|&day| (day, self.times_for(day)))
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|times| times.is_empty())
    }
}

/// Weekly availability owned by one provider. Read-only to the scheduling
/// core; replaced wholesale by the administrative template update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityTemplate {
    pub provider_id: Ulid,
    pub week: WeekPlan,
}

/// Administrative lifecycle of a booked slot. Booked slots never revert to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotStatus {
    Pending,
    Confirmed,
    Visited,
    Cancelled,
    NoShow,
}

impl SlotStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "visited" => Some(Self::Visited),
            "cancelled" => Some(Self::Cancelled),
            "no-show" => Some(Self::NoShow),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Visited => "visited",
            Self::Cancelled => "cancelled",
            Self::NoShow => "no-show",
        }
    }

    /// `pending → {confirmed, cancelled, no-show} → visited`; visited is terminal.
    pub fn can_transition_to(self, next: SlotStatus) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Confirmed | Self::Cancelled | Self::NoShow),
            Self::Confirmed | Self::Cancelled | Self::NoShow => matches!(next, Self::Visited),
            Self::Visited => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub name: String,
    pub mobile: String,
    pub email: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Opaque reservation identifier.
    pub id: Ulid,
    pub patient: Patient,
    pub status: SlotStatus,
}

/// Occupancy is a sum type: patient data exists only inside `Booked`, so an
/// open slot cannot carry stale identifying fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotState {
    Open,
    Booked(Booking),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub time: String,
    pub state: SlotState,
    /// Reserved for soft-hold semantics; never set by any current operation.
    pub locked_until: Option<Ms>,
}

impl Slot {
    pub fn open(time: impl Into<String>) -> Self {
        Self {
            time: time.into(),
            state: SlotState::Open,
            locked_until: None,
        }
    }

    pub fn is_booked(&self) -> bool {
        matches!(self.state, SlotState::Booked(_))
    }

    pub fn booking(&self) -> Option<&Booking> {
        match &self.state {
            SlotState::Booked(b) => Some(b),
            SlotState::Open => None,
        }
    }
}

/// One record per date, created lazily from the template. `version` increments
/// on every slot mutation and backs the optimistic-concurrency check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRecord {
    pub date: ScheduleDate,
    pub provider_id: Ulid,
    pub slots: Vec<Slot>,
    pub version: u64,
}

impl ScheduleRecord {
    pub fn new(date: ScheduleDate, provider_id: Ulid, times: &[String]) -> Self {
        Self {
            date,
            provider_id,
            slots: times.iter().map(|t| Slot::open(t.as_str())).collect(),
            version: 0,
        }
    }

    pub fn slot(&self, time: &str) -> Option<&Slot> {
        self.slots.iter().find(|s| s.time == time)
    }

    fn slot_mut(&mut self, time: &str) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|s| s.time == time)
    }

    /// Duplicate-guard probe: any booked slot holding this mobile number,
    /// regardless of its administrative status.
    pub fn booking_for_mobile(&self, mobile: &str) -> Option<&Slot> {
        self.slots
            .iter()
            .find(|s| s.booking().is_some_and(|b| b.patient.mobile == mobile))
    }

    pub fn booked_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_booked()).count()
    }

    pub fn open_count(&self) -> usize {
        self.slots.len() - self.booked_count()
    }

    pub fn fully_unbooked(&self) -> bool {
        self.slots.iter().all(|s| !s.is_booked())
    }

    /// Unconditional apply of a booking; bumps the version. Returns false if
    /// the slot is missing or already booked (stale replayed event).
    pub fn book_slot(&mut self, time: &str, booking: Booking) -> bool {
        match self.slot_mut(time) {
            Some(slot) if !slot.is_booked() => {
                slot.state = SlotState::Booked(booking);
                self.version += 1;
                true
            }
            _ => false,
        }
    }

    /// Unconditional status write; bumps the version. Returns false if the
    /// slot is missing or open.
    pub fn set_status(&mut self, time: &str, status: SlotStatus) -> bool {
        match self.slot_mut(time) {
            Some(slot) => match &mut slot.state {
                SlotState::Booked(b) => {
                    b.status = status;
                    self.version += 1;
                    true
                }
                SlotState::Open => false,
            },
            None => false,
        }
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    TemplateReplaced {
        provider_id: Ulid,
        week: WeekPlan,
    },
    ScheduleCreated {
        date: ScheduleDate,
        provider_id: Ulid,
        times: Vec<String>,
    },
    SlotBooked {
        date: ScheduleDate,
        time: String,
        booking: Booking,
    },
    SlotStatusSet {
        date: ScheduleDate,
        time: String,
        status: SlotStatus,
    },
    ScheduleDeleted {
        date: ScheduleDate,
    },
    /// Full-record snapshot written by WAL compaction; per-slot events cannot
    /// reproduce the version counter.
    ScheduleSnapshot {
        date: ScheduleDate,
        provider_id: Ulid,
        slots: Vec<Slot>,
        version: u64,
    },
}

impl Event {
    /// The date whose channel this event is published on, if any.
    pub fn date(&self) -> Option<ScheduleDate> {
        match self {
            Event::ScheduleCreated { date, .. }
            | Event::SlotBooked { date, .. }
            | Event::SlotStatusSet { date, .. }
            | Event::ScheduleDeleted { date }
            | Event::ScheduleSnapshot { date, .. } => Some(*date),
            Event::TemplateReplaced { .. } => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// Public booking-client view: no patient data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotView {
    pub time: String,
    pub is_booked: bool,
}

/// Administrative view: patient fields included for booked slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotDetail {
    pub time: String,
    pub is_booked: bool,
    pub patient_name: Option<String>,
    pub patient_mobile: Option<String>,
    pub patient_email: Option<String>,
    pub reason: Option<String>,
    pub status: Option<SlotStatus>,
}

impl SlotDetail {
    pub fn from_slot(slot: &Slot) -> Self {
        match slot.booking() {
            Some(b) => Self {
                time: slot.time.clone(),
                is_booked: true,
                patient_name: Some(b.patient.name.clone()),
                patient_mobile: Some(b.patient.mobile.clone()),
                patient_email: b.patient.email.clone(),
                reason: b.patient.reason.clone(),
                status: Some(b.status),
            },
            None => Self {
                time: slot.time.clone(),
                is_booked: false,
                patient_name: None,
                patient_mobile: None,
                patient_email: None,
                reason: None,
                status: None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSummary {
    pub date: ScheduleDate,
    pub provider_id: Ulid,
    pub version: u64,
    pub booked: usize,
    pub open: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patient(mobile: &str) -> Patient {
        Patient {
            name: "A".into(),
            mobile: mobile.into(),
            email: None,
            reason: None,
        }
    }

    fn booking(mobile: &str) -> Booking {
        Booking {
            id: Ulid::new(),
            patient: patient(mobile),
            status: SlotStatus::Pending,
        }
    }

    #[test]
    fn date_parse_and_weekday() {
        let d = ScheduleDate::parse("2026-08-10").unwrap();
        assert_eq!(d.weekday(), Weekday::Mon);
        assert_eq!(d.to_string(), "2026-08-10");
        assert!(ScheduleDate::parse("2026-13-01").is_none());
        assert!(ScheduleDate::parse("next tuesday").is_none());
    }

    #[test]
    fn date_ordering_is_chronological() {
        let a = ScheduleDate::parse("2026-08-09").unwrap();
        let b = ScheduleDate::parse("2026-08-10").unwrap();
        assert!(a < b);
    }

    #[test]
    fn week_plan_set_and_lookup() {
        let mut week = WeekPlan::new();
        week.set(Weekday::Mon, vec!["09:00".into(), "10:00".into()]);
        assert_eq!(week.times_for(Weekday::Mon), ["09:00", "10:00"]);
        assert!(week.times_for(Weekday::Tue).is_empty());
        assert!(!week.is_empty());
    }

    #[test]
    fn week_plan_days_iterates_monday_first() {
        let mut week = WeekPlan::new();
        week.set(Weekday::Sun, vec!["11:00".into()]);
        let days: Vec<_> = week.days().collect();
        assert_eq!(days.len(), 7);
        assert_eq!(days[0].0, Weekday::Mon);
        assert_eq!(days[6].0, Weekday::Sun);
        assert_eq!(days[6].1, ["11:00"]);
    }

    #[test]
    fn day_names_round_trip() {
        for day in WEEKDAYS {
            assert_eq!(parse_day_name(day_name(day)), Some(day));
        }
        assert!(parse_day_name("Funday").is_none());
    }

    #[test]
    fn status_transitions() {
        use SlotStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Pending.can_transition_to(NoShow));
        assert!(Confirmed.can_transition_to(Visited));
        assert!(!Pending.can_transition_to(Visited));
        assert!(!Visited.can_transition_to(Pending));
        assert!(!Confirmed.can_transition_to(Pending));
    }

    #[test]
    fn status_round_trips_names() {
        for s in [
            SlotStatus::Pending,
            SlotStatus::Confirmed,
            SlotStatus::Visited,
            SlotStatus::Cancelled,
            SlotStatus::NoShow,
        ] {
            assert_eq!(SlotStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(SlotStatus::parse("noshow"), None);
    }

    #[test]
    fn new_record_is_all_open_at_version_zero() {
        let date = ScheduleDate::parse("2026-08-10").unwrap();
        let rec = ScheduleRecord::new(date, Ulid::new(), &["09:00".into(), "10:00".into()]);
        assert_eq!(rec.version, 0);
        assert_eq!(rec.slots.len(), 2);
        assert!(rec.fully_unbooked());
        assert!(rec.slot("09:00").is_some_and(|s| !s.is_booked()));
    }

    #[test]
    fn book_slot_bumps_version_once() {
        let date = ScheduleDate::parse("2026-08-10").unwrap();
        let mut rec = ScheduleRecord::new(date, Ulid::new(), &["09:00".into()]);
        assert!(rec.book_slot("09:00", booking("111")));
        assert_eq!(rec.version, 1);
        assert_eq!(rec.booked_count(), 1);

        // Second claim on the same slot is refused and leaves version alone.
        assert!(!rec.book_slot("09:00", booking("222")));
        assert_eq!(rec.version, 1);
        assert_eq!(
            rec.slot("09:00").unwrap().booking().unwrap().patient.mobile,
            "111"
        );
    }

    #[test]
    fn book_slot_unknown_time_is_refused() {
        let date = ScheduleDate::parse("2026-08-10").unwrap();
        let mut rec = ScheduleRecord::new(date, Ulid::new(), &["09:00".into()]);
        assert!(!rec.book_slot("09:30", booking("111")));
        assert_eq!(rec.version, 0);
    }

    #[test]
    fn booking_for_mobile_finds_any_status() {
        let date = ScheduleDate::parse("2026-08-10").unwrap();
        let mut rec = ScheduleRecord::new(date, Ulid::new(), &["09:00".into(), "10:00".into()]);
        rec.book_slot("09:00", booking("111"));
        rec.set_status("09:00", SlotStatus::Cancelled);
        assert!(rec.booking_for_mobile("111").is_some());
        assert!(rec.booking_for_mobile("222").is_none());
    }

    #[test]
    fn set_status_on_open_slot_is_refused() {
        let date = ScheduleDate::parse("2026-08-10").unwrap();
        let mut rec = ScheduleRecord::new(date, Ulid::new(), &["09:00".into()]);
        assert!(!rec.set_status("09:00", SlotStatus::Confirmed));
        assert_eq!(rec.version, 0);
    }

    #[test]
    fn open_slot_carries_no_patient_fields() {
        let detail = SlotDetail::from_slot(&Slot::open("09:00"));
        assert!(!detail.is_booked);
        assert!(detail.patient_name.is_none());
        assert!(detail.patient_mobile.is_none());
        assert!(detail.status.is_none());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::SlotBooked {
            date: ScheduleDate::parse("2026-08-10").unwrap(),
            time: "09:00".into(),
            booking: booking("111"),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
