use std::path::PathBuf;
use std::sync::Arc;

use chrono::Weekday;
use ulid::Ulid;

use crate::dispatch::ConfirmationDispatcher;
use crate::model::*;
use crate::wal::Wal;

use super::{Engine, EngineError};
use crate::notify::NotifyHub;

/// A Monday.
const MONDAY: &str = "2026-08-10";
/// The Tuesday after it.
const TUESDAY: &str = "2026-08-11";

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("slotd_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn open_engine(path: &PathBuf) -> Engine {
    Engine::new(
        path.clone(),
        Arc::new(NotifyHub::new()),
        Arc::new(ConfirmationDispatcher::new(None, None, None)),
    )
    .unwrap()
}

fn mk_engine(name: &str) -> Engine {
    open_engine(&test_wal_path(name))
}

fn date(s: &str) -> ScheduleDate {
    ScheduleDate::parse(s).unwrap()
}

fn patient(name: &str, mobile: &str) -> Patient {
    Patient {
        name: name.into(),
        mobile: mobile.into(),
        email: None,
        reason: None,
    }
}

fn monday_week(times: &[&str]) -> WeekPlan {
    let mut week = WeekPlan::new();
    week.set(Weekday::Mon, times.iter().map(|t| t.to_string()).collect());
    week
}

/// Same times on all seven days, so date-relative tests don't care which
/// weekday "today + n" lands on.
fn full_week(times: &[&str]) -> WeekPlan {
    let mut week = WeekPlan::new();
    for day in WEEKDAYS {
        week.set(day, times.iter().map(|t| t.to_string()).collect());
    }
    week
}

async fn seed(engine: &Engine, week: WeekPlan) -> Ulid {
    let provider_id = Ulid::new();
    engine.replace_template(provider_id, week).await.unwrap();
    provider_id
}

// ── Schedule generation ──────────────────────────────────

#[tokio::test]
async fn generate_creates_schedule_from_template() {
    let engine = mk_engine("generate_basic.wal");
    seed(&engine, monday_week(&["09:00", "10:00"])).await;

    let slots = engine.slots_for_date(date(MONDAY)).await;
    assert_eq!(slots.len(), 2);
    assert!(slots.iter().all(|s| !s.is_booked));
    assert_eq!(slots[0].time, "09:00");
    assert_eq!(slots[1].time, "10:00");

    let rec = engine.get_schedule(&date(MONDAY)).unwrap();
    let guard = rec.read().await;
    assert_eq!(guard.version, 0);
}

#[tokio::test]
async fn generate_is_idempotent() {
    let engine = mk_engine("generate_idempotent.wal");
    seed(&engine, monday_week(&["09:00"])).await;

    let first = engine.get_or_create_schedule(date(MONDAY)).await.unwrap();
    let second = engine.get_or_create_schedule(date(MONDAY)).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(engine.store.schedule_count(), 1);
}

#[tokio::test]
async fn concurrent_generation_yields_one_record() {
    let engine = Arc::new(mk_engine("generate_concurrent.wal"));
    seed(&engine, monday_week(&["09:00", "10:00"])).await;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.slots_for_date(date(MONDAY)).await
        }));
    }
    for handle in handles {
        let slots = handle.await.unwrap();
        assert_eq!(slots.len(), 2);
    }
    assert_eq!(engine.store.schedule_count(), 1);
}

#[tokio::test]
async fn empty_weekday_is_terminal_not_error() {
    let engine = mk_engine("empty_weekday.wal");
    seed(&engine, monday_week(&["09:00"])).await;

    // Template has no Tuesday entry
    let slots = engine.slots_for_date(date(TUESDAY)).await;
    assert!(slots.is_empty());
    // ...and nothing was persisted for it
    assert!(engine.get_schedule(&date(TUESDAY)).is_none());
    assert_eq!(engine.store.schedule_count(), 0);
}

#[tokio::test]
async fn no_template_offers_no_slots() {
    let engine = mk_engine("no_template.wal");
    let slots = engine.slots_for_date(date(MONDAY)).await;
    assert!(slots.is_empty());
    assert_eq!(engine.store.schedule_count(), 0);
}

#[tokio::test]
async fn existing_record_never_merged_with_new_template() {
    let engine = mk_engine("no_merge.wal");
    seed(&engine, monday_week(&["09:00", "10:00"])).await;
    engine.slots_for_date(date(MONDAY)).await;
    engine
        .reserve(date(MONDAY), "09:00", patient("A", "9000000001"))
        .await
        .unwrap();

    // New template with different Monday times; the booked record keeps its
    // original slot set.
    seed(&engine, monday_week(&["14:00"])).await;
    let slots = engine.slots_for_date(date(MONDAY)).await;
    assert_eq!(slots.len(), 2);
    assert_eq!(slots[0].time, "09:00");
}

// ── Reservation ──────────────────────────────────────────

#[tokio::test]
async fn reserve_then_slot_taken() {
    let engine = mk_engine("reserve_taken.wal");
    seed(&engine, monday_week(&["09:00", "10:00"])).await;
    engine.slots_for_date(date(MONDAY)).await;

    engine
        .reserve(date(MONDAY), "09:00", patient("A", "9000000001"))
        .await
        .unwrap();

    let result = engine
        .reserve(date(MONDAY), "09:00", patient("B", "9000000002"))
        .await;
    assert!(matches!(result, Err(EngineError::SlotUnavailable { .. })));

    // The accepted request's patient is the one on the slot
    let rec = engine.get_schedule(&date(MONDAY)).unwrap();
    let guard = rec.read().await;
    let booking = guard.slot("09:00").unwrap().booking().unwrap();
    assert_eq!(booking.patient.mobile, "9000000001");
    assert_eq!(booking.status, SlotStatus::Pending);
}

#[tokio::test]
async fn duplicate_mobile_rejected_across_times() {
    let engine = mk_engine("duplicate_mobile.wal");
    seed(&engine, monday_week(&["09:00", "10:00"])).await;
    engine.slots_for_date(date(MONDAY)).await;

    engine
        .reserve(date(MONDAY), "09:00", patient("A", "9000000001"))
        .await
        .unwrap();

    let result = engine
        .reserve(date(MONDAY), "10:00", patient("A", "9000000001"))
        .await;
    assert!(matches!(result, Err(EngineError::DuplicateBooking { .. })));

    // The second slot must not have been touched
    let rec = engine.get_schedule(&date(MONDAY)).unwrap();
    let guard = rec.read().await;
    assert!(!guard.slot("10:00").unwrap().is_booked());
    assert_eq!(guard.booked_count(), 1);
}

#[tokio::test]
async fn booking_scenario_from_start_to_finish() {
    let engine = mk_engine("scenario.wal");
    seed(&engine, monday_week(&["09:00", "10:00"])).await;

    let slots = engine.slots_for_date(date(MONDAY)).await;
    assert_eq!(slots.len(), 2);
    assert!(slots.iter().all(|s| !s.is_booked));

    engine
        .reserve(date(MONDAY), "09:00", patient("A", "9000000111"))
        .await
        .unwrap();

    let b = engine
        .reserve(date(MONDAY), "09:00", patient("B", "9000000222"))
        .await;
    assert!(matches!(b, Err(EngineError::SlotUnavailable { .. })));

    let a_again = engine
        .reserve(date(MONDAY), "10:00", patient("A", "9000000111"))
        .await;
    assert!(matches!(a_again, Err(EngineError::DuplicateBooking { .. })));

    engine
        .reserve(date(MONDAY), "10:00", patient("C", "9000000333"))
        .await
        .unwrap();

    let slots = engine.slots_for_date(date(MONDAY)).await;
    assert!(slots.iter().all(|s| s.is_booked));
}

#[tokio::test]
async fn fifty_concurrent_claims_one_winner() {
    let engine = Arc::new(mk_engine("fifty_claims.wal"));
    seed(&engine, monday_week(&["09:00"])).await;
    engine.slots_for_date(date(MONDAY)).await;

    let mut handles = Vec::new();
    for i in 0..50 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .reserve(
                    date(MONDAY),
                    "09:00",
                    patient(&format!("P{i}"), &format!("90000001{i:02}")),
                )
                .await
        }));
    }

    let mut accepted = Vec::new();
    let mut unavailable = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(id) => accepted.push(id),
            Err(EngineError::SlotUnavailable { .. }) => unavailable += 1,
            Err(other) => panic!("unexpected rejection: {other}"),
        }
    }
    assert_eq!(accepted.len(), 1);
    assert_eq!(unavailable, 49);

    let rec = engine.get_schedule(&date(MONDAY)).unwrap();
    let guard = rec.read().await;
    assert_eq!(guard.slot("09:00").unwrap().booking().unwrap().id, accepted[0]);
    assert_eq!(guard.version, 1);
}

#[tokio::test]
async fn same_mobile_racing_for_two_times_books_once() {
    let engine = Arc::new(mk_engine("same_mobile_race.wal"));
    seed(&engine, monday_week(&["09:00", "10:00"])).await;
    engine.slots_for_date(date(MONDAY)).await;

    let e1 = engine.clone();
    let e2 = engine.clone();
    let (r1, r2) = tokio::join!(
        tokio::spawn(async move {
            e1.reserve(date(MONDAY), "09:00", patient("A", "9000000001"))
                .await
        }),
        tokio::spawn(async move {
            e2.reserve(date(MONDAY), "10:00", patient("A", "9000000001"))
                .await
        }),
    );
    let outcomes = [r1.unwrap(), r2.unwrap()];
    let wins = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(EngineError::DuplicateBooking { .. }))));

    let rec = engine.get_schedule(&date(MONDAY)).unwrap();
    assert_eq!(rec.read().await.booked_count(), 1);
}

#[tokio::test]
async fn reserve_without_record_is_unavailable() {
    let engine = mk_engine("reserve_no_record.wal");
    seed(&engine, monday_week(&["09:00"])).await;

    // No read happened, so no record exists for the date
    let result = engine
        .reserve(date(MONDAY), "09:00", patient("A", "9000000001"))
        .await;
    assert!(matches!(result, Err(EngineError::SlotUnavailable { .. })));
}

#[tokio::test]
async fn reserve_unknown_time_is_unavailable() {
    let engine = mk_engine("reserve_bad_time.wal");
    seed(&engine, monday_week(&["09:00"])).await;
    engine.slots_for_date(date(MONDAY)).await;

    let result = engine
        .reserve(date(MONDAY), "09:30", patient("A", "9000000001"))
        .await;
    assert!(matches!(result, Err(EngineError::SlotUnavailable { .. })));
}

#[tokio::test]
async fn reserve_validates_patient_input() {
    let engine = mk_engine("reserve_validation.wal");
    seed(&engine, monday_week(&["09:00"])).await;
    engine.slots_for_date(date(MONDAY)).await;

    let blank_name = engine
        .reserve(date(MONDAY), "09:00", patient("  ", "9000000001"))
        .await;
    assert!(matches!(blank_name, Err(EngineError::LimitExceeded(_))));

    let short_mobile = engine
        .reserve(date(MONDAY), "09:00", patient("A", "12345"))
        .await;
    assert!(matches!(short_mobile, Err(EngineError::LimitExceeded(_))));

    let junk_mobile = engine
        .reserve(date(MONDAY), "09:00", patient("A", "9000x00001"))
        .await;
    assert!(matches!(junk_mobile, Err(EngineError::LimitExceeded(_))));

    // Nothing was booked by any of the rejected attempts
    let rec = engine.get_schedule(&date(MONDAY)).unwrap();
    assert_eq!(rec.read().await.booked_count(), 0);
}

#[tokio::test]
async fn version_increments_on_every_slot_mutation() {
    let engine = mk_engine("version_bumps.wal");
    seed(&engine, monday_week(&["09:00"])).await;
    engine.slots_for_date(date(MONDAY)).await;

    let rec = engine.get_schedule(&date(MONDAY)).unwrap();
    assert_eq!(rec.read().await.version, 0);

    engine
        .reserve(date(MONDAY), "09:00", patient("A", "9000000001"))
        .await
        .unwrap();
    assert_eq!(rec.read().await.version, 1);

    engine
        .set_slot_status(date(MONDAY), "09:00", SlotStatus::Confirmed)
        .await
        .unwrap();
    assert_eq!(rec.read().await.version, 2);
}

// ── Administrative status transitions ────────────────────

#[tokio::test]
async fn status_lifecycle_transitions() {
    let engine = mk_engine("status_lifecycle.wal");
    seed(&engine, monday_week(&["09:00"])).await;
    engine.slots_for_date(date(MONDAY)).await;
    engine
        .reserve(date(MONDAY), "09:00", patient("A", "9000000001"))
        .await
        .unwrap();

    engine
        .set_slot_status(date(MONDAY), "09:00", SlotStatus::Confirmed)
        .await
        .unwrap();
    engine
        .set_slot_status(date(MONDAY), "09:00", SlotStatus::Visited)
        .await
        .unwrap();

    // Visited is terminal
    let result = engine
        .set_slot_status(date(MONDAY), "09:00", SlotStatus::Cancelled)
        .await;
    assert!(matches!(result, Err(EngineError::InvalidTransition { .. })));
}

#[tokio::test]
async fn pending_cannot_jump_to_visited() {
    let engine = mk_engine("status_jump.wal");
    seed(&engine, monday_week(&["09:00"])).await;
    engine.slots_for_date(date(MONDAY)).await;
    engine
        .reserve(date(MONDAY), "09:00", patient("A", "9000000001"))
        .await
        .unwrap();

    let result = engine
        .set_slot_status(date(MONDAY), "09:00", SlotStatus::Visited)
        .await;
    assert!(matches!(result, Err(EngineError::InvalidTransition { .. })));
}

#[tokio::test]
async fn status_on_open_slot_rejected() {
    let engine = mk_engine("status_open_slot.wal");
    seed(&engine, monday_week(&["09:00"])).await;
    engine.slots_for_date(date(MONDAY)).await;

    let result = engine
        .set_slot_status(date(MONDAY), "09:00", SlotStatus::Confirmed)
        .await;
    assert!(matches!(result, Err(EngineError::NotBooked { .. })));
}

#[tokio::test]
async fn status_on_unknown_date_rejected() {
    let engine = mk_engine("status_no_date.wal");
    let result = engine
        .set_slot_status(date(MONDAY), "09:00", SlotStatus::Confirmed)
        .await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn cancelled_slot_never_reopens() {
    let engine = mk_engine("cancel_no_reopen.wal");
    seed(&engine, monday_week(&["09:00"])).await;
    engine.slots_for_date(date(MONDAY)).await;
    engine
        .reserve(date(MONDAY), "09:00", patient("A", "9000000001"))
        .await
        .unwrap();
    engine
        .set_slot_status(date(MONDAY), "09:00", SlotStatus::Cancelled)
        .await
        .unwrap();

    // Still booked: another patient cannot take it, and the same patient is
    // still caught by the duplicate guard.
    let other = engine
        .reserve(date(MONDAY), "09:00", patient("B", "9000000002"))
        .await;
    assert!(matches!(other, Err(EngineError::SlotUnavailable { .. })));
    let same = engine
        .reserve(date(MONDAY), "09:00", patient("A", "9000000001"))
        .await;
    assert!(matches!(same, Err(EngineError::DuplicateBooking { .. })));
}

// ── Template replacement & purge ─────────────────────────

#[tokio::test]
async fn template_purge_spares_booked_records() {
    let engine = mk_engine("purge_spares_booked.wal");
    seed(&engine, full_week(&["08:00", "09:00"])).await;

    let untouched = ScheduleDate::today_utc().plus_days(3);
    let booked = ScheduleDate::today_utc().plus_days(4);
    engine.slots_for_date(untouched).await;
    engine.slots_for_date(booked).await;
    engine
        .reserve(booked, "08:00", patient("A", "9000000001"))
        .await
        .unwrap();

    let purged = engine
        .replace_template(Ulid::new(), full_week(&["11:00"]))
        .await
        .unwrap();

    assert_eq!(purged, vec![untouched]);
    // The unbooked record regenerates under the new template...
    let slots = engine.slots_for_date(untouched).await;
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0].time, "11:00");
    // ...the booked one is preserved untouched, even though it is stale
    let slots = engine.slots_for_date(booked).await;
    assert_eq!(slots.len(), 2);
    assert_eq!(slots[0].time, "08:00");
}

#[tokio::test]
async fn purge_ignores_past_records() {
    let engine = mk_engine("purge_past.wal");
    seed(&engine, full_week(&["08:00"])).await;

    let past = date("2020-01-06");
    engine.slots_for_date(past).await;
    assert!(engine.get_schedule(&past).is_some());

    let purged = engine
        .replace_template(Ulid::new(), full_week(&["11:00"]))
        .await
        .unwrap();
    assert!(purged.is_empty());
    assert!(engine.get_schedule(&past).is_some());
}

#[tokio::test]
async fn manual_sweep_honors_cutoff() {
    let engine = mk_engine("manual_sweep.wal");
    seed(&engine, full_week(&["08:00"])).await;

    let before = ScheduleDate::today_utc().plus_days(2);
    let after = ScheduleDate::today_utc().plus_days(10);
    engine.slots_for_date(before).await;
    engine.slots_for_date(after).await;

    let purged = engine
        .delete_future_unbooked(ScheduleDate::today_utc().plus_days(5))
        .await
        .unwrap();
    assert_eq!(purged, vec![after]);
    assert!(engine.get_schedule(&before).is_some());
    assert!(engine.get_schedule(&after).is_none());
}

#[tokio::test]
async fn template_validation_rejects_duplicates() {
    let engine = mk_engine("template_validation.wal");
    let result = engine
        .replace_template(Ulid::new(), monday_week(&["09:00", "09:00"]))
        .await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn replay_restores_bookings_and_versions() {
    let path = test_wal_path("replay_restore.wal");
    {
        let engine = open_engine(&path);
        seed(&engine, monday_week(&["09:00", "10:00"])).await;
        engine.slots_for_date(date(MONDAY)).await;
        engine
            .reserve(date(MONDAY), "09:00", patient("A", "9000000001"))
            .await
            .unwrap();
        engine
            .set_slot_status(date(MONDAY), "09:00", SlotStatus::Confirmed)
            .await
            .unwrap();
    }

    let engine = open_engine(&path);
    assert!(engine.template_view().is_some());
    let rec = engine.get_schedule(&date(MONDAY)).unwrap();
    let guard = rec.read().await;
    assert_eq!(guard.version, 2);
    let booking = guard.slot("09:00").unwrap().booking().unwrap();
    assert_eq!(booking.patient.mobile, "9000000001");
    assert_eq!(booking.status, SlotStatus::Confirmed);
    assert!(!guard.slot("10:00").unwrap().is_booked());
}

#[tokio::test]
async fn replay_after_compaction_keeps_state() {
    let path = test_wal_path("replay_compacted.wal");
    {
        let engine = open_engine(&path);
        seed(&engine, monday_week(&["09:00", "10:00"])).await;
        engine.slots_for_date(date(MONDAY)).await;
        engine
            .reserve(date(MONDAY), "09:00", patient("A", "9000000001"))
            .await
            .unwrap();
        engine
            .set_slot_status(date(MONDAY), "09:00", SlotStatus::Confirmed)
            .await
            .unwrap();
        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
    }

    let engine = open_engine(&path);
    assert!(engine.template_view().is_some());
    let rec = engine.get_schedule(&date(MONDAY)).unwrap();
    let guard = rec.read().await;
    // Snapshots carry the version; compaction must not reset it
    assert_eq!(guard.version, 2);
    let booking = guard.slot("09:00").unwrap().booking().unwrap();
    assert_eq!(booking.status, SlotStatus::Confirmed);
}

#[tokio::test]
async fn duplicate_creation_events_replay_first_wins() {
    let path = test_wal_path("dup_created.wal");
    // Simulate the WAL a creation race leaves behind: both contenders logged
    // their ScheduleCreated before create_if_absent picked one winner.
    {
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&Event::ScheduleCreated {
            date: date(MONDAY),
            provider_id: Ulid::new(),
            times: vec!["09:00".into()],
        })
        .unwrap();
        wal.append(&Event::ScheduleCreated {
            date: date(MONDAY),
            provider_id: Ulid::new(),
            times: vec!["10:00".into(), "11:00".into()],
        })
        .unwrap();
    }

    let engine = open_engine(&path);
    assert_eq!(engine.store.schedule_count(), 1);
    let rec = engine.get_schedule(&date(MONDAY)).unwrap();
    let guard = rec.read().await;
    assert_eq!(guard.slots.len(), 1);
    assert_eq!(guard.slots[0].time, "09:00");
}

// ── Eventing ─────────────────────────────────────────────

#[tokio::test]
async fn successful_reservation_broadcasts_event() {
    let engine = mk_engine("notify_booked.wal");
    seed(&engine, monday_week(&["09:00"])).await;
    engine.slots_for_date(date(MONDAY)).await;

    let mut rx = engine.notify.subscribe(date(MONDAY));
    engine
        .reserve(date(MONDAY), "09:00", patient("A", "9000000001"))
        .await
        .unwrap();

    let event = rx.recv().await.unwrap();
    match event {
        Event::SlotBooked { date: d, time, .. } => {
            assert_eq!(d, date(MONDAY));
            assert_eq!(time, "09:00");
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

// ── Views ────────────────────────────────────────────────

#[tokio::test]
async fn admin_detail_includes_patient_public_view_does_not() {
    let engine = mk_engine("views.wal");
    seed(&engine, monday_week(&["09:00", "10:00"])).await;
    engine.slots_for_date(date(MONDAY)).await;
    engine
        .reserve(
            date(MONDAY),
            "09:00",
            Patient {
                name: "A".into(),
                mobile: "9000000001".into(),
                email: Some("a@example.com".into()),
                reason: Some("checkup".into()),
            },
        )
        .await
        .unwrap();

    let detail = engine.schedule_detail(date(MONDAY)).await.unwrap();
    assert_eq!(detail[0].patient_name.as_deref(), Some("A"));
    assert_eq!(detail[0].patient_email.as_deref(), Some("a@example.com"));
    assert_eq!(detail[0].status, Some(SlotStatus::Pending));
    assert!(detail[1].patient_name.is_none());

    let summaries = engine.schedule_summaries().await;
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].booked, 1);
    assert_eq!(summaries[0].open, 1);
    assert_eq!(summaries[0].version, 1);
}

#[tokio::test]
async fn admin_detail_does_not_generate() {
    let engine = mk_engine("detail_no_generate.wal");
    seed(&engine, monday_week(&["09:00"])).await;
    assert!(engine.schedule_detail(date(MONDAY)).await.is_none());
    assert_eq!(engine.store.schedule_count(), 0);
}
