use std::sync::Arc;

use ulid::Ulid;

use crate::dispatch::ConfirmationRequest;
use crate::limits::*;
use crate::model::*;
use crate::observability::RESERVATIONS_TOTAL;
use crate::store::{ScheduleStore, SlotPatch};

use super::{Engine, EngineError};

fn validate_patient(patient: &Patient) -> Result<(), EngineError> {
    if patient.name.trim().is_empty() {
        return Err(EngineError::LimitExceeded("patient name is required"));
    }
    if patient.name.len() > MAX_PATIENT_NAME_LEN {
        return Err(EngineError::LimitExceeded("patient name too long"));
    }
    if patient.mobile.len() < MIN_MOBILE_LEN {
        return Err(EngineError::LimitExceeded("mobile number too short"));
    }
    if patient.mobile.len() > MAX_MOBILE_LEN {
        return Err(EngineError::LimitExceeded("mobile number too long"));
    }
    if !patient
        .mobile
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-'))
    {
        return Err(EngineError::LimitExceeded("mobile number has invalid characters"));
    }
    if let Some(email) = &patient.email
        && email.len() > MAX_EMAIL_LEN
    {
        return Err(EngineError::LimitExceeded("email too long"));
    }
    if let Some(reason) = &patient.reason
        && reason.len() > MAX_REASON_LEN
    {
        return Err(EngineError::LimitExceeded("reason too long"));
    }
    Ok(())
}

impl Engine {
    /// Claim one slot for one patient. The duplicate guard and the
    /// conditional claim run as a single unit under the date record's write
    /// lock, which also serializes same-mobile requests for different times.
    /// Failure is terminal for this call (no internal retry); the caller
    /// re-reads the slot list and picks again.
    ///
    /// At most one call ever succeeds per (date, time), and at most one per
    /// (date, mobile). Returns the reservation id.
    pub async fn reserve(
        &self,
        date: ScheduleDate,
        time: &str,
        patient: Patient,
    ) -> Result<Ulid, EngineError> {
        validate_patient(&patient)?;
        if time.is_empty() || time.len() > MAX_TIME_LABEL_LEN {
            return Err(EngineError::LimitExceeded("bad time label"));
        }

        let Some(rec) = self.store.find_by_date(&date) else {
            // No record means the date was never offered or never read;
            // indistinguishable from a taken slot for the caller.
            metrics::counter!(RESERVATIONS_TOTAL, "outcome" => "unavailable").increment(1);
            return Err(EngineError::SlotUnavailable {
                date,
                time: time.to_string(),
            });
        };

        let mut guard = rec.clone().write_owned().await;
        // A template purge may have unmapped (and a later read regenerated)
        // this record while we waited for the lock; a booking must not land
        // in a record that is no longer the mapped one.
        if !self
            .store
            .find_by_date(&date)
            .is_some_and(|current| Arc::ptr_eq(&current, &rec))
        {
            metrics::counter!(RESERVATIONS_TOTAL, "outcome" => "unavailable").increment(1);
            return Err(EngineError::SlotUnavailable {
                date,
                time: time.to_string(),
            });
        }

        if guard.booking_for_mobile(&patient.mobile).is_some() {
            metrics::counter!(RESERVATIONS_TOTAL, "outcome" => "duplicate").increment(1);
            return Err(EngineError::DuplicateBooking { date });
        }

        match guard.slot(time) {
            Some(slot) if !slot.is_booked() => {}
            _ => {
                metrics::counter!(RESERVATIONS_TOTAL, "outcome" => "unavailable").increment(1);
                return Err(EngineError::SlotUnavailable {
                    date,
                    time: time.to_string(),
                });
            }
        }

        let expected_version = guard.version;
        let booking = Booking {
            id: Ulid::new(),
            patient: patient.clone(),
            status: SlotStatus::Pending,
        };
        let event = Event::SlotBooked {
            date,
            time: time.to_string(),
            booking: booking.clone(),
        };
        // WAL first, then the conditional write; both under the lock, so the
        // CAS cannot fail after the append.
        self.wal_append(&event).await?;
        ScheduleStore::conditional_update_slot(
            &mut guard,
            time,
            expected_version,
            SlotPatch::Book(booking.clone()),
        )?;
        self.notify.send(date, &event);
        drop(guard); // commit point; everything after is outside the unit of work

        metrics::counter!(RESERVATIONS_TOTAL, "outcome" => "accepted").increment(1);
        self.dispatch.clone().spawn_confirmation(ConfirmationRequest {
            patient_name: patient.name,
            patient_mobile: patient.mobile,
            date,
            time: time.to_string(),
        });
        Ok(booking.id)
    }
}
