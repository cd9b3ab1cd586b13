use std::collections::HashSet;

use chrono::NaiveDate;
use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{distinct_stylists, slot_availability};
use super::calendar::{branch_timezone, day_span, resolve_working_window};
use super::{Engine, EngineError};

impl Engine {
    pub fn get_branch(&self, id: &str) -> Option<Branch> {
        self.store.get_branch(id)
    }

    pub fn list_branches(&self) -> Vec<Branch> {
        let mut branches = self.store.branches();
        branches.sort_by(|a, b| a.id.cmp(&b.id));
        branches
    }

    pub fn calendar_entries(&self, branch_id: &str) -> Vec<CalendarEntry> {
        self.store.calendar_entries(branch_id)
    }

    pub async fn get_appointment(&self, id: Ulid) -> Option<Appointment> {
        let shared = self.store.get_appointment(&id)?;
        let guard = shared.read().await;
        Some(guard.clone())
    }

    /// Appointments of a branch starting on `date` (branch-local), any
    /// status, ordered by start.
    pub async fn appointments_for_day(
        &self,
        branch_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, EngineError> {
        let branch = self
            .store
            .get_branch(branch_id)
            .ok_or_else(|| EngineError::not_found("branch", branch_id))?;
        let day = day_span(&branch_timezone(&branch)?, date)?;

        let mut out = Vec::new();
        for id in self.store.branch_appointment_ids(branch_id) {
            let Some(shared) = self.store.get_appointment(&id) else {
                continue;
            };
            let guard = shared.read().await;
            if day.contains_instant(guard.appointment_date) {
                out.push(guard.clone());
            }
        }
        out.sort_by_key(|a| (a.appointment_date, a.id));
        Ok(out)
    }

    /// Active appointments holding any of `stylists` during `window`, read
    /// through the stylist index. `exclude` is skipped without being locked,
    /// so a caller may already hold (or be about to take) its write lock.
    pub(super) async fn stylist_snapshot(
        &self,
        stylists: &[&str],
        window: &Span,
        exclude: Option<Ulid>,
    ) -> Vec<Appointment> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for stylist in stylists {
            for id in self.store.stylist_appointment_ids(stylist) {
                if Some(id) == exclude || !seen.insert(id) {
                    continue;
                }
                let Some(shared) = self.store.get_appointment(&id) else {
                    continue;
                };
                let guard = shared.read().await;
                if guard.status.occupies_stylist() && guard.span().overlaps(window) {
                    out.push(guard.clone());
                }
            }
        }
        out
    }

    /// Every candidate start time on `date` with its availability for all of
    /// `stylist_ids`. Never fails: problems become an empty list plus a message.
    pub async fn get_available_slots(
        &self,
        branch_id: &str,
        stylist_ids: &[String],
        date: NaiveDate,
        service_minutes: i64,
    ) -> Availability {
        let Some(branch) = self.store.get_branch(branch_id) else {
            return Availability::unavailable(format!("Branch not found: {branch_id}"));
        };
        if service_minutes > MAX_DURATION_MINUTES as i64 {
            return Availability::unavailable(format!(
                "Services longer than {MAX_DURATION_MINUTES} minutes cannot be booked"
            ));
        }
        let stylists = distinct_stylists(stylist_ids);
        if stylists.len() > MAX_STYLISTS_PER_QUERY {
            return Availability::unavailable(format!(
                "At most {MAX_STYLISTS_PER_QUERY} stylists can be checked at once"
            ));
        }

        let entries = self.store.calendar_entries(branch_id);
        let window = match resolve_working_window(&branch, &entries, date) {
            Ok(w) => w,
            Err(e) => {
                debug!(branch_id, %date, reason = e.reason(), "no working window");
                return Availability::unavailable(e.to_string());
            }
        };

        // One snapshot for the whole day; every slot is checked against it in memory.
        let existing = self.stylist_snapshot(&stylists, &window.span, None).await;
        slot_availability(
            &window,
            &existing,
            stylist_ids,
            service_minutes,
            self.policy.slot_granularity_min,
        )
    }

    /// Active, unreminded appointments starting inside the reminder window
    /// relative to `now`. Appointments locked by a writer are skipped and
    /// picked up by the next sweep.
    pub fn due_reminders(&self, now: Ms) -> Vec<Ulid> {
        let (from, to) = self.policy.reminder_window_ms;
        let (from, to) = (now + from, now + to);
        let mut due = Vec::new();
        for id in self.store.appointment_ids() {
            let Some(shared) = self.store.get_appointment(&id) else {
                continue;
            };
            if let Ok(guard) = shared.try_read()
                && reminder_due(&guard, from, to)
            {
                due.push(id);
            }
        }
        due.sort();
        due
    }
}

pub(super) fn reminder_due(appointment: &Appointment, from: Ms, to: Ms) -> bool {
    matches!(
        appointment.status,
        AppointmentStatus::Pending | AppointmentStatus::Confirmed
    ) && !appointment.reminder_sent
        && (from..=to).contains(&appointment.appointment_date)
}
