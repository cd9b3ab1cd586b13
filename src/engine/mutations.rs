use tokio::sync::oneshot;
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::NotificationKind;

use super::calendar::{branch_timezone, parse_clock};
use super::conflict::first_conflict;
use super::queries::reminder_due;
use super::{Engine, EngineError, WalCommand};

fn check_len(value: Option<&str>, max: usize, what: &'static str) -> Result<(), EngineError> {
    match value {
        Some(v) if v.len() > max => Err(EngineError::LimitExceeded(what)),
        _ => Ok(()),
    }
}

/// Build the booked window for `start` and `minutes`, range-checking both
/// before any arithmetic.
pub fn booking_window(start: Ms, minutes: u32) -> Result<Span, EngineError> {
    if !(MIN_VALID_TIMESTAMP_MS..MAX_VALID_TIMESTAMP_MS).contains(&start) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if minutes > MAX_DURATION_MINUTES {
        return Err(EngineError::LimitExceeded("appointment too long"));
    }
    let span = Span::from_minutes(start, effective_duration(Some(minutes)));
    validate_span(&span)?;
    Ok(span)
}

fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start < MIN_VALID_TIMESTAMP_MS
        || span.start >= MAX_VALID_TIMESTAMP_MS
        || span.end > MAX_VALID_TIMESTAMP_MS
    {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.end <= span.start {
        return Err(EngineError::Validation("appointment must end after it starts".into()));
    }
    if span.duration_ms() > MAX_DURATION_MINUTES as Ms * MINUTE_MS {
        return Err(EngineError::LimitExceeded("appointment too long"));
    }
    Ok(())
}

/// Reschedules of appointments that have not started yet need
/// `lead_ms` of notice, measured against the current start.
fn check_reschedule_lead(original_start: Ms, now: Ms, lead_ms: Ms) -> Result<(), EngineError> {
    if original_start > now && original_start - now < lead_ms {
        let remaining = (original_start - now) / MINUTE_MS;
        return Err(EngineError::LeadTime(format!(
            "appointments can only be rescheduled at least {} minutes before they start ({remaining} minutes remaining)",
            lead_ms / MINUTE_MS
        )));
    }
    Ok(())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn record_rejection(operation: &'static str, err: &EngineError) {
    metrics::counter!(
        crate::observability::COMMITS_REJECTED_TOTAL,
        "operation" => operation,
        "reason" => err.reason()
    )
    .increment(1);
}

/// Service minutes for a new appointment: the explicit duration, else the
/// sum of per-service durations, else unset (occupies the default hour).
fn requested_duration(req: &NewAppointment) -> Option<u32> {
    if let Some(d) = req.duration.filter(|d| *d > 0) {
        return Some(d);
    }
    let summed: u32 = req
        .services
        .iter()
        .filter_map(|s| s.duration)
        .fold(0u32, |acc, d| acc.saturating_add(d));
    (summed > 0).then_some(summed)
}

fn validate_request(req: &NewAppointment) -> Result<(), EngineError> {
    if non_empty(Some(req.branch_id.as_str())).is_none() {
        return Err(EngineError::Validation("branch is required".into()));
    }
    let has_service = non_empty(req.service_id.as_deref()).is_some()
        || req.services.iter().any(|s| !s.service_id.trim().is_empty());
    if !has_service {
        return Err(EngineError::Validation("at least one service is required".into()));
    }
    if req.appointment_date.is_none() {
        return Err(EngineError::Validation("appointment date is required".into()));
    }
    if req.is_guest {
        if non_empty(req.client_name.as_deref()).is_none() {
            return Err(EngineError::Validation("guest bookings require a client name".into()));
        }
    } else if non_empty(req.client_id.as_deref()).is_none() {
        return Err(EngineError::Validation("client is required".into()));
    }

    if req.services.len() > MAX_SERVICES_PER_APPOINTMENT {
        return Err(EngineError::LimitExceeded("too many services on appointment"));
    }
    check_len(Some(req.branch_id.as_str()), MAX_ID_LEN, "branch id too long")?;
    check_len(req.stylist_id.as_deref(), MAX_ID_LEN, "stylist id too long")?;
    check_len(req.service_id.as_deref(), MAX_ID_LEN, "service id too long")?;
    check_len(req.client_id.as_deref(), MAX_ID_LEN, "client id too long")?;
    check_len(req.client_name.as_deref(), MAX_NAME_LEN, "client name too long")?;
    check_len(req.notes.as_deref(), MAX_NOTES_LEN, "notes too long")?;
    for line in &req.services {
        check_len(Some(line.service_id.as_str()), MAX_ID_LEN, "service id too long")?;
        check_len(line.stylist_id.as_deref(), MAX_ID_LEN, "stylist id too long")?;
    }
    if requested_duration(req).is_some_and(|d| d > MAX_DURATION_MINUTES) {
        return Err(EngineError::LimitExceeded("appointment too long"));
    }
    Ok(())
}

impl Engine {
    // ── Branch documents ─────────────────────────────────────

    /// Insert or replace a branch document.
    pub async fn upsert_branch(&self, branch: Branch) -> Result<(), EngineError> {
        if branch.id.trim().is_empty() {
            return Err(EngineError::Validation("branch id is required".into()));
        }
        check_len(Some(branch.id.as_str()), MAX_ID_LEN, "branch id too long")?;
        check_len(branch.name.as_deref(), MAX_NAME_LEN, "branch name too long")?;
        if !self.store.contains_branch(&branch.id) && self.store.branch_count() >= MAX_BRANCHES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many branches"));
        }
        branch_timezone(&branch)?;
        for day in [
            &branch.operating_hours.monday,
            &branch.operating_hours.tuesday,
            &branch.operating_hours.wednesday,
            &branch.operating_hours.thursday,
            &branch.operating_hours.friday,
            &branch.operating_hours.saturday,
            &branch.operating_hours.sunday,
        ]
        .into_iter()
        .flatten()
        .filter(|d| d.is_open_day())
        {
            parse_clock(&day.open)?;
            parse_clock(&day.close)?;
        }

        let _gate = self.commit_gate.read().await;
        let id = branch.id.clone();
        self.persist_catalog(&Event::BranchUpserted { branch }).await?;
        info!(branch_id = %id, "branch upserted");
        Ok(())
    }

    pub async fn add_calendar_entry(&self, entry: CalendarEntry) -> Result<(), EngineError> {
        if !self.store.contains_branch(&entry.branch_id) {
            return Err(EngineError::not_found("branch", &entry.branch_id));
        }
        check_len(entry.title.as_deref(), MAX_NAME_LEN, "calendar entry title too long")?;
        if self.store.calendar_entry_count(&entry.branch_id) >= MAX_CALENDAR_ENTRIES_PER_BRANCH {
            return Err(EngineError::LimitExceeded("too many calendar entries on branch"));
        }
        if entry.kind == CalendarEntryType::SpecialHours {
            let hours = entry.special_hours.as_ref().ok_or_else(|| {
                EngineError::Validation("special hours entries need open and close times".into())
            })?;
            parse_clock(&hours.open)?;
            parse_clock(&hours.close)?;
        }

        let _gate = self.commit_gate.read().await;
        let (id, branch_id, date) = (entry.id, entry.branch_id.clone(), entry.date);
        self.persist_catalog(&Event::CalendarEntryAdded { entry }).await?;
        info!(entry_id = %id, branch_id = %branch_id, %date, "calendar entry added");
        Ok(())
    }

    /// Returns the branch the entry belonged to.
    pub async fn remove_calendar_entry(&self, id: Ulid) -> Result<String, EngineError> {
        let _gate = self.commit_gate.read().await;
        let branch_id = self
            .store
            .branch_for_entry(&id)
            .ok_or_else(|| EngineError::not_found("calendar entry", id))?;
        self.persist_catalog(&Event::CalendarEntryRemoved {
            id,
            branch_id: branch_id.clone(),
        })
        .await?;
        info!(entry_id = %id, branch_id = %branch_id, "calendar entry removed");
        Ok(branch_id)
    }

    // ── Booking writer ───────────────────────────────────────

    /// Validate, re-check every implicated stylist against fresh state
    /// under their reservation locks, then persist as `pending`.
    pub async fn create_appointment(&self, req: NewAppointment) -> Result<Appointment, EngineError> {
        let result = self.try_create_appointment(req).await;
        if let Err(e) = &result {
            record_rejection("create", e);
        }
        result
    }

    async fn try_create_appointment(&self, req: NewAppointment) -> Result<Appointment, EngineError> {
        validate_request(&req)?;
        if !self.store.contains_branch(req.branch_id.trim()) {
            return Err(EngineError::not_found("branch", req.branch_id.trim()));
        }
        if self.store.appointment_count() >= MAX_APPOINTMENTS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many appointments"));
        }

        let now = now_ms();
        let start = req
            .appointment_date
            .ok_or_else(|| EngineError::Validation("appointment date is required".into()))?;
        let duration = requested_duration(&req);
        let span = booking_window(start, effective_duration(duration))?;
        if !req.is_guest && span.start < now {
            return Err(EngineError::LeadTime(
                "appointments cannot be booked in the past".into(),
            ));
        }

        let id = req.id.unwrap_or_else(Ulid::new);
        if self.store.contains_appointment(&id) {
            return Err(EngineError::Validation(format!("appointment {id} already exists")));
        }

        let appointment = Appointment {
            id,
            branch_id: req.branch_id.trim().to_string(),
            appointment_date: start,
            duration,
            status: AppointmentStatus::Pending,
            stylist_id: req.stylist_id.filter(|s| !s.trim().is_empty()),
            service_id: req.service_id.filter(|s| !s.trim().is_empty()),
            services: req.services,
            client_id: req.client_id.filter(|s| !s.trim().is_empty()),
            client_name: req.client_name,
            is_guest: req.is_guest,
            notes: req.notes,
            created_at: now,
            updated_at: now,
            reminder_sent: false,
        };

        let _gate = self.commit_gate.read().await;
        let stylists = appointment.assigned_stylists();
        let _reservations = self.store.lock_stylists(&stylists).await;
        let existing = self.stylist_snapshot(&stylists, &span, None).await;
        for stylist in &stylists {
            if let Some(conflicting) = first_conflict(stylist, &span, &existing, None) {
                warn!(
                    stylist_id = %stylist,
                    %conflicting,
                    start = span.start,
                    "booking rejected: stylist already booked"
                );
                return Err(EngineError::SlotUnavailable {
                    stylist_id: stylist.to_string(),
                    conflicting,
                });
            }
        }

        let event = Event::AppointmentCreated {
            appointment: appointment.clone(),
        };
        self.wal_append(&event).await?;
        self.store.apply_catalog(&event);

        metrics::counter!(crate::observability::APPOINTMENTS_CREATED_TOTAL).increment(1);
        info!(
            appointment_id = %appointment.id,
            branch_id = %appointment.branch_id,
            start = appointment.appointment_date,
            minutes = appointment.duration_minutes(),
            stylists = stylists.len(),
            "appointment booked"
        );
        self.announce(NotificationKind::Booked, &appointment);
        Ok(appointment)
    }

    /// Move an appointment to `new_window`. Needs the configured notice
    /// before its current start, and every assigned stylist free for the new
    /// window ignoring the appointment itself.
    pub async fn reschedule_appointment(&self, id: Ulid, new_window: Span) -> Result<Appointment, EngineError> {
        let result = self.try_reschedule(id, new_window).await;
        if let Err(e) = &result {
            record_rejection("reschedule", e);
        }
        result
    }

    /// Reschedule to `start`, keeping the current length unless `duration`
    /// gives a new one.
    pub async fn reschedule_to(&self, id: Ulid, start: Ms, duration: Option<u32>) -> Result<Appointment, EngineError> {
        let minutes = match duration {
            Some(m) => effective_duration(Some(m)),
            None => self.appointment_handle(id)?.read().await.duration_minutes(),
        };
        let window = match booking_window(start, minutes) {
            Ok(w) => w,
            Err(e) => {
                record_rejection("reschedule", &e);
                return Err(e);
            }
        };
        self.reschedule_appointment(id, window).await
    }

    async fn try_reschedule(&self, id: Ulid, new_window: Span) -> Result<Appointment, EngineError> {
        validate_span(&new_window)?;
        if new_window.duration_ms() % MINUTE_MS != 0 {
            return Err(EngineError::Validation("duration must be whole minutes".into()));
        }
        let minutes = (new_window.duration_ms() / MINUTE_MS) as u32;
        let shared = self.appointment_handle(id)?;

        let _gate = self.commit_gate.read().await;
        // Stylist assignments are fixed at creation, so this read is stable.
        let stylists: Vec<String> = {
            let current = shared.read().await;
            current.assigned_stylists().into_iter().map(String::from).collect()
        };
        let stylist_refs: Vec<&str> = stylists.iter().map(String::as_str).collect();
        let _reservations = self.store.lock_stylists(&stylist_refs).await;
        let existing = self.stylist_snapshot(&stylist_refs, &new_window, Some(id)).await;

        let mut guard = shared.write().await;
        if guard.status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                from: guard.status,
                to: guard.status,
            });
        }
        let now = now_ms();
        check_reschedule_lead(guard.appointment_date, now, self.policy.reschedule_lead_ms)?;
        for stylist in &stylist_refs {
            if let Some(conflicting) = first_conflict(stylist, &new_window, &existing, Some(id)) {
                warn!(
                    appointment_id = %id,
                    stylist_id = %stylist,
                    %conflicting,
                    "reschedule rejected: stylist already booked"
                );
                return Err(EngineError::SlotUnavailable {
                    stylist_id: stylist.to_string(),
                    conflicting,
                });
            }
        }

        let from = guard.appointment_date;
        let event = Event::AppointmentRescheduled {
            id,
            appointment_date: new_window.start,
            duration: Some(minutes),
            at: now,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(appointment_id = %id, from, to = new_window.start, minutes, "appointment rescheduled");
        self.announce(NotificationKind::Rescheduled, &guard);
        Ok(guard.clone())
    }

    // ── Status lifecycle ─────────────────────────────────────

    pub async fn update_status(&self, id: Ulid, status: AppointmentStatus) -> Result<Appointment, EngineError> {
        let result = self.try_update_status(id, status).await;
        if let Err(e) = &result {
            record_rejection("status", e);
        }
        result
    }

    async fn try_update_status(&self, id: Ulid, status: AppointmentStatus) -> Result<Appointment, EngineError> {
        let shared = self.appointment_handle(id)?;
        let _gate = self.commit_gate.read().await;
        let mut guard = shared.write().await;
        if !guard.status.can_transition_to(status) {
            return Err(EngineError::InvalidTransition {
                from: guard.status,
                to: status,
            });
        }

        let from = guard.status;
        let event = Event::AppointmentStatusChanged { id, status, at: now_ms() };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(appointment_id = %id, %from, to = %status, "appointment status changed");
        self.announce(NotificationKind::StatusChanged, &guard);
        Ok(guard.clone())
    }

    pub async fn cancel_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        self.update_status(id, AppointmentStatus::Cancelled).await
    }

    // ── Reminders ────────────────────────────────────────────

    /// Send the reminder for `id` if it is still due at `now`. Returns
    /// whether a reminder went out.
    pub async fn send_reminder(&self, id: Ulid, now: Ms) -> Result<bool, EngineError> {
        let shared = self.appointment_handle(id)?;
        let _gate = self.commit_gate.read().await;
        let mut guard = shared.write().await;
        let (from, to) = self.policy.reminder_window_ms;
        if !reminder_due(&guard, now + from, now + to) {
            return Ok(false);
        }

        let event = Event::ReminderSent { id, at: now };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::REMINDERS_SENT_TOTAL).increment(1);
        info!(appointment_id = %id, start = guard.appointment_date, "reminder sent");
        self.announce(NotificationKind::Reminder, &guard);
        Ok(true)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL as the minimal event set that recreates current state.
    /// Writers are paused for the duration.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;

        let mut events = Vec::new();
        let branches = self.list_branches();
        for branch in &branches {
            for entry in self.store.calendar_entries(&branch.id) {
                events.push(Event::CalendarEntryAdded { entry });
            }
        }
        let mut appointments = Vec::with_capacity(self.store.appointment_count());
        for id in self.store.appointment_ids() {
            if let Some(shared) = self.store.get_appointment(&id) {
                appointments.push(shared.read().await.clone());
            }
        }
        appointments.sort_by_key(|a| a.id);

        let mut compacted: Vec<Event> = branches
            .into_iter()
            .map(|branch| Event::BranchUpserted { branch })
            .collect();
        compacted.append(&mut events);
        compacted.extend(
            appointments
                .into_iter()
                .map(|appointment| Event::AppointmentCreated { appointment }),
        );
        let count = compacted.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events: compacted, response: tx })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))?;
        info!(events = count, "WAL compacted");
        Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = HOUR_MS;
    const M: Ms = MINUTE_MS;
    /// 2030-01-07 00:00 UTC.
    const MONDAY: Ms = 1_893_974_400_000;

    #[test]
    fn lead_time_rules() {
        let now = 100 * H;
        // Starts in 90 minutes: too late to move.
        assert!(matches!(
            check_reschedule_lead(now + 90 * M, now, 2 * H),
            Err(EngineError::LeadTime(_))
        ));
        // Exactly two hours out is allowed.
        assert!(check_reschedule_lead(now + 2 * H, now, 2 * H).is_ok());
        // Already started or in the past: the lead rule does not apply.
        assert!(check_reschedule_lead(now - 30 * M, now, 2 * H).is_ok());
        assert!(check_reschedule_lead(now, now, 2 * H).is_ok());
    }

    #[test]
    fn booking_window_checks_range_before_arithmetic() {
        assert_eq!(
            booking_window(MONDAY + 10 * H, 45).unwrap(),
            Span::new(MONDAY + 10 * H, MONDAY + 10 * H + 45 * M)
        );
        assert_eq!(booking_window(MONDAY, 0).unwrap().duration_ms(), H);
        for start in [i64::MAX, i64::MAX - 1000, MAX_VALID_TIMESTAMP_MS, i64::MIN, 0] {
            assert!(matches!(
                booking_window(start, 60),
                Err(EngineError::LimitExceeded(_))
            ));
        }
        assert!(matches!(
            booking_window(MONDAY, u32::MAX),
            Err(EngineError::LimitExceeded(_))
        ));
        // Ends past the last valid instant.
        assert!(booking_window(MAX_VALID_TIMESTAMP_MS - 30 * M, 60).is_err());
    }
}
