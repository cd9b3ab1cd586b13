use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use ulid::Ulid;

use crate::model::*;

use super::SharedAppointment;

/// Tenant state: branch catalog, calendar overrides, appointments and the
/// derived per-branch and per-stylist indexes.
pub struct InMemoryStore {
    branches: DashMap<String, Branch>,
    calendar: DashMap<String, Vec<CalendarEntry>>,
    /// entry id → branch id
    calendar_index: DashMap<Ulid, String>,
    appointments: DashMap<Ulid, SharedAppointment>,
    by_branch: DashMap<String, Vec<Ulid>>,
    by_stylist: DashMap<String, Vec<Ulid>>,
    /// Held by writers across check-then-write for a stylist.
    stylist_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            branches: DashMap::new(),
            calendar: DashMap::new(),
            calendar_index: DashMap::new(),
            appointments: DashMap::new(),
            by_branch: DashMap::new(),
            by_stylist: DashMap::new(),
            stylist_locks: DashMap::new(),
        }
    }

    // ── Branches ─────────────────────────────────────────────

    pub fn branch_count(&self) -> usize {
        self.branches.len()
    }

    pub fn contains_branch(&self, id: &str) -> bool {
        self.branches.contains_key(id)
    }

    pub fn get_branch(&self, id: &str) -> Option<Branch> {
        self.branches.get(id).map(|e| e.value().clone())
    }

    pub fn branches(&self) -> Vec<Branch> {
        self.branches.iter().map(|e| e.value().clone()).collect()
    }

    // ── Calendar ─────────────────────────────────────────────

    pub fn calendar_entries(&self, branch_id: &str) -> Vec<CalendarEntry> {
        self.calendar
            .get(branch_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn calendar_entry_count(&self, branch_id: &str) -> usize {
        self.calendar.get(branch_id).map_or(0, |e| e.len())
    }

    pub fn branch_for_entry(&self, entry_id: &Ulid) -> Option<String> {
        self.calendar_index.get(entry_id).map(|e| e.value().clone())
    }

    // ── Appointments ─────────────────────────────────────────

    pub fn appointment_count(&self) -> usize {
        self.appointments.len()
    }

    pub fn contains_appointment(&self, id: &Ulid) -> bool {
        self.appointments.contains_key(id)
    }

    pub fn get_appointment(&self, id: &Ulid) -> Option<SharedAppointment> {
        self.appointments.get(id).map(|e| e.value().clone())
    }

    pub fn appointment_ids(&self) -> Vec<Ulid> {
        self.appointments.iter().map(|e| *e.key()).collect()
    }

    pub fn branch_appointment_ids(&self, branch_id: &str) -> Vec<Ulid> {
        self.by_branch
            .get(branch_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn stylist_appointment_ids(&self, stylist_id: &str) -> Vec<Ulid> {
        self.by_stylist
            .get(stylist_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// Register a new appointment and index it. Stylist assignments never
    /// change after creation, so the stylist index needs no maintenance on
    /// reschedule or status change.
    pub fn insert_appointment(&self, appointment: Appointment) {
        let id = appointment.id;
        self.by_branch
            .entry(appointment.branch_id.clone())
            .or_default()
            .push(id);
        for stylist in appointment.assigned_stylists() {
            self.by_stylist.entry(stylist.to_string()).or_default().push(id);
        }
        self.appointments.insert(id, Arc::new(RwLock::new(appointment)));
    }

    // ── Reservation locks ────────────────────────────────────

    /// Lock every listed stylist, in sorted order so that two writers
    /// sharing stylists can never deadlock.
    pub async fn lock_stylists(&self, stylists: &[&str]) -> Vec<OwnedMutexGuard<()>> {
        let mut ids: Vec<&str> = stylists.iter().copied().filter(|s| !s.is_empty()).collect();
        ids.sort_unstable();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            let lock = self
                .stylist_locks
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value()
                .clone();
            guards.push(lock.lock_owned().await);
        }
        guards
    }

    // ── Event application ────────────────────────────────────

    /// Apply a catalog event (branch or calendar). Appointment events go
    /// through [`InMemoryStore::apply_to_appointment`] under the caller's lock.
    pub fn apply_catalog(&self, event: &Event) {
        match event {
            Event::BranchUpserted { branch } => {
                self.branches.insert(branch.id.clone(), branch.clone());
            }
            Event::CalendarEntryAdded { entry } => {
                self.calendar_index.insert(entry.id, entry.branch_id.clone());
                let mut entries = self.calendar.entry(entry.branch_id.clone()).or_default();
                entries.retain(|e| e.id != entry.id);
                entries.push(entry.clone());
                entries.sort_by_key(|e| e.date);
            }
            Event::CalendarEntryRemoved { id, branch_id } => {
                self.calendar_index.remove(id);
                if let Some(mut entries) = self.calendar.get_mut(branch_id) {
                    entries.retain(|e| e.id != *id);
                }
            }
            Event::AppointmentCreated { appointment } => {
                self.insert_appointment(appointment.clone());
            }
            Event::AppointmentRescheduled { .. }
            | Event::AppointmentStatusChanged { .. }
            | Event::ReminderSent { .. } => {}
        }
    }

    /// Apply an appointment update (no locking; the caller holds the write lock).
    pub fn apply_to_appointment(appointment: &mut Appointment, event: &Event) {
        match event {
            Event::AppointmentRescheduled {
                appointment_date,
                duration,
                at,
                ..
            } => {
                appointment.appointment_date = *appointment_date;
                appointment.duration = *duration;
                appointment.reminder_sent = false;
                appointment.updated_at = *at;
            }
            Event::AppointmentStatusChanged { status, at, .. } => {
                appointment.status = *status;
                appointment.updated_at = *at;
            }
            Event::ReminderSent { .. } => {
                appointment.reminder_sent = true;
            }
            _ => {}
        }
    }

    /// Apply a replayed event. The store is not yet shared, so `try_write`
    /// always succeeds; blocking lock calls are avoided because replay may
    /// run inside an async context.
    pub fn replay_event(&self, event: &Event) {
        let target = match event {
            Event::AppointmentRescheduled { id, .. }
            | Event::AppointmentStatusChanged { id, .. }
            | Event::ReminderSent { id, .. } => Some(*id),
            _ => None,
        };
        match target {
            None => self.apply_catalog(event),
            Some(id) => {
                if let Some(shared) = self.get_appointment(&id)
                    && let Ok(mut guard) = shared.try_write()
                {
                    Self::apply_to_appointment(&mut guard, event);
                }
            }
        }
    }
}
