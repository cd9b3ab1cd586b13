use std::collections::HashMap;

use ulid::Ulid;

use crate::model::*;

/// `[a.start, a.end)` and `[b.start, b.end)` share at least one instant.
pub fn overlaps(a: &Span, b: &Span) -> bool {
    a.overlaps(b)
}

/// One stylist held by one appointment for one window. Both appointment
/// shapes (legacy `stylist_id` and per-service stylists) reduce to these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupancy<'a> {
    pub appointment_id: Ulid,
    pub stylist_id: &'a str,
    pub span: Span,
}

/// Flatten active appointments into `(stylist, window)` pairs.
pub fn occupancies(appointments: &[Appointment]) -> impl Iterator<Item = Occupancy<'_>> {
    appointments
        .iter()
        .filter(|a| a.status.occupies_stylist())
        .flat_map(|a| {
            let span = a.span();
            a.assigned_stylists().into_iter().map(move |stylist_id| Occupancy {
                appointment_id: a.id,
                stylist_id,
                span,
            })
        })
}

/// Whether `stylist_id` is free for `window` given `existing` appointments.
/// An unassigned stylist (`None` or empty) never constrains availability.
/// `exclude` skips one appointment, so a reschedule never conflicts with
/// its own current booking.
pub fn is_stylist_free(
    stylist_id: Option<&str>,
    window: &Span,
    existing: &[Appointment],
    exclude: Option<Ulid>,
) -> bool {
    match stylist_id {
        Some(id) if !id.is_empty() => first_conflict(id, window, existing, exclude).is_none(),
        _ => true,
    }
}

/// The first appointment holding `stylist_id` during `window`, if any.
pub fn first_conflict(
    stylist_id: &str,
    window: &Span,
    existing: &[Appointment],
    exclude: Option<Ulid>,
) -> Option<Ulid> {
    occupancies(existing)
        .filter(|o| Some(o.appointment_id) != exclude)
        .find(|o| o.stylist_id == stylist_id && o.span.overlaps(window))
        .map(|o| o.appointment_id)
}

/// Occupancies grouped per stylist and sorted by start, built once per
/// snapshot so that checking many slots costs no repeated scans.
#[derive(Debug, Default)]
pub struct StylistCalendar {
    by_stylist: HashMap<String, Vec<(Ulid, Span)>>,
}

impl StylistCalendar {
    pub fn from_appointments(appointments: &[Appointment]) -> Self {
        let mut by_stylist: HashMap<String, Vec<(Ulid, Span)>> = HashMap::new();
        for o in occupancies(appointments) {
            by_stylist
                .entry(o.stylist_id.to_string())
                .or_default()
                .push((o.appointment_id, o.span));
        }
        for held in by_stylist.values_mut() {
            held.sort_by_key(|(_, span)| span.start);
        }
        Self { by_stylist }
    }

    pub fn conflict(&self, stylist_id: &str, window: &Span, exclude: Option<Ulid>) -> Option<Ulid> {
        let held = self.by_stylist.get(stylist_id)?;
        // Anything starting at or after window.end cannot overlap.
        let right_bound = held.partition_point(|(_, span)| span.start < window.end);
        held[..right_bound]
            .iter()
            .filter(|(id, _)| Some(*id) != exclude)
            .find(|(_, span)| span.end > window.start)
            .map(|(id, _)| *id)
    }

    pub fn is_free(&self, stylist_id: Option<&str>, window: &Span, exclude: Option<Ulid>) -> bool {
        match stylist_id {
            Some(id) if !id.is_empty() => self.conflict(id, window, exclude).is_none(),
            _ => true,
        }
    }
}
