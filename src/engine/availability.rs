use chrono::NaiveDate;

use crate::model::*;

use super::calendar::{WorkingWindow, resolve_working_window};
use super::conflict::StylistCalendar;
use super::slots::generate_slots;

/// Shown when the day is open but no slot fits the requested service.
pub const NO_SLOTS_MESSAGE: &str = "No time slots fit the selected service within operating hours";

/// Full availability for one branch/date, from already-fetched documents.
///
/// Closed or unconfigured days yield no slots and the reason as the message.
/// Otherwise every generated start time is returned in order, flagged
/// available only if all `stylist_ids` are free for the whole service.
pub fn compute_availability(
    branch: &Branch,
    entries: &[CalendarEntry],
    existing: &[Appointment],
    stylist_ids: &[String],
    date: NaiveDate,
    service_minutes: i64,
    granularity_minutes: i64,
) -> Availability {
    match resolve_working_window(branch, entries, date) {
        Ok(window) => slot_availability(&window, existing, stylist_ids, service_minutes, granularity_minutes),
        Err(e) => Availability::unavailable(e.to_string()),
    }
}

/// Mark each candidate slot of `window` against one snapshot of `existing`.
pub fn slot_availability(
    window: &WorkingWindow,
    existing: &[Appointment],
    stylist_ids: &[String],
    service_minutes: i64,
    granularity_minutes: i64,
) -> Availability {
    let calendar = StylistCalendar::from_appointments(existing);
    let stylists = distinct_stylists(stylist_ids);
    let candidates = generate_slots(window, service_minutes, granularity_minutes);
    let duration = candidates.service_duration_ms();

    let slots: Vec<TimeSlot> = candidates
        .map(|time| {
            let span = Span::new(time, time + duration);
            let available = stylists
                .iter()
                .all(|s| calendar.is_free(Some(*s), &span, None));
            TimeSlot { time, available }
        })
        .collect();

    let message = slots.is_empty().then(|| NO_SLOTS_MESSAGE.to_string());
    Availability { slots, message }
}

/// Unassigned (empty) ids are dropped; order of first appearance is kept.
pub fn distinct_stylists(stylist_ids: &[String]) -> Vec<&str> {
    let mut out: Vec<&str> = Vec::with_capacity(stylist_ids.len());
    for id in stylist_ids {
        let id = id.trim();
        if !id.is_empty() && !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    const M: Ms = MINUTE_MS;

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn at(h: u32, m: u32) -> Ms {
        monday().and_hms_opt(h, m, 0).unwrap().and_utc().timestamp_millis()
    }

    fn branch() -> Branch {
        let mut hours = OperatingHours::default();
        hours.monday = Some(DayHours::open("09:00", "17:00"));
        Branch {
            id: "b1".into(),
            name: Some("Downtown".into()),
            timezone: "UTC".into(),
            operating_hours: hours,
        }
    }

    fn booking(stylist: &str, start: Ms, minutes: u32) -> Appointment {
        Appointment {
            id: Ulid::new(),
            branch_id: "b1".into(),
            appointment_date: start,
            duration: Some(minutes),
            status: AppointmentStatus::Confirmed,
            stylist_id: Some(stylist.into()),
            service_id: Some("cut".into()),
            services: Vec::new(),
            client_id: Some("c1".into()),
            client_name: None,
            is_guest: false,
            notes: None,
            created_at: 0,
            updated_at: 0,
            reminder_sent: false,
        }
    }

    fn slot(avail: &Availability, time: Ms) -> TimeSlot {
        *avail
            .slots
            .iter()
            .find(|s| s.time == time)
            .expect("slot should be generated")
    }

    #[test]
    fn open_day_without_bookings() {
        let avail = compute_availability(&branch(), &[], &[], &["s1".into()], monday(), 60, 30);
        assert_eq!(avail.message, None);
        assert_eq!(avail.slots.len(), 15);
        assert_eq!(avail.slots[0].time, at(9, 0));
        assert_eq!(avail.slots[14].time, at(16, 0));
        assert!(avail.slots.iter().all(|s| s.available));
    }

    #[test]
    fn existing_booking_disables_overlapping_slots() {
        let existing = vec![booking("S1", at(10, 0), 60)];
        let avail = compute_availability(&branch(), &[], &existing, &["S1".into()], monday(), 60, 30);
        assert!(slot(&avail, at(9, 0)).available);
        assert!(!slot(&avail, at(9, 30)).available);
        assert!(!slot(&avail, at(10, 0)).available);
        assert!(!slot(&avail, at(10, 30)).available);
        assert!(slot(&avail, at(11, 0)).available);
        assert_eq!(avail.slots.len(), 15);
    }

    #[test]
    fn every_stylist_must_be_free() {
        let existing = vec![booking("B", at(13, 0), 60)];
        let both = compute_availability(&branch(), &[], &existing, &["A".into(), "B".into()], monday(), 60, 30);
        let only_a = compute_availability(&branch(), &[], &existing, &["A".into()], monday(), 60, 30);
        assert!(!slot(&both, at(13, 0)).available);
        assert!(slot(&only_a, at(13, 0)).available);
    }

    #[test]
    fn no_stylists_means_branch_level_availability() {
        let existing = vec![booking("S1", at(10, 0), 60)];
        let avail = compute_availability(&branch(), &[], &existing, &[], monday(), 60, 30);
        assert!(avail.slots.iter().all(|s| s.available));
        let blanks = compute_availability(&branch(), &[], &existing, &["".into(), " ".into()], monday(), 60, 30);
        assert_eq!(avail, blanks);
    }

    #[test]
    fn holiday_yields_message_and_no_slots() {
        let holiday = CalendarEntry {
            id: Ulid::new(),
            branch_id: "b1".into(),
            date: monday(),
            kind: CalendarEntryType::Holiday,
            title: Some("Staff day".into()),
            special_hours: None,
        };
        for minutes in [15, 60, 240] {
            let avail = compute_availability(&branch(), &[holiday.clone()], &[], &["s1".into()], monday(), minutes, 30);
            assert!(avail.slots.is_empty());
            assert_eq!(avail.message.as_deref(), Some("Holiday: Staff day"));
        }
    }

    #[test]
    fn unconfigured_day_message_differs_from_closed() {
        let tuesday = monday().succ_opt().unwrap();
        let avail = compute_availability(&branch(), &[], &[], &[], tuesday, 60, 30);
        assert!(avail.slots.is_empty());
        assert!(avail.message.unwrap().contains("not configured"));
    }

    #[test]
    fn service_longer_than_day_reports_no_fit() {
        let avail = compute_availability(&branch(), &[], &[], &[], monday(), 9 * 60, 30);
        assert!(avail.slots.is_empty());
        assert_eq!(avail.message.as_deref(), Some(NO_SLOTS_MESSAGE));
    }

    #[test]
    fn slots_are_chronological() {
        let existing = vec![booking("s1", at(12, 0), 90)];
        let avail = compute_availability(&branch(), &[], &existing, &["s1".into()], monday(), 45, 15);
        assert!(avail.slots.windows(2).all(|w| w[0].time + 15 * M == w[1].time));
    }

    #[test]
    fn duplicate_stylists_collapse() {
        let ids = vec!["a".to_string(), "b".to_string(), "a".to_string(), String::new()];
        assert_eq!(distinct_stylists(&ids), vec!["a", "b"]);
    }
}
