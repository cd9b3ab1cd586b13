use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only instant type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Appointment length used whenever a duration is missing or non-positive.
pub const DEFAULT_DURATION_MINUTES: u32 = 60;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Saturates at `Ms::MAX`; callers range-check `start` before storing.
    pub fn from_minutes(start: Ms, minutes: u32) -> Self {
        Self::new(start, start.saturating_add(minutes as Ms * MINUTE_MS))
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

// ── Branch documents ─────────────────────────────────────────────

/// One weekday of a branch's weekly template. Field names follow the stored
/// document shape (`isOpen`, `open`, `close`, legacy `closed`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayHours {
    #[serde(default)]
    pub is_open: Option<bool>,
    #[serde(default)]
    pub open: String,
    #[serde(default)]
    pub close: String,
    /// Older documents mark days off with `closed: true` instead of `isOpen`.
    #[serde(default)]
    pub closed: Option<bool>,
}

impl DayHours {
    pub fn open(open: &str, close: &str) -> Self {
        Self {
            is_open: Some(true),
            open: open.to_string(),
            close: close.to_string(),
            closed: None,
        }
    }

    pub fn day_off() -> Self {
        Self {
            is_open: Some(false),
            ..Self::default()
        }
    }

    pub fn is_open_day(&self) -> bool {
        if self.closed == Some(true) {
            return false;
        }
        self.is_open.unwrap_or(self.closed == Some(false))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingHours {
    #[serde(default)]
    pub monday: Option<DayHours>,
    #[serde(default)]
    pub tuesday: Option<DayHours>,
    #[serde(default)]
    pub wednesday: Option<DayHours>,
    #[serde(default)]
    pub thursday: Option<DayHours>,
    #[serde(default)]
    pub friday: Option<DayHours>,
    #[serde(default)]
    pub saturday: Option<DayHours>,
    #[serde(default)]
    pub sunday: Option<DayHours>,
}

impl OperatingHours {
    pub fn day(&self, weekday: Weekday) -> Option<&DayHours> {
        match weekday {
            Weekday::Mon => self.monday.as_ref(),
            Weekday::Tue => self.tuesday.as_ref(),
            Weekday::Wed => self.wednesday.as_ref(),
            Weekday::Thu => self.thursday.as_ref(),
            Weekday::Fri => self.friday.as_ref(),
            Weekday::Sat => self.saturday.as_ref(),
            Weekday::Sun => self.sunday.as_ref(),
        }
    }

    pub fn set_day(&mut self, weekday: Weekday, hours: DayHours) {
        let slot = match weekday {
            Weekday::Mon => &mut self.monday,
            Weekday::Tue => &mut self.tuesday,
            Weekday::Wed => &mut self.wednesday,
            Weekday::Thu => &mut self.thursday,
            Weekday::Fri => &mut self.friday,
            Weekday::Sat => &mut self.saturday,
            Weekday::Sun => &mut self.sunday,
        };
        *slot = Some(hours);
    }
}

pub fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// IANA zone name; dates and clock times of this branch are local to it.
    pub timezone: String,
    #[serde(default)]
    pub operating_hours: OperatingHours,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarEntryType {
    Holiday,
    Closure,
    SpecialHours,
}

impl CalendarEntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalendarEntryType::Holiday => "holiday",
            CalendarEntryType::Closure => "closure",
            CalendarEntryType::SpecialHours => "special_hours",
        }
    }

    pub fn closes_branch(&self) -> bool {
        matches!(self, CalendarEntryType::Holiday | CalendarEntryType::Closure)
    }
}

impl FromStr for CalendarEntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "holiday" => Ok(CalendarEntryType::Holiday),
            "closure" => Ok(CalendarEntryType::Closure),
            "special_hours" => Ok(CalendarEntryType::SpecialHours),
            other => Err(format!("unknown calendar entry type: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialHours {
    pub open: String,
    pub close: String,
}

/// A date-scoped override of a branch's weekly template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEntry {
    pub id: Ulid,
    pub branch_id: String,
    pub date: NaiveDate,
    #[serde(rename = "type")]
    pub kind: CalendarEntryType,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub special_hours: Option<SpecialHours>,
}

impl CalendarEntry {
    /// Human-readable reason shown when this entry closes the branch.
    pub fn closure_reason(&self) -> String {
        let label = match self.kind {
            CalendarEntryType::Holiday => "Holiday",
            CalendarEntryType::Closure => "Closure",
            CalendarEntryType::SpecialHours => "Special hours",
        };
        match self.title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => format!("{label}: {title}"),
            _ => label.to_string(),
        }
    }
}

// ── Appointments ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    InService,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::InService => "in_service",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }

    /// Only these statuses hold a stylist's time.
    pub fn occupies_stylist(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Pending | AppointmentStatus::Confirmed | AppointmentStatus::InService
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }

    pub fn can_transition_to(&self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Cancelled | NoShow) => true,
            (Pending, Confirmed) | (Confirmed, InService) | (InService, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(AppointmentStatus::Pending),
            "confirmed" => Ok(AppointmentStatus::Confirmed),
            "in_service" => Ok(AppointmentStatus::InService),
            "completed" => Ok(AppointmentStatus::Completed),
            "cancelled" => Ok(AppointmentStatus::Cancelled),
            "no_show" => Ok(AppointmentStatus::NoShow),
            other => Err(format!("unknown appointment status: {other}")),
        }
    }
}

/// One service inside a multi-service appointment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceLine {
    pub service_id: String,
    #[serde(default)]
    pub stylist_id: Option<String>,
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub client_type: Option<String>,
}

/// An appointment document. Carries either the legacy single `stylist_id`
/// or a `services` list with per-service stylists (or both).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: Ulid,
    pub branch_id: String,
    pub appointment_date: Ms,
    /// Minutes; `None` falls back to [`DEFAULT_DURATION_MINUTES`].
    pub duration: Option<u32>,
    pub status: AppointmentStatus,
    pub stylist_id: Option<String>,
    pub service_id: Option<String>,
    pub services: Vec<ServiceLine>,
    pub client_id: Option<String>,
    pub client_name: Option<String>,
    pub is_guest: bool,
    pub notes: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
    pub reminder_sent: bool,
}

impl Appointment {
    pub fn duration_minutes(&self) -> u32 {
        effective_duration(self.duration)
    }

    /// Occupied window `[appointment_date, appointment_date + duration)`.
    pub fn span(&self) -> Span {
        Span::from_minutes(self.appointment_date, self.duration_minutes())
    }

    /// Every stylist this appointment holds, legacy field first, deduplicated.
    pub fn assigned_stylists(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        let legacy = self.stylist_id.as_deref();
        let per_service = self.services.iter().filter_map(|s| s.stylist_id.as_deref());
        for id in legacy.into_iter().chain(per_service) {
            if !id.is_empty() && !out.contains(&id) {
                out.push(id);
            }
        }
        out
    }

    pub fn has_stylist(&self, stylist_id: &str) -> bool {
        self.stylist_id.as_deref() == Some(stylist_id)
            || self
                .services
                .iter()
                .any(|s| s.stylist_id.as_deref() == Some(stylist_id))
    }
}

pub fn effective_duration(minutes: Option<u32>) -> u32 {
    match minutes {
        Some(m) if m > 0 => m,
        _ => DEFAULT_DURATION_MINUTES,
    }
}

/// Caller-supplied booking request, validated by the booking writer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAppointment {
    #[serde(default)]
    pub id: Option<Ulid>,
    pub branch_id: String,
    #[serde(default)]
    pub appointment_date: Option<Ms>,
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub stylist_id: Option<String>,
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub services: Vec<ServiceLine>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub is_guest: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

// ── Availability results ─────────────────────────────────────────

/// A candidate start time. Recomputed on every query, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeSlot {
    pub time: Ms,
    pub available: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub slots: Vec<TimeSlot>,
    pub message: Option<String>,
}

impl Availability {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            slots: Vec::new(),
            message: Some(message.into()),
        }
    }
}

// ── WAL records ──────────────────────────────────────────────────

/// Every state change of a tenant. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    BranchUpserted {
        branch: Branch,
    },
    CalendarEntryAdded {
        entry: CalendarEntry,
    },
    CalendarEntryRemoved {
        id: Ulid,
        branch_id: String,
    },
    AppointmentCreated {
        appointment: Appointment,
    },
    AppointmentRescheduled {
        id: Ulid,
        appointment_date: Ms,
        duration: Option<u32>,
        at: Ms,
    },
    AppointmentStatusChanged {
        id: Ulid,
        status: AppointmentStatus,
        at: Ms,
    },
    ReminderSent {
        id: Ulid,
        at: Ms,
    },
}
