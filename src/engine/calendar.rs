use chrono::{Datelike, NaiveDate, NaiveTime, TimeZone};
use chrono_tz::Tz;

use crate::model::*;

use super::EngineError;

/// Where a day's hours came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSource {
    Weekly,
    SpecialHours,
}

/// The instants between which a branch accepts appointments on one date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkingWindow {
    pub date: NaiveDate,
    pub span: Span,
    pub source: WindowSource,
}

/// Merge a branch's weekly template with its date overrides.
///
/// Precedence for `date`: a holiday or closure entry closes the day outright;
/// otherwise a special-hours entry replaces the template; otherwise the
/// template entry for the weekday applies. A weekday with no template entry
/// is a configuration problem, reported separately from a closed day.
pub fn resolve_working_window(
    branch: &Branch,
    entries: &[CalendarEntry],
    date: NaiveDate,
) -> Result<WorkingWindow, EngineError> {
    let tz = branch_timezone(branch)?;

    let mut special: Option<&CalendarEntry> = None;
    for entry in entries.iter().filter(|e| e.date == date) {
        if entry.kind.closes_branch() {
            return Err(EngineError::Closed(entry.closure_reason()));
        }
        if special.is_none() {
            special = Some(entry);
        }
    }

    if let Some(entry) = special {
        let hours = entry.special_hours.as_ref().ok_or_else(|| {
            EngineError::Configuration(format!("Special hours for {date} have no opening times"))
        })?;
        let span = local_window(&tz, date, &hours.open, &hours.close)?;
        return Ok(WorkingWindow {
            date,
            span,
            source: WindowSource::SpecialHours,
        });
    }

    let weekday = date.weekday();
    let day = branch.operating_hours.day(weekday).ok_or_else(|| {
        EngineError::Configuration(format!(
            "Operating hours are not configured for {}s",
            weekday_name(weekday)
        ))
    })?;
    if !day.is_open_day() {
        return Err(EngineError::Closed(format!(
            "Branch is closed on {}s",
            weekday_name(weekday)
        )));
    }

    let span = local_window(&tz, date, &day.open, &day.close)?;
    Ok(WorkingWindow {
        date,
        span,
        source: WindowSource::Weekly,
    })
}

pub fn branch_timezone(branch: &Branch) -> Result<Tz, EngineError> {
    branch.timezone.parse::<Tz>().map_err(|_| {
        EngineError::Configuration(format!(
            "Branch {} has an unknown timezone: {}",
            branch.id, branch.timezone
        ))
    })
}

/// Local midnight to the following local midnight.
pub fn day_span(tz: &Tz, date: NaiveDate) -> Result<Span, EngineError> {
    let start = local_instant(tz, date, "00:00")?;
    let end = local_instant(tz, date, "24:00")?;
    Ok(Span::new(start, end))
}

/// Local calendar date of an instant.
pub fn local_date(tz: &Tz, t: Ms) -> Option<NaiveDate> {
    tz.timestamp_millis_opt(t).single().map(|dt| dt.date_naive())
}

fn local_window(tz: &Tz, date: NaiveDate, open: &str, close: &str) -> Result<Span, EngineError> {
    let start = local_instant(tz, date, open)?;
    let end = local_instant(tz, date, close)?;
    if end <= start {
        return Err(EngineError::Configuration(format!(
            "Closing time {close} is not after opening time {open} on {date}"
        )));
    }
    Ok(Span::new(start, end))
}

/// Parse "HH:MM". "24:00" is accepted as midnight of the following day,
/// reported by the second field.
pub fn parse_clock(clock: &str) -> Result<(NaiveTime, bool), EngineError> {
    let clock = clock.trim();
    if clock == "24:00" {
        return Ok((NaiveTime::MIN, true));
    }
    NaiveTime::parse_from_str(clock, "%H:%M")
        .map(|t| (t, false))
        .map_err(|_| EngineError::Configuration(format!("Invalid clock time: {clock:?}")))
}

/// Resolve "HH:MM" on `date` in `tz`. "24:00" means the next midnight.
/// Times falling into a DST gap take the earliest valid mapping.
fn local_instant(tz: &Tz, date: NaiveDate, clock: &str) -> Result<Ms, EngineError> {
    let (time, next_day) = parse_clock(clock)?;
    let date = if next_day {
        date.succ_opt()
            .ok_or_else(|| EngineError::Configuration(format!("date out of range: {date}")))?
    } else {
        date
    };

    let naive = date.and_time(time);
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            // Inside a spring-forward gap: shift past it.
            tz.from_local_datetime(&(naive + chrono::Duration::hours(1))).earliest()
        })
        .map(|dt| dt.timestamp_millis())
        .ok_or_else(|| {
            EngineError::Configuration(format!("{clock} does not exist on {date} in {}", tz.name()))
        })
}
