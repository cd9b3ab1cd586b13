use crate::model::*;

use super::calendar::WorkingWindow;

pub const DEFAULT_GRANULARITY_MINUTES: i64 = 30;

/// Candidate start times within a working window.
///
/// Lazy and finite. Cloning yields an independent cursor, so the same
/// sequence can be replayed from any point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slots {
    next: Ms,
    close: Ms,
    duration: Ms,
    step: Ms,
}

/// Start at `open`, step by `granularity_minutes`, and emit a start only if
/// the whole service ends by `close`. A non-positive duration is treated as
/// the default appointment length; a non-positive granularity as 30 minutes.
pub fn generate_slots(window: &WorkingWindow, service_minutes: i64, granularity_minutes: i64) -> Slots {
    let minutes = if service_minutes <= 0 {
        DEFAULT_DURATION_MINUTES as i64
    } else {
        service_minutes
    };
    let step = if granularity_minutes <= 0 {
        DEFAULT_GRANULARITY_MINUTES
    } else {
        granularity_minutes
    };
    Slots {
        next: window.span.start,
        close: window.span.end,
        duration: minutes.saturating_mul(MINUTE_MS),
        step: step.saturating_mul(MINUTE_MS),
    }
}

impl Slots {
    pub fn service_duration_ms(&self) -> Ms {
        self.duration
    }

    fn remaining(&self) -> usize {
        let last_start = self.close.saturating_sub(self.duration);
        if self.next > last_start {
            0
        } else {
            ((last_start - self.next) / self.step + 1) as usize
        }
    }
}

impl Iterator for Slots {
    type Item = Ms;

    fn next(&mut self) -> Option<Ms> {
        if self.next.saturating_add(self.duration) > self.close {
            return None;
        }
        let start = self.next;
        self.next = self.next.saturating_add(self.step);
        Some(start)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining();
        (n, Some(n))
    }
}

impl ExactSizeIterator for Slots {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::calendar::WindowSource;
    use chrono::NaiveDate;

    const H: Ms = HOUR_MS;
    const M: Ms = MINUTE_MS;

    fn window(open: Ms, close: Ms) -> WorkingWindow {
        WorkingWindow {
            date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
            span: Span::new(open, close),
            source: WindowSource::Weekly,
        }
    }

    #[test]
    fn nine_to_five_hourly_service() {
        let slots: Vec<Ms> = generate_slots(&window(9 * H, 17 * H), 60, 30).collect();
        assert_eq!(slots.len(), 15);
        assert_eq!(slots[0], 9 * H);
        assert_eq!(slots[1], 9 * H + 30 * M);
        assert_eq!(*slots.last().unwrap(), 16 * H);
    }

    #[test]
    fn no_clipped_slots() {
        // 50-minute service in a 2h window at 30-minute steps: 9:00, 9:30, 10:00.
        // 10:30 would end at 11:20 > 11:00.
        let slots: Vec<Ms> = generate_slots(&window(9 * H, 11 * H), 50, 30).collect();
        assert_eq!(slots, vec![9 * H, 9 * H + 30 * M, 10 * H]);
    }

    #[test]
    fn exact_fit_is_emitted() {
        let slots: Vec<Ms> = generate_slots(&window(9 * H, 10 * H), 60, 30).collect();
        assert_eq!(slots, vec![9 * H]);
    }

    #[test]
    fn service_longer_than_window_yields_nothing() {
        let mut slots = generate_slots(&window(9 * H, 10 * H), 90, 30);
        assert_eq!(slots.len(), 0);
        assert_eq!(slots.next(), None);
    }

    #[test]
    fn non_positive_duration_defaults_to_sixty() {
        let zero: Vec<Ms> = generate_slots(&window(9 * H, 17 * H), 0, 30).collect();
        let negative: Vec<Ms> = generate_slots(&window(9 * H, 17 * H), -15, 30).collect();
        let sixty: Vec<Ms> = generate_slots(&window(9 * H, 17 * H), 60, 30).collect();
        assert_eq!(zero, sixty);
        assert_eq!(negative, sixty);
    }

    #[test]
    fn huge_duration_never_overflows() {
        let mut slots = generate_slots(&window(9 * H, 17 * H), 1_000_000_000_000_000, 30);
        assert_eq!(slots.len(), 0);
        assert_eq!(slots.next(), None);
        assert_eq!(generate_slots(&window(9 * H, 17 * H), i64::MAX, 30).count(), 0);
        assert_eq!(generate_slots(&window(9 * H, 17 * H), 60, i64::MAX).count(), 1);
    }

    #[test]
    fn non_positive_granularity_defaults_to_thirty() {
        let slots = generate_slots(&window(9 * H, 17 * H), 60, 0);
        assert_eq!(slots.len(), 15);
    }

    #[test]
    fn generation_is_repeatable() {
        let w = window(9 * H, 17 * H);
        let a: Vec<Ms> = generate_slots(&w, 45, 15).collect();
        let b: Vec<Ms> = generate_slots(&w, 45, 15).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn clone_restarts_from_cursor() {
        let mut slots = generate_slots(&window(9 * H, 12 * H), 60, 60);
        assert_eq!(slots.next(), Some(9 * H));
        let replay = slots.clone();
        assert_eq!(slots.collect::<Vec<_>>(), vec![10 * H, 11 * H]);
        assert_eq!(replay.collect::<Vec<_>>(), vec![10 * H, 11 * H]);
    }

    #[test]
    fn size_hint_matches_count() {
        let slots = generate_slots(&window(9 * H, 17 * H), 45, 20);
        let hinted = slots.len();
        assert_eq!(hinted, slots.count());
    }
}
