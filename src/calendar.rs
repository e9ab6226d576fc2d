use chrono::Weekday;

use crate::model::TimeOfDay;

/// Operating window for one weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessDay {
    pub is_open: bool,
    pub open: Option<TimeOfDay>,
    pub close: Option<TimeOfDay>,
}

impl BusinessDay {
    const fn open(open: TimeOfDay, close: TimeOfDay) -> Self {
        Self {
            is_open: true,
            open: Some(open),
            close: Some(close),
        }
    }

    const fn closed() -> Self {
        Self {
            is_open: false,
            open: None,
            close: None,
        }
    }
}

const WEEKDAY_OPEN: TimeOfDay = TimeOfDay::hm(8, 30);
const WEEKDAY_CLOSE: TimeOfDay = TimeOfDay::hm(17, 0);
const SATURDAY_CLOSE: TimeOfDay = TimeOfDay::hm(13, 0);
const LUNCH_START: TimeOfDay = TimeOfDay::hm(13, 0);
const LUNCH_END: TimeOfDay = TimeOfDay::hm(14, 0);

/// The fixed weekly pattern: Mon–Fri full day with a lunch gap, Saturday
/// mornings, Sunday closed. The weekday is the only input; there are no
/// per-date exceptions.
#[derive(Debug, Clone, Copy, Default)]
pub struct BusinessCalendar;

impl BusinessCalendar {
    pub fn window_for(&self, weekday: Weekday) -> BusinessDay {
        match weekday {
            Weekday::Mon | Weekday::Tue | Weekday::Wed | Weekday::Thu | Weekday::Fri => {
                BusinessDay::open(WEEKDAY_OPEN, WEEKDAY_CLOSE)
            }
            Weekday::Sat => BusinessDay::open(WEEKDAY_OPEN, SATURDAY_CLOSE),
            Weekday::Sun => BusinessDay::closed(),
        }
    }

    /// Midday break removed from generated slots, if any.
    pub fn midday_gap(&self, weekday: Weekday) -> Option<(TimeOfDay, TimeOfDay)> {
        match weekday {
            Weekday::Sat | Weekday::Sun => None,
            _ => Some((LUNCH_START, LUNCH_END)),
        }
    }
}
