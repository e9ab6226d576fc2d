use chrono::{Datelike, NaiveDate, Weekday};

use crate::calendar::BusinessCalendar;
use crate::model::{TimeOfDay, TimeSlot};

/// Fixed slot granularity.
pub const SLOT_MINUTES: u16 = 90;

/// Produces the candidate slots for a date. Output depends only on the
/// weekday, so each weekday's sequence is built once and cloned per call.
#[derive(Debug, Clone)]
pub struct SlotGenerator {
    by_weekday: [Vec<TimeSlot>; 7],
}

impl Default for SlotGenerator {
    fn default() -> Self {
        Self::new(BusinessCalendar)
    }
}

impl SlotGenerator {
    pub fn new(calendar: BusinessCalendar) -> Self {
        let by_weekday = [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ]
        .map(|wd| build_day(&calendar, wd));
        Self { by_weekday }
    }

    pub fn generate(&self, date: NaiveDate) -> Vec<TimeSlot> {
        self.for_weekday(date.weekday()).to_vec()
    }

    pub fn is_closed(&self, date: NaiveDate) -> bool {
        self.for_weekday(date.weekday()).is_empty()
    }

    /// The generated slot whose start equals `start`, if any.
    pub fn slot_starting_at(&self, date: NaiveDate, start: TimeOfDay) -> Option<TimeSlot> {
        self.for_weekday(date.weekday())
            .iter()
            .find(|s| s.start == start)
            .copied()
    }

    fn for_weekday(&self, weekday: Weekday) -> &[TimeSlot] {
        self.by_weekday
            .get(weekday.num_days_from_monday() as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

fn build_day(calendar: &BusinessCalendar, weekday: Weekday) -> Vec<TimeSlot> {
    let day = calendar.window_for(weekday);
    let (Some(open), Some(close)) = (day.open, day.close) else {
        return Vec::new();
    };
    if !day.is_open {
        return Vec::new();
    }
    let gap = calendar.midday_gap(weekday);

    let mut slots = Vec::new();
    let mut start = open;
    while start.plus_minutes(SLOT_MINUTES) <= close {
        let slot = TimeSlot::new(start, SLOT_MINUTES);
        if let Some((gap_start, gap_end)) = gap
            && slot.overlaps(gap_start, gap_end)
        {
            start = gap_end;
            continue;
        }
        slots.push(slot);
        start = slot.end;
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn starts(slots: &[TimeSlot]) -> Vec<String> {
        slots.iter().map(|s| s.start.to_string()).collect()
    }

    #[test]
    fn sunday_has_no_slots() {
        let slot_gen = SlotGenerator::default();
        // 2026-10-18 is a Sunday
        let mut d = date("2026-10-18");
        for _ in 0..10 {
            assert!(slot_gen.generate(d).is_empty());
            assert!(slot_gen.is_closed(d));
            d += Duration::days(7);
        }
    }

    #[test]
    fn saturday_has_three_morning_slots() {
        let slot_gen = SlotGenerator::default();
        let slots = slot_gen.generate(date("2026-10-24"));
        assert_eq!(slots.len(), 3);
        assert_eq!(starts(&slots), vec!["08:30", "10:00", "11:30"]);
        assert_eq!(slots[2].end, TimeOfDay::hm(13, 0));
    }

    #[test]
    fn weekdays_have_five_slots_around_lunch() {
        let slot_gen = SlotGenerator::default();
        // Monday 2026-10-19 through Friday 2026-10-23
        let mut d = date("2026-10-19");
        for _ in 0..5 {
            let slots = slot_gen.generate(d);
            assert_eq!(slots.len(), 5, "{d}");
            assert_eq!(
                starts(&slots),
                vec!["08:30", "10:00", "11:30", "14:00", "15:30"]
            );
            for s in &slots {
                assert!(!s.overlaps(TimeOfDay::hm(13, 0), TimeOfDay::hm(14, 0)));
                assert_eq!(s.duration_minutes, SLOT_MINUTES);
                assert_eq!(s.end, s.start.plus_minutes(SLOT_MINUTES));
            }
            d += Duration::days(1);
        }
    }

    #[test]
    fn slots_are_ordered_and_disjoint() {
        let slot_gen = SlotGenerator::default();
        let slots = slot_gen.generate(date("2026-10-21"));
        for pair in slots.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
    }

    #[test]
    fn generation_is_deterministic() {
        let slot_gen = SlotGenerator::default();
        let d = date("2026-10-21");
        assert_eq!(slot_gen.generate(d), slot_gen.generate(d));
        assert_eq!(slot_gen.generate(d), SlotGenerator::default().generate(d));
    }

    #[test]
    fn slot_lookup_by_start() {
        let slot_gen = SlotGenerator::default();
        let wed = date("2026-10-21");
        assert!(slot_gen.slot_starting_at(wed, TimeOfDay::hm(14, 0)).is_some());
        assert!(slot_gen.slot_starting_at(wed, TimeOfDay::hm(13, 0)).is_none());
        assert!(slot_gen.slot_starting_at(wed, TimeOfDay::hm(9, 0)).is_none());
        let sat = date("2026-10-24");
        assert!(slot_gen.slot_starting_at(sat, TimeOfDay::hm(14, 0)).is_none());
    }
}
