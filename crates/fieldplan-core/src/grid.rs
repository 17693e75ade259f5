// Expansion of the timeslot axis into addressable (start, field) cells.

use std::collections::{BTreeSet, HashMap};

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::model::{FieldId, FieldTimeslot, Game, TimeslotDate};

/// One addressable slot of the schedule grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Cell {
    pub start: NaiveDateTime,
    pub field_id: FieldId,
}

/// Cross product of configured dates and field timeslots: every date whose
/// weekday matches a timeslot's day, expanded by the interval up to the
/// timeslot's max games. Sorted by start, then field; duplicates collapse.
pub fn expand(dates: &[TimeslotDate], slots: &[FieldTimeslot]) -> Vec<Cell> {
    let mut cells = BTreeSet::new();
    for date in dates {
        for slot in slots.iter().filter(|s| s.day_of_week == date.date.weekday()) {
            let first = date.date.and_time(slot.start_time);
            for k in 0..slot.max_games {
                let offset = Duration::minutes(i64::from(slot.interval_minutes) * i64::from(k));
                let start = first + offset;
                // A block running past midnight belongs to the next day and
                // is not addressable from this date.
                if start.date() != date.date {
                    break;
                }
                cells.insert(Cell {
                    start,
                    field_id: slot.field_id,
                });
            }
        }
    }
    cells.into_iter().collect()
}

/// Number of games already placed on each (field, date).
pub fn field_day_load<'a>(games: impl IntoIterator<Item = &'a Game>) -> HashMap<(FieldId, NaiveDate), usize> {
    let mut load = HashMap::new();
    for g in games {
        *load.entry((g.field_id, g.start.date())).or_insert(0) += 1;
    }
    load
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, Weekday};

    fn date(y: i32, m: u32, d: u32, round: u32) -> TimeslotDate {
        TimeslotDate {
            id: 0,
            agegroup_id: 1,
            date: NaiveDate::from_ymd_opt(y, m, d).unwrap(),
            round,
        }
    }

    fn slot(field_id: FieldId, dow: Weekday, h: u32, interval: u32, max: u32) -> FieldTimeslot {
        FieldTimeslot {
            id: 0,
            agegroup_id: 1,
            field_id,
            day_of_week: dow,
            start_time: NaiveTime::from_hms_opt(h, 0, 0).unwrap(),
            interval_minutes: interval,
            max_games: max,
        }
    }

    #[test]
    fn expands_only_matching_weekdays() {
        // 2025-06-07 is a Saturday, 2025-06-08 a Sunday.
        let dates = vec![date(2025, 6, 7, 1), date(2025, 6, 8, 2)];
        let slots = vec![slot(1, Weekday::Sat, 8, 60, 3), slot(2, Weekday::Sun, 9, 90, 2)];

        let cells = expand(&dates, &slots);
        assert_eq!(cells.len(), 5);

        let sat: Vec<_> = cells.iter().filter(|c| c.field_id == 1).collect();
        assert_eq!(sat.len(), 3);
        assert_eq!(sat[2].start.format("%Y-%m-%d %H:%M").to_string(), "2025-06-07 10:00");

        let sun: Vec<_> = cells.iter().filter(|c| c.field_id == 2).collect();
        assert_eq!(sun[1].start.format("%H:%M").to_string(), "10:30");
    }

    #[test]
    fn cells_are_sorted_and_unique() {
        let dates = vec![date(2025, 6, 7, 1)];
        let slots = vec![
            slot(2, Weekday::Sat, 8, 60, 2),
            slot(1, Weekday::Sat, 8, 60, 2),
            slot(1, Weekday::Sat, 8, 60, 2),
        ];
        let cells = expand(&dates, &slots);
        assert_eq!(cells.len(), 4);
        assert!(cells.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(cells[0].field_id, 1);
        assert_eq!(cells[1].field_id, 2);
    }

    #[test]
    fn block_stops_at_midnight() {
        let dates = vec![date(2025, 6, 7, 1)];
        let slots = vec![slot(1, Weekday::Sat, 22, 60, 5)];
        assert_eq!(expand(&dates, &slots).len(), 2);
    }

    #[test]
    fn no_dates_means_empty_grid() {
        let slots = vec![slot(1, Weekday::Sat, 8, 60, 3)];
        assert!(expand(&[], &slots).is_empty());
    }
}
