// Mapping of source event dates onto the current event's configured dates.

use chrono::{Datelike, NaiveDate};

/// Maps a source date to the current date that plays the same role: the
/// k-th source date of a weekday goes to the k-th current date of that
/// weekday. Dates with no same-weekday counterpart fall back to the date at
/// the same overall position.
#[derive(Debug, Clone)]
pub struct DateMapper {
    source: Vec<NaiveDate>,
    current: Vec<NaiveDate>,
}

impl DateMapper {
    pub fn new(mut source: Vec<NaiveDate>, mut current: Vec<NaiveDate>) -> Self {
        source.sort();
        source.dedup();
        current.sort();
        current.dedup();
        Self { source, current }
    }

    pub fn map(&self, date: NaiveDate) -> Option<NaiveDate> {
        let weekday = date.weekday();
        let nth = self
            .source
            .iter()
            .filter(|d| d.weekday() == weekday)
            .position(|d| *d == date);
        if let Some(k) = nth {
            if let Some(hit) = self.current.iter().filter(|d| d.weekday() == weekday).nth(k) {
                return Some(*hit);
            }
        }
        let ordinal = self.source.iter().position(|d| *d == date)?;
        self.current.get(ordinal).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn same_weekday_occurrence_maps_across_years() {
        // 2024-06-01/02 are Sat/Sun; 2025-06-07/08 are Sat/Sun.
        let mapper = DateMapper::new(
            vec![d(2024, 6, 1), d(2024, 6, 2), d(2024, 6, 8)],
            vec![d(2025, 6, 7), d(2025, 6, 8), d(2025, 6, 14)],
        );
        assert_eq!(mapper.map(d(2024, 6, 1)), Some(d(2025, 6, 7)));
        assert_eq!(mapper.map(d(2024, 6, 2)), Some(d(2025, 6, 8)));
        assert_eq!(mapper.map(d(2024, 6, 8)), Some(d(2025, 6, 14)));
    }

    #[test]
    fn falls_back_to_overall_position() {
        // Source plays on a Friday, current only has weekend dates.
        let mapper = DateMapper::new(
            vec![d(2024, 5, 31), d(2024, 6, 1)],
            vec![d(2025, 6, 7), d(2025, 6, 8)],
        );
        assert_eq!(mapper.map(d(2024, 5, 31)), Some(d(2025, 6, 7)));
    }

    #[test]
    fn unknown_or_unmappable_dates_yield_none() {
        let mapper = DateMapper::new(vec![d(2024, 6, 1), d(2024, 6, 2)], vec![d(2025, 6, 7)]);
        assert_eq!(mapper.map(d(2024, 6, 2)), None);
        assert_eq!(mapper.map(d(2024, 7, 4)), None);
        assert_eq!(DateMapper::new(vec![], vec![]).map(d(2024, 6, 1)), None);
    }
}
