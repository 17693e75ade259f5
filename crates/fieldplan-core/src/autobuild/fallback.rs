// Cell selection when a source game's field has no counterpart in the
// current event.

use std::collections::{HashMap, HashSet};

use chrono::{NaiveDate, NaiveDateTime};

use crate::grid::Cell;
use crate::model::FieldId;

/// An open grid cell together with how busy its field already is that day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateCell {
    pub cell: Cell,
    pub field_day_load: usize,
}

/// Ranks open cells for a game that wanted to start at `target`. The
/// executor tries the returned cells in order until one accepts the game.
pub trait FallbackStrategy: Send + Sync {
    fn rank(&self, target: NaiveDateTime, candidates: Vec<CandidateCell>) -> Vec<Cell>;
}

/// Same date, at or after the target time: earliest start first, then the
/// least-used field that day, then the lowest field id.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestSlot;

impl FallbackStrategy for NearestSlot {
    fn rank(&self, target: NaiveDateTime, mut candidates: Vec<CandidateCell>) -> Vec<Cell> {
        candidates.retain(|c| c.cell.start.date() == target.date() && c.cell.start >= target);
        candidates.sort_by_key(|c| (c.cell.start, c.field_day_load, c.cell.field_id));
        candidates.into_iter().map(|c| c.cell).collect()
    }
}

/// Grid cells not yet holding a game, annotated with field-day load.
pub(crate) fn open_candidates(
    cells: &[Cell],
    occupied: &HashSet<Cell>,
    load: &HashMap<(FieldId, NaiveDate), usize>,
) -> Vec<CandidateCell> {
    cells
        .iter()
        .filter(|c| !occupied.contains(c))
        .map(|c| CandidateCell {
            cell: *c,
            field_day_load: load.get(&(c.field_id, c.start.date())).copied().unwrap_or(0),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn cand(day: u32, h: u32, field_id: FieldId, load: usize) -> CandidateCell {
        CandidateCell {
            cell: Cell {
                start: at(day, h, 0),
                field_id,
            },
            field_day_load: load,
        }
    }

    #[test]
    fn nearest_slot_orders_by_start_then_load_then_field() {
        let ranked = NearestSlot.rank(
            at(7, 9, 0),
            vec![
                cand(7, 10, 1, 0),
                cand(7, 9, 3, 2),
                cand(7, 9, 2, 1),
                cand(7, 9, 1, 1),
                cand(7, 8, 1, 0),
                cand(8, 9, 1, 0),
            ],
        );
        let order: Vec<_> = ranked.iter().map(|c| (c.start, c.field_id)).collect();
        assert_eq!(
            order,
            vec![
                (at(7, 9, 0), 1),
                (at(7, 9, 0), 2),
                (at(7, 9, 0), 3),
                (at(7, 10, 0), 1),
            ]
        );
    }

    #[test]
    fn open_candidates_skip_occupied_cells() {
        let cells = vec![cand(7, 9, 1, 0).cell, cand(7, 9, 2, 0).cell];
        let occupied: HashSet<Cell> = [cells[0]].into_iter().collect();
        let mut load = HashMap::new();
        load.insert((2, at(7, 0, 0).date()), 3);

        let open = open_candidates(&cells, &occupied, &load);
        assert_eq!(open, vec![cand(7, 9, 2, 3)]);
    }
}
