// Shared in-memory fixture for unit tests.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Weekday};

use crate::config::EngineConfig;
use crate::engine::ScheduleEngine;
use crate::model::*;

pub(crate) fn at(h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 6, 1)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

/// Event "Summer Cup" with agegroup 12U, division Gold (ranks 1-4), Field A
/// and Field B, and an hourly Sunday grid on 2025-06-01 from 08:00.
pub(crate) struct Fixture {
    pub engine: ScheduleEngine,
    pub event: EventId,
    pub agegroup: AgegroupId,
    pub division: DivisionId,
    pub teams: Vec<TeamId>,
    pub field_a: FieldId,
    pub field_b: FieldId,
}

pub(crate) fn fixture(champions_by_division: bool) -> Fixture {
    let engine = ScheduleEngine::open(":memory:", EngineConfig::default()).unwrap();
    let db = engine.db();
    let event = db.create_event("Summer Cup").unwrap();
    let agegroup = db.create_agegroup(event, "12U", champions_by_division).unwrap();
    let field_a = db.create_field(event, "Field A", None).unwrap();
    let field_b = db.create_field(event, "Field B", None).unwrap();
    db.add_timeslot_date(agegroup, at(0, 0).date(), 1).unwrap();
    for field in [field_a, field_b] {
        db.add_field_timeslot(
            agegroup,
            field,
            Weekday::Sun,
            NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            60,
            10,
        )
        .unwrap();
    }

    let mut fx = Fixture {
        engine,
        event,
        agegroup,
        division: 0,
        teams: Vec::new(),
        field_a,
        field_b,
    };
    fx.division = fx.add_division("Gold", 4);
    fx.teams = fx
        .engine
        .db()
        .teams_for_division(fx.division)
        .unwrap()
        .iter()
        .map(|t| t.id)
        .collect();
    fx
}

impl Fixture {
    /// Add a division with `teams` active teams ranked 1.. and generate its
    /// pairings.
    pub(crate) fn add_division(&self, name: &str, teams: u32) -> DivisionId {
        let db = self.engine.db();
        let division = db.create_division(self.agegroup, name).unwrap();
        for rank in 1..=teams {
            db.create_team(division, &format!("{name} {rank}"), rank, true).unwrap();
        }
        self.engine.generate_or_get_pairings(division).unwrap();
        division
    }

    /// Pool pairing of ranks `a` and `b` in the fixture division.
    pub(crate) fn pairing(&self, a: u32, b: u32) -> PairingId {
        self.pairing_in(self.division, a, b)
    }

    pub(crate) fn pairing_in(&self, division: DivisionId, a: u32, b: u32) -> PairingId {
        self.engine
            .db()
            .pairings_for_division(division)
            .unwrap()
            .into_iter()
            .find(|p| p.same_sides(&TeamRef::Rank(a), &TeamRef::Rank(b)))
            .map(|p| p.id)
            .unwrap()
    }

    /// The `n`-th bracket pairing (1-based, in key order) of a division.
    pub(crate) fn bracket_pairing(&self, division: DivisionId, n: usize) -> PairingId {
        self.engine
            .db()
            .pairings_for_division(division)
            .unwrap()
            .into_iter()
            .filter(|p| p.is_bracket())
            .nth(n - 1)
            .map(|p| p.id)
            .unwrap()
    }
}
