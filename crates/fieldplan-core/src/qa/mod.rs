// Schedule quality checks over one consistent snapshot of an event.
//
// Every check and aggregate runs as its own section: an error or panic in
// one is recorded in `QaReport::sections` and the rest still run.

pub mod aggregates;
pub mod checks;
pub mod snapshot;

use std::panic::{self, AssertUnwindSafe};

use rusqlite::Connection;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::ScheduleResult;
use crate::model::*;

pub use aggregates::QaInfo;
pub use snapshot::Snapshot;

// ---------------------------------------------------------------------------
// Findings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    FieldDoubleBooking,
    TeamDoubleBooking,
    RankMismatch,
    CrossPoolBracket,
    UnscheduledTeam,
    BackToBack,
    RepeatedMatchup,
    InactiveTeamInGame,
    IncompleteRoundRobin,
    OffGridGame,
}

impl CheckKind {
    pub fn severity(&self) -> Severity {
        match self {
            CheckKind::FieldDoubleBooking
            | CheckKind::TeamDoubleBooking
            | CheckKind::RankMismatch
            | CheckKind::CrossPoolBracket => Severity::Critical,
            _ => Severity::Warning,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CheckKind::FieldDoubleBooking => "field_double_booking",
            CheckKind::TeamDoubleBooking => "team_double_booking",
            CheckKind::RankMismatch => "rank_mismatch",
            CheckKind::CrossPoolBracket => "cross_pool_bracket",
            CheckKind::UnscheduledTeam => "unscheduled_team",
            CheckKind::BackToBack => "back_to_back",
            CheckKind::RepeatedMatchup => "repeated_matchup",
            CheckKind::InactiveTeamInGame => "inactive_team_in_game",
            CheckKind::IncompleteRoundRobin => "incomplete_round_robin",
            CheckKind::OffGridGame => "off_grid_game",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub check: CheckKind,
    pub severity: Severity,
    pub message: String,
    pub game_ids: Vec<GameId>,
    pub team_ids: Vec<TeamId>,
    pub division_id: Option<DivisionId>,
}

impl Finding {
    pub fn new(check: CheckKind, message: String) -> Self {
        Self {
            check,
            severity: check.severity(),
            message,
            game_ids: Vec::new(),
            team_ids: Vec::new(),
            division_id: None,
        }
    }

    pub fn with_games(mut self, game_ids: Vec<GameId>) -> Self {
        self.game_ids = game_ids;
        self
    }

    pub fn with_teams(mut self, team_ids: Vec<TeamId>) -> Self {
        self.team_ids = team_ids;
        self
    }

    pub fn in_division(mut self, division_id: DivisionId) -> Self {
        self.division_id = Some(division_id);
        self
    }
}

/// A snapshot that does not hang together, e.g. a game naming a team the
/// event does not have.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CheckError {
    #[error("{entity} {id} referenced by the schedule is missing")]
    Missing { entity: &'static str, id: i64 },
}

/// Tunables the checks read.
#[derive(Debug, Clone, Copy)]
pub struct CheckContext {
    pub game_minutes: u32,
    pub back_to_back_minutes: u32,
}

impl CheckContext {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            game_minutes: cfg.placement.game_minutes,
            back_to_back_minutes: cfg.qa.back_to_back_minutes,
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionStatus {
    pub section: &'static str,
    pub ok: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QaReport {
    pub event_id: EventId,
    pub critical: Vec<Finding>,
    pub warnings: Vec<Finding>,
    pub info: QaInfo,
    pub sections: Vec<SectionStatus>,
}

impl QaReport {
    pub fn is_clean(&self) -> bool {
        self.critical.is_empty() && self.warnings.is_empty()
    }

    /// Sections that failed to evaluate.
    pub fn degraded(&self) -> impl Iterator<Item = &SectionStatus> + '_ {
        self.sections.iter().filter(|s| !s.ok)
    }
}

pub(crate) type Check = fn(&Snapshot, &CheckContext) -> Result<Vec<Finding>, CheckError>;
pub(crate) type Aggregate = fn(&Snapshot, &mut QaInfo) -> Result<(), CheckError>;

const CHECKS: &[(CheckKind, Check)] = &[
    (CheckKind::FieldDoubleBooking, checks::field_double_booking),
    (CheckKind::TeamDoubleBooking, checks::team_double_booking),
    (CheckKind::RankMismatch, checks::rank_mismatch),
    (CheckKind::CrossPoolBracket, checks::cross_pool_bracket),
    (CheckKind::UnscheduledTeam, checks::unscheduled_team),
    (CheckKind::BackToBack, checks::back_to_back),
    (CheckKind::RepeatedMatchup, checks::repeated_matchup),
    (CheckKind::InactiveTeamInGame, checks::inactive_team_in_game),
    (CheckKind::IncompleteRoundRobin, checks::incomplete_round_robin),
    (CheckKind::OffGridGame, checks::off_grid_game),
];

const AGGREGATES: &[(&str, Aggregate)] = &[
    ("games_per_date", aggregates::games_per_date),
    ("games_per_team", aggregates::games_per_team),
    ("games_per_team_per_day", aggregates::games_per_team_per_day),
    ("games_per_field_per_day", aggregates::games_per_field_per_day),
    ("time_spread", aggregates::time_spread),
    ("bracket_games", aggregates::bracket_games),
    ("round_robin", aggregates::round_robin),
];

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Run one section, turning an error or panic into a degraded status.
fn run_section<T>(
    sections: &mut Vec<SectionStatus>,
    section: &'static str,
    f: impl FnOnce() -> Result<T, CheckError>,
) -> Option<T> {
    let error = match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => {
            sections.push(SectionStatus {
                section,
                ok: true,
                error: None,
            });
            return Some(value);
        }
        Ok(Err(e)) => e.to_string(),
        Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
    };
    warn!("QA section {section} failed: {error}");
    sections.push(SectionStatus {
        section,
        ok: false,
        error: Some(error),
    });
    None
}

fn evaluate_with(
    snapshot: &Snapshot,
    ctx: &CheckContext,
    checks: &[(CheckKind, Check)],
    aggregates: &[(&'static str, Aggregate)],
) -> QaReport {
    let mut sections = Vec::new();
    let mut critical = Vec::new();
    let mut warnings = Vec::new();

    for (kind, check) in checks {
        let Some(findings) = run_section(&mut sections, kind.name(), || check(snapshot, ctx)) else {
            continue;
        };
        for f in findings {
            match f.severity {
                Severity::Critical => critical.push(f),
                Severity::Warning => warnings.push(f),
            }
        }
    }

    let mut info = QaInfo::default();
    for (name, aggregate) in aggregates {
        // A failed aggregate leaves its part of `info` at the default.
        let mut part = info.clone();
        if run_section(&mut sections, *name, || aggregate(snapshot, &mut part)).is_some() {
            info = part;
        }
    }

    QaReport {
        event_id: snapshot.event_id,
        critical,
        warnings,
        info,
        sections,
    }
}

/// Run every check and aggregate over a loaded snapshot.
pub fn evaluate(snapshot: &Snapshot, ctx: &CheckContext) -> QaReport {
    evaluate_with(snapshot, ctx, CHECKS, AGGREGATES)
}

pub(crate) fn run_in(conn: &Connection, event_id: EventId, cfg: &EngineConfig) -> ScheduleResult<QaReport> {
    let snapshot = snapshot::load_in(conn, event_id)?;
    let report = evaluate(&snapshot, &CheckContext::from_config(cfg));
    info!(
        "QA for event {}: {} critical, {} warnings, {} of {} sections degraded",
        event_id,
        report.critical.len(),
        report.warnings.len(),
        report.degraded().count(),
        report.sections.len()
    );
    Ok(report)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::grid::Cell;
    use chrono::{NaiveDate, NaiveDateTime};
    use std::collections::{HashMap, HashSet};

    pub(crate) fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    /// One agegroup, one division "Gold" with teams 1-4 (id == rank), two
    /// fields and an hourly grid from 08:00 to 17:00 on 2025-06-01.
    pub(crate) fn snapshot() -> Snapshot {
        let teams = (1..=4)
            .map(|i| Team {
                id: i,
                division_id: 1,
                name: format!("Gold {i}"),
                div_rank: i as u32,
                active: true,
            })
            .collect();
        let fields = vec![
            Field {
                id: 1,
                event_id: 1,
                name: "Field A".into(),
                location: None,
            },
            Field {
                id: 2,
                event_id: 1,
                name: "Field B".into(),
                location: None,
            },
        ];
        let cells: HashSet<Cell> = (8..=17)
            .flat_map(|h| [1, 2].map(|field_id| Cell { start: at(h, 0), field_id }))
            .collect();
        Snapshot {
            event_id: 1,
            agegroups: vec![Agegroup {
                id: 1,
                event_id: 1,
                name: "12U".into(),
                champions_by_division: true,
            }],
            divisions: vec![Division {
                id: 1,
                agegroup_id: 1,
                name: "Gold".into(),
            }],
            teams,
            fields,
            games: Vec::new(),
            grids: HashMap::from([(1, cells)]),
        }
    }

    /// A pool game between teams `home` and `away` (team id == rank).
    pub(crate) fn game(id: GameId, home: TeamId, away: TeamId, h: u32, m: u32, field_id: FieldId) -> Game {
        Game {
            id,
            event_id: 1,
            agegroup_id: 1,
            division_id: 1,
            pairing_id: id,
            start: at(h, m),
            field_id,
            home: GameSide {
                team_ref: TeamRef::Rank(home as u32),
                team_id: Some(home),
            },
            away: GameSide {
                team_ref: TeamRef::Rank(away as u32),
                team_id: Some(away),
            },
            is_bracket: false,
            batch_id: None,
        }
    }

    fn ctx() -> CheckContext {
        CheckContext {
            game_minutes: 60,
            back_to_back_minutes: 90,
        }
    }

    #[test]
    fn clean_schedule_has_no_findings() {
        let mut s = snapshot();
        // Full round robin, two hours apart per team.
        s.games = vec![
            game(1, 1, 2, 8, 0, 1),
            game(2, 3, 4, 8, 0, 2),
            game(3, 1, 3, 10, 0, 1),
            game(4, 2, 4, 10, 0, 2),
            game(5, 1, 4, 12, 0, 1),
            game(6, 2, 3, 12, 0, 2),
        ];
        let report = evaluate(&s, &ctx());
        assert!(report.is_clean(), "{:#?}", report);
        assert_eq!(report.sections.len(), CHECKS.len() + AGGREGATES.len());
        assert_eq!(report.degraded().count(), 0);
        assert_eq!(report.info.round_robin[0].scheduled, 6);
    }

    #[test]
    fn severities_route_findings() {
        let mut s = snapshot();
        s.games = vec![game(1, 1, 2, 8, 0, 1), game(2, 1, 3, 8, 30, 2)];
        let report = evaluate(&s, &ctx());
        assert!(report.critical.iter().all(|f| f.severity == Severity::Critical));
        assert!(report.warnings.iter().all(|f| f.severity == Severity::Warning));
        assert!(report
            .critical
            .iter()
            .any(|f| f.check == CheckKind::TeamDoubleBooking));
        assert!(report
            .warnings
            .iter()
            .any(|f| f.check == CheckKind::IncompleteRoundRobin));
    }

    fn exploding(_: &Snapshot, _: &CheckContext) -> Result<Vec<Finding>, CheckError> {
        panic!("boom");
    }

    fn failing(_: &Snapshot, _: &mut QaInfo) -> Result<(), CheckError> {
        Err(CheckError::Missing { entity: "field", id: 9 })
    }

    #[test]
    fn a_failing_section_does_not_blank_the_report() {
        let mut s = snapshot();
        s.games = vec![game(1, 1, 2, 8, 0, 1), game(2, 3, 4, 8, 0, 1)];
        let checks: &[(CheckKind, Check)] = &[
            (CheckKind::RankMismatch, exploding),
            (CheckKind::FieldDoubleBooking, checks::field_double_booking),
        ];
        let aggregates: &[(&'static str, Aggregate)] = &[
            ("broken", failing),
            ("games_per_date", aggregates::games_per_date),
        ];
        let report = evaluate_with(&s, &ctx(), checks, aggregates);

        assert_eq!(report.critical.len(), 1);
        assert_eq!(report.info.total_games, 2);
        let degraded: Vec<_> = report.degraded().collect();
        assert_eq!(degraded.len(), 2);
        assert_eq!(degraded[0].section, "rank_mismatch");
        assert!(degraded[0].error.as_deref().unwrap().contains("boom"));
        assert_eq!(degraded[1].section, "broken");
    }
}
