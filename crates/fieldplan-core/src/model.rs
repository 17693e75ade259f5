// Domain types shared by the store, the placement engine, auto-build and QA.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

pub type EventId = i64;
pub type AgegroupId = i64;
pub type DivisionId = i64;
pub type TeamId = i64;
pub type FieldId = i64;
pub type PairingId = i64;
pub type GameId = i64;

// ---------------------------------------------------------------------------
// Event structure
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agegroup {
    pub id: AgegroupId,
    pub event_id: EventId,
    pub name: String,
    /// When false, every bracket game of the agegroup must come from a
    /// single division.
    pub champions_by_division: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Division {
    pub id: DivisionId,
    pub agegroup_id: AgegroupId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub division_id: DivisionId,
    pub name: String,
    pub div_rank: u32,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub id: FieldId,
    pub event_id: EventId,
    pub name: String,
    pub location: Option<String>,
}

// ---------------------------------------------------------------------------
// Timeslot axis
// ---------------------------------------------------------------------------

/// A playing date configured for an agegroup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeslotDate {
    pub id: i64,
    pub agegroup_id: AgegroupId,
    pub date: NaiveDate,
    pub round: u32,
}

/// A recurring block of slots on one field for one weekday.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldTimeslot {
    pub id: i64,
    pub agegroup_id: AgegroupId,
    pub field_id: FieldId,
    pub day_of_week: Weekday,
    pub start_time: NaiveTime,
    pub interval_minutes: u32,
    pub max_games: u32,
}

// ---------------------------------------------------------------------------
// Team references
// ---------------------------------------------------------------------------

/// Stage of a championship bracket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BracketStage {
    Quarterfinal,
    Semifinal,
    Final,
}

impl BracketStage {
    pub fn code(&self) -> &'static str {
        match self {
            BracketStage::Quarterfinal => "Q",
            BracketStage::Semifinal => "S",
            BracketStage::Final => "F",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "Q" => Some(BracketStage::Quarterfinal),
            "S" => Some(BracketStage::Semifinal),
            "F" => Some(BracketStage::Final),
            _ => None,
        }
    }
}

/// One side of a pairing.
///
/// `Rank` addresses a real team through its `div_rank`. The other variants
/// are bracket placeholders that stay unresolved until pool standings (or
/// earlier bracket results) are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TeamRef {
    Rank(u32),
    Seed { stage: BracketStage, seed: u32 },
    WinnerOf { stage: BracketStage, game: u32 },
}

impl TeamRef {
    pub fn rank(&self) -> Option<u32> {
        match self {
            TeamRef::Rank(r) => Some(*r),
            _ => None,
        }
    }

    /// Split into the `(kind, number)` pair stored in the database.
    pub fn to_parts(&self) -> (String, u32) {
        match self {
            TeamRef::Rank(r) => ("T".to_string(), *r),
            TeamRef::Seed { stage, seed } => (stage.code().to_string(), *seed),
            TeamRef::WinnerOf { stage, game } => (format!("W{}", stage.code()), *game),
        }
    }

    pub fn from_parts(kind: &str, number: u32) -> Option<Self> {
        if kind == "T" {
            return Some(TeamRef::Rank(number));
        }
        if let Some(stage) = kind.strip_prefix('W').and_then(BracketStage::from_code) {
            return Some(TeamRef::WinnerOf {
                stage,
                game: number,
            });
        }
        BracketStage::from_code(kind).map(|stage| TeamRef::Seed {
            stage,
            seed: number,
        })
    }
}

impl fmt::Display for TeamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (kind, number) = self.to_parts();
        write!(f, "{kind}{number}")
    }
}

impl FromStr for TeamRef {
    type Err = String;

    /// Parse the compact form used in CSV files: `T3`, `S1`, `WQ2`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_uppercase();
        let split = s
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(|| format!("team reference `{s}` has no number"))?;
        let (kind, digits) = s.split_at(split);
        let number: u32 = digits
            .parse()
            .map_err(|_| format!("team reference `{s}` has an invalid number"))?;
        if number == 0 {
            return Err(format!("team reference `{s}` must be 1-based"));
        }
        TeamRef::from_parts(kind, number)
            .ok_or_else(|| format!("unknown team reference type `{kind}`"))
    }
}

// ---------------------------------------------------------------------------
// Pairings and games
// ---------------------------------------------------------------------------

/// A required matchup for a division.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pairing {
    pub id: PairingId,
    pub division_id: DivisionId,
    /// Stable game key within the division.
    pub ai: u32,
    pub round: u32,
    pub stage: Option<BracketStage>,
    pub home: TeamRef,
    pub away: TeamRef,
    /// True while no game references this pairing.
    pub available: bool,
}

impl Pairing {
    pub fn is_bracket(&self) -> bool {
        self.stage.is_some()
    }

    /// True if this pairing has the same two sides, in either order.
    pub fn same_sides(&self, a: &TeamRef, b: &TeamRef) -> bool {
        (self.home == *a && self.away == *b) || (self.home == *b && self.away == *a)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSide {
    pub team_ref: TeamRef,
    /// Resolved team, `None` while a bracket placeholder is unresolved.
    pub team_id: Option<TeamId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub id: GameId,
    pub event_id: EventId,
    pub agegroup_id: AgegroupId,
    pub division_id: DivisionId,
    pub pairing_id: PairingId,
    pub start: NaiveDateTime,
    pub field_id: FieldId,
    pub home: GameSide,
    pub away: GameSide,
    pub is_bracket: bool,
    pub batch_id: Option<String>,
}

impl Game {
    pub fn team_ids(&self) -> impl Iterator<Item = TeamId> + '_ {
        [self.home.team_id, self.away.team_id].into_iter().flatten()
    }

    pub fn involves(&self, team_id: TeamId) -> bool {
        self.team_ids().any(|t| t == team_id)
    }
}

/// Whether two game starts overlap given a fixed game length.
pub fn overlaps(a: NaiveDateTime, b: NaiveDateTime, game_minutes: u32) -> bool {
    (a - b).num_minutes().abs() < i64::from(game_minutes)
}
