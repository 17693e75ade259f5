// Error type for engine operations.

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::model::{AgegroupId, DivisionId, FieldId, GameId, PairingId, TeamId};

#[derive(Debug, Error)]
pub enum ScheduleError {
    // --- constraint violations (user-correctable, never retried) ---
    #[error("team `{team_name}` already plays at an overlapping time (game {clashing_game_id} at {clashing_start})")]
    TeamTimeClash {
        team_id: TeamId,
        team_name: String,
        clashing_game_id: GameId,
        clashing_start: NaiveDateTime,
    },

    #[error("bracket games for agegroup {agegroup_id} already belong to division `{owning_division_name}`")]
    CrossPoolBracketConflict {
        agegroup_id: AgegroupId,
        owning_division_id: DivisionId,
        owning_division_name: String,
    },

    #[error("field {field_id} at {start} is already taken by game {occupant:?}")]
    CellOccupied {
        field_id: FieldId,
        start: NaiveDateTime,
        /// `None` when the conflict was only detected by the uniqueness
        /// constraint on write.
        occupant: Option<GameId>,
    },

    #[error("pairing {pairing_id} is already scheduled")]
    PairingUnavailable { pairing_id: PairingId },

    // --- precondition failures ---
    #[error("division {division_id} has {scheduled} scheduled pairing(s); delete its games before regenerating")]
    PairingRegenerationBlocked {
        division_id: DivisionId,
        scheduled: usize,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("team `{team_name}` is inactive and cannot be placed")]
    InactiveTeam { team_id: TeamId, team_name: String },

    // --- fatal ---
    #[error("schedule store error: {0}")]
    Store(#[from] rusqlite::Error),
}

impl ScheduleError {
    /// True for errors a caller can fix by choosing a different placement or
    /// changing the request; false for store failures.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ScheduleError::Store(_))
    }

    /// Short machine-readable name, used in build and CLI reports.
    pub fn code(&self) -> &'static str {
        match self {
            ScheduleError::TeamTimeClash { .. } => "TeamTimeClash",
            ScheduleError::CrossPoolBracketConflict { .. } => "CrossPoolBracketConflict",
            ScheduleError::CellOccupied { .. } => "CellOccupied",
            ScheduleError::PairingUnavailable { .. } => "PairingUnavailable",
            ScheduleError::PairingRegenerationBlocked { .. } => "PairingRegenerationBlocked",
            ScheduleError::NotFound { .. } => "NotFound",
            ScheduleError::InvalidReference(_) => "InvalidReference",
            ScheduleError::InactiveTeam { .. } => "InactiveTeam",
            ScheduleError::Store(_) => "Store",
        }
    }
}

pub type ScheduleResult<T> = Result<T, ScheduleError>;
