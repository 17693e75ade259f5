// Schedule engine facade: the operations callers drive, each taking its
// context (event, division, pairing, game) explicitly.

use anyhow::Result;
use chrono::NaiveDateTime;

use crate::autobuild::analyzer::{self, AnalysisReport};
use crate::autobuild::executor::{self, AutoBuildRequest, BuildResult, UndoResult};
use crate::autobuild::fallback::{FallbackStrategy, NearestSlot};
use crate::config::EngineConfig;
use crate::db::{self, Database};
use crate::error::ScheduleResult;
use crate::grid::{self, Cell};
use crate::model::*;
use crate::pairing::{self, BracketFormat};
use crate::placement::{self, MoveOutcome};
use crate::qa::{self, QaReport};

pub struct ScheduleEngine {
    db: Database,
    config: EngineConfig,
    fallback: Box<dyn FallbackStrategy>,
}

impl ScheduleEngine {
    pub fn new(db: Database, config: EngineConfig) -> Self {
        Self {
            db,
            config,
            fallback: Box::new(NearestSlot),
        }
    }

    /// Open the store at `path` (`":memory:"` for tests).
    pub fn open(path: &str, config: EngineConfig) -> Result<Self> {
        Ok(Self::new(Database::open(path)?, config))
    }

    /// Replace the cell-ranking strategy used when a source field has no
    /// counterpart during auto-build.
    pub fn with_fallback(mut self, strategy: impl FallbackStrategy + 'static) -> Self {
        self.fallback = Box::new(strategy);
        self
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    // ------------------------------------------------------------------
    // Pairings
    // ------------------------------------------------------------------

    pub fn generate_or_get_pairings(&self, division_id: DivisionId) -> ScheduleResult<Vec<Pairing>> {
        self.db
            .write(|tx| pairing::generate_or_get_in(tx, division_id, self.config.pairing.bracket))
    }

    pub fn regenerate_pairings(
        &self,
        division_id: DivisionId,
        format: BracketFormat,
    ) -> ScheduleResult<Vec<Pairing>> {
        self.db.write(|tx| pairing::regenerate_in(tx, division_id, format))
    }

    /// Resolve seed placeholders on placed bracket games from final pool
    /// standings (best team first).
    pub fn seed_bracket_from_standings(
        &self,
        division_id: DivisionId,
        standings: &[TeamId],
    ) -> ScheduleResult<usize> {
        self.db.write(|tx| {
            pairing::seed_bracket_in(tx, division_id, standings, self.config.placement.game_minutes)
        })
    }

    // ------------------------------------------------------------------
    // Placement
    // ------------------------------------------------------------------

    pub fn place_game(
        &self,
        pairing_id: PairingId,
        start: NaiveDateTime,
        field_id: FieldId,
    ) -> ScheduleResult<Game> {
        self.db.write(|tx| {
            placement::place_in(tx, &self.config.placement, pairing_id, start, field_id, None)
        })
    }

    pub fn move_game(
        &self,
        game_id: GameId,
        start: NaiveDateTime,
        field_id: FieldId,
    ) -> ScheduleResult<MoveOutcome> {
        self.db
            .write(|tx| placement::move_in(tx, &self.config.placement, game_id, start, field_id))
    }

    pub fn delete_game(&self, game_id: GameId) -> ScheduleResult<()> {
        self.db.write(|tx| placement::delete_in(tx, game_id))
    }

    pub fn delete_all_games_for_division(&self, division_id: DivisionId) -> ScheduleResult<usize> {
        self.db
            .write(|tx| placement::delete_division_games_in(tx, division_id))
    }

    /// Addressable cells of an agegroup's grid, sorted by start then field.
    pub fn grid(&self, agegroup_id: AgegroupId) -> ScheduleResult<Vec<Cell>> {
        self.db.read(|tx| {
            db::load_agegroup(tx, agegroup_id)?;
            Ok(grid::expand(
                &db::load_dates(tx, agegroup_id)?,
                &db::load_field_timeslots(tx, agegroup_id)?,
            ))
        })
    }

    // ------------------------------------------------------------------
    // Auto-build
    // ------------------------------------------------------------------

    pub fn analyze_auto_build(
        &self,
        event_id: EventId,
        source_event_id: EventId,
    ) -> ScheduleResult<AnalysisReport> {
        let (current, source) = self.db.read(|tx| -> ScheduleResult<_> {
            Ok((
                analyzer::load_structure(tx, event_id)?,
                analyzer::load_structure(tx, source_event_id)?,
            ))
        })?;
        Ok(analyzer::analyze(&current, &source, &self.config.autobuild))
    }

    pub fn execute_auto_build(
        &self,
        event_id: EventId,
        request: &AutoBuildRequest,
    ) -> ScheduleResult<BuildResult> {
        executor::execute(&self.db, &self.config, self.fallback.as_ref(), event_id, request)
    }

    /// Undo the named batch, or the event's most recent batch not yet undone.
    pub fn undo_auto_build(&self, event_id: EventId, batch_id: Option<&str>) -> ScheduleResult<UndoResult> {
        self.db.write(|tx| executor::undo_in(tx, event_id, batch_id))
    }

    // ------------------------------------------------------------------
    // QA
    // ------------------------------------------------------------------

    pub fn run_qa_validation(&self, event_id: EventId) -> ScheduleResult<QaReport> {
        self.db.read(|tx| qa::run_in(tx, event_id, &self.config))
    }
}
