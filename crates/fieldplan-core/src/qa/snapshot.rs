// Consistent read-only view of an event for the QA checks.

use std::collections::{HashMap, HashSet};

use rusqlite::Connection;

use crate::db;
use crate::error::ScheduleResult;
use crate::grid::{self, Cell};
use crate::model::*;

/// Everything the checks look at, loaded in one read transaction.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub event_id: EventId,
    pub agegroups: Vec<Agegroup>,
    pub divisions: Vec<Division>,
    pub teams: Vec<Team>,
    pub fields: Vec<Field>,
    /// Ordered by start, then field.
    pub games: Vec<Game>,
    /// Addressable cells of each agegroup's grid. Agegroups without
    /// configured timeslots have no entry.
    pub grids: HashMap<AgegroupId, HashSet<Cell>>,
}

impl Snapshot {
    pub fn team(&self, id: TeamId) -> Option<&Team> {
        self.teams.iter().find(|t| t.id == id)
    }

    pub fn division(&self, id: DivisionId) -> Option<&Division> {
        self.divisions.iter().find(|d| d.id == id)
    }

    pub fn field(&self, id: FieldId) -> Option<&Field> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn games_of(&self, team_id: TeamId) -> impl Iterator<Item = &Game> + '_ {
        self.games.iter().filter(move |g| g.involves(team_id))
    }
}

pub(crate) fn load_in(conn: &Connection, event_id: EventId) -> ScheduleResult<Snapshot> {
    db::load_event(conn, event_id)?;
    let agegroups = db::load_agegroups(conn, event_id)?;

    let mut grids = HashMap::new();
    for ag in &agegroups {
        let cells = grid::expand(&db::load_dates(conn, ag.id)?, &db::load_field_timeslots(conn, ag.id)?);
        if !cells.is_empty() {
            grids.insert(ag.id, cells.into_iter().collect());
        }
    }

    Ok(Snapshot {
        event_id,
        divisions: db::load_divisions_for_event(conn, event_id)?,
        teams: db::load_teams_for_event(conn, event_id)?,
        fields: db::load_fields(conn, event_id)?,
        games: db::load_games_for_event(conn, event_id)?,
        agegroups,
        grids,
    })
}
