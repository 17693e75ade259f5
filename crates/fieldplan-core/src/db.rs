// SQLite persistence layer for event structure, pairings and placed games.

use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};

use crate::error::{ScheduleError, ScheduleResult};
use crate::model::*;

/// SQLite-backed schedule store. All engine reads and writes go through a
/// transaction on the single guarded connection.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database (useful
    /// for tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        // Game ids use AUTOINCREMENT so an id recorded by an auto-build batch
        // can never be handed to a later game.
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS events (
                id   INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS agegroups (
                id                    INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id              INTEGER NOT NULL REFERENCES events(id),
                name                  TEXT NOT NULL,
                champions_by_division INTEGER NOT NULL DEFAULT 1,
                UNIQUE(event_id, name)
            );

            CREATE TABLE IF NOT EXISTS divisions (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                agegroup_id INTEGER NOT NULL REFERENCES agegroups(id),
                name        TEXT NOT NULL,
                UNIQUE(agegroup_id, name)
            );

            CREATE TABLE IF NOT EXISTS teams (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                division_id INTEGER NOT NULL REFERENCES divisions(id),
                name        TEXT NOT NULL,
                div_rank    INTEGER NOT NULL CHECK (div_rank > 0),
                active      INTEGER NOT NULL DEFAULT 1,
                UNIQUE(division_id, div_rank)
            );

            CREATE TABLE IF NOT EXISTS fields (
                id       INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id INTEGER NOT NULL REFERENCES events(id),
                name     TEXT NOT NULL,
                location TEXT,
                UNIQUE(event_id, name)
            );

            CREATE TABLE IF NOT EXISTS timeslot_dates (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                agegroup_id  INTEGER NOT NULL REFERENCES agegroups(id),
                game_date    TEXT NOT NULL,
                round_number INTEGER NOT NULL,
                UNIQUE(agegroup_id, game_date)
            );

            CREATE TABLE IF NOT EXISTS field_timeslots (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                agegroup_id      INTEGER NOT NULL REFERENCES agegroups(id),
                field_id         INTEGER NOT NULL REFERENCES fields(id),
                day_of_week      INTEGER NOT NULL CHECK (day_of_week BETWEEN 0 AND 6),
                start_time       TEXT NOT NULL,
                interval_minutes INTEGER NOT NULL CHECK (interval_minutes > 0),
                max_games        INTEGER NOT NULL CHECK (max_games > 0)
            );

            CREATE TABLE IF NOT EXISTS pairings (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                division_id  INTEGER NOT NULL REFERENCES divisions(id),
                ai           INTEGER NOT NULL,
                round_number INTEGER NOT NULL,
                stage        TEXT,
                home_kind    TEXT NOT NULL,
                home_no      INTEGER NOT NULL,
                away_kind    TEXT NOT NULL,
                away_no      INTEGER NOT NULL,
                UNIQUE(division_id, ai)
            );

            CREATE TABLE IF NOT EXISTS games (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id     INTEGER NOT NULL REFERENCES events(id),
                agegroup_id  INTEGER NOT NULL REFERENCES agegroups(id),
                division_id  INTEGER NOT NULL REFERENCES divisions(id),
                pairing_id   INTEGER NOT NULL UNIQUE REFERENCES pairings(id),
                field_id     INTEGER NOT NULL REFERENCES fields(id),
                start_time   TEXT NOT NULL,
                home_team_id INTEGER REFERENCES teams(id),
                away_team_id INTEGER REFERENCES teams(id),
                batch_id     TEXT,
                created_at   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                UNIQUE(field_id, start_time)
            );

            CREATE TABLE IF NOT EXISTS autobuild_batches (
                batch_id        TEXT PRIMARY KEY,
                event_id        INTEGER NOT NULL REFERENCES events(id),
                source_event_id INTEGER NOT NULL,
                created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                undone_at       TEXT
            );

            CREATE TABLE IF NOT EXISTS autobuild_batch_games (
                batch_id TEXT NOT NULL REFERENCES autobuild_batches(batch_id),
                game_id  INTEGER NOT NULL,
                PRIMARY KEY (batch_id, game_id)
            );
            ",
        )
        .context("failed to create database schema")?;

        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_games_event ON games(event_id);
             CREATE INDEX IF NOT EXISTS idx_games_division ON games(division_id);
             CREATE INDEX IF NOT EXISTS idx_pairings_division ON pairings(division_id);",
        )
        .context("failed to create indexes")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    /// Run `f` inside an IMMEDIATE transaction. The write lock is taken up
    /// front, so every check `f` performs is atomic with its writes. The
    /// transaction rolls back if `f` returns an error.
    pub fn write<T, E>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<rusqlite::Error>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Run `f` inside a read transaction so all its queries see one snapshot.
    pub fn read<T, E>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<rusqlite::Error>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Structure setup
    // ------------------------------------------------------------------

    pub fn create_event(&self, name: &str) -> Result<EventId> {
        let conn = self.conn();
        conn.execute("INSERT INTO events (name) VALUES (?1)", params![name])
            .context("failed to insert event")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn create_agegroup(
        &self,
        event_id: EventId,
        name: &str,
        champions_by_division: bool,
    ) -> Result<AgegroupId> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO agegroups (event_id, name, champions_by_division) VALUES (?1, ?2, ?3)",
            params![event_id, name, champions_by_division],
        )
        .with_context(|| format!("failed to insert agegroup `{name}`"))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn create_division(&self, agegroup_id: AgegroupId, name: &str) -> Result<DivisionId> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO divisions (agegroup_id, name) VALUES (?1, ?2)",
            params![agegroup_id, name],
        )
        .with_context(|| format!("failed to insert division `{name}`"))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn create_team(
        &self,
        division_id: DivisionId,
        name: &str,
        div_rank: u32,
        active: bool,
    ) -> Result<TeamId> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO teams (division_id, name, div_rank, active) VALUES (?1, ?2, ?3, ?4)",
            params![division_id, name, div_rank, active],
        )
        .with_context(|| format!("failed to insert team `{name}`"))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn set_team_active(&self, team_id: TeamId, active: bool) -> Result<()> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE teams SET active = ?2 WHERE id = ?1",
                params![team_id, active],
            )
            .context("failed to update team")?;
        anyhow::ensure!(changed == 1, "team {team_id} not found");
        Ok(())
    }

    pub fn create_field(
        &self,
        event_id: EventId,
        name: &str,
        location: Option<&str>,
    ) -> Result<FieldId> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO fields (event_id, name, location) VALUES (?1, ?2, ?3)",
            params![event_id, name, location],
        )
        .with_context(|| format!("failed to insert field `{name}`"))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn add_timeslot_date(
        &self,
        agegroup_id: AgegroupId,
        date: NaiveDate,
        round: u32,
    ) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO timeslot_dates (agegroup_id, game_date, round_number) VALUES (?1, ?2, ?3)",
            params![agegroup_id, date, round],
        )
        .context("failed to insert timeslot date")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn add_field_timeslot(
        &self,
        agegroup_id: AgegroupId,
        field_id: FieldId,
        day_of_week: Weekday,
        start_time: NaiveTime,
        interval_minutes: u32,
        max_games: u32,
    ) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO field_timeslots
                (agegroup_id, field_id, day_of_week, start_time, interval_minutes, max_games)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                agegroup_id,
                field_id,
                day_of_week.num_days_from_monday(),
                start_time,
                interval_minutes,
                max_games,
            ],
        )
        .context("failed to insert field timeslot")?;
        Ok(conn.last_insert_rowid())
    }

    /// Remove a configured date. Games already placed on it are left in
    /// place; QA reports them as off-grid.
    pub fn delete_timeslot_date(&self, id: i64) -> Result<bool> {
        let conn = self.conn();
        let n = conn
            .execute("DELETE FROM timeslot_dates WHERE id = ?1", params![id])
            .context("failed to delete timeslot date")?;
        Ok(n > 0)
    }

    /// Remove a field timeslot block. Does not touch existing games.
    pub fn delete_field_timeslot(&self, id: i64) -> Result<bool> {
        let conn = self.conn();
        let n = conn
            .execute("DELETE FROM field_timeslots WHERE id = ?1", params![id])
            .context("failed to delete field timeslot")?;
        Ok(n > 0)
    }

    // ------------------------------------------------------------------
    // Read helpers (each runs in its own snapshot)
    // ------------------------------------------------------------------

    pub fn game(&self, game_id: GameId) -> ScheduleResult<Game> {
        self.read(|tx| load_game(tx, game_id))
    }

    pub fn games_for_event(&self, event_id: EventId) -> ScheduleResult<Vec<Game>> {
        self.read(|tx| load_games_for_event(tx, event_id))
    }

    pub fn pairings_for_division(&self, division_id: DivisionId) -> ScheduleResult<Vec<Pairing>> {
        self.read(|tx| load_pairings(tx, division_id))
    }

    pub fn agegroups_for_event(&self, event_id: EventId) -> ScheduleResult<Vec<Agegroup>> {
        self.read(|tx| load_agegroups(tx, event_id))
    }

    pub fn divisions_for_event(&self, event_id: EventId) -> ScheduleResult<Vec<Division>> {
        self.read(|tx| load_divisions_for_event(tx, event_id))
    }

    pub fn teams_for_division(&self, division_id: DivisionId) -> ScheduleResult<Vec<Team>> {
        self.read(|tx| load_teams(tx, division_id))
    }

    pub fn fields_for_event(&self, event_id: EventId) -> ScheduleResult<Vec<Field>> {
        self.read(|tx| load_fields(tx, event_id))
    }
}

// ---------------------------------------------------------------------------
// Row loaders shared by the engine modules. They take a plain connection so
// callers decide the transaction boundary.
// ---------------------------------------------------------------------------

fn conversion_error(message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        message.into(),
    )
}

pub(crate) fn team_ref_at(row: &Row<'_>, kind_idx: usize, no_idx: usize) -> rusqlite::Result<TeamRef> {
    let kind: String = row.get(kind_idx)?;
    let number: u32 = row.get(no_idx)?;
    TeamRef::from_parts(&kind, number)
        .ok_or_else(|| conversion_error(format!("unknown team reference kind `{kind}`")))
}

pub(crate) fn stage_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<BracketStage>> {
    let code: Option<String> = row.get(idx)?;
    code.map(|c| {
        BracketStage::from_code(&c)
            .ok_or_else(|| conversion_error(format!("unknown bracket stage `{c}`")))
    })
    .transpose()
}

fn weekday_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Weekday> {
    let n: u8 = row.get(idx)?;
    Weekday::try_from(n).map_err(|_| conversion_error(format!("invalid day of week {n}")))
}

pub(crate) fn load_event(conn: &Connection, event_id: EventId) -> ScheduleResult<Event> {
    conn.query_row(
        "SELECT id, name FROM events WHERE id = ?1",
        params![event_id],
        |row| {
            Ok(Event {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        },
    )
    .optional()?
    .ok_or(ScheduleError::NotFound {
        entity: "event",
        id: event_id,
    })
}

fn agegroup_from_row(row: &Row<'_>) -> rusqlite::Result<Agegroup> {
    Ok(Agegroup {
        id: row.get(0)?,
        event_id: row.get(1)?,
        name: row.get(2)?,
        champions_by_division: row.get(3)?,
    })
}

pub(crate) fn load_agegroup(conn: &Connection, id: AgegroupId) -> ScheduleResult<Agegroup> {
    conn.query_row(
        "SELECT id, event_id, name, champions_by_division FROM agegroups WHERE id = ?1",
        params![id],
        agegroup_from_row,
    )
    .optional()?
    .ok_or(ScheduleError::NotFound {
        entity: "agegroup",
        id,
    })
}

pub(crate) fn load_agegroups(conn: &Connection, event_id: EventId) -> ScheduleResult<Vec<Agegroup>> {
    let mut stmt = conn.prepare(
        "SELECT id, event_id, name, champions_by_division FROM agegroups
         WHERE event_id = ?1 ORDER BY name, id",
    )?;
    let rows = stmt
        .query_map(params![event_id], agegroup_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn division_from_row(row: &Row<'_>) -> rusqlite::Result<Division> {
    Ok(Division {
        id: row.get(0)?,
        agegroup_id: row.get(1)?,
        name: row.get(2)?,
    })
}

pub(crate) fn load_division(conn: &Connection, id: DivisionId) -> ScheduleResult<Division> {
    conn.query_row(
        "SELECT id, agegroup_id, name FROM divisions WHERE id = ?1",
        params![id],
        division_from_row,
    )
    .optional()?
    .ok_or(ScheduleError::NotFound {
        entity: "division",
        id,
    })
}

/// All divisions of an event, ordered by agegroup name then division name.
pub(crate) fn load_divisions_for_event(
    conn: &Connection,
    event_id: EventId,
) -> ScheduleResult<Vec<Division>> {
    let mut stmt = conn.prepare(
        "SELECT d.id, d.agegroup_id, d.name FROM divisions d
         JOIN agegroups a ON a.id = d.agegroup_id
         WHERE a.event_id = ?1 ORDER BY a.name, d.name, d.id",
    )?;
    let rows = stmt
        .query_map(params![event_id], division_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn team_from_row(row: &Row<'_>) -> rusqlite::Result<Team> {
    Ok(Team {
        id: row.get(0)?,
        division_id: row.get(1)?,
        name: row.get(2)?,
        div_rank: row.get(3)?,
        active: row.get(4)?,
    })
}

/// Teams of a division ordered by rank.
pub(crate) fn load_teams(conn: &Connection, division_id: DivisionId) -> ScheduleResult<Vec<Team>> {
    let mut stmt = conn.prepare(
        "SELECT id, division_id, name, div_rank, active FROM teams
         WHERE division_id = ?1 ORDER BY div_rank",
    )?;
    let rows = stmt
        .query_map(params![division_id], team_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub(crate) fn load_teams_for_event(conn: &Connection, event_id: EventId) -> ScheduleResult<Vec<Team>> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.division_id, t.name, t.div_rank, t.active FROM teams t
         JOIN divisions d ON d.id = t.division_id
         JOIN agegroups a ON a.id = d.agegroup_id
         WHERE a.event_id = ?1 ORDER BY t.division_id, t.div_rank",
    )?;
    let rows = stmt
        .query_map(params![event_id], team_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub(crate) fn load_team(conn: &Connection, id: TeamId) -> ScheduleResult<Team> {
    conn.query_row(
        "SELECT id, division_id, name, div_rank, active FROM teams WHERE id = ?1",
        params![id],
        team_from_row,
    )
    .optional()?
    .ok_or(ScheduleError::NotFound { entity: "team", id })
}

fn field_from_row(row: &Row<'_>) -> rusqlite::Result<Field> {
    Ok(Field {
        id: row.get(0)?,
        event_id: row.get(1)?,
        name: row.get(2)?,
        location: row.get(3)?,
    })
}

pub(crate) fn load_field(conn: &Connection, id: FieldId) -> ScheduleResult<Field> {
    conn.query_row(
        "SELECT id, event_id, name, location FROM fields WHERE id = ?1",
        params![id],
        field_from_row,
    )
    .optional()?
    .ok_or(ScheduleError::NotFound { entity: "field", id })
}

pub(crate) fn load_fields(conn: &Connection, event_id: EventId) -> ScheduleResult<Vec<Field>> {
    let mut stmt = conn.prepare(
        "SELECT id, event_id, name, location FROM fields WHERE event_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map(params![event_id], field_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub(crate) fn load_dates(conn: &Connection, agegroup_id: AgegroupId) -> ScheduleResult<Vec<TimeslotDate>> {
    let mut stmt = conn.prepare(
        "SELECT id, agegroup_id, game_date, round_number FROM timeslot_dates
         WHERE agegroup_id = ?1 ORDER BY game_date",
    )?;
    let rows = stmt
        .query_map(params![agegroup_id], |row| {
            Ok(TimeslotDate {
                id: row.get(0)?,
                agegroup_id: row.get(1)?,
                date: row.get(2)?,
                round: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub(crate) fn load_field_timeslots(
    conn: &Connection,
    agegroup_id: AgegroupId,
) -> ScheduleResult<Vec<FieldTimeslot>> {
    let mut stmt = conn.prepare(
        "SELECT id, agegroup_id, field_id, day_of_week, start_time, interval_minutes, max_games
         FROM field_timeslots WHERE agegroup_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map(params![agegroup_id], |row| {
            Ok(FieldTimeslot {
                id: row.get(0)?,
                agegroup_id: row.get(1)?,
                field_id: row.get(2)?,
                day_of_week: weekday_at(row, 3)?,
                start_time: row.get(4)?,
                interval_minutes: row.get(5)?,
                max_games: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

const PAIRING_COLUMNS: &str = "p.id, p.division_id, p.ai, p.round_number, p.stage,
     p.home_kind, p.home_no, p.away_kind, p.away_no,
     NOT EXISTS (SELECT 1 FROM games g WHERE g.pairing_id = p.id)";

fn pairing_from_row(row: &Row<'_>) -> rusqlite::Result<Pairing> {
    Ok(Pairing {
        id: row.get(0)?,
        division_id: row.get(1)?,
        ai: row.get(2)?,
        round: row.get(3)?,
        stage: stage_at(row, 4)?,
        home: team_ref_at(row, 5, 6)?,
        away: team_ref_at(row, 7, 8)?,
        available: row.get(9)?,
    })
}

pub(crate) fn load_pairing(conn: &Connection, id: PairingId) -> ScheduleResult<Pairing> {
    conn.query_row(
        &format!("SELECT {PAIRING_COLUMNS} FROM pairings p WHERE p.id = ?1"),
        params![id],
        pairing_from_row,
    )
    .optional()?
    .ok_or(ScheduleError::NotFound {
        entity: "pairing",
        id,
    })
}

/// Pairings of a division ordered by their key.
pub(crate) fn load_pairings(conn: &Connection, division_id: DivisionId) -> ScheduleResult<Vec<Pairing>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PAIRING_COLUMNS} FROM pairings p WHERE p.division_id = ?1 ORDER BY p.ai"
    ))?;
    let rows = stmt
        .query_map(params![division_id], pairing_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

const GAME_COLUMNS: &str = "g.id, g.event_id, g.agegroup_id, g.division_id, g.pairing_id,
     g.start_time, g.field_id,
     p.home_kind, p.home_no, g.home_team_id,
     p.away_kind, p.away_no, g.away_team_id,
     p.stage IS NOT NULL, g.batch_id";

fn game_from_row(row: &Row<'_>) -> rusqlite::Result<Game> {
    Ok(Game {
        id: row.get(0)?,
        event_id: row.get(1)?,
        agegroup_id: row.get(2)?,
        division_id: row.get(3)?,
        pairing_id: row.get(4)?,
        start: row.get(5)?,
        field_id: row.get(6)?,
        home: GameSide {
            team_ref: team_ref_at(row, 7, 8)?,
            team_id: row.get(9)?,
        },
        away: GameSide {
            team_ref: team_ref_at(row, 10, 11)?,
            team_id: row.get(12)?,
        },
        is_bracket: row.get(13)?,
        batch_id: row.get(14)?,
    })
}

pub(crate) fn load_game(conn: &Connection, id: GameId) -> ScheduleResult<Game> {
    conn.query_row(
        &format!("SELECT {GAME_COLUMNS} FROM games g JOIN pairings p ON p.id = g.pairing_id WHERE g.id = ?1"),
        params![id],
        game_from_row,
    )
    .optional()?
    .ok_or(ScheduleError::NotFound { entity: "game", id })
}

/// All games of an event ordered by start, then field.
pub(crate) fn load_games_for_event(conn: &Connection, event_id: EventId) -> ScheduleResult<Vec<Game>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {GAME_COLUMNS} FROM games g JOIN pairings p ON p.id = g.pairing_id
         WHERE g.event_id = ?1 ORDER BY g.start_time, g.field_id, g.id"
    ))?;
    let rows = stmt
        .query_map(params![event_id], game_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub(crate) fn load_games_for_division(
    conn: &Connection,
    division_id: DivisionId,
) -> ScheduleResult<Vec<Game>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {GAME_COLUMNS} FROM games g JOIN pairings p ON p.id = g.pairing_id
         WHERE g.division_id = ?1 ORDER BY g.start_time, g.field_id, g.id"
    ))?;
    let rows = stmt
        .query_map(params![division_id], game_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// The game occupying a cell, if any.
pub(crate) fn game_at_cell(
    conn: &Connection,
    field_id: FieldId,
    start: NaiveDateTime,
) -> ScheduleResult<Option<GameId>> {
    let id = conn
        .query_row(
            "SELECT id FROM games WHERE field_id = ?1 AND start_time = ?2",
            params![field_id, start],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

pub(crate) fn count_games_for_division(conn: &Connection, division_id: DivisionId) -> ScheduleResult<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM games WHERE division_id = ?1",
        params![division_id],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

/// True if `err` is SQLite rejecting a UNIQUE or PRIMARY KEY constraint.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}
