// Placement engine: place, move and delete games in the (start, field) grid.
//
// Every function here runs inside a transaction owned by the caller, so the
// occupancy and clash checks are atomic with the write that follows them.

use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::PlacementConfig;
use crate::db;
use crate::error::{ScheduleError, ScheduleResult};
use crate::model::*;

/// Result of a move: the game that was asked to move, and the game it
/// swapped cells with when the target was occupied.
#[derive(Debug, Clone, Serialize)]
pub struct MoveOutcome {
    pub moved: Game,
    pub swapped: Option<Game>,
}

// ---------------------------------------------------------------------------
// Constraint checks
// ---------------------------------------------------------------------------

/// Resolve a pairing side to its team. Placeholders stay unresolved.
fn resolve_side(teams: &[Team], division_id: DivisionId, team_ref: &TeamRef) -> ScheduleResult<Option<Team>> {
    let Some(rank) = team_ref.rank() else {
        return Ok(None);
    };
    let team = teams
        .iter()
        .find(|t| t.div_rank == rank)
        .ok_or_else(|| {
            ScheduleError::InvalidReference(format!(
                "division {division_id} has no team with rank {rank}"
            ))
        })?;
    if !team.active {
        return Err(ScheduleError::InactiveTeam {
            team_id: team.id,
            team_name: team.name.clone(),
        });
    }
    Ok(Some(team.clone()))
}

/// Reject a start on `field_id` that overlaps another game on that field.
fn check_cell_free(
    conn: &Connection,
    field_id: FieldId,
    start: NaiveDateTime,
    game_minutes: u32,
    exclude: &[GameId],
) -> ScheduleResult<()> {
    let mut stmt = conn.prepare(
        "SELECT id, start_time FROM games WHERE field_id = ?1 ORDER BY start_time, id",
    )?;
    let games = stmt
        .query_map(params![field_id], |row| {
            Ok((row.get::<_, GameId>(0)?, row.get::<_, NaiveDateTime>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    match games
        .into_iter()
        .find(|(id, at)| !exclude.contains(id) && overlaps(*at, start, game_minutes))
    {
        Some((occupant, _)) => Err(ScheduleError::CellOccupied {
            field_id,
            start,
            occupant: Some(occupant),
        }),
        None => Ok(()),
    }
}

pub(crate) fn check_team_clash(
    conn: &Connection,
    event_id: EventId,
    teams: &[Team],
    start: NaiveDateTime,
    game_minutes: u32,
    exclude: &[GameId],
) -> ScheduleResult<()> {
    let mut stmt = conn.prepare(
        "SELECT id, start_time FROM games
         WHERE event_id = ?1 AND (home_team_id = ?2 OR away_team_id = ?2)
         ORDER BY start_time, id",
    )?;
    for team in teams.iter().filter(|t| t.active) {
        let games = stmt
            .query_map(params![event_id, team.id], |row| {
                Ok((row.get::<_, GameId>(0)?, row.get::<_, NaiveDateTime>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        if let Some((clashing_game_id, clashing_start)) = games
            .into_iter()
            .find(|(id, at)| !exclude.contains(id) && overlaps(*at, start, game_minutes))
        {
            return Err(ScheduleError::TeamTimeClash {
                team_id: team.id,
                team_name: team.name.clone(),
                clashing_game_id,
                clashing_start,
            });
        }
    }
    Ok(())
}

/// In an agegroup that crowns one champion, bracket games may only come from
/// the division that already owns them.
fn check_bracket_pool(
    conn: &Connection,
    agegroup: &Agegroup,
    division_id: DivisionId,
    exclude: &[GameId],
) -> ScheduleResult<()> {
    if agegroup.champions_by_division {
        return Ok(());
    }
    let mut stmt = conn.prepare(
        "SELECT g.id, g.division_id, d.name FROM games g
         JOIN pairings p ON p.id = g.pairing_id
         JOIN divisions d ON d.id = g.division_id
         WHERE g.agegroup_id = ?1 AND p.stage IS NOT NULL AND g.division_id != ?2
         ORDER BY g.id",
    )?;
    let owners = stmt
        .query_map(params![agegroup.id, division_id], |row| {
            Ok((
                row.get::<_, GameId>(0)?,
                row.get::<_, DivisionId>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    match owners.into_iter().find(|(id, _, _)| !exclude.contains(id)) {
        Some((_, owning_division_id, owning_division_name)) => {
            Err(ScheduleError::CrossPoolBracketConflict {
                agegroup_id: agegroup.id,
                owning_division_id,
                owning_division_name,
            })
        }
        None => Ok(()),
    }
}

/// Teams of an existing game that take part in clash checks.
fn active_teams_of(conn: &Connection, game: &Game) -> ScheduleResult<Vec<Team>> {
    let mut teams = Vec::new();
    for id in game.team_ids() {
        let team = db::load_team(conn, id)?;
        if team.active {
            teams.push(team);
        }
    }
    Ok(teams)
}

/// Map a uniqueness failure on write to the constraint it protects.
fn write_conflict(
    err: rusqlite::Error,
    pairing_id: PairingId,
    field_id: FieldId,
    start: NaiveDateTime,
) -> ScheduleError {
    if !db::is_unique_violation(&err) {
        return err.into();
    }
    if err.to_string().contains("pairing_id") {
        ScheduleError::PairingUnavailable { pairing_id }
    } else {
        ScheduleError::CellOccupied {
            field_id,
            start,
            occupant: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Create a game for `pairing_id` at the given cell.
pub(crate) fn place_in(
    conn: &Connection,
    cfg: &PlacementConfig,
    pairing_id: PairingId,
    start: NaiveDateTime,
    field_id: FieldId,
    batch_id: Option<&str>,
) -> ScheduleResult<Game> {
    let pairing = db::load_pairing(conn, pairing_id)?;
    if !pairing.available {
        return Err(ScheduleError::PairingUnavailable { pairing_id });
    }
    let division = db::load_division(conn, pairing.division_id)?;
    let agegroup = db::load_agegroup(conn, division.agegroup_id)?;
    let field = db::load_field(conn, field_id)?;
    if field.event_id != agegroup.event_id {
        return Err(ScheduleError::InvalidReference(format!(
            "field `{}` belongs to event {}, not {}",
            field.name, field.event_id, agegroup.event_id
        )));
    }

    let teams = db::load_teams(conn, division.id)?;
    let home = resolve_side(&teams, division.id, &pairing.home)?;
    let away = resolve_side(&teams, division.id, &pairing.away)?;

    check_cell_free(conn, field_id, start, cfg.game_minutes, &[])?;
    if pairing.is_bracket() {
        check_bracket_pool(conn, &agegroup, division.id, &[])?;
    }
    let playing: Vec<Team> = home.iter().chain(away.iter()).cloned().collect();
    check_team_clash(conn, agegroup.event_id, &playing, start, cfg.game_minutes, &[])?;

    conn.execute(
        "INSERT INTO games
            (event_id, agegroup_id, division_id, pairing_id, field_id, start_time,
             home_team_id, away_team_id, batch_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            agegroup.event_id,
            agegroup.id,
            division.id,
            pairing.id,
            field_id,
            start,
            home.as_ref().map(|t| t.id),
            away.as_ref().map(|t| t.id),
            batch_id,
        ],
    )
    .map_err(|e| write_conflict(e, pairing_id, field_id, start))?;
    let game_id = conn.last_insert_rowid();

    debug!(
        "Placed game {} (division {}, pairing #{} {} v {}) at {} on field `{}`",
        game_id, division.id, pairing.ai, pairing.home, pairing.away, start, field.name
    );
    db::load_game(conn, game_id)
}

/// Relocate a game. An occupied target swaps the two games' cells.
pub(crate) fn move_in(
    conn: &Connection,
    cfg: &PlacementConfig,
    game_id: GameId,
    start: NaiveDateTime,
    field_id: FieldId,
) -> ScheduleResult<MoveOutcome> {
    let game = db::load_game(conn, game_id)?;
    if game.start == start && game.field_id == field_id {
        return Ok(MoveOutcome {
            moved: game,
            swapped: None,
        });
    }

    let field = db::load_field(conn, field_id)?;
    if field.event_id != game.event_id {
        return Err(ScheduleError::InvalidReference(format!(
            "field `{}` belongs to event {}, not {}",
            field.name, field.event_id, game.event_id
        )));
    }

    let occupant = match db::game_at_cell(conn, field_id, start)? {
        Some(id) => Some(db::load_game(conn, id)?),
        None => None,
    };
    let mut exclude = vec![game.id];
    exclude.extend(occupant.as_ref().map(|g| g.id));

    check_cell_free(conn, field_id, start, cfg.game_minutes, &exclude)?;
    let agegroup = db::load_agegroup(conn, game.agegroup_id)?;
    if game.is_bracket {
        check_bracket_pool(conn, &agegroup, game.division_id, &exclude)?;
    }
    let teams = active_teams_of(conn, &game)?;
    check_team_clash(conn, game.event_id, &teams, start, cfg.game_minutes, &exclude)?;

    if let Some(other) = &occupant {
        check_cell_free(conn, game.field_id, game.start, cfg.game_minutes, &exclude)?;
        let other_agegroup = db::load_agegroup(conn, other.agegroup_id)?;
        if other.is_bracket {
            check_bracket_pool(conn, &other_agegroup, other.division_id, &exclude)?;
        }
        let other_teams = active_teams_of(conn, other)?;
        check_team_clash(
            conn,
            other.event_id,
            &other_teams,
            game.start,
            cfg.game_minutes,
            &exclude,
        )?;
        // After the swap the two games must not clash with each other.
        if overlaps(start, game.start, cfg.game_minutes) {
            if let Some(shared) = teams.iter().find(|t| other.involves(t.id)) {
                return Err(ScheduleError::TeamTimeClash {
                    team_id: shared.id,
                    team_name: shared.name.clone(),
                    clashing_game_id: other.id,
                    clashing_start: game.start,
                });
            }
        }

        // The occupant leaves the table while the mover takes its cell, then
        // returns under its own id so the cell constraint holds throughout.
        let created_at: String = conn.query_row(
            "SELECT created_at FROM games WHERE id = ?1",
            params![other.id],
            |row| row.get(0),
        )?;
        conn.execute("DELETE FROM games WHERE id = ?1", params![other.id])?;
        conn.execute(
            "UPDATE games SET start_time = ?2, field_id = ?3 WHERE id = ?1",
            params![game.id, start, field_id],
        )
        .map_err(|e| write_conflict(e, game.pairing_id, field_id, start))?;
        conn.execute(
            "INSERT INTO games
                (id, event_id, agegroup_id, division_id, pairing_id, field_id, start_time,
                 home_team_id, away_team_id, batch_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                other.id,
                other.event_id,
                other.agegroup_id,
                other.division_id,
                other.pairing_id,
                game.field_id,
                game.start,
                other.home.team_id,
                other.away.team_id,
                other.batch_id,
                created_at,
            ],
        )
        .map_err(|e| write_conflict(e, other.pairing_id, game.field_id, game.start))?;
        info!(
            "Swapped game {} ({} / field {}) with game {} ({} / field {})",
            game.id, game.start, game.field_id, other.id, start, field_id
        );
    } else {
        conn.execute(
            "UPDATE games SET start_time = ?2, field_id = ?3 WHERE id = ?1",
            params![game.id, start, field_id],
        )
        .map_err(|e| write_conflict(e, game.pairing_id, field_id, start))?;
        info!(
            "Moved game {} from {} / field {} to {} / field {}",
            game.id, game.start, game.field_id, start, field_id
        );
    }

    Ok(MoveOutcome {
        moved: db::load_game(conn, game.id)?,
        swapped: match occupant {
            Some(other) => Some(db::load_game(conn, other.id)?),
            None => None,
        },
    })
}

/// Remove a game; its pairing becomes available again.
pub(crate) fn delete_in(conn: &Connection, game_id: GameId) -> ScheduleResult<()> {
    let n = conn.execute("DELETE FROM games WHERE id = ?1", params![game_id])?;
    if n == 0 {
        return Err(ScheduleError::NotFound {
            entity: "game",
            id: game_id,
        });
    }
    info!("Deleted game {game_id}");
    Ok(())
}

/// Remove every game of a division. Returns how many were deleted.
pub(crate) fn delete_division_games_in(conn: &Connection, division_id: DivisionId) -> ScheduleResult<usize> {
    db::load_division(conn, division_id)?;
    let n = conn.execute(
        "DELETE FROM games WHERE division_id = ?1",
        params![division_id],
    )?;
    info!("Deleted {n} games from division {division_id}");
    Ok(n)
}
