// Pairing generation: round-robin pools and seeded bracket templates.
//
// The generators are pure and deterministic. The `*_in` functions persist
// their output and run inside a caller-owned transaction.

use std::collections::{HashMap, HashSet};

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db;
use crate::error::{ScheduleError, ScheduleResult};
use crate::model::{BracketStage, DivisionId, Pairing, TeamId, TeamRef};
use crate::placement;

// ---------------------------------------------------------------------------
// Bracket formats
// ---------------------------------------------------------------------------

/// Championship stage played after pool play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BracketFormat {
    None,
    Final,
    Semifinals,
    Quarterfinals,
}

impl BracketFormat {
    /// Number of pool seeds the bracket draws from.
    pub fn seeds(&self) -> usize {
        match self {
            BracketFormat::None => 0,
            BracketFormat::Final => 2,
            BracketFormat::Semifinals => 4,
            BracketFormat::Quarterfinals => 8,
        }
    }

    /// The largest format not bigger than `self` that `team_count` teams can
    /// fill.
    pub fn fitting(self, team_count: usize) -> Self {
        [
            BracketFormat::Quarterfinals,
            BracketFormat::Semifinals,
            BracketFormat::Final,
        ]
        .into_iter()
        .find(|f| f.seeds() <= self.seeds() && f.seeds() <= team_count)
        .unwrap_or(BracketFormat::None)
    }

    /// The format whose first stage is the earliest of `stages`.
    pub fn from_stages(stages: impl IntoIterator<Item = BracketStage>) -> Self {
        match stages.into_iter().min() {
            Some(BracketStage::Quarterfinal) => BracketFormat::Quarterfinals,
            Some(BracketStage::Semifinal) => BracketFormat::Semifinals,
            Some(BracketStage::Final) => BracketFormat::Final,
            None => BracketFormat::None,
        }
    }
}

// ---------------------------------------------------------------------------
// Pure generators
// ---------------------------------------------------------------------------

/// A pairing before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct PairingDraft {
    pub ai: u32,
    pub round: u32,
    pub stage: Option<BracketStage>,
    pub home: TeamRef,
    pub away: TeamRef,
}

/// Every unordered pair of `ranks` exactly once, ordered lexicographically,
/// as `(home, away, round)`. Rounds come from the circle method so no rank
/// plays twice in a round.
pub fn round_robin(ranks: &[u32]) -> Vec<(u32, u32, u32)> {
    let mut sorted = ranks.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let rounds = circle_rounds(&sorted);
    let mut out = Vec::new();
    for (i, &a) in sorted.iter().enumerate() {
        for &b in &sorted[i + 1..] {
            let round = rounds.get(&(a, b)).copied().unwrap_or(1);
            out.push((a, b, round));
        }
    }
    out
}

fn circle_rounds(sorted: &[u32]) -> HashMap<(u32, u32), u32> {
    let mut slots: Vec<Option<u32>> = sorted.iter().copied().map(Some).collect();
    if slots.len() % 2 == 1 {
        slots.push(None);
    }
    let m = slots.len();
    let mut rounds = HashMap::new();
    if m < 2 {
        return rounds;
    }
    for r in 0..m - 1 {
        let at = |p: usize| -> Option<u32> {
            if p == 0 {
                slots[0]
            } else {
                slots[(p - 1 + r) % (m - 1) + 1]
            }
        };
        for i in 0..m / 2 {
            if let (Some(a), Some(b)) = (at(i), at(m - 1 - i)) {
                rounds.insert((a.min(b), a.max(b)), r as u32 + 1);
            }
        }
    }
    rounds
}

/// Placeholder template for a bracket format, in play order.
pub fn bracket(format: BracketFormat) -> Vec<(BracketStage, TeamRef, TeamRef)> {
    use BracketStage::*;
    let seed = |stage, seed| TeamRef::Seed { stage, seed };
    let winner = |stage, game| TeamRef::WinnerOf { stage, game };
    match format {
        BracketFormat::None => vec![],
        BracketFormat::Final => vec![(Final, seed(Final, 1), seed(Final, 2))],
        BracketFormat::Semifinals => vec![
            (Semifinal, seed(Semifinal, 1), seed(Semifinal, 4)),
            (Semifinal, seed(Semifinal, 2), seed(Semifinal, 3)),
            (Final, winner(Semifinal, 1), winner(Semifinal, 2)),
        ],
        BracketFormat::Quarterfinals => vec![
            (Quarterfinal, seed(Quarterfinal, 1), seed(Quarterfinal, 8)),
            (Quarterfinal, seed(Quarterfinal, 4), seed(Quarterfinal, 5)),
            (Quarterfinal, seed(Quarterfinal, 2), seed(Quarterfinal, 7)),
            (Quarterfinal, seed(Quarterfinal, 3), seed(Quarterfinal, 6)),
            (Semifinal, winner(Quarterfinal, 1), winner(Quarterfinal, 2)),
            (Semifinal, winner(Quarterfinal, 3), winner(Quarterfinal, 4)),
            (Final, winner(Semifinal, 1), winner(Semifinal, 2)),
        ],
    }
}

/// Full pairing set for a division: round robin, then the bracket (shrunk to
/// what the team count can fill). Keys are numbered from 1 in that order.
pub fn generate(ranks: &[u32], format: BracketFormat) -> Vec<PairingDraft> {
    let mut drafts: Vec<PairingDraft> = round_robin(ranks)
        .into_iter()
        .map(|(a, b, round)| PairingDraft {
            ai: 0,
            round,
            stage: None,
            home: TeamRef::Rank(a),
            away: TeamRef::Rank(b),
        })
        .collect();

    let fitted = format.fitting(ranks.len());
    if fitted != format {
        warn!(
            "bracket {:?} needs {} teams, only {} available; using {:?}",
            format,
            format.seeds(),
            ranks.len(),
            fitted
        );
    }

    let last_round = drafts.iter().map(|d| d.round).max().unwrap_or(0);
    let first_stage = bracket(fitted).first().map(|(s, _, _)| *s);
    for (stage, home, away) in bracket(fitted) {
        let stage_offset = match first_stage {
            Some(first) => stage as u32 - first as u32,
            None => 0,
        };
        drafts.push(PairingDraft {
            ai: 0,
            round: last_round + 1 + stage_offset,
            stage: Some(stage),
            home,
            away,
        });
    }

    for (i, d) in drafts.iter_mut().enumerate() {
        d.ai = i as u32 + 1;
    }
    drafts
}

/// Resolve a bracket seed against final pool standings (best team first).
/// Only `Seed` references resolve from standings; ranks and winners do not.
pub fn resolve_placeholder(team_ref: &TeamRef, standings: &[TeamId]) -> Option<TeamId> {
    match team_ref {
        TeamRef::Seed { seed, .. } => (*seed as usize)
            .checked_sub(1)
            .and_then(|i| standings.get(i))
            .copied(),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

fn active_ranks(conn: &Connection, division_id: DivisionId) -> ScheduleResult<Vec<u32>> {
    Ok(db::load_teams(conn, division_id)?
        .into_iter()
        .filter(|t| t.active)
        .map(|t| t.div_rank)
        .collect())
}

fn insert_drafts(
    conn: &Connection,
    division_id: DivisionId,
    drafts: &[PairingDraft],
) -> ScheduleResult<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO pairings
            (division_id, ai, round_number, stage, home_kind, home_no, away_kind, away_no)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    for d in drafts {
        let (home_kind, home_no) = d.home.to_parts();
        let (away_kind, away_no) = d.away.to_parts();
        stmt.execute(params![
            division_id,
            d.ai,
            d.round,
            d.stage.map(|s| s.code()),
            home_kind,
            home_no,
            away_kind,
            away_no,
        ])?;
    }
    Ok(())
}

/// Existing pairings of the division, or freshly generated ones if it has
/// none yet.
pub(crate) fn generate_or_get_in(
    conn: &Connection,
    division_id: DivisionId,
    format: BracketFormat,
) -> ScheduleResult<Vec<Pairing>> {
    db::load_division(conn, division_id)?;
    let existing = db::load_pairings(conn, division_id)?;
    if !existing.is_empty() {
        return Ok(existing);
    }

    let ranks = active_ranks(conn, division_id)?;
    let drafts = generate(&ranks, format);
    insert_drafts(conn, division_id, &drafts)?;
    info!(
        "Generated {} pairings for division {} ({} teams)",
        drafts.len(),
        division_id,
        ranks.len()
    );
    db::load_pairings(conn, division_id)
}

/// Discard the division's pairings and generate new ones. Refuses while any
/// pairing is scheduled so placed games are never orphaned.
pub(crate) fn regenerate_in(
    conn: &Connection,
    division_id: DivisionId,
    format: BracketFormat,
) -> ScheduleResult<Vec<Pairing>> {
    db::load_division(conn, division_id)?;
    let scheduled = db::load_pairings(conn, division_id)?
        .iter()
        .filter(|p| !p.available)
        .count();
    if scheduled > 0 {
        return Err(ScheduleError::PairingRegenerationBlocked {
            division_id,
            scheduled,
        });
    }

    conn.execute(
        "DELETE FROM pairings WHERE division_id = ?1",
        params![division_id],
    )?;
    let ranks = active_ranks(conn, division_id)?;
    insert_drafts(conn, division_id, &generate(&ranks, format))?;
    db::load_pairings(conn, division_id)
}

/// Write resolved teams onto the division's placed bracket games whose
/// sides are seed placeholders. Returns the number of sides updated.
///
/// Each resolved team must be active and free at the game's start; any
/// violation rejects the whole seeding.
pub(crate) fn seed_bracket_in(
    conn: &Connection,
    division_id: DivisionId,
    standings: &[TeamId],
    game_minutes: u32,
) -> ScheduleResult<usize> {
    let teams = db::load_teams(conn, division_id)?;
    if let Some(stranger) = standings.iter().find(|id| !teams.iter().any(|t| t.id == **id)) {
        return Err(ScheduleError::InvalidReference(format!(
            "team {stranger} in standings is not in division {division_id}"
        )));
    }
    let mut seen = HashSet::new();
    if let Some(repeated) = standings.iter().find(|id| !seen.insert(**id)) {
        return Err(ScheduleError::InvalidReference(format!(
            "team {repeated} appears more than once in the standings"
        )));
    }

    let mut updated = 0;
    for game in db::load_games_for_division(conn, division_id)? {
        for (side, column) in [(&game.home, "home_team_id"), (&game.away, "away_team_id")] {
            let Some(team_id) = resolve_placeholder(&side.team_ref, standings) else {
                continue;
            };
            let Some(team) = teams.iter().find(|t| t.id == team_id) else {
                continue;
            };
            if !team.active {
                return Err(ScheduleError::InactiveTeam {
                    team_id,
                    team_name: team.name.clone(),
                });
            }
            placement::check_team_clash(
                conn,
                game.event_id,
                std::slice::from_ref(team),
                game.start,
                game_minutes,
                &[game.id],
            )?;
            updated += conn.execute(
                &format!("UPDATE games SET {column} = ?1 WHERE id = ?2"),
                params![team_id, game.id],
            )?;
        }
    }
    info!("Seeded {updated} bracket slots in division {division_id}");
    Ok(updated)
}
