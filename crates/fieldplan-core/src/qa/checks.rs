// Individual QA checks. Each is a pure function of the snapshot.

use std::collections::{BTreeMap, BTreeSet};

use crate::grid::Cell;
use crate::model::*;

use super::snapshot::Snapshot;
use super::{CheckContext, CheckError, CheckKind, Finding};

fn team_name(snapshot: &Snapshot, id: TeamId) -> Result<&str, CheckError> {
    snapshot
        .team(id)
        .map(|t| t.name.as_str())
        .ok_or(CheckError::Missing { entity: "team", id })
}

fn active_teams(snapshot: &Snapshot) -> impl Iterator<Item = &Team> + '_ {
    snapshot.teams.iter().filter(|t| t.active)
}

// ---------------------------------------------------------------------------
// Critical
// ---------------------------------------------------------------------------

/// Games on one field whose starts overlap, grouped into runs.
pub(crate) fn field_double_booking(snapshot: &Snapshot, ctx: &CheckContext) -> Result<Vec<Finding>, CheckError> {
    let mut by_field: BTreeMap<FieldId, Vec<&Game>> = BTreeMap::new();
    for g in &snapshot.games {
        by_field.entry(g.field_id).or_default().push(g);
    }

    let mut findings = Vec::new();
    for (field_id, mut games) in by_field {
        games.sort_by_key(|g| (g.start, g.id));
        let mut runs: Vec<Vec<&Game>> = Vec::new();
        for g in games {
            let extends = runs
                .last()
                .and_then(|run| run.last())
                .is_some_and(|prev| overlaps(prev.start, g.start, ctx.game_minutes));
            match runs.last_mut() {
                Some(run) if extends => run.push(g),
                _ => runs.push(vec![g]),
            }
        }
        for run in runs.into_iter().filter(|r| r.len() > 1) {
            let field = snapshot
                .field(field_id)
                .ok_or(CheckError::Missing { entity: "field", id: field_id })?;
            findings.push(
                Finding::new(
                    CheckKind::FieldDoubleBooking,
                    format!("{} overlapping games on `{}` from {}", run.len(), field.name, run[0].start),
                )
                .with_games(run.iter().map(|g| g.id).collect()),
            );
        }
    }
    Ok(findings)
}

pub(crate) fn team_double_booking(snapshot: &Snapshot, ctx: &CheckContext) -> Result<Vec<Finding>, CheckError> {
    let mut findings = Vec::new();
    for team in active_teams(snapshot) {
        let games: Vec<&Game> = snapshot.games_of(team.id).collect();
        for (i, a) in games.iter().enumerate() {
            for b in &games[i + 1..] {
                if overlaps(a.start, b.start, ctx.game_minutes) {
                    findings.push(
                        Finding::new(
                            CheckKind::TeamDoubleBooking,
                            format!("`{}` plays overlapping games at {} and {}", team.name, a.start, b.start),
                        )
                        .with_games(vec![a.id, b.id])
                        .with_teams(vec![team.id]),
                    );
                }
            }
        }
    }
    Ok(findings)
}

pub(crate) fn rank_mismatch(snapshot: &Snapshot, _ctx: &CheckContext) -> Result<Vec<Finding>, CheckError> {
    let mut findings = Vec::new();
    for g in snapshot.games.iter().filter(|g| g.is_bracket) {
        for side in [&g.home, &g.away] {
            let (TeamRef::Seed { seed, .. }, Some(team_id)) = (side.team_ref, side.team_id) else {
                continue;
            };
            let team = snapshot
                .team(team_id)
                .ok_or(CheckError::Missing { entity: "team", id: team_id })?;
            if team.div_rank != seed {
                findings.push(
                    Finding::new(
                        CheckKind::RankMismatch,
                        format!(
                            "bracket game {} seats `{}` (rank {}) as seed {}",
                            g.id, team.name, team.div_rank, seed
                        ),
                    )
                    .with_games(vec![g.id])
                    .with_teams(vec![team_id])
                    .in_division(g.division_id),
                );
            }
        }
    }
    Ok(findings)
}

pub(crate) fn cross_pool_bracket(snapshot: &Snapshot, _ctx: &CheckContext) -> Result<Vec<Finding>, CheckError> {
    let mut findings = Vec::new();
    for ag in snapshot.agegroups.iter().filter(|a| !a.champions_by_division) {
        let bracket: Vec<&Game> = snapshot
            .games
            .iter()
            .filter(|g| g.agegroup_id == ag.id && g.is_bracket)
            .collect();
        let divisions: BTreeSet<DivisionId> = bracket.iter().map(|g| g.division_id).collect();
        if divisions.len() > 1 {
            let names = divisions
                .iter()
                .map(|id| {
                    snapshot
                        .division(*id)
                        .map(|d| d.name.clone())
                        .ok_or(CheckError::Missing { entity: "division", id: *id })
                })
                .collect::<Result<Vec<_>, _>>()?;
            findings.push(
                Finding::new(
                    CheckKind::CrossPoolBracket,
                    format!(
                        "agegroup `{}` crowns one champion but has bracket games from {}",
                        ag.name,
                        names.join(", ")
                    ),
                )
                .with_games(bracket.iter().map(|g| g.id).collect()),
            );
        }
    }
    Ok(findings)
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

pub(crate) fn unscheduled_team(snapshot: &Snapshot, _ctx: &CheckContext) -> Result<Vec<Finding>, CheckError> {
    Ok(active_teams(snapshot)
        .filter(|t| snapshot.games_of(t.id).next().is_none())
        .map(|t| {
            Finding::new(CheckKind::UnscheduledTeam, format!("`{}` has no games", t.name))
                .with_teams(vec![t.id])
                .in_division(t.division_id)
        })
        .collect())
}

pub(crate) fn back_to_back(snapshot: &Snapshot, ctx: &CheckContext) -> Result<Vec<Finding>, CheckError> {
    let mut findings = Vec::new();
    for team in active_teams(snapshot) {
        let mut games: Vec<&Game> = snapshot.games_of(team.id).collect();
        games.sort_by_key(|g| (g.start, g.id));
        for pair in games.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let gap = (b.start - a.start).num_minutes();
            if a.start.date() == b.start.date()
                && gap < i64::from(ctx.back_to_back_minutes)
                && !overlaps(a.start, b.start, ctx.game_minutes)
            {
                findings.push(
                    Finding::new(
                        CheckKind::BackToBack,
                        format!("`{}` starts games {} minutes apart on {}", team.name, gap, a.start.date()),
                    )
                    .with_games(vec![a.id, b.id])
                    .with_teams(vec![team.id]),
                );
            }
        }
    }
    Ok(findings)
}

pub(crate) fn repeated_matchup(snapshot: &Snapshot, _ctx: &CheckContext) -> Result<Vec<Finding>, CheckError> {
    let mut pairs: BTreeMap<(TeamId, TeamId), Vec<GameId>> = BTreeMap::new();
    for g in &snapshot.games {
        if let (Some(h), Some(a)) = (g.home.team_id, g.away.team_id) {
            pairs.entry((h.min(a), h.max(a))).or_default().push(g.id);
        }
    }

    let mut findings = Vec::new();
    for ((a, b), games) in pairs.into_iter().filter(|(_, g)| g.len() > 1) {
        findings.push(
            Finding::new(
                CheckKind::RepeatedMatchup,
                format!(
                    "`{}` and `{}` meet {} times",
                    team_name(snapshot, a)?,
                    team_name(snapshot, b)?,
                    games.len()
                ),
            )
            .with_games(games)
            .with_teams(vec![a, b]),
        );
    }
    Ok(findings)
}

pub(crate) fn inactive_team_in_game(snapshot: &Snapshot, _ctx: &CheckContext) -> Result<Vec<Finding>, CheckError> {
    let mut findings = Vec::new();
    for g in &snapshot.games {
        for team_id in g.team_ids() {
            let team = snapshot
                .team(team_id)
                .ok_or(CheckError::Missing { entity: "team", id: team_id })?;
            if !team.active {
                findings.push(
                    Finding::new(
                        CheckKind::InactiveTeamInGame,
                        format!("inactive team `{}` is scheduled in game {}", team.name, g.id),
                    )
                    .with_games(vec![g.id])
                    .with_teams(vec![team_id])
                    .in_division(g.division_id),
                );
            }
        }
    }
    Ok(findings)
}

/// Full round-robin size for `n` teams.
pub(crate) fn expected_pool_games(n: usize) -> usize {
    n * n.saturating_sub(1) / 2
}

pub(crate) fn incomplete_round_robin(snapshot: &Snapshot, _ctx: &CheckContext) -> Result<Vec<Finding>, CheckError> {
    let mut findings = Vec::new();
    for d in &snapshot.divisions {
        let n = snapshot
            .teams
            .iter()
            .filter(|t| t.division_id == d.id && t.active)
            .count();
        let expected = expected_pool_games(n);
        let scheduled = snapshot
            .games
            .iter()
            .filter(|g| g.division_id == d.id && !g.is_bracket)
            .count();
        if scheduled < expected {
            findings.push(
                Finding::new(
                    CheckKind::IncompleteRoundRobin,
                    format!(
                        "division `{}` has {} of {} pool games for {} teams",
                        d.name, scheduled, expected, n
                    ),
                )
                .in_division(d.id),
            );
        }
    }
    Ok(findings)
}

pub(crate) fn off_grid_game(snapshot: &Snapshot, _ctx: &CheckContext) -> Result<Vec<Finding>, CheckError> {
    let mut findings = Vec::new();
    for g in &snapshot.games {
        let Some(cells) = snapshot.grids.get(&g.agegroup_id) else {
            continue;
        };
        let cell = Cell {
            start: g.start,
            field_id: g.field_id,
        };
        if !cells.contains(&cell) {
            findings.push(
                Finding::new(
                    CheckKind::OffGridGame,
                    format!("game {} at {} on field {} is outside the configured timeslots", g.id, g.start, g.field_id),
                )
                .with_games(vec![g.id])
                .in_division(g.division_id),
            );
        }
    }
    Ok(findings)
}
