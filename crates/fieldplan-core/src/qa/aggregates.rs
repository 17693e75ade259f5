// Informational schedule aggregates. Each fills one part of `QaInfo`.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::model::*;

use super::checks::expected_pool_games;
use super::snapshot::Snapshot;
use super::CheckError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamDayCount {
    pub team_id: TeamId,
    pub date: NaiveDate,
    pub games: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDayCount {
    pub field_id: FieldId,
    pub field_name: String,
    pub date: NaiveDate,
    pub games: usize,
}

/// First and last start of a team on one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamDaySpread {
    pub team_id: TeamId,
    pub date: NaiveDate,
    pub first: NaiveDateTime,
    pub last: NaiveDateTime,
    pub spread_minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundRobinProgress {
    pub division_id: DivisionId,
    pub division_name: String,
    pub scheduled: usize,
    pub expected: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QaInfo {
    pub total_games: usize,
    pub games_per_date: BTreeMap<NaiveDate, usize>,
    pub games_per_team: BTreeMap<TeamId, usize>,
    pub games_per_team_per_day: Vec<TeamDayCount>,
    pub games_per_field_per_day: Vec<FieldDayCount>,
    pub time_spread: Vec<TeamDaySpread>,
    pub bracket_games: usize,
    pub round_robin: Vec<RoundRobinProgress>,
}

pub(crate) fn games_per_date(snapshot: &Snapshot, info: &mut QaInfo) -> Result<(), CheckError> {
    info.total_games = snapshot.games.len();
    for g in &snapshot.games {
        *info.games_per_date.entry(g.start.date()).or_insert(0) += 1;
    }
    Ok(())
}

pub(crate) fn games_per_team(snapshot: &Snapshot, info: &mut QaInfo) -> Result<(), CheckError> {
    for t in &snapshot.teams {
        info.games_per_team.insert(t.id, snapshot.games_of(t.id).count());
    }
    Ok(())
}

fn starts_by_team_day(snapshot: &Snapshot) -> BTreeMap<(TeamId, NaiveDate), Vec<NaiveDateTime>> {
    let mut by_day: BTreeMap<(TeamId, NaiveDate), Vec<NaiveDateTime>> = BTreeMap::new();
    for g in &snapshot.games {
        for team_id in g.team_ids() {
            by_day.entry((team_id, g.start.date())).or_default().push(g.start);
        }
    }
    by_day
}

pub(crate) fn games_per_team_per_day(snapshot: &Snapshot, info: &mut QaInfo) -> Result<(), CheckError> {
    info.games_per_team_per_day = starts_by_team_day(snapshot)
        .into_iter()
        .map(|((team_id, date), starts)| TeamDayCount {
            team_id,
            date,
            games: starts.len(),
        })
        .collect();
    Ok(())
}

pub(crate) fn games_per_field_per_day(snapshot: &Snapshot, info: &mut QaInfo) -> Result<(), CheckError> {
    let mut counts: BTreeMap<(FieldId, NaiveDate), usize> = BTreeMap::new();
    for g in &snapshot.games {
        *counts.entry((g.field_id, g.start.date())).or_insert(0) += 1;
    }
    info.games_per_field_per_day = counts
        .into_iter()
        .map(|((field_id, date), games)| {
            let field = snapshot.field(field_id).ok_or(CheckError::Missing {
                entity: "field",
                id: field_id,
            })?;
            Ok(FieldDayCount {
                field_id,
                field_name: field.name.clone(),
                date,
                games,
            })
        })
        .collect::<Result<_, CheckError>>()?;
    Ok(())
}

pub(crate) fn time_spread(snapshot: &Snapshot, info: &mut QaInfo) -> Result<(), CheckError> {
    info.time_spread = starts_by_team_day(snapshot)
        .into_iter()
        .filter_map(|((team_id, date), starts)| {
            let first = *starts.iter().min()?;
            let last = *starts.iter().max()?;
            Some(TeamDaySpread {
                team_id,
                date,
                first,
                last,
                spread_minutes: (last - first).num_minutes(),
            })
        })
        .collect();
    Ok(())
}

pub(crate) fn bracket_games(snapshot: &Snapshot, info: &mut QaInfo) -> Result<(), CheckError> {
    info.bracket_games = snapshot.games.iter().filter(|g| g.is_bracket).count();
    Ok(())
}

pub(crate) fn round_robin(snapshot: &Snapshot, info: &mut QaInfo) -> Result<(), CheckError> {
    info.round_robin = snapshot
        .divisions
        .iter()
        .map(|d| RoundRobinProgress {
            division_id: d.id,
            division_name: d.name.clone(),
            scheduled: snapshot
                .games
                .iter()
                .filter(|g| g.division_id == d.id && !g.is_bracket)
                .count(),
            expected: expected_pool_games(
                snapshot
                    .teams
                    .iter()
                    .filter(|t| t.division_id == d.id && t.active)
                    .count(),
            ),
        })
        .collect();
    Ok(())
}
