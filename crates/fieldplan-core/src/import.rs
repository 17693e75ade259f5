// CSV import of an event: structure, timeslot axis and optionally a played
// schedule, so a prior season can serve as an auto-build source.
//
// A directory holds one file per table:
//   agegroups.csv  agegroup,champions_by_division
//   teams.csv      agegroup,division,team,rank,active
//   fields.csv     name,location
//   dates.csv      agegroup,date,round
//   timeslots.csv  agegroup,field,day,start,interval,max_games
//   games.csv      agegroup,division,start,field,home,away   (optional)
//
// Malformed rows are skipped with a warning; rows naming unknown agegroups,
// divisions or fields are skipped the same way.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::engine::ScheduleEngine;
use crate::model::*;
use crate::pairing::BracketFormat;

// ---------------------------------------------------------------------------
// Raw CSV rows (private)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AgegroupRow {
    agegroup: String,
    #[serde(default)]
    champions_by_division: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct TeamRow {
    agegroup: String,
    division: String,
    team: String,
    rank: u32,
    #[serde(default)]
    active: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct FieldRow {
    name: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DateRow {
    agegroup: String,
    date: NaiveDate,
    round: u32,
}

#[derive(Debug, Deserialize)]
struct TimeslotRow {
    agegroup: String,
    field: String,
    day: String,
    start: String,
    interval: u32,
    max_games: u32,
}

#[derive(Debug, Deserialize)]
struct GameRow {
    agegroup: String,
    division: String,
    start: String,
    field: String,
    home: String,
    away: String,
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

fn key(s: &str) -> String {
    crate::autobuild::analyzer::normalize(s)
}

/// Deserialize every well-formed row of `rdr`, warning about the rest.
fn rows_from_reader<T: DeserializeOwned, R: Read>(rdr: R, what: &str) -> Vec<T> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(rdr);
    let mut rows = Vec::new();
    for result in reader.deserialize::<T>() {
        match result {
            Ok(row) => rows.push(row),
            Err(e) => warn!("skipping malformed {} row: {}", what, e),
        }
    }
    rows
}

fn rows_from_file<T: DeserializeOwned>(dir: &Path, name: &str, required: bool) -> Result<Vec<T>> {
    let path = dir.join(name);
    if !path.exists() && !required {
        return Ok(Vec::new());
    }
    let file = std::fs::File::open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    Ok(rows_from_reader(file, name))
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub event_id: EventId,
    pub agegroups: usize,
    pub divisions: usize,
    pub teams: usize,
    pub fields: usize,
    pub dates: usize,
    pub timeslots: usize,
    pub games_placed: usize,
    pub games_skipped: usize,
}

/// Create a new event named `event_name` from the CSV files in `dir`.
pub fn import_event(engine: &ScheduleEngine, dir: &Path, event_name: &str) -> Result<ImportSummary> {
    let agegroup_rows: Vec<AgegroupRow> = rows_from_file(dir, "agegroups.csv", true)?;
    let team_rows: Vec<TeamRow> = rows_from_file(dir, "teams.csv", true)?;
    let field_rows: Vec<FieldRow> = rows_from_file(dir, "fields.csv", true)?;
    let date_rows: Vec<DateRow> = rows_from_file(dir, "dates.csv", false)?;
    let timeslot_rows: Vec<TimeslotRow> = rows_from_file(dir, "timeslots.csv", false)?;
    let game_rows: Vec<GameRow> = rows_from_file(dir, "games.csv", false)?;

    let db = engine.db();
    let event_id = db.create_event(event_name)?;
    let mut summary = ImportSummary {
        event_id,
        ..Default::default()
    };

    let mut agegroups: HashMap<String, AgegroupId> = HashMap::new();
    for row in &agegroup_rows {
        if agegroups.contains_key(&key(&row.agegroup)) {
            warn!("skipping duplicate agegroup `{}`", row.agegroup);
            continue;
        }
        let id = db.create_agegroup(event_id, &row.agegroup, row.champions_by_division.unwrap_or(true))?;
        agegroups.insert(key(&row.agegroup), id);
        summary.agegroups += 1;
    }

    let mut fields: HashMap<String, FieldId> = HashMap::new();
    for row in &field_rows {
        if fields.contains_key(&key(&row.name)) {
            warn!("skipping duplicate field `{}`", row.name);
            continue;
        }
        let location = row.location.as_deref().filter(|l| !l.is_empty());
        let id = db.create_field(event_id, &row.name, location)?;
        fields.insert(key(&row.name), id);
        summary.fields += 1;
    }

    let mut divisions: HashMap<(String, String), DivisionId> = HashMap::new();
    for row in &team_rows {
        let Some(&agegroup_id) = agegroups.get(&key(&row.agegroup)) else {
            warn!("skipping team `{}`: unknown agegroup `{}`", row.team, row.agegroup);
            continue;
        };
        let div_key = (key(&row.agegroup), key(&row.division));
        let division_id = match divisions.get(&div_key) {
            Some(id) => *id,
            None => {
                let id = db.create_division(agegroup_id, &row.division)?;
                divisions.insert(div_key, id);
                summary.divisions += 1;
                id
            }
        };
        if row.rank == 0 {
            warn!("skipping team `{}`: rank must be positive", row.team);
            continue;
        }
        match db.create_team(division_id, &row.team, row.rank, row.active.unwrap_or(true)) {
            Ok(_) => summary.teams += 1,
            Err(e) => warn!("skipping team `{}`: {:#}", row.team, e),
        }
    }

    for row in &date_rows {
        let Some(&agegroup_id) = agegroups.get(&key(&row.agegroup)) else {
            warn!("skipping date {}: unknown agegroup `{}`", row.date, row.agegroup);
            continue;
        };
        match db.add_timeslot_date(agegroup_id, row.date, row.round) {
            Ok(_) => summary.dates += 1,
            Err(e) => warn!("skipping date {}: {:#}", row.date, e),
        }
    }

    for row in &timeslot_rows {
        let (Some(&agegroup_id), Some(&field_id)) =
            (agegroups.get(&key(&row.agegroup)), fields.get(&key(&row.field)))
        else {
            warn!("skipping timeslot: unknown agegroup `{}` or field `{}`", row.agegroup, row.field);
            continue;
        };
        let (Ok(day), Some(start)) = (row.day.parse::<Weekday>(), parse_time(&row.start)) else {
            warn!("skipping timeslot: bad day `{}` or start `{}`", row.day, row.start);
            continue;
        };
        if row.interval == 0 || row.max_games == 0 {
            warn!("skipping timeslot on `{}`: interval and max_games must be positive", row.field);
            continue;
        }
        db.add_field_timeslot(agegroup_id, field_id, day, start, row.interval, row.max_games)?;
        summary.timeslots += 1;
    }

    import_games(engine, &game_rows, &divisions, &fields, &mut summary)?;

    info!(
        "Imported event `{}` ({}): {} divisions, {} teams, {} games placed, {} skipped",
        event_name, event_id, summary.divisions, summary.teams, summary.games_placed, summary.games_skipped
    );
    Ok(summary)
}

fn import_games(
    engine: &ScheduleEngine,
    rows: &[GameRow],
    divisions: &HashMap<(String, String), DivisionId>,
    fields: &HashMap<String, FieldId>,
    summary: &mut ImportSummary,
) -> Result<()> {
    // Bracket stages each division's schedule uses decide its bracket format.
    let mut stages: BTreeMap<DivisionId, BTreeSet<BracketStage>> = BTreeMap::new();
    let mut parsed = Vec::new();
    for row in rows {
        let div_key = (key(&row.agegroup), key(&row.division));
        let (Some(&division_id), Some(&field_id)) = (divisions.get(&div_key), fields.get(&key(&row.field))) else {
            warn!("skipping game: unknown division `{} {}` or field `{}`", row.agegroup, row.division, row.field);
            summary.games_skipped += 1;
            continue;
        };
        let (Some(start), Ok(home), Ok(away)) = (
            parse_datetime(&row.start),
            row.home.parse::<TeamRef>(),
            row.away.parse::<TeamRef>(),
        ) else {
            warn!("skipping game: bad start `{}` or sides `{}`/`{}`", row.start, row.home, row.away);
            summary.games_skipped += 1;
            continue;
        };
        let entry = stages.entry(division_id).or_default();
        for side in [&home, &away] {
            if let TeamRef::Seed { stage, .. } | TeamRef::WinnerOf { stage, .. } = side {
                entry.insert(*stage);
            }
        }
        parsed.push((division_id, start, field_id, home, away));
    }

    for (division_id, division_stages) in &stages {
        let format = BracketFormat::from_stages(division_stages.iter().copied());
        engine
            .regenerate_pairings(*division_id, format)
            .with_context(|| format!("failed to generate pairings for division {division_id}"))?;
    }

    for (division_id, start, field_id, home, away) in parsed {
        let pairings = engine.db().pairings_for_division(division_id)?;
        let Some(pairing) = pairings
            .iter()
            .find(|p| p.available && p.same_sides(&home, &away))
        else {
            warn!("skipping game {home} v {away} at {start}: no unscheduled pairing");
            summary.games_skipped += 1;
            continue;
        };
        match engine.place_game(pairing.id, start, field_id) {
            Ok(_) => summary.games_placed += 1,
            Err(e) if e.is_recoverable() => {
                warn!("skipping game {home} v {away} at {start}: {e}");
                summary.games_skipped += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn temp_dir(tag: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("fieldplan_import_{}_{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let csv = "agegroup,division,team,rank,active\n\
                   12U,Gold,Hawks,1,true\n\
                   12U,Gold,Owls,not-a-number,true\n\
                   12U,Gold,Bears,2,\n";
        let rows: Vec<TeamRow> = rows_from_reader(csv.as_bytes(), "teams.csv");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].team, "Bears");
        assert_eq!(rows[1].active, None);
    }

    #[test]
    fn fields_are_trimmed() {
        let csv = "name,location\n  Field A , North park\nField B,\n";
        let rows: Vec<FieldRow> = rows_from_reader(csv.as_bytes(), "fields.csv");
        assert_eq!(rows[0].name, "Field A");
        assert_eq!(rows[0].location.as_deref(), Some("North park"));
    }

    #[test]
    fn time_formats() {
        assert_eq!(parse_time("09:30"), NaiveTime::from_hms_opt(9, 30, 0));
        assert_eq!(parse_time("17:05:00"), NaiveTime::from_hms_opt(17, 5, 0));
        assert!(parse_time("9am").is_none());
        assert!(parse_datetime("2025-06-01T09:00").is_some());
        assert!(parse_datetime("2025-06-01 09:00").is_some());
        assert!(parse_datetime("06/01/2025").is_none());
    }

    #[test]
    fn import_minimal_directory() {
        let dir = temp_dir("minimal");
        std::fs::write(dir.join("agegroups.csv"), "agegroup,champions_by_division\n10U,true\n").unwrap();
        std::fs::write(
            dir.join("teams.csv"),
            "agegroup,division,team,rank,active\n10U,Blue,A,1,true\n10U,Blue,B,2,true\n9U,Red,C,1,true\n",
        )
        .unwrap();
        std::fs::write(dir.join("fields.csv"), "name,location\nField A,\n").unwrap();
        std::fs::write(
            dir.join("games.csv"),
            "agegroup,division,start,field,home,away\n10U,Blue,2024-06-01 09:00,Field A,T1,T2\n10U,Blue,2024-06-01 11:00,Field A,T1,T2\n",
        )
        .unwrap();

        let engine = ScheduleEngine::open(":memory:", EngineConfig::default()).unwrap();
        let summary = import_event(&engine, &dir, "Spring 2024").unwrap();
        assert_eq!(summary.agegroups, 1);
        assert_eq!(summary.divisions, 1);
        assert_eq!(summary.teams, 2);
        assert_eq!(summary.games_placed, 1);
        // Second 1v2 has no unscheduled pairing left.
        assert_eq!(summary.games_skipped, 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_required_file_is_an_error() {
        let dir = temp_dir("missing");
        let engine = ScheduleEngine::open(":memory:", EngineConfig::default()).unwrap();
        let err = import_event(&engine, &dir, "Nope").unwrap_err();
        assert!(format!("{err:#}").contains("agegroups.csv"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
