// Auto-build execution: replay a source event's games onto the current
// event, one transaction per division, tagging every created game with the
// run's batch id so the run can be undone exactly.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{Local, NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::analyzer::{self, normalize, DivisionSummary, EventStructure, MatchKind, SourceGame};
use super::dates::DateMapper;
use super::fallback::{self, FallbackStrategy};
use crate::config::EngineConfig;
use crate::db::{self, Database};
use crate::error::ScheduleResult;
use crate::grid::{self, Cell};
use crate::model::*;
use crate::pairing::{self, BracketFormat};
use crate::placement;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// What to do with a division whose team count differs from its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MismatchStrategy {
    /// Leave the division unscheduled.
    Skip,
    /// Map the k-th source rank to the k-th current rank. Templates naming
    /// ranks the current division lacks are dropped; extra current teams are
    /// slotted next to the template of the closest rank pair.
    FitByRank,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoBuildRequest {
    pub source_event_id: EventId,
    #[serde(default)]
    pub skip_divisions: Vec<DivisionId>,
    /// Per-division override of the configured mismatch strategy.
    #[serde(default)]
    pub resolutions: BTreeMap<DivisionId, MismatchStrategy>,
    #[serde(default = "default_true")]
    pub include_bracket: bool,
    #[serde(default = "default_true")]
    pub skip_already_scheduled: bool,
}

impl AutoBuildRequest {
    pub fn new(source_event_id: EventId) -> Self {
        Self {
            source_event_id,
            skip_divisions: Vec::new(),
            resolutions: BTreeMap::new(),
            include_bracket: true,
            skip_already_scheduled: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DivisionBuildStatus {
    Scheduled,
    Skipped,
    AlreadyScheduled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    NoSourceDivision,
    Requested,
    SizeMismatch {
        source_teams: usize,
        current_teams: usize,
    },
}

/// One source template (or leftover pairing) that could not be placed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlacementFailure {
    pub source_game_id: Option<GameId>,
    pub matchup: String,
    pub start: Option<NaiveDateTime>,
    pub code: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DivisionBuildResult {
    pub division_id: DivisionId,
    pub name: String,
    pub source_division_id: Option<DivisionId>,
    pub status: DivisionBuildStatus,
    pub skip_reason: Option<SkipReason>,
    pub placed: usize,
    pub failed: usize,
    /// Templates that referenced ranks the division does not have.
    pub dropped: usize,
    pub failures: Vec<PlacementFailure>,
}

impl DivisionBuildResult {
    fn new(current: &DivisionSummary, source: Option<&DivisionSummary>, status: DivisionBuildStatus) -> Self {
        Self {
            division_id: current.division_id,
            name: current.full_name(),
            source_division_id: source.map(|s| s.division_id),
            status,
            skip_reason: None,
            placed: 0,
            failed: 0,
            dropped: 0,
            failures: Vec::new(),
        }
    }

    fn fail(&mut self, failure: PlacementFailure) {
        self.failed += 1;
        self.failures.push(failure);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildResult {
    pub batch_id: String,
    pub event_id: EventId,
    pub source_event_id: EventId,
    pub games_placed: usize,
    pub games_failed: usize,
    pub divisions_scheduled: usize,
    pub divisions_skipped: usize,
    pub divisions: Vec<DivisionBuildResult>,
}

impl BuildResult {
    pub fn division(&self, division_id: DivisionId) -> Option<&DivisionBuildResult> {
        self.divisions.iter().find(|d| d.division_id == division_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UndoResult {
    pub batch_id: Option<String>,
    pub games_deleted: usize,
    pub already_undone: bool,
}

// ---------------------------------------------------------------------------
// Rank mapping
// ---------------------------------------------------------------------------

/// Source rank -> current rank. `None` maps every rank to itself.
struct RankMap(Option<HashMap<u32, u32>>);

impl RankMap {
    fn identity() -> Self {
        RankMap(None)
    }

    /// k-th source rank to k-th current rank, both ascending.
    fn by_order(source: &[u32], current: &[u32]) -> Self {
        let mut source = source.to_vec();
        let mut current = current.to_vec();
        source.sort_unstable();
        current.sort_unstable();
        RankMap(Some(source.into_iter().zip(current).collect()))
    }

    fn map(&self, team_ref: &TeamRef) -> Option<TeamRef> {
        match (team_ref, &self.0) {
            (TeamRef::Rank(r), Some(map)) => map.get(r).map(|m| TeamRef::Rank(*m)),
            (other, _) => Some(*other),
        }
    }
}

// ---------------------------------------------------------------------------
// Division replay
// ---------------------------------------------------------------------------

struct DivisionPlan<'a> {
    current: &'a DivisionSummary,
    source: &'a DivisionSummary,
    strategy: MismatchStrategy,
    templates: Vec<&'a SourceGame>,
    bracket_format: BracketFormat,
    source_dates: Vec<NaiveDate>,
    skip_if_scheduled: bool,
}

enum Attempt {
    Placed,
    Failed { code: String, reason: String },
}

/// Placement state for one division's transaction.
struct Replay<'a> {
    conn: &'a Connection,
    cfg: &'a EngineConfig,
    fallback: &'a dyn FallbackStrategy,
    batch_id: &'a str,
    cells: Vec<Cell>,
    occupied: HashSet<Cell>,
    load: HashMap<(FieldId, NaiveDate), usize>,
}

impl Replay<'_> {
    /// Place at `field_id` if given, otherwise at the fallback strategy's
    /// best open cells. Constraint failures come back as `Attempt::Failed`.
    fn place(
        &mut self,
        pairing_id: PairingId,
        start: NaiveDateTime,
        field_id: Option<FieldId>,
    ) -> ScheduleResult<Attempt> {
        let targets: Vec<Cell> = match field_id {
            Some(field_id) => vec![Cell { start, field_id }],
            None => self
                .fallback
                .rank(start, fallback::open_candidates(&self.cells, &self.occupied, &self.load))
                .into_iter()
                .take(self.cfg.autobuild.fallback_attempts)
                .collect(),
        };

        let mut outcome = Attempt::Failed {
            code: "NoOpenCell".into(),
            reason: format!("no open cell on {} at or after {}", start.date(), start.time()),
        };
        for cell in targets {
            match placement::place_in(
                self.conn,
                &self.cfg.placement,
                pairing_id,
                cell.start,
                cell.field_id,
                Some(self.batch_id),
            ) {
                Ok(game) => {
                    self.conn.execute(
                        "INSERT INTO autobuild_batch_games (batch_id, game_id) VALUES (?1, ?2)",
                        params![self.batch_id, game.id],
                    )?;
                    self.occupied.insert(cell);
                    *self.load.entry((cell.field_id, cell.start.date())).or_insert(0) += 1;
                    debug!("Batch {} placed game {}", self.batch_id, game.id);
                    return Ok(Attempt::Placed);
                }
                Err(e) if e.is_recoverable() => {
                    outcome = Attempt::Failed {
                        code: e.code().into(),
                        reason: e.to_string(),
                    };
                }
                Err(e) => return Err(e),
            }
        }
        Ok(outcome)
    }
}

fn rank_position(ranks: &[u32], team_ref: &TeamRef) -> Option<usize> {
    team_ref.rank().and_then(|r| ranks.iter().position(|x| *x == r))
}

fn replay_division_in(
    conn: &Connection,
    cfg: &EngineConfig,
    fallback: &dyn FallbackStrategy,
    batch_id: &str,
    plan: &DivisionPlan<'_>,
) -> ScheduleResult<DivisionBuildResult> {
    let current = plan.current;
    if plan.skip_if_scheduled && db::count_games_for_division(conn, current.division_id)? > 0 {
        return Ok(DivisionBuildResult::new(
            current,
            Some(plan.source),
            DivisionBuildStatus::AlreadyScheduled,
        ));
    }
    let mut result = DivisionBuildResult::new(current, Some(plan.source), DivisionBuildStatus::Scheduled);

    let agegroup = db::load_agegroup(conn, current.agegroup_id)?;
    let pairings = pairing::generate_or_get_in(conn, current.division_id, plan.bracket_format)?;
    let mut used: HashSet<PairingId> = pairings.iter().filter(|p| !p.available).map(|p| p.id).collect();

    let current_dates = db::load_dates(conn, agegroup.id)?;
    let dates = DateMapper::new(
        plan.source_dates.clone(),
        current_dates.iter().map(|d| d.date).collect(),
    );
    let fields = db::load_fields(conn, agegroup.event_id)?;
    let event_games = db::load_games_for_event(conn, agegroup.event_id)?;
    let mut replay = Replay {
        conn,
        cfg,
        fallback,
        batch_id,
        cells: grid::expand(&current_dates, &db::load_field_timeslots(conn, agegroup.id)?),
        occupied: event_games
            .iter()
            .map(|g| Cell {
                start: g.start,
                field_id: g.field_id,
            })
            .collect(),
        load: grid::field_day_load(&event_games),
    };

    let ranks = if plan.strategy == MismatchStrategy::FitByRank
        && current.team_count != plan.source.team_count
    {
        RankMap::by_order(&plan.source.ranks, &current.ranks)
    } else {
        RankMap::identity()
    };

    for t in &plan.templates {
        let (Some(home), Some(away)) = (ranks.map(&t.home), ranks.map(&t.away)) else {
            result.dropped += 1;
            continue;
        };
        let matchup = format!("{home} v {away}");
        let Some(pairing) = pairings
            .iter()
            .find(|p| !used.contains(&p.id) && p.same_sides(&home, &away))
        else {
            result.fail(PlacementFailure {
                source_game_id: Some(t.game_id),
                matchup,
                start: None,
                code: "PairingUnavailable".into(),
                reason: "no unscheduled pairing with these sides".into(),
            });
            continue;
        };
        let Some(date) = dates.map(t.start.date()) else {
            result.fail(PlacementFailure {
                source_game_id: Some(t.game_id),
                matchup,
                start: None,
                code: "NoDate".into(),
                reason: format!("no current date corresponds to {}", t.start.date()),
            });
            continue;
        };
        let start = date.and_time(t.start.time());
        let field_id = fields
            .iter()
            .find(|f| normalize(&f.name) == normalize(&t.field_name))
            .map(|f| f.id);

        match replay.place(pairing.id, start, field_id)? {
            Attempt::Placed => {
                used.insert(pairing.id);
                result.placed += 1;
            }
            Attempt::Failed { code, reason } => result.fail(PlacementFailure {
                source_game_id: Some(t.game_id),
                matchup,
                start: Some(start),
                code,
                reason,
            }),
        }
    }

    if plan.strategy == MismatchStrategy::FitByRank && current.team_count > plan.source.team_count {
        place_extra_teams(&mut replay, plan, &pairings, &mut used, &dates, &mut result)?;
    }

    Ok(result)
}

/// Pool pairings that involve a current team beyond the source's size have
/// no template of their own. Each is anchored at the template whose rank
/// pair is closest to its own and placed through the fallback strategy.
fn place_extra_teams(
    replay: &mut Replay<'_>,
    plan: &DivisionPlan<'_>,
    pairings: &[Pairing],
    used: &mut HashSet<PairingId>,
    dates: &DateMapper,
    result: &mut DivisionBuildResult,
) -> ScheduleResult<()> {
    let mut source_ranks = plan.source.ranks.clone();
    source_ranks.sort_unstable();
    let mut current_ranks = plan.current.ranks.clone();
    current_ranks.sort_unstable();
    let n_src = source_ranks.len();
    if n_src == 0 {
        return Ok(());
    }

    let anchors: Vec<(&SourceGame, usize, usize)> = plan
        .templates
        .iter()
        .filter(|t| !t.is_bracket())
        .filter_map(|t| {
            Some((
                *t,
                rank_position(&source_ranks, &t.home)?,
                rank_position(&source_ranks, &t.away)?,
            ))
        })
        .collect();

    let pending: Vec<&Pairing> = pairings
        .iter()
        .filter(|p| !p.is_bracket() && !used.contains(&p.id))
        .collect();
    for p in pending {
        let (Some(ia), Some(ib)) = (
            rank_position(&current_ranks, &p.home),
            rank_position(&current_ranks, &p.away),
        ) else {
            continue;
        };
        if ia < n_src && ib < n_src {
            continue;
        }
        let (ja, jb) = (ia.min(n_src - 1), ib.min(n_src - 1));
        let anchor = anchors
            .iter()
            .min_by_key(|(t, ha, hb)| {
                let straight = ha.abs_diff(ja) + hb.abs_diff(jb);
                let crossed = ha.abs_diff(jb) + hb.abs_diff(ja);
                (straight.min(crossed), t.start, t.game_id)
            })
            .map(|(t, _, _)| *t);
        let matchup = format!("{} v {}", p.home, p.away);

        let Some(anchor) = anchor else {
            result.fail(PlacementFailure {
                source_game_id: None,
                matchup,
                start: None,
                code: "NoTemplate".into(),
                reason: "source division has no pool games to anchor on".into(),
            });
            continue;
        };
        let Some(date) = dates.map(anchor.start.date()) else {
            result.fail(PlacementFailure {
                source_game_id: Some(anchor.game_id),
                matchup,
                start: None,
                code: "NoDate".into(),
                reason: format!("no current date corresponds to {}", anchor.start.date()),
            });
            continue;
        };
        let start = date.and_time(anchor.start.time());
        match replay.place(p.id, start, None)? {
            Attempt::Placed => {
                debug!("Placed extra pairing {} anchored on source game {}", matchup, anchor.game_id);
                used.insert(p.id);
                result.placed += 1;
            }
            Attempt::Failed { code, reason } => result.fail(PlacementFailure {
                source_game_id: Some(anchor.game_id),
                matchup,
                start: Some(start),
                code,
                reason,
            }),
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Run and undo
// ---------------------------------------------------------------------------

fn open_batch_in(conn: &Connection, event_id: EventId, source_event_id: EventId) -> ScheduleResult<String> {
    db::load_event(conn, event_id)?;
    let base = format!("build_{event_id}_{}", Local::now().format("%Y%m%d_%H%M%S_%3f"));
    let mut batch_id = base.clone();
    let mut n = 1;
    loop {
        match conn.execute(
            "INSERT INTO autobuild_batches (batch_id, event_id, source_event_id) VALUES (?1, ?2, ?3)",
            params![batch_id, event_id, source_event_id],
        ) {
            Ok(_) => return Ok(batch_id),
            Err(e) if db::is_unique_violation(&e) => {
                n += 1;
                batch_id = format!("{base}_{n}");
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn source_dates_for(source: &EventStructure, division: &DivisionSummary) -> Vec<NaiveDate> {
    let mut dates = source.dates.get(&division.agegroup_id).cloned().unwrap_or_default();
    dates.extend(source.games_for(division.division_id).map(|g| g.start.date()));
    dates
}

pub(crate) fn execute(
    store: &Database,
    cfg: &EngineConfig,
    fallback: &dyn FallbackStrategy,
    event_id: EventId,
    req: &AutoBuildRequest,
) -> ScheduleResult<BuildResult> {
    let (current, source) = store.read(|tx| -> ScheduleResult<_> {
        Ok((
            analyzer::load_structure(tx, event_id)?,
            analyzer::load_structure(tx, req.source_event_id)?,
        ))
    })?;
    let report = analyzer::analyze(&current, &source, &cfg.autobuild);
    let batch_id = store.write(|tx| open_batch_in(tx, event_id, req.source_event_id))?;
    info!(
        "Auto-build {} started: event {} from source event {} (confidence {:.1})",
        batch_id, event_id, req.source_event_id, report.confidence.score
    );

    let mut result = BuildResult {
        batch_id: batch_id.clone(),
        event_id,
        source_event_id: req.source_event_id,
        games_placed: 0,
        games_failed: 0,
        divisions_scheduled: 0,
        divisions_skipped: 0,
        divisions: Vec::new(),
    };

    for m in &report.matches {
        let Some(cur) = m.current.as_ref() else {
            continue;
        };
        let skip = |reason: SkipReason| {
            let mut r = DivisionBuildResult::new(cur, m.source.as_ref(), DivisionBuildStatus::Skipped);
            r.skip_reason = Some(reason);
            r
        };

        let Some(src) = m.source.as_ref() else {
            result.divisions.push(skip(SkipReason::NoSourceDivision));
            continue;
        };
        if req.skip_divisions.contains(&cur.division_id) {
            result.divisions.push(skip(SkipReason::Requested));
            continue;
        }
        let strategy = req
            .resolutions
            .get(&cur.division_id)
            .copied()
            .unwrap_or(cfg.autobuild.default_mismatch_strategy);
        if m.kind == MatchKind::SizeMismatch && strategy == MismatchStrategy::Skip {
            result.divisions.push(skip(SkipReason::SizeMismatch {
                source_teams: src.team_count,
                current_teams: cur.team_count,
            }));
            continue;
        }

        let plan = DivisionPlan {
            current: cur,
            source: src,
            strategy,
            templates: source
                .games_for(src.division_id)
                .filter(|g| req.include_bracket || !g.is_bracket())
                .collect(),
            bracket_format: BracketFormat::from_stages(
                source.games_for(src.division_id).filter_map(|g| g.stage),
            ),
            source_dates: source_dates_for(&source, src),
            skip_if_scheduled: req.skip_already_scheduled,
        };
        let division_result = store.write(|tx| replay_division_in(tx, cfg, fallback, &batch_id, &plan))?;
        if division_result.status == DivisionBuildStatus::AlreadyScheduled {
            info!("Division {} already has games; left as is", division_result.name);
        } else if division_result.failed > 0 {
            warn!(
                "Division {}: {} placed, {} failed, {} dropped",
                division_result.name, division_result.placed, division_result.failed, division_result.dropped
            );
        } else {
            debug!(
                "Division {}: {} placed, {} dropped",
                division_result.name, division_result.placed, division_result.dropped
            );
        }
        result.divisions.push(division_result);
    }

    for d in &result.divisions {
        result.games_placed += d.placed;
        result.games_failed += d.failed;
        match d.status {
            DivisionBuildStatus::Scheduled => result.divisions_scheduled += 1,
            DivisionBuildStatus::Skipped | DivisionBuildStatus::AlreadyScheduled => {
                result.divisions_skipped += 1
            }
        }
    }
    info!(
        "Auto-build {} finished: {} games placed, {} failed, {} divisions scheduled, {} skipped",
        batch_id, result.games_placed, result.games_failed, result.divisions_scheduled, result.divisions_skipped
    );
    Ok(result)
}

/// Delete the games a batch created. Unknown or already-undone batches are
/// reported, never treated as errors.
pub(crate) fn undo_in(
    conn: &Connection,
    event_id: EventId,
    requested: Option<&str>,
) -> ScheduleResult<UndoResult> {
    db::load_event(conn, event_id)?;
    let batch: Option<(String, Option<String>)> = match requested {
        Some(id) => conn
            .query_row(
                "SELECT batch_id, undone_at FROM autobuild_batches
                 WHERE batch_id = ?1 AND event_id = ?2",
                params![id, event_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?,
        None => conn
            .query_row(
                "SELECT batch_id, undone_at FROM autobuild_batches
                 WHERE event_id = ?1 AND undone_at IS NULL
                 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                params![event_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?,
    };

    let Some((batch_id, undone_at)) = batch else {
        warn!("No auto-build batch to undo for event {event_id} ({requested:?})");
        return Ok(UndoResult {
            batch_id: requested.map(str::to_string),
            games_deleted: 0,
            already_undone: false,
        });
    };
    if undone_at.is_some() {
        info!("Auto-build {batch_id} was already undone");
        return Ok(UndoResult {
            batch_id: Some(batch_id),
            games_deleted: 0,
            already_undone: true,
        });
    }

    let games_deleted = conn.execute(
        "DELETE FROM games WHERE id IN
            (SELECT game_id FROM autobuild_batch_games WHERE batch_id = ?1)",
        params![batch_id],
    )?;
    conn.execute(
        "UPDATE autobuild_batches SET undone_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
         WHERE batch_id = ?1",
        params![batch_id],
    )?;
    info!("Undid auto-build {batch_id}: {games_deleted} games deleted");
    Ok(UndoResult {
        batch_id: Some(batch_id),
        games_deleted,
        already_undone: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_map_by_order_pairs_sorted_ranks() {
        let map = RankMap::by_order(&[1, 2, 3], &[4, 2, 7, 9]);
        assert_eq!(map.map(&TeamRef::Rank(1)), Some(TeamRef::Rank(2)));
        assert_eq!(map.map(&TeamRef::Rank(3)), Some(TeamRef::Rank(7)));
        assert_eq!(map.map(&TeamRef::Rank(5)), None);

        let seed = TeamRef::Seed {
            stage: BracketStage::Semifinal,
            seed: 1,
        };
        assert_eq!(map.map(&seed), Some(seed));
        assert_eq!(RankMap::identity().map(&TeamRef::Rank(12)), Some(TeamRef::Rank(12)));
    }

    #[test]
    fn fit_by_rank_drops_templates_for_missing_ranks() {
        // Source has 4 teams, current only 3: rank 4 has no counterpart.
        let map = RankMap::by_order(&[1, 2, 3, 4], &[1, 2, 3]);
        assert_eq!(map.map(&TeamRef::Rank(4)), None);
    }

    #[test]
    fn request_json_defaults() {
        let req: AutoBuildRequest = serde_json::from_str(r#"{"source_event_id": 3}"#).unwrap();
        assert_eq!(req, AutoBuildRequest::new(3));

        let req: AutoBuildRequest = serde_json::from_str(
            r#"{"source_event_id": 3, "resolutions": {"7": "fit-by-rank"}, "include_bracket": false}"#,
        )
        .unwrap();
        assert_eq!(req.resolutions.get(&7), Some(&MismatchStrategy::FitByRank));
        assert!(!req.include_bracket);
    }

    #[test]
    fn undo_without_batches_is_a_noop() {
        let db = Database::open(":memory:").unwrap();
        let event = db.create_event("Fall Classic").unwrap();
        let result = db.write(|tx| undo_in(tx, event, None)).unwrap();
        assert_eq!(result.games_deleted, 0);
        assert!(result.batch_id.is_none());

        let named = db.write(|tx| undo_in(tx, event, Some("build_1_x"))).unwrap();
        assert_eq!(named.batch_id.as_deref(), Some("build_1_x"));
        assert!(!named.already_undone);
    }

    #[test]
    fn batch_ids_stay_unique_within_one_millisecond() {
        let db = Database::open(":memory:").unwrap();
        let event = db.create_event("Fall Classic").unwrap();
        let a = db.write(|tx| open_batch_in(tx, event, 99)).unwrap();
        let b = db.write(|tx| open_batch_in(tx, event, 99)).unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with(&format!("build_{event}_")));
    }
}
