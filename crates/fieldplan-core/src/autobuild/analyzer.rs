// Auto-build analysis: match current divisions to a source event's divisions,
// classify each match and score how much of the pattern can be replayed.
//
// `analyze` is a pure function of two loaded `EventStructure`s, so repeated
// analysis of an unchanged store always yields the same report.

use std::collections::{BTreeMap, HashSet};

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::config::AutoBuildConfig;
use crate::db;
use crate::error::ScheduleResult;
use crate::model::*;

// ---------------------------------------------------------------------------
// Loaded event structure
// ---------------------------------------------------------------------------

/// One division as the analyzer sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DivisionSummary {
    pub division_id: DivisionId,
    pub agegroup_id: AgegroupId,
    pub agegroup_name: String,
    pub division_name: String,
    pub team_count: usize,
    /// Ranks of the division's active teams, ascending.
    #[serde(skip)]
    pub ranks: Vec<u32>,
    pub game_count: usize,
}

impl DivisionSummary {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.agegroup_name, self.division_name)
    }
}

/// A placed game of an event, reduced to what a replay needs.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceGame {
    pub game_id: GameId,
    pub division_id: DivisionId,
    pub start: NaiveDateTime,
    pub field_name: String,
    pub home: TeamRef,
    pub away: TeamRef,
    pub stage: Option<BracketStage>,
}

impl SourceGame {
    pub fn is_bracket(&self) -> bool {
        self.stage.is_some()
    }
}

/// Read-only projection of an event: divisions, fields, configured dates and
/// placed games. Used both for the source pattern and the current event.
#[derive(Debug, Clone)]
pub struct EventStructure {
    pub event: Event,
    pub agegroups: Vec<Agegroup>,
    /// Ordered by agegroup name, then division name.
    pub divisions: Vec<DivisionSummary>,
    pub fields: Vec<Field>,
    pub dates: BTreeMap<AgegroupId, Vec<NaiveDate>>,
    /// Ordered by start, then field, then id.
    pub games: Vec<SourceGame>,
}

impl EventStructure {
    pub fn games_for(&self, division_id: DivisionId) -> impl Iterator<Item = &SourceGame> + '_ {
        self.games.iter().filter(move |g| g.division_id == division_id)
    }

    pub fn division(&self, division_id: DivisionId) -> Option<&DivisionSummary> {
        self.divisions.iter().find(|d| d.division_id == division_id)
    }

    pub fn field_by_name(&self, name: &str) -> Option<&Field> {
        let wanted = normalize(name);
        self.fields.iter().find(|f| normalize(&f.name) == wanted)
    }
}

pub(crate) fn load_structure(conn: &Connection, event_id: EventId) -> ScheduleResult<EventStructure> {
    let event = db::load_event(conn, event_id)?;
    let agegroups = db::load_agegroups(conn, event_id)?;
    let fields = db::load_fields(conn, event_id)?;
    let teams = db::load_teams_for_event(conn, event_id)?;

    let mut dates = BTreeMap::new();
    for ag in &agegroups {
        let list: Vec<NaiveDate> = db::load_dates(conn, ag.id)?.into_iter().map(|d| d.date).collect();
        dates.insert(ag.id, list);
    }

    let mut stmt = conn.prepare(
        "SELECT g.id, g.division_id, g.start_time, f.name,
                p.home_kind, p.home_no, p.away_kind, p.away_no, p.stage
         FROM games g
         JOIN pairings p ON p.id = g.pairing_id
         JOIN fields f ON f.id = g.field_id
         WHERE g.event_id = ?1
         ORDER BY g.start_time, g.field_id, g.id",
    )?;
    let games = stmt
        .query_map(params![event_id], |row| {
            Ok(SourceGame {
                game_id: row.get(0)?,
                division_id: row.get(1)?,
                start: row.get(2)?,
                field_name: row.get(3)?,
                home: db::team_ref_at(row, 4, 5)?,
                away: db::team_ref_at(row, 6, 7)?,
                stage: db::stage_at(row, 8)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut divisions = Vec::new();
    for d in db::load_divisions_for_event(conn, event_id)? {
        let agegroup_name = agegroups
            .iter()
            .find(|a| a.id == d.agegroup_id)
            .map(|a| a.name.clone())
            .unwrap_or_default();
        let ranks: Vec<u32> = teams
            .iter()
            .filter(|t| t.division_id == d.id && t.active)
            .map(|t| t.div_rank)
            .collect();
        divisions.push(DivisionSummary {
            division_id: d.id,
            agegroup_id: d.agegroup_id,
            agegroup_name,
            division_name: d.name,
            team_count: ranks.len(),
            ranks,
            game_count: games.iter().filter(|g| g.division_id == d.id).count(),
        });
    }

    Ok(EventStructure {
        event,
        agegroups,
        divisions,
        fields,
        dates,
        games,
    })
}

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    ExactMatch,
    SizeMismatch,
    NewDivision,
    RemovedDivision,
}

/// How a current division found its source counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum MatchMethod {
    ExactName,
    Similarity { score: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DivisionMatch {
    pub kind: MatchKind,
    pub current: Option<DivisionSummary>,
    pub source: Option<DivisionSummary>,
    pub method: Option<MatchMethod>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    Green,
    Yellow,
    Red,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfidenceReport {
    /// 0-100.
    pub score: f64,
    pub level: ConfidenceLevel,
    pub exact_matches: usize,
    pub size_mismatches: usize,
    pub new_divisions: usize,
    pub removed_divisions: usize,
}

/// Non-blocking findings surfaced alongside the match list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisWarning {
    /// A field the source schedule used does not exist in the current event.
    MissingField {
        field_name: String,
        affected_games: usize,
    },
    SourceDivisionWithoutGames {
        division_id: DivisionId,
        name: String,
    },
    AgegroupWithoutDates {
        agegroup_id: AgegroupId,
        name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub event_id: EventId,
    pub source_event_id: EventId,
    pub matches: Vec<DivisionMatch>,
    pub confidence: ConfidenceReport,
    pub warnings: Vec<AnalysisWarning>,
}

impl AnalysisReport {
    /// The match entry for a current division.
    pub fn match_for(&self, division_id: DivisionId) -> Option<&DivisionMatch> {
        self.matches
            .iter()
            .find(|m| m.current.as_ref().is_some_and(|c| c.division_id == division_id))
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// Lowercase with runs of whitespace collapsed to one space.
pub fn normalize(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Pair up current and source divisions. Returns `(current index, source
/// index, method)` with each source division used at most once.
fn match_divisions(
    current: &[DivisionSummary],
    source: &[DivisionSummary],
    threshold: f64,
) -> Vec<(usize, usize, MatchMethod)> {
    let mut pairs = Vec::new();
    let mut used_current = HashSet::new();
    let mut used_source = HashSet::new();

    // Pass 1: identical names.
    for (ci, c) in current.iter().enumerate() {
        let key = (normalize(&c.agegroup_name), normalize(&c.division_name));
        if let Some(si) = source.iter().enumerate().position(|(si, s)| {
            !used_source.contains(&si)
                && (normalize(&s.agegroup_name), normalize(&s.division_name)) == key
        }) {
            used_current.insert(ci);
            used_source.insert(si);
            pairs.push((ci, si, MatchMethod::ExactName));
        }
    }

    // Pass 2: best-first greedy assignment on name similarity.
    let source_agegroups: HashSet<String> =
        source.iter().map(|s| normalize(&s.agegroup_name)).collect();
    let mut candidates = Vec::new();
    for (ci, c) in current.iter().enumerate() {
        if used_current.contains(&ci) {
            continue;
        }
        let agegroup = normalize(&c.agegroup_name);
        let same_agegroup_only = source_agegroups.contains(&agegroup);
        for (si, s) in source.iter().enumerate() {
            if used_source.contains(&si) {
                continue;
            }
            let score = if same_agegroup_only {
                if normalize(&s.agegroup_name) != agegroup {
                    continue;
                }
                strsim::jaro_winkler(&normalize(&c.division_name), &normalize(&s.division_name))
            } else {
                strsim::jaro_winkler(&normalize(&c.full_name()), &normalize(&s.full_name()))
            };
            if score >= threshold {
                candidates.push((score, ci, si));
            }
        }
    }
    candidates.sort_by(|a, b| {
        b.0.total_cmp(&a.0)
            .then_with(|| current[a.1].division_id.cmp(&current[b.1].division_id))
            .then_with(|| source[a.2].division_id.cmp(&source[b.2].division_id))
    });
    for (score, ci, si) in candidates {
        if used_current.contains(&ci) || used_source.contains(&si) {
            continue;
        }
        used_current.insert(ci);
        used_source.insert(si);
        pairs.push((ci, si, MatchMethod::Similarity { score }));
    }

    pairs
}

fn level_for(score: f64, cfg: &AutoBuildConfig) -> ConfidenceLevel {
    if score >= cfg.green_threshold {
        ConfidenceLevel::Green
    } else if score >= cfg.yellow_threshold {
        ConfidenceLevel::Yellow
    } else {
        ConfidenceLevel::Red
    }
}

/// Compare a current event against a source pattern.
pub fn analyze(current: &EventStructure, source: &EventStructure, cfg: &AutoBuildConfig) -> AnalysisReport {
    let pairs = match_divisions(&current.divisions, &source.divisions, cfg.name_similarity_threshold);

    let mut matches = Vec::new();
    let (mut exact, mut mismatched, mut new) = (0, 0, 0);
    for (ci, c) in current.divisions.iter().enumerate() {
        let found = pairs.iter().find(|(pci, _, _)| *pci == ci);
        let (kind, src, method) = match found {
            Some((_, si, method)) => {
                let s = &source.divisions[*si];
                let kind = if s.team_count == c.team_count {
                    exact += 1;
                    MatchKind::ExactMatch
                } else {
                    mismatched += 1;
                    MatchKind::SizeMismatch
                };
                (kind, Some(s.clone()), Some(*method))
            }
            None => {
                new += 1;
                (MatchKind::NewDivision, None, None)
            }
        };
        matches.push(DivisionMatch {
            kind,
            current: Some(c.clone()),
            source: src,
            method,
        });
    }

    let mut removed = 0;
    for (si, s) in source.divisions.iter().enumerate() {
        if !pairs.iter().any(|(_, psi, _)| *psi == si) {
            removed += 1;
            matches.push(DivisionMatch {
                kind: MatchKind::RemovedDivision,
                current: None,
                source: Some(s.clone()),
                method: None,
            });
        }
    }

    let total = current.divisions.len();
    let score = if total == 0 {
        0.0
    } else {
        100.0 * (exact as f64 * cfg.exact_weight + mismatched as f64 * cfg.mismatch_weight)
            / total as f64
    };
    let confidence = ConfidenceReport {
        score,
        level: level_for(score, cfg),
        exact_matches: exact,
        size_mismatches: mismatched,
        new_divisions: new,
        removed_divisions: removed,
    };

    AnalysisReport {
        event_id: current.event.id,
        source_event_id: source.event.id,
        warnings: collect_warnings(current, source, &pairs),
        matches,
        confidence,
    }
}

fn collect_warnings(
    current: &EventStructure,
    source: &EventStructure,
    pairs: &[(usize, usize, MatchMethod)],
) -> Vec<AnalysisWarning> {
    let mut warnings = Vec::new();

    let mut missing: BTreeMap<String, usize> = BTreeMap::new();
    for g in &source.games {
        if current.field_by_name(&g.field_name).is_none() {
            *missing.entry(g.field_name.clone()).or_insert(0) += 1;
        }
    }
    warnings.extend(missing.into_iter().map(|(field_name, affected_games)| {
        AnalysisWarning::MissingField {
            field_name,
            affected_games,
        }
    }));

    let mut idle: Vec<&DivisionSummary> = pairs
        .iter()
        .map(|(_, si, _)| &source.divisions[*si])
        .filter(|s| s.game_count == 0)
        .collect();
    idle.sort_by_key(|s| s.division_id);
    warnings.extend(idle.into_iter().map(|s| AnalysisWarning::SourceDivisionWithoutGames {
        division_id: s.division_id,
        name: s.full_name(),
    }));

    for ag in &current.agegroups {
        if current.dates.get(&ag.id).map_or(true, |d| d.is_empty()) {
            warnings.push(AnalysisWarning::AgegroupWithoutDates {
                agegroup_id: ag.id,
                name: ag.name.clone(),
            });
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: DivisionId, agegroup: &str, name: &str, teams: usize, games: usize) -> DivisionSummary {
        DivisionSummary {
            division_id: id,
            agegroup_id: id * 10,
            agegroup_name: agegroup.into(),
            division_name: name.into(),
            team_count: teams,
            ranks: (1..=teams as u32).collect(),
            game_count: games,
        }
    }

    fn structure(event_id: EventId, divisions: Vec<DivisionSummary>) -> EventStructure {
        EventStructure {
            event: Event {
                id: event_id,
                name: format!("Event {event_id}"),
            },
            agegroups: Vec::new(),
            divisions,
            fields: Vec::new(),
            dates: BTreeMap::new(),
            games: Vec::new(),
        }
    }

    #[test]
    fn classifies_exact_mismatch_new_and_removed() {
        let current = structure(
            2,
            vec![
                summary(1, "12U", "Gold", 10, 0),
                summary(2, "12U", "Silver", 6, 0),
                summary(3, "14U", "Platinum", 4, 0),
            ],
        );
        let source = structure(
            1,
            vec![
                summary(11, "12U", "Gold", 8, 16),
                summary(12, "12U ", "silver", 6, 15),
                summary(13, "16U", "Red", 4, 6),
            ],
        );
        let report = analyze(&current, &source, &AutoBuildConfig::default());

        assert_eq!(report.match_for(1).unwrap().kind, MatchKind::SizeMismatch);
        assert_eq!(report.match_for(2).unwrap().kind, MatchKind::ExactMatch);
        assert_eq!(report.match_for(3).unwrap().kind, MatchKind::NewDivision);
        let removed: Vec<_> = report
            .matches
            .iter()
            .filter(|m| m.kind == MatchKind::RemovedDivision)
            .collect();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].source.as_ref().unwrap().division_id, 13);

        // (1 * 1.0 + 1 * 0.5) / 3
        assert!((report.confidence.score - 50.0).abs() < 1e-9);
        assert_eq!(report.confidence.level, ConfidenceLevel::Yellow);
    }

    #[test]
    fn similar_names_match_within_agegroup() {
        let current = structure(2, vec![summary(1, "10U", "Gold Div", 4, 0)]);
        let source = structure(
            1,
            vec![summary(11, "10U", "Gold Division", 4, 6), summary(12, "12U", "Gold Div", 4, 6)],
        );
        let report = analyze(&current, &source, &AutoBuildConfig::default());
        let m = report.match_for(1).unwrap();
        assert_eq!(m.kind, MatchKind::ExactMatch);
        assert_eq!(m.source.as_ref().unwrap().division_id, 11);
        assert!(matches!(m.method, Some(MatchMethod::Similarity { score }) if score >= 0.85));
    }

    #[test]
    fn each_source_division_used_once() {
        let current = structure(
            2,
            vec![summary(1, "10U", "Blue", 4, 0), summary(2, "10U", "Blue", 4, 0)],
        );
        let source = structure(1, vec![summary(11, "10U", "Blue", 4, 6)]);
        let report = analyze(&current, &source, &AutoBuildConfig::default());
        assert_eq!(report.match_for(1).unwrap().kind, MatchKind::ExactMatch);
        assert_eq!(report.match_for(2).unwrap().kind, MatchKind::NewDivision);
    }

    #[test]
    fn dissimilar_names_stay_unmatched() {
        let current = structure(2, vec![summary(1, "10U", "Gold", 4, 0)]);
        let source = structure(1, vec![summary(11, "10U", "Recreational", 4, 6)]);
        let report = analyze(&current, &source, &AutoBuildConfig::default());
        assert_eq!(report.match_for(1).unwrap().kind, MatchKind::NewDivision);
        assert_eq!(report.confidence.score, 0.0);
        assert_eq!(report.confidence.level, ConfidenceLevel::Red);
    }

    #[test]
    fn empty_current_event_scores_zero() {
        let report = analyze(
            &structure(2, vec![]),
            &structure(1, vec![summary(11, "10U", "Blue", 4, 6)]),
            &AutoBuildConfig::default(),
        );
        assert_eq!(report.confidence.score, 0.0);
        assert_eq!(report.confidence.removed_divisions, 1);
    }

    #[test]
    fn warns_on_missing_fields_and_idle_sources() {
        let mut current = structure(2, vec![summary(1, "10U", "Blue", 4, 0)]);
        current.fields.push(Field {
            id: 1,
            event_id: 2,
            name: "Field A".into(),
            location: None,
        });
        current.agegroups.push(Agegroup {
            id: 10,
            event_id: 2,
            name: "10U".into(),
            champions_by_division: true,
        });

        let mut source = structure(1, vec![summary(11, "10U", "Blue", 4, 0)]);
        let start = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap().and_hms_opt(9, 0, 0).unwrap();
        for (i, field) in ["field a", "Field Z", "Field Z"].iter().enumerate() {
            source.games.push(SourceGame {
                game_id: i as i64 + 1,
                division_id: 99,
                start,
                field_name: field.to_string(),
                home: TeamRef::Rank(1),
                away: TeamRef::Rank(2),
                stage: None,
            });
        }

        let report = analyze(&current, &source, &AutoBuildConfig::default());
        assert_eq!(
            report.warnings,
            vec![
                AnalysisWarning::MissingField {
                    field_name: "Field Z".into(),
                    affected_games: 2,
                },
                AnalysisWarning::SourceDivisionWithoutGames {
                    division_id: 11,
                    name: "10U Blue".into(),
                },
                AnalysisWarning::AgegroupWithoutDates {
                    agegroup_id: 10,
                    name: "10U".into(),
                },
            ]
        );
    }

    #[test]
    fn analysis_is_repeatable() {
        let current = structure(2, vec![summary(1, "12U", "Gold", 10, 0), summary(2, "12U", "Silvr", 6, 0)]);
        let source = structure(1, vec![summary(11, "12U", "Gold", 8, 16), summary(12, "12U", "Silver", 6, 15)]);
        let cfg = AutoBuildConfig::default();
        assert_eq!(analyze(&current, &source, &cfg), analyze(&current, &source, &cfg));
    }
}
