// fieldplan command-line entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file, stdout carries the JSON result)
// 2. Parse the command line
// 3. Load config
// 4. Open the schedule store
// 5. Run the command on a blocking task under the request timeout
// 6. Print the result as pretty JSON

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{error, info};

use fieldplan_core::autobuild::executor::{AutoBuildRequest, MismatchStrategy};
use fieldplan_core::config;
use fieldplan_core::import;
use fieldplan_core::model::*;
use fieldplan_core::ScheduleEngine;

const USAGE: &str = "\
usage: fieldplan <command> [args]

commands:
  import <dir> <event-name>
  pairings <division-id>
  place <pairing-id> <YYYY-MM-DDTHH:MM> <field-id>
  move <game-id> <YYYY-MM-DDTHH:MM> <field-id>
  delete <game-id>
  reset-division <division-id>
  grid <agegroup-id>
  analyze <event-id> <source-event-id>
  build <event-id> <source-event-id> [--skip <division-id>]...
        [--fit-by-rank <division-id>]... [--no-bracket] [--rebuild]
  undo <event-id> [<batch-id>]
  qa <event-id>";

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Import { dir: PathBuf, event_name: String },
    Pairings { division_id: DivisionId },
    Place { pairing_id: PairingId, start: NaiveDateTime, field_id: FieldId },
    Move { game_id: GameId, start: NaiveDateTime, field_id: FieldId },
    Delete { game_id: GameId },
    ResetDivision { division_id: DivisionId },
    Grid { agegroup_id: AgegroupId },
    Analyze { event_id: EventId, source_event_id: EventId },
    Build { event_id: EventId, request: AutoBuildRequest },
    Undo { event_id: EventId, batch_id: Option<String> },
    Qa { event_id: EventId },
}

fn id(args: &[String], i: usize, what: &str) -> anyhow::Result<i64> {
    let raw = args.get(i).with_context(|| format!("missing {what}"))?;
    raw.parse()
        .with_context(|| format!("{what} must be an integer, got `{raw}`"))
}

fn datetime(args: &[String], i: usize) -> anyhow::Result<NaiveDateTime> {
    let raw = args.get(i).context("missing start time")?;
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M"))
        .with_context(|| format!("start must look like 2025-06-01T09:00, got `{raw}`"))
}

/// Parse everything after the program name.
fn parse_args(args: &[String]) -> anyhow::Result<Command> {
    let Some(name) = args.first() else {
        bail!("no command given\n\n{USAGE}");
    };
    let cmd = match name.as_str() {
        "import" => Command::Import {
            dir: PathBuf::from(args.get(1).context("missing import directory")?),
            event_name: args.get(2).context("missing event name")?.clone(),
        },
        "pairings" => Command::Pairings {
            division_id: id(args, 1, "division id")?,
        },
        "place" => Command::Place {
            pairing_id: id(args, 1, "pairing id")?,
            start: datetime(args, 2)?,
            field_id: id(args, 3, "field id")?,
        },
        "move" => Command::Move {
            game_id: id(args, 1, "game id")?,
            start: datetime(args, 2)?,
            field_id: id(args, 3, "field id")?,
        },
        "delete" => Command::Delete {
            game_id: id(args, 1, "game id")?,
        },
        "reset-division" => Command::ResetDivision {
            division_id: id(args, 1, "division id")?,
        },
        "grid" => Command::Grid {
            agegroup_id: id(args, 1, "agegroup id")?,
        },
        "analyze" => Command::Analyze {
            event_id: id(args, 1, "event id")?,
            source_event_id: id(args, 2, "source event id")?,
        },
        "build" => {
            let event_id = id(args, 1, "event id")?;
            let mut request = AutoBuildRequest::new(id(args, 2, "source event id")?);
            let mut i = 3;
            while i < args.len() {
                match args[i].as_str() {
                    "--skip" => {
                        request.skip_divisions.push(id(args, i + 1, "division id")?);
                        i += 1;
                    }
                    "--fit-by-rank" => {
                        request
                            .resolutions
                            .insert(id(args, i + 1, "division id")?, MismatchStrategy::FitByRank);
                        i += 1;
                    }
                    "--no-bracket" => request.include_bracket = false,
                    "--rebuild" => request.skip_already_scheduled = false,
                    other => bail!("unknown build option `{other}`"),
                }
                i += 1;
            }
            Command::Build { event_id, request }
        }
        "undo" => Command::Undo {
            event_id: id(args, 1, "event id")?,
            batch_id: args.get(2).cloned(),
        },
        "qa" => Command::Qa {
            event_id: id(args, 1, "event id")?,
        },
        other => bail!("unknown command `{other}`\n\n{USAGE}"),
    };
    Ok(cmd)
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

fn json(value: impl Serialize) -> anyhow::Result<serde_json::Value> {
    serde_json::to_value(value).context("failed to serialize result")
}

/// Run one command against the engine. Blocking; call from a blocking task.
fn execute(engine: &ScheduleEngine, cmd: Command) -> anyhow::Result<serde_json::Value> {
    match cmd {
        Command::Import { dir, event_name } => json(
            import::import_event(engine, &dir, &event_name)
                .with_context(|| format!("failed to import {}", dir.display()))?,
        ),
        Command::Pairings { division_id } => json(engine.generate_or_get_pairings(division_id)?),
        Command::Place {
            pairing_id,
            start,
            field_id,
        } => json(engine.place_game(pairing_id, start, field_id)?),
        Command::Move {
            game_id,
            start,
            field_id,
        } => json(engine.move_game(game_id, start, field_id)?),
        Command::Delete { game_id } => {
            engine.delete_game(game_id)?;
            json(serde_json::json!({ "deleted": game_id }))
        }
        Command::ResetDivision { division_id } => json(serde_json::json!({
            "deleted": engine.delete_all_games_for_division(division_id)?
        })),
        Command::Grid { agegroup_id } => json(engine.grid(agegroup_id)?),
        Command::Analyze {
            event_id,
            source_event_id,
        } => json(engine.analyze_auto_build(event_id, source_event_id)?),
        Command::Build { event_id, request } => json(engine.execute_auto_build(event_id, &request)?),
        Command::Undo { event_id, batch_id } => json(engine.undo_auto_build(event_id, batch_id.as_deref())?),
        Command::Qa { event_id } => json(engine.run_qa_validation(event_id)?),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing (log to file, not stdout)
    init_tracing()?;

    // 2. Parse the command line
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cmd = parse_args(&args)?;

    // 3. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!("Config loaded: database={}", config.db_path);

    // 4. Open the schedule store
    let engine = Arc::new(
        ScheduleEngine::open(&config.db_path, config.engine.clone())
            .context("failed to open schedule store")?,
    );

    // 5. Run the command under the request timeout
    info!("Running {:?}", cmd);
    let timeout = Duration::from_secs(config.request_timeout_secs);
    let task = tokio::task::spawn_blocking({
        let engine = Arc::clone(&engine);
        move || execute(&engine, cmd)
    });
    let value = match tokio::time::timeout(timeout, task).await {
        Ok(joined) => joined.context("command task panicked")?,
        Err(_) => {
            error!("Command timed out after {}s", config.request_timeout_secs);
            bail!("command timed out after {}s", config.request_timeout_secs);
        }
    };
    let value = value.inspect_err(|e| error!("Command failed: {:#}", e))?;

    // 6. Print the result
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// Initialize tracing to log to a file; stdout is reserved for results.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("fieldplan.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("fieldplan=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldplan_core::config::EngineConfig;

    fn args(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn parses_place() {
        let cmd = parse_args(&args("place 7 2025-06-01T09:00 2")).unwrap();
        assert_eq!(
            cmd,
            Command::Place {
                pairing_id: 7,
                start: NaiveDateTime::parse_from_str("2025-06-01 09:00", "%Y-%m-%d %H:%M").unwrap(),
                field_id: 2,
            }
        );
    }

    #[test]
    fn parses_build_options() {
        let cmd = parse_args(&args("build 2 1 --skip 5 --fit-by-rank 6 --no-bracket")).unwrap();
        let Command::Build { event_id, request } = cmd else {
            panic!("expected build");
        };
        assert_eq!(event_id, 2);
        assert_eq!(request.source_event_id, 1);
        assert_eq!(request.skip_divisions, vec![5]);
        assert_eq!(request.resolutions.get(&6), Some(&MismatchStrategy::FitByRank));
        assert!(!request.include_bracket);
        assert!(request.skip_already_scheduled);
    }

    #[test]
    fn undo_batch_is_optional() {
        assert_eq!(
            parse_args(&args("undo 3")).unwrap(),
            Command::Undo {
                event_id: 3,
                batch_id: None
            }
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_args(&[]).is_err());
        assert!(parse_args(&args("teleport 1")).is_err());
        assert!(parse_args(&args("qa abc")).is_err());
        assert!(parse_args(&args("place 1 tomorrow 2")).is_err());
        assert!(parse_args(&args("build 2 1 --skip")).is_err());
    }

    #[tokio::test]
    async fn executes_on_a_blocking_task() {
        let engine = Arc::new(ScheduleEngine::open(":memory:", EngineConfig::default()).unwrap());
        let event = engine.db().create_event("Summer Cup").unwrap();
        let task = tokio::task::spawn_blocking({
            let engine = Arc::clone(&engine);
            move || execute(&engine, Command::Qa { event_id: event })
        });
        let value = task.await.unwrap().unwrap();
        assert_eq!(value["event_id"], event);
        assert!(value["critical"].as_array().unwrap().is_empty());

        let missing = execute(&engine, Command::Qa { event_id: event + 100 });
        assert!(missing.is_err());
    }
}
