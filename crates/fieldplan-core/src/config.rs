// Configuration loading and parsing (config/fieldplan.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::autobuild::executor::MismatchStrategy;
use crate::pairing::BracketFormat;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub request_timeout_secs: u64,
    pub engine: EngineConfig,
}

/// Tunables consumed by the engine itself. Kept separate from the
/// infrastructure settings so tests can build one with `Default`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineConfig {
    pub placement: PlacementConfig,
    pub pairing: PairingConfig,
    pub autobuild: AutoBuildConfig,
    pub qa: QaConfig,
}

// ---------------------------------------------------------------------------
// fieldplan.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire fieldplan.toml file.
#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    database: DatabaseSection,
    #[serde(default)]
    service: ServiceSection,
    #[serde(default)]
    placement: PlacementConfig,
    #[serde(default)]
    pairing: PairingConfig,
    #[serde(default)]
    autobuild: AutoBuildConfig,
    #[serde(default)]
    qa: QaConfig,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ServiceSection {
    request_timeout_secs: u64,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlacementConfig {
    /// Length of one game. Two games sharing a team or a field overlap when
    /// their starts are closer than this.
    pub game_minutes: u32,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self { game_minutes: 60 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PairingConfig {
    /// Bracket generated alongside the round robin for new divisions.
    pub bracket: BracketFormat,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            bracket: BracketFormat::Semifinals,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AutoBuildConfig {
    pub exact_weight: f64,
    pub mismatch_weight: f64,
    pub green_threshold: f64,
    pub yellow_threshold: f64,
    pub name_similarity_threshold: f64,
    pub fallback_attempts: usize,
    pub default_mismatch_strategy: MismatchStrategy,
}

impl Default for AutoBuildConfig {
    fn default() -> Self {
        Self {
            exact_weight: 1.0,
            mismatch_weight: 0.5,
            green_threshold: 80.0,
            yellow_threshold: 50.0,
            name_similarity_threshold: 0.85,
            fallback_attempts: 6,
            default_mismatch_strategy: MismatchStrategy::Skip,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QaConfig {
    pub back_to_back_minutes: u32,
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            back_to_back_minutes: 90,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

const CONFIG_FILE: &str = "fieldplan.toml";

/// Load and validate configuration from `config/fieldplan.toml` relative to
/// `base_dir`. Does not copy defaults; prefer `load_config()`.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join(CONFIG_FILE);
    let text = read_file(&path)?;
    let config = parse_config(&text).map_err(|e| ConfigError::ParseError {
        path: path.clone(),
        source: e,
    })?;

    validate(&config)?;

    Ok(config)
}

fn parse_config(text: &str) -> Result<Config, toml::de::Error> {
    let file: ConfigFile = toml::from_str(text)?;
    Ok(Config {
        db_path: file.database.path,
        request_timeout_secs: file.service.request_timeout_secs,
        engine: EngineConfig {
            placement: file.placement,
            pairing: file.pairing,
            autobuild: file.autobuild,
            qa: file.qa,
        },
    })
}

/// Copy `defaults/fieldplan.toml` to `config/` if it is not there yet.
/// Returns the list of files that were copied.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.exists() {
        if !config_dir.exists() {
            return Err(ConfigError::DefaultsCopyError {
                message: format!(
                    "neither defaults/ nor config/ directory found in {}; \
                     run from the project root or ensure defaults/ is present",
                    base_dir.display()
                ),
            });
        }
        return Ok(vec![]);
    }

    let source = defaults_dir.join(CONFIG_FILE);
    let target = config_dir.join(CONFIG_FILE);
    if target.exists() || !source.is_file() {
        return Ok(vec![]);
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create config directory: {e}"),
    })?;
    std::fs::copy(&source, &target).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to copy {}: {e}", source.display()),
    })?;

    Ok(vec![target])
}

/// Convenience wrapper: loads config relative to the current working directory.
/// Ensures the default config file is copied before loading.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.db_path.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "database.path".into(),
            message: "must not be empty".into(),
        });
    }

    if config.request_timeout_secs == 0 {
        return Err(ConfigError::ValidationError {
            field: "service.request_timeout_secs".into(),
            message: "must be greater than 0".into(),
        });
    }

    let engine = &config.engine;
    if engine.placement.game_minutes == 0 {
        return Err(ConfigError::ValidationError {
            field: "placement.game_minutes".into(),
            message: "must be greater than 0".into(),
        });
    }

    let ab = &engine.autobuild;
    let weights: &[(&str, f64)] = &[
        ("autobuild.exact_weight", ab.exact_weight),
        ("autobuild.mismatch_weight", ab.mismatch_weight),
        ("autobuild.name_similarity_threshold", ab.name_similarity_threshold),
    ];
    for (name, val) in weights {
        if !(0.0..=1.0).contains(val) {
            return Err(ConfigError::ValidationError {
                field: name.to_string(),
                message: format!("must be between 0.0 and 1.0 inclusive, got {val}"),
            });
        }
    }

    if !(0.0..=100.0).contains(&ab.green_threshold) || !(0.0..=100.0).contains(&ab.yellow_threshold)
    {
        return Err(ConfigError::ValidationError {
            field: "autobuild.green_threshold".into(),
            message: "thresholds must be percentages between 0 and 100".into(),
        });
    }

    if ab.yellow_threshold > ab.green_threshold {
        return Err(ConfigError::ValidationError {
            field: "autobuild.yellow_threshold".into(),
            message: format!(
                "must not exceed green_threshold ({} > {})",
                ab.yellow_threshold, ab.green_threshold
            ),
        });
    }

    if ab.fallback_attempts == 0 {
        return Err(ConfigError::ValidationError {
            field: "autobuild.fallback_attempts".into(),
            message: "must be greater than 0".into(),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    /// Helper: returns the workspace root, which holds `defaults/`
    /// (works whether `cargo test` runs from the crate dir or the root).
    fn project_root() -> PathBuf {
        let cwd = std::env::current_dir().unwrap();
        if cwd.join("defaults").exists() {
            cwd
        } else if cwd.join("../../defaults").exists() {
            cwd.join("../..")
        } else {
            panic!("Cannot locate defaults/ directory from CWD {:?}", cwd);
        }
    }

    /// Write `text` as the config file of a fresh temp dir and load it.
    fn load_text(dir_name: &str, text: &str) -> Result<Config, ConfigError> {
        let tmp = std::env::temp_dir().join(dir_name);
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::write(tmp.join("config").join(CONFIG_FILE), text).unwrap();
        let result = load_config_from(&tmp);
        let _ = fs::remove_dir_all(&tmp);
        result
    }

    #[test]
    fn default_file_matches_engine_defaults() {
        let root = project_root();
        let text = fs::read_to_string(root.join("defaults").join(CONFIG_FILE)).unwrap();
        let config = parse_config(&text).expect("defaults should parse");
        validate(&config).expect("defaults should validate");

        assert_eq!(config.db_path, "fieldplan.db");
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.engine, EngineConfig::default());
    }

    #[test]
    fn ensure_config_files_copies_once() {
        let tmp = std::env::temp_dir().join("fieldplan_config_copy");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("defaults")).unwrap();
        fs::copy(
            project_root().join("defaults").join(CONFIG_FILE),
            tmp.join("defaults").join(CONFIG_FILE),
        )
        .unwrap();

        let copied = ensure_config_files(&tmp).unwrap();
        assert_eq!(copied.len(), 1);
        let copied_again = ensure_config_files(&tmp).unwrap();
        assert!(copied_again.is_empty());
        assert!(load_config_from(&tmp).is_ok());

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn missing_optional_sections_use_defaults() {
        let config = load_text(
            "fieldplan_config_minimal",
            "[database]\npath = \"x.db\"\n",
        )
        .expect("minimal config should load");
        assert_eq!(config.db_path, "x.db");
        assert_eq!(config.engine.qa.back_to_back_minutes, 90);
        assert_eq!(config.engine.pairing.bracket, BracketFormat::Semifinals);
    }

    #[test]
    fn parses_enum_values() {
        let config = load_text(
            "fieldplan_config_enums",
            "[database]\npath = \"x.db\"\n\
             [pairing]\nbracket = \"quarterfinals\"\n\
             [autobuild]\nexact_weight = 1.0\nmismatch_weight = 0.25\n\
             green_threshold = 90.0\nyellow_threshold = 40.0\n\
             name_similarity_threshold = 0.9\nfallback_attempts = 3\n\
             default_mismatch_strategy = \"fit-by-rank\"\n",
        )
        .expect("config should load");
        assert_eq!(config.engine.pairing.bracket, BracketFormat::Quarterfinals);
        assert_eq!(
            config.engine.autobuild.default_mismatch_strategy,
            MismatchStrategy::FitByRank
        );
    }

    #[test]
    fn rejects_zero_game_minutes() {
        let err = load_text(
            "fieldplan_config_zero_minutes",
            "[database]\npath = \"x.db\"\n[placement]\ngame_minutes = 0\n",
        )
        .unwrap_err();
        match err {
            ConfigError::ValidationError { field, .. } => {
                assert_eq!(field, "placement.game_minutes")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let err = load_text(
            "fieldplan_config_thresholds",
            "[database]\npath = \"x.db\"\n\
             [autobuild]\nexact_weight = 1.0\nmismatch_weight = 0.5\n\
             green_threshold = 40.0\nyellow_threshold = 60.0\n\
             name_similarity_threshold = 0.85\nfallback_attempts = 6\n\
             default_mismatch_strategy = \"skip\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn missing_file_is_reported() {
        let tmp = std::env::temp_dir().join("fieldplan_config_missing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();
        assert!(matches!(
            load_config_from(&tmp),
            Err(ConfigError::FileNotFound { .. })
        ));
        let _ = fs::remove_dir_all(&tmp);
    }
}
