//! Configuration module - environment variable parsing

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::game::settings::{MatchSettings, StormPhaseData, StormSettings};
use crate::util::time::DEFAULT_SIMULATION_TPS;

/// Driver configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit JSON log lines instead of the human format
    pub log_json: bool,

    /// Simulation ticks per second
    pub tick_rate: u32,
    /// Matches to run side by side
    pub match_count: usize,
    /// Bots per match
    pub bot_count: usize,
    /// Mode preset name (solos, duos, squads, team_rumble)
    pub game_mode: String,
    /// Overrides the preset's minimum ready players
    pub min_players: Option<u32>,
    /// Base seed for bot placement and behavior; random when unset
    pub match_seed: Option<u64>,
    /// Radius of the area bots spawn in
    pub map_radius: f32,
    /// Health every player spawns with
    pub max_health: f32,

    pub warmup_time: Option<f32>,
    pub endgame_time: Option<f32>,

    /// JSON file holding an array of storm phases
    pub storm_schedule_path: Option<PathBuf>,
    pub storm_damage_tick_rate: Option<f32>,
    pub storm_max_damage: Option<f32>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self {
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_json: env::var("LOG_FORMAT")
                .map(|f| f.eq_ignore_ascii_case("json"))
                .unwrap_or(false),

            tick_rate: parse_or("TICK_RATE", DEFAULT_SIMULATION_TPS)?,
            match_count: parse_or("MATCH_COUNT", 1)?,
            bot_count: parse_or("BOT_COUNT", 24)?,
            game_mode: env::var("GAME_MODE").unwrap_or_else(|_| "solos".to_string()),
            min_players: parse_opt("MIN_PLAYERS")?,
            match_seed: parse_opt("MATCH_SEED")?,
            map_radius: parse_or("MAP_RADIUS", 9000.0)?,
            max_health: parse_or("MAX_HEALTH", 100.0)?,

            warmup_time: parse_opt("WARMUP_TIME")?,
            endgame_time: parse_opt("ENDGAME_TIME")?,

            storm_schedule_path: env::var("STORM_SCHEDULE_PATH").ok().map(PathBuf::from),
            storm_damage_tick_rate: parse_opt("STORM_DAMAGE_TICK_RATE")?,
            storm_max_damage: parse_opt("STORM_MAX_DAMAGE")?,
        }
        .validated()
    }

    fn validated(self) -> Result<Self, ConfigError> {
        if self.tick_rate == 0 {
            return Err(ConfigError::Invalid {
                key: "TICK_RATE",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.match_count == 0 {
            return Err(ConfigError::Invalid {
                key: "MATCH_COUNT",
                reason: "must be at least 1".to_string(),
            });
        }
        if MatchSettings::preset(&self.game_mode).is_none() {
            return Err(ConfigError::UnknownMode(self.game_mode));
        }
        if !(self.map_radius.is_finite() && self.map_radius > 0.0) {
            return Err(ConfigError::Invalid {
                key: "MAP_RADIUS",
                reason: "must be positive".to_string(),
            });
        }
        Ok(self)
    }

    /// Mode preset with the environment overrides applied
    pub fn match_settings(&self) -> Result<MatchSettings, ConfigError> {
        let mut settings = MatchSettings::preset(&self.game_mode)
            .ok_or_else(|| ConfigError::UnknownMode(self.game_mode.clone()))?;
        if let Some(min) = self.min_players {
            settings.min_players_to_start = min;
        }
        if let Some(warmup) = self.warmup_time {
            settings.warmup_time = warmup;
        }
        if let Some(endgame) = self.endgame_time {
            settings.endgame_time = endgame;
        }
        settings.max_players = settings.max_players.max(self.bot_count as u32);
        settings.validate().map_err(|e| ConfigError::Invalid {
            key: "GAME_MODE",
            reason: e.to_string(),
        })?;
        Ok(settings)
    }

    pub fn storm_settings(&self) -> StormSettings {
        let mut settings = StormSettings {
            initial_radius: self.map_radius * 1.1,
            ..StormSettings::default()
        };
        if let Some(rate) = self.storm_damage_tick_rate {
            settings.damage_tick_rate = rate;
        }
        if let Some(max) = self.storm_max_damage {
            settings.max_damage_per_tick = max;
        }
        settings
    }

    /// Phases from `STORM_SCHEDULE_PATH`, or `None` to use the default schedule
    pub fn storm_schedule(&self) -> Result<Option<Vec<StormPhaseData>>, ConfigError> {
        self.storm_schedule_path
            .as_deref()
            .map(load_storm_schedule)
            .transpose()
    }
}

/// Read a JSON array of storm phases
pub fn load_storm_schedule(path: &Path) -> Result<Vec<StormPhaseData>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Schedule {
        path: path.to_path_buf(),
        reason: source.to_string(),
    })?;
    parse_storm_schedule(&raw).map_err(|reason| ConfigError::Schedule {
        path: path.to_path_buf(),
        reason,
    })
}

fn parse_storm_schedule(raw: &str) -> Result<Vec<StormPhaseData>, String> {
    let phases: Vec<StormPhaseData> = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    if phases.is_empty() {
        return Err("schedule has no phases".to_string());
    }
    if let Some(bad) = phases
        .iter()
        .position(|p| p.wait_time < 0.0 || p.shrink_time < 0.0 || p.target_radius < 0.0)
    {
        return Err(format!("phase {bad} has a negative time or radius"));
    }
    Ok(phases)
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    Ok(parse_opt(key)?.unwrap_or(default))
}

fn parse_opt<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => parse_value(key, &raw).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_value<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        reason: format!("{raw:?}: {e}"),
    })
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("Unknown game mode: {0}")]
    UnknownMode(String),

    #[error("Failed to load storm schedule {path:?}: {reason}")]
    Schedule { path: PathBuf, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(mode: &str) -> Config {
        Config {
            log_level: "info".to_string(),
            log_json: false,
            tick_rate: 30,
            match_count: 1,
            bot_count: 10,
            game_mode: mode.to_string(),
            min_players: None,
            match_seed: Some(1),
            map_radius: 1000.0,
            max_health: 100.0,
            warmup_time: None,
            endgame_time: None,
            storm_schedule_path: None,
            storm_damage_tick_rate: None,
            storm_max_damage: None,
        }
    }

    #[test]
    fn test_parse_value_reports_key() {
        let err = parse_value::<u32>("TICK_RATE", "fast").unwrap_err();
        assert!(err.to_string().contains("TICK_RATE"));
        assert_eq!(parse_value::<f32>("MAP_RADIUS", " 250.5 ").unwrap(), 250.5);
    }

    #[test]
    fn test_overrides_apply_to_preset() {
        let mut cfg = config("duos");
        cfg.min_players = Some(4);
        cfg.warmup_time = Some(3.0);
        cfg.bot_count = 150;

        let settings = cfg.match_settings().unwrap();
        assert_eq!(settings.team_size, 2);
        assert_eq!(settings.min_players_to_start, 4);
        assert_eq!(settings.warmup_time, 3.0);
        assert_eq!(settings.max_players, 150);
    }

    #[test]
    fn test_unknown_mode_rejected() {
        assert!(matches!(
            config("creative").validated(),
            Err(ConfigError::UnknownMode(_))
        ));
    }

    #[test]
    fn test_storm_overrides() {
        let mut cfg = config("solos");
        cfg.storm_max_damage = Some(25.0);
        let storm = cfg.storm_settings();
        assert_eq!(storm.max_damage_per_tick, 25.0);
        assert_eq!(storm.damage_tick_rate, 1.0);
        assert!(storm.initial_radius > cfg.map_radius);
    }

    #[test]
    fn test_schedule_parsing() {
        let phases = parse_storm_schedule(
            r#"[{"name": "Opening", "wait_time": 30, "shrink_time": 60, "target_radius": 4000},
                {"wait_time": 20, "shrink_time": 30, "target_radius": 900, "damage_per_second": 4,
                 "new_center": {"x": 100, "y": 50, "z": 0}, "move_center": true}]"#,
        )
        .unwrap();
        assert_eq!(phases.len(), 2);
        assert_eq!(phases[0].name, "Opening");
        assert!(phases[1].moves_center());

        assert!(parse_storm_schedule("[]").is_err());
        assert!(parse_storm_schedule(r#"[{"wait_time": -1}]"#).is_err());
        assert!(parse_storm_schedule("not json").is_err());
    }

    #[test]
    fn test_missing_schedule_file() {
        let err = load_storm_schedule(Path::new("/nonexistent/storm.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Schedule { .. }));
    }
}
