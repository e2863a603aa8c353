//! Match and storm configuration

use serde::{Deserialize, Serialize};

use super::geometry::Vec3;

/// How a match decides it is over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VictoryCondition {
    LastPlayerStanding,
    LastTeamStanding,
    TimeLimit,
    ScoreLimit,
    /// Decided by a predicate registered on the match engine
    Custom,
}

impl Default for VictoryCondition {
    fn default() -> Self {
        Self::LastPlayerStanding
    }
}

/// Per-match settings, immutable once the match starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchSettings {
    pub max_players: u32,
    pub min_players_to_start: u32,
    pub team_size: u32,
    pub teams_enabled: bool,

    /// Max time in lobby before a warning (seconds)
    pub lobby_time_limit: f32,
    /// Fixed delay between WaitingToStart and Warmup (seconds)
    pub waiting_to_start_delay: f32,
    /// Warmup countdown (seconds)
    pub warmup_time: f32,
    /// Hard cap on InProgress time, 0 disables (seconds)
    pub match_time_limit: f32,
    /// Time to show results before Ended (seconds)
    pub endgame_time: f32,

    pub victory_condition: VictoryCondition,
    /// Kills needed to win under `ScoreLimit`
    pub score_limit: u32,

    pub storm_enabled: bool,
    pub building_enabled: bool,
    pub friendly_fire_enabled: bool,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            max_players: 100,
            min_players_to_start: 2,
            team_size: 1,
            teams_enabled: false,
            lobby_time_limit: 300.0,
            waiting_to_start_delay: 5.0,
            warmup_time: 10.0,
            match_time_limit: 1800.0,
            endgame_time: 15.0,
            victory_condition: VictoryCondition::LastPlayerStanding,
            score_limit: 100,
            storm_enabled: true,
            building_enabled: true,
            friendly_fire_enabled: false,
        }
    }
}

impl MatchSettings {
    pub fn solos() -> Self {
        Self::default()
    }

    pub fn duos() -> Self {
        Self {
            team_size: 2,
            teams_enabled: true,
            victory_condition: VictoryCondition::LastTeamStanding,
            ..Self::default()
        }
    }

    pub fn squads() -> Self {
        Self {
            team_size: 4,
            teams_enabled: true,
            victory_condition: VictoryCondition::LastTeamStanding,
            ..Self::default()
        }
    }

    /// Two large teams, first to the kill target wins
    pub fn team_rumble() -> Self {
        Self {
            max_players: 40,
            min_players_to_start: 4,
            team_size: 20,
            teams_enabled: true,
            match_time_limit: 900.0,
            victory_condition: VictoryCondition::ScoreLimit,
            score_limit: 50,
            storm_enabled: false,
            ..Self::default()
        }
    }

    /// Look up a preset by mode name
    pub fn preset(mode: &str) -> Option<Self> {
        match mode.to_ascii_lowercase().as_str() {
            "solos" | "solo" => Some(Self::solos()),
            "duos" | "duo" => Some(Self::duos()),
            "squads" | "squad" => Some(Self::squads()),
            "team_rumble" | "rumble" => Some(Self::team_rumble()),
            _ => None,
        }
    }

    /// Reject settings the state machine cannot run with
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.max_players == 0 {
            return Err(SettingsError::Invalid("max_players must be at least 1"));
        }
        if self.min_players_to_start > self.max_players {
            return Err(SettingsError::Invalid(
                "min_players_to_start exceeds max_players",
            ));
        }
        if self.team_size == 0 {
            return Err(SettingsError::Invalid("team_size must be at least 1"));
        }
        let times = [
            self.lobby_time_limit,
            self.waiting_to_start_delay,
            self.warmup_time,
            self.match_time_limit,
            self.endgame_time,
        ];
        if times.iter().any(|t| !t.is_finite() || *t < 0.0) {
            return Err(SettingsError::Invalid("time limits must be finite and >= 0"));
        }
        if self.victory_condition == VictoryCondition::TimeLimit && self.match_time_limit <= 0.0 {
            return Err(SettingsError::Invalid(
                "time limit victory needs a positive match_time_limit",
            ));
        }
        Ok(())
    }
}

/// One configured storm phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StormPhaseData {
    pub name: String,
    /// Time before shrinking starts (seconds)
    pub wait_time: f32,
    /// Time for the circle to reach its target (seconds)
    pub shrink_time: f32,
    /// Damage per second dealt outside the safe area
    pub damage_per_second: f32,
    pub target_radius: f32,
    pub new_center: Option<Vec3>,
    /// Whether the center moves toward `new_center` this phase
    pub move_center: bool,
    pub warning: String,
}

impl Default for StormPhaseData {
    fn default() -> Self {
        Self {
            name: "Storm Phase".to_string(),
            wait_time: 60.0,
            shrink_time: 180.0,
            damage_per_second: 1.0,
            target_radius: 5000.0,
            new_center: None,
            move_center: false,
            warning: "The storm is approaching!".to_string(),
        }
    }
}

impl StormPhaseData {
    pub fn new(wait_time: f32, shrink_time: f32, damage_per_second: f32, target_radius: f32) -> Self {
        Self {
            wait_time,
            shrink_time,
            damage_per_second,
            target_radius,
            ..Self::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Move the circle center toward `center` while shrinking
    pub fn moving_to(mut self, center: Vec3) -> Self {
        self.new_center = Some(center);
        self.move_center = true;
        self
    }

    pub fn moves_center(&self) -> bool {
        self.move_center && self.new_center.is_some()
    }
}

/// The schedule installed when a storm starts without one
pub fn default_storm_phases() -> Vec<StormPhaseData> {
    vec![
        StormPhaseData::new(120.0, 240.0, 1.0, 8000.0).named("Phase 1"),
        StormPhaseData::new(90.0, 180.0, 2.0, 5000.0).named("Phase 2"),
        StormPhaseData::new(60.0, 120.0, 3.0, 2500.0).named("Phase 3"),
        StormPhaseData::new(45.0, 90.0, 5.0, 1000.0).named("Phase 4"),
        StormPhaseData::new(30.0, 60.0, 10.0, 300.0).named("Final Phase"),
    ]
}

/// Storm engine tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StormSettings {
    pub damage_enabled: bool,
    /// Seconds between damage ticks
    pub damage_tick_rate: f32,
    /// Cap on damage applied per tick
    pub max_damage_per_tick: f32,
    /// Multiply damage by `1 + phase_index * 0.5`
    pub scale_damage_with_phase: bool,
    pub show_warnings: bool,
    /// Warn this many seconds before a shrink begins
    pub warning_time: f32,
    /// Time spent in PreStorm before the first phase's wait begins
    pub pre_storm_delay: f32,
    pub initial_center: Vec3,
    pub initial_radius: f32,
}

impl Default for StormSettings {
    fn default() -> Self {
        Self {
            damage_enabled: true,
            damage_tick_rate: 1.0,
            max_damage_per_tick: 10.0,
            scale_damage_with_phase: true,
            show_warnings: true,
            warning_time: 30.0,
            pre_storm_delay: 0.0,
            initial_center: Vec3::ZERO,
            initial_radius: 10000.0,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Invalid settings: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        for mode in ["solos", "duos", "squads", "team_rumble"] {
            let settings = MatchSettings::preset(mode).expect("preset exists");
            assert_eq!(settings.validate(), Ok(()), "{mode}");
        }
        assert!(MatchSettings::preset("creative").is_none());
    }

    #[test]
    fn test_validate_rejects_min_above_max() {
        let settings = MatchSettings {
            max_players: 2,
            min_players_to_start: 3,
            ..MatchSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_time_limit_victory_needs_limit() {
        let settings = MatchSettings {
            victory_condition: VictoryCondition::TimeLimit,
            match_time_limit: 0.0,
            ..MatchSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_default_schedule_shrinks_with_rising_damage() {
        let phases = default_storm_phases();
        assert_eq!(phases.len(), 5);
        let radii: Vec<f32> = phases.iter().map(|p| p.target_radius).collect();
        assert_eq!(radii, vec![8000.0, 5000.0, 2500.0, 1000.0, 300.0]);
        assert!(phases
            .windows(2)
            .all(|w| w[0].damage_per_second < w[1].damage_per_second));
        assert_eq!(phases[0].damage_per_second, 1.0);
        assert_eq!(phases[4].damage_per_second, 10.0);
    }

    #[test]
    fn test_schedule_parses_from_json() {
        let json = r#"[{"wait_time": 10, "shrink_time": 20, "damage_per_second": 2, "target_radius": 1000}]"#;
        let phases: Vec<StormPhaseData> = serde_json::from_str(json).expect("valid schedule");
        assert_eq!(phases[0].target_radius, 1000.0);
        assert!(!phases[0].moves_center());
    }
}
