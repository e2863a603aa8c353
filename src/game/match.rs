//! Match engine: lifecycle state machine, lobby, elimination ledger and results
//!
//! Players live in the [`PlayerDirectory`]; the engine only tracks who joined
//! the lobby, who is ready, and the ordered list of eliminations. Storm
//! control goes one way, match to safezone, so the two engine locks are
//! always taken in the same order.

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::util::time::SimClock;

use super::directory::PlayerDirectory;
use super::events::{MatchEvents, SubscriberResult};
use super::results::{
    assign_placements, sort_by_placement, Elimination, EliminationRecord, MatchResult, Survivor,
};
use super::safezone::SafezoneEngine;
use super::settings::{MatchSettings, SettingsError, VictoryCondition};
use super::TeamId;

/// Match lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    None,
    Lobby,
    WaitingToStart,
    Warmup,
    InProgress,
    Ending,
    Ended,
    Aborted,
}

impl MatchPhase {
    /// Lobby through InProgress: the match can still be ended or joined in some way
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            Self::Lobby | Self::WaitingToStart | Self::Warmup | Self::InProgress
        )
    }

    /// Any phase a new `start_match` must not interrupt
    pub fn is_active(&self) -> bool {
        self.is_running() || *self == Self::Ending
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Ended | Self::Aborted)
    }

    /// Lobby membership can change
    pub fn accepts_joins(&self) -> bool {
        matches!(self, Self::Lobby | Self::WaitingToStart | Self::Warmup)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Lobby => "lobby",
            Self::WaitingToStart => "waiting_to_start",
            Self::Warmup => "warmup",
            Self::InProgress => "in_progress",
            Self::Ending => "ending",
            Self::Ended => "ended",
            Self::Aborted => "aborted",
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MatchError {
    #[error("A match is already active ({0:?})")]
    AlreadyActive(MatchPhase),
    #[error(transparent)]
    InvalidSettings(#[from] SettingsError),
    #[error("No active match")]
    NoActiveMatch,
    #[error("Lobby is closed in phase {0:?}")]
    JoinClosed(MatchPhase),
    #[error("Lobby is full ({0} players)")]
    LobbyFull(u32),
    #[error("Player {0} already joined")]
    AlreadyJoined(Uuid),
    #[error("Player {0} is not in the lobby")]
    UnknownPlayer(Uuid),
}

/// Who won, as decided by a victory check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VictoryOutcome {
    pub winner: Option<Uuid>,
    pub winning_team: Option<TeamId>,
}

/// Read-only view handed to a custom victory predicate
pub struct VictoryContext<'a> {
    pub alive_players: &'a [Uuid],
    pub eliminations: &'a [EliminationRecord],
    pub directory: &'a dyn PlayerDirectory,
    /// Seconds since the match went live
    pub live_time: f32,
    pub settings: &'a MatchSettings,
}

pub type CustomVictoryFn =
    dyn Fn(&VictoryContext<'_>) -> Option<VictoryOutcome> + Send + Sync;

/// Point-in-time view of the match
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchInfo {
    pub match_id: Uuid,
    pub phase: MatchPhase,
    pub settings: MatchSettings,
    pub paused: bool,
    pub match_time: f32,
    pub state_time: f32,
    pub time_remaining: f32,
    pub starting_player_count: u32,
    pub current_player_count: u32,
    pub players_ready: u32,
    pub alive_players: u32,
    pub total_eliminations: u32,
    pub winner: Option<Uuid>,
    pub winning_team: Option<TeamId>,
}

struct MatchInner {
    match_id: Uuid,
    phase: MatchPhase,
    settings: MatchSettings,
    clock: SimClock,
    paused: bool,
    match_start_time: f32,
    state_start_time: f32,
    live_start_time: Option<f32>,
    starting_player_count: u32,
    lobby: BTreeSet<Uuid>,
    ready: HashSet<Uuid>,
    eliminations: Vec<EliminationRecord>,
    eliminated: HashSet<Uuid>,
    last_live_placement: Option<u32>,
    results: Vec<MatchResult>,
    winner: Option<Uuid>,
    winning_team: Option<TeamId>,
    bonus_time: f32,
    lobby_timeout_warned: bool,
    last_countdown: Option<u32>,
    custom_victory: Option<Box<CustomVictoryFn>>,
    directory: Arc<dyn PlayerDirectory>,
    safezone: Arc<SafezoneEngine>,
    events: MatchEvents,
}

/// State machine for one match. All state sits behind a single lock; the
/// directory is read and the safezone engine driven while it is held.
pub struct MatchEngine {
    id: Uuid,
    inner: Mutex<MatchInner>,
}

impl MatchEngine {
    pub fn new(directory: Arc<dyn PlayerDirectory>, safezone: Arc<SafezoneEngine>) -> Self {
        Self::with_id(Uuid::new_v4(), directory, safezone)
    }

    pub fn with_id(
        id: Uuid,
        directory: Arc<dyn PlayerDirectory>,
        safezone: Arc<SafezoneEngine>,
    ) -> Self {
        Self {
            id,
            inner: Mutex::new(MatchInner {
                match_id: id,
                phase: MatchPhase::None,
                settings: MatchSettings::default(),
                clock: SimClock::new(),
                paused: false,
                match_start_time: 0.0,
                state_start_time: 0.0,
                live_start_time: None,
                starting_player_count: 0,
                lobby: BTreeSet::new(),
                ready: HashSet::new(),
                eliminations: Vec::new(),
                eliminated: HashSet::new(),
                last_live_placement: None,
                results: Vec::new(),
                winner: None,
                winning_team: None,
                bonus_time: 0.0,
                lobby_timeout_warned: false,
                last_countdown: None,
                custom_victory: None,
                directory,
                safezone,
                events: MatchEvents::default(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn safezone(&self) -> Arc<SafezoneEngine> {
        self.inner.lock().safezone.clone()
    }

    // ---- lifecycle ----

    /// Validate settings, clear every per-match field and open the lobby
    pub fn start_match(&self, settings: MatchSettings) -> Result<(), MatchError> {
        settings.validate()?;
        let mut inner = self.inner.lock();
        if inner.phase.is_active() {
            warn!(match_id = %self.id, phase = inner.phase.as_str(), "Start rejected, match already active");
            return Err(MatchError::AlreadyActive(inner.phase));
        }
        inner.settings = settings;
        inner.open_lobby();
        Ok(())
    }

    /// Stop everything and reopen the lobby with the current settings
    pub fn restart_match(&self) -> Result<(), MatchError> {
        let mut inner = self.inner.lock();
        if inner.phase == MatchPhase::None {
            return Err(MatchError::NoActiveMatch);
        }
        info!(match_id = %self.id, from = inner.phase.as_str(), "Restarting match");
        inner.safezone.stop_storm();
        inner.open_lobby();
        Ok(())
    }

    /// Back to `None`, keeping settings and subscribers
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.set_match_state(MatchPhase::None);
        inner.clear_match_state();
    }

    /// Operator override: leave the lobby without the readiness quorum
    pub fn force_start(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.phase != MatchPhase::Lobby {
            return false;
        }
        info!(
            match_id = %self.id,
            players = inner.lobby.len(),
            ready = inner.ready.len(),
            "Match force-started"
        );
        inner.set_match_state(MatchPhase::WaitingToStart)
    }

    /// Direct transition for operators and tests. Returns false if already in `phase`.
    pub fn set_match_state(&self, phase: MatchPhase) -> bool {
        self.inner.lock().set_match_state(phase)
    }

    /// End the match with the given winner. Only the first call while the
    /// match is running has any effect.
    pub fn end_match(&self, winner: Option<Uuid>, winning_team: Option<TeamId>) -> bool {
        self.inner.lock().end_match(winner, winning_team)
    }

    /// Abort from any active phase. Stops the storm; Ending is never entered.
    pub fn abort_match(&self, reason: &str) -> bool {
        let mut inner = self.inner.lock();
        if !inner.phase.is_active() {
            return false;
        }
        warn!(match_id = %self.id, phase = inner.phase.as_str(), reason, "Match aborted");
        inner.set_match_state(MatchPhase::Aborted)
    }

    /// Freeze phase timers and the storm. Update calls are ignored until resumed.
    pub fn pause_match(&self) -> bool {
        let mut inner = self.inner.lock();
        if !inner.phase.is_active() || inner.paused {
            return false;
        }
        inner.paused = true;
        inner.safezone.pause_storm();
        info!(match_id = %self.id, phase = inner.phase.as_str(), "Match paused");
        true
    }

    pub fn resume_match(&self) -> bool {
        let mut inner = self.inner.lock();
        if !inner.paused {
            return false;
        }
        inner.paused = false;
        inner.safezone.resume_storm();
        info!(match_id = %self.id, phase = inner.phase.as_str(), "Match resumed");
        true
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    /// Change the hard cap on live time; 0 disables it
    pub fn set_match_time_limit(&self, seconds: f32) {
        let mut inner = self.inner.lock();
        inner.settings.match_time_limit = seconds.max(0.0);
        info!(match_id = %self.id, limit = inner.settings.match_time_limit, "Match time limit changed");
    }

    /// Extend the live time cap
    pub fn add_bonus_time(&self, seconds: f32) {
        if !seconds.is_finite() || seconds <= 0.0 {
            return;
        }
        let mut inner = self.inner.lock();
        inner.bonus_time += seconds;
        info!(match_id = %self.id, bonus = inner.bonus_time, "Bonus time added");
    }

    /// Predicate used by `VictoryCondition::Custom`
    pub fn set_custom_victory_condition<F>(&self, predicate: F)
    where
        F: Fn(&VictoryContext<'_>) -> Option<VictoryOutcome> + Send + Sync + 'static,
    {
        self.inner.lock().custom_victory = Some(Box::new(predicate));
    }

    // ---- lobby ----

    pub fn player_join_lobby(&self, player: Uuid) -> Result<(), MatchError> {
        let mut inner = self.inner.lock();
        if !inner.phase.is_active() {
            return Err(MatchError::NoActiveMatch);
        }
        if !inner.phase.accepts_joins() {
            return Err(MatchError::JoinClosed(inner.phase));
        }
        if inner.lobby.contains(&player) {
            return Err(MatchError::AlreadyJoined(player));
        }
        if inner.lobby.len() as u32 >= inner.settings.max_players {
            return Err(MatchError::LobbyFull(inner.settings.max_players));
        }

        inner.lobby.insert(player);
        info!(
            match_id = %self.id,
            player_id = %player,
            players = inner.lobby.len(),
            "Player joined lobby"
        );
        inner.try_leave_lobby();
        Ok(())
    }

    pub fn player_leave_lobby(&self, player: Uuid) -> Result<(), MatchError> {
        let mut inner = self.inner.lock();
        if !inner.phase.is_active() {
            return Err(MatchError::NoActiveMatch);
        }
        if !inner.lobby.remove(&player) {
            return Err(MatchError::UnknownPlayer(player));
        }
        inner.ready.remove(&player);
        info!(
            match_id = %self.id,
            player_id = %player,
            players = inner.lobby.len(),
            "Player left lobby"
        );
        Ok(())
    }

    pub fn player_ready_up(&self, player: Uuid, ready: bool) -> Result<(), MatchError> {
        let mut inner = self.inner.lock();
        if !inner.phase.is_active() {
            return Err(MatchError::NoActiveMatch);
        }
        if !inner.lobby.contains(&player) {
            return Err(MatchError::UnknownPlayer(player));
        }
        let changed = if ready {
            inner.ready.insert(player)
        } else {
            inner.ready.remove(&player)
        };
        if changed {
            debug!(match_id = %self.id, player_id = %player, ready, "Player readiness changed");
        }
        inner.try_leave_lobby();
        Ok(())
    }

    pub fn is_player_ready(&self, player: Uuid) -> bool {
        self.inner.lock().ready.contains(&player)
    }

    pub fn is_in_lobby(&self, player: Uuid) -> bool {
        self.inner.lock().lobby.contains(&player)
    }

    /// Enough players joined and enough of them are ready
    pub fn can_start_match(&self) -> bool {
        self.inner.lock().can_start()
    }

    // ---- simulation ----

    /// Advance the match clock by `dt` seconds and run the current phase's logic
    pub fn update(&self, dt: f32) {
        let mut inner = self.inner.lock();
        if !inner.phase.is_active() || inner.paused {
            return;
        }
        inner.clock.advance(dt);
        let state_time = inner.state_time();
        let phase = inner.phase;

        match phase {
            MatchPhase::Lobby => inner.update_lobby(state_time),
            MatchPhase::WaitingToStart => {
                if state_time >= inner.settings.waiting_to_start_delay {
                    inner.set_match_state(MatchPhase::Warmup);
                }
            }
            MatchPhase::Warmup => inner.update_warmup(state_time),
            MatchPhase::InProgress => {
                inner.check_victory_conditions();
            }
            MatchPhase::Ending => {
                if state_time >= inner.settings.endgame_time {
                    inner.set_match_state(MatchPhase::Ended);
                }
            }
            _ => {}
        }
    }

    /// Record an elimination reported by the player directory. Returns the
    /// placement assigned, or `None` if the report was ignored.
    pub fn on_player_eliminated(&self, elimination: Elimination) -> Option<u32> {
        self.inner.lock().record_elimination(elimination)
    }

    /// Run the victory check now. Returns true if it ended the match.
    pub fn check_victory_conditions(&self) -> bool {
        self.inner.lock().check_victory_conditions()
    }

    // ---- queries ----

    pub fn phase(&self) -> MatchPhase {
        self.inner.lock().phase
    }

    pub fn settings(&self) -> MatchSettings {
        self.inner.lock().settings.clone()
    }

    pub fn snapshot(&self) -> MatchInfo {
        let inner = self.inner.lock();
        MatchInfo {
            match_id: self.id,
            phase: inner.phase,
            settings: inner.settings.clone(),
            paused: inner.paused,
            match_time: inner.match_time(),
            state_time: inner.state_time(),
            time_remaining: inner.time_remaining(),
            starting_player_count: inner.starting_player_count,
            current_player_count: inner.lobby.len() as u32,
            players_ready: inner.ready.len() as u32,
            alive_players: inner.alive_players().len() as u32,
            total_eliminations: inner.eliminations.len() as u32,
            winner: inner.winner,
            winning_team: inner.winning_team,
        }
    }

    /// Seconds left in the current timed phase; 0 for untimed phases
    pub fn time_remaining(&self) -> f32 {
        self.inner.lock().time_remaining()
    }

    /// Seconds since the match was started
    pub fn match_time(&self) -> f32 {
        self.inner.lock().match_time()
    }

    /// Seconds spent in the current phase
    pub fn state_time(&self) -> f32 {
        self.inner.lock().state_time()
    }

    pub fn current_player_count(&self) -> u32 {
        self.inner.lock().lobby.len() as u32
    }

    pub fn players_ready(&self) -> u32 {
        self.inner.lock().ready.len() as u32
    }

    pub fn winner(&self) -> Option<Uuid> {
        self.inner.lock().winner
    }

    pub fn winning_team(&self) -> Option<TeamId> {
        self.inner.lock().winning_team
    }

    /// Final results sorted by placement. Empty until the match ends.
    pub fn results(&self) -> Vec<MatchResult> {
        self.inner.lock().results.clone()
    }

    pub fn player_result(&self, player: Uuid) -> Option<MatchResult> {
        self.inner
            .lock()
            .results
            .iter()
            .find(|r| r.player == player)
            .cloned()
    }

    /// Final placement if results exist, otherwise the live one: the ledger
    /// placement for eliminated players and 1 for anyone still alive.
    pub fn player_placement(&self, player: Uuid) -> Option<u32> {
        let inner = self.inner.lock();
        if let Some(result) = inner.results.iter().find(|r| r.player == player) {
            return Some(result.placement);
        }
        if let Some(record) = inner.eliminations.iter().find(|r| r.player == player) {
            return Some(record.placement);
        }
        inner.is_alive(player).then_some(1)
    }

    pub fn elimination_history(&self) -> Vec<EliminationRecord> {
        self.inner.lock().eliminations.clone()
    }

    pub fn total_eliminations(&self) -> usize {
        self.inner.lock().eliminations.len()
    }

    /// Alive per the directory and not yet in the ledger
    pub fn alive_players(&self) -> Vec<Uuid> {
        self.inner.lock().alive_players()
    }

    pub fn alive_player_count(&self) -> usize {
        self.inner.lock().alive_players().len()
    }

    /// Distinct teams with at least one alive member; teamless players count alone
    pub fn alive_teams(&self) -> usize {
        let inner = self.inner.lock();
        let alive = inner.alive_players();
        team_keys(inner.directory.as_ref(), &alive).len()
    }

    /// Player with the most kills so far, ties broken by damage dealt then id
    pub fn top_fragger(&self) -> Option<Uuid> {
        let inner = self.inner.lock();
        if !inner.results.is_empty() {
            return super::results::top_fragger(&inner.results).map(|r| r.player);
        }
        let directory = inner.directory.as_ref();
        directory
            .all_players()
            .into_iter()
            .map(|p| (p, directory.combat_stats(p)))
            .filter(|(_, stats)| stats.kills > 0)
            .max_by(|(a, sa), (b, sb)| {
                sa.kills
                    .cmp(&sb.kills)
                    .then_with(|| sa.damage_dealt.total_cmp(&sb.damage_dealt))
                    .then_with(|| b.cmp(a))
            })
            .map(|(p, _)| p)
    }

    /// Mean survival time over final results; 0 before the match ends
    pub fn average_time_alive(&self) -> f32 {
        let inner = self.inner.lock();
        if inner.results.is_empty() {
            return 0.0;
        }
        let total: f32 = inner.results.iter().map(|r| r.survival_time).sum();
        total / inner.results.len() as f32
    }

    // ---- subscriptions ----
    // Callbacks run under the engine lock and must not call back into this engine.

    pub fn on_state_changed<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(MatchPhase, MatchPhase) -> SubscriberResult + Send + Sync + 'static,
    {
        self.inner.lock().events.state_changed.register(name, Box::new(callback));
    }

    pub fn on_match_started<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(&MatchSettings) -> SubscriberResult + Send + Sync + 'static,
    {
        self.inner.lock().events.match_started.register(name, Box::new(callback));
    }

    /// Fired once per match with the winner and results sorted by placement
    pub fn on_match_ended<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(Option<Uuid>, &[MatchResult]) -> SubscriberResult + Send + Sync + 'static,
    {
        self.inner.lock().events.match_ended.register(name, Box::new(callback));
    }

    /// Fired with (player, placement) for every accepted elimination
    pub fn on_player_eliminated_event<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(Uuid, u32) -> SubscriberResult + Send + Sync + 'static,
    {
        self.inner.lock().events.player_eliminated.register(name, Box::new(callback));
    }

    /// Whole seconds left in warmup, once per second
    pub fn on_countdown<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(u32) -> SubscriberResult + Send + Sync + 'static,
    {
        self.inner.lock().events.countdown.register(name, Box::new(callback));
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.inner.lock().events.unregister(name)
    }
}

impl MatchInner {
    fn state_time(&self) -> f32 {
        self.clock.since(self.state_start_time)
    }

    fn match_time(&self) -> f32 {
        if self.phase == MatchPhase::None {
            return 0.0;
        }
        self.clock.since(self.match_start_time)
    }

    fn live_time(&self) -> f32 {
        self.live_start_time
            .map(|start| self.clock.since(start))
            .unwrap_or(0.0)
    }

    fn time_limit(&self) -> Option<f32> {
        (self.settings.match_time_limit > 0.0)
            .then(|| self.settings.match_time_limit + self.bonus_time)
    }

    fn time_remaining(&self) -> f32 {
        let state_time = self.state_time();
        match self.phase {
            MatchPhase::Lobby => (self.settings.lobby_time_limit - state_time).max(0.0),
            MatchPhase::WaitingToStart => {
                (self.settings.waiting_to_start_delay - state_time).max(0.0)
            }
            MatchPhase::Warmup => (self.settings.warmup_time - state_time).max(0.0),
            MatchPhase::InProgress => self
                .time_limit()
                .map(|limit| (limit - self.live_time()).max(0.0))
                .unwrap_or(0.0),
            MatchPhase::Ending => (self.settings.endgame_time - state_time).max(0.0),
            _ => 0.0,
        }
    }

    fn can_start(&self) -> bool {
        let min = self.settings.min_players_to_start as usize;
        self.lobby.len() >= min && self.ready.len() >= min
    }

    fn is_alive(&self, player: Uuid) -> bool {
        !self.eliminated.contains(&player) && self.directory.is_alive(player)
    }

    fn alive_players(&self) -> Vec<Uuid> {
        self.directory
            .alive_players()
            .into_iter()
            .filter(|p| !self.eliminated.contains(p))
            .collect()
    }

    /// Directory players plus anyone in the ledger, sorted
    fn participants(&self) -> BTreeSet<Uuid> {
        let mut participants: BTreeSet<Uuid> = self.directory.all_players().into_iter().collect();
        participants.extend(self.eliminations.iter().map(|r| r.player));
        participants
    }

    fn clear_match_state(&mut self) {
        self.paused = false;
        self.match_start_time = self.clock.now();
        self.state_start_time = self.clock.now();
        self.live_start_time = None;
        self.starting_player_count = 0;
        self.lobby.clear();
        self.ready.clear();
        self.eliminations.clear();
        self.eliminated.clear();
        self.last_live_placement = None;
        self.results.clear();
        self.winner = None;
        self.winning_team = None;
        self.bonus_time = 0.0;
        self.lobby_timeout_warned = false;
        self.last_countdown = None;
    }

    fn open_lobby(&mut self) {
        let previous = self.phase;
        self.clear_match_state();
        self.enter_phase(previous, MatchPhase::Lobby);
        info!(
            match_id = %self.match_id,
            max_players = self.settings.max_players,
            min_players = self.settings.min_players_to_start,
            victory = ?self.settings.victory_condition,
            "Match started"
        );
        self.events
            .match_started
            .dispatch("match_started", |cb| cb(&self.settings));
    }

    fn set_match_state(&mut self, next: MatchPhase) -> bool {
        let previous = self.phase;
        if previous == next {
            return false;
        }
        self.enter_phase(previous, next);
        true
    }

    /// Run the entry effects of `next` and notify, even when re-entering
    fn enter_phase(&mut self, previous: MatchPhase, next: MatchPhase) {
        self.phase = next;
        self.state_start_time = self.clock.now();
        self.last_countdown = None;
        self.lobby_timeout_warned = false;

        match next {
            MatchPhase::None | MatchPhase::Aborted => {
                self.safezone.stop_storm();
            }
            MatchPhase::Lobby => self.ready.clear(),
            MatchPhase::WaitingToStart => {
                self.starting_player_count = self.lobby.len() as u32;
            }
            MatchPhase::Warmup => {}
            MatchPhase::InProgress => self.go_live(),
            MatchPhase::Ending => {
                self.safezone.stop_storm();
                self.generate_results();
            }
            MatchPhase::Ended => {}
        }

        info!(
            match_id = %self.match_id,
            from = previous.as_str(),
            to = next.as_str(),
            "Match state changed"
        );
        self.events
            .state_changed
            .dispatch("state_changed", |cb| cb(previous, next));

        match next {
            MatchPhase::Warmup => self.announce_countdown(self.settings.warmup_time),
            MatchPhase::Ending => {
                let winner = self.winner;
                self.events
                    .match_ended
                    .dispatch("match_ended", |cb| cb(winner, &self.results));
            }
            _ => {}
        }
    }

    fn try_leave_lobby(&mut self) {
        if self.phase == MatchPhase::Lobby && self.can_start() {
            self.set_match_state(MatchPhase::WaitingToStart);
        }
    }

    fn update_lobby(&mut self, state_time: f32) {
        if self.can_start() {
            self.set_match_state(MatchPhase::WaitingToStart);
            return;
        }
        if state_time >= self.settings.lobby_time_limit && !self.lobby_timeout_warned {
            self.lobby_timeout_warned = true;
            warn!(
                match_id = %self.match_id,
                players = self.lobby.len(),
                ready = self.ready.len(),
                needed = self.settings.min_players_to_start,
                "Lobby time limit reached without enough ready players"
            );
        }
    }

    fn update_warmup(&mut self, state_time: f32) {
        let remaining = self.settings.warmup_time - state_time;
        if remaining <= 0.0 {
            self.set_match_state(MatchPhase::InProgress);
        } else {
            self.announce_countdown(remaining);
        }
    }

    fn announce_countdown(&mut self, remaining: f32) {
        let seconds = remaining.ceil().max(0.0) as u32;
        if seconds == 0 || self.last_countdown == Some(seconds) {
            return;
        }
        self.last_countdown = Some(seconds);
        debug!(match_id = %self.match_id, seconds, "Warmup countdown");
        self.events.countdown.dispatch("countdown", |cb| cb(seconds));
    }

    fn go_live(&mut self) {
        self.live_start_time = Some(self.clock.now());
        self.starting_player_count = self.lobby.len() as u32;

        let players = self.directory.all_players();
        let spawned = players
            .iter()
            .filter(|p| {
                let ok = self.directory.spawn_player(**p);
                if !ok {
                    warn!(match_id = %self.match_id, player_id = %p, "Failed to spawn player");
                }
                ok
            })
            .count();

        if self.settings.storm_enabled {
            self.safezone.start_storm();
        }
        info!(
            match_id = %self.match_id,
            spawned,
            storm = self.settings.storm_enabled,
            "Match is live"
        );
    }

    fn record_elimination(&mut self, elimination: Elimination) -> Option<u32> {
        let player = elimination.player;
        if self.phase == MatchPhase::Ending {
            return self.record_late_elimination(elimination);
        }
        if self.phase != MatchPhase::InProgress {
            debug!(
                match_id = %self.match_id,
                player_id = %player,
                phase = self.phase.as_str(),
                "Elimination ignored outside live play"
            );
            return None;
        }
        if !self.directory.contains(player) {
            warn!(match_id = %self.match_id, player_id = %player, "Elimination for unknown player");
            return None;
        }
        if self.eliminated.contains(&player) {
            warn!(match_id = %self.match_id, player_id = %player, "Duplicate elimination ignored");
            return None;
        }

        // Players still counted as alive before this removal, including any
        // whose elimination is queued behind this one.
        let remaining = self
            .directory
            .all_players()
            .into_iter()
            .filter(|p| !self.eliminated.contains(p))
            .count() as u32;
        let mut placement = remaining.max(1);
        if let Some(last) = self.last_live_placement {
            placement = placement.min(last.saturating_sub(1)).max(1);
        }

        let record = self.ledger_record(&elimination, placement);
        self.eliminations.push(record);
        self.eliminated.insert(player);
        self.last_live_placement = Some(placement);

        info!(
            match_id = %self.match_id,
            player_id = %player,
            eliminator = ?elimination.eliminator,
            cause = elimination.cause.as_str(),
            placement,
            "Player eliminated"
        );
        self.events
            .player_eliminated
            .dispatch("player_eliminated", |cb| cb(player, placement));

        self.check_victory_conditions();
        Some(placement)
    }

    /// A death that was still queued when the match ended. Results already
    /// placed the player; the ledger entry takes that placement.
    fn record_late_elimination(&mut self, elimination: Elimination) -> Option<u32> {
        let player = elimination.player;
        if self.eliminated.contains(&player) {
            return None;
        }
        let placement = self
            .results
            .iter()
            .find(|r| r.player == player && r.eliminated)
            .map(|r| r.placement);
        let Some(placement) = placement else {
            debug!(
                match_id = %self.match_id,
                player_id = %player,
                "Elimination ignored after match end"
            );
            return None;
        };

        let record = self.ledger_record(&elimination, placement);
        self.eliminations.push(record);
        self.eliminated.insert(player);

        info!(
            match_id = %self.match_id,
            player_id = %player,
            cause = elimination.cause.as_str(),
            placement,
            "Late elimination recorded"
        );
        self.events
            .player_eliminated
            .dispatch("player_eliminated", |cb| cb(player, placement));
        Some(placement)
    }

    fn ledger_record(&self, elimination: &Elimination, placement: u32) -> EliminationRecord {
        let player = elimination.player;
        let location = elimination
            .location
            .or_else(|| self.directory.position(player))
            .unwrap_or_default();
        let distance = elimination
            .eliminator
            .filter(|e| *e != player)
            .and_then(|e| self.directory.position(e))
            .map(|pos| pos.distance(&location));

        EliminationRecord {
            player,
            eliminator: elimination.eliminator,
            cause: elimination.cause,
            location,
            distance,
            match_time: self.match_time(),
            placement,
            recorded_at: Utc::now(),
        }
    }

    fn check_victory_conditions(&mut self) -> bool {
        if self.phase != MatchPhase::InProgress {
            return false;
        }
        let outcome = self.evaluate_victory().or_else(|| self.time_cap_outcome());
        match outcome {
            Some(outcome) => self.end_match(outcome.winner, outcome.winning_team),
            None => false,
        }
    }

    fn evaluate_victory(&self) -> Option<VictoryOutcome> {
        let alive = self.alive_players();
        let sole_survivor = (alive.len() == 1).then(|| alive[0]);
        let directory = self.directory.as_ref();

        match self.settings.victory_condition {
            VictoryCondition::LastPlayerStanding => (alive.len() <= 1).then(|| VictoryOutcome {
                winner: sole_survivor,
                winning_team: sole_survivor.and_then(|p| directory.team(p)),
            }),
            VictoryCondition::LastTeamStanding => {
                let teams = team_keys(directory, &alive);
                (teams.len() <= 1).then(|| VictoryOutcome {
                    winner: sole_survivor,
                    winning_team: alive.first().and_then(|p| directory.team(*p)),
                })
            }
            VictoryCondition::TimeLimit => {
                let expired = self
                    .time_limit()
                    .map(|limit| self.live_time() >= limit)
                    .unwrap_or(false);
                (expired || alive.is_empty()).then(|| VictoryOutcome {
                    winner: sole_survivor,
                    winning_team: sole_survivor.and_then(|p| directory.team(p)),
                })
            }
            VictoryCondition::ScoreLimit => {
                let leader = alive
                    .iter()
                    .map(|p| (*p, directory.combat_stats(*p).kills))
                    .filter(|(_, kills)| *kills >= self.settings.score_limit)
                    .max_by(|(a, ka), (b, kb)| ka.cmp(kb).then_with(|| b.cmp(a)))
                    .map(|(p, _)| p);
                match leader {
                    Some(p) => Some(VictoryOutcome {
                        winner: Some(p),
                        winning_team: directory.team(p),
                    }),
                    // nobody left to reach the limit
                    None if alive.len() <= 1 => Some(VictoryOutcome {
                        winner: sole_survivor,
                        winning_team: sole_survivor.and_then(|p| directory.team(p)),
                    }),
                    None => None,
                }
            }
            VictoryCondition::Custom => {
                let predicate = self.custom_victory.as_ref()?;
                let ctx = VictoryContext {
                    alive_players: &alive,
                    eliminations: &self.eliminations,
                    directory,
                    live_time: self.live_time(),
                    settings: &self.settings,
                };
                predicate(&ctx)
            }
        }
    }

    /// The live time cap applies whatever the victory condition
    fn time_cap_outcome(&self) -> Option<VictoryOutcome> {
        let limit = self.time_limit()?;
        if self.live_time() < limit {
            return None;
        }
        let alive = self.alive_players();
        let winner = (alive.len() == 1).then(|| alive[0]);
        info!(match_id = %self.match_id, limit, alive = alive.len(), "Match time limit reached");
        Some(VictoryOutcome {
            winner,
            winning_team: winner.and_then(|p| self.directory.team(p)),
        })
    }

    fn end_match(&mut self, winner: Option<Uuid>, winning_team: Option<TeamId>) -> bool {
        if !self.phase.is_running() {
            debug!(match_id = %self.match_id, phase = self.phase.as_str(), "End ignored");
            return false;
        }
        self.winner = winner;
        self.winning_team = winning_team;
        info!(
            match_id = %self.match_id,
            winner = ?winner,
            winning_team = ?winning_team,
            eliminations = self.eliminations.len(),
            "Match ending"
        );
        self.set_match_state(MatchPhase::Ending)
    }

    fn generate_results(&mut self) {
        let directory = self.directory.clone();
        let participants = self.participants();

        let survivors: Vec<Survivor> = participants
            .iter()
            .filter(|p| self.is_alive(**p))
            .map(|p| Survivor {
                player: *p,
                team: directory.team(*p),
                kills: directory.combat_stats(*p).kills,
            })
            .collect();
        let ledger: Vec<Uuid> = self.eliminations.iter().map(|r| r.player).collect();
        let unaccounted: Vec<Uuid> = participants
            .iter()
            .filter(|p| !self.eliminated.contains(*p) && !directory.is_alive(**p))
            .copied()
            .collect();

        let placements = assign_placements(
            &survivors,
            &ledger,
            &unaccounted,
            self.winner,
            self.winning_team,
        );

        let live_offset = self
            .live_start_time
            .map(|start| start - self.match_start_time);
        let live_time = self.live_time();

        let mut results: Vec<MatchResult> = placements
            .into_iter()
            .map(|(player, placement)| {
                let stats = directory.combat_stats(player);
                let team = directory.team(player);
                let record = self.eliminations.iter().find(|r| r.player == player);
                // Queued deaths happened on the final live tick
                let pending = unaccounted.contains(&player);
                let survival_time = match (record, live_offset) {
                    (Some(record), Some(offset)) => (record.match_time - offset).max(0.0),
                    (None, Some(_)) if pending || survivors.iter().any(|s| s.player == player) => {
                        live_time
                    }
                    _ => 0.0,
                };
                let won = Some(player) == self.winner
                    || (self.winning_team.is_some() && team == self.winning_team);
                MatchResult {
                    player,
                    team,
                    placement,
                    kills: stats.kills,
                    deaths: stats.deaths,
                    assists: stats.assists,
                    damage_dealt: stats.damage_dealt,
                    survival_time,
                    won,
                    eliminated: record.is_some() || pending,
                }
            })
            .collect();
        sort_by_placement(&mut results);

        info!(
            match_id = %self.match_id,
            participants = results.len(),
            winner = ?self.winner,
            "Match results generated"
        );
        self.results = results;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum TeamKey {
    Team(TeamId),
    Solo(Uuid),
}

fn team_keys(directory: &dyn PlayerDirectory, players: &[Uuid]) -> BTreeSet<TeamKey> {
    players
        .iter()
        .map(|p| match directory.team(*p) {
            Some(team) => TeamKey::Team(team),
            None => TeamKey::Solo(*p),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::directory::InMemoryDirectory;
    use crate::game::geometry::Vec3;
    use crate::game::results::EliminationCause;
    use crate::game::settings::StormSettings;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use std::sync::Mutex as StdMutex;
    use tokio_test::{assert_err, assert_ok};

    struct Fixture {
        engine: MatchEngine,
        directory: Arc<InMemoryDirectory>,
        safezone: Arc<SafezoneEngine>,
        players: Vec<Uuid>,
    }

    /// `teams` of 0 gives every player their own team id
    fn fixture(n: usize, teams: u32) -> Fixture {
        let directory = Arc::new(InMemoryDirectory::new(100.0));
        let mut players: Vec<Uuid> = (0..n).map(|_| Uuid::new_v4()).collect();
        players.sort();
        for (i, id) in players.iter().enumerate() {
            let team = if teams == 0 { i as TeamId } else { i as TeamId % teams };
            directory.add_player(*id, format!("p{i}"), Some(team), Vec3::ZERO);
        }
        let safezone = Arc::new(SafezoneEngine::with_directory(
            StormSettings::default(),
            directory.clone(),
        ));
        let engine = MatchEngine::new(directory.clone(), safezone.clone());
        Fixture {
            engine,
            directory,
            safezone,
            players,
        }
    }

    fn go_live(f: &Fixture, settings: MatchSettings) {
        f.engine.start_match(settings).expect("start");
        for p in &f.players {
            f.engine.player_join_lobby(*p).expect("join");
            f.engine.player_ready_up(*p, true).expect("ready");
        }
        assert_eq!(f.engine.phase(), MatchPhase::WaitingToStart);
        f.engine.update(5.0);
        assert_eq!(f.engine.phase(), MatchPhase::Warmup);
        f.engine.update(10.0);
        assert_eq!(f.engine.phase(), MatchPhase::InProgress);
    }

    fn eliminate(f: &Fixture, player: Uuid) -> Option<u32> {
        f.directory.eliminate(player, EliminationCause::PlayerKill);
        f.directory.drain_eliminations();
        f.engine
            .on_player_eliminated(Elimination::new(player, EliminationCause::PlayerKill))
    }

    fn phase_log(engine: &MatchEngine) -> Arc<StdMutex<Vec<MatchPhase>>> {
        let log: Arc<StdMutex<Vec<MatchPhase>>> = Arc::default();
        let sink = log.clone();
        engine.on_state_changed("log", move |_, to| {
            sink.lock().unwrap().push(to);
            Ok(())
        });
        log
    }

    #[test]
    fn test_two_ready_players_leave_lobby() {
        let f = fixture(2, 0);
        assert_ok!(f.engine.start_match(MatchSettings::default()));
        assert_eq!(f.engine.phase(), MatchPhase::Lobby);

        assert_ok!(f.engine.player_join_lobby(f.players[0]));
        assert_ok!(f.engine.player_join_lobby(f.players[1]));
        assert_ok!(f.engine.player_ready_up(f.players[0], true));
        assert_eq!(f.engine.phase(), MatchPhase::Lobby);
        assert_ok!(f.engine.player_ready_up(f.players[1], true));
        assert_eq!(f.engine.phase(), MatchPhase::WaitingToStart);
        assert_eq!(f.engine.snapshot().starting_player_count, 2);
    }

    #[test]
    fn test_start_rejected_while_active() {
        let f = fixture(2, 0);
        f.engine.start_match(MatchSettings::default()).unwrap();
        assert_eq!(
            f.engine.start_match(MatchSettings::default()),
            Err(MatchError::AlreadyActive(MatchPhase::Lobby))
        );

        let bad = MatchSettings {
            max_players: 0,
            ..MatchSettings::default()
        };
        f.engine.reset();
        assert_err!(f.engine.start_match(bad));
        assert_err!(f.engine.restart_match());
        assert_eq!(f.engine.phase(), MatchPhase::None);
    }

    #[test]
    fn test_lobby_rules() {
        let f = fixture(3, 0);
        assert_eq!(
            f.engine.player_join_lobby(f.players[0]),
            Err(MatchError::NoActiveMatch)
        );

        let settings = MatchSettings {
            max_players: 2,
            ..MatchSettings::default()
        };
        f.engine.start_match(settings).unwrap();
        f.engine.player_join_lobby(f.players[0]).unwrap();
        assert_eq!(
            f.engine.player_join_lobby(f.players[0]),
            Err(MatchError::AlreadyJoined(f.players[0]))
        );
        f.engine.player_join_lobby(f.players[1]).unwrap();
        assert_eq!(
            f.engine.player_join_lobby(f.players[2]),
            Err(MatchError::LobbyFull(2))
        );
        assert_eq!(
            f.engine.player_ready_up(f.players[2], true),
            Err(MatchError::UnknownPlayer(f.players[2]))
        );

        f.engine.player_ready_up(f.players[0], true).unwrap();
        f.engine.player_leave_lobby(f.players[0]).unwrap();
        assert!(!f.engine.is_player_ready(f.players[0]));
        assert_eq!(f.engine.current_player_count(), 1);
    }

    #[test]
    fn test_lobby_leaves_only_when_quorum_ready() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..50 {
            let f = fixture(4, 0);
            let settings = MatchSettings {
                min_players_to_start: 3,
                ..MatchSettings::default()
            };
            f.engine.start_match(settings).unwrap();

            let mut joined: HashSet<Uuid> = HashSet::new();
            let mut ready: HashSet<Uuid> = HashSet::new();
            let mut reached = false;
            for _ in 0..30 {
                let player = f.players[rng.gen_range(0..f.players.len())];
                match rng.gen_range(0..4) {
                    0 => {
                        if f.engine.player_join_lobby(player).is_ok() {
                            joined.insert(player);
                        }
                    }
                    1 => {
                        if f.engine.player_leave_lobby(player).is_ok() {
                            joined.remove(&player);
                            ready.remove(&player);
                        }
                    }
                    2 => {
                        if f.engine.player_ready_up(player, true).is_ok() {
                            ready.insert(player);
                        }
                    }
                    _ => {
                        if f.engine.player_ready_up(player, false).is_ok() {
                            ready.remove(&player);
                        }
                    }
                }
                reached |= joined.len() >= 3 && ready.len() >= 3;
                let expected = if reached {
                    MatchPhase::WaitingToStart
                } else {
                    MatchPhase::Lobby
                };
                assert_eq!(f.engine.phase(), expected);
            }
        }
    }

    #[test]
    fn test_lobby_timeout_only_warns() {
        let f = fixture(1, 0);
        let settings = MatchSettings {
            lobby_time_limit: 10.0,
            ..MatchSettings::default()
        };
        f.engine.start_match(settings).unwrap();
        f.engine.player_join_lobby(f.players[0]).unwrap();
        f.engine.update(11.0);
        f.engine.update(11.0);
        assert_eq!(f.engine.phase(), MatchPhase::Lobby);

        assert!(f.engine.force_start());
        assert_eq!(f.engine.phase(), MatchPhase::WaitingToStart);
        assert!(!f.engine.force_start());
    }

    #[test]
    fn test_warmup_countdown_each_second() {
        let f = fixture(2, 0);
        let counts: Arc<StdMutex<Vec<u32>>> = Arc::default();
        let sink = counts.clone();
        f.engine.on_countdown("hud", move |secs| {
            sink.lock().unwrap().push(secs);
            Ok(())
        });

        let settings = MatchSettings {
            warmup_time: 3.0,
            ..MatchSettings::default()
        };
        f.engine.start_match(settings).unwrap();
        for p in &f.players {
            f.engine.player_join_lobby(*p).unwrap();
            f.engine.player_ready_up(*p, true).unwrap();
        }
        f.engine.update(5.0);
        assert_eq!(f.engine.phase(), MatchPhase::Warmup);
        for _ in 0..4 {
            f.engine.update(0.5);
        }
        assert_eq!(f.engine.phase(), MatchPhase::Warmup);
        f.engine.update(1.0);
        assert_eq!(f.engine.phase(), MatchPhase::InProgress);
        assert_eq!(*counts.lock().unwrap(), vec![3, 2, 1]);
    }

    #[test]
    fn test_going_live_spawns_and_starts_storm() {
        let f = fixture(2, 0);
        f.directory.apply_damage(f.players[0], 50.0, EliminationCause::FallDamage);
        go_live(&f, MatchSettings::default());

        assert_eq!(f.directory.health(f.players[0]), Some(100.0));
        assert!(f.safezone.is_active());
        assert_eq!(f.engine.alive_player_count(), 2);
    }

    #[test]
    fn test_last_player_standing_ledger_and_results() {
        let f = fixture(3, 0);
        let ended: Arc<StdMutex<Vec<Option<Uuid>>>> = Arc::default();
        let sink = ended.clone();
        f.engine.on_match_ended("stats", move |winner, results| {
            assert_eq!(results.len(), 3);
            sink.lock().unwrap().push(winner);
            Ok(())
        });
        go_live(&f, MatchSettings::default());
        let [a, b, c] = [f.players[0], f.players[1], f.players[2]];

        assert_eq!(eliminate(&f, a), Some(3));
        assert_eq!(f.engine.phase(), MatchPhase::InProgress);
        assert_eq!(eliminate(&f, b), Some(2));
        assert_eq!(f.engine.phase(), MatchPhase::Ending);
        assert_eq!(f.engine.winner(), Some(c));
        assert!(!f.safezone.is_active());

        let results = f.engine.results();
        let order: Vec<(Uuid, u32)> = results.iter().map(|r| (r.player, r.placement)).collect();
        assert_eq!(order, vec![(c, 1), (b, 2), (a, 3)]);
        assert!(results[0].won && !results[0].eliminated);
        assert!(results[2].eliminated);
        assert_eq!(*ended.lock().unwrap(), vec![Some(c)]);

        let history = f.engine.elimination_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].player, a);
        assert_eq!(f.engine.player_placement(a), Some(3));

        f.engine.update(15.0);
        assert_eq!(f.engine.phase(), MatchPhase::Ended);
    }

    #[test]
    fn test_unknown_and_duplicate_eliminations_ignored() {
        let f = fixture(3, 0);
        go_live(&f, MatchSettings::default());

        let stranger = Uuid::new_v4();
        assert_eq!(
            f.engine
                .on_player_eliminated(Elimination::new(stranger, EliminationCause::Storm)),
            None
        );
        assert_eq!(f.engine.total_eliminations(), 0);

        assert_eq!(eliminate(&f, f.players[0]), Some(3));
        assert_eq!(
            f.engine
                .on_player_eliminated(Elimination::new(f.players[0], EliminationCause::Storm)),
            None
        );
        assert_eq!(f.engine.total_eliminations(), 1);
    }

    #[test]
    fn test_elimination_ignored_before_live() {
        let f = fixture(2, 0);
        f.engine.start_match(MatchSettings::default()).unwrap();
        assert_eq!(
            f.engine
                .on_player_eliminated(Elimination::new(f.players[0], EliminationCause::Admin)),
            None
        );
    }

    #[test]
    fn test_simultaneous_final_eliminations_have_no_winner() {
        let f = fixture(3, 0);
        go_live(&f, MatchSettings::default());
        let [a, b, c] = [f.players[0], f.players[1], f.players[2]];

        f.engine.update(100.0);
        assert_eq!(eliminate(&f, a), Some(3));
        f.engine.update(50.0);
        f.directory.eliminate(b, EliminationCause::Storm);
        f.directory.eliminate(c, EliminationCause::Storm);
        let queued = f.directory.drain_eliminations();
        assert_eq!(queued.len(), 2);

        assert_eq!(f.engine.on_player_eliminated(queued[0].clone()), Some(2));
        assert_eq!(f.engine.phase(), MatchPhase::Ending);
        assert_eq!(f.engine.winner(), None);

        let results = f.engine.results();
        let mut placements: Vec<u32> = results.iter().map(|r| r.placement).collect();
        placements.sort();
        assert_eq!(placements, vec![1, 2, 3]);
        assert!(results.iter().all(|r| !r.won && r.eliminated));
        let last_out = f.engine.player_result(c).expect("result for c");
        assert_eq!(last_out.placement, 1);
        assert_eq!(last_out.survival_time, 150.0);
        assert_eq!(f.engine.player_result(b).map(|r| r.survival_time), Some(150.0));
        assert_eq!(f.engine.player_result(a).map(|r| r.survival_time), Some(100.0));

        // the queued death still lands in the ledger, at its final placement
        assert_eq!(f.engine.on_player_eliminated(queued[1].clone()), Some(1));
        assert_eq!(f.engine.on_player_eliminated(queued[1].clone()), None);
        let history = f.engine.elimination_history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].player, c);
        assert_eq!(history[2].cause, EliminationCause::Storm);
        assert_eq!(history[2].placement, 1);
        assert_eq!(f.engine.results(), results);
    }

    #[test]
    fn test_last_team_standing() {
        let f = fixture(4, 2);
        go_live(&f, MatchSettings::duos());
        assert_eq!(f.engine.alive_teams(), 2);

        // players 0 and 2 are team 0, players 1 and 3 are team 1
        eliminate(&f, f.players[1]);
        assert_eq!(f.engine.phase(), MatchPhase::InProgress);
        eliminate(&f, f.players[3]);
        assert_eq!(f.engine.phase(), MatchPhase::Ending);
        assert_eq!(f.engine.winning_team(), Some(0));
        assert_eq!(f.engine.winner(), None);

        let results = f.engine.results();
        let winners: Vec<Uuid> = results.iter().filter(|r| r.won).map(|r| r.player).collect();
        assert_eq!(winners.len(), 2);
        assert!(winners.contains(&f.players[0]) && winners.contains(&f.players[2]));
        assert!(results[..2].iter().all(|r| r.team == Some(0)));
    }

    #[test]
    fn test_time_limit_ends_without_winner() {
        let f = fixture(3, 0);
        let settings = MatchSettings {
            victory_condition: VictoryCondition::TimeLimit,
            match_time_limit: 60.0,
            ..MatchSettings::default()
        };
        go_live(&f, settings);

        f.engine.update(30.0);
        assert_eq!(f.engine.phase(), MatchPhase::InProgress);
        assert!((f.engine.time_remaining() - 30.0).abs() < 1e-3);
        f.engine.update(30.0);
        assert_eq!(f.engine.phase(), MatchPhase::Ending);
        assert_eq!(f.engine.winner(), None);

        let mut placements: Vec<u32> = f.engine.results().iter().map(|r| r.placement).collect();
        placements.sort();
        assert_eq!(placements, vec![1, 2, 3]);
    }

    #[test]
    fn test_bonus_time_extends_hard_cap() {
        let f = fixture(3, 0);
        let settings = MatchSettings {
            match_time_limit: 60.0,
            ..MatchSettings::default()
        };
        go_live(&f, settings);
        f.engine.add_bonus_time(30.0);

        f.engine.update(60.0);
        assert_eq!(f.engine.phase(), MatchPhase::InProgress);
        f.engine.update(30.0);
        assert_eq!(f.engine.phase(), MatchPhase::Ending);
    }

    #[test]
    fn test_score_limit_winner() {
        let f = fixture(3, 0);
        let settings = MatchSettings {
            victory_condition: VictoryCondition::ScoreLimit,
            score_limit: 1,
            ..MatchSettings::default()
        };
        go_live(&f, settings);

        f.directory.apply_hit(f.players[2], f.players[0], 200.0);
        let queued = f.directory.drain_eliminations();
        f.engine.on_player_eliminated(queued[0].clone());

        assert_eq!(f.engine.phase(), MatchPhase::Ending);
        assert_eq!(f.engine.winner(), Some(f.players[2]));
        assert_eq!(f.engine.top_fragger(), Some(f.players[2]));
        let record = &f.engine.elimination_history()[0];
        assert_eq!(record.eliminator, Some(f.players[2]));
        assert_eq!(record.distance, Some(0.0));
    }

    #[test]
    fn test_custom_victory_predicate() {
        let f = fixture(3, 0);
        let target = f.players[1];
        f.engine.set_custom_victory_condition(move |ctx| {
            (!ctx.eliminations.is_empty()).then_some(VictoryOutcome {
                winner: Some(target),
                winning_team: None,
            })
        });
        let settings = MatchSettings {
            victory_condition: VictoryCondition::Custom,
            ..MatchSettings::default()
        };
        go_live(&f, settings);
        f.engine.update(1.0);
        assert_eq!(f.engine.phase(), MatchPhase::InProgress);

        eliminate(&f, f.players[0]);
        assert_eq!(f.engine.winner(), Some(target));
        assert_eq!(f.engine.player_placement(target), Some(1));
    }

    #[test]
    fn test_end_match_is_idempotent() {
        let f = fixture(3, 0);
        let ended = Arc::new(StdMutex::new(0));
        let sink = ended.clone();
        f.engine.on_match_ended("count", move |_, _| {
            *sink.lock().unwrap() += 1;
            Ok(())
        });
        go_live(&f, MatchSettings::default());

        assert!(f.engine.end_match(Some(f.players[1]), None));
        assert!(!f.engine.end_match(Some(f.players[2]), None));
        assert_eq!(f.engine.winner(), Some(f.players[1]));
        assert_eq!(*ended.lock().unwrap(), 1);
        assert_eq!(f.engine.results()[0].player, f.players[1]);
    }

    #[test]
    fn test_abort_never_enters_ending() {
        let f = fixture(3, 0);
        let log = phase_log(&f.engine);
        go_live(&f, MatchSettings::default());
        assert!(f.safezone.is_active());

        assert!(f.engine.abort_match("operator"));
        assert_eq!(f.engine.phase(), MatchPhase::Aborted);
        assert!(!f.safezone.is_active());
        assert!(!f.engine.end_match(None, None));
        assert!(!f.engine.abort_match("again"));

        f.engine.update(100.0);
        assert_eq!(f.engine.phase(), MatchPhase::Aborted);
        assert!(!log.lock().unwrap().contains(&MatchPhase::Ending));
        assert!(f.engine.results().is_empty());
    }

    #[test]
    fn test_failing_subscriber_does_not_block_transition() {
        let f = fixture(2, 0);
        f.engine.on_state_changed("broken", |_, _| {
            Err(crate::game::events::SubscriberError::failed("boom"))
        });
        let log = phase_log(&f.engine);

        f.engine.start_match(MatchSettings::default()).unwrap();
        assert_eq!(*log.lock().unwrap(), vec![MatchPhase::Lobby]);

        assert!(f.engine.unregister("log"));
        f.engine.abort_match("test");
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_restart_reopens_lobby() {
        let f = fixture(3, 0);
        go_live(&f, MatchSettings::default());
        eliminate(&f, f.players[0]);
        let transitions = Arc::new(StdMutex::new(Vec::new()));
        let sink = transitions.clone();
        f.engine.on_state_changed("transitions", move |from, to| {
            sink.lock().unwrap().push((from, to));
            Ok(())
        });

        assert_ok!(f.engine.restart_match());
        assert_eq!(
            *transitions.lock().unwrap(),
            vec![(MatchPhase::InProgress, MatchPhase::Lobby)]
        );
        assert_eq!(f.engine.phase(), MatchPhase::Lobby);
        assert_eq!(f.engine.total_eliminations(), 0);
        assert_eq!(f.engine.current_player_count(), 0);
        assert!(!f.safezone.is_active());
        assert_eq!(f.engine.match_time(), 0.0);
    }

    #[test]
    fn test_pause_freezes_timers() {
        let f = fixture(2, 0);
        f.engine.start_match(MatchSettings::default()).unwrap();
        for p in &f.players {
            f.engine.player_join_lobby(*p).unwrap();
            f.engine.player_ready_up(*p, true).unwrap();
        }
        assert!(f.engine.pause_match());
        f.engine.update(10.0);
        assert_eq!(f.engine.phase(), MatchPhase::WaitingToStart);
        assert!(f.engine.resume_match());
        f.engine.update(5.0);
        assert_eq!(f.engine.phase(), MatchPhase::Warmup);
    }

    #[test]
    fn test_survival_time_measured_from_live_start() {
        let f = fixture(2, 0);
        go_live(&f, MatchSettings::default());
        f.engine.update(20.0);
        eliminate(&f, f.players[0]);

        let loser = f.engine.player_result(f.players[0]).unwrap();
        let winner = f.engine.player_result(f.players[1]).unwrap();
        assert!((loser.survival_time - 20.0).abs() < 1e-3);
        assert!((winner.survival_time - 20.0).abs() < 1e-3);
        assert!((f.engine.average_time_alive() - 20.0).abs() < 1e-3);
    }
}
