//! Safezone engine: multi-phase storm schedule, circle interpolation and storm damage
//!
//! The engine owns the safe-area geometry only. Health lives in the player
//! directory; storm damage is handed to it and lethal hits come back to the
//! match engine through the directory's elimination queue, never through this
//! engine.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::util::time::SimClock;

use super::directory::{DamageOutcome, PlayerDirectory};
use super::events::{StormEvents, SubscriberResult};
use super::geometry::{distance_from_edge, is_in_circle, lerp, Vec3};
use super::results::EliminationCause;
use super::settings::{default_storm_phases, StormPhaseData, StormSettings};

/// Storm sub-phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StormPhase {
    /// Storm started, first phase not yet counting down
    PreStorm,
    /// Counting down to the next shrink
    Waiting,
    /// Radius closing on a fixed center
    Shrinking,
    /// Radius closing while the center travels
    Moving,
    /// Schedule exhausted, the last circle holds
    FinalPhase,
    Ended,
}

impl StormPhase {
    pub fn is_closing(&self) -> bool {
        matches!(self, Self::Shrinking | Self::Moving)
    }
}

/// Current safe-area geometry and phase bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafezoneState {
    pub center: Vec3,
    pub radius: f32,
    pub target_center: Vec3,
    pub target_radius: f32,
    pub phase: StormPhase,
    /// Index into the storm schedule, only ever increases
    pub phase_index: usize,
    pub phase_start_time: f32,
    pub shrink_start_time: f32,
    /// Geometry captured when the current shrink began
    pub shrink_start_radius: f32,
    pub shrink_start_center: Vec3,
}

impl SafezoneState {
    fn new(center: Vec3, radius: f32) -> Self {
        Self {
            center,
            radius,
            target_center: center,
            target_radius: radius,
            phase: StormPhase::PreStorm,
            phase_index: 0,
            phase_start_time: 0.0,
            shrink_start_time: 0.0,
            shrink_start_radius: radius,
            shrink_start_center: center,
        }
    }

    pub fn contains(&self, position: &Vec3) -> bool {
        is_in_circle(position, &self.center, self.radius)
    }

    /// Negative inside, positive outside
    pub fn distance_from_edge(&self, position: &Vec3) -> f32 {
        distance_from_edge(position, &self.center, self.radius)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StormStats {
    pub players_killed_by_storm: u32,
    /// Players outside the circle at the last damage tick
    pub players_in_storm: u32,
    pub total_damage_dealt: f32,
    pub damage_ticks: u64,
    /// Seconds since the storm started
    pub storm_duration: f32,
}

struct SafezoneInner {
    settings: StormSettings,
    schedule: Vec<StormPhaseData>,
    zone: SafezoneState,
    clock: SimClock,
    active: bool,
    paused: bool,
    storm_start_time: f32,
    last_damage_time: f32,
    players_in_storm: HashSet<Uuid>,
    warned_phase: Option<usize>,
    directory: Option<Arc<dyn PlayerDirectory>>,
    missing_directory_warned: bool,
    stats: StormStats,
    events: StormEvents,
}

/// Storm engine for one match. All state sits behind a single lock shared by
/// `update` and every public mutator.
pub struct SafezoneEngine {
    inner: Mutex<SafezoneInner>,
}

impl SafezoneEngine {
    pub fn new(settings: StormSettings) -> Self {
        let zone = SafezoneState::new(settings.initial_center, settings.initial_radius);
        Self {
            inner: Mutex::new(SafezoneInner {
                settings,
                schedule: Vec::new(),
                zone,
                clock: SimClock::new(),
                active: false,
                paused: false,
                storm_start_time: 0.0,
                last_damage_time: 0.0,
                players_in_storm: HashSet::new(),
                warned_phase: None,
                directory: None,
                missing_directory_warned: false,
                stats: StormStats::default(),
                events: StormEvents::default(),
            }),
        }
    }

    pub fn with_directory(settings: StormSettings, directory: Arc<dyn PlayerDirectory>) -> Self {
        let engine = Self::new(settings);
        engine.attach_directory(directory);
        engine
    }

    pub fn attach_directory(&self, directory: Arc<dyn PlayerDirectory>) {
        let mut inner = self.inner.lock();
        inner.directory = Some(directory);
        inner.missing_directory_warned = false;
    }

    pub fn detach_directory(&self) {
        self.inner.lock().directory = None;
    }

    // ---- storm control ----

    /// Start the storm. Returns false if it is already running.
    pub fn start_storm(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.active {
            return false;
        }

        if inner.schedule.is_empty() {
            inner.schedule = default_storm_phases();
            info!(phases = inner.schedule.len(), "No storm schedule configured, installed default");
        }

        let now = inner.clock.now();
        inner.zone = SafezoneState::new(inner.settings.initial_center, inner.settings.initial_radius);
        inner.zone.phase_start_time = now;
        inner.active = true;
        inner.paused = false;
        inner.storm_start_time = now;
        inner.last_damage_time = now;
        inner.players_in_storm.clear();
        inner.warned_phase = None;
        inner.stats = StormStats::default();

        info!(
            phases = inner.schedule.len(),
            radius = inner.zone.radius,
            "Storm started"
        );
        inner.fire_phase_changed();
        true
    }

    /// Stop the storm. Idempotent: only the first call fires an event.
    pub fn stop_storm(&self) -> bool {
        let mut inner = self.inner.lock();
        if !inner.active {
            return false;
        }
        inner.end_storm("stopped");
        true
    }

    pub fn pause_storm(&self) -> bool {
        let mut inner = self.inner.lock();
        if !inner.active || inner.paused {
            return false;
        }
        inner.paused = true;
        info!(phase_index = inner.zone.phase_index, "Storm paused");
        true
    }

    pub fn resume_storm(&self) -> bool {
        let mut inner = self.inner.lock();
        if !inner.active || !inner.paused {
            return false;
        }
        inner.paused = false;
        info!(phase_index = inner.zone.phase_index, "Storm resumed");
        true
    }

    /// Stop, clear geometry back to the initial circle, and start again
    pub fn restart_storm(&self) -> bool {
        self.stop_storm();
        self.start_storm()
    }

    /// Drop all state except settings, schedule and subscribers
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.active = false;
        inner.paused = false;
        inner.zone = SafezoneState::new(inner.settings.initial_center, inner.settings.initial_radius);
        inner.clock.reset();
        inner.storm_start_time = 0.0;
        inner.last_damage_time = 0.0;
        inner.players_in_storm.clear();
        inner.warned_phase = None;
        inner.stats = StormStats::default();
    }

    /// Finish the current phase immediately and start the next one
    pub fn skip_to_next_phase(&self) -> bool {
        let mut inner = self.inner.lock();
        if !inner.active {
            return false;
        }
        match inner.zone.phase {
            StormPhase::Ended => false,
            StormPhase::FinalPhase => {
                inner.end_storm("skipped past final phase");
                true
            }
            _ => {
                let now = inner.clock.now();
                inner.complete_current_phase();
                inner.start_next_phase(now);
                info!(phase_index = inner.zone.phase_index, "Skipped to next storm phase");
                true
            }
        }
    }

    /// Jump forward to `index`. An index past the schedule ends the storm;
    /// an index behind the current phase is rejected.
    pub fn skip_to_phase(&self, index: usize) -> bool {
        let mut inner = self.inner.lock();
        if !inner.active || inner.zone.phase == StormPhase::Ended {
            return false;
        }
        if index >= inner.schedule.len() {
            warn!(index, phases = inner.schedule.len(), "Storm phase index out of range, ending storm");
            inner.end_storm("skipped out of range");
            return true;
        }
        if index < inner.zone.phase_index {
            warn!(index, current = inner.zone.phase_index, "Cannot skip to an earlier storm phase");
            return false;
        }

        // Land on the circle the previous phase would have left behind
        if index > inner.zone.phase_index {
            inner.complete_current_phase();
            for skipped in inner.zone.phase_index + 1..index {
                let phase = inner.schedule[skipped].clone();
                inner.snap_to(&phase);
            }
        }

        let now = inner.clock.now();
        inner.zone.phase_index = index;
        inner.zone.phase = StormPhase::Waiting;
        inner.zone.phase_start_time = now;
        inner.warned_phase = None;
        info!(phase_index = index, "Skipped to storm phase");
        inner.fire_phase_changed();
        true
    }

    // ---- schedule ----

    pub fn set_storm_phases(&self, phases: Vec<StormPhaseData>) {
        let mut inner = self.inner.lock();
        inner.schedule = phases;
        info!(phases = inner.schedule.len(), "Updated storm schedule");
    }

    pub fn add_storm_phase(&self, phase: StormPhaseData) {
        self.inner.lock().schedule.push(phase);
    }

    pub fn clear_storm_phases(&self) {
        self.inner.lock().schedule.clear();
    }

    pub fn storm_phases(&self) -> Vec<StormPhaseData> {
        self.inner.lock().schedule.clone()
    }

    pub fn settings(&self) -> StormSettings {
        self.inner.lock().settings.clone()
    }

    pub fn set_settings(&self, settings: StormSettings) {
        self.inner.lock().settings = settings;
    }

    /// Override the circle immediately (admin tooling, custom modes)
    pub fn set_safezone_instant(&self, center: Vec3, radius: f32) {
        let mut inner = self.inner.lock();
        let radius = radius.max(0.0);
        inner.zone.center = center;
        inner.zone.radius = radius;
        inner.zone.shrink_start_center = center;
        inner.zone.shrink_start_radius = radius;
        inner.zone.target_radius = inner.zone.target_radius.min(radius);
        if !inner.zone.phase.is_closing() {
            inner.zone.target_center = center;
        }
        info!(x = center.x, y = center.y, radius, "Safezone set");
    }

    // ---- tick ----

    /// Advance the storm by `dt` seconds. No-op unless active and not paused.
    pub fn update(&self, dt: f32) {
        let mut inner = self.inner.lock();
        if !inner.active || inner.paused {
            return;
        }

        let now = inner.clock.advance(dt);
        inner.stats.storm_duration = now - inner.storm_start_time;

        inner.advance_phases(now);
        if !inner.active {
            return;
        }

        let tick_rate = inner.settings.damage_tick_rate.max(0.01);
        if now - inner.last_damage_time >= tick_rate {
            inner.last_damage_time += tick_rate;
            if now - inner.last_damage_time >= tick_rate {
                // Fell more than a tick behind (huge dt), resync instead of bursting
                inner.last_damage_time = now;
            }
            if inner.settings.damage_enabled {
                inner.damage_players_in_storm();
            }
        }

        inner.update_player_storm_status();
    }

    // ---- queries ----

    pub fn safezone(&self) -> SafezoneState {
        self.inner.lock().zone.clone()
    }

    pub fn center(&self) -> Vec3 {
        self.inner.lock().zone.center
    }

    pub fn radius(&self) -> f32 {
        self.inner.lock().zone.radius
    }

    pub fn phase(&self) -> StormPhase {
        self.inner.lock().zone.phase
    }

    pub fn phase_index(&self) -> usize {
        self.inner.lock().zone.phase_index
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().active
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    pub fn is_in_safezone(&self, position: &Vec3) -> bool {
        self.inner.lock().zone.contains(position)
    }

    pub fn distance_from_edge(&self, position: &Vec3) -> f32 {
        self.inner.lock().zone.distance_from_edge(position)
    }

    /// Unknown players and players without a position count as safe
    pub fn is_player_in_safezone(&self, player: Uuid) -> bool {
        let inner = self.inner.lock();
        inner
            .directory
            .as_ref()
            .and_then(|d| d.position(player))
            .map(|pos| inner.zone.contains(&pos))
            .unwrap_or(true)
    }

    /// Players currently tracked as outside the circle
    pub fn players_in_storm(&self) -> Vec<Uuid> {
        let mut players: Vec<Uuid> = self.inner.lock().players_in_storm.iter().copied().collect();
        players.sort();
        players
    }

    pub fn players_in_safezone(&self) -> Vec<Uuid> {
        let inner = self.inner.lock();
        let Some(directory) = inner.directory.as_ref() else {
            return Vec::new();
        };
        directory
            .alive_players()
            .into_iter()
            .filter(|p| {
                directory
                    .position(*p)
                    .map(|pos| inner.zone.contains(&pos))
                    .unwrap_or(true)
            })
            .collect()
    }

    /// Damage a player outside the circle takes on the next damage tick
    pub fn current_storm_damage(&self) -> f32 {
        self.inner.lock().current_storm_damage()
    }

    /// Seconds until the circle starts closing (0 while closing or after the schedule)
    pub fn time_until_shrink(&self) -> f32 {
        let inner = self.inner.lock();
        inner.time_until_shrink()
    }

    /// Seconds until the current phase completes
    pub fn time_until_next_phase(&self) -> f32 {
        let inner = self.inner.lock();
        let now = inner.clock.now();
        match inner.zone.phase {
            StormPhase::PreStorm | StormPhase::Waiting => {
                let shrink = inner
                    .schedule
                    .get(inner.zone.phase_index)
                    .map(|p| p.shrink_time)
                    .unwrap_or(0.0);
                inner.time_until_shrink() + shrink
            }
            StormPhase::Shrinking | StormPhase::Moving => inner
                .schedule
                .get(inner.zone.phase_index)
                .map(|p| (p.shrink_time - (now - inner.zone.shrink_start_time)).max(0.0))
                .unwrap_or(0.0),
            StormPhase::FinalPhase | StormPhase::Ended => 0.0,
        }
    }

    /// Fraction of the current phase (wait + shrink) that has elapsed
    pub fn phase_progress(&self) -> f32 {
        let inner = self.inner.lock();
        let now = inner.clock.now();
        let Some(phase) = inner.schedule.get(inner.zone.phase_index) else {
            return 1.0;
        };
        let total = phase.wait_time + phase.shrink_time;
        match inner.zone.phase {
            StormPhase::PreStorm => 0.0,
            StormPhase::Waiting | StormPhase::Shrinking | StormPhase::Moving if total > 0.0 => {
                ((now - inner.zone.phase_start_time) / total).clamp(0.0, 1.0)
            }
            _ => 1.0,
        }
    }

    pub fn shrink_progress(&self) -> f32 {
        let inner = self.inner.lock();
        inner.shrink_progress(inner.clock.now())
    }

    pub fn stats(&self) -> StormStats {
        self.inner.lock().stats.clone()
    }

    pub fn reset_stats(&self) {
        self.inner.lock().stats = StormStats::default();
    }

    // ---- subscriptions ----
    // Callbacks run under the engine lock and must not call back into this engine.

    pub fn on_phase_changed<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(StormPhase, usize) -> SubscriberResult + Send + Sync + 'static,
    {
        self.inner.lock().events.phase_changed.register(name, Box::new(callback));
    }

    pub fn on_player_entered_storm<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(Uuid) -> SubscriberResult + Send + Sync + 'static,
    {
        self.inner.lock().events.entered_storm.register(name, Box::new(callback));
    }

    pub fn on_player_exited_storm<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(Uuid) -> SubscriberResult + Send + Sync + 'static,
    {
        self.inner.lock().events.exited_storm.register(name, Box::new(callback));
    }

    pub fn on_storm_damage<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(Uuid, f32) -> SubscriberResult + Send + Sync + 'static,
    {
        self.inner.lock().events.storm_damage.register(name, Box::new(callback));
    }

    /// Fired once per phase with (phase index, seconds until shrink)
    pub fn on_storm_warning<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(usize, f32) -> SubscriberResult + Send + Sync + 'static,
    {
        self.inner.lock().events.storm_warning.register(name, Box::new(callback));
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.inner.lock().events.unregister(name)
    }
}

impl Default for SafezoneEngine {
    fn default() -> Self {
        Self::new(StormSettings::default())
    }
}

impl SafezoneInner {
    /// Run every transition due at `now`; a large `dt` may cross several boundaries
    fn advance_phases(&mut self, now: f32) {
        // The final circle is held for one update before the storm ends
        if self.zone.phase == StormPhase::FinalPhase {
            self.enter_ended(now);
            return;
        }
        let max_steps = self.schedule.len() * 3 + 3;
        for _ in 0..max_steps {
            if !self.step_phase(now) {
                break;
            }
        }
    }

    /// One transition, timestamped at the boundary it crossed. Returns true if the phase changed.
    fn step_phase(&mut self, now: f32) -> bool {
        match self.zone.phase {
            StormPhase::PreStorm => {
                let delay = self.settings.pre_storm_delay.max(0.0);
                if now - self.zone.phase_start_time < delay {
                    return false;
                }
                let boundary = self.zone.phase_start_time + delay;
                self.enter_waiting(boundary);
                true
            }
            StormPhase::Waiting => {
                let Some(phase) = self.schedule.get(self.zone.phase_index).cloned() else {
                    self.enter_final_phase();
                    return true;
                };
                self.maybe_warn(now);
                if now - self.zone.phase_start_time < phase.wait_time {
                    return false;
                }
                let boundary = self.zone.phase_start_time + phase.wait_time;
                self.begin_shrink(boundary, &phase);
                true
            }
            StormPhase::Shrinking | StormPhase::Moving => {
                let Some(phase) = self.schedule.get(self.zone.phase_index).cloned() else {
                    self.enter_final_phase();
                    return true;
                };
                let elapsed = now - self.zone.shrink_start_time;
                let progress = self.shrink_progress(now);
                self.zone.radius = lerp(self.zone.shrink_start_radius, self.zone.target_radius, progress)
                    .min(self.zone.radius);
                if phase.moves_center() {
                    self.zone.center = self.zone.shrink_start_center.lerp(&self.zone.target_center, progress);
                }
                if elapsed < phase.shrink_time {
                    return false;
                }
                let boundary = self.zone.shrink_start_time + phase.shrink_time;
                self.start_next_phase(boundary);
                true
            }
            StormPhase::FinalPhase | StormPhase::Ended => false,
        }
    }

    fn enter_waiting(&mut self, start_time: f32) {
        self.zone.phase = StormPhase::Waiting;
        self.zone.phase_start_time = start_time;
        self.warned_phase = None;
        if let Some(phase) = self.schedule.get(self.zone.phase_index) {
            if self.settings.show_warnings {
                info!(
                    phase_index = self.zone.phase_index,
                    name = %phase.name,
                    wait_time = phase.wait_time,
                    "{}",
                    phase.warning
                );
            }
        }
        self.fire_phase_changed();
    }

    fn begin_shrink(&mut self, start_time: f32, phase: &StormPhaseData) {
        self.zone.phase = if phase.moves_center() {
            StormPhase::Moving
        } else {
            StormPhase::Shrinking
        };
        self.zone.shrink_start_time = start_time;
        self.zone.shrink_start_radius = self.zone.radius;
        self.zone.shrink_start_center = self.zone.center;
        // The circle never regrows, even with a misordered schedule
        self.zone.target_radius = phase.target_radius.max(0.0).min(self.zone.radius);
        self.zone.target_center = match phase.new_center {
            Some(center) if phase.move_center => center,
            _ => self.zone.center,
        };
        info!(
            phase_index = self.zone.phase_index,
            from = self.zone.shrink_start_radius,
            to = self.zone.target_radius,
            duration = phase.shrink_time,
            "Storm beginning shrink"
        );
        self.fire_phase_changed();
    }

    fn start_next_phase(&mut self, start_time: f32) {
        self.zone.radius = self.zone.target_radius.min(self.zone.radius);
        if self.zone.phase == StormPhase::Moving {
            self.zone.center = self.zone.target_center;
        }
        self.zone.phase_index += 1;

        if self.zone.phase_index < self.schedule.len() {
            self.enter_waiting(start_time);
        } else {
            self.zone.phase_start_time = start_time;
            self.enter_final_phase();
        }
    }

    fn enter_final_phase(&mut self) {
        self.zone.phase = StormPhase::FinalPhase;
        info!(radius = self.zone.radius, "Storm reached final phase");
        self.fire_phase_changed();
    }

    /// Schedule exhausted. Stays active so the final circle keeps damaging.
    fn enter_ended(&mut self, now: f32) {
        self.zone.phase = StormPhase::Ended;
        self.zone.phase_start_time = now;
        info!(radius = self.zone.radius, "Storm schedule exhausted");
        self.fire_phase_changed();
    }

    fn end_storm(&mut self, reason: &str) {
        self.active = false;
        self.paused = false;
        if self.zone.phase == StormPhase::Ended {
            info!(phase_index = self.zone.phase_index, reason, "Storm stopped");
            return;
        }
        self.zone.phase = StormPhase::Ended;
        info!(phase_index = self.zone.phase_index, reason, "Storm ended");
        self.fire_phase_changed();
    }

    /// Put the circle where the current phase would leave it
    fn complete_current_phase(&mut self) {
        if let Some(phase) = self.schedule.get(self.zone.phase_index).cloned() {
            if self.zone.phase.is_closing() {
                self.zone.radius = self.zone.target_radius.min(self.zone.radius);
                if phase.moves_center() {
                    self.zone.center = self.zone.target_center;
                }
            } else {
                self.snap_to(&phase);
            }
        }
        self.zone.phase = StormPhase::Waiting;
    }

    fn snap_to(&mut self, phase: &StormPhaseData) {
        self.zone.radius = phase.target_radius.max(0.0).min(self.zone.radius);
        self.zone.target_radius = self.zone.radius;
        if let (true, Some(center)) = (phase.move_center, phase.new_center) {
            self.zone.center = center;
        }
        self.zone.target_center = self.zone.center;
    }

    fn shrink_progress(&self, now: f32) -> f32 {
        if !self.zone.phase.is_closing() {
            return 0.0;
        }
        let Some(phase) = self.schedule.get(self.zone.phase_index) else {
            return 1.0;
        };
        if phase.shrink_time <= 0.0 {
            return 1.0;
        }
        ((now - self.zone.shrink_start_time) / phase.shrink_time).clamp(0.0, 1.0)
    }

    fn time_until_shrink(&self) -> f32 {
        let now = self.clock.now();
        let wait = self
            .schedule
            .get(self.zone.phase_index)
            .map(|p| p.wait_time)
            .unwrap_or(0.0);
        match self.zone.phase {
            StormPhase::PreStorm => {
                let pre = (self.settings.pre_storm_delay - (now - self.zone.phase_start_time)).max(0.0);
                pre + wait
            }
            StormPhase::Waiting => (wait - (now - self.zone.phase_start_time)).max(0.0),
            _ => 0.0,
        }
    }

    /// Per-tick damage: the phase's damage per second, optionally scaled by
    /// phase index, times the tick interval, capped per tick
    fn current_storm_damage(&self) -> f32 {
        if self.schedule.is_empty() {
            return 1.0_f32.min(self.settings.max_damage_per_tick);
        }
        let index = self.zone.phase_index.min(self.schedule.len() - 1);
        let mut damage = self.schedule[index].damage_per_second;
        if self.settings.scale_damage_with_phase {
            damage *= 1.0 + index as f32 * 0.5;
        }
        (damage * self.settings.damage_tick_rate.max(0.01)).min(self.settings.max_damage_per_tick)
    }

    fn maybe_warn(&mut self, now: f32) {
        if !self.settings.show_warnings || self.warned_phase == Some(self.zone.phase_index) {
            return;
        }
        let Some(phase) = self.schedule.get(self.zone.phase_index) else {
            return;
        };
        let remaining = (phase.wait_time - (now - self.zone.phase_start_time)).max(0.0);
        if remaining > self.settings.warning_time {
            return;
        }
        let index = self.zone.phase_index;
        self.warned_phase = Some(index);
        info!(phase_index = index, seconds = remaining, "Storm shrinking soon");
        self.events
            .storm_warning
            .dispatch("storm_warning", |cb| cb(index, remaining));
    }

    /// The attached directory, or `None` with a single warning until one is attached
    fn directory(&mut self) -> Option<Arc<dyn PlayerDirectory>> {
        match &self.directory {
            Some(directory) => Some(directory.clone()),
            None => {
                if !self.missing_directory_warned {
                    warn!("No player directory attached, storm damage disabled");
                    self.missing_directory_warned = true;
                }
                None
            }
        }
    }

    fn damage_players_in_storm(&mut self) {
        let Some(directory) = self.directory() else {
            return;
        };
        let amount = self.current_storm_damage();
        if amount <= 0.0 {
            return;
        }

        let mut outside = 0u32;
        for player in directory.alive_players() {
            let Some(position) = directory.position(player) else {
                continue;
            };
            if self.zone.contains(&position) {
                continue;
            }
            outside += 1;

            match directory.apply_damage(player, amount, EliminationCause::Storm) {
                DamageOutcome::Ignored => continue,
                DamageOutcome::Eliminated => {
                    self.stats.players_killed_by_storm += 1;
                    info!(player_id = %player, "Player eliminated by storm");
                }
                DamageOutcome::Applied { remaining } => {
                    debug!(player_id = %player, amount, remaining, "Storm damage");
                }
            }
            self.stats.total_damage_dealt += amount;
            self.events
                .storm_damage
                .dispatch("storm_damage", |cb| cb(player, amount));
        }

        self.stats.players_in_storm = outside;
        self.stats.damage_ticks += 1;
    }

    /// Diff the outside set against the last tick and announce the changes
    fn update_player_storm_status(&mut self) {
        let Some(directory) = self.directory() else {
            return;
        };

        let outside: HashSet<Uuid> = directory
            .alive_players()
            .into_iter()
            .filter(|p| {
                directory
                    .position(*p)
                    .map(|pos| !self.zone.contains(&pos))
                    .unwrap_or(false)
            })
            .collect();

        let mut entered: Vec<Uuid> = outside.difference(&self.players_in_storm).copied().collect();
        // Players who died or vanished leave silently
        let mut exited: Vec<Uuid> = self
            .players_in_storm
            .difference(&outside)
            .copied()
            .filter(|p| directory.is_alive(*p))
            .collect();
        entered.sort();
        exited.sort();

        for player in entered {
            debug!(player_id = %player, "Player entered storm");
            self.events
                .entered_storm
                .dispatch("player_entered_storm", |cb| cb(player));
        }
        for player in exited {
            debug!(player_id = %player, "Player exited storm");
            self.events
                .exited_storm
                .dispatch("player_exited_storm", |cb| cb(player));
        }

        self.players_in_storm = outside;
    }

    fn fire_phase_changed(&self) {
        let phase = self.zone.phase;
        let index = self.zone.phase_index;
        self.events
            .phase_changed
            .dispatch("storm_phase_changed", |cb| cb(phase, index));
    }
}
