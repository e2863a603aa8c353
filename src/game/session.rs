//! Match session: one directory, storm and match engine driven by a tick loop

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::util::time::{tick_delta, tick_duration};

use super::directory::{InMemoryDirectory, PlayerDirectory};
use super::r#match::{MatchEngine, MatchPhase};
use super::results::MatchResult;
use super::safezone::{SafezoneEngine, StormStats};
use super::settings::StormSettings;
use super::TeamId;

/// What a finished session reports
#[derive(Debug, Clone, Serialize)]
pub struct MatchSummary {
    pub match_id: Uuid,
    pub phase: MatchPhase,
    pub ticks: u64,
    pub match_time: f32,
    pub winner: Option<Uuid>,
    pub winning_team: Option<TeamId>,
    pub total_eliminations: usize,
    pub storm: StormStats,
    pub results: Vec<MatchResult>,
}

/// The three collaborators of one match, wired together.
///
/// Each tick runs the match engine, then the safezone engine, and hands the
/// eliminations the directory queued (storm kills included) to the match
/// engine before and after both.
/// Neither engine lock is held while the other is driven from here.
pub struct MatchSession {
    id: Uuid,
    directory: Arc<InMemoryDirectory>,
    safezone: Arc<SafezoneEngine>,
    engine: Arc<MatchEngine>,
    ticks: AtomicU64,
}

impl MatchSession {
    pub fn new(storm: StormSettings, max_health: f32) -> Self {
        let id = Uuid::new_v4();
        let directory = Arc::new(InMemoryDirectory::new(max_health));
        let shared: Arc<dyn PlayerDirectory> = directory.clone();
        let safezone = Arc::new(SafezoneEngine::with_directory(storm, shared.clone()));
        let engine = Arc::new(MatchEngine::with_id(id, shared, safezone.clone()));
        Self {
            id,
            directory,
            safezone,
            engine,
            ticks: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn directory(&self) -> &Arc<InMemoryDirectory> {
        &self.directory
    }

    pub fn safezone(&self) -> &Arc<SafezoneEngine> {
        &self.safezone
    }

    pub fn engine(&self) -> &Arc<MatchEngine> {
        &self.engine
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn player_count(&self) -> usize {
        self.directory.len()
    }

    /// Advance the whole match by `dt` seconds. Returns the number of
    /// eliminations the match engine accepted this tick.
    ///
    /// Kills landed between ticks are recorded before the match update so
    /// its victory check never sees a death the ledger is missing.
    pub fn tick(&self, dt: f32) -> usize {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        let mut accepted = self.process_eliminations();
        self.engine.update(dt);
        self.safezone.update(dt);
        accepted += self.process_eliminations();
        accepted
    }

    /// Hand queued eliminations to the match engine, in the order they happened
    pub fn process_eliminations(&self) -> usize {
        let mut accepted = 0;
        for elimination in self.directory.drain_eliminations() {
            let player = elimination.player;
            match self.engine.on_player_eliminated(elimination) {
                Some(placement) => {
                    accepted += 1;
                    debug!(match_id = %self.id, player_id = %player, placement, "Elimination applied");
                }
                None => {
                    debug!(match_id = %self.id, player_id = %player, "Elimination dropped");
                }
            }
        }
        accepted
    }

    /// Run at `tick_rate` until the match reaches Ended or Aborted, or
    /// `shutdown` flips to true (which aborts it). `on_tick` runs before every
    /// simulation step with the tick delta.
    pub async fn run<F>(
        self: Arc<Self>,
        tick_rate: u32,
        mut shutdown: watch::Receiver<bool>,
        mut on_tick: F,
    ) -> MatchSummary
    where
        F: FnMut(&MatchSession, f32) + Send,
    {
        info!(match_id = %self.id, tick_rate, "Match loop started");

        let dt = tick_delta(tick_rate);
        let mut tick_interval = interval(tick_duration(tick_rate));
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    on_tick(&*self, dt);
                    self.tick(dt);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        warn!(match_id = %self.id, "Shutdown requested, aborting match");
                        self.engine.abort_match("server shutdown");
                        break;
                    }
                }
            }

            let phase = self.engine.phase();
            if phase.is_finished() {
                info!(match_id = %self.id, phase = phase.as_str(), "Match loop finished");
                break;
            }
            if phase == MatchPhase::None {
                warn!(match_id = %self.id, "Match was reset, stopping loop");
                break;
            }
        }

        self.summary()
    }

    pub fn summary(&self) -> MatchSummary {
        let info = self.engine.snapshot();
        MatchSummary {
            match_id: self.id,
            phase: info.phase,
            ticks: self.ticks(),
            match_time: info.match_time,
            winner: info.winner,
            winning_team: info.winning_team,
            total_eliminations: info.total_eliminations as usize,
            storm: self.safezone.stats(),
            results: self.engine.results(),
        }
    }
}

/// Registry of running sessions
pub struct MatchRegistry {
    sessions: DashMap<Uuid, Arc<MatchSession>>,
}

impl MatchRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<MatchSession>> {
        self.sessions.get(id).map(|s| s.value().clone())
    }

    pub fn insert(&self, session: Arc<MatchSession>) {
        self.sessions.insert(session.id(), session);
    }

    pub fn remove(&self, id: &Uuid) -> Option<Arc<MatchSession>> {
        self.sessions.remove(id).map(|(_, s)| s)
    }

    pub fn active_matches(&self) -> usize {
        self.sessions.len()
    }

    pub fn total_players(&self) -> usize {
        self.sessions
            .iter()
            .map(|s| s.value().player_count())
            .sum()
    }

    /// Sessions whose match has not reached Ended or Aborted
    pub fn running(&self) -> Vec<Arc<MatchSession>> {
        self.sessions
            .iter()
            .filter(|s| !s.value().engine().phase().is_finished())
            .map(|s| s.value().clone())
            .collect()
    }
}

impl Default for MatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}
