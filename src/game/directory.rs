//! Player directory: the collaborator that owns identity, team, health and position
//!
//! The engines only read from it and push damage into it. Lethal damage is
//! queued as an [`Elimination`] instead of being reported synchronously, so
//! the session can hand it to the match engine after the safezone engine has
//! released its lock.

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::geometry::Vec3;
use super::results::{CombatStats, Elimination, EliminationCause};
use super::TeamId;

/// What happened to a damage request
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DamageOutcome {
    Applied { remaining: f32 },
    Eliminated,
    /// Unknown or already eliminated player
    Ignored,
}

/// Read/notify interface the match and safezone engines consume.
///
/// Implementations must be fast, in-memory and non-blocking: they are called
/// while an engine holds its lock.
pub trait PlayerDirectory: Send + Sync {
    fn all_players(&self) -> Vec<Uuid>;

    fn contains(&self, player: Uuid) -> bool {
        self.all_players().contains(&player)
    }

    fn is_alive(&self, player: Uuid) -> bool;

    fn team(&self, player: Uuid) -> Option<TeamId>;

    fn position(&self, player: Uuid) -> Option<Vec3>;

    fn alive_players(&self) -> Vec<Uuid> {
        self.all_players()
            .into_iter()
            .filter(|p| self.is_alive(*p))
            .collect()
    }

    fn alive_player_count(&self) -> usize {
        self.alive_players().len()
    }

    fn spawn_player(&self, player: Uuid) -> bool;

    /// Apply environmental or weapon damage. The directory decides whether it is lethal.
    fn apply_damage(&self, player: Uuid, amount: f32, cause: EliminationCause) -> DamageOutcome;

    fn combat_stats(&self, _player: Uuid) -> CombatStats {
        CombatStats::default()
    }
}

/// Player entry in the in-memory directory
#[derive(Debug, Clone)]
pub struct PlayerRecord {
    pub id: Uuid,
    pub display_name: String,
    pub team: Option<TeamId>,
    pub position: Vec3,
    pub health: f32,
    pub alive: bool,
    pub spawned: bool,
    pub stats: CombatStats,
}

/// DashMap-backed directory used by the driver and the tests
pub struct InMemoryDirectory {
    players: DashMap<Uuid, PlayerRecord>,
    max_health: f32,
    elimination_tx: mpsc::UnboundedSender<Elimination>,
    elimination_rx: Mutex<mpsc::UnboundedReceiver<Elimination>>,
}

impl InMemoryDirectory {
    pub fn new(max_health: f32) -> Self {
        let (elimination_tx, elimination_rx) = mpsc::unbounded_channel();
        Self {
            players: DashMap::new(),
            max_health,
            elimination_tx,
            elimination_rx: Mutex::new(elimination_rx),
        }
    }

    pub fn max_health(&self) -> f32 {
        self.max_health
    }

    /// Track a new player. Returns false if the id is already known.
    pub fn add_player(
        &self,
        id: Uuid,
        display_name: impl Into<String>,
        team: Option<TeamId>,
        position: Vec3,
    ) -> bool {
        if self.players.contains_key(&id) {
            warn!(player_id = %id, "Player already in directory");
            return false;
        }
        self.players.insert(
            id,
            PlayerRecord {
                id,
                display_name: display_name.into(),
                team,
                position,
                health: self.max_health,
                alive: true,
                spawned: false,
                stats: CombatStats::default(),
            },
        );
        true
    }

    pub fn remove_player(&self, id: Uuid) -> Option<PlayerRecord> {
        self.players.remove(&id).map(|(_, record)| record)
    }

    pub fn get(&self, id: Uuid) -> Option<PlayerRecord> {
        self.players.get(&id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn set_position(&self, id: Uuid, position: Vec3) -> bool {
        match self.players.get_mut(&id) {
            Some(mut record) => {
                record.position = position;
                true
            }
            None => false,
        }
    }

    pub fn health(&self, id: Uuid) -> Option<f32> {
        self.players.get(&id).map(|r| r.health)
    }

    /// Weapon hit from `attacker`; credits damage and the kill on the attacker
    pub fn apply_hit(&self, attacker: Uuid, target: Uuid, amount: f32) -> DamageOutcome {
        if attacker == target {
            return self.damage_inner(target, amount, EliminationCause::SelfInflicted, None);
        }
        let outcome = self.damage_inner(target, amount, EliminationCause::PlayerKill, Some(attacker));
        if !matches!(outcome, DamageOutcome::Ignored) {
            if let Some(mut shooter) = self.players.get_mut(&attacker) {
                shooter.stats.damage_dealt += amount;
                if outcome == DamageOutcome::Eliminated {
                    shooter.stats.kills += 1;
                }
            }
        }
        outcome
    }

    /// Remove a player from the alive set without damage (disconnect, admin kick)
    pub fn eliminate(&self, player: Uuid, cause: EliminationCause) -> bool {
        let location = {
            let Some(mut record) = self.players.get_mut(&player) else {
                return false;
            };
            if !record.alive {
                return false;
            }
            record.alive = false;
            record.health = 0.0;
            record.stats.deaths += 1;
            record.position
        };
        self.queue(Elimination::new(player, cause).at(location));
        true
    }

    /// Take every elimination reported since the last drain, in order
    pub fn drain_eliminations(&self) -> Vec<Elimination> {
        let mut rx = self.elimination_rx.lock();
        let mut drained = Vec::new();
        while let Ok(elimination) = rx.try_recv() {
            drained.push(elimination);
        }
        drained
    }

    fn damage_inner(
        &self,
        player: Uuid,
        amount: f32,
        cause: EliminationCause,
        eliminator: Option<Uuid>,
    ) -> DamageOutcome {
        let (outcome, location) = {
            let Some(mut record) = self.players.get_mut(&player) else {
                return DamageOutcome::Ignored;
            };
            if !record.alive {
                return DamageOutcome::Ignored;
            }
            let amount = amount.max(0.0);
            record.health = (record.health - amount).max(0.0);
            record.stats.damage_taken += amount;
            if record.health <= 0.0 {
                record.alive = false;
                record.stats.deaths += 1;
                (DamageOutcome::Eliminated, record.position)
            } else {
                (
                    DamageOutcome::Applied {
                        remaining: record.health,
                    },
                    record.position,
                )
            }
        };

        if outcome == DamageOutcome::Eliminated {
            let mut elimination = Elimination::new(player, cause).at(location);
            elimination.eliminator = eliminator;
            self.queue(elimination);
        }
        outcome
    }

    fn queue(&self, elimination: Elimination) {
        debug!(player_id = %elimination.player, cause = elimination.cause.as_str(), "Queued elimination");
        // The receiver lives as long as `self`, so send only fails during teardown
        let _ = self.elimination_tx.send(elimination);
    }
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new(100.0)
    }
}

impl PlayerDirectory for InMemoryDirectory {
    fn all_players(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.players.iter().map(|r| *r.key()).collect();
        ids.sort();
        ids
    }

    fn contains(&self, player: Uuid) -> bool {
        self.players.contains_key(&player)
    }

    fn is_alive(&self, player: Uuid) -> bool {
        self.players.get(&player).map(|r| r.alive).unwrap_or(false)
    }

    fn team(&self, player: Uuid) -> Option<TeamId> {
        self.players.get(&player).and_then(|r| r.team)
    }

    fn position(&self, player: Uuid) -> Option<Vec3> {
        self.players.get(&player).map(|r| r.position)
    }

    fn alive_player_count(&self) -> usize {
        self.players.iter().filter(|r| r.alive).count()
    }

    fn spawn_player(&self, player: Uuid) -> bool {
        match self.players.get_mut(&player) {
            Some(mut record) => {
                record.alive = true;
                record.spawned = true;
                record.health = self.max_health;
                info!(player_id = %player, "Player spawned");
                true
            }
            None => false,
        }
    }

    fn apply_damage(&self, player: Uuid, amount: f32, cause: EliminationCause) -> DamageOutcome {
        self.damage_inner(player, amount, cause, None)
    }

    fn combat_stats(&self, player: Uuid) -> CombatStats {
        self.players.get(&player).map(|r| r.stats).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory_with(n: usize) -> (InMemoryDirectory, Vec<Uuid>) {
        let directory = InMemoryDirectory::new(100.0);
        let ids: Vec<Uuid> = (0..n).map(|_| Uuid::new_v4()).collect();
        for (i, id) in ids.iter().enumerate() {
            directory.add_player(*id, format!("p{i}"), Some(i as TeamId), Vec3::ZERO);
        }
        (directory, ids)
    }

    #[test]
    fn test_lethal_damage_queues_one_elimination() {
        let (directory, ids) = directory_with(2);

        assert_eq!(
            directory.apply_damage(ids[0], 60.0, EliminationCause::Storm),
            DamageOutcome::Applied { remaining: 40.0 }
        );
        assert_eq!(
            directory.apply_damage(ids[0], 60.0, EliminationCause::Storm),
            DamageOutcome::Eliminated
        );
        assert_eq!(
            directory.apply_damage(ids[0], 60.0, EliminationCause::Storm),
            DamageOutcome::Ignored
        );

        let drained = directory.drain_eliminations();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].player, ids[0]);
        assert_eq!(drained[0].cause, EliminationCause::Storm);
        assert!(directory.drain_eliminations().is_empty());
        assert_eq!(directory.alive_player_count(), 1);
    }

    #[test]
    fn test_hit_credits_attacker() {
        let (directory, ids) = directory_with(2);
        directory.apply_hit(ids[0], ids[1], 70.0);
        assert_eq!(directory.apply_hit(ids[0], ids[1], 70.0), DamageOutcome::Eliminated);

        let shooter = directory.combat_stats(ids[0]);
        assert_eq!(shooter.kills, 1);
        assert_eq!(shooter.damage_dealt, 140.0);
        assert_eq!(directory.combat_stats(ids[1]).deaths, 1);

        let drained = directory.drain_eliminations();
        assert_eq!(drained[0].eliminator, Some(ids[0]));
        assert_eq!(drained[0].cause, EliminationCause::PlayerKill);
    }

    #[test]
    fn test_unknown_player_is_ignored() {
        let (directory, _) = directory_with(1);
        let stranger = Uuid::new_v4();
        assert_eq!(
            directory.apply_damage(stranger, 10.0, EliminationCause::Storm),
            DamageOutcome::Ignored
        );
        assert!(!directory.eliminate(stranger, EliminationCause::Admin));
        assert!(!directory.spawn_player(stranger));
        assert!(!directory.contains(stranger));
    }

    #[test]
    fn test_spawn_restores_health() {
        let (directory, ids) = directory_with(1);
        directory.apply_damage(ids[0], 30.0, EliminationCause::FallDamage);
        assert!(directory.spawn_player(ids[0]));
        assert_eq!(directory.health(ids[0]), Some(100.0));
        assert!(directory.get(ids[0]).map(|r| r.spawned).unwrap_or(false));
    }
}
