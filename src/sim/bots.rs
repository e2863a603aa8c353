//! Bot driver - moves simulated players toward the safe area and lands hits

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};
use uuid::Uuid;

use crate::game::directory::{DamageOutcome, PlayerDirectory};
use crate::game::geometry::Vec3;
use crate::game::r#match::MatchPhase;
use crate::game::session::MatchSession;
use crate::game::TeamId;

/// Play style, picks the bot's movement and weapon numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotStyle {
    Camper,
    Balanced,
    Rusher,
}

impl BotStyle {
    fn from_roll(roll: u32) -> Self {
        match roll % 3 {
            0 => Self::Camper,
            1 => Self::Balanced,
            _ => Self::Rusher,
        }
    }
}

/// Movement and weapon stats per style
#[derive(Debug, Clone, Copy)]
pub struct BotProfile {
    /// Units per second
    pub move_speed: f32,
    /// Damage per hit
    pub damage: f32,
    /// Seconds between shots
    pub cooldown: f32,
    /// Max 2D distance to a target
    pub range: f32,
    /// Chance a shot lands
    pub accuracy: f32,
}

impl BotProfile {
    pub fn for_style(style: BotStyle) -> Self {
        match style {
            BotStyle::Camper => Self {
                move_speed: 250.0,
                damage: 45.0,
                cooldown: 1.5,
                range: 2500.0,
                accuracy: 0.6,
            },
            BotStyle::Balanced => Self {
                move_speed: 400.0,
                damage: 25.0,
                cooldown: 0.8,
                range: 1500.0,
                accuracy: 0.45,
            },
            BotStyle::Rusher => Self {
                move_speed: 600.0,
                damage: 12.0,
                cooldown: 0.3,
                range: 600.0,
                accuracy: 0.35,
            },
        }
    }
}

#[derive(Debug, Clone)]
struct Bot {
    id: Uuid,
    team: Option<TeamId>,
    profile: BotProfile,
    cooldown_remaining: f32,
    wander_target: Option<Vec3>,
}

/// Drives every bot in one session. Deterministic for a given seed.
pub struct BotDriver {
    rng: ChaCha8Rng,
    bots: Vec<Bot>,
    map_radius: f32,
    friendly_fire: bool,
}

impl BotDriver {
    pub fn new(seed: u64, map_radius: f32) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            bots: Vec::new(),
            map_radius: map_radius.max(1.0),
            friendly_fire: false,
        }
    }

    pub fn set_friendly_fire(&mut self, enabled: bool) {
        self.friendly_fire = enabled;
    }

    /// Register `count` bots in the session's directory at random spots on the
    /// map. A `team_size` above 1 groups consecutive bots into teams.
    pub fn populate(&mut self, session: &MatchSession, count: usize, team_size: u32) -> Vec<Uuid> {
        let mut added = Vec::with_capacity(count);
        for i in 0..count {
            let id = Uuid::from_u128(self.rng.gen());
            let team = (team_size > 1).then(|| (i as u32) / team_size);
            let position = self.random_point(Vec3::ZERO, self.map_radius);
            let style = BotStyle::from_roll(self.rng.gen());

            if !session
                .directory()
                .add_player(id, format!("bot-{i:03}"), team, position)
            {
                continue;
            }
            self.bots.push(Bot {
                id,
                team,
                profile: BotProfile::for_style(style),
                cooldown_remaining: self.rng.gen_range(0.0..1.0),
                wander_target: None,
            });
            added.push(id);
        }
        info!(match_id = %session.id(), bots = added.len(), team_size, "Bots populated");
        added
    }

    pub fn bot_ids(&self) -> Vec<Uuid> {
        self.bots.iter().map(|b| b.id).collect()
    }

    pub fn len(&self) -> usize {
        self.bots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bots.is_empty()
    }

    /// Move and fire for one tick. Only acts while the match is live.
    /// Returns the number of hits landed.
    pub fn step(&mut self, session: &MatchSession, dt: f32) -> usize {
        if session.engine().phase() != MatchPhase::InProgress {
            return 0;
        }
        self.move_bots(session, dt);
        self.fire(session, dt)
    }

    fn move_bots(&mut self, session: &MatchSession, dt: f32) {
        let zone = session.safezone().safezone();
        let directory = session.directory();
        // Keep clear of the edge so a closing circle does not catch the bot
        let comfort_radius = zone.radius * 0.7;

        for i in 0..self.bots.len() {
            let id = self.bots[i].id;
            if !directory.is_alive(id) {
                continue;
            }
            let Some(position) = directory.position(id) else {
                continue;
            };

            let target = if position.distance_2d(&zone.center) > comfort_radius {
                self.bots[i].wander_target = None;
                zone.center
            } else {
                let stale = self.bots[i]
                    .wander_target
                    .map(|t| t.distance_2d(&position) < 1.0 || t.distance_2d(&zone.center) > comfort_radius)
                    .unwrap_or(true);
                if stale {
                    let next = self.random_point(zone.center, comfort_radius);
                    self.bots[i].wander_target = Some(next);
                }
                self.bots[i].wander_target.unwrap_or(zone.center)
            };

            let step = self.bots[i].profile.move_speed * dt;
            directory.set_position(id, position.move_towards(&target, step));
        }
    }

    fn fire(&mut self, session: &MatchSession, dt: f32) -> usize {
        let directory = session.directory();
        let mut hits = 0;

        for i in 0..self.bots.len() {
            let shooter = self.bots[i].id;
            if !directory.is_alive(shooter) {
                continue;
            }
            let bot = &mut self.bots[i];
            bot.cooldown_remaining = (bot.cooldown_remaining - dt).max(0.0);
            if bot.cooldown_remaining > 0.0 {
                continue;
            }
            let (profile, team) = (bot.profile, bot.team);

            let Some(position) = directory.position(shooter) else {
                continue;
            };
            let Some(target) = self.nearest_enemy(&**directory, shooter, team, &position, profile.range)
            else {
                continue;
            };

            self.bots[i].cooldown_remaining = profile.cooldown;
            if self.rng.gen::<f32>() >= profile.accuracy {
                continue;
            }
            hits += 1;
            if directory.apply_hit(shooter, target, profile.damage) == DamageOutcome::Eliminated {
                debug!(match_id = %session.id(), player_id = %target, eliminator = %shooter, "Bot scored a kill");
            }
        }
        hits
    }

    fn nearest_enemy(
        &self,
        directory: &dyn PlayerDirectory,
        shooter: Uuid,
        team: Option<TeamId>,
        position: &Vec3,
        range: f32,
    ) -> Option<Uuid> {
        directory
            .alive_players()
            .into_iter()
            .filter(|p| *p != shooter)
            .filter(|p| self.friendly_fire || team.is_none() || directory.team(*p) != team)
            .filter_map(|p| {
                directory
                    .position(p)
                    .map(|pos| (p, pos.distance_2d(position)))
            })
            .filter(|(_, distance)| *distance <= range)
            .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)))
            .map(|(p, _)| p)
    }

    /// Uniform point in a disc
    fn random_point(&mut self, center: Vec3, radius: f32) -> Vec3 {
        let angle = self.rng.gen_range(0.0..std::f32::consts::TAU);
        let distance = radius * self.rng.gen::<f32>().sqrt();
        Vec3::flat(
            center.x + distance * angle.cos(),
            center.y + distance * angle.sin(),
        )
    }
}
