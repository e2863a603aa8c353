//! Elimination ledger records and final match results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::geometry::Vec3;
use super::TeamId;

/// Why a player left the alive set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EliminationCause {
    PlayerKill,
    FallDamage,
    Storm,
    SelfInflicted,
    Disconnect,
    OutOfBounds,
    /// Removed by an operator
    Admin,
}

impl EliminationCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlayerKill => "player_kill",
            Self::FallDamage => "fall_damage",
            Self::Storm => "storm",
            Self::SelfInflicted => "self_inflicted",
            Self::Disconnect => "disconnect",
            Self::OutOfBounds => "out_of_bounds",
            Self::Admin => "admin",
        }
    }
}

/// Elimination report handed to the match engine by the player directory
#[derive(Debug, Clone, PartialEq)]
pub struct Elimination {
    pub player: Uuid,
    pub eliminator: Option<Uuid>,
    pub cause: EliminationCause,
    pub location: Option<Vec3>,
}

impl Elimination {
    pub fn new(player: Uuid, cause: EliminationCause) -> Self {
        Self {
            player,
            eliminator: None,
            cause,
            location: None,
        }
    }

    pub fn by(mut self, eliminator: Uuid) -> Self {
        self.eliminator = Some(eliminator);
        self
    }

    pub fn at(mut self, location: Vec3) -> Self {
        self.location = Some(location);
        self
    }
}

/// Append-only ledger entry, one per eliminated player per match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EliminationRecord {
    pub player: Uuid,
    pub eliminator: Option<Uuid>,
    pub cause: EliminationCause,
    pub location: Vec3,
    /// Distance between eliminator and victim, when both positions are known
    pub distance: Option<f32>,
    /// Seconds since the match started
    pub match_time: f32,
    /// Placement announced when the elimination happened
    pub placement: u32,
    pub recorded_at: DateTime<Utc>,
}

/// Per-player combat counters kept by the player directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CombatStats {
    pub kills: u32,
    pub deaths: u32,
    pub assists: u32,
    pub damage_dealt: f32,
    pub damage_taken: f32,
}

/// Final standing of one participant. Immutable once the match ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub player: Uuid,
    pub team: Option<TeamId>,
    /// 1 = winner
    pub placement: u32,
    pub kills: u32,
    pub deaths: u32,
    pub assists: u32,
    pub damage_dealt: f32,
    /// Seconds survived after the match went live
    pub survival_time: f32,
    pub won: bool,
    pub eliminated: bool,
}

/// A participant still alive when the match ended
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Survivor {
    pub player: Uuid,
    pub team: Option<TeamId>,
    pub kills: u32,
}

/// Assign placements `1..=N` to every participant.
///
/// Survivors come first: the declared winner, then the rest of the winning
/// team, then by kills (descending) and id. Participants that are dead but
/// not yet in the ledger (their elimination is still queued) went out last,
/// so they follow by id. Ledger players come after them in reverse
/// elimination order (last eliminated places highest).
pub fn assign_placements(
    survivors: &[Survivor],
    ledger: &[Uuid],
    unaccounted: &[Uuid],
    winner: Option<Uuid>,
    winning_team: Option<TeamId>,
) -> Vec<(Uuid, u32)> {
    let mut ordered: Vec<Survivor> = survivors.to_vec();
    ordered.sort_by(|a, b| {
        let rank = |s: &Survivor| -> u8 {
            if Some(s.player) == winner {
                0
            } else if winning_team.is_some() && s.team == winning_team {
                1
            } else {
                2
            }
        };
        rank(a)
            .cmp(&rank(b))
            .then_with(|| b.kills.cmp(&a.kills))
            .then_with(|| a.player.cmp(&b.player))
    });

    let mut tail: Vec<Uuid> = unaccounted.to_vec();
    tail.sort();

    let mut placements = Vec::with_capacity(ordered.len() + ledger.len() + tail.len());
    let mut seen = std::collections::HashSet::new();
    let players = ordered
        .iter()
        .map(|s| s.player)
        .chain(tail)
        .chain(ledger.iter().rev().copied());
    for player in players {
        if seen.insert(player) {
            placements.push((player, placements.len() as u32 + 1));
        }
    }
    placements
}

/// Sort results ascending by placement
pub fn sort_by_placement(results: &mut [MatchResult]) {
    results.sort_by(|a, b| {
        a.placement
            .cmp(&b.placement)
            .then_with(|| a.player.cmp(&b.player))
    });
}

/// Highest kill count among results, ties broken by damage dealt, then the
/// lowest id
pub fn top_fragger(results: &[MatchResult]) -> Option<&MatchResult> {
    results.iter().max_by(|a, b| {
        a.kills
            .cmp(&b.kills)
            .then_with(|| a.damage_dealt.total_cmp(&b.damage_dealt))
            .then_with(|| b.player.cmp(&a.player))
    })
}
