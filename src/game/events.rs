//! Event fan-out: named, typed subscriber lists per event kind
//!
//! Collaborators (network broadcast, statistics, event spawners) register a
//! callback under a name of their choosing and can later drop every callback
//! registered under that name in one call. Callbacks run while the firing
//! engine holds its lock, so a callback must never call back into the engine
//! that fired it.

use tracing::error;
use uuid::Uuid;

use super::r#match::MatchPhase;
use super::results::MatchResult;
use super::safezone::StormPhase;
use super::settings::MatchSettings;

/// Failure reported by a subscriber. Logged at the firing site, never propagated.
#[derive(Debug, thiserror::Error)]
pub enum SubscriberError {
    #[error("subscriber failed: {0}")]
    Failed(String),
    #[error("subscriber is shutting down")]
    Closed,
}

impl SubscriberError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

pub type SubscriberResult = Result<(), SubscriberError>;

/// Ordered list of callbacks of one kind, keyed by subscriber name
pub struct Subscribers<F: ?Sized> {
    entries: Vec<(String, Box<F>)>,
}

impl<F: ?Sized> Default for Subscribers<F> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<F: ?Sized> Subscribers<F> {
    /// Register a callback; a second registration under the same name replaces the first
    pub fn register(&mut self, name: impl Into<String>, callback: Box<F>) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = callback,
            None => self.entries.push((name, callback)),
        }
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| n != name);
        self.entries.len() != before
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Invoke every callback in registration order. A failing callback is
    /// logged with its name and does not stop the rest. Returns the number
    /// of failures.
    pub fn dispatch(&self, event: &'static str, mut call: impl FnMut(&F) -> SubscriberResult) -> usize {
        let mut failures = 0;
        for (name, callback) in &self.entries {
            if let Err(e) = call(callback.as_ref()) {
                failures += 1;
                error!(subscriber = %name, event, error = %e, "Subscriber callback failed");
            }
        }
        failures
    }
}

pub type StateChangedFn = dyn Fn(MatchPhase, MatchPhase) -> SubscriberResult + Send + Sync;
pub type MatchStartedFn = dyn Fn(&MatchSettings) -> SubscriberResult + Send + Sync;
pub type MatchEndedFn = dyn Fn(Option<Uuid>, &[MatchResult]) -> SubscriberResult + Send + Sync;
pub type PlayerEliminatedFn = dyn Fn(Uuid, u32) -> SubscriberResult + Send + Sync;
pub type CountdownFn = dyn Fn(u32) -> SubscriberResult + Send + Sync;

/// Subscribers of the match state machine
#[derive(Default)]
pub struct MatchEvents {
    pub state_changed: Subscribers<StateChangedFn>,
    pub match_started: Subscribers<MatchStartedFn>,
    pub match_ended: Subscribers<MatchEndedFn>,
    pub player_eliminated: Subscribers<PlayerEliminatedFn>,
    pub countdown: Subscribers<CountdownFn>,
}

impl MatchEvents {
    /// Drop every callback registered under `name`
    pub fn unregister(&mut self, name: &str) -> bool {
        let removed = [
            self.state_changed.unregister(name),
            self.match_started.unregister(name),
            self.match_ended.unregister(name),
            self.player_eliminated.unregister(name),
            self.countdown.unregister(name),
        ];
        removed.iter().any(|r| *r)
    }
}

pub type StormPhaseChangedFn = dyn Fn(StormPhase, usize) -> SubscriberResult + Send + Sync;
pub type StormPlayerFn = dyn Fn(Uuid) -> SubscriberResult + Send + Sync;
pub type StormDamageFn = dyn Fn(Uuid, f32) -> SubscriberResult + Send + Sync;
pub type StormWarningFn = dyn Fn(usize, f32) -> SubscriberResult + Send + Sync;

/// Subscribers of the safezone engine
#[derive(Default)]
pub struct StormEvents {
    pub phase_changed: Subscribers<StormPhaseChangedFn>,
    pub entered_storm: Subscribers<StormPlayerFn>,
    pub exited_storm: Subscribers<StormPlayerFn>,
    pub storm_damage: Subscribers<StormDamageFn>,
    pub storm_warning: Subscribers<StormWarningFn>,
}

impl StormEvents {
    /// Drop every callback registered under `name`
    pub fn unregister(&mut self, name: &str) -> bool {
        let removed = [
            self.phase_changed.unregister(name),
            self.entered_storm.unregister(name),
            self.exited_storm.unregister(name),
            self.storm_damage.unregister(name),
            self.storm_warning.unregister(name),
        ];
        removed.iter().any(|r| *r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    fn recorder(log: &Log, tag: &'static str) -> Box<CountdownFn> {
        let log = log.clone();
        Box::new(move |secs| {
            log.lock().unwrap().push(format!("{tag}:{secs}"));
            Ok(())
        })
    }

    #[test]
    fn test_failing_subscriber_does_not_block_others() {
        let log: Log = Arc::default();
        let mut subs: Subscribers<CountdownFn> = Subscribers::default();
        subs.register("first", recorder(&log, "first"));
        subs.register("broken", Box::new(|_| Err(SubscriberError::failed("boom"))));
        subs.register("last", recorder(&log, "last"));

        let failures = subs.dispatch("countdown", |cb| cb(3));

        assert_eq!(failures, 1);
        assert_eq!(*log.lock().unwrap(), vec!["first:3", "last:3"]);
    }

    #[test]
    fn test_same_name_replaces_callback() {
        let log: Log = Arc::default();
        let mut subs: Subscribers<CountdownFn> = Subscribers::default();
        subs.register("hud", recorder(&log, "old"));
        subs.register("hud", recorder(&log, "new"));
        assert_eq!(subs.len(), 1);

        subs.dispatch("countdown", |cb| cb(1));
        assert_eq!(*log.lock().unwrap(), vec!["new:1"]);
    }

    #[test]
    fn test_unregister_removes_all_kinds_for_name() {
        let mut events = MatchEvents::default();
        events.countdown.register("stats", Box::new(|_| Ok(())));
        events
            .player_eliminated
            .register("stats", Box::new(|_, _| Ok(())));
        events.countdown.register("hud", Box::new(|_| Ok(())));

        assert!(events.unregister("stats"));
        assert!(events.player_eliminated.is_empty());
        assert!(events.countdown.contains("hud"));
        assert!(!events.countdown.contains("stats"));
        assert!(!events.unregister("stats"));
    }
}
