//! Simulated players for driving matches without clients

pub mod bots;

pub use bots::{BotDriver, BotProfile, BotStyle};
