//! Royale Match Server - authoritative match lifecycle and storm simulation
//!
//! The library holds the match state machine, the safezone engine and the
//! session plumbing between them. The binary drives simulated matches.

pub mod config;
pub mod game;
pub mod sim;
pub mod util;
