//! Ladder-staked binary options trader with a live observer broadcast.
//!
//! The trading worker runs a martingale-style stake ladder over randomly
//! selected synthetic markets; every observable state change is published to
//! a broadcast hub that fans wire-format JSON out to websocket observers.

pub mod config;
pub mod engine;
pub mod events;
pub mod hub;
pub mod ladder;
pub mod logging;
pub mod observer;
pub mod protocol;
pub mod sequence;
pub mod supervisor;
