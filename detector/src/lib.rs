//! # Detector Client Library
//!
//! Client side of the proximity buff helper. The detector samples the local
//! character's minimap position, shares it with other players through the
//! relay, and fires a configured buff key sequence whenever a teammate comes
//! close.
//!
//! ## Architecture Overview
//!
//! Four long-lived tasks cooperate through shared handles:
//!
//! - **Relay client** ([`network::RelayClient`]): owns the UDP socket,
//!   runs the detection timer, and keeps the [`proximity::PeerView`] fresh
//!   from relay snapshots.
//! - **Proximity evaluator** ([`proximity::ProximityEvaluator`]): polls the
//!   peer view and, when armed, enqueues the buff key batch at most once per
//!   cooldown window.
//! - **Action dispatcher** ([`dispatcher::spawn_worker`]): the single
//!   consumer that turns queued tokens into paced key presses.
//! - **Control API** ([`control`]): local HTTP endpoints for start, stop,
//!   recalibration, and position inspection.
//!
//! Platform-specific pieces (screen capture, the calibration UI, OS input
//! synthesis) sit behind the traits in [`capture`], with simulated
//! implementations included for development and tests.

pub mod capture;
pub mod config;
pub mod control;
pub mod dispatcher;
pub mod network;
pub mod proximity;
