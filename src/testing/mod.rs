//! Testing utilities for CrabCall
//!
//! Synthetic capture sources and a recording peer connection, for running
//! call views offline.

pub mod recording_peer;
pub mod synthetic_data;

pub use recording_peer::{RecordingPeer, RecordingPeerFactory};
pub use synthetic_data::{handset_sources, StopCounter, SyntheticMediaDevices};
