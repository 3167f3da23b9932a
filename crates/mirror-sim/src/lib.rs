//! Mirror Simulator
//!
//! Drives a [`mirror_testkit::FakeDom`] and a connected engine with seeded
//! random operations and checks, after every reconciliation checkpoint, that:
//!
//! - the mirror equals a fresh build of the live tree (focus flags aside)
//! - at most one mirror node is flagged focused, at every step
//! - the flagged node is the live active element when it is mirrored and
//!   interactive
//! - the store's parent/child links are consistent

#![warn(missing_docs)]

pub mod simulator;

pub use simulator::{
    run_simulator, run_soak, SimulatedOperation, SimulatorConfig, SimulatorReport, SimulatorStats, SoakReport,
    Violation,
};
