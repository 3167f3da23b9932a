//! Mirror Sync
//!
//! Keeps a [`mirror_model`] store synchronized with a live, externally owned
//! tree.
//!
//! # Overview
//!
//! - **LiveTree**: host interface; stable keys, control queries, event delivery
//! - **TreeBuilder**: converts a live node into a mirror subtree
//! - **SyncEngine**: applies structural batches, interaction events and an
//!   idle reconciliation pass to the store
//! - **IdleScheduler**: best-effort low-priority repeating timer
//!
//! # Example
//!
//! ```rust,ignore
//! use mirror_sync::prelude::*;
//!
//! let engine = EngineBuilder::new(live, builder, store)
//!     .config(SyncConfig::load("mirror.toml")?)
//!     .connect(&root)?;
//!
//! // ... host runs; the engine follows the live tree ...
//!
//! engine.disconnect();
//! ```

#![warn(missing_docs)]

pub mod builder;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod live;
pub mod scheduler;
pub mod stats;

// Re-exports
pub use builder::TreeBuilder;
pub use cache::{PreviousStateCache, TrackedState};
pub use config::SyncConfig;
pub use engine::{labels, EngineBuilder, SyncEngine};
pub use error::{ConfigError, SyncError};
pub use events::{Delivery, EventSink, HostEvent};
pub use live::{
    ControlState, InteractionEvent, InteractionKind, LiveNode, LiveTree, MutationKind, MutationRecord,
    SubscriptionId,
};
pub use scheduler::{IdleCallback, IdleDetector, IdleScheduler, NeverIdle, NotifyIdle, YieldIdle};
pub use stats::SyncStats;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for hosts driving a sync engine
    pub use crate::{
        ControlState, EngineBuilder, EventSink, InteractionEvent, InteractionKind, LiveNode, LiveTree,
        MutationKind, MutationRecord, SubscriptionId, SyncConfig, SyncEngine, SyncError, TreeBuilder,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
