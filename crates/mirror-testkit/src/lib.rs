//! Mirror Testkit
//!
//! Test doubles for driving a [`mirror_sync::SyncEngine`] without a real host:
//!
//! - [`FakeDom`]: in-memory live tree with batched change records,
//!   interaction events and silent control state setters
//! - [`FakeBuilder`]: reference tree builder for [`FakeDom`]
//! - [`RecordingStore`]: [`mirror_model::MirrorTree`] that records every call

#![warn(missing_docs)]

pub mod builder;
pub mod dom;
pub mod store;

pub use builder::FakeBuilder;
pub use dom::{FakeDom, FakeElement, InputType};
pub use store::{RecordingStore, StoreCall};

use mirror_sync::{EngineBuilder, SyncConfig, SyncEngine, SyncError};
use std::sync::Arc;

/// Engine over the test doubles
pub type FakeEngine = SyncEngine<FakeDom, FakeBuilder, RecordingStore>;

/// Connect an engine mirroring the whole of `dom`
///
/// # Errors
/// Whatever [`EngineBuilder::connect`] returns.
pub fn connect(dom: &Arc<FakeDom>, config: SyncConfig) -> Result<FakeEngine, SyncError> {
    EngineBuilder::new(Arc::clone(dom), FakeBuilder, Arc::new(RecordingStore::new()))
        .config(config)
        .connect(dom.root())
}
