//! Test doubles and fixtures for `cldctl-core`'s out-of-scope collaborator
//! traits (spec §4.5, §6): a mock plugin, an in-memory state backend, a
//! static secrets manager, a recording event sink, and constructors for the
//! abstract component/datacenter values the builder consumes.
//!
//! Shape mirrors the teacher's own `dashflow-testing` crate: one mock per
//! collaborator trait, builder-style configuration, call histories for
//! assertions.

mod fixtures;
mod in_memory_state_backend;
mod mock_plugin;
mod recording_event_sink;
mod static_secrets;

pub use fixtures::{
    build_graph_with_catch_all, catch_all_datacenter, deployment_component,
    deployment_with_database, with_dependency,
};
pub use in_memory_state_backend::InMemoryStateBackend;
pub use mock_plugin::{ApplyHandler, MockPlugin};
pub use recording_event_sink::RecordingEventSink;
pub use static_secrets::StaticSecretsManager;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        build_graph_with_catch_all, catch_all_datacenter, deployment_component,
        deployment_with_database, with_dependency, InMemoryStateBackend, MockPlugin,
        RecordingEventSink, StaticSecretsManager,
    };
}
