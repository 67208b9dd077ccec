//! The `EventSink` trait (spec §6, §4.4 "Observability") plus
//! [`TracingEventSink`]. The test-only `RecordingEventSink` double lives in
//! `cldctl-testing` since nothing outside tests needs to read events back.

use crate::error::PluginPhase;

/// One lifecycle transition a worker reports (spec §4.4: "started,
/// hook-selected, apply-start, apply-ok|err, outputs-ready").
#[derive(Debug, Clone)]
pub enum Event {
    Started { node_id: String },
    HookSelected { node_id: String, module_source: String },
    ApplyStart { node_id: String, phase: PluginPhase },
    ApplyOk { node_id: String, phase: PluginPhase },
    ApplyErr { node_id: String, phase: PluginPhase, message: String },
    OutputsReady { node_id: String },
    Skipped { node_id: String, cause: String },
}

impl Event {
    pub fn node_id(&self) -> &str {
        match self {
            Event::Started { node_id }
            | Event::HookSelected { node_id, .. }
            | Event::ApplyStart { node_id, .. }
            | Event::ApplyOk { node_id, .. }
            | Event::ApplyErr { node_id, .. }
            | Event::OutputsReady { node_id }
            | Event::Skipped { node_id, .. } => node_id,
        }
    }
}

/// Where the executor writes lifecycle events (spec §6). Implementations
/// must not block the scheduler loop for long; `TracingEventSink` just
/// emits a `tracing` event and returns immediately.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Emits every event as a `tracing` event at `info` (state transitions) or
/// `warn` (failures) level, matching the teacher's use of `tracing` for
/// structured, greppable logs rather than ad hoc `println!`.
#[derive(Default)]
pub struct TracingEventSink;

impl TracingEventSink {
    pub fn new() -> Self {
        TracingEventSink
    }
}

impl EventSink for TracingEventSink {
    fn emit(&self, event: Event) {
        match &event {
            Event::Started { node_id } => tracing::info!(node_id, "node started"),
            Event::HookSelected { node_id, module_source } => {
                tracing::info!(node_id, module_source, "hook selected")
            }
            Event::ApplyStart { node_id, phase } => {
                tracing::info!(node_id, %phase, "apply start")
            }
            Event::ApplyOk { node_id, phase } => {
                tracing::info!(node_id, %phase, "apply ok")
            }
            Event::ApplyErr { node_id, phase, message } => {
                tracing::warn!(node_id, %phase, message, "apply err")
            }
            Event::OutputsReady { node_id } => tracing::info!(node_id, "outputs ready"),
            Event::Skipped { node_id, cause } => tracing::warn!(node_id, cause, "node skipped"),
        }
    }
}
