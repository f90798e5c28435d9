// Dashboard real-time core
//
// This crate provides the storage-agnostic pieces of the staff dashboard:
// the event model, the local subscriber registry, the publish pipeline with
// its subscription streams, and the action-polling agent.
//
// Key design decisions:
// - Uses traits (EventStore, EventNotifier, AutomationBackend, IntentClassifier)
//   for pluggable backends; the control plane supplies Postgres and HTTP ones
// - The channel registry is an owned object injected into the bus, never a global
// - SSE frames are formatted here so every transport emits identical bytes
// - Each publish step is isolated: a failing step is reported, later steps still run

// Telemetry (console logging via tracing-subscriber)
pub mod telemetry;

pub mod actions;
pub mod agent;
pub mod bus;
pub mod error;
pub mod events;
pub mod intents;
pub mod registry;
pub mod traits;

// In-memory implementations for dev mode and testing
pub mod memory;

// Re-exports for convenience
pub use actions::{
    ActionKind, ActionRequest, ActionRun, AgentInput, AgentReply, ConversationContext,
    RunStatus, SuggestedAction, SuggestionType,
};
pub use agent::{ActionAgent, AgentTurn, PollOutcome, PollPolicy, RunPhase};
pub use bus::{BusConfig, EventBus, EventStream, PublishReport, StepOutcome};
pub use error::{DashboardError, Result};
pub use events::{ChannelKey, DashboardEvent, EventNotice, StoredEvent};
pub use intents::KeywordClassifier;
pub use memory::{InMemoryEventStore, RecordingNotifier};
pub use registry::{ChannelRegistry, ClientHandle, Fanout, Registration, WriteError};
pub use traits::{AutomationBackend, EventNotifier, EventStore, IntentClassifier, NoopNotifier};
