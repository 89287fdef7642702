//! Worker agent runtime: identity, tool probing and execution, coordinator
//! session, heartbeat, push/pull task delivery and the remote debug channel.

pub mod components;
pub mod identity;
pub mod process;
pub mod resources;
pub mod state;
pub mod timings;
pub mod tools;

pub use components::{
    ConnectionSupervisor, CoordinatorClient, DeliverySource, HeartbeatManager, OfferOutcome,
    PushChannel, RemoteDebugChannel, SessionManager, TaskDispatcher, TaskExecutor, WorkerStatus,
};
pub use identity::resolve_machine_id;
pub use resources::ResourceSampler;
pub use state::{AgentState, ClaimRejection, SlotGuard, TaskSlot};
pub use timings::AgentTimings;
pub use tools::{CliAdapter, OllamaAdapter, ToolAdapter, ToolError, ToolOutput, ToolRegistry};
