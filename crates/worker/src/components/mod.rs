pub mod coordinator_client;
pub mod heartbeat_manager;
pub mod push_channel;
pub mod remote_debug;
pub mod session;
pub mod task_execution;
pub mod worker_lifecycle;

pub use coordinator_client::{CoordinatorClient, API_KEY_HEADER};
pub use heartbeat_manager::HeartbeatManager;
pub use push_channel::PushChannel;
pub use remote_debug::RemoteDebugChannel;
pub use session::SessionManager;
pub use task_execution::{
    start_task_consumer, DeliverySource, OfferOutcome, TaskDispatcher, TaskExecutor,
};
pub use worker_lifecycle::{ConnectionSupervisor, WorkerStatus};
