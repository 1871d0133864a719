pub mod agent;
pub mod coordinator;
pub mod discovery;
pub mod relay;

pub use agent::StoreAgent;
pub use coordinator::{spawn_coordinator, BroadcastConfig, BroadcastState, CoordinatorHandle};
pub use discovery::{discover, RetryPolicy};
pub use relay::Relay;
