pub mod errors;
pub mod ids;
pub mod protocol;
pub mod replay;
pub mod snapshot;

pub use errors::RelayError;
pub use ids::{ConnectionId, EndpointId};
pub use protocol::{Envelope, InboundMessage, MessageType};
pub use snapshot::{StateBroadcast, StoreInspector, StoreSnapshot};
