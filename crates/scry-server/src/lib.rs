pub mod peer;
pub mod server;

pub use peer::{Peer, PeerRegistry};
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
