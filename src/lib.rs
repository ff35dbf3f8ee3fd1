// Library exports for hosts and tests

pub mod appkeys;
pub mod bridge;
pub mod config;
pub mod error;
pub mod events;
pub mod flow;
pub mod gateway;
pub mod hub;
pub mod session;
pub mod storage;
pub mod transactions;

// Re-export commonly used types
pub use bridge::{BridgeError, HostBridge, PageView};
pub use config::ShimConfig;
pub use error::ShimError;
pub use events::{ShimEvent, TransactionId};
pub use flow::{FlowOptions, FlowState, UiPhase};
pub use gateway::ReturnLink;
pub use hub::{EventHub, Handler, HandlerError};
pub use session::OverlaySession;
