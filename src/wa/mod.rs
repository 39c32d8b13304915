pub mod bridge;
pub mod client;
pub mod error;
pub mod events;
pub mod types;

pub use bridge::{BridgeClient, BridgeConnector};
pub use client::{ProtocolClient, ProtocolConnector, TransportState};
pub use error::{MessageError, ProtocolError, TransportError};
pub use events::ProtocolEvent;
pub use types::{AccountInfo, GroupInfo, OutgoingMessage};
