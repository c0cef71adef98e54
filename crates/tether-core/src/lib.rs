pub mod address;
pub mod errors;
pub mod events;
pub mod frames;

pub use address::Address;
pub use errors::SessionError;
pub use events::{BridgeEvent, InboundMessage, LinkStatus};
pub use frames::{parse_command, ControllerCommand, SendReply};
