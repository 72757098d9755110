//! Wire format - inbound event envelope, outbound frames and their codec

pub mod events;
pub mod parser;

pub use events::{InboundEvent, OutboundFrame};
pub use parser::{encode_frame, parse_frame};
