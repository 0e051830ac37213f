pub mod message;
pub mod serialiser;

pub use message::{Message, MessageParser, ParseError, Tag};
pub use serialiser::{Frame, FrameSerialiser, FrameTooLong};
