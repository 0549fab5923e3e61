//! Core protocol types shared by the codec, the connection state machine and
//! the streaming engine.
//!
//! The module is split the same way the wire is: request side ([`RequestHeader`]),
//! response side ([`ResponseHead`], [`ResponseBody`]), framing ([`Message`],
//! [`PayloadItem`], [`PayloadSize`]) and the error taxonomy ([`HttpError`] and
//! friends).

mod body;
mod error;
mod message;
mod request;
mod response;

pub use body::ResponseBody;
pub use error::{HttpError, ParseError, SendError, StreamError};
pub use message::{Message, PayloadItem, PayloadSize};
pub use request::RequestHeader;
pub use response::ResponseHead;
