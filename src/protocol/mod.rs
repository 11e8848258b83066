//! # The Wire Protocol
//!
//! ASCII-framed, self-delimiting request/response codec:
//! - `wire`: length-prefixed segments and the numeric field primitives
//! - `request`: request codes and request parsing
//! - `response`: response codes and payload writers

pub mod request;
pub mod response;
pub mod wire;

pub use request::Request;
pub use response::ResponseCode;
pub use wire::ProtocolError;
