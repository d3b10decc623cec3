//! RESP (REdis Serialization Protocol) building blocks for clients.
//!
//! Provides [`Value`] parsing for replies read off the wire and [`Request`]
//! encoding for arbitrary command argument lists.
//!
//! # Example
//!
//! ```
//! use protocol_resp::{Request, Value};
//!
//! let mut buf = Vec::new();
//! Request::new(&["GET", "greeting"]).encode(&mut buf);
//! assert_eq!(&buf, b"*2\r\n$3\r\nGET\r\n$8\r\ngreeting\r\n");
//!
//! let (value, consumed) = Value::parse(b"$5\r\nhello\r\n").unwrap();
//! assert_eq!(value, Value::BulkString(b"hello".to_vec()));
//! assert_eq!(consumed, 11);
//! ```

mod error;
mod request;
mod value;

pub use error::ParseError;
pub use request::Request;
pub use value::{ParseOptions, Value};
