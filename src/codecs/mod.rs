//! Codec Implementations
//!
//! Built-in implementations of the [`ValueCodec`](crate::traits::ValueCodec)
//! and [`KeyCodec`](crate::traits::KeyCodec) traits.

mod json;
pub use json::{JsonCodec, JsonKeyCodec};

#[cfg(feature = "bincode")]
mod message;
#[cfg(feature = "bincode")]
pub use message::MessageCodec;
