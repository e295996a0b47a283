//! Run-length codec for the `__dyn` feature-flag bitmap.
//!
//! A [`Bitmap`] is flattened into alternating runs, every run length is
//! written as an Elias-gamma code, the bit buffer is byte-reversed and the
//! bytes are base64-encoded with the service's own alphabet.

mod bitmap;
mod codec;

pub use bitmap::Bitmap;
pub use codec::{decode, encode, DecodeError, EncodedToken, MAX_POSITION};
