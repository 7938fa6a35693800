//! Object identity for the gitwire smart-protocol stack.
//!
//! This crate provides the core `ObjectId` type used in every wire message,
//! the `HashAlgorithm` selector advertised through the `object-format`
//! capability, and the hex encoding/decoding the pkt-line payloads use.

mod algorithm;
mod error;
pub mod hex;
mod oid;

pub use algorithm::HashAlgorithm;
pub use error::HashError;
pub use oid::ObjectId;
