//! Shared foundational types used across the weft build driver.
//!
//! This crate provides content hashing for stamps and cache keys, the generic
//! [`Term`] syntax-tree value exchanged with extension toolchains, and the
//! common internal-error result type.

#![warn(missing_docs)]

pub mod hash;
pub mod result;
pub mod term;

pub use hash::ContentHash;
pub use result::{InternalError, WeftResult};
pub use term::Term;
