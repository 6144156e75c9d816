//! Conversation reconstruction.
//!
//! [`resolver`] groups messages into threads at index time with a union-find
//! over the reference graph. [`tree`] rebuilds the reply hierarchy of one
//! thread on demand.

pub mod resolver;
pub mod tree;
