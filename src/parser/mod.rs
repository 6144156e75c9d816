//! Email parsing: MBOX streaming scanner, header decoding, and MIME handling.

pub mod header;
pub mod mbox;
pub mod mime;
