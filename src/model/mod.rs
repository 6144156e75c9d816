//! Core data model types for email messages, addresses, and attachments.

pub mod address;
pub mod attachment;
pub mod mail;
