//! SMB2 message body definitions

pub mod common;
pub mod create;
pub mod directory;
pub mod echo;
pub mod negotiate;
pub mod session;
pub mod tree;

pub use common::{FileId, SmbMessage};
