//! SMB2 protocol definitions: framing, header codec, signing and message
//! bodies

pub mod constants;
pub mod frame;
pub mod header;
pub mod messages;
pub mod reader;
pub mod signing;

pub use header::{ParsedMessage, Smb2Header};
