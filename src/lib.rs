//! Proxy subscription interchange: decode links and Clash-style documents
//! into one node model, re-encode them, and assemble merged Clash configs.

pub mod assemble;
pub mod block_decode;
pub mod clash;
pub mod fetch;
pub mod import;
pub mod link_decode;
pub mod link_encode;
pub mod logging;
pub mod node;
pub mod peel;
pub mod subscription;

pub use assemble::{assemble, assemble_group, assemble_links, GroupSpec, SourceId, SourceResolver, SourceTable};
pub use link_decode::{parse_link, DecodeError};
pub use node::{Node, Port, Protocol};
pub use subscription::{parse_subscription, Strategy};
