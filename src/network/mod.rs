//! Peer-to-peer synchronization
//!
//! TCP message exchange between nodes: the command-tagged wire format, the
//! known-peer set, and the server loop that keeps chains converged and
//! relays transactions.

pub mod node;
pub mod protocol;
pub mod server;

pub use node::{Node, Nodes};
pub use protocol::{InvKind, COMMAND_LENGTH};
pub use server::{send_tx, Server, CENTRAL_NODE, TRANSACTION_THRESHOLD};
