mod error;
mod key;
mod node;

pub use error::{err, Error, Result};
pub use key::Key;
pub use node::{Destination, Node, NodeId, ProtocolCode};
