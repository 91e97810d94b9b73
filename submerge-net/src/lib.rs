mod error;
mod failure_detector;
mod handshake;
mod socket;

pub use error::NetError;
pub use failure_detector::FailureDetector;
pub use socket::{SocketAndStreams, SocketFactoryConfig, SocketResourceFactory};
