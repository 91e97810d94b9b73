use std::fmt;

/// Errors arising from `SocketResourceFactory::create`. Distinct from the
/// store-level error classification in `submerge-txn`: these are
/// transport-construction failures, not per-request outcomes.
#[derive(Debug)]
pub enum NetError {
    Io(std::io::Error),
    /// Server replied `"no"` to the proposed protocol.
    HandshakeRejected { protocol: String },
    /// Server replied with something other than `"ok"` or `"no"`.
    HandshakeUnknownResponse { raw: String },
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetError::Io(e) => write!(f, "socket io error: {e}"),
            NetError::HandshakeRejected { protocol } => {
                write!(f, "protocol {protocol} rejected by server")
            }
            NetError::HandshakeUnknownResponse { raw } => {
                write!(f, "unexpected handshake response: {raw:?}")
            }
        }
    }
}

impl std::error::Error for NetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NetError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for NetError {
    fn from(e: std::io::Error) -> Self {
        NetError::Io(e)
    }
}
