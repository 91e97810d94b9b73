use std::io::{Read, Write};

use submerge_base::ProtocolCode;

use crate::error::NetError;

/// Performs the protocol handshake on a freshly connected transport:
/// write the protocol code, flush, read exactly two bytes back.
///
///   "ok" -> accepted
///   "no" -> rejected (HandshakeRejected)
///   anything else -> HandshakeUnknownResponse
pub(crate) fn perform<S: Read + Write>(stream: &mut S, protocol: &ProtocolCode) -> Result<(), NetError> {
    stream.write_all(protocol.as_bytes())?;
    stream.flush()?;

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply)?;

    match &reply {
        b"ok" => Ok(()),
        b"no" => Err(NetError::HandshakeRejected {
            protocol: protocol.to_string(),
        }),
        _ => Err(NetError::HandshakeUnknownResponse {
            raw: String::from_utf8_lossy(&reply).into_owned(),
        }),
    }
}
