// Compound Messages - Many small messages in one packet

use crate::protocol::{Message, ProtocolError};

/// Parts allowed in a single compound message
pub const MAX_COMPOUND_PARTS: usize = 255;

/// Bytes reserved for the compound tag and part count
pub const COMPOUND_HEADER_OVERHEAD: usize = 3;

/// Bytes reserved per part for its length prefix
pub const COMPOUND_OVERHEAD: usize = 3;

/// Bytes a `User` wrapper adds around a delegate broadcast
pub const USER_MSG_OVERHEAD: usize = 4;

/// Pack encoded messages into as few compound messages as needed,
/// at most `MAX_COMPOUND_PARTS` parts each
pub fn make_compound_messages(msgs: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, ProtocolError> {
    let mut out = Vec::with_capacity(msgs.len().div_ceil(MAX_COMPOUND_PARTS));
    let mut iter = msgs.into_iter().peekable();

    while iter.peek().is_some() {
        let chunk: Vec<Vec<u8>> = iter.by_ref().take(MAX_COMPOUND_PARTS).collect();
        out.push(Message::Compound(chunk).encode()?);
    }

    Ok(out)
}

/// Send a lone message as-is; bundle anything more
pub fn pack_packet(msgs: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, ProtocolError> {
    if msgs.len() <= 1 {
        return Ok(msgs);
    }
    make_compound_messages(msgs)
}
