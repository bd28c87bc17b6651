// Protocol module - WHAT GOES ON THE WIRE
// Message types, postcard encoding, compound packing and stream framing

mod compound;
mod message;
mod stream;

pub use compound::{
    make_compound_messages, pack_packet, COMPOUND_HEADER_OVERHEAD, COMPOUND_OVERHEAD,
    MAX_COMPOUND_PARTS, USER_MSG_OVERHEAD,
};
pub use message::{
    Ack, Alive, Dead, ErrorResponse, IndirectPing, Message, Nack, Ping, PushNodeState, PushPull,
    Suspect,
};
pub use stream::{read_frame, write_frame, MAX_FRAME_SIZE};

use thiserror::Error;

/// Encoding and framing errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Encoding failed: {0}")]
    Encode(String),

    #[error("Decoding failed: {0}")]
    Decode(String),

    #[error("Frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Unexpected message: {0}")]
    Unexpected(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
