// Transport module - THE WIRE (abstract)
// Packet and stream transport for the membership engine: in-memory for
// tests, UDP + TCP for real deployments

mod mock;
mod net;
mod traits;

pub use traits::{
    // Core trait
    Transport,
    // Streams and packets
    AsyncStream, BoxStream, IncomingStream, Packet,
    // Lifecycle and errors
    TransportError, TransportState,
};

pub use mock::{MockNetwork, MockTransport};

pub use net::{NetTransport, NetTransportConfig};
