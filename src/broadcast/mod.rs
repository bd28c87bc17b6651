// Broadcast module - WHAT WE GOSSIP
// Transmit-limited dissemination of membership updates and user messages

mod queue;
mod traits;

pub use queue::{NumNodesFn, TransmitLimitedQueue};
pub use traits::{Broadcast, MemberlistBroadcast};
