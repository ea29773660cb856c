pub mod paired;
pub mod port;

pub use paired::{pair, pair_with_faults, PairFaults};
pub use port::{Delivery, Endpoint, FaultSwitch, PeerPort, TransportError};
