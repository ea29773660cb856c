//! In-process paired channel: two endpoints wired back to back, the test
//! stand-in for a real nested-context message channel. Both peers run in
//! one process and payloads are copied on every post.

use crate::port::{Delivery, Endpoint, FaultSwitch, PeerPort};
use tokio::sync::mpsc;

/// Fault switches for both directions of a paired channel.
#[derive(Clone, Default)]
pub struct PairFaults {
    /// Posts from the first endpoint toward the second.
    pub a_to_b: FaultSwitch,
    /// Posts from the second endpoint toward the first.
    pub b_to_a: FaultSwitch,
}

/// Build a paired channel. The first endpoint's `link` reaches the second
/// peer and vice versa.
pub fn pair(origin_a: impl Into<String>, origin_b: impl Into<String>) -> (Endpoint, Endpoint) {
    let (a, b, _) = pair_with_faults(origin_a, origin_b);
    (a, b)
}

/// Like [`pair`], also returning the fault switches for send-failure
/// injection.
pub fn pair_with_faults(
    origin_a: impl Into<String>,
    origin_b: impl Into<String>,
) -> (Endpoint, Endpoint, PairFaults) {
    let origin_a = origin_a.into();
    let origin_b = origin_b.into();
    let (tx_a, rx_a) = mpsc::unbounded_channel::<Delivery>();
    let (tx_b, rx_b) = mpsc::unbounded_channel::<Delivery>();
    let faults = PairFaults::default();

    let a_link = PeerPort::new(
        tx_b.clone(),
        origin_b.clone(),
        tx_a.clone(),
        origin_a.clone(),
        faults.a_to_b.clone(),
        faults.b_to_a.clone(),
    );
    let b_link = PeerPort::new(
        tx_a,
        origin_a.clone(),
        tx_b,
        origin_b.clone(),
        faults.b_to_a.clone(),
        faults.a_to_b.clone(),
    );

    let a = Endpoint {
        rx: rx_a,
        link: a_link,
        local_origin: origin_a,
    };
    let b = Endpoint {
        rx: rx_b,
        link: b_link,
        local_origin: origin_b,
    };
    (a, b, faults)
}
