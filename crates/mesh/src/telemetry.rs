//! Metric names and recording helpers.
//!
//! The library only records; installing an exporter is up to the binary.

use metrics::counter;

use crate::connection::Direction;

pub const CONNECTIONS_CREATED: &str = "linkweave_connections_created_total";
pub const LINK_SWAPS: &str = "linkweave_link_swaps_total";
pub const ESTABLISH_FAILURES: &str = "linkweave_establish_failures_total";
pub const HANDSHAKE_FAILURES: &str = "linkweave_handshake_failures_total";
pub const UNHANDLED_CONNECTIONS: &str = "linkweave_unhandled_connections_total";
pub const PEERS_DISCOVERED: &str = "linkweave_peers_discovered_total";
pub const PEERS_LOST: &str = "linkweave_peers_lost_total";

pub(crate) fn connection_created(direction: Direction) {
    counter!(CONNECTIONS_CREATED, "direction" => direction.as_str()).increment(1);
}

pub(crate) fn link_swapped() {
    counter!(LINK_SWAPS).increment(1);
}

pub(crate) fn establish_failed(stage: &'static str) {
    counter!(ESTABLISH_FAILURES, "stage" => stage).increment(1);
}

pub(crate) fn handshake_failed() {
    counter!(HANDSHAKE_FAILURES).increment(1);
}

pub(crate) fn unhandled_connection() {
    counter!(UNHANDLED_CONNECTIONS).increment(1);
}

pub(crate) fn peer_discovered() {
    counter!(PEERS_DISCOVERED).increment(1);
}

pub(crate) fn peer_lost() {
    counter!(PEERS_LOST).increment(1);
}
