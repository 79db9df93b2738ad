//! Dual-server fan-out and peer pairing
//!
//! Every view in the looking glass shows two route servers side by side.
//! The coordinator runs the same logical query against both clients
//! concurrently (the two round-trips share no state), waits for both, and
//! joins peer lists into one pair per distinct neighbor.

use std::collections::HashSet;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::cache::NeighborLabelCache;
use crate::client::{RouteServerClient, RouteServerHandle};
use crate::config::BirdseyeConfig;
use crate::dump::{IpFamily, ParseError};
use crate::peer::Peer;
use crate::route::{RouteEntry, RouteLookup};

// =============================================================================
// Pairing
// =============================================================================

/// A two-sided join record. Either side may be absent, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pair<L, R = L> {
    /// Join key, the neighbor address in string form.
    pub key: String,
    pub left: Option<L>,
    pub right: Option<R>,
}

/// One distinct neighbor across both route servers, with core summary
/// fields mirrored from whichever side is present. Produced at
/// presentation time only, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerPair {
    pub value: u128,
    pub neighbor_address: IpAddr,
    pub neighbor_as: Option<u32>,
    pub description: Option<String>,
    pub sides: Pair<Peer, Peer>,
}

impl PeerPair {
    fn from_sides(summary: &Peer, left: Option<Peer>, right: Option<Peer>) -> PeerPair {
        PeerPair {
            value: summary.value,
            neighbor_address: summary.neighbor_address,
            neighbor_as: summary.neighbor_as,
            description: summary.description.clone(),
            sides: Pair {
                key: summary.neighbor_address.to_string(),
                left,
                right,
            },
        }
    }
}

/// Find the peer with a given neighbor address in a list.
pub fn find_pair<'a>(address: &IpAddr, peers: &'a [Peer]) -> Option<&'a Peer> {
    peers.iter().find(|p| p.neighbor_address == *address)
}

/// Join two peer lists into one pair per distinct neighbor.
///
/// First pass walks side one and matches each peer against side two by
/// neighbor address; the second pass picks up side-two peers whose `value`
/// was not seen, so every neighbor appearing on either side lands in
/// exactly one pair and no pair has both sides empty.
pub fn peer_pairs(rs1_peers: &[Peer], rs2_peers: &[Peer]) -> Vec<PeerPair> {
    let mut pairs = Vec::new();
    let mut seen: HashSet<u128> = HashSet::new();

    for peer in rs1_peers {
        let twin = find_pair(&peer.neighbor_address, rs2_peers).cloned();
        pairs.push(PeerPair::from_sides(peer, Some(peer.clone()), twin));
        seen.insert(peer.value);
    }

    for peer in rs2_peers {
        if seen.contains(&peer.value) {
            continue;
        }
        let twin = find_pair(&peer.neighbor_address, rs1_peers).cloned();
        pairs.push(PeerPair::from_sides(peer, twin, Some(peer.clone())));
    }

    pairs
}

// =============================================================================
// Coordinator
// =============================================================================

/// Runs the same logical query against two route servers and merges the
/// results. The two clients are independent; a session-less side simply
/// contributes empty results.
pub struct DualServerCoordinator {
    rs1: RouteServerClient,
    rs2: RouteServerClient,
}

impl DualServerCoordinator {
    pub fn new(rs1: RouteServerClient, rs2: RouteServerClient) -> Self {
        Self { rs1, rs2 }
    }

    /// Build and connect both clients for one service/family pair. Label
    /// caching is enabled when the cache directory is usable.
    pub async fn from_config(config: &BirdseyeConfig, service: &str, family: IpFamily) -> Self {
        let options = config.client_options();
        let cache = NeighborLabelCache::new(&config.data_dir).ok();

        let handle1 = RouteServerHandle::new(config.rs1_host.as_str(), service, family);
        let handle2 = RouteServerHandle::new(config.rs2_host.as_str(), service, family);
        let (mut rs1, mut rs2) = tokio::join!(
            RouteServerClient::connect(handle1, config.communities.clone(), options.clone()),
            RouteServerClient::connect(handle2, config.communities.clone(), options),
        );
        if let Some(cache) = cache {
            rs1 = rs1.with_label_cache(cache.clone());
            rs2 = rs2.with_label_cache(cache);
        }
        Self { rs1, rs2 }
    }

    pub fn clients(&self) -> (&RouteServerClient, &RouteServerClient) {
        (&self.rs1, &self.rs2)
    }

    /// Peer lists of both servers, fetched concurrently.
    pub async fn peers(&mut self) -> (Vec<Peer>, Vec<Peer>) {
        tokio::join!(self.rs1.list_peers(), self.rs2.list_peers())
    }

    /// The paired summary view: one record per distinct neighbor.
    pub async fn peer_summary(&mut self) -> Vec<PeerPair> {
        let (rs1_peers, rs2_peers) = self.peers().await;
        let mut pairs = peer_pairs(&rs1_peers, &rs2_peers);
        pairs.sort_by_key(|p| p.value);
        pairs
    }

    /// One peer as seen by each server.
    pub async fn peer(&mut self, peer_id: &str) -> (Option<Peer>, Option<Peer>) {
        tokio::join!(self.rs1.get_peer(peer_id), self.rs2.get_peer(peer_id))
    }

    /// A peer's route listing as seen by each server.
    #[allow(clippy::type_complexity)]
    pub async fn routes(
        &mut self,
        peer_id: &str,
        rejected: bool,
    ) -> (
        Option<(Peer, Vec<RouteEntry>)>,
        Option<(Peer, Vec<RouteEntry>)>,
    ) {
        tokio::join!(
            self.rs1.list_routes(peer_id, rejected),
            self.rs2.list_routes(peer_id, rejected)
        )
    }

    /// A destination lookup as seen by each server. The input is validated
    /// once, before either remote call.
    pub async fn route(
        &mut self,
        destination: &str,
    ) -> Result<(RouteLookup, RouteLookup), ParseError> {
        crate::client::route_lookup_command(destination)?;
        let (rs1, rs2) = tokio::join!(
            self.rs1.lookup_route(destination),
            self.rs2.lookup_route(destination)
        );
        Ok((rs1?, rs2?))
    }
}

// =============================================================================
// Tests
// =============================================================================
