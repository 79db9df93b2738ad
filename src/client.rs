//! Route-server client
//!
//! A [`RouteServerClient`] owns one SSH session to one route-server host
//! and exposes the high-level queries: list peers, fetch one peer, dump a
//! peer's routes, look up a destination. Every operation composes the same
//! pipeline: build the birdc command, execute it remotely, segment the
//! dump, parse the blocks.
//!
//! A client without a live session is a valid state, not an error: every
//! query simply returns empty results, so a disconnected route server
//! contributes nothing instead of failing the whole view.

use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::NeighborLabelCache;
use crate::community::CommunityTables;
use crate::dump::{regex, segment_protocols, IpFamily, ParseError};
use crate::peer::Peer;
use crate::route::{lookup_destination, parse_route_dump, RouteEntry, RouteLookup};
use crate::ssh::SshSession;

/// Cap on route entries pulled from one remote dump. Listings short-circuit
/// to an empty result when the peer's counter already exceeds this, to
/// avoid an unbounded dump over the wire.
pub const ROUTE_DUMP_LIMIT: usize = 300;

// =============================================================================
// Handle and options
// =============================================================================

/// Identity of one route-server instance: which host to reach, which
/// service's control socket to address, and the IP family it serves.
/// Immutable after construction; drives command-string construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteServerHandle {
    pub host: String,
    pub service: String,
    pub family: IpFamily,
}

impl RouteServerHandle {
    pub fn new(host: impl Into<String>, service: impl Into<String>, family: IpFamily) -> Self {
        Self {
            host: host.into(),
            service: service.into(),
            family,
        }
    }

    /// Control socket path for this service/family pair.
    pub fn control_socket(&self) -> String {
        format!("/var/run/bird{}.{}.ctl", self.family.digit(), self.service)
    }

    /// Wrap a bird command into the remote shell invocation.
    pub fn server_command(&self, birdc_bin: &str, bird_command: &str) -> String {
        format!(
            "{} -s {} '{}'",
            birdc_bin,
            self.control_socket(),
            bird_command
        )
    }
}

/// Tunables for one client, usually taken from the configuration.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// The birdc binary (or a privileged wrapper around it) on the remote
    /// host.
    pub birdc_bin: String,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            birdc_bin: "birdc".to_string(),
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(5),
        }
    }
}

// =============================================================================
// Command strings
// =============================================================================

lazy_static! {
    static ref PEER_ID: Regex = regex(r"^peer_\w+$");
}

/// Whether a caller-supplied identifier has the normalized `peer_<word>`
/// shape. Peer ids arrive from user requests and end up inside the remote
/// shell invocation, so anything else is rejected before a command is
/// built.
pub fn valid_peer_id(peer_id: &str) -> bool {
    PEER_ID.is_match(peer_id)
}

/// `show protocols all`, optionally scoped to one family-tagged peer id.
pub fn peers_command(peer_id: Option<&str>) -> String {
    match peer_id {
        Some(id) => format!("show protocols all {}", id),
        None => "show protocols all".to_string(),
    }
}

/// `show route protocol <peerId> [filtered] all` for a family-tagged peer
/// id.
pub fn routes_command(peer_id: &str, rejected: bool) -> String {
    if rejected {
        format!("show route protocol {} filtered all", peer_id)
    } else {
        format!("show route protocol {} all", peer_id)
    }
}

/// `show route <cidr> all` or `show route for <address> all`, depending on
/// whether the input is a prefix or a bare address. Rejects anything that
/// parses as neither, before any remote call is made.
pub fn route_lookup_command(destination: &str) -> Result<String, ParseError> {
    let invalid = || ParseError::InvalidDestination(destination.to_string());

    if destination.contains('/') {
        destination
            .parse::<ipnet::IpNet>()
            .map_err(|_| invalid())?;
        Ok(format!("show route {} all", destination))
    } else {
        destination
            .parse::<std::net::IpAddr>()
            .map_err(|_| invalid())?;
        Ok(format!("show route for {} all", destination))
    }
}

/// Whether a route listing for this peer would exceed the dump cap and
/// must short-circuit to an empty result.
pub fn exceeds_dump_limit(peer: &Peer, rejected: bool) -> bool {
    let counter = if rejected {
        peer.filtered_routes
    } else {
        peer.imported_routes
    };
    counter > ROUTE_DUMP_LIMIT as u64
}

// =============================================================================
// Client
// =============================================================================

/// A client bound to one route server.
pub struct RouteServerClient {
    handle: RouteServerHandle,
    options: ClientOptions,
    tables: CommunityTables,
    session: Option<SshSession>,
    labels: Option<NeighborLabelCache>,
}

impl RouteServerClient {
    /// Connect to the route server. A failed connection is not an error:
    /// the client starts session-less and every query returns empty
    /// results.
    pub async fn connect(
        handle: RouteServerHandle,
        tables: CommunityTables,
        options: ClientOptions,
    ) -> Self {
        let session = match SshSession::connect(&handle.host, options.connect_timeout).await {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(host = %handle.host, error = %e, "route server unreachable");
                None
            }
        };
        Self {
            handle,
            options,
            tables,
            session,
            labels: None,
        }
    }

    /// Attach a neighbor-label cache, refreshed by peer listings and
    /// consulted by route lookups.
    pub fn with_label_cache(mut self, cache: NeighborLabelCache) -> Self {
        self.labels = Some(cache);
        self
    }

    pub fn handle(&self) -> &RouteServerHandle {
        &self.handle
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Execute a bird command on the remote server.
    ///
    /// On a transport failure the session is re-established and the same
    /// command is retried exactly once; a second transport failure drops
    /// the session and the caller sees the session-less empty-result
    /// state. A command-level failure (non-zero exit, undecodable output)
    /// gives up on this query but leaves the session alive.
    async fn run_command(&mut self, bird_command: &str) -> Option<String> {
        let command = self
            .handle
            .server_command(&self.options.birdc_bin, bird_command);

        for attempt in 0..2 {
            let session = self.session.as_ref()?;
            match session.execute(&command, self.options.command_timeout).await {
                Ok(output) => return Some(output),
                Err(e) if !e.is_transport() => {
                    warn!(host = %self.handle.host, error = %e, "remote command failed");
                    return None;
                }
                Err(e) if attempt == 0 => {
                    warn!(host = %self.handle.host, error = %e, "transport failure, reconnecting");
                    self.session = SshSession::connect(&self.handle.host, self.options.connect_timeout)
                        .await
                        .ok();
                }
                Err(e) => {
                    warn!(host = %self.handle.host, error = %e, "retry failed, dropping session");
                    self.session = None;
                }
            }
        }
        None
    }

    /// List all peers of this server's family. Blocks that fail to parse
    /// (e.g. without a valid neighbor address) are dropped, the rest of
    /// the listing survives. Refreshes the neighbor-label cache when one
    /// is attached.
    pub async fn list_peers(&mut self) -> Vec<Peer> {
        let Some(raw) = self.run_command(&peers_command(None)).await else {
            return Vec::new();
        };

        let mut peers = Vec::new();
        for block in segment_protocols(&raw, self.handle.family) {
            match Peer::from_block(&block, self.handle.family) {
                Ok(peer) => peers.push(peer),
                Err(e) => debug!(host = %self.handle.host, error = %e, "dropping peer block"),
            }
        }

        if let Some(labels) = &self.labels {
            if let Err(e) = labels.store(&self.handle.service, self.handle.family, &peers) {
                warn!(error = %e, "failed to refresh neighbor-label cache");
            }
        }

        peers
    }

    /// Fetch one peer by its normalized `peer_...` identifier. An
    /// identifier that fails [`valid_peer_id`] is rejected before any
    /// remote call.
    pub async fn get_peer(&mut self, peer_id: &str) -> Option<Peer> {
        if !valid_peer_id(peer_id) {
            warn!(host = %self.handle.host, peer_id, "rejecting malformed peer id");
            return None;
        }
        let tagged = self.handle.family.tag_peer_id(peer_id);
        let raw = self.run_command(&peers_command(Some(&tagged))).await?;

        segment_protocols(&raw, self.handle.family)
            .iter()
            .find_map(|block| Peer::from_block(block, self.handle.family).ok())
    }

    /// List the routes a peer announced (or, in rejected mode, the routes
    /// that were filtered away). The peer is resolved first to read its
    /// counters: when the relevant counter exceeds the dump cap the
    /// listing short-circuits to an empty result.
    pub async fn list_routes(
        &mut self,
        peer_id: &str,
        rejected: bool,
    ) -> Option<(Peer, Vec<RouteEntry>)> {
        let peer = self.get_peer(peer_id).await?;

        if exceeds_dump_limit(&peer, rejected) {
            debug!(
                host = %self.handle.host,
                peer_id,
                rejected,
                "route counter exceeds dump cap, skipping remote dump"
            );
            return Some((peer, Vec::new()));
        }

        let tagged = self.handle.family.tag_peer_id(peer_id);
        let Some(raw) = self.run_command(&routes_command(&tagged, rejected)).await else {
            return Some((peer, Vec::new()));
        };

        let entries = parse_route_dump(&raw, &self.tables, rejected, ROUTE_DUMP_LIMIT);
        Some((peer, entries))
    }

    /// Look up every path towards a destination prefix or address. The
    /// input is validated before any remote call; the destination prefix
    /// is parsed from the dump and attached to every entry, since per-path
    /// lines omit it.
    pub async fn lookup_route(&mut self, destination: &str) -> Result<RouteLookup, ParseError> {
        let command = route_lookup_command(destination)?;

        let Some(raw) = self.run_command(&command).await else {
            return Ok(RouteLookup {
                destination: None,
                entries: Vec::new(),
            });
        };

        let resolved = lookup_destination(&raw);
        let mut entries = parse_route_dump(&raw, &self.tables, false, ROUTE_DUMP_LIMIT);
        for entry in &mut entries {
            entry.destination = resolved;
            if let (Some(labels), Some(next_hop)) = (&self.labels, entry.next_hop) {
                entry.next_hop_label = labels.lookup(
                    &self.handle.service,
                    self.handle.family,
                    &next_hop.to_string(),
                );
            }
        }

        Ok(RouteLookup {
            destination: resolved,
            entries,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_socket_path() {
        let rs = RouteServerHandle::new("rs1.example.net", "serviceA", IpFamily::V4);
        assert_eq!(rs.control_socket(), "/var/run/bird4.serviceA.ctl");

        let rs6 = RouteServerHandle::new("rs1.example.net", "serviceB", IpFamily::V6);
        assert_eq!(rs6.control_socket(), "/var/run/bird6.serviceB.ctl");
    }

    #[test]
    fn test_server_command_wrapping() {
        let rs = RouteServerHandle::new("rs1.example.net", "serviceA", IpFamily::V4);
        assert_eq!(
            rs.server_command("birdc", "show protocols all"),
            "birdc -s /var/run/bird4.serviceA.ctl 'show protocols all'"
        );
    }

    #[test]
    fn test_bird_command_strings() {
        assert_eq!(peers_command(None), "show protocols all");
        assert_eq!(
            peers_command(Some("peer4_0012345")),
            "show protocols all peer4_0012345"
        );
        assert_eq!(
            routes_command("peer4_0012345", false),
            "show route protocol peer4_0012345 all"
        );
        assert_eq!(
            routes_command("peer4_0012345", true),
            "show route protocol peer4_0012345 filtered all"
        );
    }

    #[test]
    fn test_route_lookup_command_forms() {
        assert_eq!(
            route_lookup_command("203.0.113.0/24").unwrap(),
            "show route 203.0.113.0/24 all"
        );
        assert_eq!(
            route_lookup_command("203.0.113.7").unwrap(),
            "show route for 203.0.113.7 all"
        );
        assert_eq!(
            route_lookup_command("2001:db8::/32").unwrap(),
            "show route 2001:db8::/32 all"
        );
    }

    #[test]
    fn test_route_lookup_command_rejects_garbage() {
        assert!(route_lookup_command("not-an-address").is_err());
        assert!(route_lookup_command("203.0.113.0/99").is_err());
        assert!(route_lookup_command("show route; rm -rf /").is_err());
    }

    #[test]
    fn test_peer_id_validation() {
        assert!(valid_peer_id("peer_0012345"));
        assert!(valid_peer_id("peer_ab_12"));

        // family-tagged and empty forms are not normalized ids
        assert!(!valid_peer_id("peer4_0012345"));
        assert!(!valid_peer_id("peer_"));
        assert!(!valid_peer_id(""));

        // shell metacharacters must never reach the remote invocation:
        // a quote would break out of the single-quoted bird command
        assert!(!valid_peer_id("x'; touch /tmp/pwned; echo '"));
        assert!(!valid_peer_id("peer_1'; reboot; '"));
        assert!(!valid_peer_id("peer_1; birdc down"));
        assert!(!valid_peer_id("peer_1 && id"));
        assert!(!valid_peer_id("peer_1\n'"));
    }

    #[test]
    fn test_exceeds_dump_limit_boundary() {
        let block: Vec<String> = [
            "peer4_1 BGP master up 2024-01-01 10:00:00 Established",
            "  Routes:         300 imported, 301 filtered, 10 exported, 3 preferred",
            "    Neighbor address: 192.0.2.1",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let peer = Peer::from_block(&block, IpFamily::V4).unwrap();

        // 300 imported is still within the cap, 301 filtered is not
        assert!(!exceeds_dump_limit(&peer, false));
        assert!(exceeds_dump_limit(&peer, true));
    }
}
