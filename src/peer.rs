//! Peer records parsed from `show protocols all` dumps
//!
//! One peer block looks like:
//!
//! ```text
//! peer4_0012345 BGP      master   up     2024-01-01 10:00:00  Established
//!   Description:    acme-ix
//!   Preference:     100
//!   Import limit:   1000
//!   Routes:         3 imported, 0 filtered, 687190 exported, 3 preferred
//!   BGP state:          Established
//!     Neighbor address: 192.0.2.1
//!     Neighbor AS:      64500
//!     Source address:   192.0.2.254
//!     Route limit:      3/1000
//!     Hold timer:       10/15
//!     Keepalive timer:  2/5
//! ```
//!
//! The first line carries positional fields; everything below is labelled
//! and goes through [`extract_token`].

use std::net::IpAddr;

use chrono::NaiveDateTime;
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::dump::{extract_number, extract_token, regex, IpFamily, ParseError};

// =============================================================================
// Types
// =============================================================================

/// Administrative state of a protocol session. BIRD's transient `start`
/// state normalizes to `Down`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerState {
    Up,
    Down,
}

impl PeerState {
    fn from_token(token: &str) -> PeerState {
        match token {
            "up" => PeerState::Up,
            _ => PeerState::Down,
        }
    }
}

impl std::fmt::Display for PeerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerState::Up => write!(f, "up"),
            PeerState::Down => write!(f, "down"),
        }
    }
}

/// Import limit of a session: a route count or the unlimited sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportLimit {
    Routes(u64),
    Unlimited,
}

impl std::fmt::Display for ImportLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportLimit::Routes(n) => write!(f, "{}", n),
            ImportLimit::Unlimited => write!(f, "unlimited"),
        }
    }
}

/// One routing-protocol session as reported by the route server.
///
/// Records are created fresh per query and never mutated; two records
/// describe the same neighbor iff their [`value`](Peer::value) fields are
/// equal, which holds exactly when their neighbor addresses are equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    /// Stable identifier with the family marker stripped (`peer_...`).
    pub peer_id: String,
    pub family: IpFamily,
    pub state: PeerState,
    /// BGP FSM word, e.g. `Established` / `Active` / `Idle`.
    pub bgp_state: Option<String>,
    /// Free-text trailing tokens of the status line.
    pub bgp_state_details: String,
    /// Timestamp of the last state change, as printed by the server.
    pub last_event_time: String,
    pub description: Option<String>,
    pub preference: Option<u32>,
    pub import_limit: Option<ImportLimit>,
    pub imported_routes: u64,
    pub filtered_routes: u64,
    pub exported_routes: u64,
    pub preferred_routes: u64,
    pub neighbor_address: IpAddr,
    pub neighbor_as: Option<u32>,
    pub source_address: Option<String>,
    /// `current/max` as printed.
    pub route_limit: Option<String>,
    pub hold_timer: Option<String>,
    pub keepalive_timer: Option<String>,
    /// Numeric encoding of the neighbor address, used as a sort and
    /// dedupe key.
    pub value: u128,
}

// =============================================================================
// Parsing
// =============================================================================

lazy_static! {
    static ref ROUTE_COUNTERS: Regex =
        regex(r"(\d+) imported, (\d+) filtered, (\d+) exported, (\d+) preferred");
}

impl Peer {
    /// Parse one segmented peer block.
    ///
    /// Fails when the status line is truncated or when the block has no
    /// neighbor address that parses as a valid address of `family`; such
    /// records are dropped by the caller, the rest of the batch survives.
    pub fn from_block(lines: &[String], family: IpFamily) -> Result<Peer, ParseError> {
        let status = lines.first().ok_or(ParseError::TruncatedBlock)?;
        let tokens: Vec<&str> = status.split_whitespace().collect();
        if tokens.len() < 4 {
            return Err(ParseError::TruncatedBlock);
        }

        let peer_id = family.strip_peer_id(tokens[0]);
        let state = PeerState::from_token(tokens[3]);
        let last_event_time = tokens.iter().skip(4).take(2).join(" ");
        let bgp_state_details = tokens.iter().skip(6).join(" ");

        let neighbor_address: IpAddr = extract_token(lines, "Neighbor address", 2)
            .and_then(|t| t.parse().ok())
            .filter(|addr| family.contains(addr))
            .ok_or(ParseError::InvalidNeighborAddress { family })?;

        let (imported_routes, filtered_routes, exported_routes, preferred_routes) =
            parse_route_counters(lines);

        Ok(Peer {
            peer_id,
            family,
            state,
            bgp_state: extract_token(lines, "BGP state", 2),
            bgp_state_details,
            last_event_time,
            description: extract_token(lines, "Description", 1),
            preference: extract_number(lines, "Preference", 1),
            import_limit: parse_import_limit(lines),
            imported_routes,
            filtered_routes,
            exported_routes,
            preferred_routes,
            neighbor_address,
            neighbor_as: extract_number(lines, "Neighbor AS", 2),
            source_address: extract_token(lines, "Source address", 2),
            route_limit: extract_token(lines, "Route limit", 2),
            hold_timer: extract_token(lines, "Hold timer", 2),
            keepalive_timer: extract_token(lines, "Keepalive timer", 2),
            value: address_value(&neighbor_address),
        })
    }

    /// How long the session has been in its current state, rendered the
    /// way an operator reads it: minutes, then hours, then days. `None`
    /// when the server printed a timestamp we cannot parse.
    pub fn persistency(&self) -> Option<String> {
        let last = NaiveDateTime::parse_from_str(&self.last_event_time, "%Y-%m-%d %H:%M:%S").ok()?;
        let difference = chrono::Local::now().naive_local() - last;

        if difference.num_days() >= 1 {
            return Some(format!("{} days", difference.num_days()));
        }
        let minutes = difference.num_minutes().max(0);
        if minutes < 60 {
            Some(format!("{} min", minutes))
        } else {
            Some(format!("{} hours", minutes / 60))
        }
    }
}

/// Numeric encoding of an IP address: equal iff the addresses are equal.
pub fn address_value(addr: &IpAddr) -> u128 {
    match addr {
        IpAddr::V4(a) => u128::from(u32::from(*a)),
        IpAddr::V6(a) => u128::from(*a),
    }
}

fn parse_route_counters(lines: &[String]) -> (u64, u64, u64, u64) {
    for line in lines {
        if let Some(caps) = ROUTE_COUNTERS.captures(line) {
            let count = |i| {
                caps.get(i)
                    .and_then(|m| m.as_str().parse().ok())
                    .unwrap_or(0)
            };
            return (count(1), count(2), count(3), count(4));
        }
    }
    (0, 0, 0, 0)
}

fn parse_import_limit(lines: &[String]) -> Option<ImportLimit> {
    let token = extract_token(lines, "Import limit", 2)?;
    match token.parse() {
        Ok(n) => Some(ImportLimit::Routes(n)),
        Err(_) => Some(ImportLimit::Unlimited),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const PEER_BLOCK: &[&str] = &[
        "peer4_0012345 BGP      master   up     2024-01-01 10:00:00  Established",
        "  Description:    acme-ix",
        "  Preference:     100",
        "  Input filter:   (unnamed)",
        "  Import limit:   1000",
        "    Action:       restart",
        "  Routes:         3 imported, 0 filtered, 100 exported, 3 preferred",
        "  BGP state:          Established",
        "    Neighbor address: 192.0.2.1",
        "    Neighbor AS:      64500",
        "    Source address:   192.0.2.254",
        "    Route limit:      3/1000",
        "    Hold timer:       10/15",
        "    Keepalive timer:  2/5",
    ];

    fn block(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_full_block() {
        let peer = Peer::from_block(&block(PEER_BLOCK), IpFamily::V4).unwrap();
        assert_eq!(peer.peer_id, "peer_0012345");
        assert_eq!(peer.state, PeerState::Up);
        assert_eq!(peer.bgp_state.as_deref(), Some("Established"));
        assert_eq!(peer.bgp_state_details, "Established");
        assert_eq!(peer.last_event_time, "2024-01-01 10:00:00");
        assert_eq!(peer.description.as_deref(), Some("acme-ix"));
        assert_eq!(peer.preference, Some(100));
        assert_eq!(peer.import_limit, Some(ImportLimit::Routes(1000)));
        assert_eq!(peer.imported_routes, 3);
        assert_eq!(peer.filtered_routes, 0);
        assert_eq!(peer.exported_routes, 100);
        assert_eq!(peer.preferred_routes, 3);
        assert_eq!(peer.neighbor_address.to_string(), "192.0.2.1");
        assert_eq!(peer.neighbor_as, Some(64500));
        assert_eq!(peer.source_address.as_deref(), Some("192.0.2.254"));
        assert_eq!(peer.route_limit.as_deref(), Some("3/1000"));
        assert_eq!(peer.hold_timer.as_deref(), Some("10/15"));
        assert_eq!(peer.keepalive_timer.as_deref(), Some("2/5"));
    }

    #[test]
    fn test_parse_is_idempotent() {
        let lines = block(PEER_BLOCK);
        let first = Peer::from_block(&lines, IpFamily::V4).unwrap();
        let second = Peer::from_block(&lines, IpFamily::V4).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_start_state_normalizes_to_down() {
        let lines = block(&[
            "peer4_0067890 BGP      master   start  2024-01-02 09:30:00  Active",
            "    Neighbor address: 192.0.2.2",
        ]);
        let peer = Peer::from_block(&lines, IpFamily::V4).unwrap();
        assert_eq!(peer.state, PeerState::Down);
        assert_eq!(peer.bgp_state.as_deref(), None);
    }

    #[test]
    fn test_missing_counters_default_to_zero() {
        let lines = block(&[
            "peer4_0067890 BGP      master   up     2024-01-02 09:30:00  Established",
            "    Neighbor address: 192.0.2.2",
        ]);
        let peer = Peer::from_block(&lines, IpFamily::V4).unwrap();
        assert_eq!(
            (
                peer.imported_routes,
                peer.filtered_routes,
                peer.exported_routes,
                peer.preferred_routes
            ),
            (0, 0, 0, 0)
        );
    }

    #[test]
    fn test_invalid_neighbor_address_is_rejected() {
        // no address at all
        let lines = block(&["peer4_1 BGP master up 2024-01-01 10:00:00 Established"]);
        assert!(Peer::from_block(&lines, IpFamily::V4).is_err());

        // address of the wrong family
        let lines = block(&[
            "peer4_1 BGP master up 2024-01-01 10:00:00 Established",
            "    Neighbor address: 2001:db8::1",
        ]);
        assert!(Peer::from_block(&lines, IpFamily::V4).is_err());

        // garbage address
        let lines = block(&[
            "peer4_1 BGP master up 2024-01-01 10:00:00 Established",
            "    Neighbor address: not-an-address",
        ]);
        assert!(Peer::from_block(&lines, IpFamily::V4).is_err());
    }

    #[test]
    fn test_truncated_block() {
        assert!(Peer::from_block(&[], IpFamily::V4).is_err());
        assert!(Peer::from_block(&block(&["peer4_1 BGP"]), IpFamily::V4).is_err());
    }

    #[test]
    fn test_unlimited_import_limit() {
        let lines = block(&[
            "peer6_1 BGP master up 2024-01-01 10:00:00 Established",
            "  Import limit:   unlimited",
            "    Neighbor address: 2001:db8::1",
        ]);
        let peer = Peer::from_block(&lines, IpFamily::V6).unwrap();
        assert_eq!(peer.import_limit, Some(ImportLimit::Unlimited));
    }

    #[test]
    fn test_value_equality_matches_address_equality() {
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.1".parse().unwrap();
        let c: IpAddr = "10.0.0.2".parse().unwrap();
        let d: IpAddr = "2001:db8::1".parse().unwrap();
        assert_eq!(address_value(&a), address_value(&b));
        assert_ne!(address_value(&a), address_value(&c));
        assert_ne!(address_value(&a), address_value(&d));
    }
}
