//! Route records parsed from `show route ... all` dumps
//!
//! One path block looks like:
//!
//! ```text
//! 203.0.113.0/24       unicast [peer4_0012345 2024-01-01] * (100) [AS64511i]
//!     via 192.0.2.1 on eth0
//!     Type: BGP univ
//!     BGP.origin: IGP
//!     BGP.as_path: 64500 64511 64511
//!     BGP.next_hop: 192.0.2.1
//!     BGP.local_pref: 100
//!     BGP.community: (64500,4001) (0,4002)
//! ```
//!
//! Only the first path of a destination carries the destination column;
//! later paths start at the `unicast` marker, so the destination is often
//! inherited from the enclosing query instead of self-parsed.

use std::net::IpAddr;

use ipnet::IpNet;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::community::{Community, CommunityTables};
use crate::dump::{extract_number, extract_token, regex, segment_routes};

// =============================================================================
// Types
// =============================================================================

/// One candidate path towards a destination prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteEntry {
    /// Destination prefix; self-parsed when the block carries it,
    /// inherited from the query otherwise.
    pub destination: Option<IpNet>,
    pub next_hop: Option<IpAddr>,
    /// Human label for the next hop, resolved from the neighbor-label
    /// cache at presentation time.
    pub next_hop_label: Option<String>,
    /// IGP / EGP / Incomplete.
    pub origin: Option<String>,
    pub local_pref: Option<u32>,
    /// Ordered ASN sequence; duplicates are AS-path prepending.
    pub as_path: Vec<u32>,
    /// Decoded communities, sorted by descending ASN.
    pub communities: Vec<Community>,
    /// True iff this path is the currently selected one.
    pub preferred: bool,
    /// Set by the caller when the entry came from a filtered-routes query.
    pub filtered: bool,
}

/// Result of a route lookup: the destination prefix the server resolved,
/// plus every candidate path towards it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteLookup {
    pub destination: Option<IpNet>,
    pub entries: Vec<RouteEntry>,
}

// =============================================================================
// Parsing
// =============================================================================

lazy_static! {
    static ref COMMUNITY_PAIR: Regex = regex(r"\((\d{1,8}),(\d{1,8})\)");
    static ref AS_NUMBER: Regex = regex(r"(\d{2,10})");
    static ref CIDR: Regex = regex(r"\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}/\d{1,2}");
}

impl RouteEntry {
    /// Parse one segmented path block. Attributes the block does not carry
    /// stay `None`/empty; this parser never fails.
    pub fn from_block(lines: &[String], tables: &CommunityTables) -> RouteEntry {
        RouteEntry {
            destination: extract_destination(lines),
            next_hop: extract_token(lines, "BGP.next_hop", 1).and_then(|t| t.parse().ok()),
            next_hop_label: None,
            origin: extract_token(lines, "BGP.origin", 1),
            local_pref: extract_number(lines, "BGP.local_pref", 1),
            as_path: parse_as_path(lines),
            communities: parse_communities(lines, tables),
            preferred: parse_preferred(lines),
            filtered: false,
        }
    }
}

/// Segment and parse a whole route dump, tagging each entry and capping the
/// result. Used by both the per-peer listing and the destination lookup.
pub fn parse_route_dump(
    raw: &str,
    tables: &CommunityTables,
    filtered: bool,
    limit: usize,
) -> Vec<RouteEntry> {
    segment_routes(raw)
        .iter()
        .take(limit)
        .map(|block| {
            let mut entry = RouteEntry::from_block(block, tables);
            entry.filtered = filtered;
            entry
        })
        .collect()
}

/// Destination prefix of a whole lookup dump: the first CIDR-shaped token
/// found anywhere in the output.
pub fn lookup_destination(raw: &str) -> Option<IpNet> {
    for line in raw.lines() {
        if let Some(m) = CIDR.find(line) {
            if let Ok(net) = m.as_str().parse() {
                return Some(net);
            }
        }
    }
    None
}

fn extract_destination(lines: &[String]) -> Option<IpNet> {
    let mut destination = None;
    for line in lines {
        if let Some(m) = CIDR.find(line) {
            if m.start() == 0 {
                destination = m.as_str().parse().ok();
            }
        }
    }
    destination
}

fn parse_preferred(lines: &[String]) -> bool {
    lines
        .iter()
        .any(|l| l.contains("unicast") && l.contains('*'))
}

fn parse_communities(lines: &[String], tables: &CommunityTables) -> Vec<Community> {
    let mut communities: Vec<Community> = Vec::new();
    for line in lines {
        if !line.contains("BGP.community") {
            continue;
        }
        for caps in COMMUNITY_PAIR.captures_iter(line) {
            let pair = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
            if let (Some(asn), Some(value)) = (pair(1), pair(2)) {
                communities.push(tables.community(asn, value));
            }
        }
    }
    communities.sort_by(|a, b| b.asn.cmp(&a.asn));
    communities
}

fn parse_as_path(lines: &[String]) -> Vec<u32> {
    let mut as_path = Vec::new();
    for line in lines {
        if !line.contains("BGP.as_path") {
            continue;
        }
        as_path.extend(
            AS_NUMBER
                .find_iter(line)
                .filter_map(|m| m.as_str().parse::<u32>().ok()),
        );
    }
    as_path
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn tables() -> CommunityTables {
        CommunityTables {
            local_as: vec![64500],
            city: HashMap::from([(4001, "Paris".to_string())]),
            service: HashMap::from([(9999, "Blackhole".to_string())]),
            ..Default::default()
        }
    }

    const ROUTE_BLOCK: &[&str] = &[
        "203.0.113.0/24       unicast [peer4_0012345 2024-01-01] * (100) [AS64511i]",
        "\tvia 192.0.2.1 on eth0",
        "\tType: BGP univ",
        "\tBGP.origin: IGP",
        "\tBGP.as_path: 64500 64511 64511",
        "\tBGP.next_hop: 192.0.2.1",
        "\tBGP.local_pref: 100",
        "\tBGP.community: (0,4002) (64500,9999)",
    ];

    fn block(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_route_block() {
        let entry = RouteEntry::from_block(&block(ROUTE_BLOCK), &tables());
        assert_eq!(
            entry.destination,
            Some("203.0.113.0/24".parse().unwrap())
        );
        assert_eq!(entry.next_hop.map(|a| a.to_string()).as_deref(), Some("192.0.2.1"));
        assert_eq!(entry.origin.as_deref(), Some("IGP"));
        assert_eq!(entry.local_pref, Some(100));
        // prepending keeps duplicates and order
        assert_eq!(entry.as_path, vec![64500, 64511, 64511]);
        assert!(entry.preferred);
        assert!(!entry.filtered);
    }

    #[test]
    fn test_communities_sorted_descending_by_asn() {
        let entry = RouteEntry::from_block(&block(ROUTE_BLOCK), &tables());
        let asns: Vec<u32> = entry.communities.iter().map(|c| c.asn).collect();
        assert_eq!(asns, vec![64500, 0]);
        assert_eq!(entry.communities[0].description, "Blackhole");
        assert_eq!(entry.communities[1].description, "Do not advertise to as4002");
    }

    #[test]
    fn test_non_selected_path() {
        let lines = block(&[
            "                     unicast [peer4_0067890 2024-01-01] (100) [AS64511i]",
            "\tBGP.origin: IGP",
            "\tBGP.next_hop: 192.0.2.2",
        ]);
        let entry = RouteEntry::from_block(&lines, &tables());
        assert!(!entry.preferred);
        // destination not on the block, inherited later by the caller
        assert_eq!(entry.destination, None);
    }

    #[test]
    fn test_parse_route_dump_cap_and_tagging() {
        let mut dump = String::new();
        for i in 0..10 {
            dump.push_str(&format!(
                "10.{}.0.0/16       unicast [peer4_1 2024-01-01] * (100)\n\tBGP.origin: IGP\n",
                i
            ));
        }
        let entries = parse_route_dump(&dump, &tables(), true, 4);
        assert_eq!(entries.len(), 4);
        assert!(entries.iter().all(|e| e.filtered));
    }

    #[test]
    fn test_lookup_destination_first_cidr_wins() {
        let dump = "\
BIRD 1.6.8 ready.
203.0.113.0/24       unicast [peer4_1 2024-01-01] * (100)
198.51.100.0/24      unicast [peer4_2 2024-01-01] (100)
";
        assert_eq!(
            lookup_destination(dump),
            Some("203.0.113.0/24".parse().unwrap())
        );
        assert_eq!(lookup_destination("no prefix here"), None);
    }
}
