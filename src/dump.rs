//! Segmentation and token extraction for birdc text dumps
//!
//! The birdc control socket answers every query with a semi-structured,
//! line-oriented text dump. This module splits a raw dump into logical
//! blocks (one per peer, or one per route path) and provides the labelled
//! token extraction that every record parser is built on.

use std::net::IpAddr;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Types
// =============================================================================

/// IP version family of a route-server instance.
///
/// BIRD protocol names are tagged with the family (`peer4_...` / `peer6_...`)
/// and each family is served by its own control socket, so the family drives
/// both segmentation and command construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    /// Single-digit form used in protocol markers and socket paths.
    pub fn digit(&self) -> char {
        match self {
            IpFamily::V4 => '4',
            IpFamily::V6 => '6',
        }
    }

    /// Protocol-name prefix that opens a peer block of this family.
    pub fn marker(&self) -> &'static str {
        match self {
            IpFamily::V4 => "peer4_",
            IpFamily::V6 => "peer6_",
        }
    }

    /// Re-tag a normalized `peer_...` identifier with this family's marker.
    pub fn tag_peer_id(&self, peer_id: &str) -> String {
        peer_id.replace("peer_", self.marker())
    }

    /// Strip this family's marker back to the normalized `peer_...` form.
    pub fn strip_peer_id(&self, peer_id: &str) -> String {
        peer_id.replace(self.marker(), "peer_")
    }

    /// Check that an address belongs to this family.
    pub fn contains(&self, addr: &IpAddr) -> bool {
        match self {
            IpFamily::V4 => addr.is_ipv4(),
            IpFamily::V6 => addr.is_ipv6(),
        }
    }

    pub fn from_digit(digit: u8) -> Option<IpFamily> {
        match digit {
            4 => Some(IpFamily::V4),
            6 => Some(IpFamily::V6),
            _ => None,
        }
    }
}

impl std::fmt::Display for IpFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ipv{}", self.digit())
    }
}

/// Errors raised while turning dump blocks into typed records.
///
/// A `ParseError` is always scoped to a single record: the offending block
/// is dropped and the rest of the batch still parses.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Peer block without a neighbor address of the requested family.
    #[error("missing or invalid {family} neighbor address in peer block")]
    InvalidNeighborAddress { family: IpFamily },
    /// Community attribute that is not a `(asn,value)` integer pair.
    #[error("malformed community pair: {0}")]
    MalformedCommunity(String),
    /// Peer block too short to carry the protocol status line.
    #[error("truncated peer block")]
    TruncatedBlock,
    /// User-supplied destination that is neither an address nor a prefix.
    #[error("invalid destination for route lookup: {0}")]
    InvalidDestination(String),
}

// =============================================================================
// Segmentation
// =============================================================================

/// Build a regex from a pattern literal known to be valid.
pub(crate) fn regex(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(re) => re,
        Err(e) => panic!("invalid regex literal {pattern}: {e}"),
    }
}

lazy_static! {
    /// An IPv4 CIDR at the start of a line opens a new route block.
    static ref ROUTE_START: Regex = regex(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}/\d{1,2}");
}

/// Split a `show protocols all` dump into per-peer line blocks.
///
/// A block opens at any line starting with the `peer` token and runs until
/// the next such line. Only blocks whose opening line carries the requested
/// family's marker are kept, so family filtering happens during
/// segmentation rather than after parsing. Preamble lines before the first
/// marker are discarded; empty input yields an empty vec.
pub fn segment_protocols(raw: &str, family: IpFamily) -> Vec<Vec<String>> {
    let mut blocks: Vec<Vec<String>> = Vec::new();
    let mut block: Vec<String> = Vec::new();

    for line in raw.lines() {
        if line.starts_with("peer") {
            if !block.is_empty() {
                blocks.push(std::mem::take(&mut block));
            }
            if line.starts_with(family.marker()) {
                block.push(line.to_string());
            }
        } else if !block.is_empty() {
            block.push(line.to_string());
        }
    }
    if !block.is_empty() {
        blocks.push(block);
    }

    blocks
}

/// Split a `show route ... all` dump into per-path line blocks.
///
/// A block opens at an IPv4-CIDR-prefixed line (first path of a
/// destination) or at any later line carrying the `unicast` path marker
/// (additional paths omit the destination column). The trailing block is
/// emitted even without a closing marker.
pub fn segment_routes(raw: &str) -> Vec<Vec<String>> {
    let mut blocks: Vec<Vec<String>> = Vec::new();
    let mut block: Vec<String> = Vec::new();

    for line in raw.lines() {
        if ROUTE_START.is_match(line) || line.contains("unicast") {
            if !block.is_empty() {
                blocks.push(std::mem::take(&mut block));
            }
            block.push(line.to_string());
        } else if !block.is_empty() {
            block.push(line.to_string());
        }
    }
    if !block.is_empty() {
        blocks.push(block);
    }

    blocks
}

// =============================================================================
// Token extraction
// =============================================================================

/// Find the whitespace-delimited token at `index` on a line containing
/// `label`.
///
/// All lines are scanned and the last matching line wins: some dumps repeat
/// a label (e.g. per-channel stats) and the final occurrence is the
/// authoritative one. Returns `None` when no line matches or the index is
/// out of bounds.
pub fn extract_token(lines: &[String], label: &str, index: usize) -> Option<String> {
    let mut token = None;
    for line in lines {
        if line.contains(label) {
            token = line.split_whitespace().nth(index).map(str::to_string);
        }
    }
    token
}

/// Like [`extract_token`], but parses the token into an integer type.
pub fn extract_number<T: std::str::FromStr>(lines: &[String], label: &str, index: usize) -> Option<T> {
    extract_token(lines, label, index).and_then(|t| t.parse().ok())
}

// =============================================================================
// Tests
// =============================================================================
