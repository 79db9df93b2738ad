//! BGP community decoding
//!
//! Route servers signal policy through community tags `(asn, value)`. The
//! meaning of a tag depends on static operator tables: an operator-ASN tag
//! marks where a route was received or which service applies, an `asn == 0`
//! tag marks a do-not-advertise scope, and a prepend-ASN tag marks path
//! prepending towards a scope. Decoding is a pure classification over those
//! tables; the same pair always yields the same description.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::dump::ParseError;

// =============================================================================
// Types
// =============================================================================

/// One BGP community tag with its decoded human description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Community {
    pub asn: u32,
    pub value: u32,
    pub description: String,
}

impl std::fmt::Display for Community {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.asn, self.value)
    }
}

/// Static community classification tables, loaded from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunityTables {
    /// The operator's own AS numbers.
    pub local_as: Vec<u32>,
    /// Peering-policy codes, e.g. route-server groups.
    pub peering: HashMap<u32, String>,
    /// Service codes, e.g. blackholing.
    pub service: HashMap<u32, String>,
    /// City / point-of-presence codes.
    pub city: HashMap<u32, String>,
    /// Prepend-count codes keyed by the community ASN part.
    pub prepend: HashMap<u32, String>,
}

impl CommunityTables {
    /// Decode a raw `(asn, value)` pair into a human description.
    ///
    /// Classification order, first match wins:
    /// 1. operator ASN: city ("Received in {x}"), then service, then
    ///    peering table, verbatim;
    /// 2. `asn == 0`: "Do not advertise to {city|peer}", falling back to
    ///    "Do not advertise to as{value}";
    /// 3. prepend ASN: prepend text plus " to {city|peer}" or
    ///    " to as{value}";
    /// 4. anything else decodes to an empty string.
    pub fn decode(&self, asn: u32, value: u32) -> String {
        if self.local_as.contains(&asn) {
            if let Some(city) = self.city.get(&value) {
                return format!("Received in {}", city);
            }
            if let Some(service) = self.service.get(&value) {
                return service.clone();
            }
            if let Some(peer) = self.peering.get(&value) {
                return peer.clone();
            }
            return String::new();
        }

        if asn == 0 {
            return match (self.city.get(&value), self.peering.get(&value)) {
                (Some(city), _) => format!("Do not advertise to {}", city),
                (None, Some(peer)) => format!("Do not advertise to {}", peer),
                (None, None) => format!("Do not advertise to as{}", value),
            };
        }

        if let Some(prepend) = self.prepend.get(&asn) {
            let scope = match (self.city.get(&value), self.peering.get(&value)) {
                (Some(city), _) => city.clone(),
                (None, Some(peer)) => peer.clone(),
                (None, None) => format!("as{}", value),
            };
            return format!("{} to {}", prepend, scope);
        }

        String::new()
    }

    /// Build a decoded [`Community`] from a raw pair.
    pub fn community(&self, asn: u32, value: u32) -> Community {
        Community {
            asn,
            value,
            description: self.decode(asn, value),
        }
    }

    /// Parse a textual `asn,value` pair (parentheses already stripped) into
    /// a decoded [`Community`]. Fails unless both parts are non-negative
    /// integers.
    pub fn parse_community(&self, raw: &str) -> Result<Community, ParseError> {
        let malformed = || ParseError::MalformedCommunity(raw.to_string());

        let (asn, value) = raw.split_once(',').ok_or_else(malformed)?;
        let asn: u32 = asn.trim().parse().map_err(|_| malformed())?;
        let value: u32 = value.trim().parse().map_err(|_| malformed())?;
        Ok(self.community(asn, value))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn tables() -> CommunityTables {
        CommunityTables {
            local_as: vec![64500, 64501],
            peering: HashMap::from([
                (1111, "Annoying customers".to_string()),
                (2222, "Good guys".to_string()),
            ]),
            service: HashMap::from([(9999, "Blackhole".to_string()), (9000, "Peer".to_string())]),
            city: HashMap::from([
                (4000, "New York".to_string()),
                (4001, "Paris".to_string()),
                (4002, "Novosibirsk".to_string()),
            ]),
            prepend: HashMap::from([
                (65501, "One prepend".to_string()),
                (65502, "Prepend 2 times".to_string()),
            ]),
        }
    }

    #[test]
    fn test_decode_local_as() {
        let t = tables();
        assert_eq!(t.decode(64500, 4001), "Received in Paris");
        assert_eq!(t.decode(64500, 9999), "Blackhole");
        assert_eq!(t.decode(64501, 2222), "Good guys");
        // city wins over service and peering
        assert_eq!(t.decode(64500, 4000), "Received in New York");
        // unknown value under a local AS decodes to nothing
        assert_eq!(t.decode(64500, 12345), "");
    }

    #[test]
    fn test_decode_do_not_advertise() {
        let t = tables();
        assert_eq!(t.decode(0, 4002), "Do not advertise to Novosibirsk");
        assert_eq!(t.decode(0, 1111), "Do not advertise to Annoying customers");
        assert_eq!(t.decode(0, 7777), "Do not advertise to as7777");
    }

    #[test]
    fn test_decode_prepend() {
        let t = tables();
        assert_eq!(t.decode(65501, 4001), "One prepend to Paris");
        assert_eq!(t.decode(65502, 2222), "Prepend 2 times to Good guys");
        assert_eq!(t.decode(65501, 7777), "One prepend to as7777");
    }

    #[test]
    fn test_decode_unknown_asn() {
        assert_eq!(tables().decode(65000, 4001), "");
    }

    #[test]
    fn test_decode_is_pure() {
        let t = tables();
        assert_eq!(t.decode(0, 4002), t.decode(0, 4002));
        assert_eq!(t.decode(64500, 9999), t.decode(64500, 9999));
    }

    #[test]
    fn test_parse_community() {
        let t = tables();
        let c = t.parse_community("64500,9999").unwrap();
        assert_eq!(c.asn, 64500);
        assert_eq!(c.value, 9999);
        assert_eq!(c.description, "Blackhole");

        assert!(t.parse_community("64500").is_err());
        assert!(t.parse_community("64500,notanumber").is_err());
        assert!(t.parse_community("-1,10").is_err());
    }

    #[test]
    fn test_display() {
        let c = tables().community(64500, 9999);
        assert_eq!(c.to_string(), "(64500,9999)");
    }
}
