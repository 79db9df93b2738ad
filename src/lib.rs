#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Birdseye - a read-only looking glass for BIRD route servers
//!
//! Birdseye runs `birdc` commands over SSH against a redundant pair of
//! BIRD route servers, parses the plain-text dumps into typed records,
//! and pairs the results across the two servers. It can be used as both
//! a command-line application and a library.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - **[`dump`]**: Dump segmentation and token extraction, plus the
//!   address-family tagging scheme shared by every parser
//! - **[`peer`]**: `show protocols all` blocks parsed into [`Peer`] records
//! - **[`route`]**: `show route ... all` blocks parsed into [`RouteEntry`]
//!   records
//! - **[`community`]**: BGP community decoding against the configured
//!   classification tables
//! - **[`ssh`]**: Multiplexed OpenSSH sessions driven through
//!   `tokio::process`
//! - **[`client`]**: Per-server client tying transport and parsers together
//! - **[`coordinator`]**: Dual-server fan-out and cross-server peer pairing
//! - **[`cache`]**: On-disk neighbor label cache
//! - **[`config`]**: Configuration management
//!
//! # Quick Start Examples
//!
//! ## Listing peers on both route servers
//!
//! ```rust,ignore
//! use birdseye::{BirdseyeConfig, DualServerCoordinator, IpFamily};
//!
//! let config = BirdseyeConfig::new(&None)?;
//! let mut coordinator =
//!     DualServerCoordinator::from_config(&config, "serviceA", IpFamily::V4).await;
//!
//! for pair in coordinator.peer_summary().await {
//!     println!("{} {}", pair.neighbor_address, pair.description);
//! }
//! ```
//!
//! ## Looking up a destination
//!
//! ```rust,ignore
//! let (rs1, rs2) = coordinator.route("192.0.2.0/24").await?;
//! for entry in rs1.entries {
//!     println!("{:?} via {:?}", entry.destination, entry.next_hop);
//! }
//! ```

pub mod cache;
pub mod client;
pub mod community;
pub mod config;
pub mod coordinator;
pub mod dump;
pub mod peer;
pub mod route;
pub mod ssh;

// =============================================================================
// Configuration
// =============================================================================

pub use config::BirdseyeConfig;

// =============================================================================
// Dump parsing
// =============================================================================

pub use community::{Community, CommunityTables};
pub use dump::{IpFamily, ParseError};
pub use peer::{ImportLimit, Peer, PeerState};
pub use route::{RouteEntry, RouteLookup};

// =============================================================================
// Transport and clients
// =============================================================================

pub use cache::NeighborLabelCache;
pub use client::{ClientOptions, RouteServerClient, RouteServerHandle, ROUTE_DUMP_LIMIT};
pub use coordinator::{DualServerCoordinator, Pair, PeerPair};
pub use ssh::{SshError, SshSession};
