use anyhow::{anyhow, Result};
use birdseye::*;
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tracing::Level;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// configuration file path, by default $HOME/.birdseye/birdseye.toml is used
    #[clap(short, long)]
    config: Option<String>,

    /// Print debug information
    #[clap(long)]
    debug: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct Scope {
    /// Service to query, defaults to the first configured one
    #[clap(short, long)]
    service: Option<String>,

    /// Address family, 4 or 6
    #[clap(short, long, default_value = "4")]
    family: u8,
}

impl Scope {
    fn resolve(&self, config: &BirdseyeConfig) -> Result<(String, IpFamily)> {
        let service = match &self.service {
            Some(s) => {
                if !config.knows_service(s) {
                    return Err(anyhow!(
                        "unknown service: {} (configured: {})",
                        s,
                        config.services.join(", ")
                    ));
                }
                s.clone()
            }
            None => config.default_service().to_string(),
        };
        let family = IpFamily::from_digit(self.family)
            .ok_or_else(|| anyhow!("address family must be 4 or 6"))?;
        Ok((service, family))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// One-line-per-neighbor summary across both route servers.
    Summary {
        #[clap(flatten)]
        scope: Scope,

        /// Output as JSON objects
        #[clap(long)]
        json: bool,

        /// Pretty-print JSON output
        #[clap(long)]
        pretty: bool,
    },

    /// Full peer listing of each route server.
    Peers {
        #[clap(flatten)]
        scope: Scope,

        /// Output as JSON objects
        #[clap(long)]
        json: bool,

        /// Pretty-print JSON output
        #[clap(long)]
        pretty: bool,
    },

    /// Detail view of one peer on both route servers.
    Peer {
        /// Peer identifier without the family marker, e.g. peer_0012345
        #[clap(name = "PEER_ID")]
        peer_id: String,

        #[clap(flatten)]
        scope: Scope,

        /// Output as JSON objects
        #[clap(long)]
        json: bool,

        /// Pretty-print JSON output
        #[clap(long)]
        pretty: bool,
    },

    /// Routes received from one peer on both route servers.
    Routes {
        /// Peer identifier without the family marker, e.g. peer_0012345
        #[clap(name = "PEER_ID")]
        peer_id: String,

        /// Show filtered (rejected) routes instead of accepted ones
        #[clap(short, long)]
        rejected: bool,

        #[clap(flatten)]
        scope: Scope,

        /// Output as JSON objects
        #[clap(long)]
        json: bool,

        /// Pretty-print JSON output
        #[clap(long)]
        pretty: bool,
    },

    /// Look up the paths towards a destination on both route servers.
    Route {
        /// An IP address (192.0.2.1) or a CIDR prefix (203.0.113.0/24)
        #[clap(name = "DESTINATION")]
        destination: String,

        #[clap(flatten)]
        scope: Scope,

        /// Output as JSON objects
        #[clap(long)]
        json: bool,

        /// Pretty-print JSON output
        #[clap(long)]
        pretty: bool,
    },
}

fn print_json(val: &serde_json::Value, pretty: bool) {
    if pretty {
        match serde_json::to_string_pretty(val) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("{e}"),
        }
    } else {
        println!("{val}");
    }
}

fn opt_str(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn opt_display<T: std::fmt::Display>(value: &Option<T>) -> String {
    value.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

fn side_state(side: &Option<Peer>) -> String {
    match side {
        Some(peer) => peer
            .bgp_state
            .clone()
            .unwrap_or_else(|| peer.state.to_string()),
        None => "-".to_string(),
    }
}

#[derive(Tabled)]
struct SummaryRow {
    pub neighbor: String,
    pub asn: String,
    pub description: String,
    pub rs1: String,
    pub rs2: String,
}

#[derive(Tabled)]
struct PeerRow {
    pub server: String,
    pub peer_id: String,
    pub neighbor: String,
    pub asn: String,
    pub state: String,
    pub since: String,
    pub imported: u64,
    pub filtered: u64,
    pub exported: u64,
    pub description: String,
}

#[derive(Tabled)]
struct RouteRow {
    pub destination: String,
    pub next_hop: String,
    pub as_path: String,
    pub local_pref: String,
    pub origin: String,
    pub communities: String,
    pub best: String,
}

fn peer_row(server: &str, peer: &Peer) -> PeerRow {
    PeerRow {
        server: server.to_string(),
        peer_id: peer.peer_id.clone(),
        neighbor: peer.neighbor_address.to_string(),
        asn: opt_display(&peer.neighbor_as),
        state: peer
            .bgp_state
            .clone()
            .unwrap_or_else(|| peer.state.to_string()),
        since: peer.persistency().unwrap_or_default(),
        imported: peer.imported_routes,
        filtered: peer.filtered_routes,
        exported: peer.exported_routes,
        description: opt_str(&peer.description),
    }
}

fn route_row(entry: &RouteEntry) -> RouteRow {
    RouteRow {
        destination: opt_display(&entry.destination),
        next_hop: match (&entry.next_hop, &entry.next_hop_label) {
            (Some(hop), Some(label)) => format!("{hop} ({label})"),
            (Some(hop), None) => hop.to_string(),
            _ => String::new(),
        },
        as_path: entry
            .as_path
            .iter()
            .map(|asn| asn.to_string())
            .collect::<Vec<String>>()
            .join(" "),
        local_pref: opt_display(&entry.local_pref),
        origin: opt_str(&entry.origin),
        communities: entry
            .communities
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<String>>()
            .join(" "),
        best: match (entry.preferred, entry.filtered) {
            (_, true) => "filtered".to_string(),
            (true, false) => "*".to_string(),
            (false, false) => String::new(),
        },
    }
}

fn print_route_side(host: &str, lookup: &RouteLookup) {
    match lookup.destination {
        Some(destination) => println!("{host}: {destination}"),
        None => println!("{host}: no matching routes"),
    }
    if !lookup.entries.is_empty() {
        let rows: Vec<RouteRow> = lookup.entries.iter().map(route_row).collect();
        println!("{}", Table::new(rows).with(Style::markdown()));
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match BirdseyeConfig::new(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    if cli.debug {
        tracing_subscriber::fmt()
            // filter spans/events with level DEBUG or higher.
            .with_max_level(Level::DEBUG)
            .init();
    }

    match cli.command {
        Commands::Summary {
            scope,
            json,
            pretty,
        } => {
            let (service, family) = match scope.resolve(&config) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("{e}");
                    return;
                }
            };
            let mut coordinator =
                DualServerCoordinator::from_config(&config, &service, family).await;
            let pairs = coordinator.peer_summary().await;

            if json {
                print_json(&json!(pairs), pretty);
                return;
            }

            let rows: Vec<SummaryRow> = pairs
                .iter()
                .map(|pair| SummaryRow {
                    neighbor: pair.neighbor_address.to_string(),
                    asn: opt_display(&pair.neighbor_as),
                    description: opt_str(&pair.description),
                    rs1: side_state(&pair.sides.left),
                    rs2: side_state(&pair.sides.right),
                })
                .collect();
            println!("{}", Table::new(rows).with(Style::markdown()));
        }
        Commands::Peers {
            scope,
            json,
            pretty,
        } => {
            let (service, family) = match scope.resolve(&config) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("{e}");
                    return;
                }
            };
            let mut coordinator =
                DualServerCoordinator::from_config(&config, &service, family).await;
            let (rs1_peers, rs2_peers) = coordinator.peers().await;

            if json {
                print_json(&json!({"rs1": rs1_peers, "rs2": rs2_peers}), pretty);
                return;
            }

            let rows: Vec<PeerRow> = rs1_peers
                .iter()
                .map(|p| peer_row(config.rs1_host.as_str(), p))
                .chain(
                    rs2_peers
                        .iter()
                        .map(|p| peer_row(config.rs2_host.as_str(), p)),
                )
                .collect();
            println!("{}", Table::new(rows).with(Style::markdown()));
        }
        Commands::Peer {
            peer_id,
            scope,
            json,
            pretty,
        } => {
            let (service, family) = match scope.resolve(&config) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("{e}");
                    return;
                }
            };
            let mut coordinator =
                DualServerCoordinator::from_config(&config, &service, family).await;
            let (rs1_peer, rs2_peer) = coordinator.peer(&peer_id).await;

            if json {
                print_json(&json!({"rs1": rs1_peer, "rs2": rs2_peer}), pretty);
                return;
            }

            if rs1_peer.is_none() && rs2_peer.is_none() {
                eprintln!("peer not found on either route server: {peer_id}");
                return;
            }

            let mut rows: Vec<PeerRow> = Vec::new();
            if let Some(peer) = &rs1_peer {
                rows.push(peer_row(config.rs1_host.as_str(), peer));
            }
            if let Some(peer) = &rs2_peer {
                rows.push(peer_row(config.rs2_host.as_str(), peer));
            }
            println!("{}", Table::new(rows).with(Style::markdown()));
        }
        Commands::Routes {
            peer_id,
            rejected,
            scope,
            json,
            pretty,
        } => {
            let (service, family) = match scope.resolve(&config) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("{e}");
                    return;
                }
            };
            let mut coordinator =
                DualServerCoordinator::from_config(&config, &service, family).await;
            let (rs1_routes, rs2_routes) = coordinator.routes(&peer_id, rejected).await;

            if json {
                let side = |routes: &Option<(Peer, Vec<RouteEntry>)>| match routes {
                    Some((peer, entries)) => json!({"peer": peer, "routes": entries}),
                    None => json!(null),
                };
                print_json(
                    &json!({"rs1": side(&rs1_routes), "rs2": side(&rs2_routes)}),
                    pretty,
                );
                return;
            }

            for (host, routes) in [
                (config.rs1_host.as_str(), &rs1_routes),
                (config.rs2_host.as_str(), &rs2_routes),
            ] {
                match routes {
                    Some((peer, entries)) => {
                        println!(
                            "{host}: {} routes from {} ({})",
                            entries.len(),
                            peer.neighbor_address,
                            opt_str(&peer.description),
                        );
                        if !entries.is_empty() {
                            let rows: Vec<RouteRow> = entries.iter().map(route_row).collect();
                            println!("{}", Table::new(rows).with(Style::markdown()));
                        }
                    }
                    None => println!("{host}: peer not found"),
                }
            }
        }
        Commands::Route {
            destination,
            scope,
            json,
            pretty,
        } => {
            let (service, family) = match scope.resolve(&config) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("{e}");
                    return;
                }
            };
            let mut coordinator =
                DualServerCoordinator::from_config(&config, &service, family).await;
            let (rs1_lookup, rs2_lookup) = match coordinator.route(&destination).await {
                Ok(lookups) => lookups,
                Err(e) => {
                    eprintln!("{e}");
                    return;
                }
            };

            if json {
                print_json(&json!({"rs1": rs1_lookup, "rs2": rs2_lookup}), pretty);
                return;
            }

            print_route_side(config.rs1_host.as_str(), &rs1_lookup);
            print_route_side(config.rs2_host.as_str(), &rs2_lookup);
        }
    }
}
