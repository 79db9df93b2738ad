//! Configuration management
//!
//! Settings come from `$HOME/.birdseye/birdseye.toml` (created with a
//! commented template on first run) overlaid with `BIRDSEYE_`-prefixed
//! environment variables. Besides the two route-server hosts and the
//! transport tunables, the file carries the static community
//! classification tables used by the decoder.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Result};
use config::Config;
use serde::Deserialize;

use crate::client::ClientOptions;
use crate::community::CommunityTables;

pub struct BirdseyeConfig {
    /// First route-server host (SSH destination).
    pub rs1_host: String,
    /// Second route-server host (SSH destination).
    pub rs2_host: String,
    /// Known service names, each with its own control socket per family.
    pub services: Vec<String>,
    /// birdc binary (or privileged wrapper) on the remote hosts.
    pub birdc_bin: String,
    /// Directory for cached data.
    pub data_dir: String,
    /// SSH handshake deadline in seconds.
    pub connect_timeout_secs: u64,
    /// Per-command execution deadline in seconds.
    pub command_timeout_secs: u64,
    /// Community classification tables.
    pub communities: CommunityTables,
}

const EMPTY_CONFIG: &str = r#"### birdseye configuration file

### route-server hosts, resolvable via ~/.ssh/config
# rs1_host = "rs1.example.net"
# rs2_host = "rs2.example.net"

### services served by the route servers (control sockets
### /var/run/bird<4|6>.<service>.ctl)
# services = ["serviceA", "serviceB"]

### remote birdc binary or a privileged wrapper around it
# birdc_bin = "birdc"

### directory for cached data used by birdseye
# data_dir = "~/.birdseye"

### transport deadlines (in seconds)
# connect_timeout_secs = 10
# command_timeout_secs = 5

### community classification tables
# [communities]
# local_as = [64500, 64501]
#
# [communities.city]
# 4000 = "New York"
#
# [communities.service]
# 9999 = "Blackhole"
#
# [communities.peering]
# 2222 = "Good guys"
#
# [communities.prepend]
# 65501 = "One prepend"
"#;

/// Raw file shape before table keys are parsed into community codes. TOML
/// map keys are strings, so the community tables arrive keyed by string
/// and are converted afterwards.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    rs1_host: Option<String>,
    rs2_host: Option<String>,
    services: Option<Vec<String>>,
    birdc_bin: Option<String>,
    data_dir: Option<String>,
    connect_timeout_secs: Option<u64>,
    command_timeout_secs: Option<u64>,
    #[serde(default)]
    communities: RawCommunityTables,
}

#[derive(Debug, Default, Deserialize)]
struct RawCommunityTables {
    #[serde(default)]
    local_as: Vec<u32>,
    #[serde(default)]
    peering: HashMap<String, String>,
    #[serde(default)]
    service: HashMap<String, String>,
    #[serde(default)]
    city: HashMap<String, String>,
    #[serde(default)]
    prepend: HashMap<String, String>,
}

fn parse_table(name: &str, raw: HashMap<String, String>) -> Result<HashMap<u32, String>> {
    raw.into_iter()
        .map(|(code, label)| {
            let code = code
                .parse::<u32>()
                .map_err(|_| anyhow!("Invalid {} community code: {}", name, code))?;
            Ok((code, label))
        })
        .collect()
}

impl RawCommunityTables {
    fn into_tables(self) -> Result<CommunityTables> {
        Ok(CommunityTables {
            local_as: self.local_as,
            peering: parse_table("peering", self.peering)?,
            service: parse_table("service", self.service)?,
            city: parse_table("city", self.city)?,
            prepend: parse_table("prepend", self.prepend)?,
        })
    }
}

impl Default for BirdseyeConfig {
    fn default() -> Self {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| ".".to_string());

        Self {
            rs1_host: "rs1.example.net".to_string(),
            rs2_host: "rs2.example.net".to_string(),
            services: vec!["serviceA".to_string(), "serviceB".to_string()],
            birdc_bin: "birdc".to_string(),
            data_dir: format!("{}/.birdseye", home_dir),
            connect_timeout_secs: 10,
            command_timeout_secs: 5,
            communities: CommunityTables::default(),
        }
    }
}

impl BirdseyeConfig {
    /// Create and initialize a configuration. A missing file is created
    /// from the commented template; environment variables prefixed with
    /// `BIRDSEYE_` override file values.
    pub fn new(path: &Option<String>) -> Result<BirdseyeConfig> {
        let mut builder = Config::builder();

        let home_dir = dirs::home_dir()
            .ok_or_else(|| anyhow!("Could not find home directory"))?
            .to_str()
            .ok_or_else(|| anyhow!("Could not convert home directory path to string"))?
            .to_owned();

        let birdseye_dir = format!("{}/.birdseye", home_dir.as_str());

        match path {
            Some(p) => {
                let path = Path::new(p.as_str());
                if path.exists() {
                    let path_str = path
                        .to_str()
                        .ok_or_else(|| anyhow!("Could not convert path to string"))?;
                    builder = builder.add_source(config::File::with_name(path_str));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG)
                        .map_err(|e| anyhow!("Unable to create config file: {}", e))?;
                }
            }
            None => {
                std::fs::create_dir_all(birdseye_dir.as_str())
                    .map_err(|e| anyhow!("Unable to create birdseye directory: {}", e))?;
                let p = format!("{}/birdseye.toml", birdseye_dir.as_str());
                if Path::new(p.as_str()).exists() {
                    builder = builder.add_source(config::File::with_name(p.as_str()));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG).map_err(|e| {
                        anyhow!("Unable to create config file {}: {}", p.as_str(), e)
                    })?;
                }
            }
        }

        // E.g. `BIRDSEYE_RS1_HOST=rs1.corp ./birdseye` overrides the host
        builder = builder.add_source(config::Environment::with_prefix("BIRDSEYE"));

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;

        let file = settings
            .try_deserialize::<FileConfig>()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))?;

        let defaults = BirdseyeConfig::default();
        let data_dir = match file.data_dir {
            Some(dir) => dir,
            None => {
                std::fs::create_dir_all(defaults.data_dir.as_str())
                    .map_err(|e| anyhow!("Unable to create data directory: {}", e))?;
                defaults.data_dir
            }
        };

        Ok(BirdseyeConfig {
            rs1_host: file.rs1_host.unwrap_or(defaults.rs1_host),
            rs2_host: file.rs2_host.unwrap_or(defaults.rs2_host),
            services: file.services.unwrap_or(defaults.services),
            birdc_bin: file.birdc_bin.unwrap_or(defaults.birdc_bin),
            data_dir,
            connect_timeout_secs: file
                .connect_timeout_secs
                .unwrap_or(defaults.connect_timeout_secs),
            command_timeout_secs: file
                .command_timeout_secs
                .unwrap_or(defaults.command_timeout_secs),
            communities: file.communities.into_tables()?,
        })
    }

    /// Transport tunables for a route-server client.
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            birdc_bin: self.birdc_bin.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
        }
    }

    /// Whether a service name is one the route servers actually serve.
    pub fn knows_service(&self, service: &str) -> bool {
        self.services.iter().any(|s| s == service)
    }

    /// The default service: the first configured one.
    pub fn default_service(&self) -> &str {
        self.services
            .first()
            .map(String::as_str)
            .unwrap_or("serviceA")
    }
}
