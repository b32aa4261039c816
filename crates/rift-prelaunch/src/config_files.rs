//! Flat config files consumed by the launchpad processes.
//!
//! Every fact lands in its own file inside the config directory, named
//! `<prefix><fact>` where the prefix is derived from the service, see
//! [`KnownService::file_prefix`].

use std::{
    fmt::Display,
    fs, io,
    num::ParseIntError,
    path::{Path, PathBuf},
    str::FromStr,
};

use snafu::{OptionExt, ResultExt, Snafu};
use strum::IntoEnumIterator;

use crate::{
    access::ExternalAccess,
    discovery::{KnownService, ProxyProtocol, ServiceRecord, ServiceRegistry, ServiceType},
};

type Result<T, E = Error> = std::result::Result<T, E>;

pub const SERVICE_TYPE_FILE: &str = "service_type";
pub const CLUSTER_IP_FILE: &str = "cluster_ip";
pub const PORT_MAP_FILE: &str = "port_map";
pub const GRAFANA_IP_FILE: &str = "grafana_ip";
pub const DISCOVERY_DUMP_FILE: &str = "svc_info.json";

pub const DEFAULT_HTTPS_PORT: u16 = 443;
pub const DEFAULT_REDIS_PORT: u16 = 8014;
pub const DEFAULT_MONGO_PORT: u16 = 8006;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to create config directory {path:?}"))]
    CreateConfigDirectory { source: io::Error, path: PathBuf },

    #[snafu(display("failed to write config file {path:?}"))]
    WriteConfigFile { source: io::Error, path: PathBuf },

    #[snafu(display("failed to read config file {path:?}"))]
    ReadConfigFile { source: io::Error, path: PathBuf },

    #[snafu(display("config file {path:?} contains unknown service type {value:?}"))]
    ParseServiceType {
        source: strum::ParseError,
        path: PathBuf,
        value: String,
    },

    #[snafu(display("failed to parse port map {path:?}"))]
    ParsePortMap {
        source: ParsePortMapError,
        path: PathBuf,
    },
}

#[derive(Debug, PartialEq, Snafu)]
pub enum ParsePortMapError {
    #[snafu(display("expected `<protocol> <port>`, found {line:?}"))]
    MalformedLine { line: String },

    #[snafu(display("unknown protocol {protocol:?}"))]
    UnknownProtocol {
        source: strum::ParseError,
        protocol: String,
    },

    #[snafu(display("invalid port in line {line:?}"))]
    InvalidPort { source: ParseIntError, line: String },

    #[snafu(display("no port for {protocol}"))]
    MissingProtocol { protocol: ProxyProtocol },
}

/// Ports the ingress proxy exposes for each protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortMap {
    pub https: u16,
    pub redis: u16,
    pub mongo: u16,
}

impl Default for PortMap {
    fn default() -> Self {
        Self {
            https: DEFAULT_HTTPS_PORT,
            redis: DEFAULT_REDIS_PORT,
            mongo: DEFAULT_MONGO_PORT,
        }
    }
}

impl PortMap {
    /// Derives the port map of the ingress. Annotated proxy ports win over
    /// node ports, which are only considered for `NodePort` ingresses, which
    /// win over the defaults.
    pub fn for_ingress(record: &ServiceRecord) -> Self {
        let mut port_map = Self::default();

        if record.service_type == Some(ServiceType::NodePort) {
            for mapping in &record.node_ports {
                if let Ok(protocol) = mapping.name.parse() {
                    port_map.set(protocol, mapping.node_port);
                }
            }
        }

        for protocol in ProxyProtocol::iter() {
            if let Some(port) = record.proxy_ports.get(protocol) {
                port_map.set(protocol, port);
            }
        }

        port_map
    }

    pub fn get(&self, protocol: ProxyProtocol) -> u16 {
        match protocol {
            ProxyProtocol::Https => self.https,
            ProxyProtocol::Redis => self.redis,
            ProxyProtocol::Mongo => self.mongo,
        }
    }

    pub fn set(&mut self, protocol: ProxyProtocol, port: u16) {
        match protocol {
            ProxyProtocol::Https => self.https = port,
            ProxyProtocol::Redis => self.redis = port,
            ProxyProtocol::Mongo => self.mongo = port,
        }
    }
}

impl Display for PortMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for protocol in ProxyProtocol::iter() {
            writeln!(f, "{protocol} {port}", port = self.get(protocol))?;
        }
        Ok(())
    }
}

impl FromStr for PortMap {
    type Err = ParsePortMapError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut https = None;
        let mut redis = None;
        let mut mongo = None;

        for line in input.lines().filter(|line| !line.trim().is_empty()) {
            let (protocol, port) = line
                .split_once(' ')
                .context(MalformedLineSnafu { line })?;
            let protocol: ProxyProtocol = protocol
                .parse()
                .context(UnknownProtocolSnafu { protocol })?;
            let port: u16 = port.trim().parse().context(InvalidPortSnafu { line })?;

            let slot = match protocol {
                ProxyProtocol::Https => &mut https,
                ProxyProtocol::Redis => &mut redis,
                ProxyProtocol::Mongo => &mut mongo,
            };
            *slot = Some(port);
        }

        Ok(Self {
            https: https.context(MissingProtocolSnafu {
                protocol: ProxyProtocol::Https,
            })?,
            redis: redis.context(MissingProtocolSnafu {
                protocol: ProxyProtocol::Redis,
            })?,
            mongo: mongo.context(MissingProtocolSnafu {
                protocol: ProxyProtocol::Mongo,
            })?,
        })
    }
}

/// The config files of one service as read back from disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceFiles {
    pub service_type: ServiceType,
    pub cluster_ip: String,
    /// Only written for the ingress.
    pub port_map: Option<PortMap>,
}

/// Writes and reads the config files inside one directory.
#[derive(Clone, Debug)]
pub struct ConfigDirectory {
    path: PathBuf,
}

impl ConfigDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the `file` config file of `service`.
    pub fn service_file(&self, service: KnownService, file: &str) -> PathBuf {
        self.path
            .join(format!("{prefix}{file}", prefix = service.file_prefix()))
    }

    /// Keeps the raw services list around for later debugging.
    pub fn write_discovery_dump(&self, service_list: &str) -> Result<()> {
        self.write(self.path.join(DISCOVERY_DUMP_FILE), service_list)
    }

    /// Writes the config files of every discovered service, plus the Grafana
    /// external access file.
    pub fn write_service_files(
        &self,
        registry: &ServiceRegistry,
        access: &ExternalAccess,
    ) -> Result<()> {
        for (known, record) in registry.iter() {
            let Some(service_type) = record.service_type else {
                tracing::warn!(service = %known, "Service not discovered, skipping its config files");
                continue;
            };

            self.write(
                self.service_file(known, SERVICE_TYPE_FILE),
                service_type.as_ref(),
            )?;

            // External access is solely via the proxy, so only the ingress
            // gets a port map.
            if known == KnownService::INGRESS {
                self.write(
                    self.service_file(known, PORT_MAP_FILE),
                    &PortMap::for_ingress(record).to_string(),
                )?;
            }

            self.write(
                self.service_file(known, CLUSTER_IP_FILE),
                record.cluster_ip.as_deref().unwrap_or_default(),
            )?;
        }

        if registry.ingress().is_discovered()
            && let Some(grafana_ip) = access.preferred()
        {
            self.write(self.path.join(GRAFANA_IP_FILE), grafana_ip)?;
        }

        tracing::info!(directory = %self.path.display(), "Service discovery config files are ready");
        Ok(())
    }

    /// Reads back the config files written for `service`.
    pub fn read_service_files(&self, service: KnownService) -> Result<ServiceFiles> {
        let service_type_path = self.service_file(service, SERVICE_TYPE_FILE);
        let value = self.read(&service_type_path)?;
        let service_type = value.parse().context(ParseServiceTypeSnafu {
            path: &service_type_path,
            value: &value,
        })?;

        let cluster_ip = self.read(&self.service_file(service, CLUSTER_IP_FILE))?;

        let port_map = if service == KnownService::INGRESS {
            let path = self.service_file(service, PORT_MAP_FILE);
            let port_map = self
                .read(&path)?
                .parse()
                .context(ParsePortMapSnafu { path })?;
            Some(port_map)
        } else {
            None
        };

        Ok(ServiceFiles {
            service_type,
            cluster_ip,
            port_map,
        })
    }

    fn write(&self, path: PathBuf, contents: &str) -> Result<()> {
        fs::create_dir_all(&self.path).context(CreateConfigDirectorySnafu { path: &self.path })?;
        fs::write(&path, contents).context(WriteConfigFileSnafu { path: &path })?;
        tracing::debug!(path = %path.display(), "config file written");
        Ok(())
    }

    fn read(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path)
            .map(|contents| contents.trim().to_owned())
            .context(ReadConfigFileSnafu { path })
    }
}
