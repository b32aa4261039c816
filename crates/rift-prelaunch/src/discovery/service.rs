use std::{collections::BTreeMap, num::ParseIntError, num::TryFromIntError};

use k8s_openapi::api::core::v1::Service;
use serde::Deserialize;
use snafu::{OptionExt, ResultExt, Snafu};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

type Result<T, E = Error> = std::result::Result<T, E>;

/// Annotations on the ingress service starting with this prefix override
/// the externally visible proxy ports, e.g. `rw-proxy-https: "8443"`.
pub const PROXY_ANNOTATION_PREFIX: &str = "rw-proxy";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to deserialize service list"))]
    DeserializeServiceList { source: serde_json::Error },

    #[snafu(display("service without metadata.name found"))]
    MissingName,

    #[snafu(display("service {service:?} has no spec"))]
    MissingSpec { service: String },

    #[snafu(display("service {service:?} has no type"))]
    MissingType { service: String },

    #[snafu(display("service {service:?} has unsupported type {service_type:?}"))]
    UnsupportedType {
        source: strum::ParseError,
        service: String,
        service_type: String,
    },

    #[snafu(display("service {service:?} has no cluster IP"))]
    MissingClusterIp { service: String },

    #[snafu(display("port {port} of service {service:?} has no node port"))]
    MissingNodePort { service: String, port: i32 },

    #[snafu(display("service {service:?} uses out of range port {port}"))]
    PortOutOfRange {
        source: TryFromIntError,
        service: String,
        port: i32,
    },

    #[snafu(display("load balancer service {service:?} has no ingress IP"))]
    MissingLoadBalancerIngress { service: String },

    #[snafu(display(
        "annotation {annotation:?} of service {service:?} carries invalid port {value:?}"
    ))]
    InvalidProxyPort {
        source: ParseIntError,
        service: String,
        annotation: String,
        value: String,
    },
}

/// The Kubernetes service types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, AsRefStr, Display, EnumString)]
pub enum ServiceType {
    #[strum(serialize = "ClusterIP")]
    ClusterIp,
    NodePort,
    LoadBalancer,
    ExternalName,
}

/// The services making up a launchpad deployment.
///
/// The declaration order is the order in which discovered service names are
/// matched, see [`KnownService::matching`].
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, AsRefStr, Display, EnumIter,
)]
#[strum(serialize_all = "kebab-case")]
pub enum KnownService {
    Launchpad,
    Grafana,
    Prometheus,
    Alertmgr,
    Nats,
    Redis,
    Mongo,
    HaproxyIngress,
    HaproxyMetrics,
    Loki,
}

impl KnownService {
    /// The single externally reachable proxy in front of all other services.
    pub const INGRESS: Self = Self::HaproxyIngress;

    /// The service whose config files carry no prefix.
    pub const PRIMARY: Self = Self::Launchpad;

    /// Returns the first known service, in declaration order, whose key is
    /// contained in the Kubernetes service `name`.
    pub fn matching(name: &str) -> Option<Self> {
        Self::iter().find(|known| name.contains(known.as_ref()))
    }

    /// Prefix of the config files written for this service.
    pub fn file_prefix(self) -> String {
        if self == Self::PRIMARY {
            String::new()
        } else {
            format!("{}_", self.as_ref().replace('-', "_"))
        }
    }
}

/// Traffic multiplexed by the ingress proxy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, AsRefStr, Display, EnumIter, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ProxyProtocol {
    Https,
    Redis,
    Mongo,
}

/// Per-protocol proxy port overrides taken from ingress annotations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProxyPorts {
    pub https: Option<u16>,
    pub redis: Option<u16>,
    pub mongo: Option<u16>,
}

impl ProxyPorts {
    pub fn get(&self, protocol: ProxyProtocol) -> Option<u16> {
        match protocol {
            ProxyProtocol::Https => self.https,
            ProxyProtocol::Redis => self.redis,
            ProxyProtocol::Mongo => self.mongo,
        }
    }

    pub fn set(&mut self, protocol: ProxyProtocol, port: u16) {
        let slot = match protocol {
            ProxyProtocol::Https => &mut self.https,
            ProxyProtocol::Redis => &mut self.redis,
            ProxyProtocol::Mongo => &mut self.mongo,
        };
        *slot = Some(port);
    }
}

/// A named service port together with the node port exposing it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodePortMapping {
    pub name: String,
    pub port: u16,
    pub node_port: u16,
}

/// Connectivity information of one known service.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceRecord {
    /// Name of the Kubernetes service the record was populated from.
    pub kubernetes_name: Option<String>,
    pub service_type: Option<ServiceType>,
    /// Only populated for `NodePort` and `LoadBalancer` services.
    pub node_ports: Vec<NodePortMapping>,
    pub cluster_ip: Option<String>,
    /// Only populated for `LoadBalancer` services.
    pub external_ip: Option<String>,
    /// Only populated for the ingress.
    pub proxy_ports: ProxyPorts,
}

impl ServiceRecord {
    pub fn is_discovered(&self) -> bool {
        self.service_type.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct ServiceList {
    items: Vec<Service>,
}

/// Exactly one [`ServiceRecord`] per [`KnownService`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceRegistry {
    records: BTreeMap<KnownService, ServiceRecord>,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self {
            records: KnownService::iter()
                .map(|known| (known, ServiceRecord::default()))
                .collect(),
        }
    }
}

impl ServiceRegistry {
    /// Builds the registry from the body of a `GET /api/v1/namespaces/{ns}/services`
    /// response.
    pub fn from_json(service_list: &str) -> Result<Self> {
        let service_list: ServiceList =
            serde_json::from_str(service_list).context(DeserializeServiceListSnafu)?;

        let mut registry = Self::default();
        for service in &service_list.items {
            registry.record(service)?;
        }

        tracing::info!(
            discovered = registry.discovered().count(),
            "Parse completed successfully"
        );
        Ok(registry)
    }

    pub fn get(&self, known: KnownService) -> &ServiceRecord {
        &self.records[&known]
    }

    pub fn ingress(&self) -> &ServiceRecord {
        self.get(KnownService::INGRESS)
    }

    pub fn iter(&self) -> impl Iterator<Item = (KnownService, &ServiceRecord)> {
        self.records.iter().map(|(known, record)| (*known, record))
    }

    pub fn discovered(&self) -> impl Iterator<Item = (KnownService, &ServiceRecord)> {
        self.iter().filter(|(_, record)| record.is_discovered())
    }

    /// Classifies a single Kubernetes service and stores its connectivity
    /// information. Services not matching any [`KnownService`] are skipped.
    fn record(&mut self, service: &Service) -> Result<()> {
        let name = service.metadata.name.as_deref().context(MissingNameSnafu)?;
        let spec = service
            .spec
            .as_ref()
            .context(MissingSpecSnafu { service: name })?;
        let raw_type = spec
            .type_
            .as_deref()
            .context(MissingTypeSnafu { service: name })?;

        tracing::info!(service = name, service_type = raw_type, "Found service");

        let Some(known) = KnownService::matching(name) else {
            tracing::error!(service = name, "Unknown service found");
            return Ok(());
        };

        let service_type: ServiceType = raw_type.parse().context(UnsupportedTypeSnafu {
            service: name,
            service_type: raw_type,
        })?;

        // ExternalName services are a DNS alias and carry no cluster IP.
        let cluster_ip = if service_type == ServiceType::ExternalName {
            spec.cluster_ip.clone()
        } else {
            let cluster_ip = spec
                .cluster_ip
                .clone()
                .context(MissingClusterIpSnafu { service: name })?;
            Some(cluster_ip)
        };

        let mut node_ports = Vec::new();
        if matches!(service_type, ServiceType::NodePort | ServiceType::LoadBalancer) {
            for port in spec.ports.iter().flatten() {
                let node_port = port.node_port.context(MissingNodePortSnafu {
                    service: name,
                    port: port.port,
                })?;
                node_ports.push(NodePortMapping {
                    name: port.name.clone().unwrap_or_default(),
                    port: to_port(name, port.port)?,
                    node_port: to_port(name, node_port)?,
                });
            }
        }

        let external_ip = if service_type == ServiceType::LoadBalancer {
            let ip = service
                .status
                .as_ref()
                .and_then(|status| status.load_balancer.as_ref())
                .and_then(|load_balancer| load_balancer.ingress.as_ref())
                .and_then(|ingress| ingress.first())
                .and_then(|ingress| ingress.ip.clone())
                .context(MissingLoadBalancerIngressSnafu { service: name })?;
            Some(ip)
        } else {
            None
        };

        let mut proxy_ports = ProxyPorts::default();
        if known == KnownService::INGRESS {
            for (annotation, value) in service.metadata.annotations.iter().flatten() {
                if !annotation.starts_with(PROXY_ANNOTATION_PREFIX) {
                    continue;
                }

                tracing::info!(%annotation, %value, "Proxy port found");
                let suffix = annotation
                    .rsplit_once('-')
                    .map_or(annotation.as_str(), |(_, suffix)| suffix);
                let Ok(protocol) = suffix.parse::<ProxyProtocol>() else {
                    continue;
                };

                let port = value.trim().parse().context(InvalidProxyPortSnafu {
                    service: name,
                    annotation,
                    value,
                })?;
                proxy_ports.set(protocol, port);
            }
        }

        self.records.insert(
            known,
            ServiceRecord {
                kubernetes_name: Some(name.to_owned()),
                service_type: Some(service_type),
                node_ports,
                cluster_ip,
                external_ip,
                proxy_ports,
            },
        );

        Ok(())
    }
}

fn to_port(service: &str, port: i32) -> Result<u16> {
    u16::try_from(port).context(PortOutOfRangeSnafu { service, port })
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn service(name: &str, service_type: &str) -> serde_json::Value {
        json!({
            "metadata": { "name": name },
            "spec": { "type": service_type, "clusterIP": "10.0.0.1" },
        })
    }

    fn service_list(items: Vec<serde_json::Value>) -> String {
        json!({ "kind": "ServiceList", "apiVersion": "v1", "items": items }).to_string()
    }

    #[rstest]
    #[case("lp-launchpad", Some(KnownService::Launchpad))]
    #[case("rw-haproxy-ingress", Some(KnownService::HaproxyIngress))]
    #[case("rw-haproxy-metrics", Some(KnownService::HaproxyMetrics))]
    #[case("alertmgr-0", Some(KnownService::Alertmgr))]
    #[case("launchpad-redis", Some(KnownService::Launchpad))]
    #[case("mongo-redis", Some(KnownService::Redis))]
    #[case("kube-dns", None)]
    fn matching_uses_declaration_order(#[case] name: &str, #[case] expected: Option<KnownService>) {
        assert_eq!(KnownService::matching(name), expected);
    }

    #[rstest]
    #[case(KnownService::Launchpad, "")]
    #[case(KnownService::Grafana, "grafana_")]
    #[case(KnownService::HaproxyIngress, "haproxy_ingress_")]
    #[case(KnownService::HaproxyMetrics, "haproxy_metrics_")]
    fn file_prefix(#[case] known: KnownService, #[case] expected: &str) {
        assert_eq!(known.file_prefix(), expected);
    }

    #[test]
    fn registry_starts_with_all_known_services() {
        let registry = ServiceRegistry::default();

        assert_eq!(registry.iter().count(), 10);
        assert_eq!(registry.discovered().count(), 0);
    }

    #[test]
    fn every_known_service_plus_unknown() {
        let mut items: Vec<_> = KnownService::iter()
            .map(|known| service(&format!("rw-{known}"), "ClusterIP"))
            .collect();
        items.push(service("kube-dns", "ClusterIP"));

        let registry =
            ServiceRegistry::from_json(&service_list(items)).expect("valid service list");

        assert_eq!(registry.iter().count(), 10);
        assert_eq!(registry.discovered().count(), 10);
        assert!(
            registry
                .iter()
                .all(|(_, record)| record.kubernetes_name.as_deref() != Some("kube-dns"))
        );
        assert_eq!(
            registry.get(KnownService::Loki).kubernetes_name.as_deref(),
            Some("rw-loki")
        );
    }

    #[test]
    fn load_balancer_ingress() {
        let raw = indoc! {r#"
            {
              "items": [
                {
                  "metadata": {
                    "name": "rw-haproxy-ingress",
                    "annotations": {
                      "rw-proxy-https": "8443",
                      "rw-proxy-mongo": "27017",
                      "rw-proxy-ftp": "21",
                      "unrelated": "value"
                    }
                  },
                  "spec": {
                    "type": "LoadBalancer",
                    "clusterIP": "10.96.0.20",
                    "ports": [
                      { "name": "https", "port": 443, "nodePort": 30443 },
                      { "name": "redis", "port": 8014, "nodePort": 30014 },
                      { "port": 8006, "nodePort": 30006 }
                    ]
                  },
                  "status": {
                    "loadBalancer": { "ingress": [ { "ip": "203.0.113.10" } ] }
                  }
                }
              ]
            }
        "#};

        let registry = ServiceRegistry::from_json(raw).expect("valid service list");
        let ingress = registry.ingress();

        assert_eq!(ingress.service_type, Some(ServiceType::LoadBalancer));
        assert_eq!(ingress.cluster_ip.as_deref(), Some("10.96.0.20"));
        assert_eq!(ingress.external_ip.as_deref(), Some("203.0.113.10"));
        assert_eq!(
            ingress.node_ports,
            vec![
                NodePortMapping {
                    name: "https".to_owned(),
                    port: 443,
                    node_port: 30443
                },
                NodePortMapping {
                    name: "redis".to_owned(),
                    port: 8014,
                    node_port: 30014
                },
                NodePortMapping {
                    name: String::new(),
                    port: 8006,
                    node_port: 30006
                },
            ]
        );
        assert_eq!(
            ingress.proxy_ports,
            ProxyPorts {
                https: Some(8443),
                redis: None,
                mongo: Some(27017),
            }
        );
    }

    #[test]
    fn cluster_ip_service_has_no_node_ports() {
        let raw = service_list(vec![json!({
            "metadata": { "name": "rw-grafana" },
            "spec": {
                "type": "ClusterIP",
                "clusterIP": "10.0.0.7",
                "ports": [ { "name": "http", "port": 3000 } ]
            }
        })]);

        let registry = ServiceRegistry::from_json(&raw).expect("valid service list");
        let grafana = registry.get(KnownService::Grafana);

        assert_eq!(grafana.service_type, Some(ServiceType::ClusterIp));
        assert!(grafana.node_ports.is_empty());
        assert_eq!(grafana.external_ip, None);
    }

    #[test]
    fn proxy_annotations_ignored_on_other_services() {
        let raw = service_list(vec![json!({
            "metadata": {
                "name": "rw-redis",
                "annotations": { "rw-proxy-redis": "9000" }
            },
            "spec": { "type": "ClusterIP", "clusterIP": "10.0.0.8" }
        })]);

        let registry = ServiceRegistry::from_json(&raw).expect("valid service list");
        assert_eq!(
            registry.get(KnownService::Redis).proxy_ports,
            ProxyPorts::default()
        );
    }

    #[test]
    fn load_balancer_without_ingress_is_malformed() {
        let raw = service_list(vec![json!({
            "metadata": { "name": "rw-haproxy-ingress" },
            "spec": { "type": "LoadBalancer", "clusterIP": "10.0.0.9", "ports": [] },
            "status": { "loadBalancer": { "ingress": [] } }
        })]);

        let err = ServiceRegistry::from_json(&raw).expect_err("missing ingress IP");
        assert!(matches!(err, Error::MissingLoadBalancerIngress { .. }));
    }

    #[test]
    fn node_port_without_node_port_is_malformed() {
        let raw = service_list(vec![json!({
            "metadata": { "name": "rw-haproxy-ingress" },
            "spec": {
                "type": "NodePort",
                "clusterIP": "10.0.0.9",
                "ports": [ { "name": "https", "port": 443 } ]
            }
        })]);

        let err = ServiceRegistry::from_json(&raw).expect_err("missing node port");
        assert!(matches!(err, Error::MissingNodePort { port: 443, .. }));
    }

    #[test]
    fn invalid_proxy_annotation_is_malformed() {
        let raw = service_list(vec![json!({
            "metadata": {
                "name": "rw-haproxy-ingress",
                "annotations": { "rw-proxy-https": "secure" }
            },
            "spec": { "type": "ClusterIP", "clusterIP": "10.0.0.9" }
        })]);

        let err = ServiceRegistry::from_json(&raw).expect_err("invalid proxy port");
        assert!(matches!(err, Error::InvalidProxyPort { .. }));
    }

    #[rstest]
    #[case("not json")]
    #[case("{}")]
    #[case(r#"{"items": {}}"#)]
    fn malformed_payload(#[case] raw: &str) {
        let err = ServiceRegistry::from_json(raw).expect_err("malformed payload");
        assert!(matches!(err, Error::DeserializeServiceList { .. }));
    }

    #[test]
    fn unknown_service_with_odd_type_is_skipped() {
        let raw = service_list(vec![service("kube-dns", "Headless")]);

        let registry = ServiceRegistry::from_json(&raw).expect("valid service list");
        assert_eq!(registry.discovered().count(), 0);
    }

    #[test]
    fn unsupported_type_of_known_service_is_malformed() {
        let raw = service_list(vec![service("rw-loki", "Headless")]);

        let err = ServiceRegistry::from_json(&raw).expect_err("unsupported type");
        assert!(matches!(err, Error::UnsupportedType { .. }));
    }

    #[test]
    fn external_name_service_needs_no_cluster_ip() {
        let raw = service_list(vec![json!({
            "metadata": { "name": "rw-loki" },
            "spec": { "type": "ExternalName", "externalName": "loki.example.com" },
        })]);

        let registry = ServiceRegistry::from_json(&raw).expect("valid service list");
        let loki = registry.get(KnownService::Loki);

        assert_eq!(loki.service_type, Some(ServiceType::ExternalName));
        assert_eq!(loki.cluster_ip, None);
    }

    #[test]
    fn cluster_ip_is_required_for_other_types() {
        let raw = service_list(vec![json!({
            "metadata": { "name": "rw-loki" },
            "spec": { "type": "ClusterIP" },
        })]);

        let err = ServiceRegistry::from_json(&raw).expect_err("cluster IP missing");
        assert!(matches!(err, Error::MissingClusterIp { .. }));
    }
}
