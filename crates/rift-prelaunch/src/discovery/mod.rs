//! Discovery of the launchpad services running in the pod's namespace.
//!
//! [`client`] fetches the raw services list from the Kubernetes API server,
//! [`service`] classifies it into a [`ServiceRegistry`].

pub mod client;
pub mod service;

pub use client::{ServiceAccount, fetch_services};
pub use service::{
    KnownService, NodePortMapping, ProxyPorts, ProxyProtocol, ServiceRecord, ServiceRegistry,
    ServiceType,
};
