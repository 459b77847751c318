//! Login host name resolution
//!
//! Cluster login nodes are not always known to the local DNS server. The
//! system resolver is asked first and, when it knows the name, the name is
//! passed to `ssh` unchanged so `~/.ssh/config` still applies. Otherwise each
//! configured nameserver group is asked in turn and the first address found
//! is used instead.

use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use std::net::IpAddr;
use thiserror::Error;

/// Port used only to satisfy the system lookup
const SSH_PORT: u16 = 22;

/// Port the fallback nameservers listen on
const DNS_PORT: u16 = 53;

/// A host name no resolver could find.
#[derive(Debug, Error)]
#[error("could not resolve {host}: {reason}")]
pub struct ResolveError {
    /// Host that failed
    pub host: String,
    /// Diagnostic from the last resolver asked
    pub reason: String,
}

/// What resolving a host produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// The system resolver knows the name; connect to it as given.
    Name(String),
    /// A fallback nameserver group found this address.
    Fallback {
        /// Address to connect to
        address: IpAddr,
        /// The group that answered
        nameservers: Vec<String>,
    },
}

impl Resolved {
    /// What to hand to `ssh`.
    pub fn target(&self) -> String {
        match self {
            Resolved::Name(host) => host.clone(),
            Resolved::Fallback { address, .. } => address.to_string(),
        }
    }
}

/// Turns a login host name into something `ssh` can reach.
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Resolve `host`.
    async fn resolve(&self, host: &str) -> Result<Resolved, ResolveError>;
}

/// One way of looking up an address.
#[async_trait]
pub trait AddressLookup: Send + Sync {
    /// First address for `host`, or a diagnostic.
    async fn lookup(&self, host: &str) -> Result<IpAddr, String>;
}

/// The operating system's resolver.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLookup;

#[async_trait]
impl AddressLookup for SystemLookup {
    async fn lookup(&self, host: &str) -> Result<IpAddr, String> {
        let mut addrs = tokio::net::lookup_host((host, SSH_PORT))
            .await
            .map_err(|e| e.to_string())?;
        addrs
            .next()
            .map(|addr| addr.ip())
            .ok_or_else(|| "no addresses".to_string())
    }
}

/// A DNS client bound to one group of nameservers.
pub struct DnsLookup {
    resolver: TokioAsyncResolver,
}

impl DnsLookup {
    /// Ask only `servers`, over UDP with TCP fallback.
    pub fn new(servers: &[IpAddr]) -> Self {
        let group = NameServerConfigGroup::from_ips_clear(servers, DNS_PORT, true);
        let config = ResolverConfig::from_parts(None, Vec::new(), group);
        let mut options = ResolverOpts::default();
        options.attempts = 1;
        Self {
            resolver: TokioAsyncResolver::tokio(config, options),
        }
    }
}

#[async_trait]
impl AddressLookup for DnsLookup {
    async fn lookup(&self, host: &str) -> Result<IpAddr, String> {
        let answer = self
            .resolver
            .lookup_ip(host)
            .await
            .map_err(|e| e.to_string())?;
        answer.iter().next().ok_or_else(|| "no addresses".to_string())
    }
}

/// A nameserver group and the lookup that asks it.
pub struct NameserverGroup {
    servers: Vec<String>,
    lookup: Box<dyn AddressLookup>,
}

impl NameserverGroup {
    /// Pair a lookup with the servers it asks, for reporting.
    pub fn new(servers: Vec<String>, lookup: Box<dyn AddressLookup>) -> Self {
        Self { servers, lookup }
    }

    /// A real DNS client for `servers`. Entries that are not IP addresses
    /// are skipped; `None` when nothing usable is left.
    pub fn dns(servers: &[String]) -> Option<Self> {
        let ips: Vec<IpAddr> = servers
            .iter()
            .filter_map(|s| match s.parse() {
                Ok(ip) => Some(ip),
                Err(_) => {
                    tracing::warn!(nameserver = %s, "ignoring nameserver that is not an IP address");
                    None
                }
            })
            .collect();
        if ips.is_empty() {
            return None;
        }
        Some(Self::new(servers.to_vec(), Box::new(DnsLookup::new(&ips))))
    }
}

/// The system resolver, then each nameserver group in order.
pub struct FallbackResolver {
    system: Box<dyn AddressLookup>,
    groups: Vec<NameserverGroup>,
}

impl FallbackResolver {
    /// Chain `system` with `groups`.
    pub fn new(system: Box<dyn AddressLookup>, groups: Vec<NameserverGroup>) -> Self {
        Self { system, groups }
    }

    /// The system resolver followed by a DNS client per configured group.
    pub fn from_nameservers(nameservers: &[Vec<String>]) -> Self {
        let groups = nameservers
            .iter()
            .filter_map(|servers| NameserverGroup::dns(servers))
            .collect();
        Self::new(Box::new(SystemLookup), groups)
    }
}

#[async_trait]
impl HostResolver for FallbackResolver {
    async fn resolve(&self, host: &str) -> Result<Resolved, ResolveError> {
        let mut reason = match self.system.lookup(host).await {
            Ok(_) => return Ok(Resolved::Name(host.to_string())),
            Err(reason) => reason,
        };

        for group in &self.groups {
            tracing::info!(%host, nameservers = ?group.servers, "could not resolve, trying other nameservers");
            match group.lookup.lookup(host).await {
                Ok(address) => {
                    return Ok(Resolved::Fallback {
                        address,
                        nameservers: group.servers.clone(),
                    })
                }
                Err(e) => {
                    tracing::debug!(%host, error = %e, "nameserver group failed");
                    reason = e;
                }
            }
        }

        Err(ResolveError {
            host: host.to_string(),
            reason,
        })
    }
}

/// Hands every name through untouched. For tests and offline use.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughResolver;

#[async_trait]
impl HostResolver for PassthroughResolver {
    async fn resolve(&self, host: &str) -> Result<Resolved, ResolveError> {
        Ok(Resolved::Name(host.to_string()))
    }
}
