use std::net::IpAddr;
use url::{Host, Url};

use super::document::CredentialDocument;
use crate::error::{Result, Stage};
use crate::types::ClusterEndpoint;

/// True when `server` points at the address k3s records for itself: a
/// loopback or unspecified IP, or `localhost`.
pub fn is_loopback_server(server: &str) -> bool {
    let Ok(url) = Url::parse(server) else {
        return false;
    };
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => is_local_ip(IpAddr::V4(ip)),
        Some(Host::Ipv6(ip)) => is_local_ip(IpAddr::V6(ip)),
        None => false,
    }
}

fn is_local_ip(ip: IpAddr) -> bool {
    ip.is_loopback() || ip.is_unspecified()
}

/// Replaces loopback server addresses in place. Returns the names of the
/// clusters that changed; other addresses are left alone.
pub fn rewrite_loopback(doc: &mut CredentialDocument, endpoint: &ClusterEndpoint) -> Vec<String> {
    let target = endpoint.server_url();
    let mut rewritten = Vec::new();
    for entry in &mut doc.clusters {
        if is_loopback_server(&entry.cluster.server) {
            entry.cluster.server = target.clone();
            rewritten.push(entry.name.clone());
        }
    }
    rewritten
}

/// Parses the fetched document and points it at `endpoint`.
pub fn rewrite_document(
    raw: &str,
    endpoint: &ClusterEndpoint,
) -> Result<(CredentialDocument, Vec<String>)> {
    let mut doc = CredentialDocument::parse(raw, Stage::Rewriting)?;
    let rewritten = rewrite_loopback(&mut doc, endpoint);
    Ok((doc, rewritten))
}
