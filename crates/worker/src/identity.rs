//! Stable machine identifier derived from host name and hardware addresses.

use sha2::{Digest, Sha256};
use sysinfo::Networks;
use tracing::debug;

const HOST_LABEL_MAX_LEN: usize = 32;

/// Resolve the machine id for this host. Never fails: with no usable hardware
/// addresses the id is derived from the host name alone.
pub fn resolve_machine_id() -> String {
    let hostname = local_hostname();
    let addresses = hardware_addresses();
    debug!(
        "Resolving machine id from host {} and {} hardware addresses",
        hostname,
        addresses.len()
    );
    machine_id_from(&hostname, &addresses)
}

pub fn local_hostname() -> String {
    hostname::get()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown-host".to_string())
}

fn hardware_addresses() -> Vec<[u8; 6]> {
    let networks = Networks::new_with_refreshed_list();
    networks
        .iter()
        .map(|(_, data)| data.mac_address().0)
        .collect()
}

/// Deterministic for a given host name and address set, independent of address order.
pub fn machine_id_from(hostname: &str, addresses: &[[u8; 6]]) -> String {
    let mut usable: Vec<String> = addresses
        .iter()
        .filter(|mac| !is_null_or_broadcast(mac))
        .map(|mac| format_mac(mac))
        .collect();
    usable.sort();
    usable.dedup();

    let mut hasher = Sha256::new();
    hasher.update(hostname.as_bytes());
    for mac in &usable {
        hasher.update(b"|");
        hasher.update(mac.as_bytes());
    }
    let digest = hex::encode(hasher.finalize());

    format!("{}-{}", host_label(hostname), &digest[..16])
}

fn is_null_or_broadcast(mac: &[u8; 6]) -> bool {
    mac.iter().all(|b| *b == 0x00) || mac.iter().all(|b| *b == 0xff)
}

fn format_mac(mac: &[u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

fn host_label(hostname: &str) -> String {
    let label: String = hostname
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .take(HOST_LABEL_MAX_LEN)
        .collect();
    let label = label.trim_matches('-');
    if label.is_empty() {
        "host".to_string()
    } else {
        label.to_string()
    }
}
