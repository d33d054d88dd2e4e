//! Address classification and endpoint formatting helpers.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::config::{Config, EncryptionMode};

/// Encryption requirement for the given peer address, per the configured
/// LAN/WAN policy.
pub fn encryption_mode_for_address(addr: IpAddr, config: &Config) -> EncryptionMode {
    if is_lan(addr) {
        config.lan_encryption
    } else {
        config.wan_encryption
    }
}

fn is_lan(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_lan(IpAddr::V4(mapped));
            }
            // Loopback, link-local (fe80::/10), or unique-local (fc00::/7).
            v6.is_loopback()
                || (v6.segments()[0] & 0xffc0) == 0xfe80
                || (v6.segments()[0] & 0xfe00) == 0xfc00
        }
    }
}

/// The `LocalIP` value reported in `serverinfo`.
///
/// Clients track LAN IPv6 addresses separately and expect this field to be
/// IPv4; returning a bare IPv6 address here would clobber their stored
/// IPv4 address. Non-v4-mapped IPv6 endpoints therefore report the
/// loopback placeholder, which IPv6-capable clients know to ignore.
pub fn local_ip_string(local: SocketAddr) -> String {
    match local.ip() {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(mapped) => mapped.to_string(),
            None => Ipv4Addr::LOCALHOST.to_string(),
        },
    }
}

/// Host part for a URL, bracketing IPv6 addresses.
pub fn url_host(local: SocketAddr) -> String {
    match local.ip() {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(mapped) => mapped.to_string(),
            None => format!("[{v6}]"),
        },
    }
}

/// Best-effort MAC address of a local interface, formatted
/// `aa:bb:cc:dd:ee:ff`. Plaintext requests never see this; they get the
/// all-zero placeholder instead.
pub fn local_mac_address() -> String {
    #[cfg(target_os = "linux")]
    {
        if let Ok(entries) = std::fs::read_dir("/sys/class/net") {
            for entry in entries.flatten() {
                let name = entry.file_name();
                if name == "lo" {
                    continue;
                }
                let path = entry.path().join("address");
                if let Ok(mac) = std::fs::read_to_string(path) {
                    let mac = mac.trim().to_string();
                    if !mac.is_empty() && mac != "00:00:00:00:00:00" {
                        return mac;
                    }
                }
            }
        }
    }

    placeholder_mac()
}

/// The all-zero MAC clients know to ignore.
pub fn placeholder_mac() -> String {
    "00:00:00:00:00:00".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sock(ip: IpAddr) -> SocketAddr {
        SocketAddr::new(ip, 47984)
    }

    #[test]
    fn test_is_lan_classification() {
        assert!(is_lan("192.168.1.10".parse().unwrap()));
        assert!(is_lan("10.0.0.7".parse().unwrap()));
        assert!(is_lan("127.0.0.1".parse().unwrap()));
        assert!(!is_lan("8.8.8.8".parse().unwrap()));
        assert!(is_lan("fe80::1".parse().unwrap()));
        assert!(is_lan("fd12::1".parse().unwrap()));
        assert!(!is_lan("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn test_local_ip_v4_passthrough() {
        let addr = sock("192.168.1.5".parse().unwrap());
        assert_eq!(local_ip_string(addr), "192.168.1.5");
    }

    #[test]
    fn test_local_ip_v6_placeholder() {
        let addr = sock(IpAddr::V6("2001:db8::1".parse().unwrap()));
        assert_eq!(local_ip_string(addr), "127.0.0.1");
    }

    #[test]
    fn test_local_ip_v4_mapped_unwraps() {
        let mapped = "192.168.1.5".parse::<Ipv4Addr>().unwrap().to_ipv6_mapped();
        let addr = sock(IpAddr::V6(mapped));
        assert_eq!(local_ip_string(addr), "192.168.1.5");
    }

    #[test]
    fn test_url_host_brackets_v6() {
        let addr = sock(IpAddr::V6("2001:db8::1".parse().unwrap()));
        assert_eq!(url_host(addr), "[2001:db8::1]");
    }

    #[test]
    fn test_placeholder_mac_format() {
        assert_eq!(placeholder_mac(), "00:00:00:00:00:00");
    }
}
