//! Finds the host's first non-loopback IPv4 address. Purely informational:
//! the accounting rules match on source port, not address, but the log
//! line ties a run to a host when logs are aggregated.

use nix::ifaddrs::getifaddrs;
use std::net::Ipv4Addr;
use tracing::error;

pub fn local_ipv4() -> Option<Ipv4Addr> {
    let addrs = match getifaddrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            error!("unable to enumerate interface addresses: {e}");
            return None;
        }
    };
    for ifaddr in addrs {
        let addr = match ifaddr.address {
            Some(addr) => addr,
            None => continue,
        };
        if let Some(sin) = addr.as_sockaddr_in() {
            let ip = sin.ip();
            if !ip.is_loopback() {
                return Some(ip);
            }
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn loopback_is_never_reported() {
        if let Some(ip) = local_ipv4() {
            assert!(!ip.is_loopback());
        }
    }
}
