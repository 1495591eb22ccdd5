//! Local network address resolution.

use std::io;
use std::net::{IpAddr, UdpSocket};
use tracing::warn;

/// Shown when the device has no usable network interface
pub const NOT_CONNECTED: &str = "Not Connected";

/// Shown when the address could not be determined
pub const UNKNOWN_ADDRESS: &str = "Unknown";

/// Resolve the address peers should dial, for display.
///
/// A concrete `host` is returned as-is. For wildcard or named hosts the
/// address of the interface carrying the default route is used.
pub fn resolve_bind_address(host: &str) -> String {
    if let Ok(ip) = host.parse::<IpAddr>() {
        if !ip.is_unspecified() {
            return ip.to_string();
        }
    }

    match local_ip() {
        Ok(Some(ip)) => ip.to_string(),
        Ok(None) => NOT_CONNECTED.to_string(),
        Err(e) => {
            warn!("Error getting local address: {}", e);
            UNKNOWN_ADDRESS.to_string()
        }
    }
}

/// Ask the OS which local address it would route outbound traffic from.
///
/// Connecting a UDP socket sends nothing; it only selects a route.
fn local_ip() -> io::Result<Option<IpAddr>> {
    let socket = UdpSocket::bind(("0.0.0.0", 0))?;
    match socket.connect(("8.8.8.8", 80)) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NetworkUnreachable => return Ok(None),
        Err(e) => return Err(e),
    }
    let ip = socket.local_addr()?.ip();
    if ip.is_unspecified() || ip.is_loopback() {
        Ok(None)
    } else {
        Ok(Some(ip))
    }
}
