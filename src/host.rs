use std::net::IpAddr;

use sysinfo::{NetworkData, Networks, System};

/// Identity fields stamped into every result record. Lookups are
/// best-effort; anything undetectable falls back to "Unknown".
#[derive(Debug, Clone)]
pub struct HostInfo {
    pub computer_name: String,
    pub ip: String,
    pub connection_type: String,
}

pub fn collect() -> HostInfo {
    let networks = Networks::new_with_refreshed_list();

    let mut ip = None;
    let mut connection_type = None;
    for (name, data) in networks.iter() {
        let Some(addr) = first_ipv4(data) else {
            continue;
        };
        ip = Some(addr.to_string());
        connection_type = Some(classify_interface(name));
        break;
    }

    HostInfo {
        computer_name: System::host_name().unwrap_or_else(|| "Unknown".into()),
        ip: ip.unwrap_or_else(|| "Unknown".into()),
        connection_type: connection_type.unwrap_or_else(|| "Unknown".into()),
    }
}

fn first_ipv4(data: &NetworkData) -> Option<std::net::Ipv4Addr> {
    data.ip_networks().iter().find_map(|network| match network.addr {
        IpAddr::V4(addr) if !addr.is_loopback() && !addr.is_link_local() => Some(addr),
        _ => None,
    })
}

/// Interface kind is inferred from the name; the platforms this runs on
/// expose no richer signal through the interface list.
fn classify_interface(name: &str) -> String {
    let name = name.to_ascii_lowercase();
    let kind = if name.starts_with("wl") || name.contains("wlan") || name.contains("wifi") {
        "WiFi"
    } else if name.starts_with("ww") || name.starts_with("rmnet") {
        "Cellular"
    } else if name.starts_with("en") || name.starts_with("eth") {
        "Ethernet"
    } else {
        "LAN"
    };
    kind.to_string()
}
