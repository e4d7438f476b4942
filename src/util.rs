const DEFAULT_AGENT_PORT: u16 = 8080;

const DEFAULT_CTRL_PORT: u16 = 8000;

pub fn get_default_agent_port() -> u16 {
    DEFAULT_AGENT_PORT
}

pub fn get_default_ctrl_port() -> u16 {
    DEFAULT_CTRL_PORT
}

/// URL of a host with port, e.g. `http://192.0.2.1:8000/`.
///
/// IPv6 literals are wrapped in brackets.
pub fn host_with_port_url(address: &str, port: u16) -> String {
    if address.contains(':') && !address.starts_with('[') {
        format!("http://[{address}]:{port}/")
    } else {
        format!("http://{address}:{port}/")
    }
}
