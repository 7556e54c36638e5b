use std::net::{IpAddr, Ipv4Addr};

const MANAGER_UDP_PORT: &str = "MANAGER_UDP_PORT";

const DEFAULT_UDP_PORT: u16 = 6667;

pub fn get_manager_udp_port() -> u16 {
    let port_from_env = std::env::var(MANAGER_UDP_PORT);
    port_from_env.map_or(DEFAULT_UDP_PORT, |res| res.parse().unwrap_or(DEFAULT_UDP_PORT))
}

const MANAGER_TCP_PORT: &str = "MANAGER_TCP_PORT";

const DEFAULT_TCP_PORT: u16 = 6668;

pub fn get_manager_tcp_port() -> u16 {
    let port_from_env = std::env::var(MANAGER_TCP_PORT);
    port_from_env.map_or(DEFAULT_TCP_PORT, |res| res.parse().unwrap_or(DEFAULT_TCP_PORT))
}

const MANAGER_ADDR: &str = "MANAGER_ADDR";

const DEFAULT_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));

pub fn get_manager_addr() -> IpAddr {
    let addr_from_env = std::env::var(MANAGER_ADDR);
    addr_from_env.map_or(DEFAULT_ADDR, |res| res.parse().unwrap_or(DEFAULT_ADDR))
}
