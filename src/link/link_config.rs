use std::path::PathBuf;
use std::time::Duration;

use rustc_hash::FxHashSet;

use crate::dv::header::{callsign, Callsign};
use crate::gate::local_packet::ModuleId;

#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// the gateway's callsign without module suffix
    pub callsign: Callsign,
    /// modules whose users may link to reflectors
    pub modules: FxHashSet<ModuleId>,
    /// `name ip` per line
    pub reflectors_file: PathBuf,

    /// the reflectors' port
    pub xrf_port: u16,
    /// the local port for XRF traffic, on IPv4 and IPv6
    pub xrf_bind_port: u16,

    /// link requests are not acknowledged at the datagram level, so they are sent several times
    pub link_request_repeat: usize,
    pub heartbeat_interval: Duration,
    /// a link without any traffic from the reflector for this long is dropped
    pub idle_timeout: Duration,

    pub local_socket_path: PathBuf,
}

impl LinkConfig {
    pub fn new(own_callsign: &str, modules: impl IntoIterator<Item=ModuleId>, reflectors_file: PathBuf) -> LinkConfig {
        LinkConfig {
            callsign: callsign(own_callsign),
            modules: modules.into_iter().collect(),
            reflectors_file,
            xrf_port: 30001,
            xrf_bind_port: 30001,
            link_request_repeat: 5,
            heartbeat_interval: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(5),
            local_socket_path: PathBuf::from("dgate.sock"),
        }
    }

    pub fn is_enabled(&self, module: ModuleId) -> bool {
        self.modules.contains(&module)
    }
}
