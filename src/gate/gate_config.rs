use std::path::PathBuf;
use std::time::Duration;

use rustc_hash::FxHashSet;

use crate::dv::header::{callsign, Callsign};
use crate::gate::local_packet::ModuleId;

#[derive(Debug, Clone)]
pub struct GateConfig {
    /// the gateway's callsign without module suffix
    pub callsign: Callsign,
    pub modules: FxHashSet<ModuleId>,

    pub g2_port_v4: u16,
    pub g2_port_v6: u16,

    pub local_socket_path: PathBuf,
    pub local_socket_backlog: i32,

    /// a transmission without header or voice for this long is closed by the gate
    pub tx_timeout: Duration,

    /// forward locally originated transmissions to the destination user's gateway if it is known
    pub route_lookup: bool,
}

impl GateConfig {
    pub fn new(own_callsign: &str, modules: impl IntoIterator<Item=ModuleId>) -> GateConfig {
        GateConfig {
            callsign: callsign(own_callsign),
            modules: modules.into_iter().collect(),
            g2_port_v4: 40000,
            g2_port_v6: 9011,
            local_socket_path: PathBuf::from("dgate.sock"),
            local_socket_backlog: 5,
            tx_timeout: Duration::from_secs(1),
            route_lookup: true,
        }
    }

    pub fn is_enabled(&self, module: ModuleId) -> bool {
        self.modules.contains(&module)
    }
}
