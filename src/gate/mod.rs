//! The gate: routes D-STAR transmissions between the G2 gateway network and the local clients
//!  (repeater controllers, reflector links, echo) connected through a local socket.

pub mod g2_packet;
pub mod gate;
pub mod gate_config;
pub mod gate_events;
pub mod local_packet;
pub mod module_state;
pub mod router;
pub mod subscribers;
