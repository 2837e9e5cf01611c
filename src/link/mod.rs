//! The reflector linker: a local client of the gate that links one module at a time to an XRF
//!  reflector and relays traffic in both directions.

pub mod link_app;
pub mod link_config;
pub mod link_state;
pub mod reflectors;
pub mod xrf_packet;
