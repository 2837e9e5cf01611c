//! A packet router for D-STAR digital voice: the gate connects repeater modules to the G2 gateway
//!  network and to local clients such as the reflector linker and the echo service.

pub mod client;
pub mod dv;
pub mod echo;
pub mod gate;
pub mod link;
pub mod store;
pub mod util;

#[cfg(test)]
pub mod test_util;
