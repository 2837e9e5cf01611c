pub mod gate_client;
