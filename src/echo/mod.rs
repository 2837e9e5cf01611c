pub mod echo_client;
