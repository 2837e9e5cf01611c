use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use clap::Parser;
use clap_derive::Parser;
use dvrouter::gate::gate::Gate;
use dvrouter::gate::gate_config::GateConfig;
use dvrouter::gate::local_packet::ModuleId;
use dvrouter::store::kv_store::MemoryStore;
use tracing::Level;

#[derive(Parser)]
struct Args {
    /// the gateway's callsign, without module letter
    callsign: String,

    /// module letters to serve
    #[clap(short, long)]
    module: Vec<char>,

    #[clap(long, default_value = "dgate.sock")]
    socket: PathBuf,

    #[clap(long, default_value_t = 40000)]
    g2_port_v4: u16,

    #[clap(long, default_value_t = 9011)]
    g2_port_v6: u16,

    /// do not forward local transmissions to the destination user's gateway
    #[clap(long, default_value_t = false)]
    no_route_lookup: bool,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.module.is_empty() {
        return Err(anyhow!("missing modules"));
    }

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let mut config = GateConfig::new(&args.callsign, args.module.into_iter().map(ModuleId::new));
    config.local_socket_path = args.socket;
    config.g2_port_v4 = args.g2_port_v4;
    config.g2_port_v6 = args.g2_port_v6;
    config.route_lookup = !args.no_route_lookup;

    let gate = Gate::bind(Arc::new(config), Arc::new(MemoryStore::new())).await?;
    gate.run().await
}
