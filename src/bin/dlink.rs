use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use clap::Parser;
use clap_derive::Parser;
use dvrouter::gate::local_packet::ModuleId;
use dvrouter::link::link_app::LinkApp;
use dvrouter::link::link_config::LinkConfig;
use tracing::Level;

#[derive(Parser)]
struct Args {
    /// the gateway's callsign, without module letter
    callsign: String,

    /// host list with one `name ip` pair per line
    reflectors_file: PathBuf,

    /// module letters that may be linked
    #[clap(short, long)]
    module: Vec<char>,

    #[clap(long, default_value = "dgate.sock")]
    socket: PathBuf,

    #[clap(long, default_value_t = 30001)]
    xrf_port: u16,

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

    let mut config = LinkConfig::new(&args.callsign, args.module.into_iter().map(ModuleId::new), args.reflectors_file);
    config.local_socket_path = args.socket;
    config.xrf_port = args.xrf_port;
    config.xrf_bind_port = args.xrf_port;

    LinkApp::bind(Arc::new(config))?
        .run().await
}
