use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use clap_derive::Parser;
use dvrouter::client::gate_client::{run_client, GateConnection};
use dvrouter::echo::echo_client::{EchoClient, EchoConfig};
use dvrouter::gate::local_packet::ModuleId;
use tracing::Level;

#[derive(Parser)]
struct Args {
    /// callsign the replies are sent from
    callsign: String,

    #[clap(short, long, default_value_t = 'E')]
    module: char,

    #[clap(long, default_value = "dgate.sock")]
    socket: PathBuf,

    #[clap(long, default_value = "ECHO")]
    reply_text: String,

    /// APRS packet to send along with each reply
    #[clap(long)]
    aprs: Option<String>,

    #[clap(long, default_value_t = 500)]
    reply_delay_millis: u64,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let mut config = EchoConfig::new(&args.callsign, ModuleId::new(args.module));
    config.local_socket_path = args.socket;
    config.reply_text = args.reply_text;
    config.aprs = args.aprs;
    config.reply_delay = Duration::from_millis(args.reply_delay_millis);

    let conn = Arc::new(GateConnection::connect(&config.local_socket_path)?);
    let mut client = EchoClient::new(Arc::new(config), conn.clone());
    run_client(&conn, &mut client).await;
    Ok(())
}
