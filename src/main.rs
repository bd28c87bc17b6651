// meshlist - Run a single cluster member from the command line

use clap::{Parser, ValueEnum};
use meshlist::{
    ChannelEventDelegate, Delegates, Memberlist, MemberlistConfig, NetTransport,
    NetTransportConfig,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Profile {
    Lan,
    Wan,
    Local,
}

#[derive(Parser, Debug)]
#[command(name = "meshlist", about = "Gossip membership agent")]
struct Args {
    /// Unique node name
    #[arg(long)]
    name: String,

    /// UDP and TCP bind address
    #[arg(long, default_value = "0.0.0.0:7946")]
    bind: SocketAddr,

    /// Address advertised to peers
    #[arg(long)]
    advertise: Option<SocketAddr>,

    /// Seed to join; repeat for several
    #[arg(long)]
    join: Vec<SocketAddr>,

    /// Timing profile
    #[arg(long, value_enum, default_value = "lan")]
    profile: Profile,

    /// How long to wait for the leave broadcast on exit, in seconds
    #[arg(long, default_value_t = 5)]
    leave_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let base = match args.profile {
        Profile::Lan => MemberlistConfig::default_lan(),
        Profile::Wan => MemberlistConfig::default_wan(),
        Profile::Local => MemberlistConfig::default_local(),
    };
    let config = base
        .with_name(&args.name)
        .with_bind_addr(args.bind)
        .with_advertise_addr(args.advertise);

    let transport = NetTransport::bind(
        NetTransportConfig::new()
            .with_bind_addr(args.bind)
            .with_advertise_addr(args.advertise),
    )
    .await?;

    let (events, mut event_rx) = ChannelEventDelegate::channel();
    let delegates = Delegates::new().with_events(Arc::new(events));
    let memberlist = Memberlist::create(config, transport, delegates).await?;

    if !args.join.is_empty() {
        match memberlist.join(&args.join).await {
            Ok(count) => info!(count, "joined cluster"),
            Err(e) => error!(error = %e, "failed to join cluster"),
        }
    }

    loop {
        tokio::select! {
            event = event_rx.recv() => match event {
                Some(event) => info!(
                    kind = %event.kind,
                    node = %event.node.name,
                    addr = %event.node.addr,
                    members = memberlist.num_members(),
                    "membership changed"
                ),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, leaving");
                break;
            }
        }
    }

    if let Err(e) = memberlist.leave(Duration::from_secs(args.leave_timeout)).await {
        error!(error = %e, "leave did not complete");
    }
    memberlist.shutdown().await?;
    Ok(())
}
