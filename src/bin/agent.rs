use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use fleetmon::{
    agent::{self, AgentConfig},
    engine::EngineSettings,
    probes::SystemProbes,
    reliable::RetryPolicy,
    util,
};
use tracing::{level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// This agent's identifier
    #[arg(short, long)]
    id: u16,

    /// Manager address
    #[arg(long, default_value_t = util::get_manager_addr())]
    manager: std::net::IpAddr,

    /// Manager UDP port (registration and tasks)
    #[arg(long, default_value_t = util::get_manager_udp_port())]
    udp_port: u16,

    /// Manager TCP port (reports and alerts)
    #[arg(long, default_value_t = util::get_manager_tcp_port())]
    tcp_port: u16,
}

fn init() {
    dotenv::dotenv().ok();

    let filter = filter::Targets::new().with_targets(vec![
        ("fleetmon", LevelFilter::TRACE),
        ("fleetmon_agent", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = AgentConfig {
        agent_id: args.id,
        manager_udp: SocketAddr::new(args.manager, args.udp_port),
        manager_tcp: SocketAddr::new(args.manager, args.tcp_port),
        policy: RetryPolicy::default(),
        engine: EngineSettings::default(),
    };

    agent::run(config, Arc::new(SystemProbes)).await
}
