use clap::Parser;
use fleetmon::{config::load_task_config, manager, reliable::RetryPolicy, util};
use tokio::net::{TcpListener, UdpSocket};
use tracing::{level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Task configuration file
    #[arg(short)]
    file: String,

    /// UDP port for registrations and task dispatch
    #[arg(long, default_value_t = util::get_manager_udp_port())]
    udp_port: u16,

    /// TCP port for reports and alerts
    #[arg(long, default_value_t = util::get_manager_tcp_port())]
    tcp_port: u16,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("fleetmon", LevelFilter::TRACE),
        ("fleetmon_manager", LevelFilter::TRACE),
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

    let tasks = load_task_config(&args.file)?;

    let udp = UdpSocket::bind(("0.0.0.0", args.udp_port)).await?;
    let tcp = TcpListener::bind(("0.0.0.0", args.tcp_port)).await?;

    manager::run(udp, tcp, tasks, RetryPolicy::default()).await
}
