use anyhow::Context;
use broadsky_bridge::{
    BridgeConfig, SessionEnd, start_bridge,
    cli::{BridgeProtocol, BroadskyCli, BroadskyCommands},
};
use broadsky_zenoh::{BroadskyZenohConfig, Envconfig};
use clap::Parser;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = BroadskyCli::parse();
    let conf = BridgeConfig::init_from_env().context("read BROADSKY_* env")?;
    init_log(conf.json_logs());
    // rustls needs a process wide provider before the first wss dial
    let _ = rustls::crypto::ring::default_provider().install_default();

    match cli.command {
        BroadskyCommands::Bridge {
            input,
            protocol: BridgeProtocol::Zenoh(args),
        } => {
            let target = args.to_target(&input)?;
            let z_conf = BroadskyZenohConfig::init_from_env()
                .context("read BROADSKY_ZENOH_* env")?;
            banner();
            let report =
                start_bridge(target, input.metrics_listen(), conf, z_conf)
                    .await?;
            match report.end {
                SessionEnd::Cancelled => info!(
                    dispatched = report.dispatched,
                    dropped = report.dropped,
                    "bridge cancelled"
                ),
                SessionEnd::StreamEnded(reason) => info!(
                    dispatched = report.dispatched,
                    dropped = report.dropped,
                    reason = reason.as_deref().unwrap_or("end of stream"),
                    "upstream closed"
                ),
            }
        }
    }
    Ok(())
}

fn init_log(json: bool) {
    use tracing::level_filters::LevelFilter;
    use tracing_subscriber::{
        EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt,
    };
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let fmt_layer = if json {
        fmt_layer.json().boxed()
    } else {
        fmt_layer.boxed()
    };
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("BROADSKY_LOG")
                .from_env_lossy(),
        )
        .init();
}

const BANNER: &str = concat!(
    "\n",
    " _ )  _ \\   _ \\     \\    _ \\    __|  |  / \\ \\  / \n",
    " _ \\    /  (   |   _ \\   |  | \\__ \\  . <   \\  / \n",
    "___/ _|_\\ \\___/  _/  _\\ ___/  ____/ _|\\_\\   _|  \n",
);

fn banner() {
    eprintln!("{BANNER}");
}
