//! Command line runner: connects the driver to a port agent (or the built-in
//! simulator), brings the sensor to its console and optionally streams
//! autosample particles to stdout as JSON.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use par_driver::publish::Publication;
use par_driver::transport::{Connector, SimulatedPar, TcpConnector};
use par_driver::{ChannelPublisher, DriverBuilder, DriverConfig, ProtocolEvent};
use serde_json::json;
use tracing_subscriber::{fmt, EnvFilter};

struct Args {
    addr: String,
    port: u16,
    simulate: bool,
    config: Option<String>,
    autosample: Option<u64>,
}

fn usage() -> &'static str {
    "usage: par-driver [--simulate | --addr HOST --port PORT] [--config FILE] [--autosample SECONDS]"
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args { addr: "localhost".to_string(), port: 4001, simulate: false, config: None, autosample: None };
    let mut iter = std::env::args().skip(1);
    while let Some(flag) = iter.next() {
        match flag.as_str() {
            "--simulate" => args.simulate = true,
            "--addr" => args.addr = iter.next().context("--addr needs a value")?,
            "--port" => args.port = iter.next().context("--port needs a value")?.parse().context("invalid --port")?,
            "--config" => args.config = Some(iter.next().context("--config needs a value")?),
            "--autosample" => {
                args.autosample = Some(iter.next().context("--autosample needs a value")?.parse().context("invalid --autosample")?)
            }
            "-h" | "--help" => {
                println!("{}", usage());
                std::process::exit(0);
            }
            other => bail!("unexpected argument {}\n{}", other, usage()),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();

    let args = parse_args()?;
    let config = match &args.config {
        Some(path) => DriverConfig::from_file(path).with_context(|| format!("loading {}", path))?,
        None => DriverConfig::default(),
    };
    config.validate()?;

    let connector: Arc<dyn Connector> = if args.simulate {
        Arc::new(SimulatedPar::default())
    } else {
        Arc::new(TcpConnector::new(config.max_line_length))
    };
    let (publisher, mut publications) = ChannelPublisher::new(config.publish_queue_capacity);

    let printer = tokio::spawn(async move {
        while let Some(publication) = publications.recv().await {
            if matches!(publication, Publication::Raw(_)) {
                continue;
            }
            match publication.to_json() {
                Ok(text) => println!("{}", text),
                Err(e) => log::warn!("Could not encode publication: {}", e),
            }
        }
    });

    let driver = DriverBuilder::new(connector, Arc::new(publisher)).with_config(config).build();
    driver.configure(json!({"addr": args.addr, "port": args.port})).await?;
    driver.connect().await?;
    driver.discover_state().await?;
    log::info!("Parameters: {}", serde_json::Value::Object(driver.get_config().await?));

    if let Some(seconds) = args.autosample {
        driver.execute_resource(ProtocolEvent::StartAutosample).await?;
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
            _ = tokio::signal::ctrl_c() => log::info!("Interrupted"),
        }
        driver.execute_resource(ProtocolEvent::StopAutosample).await?;
    }

    driver.disconnect().await?;
    driver.shutdown().await;
    drop(driver);
    let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;
    Ok(())
}
