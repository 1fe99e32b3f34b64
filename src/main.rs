use std::{
    process,
    sync::{Arc, OnceLock},
    time::Duration,
};

use petrel::{
    config::Config,
    delivery::{BrokerSink, DeliveryCore, LiveChannel},
    enrich::{Enricher, HttpIpSource},
    identity::Identity,
    lifecycle::{Reporter, Runner},
    logger::LoggerManager,
    print_error,
    spool::Spool,
};
use tracing::{debug, error, info, warn};

static CONFIG: OnceLock<Config> = OnceLock::new();

pub fn config() -> &'static Config {
    CONFIG.get_or_init(|| {
        Config::new().unwrap_or_else(|e| {
            print_error!("{}", e);
            process::exit(1);
        })
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config();
    let mut logger_manager = LoggerManager::new(cfg.logger.clone()).unwrap_or_else(|e| {
        print_error!("Failed to setup Log Manager: {}", e);
        process::exit(1);
    });
    info!("Starting petrel version {}...", env!("CARGO_PKG_VERSION"));
    logger_manager.init().unwrap_or_else(|e| {
        print_error!("Failed to init Log Manager: {}", e);
        process::exit(1);
    });
    info!("Log level: {}", cfg.logger.level);

    let identity = Identity::resolve();
    match &identity.mac_hash {
        Some(hash) => debug!("Device identity: {}", hash),
        None => warn!("No MAC address available, records will carry no device hash"),
    }

    info!("Provisioning delivery channel...");
    let channel = match petrel_broker::bootstrap(
        &cfg.agent.base_url,
        &cfg.agent.api_key,
        &cfg.agent.credential_dir,
        &cfg.channel,
    )
    .await
    {
        Ok(channel) => Some(channel),
        Err(e) => {
            error!("Channel bootstrap failed, delivery disabled: {}", e);
            None
        }
    };
    let cancel = channel.as_ref().map(|c| c.cancel_token());

    let live = channel.map(|c| LiveChannel {
        sink: Arc::new(BrokerSink::new(c.publisher)),
        topics: c.topics,
    });

    let core = Arc::new(DeliveryCore::new(
        live,
        Spool::new(&cfg.agent.spool_path),
        cfg.agent.spool_when_down,
    ));
    let enricher = Arc::new(Enricher::new(
        cfg.agent.app_id.clone(),
        identity,
        Box::new(HttpIpSource::new()),
    ));

    let reporter = Reporter::new(
        core.clone(),
        enricher.clone(),
        Duration::from_secs(cfg.agent.report_interval),
    );
    let mut runner = Runner::new(reporter);
    runner.start().await?;
    info!(
        "Metric reporter started, interval {}s",
        cfg.agent.report_interval
    );

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C — initiating graceful shutdown...");

    if let Err(e) = runner.stop().await {
        warn!("Reporter stop failed: {}", e);
    }
    if let Some(cancel) = cancel {
        cancel.cancel();
        debug!("Cancellation token triggered, channel disconnecting...");
        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    info!("Shutdown complete");
    Ok(())
}
