use anyhow::Context;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use zone_federation::config::FederationConfig;
use zone_federation::management;
use zone_federation::membership::naming;
use zone_federation::topology::roles::RoleBehavior;
use zone_federation::topology::service::TopologyService;
use zone_federation::topology::state::DeploymentStore;
use zone_federation::topology::types::Role;
use zone_federation::transport::gossip::{GossipChannel, GossipChannelFactory, GossipConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        eprintln!(
            "Usage: {} --bind <addr:port> [--seed <addr:port>] [--runtime <name>] [--zone <zone>] \
             [--role controller|domain|zone|node] [--config <file.json>] [--verbose]",
            args[0]
        );
        eprintln!("Example: {} --bind 127.0.0.1:5000 --runtime a --role controller", args[0]);
        eprintln!(
            "Example: {} --bind 127.0.0.1:5001 --seed 127.0.0.1:5000 --runtime b --zone z1 --role zone",
            args[0]
        );

        std::process::exit(1);
    }

    let mut config_path: Option<PathBuf> = None;
    let mut bind: Option<SocketAddr> = None;
    let mut seeds: Vec<SocketAddr> = vec![];
    let mut runtime = None;
    let mut zone = None;
    let mut role = None;
    let mut verbose = false;

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--config", Some(value)) => {
                config_path = Some(PathBuf::from(value));
                i += 2;
            }
            ("--bind", Some(value)) => {
                bind = Some(value.parse::<SocketAddr>().context("--bind")?);
                i += 2;
            }
            ("--seed", Some(value)) => {
                seeds.push(value.parse::<SocketAddr>().context("--seed")?);
                i += 2;
            }
            ("--runtime", Some(value)) => {
                runtime = Some(value.clone());
                i += 2;
            }
            ("--zone", Some(value)) => {
                zone = Some(value.clone());
                i += 2;
            }
            ("--role", Some(value)) => {
                role = Some(
                    Role::parse(value).with_context(|| format!("unknown role {}", value))?,
                );
                i += 2;
            }
            ("--verbose", _) => {
                verbose = true;
                i += 1;
            }
            _ => {
                i += 1;
            }
        }
    }

    tracing_subscriber::fmt()
        .with_max_level(if verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    // 1. Configuration: file first, flags on top.
    let mut config = match &config_path {
        Some(path) => FederationConfig::from_file(path)?,
        None => FederationConfig::default(),
    };
    if let Some(bind) = bind {
        config.gossip.bind = bind;
    }
    if !seeds.is_empty() {
        config.gossip.seeds = seeds;
    }
    if let Some(runtime) = runtime {
        config.runtime_name = runtime;
    }
    if zone.is_some() {
        config.zone_name = zone;
    }
    if let Some(role) = role {
        config.role = role;
    }
    config.validate()?;

    tracing::info!(
        "Starting runtime {} ({}) on {}",
        config.runtime_name,
        config.role.as_str(),
        config.gossip.bind
    );
    if !config.gossip.seeds.is_empty() {
        tracing::info!("Seed nodes: {:?}", config.gossip.seeds);
    } else {
        tracing::info!("Starting as seed node (founder)");
    }

    // 2. Transport: the domain channel plus a factory for dynamic channels.
    let gossip = GossipConfig::new(config.gossip.bind, config.gossip.seeds.clone());
    let logical_name = naming::encode(&config.identity()?)?;
    let channel = GossipChannel::new(gossip.clone(), logical_name);
    let factory = GossipChannelFactory::new(gossip);

    // 3. Role:
    let deployments = DeploymentStore::new();
    let behavior = match config.role {
        Role::Controller => RoleBehavior::controller(deployments.clone()),
        Role::Domain => RoleBehavior::domain(Some(deployments.clone())),
        Role::Zone => RoleBehavior::zone(deployments.clone(), config.synchronize),
        Role::Node => RoleBehavior::node(),
    };

    let service = TopologyService::new(config.clone(), channel, factory, behavior)?;

    service.handlers().register("echo", |invocation| async move {
        tracing::info!("Echoing {} byte(s) for {}", invocation.payload.len(), invocation.sender);
        Ok(invocation.payload)
    });

    // 4. Join:
    if let Err(e) = service.join_domain().await {
        tracing::error!("Failed to join domain {}: {}", config.domain_name, e);
        service.shutdown().await;
        std::process::exit(1);
    }

    // 5. Spawn stats reporter:
    let stats_service = service.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));

        loop {
            interval.tick().await;
            let stats = stats_service.stats();
            tracing::info!(
                "Domain stats: {} member(s), {} runtime(s) in {} zone(s), controller available: {}",
                stats.view_size,
                stats.runtimes,
                stats.zones,
                stats.controller_available
            );
            for zone in stats_service.topology() {
                tracing::info!(
                    "  - zone {} leader={} runtimes={:?}",
                    zone.name,
                    zone.leader.as_deref().unwrap_or("-"),
                    zone.runtimes
                );
            }
        }
    });

    // 6. Start HTTP server:
    let app = management::router(service.clone());
    let http_addr = config.http_addr();

    tracing::info!("HTTP server listening on {}", http_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    let shutdown_service: Arc<TopologyService> = service.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
            }
            shutdown_service.shutdown().await;
        })
        .await?;

    Ok(())
}
