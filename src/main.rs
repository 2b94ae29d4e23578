//! otpd — Object Transport Protocol server: message director, state
//! server, client agent, and database server for a distributed-object
//! game cluster (spec.md §1-§2).

mod client;
mod config;
mod db;
mod dbss;
mod error;
mod eventlog;
mod http;
mod md;
mod metrics;
mod ss;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use otp_proto::dclass::StaticDcLoader;
use otp_proto::dna::StaticDnaLoader;
use otp_proto::token::DislPlainTextTokenParser;
use tracing::{error, info};

use crate::client::ClientAgent;
use crate::config::Config;
use crate::db::Database;
use crate::dbss::DatabaseServer;
use crate::eventlog::UdpEventLogger;
use crate::md::MessageDirector;
use crate::ss::StateServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = config::resolve_config_path();
    let config = Config::load(&config_path).map_err(|e| {
        eprintln!("ERROR: failed to load config from {config_path}: {e}");
        e
    })?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match config.server.log_format {
        crate::config::LogFormat::Json => {
            tracing_subscriber::fmt().with_env_filter(env_filter).with_target(true).json().init();
        }
        crate::config::LogFormat::Pretty => {
            tracing_subscriber::fmt().with_env_filter(env_filter).with_target(true).init();
        }
    }

    if let Err(errors) = crate::config::validate(&config) {
        for err in &errors {
            error!(error = %err, "configuration validation failed");
        }
        return Err(anyhow::anyhow!(
            "configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    info!(
        language = %config.server.language,
        backend = %config.database.backend,
        "starting otpd"
    );

    let backend = db::open_backend(&config.database).await?;
    let database = Arc::new(Database::new(backend));

    let dc_loader: Arc<dyn otp_proto::dclass::DcLoader> = Arc::new(StaticDcLoader::new());
    let dna_loader: Arc<dyn otp_proto::dna::DnaLoader> = Arc::new(StaticDnaLoader::new());
    let token_parser: Arc<dyn otp_proto::token::TokenParser> = Arc::new(DislPlainTextTokenParser::new());

    let state_server = Arc::new(StateServer::new(dc_loader.clone(), database.clone()));
    let database_server = Arc::new(DatabaseServer::new(
        dc_loader.clone(),
        database.clone(),
        state_server.clone(),
    ));

    let eventlog = if config.server.eventlog_port == 0 {
        info!("event log disabled");
        None
    } else {
        let dest = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), config.server.eventlog_port);
        match UdpEventLogger::connect(dest, 1).await {
            Ok(logger) => {
                info!(%dest, "event log writer connected");
                Some(Arc::new(logger))
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to bind event log socket, continuing without it");
                None
            }
        }
    };

    let client_agent = Arc::new(ClientAgent::new(
        dc_loader.clone(),
        dna_loader,
        token_parser,
        database.clone(),
        state_server.clone(),
        database_server.clone(),
        eventlog,
    ));
    state_server.set_ca_notify(client_agent.clone());

    let bus = Arc::new(MessageDirector::new());
    bus.register_local(state_server.clone());
    bus.register_local(database_server.clone());
    database_server.set_bus(bus.clone());

    let metrics_port = config.server.metrics_port;
    if metrics_port == 0 {
        info!("metrics disabled");
    } else {
        metrics::init();
        tokio::spawn(async move {
            http::run_http_server(metrics_port).await;
        });
        info!(port = metrics_port, "prometheus http server started");
    }

    let md_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.server.md_port);
    let ca_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.server.ca_port);

    let md_task = tokio::spawn(md::run_md_listener(md_addr, bus.clone()));
    let ca_task = tokio::spawn(client::run_ca_listener(ca_addr, client_agent.clone()));

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        res = md_task => {
            if let Ok(Err(e)) = res {
                error!(error = %e, "Message Director listener exited");
            }
        }
        res = ca_task => {
            if let Ok(Err(e)) = res {
                error!(error = %e, "Client Agent listener exited");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, shutting down");
        }
        _ = sigterm.recv() => {
            info!("received SIGTERM, shutting down");
        }
    }

    Ok(())
}
