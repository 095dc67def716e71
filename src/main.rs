use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gateway::cli::{self, ChannelCommands, MappingCommands};
use gateway::config::{self, Config};
use gateway::models::channel::{NewChannel, NewMapping};
use gateway::store::sqlite::SqliteStore;
use gateway::store::ChannelStore;
use gateway::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load()?;
    init_tracing(&cfg)?;

    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::Channel { command }) => {
            let store = open_store(&cfg).await?;
            handle_channel_command(&store, command).await
        }
        Some(cli::Commands::Mapping { command }) => {
            let store = open_store(&cfg).await?;
            handle_mapping_command(&store, command).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

/// Console logging, plus an OTLP exporter when OTEL_EXPORTER_OTLP_ENDPOINT is set.
fn init_tracing(cfg: &Config) -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "claude-gateway"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let default_filter = if cfg.debug {
        "gateway=debug,claude_gateway=debug,tower_http=debug"
    } else {
        "gateway=info,claude_gateway=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();
    Ok(())
}

async fn open_store(cfg: &Config) -> anyhow::Result<SqliteStore> {
    std::fs::create_dir_all(&cfg.data_dir)
        .with_context(|| format!("failed to create data directory {}", cfg.data_dir))?;
    let store = SqliteStore::connect(&cfg.database_url).await?;
    store.migrate().await?;
    Ok(store)
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    tracing::info!("Opening database...");
    let store = Arc::new(open_store(&cfg).await?);

    if cfg.api_key().is_none() {
        tracing::warn!("API_KEY is not set, the gateway accepts unauthenticated callers");
    }

    let state = Arc::new(AppState::new(cfg, store.clone(), store)?);
    let app = gateway::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Claude gateway listening on {}", addr);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}

async fn handle_channel_command(store: &SqliteStore, cmd: ChannelCommands) -> anyhow::Result<()> {
    match cmd {
        ChannelCommands::Add {
            name,
            base_url,
            api_key,
            provider,
            priority,
            timeout,
            inactive,
        } => {
            let id = store
                .insert_channel(&NewChannel {
                    name: name.clone(),
                    base_url: base_url.clone(),
                    api_key,
                    provider: provider.clone(),
                    is_active: !inactive,
                    priority,
                    timeout,
                })
                .await?;
            println!(
                "Channel created:\n  ID:       {}\n  Name:     {}\n  Provider: {}\n  URL:      {}\n  Priority: {}",
                id, name, provider, base_url, priority
            );
        }
        ChannelCommands::List { active } => {
            let channels = if active {
                store.list_active_channels().await?
            } else {
                store.list_channels().await?
            };
            if channels.is_empty() {
                println!("No channels found.");
                return Ok(());
            }
            println!(
                "{:<6} {:<20} {:<10} {:<8} {:<8} URL",
                "ID", "NAME", "PROVIDER", "PRIO", "ACTIVE"
            );
            for c in channels {
                println!(
                    "{:<6} {:<20} {:<10} {:<8} {:<8} {}",
                    c.id, c.name, c.provider, c.priority, c.is_active, c.base_url
                );
            }
        }
    }
    Ok(())
}

async fn handle_mapping_command(store: &SqliteStore, cmd: MappingCommands) -> anyhow::Result<()> {
    match cmd {
        MappingCommands::Add {
            channel_id,
            upstream_model,
            display_model,
            disabled,
        } => {
            let channel = store
                .get_channel(channel_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Channel not found: {}", channel_id))?;
            let id = store
                .insert_mapping(&NewMapping {
                    channel_id,
                    upstream_model: upstream_model.clone(),
                    display_model: display_model.clone(),
                    is_enabled: !disabled,
                })
                .await?;
            println!(
                "Mapping created:\n  ID:      {}\n  Display: {}\n  Channel: {} ({})\n  Model:   {}",
                id, display_model, channel.name, channel.id, upstream_model
            );
        }
        MappingCommands::List => {
            let mappings = store.list_mappings().await?;
            if mappings.is_empty() {
                println!("No mappings found.");
                return Ok(());
            }
            println!(
                "{:<6} {:<32} {:<8} {:<8} UPSTREAM",
                "ID", "DISPLAY", "CHANNEL", "ENABLED"
            );
            for m in mappings {
                println!(
                    "{:<6} {:<32} {:<8} {:<8} {}",
                    m.id, m.display_model, m.channel_id, m.is_enabled, m.upstream_model
                );
            }
        }
    }
    Ok(())
}
