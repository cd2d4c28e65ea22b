use std::{net::SocketAddr, path::Path, sync::Arc};

use clap::Parser;
use color_eyre::{
    eyre::{eyre, Context},
    Result,
};
use portcullis::{
    adapters,
    config::{loader::load_config, GatewayConfig, GatewayConfigValidator},
    core::{GatewayService, MiddlewareRegistry},
    ports::{http_client::HttpClient, metrics::MetricsSink},
    tracing_setup,
    utils::GracefulShutdown,
    RecorderMetricsSink, SharedTransport,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "gateway.yaml")]
    config: String,

    /// Log human-readable output instead of JSON
    #[clap(long)]
    pretty: bool,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "gateway.yaml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "gateway.yaml")]
        config: String,
    },
    /// Start the gateway server (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "gateway.yaml")]
        config: String,

        /// Log human-readable output instead of JSON
        #[clap(long)]
        pretty: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    let (command, config_path, pretty) = match args.command {
        Some(Commands::Validate { config }) => ("validate", config, false),
        Some(Commands::Init { config }) => ("init", config, false),
        Some(Commands::Serve { config, pretty }) => ("serve", config, pretty),
        None => ("serve", args.config, args.pretty),
    };

    match command {
        "validate" => return validate_config_command(&config_path).await,
        "init" => return init_config_command(&config_path).await,
        "serve" => {
            // Continue with normal server startup
        }
        _ => unreachable!(),
    }

    if pretty {
        tracing_setup::init_console_tracing()
    } else {
        tracing_setup::init_tracing()
    }
    .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;
    adapters::init_metrics();

    tracing::info!("Loading configuration from {config_path}");
    let config: GatewayConfig = load_config(&config_path)
        .await
        .with_context(|| format!("Failed to load config from {config_path}"))?;

    let registry = MiddlewareRegistry::with_builtins();
    GatewayConfigValidator::validate(&config, &registry.names())
        .map_err(|e| eyre!("Invalid configuration: {e}"))?;

    let config = Arc::new(config);
    let transport: Arc<dyn HttpClient> =
        Arc::new(SharedTransport::new().context("Failed to create outbound transport")?);
    let sink: Arc<dyn MetricsSink> = Arc::new(RecorderMetricsSink::new());

    let gateway = Arc::new(
        GatewayService::with_registry(
            Arc::clone(&config),
            &registry,
            transport,
            sink,
        )
        .context("Failed to build gateway")?,
    );

    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    let signal_handler_shutdown = Arc::clone(&graceful_shutdown);
    tokio::spawn(async move {
        if let Err(e) = signal_handler_shutdown.run_signal_handler().await {
            tracing::error!("Signal handler error: {}", e);
        }
    });

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .context("Failed to parse listen address")?;

    let app = adapters::app(gateway);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    tracing::info!(
        services = config.services.len(),
        api_keys = config.api_keys.len(),
        "Portcullis API Gateway listening on {addr}"
    );
    for service in &config.services {
        tracing::info!(
            "Configured service: {} {} -> {:?}",
            service.name,
            service.prefix,
            service.origins
        );
    }

    tokio::select! {
        result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        ) => {
            result.context("Server error")?;
        }
        shutdown_reason = graceful_shutdown.wait_for_shutdown_signal() => {
            tracing::info!("Shutdown signal received: {:?}", shutdown_reason);
            tracing::info!("Graceful shutdown completed");
        }
    }

    Ok(())
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("Error: configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    };

    let registry = MiddlewareRegistry::with_builtins();
    match GatewayConfigValidator::validate(&config, &registry.names()) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("Configuration summary:");
            println!("   • Listen Address: {}", config.listen_addr);
            println!("   • API Keys: {}", config.api_keys.len());
            println!("   • Services: {}", config.services.len());
            for service in &config.services {
                println!(
                    "     - {} {} -> {} origin(s)",
                    service.name,
                    service.prefix,
                    service.origins.len()
                );
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("Common fixes:");
            println!("   • Ensure all origin URLs start with http:// or https://");
            println!("   • Route prefixes must start with '/'");
            println!("   • Verify listen address format (e.g., '127.0.0.1:8080')");
            println!("   • Middleware names must be one of: {}", registry.names().join(", "));
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("Error: configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# Portcullis API Gateway Configuration

# The address to listen on
listen_addr: "127.0.0.1:8080"

# API keys accepted by the auth middleware (X-API-KEY header)
api_keys:
  - change-me

# Services this gateway fronts. Requests are matched by longest prefix.
services:
  - name: users
    prefix: /users
    origins:
      - "http://127.0.0.1:9001"
      - "http://127.0.0.1:9002"
    middlewares: [auth, rate_limit, circuit_breaker, metrics]
    rate_limit:
      per_second: 100
      burst: 200
    circuit_breaker:
      failure_threshold: 5
      reset_timeout: "30s"
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'portcullis serve --config {config_path}' to start the gateway");
    Ok(())
}
