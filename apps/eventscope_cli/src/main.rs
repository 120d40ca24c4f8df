use std::sync::Arc;

use clap::{Parser, Subcommand};
use eventscope_adapters::configuration;
use eventscope_adapters::telemetry;
use eventscope_adapters::{ConsoleSurfaceProvider, HttpActionsApi, ProxyForwarder};
use eventscope_core::config::Settings;
use eventscope_core::entities::{AsOf, RequestAuth};
use eventscope_core::use_cases::{AcquisitionConfig, AcquisitionCoordinator, FetchActionsUseCase};
use eventscope_core::CredentialStore;
use tracing::{error, info};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch flowsheet actions and print them as JSON
    Actions {
        /// Point in time to query (RFC 3339 or YYYY-MM-DD); defaults to now
        #[arg(short, long)]
        date: Option<String>,
    },

    /// Sign in and capture a credential without fetching anything
    Login {
        /// Discard any captured credential and stored cookies first
        #[arg(short, long, default_value = "false")]
        force: bool,
    },

    /// Print the normalized asOf timestamp for an input
    AsOf { input: Option<String> },

    /// Serve the local forwarder for browser callers
    Proxy {
        /// Address to listen on, overrides proxy.bind
        #[arg(short, long)]
        bind: Option<String>,
    },
}

fn build_coordinator(
    settings: &Settings,
) -> anyhow::Result<Arc<AcquisitionCoordinator<ConsoleSurfaceProvider>>> {
    let provider = ConsoleSurfaceProvider::new(&settings.upstream)?;
    let config = AcquisitionConfig::from_settings(&settings.upstream)?;
    Ok(Arc::new(AcquisitionCoordinator::new(
        Arc::new(provider),
        Arc::new(CredentialStore::new()),
        config,
    )))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let settings = configuration::get_configuration()
        .map_err(|e| anyhow::anyhow!("configuration loading failed: {}", e))?;

    let _guard = telemetry::init_subscriber("eventscope", &settings.log_level);

    match &cli.command {
        Commands::AsOf { input } => {
            println!("{}", AsOf::normalize(input.as_deref()));
        }

        Commands::Actions { date } => {
            settings.validate()?;
            let coordinator = build_coordinator(&settings)?;
            let api = Arc::new(HttpActionsApi::new(&settings.upstream)?);
            let fetch = FetchActionsUseCase::new(coordinator, api);

            match fetch.execute(date.as_deref()).await {
                Ok(payload) => println!("{}", serde_json::to_string_pretty(&payload)?),
                Err(e) => {
                    error!(error = %e, "failed to fetch actions");
                    return Err(e.into());
                }
            }
        }

        Commands::Login { force } => {
            settings.validate()?;
            let coordinator = build_coordinator(&settings)?;

            coordinator.ensure_authenticated(*force).await?;

            let credential = coordinator.store().get().await;
            match RequestAuth::from_credential(&credential) {
                RequestAuth::Bearer(_) => println!("Login successful: authorization token captured"),
                RequestAuth::Cookie(_) => println!("Login successful: session cookies captured"),
                RequestAuth::Anonymous => println!("Login finished without a credential"),
            }
        }

        Commands::Proxy { bind } => {
            settings.validate()?;
            let forwarder = ProxyForwarder::new(&settings)?;
            let bind = bind.as_deref().unwrap_or(settings.proxy.bind.as_str());

            let addr = forwarder.start(bind).await?;
            println!(
                "Forwarding http://{}{} -> {}",
                addr,
                settings.proxy.route,
                forwarder.target()
            );
            println!("Press Ctrl+C to stop.");

            tokio::signal::ctrl_c().await?;
            info!("interrupt received");
            forwarder.stop().await;
        }
    }

    Ok(())
}
