//! The `stint` binary: serve the API, or run one reconcile sweep.

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::{Context, bail},
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    stint_config::StintConfig,
    stint_gateway::{AppState, build_router},
    stint_identity::{DirectoryClient, IdentityGateway, MemoryDirectory},
    stint_notify::{CallbackSink, NullSink, WebhookSender},
    stint_service::RequestService,
    stint_signing::{KeySet, Signer, Verifier},
    stint_store::Store,
    stint_workflow::{Orchestrator, Reconciler},
};

#[derive(Parser)]
#[command(name = "stint", about = "Stint — just-in-time cloud access controller")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to stint.toml (defaults to discovery in CWD and ~/.config/stint/).
    #[arg(long, global = true, env = "STINT_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,

    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the controller (default when no subcommand is given).
    Serve,
    /// Run exactly one reconciler sweep and exit. For deployments
    /// that drive reconciliation from an external scheduler.
    Reconcile,
    /// Database management.
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
}

#[derive(Subcommand)]
enum DbAction {
    /// Create the database and schema, then exit.
    Init,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_thread_ids(false))
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<StintConfig> {
    match cli.config {
        Some(ref path) => {
            stint_config::load_config(path).with_context(|| format!("loading {}", path.display()))
        },
        None => Ok(stint_config::discover_and_load()),
    }
}

/// Everything the subcommands share.
struct Runtime {
    store: Store,
    identity: IdentityGateway,
    callbacks: Arc<dyn CallbackSink>,
    verifier: Arc<Verifier>,
}

async fn build_runtime(config: &StintConfig) -> anyhow::Result<Runtime> {
    let store = Store::connect(&config.database.url)
        .await
        .with_context(|| format!("opening database {}", config.database.url))?;

    let spec = config.signing.resolve_spec()?;
    let keys = Arc::new(KeySet::from_spec(
        &spec,
        config.signing.active_key_id.as_deref(),
    )?);
    info!(keys = keys.len(), active = keys.active().0, "signing keys loaded");

    let identity = match config.identity.provider.as_str() {
        "memory" => {
            let directory = MemoryDirectory::new();
            for user in &config.identity.users {
                directory.add_user(&user.user_id, &user.user_name, &user.email);
            }
            info!(users = config.identity.users.len(), "using in-memory identity provider");
            IdentityGateway::new(Arc::new(directory) as Arc<dyn DirectoryClient>)
        },
        other => bail!("unknown identity provider {other:?} (only \"memory\" ships in-tree)"),
    };

    let callbacks: Arc<dyn CallbackSink> = match config.webhook.url {
        Some(ref url) => {
            info!(url = %url, "webhook callbacks enabled");
            Arc::new(WebhookSender::new(url, Signer::new(Arc::clone(&keys)))?)
        },
        None => {
            info!("no webhook configured, callbacks are dropped");
            Arc::new(NullSink)
        },
    };

    let verifier = Arc::new(Verifier::new(keys, Arc::new(store.clone())));

    Ok(Runtime {
        store,
        identity,
        callbacks,
        verifier,
    })
}

async fn serve(cli: &Cli, config: StintConfig) -> anyhow::Result<()> {
    let runtime = build_runtime(&config).await?;

    let orchestrator = Arc::new(Orchestrator::new(
        runtime.store.clone(),
        runtime.identity.clone(),
        Arc::clone(&runtime.callbacks),
    ));
    orchestrator.resume_active().await?;

    let reconciler = Arc::new(
        Reconciler::new(
            runtime.store.clone(),
            runtime.identity.clone(),
            Arc::clone(&runtime.callbacks),
        )
        .with_interval(Duration::from_secs(config.reconciler.interval_minutes * 60)),
    );
    let reconciler_task = Arc::clone(&reconciler).spawn();

    let service = Arc::new(RequestService::new(
        runtime.store.clone(),
        runtime.identity.clone(),
        Arc::clone(&runtime.callbacks),
        orchestrator,
    ));

    let app = build_router(AppState::new(service, runtime.verifier));

    let bind = cli.bind.clone().unwrap_or(config.server.bind);
    let port = cli.port.unwrap_or(config.server.port);
    let listener = tokio::net::TcpListener::bind((bind.as_str(), port))
        .await
        .with_context(|| format!("binding {bind}:{port}"))?;
    info!(addr = %listener.local_addr()?, "stint listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;

    reconciler_task.abort();
    Ok(())
}

async fn reconcile_once(config: StintConfig) -> anyhow::Result<()> {
    let runtime = build_runtime(&config).await?;
    let reconciler = Reconciler::new(runtime.store, runtime.identity, runtime.callbacks);
    let summary = reconciler.run_once().await?;
    info!(?summary, "reconcile finished");
    println!(
        "swept {} overdue grants: {} expired, {} already handled, {} errored",
        summary.swept, summary.expired, summary.already_handled, summary.errored
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut cli = Cli::parse();
    init_telemetry(&cli);
    let config = load_config(&cli)?;
    let command = cli.command.take();

    match command {
        None | Some(Commands::Serve) => serve(&cli, config).await,
        Some(Commands::Reconcile) => reconcile_once(config).await,
        Some(Commands::Db { action: DbAction::Init }) => {
            Store::connect(&config.database.url).await?;
            println!("database ready at {}", config.database.url);
            Ok(())
        },
    }
}
