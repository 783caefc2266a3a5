//! Wallet platform process
//!
//! Wires the account service, the ledger coordinator and the bus between
//! them, then serves the account API and the ledger API on separate
//! listeners until Ctrl+C or SIGTERM.

use std::str::FromStr;
use std::sync::Arc;

use account_service::{
    AccountRepository, AccountService, AccountServiceConfig, AccountStore, BalanceResponder,
    InMemoryAccountRepository, NewAccount, PostgresAccountRepository,
};
use api_gateway::{account_router, ledger_router, with_http_layers, AccountState, GatewayConfig, LedgerState};
use clap::{Args, Parser, Subcommand};
use common::bus::MessageBus;
use common::db::{init_db_pool, run_migrations};
use common::decimal::dec;
use common::InMemoryBus;
use dotenv::dotenv;
use ledger_service::{
    DeliveryMode, InMemoryLedgerRepository, LedgerCoordinator, LedgerRepository, LedgerServiceConfig,
    PostgresLedgerRepository,
};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter, FmtSubscriber};

/// Command line interface
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start both services and their HTTP APIs
    Start(StartArgs),
}

#[derive(Args, Debug)]
struct StartArgs {
    /// Postgres connection string (defaults to DATABASE_URL)
    #[clap(long, conflicts_with = "in_memory")]
    database_url: Option<String>,

    /// Keep all state in memory
    #[clap(long)]
    in_memory: bool,

    /// Database connection pool size (defaults to DB_POOL_SIZE)
    #[clap(long)]
    pool_size: Option<u32>,

    /// Listening address of the account API (defaults to ACCOUNT_ADDR)
    #[clap(long)]
    account_addr: Option<String>,

    /// Listening address of the ledger API (defaults to LEDGER_ADDR)
    #[clap(long)]
    ledger_addr: Option<String>,

    /// Commit ledger rows first and deliver balance deltas through the outbox
    #[clap(long)]
    outbox: bool,

    /// Log level (trace, debug, info, warn, error)
    #[clap(long)]
    log_level: Option<String>,

    /// Seed two demo accounts
    #[clap(short, long)]
    demo: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv().ok();

    let Command::Start(args) = Cli::parse().command;

    // DEBUG=1 switches the default to debug; --log-level wins over both
    let env_debug = std::env::var("DEBUG").unwrap_or_else(|_| "0".to_string());
    let log_level = match &args.log_level {
        Some(level) => Level::from_str(level)?,
        None if env_debug == "1" => Level::DEBUG,
        None => Level::INFO,
    };

    let env_filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .parse("tower_http=debug,api_gateway=debug,account_service=debug,ledger_service=debug")?;

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_ok() {
        info!("Tracing initialized");
        debug!("Log level {}", log_level);
    }

    info!("Starting wallet platform...");

    let mut account_config = AccountServiceConfig::from_env();
    let mut ledger_config = LedgerServiceConfig::from_env();
    let mut gateway_config = GatewayConfig::from_env();

    if let Some(url) = args.database_url {
        account_config.database_url = url.clone();
        ledger_config.database_url = url;
    }
    if let Some(size) = args.pool_size {
        account_config.db_pool_size = size;
        ledger_config.db_pool_size = size;
    }
    if let Some(addr) = args.account_addr {
        gateway_config.account_addr = addr;
    }
    if let Some(addr) = args.ledger_addr {
        gateway_config.ledger_addr = addr;
    }
    if args.outbox {
        ledger_config.coordinator.delivery = DeliveryMode::Outbox;
    }

    // Repositories
    let (account_repo, ledger_repo): (Arc<dyn AccountRepository>, Arc<dyn LedgerRepository>) = if args.in_memory {
        info!("Using in-memory repositories");
        (
            Arc::new(InMemoryAccountRepository::new()),
            Arc::new(InMemoryLedgerRepository::new()),
        )
    } else {
        info!("Connecting to database");
        let pool = init_db_pool(&account_config.database_url, account_config.db_pool_size).await?;
        run_migrations(&pool).await?;
        (
            Arc::new(PostgresAccountRepository::from_pool(pool.clone())),
            Arc::new(PostgresLedgerRepository::from_pool(pool)),
        )
    };

    let account_service = Arc::new(AccountService::with_store(AccountStore::with_config(
        account_repo,
        &account_config,
    )));

    // Bus between the two services
    let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::new());
    let responder = Arc::new(BalanceResponder::new(account_service.clone()));
    let responder_handles = responder.spawn(bus.clone()).await?;

    let delivery = ledger_config.coordinator.delivery;
    let coordinator = Arc::new(LedgerCoordinator::new(ledger_repo, bus, ledger_config.coordinator.clone()));
    info!("Ledger coordinator ready ({:?} delivery)", delivery);

    if args.demo {
        info!("Creating demo data...");
        create_demo_data(&account_service).await?;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker_handle = if delivery == DeliveryMode::Outbox {
        let worker = coordinator.outbox_worker(&ledger_config.outbox);
        Some(tokio::spawn(worker.run(shutdown_rx.clone())))
    } else {
        None
    };

    let account_app = with_http_layers(account_router(Arc::new(AccountState { account_service })), log_level);
    let ledger_app = with_http_layers(ledger_router(Arc::new(LedgerState { coordinator })), log_level);

    let account_listener = TcpListener::bind(&gateway_config.account_addr).await?;
    info!("Account API listening on {}", gateway_config.account_addr);
    let ledger_listener = TcpListener::bind(&gateway_config.ledger_addr).await?;
    info!("Ledger API listening on {}", gateway_config.ledger_addr);

    let account_server = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move {
            axum::serve(account_listener, account_app)
                .with_graceful_shutdown(wait_for_shutdown(shutdown))
                .await
        }
    });
    let ledger_server = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move {
            axum::serve(ledger_listener, ledger_app)
                .with_graceful_shutdown(wait_for_shutdown(shutdown))
                .await
        }
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    account_server.await??;
    ledger_server.await??;
    if let Some(handle) = worker_handle {
        if let Err(e) = handle.await {
            warn!("Outbox worker ended abnormally: {}", e);
        }
    }
    for handle in responder_handles {
        handle.abort();
    }

    info!("Shutting down");
    Ok(())
}

/// Create demo accounts for manual testing
async fn create_demo_data(account_service: &AccountService) -> Result<(), Box<dyn std::error::Error>> {
    let alice = account_service
        .create_account(NewAccount {
            id: None,
            email: "alice@example.com".to_string(),
            balance: dec!(100),
        })
        .await?;
    let bob = account_service
        .create_account(NewAccount {
            id: None,
            email: "bob@example.com".to_string(),
            balance: dec!(0),
        })
        .await?;

    info!("Created demo accounts: {} = {}, {} = {}", alice.email, alice.id, bob.email, bob.id);
    Ok(())
}

/// Resolve once the shutdown flag is raised
async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}
