//! chainmirror CLI — mirror an Ethereum chain into Postgres and serve it over
//! JSON-RPC.
//!
//! ```bash
//! chainmirror --config mirror.yaml run
//! chainmirror index --source-url http://localhost:8545 --stop-after 1000
//! chainmirror serve --listen 0.0.0.0:8546
//! chainmirror watch
//! chainmirror info
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{info, warn};

use chainmirror_core::{MirrorConfig, Store};
use chainmirror_evm::{HttpChainSource, IndexerBuilder};
use chainmirror_rpc::Dispatcher;
use chainmirror_storage::{MemoryStore, PostgresStore};

mod logging;

#[derive(Parser)]
#[command(
    name = "chainmirror",
    about = "Relational Ethereum chain mirror with a JSON-RPC read surface",
    version
)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true, env = "CHAINMIRROR_CONFIG")]
    config: Option<PathBuf>,

    /// Postgres connection string
    #[arg(long, global = true, env = "CHAINMIRROR_DATABASE_URL")]
    database_url: Option<String>,

    /// Upstream node JSON-RPC endpoint
    #[arg(long, global = true)]
    source_url: Option<String>,

    /// Address for the JSON-RPC server
    #[arg(long, global = true)]
    listen: Option<String>,

    /// Keep everything in memory instead of Postgres
    #[arg(long, global = true)]
    memory: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest blocks from the upstream node
    Index {
        /// Exit after committing this height
        #[arg(long)]
        stop_after: Option<u64>,
    },

    /// Serve the JSON-RPC API over the stored chain
    Serve,

    /// Run the indexer and the JSON-RPC server together
    Run,

    /// Print each new head as it is committed
    Watch {
        /// Fallback poll interval when a notification is missed
        #[arg(long, default_value_t = 1000)]
        poll_ms: u64,
    },

    /// Show the effective configuration and the stored head
    Info,
}

impl Cli {
    fn load_config(&self) -> Result<MirrorConfig> {
        let mut config = match &self.config {
            Some(path) => MirrorConfig::from_yaml_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => MirrorConfig::default(),
        };
        if let Some(url) = &self.database_url {
            config.database_url = url.clone();
        }
        if let Some(url) = &self.source_url {
            config.source.url = url.clone();
        }
        if let Some(listen) = &self.listen {
            config.rpc.listen = listen.clone();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    logging::init(&config.log);

    if let Commands::Info = cli.command {
        return cmd_info(&config, cli.memory).await;
    }

    let store = open_store(&config, cli.memory).await?;
    let shutdown = shutdown_on_ctrl_c();

    match cli.command {
        Commands::Index { stop_after } => cmd_index(&config, store, shutdown, stop_after).await,
        Commands::Serve => cmd_serve(&config, store, shutdown).await,
        Commands::Run => {
            tokio::try_join!(
                cmd_index(&config, store.clone(), shutdown.clone(), None),
                cmd_serve(&config, store, shutdown),
            )?;
            Ok(())
        }
        Commands::Watch { poll_ms } => {
            cmd_watch(store, Duration::from_millis(poll_ms), shutdown).await
        }
        Commands::Info => Ok(()),
    }
}

async fn open_store(config: &MirrorConfig, memory: bool) -> Result<Arc<dyn Store>> {
    if memory {
        info!("using in-memory store");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = PostgresStore::connect_with_options(&config.database_url, &config.store)
        .await
        .context("connecting to Postgres")?;
    Ok(Arc::new(store))
}

/// A signal that flips to `true` on Ctrl-C.
fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown requested");
                let _ = tx.send(true);
            }
            // dropping the sender leaves the signal unset forever
            Err(e) => warn!(error = %e, "cannot listen for Ctrl-C"),
        }
    });
    rx
}

async fn signalled(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn cmd_index(
    config: &MirrorConfig,
    store: Arc<dyn Store>,
    shutdown: watch::Receiver<bool>,
    stop_after: Option<u64>,
) -> Result<()> {
    let source = HttpChainSource::new(&config.source).context("building chain source")?;
    info!(url = source.url(), "indexing from upstream");

    let mut builder = IndexerBuilder::from_config(config.indexer.clone()).shutdown(shutdown);
    if let Some(height) = stop_after {
        builder = builder.stop_after(height);
    }
    let mark = builder
        .build(source, store)
        .run()
        .await
        .context("indexer stopped on error")?;
    info!(next = mark.next_block(), "indexer exited");
    Ok(())
}

async fn cmd_serve(
    config: &MirrorConfig,
    store: Arc<dyn Store>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = TcpListener::bind(&config.rpc.listen)
        .await
        .with_context(|| format!("binding {}", config.rpc.listen))?;
    let dispatcher = Arc::new(Dispatcher::new(store, config.chain_id, config.rpc.max_logs));
    let sweeper = config.rpc.filter_ttl().map(|ttl| {
        info!(ttl_secs = ttl.as_secs(), "expiring idle filters");
        tokio::spawn(dispatcher.filters().clone().run_expiry(ttl, sweep_interval(ttl)))
    });
    let served = chainmirror_rpc::serve(listener, dispatcher, signalled(shutdown)).await;
    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    served.context("JSON-RPC server")?;
    Ok(())
}

/// Sweep a few times per TTL, at most once a minute.
fn sweep_interval(ttl: Duration) -> Duration {
    (ttl / 4).clamp(Duration::from_secs(1), Duration::from_secs(60))
}

async fn cmd_watch(
    store: Arc<dyn Store>,
    poll: Duration,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut heads = store.subscribe_blocks();
    let mut printed = None;
    loop {
        let head = store.latest_block_number().await.context("reading head")?;
        if head > printed {
            if let Some(number) = head {
                let hash = store
                    .block_by_number(number)
                    .await
                    .context("reading head block")?
                    .map(|b| b.hash);
                match hash {
                    Some(hash) => println!("{number}\t{hash:#x}"),
                    None => println!("{number}"),
                }
            }
            printed = head;
        }

        tokio::select! {
            received = heads.recv() => {
                // notifications are a hint; polling covers anything missed
                if let Err(RecvError::Closed) = received {
                    tokio::time::sleep(poll).await;
                }
            }
            _ = tokio::time::sleep(poll) => {}
            _ = signalled(shutdown.clone()) => return Ok(()),
        }
    }
}

async fn cmd_info(config: &MirrorConfig, memory: bool) -> Result<()> {
    println!("chainmirror v{}", env!("CARGO_PKG_VERSION"));
    println!("{}", serde_yaml::to_string(config).context("rendering config")?);

    if memory {
        println!("store: memory (empty)");
        return Ok(());
    }
    let store = open_store(config, false).await?;
    match store.latest_block_number().await.context("reading head")? {
        Some(number) => println!("store: postgres, head {number}"),
        None => println!("store: postgres, empty"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::try_parse_from([
            "chainmirror",
            "--database-url",
            "postgres://db/mirror",
            "--source-url",
            "http://node:8545",
            "--listen",
            "0.0.0.0:9000",
            "serve",
        ])
        .unwrap();
        let config = cli.load_config().unwrap();
        assert_eq!(config.database_url, "postgres://db/mirror");
        assert_eq!(config.source.url, "http://node:8545");
        assert_eq!(config.rpc.listen, "0.0.0.0:9000");
        assert_eq!(config.indexer.retry_interval_ms, 100);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["chainmirror", "index", "--memory", "--stop-after", "10"]).unwrap();
        assert!(cli.memory);
        assert!(matches!(cli.command, Commands::Index { stop_after: Some(10) }));
    }

    #[test]
    fn sweep_interval_is_bounded() {
        assert_eq!(sweep_interval(Duration::from_secs(2)), Duration::from_secs(1));
        assert_eq!(sweep_interval(Duration::from_secs(120)), Duration::from_secs(30));
        assert_eq!(sweep_interval(Duration::from_secs(3600)), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn signal_fires_once_set() {
        let (tx, rx) = watch::channel(false);
        let wait = tokio::spawn(signalled(rx));
        tx.send(true).unwrap();
        wait.await.unwrap();
    }
}
