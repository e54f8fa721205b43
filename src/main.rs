use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use stock_reservation::config::AppConfig;
use stock_reservation::harness::LoadHarness;
use stock_reservation::reservation::{ReservationCoordinator, SelectionStrategy};
use stock_reservation::storage::node::StoreNode;

#[derive(Parser)]
#[command(name = "stock-reservation", about = "Segmented stock reservation demo")]
struct Cli {
    /// JSON configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a store node that other processes share.
    Serve(ServeArgs),
    /// Seed stock and fire concurrent reservations at it.
    Load(LoadArgs),
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1:6390")]
    bind: SocketAddr,
    /// Require `authorization: Bearer <token>` on every request.
    #[arg(long)]
    auth_token: Option<String>,
}

#[derive(Args)]
struct LoadArgs {
    /// Store node address; omit to run against an in-process store.
    #[arg(long)]
    store: Option<String>,
    #[arg(long)]
    product: Option<String>,
    #[arg(long)]
    requests: Option<usize>,
    #[arg(long)]
    workers: Option<usize>,
    #[arg(long)]
    shards: Option<u32>,
    /// Stock spread over the shards.
    #[arg(long)]
    stock: Option<i64>,
    /// Global reserve stock.
    #[arg(long)]
    global: Option<i64>,
    #[arg(long, value_enum)]
    strategy: Option<SelectionStrategy>,
    /// Never refill depleted shards from the global reserve.
    #[arg(long)]
    no_fallback: bool,
    #[arg(long)]
    batch: Option<i64>,
    /// Maximum random delay before each attempt, in milliseconds.
    #[arg(long)]
    jitter_ms: Option<u64>,
    /// Reuse the stock already in the store instead of seeding.
    #[arg(long)]
    skip_seed: bool,
}

impl LoadArgs {
    fn apply(self, config: &mut AppConfig) -> bool {
        if let Some(store) = self.store {
            config.store.endpoint = Some(store);
        }
        if let Some(product) = self.product {
            config.inventory.product_id = product;
        }
        if let Some(requests) = self.requests {
            config.harness.requests = requests;
        }
        if let Some(workers) = self.workers {
            config.harness.workers = workers;
        }
        if let Some(shards) = self.shards {
            config.inventory.shards = shards;
        }
        if let Some(stock) = self.stock {
            config.inventory.total_stock = stock;
        }
        if let Some(global) = self.global {
            config.inventory.global_stock = global;
        }
        if let Some(strategy) = self.strategy {
            config.policy.selection = strategy;
        }
        if self.no_fallback {
            config.policy.global_fallback = false;
        }
        if let Some(batch) = self.batch {
            config.policy.batch_size = batch;
        }
        if let Some(jitter_ms) = self.jitter_ms {
            config.harness.max_jitter_ms = jitter_ms;
        }
        self.skip_seed
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve(args) => {
            let token = args.auth_token.or(config.store.auth_token.clone());
            let listener = tokio::net::TcpListener::bind(args.bind)
                .await
                .with_context(|| format!("binding {}", args.bind))?;
            tracing::info!("Press Ctrl+C to shutdown");
            StoreNode::new(token).serve(listener).await
        }
        Commands::Load(args) => {
            let skip_seed = args.apply(&mut config);
            config.validate()?;

            let layout = config.layout()?;
            let coordinator = Arc::new(ReservationCoordinator::new(
                config.open_store(),
                &config.inventory.product_id,
                layout.shard_count,
                config.policy(),
            ));
            let harness = LoadHarness::new(coordinator.clone(), config.harness_settings());

            let report = if skip_seed {
                let initial = coordinator.shards().snapshot().await?.total();
                harness.drive(initial).await?
            } else {
                harness.run(&layout).await?
            };

            println!("{}", report);
            if !report.conserved() || !report.never_negative() {
                return Err(anyhow::anyhow!("stock invariants violated"));
            }
            Ok(())
        }
    }
}
