use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use cart_core::{
    config::DEFAULT_SETTINGS_FILE, load_settings_from, CartSyncService, HttpCartGateway,
    ManualConnectivity, MutationOutcome, StaticAuth,
};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use shared::domain::{CartItem, CartState, ItemId, ItemMetadata, ProductDetails, UnitPrice};
use storage::Storage;
use tracing::info;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://cart.db")]
    database_url: String,
    #[arg(long, default_value = "http://127.0.0.1:8080/api")]
    server_url: String,
    /// Bearer token. Falls back to CART_SYNC_TOKEN.
    #[arg(long)]
    token: Option<String>,
    /// Work against the local snapshot and queue mutations for later.
    #[arg(long)]
    offline: bool,
    #[arg(long, default_value = DEFAULT_SETTINGS_FILE)]
    config: PathBuf,
    /// Total bytes the local store may hold.
    #[arg(long)]
    quota_bytes: Option<usize>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Show,
    Add {
        item_id: String,
        #[arg(long)]
        price: Decimal,
        #[arg(long)]
        original_price: Option<Decimal>,
        #[arg(long, default_value = "")]
        name: String,
    },
    Update {
        item_id: String,
        #[arg(allow_hyphen_values = true)]
        quantity: i64,
    },
    Remove {
        item_id: String,
    },
    Select {
        item_id: String,
    },
    SelectAll {
        #[arg(long)]
        off: bool,
    },
    Clear,
    Coupon {
        code: String,
    },
    RemoveCoupon,
    /// Replay queued mutations against the backend.
    Sync,
    /// List queued mutations.
    Queue,
    /// Print the persisted snapshot without contacting the backend.
    Snapshot,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string()))
        .init();
    let cli = Cli::parse();

    let settings = load_settings_from(&cli.config, std::env::vars());
    let store = Storage::with_quota(&cli.database_url, cli.quota_bytes)
        .await
        .with_context(|| format!("failed to open {}", cli.database_url))?;
    let token = cli
        .token
        .clone()
        .or_else(|| std::env::var("CART_SYNC_TOKEN").ok());
    let auth = match token {
        Some(token) => StaticAuth::new(token),
        None => StaticAuth::anonymous(),
    };
    let gateway = HttpCartGateway::new(&cli.server_url, Arc::new(auth.clone()))
        .with_context(|| format!("invalid server url {}", cli.server_url))?;
    let service = CartSyncService::new_with_dependencies(
        Arc::new(gateway),
        Arc::new(auth),
        Arc::new(store),
        &settings,
    );
    service.start(ManualConnectivity::new(!cli.offline)).await;

    let result = run(&service, cli.command).await;
    let saved = service.flush().await;
    info!("cartctl: final snapshot {saved:?}");
    service.shutdown();
    result
}

async fn run(service: &CartSyncService, command: Command) -> Result<()> {
    match command {
        Command::Queue => {
            let pending = service.queue().snapshot().await;
            if pending.is_empty() {
                println!("no queued mutations");
            }
            for entry in pending {
                println!(
                    "{} {} attempts={} {}",
                    entry.enqueued_at.to_rfc3339(),
                    entry.mutation.op_type(),
                    entry.attempts,
                    serde_json::to_string(&entry.mutation)?
                );
            }
            return Ok(());
        }
        Command::Snapshot => {
            let items = service.persistence().load().await;
            println!("{} items in snapshot", items.len());
            for item in items {
                println!("{} x{} updated={}", item.id, item.quantity, item.updated_at);
            }
            return Ok(());
        }
        _ => {}
    }

    report("load", service.load().await);
    let outcome = match command {
        Command::Show | Command::Queue | Command::Snapshot => None,
        Command::Add {
            item_id,
            price,
            original_price,
            name,
        } => {
            let unit_price = UnitPrice {
                original: original_price.unwrap_or(price),
                discounted: price,
            };
            let metadata = ItemMetadata::Product(ProductDetails {
                name,
                ..ProductDetails::default()
            });
            Some(service.add(CartItem::new(item_id, unit_price, metadata)).await)
        }
        Command::Update { item_id, quantity } => Some(
            service
                .update_quantity(&ItemId::new(item_id), quantity)
                .await,
        ),
        Command::Remove { item_id } => Some(service.remove(&ItemId::new(item_id)).await),
        Command::Select { item_id } => Some(service.toggle_select(&ItemId::new(item_id))),
        Command::SelectAll { off } => Some(service.select_all(!off)),
        Command::Clear => Some(service.clear().await),
        Command::Coupon { code } => Some(service.apply_coupon(&code).await),
        Command::RemoveCoupon => Some(service.remove_coupon().await),
        Command::Sync => {
            let drained = service.sync_pending().await;
            println!(
                "sync: succeeded={} failed={} dropped={} deferred={}",
                drained.succeeded, drained.failed, drained.dropped, drained.deferred
            );
            None
        }
    };

    print_state(&service.state());
    match outcome {
        Some(MutationOutcome::Rejected(err)) => bail!("rejected: {err}"),
        Some(outcome) => {
            report("mutation", outcome);
            Ok(())
        }
        None => Ok(()),
    }
}

fn report(label: &str, outcome: MutationOutcome) {
    match outcome {
        MutationOutcome::Degraded(err) => eprintln!("{label}: degraded: {err}"),
        other => info!("cartctl: {label} {other:?}"),
    }
}

fn print_state(state: &CartState) {
    for item in &state.items {
        println!(
            "[{}] {} x{} @ {} = {}",
            if item.selected { "x" } else { " " },
            item.id,
            item.quantity,
            item.unit_price.discounted,
            item.line_total()
        );
    }
    println!(
        "total_items={} total_price={} online={} pending={}",
        state.total_items, state.total_price, state.is_online, state.pending_sync_count
    );
    if let Some(coupon) = &state.coupon_code {
        println!("coupon={coupon}");
    }
    if let Some(err) = &state.error {
        eprintln!("error: {err}");
    }
}
