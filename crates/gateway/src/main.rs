use marketfeed_gateway::{ExchangeId, build_registry, load_config, load_default_config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn print_help() {
    eprintln!(
        r#"marketfeed - normalized market data from several crypto exchanges

USAGE:
    marketfeed [CONFIG]

ARGS:
    CONFIG              Gateway config JSON (default: embedded config)

ENVIRONMENT VARIABLES:
    RUST_LOG            Log level filter
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "marketfeed=info,marketfeed_gateway=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match std::env::args().nth(1).as_deref() {
        Some("--help" | "-h") => {
            print_help();
            return Ok(());
        }
        Some(path) => {
            tracing::info!(%path, "Loading configuration");
            load_config(path)?
        }
        None => {
            tracing::info!("Using embedded configuration");
            load_default_config()?
        }
    };
    config.validate()?;

    let registry = build_registry(&config);
    tracing::info!(exchanges = ?registry.exchanges(), "Registry ready");

    for exchange in config.enabled_exchanges() {
        let Some(adapter) = registry.get(&ExchangeId::new(&exchange.id)) else {
            continue;
        };
        for symbol in &exchange.symbols {
            let id = adapter.id();
            let mut trades = adapter.subscribe_trades(symbol);
            let pair = symbol.clone();
            tokio::spawn(async move {
                while let Some(trade) = trades.recv().await {
                    tracing::info!(
                        exchange = %id,
                        symbol = %pair,
                        price = %trade.price,
                        volume = %trade.volume,
                        side = ?trade.trade_type,
                        "Trade"
                    );
                }
            });

            let id = adapter.id();
            let mut ticker = adapter.subscribe_ticker(symbol);
            let pair = symbol.clone();
            tokio::spawn(async move {
                while let Some(update) = ticker.recv().await {
                    tracing::info!(
                        exchange = %id,
                        symbol = %pair,
                        last = %update.snapshot.last_price,
                        change_percent = %update.snapshot.daily_change_percent,
                        direction = ?update.direction,
                        "Ticker"
                    );
                }
            });
        }
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    registry.shutdown_all();
    Ok(())
}
