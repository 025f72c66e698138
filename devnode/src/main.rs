use {
  crate::{
    rpc::{Ledger, Node},
    settings::SystemSettings,
  },
  clap::Parser,
  fundme_ledger::FundingLedger,
  fundme_oracle::{PriceOracle, PriceSource},
  metrics_exporter_prometheus::PrometheusBuilder,
  std::sync::Arc,
  tracing::{info, subscriber::set_global_default},
  tracing_subscriber::{EnvFilter, FmtSubscriber},
};

mod rpc;
mod settings;
mod storage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // configure logging, RUST_LOG overrides the default level
  set_global_default(
    FmtSubscriber::builder()
      .with_env_filter(
        EnvFilter::try_from_default_env()
          .unwrap_or_else(|_| EnvFilter::new("info")),
      )
      .finish(),
  )?;

  // gather CLI parameters
  let settings = SystemSettings::parse();
  info!("startup settings: {settings:#?}");

  PrometheusBuilder::new()
    .with_http_listener(settings.metrics_addr())
    .install()?;

  // in-memory ephemeral storage if no data directory
  // is provided by cli or persistent on-disk store otherwise.
  let (state_store, bank) = settings.storage()?;

  let feed = Arc::new(settings.price_feed());
  info!(
    "serving prices from {} (version {}) with {} decimals",
    feed.description(),
    feed.version(),
    feed.decimals()
  );

  let ledger: Ledger = FundingLedger::open(
    settings.owner(),
    PriceOracle::new(
      feed.clone() as Arc<dyn PriceSource>,
      settings.oracle_config(),
    ),
    state_store,
    bank.clone(),
  )?;
  info!("ledger owned by {} holds {}", ledger.owner(), ledger.held()?);

  let app = rpc::router(Node {
    ledger: Arc::new(ledger),
    bank,
    feed,
  });

  let mut servers = vec![];
  for addr in settings.rpc_addrs() {
    info!("listening for RPC requests on {addr}");
    servers.push(
      axum::Server::try_bind(&addr)?.serve(app.clone().into_make_service()),
    );
  }

  futures::future::try_join_all(servers).await?;
  Ok(())
}
