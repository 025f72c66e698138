use {
  crate::storage::{Balances, OnDiskBank, OnDiskStateStore},
  clap::Parser,
  fundme_ledger::{InMemoryBank, InMemoryStateStore, State},
  fundme_oracle::{MockPriceFeed, OracleConfig},
  fundme_primitives::Address,
  humantime::Duration,
  std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    sync::Arc,
  },
  tracing::info,
};

/// FundMe Local Devnode
///
/// A single instance of the funding ledger exposed over HTTP for
/// local development, CI and test scenarios. Prices are served by an
/// in-process mock aggregator that can be steered through the RPC.
#[derive(Debug, Parser)]
pub struct SystemSettings {
  /// Owner of the ledger, the only account allowed to withdraw
  #[clap(long, short, value_name = "ADDRESS")]
  owner: Address,

  /// Directory of the persistent ledger database.
  /// When omitted the ledger lives in memory only.
  #[clap(long, short, value_name = "PATH")]
  data_dir: Option<PathBuf>,

  /// TCP port for accepting HTTP RPC requests
  #[clap(long, short,
    default_value = "8080",
    value_name = "PORT")]
  rpc_port: u16,

  /// TCP port of the prometheus metrics endpoint
  #[clap(long,
    default_value = "9000",
    value_name = "PORT")]
  metrics_port: u16,

  /// IP addresses for accepting RPC connections
  #[clap(long, short,
    value_name = "ADDRESS",
    default_values_t = vec![IpAddr::V4(Ipv4Addr::UNSPECIFIED)])]
  ip: Vec<IpAddr>,

  /// Initial answer of the mock price feed
  #[clap(long,
    default_value = "200000000000",
    value_name = "ANSWER")]
  mock_answer: i128,

  /// Number of decimals of mock price feed answers
  #[clap(long,
    default_value = "8",
    value_name = "DECIMALS")]
  mock_decimals: u8,

  /// Prices older than this are rejected
  #[clap(long, value_name = "DURATION")]
  max_staleness: Option<Duration>,
}

impl SystemSettings {
  pub fn owner(&self) -> Address {
    self.owner
  }

  pub fn rpc_addrs(&self) -> Vec<SocketAddr> {
    self
      .ip
      .iter()
      .cloned()
      .map(|ip| SocketAddr::new(ip, self.rpc_port))
      .collect()
  }

  pub fn metrics_addr(&self) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.metrics_port)
  }

  pub fn price_feed(&self) -> MockPriceFeed {
    MockPriceFeed::new(self.mock_decimals, self.mock_answer)
  }

  pub fn oracle_config(&self) -> OracleConfig {
    OracleConfig {
      max_staleness: self.max_staleness.map(Into::into),
    }
  }

  /// Ledger records store and host account balances.
  ///
  /// Both are in-memory and ephemeral if no data directory is
  /// provided, otherwise they are kept in an on-disk database.
  pub fn storage(
    &self,
  ) -> anyhow::Result<(Box<dyn State + Send>, Arc<dyn Balances>)> {
    Ok(match &self.data_dir {
      Some(path) => {
        info!("opening ledger database at {}", path.display());
        let db = sled::open(path)?;
        (
          Box::new(OnDiskStateStore::new(&db)?) as Box<dyn State + Send>,
          Arc::new(OnDiskBank::new(&db)?) as Arc<dyn Balances>,
        )
      }
      None => {
        info!("no data directory given, ledger state is ephemeral");
        (
          Box::new(InMemoryStateStore::default()) as Box<dyn State + Send>,
          Arc::new(InMemoryBank::default()) as Arc<dyn Balances>,
        )
      }
    })
  }
}
