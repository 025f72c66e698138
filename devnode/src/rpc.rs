use {
  crate::storage::Balances,
  axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json,
    Router,
  },
  fundme_ledger::{execute, Error, FundingLedger, Outcome, State as LedgerState},
  fundme_oracle::{MockPriceFeed, PriceSource},
  fundme_primitives::{Address, Amount, Call},
  metrics::increment_counter,
  serde::{Deserialize, Serialize},
  std::sync::Arc,
  tokio::task::{spawn_blocking, JoinError},
  tracing::{debug, error, info},
};

pub type Ledger = FundingLedger<
  Box<dyn LedgerState + Send>,
  Arc<dyn Balances>,
  Arc<dyn PriceSource>,
>;

/// Everything the RPC handlers need access to.
#[derive(Clone)]
pub struct Node {
  pub ledger: Arc<Ledger>,
  pub bank: Arc<dyn Balances>,
  pub feed: Arc<MockPriceFeed>,
}

#[derive(Debug, Deserialize)]
pub struct ValueTransfer {
  pub caller: Address,
  pub amount: Amount,
}

#[derive(Debug, Deserialize)]
pub struct FallbackTransfer {
  pub caller: Address,
  pub amount: Amount,
  #[serde(default)]
  pub data: Vec<u8>,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
  pub caller: Address,
}

#[derive(Debug, Deserialize)]
pub struct AnswerUpdate {
  pub answer: i128,
}

#[derive(Debug, Serialize)]
struct AmountResponse {
  amount: Amount,
}

#[derive(Debug, Serialize)]
struct AddressResponse {
  address: Address,
}

#[derive(Debug, Serialize)]
struct VersionResponse {
  version: u64,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
  error: String,
}

pub enum RpcError {
  Ledger(Error),
  Task(JoinError),
}

impl From<Error> for RpcError {
  fn from(value: Error) -> Self {
    Self::Ledger(value)
  }
}

impl From<JoinError> for RpcError {
  fn from(value: JoinError) -> Self {
    Self::Task(value)
  }
}

impl IntoResponse for RpcError {
  fn into_response(self) -> Response {
    let (status, error) = match self {
      Self::Ledger(e) => (status_of(&e), e.to_string()),
      Self::Task(e) => {
        error!("ledger task did not complete: {e}");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
      }
    };
    (status, Json(ErrorBody { error })).into_response()
  }
}

fn status_of(error: &Error) -> StatusCode {
  match error {
    Error::InsufficientContribution { .. } => StatusCode::UNPROCESSABLE_ENTITY,
    Error::NotOwner(_) => StatusCode::FORBIDDEN,
    Error::IndexOutOfRange { .. } => StatusCode::NOT_FOUND,
    Error::TransferFailed(_) => StatusCode::BAD_GATEWAY,
    Error::OracleUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    Error::Overflow | Error::OwnerMismatch { .. } | Error::Storage(_) => {
      StatusCode::INTERNAL_SERVER_ERROR
    }
  }
}

/// Runs a ledger operation on the blocking thread pool.
///
/// Ledger operations take the ledger lock and may flush to disk.
async fn blocking<T, F>(op: F) -> Result<T, RpcError>
where
  T: Send + 'static,
  F: FnOnce() -> Result<T, Error> + Send + 'static,
{
  Ok(spawn_blocking(op).await??)
}

fn reason(error: &Error) -> &'static str {
  match error {
    Error::InsufficientContribution { .. } => "insufficient_contribution",
    Error::NotOwner(_) => "not_owner",
    Error::TransferFailed(_) => "transfer_failed",
    Error::OracleUnavailable(_) => "oracle_unavailable",
    Error::IndexOutOfRange { .. } => "index_out_of_range",
    Error::Overflow => "overflow",
    Error::OwnerMismatch { .. } => "owner_mismatch",
    Error::Storage(_) => "storage",
  }
}

pub fn router(node: Node) -> Router {
  Router::new()
    .route("/fund", post(fund))
    .route("/receive", post(receive))
    .route("/fallback", post(fallback))
    .route("/withdraw", post(withdraw))
    .route("/contributions/:address", get(contribution_of))
    .route("/contributors/:index", get(contributor_at))
    .route("/owner", get(owner))
    .route("/held", get(held))
    .route("/price-feed/version", get(price_feed_version))
    .route("/bank/:address", get(bank_balance))
    .route("/mock/answer", post(update_answer))
    .with_state(node)
}

/// All value carrying requests end up here.
async fn dispatch(
  node: Node,
  caller: Address,
  call: Call,
) -> Result<Json<Outcome>, RpcError> {
  debug!("{caller} called {call:?} attaching {}", call.value());
  match blocking(move || execute(&node.ledger, caller, call)).await {
    Ok(outcome) => {
      match outcome {
        Outcome::Contributed { .. } => {
          increment_counter!("fundme_contributions_accepted")
        }
        Outcome::Withdrawn { .. } => increment_counter!("fundme_withdrawals"),
      }
      Ok(Json(outcome))
    }
    Err(e) => {
      let label = match &e {
        RpcError::Ledger(e) => reason(e),
        RpcError::Task(_) => "task",
      };
      increment_counter!("fundme_calls_rejected", "reason" => label);
      Err(e)
    }
  }
}

async fn fund(
  State(node): State<Node>,
  Json(req): Json<ValueTransfer>,
) -> Result<Json<Outcome>, RpcError> {
  dispatch(node, req.caller, Call::Fund { amount: req.amount }).await
}

async fn receive(
  State(node): State<Node>,
  Json(req): Json<ValueTransfer>,
) -> Result<Json<Outcome>, RpcError> {
  dispatch(node, req.caller, Call::Receive { amount: req.amount }).await
}

async fn fallback(
  State(node): State<Node>,
  Json(req): Json<FallbackTransfer>,
) -> Result<Json<Outcome>, RpcError> {
  dispatch(node, req.caller, Call::Fallback {
    amount: req.amount,
    data: req.data,
  })
  .await
}

async fn withdraw(
  State(node): State<Node>,
  Json(req): Json<WithdrawRequest>,
) -> Result<Json<Outcome>, RpcError> {
  dispatch(node, req.caller, Call::Withdraw).await
}

async fn contribution_of(
  State(node): State<Node>,
  Path(address): Path<Address>,
) -> Result<Json<AmountResponse>, RpcError> {
  let amount = blocking(move || node.ledger.contribution_of(&address)).await?;
  Ok(Json(AmountResponse { amount }))
}

async fn contributor_at(
  State(node): State<Node>,
  Path(index): Path<usize>,
) -> Result<Json<AddressResponse>, RpcError> {
  let address = blocking(move || node.ledger.contributor_at(index)).await?;
  Ok(Json(AddressResponse { address }))
}

async fn owner(State(node): State<Node>) -> Json<AddressResponse> {
  Json(AddressResponse {
    address: node.ledger.owner(),
  })
}

async fn held(
  State(node): State<Node>,
) -> Result<Json<AmountResponse>, RpcError> {
  let amount = blocking(move || node.ledger.held()).await?;
  Ok(Json(AmountResponse { amount }))
}

async fn price_feed_version(State(node): State<Node>) -> Json<VersionResponse> {
  Json(VersionResponse {
    version: node.ledger.price_source_version(),
  })
}

async fn bank_balance(
  State(node): State<Node>,
  Path(address): Path<Address>,
) -> Result<Json<AmountResponse>, RpcError> {
  let amount =
    blocking(move || Ok(node.bank.balance_of(&address)?)).await?;
  Ok(Json(AmountResponse { amount }))
}

async fn update_answer(
  State(node): State<Node>,
  Json(req): Json<AnswerUpdate>,
) -> StatusCode {
  info!("mock price feed answer set to {}", req.answer);
  node.feed.update_answer(req.answer);
  StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
  use {
    super::{router, Ledger, Node},
    crate::storage::Balances,
    axum::{
      body::Body,
      http::{header::CONTENT_TYPE, Method, Request, StatusCode},
      Router,
    },
    fundme_ledger::{FundingLedger, InMemoryBank, InMemoryStateStore, State},
    fundme_oracle::{MockPriceFeed, OracleConfig, PriceOracle, PriceSource},
    fundme_primitives::{fraction, Address},
    serde_json::{json, Value},
    std::sync::Arc,
    tower::ServiceExt,
  };

  fn app() -> anyhow::Result<(Router, Address)> {
    let owner = Address::new([7; 32]);
    let feed = Arc::new(MockPriceFeed::new(8, 2000_00000000));
    let bank = Arc::new(InMemoryBank::default()) as Arc<dyn Balances>;
    let ledger: Ledger = FundingLedger::open(
      owner,
      PriceOracle::new(
        feed.clone() as Arc<dyn PriceSource>,
        OracleConfig::default(),
      ),
      Box::new(InMemoryStateStore::default()) as Box<dyn State + Send>,
      bank.clone(),
    )?;

    Ok((
      router(Node {
        ledger: Arc::new(ledger),
        bank,
        feed,
      }),
      owner,
    ))
  }

  async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
  ) -> anyhow::Result<(StatusCode, Value)> {
    let request = Request::builder()
      .method(method)
      .uri(uri)
      .header(CONTENT_TYPE, "application/json")
      .body(Body::from(body.map(|b| b.to_string()).unwrap_or_default()))?;

    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await?;
    let json = if bytes.is_empty() {
      Value::Null
    } else {
      serde_json::from_slice(&bytes)?
    };
    Ok((status, json))
  }

  #[tokio::test]
  async fn fund_and_withdraw() -> anyhow::Result<()> {
    let (app, owner) = app()?;
    let alice = Address::new([1; 32]).to_string();
    let amount = fraction(1, 10) as u64;

    let (status, body) = call(
      &app,
      Method::POST,
      "/fund",
      Some(json!({ "caller": alice, "amount": amount })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "type": "contributed", "amount": amount }));

    let (status, body) = call(
      &app,
      Method::POST,
      "/receive",
      Some(json!({ "caller": alice, "amount": amount })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (_, body) =
      call(&app, Method::GET, &format!("/contributions/{alice}"), None).await?;
    assert_eq!(body, json!({ "amount": 2 * amount }));

    let (_, body) = call(&app, Method::GET, "/contributors/1", None).await?;
    assert_eq!(body, json!({ "address": alice }));

    let (status, _) = call(&app, Method::GET, "/contributors/2", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(
      &app,
      Method::POST,
      "/withdraw",
      Some(json!({ "caller": alice })),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(
      &app,
      Method::POST,
      "/withdraw",
      Some(json!({ "caller": owner.to_string() })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "type": "withdrawn", "amount": 2 * amount }));

    let (_, body) =
      call(&app, Method::GET, &format!("/bank/{owner}"), None).await?;
    assert_eq!(body, json!({ "amount": 2 * amount }));

    let (_, body) = call(&app, Method::GET, "/held", None).await?;
    assert_eq!(body, json!({ "amount": 0 }));
    Ok(())
  }

  #[tokio::test]
  async fn fallback_is_gated_like_fund() -> anyhow::Result<()> {
    let (app, _) = app()?;
    let alice = Address::new([1; 32]).to_string();

    let (status, body) = call(
      &app,
      Method::POST,
      "/fallback",
      Some(json!({ "caller": alice, "amount": 1000, "data": [1, 2, 3] })),
    )
    .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].is_string());

    let (_, body) = call(&app, Method::GET, "/held", None).await?;
    assert_eq!(body, json!({ "amount": 0 }));
    Ok(())
  }

  #[tokio::test]
  async fn mock_answer_steers_threshold() -> anyhow::Result<()> {
    let (app, owner) = app()?;
    let alice = Address::new([1; 32]).to_string();
    // 0.01 units, worth 20 at 2000 per unit and 4 at 400 per unit
    let amount = fraction(1, 100) as u64;

    let (status, _) = call(
      &app,
      Method::POST,
      "/mock/answer",
      Some(json!({ "answer": 400_00000000u64 })),
    )
    .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = call(
      &app,
      Method::POST,
      "/fund",
      Some(json!({ "caller": alice, "amount": amount })),
    )
    .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (_, body) = call(&app, Method::GET, "/owner", None).await?;
    assert_eq!(body, json!({ "address": owner.to_string() }));

    let (_, body) = call(&app, Method::GET, "/price-feed/version", None).await?;
    assert_eq!(body, json!({ "version": 4 }));
    Ok(())
  }
}
