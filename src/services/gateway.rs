//! Payment gateway client.
//!
//! 1.  **CircuitBreaker**: stops calling the gateway after repeated failures
//!     and lets a trial request through once the cool-down has passed.
//! 2.  **SnapGatewayClient**: creates Snap transactions (order id + gross
//!     amount in, redirect URL out). Every call goes through the breaker.
//! 3.  **Webhook signatures**: `sha512(order_id + status_code + gross_amount + server_key)`.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::PaymentConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow normally.
    Closed,
    /// Requests are refused until the cool-down has passed.
    Open,
    /// Cool-down passed; the next outcome decides between Closed and Open.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    failure_threshold: u32,
    cool_down: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cool_down: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
            }),
            failure_threshold: failure_threshold.max(1),
            cool_down,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn can_execute(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .map_or(true, |at| at.elapsed() >= self.cool_down);
                if cooled {
                    inner.state = CircuitState::HalfOpen;
                    info!("Circuit breaker transitioning to HalfOpen state");
                }
                cooled
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            info!("Circuit breaker recovered - transitioning to Closed state");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count += 1;
        match inner.state {
            CircuitState::Closed if inner.failure_count >= self.failure_threshold => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                error!(
                    failures = inner.failure_count,
                    threshold = self.failure_threshold,
                    "Circuit breaker OPENED"
                );
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                warn!("Circuit breaker trial failed - returning to Open state");
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("circuit breaker is open - payment gateway temporarily unavailable")]
    CircuitOpen,

    #[error("payment gateway is not configured")]
    Disabled,

    #[error("payment gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("payment gateway rejected the order with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// What the gateway hands back for a new order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SnapTransaction {
    pub token: String,
    pub redirect_url: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Registers `order_id` for `gross_amount` and returns where to send
    /// the customer to pay.
    async fn create_transaction(
        &self,
        order_id: Uuid,
        gross_amount: i64,
    ) -> Result<SnapTransaction, GatewayError>;
}

#[derive(Debug, Serialize)]
struct TransactionDetails {
    order_id: String,
    gross_amount: i64,
}

#[derive(Debug, Serialize)]
struct CreditCard {
    secure: bool,
}

#[derive(Debug, Serialize)]
struct SnapRequest {
    transaction_details: TransactionDetails,
    credit_card: CreditCard,
}

pub struct SnapGatewayClient {
    base_url: String,
    auth_header: String,
    http_client: reqwest::Client,
    circuit_breaker: CircuitBreaker,
}

impl SnapGatewayClient {
    pub fn from_config(config: &PaymentConfig) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            base_url: config.gateway_url.trim_end_matches('/').to_string(),
            auth_header: basic_auth(&config.server_key),
            http_client,
            circuit_breaker: CircuitBreaker::new(
                config.circuit_breaker.failure_threshold,
                config.circuit_breaker.cool_down,
            ),
        })
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    async fn send(&self, request: &SnapRequest) -> Result<SnapTransaction, GatewayError> {
        let response = self
            .http_client
            .post(format!("{}/snap/v1/transactions", self.base_url))
            .header(reqwest::header::AUTHORIZATION, &self.auth_header)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<SnapTransaction>().await?)
    }
}

#[async_trait]
impl PaymentGateway for SnapGatewayClient {
    async fn create_transaction(
        &self,
        order_id: Uuid,
        gross_amount: i64,
    ) -> Result<SnapTransaction, GatewayError> {
        if !self.circuit_breaker.can_execute() {
            warn!(%order_id, "Circuit breaker is OPEN - skipping payment gateway request");
            return Err(GatewayError::CircuitOpen);
        }

        let request = SnapRequest {
            transaction_details: TransactionDetails {
                order_id: order_id.to_string(),
                gross_amount,
            },
            credit_card: CreditCard { secure: true },
        };

        match self.send(&request).await {
            Ok(transaction) => {
                self.circuit_breaker.record_success();
                info!(%order_id, gross_amount, "payment gateway transaction created");
                Ok(transaction)
            }
            Err(e) => {
                error!(%order_id, error = %e, "payment gateway request failed");
                self.circuit_breaker.record_failure();
                Err(e)
            }
        }
    }
}

/// Stand-in used when no server key is configured: every order is created
/// without a redirect URL.
pub struct DisabledGateway;

#[async_trait]
impl PaymentGateway for DisabledGateway {
    async fn create_transaction(
        &self,
        _order_id: Uuid,
        _gross_amount: i64,
    ) -> Result<SnapTransaction, GatewayError> {
        Err(GatewayError::Disabled)
    }
}

fn basic_auth(server_key: &str) -> String {
    // the server key is the user name, the password stays empty
    let encoded = general_purpose::STANDARD.encode(format!("{}:", server_key));
    format!("Basic {}", encoded)
}

pub fn notification_signature(
    order_id: &str,
    status_code: &str,
    gross_amount: &str,
    server_key: &str,
) -> String {
    let mut hasher = Sha512::new();
    hasher.update(order_id.as_bytes());
    hasher.update(status_code.as_bytes());
    hasher.update(gross_amount.as_bytes());
    hasher.update(server_key.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn verify_notification_signature(
    order_id: &str,
    status_code: &str,
    gross_amount: &str,
    server_key: &str,
    signature: &str,
) -> bool {
    let expected = notification_signature(order_id, status_code, gross_amount, server_key);
    let supplied = signature.trim().to_ascii_lowercase();
    constant_time_eq::constant_time_eq(expected.as_bytes(), supplied.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerConfig;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: &str, threshold: u32) -> PaymentConfig {
        PaymentConfig {
            server_key: "SB-Mid-server-test".to_string(),
            gateway_url: url.to_string(),
            timeout: Duration::from_secs(2),
            require_signature: false,
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: threshold,
                cool_down: Duration::from_secs(60),
            },
        }
    }

    #[test]
    fn breaker_opens_after_threshold_and_recovers_after_cool_down() {
        let breaker = CircuitBreaker::new(2, Duration::ZERO);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        // zero cool-down: the next check lets a trial through
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn open_breaker_refuses_until_cool_down() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        breaker.record_failure();
        assert!(!breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn failed_trial_reopens_breaker() {
        let breaker = CircuitBreaker::new(1, Duration::ZERO);
        breaker.record_failure();
        assert!(breaker.can_execute());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn signature_matches_gateway_formula() {
        let sig = notification_signature("order-1", "200", "150000.00", "key");
        assert_eq!(sig.len(), 128);
        assert!(verify_notification_signature("order-1", "200", "150000.00", "key", &sig));
        assert!(verify_notification_signature(
            "order-1",
            "200",
            "150000.00",
            "key",
            &sig.to_uppercase()
        ));
        assert!(!verify_notification_signature("order-1", "200", "1.00", "key", &sig));
        assert!(!verify_notification_signature("order-1", "200", "150000.00", "key", &sig[..64]));
        assert!(!verify_notification_signature("order-1", "200", "150000.00", "key", ""));
    }

    #[tokio::test]
    async fn creates_transaction_with_basic_auth() {
        let server = MockServer::start().await;
        let order_id = Uuid::new_v4();
        let expected_auth = basic_auth("SB-Mid-server-test");

        Mock::given(method("POST"))
            .and(path("/snap/v1/transactions"))
            .and(header("authorization", expected_auth.as_str()))
            .and(body_partial_json(json!({
                "transaction_details": { "order_id": order_id.to_string(), "gross_amount": 150 }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "token": "snap-token",
                "redirect_url": "https://pay.example/snap-token"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = SnapGatewayClient::from_config(&config(&server.uri(), 5)).unwrap();
        let transaction = client.create_transaction(order_id, 150).await.unwrap();

        assert_eq!(transaction.redirect_url, "https://pay.example/snap-token");
        assert_eq!(client.circuit_breaker().state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn repeated_rejections_open_the_breaker() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/snap/v1/transactions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(2)
            .mount(&server)
            .await;

        let client = SnapGatewayClient::from_config(&config(&server.uri(), 2)).unwrap();
        for _ in 0..2 {
            let err = client.create_transaction(Uuid::new_v4(), 10).await.unwrap_err();
            assert!(matches!(err, GatewayError::Rejected { status: 500, .. }));
        }

        // third call never reaches the server
        let err = client.create_transaction(Uuid::new_v4(), 10).await.unwrap_err();
        assert!(matches!(err, GatewayError::CircuitOpen));
    }
}
