//! HTTP adapter for the ledger contract.
//!
//! Balances come from a block-explorer `token-balances` endpoint; transfers go
//! through a signer gateway that holds the payout key and deduplicates on the
//! idempotency key. This adapter performs a single attempt per call; retry
//! policy belongs to the caller.

use super::{LedgerClient, LedgerError, TransferKey, TransferReceipt, TransferRequest};
use crate::{TxRef, WalletAddress};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

fn default_balance_path() -> String {
    "/api/v2/addresses/{address}/token-balances".to_string()
}

fn default_transfer_path() -> String {
    "/transfers".to_string()
}

fn default_lookup_path() -> String {
    "/transfers/{key}".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_connect_timeout_ms() -> u64 {
    3_000
}

/// HTTP binding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpLedgerConfig {
    /// Block explorer base URL used for balance reads.
    pub explorer_url: String,
    /// Signer gateway base URL used for transfers and lookups.
    pub gateway_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Token whose balance counts toward holdings and which is paid out.
    pub token_symbol: String,
    /// Supports `{address}`.
    #[serde(default = "default_balance_path")]
    pub balance_path: String,
    #[serde(default = "default_transfer_path")]
    pub transfer_path: String,
    /// Supports `{key}`.
    #[serde(default = "default_lookup_path")]
    pub lookup_path: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl HttpLedgerConfig {
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.explorer_url.trim().is_empty() {
            return Err(LedgerError::Config("ledger.explorer_url is empty".to_string()));
        }
        if self.gateway_url.trim().is_empty() {
            return Err(LedgerError::Config("ledger.gateway_url is empty".to_string()));
        }
        if self.token_symbol.trim().is_empty() {
            return Err(LedgerError::Config("token_symbol is empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct TransferBody<'a> {
    idempotency_key: &'a TransferKey,
    to: &'a WalletAddress,
    amount: u64,
    token_symbol: &'a str,
}

#[derive(Debug, Deserialize)]
struct TransferResponse {
    #[serde(default)]
    tx_ref: Option<String>,
    #[serde(default)]
    already_known: bool,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl TransferResponse {
    fn looks_already_known(&self) -> bool {
        let code = self.error_code.as_deref().unwrap_or("").to_ascii_lowercase();
        let msg = self.message.as_deref().unwrap_or("").to_ascii_lowercase();
        self.already_known
            || code.contains("already")
            || code.contains("duplicate")
            || msg.contains("already known")
    }
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    tx_ref: String,
}

#[derive(Debug, Deserialize)]
struct TokenBalance {
    #[serde(default)]
    token: TokenInfo,
    #[serde(default)]
    value: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenInfo {
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    decimals: Option<serde_json::Value>,
}

/// Async HTTP client implementing [`LedgerClient`].
#[derive(Debug, Clone)]
pub struct HttpLedgerClient {
    cfg: HttpLedgerConfig,
    client: reqwest::Client,
}

impl HttpLedgerClient {
    pub fn new(cfg: HttpLedgerConfig) -> Result<Self, LedgerError> {
        cfg.validate()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .build()
            .map_err(|e| LedgerError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self { cfg, client })
    }

    fn join(base: &str, path: &str) -> String {
        let base = base.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self
            .cfg
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            Some(key) => req.header("Authorization", key),
            None => req,
        }
    }

    async fn read_body(resp: reqwest::Response) -> Result<(StatusCode, String), LedgerError> {
        let status = resp.status();
        let body = resp.text().await.map_err(map_reqwest_error)?;
        Ok((status, body))
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn read_balance(&self, address: &WalletAddress) -> Result<u64, LedgerError> {
        let path = self.cfg.balance_path.replace("{address}", address.as_str());
        let url = Self::join(&self.cfg.explorer_url, &path);
        debug!(op = "read_balance", url = %url, "ledger request");

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let (status, body) = Self::read_body(resp).await?;
        if status == StatusCode::NOT_FOUND {
            // Explorers answer 404 for addresses they have never seen.
            return Ok(0);
        }
        if !status.is_success() {
            return Err(LedgerError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        let balances: Vec<TokenBalance> =
            serde_json::from_str(&body).map_err(|e| LedgerError::Decode(e.to_string()))?;
        whole_token_balance(&balances, &self.cfg.token_symbol)
    }

    async fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt, LedgerError> {
        let url = Self::join(&self.cfg.gateway_url, &self.cfg.transfer_path);
        let body = TransferBody {
            idempotency_key: &request.key,
            to: &request.to,
            amount: request.amount,
            token_symbol: &self.cfg.token_symbol,
        };
        debug!(
            op = "transfer",
            idempotency_key = %request.key,
            amount = request.amount,
            "ledger request"
        );

        let resp = self
            .auth(self.client.post(&url).json(&body))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let (status, text) = Self::read_body(resp).await?;
        let parsed = serde_json::from_str::<TransferResponse>(&text).ok();

        if status.is_success() || status == StatusCode::CONFLICT {
            let parsed = parsed.ok_or_else(|| {
                LedgerError::Decode(format!("unexpected transfer response: {text}"))
            })?;
            let already_known = status == StatusCode::CONFLICT || parsed.looks_already_known();
            let tx_ref = parsed
                .tx_ref
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| LedgerError::Decode("transfer response without tx_ref".into()))?;
            return Ok(TransferReceipt {
                tx_ref: TxRef(tx_ref),
                already_known,
            });
        }

        if let Some(parsed) = parsed {
            if parsed.looks_already_known() {
                if let Some(tx_ref) = parsed.tx_ref.filter(|s| !s.trim().is_empty()) {
                    return Ok(TransferReceipt {
                        tx_ref: TxRef(tx_ref),
                        already_known: true,
                    });
                }
            }
            if status == StatusCode::UNPROCESSABLE_ENTITY {
                let reason = parsed
                    .message
                    .or(parsed.error_code)
                    .unwrap_or_else(|| text.clone());
                warn!(op = "transfer", reason = %reason, "chain rejected transfer");
                return Err(LedgerError::Chain(reason));
            }
        } else if status == StatusCode::UNPROCESSABLE_ENTITY {
            return Err(LedgerError::Chain(text));
        }

        Err(LedgerError::HttpStatus {
            status: status.as_u16(),
            body: text,
        })
    }

    async fn find_transfer(&self, key: &TransferKey) -> Result<Option<TxRef>, LedgerError> {
        let path = self.cfg.lookup_path.replace("{key}", &key.to_base64url());
        let url = Self::join(&self.cfg.gateway_url, &path);
        debug!(op = "find_transfer", idempotency_key = %key, "ledger request");

        let resp = self
            .auth(self.client.get(&url))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let (status, body) = Self::read_body(resp).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(LedgerError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        let parsed: LookupResponse =
            serde_json::from_str(&body).map_err(|e| LedgerError::Decode(e.to_string()))?;
        Ok(Some(TxRef(parsed.tx_ref)))
    }
}

/// Pick `symbol` from an explorer balance listing and convert it to whole tokens.
fn whole_token_balance(balances: &[TokenBalance], symbol: &str) -> Result<u64, LedgerError> {
    let Some(entry) = balances
        .iter()
        .find(|b| b.token.symbol.as_deref() == Some(symbol))
    else {
        return Ok(0);
    };

    let raw = entry
        .value
        .as_ref()
        .map(json_to_u128)
        .transpose()?
        .unwrap_or(0);
    let decimals = entry
        .token
        .decimals
        .as_ref()
        .map(json_to_u128)
        .transpose()?
        .unwrap_or(18);
    let decimals = u32::try_from(decimals)
        .map_err(|_| LedgerError::Decode(format!("decimals out of range: {decimals}")))?;

    let whole = match 10u128.checked_pow(decimals) {
        Some(scale) => raw / scale,
        None => 0,
    };
    Ok(u64::try_from(whole).unwrap_or(u64::MAX))
}

/// Explorers encode big integers as decimal strings, sometimes as numbers.
fn json_to_u128(v: &serde_json::Value) -> Result<u128, LedgerError> {
    match v {
        serde_json::Value::String(s) => s
            .trim()
            .parse::<u128>()
            .map_err(|e| LedgerError::Decode(format!("invalid integer {s:?}: {e}"))),
        serde_json::Value::Number(n) => n
            .as_u64()
            .map(u128::from)
            .ok_or_else(|| LedgerError::Decode(format!("invalid integer {n}"))),
        other => Err(LedgerError::Decode(format!("invalid integer {other}"))),
    }
}

fn map_reqwest_error(err: reqwest::Error) -> LedgerError {
    if err.is_timeout() {
        return LedgerError::Timeout;
    }
    if err.is_decode() {
        return LedgerError::Decode(err.to_string());
    }
    LedgerError::Network(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RoundId;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> HttpLedgerConfig {
        HttpLedgerConfig {
            explorer_url: server.uri(),
            gateway_url: server.uri(),
            api_key: Some("secret".to_string()),
            token_symbol: "gMetis".to_string(),
            balance_path: default_balance_path(),
            transfer_path: default_transfer_path(),
            lookup_path: default_lookup_path(),
            request_timeout_ms: 1_000,
            connect_timeout_ms: 1_000,
        }
    }

    fn request() -> TransferRequest {
        TransferRequest {
            key: TransferKey::derive("test", RoundId(4)),
            to: WalletAddress::new("0xAA"),
            amount: 60,
        }
    }

    #[test]
    fn balance_conversion_truncates_decimals() {
        let listing: Vec<TokenBalance> = serde_json::from_value(serde_json::json!([
            {"token": {"symbol": "METIS", "decimals": "18"}, "value": "9000000000000000000000"},
            {"token": {"symbol": "gMetis", "decimals": "18"}, "value": "50999999999999999999"}
        ]))
        .expect("listing");
        assert_eq!(whole_token_balance(&listing, "gMetis").expect("balance"), 50);
        assert_eq!(whole_token_balance(&listing, "OTHER").expect("balance"), 0);
    }

    #[test]
    fn config_rejects_empty_urls() {
        let cfg = HttpLedgerConfig {
            explorer_url: " ".to_string(),
            gateway_url: "http://gw".to_string(),
            api_key: None,
            token_symbol: "gMetis".to_string(),
            balance_path: default_balance_path(),
            transfer_path: default_transfer_path(),
            lookup_path: default_lookup_path(),
            request_timeout_ms: 1_000,
            connect_timeout_ms: 1_000,
        };
        assert!(matches!(cfg.validate(), Err(LedgerError::Config(_))));
    }

    #[tokio::test]
    async fn reads_balance_from_explorer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/addresses/0xAA/token-balances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"token": {"symbol": "gMetis", "decimals": 18}, "value": "50000000000000000000"}
            ])))
            .mount(&server)
            .await;

        let client = HttpLedgerClient::new(config(&server)).expect("client");
        let balance = client
            .read_balance(&WalletAddress::new("0xAA"))
            .await
            .expect("balance");
        assert_eq!(balance, 50);
    }

    #[tokio::test]
    async fn transfer_posts_idempotency_key() {
        let server = MockServer::start().await;
        let req = request();
        Mock::given(method("POST"))
            .and(path("/transfers"))
            .and(header("Authorization", "secret"))
            .and(body_partial_json(serde_json::json!({
                "idempotency_key": req.key.to_base64url(),
                "to": "0xAA",
                "amount": 60
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"tx_ref": "0xabc"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpLedgerClient::new(config(&server)).expect("client");
        let receipt = client.transfer(&req).await.expect("transfer");
        assert_eq!(receipt.tx_ref, TxRef::new("0xabc"));
        assert!(!receipt.already_known);
    }

    #[tokio::test]
    async fn conflict_is_idempotent_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transfers"))
            .respond_with(ResponseTemplate::new(409).set_body_json(serde_json::json!({
                "tx_ref": "0xold",
                "message": "already known"
            })))
            .mount(&server)
            .await;

        let client = HttpLedgerClient::new(config(&server)).expect("client");
        let receipt = client.transfer(&request()).await.expect("transfer");
        assert_eq!(receipt.tx_ref, TxRef::new("0xold"));
        assert!(receipt.already_known);
    }

    #[tokio::test]
    async fn unprocessable_is_chain_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transfers"))
            .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
                "error_code": "INSUFFICIENT_FUNDS",
                "message": "insufficient funds for gas"
            })))
            .mount(&server)
            .await;

        let client = HttpLedgerClient::new(config(&server)).expect("client");
        let err = client.transfer(&request()).await.expect_err("rejected");
        assert!(err.is_chain_rejection());
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transfers"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = HttpLedgerClient::new(config(&server)).expect("client");
        let err = client.transfer(&request()).await.expect_err("unavailable");
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn lookup_404_is_none() {
        let server = MockServer::start().await;
        let req = request();
        Mock::given(method("GET"))
            .and(path(format!("/transfers/{}", req.key.to_base64url())))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = HttpLedgerClient::new(config(&server)).expect("client");
        assert_eq!(client.find_transfer(&req.key).await.expect("lookup"), None);
    }

    #[tokio::test]
    async fn lookup_returns_landed_transfer() {
        let server = MockServer::start().await;
        let req = request();
        Mock::given(method("GET"))
            .and(path(format!("/transfers/{}", req.key.to_base64url())))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"tx_ref": "0xdef"})),
            )
            .mount(&server)
            .await;

        let client = HttpLedgerClient::new(config(&server)).expect("client");
        assert_eq!(
            client.find_transfer(&req.key).await.expect("lookup"),
            Some(TxRef::new("0xdef"))
        );
    }
}
