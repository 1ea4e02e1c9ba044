use crate::announce::Templates;
use crate::notify::TelegramConfig;
use crate::payout::EngineSettings;
use crate::retry::RetryPolicy;
use reward_core::engagement::ExcludedSet;
use reward_core::Identity;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RewardNodeConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub reward: RewardConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub exclusions: ExclusionsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub engagement: EngagementConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub messages: MessagesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_node_label")]
    pub label: String,
    /// Platform name stored with wallet registrations.
    #[serde(default = "default_platform")]
    pub platform: String,
    /// Treat a winner whose wallet lookup keeps failing as unregistered.
    #[serde(default)]
    pub exclude_from_lookup_failures: bool,
}

fn default_node_label() -> String {
    "reward-node".to_string()
}

fn default_platform() -> String {
    "telegram".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            label: default_node_label(),
            platform: default_platform(),
            exclude_from_lookup_failures: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RewardConfig {
    #[serde(default = "default_total_reward")]
    pub total_reward: u64,
    #[serde(default = "default_amount_held")]
    pub amount_held: u64,
    #[serde(default = "default_token_symbol")]
    pub token_symbol: String,
}

fn default_total_reward() -> u64 {
    100
}

fn default_amount_held() -> u64 {
    100
}

fn default_token_symbol() -> String {
    "gMetis".to_string()
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            total_reward: default_total_reward(),
            amount_held: default_amount_held(),
            token_symbol: default_token_symbol(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_four_hours")]
    pub window_secs: u64,
    #[serde(default = "default_four_hours")]
    pub interval_secs: u64,
}

fn default_four_hours() -> u64 {
    4 * 60 * 60
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            window_secs: default_four_hours(),
            interval_secs: default_four_hours(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExclusionsConfig {
    /// Never eligible (team members, bots). User ids or usernames.
    #[serde(default)]
    pub identities: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_dir")]
    pub db_dir: String,
}

fn default_db_dir() -> String {
    "reward_db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_dir: default_db_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// Idempotency key namespace; keep stable for the lifetime of a database.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub explorer_url: String,
    #[serde(default)]
    pub gateway_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub balance_path: Option<String>,
    #[serde(default)]
    pub transfer_path: Option<String>,
    #[serde(default)]
    pub lookup_path: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_namespace() -> String {
    "reward-node".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_connect_timeout_ms() -> u64 {
    3_000
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            explorer_url: String::new(),
            gateway_url: String::new(),
            api_key: None,
            balance_path: None,
            transfer_path: None,
            lookup_path: None,
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

#[cfg(feature = "ledger-http")]
impl LedgerConfig {
    pub fn http_config(
        &self,
        token_symbol: &str,
    ) -> Result<reward_core::ledger::http_client::HttpLedgerConfig, String> {
        // Decoded through serde so unset paths pick up the adapter defaults.
        let mut v = serde_json::json!({
            "explorer_url": self.explorer_url,
            "gateway_url": self.gateway_url,
            "token_symbol": token_symbol,
            "request_timeout_ms": self.request_timeout_ms,
            "connect_timeout_ms": self.connect_timeout_ms,
        });
        for (k, val) in [
            ("api_key", &self.api_key),
            ("balance_path", &self.balance_path),
            ("transfer_path", &self.transfer_path),
            ("lookup_path", &self.lookup_path),
        ] {
            if let Some(val) = val {
                v[k] = serde_json::Value::String(val.clone());
            }
        }
        serde_json::from_value(v).map_err(|e| format!("invalid [ledger] config: {e}"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifierKind {
    #[default]
    Log,
    Telegram,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifierConfig {
    #[serde(default)]
    pub kind: NotifierKind,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementKind {
    #[default]
    Posts,
    Chat,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngagementConfig {
    #[serde(default)]
    pub kind: EngagementKind,
    /// JSON activity snapshot written by the scraper.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
}

fn default_snapshot_path() -> String {
    "activity.json".to_string()
}

fn default_max_messages() -> usize {
    reward_core::engagement::chat::DEFAULT_MAX_MESSAGES
}

impl Default for EngagementConfig {
    fn default() -> Self {
        Self {
            kind: EngagementKind::default(),
            snapshot_path: default_snapshot_path(),
            max_messages: default_max_messages(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    250
}

fn default_max_delay_ms() -> u64 {
    2_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagesConfig {
    /// Explorer link with a `{tx}` placeholder.
    #[serde(default)]
    pub explorer_tx_url: Option<String>,
    #[serde(default)]
    pub registration_contact: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind_address() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

fn resolve_env_refs(mut v: toml::Value) -> Result<toml::Value, String> {
    fn walk(v: &mut toml::Value) -> Result<(), String> {
        match v {
            toml::Value::String(s) => {
                if let Some(var) = s.strip_prefix("env:") {
                    let var = var.trim();
                    if var.is_empty() {
                        return Err("invalid env: reference (empty var name)".to_string());
                    }
                    let val = std::env::var(var)
                        .map_err(|_| format!("missing required environment variable: {var}"))?;
                    *s = val;
                }
            }
            toml::Value::Array(arr) => {
                for x in arr {
                    walk(x)?;
                }
            }
            toml::Value::Table(map) => {
                for (_, x) in map.iter_mut() {
                    walk(x)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    walk(&mut v)?;
    Ok(v)
}

pub fn parse_config(raw: &str, origin: &str) -> Result<RewardNodeConfig, String> {
    let parsed: toml::Value =
        toml::from_str(raw).map_err(|e| format!("failed to parse config {origin}: {e}"))?;
    let resolved = resolve_env_refs(parsed)?;
    resolved
        .try_into::<RewardNodeConfig>()
        .map_err(|e| format!("failed to decode config {origin}: {e}"))
}

pub fn load_config(path: &str) -> Result<RewardNodeConfig, String> {
    let raw = fs::read_to_string(path).map_err(|e| format!("failed to read config {path}: {e}"))?;
    parse_config(&raw, path)
}

impl RewardNodeConfig {
    pub fn validate(&self, ledger_http: bool) -> Result<(), String> {
        if self.node.label.trim().is_empty() {
            return Err("node.label is empty".to_string());
        }
        if self.reward.amount_held == 0 {
            return Err("reward.amount_held must be >= 1".to_string());
        }
        if self.reward.token_symbol.trim().is_empty() {
            return Err("reward.token_symbol is empty".to_string());
        }
        if self.schedule.window_secs == 0 {
            return Err("schedule.window_secs must be >= 1".to_string());
        }
        if self.retry.max_attempts == 0 {
            return Err("retry.max_attempts must be >= 1".to_string());
        }
        if self.ledger.namespace.trim().is_empty() {
            return Err("ledger.namespace is empty".to_string());
        }
        if ledger_http {
            let missing = [
                ("ledger.explorer_url", self.ledger.explorer_url.as_str()),
                ("ledger.gateway_url", self.ledger.gateway_url.as_str()),
            ]
            .into_iter()
            .filter(|(_, v)| v.trim().is_empty())
            .map(|(k, _)| k)
            .collect::<Vec<_>>();
            if !missing.is_empty() {
                return Err(format!("missing required ledger urls: {}", missing.join(", ")));
            }
        }
        if self.notifier.kind == NotifierKind::Telegram {
            let t = &self.notifier.telegram;
            if t.bot_token.trim().is_empty() || t.chat_id.trim().is_empty() {
                return Err(
                    "notifier.telegram.bot_token and notifier.telegram.chat_id are required"
                        .to_string(),
                );
            }
        }
        Ok(())
    }

    pub fn excluded_seed(&self) -> ExcludedSet {
        self.exclusions
            .identities
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(Identity::new)
            .collect()
    }

    pub fn templates(&self) -> Templates {
        let defaults = Templates::default();
        Templates {
            token_symbol: self.reward.token_symbol.clone(),
            explorer_tx_url: self
                .messages
                .explorer_tx_url
                .clone()
                .unwrap_or(defaults.explorer_tx_url),
            registration_contact: self
                .messages
                .registration_contact
                .clone()
                .unwrap_or(defaults.registration_contact),
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            total_reward: self.reward.total_reward,
            amount_held: self.reward.amount_held,
            namespace: self.ledger.namespace.clone(),
            window: Duration::from_secs(self.schedule.window_secs),
            excluded_seed: self.excluded_seed(),
            retry: self.retry.policy(),
            templates: self.templates(),
        }
    }
}
