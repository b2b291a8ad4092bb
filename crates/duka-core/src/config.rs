use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{DukaError, Result};

// Pipeline constants — §5 deadlines and turn budget
pub const LLM_DEADLINE_SECS: u64 = 20;
pub const GATEWAY_DEADLINE_SECS: u64 = 10;
pub const KB_DEADLINE_SECS: u64 = 5;
pub const STORAGE_DEADLINE_SECS: u64 = 2;
pub const TURN_BUDGET_SECS: u64 = 30;

pub const DEFAULT_PORT: u16 = 18990;
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Minimum secret quality for the session signing key.
const SIGNING_KEY_MIN_LEN: usize = 32;
const SIGNING_KEY_MIN_DISTINCT: usize = 16;

/// Top-level config (duka.toml + DUKA_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DukaConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub http: HttpConfig,
    pub security: SecurityConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub messaging: MessagingConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub billing: BillingConfig,
}

impl DukaConfig {
    /// Load config: explicit path > DUKA_CONFIG env > ./duka.toml,
    /// with DUKA_* env overrides on top.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let file = path
            .map(str::to_string)
            .or_else(|| std::env::var("DUKA_CONFIG").ok())
            .unwrap_or_else(|| "duka.toml".to_string());

        let config: DukaConfig = Figment::new()
            .merge(Toml::file(&file))
            .merge(Env::prefixed("DUKA_").split("__"))
            .extract()
            .map_err(|e| DukaError::Config(format!("failed to load {}: {}", file, e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject weak or missing required values with an actionable message.
    /// Called once at startup; the process must not come up misconfigured.
    pub fn validate(&self) -> Result<()> {
        let enc = self.security.encryption_key_bytes()?;
        if enc.len() < 32 {
            return Err(DukaError::Config(format!(
                "security.encryption_key must decode to at least 32 bytes (256 bits), got {}; \
                 generate one with `openssl rand -hex 32`",
                enc.len()
            )));
        }

        let key = &self.security.session_signing_key;
        if key.len() < SIGNING_KEY_MIN_LEN {
            return Err(DukaError::Config(format!(
                "security.session_signing_key must be at least {} characters, got {}",
                SIGNING_KEY_MIN_LEN,
                key.len()
            )));
        }
        let distinct = {
            let mut chars: Vec<char> = key.chars().collect();
            chars.sort_unstable();
            chars.dedup();
            chars.len()
        };
        if distinct < SIGNING_KEY_MIN_DISTINCT {
            return Err(DukaError::Config(format!(
                "security.session_signing_key has only {} distinct characters (minimum {}); \
                 use a random value, not a passphrase",
                distinct, SIGNING_KEY_MIN_DISTINCT
            )));
        }
        if has_repeating_pattern(key) {
            return Err(DukaError::Config(
                "security.session_signing_key is a repeated pattern; use a random value"
                    .to_string(),
            ));
        }
        if key == &self.security.encryption_key {
            return Err(DukaError::Config(
                "security.session_signing_key must be distinct from security.encryption_key"
                    .to_string(),
            ));
        }

        if self.llm.api_key.trim().is_empty() {
            return Err(DukaError::Config(
                "llm.api_key is required (set DUKA_LLM__API_KEY or llm.api_key in duka.toml)"
                    .to_string(),
            ));
        }

        if self.pipeline.kb_score_threshold < 0.0 || self.pipeline.kb_score_threshold > 1.0 {
            return Err(DukaError::Config(format!(
                "pipeline.kb_score_threshold must be within [0,1], got {}",
                self.pipeline.kb_score_threshold
            )));
        }

        Ok(())
    }
}

/// True when `s` is some shorter pattern repeated to fill the whole string
/// (e.g. "abcabcabcabc"). Such keys pass the length check but carry little
/// entropy.
fn has_repeating_pattern(s: &str) -> bool {
    let bytes = s.as_bytes();
    let n = bytes.len();
    for period in 1..=n / 2 {
        if n % period != 0 {
            continue;
        }
        if bytes.chunks(period).all(|c| c == &bytes[..period]) {
            return true;
        }
    }
    false
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Hex-encoded 256-bit key for at-rest encryption of gateway credentials,
    /// webhook payloads, and global-party phone numbers.
    pub encryption_key: String,
    /// HMAC key for operator session tokens. Must differ from encryption_key.
    pub session_signing_key: String,
}

impl SecurityConfig {
    pub fn encryption_key_bytes(&self) -> Result<Vec<u8>> {
        hex::decode(self.encryption_key.trim()).map_err(|_| {
            DukaError::Config(
                "security.encryption_key must be hex-encoded (openssl rand -hex 32)".to_string(),
            )
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_key: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Per-call deadline in seconds. Clamped by the per-turn budget.
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

/// Messaging gateway defaults applied to tenants that have not overridden them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    /// Provider label recorded in webhook/dedup keys.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Dedup key TTL. Must cover the provider's maximum retry window.
    #[serde(default = "default_dedup_ttl_hours")]
    pub dedup_ttl_hours: u64,
    /// When true, the inbound dedup key includes the body hash even if the
    /// provider message id is present.
    #[serde(default)]
    pub dedup_include_payload_hash: bool,
    /// Default quiet hours window (local hour, 0-23), applied when a tenant
    /// has no explicit window.
    #[serde(default = "default_quiet_start")]
    pub quiet_start_hour: u8,
    #[serde(default = "default_quiet_end")]
    pub quiet_end_hour: u8,
    /// Default per-tenant daily outbound ceiling.
    #[serde(default = "default_daily_limit")]
    pub daily_message_limit: u32,
    /// Suppression window for the "business temporarily unavailable" reply.
    #[serde(default = "default_subgate_hours")]
    pub subscription_gate_suppress_hours: u64,
    /// Default M-Pesa paybill shown in C2B instructions.
    #[serde(default = "default_paybill")]
    pub paybill: String,
    /// Base URL for hosted checkout links.
    #[serde(default = "default_checkout_base")]
    pub checkout_base: String,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            dedup_ttl_hours: default_dedup_ttl_hours(),
            dedup_include_payload_hash: false,
            quiet_start_hour: default_quiet_start(),
            quiet_end_hour: default_quiet_end(),
            daily_message_limit: default_daily_limit(),
            subscription_gate_suppress_hours: default_subgate_hours(),
            paybill: default_paybill(),
            checkout_base: default_checkout_base(),
        }
    }
}

/// Knobs for the conversational pipeline. Defaults follow the routing
/// thresholds in the classifier contracts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Intents (raw classifier strings) that route straight to the unknown
    /// handler.
    #[serde(default = "default_unknown_intents")]
    pub other_intents_to_unknown: Vec<String>,
    /// Minimum KB retrieval score before an answer is considered grounded.
    #[serde(default = "default_kb_threshold")]
    pub kb_score_threshold: f64,
    /// When true REQUEST_HUMAN closes the conversation instead of parking it
    /// in handoff.
    #[serde(default)]
    pub request_human_closes: bool,
    /// History window rebuilt into the classifier prompt.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Regenerate the key-facts summary every N messages.
    #[serde(default = "default_summary_every")]
    pub summary_every_messages: u32,
    /// Live conversation state expires after this many minutes of inactivity.
    #[serde(default = "default_state_ttl")]
    pub state_ttl_minutes: u64,
    /// Second message arriving within this window merges into the in-flight
    /// turn instead of queuing behind the lock.
    #[serde(default = "default_merge_window")]
    pub merge_window_secs: u64,
    /// Lock-acquire timeout for the per-conversation lock.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            other_intents_to_unknown: default_unknown_intents(),
            kb_score_threshold: default_kb_threshold(),
            request_human_closes: false,
            history_window: default_history_window(),
            summary_every_messages: default_summary_every(),
            state_ttl_minutes: default_state_ttl(),
            merge_window_secs: default_merge_window(),
            lock_timeout_secs: default_lock_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    #[serde(default = "default_trial_days")]
    pub trial_days: u32,
    /// Minimum withdrawal amount in cents.
    #[serde(default = "default_min_withdrawal")]
    pub min_withdrawal_cents: i64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            trial_days: default_trial_days(),
            min_withdrawal_cents: default_min_withdrawal(),
        }
    }
}

fn default_db_path() -> String {
    "duka.db".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_timeout() -> u64 {
    LLM_DEADLINE_SECS
}

fn default_provider() -> String {
    "twilio".to_string()
}

fn default_dedup_ttl_hours() -> u64 {
    24
}

fn default_quiet_start() -> u8 {
    21
}

fn default_quiet_end() -> u8 {
    8
}

fn default_daily_limit() -> u32 {
    1000
}

fn default_subgate_hours() -> u64 {
    24
}

fn default_paybill() -> String {
    "400200".to_string()
}

fn default_checkout_base() -> String {
    "https://pay.duka.africa/checkout".to_string()
}

fn default_unknown_intents() -> Vec<String> {
    vec!["OTHER".to_string(), "SMALLTALK_UNCLEAR".to_string()]
}

fn default_kb_threshold() -> f64 {
    0.6
}

fn default_history_window() -> usize {
    20
}

fn default_summary_every() -> u32 {
    20
}

fn default_state_ttl() -> u64 {
    30
}

fn default_merge_window() -> u64 {
    2
}

fn default_lock_timeout() -> u64 {
    10
}

fn default_trial_days() -> u32 {
    14
}

fn default_min_withdrawal() -> i64 {
    100
}
