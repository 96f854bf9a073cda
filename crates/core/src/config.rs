use serde::Deserialize;

/// Root application configuration. Loaded from an optional `config/drip`
/// file and environment variables with the prefix `CAMPAIGN_DRIP__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// ─── Scheduler Config ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,
    /// Wake interval between ticks.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Maximum enrollments claimed per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Concurrent step executions within one tick.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Claim lifetime; an expired claim is treated as abandoned.
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
    /// Upper bound on a single channel adapter call.
    #[serde(default = "default_dispatch_timeout_ms")]
    pub dispatch_timeout_ms: u64,
}

fn default_scheduler_enabled() -> bool {
    true
}
fn default_interval_secs() -> u64 {
    300
}
fn default_batch_size() -> usize {
    100
}
fn default_max_parallel() -> usize {
    8
}
fn default_lease_ttl_secs() -> u64 {
    900
}
fn default_dispatch_timeout_ms() -> u64 {
    30_000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            interval_secs: default_interval_secs(),
            batch_size: default_batch_size(),
            max_parallel: default_max_parallel(),
            lease_ttl_secs: default_lease_ttl_secs(),
            dispatch_timeout_ms: default_dispatch_timeout_ms(),
        }
    }
}

// ─── Channel Config ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default = "default_survey_base_url")]
    pub survey_base_url: String,
    /// Recent provider requests each adapter keeps for inspection.
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
    #[serde(default)]
    pub email: EmailSettings,
    #[serde(default)]
    pub sms: SmsSettings,
    #[serde(default)]
    pub whatsapp: WhatsAppSettings,
    #[serde(default)]
    pub telegram: TelegramSettings,
    #[serde(default)]
    pub rate_limits: ChannelRateLimits,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailSettings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_from_email")]
    pub from_email: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SmsSettings {
    #[serde(default)]
    pub account_sid: String,
    #[serde(default)]
    pub auth_token: String,
    #[serde(default)]
    pub from_number: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhatsAppSettings {
    #[serde(default = "default_whatsapp_api")]
    pub api_base_url: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub phone_number_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramSettings {
    #[serde(default = "default_telegram_api")]
    pub api_base_url: String,
    #[serde(default)]
    pub bot_token: String,
}

/// Sends per second allowed for each provider.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelRateLimits {
    #[serde(default = "default_email_rate")]
    pub email_per_second: u32,
    #[serde(default = "default_sms_rate")]
    pub sms_per_second: u32,
    #[serde(default = "default_whatsapp_rate")]
    pub whatsapp_per_second: u32,
    #[serde(default = "default_telegram_rate")]
    pub telegram_per_second: u32,
}

fn default_survey_base_url() -> String {
    "https://forms.example.com".to_string()
}
fn default_outbox_capacity() -> usize {
    1_000
}
fn default_from_email() -> String {
    "followups@example.com".to_string()
}
fn default_from_name() -> String {
    "Follow-ups".to_string()
}
fn default_whatsapp_api() -> String {
    "https://graph.facebook.com/v19.0".to_string()
}
fn default_telegram_api() -> String {
    "https://api.telegram.org".to_string()
}
fn default_email_rate() -> u32 {
    100
}
fn default_sms_rate() -> u32 {
    10
}
fn default_whatsapp_rate() -> u32 {
    20
}
fn default_telegram_rate() -> u32 {
    30
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            survey_base_url: default_survey_base_url(),
            outbox_capacity: default_outbox_capacity(),
            email: EmailSettings::default(),
            sms: SmsSettings::default(),
            whatsapp: WhatsAppSettings::default(),
            telegram: TelegramSettings::default(),
            rate_limits: ChannelRateLimits::default(),
        }
    }
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            from_email: default_from_email(),
            from_name: default_from_name(),
        }
    }
}

impl Default for WhatsAppSettings {
    fn default() -> Self {
        Self {
            api_base_url: default_whatsapp_api(),
            access_token: String::new(),
            phone_number_id: String::new(),
        }
    }
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            api_base_url: default_telegram_api(),
            bot_token: String::new(),
        }
    }
}

impl Default for ChannelRateLimits {
    fn default() -> Self {
        Self {
            email_per_second: default_email_rate(),
            sms_per_second: default_sms_rate(),
            whatsapp_per_second: default_whatsapp_rate(),
            telegram_per_second: default_telegram_rate(),
        }
    }
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9091
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            scheduler: SchedulerConfig::default(),
            channels: ChannelsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional config file and environment
    /// variables. Environment wins.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/drip").required(false))
            .add_source(
                config::Environment::with_prefix("CAMPAIGN_DRIP")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(","),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
