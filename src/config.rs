//! Configuration types, built from environment variables.

use std::path::PathBuf;

use secrecy::SecretString;

/// Default HTTP port.
const DEFAULT_PORT: u16 = 3000;

/// Default OpenAI model.
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

/// Service configuration.
#[derive(Debug, Clone)]
pub struct OutreachConfig {
    /// HTTP listen port.
    pub port: u16,
    /// libSQL database file.
    pub db_path: PathBuf,
    /// Mirror in-memory state to the database.
    pub persistence_enabled: bool,
    /// Public base URL the telephony provider calls back on (no trailing slash).
    pub public_base_url: Option<String>,
    /// Safety policy.
    pub safety: SafetyConfig,
    /// Twilio credentials. `None` means live calls are unavailable.
    pub twilio: Option<TwilioConfig>,
    /// LLM settings. `None` means scripting always uses fallbacks.
    pub llm: Option<LlmSettings>,
}

/// Safety policy settings.
#[derive(Debug, Clone)]
pub struct SafetyConfig {
    /// Live actions on high-risk content need an approved escalation.
    pub require_escalation_for_live: bool,
    /// Numbers that must never be dialed or used as a callback (raw, un-normalized).
    pub blocked_numbers: Vec<String>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            require_escalation_for_live: true,
            blocked_numbers: Vec::new(),
        }
    }
}

/// Twilio REST credentials.
#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: SecretString,
    pub from_number: String,
}

/// OpenAI completion settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_key: SecretString,
    pub model: String,
}

impl OutreachConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Self {
        let port: u16 = std::env::var("OUTREACH_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let db_path = std::env::var("OUTREACH_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/outreach.db"));

        let public_base_url = std::env::var("OUTREACH_PUBLIC_BASE_URL")
            .ok()
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty());

        let blocked_numbers = std::env::var("OUTREACH_NO_CALLBACK_NUMBERS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            port,
            db_path,
            persistence_enabled: flag_enabled("OUTREACH_PERSISTENCE_ENABLED"),
            public_base_url,
            safety: SafetyConfig {
                require_escalation_for_live: flag_enabled("OUTREACH_REQUIRE_ESCALATION_FOR_LIVE"),
                blocked_numbers,
            },
            twilio: TwilioConfig::from_env(),
            llm: LlmSettings::from_env(),
        }
    }

    /// Build a provider callback URL for `path`, if a public base URL is set.
    pub fn callback_url(&self, path: &str) -> Option<String> {
        self.public_base_url
            .as_ref()
            .map(|base| format!("{base}{path}"))
    }
}

impl Default for OutreachConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            db_path: PathBuf::from("./data/outreach.db"),
            persistence_enabled: false,
            public_base_url: None,
            safety: SafetyConfig::default(),
            twilio: None,
            llm: None,
        }
    }
}

impl TwilioConfig {
    /// Returns `None` unless SID, token and from-number are all set.
    pub fn from_env() -> Option<Self> {
        let account_sid = non_empty_var("TWILIO_ACCOUNT_SID")?;
        let auth_token = non_empty_var("TWILIO_AUTH_TOKEN")?;
        let from_number = non_empty_var("TWILIO_FROM_NUMBER")?;
        Some(Self {
            account_sid,
            auth_token: SecretString::from(auth_token),
            from_number,
        })
    }
}

impl LlmSettings {
    /// Returns `None` if `OPENAI_API_KEY` is not set.
    pub fn from_env() -> Option<Self> {
        let api_key = non_empty_var("OPENAI_API_KEY")?;
        Some(Self {
            api_key: SecretString::from(api_key),
            model: non_empty_var("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Flags default to on; only a literal `false` turns them off.
fn flag_enabled(key: &str) -> bool {
    parse_flag(std::env::var(key).ok().as_deref())
}

fn parse_flag(value: Option<&str>) -> bool {
    value.map(|v| !v.trim().eq_ignore_ascii_case("false")).unwrap_or(true)
}
