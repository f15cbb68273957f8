use std::error::Error;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::agents::cancellation::TaskRegistry;
use crate::agents::orchestrator::ConversationOrchestrator;
use crate::agents::preprocessor::ImagePreprocessor;
use crate::agents::state::StateStore;
use crate::gateway::{AzureGateway, PollPolicy, ServiceGateway};
use crate::storage::{ImageProcessor, PreviewStore};
use crate::types::FileSize;

type InitResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub static_dir: Option<PathBuf>,
    pub max_upload: FileSize,
}

impl Config {
    pub fn from_env() -> InitResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<L>(lookup: L) -> InitResult<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let max_upload_mb: u64 = parse_or(&lookup, "MAX_UPLOAD_MB", 10)?;
        let max_upload = FileSize::try_megabytes(max_upload_mb)
            .filter(|size| usize::try_from(size.as_bytes()).is_ok())
            .ok_or_else(|| format!("invalid MAX_UPLOAD_MB ({}): too large", max_upload_mb))?;

        Ok(Self {
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&lookup, "PORT", 3000)?,
            static_dir: lookup("STATIC_DIR").map(PathBuf::from),
            max_upload,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AiConfig {
    pub openai_endpoint: String,
    pub openai_api_key: String,
    pub chat_deployment: String,
    pub chat_api_version: String,
    pub image_deployment: String,
    pub image_api_version: String,
    pub vision_endpoint: String,
    pub vision_api_key: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub image_size: String,
    pub request_timeout: Duration,
    pub poll: PollPolicy,
}

impl AiConfig {
    pub fn from_env() -> InitResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<L>(lookup: L) -> InitResult<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let max_attempts: u32 = parse_or(&lookup, "READ_MAX_POLL_ATTEMPTS", 60)?;

        Ok(Self {
            openai_endpoint: trim_trailing_slash(required(&lookup, "OPENAI_ENDPOINT")?),
            openai_api_key: required(&lookup, "OPENAI_API_KEY")?,
            chat_deployment: lookup("CHAT_DEPLOYMENT").unwrap_or_else(|| "gpt-4o".to_string()),
            chat_api_version: lookup("CHAT_API_VERSION")
                .unwrap_or_else(|| "2024-08-01-preview".to_string()),
            image_deployment: lookup("IMAGE_DEPLOYMENT")
                .unwrap_or_else(|| "dall-e-3".to_string()),
            image_api_version: lookup("IMAGE_API_VERSION")
                .unwrap_or_else(|| "2024-02-01".to_string()),
            vision_endpoint: trim_trailing_slash(required(&lookup, "VISION_ENDPOINT")?),
            vision_api_key: required(&lookup, "VISION_API_KEY")?,
            temperature: parse_or(&lookup, "TEMPERATURE", 0.7)?,
            top_p: parse_or(&lookup, "TOP_P", 0.95)?,
            max_tokens: parse_or(&lookup, "MAX_TOKENS", 3000)?,
            image_size: lookup("IMAGE_SIZE").unwrap_or_else(|| "1024x1024".to_string()),
            request_timeout: Duration::from_secs(parse_or(&lookup, "REQUEST_TIMEOUT_SECS", 120)?),
            poll: PollPolicy {
                interval: Duration::from_millis(parse_or(&lookup, "READ_POLL_INTERVAL_MS", 1000)?),
                // 0 disables the bound.
                max_attempts: (max_attempts > 0).then_some(max_attempts),
            },
        })
    }

    pub fn chat_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.openai_endpoint, self.chat_deployment, self.chat_api_version
        )
    }

    pub fn image_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/images/generations?api-version={}",
            self.openai_endpoint, self.image_deployment, self.image_api_version
        )
    }

    pub fn analyze_url(&self) -> String {
        format!(
            "{}/vision/v3.2/analyze?visualFeatures=Description",
            self.vision_endpoint
        )
    }

    pub fn read_url(&self) -> String {
        format!("{}/vision/v3.2/read/analyze", self.vision_endpoint)
    }
}

fn required<L>(lookup: &L, key: &str) -> InitResult<String>
where
    L: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| format!("missing required setting {}", key).into())
}

fn parse_or<L, T>(lookup: &L, key: &str, default: T) -> InitResult<T>
where
    L: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| format!("invalid {} ({:?}): {}", key, raw, e).into()),
        None => Ok(default),
    }
}

fn trim_trailing_slash(mut base: String) -> String {
    while base.ends_with('/') {
        base.pop();
    }
    base
}

// ============================================================================
// Application state
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<StateStore>,
    pub previews: Arc<PreviewStore>,
    pub preprocessor: Arc<ImagePreprocessor>,
    pub orchestrator: Arc<ConversationOrchestrator>,
}

impl AppState {
    pub fn new(gateway: Arc<dyn ServiceGateway>, max_upload: FileSize) -> Self {
        let store = Arc::new(StateStore::default());
        let previews = Arc::new(PreviewStore::new());
        let analyses = Arc::new(TaskRegistry::new());

        let preprocessor = Arc::new(ImagePreprocessor::new(
            gateway.clone(),
            store.clone(),
            previews.clone(),
            analyses.clone(),
            ImageProcessor::new(max_upload),
        ));
        let orchestrator = Arc::new(ConversationOrchestrator::new(
            gateway,
            store.clone(),
            analyses,
        ));

        Self {
            store,
            previews,
            preprocessor,
            orchestrator,
        }
    }
}

pub async fn app_init() -> InitResult<(Config, Arc<AppState>)> {
    let config = Config::from_env()?;
    log::info!("✅ Configuration loaded");
    let ai_config = AiConfig::from_env()?;
    log::info!("✅ Ai Configuration loaded");
    log::info!(
        "⏱️  Read polling every {:?}, max attempts {:?}",
        ai_config.poll.interval,
        ai_config.poll.max_attempts
    );

    let gateway = AzureGateway::new(ai_config)?;
    log::info!("✅ Service gateway ready");

    let state = Arc::new(AppState::new(Arc::new(gateway), config.max_upload));
    Ok((config, state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("OPENAI_ENDPOINT", "https://meow.openai.azure.com/"),
        ("OPENAI_API_KEY", "k1"),
        ("VISION_ENDPOINT", "https://meow.cognitiveservices.azure.com"),
        ("VISION_API_KEY", "k2"),
    ];

    #[test]
    fn ai_config_defaults() {
        let config = AiConfig::from_lookup(lookup(REQUIRED)).unwrap();
        assert_eq!(config.temperature, 0.7);
        assert_eq!(config.top_p, 0.95);
        assert_eq!(config.max_tokens, 3000);
        assert_eq!(config.image_size, "1024x1024");
        assert_eq!(config.poll, PollPolicy::default());
        assert_eq!(
            config.chat_url(),
            "https://meow.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-08-01-preview"
        );
        assert_eq!(
            config.read_url(),
            "https://meow.cognitiveservices.azure.com/vision/v3.2/read/analyze"
        );
    }

    #[test]
    fn ai_config_requires_endpoints() {
        let err = AiConfig::from_lookup(lookup(&REQUIRED[1..])).unwrap_err();
        assert!(err.to_string().contains("OPENAI_ENDPOINT"));
    }

    #[test]
    fn poll_bound_is_configurable() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("READ_MAX_POLL_ATTEMPTS", "0"));
        pairs.push(("READ_POLL_INTERVAL_MS", "250"));
        let config = AiConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.poll.max_attempts, None);
        assert_eq!(config.poll.interval, Duration::from_millis(250));

        pairs.push(("TEMPERATURE", "warm"));
        let err = AiConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(err.to_string().contains("TEMPERATURE"));
    }

    #[test]
    fn server_config_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.max_upload, FileSize::megabytes(10));
        assert!(config.static_dir.is_none());
    }

    #[test]
    fn oversized_upload_limit_is_rejected() {
        let err = Config::from_lookup(lookup(&[("MAX_UPLOAD_MB", "18446744073709551615")]))
            .unwrap_err();
        assert!(err.to_string().contains("MAX_UPLOAD_MB"));

        let config = Config::from_lookup(lookup(&[("MAX_UPLOAD_MB", "25")])).unwrap();
        assert_eq!(config.max_upload.as_bytes(), 25 * 1024 * 1024);
    }
}
