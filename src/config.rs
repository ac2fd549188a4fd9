//! # Configuration Management
//!
//! Loads the bridge configuration once at startup from multiple sources:
//! - Default values (built into the code)
//! - TOML configuration file (config.toml, optional)
//! - Environment variables with the `APP_` prefix (`APP_REALTIME__VOICE=shimmer`)
//! - Well-known deployment variables: `HOST`, `PORT`, `OPENAI_API_KEY`, `OPENAI_MODEL`
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Well-known deployment variables
//! 2. `APP_` prefixed environment variables
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! The resulting `AppConfig` is immutable for the life of the process and is
//! shared with every call through `AppState`.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub realtime: RealtimeConfig,
    pub audio: AudioConfig,
    pub bridge: BridgeConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "0.0.0.0"`: Accept connections from the telephony provider
/// - `port = 5050`: Port the media-stream endpoint listens on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Upstream realtime speech model settings.
///
/// ## Fields:
/// - `api_key`: Bearer credential; `None` starts the server in degraded mode
/// - `model`: Model name appended to the connection URL as `?model=`
/// - `base_url`: WebSocket endpoint without query string
/// - `beta_header`: Value sent in the `OpenAI-Beta` header
/// - `voice`, `instructions`: Persona of the synthesized speaker
/// - `greeting`: Instruction for the first response, sent before the caller speaks
/// - `vad_*`: Server-side turn detection; `vad_silence_duration_ms` ends the caller's turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub beta_header: String,
    pub voice: String,
    pub instructions: String,
    pub greeting: String,
    pub modalities: Vec<String>,
    pub vad_threshold: f32,
    pub vad_prefix_padding_ms: u32,
    pub vad_silence_duration_ms: u32,
    /// Upper bound on the upstream handshake; 0 disables the timeout
    pub connect_timeout_secs: u64,
}

/// Audio pipeline settings.
///
/// The 160-byte telephony frame is a wire contract and lives in
/// `audio::framing::MULAW_FRAME_BYTES`, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Sample rate of PCM16 audio exchanged with the model (24kHz)
    pub upstream_sample_rate: u32,
    /// Sample rate of μ-law audio exchanged with the telephony provider (8kHz)
    pub telephony_sample_rate: u32,
    /// How much synthesized audio is held while waiting for the telephony `start`
    pub pending_audio_ms: u32,
}

/// Per-call bridge behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Forward caller audio to the model (full duplex)
    pub forward_caller_audio: bool,
    /// Clear queued playback when the model detects the caller speaking
    pub barge_in: bool,
    /// Maximum number of simultaneous calls before upgrades are refused
    pub max_concurrent_calls: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 5050,
            },
            realtime: RealtimeConfig {
                api_key: None,
                model: "gpt-4o-realtime-preview-2024-10-01".to_string(),
                base_url: "wss://api.openai.com/v1/realtime".to_string(),
                beta_header: "realtime=v1".to_string(),
                voice: "alloy".to_string(),
                instructions: "You are a helpful and friendly AI assistant speaking with a caller \
                               over the phone. Keep your answers short and conversational."
                    .to_string(),
                greeting: "Greet the caller and ask how you can help them today.".to_string(),
                modalities: vec!["audio".to_string()],
                vad_threshold: 0.5,
                vad_prefix_padding_ms: 300,
                vad_silence_duration_ms: 500,
                connect_timeout_secs: 10,
            },
            audio: AudioConfig {
                upstream_sample_rate: 24_000,
                telephony_sample_rate: 8_000,
                pending_audio_ms: 2_000,
            },
            bridge: BridgeConfig {
                forward_caller_audio: true,
                barge_in: true,
                max_concurrent_calls: 50,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=8080`: Override server port
    /// - `APP_REALTIME__VOICE=shimmer`: Override the synthesized voice
    /// - `APP_BRIDGE__BARGE_IN=false`: Disable barge-in
    /// - `OPENAI_API_KEY=sk-...`: Upstream credential
    /// - `PORT=3000`: Special case for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(key) = env::var("OPENAI_API_KEY") {
            if !key.trim().is_empty() {
                settings = settings.set_override("realtime.api_key", key)?;
            }
        }

        if let Ok(model) = env::var("OPENAI_MODEL") {
            settings = settings.set_override("realtime.model", model)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// A missing credential is deliberately not an error here: the server
    /// still starts and each call fails its upstream handshake instead.
    /// Use `has_credential()` to warn about it.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.realtime.model.trim().is_empty() {
            return Err(anyhow::anyhow!("Realtime model name cannot be empty"));
        }

        let base_url = url::Url::parse(&self.realtime.base_url)
            .map_err(|e| anyhow::anyhow!("Invalid realtime base URL {}: {}", self.realtime.base_url, e))?;
        if !matches!(base_url.scheme(), "ws" | "wss") {
            return Err(anyhow::anyhow!(
                "Realtime base URL must use ws:// or wss://, got {}",
                base_url.scheme()
            ));
        }

        let audio = &self.audio;
        if audio.upstream_sample_rate == 0 || audio.telephony_sample_rate == 0 {
            return Err(anyhow::anyhow!("Sample rates must be greater than 0"));
        }

        if audio.upstream_sample_rate < audio.telephony_sample_rate
            || audio.upstream_sample_rate % audio.telephony_sample_rate != 0
        {
            return Err(anyhow::anyhow!(
                "Upstream sample rate {} must be an integer multiple of telephony sample rate {}",
                audio.upstream_sample_rate,
                audio.telephony_sample_rate
            ));
        }

        if self.bridge.max_concurrent_calls == 0 {
            return Err(anyhow::anyhow!("Max concurrent calls must be greater than 0"));
        }

        Ok(())
    }

    /// Whether an upstream credential is configured.
    pub fn has_credential(&self) -> bool {
        self.realtime
            .api_key
            .as_deref()
            .map(|key| !key.trim().is_empty())
            .unwrap_or(false)
    }

    /// Configuration rendered for the `/api/v1/config` endpoint, credential masked.
    pub fn redacted(&self) -> serde_json::Result<serde_json::Value> {
        let mut value = serde_json::to_value(self)?;
        if let Some(key) = value.pointer_mut("/realtime/api_key") {
            if !key.is_null() {
                *key = serde_json::Value::String("***".to_string());
            }
        }
        Ok(value)
    }

    /// Capacity of the pre-`start` audio buffer in μ-law bytes (one byte per sample).
    pub fn pending_audio_bytes(&self) -> usize {
        self.audio.pending_audio_ms as usize * self.audio.telephony_sample_rate as usize / 1000
    }
}
