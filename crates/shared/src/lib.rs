pub mod events;

pub mod settings {
    use std::env;
    use std::fmt::Display;
    use std::path::PathBuf;
    use std::str::FromStr;
    use std::time::Duration;

    pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
    pub const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";
    pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

    #[derive(Debug, thiserror::Error)]
    pub enum SettingsError {
        #[error("Invalid value for {key}: {message}")]
        InvalidValue { key: &'static str, message: String },
    }

    /// Runtime configuration for the relay server, read from the environment.
    #[derive(Debug, Clone)]
    pub struct RelaySettings {
        pub host: String,
        pub port: u16,
        /// Checked per chat request, not at startup.
        pub openai_api_key: Option<String>,
        pub openai_base_url: String,
        pub openai_model: String,
        pub temperature: f32,
        pub system_prompt: String,
        pub upload_dir: PathBuf,
        pub public_dir: PathBuf,
        pub max_upload_bytes: usize,
        /// Bound on a single upstream read. `None` waits indefinitely.
        pub upstream_read_timeout: Option<Duration>,
    }

    impl Default for RelaySettings {
        fn default() -> Self {
            Self {
                host: "0.0.0.0".into(),
                port: 3000,
                openai_api_key: None,
                openai_base_url: DEFAULT_OPENAI_BASE_URL.into(),
                openai_model: DEFAULT_OPENAI_MODEL.into(),
                temperature: 0.7,
                system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
                upload_dir: PathBuf::from("uploads"),
                public_dir: PathBuf::from("public"),
                max_upload_bytes: 20 * 1024 * 1024,
                upstream_read_timeout: None,
            }
        }
    }

    impl RelaySettings {
        pub fn from_env() -> Result<Self, SettingsError> {
            Self::from_lookup(|key| env::var(key).ok())
        }

        /// Build settings from any key lookup, falling back to defaults for
        /// missing or empty values.
        pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
        where
            F: Fn(&str) -> Option<String>,
        {
            let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
            let defaults = Self::default();

            let openai_base_url = match get("OPENAI_BASE_URL") {
                Some(raw) => {
                    url::Url::parse(&raw).map_err(|e| SettingsError::InvalidValue {
                        key: "OPENAI_BASE_URL",
                        message: e.to_string(),
                    })?;
                    raw.trim_end_matches('/').to_string()
                }
                None => defaults.openai_base_url,
            };

            let upstream_read_timeout = get("UPSTREAM_READ_TIMEOUT_SECS")
                .map(|raw| parse_value::<u64>("UPSTREAM_READ_TIMEOUT_SECS", &raw))
                .transpose()?
                .map(Duration::from_secs);

            Ok(Self {
                host: get("HOST").unwrap_or(defaults.host),
                port: get("PORT")
                    .map(|raw| parse_value("PORT", &raw))
                    .transpose()?
                    .unwrap_or(defaults.port),
                openai_api_key: get("OPENAI_API_KEY"),
                openai_base_url,
                openai_model: get("OPENAI_MODEL").unwrap_or(defaults.openai_model),
                temperature: get("OPENAI_TEMPERATURE")
                    .map(|raw| parse_value("OPENAI_TEMPERATURE", &raw))
                    .transpose()?
                    .unwrap_or(defaults.temperature),
                system_prompt: get("SYSTEM_PROMPT").unwrap_or(defaults.system_prompt),
                upload_dir: get("UPLOAD_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.upload_dir),
                public_dir: get("PUBLIC_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.public_dir),
                max_upload_bytes: get("MAX_UPLOAD_BYTES")
                    .map(|raw| parse_value("MAX_UPLOAD_BYTES", &raw))
                    .transpose()?
                    .unwrap_or(defaults.max_upload_bytes),
                upstream_read_timeout,
            })
        }
    }

    fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, SettingsError>
    where
        T: FromStr,
        T::Err: Display,
    {
        raw.trim()
            .parse()
            .map_err(|e: T::Err| SettingsError::InvalidValue {
                key,
                message: e.to_string(),
            })
    }
}

pub mod agent_api {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ChatMessage {
        pub role: String, // "system" | "user" | "assistant"
        pub content: String,
    }

    impl ChatMessage {
        pub fn system(content: impl Into<String>) -> Self {
            Self {
                role: "system".into(),
                content: content.into(),
            }
        }

        pub fn user(content: impl Into<String>) -> Self {
            Self {
                role: "user".into(),
                content: content.into(),
            }
        }
    }

    /// Body of a client chat request. Both fields are optional, but at least
    /// one must be non-empty.
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct ChatRequest {
        #[serde(default)]
        pub message: Option<String>,
        /// Relative path of a previous upload, e.g. `/uploads/3f2a...`.
        #[serde(default)]
        pub image: Option<String>,
    }

    impl ChatRequest {
        pub fn is_empty(&self) -> bool {
            let blank = |v: &Option<String>| v.as_deref().map_or(true, str::is_empty);
            blank(&self.message) && blank(&self.image)
        }

        /// Text sent upstream as the user turn. An image reference is appended
        /// as an absolute URL on its own line.
        pub fn user_content(&self, host_url: &str) -> String {
            let mut content = self.message.clone().unwrap_or_default();
            if let Some(image) = self.image.as_deref().filter(|i| !i.is_empty()) {
                content.push_str(&format!("\n[Image]: {}{}", host_url, image));
            }
            content
        }
    }

    /// Structured error returned to the client instead of a stream.
    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct ErrorBody {
        pub error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub details: Option<String>,
    }

    impl ErrorBody {
        pub fn new(error: impl Into<String>) -> Self {
            Self {
                error: error.into(),
                details: None,
            }
        }

        pub fn with_details(mut self, details: impl Into<String>) -> Self {
            self.details = Some(details.into());
            self
        }
    }
}
