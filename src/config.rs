use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config as config_rs;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::classify::HostTier;

/// Upper bound accepted for `resolver.max_hops`.
pub const HARD_MAX_HOPS: usize = 8;

/// Prefix for environment overrides, e.g. `LINKHOP__RESOLVER__MAX_HOPS=3`.
pub const ENV_PREFIX: &str = "LINKHOP";

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub resolver: ResolverConfig,
    pub classifier: ClassifierConfig,
    pub codec: CodecConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub max_hops: usize,
    pub hop_timeout: Duration,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_http_redirects: usize,
    pub user_agent: String,
    pub retry: RetryConfig,
    pub variable_names: Vec<String>,
    pub token_keys: Vec<String>,
    pub title_selectors: Vec<String>,
    pub archive_extensions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: NonZeroU32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: f64,
}

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub button_selector: String,
    pub section_selector: String,
    pub exclusions: Vec<String>,
    pub hosts: Vec<HostRuleConfig>,
    pub blacklist: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct HostRuleConfig {
    pub name: String,
    pub pattern: String,
    pub tier: HostTier,
}

#[derive(Debug, Clone)]
pub struct CodecConfig {
    pub legacy_base_url: Option<String>,
    pub placeholder_poster: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found at {path:?}")]
    NotFound { path: PathBuf },

    #[error("failed to load configuration from {path:?}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: config_rs::ConfigError,
    },

    #[error("configuration validation error at {context}: {message}")]
    Validation { context: String, message: String },
}

impl Config {
    /// Loads the YAML file at `path`, applying `LINKHOP__*` environment
    /// overrides on top.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let settings = config_rs::Config::builder()
            .add_source(config_rs::File::from(path))
            .add_source(
                config_rs::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|source| load_error(path, source))?;

        let raw: RawConfig = settings
            .try_deserialize()
            .map_err(|source| load_error(path, source))?;

        raw.try_into()
    }

    /// Parses configuration from an in-memory YAML document.
    pub fn from_yaml_str(document: &str) -> Result<Self, ConfigError> {
        let settings = config_rs::Config::builder()
            .add_source(config_rs::File::from_str(
                document,
                config_rs::FileFormat::Yaml,
            ))
            .build()
            .map_err(|source| load_error(Path::new("<inline>"), source))?;

        let raw: RawConfig = settings
            .try_deserialize()
            .map_err(|source| load_error(Path::new("<inline>"), source))?;

        raw.try_into()
    }
}

impl Default for Config {
    fn default() -> Self {
        RawConfig::default()
            .try_into()
            .unwrap_or_else(|error| panic!("built-in defaults must validate: {error}"))
    }
}

fn load_error(path: &Path, source: config_rs::ConfigError) -> ConfigError {
    ConfigError::Load {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawConfig {
    server: RawServer,
    resolver: RawResolver,
    classifier: RawClassifier,
    codec: RawCodec,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawServer {
    host: String,
    port: u16,
}

impl Default for RawServer {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawResolver {
    max_hops: usize,
    hop_timeout_ms: u64,
    connect_timeout_ms: u64,
    request_timeout_ms: u64,
    max_http_redirects: usize,
    user_agent: String,
    retry: RawRetry,
    variable_names: Vec<String>,
    token_keys: Vec<String>,
    title_selectors: Vec<String>,
    archive_extensions: Vec<String>,
}

impl Default for RawResolver {
    fn default() -> Self {
        Self {
            max_hops: 2,
            hop_timeout_ms: 5_000,
            connect_timeout_ms: 3_000,
            request_timeout_ms: 20_000,
            max_http_redirects: 5,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
                         Chrome/124.0 Safari/537.36"
                .into(),
            retry: RawRetry::default(),
            variable_names: strings(&["url", "redirect_url", "link", "target"]),
            token_keys: strings(&["token"]),
            title_selectors: strings(&["h1", "title"]),
            archive_extensions: strings(&[".zip", ".rar", ".7z"]),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawRetry {
    max_attempts: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter: f64,
}

impl Default for RawRetry {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 200,
            max_delay_ms: 2_000,
            jitter: 0.2,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawClassifier {
    button_selector: String,
    section_selector: String,
    exclusions: Vec<String>,
    hosts: Vec<RawHostRule>,
    blacklist: Vec<String>,
}

impl Default for RawClassifier {
    fn default() -> Self {
        Self {
            button_selector: "a.maxbutton, a.button, a.btn".into(),
            section_selector: "h1, h2, h3, h4, h5, h6".into(),
            exclusions: strings(&[r"(?i)telegram|t\.me/|discord|whatsapp"]),
            hosts: vec![
                RawHostRule::new("G-Drive", r"(?i)drive\.google\.com", HostTier::Preferred),
                RawHostRule::new("PixelDrain", r"(?i)pixeldrain\.", HostTier::Preferred),
                RawHostRule::new("Mega", r"(?i)mega\.(?:nz|io)", HostTier::Trusted),
                RawHostRule::new("GoFile", r"(?i)gofile\.io", HostTier::Trusted),
                RawHostRule::new("1Fichier", r"(?i)1fichier\.com", HostTier::Trusted),
            ],
            blacklist: strings(&[r"(?i)ouo\.(?:io|press)", r"(?i)linkvertise", r"(?i)shrinkme"]),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawHostRule {
    name: String,
    pattern: String,
    tier: HostTier,
}

impl RawHostRule {
    fn new(name: &str, pattern: &str, tier: HostTier) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
            tier,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawCodec {
    legacy_base_url: Option<String>,
    placeholder_poster: String,
}

impl Default for RawCodec {
    fn default() -> Self {
        Self {
            legacy_base_url: None,
            placeholder_poster: "/static/placeholder-poster.png".into(),
        }
    }
}

impl TryFrom<RawConfig> for Config {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            server: parse_server(raw.server)?,
            resolver: parse_resolver(raw.resolver)?,
            classifier: parse_classifier(raw.classifier)?,
            codec: parse_codec(raw.codec)?,
        })
    }
}

fn parse_server(raw: RawServer) -> Result<ServerConfig, ConfigError> {
    if raw.host.trim().is_empty() {
        return Err(validation_error("server.host", "host must not be empty"));
    }

    Ok(ServerConfig {
        host: raw.host.trim().to_owned(),
        port: raw.port,
    })
}

fn parse_resolver(raw: RawResolver) -> Result<ResolverConfig, ConfigError> {
    if raw.max_hops > HARD_MAX_HOPS {
        return Err(validation_error(
            "resolver.max_hops",
            format!("must not exceed {HARD_MAX_HOPS}"),
        ));
    }

    let hop_timeout = duration_from_millis(raw.hop_timeout_ms, "resolver.hop_timeout_ms")?;
    let connect_timeout =
        duration_from_millis(raw.connect_timeout_ms, "resolver.connect_timeout_ms")?;
    let request_timeout =
        duration_from_millis(raw.request_timeout_ms, "resolver.request_timeout_ms")?;
    if request_timeout < hop_timeout {
        return Err(validation_error(
            "resolver.request_timeout_ms",
            "must be at least hop_timeout_ms",
        ));
    }

    if raw.user_agent.trim().is_empty() {
        return Err(validation_error(
            "resolver.user_agent",
            "user agent must not be empty",
        ));
    }

    let variable_names = trimmed_list(raw.variable_names);
    if variable_names.is_empty() {
        return Err(validation_error(
            "resolver.variable_names",
            "at least one variable name must be configured",
        ));
    }
    if let Some(invalid) = variable_names
        .iter()
        .find(|name| !is_identifier(name.as_str()))
    {
        return Err(validation_error(
            "resolver.variable_names",
            format!("`{invalid}` is not a valid script identifier"),
        ));
    }

    let token_keys = trimmed_list(raw.token_keys);
    if token_keys.is_empty() {
        return Err(validation_error(
            "resolver.token_keys",
            "at least one token query key must be configured",
        ));
    }

    let title_selectors = trimmed_list(raw.title_selectors);
    if title_selectors.is_empty() {
        return Err(validation_error(
            "resolver.title_selectors",
            "at least one title selector must be configured",
        ));
    }

    let mut archive_extensions = Vec::with_capacity(raw.archive_extensions.len());
    for extension in trimmed_list(raw.archive_extensions) {
        if !extension.starts_with('.') || extension.len() < 2 {
            return Err(validation_error(
                "resolver.archive_extensions",
                format!("`{extension}` must look like `.zip`"),
            ));
        }
        archive_extensions.push(extension.to_ascii_lowercase());
    }

    Ok(ResolverConfig {
        max_hops: raw.max_hops,
        hop_timeout,
        connect_timeout,
        request_timeout,
        max_http_redirects: raw.max_http_redirects,
        user_agent: raw.user_agent.trim().to_owned(),
        retry: parse_retry(raw.retry)?,
        variable_names,
        token_keys,
        title_selectors,
        archive_extensions,
    })
}

fn parse_retry(raw: RawRetry) -> Result<RetryConfig, ConfigError> {
    let max_attempts = NonZeroU32::new(raw.max_attempts).ok_or_else(|| {
        validation_error(
            "resolver.retry.max_attempts",
            "must be at least 1 (1 disables retries)",
        )
    })?;

    if !(0.0..=1.0).contains(&raw.jitter) {
        return Err(validation_error(
            "resolver.retry.jitter",
            "jitter must be between 0.0 and 1.0",
        ));
    }

    let base_delay = duration_from_millis(raw.base_delay_ms, "resolver.retry.base_delay_ms")?;
    let max_delay = duration_from_millis(raw.max_delay_ms, "resolver.retry.max_delay_ms")?;

    Ok(RetryConfig {
        max_attempts,
        base_delay,
        max_delay,
        jitter: raw.jitter,
    })
}

fn parse_classifier(raw: RawClassifier) -> Result<ClassifierConfig, ConfigError> {
    if raw.button_selector.trim().is_empty() {
        return Err(validation_error(
            "classifier.button_selector",
            "selector must not be empty",
        ));
    }

    let mut hosts = Vec::with_capacity(raw.hosts.len());
    for (idx, rule) in raw.hosts.into_iter().enumerate() {
        let context = format!("classifier.hosts[{idx}]");
        if rule.name.trim().is_empty() {
            return Err(validation_error(
                format!("{context}.name"),
                "host rule name must not be empty",
            ));
        }
        if rule.pattern.trim().is_empty() {
            return Err(validation_error(
                format!("{context}.pattern"),
                "host rule pattern must not be empty",
            ));
        }
        if !rule.tier.is_elevated() {
            return Err(validation_error(
                format!("{context}.tier"),
                "host rules may only assign `preferred` or `trusted`",
            ));
        }

        hosts.push(HostRuleConfig {
            name: rule.name.trim().to_owned(),
            pattern: rule.pattern,
            tier: rule.tier,
        });
    }

    Ok(ClassifierConfig {
        button_selector: raw.button_selector.trim().to_owned(),
        section_selector: raw.section_selector.trim().to_owned(),
        exclusions: trimmed_list(raw.exclusions),
        hosts,
        blacklist: trimmed_list(raw.blacklist),
    })
}

fn parse_codec(raw: RawCodec) -> Result<CodecConfig, ConfigError> {
    let legacy_base_url = match raw.legacy_base_url.map(|value| value.trim().to_owned()) {
        Some(value) if value.is_empty() => None,
        Some(value) => {
            Url::parse(&value).map_err(|err| {
                validation_error("codec.legacy_base_url", format!("invalid URL: {err}"))
            })?;
            Some(value)
        }
        None => None,
    };

    Ok(CodecConfig {
        legacy_base_url,
        placeholder_poster: raw.placeholder_poster.trim().to_owned(),
    })
}

fn duration_from_millis(value: u64, context: &str) -> Result<Duration, ConfigError> {
    if value == 0 {
        return Err(validation_error(
            context,
            "duration must be greater than zero",
        ));
    }

    Ok(Duration::from_millis(value))
}

fn trimmed_list(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .collect()
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_owned()).collect()
}

fn validation_error(context: impl Into<String>, message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        context: context.into(),
        message: message.into(),
    }
}
