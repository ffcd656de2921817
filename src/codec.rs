//! Routing token codec.
//!
//! A [`RoutingContext`] travels between pages as a compact token: the record
//! is serialized as JSON with single-letter keys, compressed with raw DEFLATE
//! and rendered with the URL-safe Base64 alphabet. Links minted before tokens
//! existed carried plain query parameters instead; [`decode`] still accepts
//! those so that previously distributed URLs keep working.

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::{form_urlencoded, Url};

use crate::util::{decode_base64_url, encode_base64_url};

/// Title used when a routing context cannot be recovered.
pub const DEFAULT_TITLE: &str = "Unknown Title";

/// Upper bound on the inflated size of a token, guarding against deflate bombs.
const MAX_INFLATED_BYTES: u64 = 64 * 1024;

/// Navigation state carried from one page to the next.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingContext {
    /// Destination URL or an opaque identifier.
    #[serde(default)]
    pub destination_ref: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_hint: Option<String>,
}

impl RoutingContext {
    /// Context rendered when nothing usable could be decoded.
    pub fn fallback(placeholder_poster: &str) -> Self {
        Self {
            title: DEFAULT_TITLE.to_owned(),
            poster_ref: Some(placeholder_poster.to_owned()),
            ..Self::default()
        }
    }

    /// Returns `true` when the destination is missing and has to be rebuilt
    /// from the content id.
    pub fn needs_reconstruction(&self) -> bool {
        self.destination_ref.trim().is_empty()
    }

    fn has_content_id(&self) -> bool {
        self.content_id
            .as_deref()
            .is_some_and(|id| !id.trim().is_empty())
    }

    fn validated(self) -> Result<Self, DecodeError> {
        if self.needs_reconstruction() && !self.has_content_id() {
            return Err(DecodeError::MissingDestination);
        }

        Ok(self)
    }
}

/// Errors produced while decoding a routing token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("routing token is empty")]
    Empty,

    #[error("routing token is malformed: {reason}")]
    Malformed { reason: String },

    #[error("routing context has neither a destination nor a content id")]
    MissingDestination,

    #[error("no legacy base url configured to rebuild the destination for id `{id}`")]
    Unroutable { id: String },
}

impl DecodeError {
    fn malformed(reason: impl ToString) -> Self {
        Self::Malformed {
            reason: reason.to_string(),
        }
    }
}

/// Errors produced while encoding a routing token.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to serialize routing context: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to compress routing context: {0}")]
    Compress(#[from] std::io::Error),
}

/// On-the-wire form of [`RoutingContext`] with short keys.
#[derive(Debug, Serialize, Deserialize)]
struct WireContext {
    #[serde(rename = "d", default, skip_serializing_if = "String::is_empty")]
    destination: String,
    #[serde(rename = "t", default, skip_serializing_if = "String::is_empty")]
    title: String,
    #[serde(rename = "p", default, skip_serializing_if = "Option::is_none")]
    poster: Option<String>,
    #[serde(rename = "i", default, skip_serializing_if = "Option::is_none")]
    content_id: Option<String>,
    #[serde(rename = "s", default, skip_serializing_if = "Option::is_none")]
    season: Option<String>,
    #[serde(rename = "v", default, skip_serializing_if = "Option::is_none")]
    server: Option<String>,
    #[serde(rename = "q", default, skip_serializing_if = "Option::is_none")]
    quality: Option<String>,
}

impl From<&RoutingContext> for WireContext {
    fn from(context: &RoutingContext) -> Self {
        Self {
            destination: context.destination_ref.clone(),
            title: context.title.clone(),
            poster: context.poster_ref.clone(),
            content_id: context.content_id.clone(),
            season: context.season.clone(),
            server: context.server_hint.clone(),
            quality: context.quality_hint.clone(),
        }
    }
}

impl From<WireContext> for RoutingContext {
    fn from(wire: WireContext) -> Self {
        Self {
            destination_ref: wire.destination,
            title: wire.title,
            poster_ref: wire.poster,
            content_id: wire.content_id,
            season: wire.season,
            server_hint: wire.server,
            quality_hint: wire.quality,
        }
    }
}

/// Encodes a routing context into a URL-safe token.
pub fn encode(context: &RoutingContext) -> Result<String, EncodeError> {
    let json = serde_json::to_vec(&WireContext::from(context))?;
    let mut encoder = DeflateEncoder::new(Vec::with_capacity(json.len()), Compression::best());
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;

    Ok(encode_base64_url(compressed))
}

/// Decodes a routing token, falling back to the legacy parameter forms when
/// the input is not a compact token.
pub fn decode(token: &str) -> Result<RoutingContext, DecodeError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(DecodeError::Empty);
    }

    match decode_compact(token) {
        Ok(context) => context.validated(),
        Err(error) => {
            tracing::debug!(%error, "token is not a compact routing token; trying legacy forms");
            decode_legacy(token).unwrap_or(Err(error))
        }
    }
}

/// Builds a routing context from discrete legacy parameters.
pub fn decode_params<'a, I>(pairs: I) -> Result<RoutingContext, DecodeError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut context = RoutingContext::default();
    let mut recognised = false;

    for (key, value) in pairs {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }

        let slot = match key.to_ascii_lowercase().as_str() {
            "url" | "link" | "d" => {
                context.destination_ref = value.to_owned();
                recognised = true;
                continue;
            }
            "title" | "t" => {
                context.title = value.to_owned();
                recognised = true;
                continue;
            }
            "poster" | "image" | "p" => &mut context.poster_ref,
            "id" | "post_id" | "i" => &mut context.content_id,
            "season" | "s" => &mut context.season,
            "server" | "v" => &mut context.server_hint,
            "quality" | "q" => &mut context.quality_hint,
            _ => continue,
        };

        *slot = Some(value.to_owned());
        recognised = true;
    }

    if !recognised {
        return Err(DecodeError::MissingDestination);
    }

    context.validated()
}

fn decode_compact(token: &str) -> Result<RoutingContext, DecodeError> {
    let compressed = decode_base64_url(token).map_err(DecodeError::malformed)?;

    let mut json = Vec::new();
    DeflateDecoder::new(compressed.as_slice())
        .take(MAX_INFLATED_BYTES)
        .read_to_end(&mut json)
        .map_err(DecodeError::malformed)?;

    let wire: WireContext = serde_json::from_slice(&json).map_err(DecodeError::malformed)?;
    Ok(wire.into())
}

/// Returns `None` when the input does not have any legacy shape.
fn decode_legacy(token: &str) -> Option<Result<RoutingContext, DecodeError>> {
    if let Ok(url) = Url::parse(token) {
        if matches!(url.scheme(), "http" | "https") {
            return Some(Ok(RoutingContext {
                destination_ref: url.into(),
                ..RoutingContext::default()
            }));
        }
    }

    if token.chars().all(|c| c.is_ascii_digit()) {
        return Some(Ok(RoutingContext {
            content_id: Some(token.to_owned()),
            ..RoutingContext::default()
        }));
    }

    let query = token.strip_prefix('?').unwrap_or(token);
    if !query.contains('=') {
        return None;
    }

    let pairs: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    Some(decode_params(
        pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())),
    ))
}

/// Codec settings that depend on deployment configuration.
#[derive(Debug, Clone)]
pub struct Codec {
    legacy_base_url: Option<String>,
    placeholder_poster: String,
}

impl Codec {
    pub fn new(legacy_base_url: Option<String>, placeholder_poster: impl Into<String>) -> Self {
        Self {
            legacy_base_url,
            placeholder_poster: placeholder_poster.into(),
        }
    }

    pub fn placeholder_poster(&self) -> &str {
        &self.placeholder_poster
    }

    /// Context used when decoding failed.
    pub fn fallback_context(&self) -> RoutingContext {
        RoutingContext::fallback(&self.placeholder_poster)
    }

    /// Fills in display defaults for fields the token left blank.
    pub fn with_defaults(&self, mut context: RoutingContext) -> RoutingContext {
        if context.title.trim().is_empty() {
            context.title = DEFAULT_TITLE.to_owned();
        }
        if context.poster_ref.as_deref().map_or(true, |p| p.trim().is_empty()) {
            context.poster_ref = Some(self.placeholder_poster.clone());
        }
        context
    }

    /// Resolves the URL the hop chain starts from.
    ///
    /// Absolute `http(s)` destinations are used as-is. Anything else is an
    /// opaque id that is appended to the legacy base URL.
    pub fn start_url(&self, context: &RoutingContext) -> Result<Url, DecodeError> {
        let destination = context.destination_ref.trim();
        if let Ok(url) = Url::parse(destination) {
            if matches!(url.scheme(), "http" | "https") {
                return Ok(url);
            }
        }

        let id = if destination.is_empty() {
            context
                .content_id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .ok_or(DecodeError::MissingDestination)?
        } else {
            destination
        };

        let base = self
            .legacy_base_url
            .as_deref()
            .ok_or_else(|| DecodeError::Unroutable { id: id.to_owned() })?;
        let encoded: String = form_urlencoded::byte_serialize(id.as_bytes()).collect();

        Url::parse(&format!("{base}{encoded}")).map_err(DecodeError::malformed)
    }
}
