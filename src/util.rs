use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Encodes bytes using the URL-safe Base64 alphabet without padding.
pub fn encode_base64_url<T: AsRef<[u8]>>(data: T) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Decodes a URL-safe Base64 string without padding.
pub fn decode_base64_url(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(data)
}

/// Collapses every run of whitespace into a single space and trims the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Returns `None` for strings that are empty once trimmed.
pub fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_url_alphabet() {
        let input = b"binary\x00payload";
        let encoded = encode_base64_url(input);
        assert!(!encoded.contains('+') && !encoded.contains('/') && !encoded.contains('='));
        let decoded = decode_base64_url(&encoded).unwrap();
        assert_eq!(decoded, input);
    }

    #[test]
    fn whitespace_runs_collapse() {
        assert_eq!(normalize_whitespace("  Mega \n\t Link  "), "Mega Link");
        assert_eq!(normalize_whitespace("   "), "");
    }

    #[test]
    fn non_empty_filters_blank_values() {
        assert_eq!(non_empty(Some("  ".into())), None);
        assert_eq!(non_empty(Some(" x ".into())), Some("x".into()));
        assert_eq!(non_empty(None), None);
    }
}
