use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

pub const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Outbound images travel as PNG data URIs.
pub fn encode_png_data_uri(bytes: &[u8]) -> String {
    format!("{PNG_DATA_URI_PREFIX}{}", BASE64.encode(bytes))
}

/// Drops a leading `data:<mime>;base64,` marker if there is one.
pub fn strip_data_uri(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("data:") {
        if let Some((header, payload)) = rest.split_once(',') {
            if header.ends_with(";base64") {
                return payload;
            }
        }
    }
    trimmed
}

pub fn decode_base64_image(raw: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64.decode(strip_data_uri(raw).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_uri_prefix_is_added_and_stripped() -> anyhow::Result<()> {
        let bytes = b"\x89PNG\r\n\x1a\nfake".to_vec();
        let encoded = encode_png_data_uri(&bytes);
        assert!(encoded.starts_with(PNG_DATA_URI_PREFIX));
        assert_eq!(decode_base64_image(&encoded)?, bytes);
        assert_eq!(decode_base64_image(&encode_base64(&bytes))?, bytes);
        Ok(())
    }

    #[test]
    fn other_mime_prefixes_are_stripped_too() {
        assert_eq!(strip_data_uri("data:image/jpeg;base64,QUJD"), "QUJD");
        assert_eq!(strip_data_uri("  QUJD \n"), "QUJD");
        assert_eq!(strip_data_uri("data:text/plain,hello"), "data:text/plain,hello");
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(decode_base64_image("data:image/png;base64,***").is_err());
    }
}
