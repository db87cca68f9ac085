use std::path::Path;
use std::sync::LazyLock;

use anyhow::Result;
use base64::Engine;
use regex::Regex;
use thiserror::Error;
use tracing::warn;

/// Storefronts reject the default reqwest user agent, so every image fetch
/// goes out with a realistic browser one.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

static INLINE_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^data:image/(?:png|jpeg|jpg);base64,(.*)$").expect("hardcoded pattern is valid")
});

#[derive(Debug, Error)]
enum ImageError {
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("malformed inline image payload")]
    MalformedInlinePayload,

    #[error("base64 decode failed: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

pub fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().user_agent(USER_AGENT).build()?)
}

/// Materialize one image at `folder/filename`, overwriting if present.
/// `source` is either an inline `data:image/...;base64,` payload or a URL
/// (protocol-relative URLs are normalized to https). Every failure is logged
/// and swallowed; callers proceed unconditionally.
pub async fn save_image(
    client: &reqwest::Client,
    source: &str,
    filename: &str,
    folder: &Path,
) -> bool {
    let path = folder.join(filename);
    match persist(client, source, &path).await {
        Ok(()) => match std::fs::metadata(&path) {
            Ok(meta) if meta.len() == 0 => {
                warn!(filename, source, "saved image is zero bytes");
                false
            }
            Ok(_) => true,
            Err(e) => {
                warn!(filename, error = %e, "image file missing after save");
                false
            }
        },
        Err(e) => {
            warn!(filename, source, error = %e, "image save failed");
            false
        }
    }
}

async fn persist(client: &reqwest::Client, source: &str, path: &Path) -> Result<(), ImageError> {
    if source.starts_with("data:image") {
        let bytes = decode_inline(source)?;
        std::fs::write(path, bytes)?;
    } else {
        let url = normalize_protocol_relative(source);
        let response = client.get(&url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        std::fs::write(path, &bytes)?;
    }
    Ok(())
}

fn decode_inline(source: &str) -> Result<Vec<u8>, ImageError> {
    let payload = INLINE_IMAGE
        .captures(source)
        .and_then(|caps| caps.get(1))
        .ok_or(ImageError::MalformedInlinePayload)?;
    Ok(base64::engine::general_purpose::STANDARD.decode(payload.as_str())?)
}

/// `//img.example.com/a.jpg` → `https://img.example.com/a.jpg`.
pub fn normalize_protocol_relative(url: &str) -> String {
    if url.starts_with("//") {
        format!("https:{url}")
    } else {
        url.to_string()
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_relative_gets_https() {
        assert_eq!(
            normalize_protocol_relative("//img.example.com/a.jpg"),
            "https://img.example.com/a.jpg"
        );
        assert_eq!(
            normalize_protocol_relative("https://img.example.com/a.jpg"),
            "https://img.example.com/a.jpg"
        );
    }

    #[test]
    fn inline_payload_decodes() {
        // "hi" in base64
        let bytes = decode_inline("data:image/png;base64,aGk=").unwrap();
        assert_eq!(bytes, b"hi");
    }

    #[test]
    fn inline_payload_bad_subtype_rejected() {
        assert!(matches!(
            decode_inline("data:image/svg+xml;base64,aGk="),
            Err(ImageError::MalformedInlinePayload)
        ));
    }

    #[tokio::test]
    async fn inline_save_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let client = http_client().unwrap();
        let ok = save_image(&client, "data:image/jpeg;base64,aGk=", "1.jpg", dir.path()).await;
        assert!(ok);
        assert_eq!(std::fs::read(dir.path().join("1.jpg")).unwrap(), b"hi");
    }

    #[tokio::test]
    async fn malformed_inline_is_soft_failure() {
        let dir = tempfile::tempdir().unwrap();
        let client = http_client().unwrap();
        let ok = save_image(&client, "data:image/png;base64", "1.jpg", dir.path()).await;
        assert!(!ok);
        assert!(!dir.path().join("1.jpg").exists());
    }
}
