// External identity-proof verification: fetches the user's paste page over
// HTTPS, extracts the JSON payload the page injects into its HTML, and
// checks that the paste author matches the claimed UID and that the paste
// text contains the configured validation sentence.
//
// This is a best-effort outbound call with a short timeout; it must never
// run under any world lock.

use anyhow::{anyhow, Context};

/// Why a proof did not verify. `Unavailable` maps to 503 at the API layer,
/// everything else to a plain login failure.
#[derive(Debug)]
pub enum VerifyError {
    /// The proof is wrong: bad uid/paste format, author mismatch, missing
    /// validation sentence, paste not found.
    Invalid(String),
    /// The paste service could not be reached in time.
    Unavailable(String),
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyError::Invalid(msg) => write!(f, "proof invalid: {msg}"),
            VerifyError::Unavailable(msg) => write!(f, "proof service unavailable: {msg}"),
        }
    }
}

pub struct PasteVerifier {
    http: reqwest::Client,
    base_url: String,
    validation_text: String,
    universal_paste: Option<String>,
}

impl PasteVerifier {
    pub fn new(
        validation_text: String,
        universal_paste: Option<String>,
        timeout_secs: u64,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent("Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36")
            .build()
            .expect("failed to build HTTP client");
        PasteVerifier {
            http,
            base_url: "https://www.luogu.com".to_string(),
            validation_text,
            universal_paste,
        }
    }

    /// Point the verifier at a different paste host (tests).
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    /// Verify that `paste` proves ownership of `uid`.
    pub async fn verify(&self, uid: &str, paste: &str) -> Result<(), VerifyError> {
        // Universal bypass: when configured, a matching paste value passes
        // without external verification.
        if let Some(universal) = &self.universal_paste {
            if paste == universal {
                tracing::info!(uid, "universal paste accepted");
                return Ok(());
            }
        }

        if !is_valid_uid(uid) {
            return Err(VerifyError::Invalid("malformed uid".into()));
        }
        if paste.is_empty() || paste.len() > 50 {
            return Err(VerifyError::Invalid("malformed paste id".into()));
        }

        let url = format!("{}/paste/{}", self.base_url, paste);
        tracing::info!(uid, %url, "fetching identity proof");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| VerifyError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(VerifyError::Invalid(format!(
                "paste fetch returned {}",
                response.status()
            )));
        }

        let html = response
            .text()
            .await
            .map_err(|e| VerifyError::Unavailable(e.to_string()))?;

        let payload = parse_paste_payload(&html, paste)
            .map_err(|e| VerifyError::Invalid(e.to_string()))?;

        let author_uid = payload["user"]["uid"]
            .as_i64()
            .ok_or_else(|| VerifyError::Invalid("paste payload missing author uid".into()))?;
        if author_uid.to_string() != uid {
            return Err(VerifyError::Invalid(format!(
                "paste author {author_uid} does not match uid {uid}"
            )));
        }

        let content = payload["data"]
            .as_str()
            .ok_or_else(|| VerifyError::Invalid("paste payload missing content".into()))?;
        if !content.contains(&self.validation_text) {
            return Err(VerifyError::Invalid(
                "paste content does not contain the validation text".into(),
            ));
        }

        tracing::info!(uid, "identity proof verified");
        Ok(())
    }
}

/// UIDs are short, purely numeric strings.
pub fn is_valid_uid(uid: &str) -> bool {
    !uid.is_empty() && uid.len() <= 10 && uid.bytes().all(|b| b.is_ascii_digit())
}

/// Extract the paste record from the page HTML. The page injects its state
/// as `window._feInjection = JSON.parse(decodeURIComponent("..."))`; the
/// record lives at `currentData.paste`, or inside `currentData.pastes.result`
/// on list pages.
pub fn parse_paste_payload(html: &str, paste_id: &str) -> anyhow::Result<serde_json::Value> {
    const MARKER: &str = "window._feInjection = JSON.parse(decodeURIComponent(\"";
    let start = html
        .find(MARKER)
        .ok_or_else(|| anyhow!("injected payload not found in HTML"))?
        + MARKER.len();
    let end = html[start..]
        .find("\"))")
        .ok_or_else(|| anyhow!("unterminated injected payload"))?
        + start;

    let decoded = url_decode(&html[start..end]);
    let root: serde_json::Value =
        serde_json::from_str(&decoded).context("injected payload is not valid JSON")?;

    let current = &root["currentData"];
    if current["paste"].is_object() {
        return Ok(current["paste"].clone());
    }
    if let Some(results) = current["pastes"]["result"].as_array() {
        for item in results {
            if item["id"].as_str() == Some(paste_id) {
                return Ok(item.clone());
            }
        }
    }
    Err(anyhow!("payload does not contain the requested paste"))
}

fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = &s[i + 1..i + 3];
                if let Ok(value) = u8::from_str_radix(hex, 16) {
                    out.push(value);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_with_payload(payload: &serde_json::Value) -> String {
        // Percent-encode the payload the way the real page does.
        let json = payload.to_string();
        let encoded: String = json
            .bytes()
            .map(|b| {
                if b.is_ascii_alphanumeric() {
                    (b as char).to_string()
                } else {
                    format!("%{b:02X}")
                }
            })
            .collect();
        format!(
            "<html><script>window._feInjection = JSON.parse(decodeURIComponent(\"{encoded}\"));window._feConfigVersion=1;</script></html>"
        )
    }

    #[test]
    fn test_is_valid_uid() {
        assert!(is_valid_uid("12345"));
        assert!(!is_valid_uid(""));
        assert!(!is_valid_uid("12a45"));
        assert!(!is_valid_uid("12345678901"));
    }

    #[test]
    fn test_url_decode() {
        assert_eq!(url_decode("a%20b"), "a b");
        assert_eq!(url_decode("a+b"), "a b");
        assert_eq!(url_decode("%7B%22x%22%3A1%7D"), "{\"x\":1}");
        // Malformed escapes pass through untouched.
        assert_eq!(url_decode("100%"), "100%");
    }

    #[test]
    fn test_parse_paste_payload_single_page() {
        let payload = serde_json::json!({
            "currentData": {
                "paste": {
                    "id": "abc123",
                    "user": {"uid": 12345},
                    "data": "I am joining the snake arena"
                }
            }
        });
        let html = page_with_payload(&payload);
        let paste = parse_paste_payload(&html, "abc123").unwrap();
        assert_eq!(paste["user"]["uid"], 12345);
        assert_eq!(paste["data"], "I am joining the snake arena");
    }

    #[test]
    fn test_parse_paste_payload_list_page() {
        let payload = serde_json::json!({
            "currentData": {
                "pastes": {
                    "result": [
                        {"id": "other", "user": {"uid": 1}, "data": "x"},
                        {"id": "abc123", "user": {"uid": 12345}, "data": "hello"}
                    ]
                }
            }
        });
        let html = page_with_payload(&payload);
        let paste = parse_paste_payload(&html, "abc123").unwrap();
        assert_eq!(paste["user"]["uid"], 12345);
    }

    #[test]
    fn test_parse_paste_payload_missing_marker() {
        assert!(parse_paste_payload("<html>nothing here</html>", "abc").is_err());
    }

    #[tokio::test]
    async fn test_universal_bypass_skips_fetch() {
        // Unroutable base URL: a fetch attempt would fail, so success proves
        // the bypass short-circuited.
        let verifier = PasteVerifier::new(
            "validation".into(),
            Some("letmein".into()),
            1,
        )
        .with_base_url("http://127.0.0.1:1".into());
        assert!(verifier.verify("12345", "letmein").await.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_uid_rejected_before_fetch() {
        let verifier = PasteVerifier::new("validation".into(), None, 1)
            .with_base_url("http://127.0.0.1:1".into());
        match verifier.verify("not-a-uid", "abc123").await {
            Err(VerifyError::Invalid(_)) => {}
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_service_is_unavailable() {
        let verifier = PasteVerifier::new("validation".into(), None, 1)
            .with_base_url("http://127.0.0.1:1".into());
        match verifier.verify("12345", "abc123").await {
            Err(VerifyError::Unavailable(_)) => {}
            other => panic!("expected Unavailable, got {other:?}"),
        }
    }
}
