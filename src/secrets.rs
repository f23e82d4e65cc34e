//! Startup-time resolution of the Gemini API key, either directly from
//! configuration or from a secret manager's REST access endpoint.

use base64::Engine;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("no API key configured: set one directly or provide a secret name and access token")]
    MissingConfiguration,
    #[error("secret manager request failed: {0}")]
    Http(String),
    #[error("secret manager returned status {0}")]
    Status(surf::StatusCode),
    #[error("secret payload is not valid base64")]
    Decode(#[from] base64::DecodeError),
    #[error("secret payload is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, Deserialize)]
struct AccessSecretVersionResponse {
    payload: SecretPayload,
}

#[derive(Debug, Deserialize)]
struct SecretPayload {
    data: String,
}

/// A directly configured key short-circuits the secret manager fetch; key
/// rotation otherwise requires a restart either way.
pub async fn resolve_api_key(
    configured_key: Option<&str>,
    endpoint: &str,
    secret_name: Option<&str>,
    access_token: Option<&str>,
) -> Result<String, Error> {
    if let Some(key) = configured_key {
        tracing::info!("using Gemini API key from configuration");
        return Ok(key.to_string());
    }

    match (secret_name, access_token) {
        (Some(name), Some(token)) => {
            tracing::info!(secret = name, "fetching Gemini API key from secret manager");
            access_secret_version(endpoint, name, token).await
        },
        _ => Err(Error::MissingConfiguration),
    }
}

async fn access_secret_version(
    endpoint: &str,
    secret_name: &str,
    access_token: &str,
) -> Result<String, Error> {
    let url = format!(
        "{}/v1/{}:access",
        endpoint.trim_end_matches('/'),
        secret_name
    );

    let mut res = surf::get(&url)
        .header("Authorization", format!("Bearer {}", access_token))
        .await
        .map_err(|err| Error::Http(err.to_string()))?;

    if !res.status().is_success() {
        return Err(Error::Status(res.status()));
    }

    let body: AccessSecretVersionResponse = res
        .body_json()
        .await
        .map_err(|err| Error::Http(err.to_string()))?;

    decode_payload(&body.payload.data)
}

fn decode_payload(data: &str) -> Result<String, Error> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(data)?;
    Ok(String::from_utf8(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_base64_payload() {
        assert_eq!(decode_payload("c2VjcmV0LWtleQ==").unwrap(), "secret-key");
    }

    #[test]
    fn rejects_invalid_base64() {
        assert!(matches!(
            decode_payload("not base64!"),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn parses_access_response_body() {
        let body = r#"{"name":"projects/1/secrets/GEMINI_API_KEY/versions/1","payload":{"data":"QUl6YS1leGFtcGxl"}}"#;
        let parsed: AccessSecretVersionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(decode_payload(&parsed.payload.data).unwrap(), "AIza-example");
    }

    #[async_std::test]
    async fn missing_configuration_is_an_error() {
        let res = resolve_api_key(None, "https://example.invalid", None, None).await;
        assert!(matches!(res, Err(Error::MissingConfiguration)));
    }

    #[async_std::test]
    async fn configured_key_wins() {
        let key = resolve_api_key(Some("abc"), "https://example.invalid", None, None)
            .await
            .unwrap();
        assert_eq!(key, "abc");
    }
}
