//! HTTP client for the per-tenant skill gateway.

use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

use orchestra_core::{text::preview, Error};

pub const GATEWAY_PORT: u16 = 18789;

/// Characters of an error body surfaced to callers.
const ERROR_BODY_CHARS: usize = 200;

/// Cluster-internal address of a tenant gateway release.
pub fn gateway_internal_url(release: &str, namespace: &str) -> String {
    format!(
        "http://{}.{}.svc.cluster.local:{}",
        release, namespace, GATEWAY_PORT
    )
}

/// `{base_url}/api/execute`. The base must be an absolute http(s) URL.
pub fn execute_endpoint(base_url: &str) -> orchestra_core::Result<Url> {
    let mut url = Url::parse(base_url)
        .map_err(|e| Error::validation(format!("invalid gateway url '{}': {}", base_url, e)))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(Error::validation(format!("invalid gateway url '{}'", base_url)));
    }
    let path = format!("{}/api/execute", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_query(None);
    Ok(url)
}

/// Thin client for `POST {internal_url}/api/execute`.
#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
}

impl GatewayClient {
    pub fn new(timeout: Duration) -> orchestra_core::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::configuration(format!("gateway http client: {}", e)))?;
        Ok(Self { http })
    }

    /// Execute a skill. Errors come back as short operator-safe strings.
    pub async fn execute(
        &self,
        base_url: &str,
        skill: &str,
        payload: &Value,
        credentials: &HashMap<String, SecretString>,
    ) -> Result<Value, String> {
        let url = execute_endpoint(base_url).map_err(|e| e.user_message())?;
        let creds: Map<String, Value> = credentials
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.expose_secret().clone())))
            .collect();
        let body = json!({
            "skill": skill,
            "payload": payload,
            "credentials": creds,
        });

        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status.as_u16() >= 400 {
            let text = response.text().await.unwrap_or_default();
            tracing::warn!(skill = %skill, status = status.as_u16(), "Gateway returned error status");
            return Err(preview(&text, ERROR_BODY_CHARS));
        }

        response.json::<Value>().await.map_err(map_transport_error)
    }
}

fn map_transport_error(e: reqwest::Error) -> String {
    if e.is_timeout() {
        "Execution timeout".to_string()
    } else if e.is_connect() {
        "Gateway unreachable".to_string()
    } else {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_internal_url() {
        assert_eq!(
            gateway_internal_url("oc-acme", "tenants"),
            "http://oc-acme.tenants.svc.cluster.local:18789"
        );
    }

    #[test]
    fn test_execute_endpoint() {
        assert_eq!(
            execute_endpoint("http://oc-acme.tenants.svc.cluster.local:18789").unwrap().as_str(),
            "http://oc-acme.tenants.svc.cluster.local:18789/api/execute"
        );
        assert_eq!(
            execute_endpoint("https://gw.local/tenant-a/").unwrap().as_str(),
            "https://gw.local/tenant-a/api/execute"
        );
        assert!(matches!(execute_endpoint("gw.local:18789"), Err(Error::Validation(_))));
        assert!(matches!(execute_endpoint("ftp://gw.local"), Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_malformed_instance_url_is_rejected_before_sending() {
        let client = GatewayClient::new(Duration::from_millis(200)).unwrap();
        let err = client
            .execute("not a url", "gmail", &json!({}), &HashMap::new())
            .await
            .unwrap_err();
        assert!(err.starts_with("invalid gateway url"), "{}", err);
    }

    #[tokio::test]
    async fn test_execute_sends_credentials() {
        let base = spawn(Router::new().route(
            "/api/execute",
            post(|Json(body): Json<Value>| async move {
                Json(json!({
                    "skill": body["skill"],
                    "token": body["credentials"]["api_key"],
                }))
            }),
        ))
        .await;

        let client = GatewayClient::new(Duration::from_secs(5)).unwrap();
        let creds = HashMap::from([("api_key".to_string(), SecretString::new("sk-1".into()))]);
        let out = client
            .execute(&base, "gmail", &json!({"to": "a@b.c"}), &creds)
            .await
            .unwrap();
        assert_eq!(out, json!({"skill": "gmail", "token": "sk-1"}));
    }

    #[tokio::test]
    async fn test_error_body_is_truncated() {
        let base = spawn(Router::new().route(
            "/api/execute",
            post(|| async { (StatusCode::BAD_GATEWAY, "x".repeat(1000)) }),
        ))
        .await;

        let client = GatewayClient::new(Duration::from_secs(5)).unwrap();
        let err = client
            .execute(&base, "gmail", &json!({}), &HashMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.len(), ERROR_BODY_CHARS);
    }

    #[tokio::test]
    async fn test_unreachable_and_timeout() {
        let client = GatewayClient::new(Duration::from_millis(200)).unwrap();
        let err = client
            .execute("http://127.0.0.1:1", "gmail", &json!({}), &HashMap::new())
            .await
            .unwrap_err();
        assert_eq!(err, "Gateway unreachable");

        let base = spawn(Router::new().route(
            "/api/execute",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        ))
        .await;
        let err = client
            .execute(&base, "gmail", &json!({}), &HashMap::new())
            .await
            .unwrap_err();
        assert_eq!(err, "Execution timeout");
    }
}
