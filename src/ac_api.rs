//! AC API client (C2, §4.2).
//!
//! Every request rides the page's own `fetch`, not a side-channel HTTP
//! client, so it carries the page's cookies and same-origin credentials
//! without the core ever touching a session token directly — mirrors the
//! original's `page.evaluate(fetch(...))` bridge.

use crate::error::{CoreError, CoreResult};
use crate::page::Page;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Whether the in-page `fetch` should auto-follow redirects or report
/// them back as `redirected: true` (§4.2 `pageFetch`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectMode {
    Follow,
    Manual,
}

impl RedirectMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Follow => "follow",
            Self::Manual => "manual",
        }
    }
}

/// Result of `pageFetch` (§4.2).
#[derive(Debug, Clone, Deserialize)]
pub struct PageFetchResult {
    pub ok: bool,
    pub status: u16,
    pub text: String,
    pub redirected: bool,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStatus {
    All,
    Online,
    Offline,
}

impl GatewayStatus {
    fn query_value(self) -> Option<&'static str> {
        match self {
            // §4.2: "a status=all request omits the query parameter
            // entirely rather than sending status=all literally".
            Self::All => None,
            Self::Online => Some("online"),
            Self::Offline => Some("offline"),
        }
    }
}

/// Projection of an AC `/ap` gateway object down to the fields the rest of
/// the system needs (§3 Gateway descriptor).
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayDescriptor {
    pub mac: String,
    pub name: String,
    pub model: String,
    pub sn: String,
    pub status: String,
    pub uplink: String,
    pub version: String,
    #[serde(rename = "containerVersion")]
    pub container_version: String,
    #[serde(rename = "appVersion")]
    pub app_version: String,
}

/// Project a raw AC gateway JSON object into a [`GatewayDescriptor`]
/// (§4.2 `extractGatewayInfo`). Missing fields default to empty strings
/// rather than failing the whole batch over one sparse record.
pub fn extract_gateway_info(gw: &Value) -> GatewayDescriptor {
    let str_field = |key: &str| gw.get(key).and_then(Value::as_str).unwrap_or("").to_string();
    let app_version = gw
        .get("container")
        .and_then(|c| c.get("apps"))
        .and_then(Value::as_array)
        .and_then(|apps| apps.first())
        .map(|app| {
            let name = app.get("name").and_then(Value::as_str).unwrap_or("");
            let version = app.get("version").and_then(Value::as_str).unwrap_or("");
            format!("{name}.{version}")
        })
        .unwrap_or_default();

    GatewayDescriptor {
        mac: str_field("mac"),
        name: str_field("name"),
        model: str_field("model"),
        sn: str_field("reserved3"),
        status: str_field("status"),
        uplink: str_field("uplink"),
        version: str_field("version"),
        container_version: str_field("containerVersion"),
        app_version,
    }
}

/// Authenticated AC HTTP API client riding the browser page's own `fetch`
/// (§4.2). Holds a `mac -> model` cache populated by `fetch_gateways` so
/// SSH pre-flight (C5) can reject unsupported hardware without a round trip.
pub struct AcApiClient {
    base_url: String,
    model_cache: Mutex<HashMap<String, String>>,
}

impl AcApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model_cache: Mutex::new(HashMap::new()),
        }
    }

    /// `mac -> model` lookup populated by the last `fetch_gateways` call.
    pub fn cached_model(&self, mac: &str) -> Option<String> {
        self.model_cache.lock().unwrap().get(mac).cloned()
    }

    fn build_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url.trim_end_matches('/'), path)
        }
    }

    /// Run `fetch` inside the page against `url` (§4.2 `pageFetch`).
    /// `add_csrf` injects the page-local CSRF token into the request body
    /// under key `csrf`. Raises `SessionExpired` when the response
    /// redirected into a session/login page.
    pub async fn page_fetch(
        &self,
        page: &dyn Page,
        url: &str,
        method: &str,
        body: Option<&Value>,
        extra_headers: Option<&Value>,
        add_csrf: bool,
        redirect: RedirectMode,
        timeout: Duration,
    ) -> CoreResult<PageFetchResult> {
        let full_url = self.build_url(url);
        let body_with_csrf = if add_csrf {
            let mut merged = body.cloned().unwrap_or_else(|| json!({}));
            if let Value::Object(ref mut map) = merged {
                map.insert(
                    "csrf".to_string(),
                    json!("__PAGE_LOCAL_CSRF_TOKEN__"),
                );
            }
            Some(merged)
        } else {
            body.cloned()
        };

        let script = format!(
            r#"
            (async () => {{
                const controller = new AbortController();
                const timer = setTimeout(() => controller.abort(), {timeout_ms});
                try {{
                    const csrf = localStorage.getItem('t') || '';
                    let bodyObj = {body};
                    if ({add_csrf} && bodyObj !== null && typeof bodyObj === 'object') {{
                        bodyObj.csrf = csrf;
                    }}
                    const resp = await fetch({url:?}, {{
                        method: {method:?},
                        credentials: 'same-origin',
                        redirect: {redirect:?},
                        signal: controller.signal,
                        headers: Object.assign({{'Content-Type': 'application/json'}}, {headers}),
                        body: bodyObj === null ? undefined : JSON.stringify(bodyObj),
                    }});
                    const text = await resp.text();
                    return {{ ok: resp.ok, status: resp.status, text, redirected: resp.redirected, url: resp.url }};
                }} finally {{
                    clearTimeout(timer);
                }}
            }})()
            "#,
            timeout_ms = timeout.as_millis(),
            body = body_with_csrf.as_ref().map(Value::to_string).unwrap_or_else(|| "null".to_string()),
            add_csrf = add_csrf,
            url = full_url,
            method = method,
            redirect = redirect.as_str(),
            headers = extra_headers.cloned().unwrap_or_else(|| json!({})),
        );

        let raw = page.evaluate(&script).await?;
        let result: PageFetchResult = serde_json::from_value(raw)
            .map_err(|e| CoreError::ParseError(format!("pageFetch response: {e}")))?;

        if result.redirected && (result.url.contains("session") || result.url.contains("login")) {
            return Err(CoreError::SessionExpired { url: result.url });
        }
        Ok(result)
    }

    /// `POST /api2/cassia/info?mac=...` with `{"ssh-login":"1"}` (§4.2).
    pub async fn enable_ssh(&self, page: &dyn Page, mac: &str, timeout: Duration) -> CoreResult<PageFetchResult> {
        self.page_fetch(
            page,
            &format!("/api2/cassia/info?mac={mac}"),
            "POST",
            Some(&json!({"ssh-login": "1"})),
            None,
            true,
            RedirectMode::Follow,
            timeout,
        )
        .await
    }

    /// `POST /ap/remote/{mac}?ssh_port=9999&ap=1`, manual redirect; an
    /// `opaqueredirect`/3xx response is success (§4.2).
    pub async fn open_tunnel(&self, page: &dyn Page, mac: &str, timeout: Duration) -> CoreResult<PageFetchResult> {
        self.page_fetch(
            page,
            &format!("/ap/remote/{mac}?ssh_port=9999&ap=1"),
            "POST",
            None,
            None,
            true,
            RedirectMode::Manual,
            timeout,
        )
        .await
    }

    /// `GET /ap[?status=...]` (§4.2). A non-array response body is logged
    /// and treated as an empty list, matching the original's tolerance for
    /// one malformed payload not aborting an otherwise-working session.
    pub async fn fetch_gateways(
        &self,
        page: &dyn Page,
        status: GatewayStatus,
        timeout: Duration,
    ) -> CoreResult<Vec<GatewayDescriptor>> {
        let path = match status.query_value() {
            Some(value) => format!("/ap?status={value}"),
            None => "/ap".to_string(),
        };
        let result = self
            .page_fetch(page, &path, "GET", None, None, false, RedirectMode::Follow, timeout)
            .await?;

        let parsed: Value = serde_json::from_str(&result.text).unwrap_or(Value::Null);
        let Some(array) = parsed.as_array() else {
            tracing::warn!(body = %result.text, "fetch_gateways: response was not an array, treating as empty");
            return Ok(Vec::new());
        };

        let descriptors: Vec<GatewayDescriptor> = array.iter().map(extract_gateway_info).collect();
        let mut cache = self.model_cache.lock().unwrap();
        for d in &descriptors {
            cache.insert(d.mac.clone(), d.model.clone());
        }
        Ok(descriptors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::fakes::FakePage;
    use serde_json::json;

    fn fake_with_responses(responses: Vec<Value>) -> FakePage {
        FakePage {
            eval_responses: std::sync::Mutex::new(responses),
            ..Default::default()
        }
    }

    #[test]
    fn extract_gateway_info_reads_app_version_from_first_container_app() {
        let gw = json!({
            "mac": "AA:BB:CC:DD:EE:FF",
            "name": "gw-1",
            "model": "AP17",
            "reserved3": "SN12345",
            "status": "online",
            "uplink": "eth0",
            "version": "2.1.0",
            "containerVersion": "1.0.0",
            "container": {"apps": [{"name": "ble-gw", "version": "3.4.1"}]},
        });
        let descriptor = extract_gateway_info(&gw);
        assert_eq!(descriptor.app_version, "ble-gw.3.4.1");
        assert_eq!(descriptor.sn, "SN12345");
        assert_eq!(descriptor.mac, "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn extract_gateway_info_empty_app_version_when_no_apps() {
        let gw = json!({"mac": "x", "container": {"apps": []}});
        assert_eq!(extract_gateway_info(&gw).app_version, "");
    }

    #[test]
    fn extract_gateway_info_empty_app_version_when_no_container() {
        let gw = json!({"mac": "x"});
        assert_eq!(extract_gateway_info(&gw).app_version, "");
    }

    #[tokio::test]
    async fn page_fetch_raises_session_expired_on_login_redirect() {
        let page = fake_with_responses(vec![json!({
            "ok": true, "status": 200, "text": "", "redirected": true, "url": "https://ac.local/login"
        })]);
        let client = AcApiClient::new("https://ac.local");
        let err = client
            .page_fetch(&page, "/ap", "GET", None, None, false, RedirectMode::Follow, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::SessionExpired { .. }));
    }

    #[tokio::test]
    async fn page_fetch_passes_through_non_redirected_response() {
        let page = fake_with_responses(vec![json!({
            "ok": true, "status": 200, "text": "[]", "redirected": false, "url": "https://ac.local/ap"
        })]);
        let client = AcApiClient::new("https://ac.local");
        let result = client
            .page_fetch(&page, "/ap", "GET", None, None, false, RedirectMode::Follow, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.status, 200);
        assert_eq!(result.text, "[]");
    }

    #[tokio::test]
    async fn fetch_gateways_all_status_omits_query_param() {
        let page = fake_with_responses(vec![json!({
            "ok": true, "status": 200, "text": "[]", "redirected": false, "url": "https://ac.local/ap"
        })]);
        let client = AcApiClient::new("https://ac.local");
        let gateways = client.fetch_gateways(&page, GatewayStatus::All, Duration::from_secs(5)).await.unwrap();
        assert!(gateways.is_empty());
    }

    #[tokio::test]
    async fn fetch_gateways_non_array_response_becomes_empty_list() {
        let page = fake_with_responses(vec![json!({
            "ok": true, "status": 200, "text": r#"{"error": "not json array"}"#, "redirected": false, "url": "https://ac.local/ap"
        })]);
        let client = AcApiClient::new("https://ac.local");
        let gateways = client.fetch_gateways(&page, GatewayStatus::Online, Duration::from_secs(5)).await.unwrap();
        assert!(gateways.is_empty());
    }

    #[tokio::test]
    async fn fetch_gateways_populates_model_cache() {
        let body = json!([
            {"mac": "AA:BB", "model": "AP17", "name": "g1"},
            {"mac": "CC:DD", "model": "MZ100", "name": "g2"},
        ]);
        let page = fake_with_responses(vec![json!({
            "ok": true, "status": 200, "text": body.to_string(), "redirected": false, "url": "https://ac.local/ap"
        })]);
        let client = AcApiClient::new("https://ac.local");
        client.fetch_gateways(&page, GatewayStatus::All, Duration::from_secs(5)).await.unwrap();
        assert_eq!(client.cached_model("AA:BB"), Some("AP17".to_string()));
        assert_eq!(client.cached_model("CC:DD"), Some("MZ100".to_string()));
        assert_eq!(client.cached_model("unknown"), None);
    }
}
