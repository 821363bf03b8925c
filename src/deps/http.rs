//! `axios`: promise-based HTTP over a shared `reqwest` client.
//!
//! The client (and its default timeout) is configured once at startup;
//! individual requests may only shorten or lengthen the timeout for
//! themselves.

use anyhow::{Context, Result};
use rquickjs::prelude::Async;
use rquickjs::{Ctx, Exception, Function, Object, Value};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::time::Duration;

use super::HostModule;
use crate::config::HttpConfig;
use crate::js::apply_glue;

pub struct AxiosModule {
    client: reqwest::Client,
}

impl AxiosModule {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

const GLUE: &str = r#"
(function (native) {
    function mergeConfig(base, extra) {
        const merged = Object.assign({}, base, extra);
        merged.headers = Object.assign({}, base && base.headers, extra && extra.headers);
        return merged;
    }
    function create(instanceDefaults) {
        const defaults = mergeConfig({ headers: {} }, instanceDefaults);
        async function request(config) {
            const merged = mergeConfig(defaults, config);
            const response = JSON.parse(await native.request(JSON.stringify(merged)));
            response.config = merged;
            const validate = typeof merged.validateStatus === 'function'
                ? merged.validateStatus
                : (status) => status >= 200 && status < 300;
            if (!validate(response.status)) {
                const error = new Error('Request failed with status code ' + response.status);
                error.response = response;
                error.config = merged;
                throw error;
            }
            return response;
        }
        function axios(target, config) {
            if (typeof target === 'string') {
                return request(Object.assign({}, config, { url: target }));
            }
            return request(target || {});
        }
        axios.request = request;
        for (const method of ['get', 'delete', 'head', 'options']) {
            axios[method] = (url, config) => request(Object.assign({}, config, { url, method }));
        }
        for (const method of ['post', 'put', 'patch']) {
            axios[method] = (url, data, config) =>
                request(Object.assign({}, config, { url, method, data }));
        }
        axios.defaults = defaults;
        axios.create = (extra) => create(mergeConfig(defaults, extra));
        return axios;
    }
    return create({});
})
"#;

impl HostModule for AxiosModule {
    fn name(&self) -> &'static str {
        "axios"
    }

    fn instantiate<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        let client = self.client.clone();
        let native = Object::new(ctx.clone())?;
        native.set(
            "request",
            Function::new(
                ctx.clone(),
                Async(move |ctx: Ctx<'js>, config: String| {
                    let client = client.clone();
                    async move {
                        let config: RequestConfig = serde_json::from_str(&config).map_err(|err| {
                            Exception::throw_type(&ctx, &format!("invalid request config: {err}"))
                        })?;
                        let response = perform(&client, config)
                            .await
                            .map_err(|err| Exception::throw_message(&ctx, &format!("{err:#}")))?;
                        serde_json::to_string(&response)
                            .map_err(|err| Exception::throw_message(&ctx, &err.to_string()))
                    }
                }),
            )?,
        )?;
        apply_glue(ctx, GLUE, native)
    }
}

/// Request options as provider code spells them.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RequestConfig {
    pub url: String,
    pub method: Option<String>,
    #[serde(rename = "baseURL")]
    pub base_url: Option<String>,
    pub params: Option<Json>,
    pub headers: BTreeMap<String, Json>,
    pub data: Option<Json>,
    /// Milliseconds; `0` keeps the client default
    pub timeout: Option<u64>,
    pub response_type: Option<String>,
}

/// Response record handed back to provider code.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    pub status: u16,
    pub status_text: String,
    pub headers: BTreeMap<String, String>,
    pub data: Json,
}

/// Absolute request URL with `params` appended as a query string.
pub fn request_url(config: &RequestConfig) -> String {
    let mut url = match config.base_url.as_deref() {
        Some(base) if !base.is_empty() && !is_absolute(&config.url) => format!(
            "{}/{}",
            base.trim_end_matches('/'),
            config.url.trim_start_matches('/')
        ),
        _ => config.url.clone(),
    };
    if let Some(params) = &config.params {
        let query = super::qs::stringify(params);
        if !query.is_empty() {
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(&query);
        }
    }
    url
}

fn is_absolute(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://") || url.starts_with("//")
}

fn header_value(value: &Json) -> Option<String> {
    match value {
        Json::Null => None,
        Json::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

/// Response body as JSON when it parses, text otherwise.
pub fn decode_body(text: String, response_type: Option<&str>) -> Json {
    if matches!(response_type, Some("text")) {
        return Json::String(text);
    }
    serde_json::from_str(&text).unwrap_or(Json::String(text))
}

/// Execute one request. Non-2xx statuses are not errors here; the glue
/// decides rejection.
pub async fn perform(client: &reqwest::Client, config: RequestConfig) -> Result<ResponseRecord> {
    let method_name = config.method.as_deref().unwrap_or("get").to_ascii_uppercase();
    let method = reqwest::Method::from_bytes(method_name.as_bytes())
        .with_context(|| format!("Unsupported HTTP method: {method_name}"))?;
    let url = request_url(&config);

    let mut builder = client.request(method, &url);
    let mut has_content_type = false;
    for (name, value) in &config.headers {
        if let Some(value) = header_value(value) {
            has_content_type |= name.eq_ignore_ascii_case("content-type");
            builder = builder.header(name.as_str(), value);
        }
    }
    match &config.data {
        None | Some(Json::Null) => {}
        Some(Json::String(body)) => {
            if !has_content_type {
                builder = builder.header(
                    reqwest::header::CONTENT_TYPE,
                    "application/x-www-form-urlencoded",
                );
            }
            builder = builder.body(body.clone());
        }
        Some(body) => builder = builder.json(body),
    }
    if let Some(timeout) = config.timeout.filter(|&ms| ms > 0) {
        builder = builder.timeout(Duration::from_millis(timeout));
    }

    tracing::debug!(url = %url, method = %method_name, "Provider HTTP request");
    let response = builder
        .send()
        .await
        .with_context(|| format!("Request to {url} failed"))?;

    let status = response.status();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();
    let text = response
        .text()
        .await
        .with_context(|| format!("Failed to read response body from {url}"))?;

    Ok(ResponseRecord {
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or_default().to_string(),
        headers,
        data: decode_body(text, config.response_type.as_deref()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(value: Json) -> RequestConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn url_joins_base_and_params() {
        let request = config(json!({
            "baseURL": "https://api.example.com/v1/",
            "url": "/search",
            "params": {"w": "hello world", "p": 2}
        }));
        assert_eq!(
            request_url(&request),
            "https://api.example.com/v1/search?w=hello%20world&p=2"
        );
    }

    #[test]
    fn absolute_url_ignores_base() {
        let request = config(json!({
            "baseURL": "https://api.example.com",
            "url": "https://other.example.com/x?a=1",
            "params": {"b": 2}
        }));
        assert_eq!(request_url(&request), "https://other.example.com/x?a=1&b=2");
    }

    #[test]
    fn body_prefers_json() {
        assert_eq!(decode_body(r#"{"ok":1}"#.into(), None), json!({"ok": 1}));
        assert_eq!(decode_body("<html>".into(), None), json!("<html>"));
        assert_eq!(decode_body(r#"{"ok":1}"#.into(), Some("text")), json!(r#"{"ok":1}"#));
    }

    #[test]
    fn config_tolerates_unknown_fields() {
        let request = config(json!({"url": "x", "validateStatus": null, "xsrfCookieName": "t"}));
        assert_eq!(request.url, "x");
        assert!(request.method.is_none());
    }

    #[tokio::test]
    async fn perform_reports_status_and_json() {
        use wiremock::matchers::{header, method, path, query_param};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("w", "jay"))
            .and(header("referer", "https://y.example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"songs": [1, 2]})))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let request = config(json!({
            "url": format!("{}/search", server.uri()),
            "params": {"w": "jay"},
            "headers": {"referer": "https://y.example.com"}
        }));
        let response = perform(&client, request).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.status_text, "OK");
        assert_eq!(response.data, json!({"songs": [1, 2]}));
    }

    #[tokio::test]
    async fn perform_sends_form_bodies() {
        use wiremock::matchers::{body_string, header, method};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string("a=1&b=2"))
            .respond_with(ResponseTemplate::new(404).set_body_string("missing"))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let request = config(json!({"url": server.uri(), "method": "post", "data": "a=1&b=2"}));
        let response = perform(&client, request).await.unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(response.data, json!("missing"));
    }
}
