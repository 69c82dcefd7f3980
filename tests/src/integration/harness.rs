//! A gateway wired to in-memory fakes, driven through its real router.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::{TimeZone, Utc};
use serde_json::Value;
use tower::ServiceExt;

use notify_gateway::ports::testing::{
    FakeConnector, FakeFetcher, FakeHandle, FixedClock, InMemoryCredentialStore,
    StaticTemplateStore,
};
use notify_gateway::{GatewayConfig, GatewayPorts, GatewayService};

/// Smallest byte sequence the media sniffer reads as PNG, base64 encoded
pub const PNG_BASE64: &str = "iVBORw0KGgo=";

/// A number the fake network knows
pub const REGISTERED_PHONE: &str = "+51 987654321";
pub const REGISTERED_ID: &str = "51987654321@s.whatsapp.net";

pub struct Harness {
    pub service: GatewayService,
    pub connector: Arc<FakeConnector>,
    pub credentials: Arc<InMemoryCredentialStore>,
    pub templates: Arc<StaticTemplateStore>,
    pub fetcher: Arc<FakeFetcher>,
    pub clock: Arc<FixedClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(GatewayConfig::default(), Vec::<(String, String)>::new())
    }

    pub fn with_templates<I, K, V>(templates: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::with_config(GatewayConfig::default(), templates)
    }

    pub fn with_config<I, K, V>(config: GatewayConfig, templates: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let connector = FakeConnector::new();
        connector.register(REGISTERED_ID);
        let credentials = InMemoryCredentialStore::new();
        let templates = StaticTemplateStore::new(templates);
        let fetcher = FakeFetcher::new();
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());

        let ports = GatewayPorts {
            connector: connector.clone(),
            credentials: credentials.clone(),
            templates: templates.clone(),
            fetcher: fetcher.clone(),
            clock: clock.clone(),
        };
        let service = GatewayService::new(config, ports).expect("valid test config");

        Self {
            service,
            connector,
            credentials,
            templates,
            fetcher,
            clock,
        }
    }

    pub fn router(&self) -> Router {
        self.service.router()
    }

    /// Open a handle and drive it to Connected
    pub async fn connect(&self) -> FakeHandle {
        self.service.sessions().initialize().await.unwrap();
        let handle = self.connector.last().unwrap();
        handle.open().await;
        settle().await;
        assert!(self.service.sessions().is_connected());
        handle
    }

    /// Open a handle and drive it to QrReady
    pub async fn pairing(&self, qr: &str) -> FakeHandle {
        self.service.sessions().initialize().await.unwrap();
        let handle = self.connector.last().unwrap();
        handle.qr(qr).await;
        settle().await;
        handle
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.call(Method::GET, uri, None, &[]).await
    }

    pub async fn post(&self, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.call(Method::POST, uri, body, &[]).await
    }

    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }
}

/// Let spawned pumps and timers run
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// A valid send body for the registered number
pub fn product_body() -> Value {
    serde_json::json!({
        "productName": "Drill",
        "description": "Cordless, 18V",
        "phone": REGISTERED_PHONE,
        "email": "sales@example.com",
        "imageData": format!("data:image/png;base64,{}", PNG_BASE64),
    })
}
