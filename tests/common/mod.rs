#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use grodify_checkout::{
    cache::{CorrelationStore, InMemoryCorrelationStore},
    config::AppConfig,
    handlers::AppServices,
    services::commerce::envelope_codec::{CHUNK_COUNT_KEY, INLINE_KEY},
    services::commerce::{BackendOrderRequest, CreatedOrder, OrderBackend, OrderBackendError},
    services::payment_processor::{
        check_metadata_limits, CheckoutSessionRequest, PaymentProcessor, PaymentStatus,
        ProcessorError, ProcessorSession,
    },
    AppState,
};
use serde_json::{json, Value};
use tower::ServiceExt;

pub const PUBLIC_BASE: &str = "https://grodify.example";

/// In-memory stand-in for the hosted checkout provider.
#[derive(Default)]
pub struct FakeProcessor {
    sessions: Mutex<HashMap<String, ProcessorSession>>,
    created: Mutex<Vec<CheckoutSessionRequest>>,
    next_id: AtomicUsize,
    retrieve_calls: AtomicUsize,
    unavailable: AtomicBool,
    reject_metadata: AtomicBool,
}

impl FakeProcessor {
    /// Registers a session directly, bypassing checkout creation.
    pub fn insert_session(&self, session: ProcessorSession) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session);
    }

    pub fn set_status(&self, session_id: &str, status: PaymentStatus) {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(session_id) {
            session.payment_status = status;
        }
    }

    pub fn session(&self, session_id: &str) -> Option<ProcessorSession> {
        self.sessions.lock().unwrap().get(session_id).cloned()
    }

    pub fn created_requests(&self) -> Vec<CheckoutSessionRequest> {
        self.created.lock().unwrap().clone()
    }

    pub fn retrieve_calls(&self) -> usize {
        self.retrieve_calls.load(Ordering::SeqCst)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes the next session creations fail as if metadata were refused.
    pub fn reject_metadata(&self, reject: bool) {
        self.reject_metadata.store(reject, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentProcessor for FakeProcessor {
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<ProcessorSession, ProcessorError> {
        check_metadata_limits(&request.metadata)?;
        if self.reject_metadata.load(Ordering::SeqCst)
            && request.metadata.keys().any(|k| is_envelope_key(k))
        {
            return Err(ProcessorError::MetadataTooLarge(
                "metadata[orderData]: value too long".to_string(),
            ));
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("cs_test_{}", n);
        let session = ProcessorSession {
            id: id.clone(),
            url: Some(format!("https://checkout.stripe.test/pay/{}", id)),
            payment_status: PaymentStatus::Unpaid,
            metadata: request.metadata.clone(),
            customer_email: request.customer_email.clone(),
            amount_total: Some(request.line_item.unit_amount * i64::from(request.line_item.quantity)),
        };
        self.created.lock().unwrap().push(request);
        self.insert_session(session.clone());
        Ok(session)
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<ProcessorSession, ProcessorError> {
        self.retrieve_calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ProcessorError::Api {
                status: 503,
                message: "processor down".to_string(),
            });
        }
        self.session(session_id)
            .ok_or_else(|| ProcessorError::NotFound(session_id.to_string()))
    }
}

/// Keys written by the envelope encoder, as opposed to identifying fields or
/// the `orderDataStorage` marker.
fn is_envelope_key(key: &str) -> bool {
    key == INLINE_KEY
        || key == CHUNK_COUNT_KEY
        || key
            .strip_prefix(INLINE_KEY)
            .and_then(|rest| rest.strip_prefix('_'))
            .map_or(false, |index| {
                !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit())
            })
}

#[derive(Debug, Clone)]
pub enum BackendBehaviour {
    Succeed(String),
    Reject(u16),
    Unavailable,
    Timeout,
}

/// Order backend that records every submitted form.
pub struct RecordingBackend {
    calls: Mutex<Vec<(BackendOrderRequest, String)>>,
    behaviour: Mutex<BackendBehaviour>,
    delay: Mutex<Option<Duration>>,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            behaviour: Mutex::new(BackendBehaviour::Succeed("ord_1001".to_string())),
            delay: Mutex::new(None),
        }
    }
}

impl RecordingBackend {
    pub fn behave(&self, behaviour: BackendBehaviour) {
        *self.behaviour.lock().unwrap() = behaviour;
    }

    /// Makes every order creation take `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<(BackendOrderRequest, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl OrderBackend for RecordingBackend {
    async fn create_order(
        &self,
        request: BackendOrderRequest,
        idempotency_key: &str,
    ) -> Result<CreatedOrder, OrderBackendError> {
        self.calls
            .lock()
            .unwrap()
            .push((request, idempotency_key.to_string()));
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let behaviour = self.behaviour.lock().unwrap().clone();
        match behaviour {
            BackendBehaviour::Succeed(order_id) => Ok(CreatedOrder { order_id }),
            BackendBehaviour::Reject(status) => Err(OrderBackendError::Rejected {
                status,
                body: r#"{"success":false,"message":"validation failed"}"#.to_string(),
            }),
            BackendBehaviour::Unavailable => {
                Err(OrderBackendError::Unavailable("connection refused".to_string()))
            }
            BackendBehaviour::Timeout => Err(OrderBackendError::Timeout),
        }
    }
}

pub fn test_config() -> AppConfig {
    AppConfig::new(
        PUBLIC_BASE.to_string(),
        "https://orders.example".to_string(),
        "sk_test_123".to_string(),
        "127.0.0.1".to_string(),
        18_080,
        "test".to_string(),
    )
}

/// Router plus the fakes behind it.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub processor: Arc<FakeProcessor>,
    pub backend: Arc<RecordingBackend>,
    pub store: Arc<InMemoryCorrelationStore>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(customize: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = test_config();
        customize(&mut cfg);

        let processor = Arc::new(FakeProcessor::default());
        let backend = Arc::new(RecordingBackend::default());
        let store = Arc::new(InMemoryCorrelationStore::new(Duration::from_secs(
            cfg.correlation_ttl_secs,
        )));

        let services = AppServices::new(
            &cfg,
            processor.clone(),
            backend.clone(),
            store.clone() as Arc<dyn CorrelationStore>,
        );
        let state = AppState::new(cfg, services);
        let router = grodify_checkout::app_router(state.clone());

        Self {
            router,
            state,
            processor,
            backend,
            store,
        }
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        self.request_with_headers(method, uri, body.map(|v| v.to_string()), &[])
            .await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<String>,
        headers: &[(&str, &str)],
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let body = match body {
            Some(raw) => {
                builder = builder.header("content-type", "application/json");
                Body::from(raw)
            }
            None => Body::empty(),
        };

        self.router
            .clone()
            .oneshot(builder.body(body).expect("failed to build request"))
            .await
            .expect("router error during test request")
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

pub fn location(response: &Response) -> String {
    response
        .headers()
        .get("location")
        .expect("redirect location")
        .to_str()
        .expect("ascii location")
        .to_string()
}

/// Query parameters of a redirect target, in order.
pub fn query_pairs(target: &str) -> Vec<(String, String)> {
    url::Url::parse(target)
        .expect("absolute redirect")
        .query_pairs()
        .into_owned()
        .collect()
}

pub fn query_value(target: &str, key: &str) -> Option<String> {
    query_pairs(target)
        .into_iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v)
}

/// The storefront's usual checkout payload.
pub fn sample_order_data() -> Value {
    json!({
        "formData": {
            "presenting": "Club A",
            "event_title": "Summer Bash",
            "event_date": "2026-07-04",
            "flyer_is": 26,
            "category_id": "3",
            "story_size_version": true,
            "custom_flyer": "false",
            "note": "Neon please",
            "total_price": 15,
            "djs": [{ "name": "DJ Nova" }],
            "host": { "name": "MC Ray" },
            "sponsors": []
        },
        "userId": "user-42",
        "userEmail": "buyer@example.com"
    })
}

/// An order whose encoded form needs several metadata chunks.
pub fn large_order_data(djs: usize) -> Value {
    let mut order = sample_order_data();
    order["formData"]["djs"] = Value::Array(
        (0..djs)
            .map(|i| json!({ "name": format!("Guest DJ number {}", i), "image": format!("dj-{}.png", i) }))
            .collect(),
    );
    order
}
