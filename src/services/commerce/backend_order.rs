use serde_json::Value;

use crate::config::AppConfig;
use crate::models::{HostField, OrderEnvelope};

/// Key of the second total-price field; the order backend's parser reads both.
pub const LEGACY_TOTAL_PRICE_FIELD: &str = " total_price";

/// Order id reported when the backend response names none.
pub const UNKNOWN_ORDER_ID: &str = "unknown";

/// Response keys searched for the created order's id, in preference order.
pub const ORDER_ID_KEYS: [&str; 4] = ["orderId", "order_id", "id", "_id"];

/// Values substituted for fields the envelope does not carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDefaults {
    pub delivery_time: String,
    pub category_id: String,
    pub flyer_is: String,
    pub status: String,
}

impl Default for OrderDefaults {
    fn default() -> Self {
        Self {
            delivery_time: "24 hours".to_string(),
            category_id: "1".to_string(),
            flyer_is: "1".to_string(),
            status: "pending".to_string(),
        }
    }
}

impl OrderDefaults {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            category_id: config.default_category_id.clone(),
            flyer_is: config.default_flyer_id.clone(),
            ..Self::default()
        }
    }
}

/// The flattened multipart form posted to the order backend.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BackendOrderRequest {
    fields: Vec<(String, String)>,
}

impl BackendOrderRequest {
    pub fn from_envelope(envelope: &OrderEnvelope, defaults: &OrderDefaults) -> Self {
        let form = &envelope.form_data;
        let mut request = Self::default();

        request.push("user_id", envelope.user_id.clone());
        request.push("user_email", envelope.user_email.clone());
        request.push("presenting", text(&form.presenting));
        request.push("event_title", text(&form.event_title));
        request.push("event_date", text(&form.event_date));
        request.push(
            "delivery_time",
            or_default(&form.delivery_time, &defaults.delivery_time),
        );
        request.push(
            "category_id",
            or_default(&form.category_id, &defaults.category_id),
        );
        request.push("flyer_is", or_default(&form.flyer_is, &defaults.flyer_is));
        request.push("status", defaults.status.clone());
        request.push("story_size_version", flag(form.story_size_version));
        request.push("custom_flyer", flag(form.custom_flyer));
        request.push("animated_flyer", flag(form.animated_flyer));
        request.push("instagram_post_size", flag(form.instagram_post_size));
        request.push("note", text(&form.note));
        if let Some(url) = form.image_url.as_deref().filter(|u| !u.trim().is_empty()) {
            request.push("image_url", url.to_string());
        }

        request.push("total_price", format_amount(form.total_price));
        request.push(
            LEGACY_TOTAL_PRICE_FIELD,
            format_amount(form.subtotal.unwrap_or(form.total_price)),
        );
        if let Some(subtotal) = form.subtotal {
            request.push("subtotal", format_amount(subtotal));
        }

        request.push("djs", json_text(&envelope.djs()));
        request.push(
            "host",
            envelope
                .host()
                .map(json_text)
                .unwrap_or_else(|| json_text(&HostField::default())),
        );
        request.push("sponsors", json_text(&envelope.sponsors()));

        for (key, value) in &form.extra {
            if request.field(key).is_none() {
                let value = match value {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                request.push(key, value);
            }
        }

        request
    }

    fn push(&mut self, name: &str, value: String) {
        self.fields.push((name.to_string(), value));
    }

    /// First value sent under `name`.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// Field names go out verbatim (`name=" total_price"`), never as RFC 2231 `name*=`.
    pub fn into_multipart(self) -> reqwest::multipart::Form {
        self.fields
            .into_iter()
            .fold(
                reqwest::multipart::Form::new().percent_encode_noop(),
                |form, (name, value)| form.text(name, value),
            )
    }
}

/// Picks the created order's id out of a backend response body.
///
/// Looks at the top level first, then under `data` and `order`.
pub fn extract_order_id(body: &Value) -> String {
    [Some(body), body.get("data"), body.get("order")]
        .into_iter()
        .flatten()
        .find_map(|scope| {
            ORDER_ID_KEYS.iter().find_map(|key| match scope.get(*key) {
                Some(Value::String(id)) if !id.trim().is_empty() => Some(id.clone()),
                Some(Value::Number(id)) => Some(id.to_string()),
                _ => None,
            })
        })
        .unwrap_or_else(|| UNKNOWN_ORDER_ID.to_string())
}

fn text(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn or_default(value: &Option<String>, default: &str) -> String {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
        .to_string()
}

fn flag(value: Option<bool>) -> String {
    value.unwrap_or(false).to_string()
}

fn format_amount(value: f64) -> String {
    format!("{}", value)
}

fn json_text<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}
