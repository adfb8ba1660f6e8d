use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use validator::{Validate, ValidationError};

/// The order payload assembled by the storefront and carried through checkout.
///
/// Written once before checkout initiation and only ever read afterwards: it rides
/// in processor metadata (or the correlation store) and is projected into a
/// [`BackendOrderRequest`](crate::services::commerce::backend_order::BackendOrderRequest)
/// once payment is captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OrderEnvelope {
    #[validate]
    pub form_data: OrderFormData,

    #[validate(length(min = 1, message = "userId is required"))]
    pub user_id: String,

    #[validate(length(min = 1, message = "userEmail is required"))]
    pub user_email: String,

    /// Collections sent beside `formData` instead of inside it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub djs: Option<Vec<NamedEntry>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<HostField>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sponsors: Option<Vec<NamedEntry>>,
}

/// Flat record of the order form. Unknown client fields are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, Validate)]
pub struct OrderFormData {
    /// Venue or presenter name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presenting: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_date: Option<String>,

    /// Delivery-time tier, e.g. "24 hours"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_time: Option<String>,

    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub category_id: Option<String>,

    /// Flyer template identifier (the backend's field name)
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub flyer_is: Option<String>,

    #[serde(default, deserialize_with = "flag", skip_serializing_if = "Option::is_none")]
    pub story_size_version: Option<bool>,

    #[serde(default, deserialize_with = "flag", skip_serializing_if = "Option::is_none")]
    pub custom_flyer: Option<bool>,

    #[serde(default, deserialize_with = "flag", skip_serializing_if = "Option::is_none")]
    pub animated_flyer: Option<bool>,

    #[serde(default, deserialize_with = "flag", skip_serializing_if = "Option::is_none")]
    pub instagram_post_size: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,

    /// Already-uploaded hero image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,

    /// Authoritative amount charged, in major currency units.
    #[serde(deserialize_with = "amount")]
    #[validate(custom = "validate_total_price")]
    pub total_price: f64,

    #[serde(
        default,
        deserialize_with = "optional_amount",
        skip_serializing_if = "Option::is_none"
    )]
    pub subtotal: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub djs: Option<Vec<NamedEntry>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<HostField>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sponsors: Option<Vec<NamedEntry>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A DJ, host or sponsor entry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NamedEntry {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NamedEntry {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extra: Map::new(),
        }
    }
}

/// `host` is sent either as one object or as a short list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HostField {
    Many(Vec<NamedEntry>),
    One(NamedEntry),
}

impl Default for HostField {
    fn default() -> Self {
        HostField::One(NamedEntry::default())
    }
}

impl OrderEnvelope {
    pub fn new(form_data: OrderFormData, user_id: impl Into<String>, user_email: impl Into<String>) -> Self {
        Self {
            form_data,
            user_id: user_id.into(),
            user_email: user_email.into(),
            djs: None,
            host: None,
            sponsors: None,
        }
    }

    pub fn djs(&self) -> &[NamedEntry] {
        self.form_data
            .djs
            .as_deref()
            .or(self.djs.as_deref())
            .unwrap_or_default()
    }

    pub fn host(&self) -> Option<&HostField> {
        self.form_data.host.as_ref().or(self.host.as_ref())
    }

    pub fn sponsors(&self) -> &[NamedEntry] {
        self.form_data
            .sponsors
            .as_deref()
            .or(self.sponsors.as_deref())
            .unwrap_or_default()
    }

    pub fn event_title(&self) -> Option<&str> {
        self.form_data
            .event_title
            .as_deref()
            .map(str::trim)
            .filter(|title| !title.is_empty())
    }
}

fn validate_total_price(value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() || value < 0.0 {
        let mut err = ValidationError::new("total_price");
        err.message = Some("total_price must be a finite, non-negative number".into());
        return Err(err);
    }
    Ok(())
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected a string or number identifier, got {}",
            other
        ))),
    }
}

fn flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(b)),
        Some(Value::Number(n)) => Ok(Some(n.as_f64().map_or(false, |v| v != 0.0))),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" | "" => Ok(Some(false)),
            other => Err(D::Error::custom(format!("invalid flag value '{}'", other))),
        },
        Some(other) => Err(D::Error::custom(format!("invalid flag value {}", other))),
    }
}

fn amount<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    optional_amount(deserializer)?.ok_or_else(|| D::Error::custom("amount must not be null"))
}

pub(crate) fn optional_amount<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| D::Error::custom("amount out of range")),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("invalid amount '{}'", s))),
        Some(other) => Err(D::Error::custom(format!("invalid amount {}", other))),
    }
}
