//! HTTP transport for a WAHA-compatible WhatsApp gateway.

use std::collections::HashSet;
use std::time::Duration;

use actors::{MessageTransport, TransportError};
use dispatch_core::RemoteContact;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::WahaConfig;

const SEND_TIMEOUT: Duration = Duration::from_secs(30);
const CHECK_TIMEOUT: Duration = Duration::from_secs(10);
const LIST_TIMEOUT: Duration = Duration::from_secs(60);

/// Fields that may carry a contact's display name, in preference order.
const NAME_FIELDS: [&str; 4] = ["name", "pushname", "pushName", "notify"];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendTextRequest<'a> {
    chat_id: String,
    text: &'a str,
    session: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckExistsResponse {
    #[serde(default)]
    number_exists: bool,
}

/// Talks to the gateway's REST API.
#[derive(Debug, Clone)]
pub struct WahaTransport {
    client: reqwest::Client,
    config: WahaConfig,
}

impl WahaTransport {
    pub fn new(config: WahaConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url, path)
    }

    async fn send_text(&self, phone: &str, text: &str) -> Result<(), TransportError> {
        let body = SendTextRequest {
            chat_id: chat_id(phone),
            text,
            session: &self.config.session,
        };

        let response = self
            .client
            .post(self.url("/api/sendText"))
            .header("X-Api-Key", &self.config.api_key)
            .timeout(SEND_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        ensure_success(response).await?;
        Ok(())
    }

    async fn number_exists(&self, phone: &str) -> Result<bool, TransportError> {
        let response = self
            .client
            .get(self.url("/api/contacts/check-exists"))
            .header("X-Api-Key", &self.config.api_key)
            .query(&[("phone", digits(phone).as_str()), ("session", self.config.session.as_str())])
            .timeout(CHECK_TIMEOUT)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let body: CheckExistsResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        Ok(body.number_exists)
    }

    async fn all_contacts(&self) -> Result<Vec<RemoteContact>, TransportError> {
        let response = self
            .client
            .get(self.url("/api/contacts/all"))
            .header("X-Api-Key", &self.config.api_key)
            .query(&[("session", self.config.session.as_str())])
            .timeout(LIST_TIMEOUT)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let body: Value = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;

        let contacts = normalize_contacts(&body);
        tracing::info!(contacts = contacts.len(), "Fetched gateway contacts");
        Ok(contacts)
    }
}

impl MessageTransport for WahaTransport {
    fn send<'a>(&'a self, phone: &'a str, text: &'a str) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(self.send_text(phone, text))
    }

    fn check_exists<'a>(&'a self, phone: &'a str) -> BoxFuture<'a, Result<bool, TransportError>> {
        Box::pin(self.number_exists(phone))
    }

    fn list_contacts(&self) -> BoxFuture<'_, Result<Vec<RemoteContact>, TransportError>> {
        Box::pin(self.all_contacts())
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "failed to read response body".into());
    Err(TransportError::Rejected {
        status: status.as_u16(),
        body,
    })
}

/// `phone` stripped of everything but digits.
fn digits(phone: &str) -> String {
    phone.chars().filter(char::is_ascii_digit).collect()
}

/// Gateway chat id for a phone number. Ids that already carry a suffix
/// are passed through.
pub fn chat_id(phone: &str) -> String {
    let phone = phone.trim();
    if phone.ends_with("@c.us") || phone.ends_with("@s.whatsapp.net") {
        return phone.to_string();
    }
    format!("{}@c.us", digits(phone))
}

/// Extract individual contacts from a contact listing.
///
/// Accepts a bare array or an object with a `contacts` or `data` array.
/// Groups, non-personal ids and implausible numbers are dropped; phones
/// come back as `+<digits>`, first occurrence wins.
pub fn normalize_contacts(body: &Value) -> Vec<RemoteContact> {
    let items = match body {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => map
            .get("contacts")
            .or_else(|| map.get("data"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default(),
        _ => &[],
    };

    let mut seen = HashSet::new();
    let mut contacts = Vec::new();
    for item in items {
        if item.get("isGroup").and_then(Value::as_bool).unwrap_or(false) {
            continue;
        }

        let raw_id = match item.get("id").or_else(|| item.get("jid")) {
            Some(Value::String(id)) => id.clone(),
            // some gateway versions nest the id
            Some(Value::Object(id)) => id
                .get("_serialized")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            _ => continue,
        };
        let Some(number) = raw_id.strip_suffix("@c.us") else {
            continue;
        };
        if !(7..=15).contains(&number.len()) || !number.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }

        let phone = format!("+{}", number);
        if !seen.insert(phone.clone()) {
            continue;
        }

        let name = NAME_FIELDS
            .iter()
            .filter_map(|field| item.get(*field).and_then(Value::as_str))
            .map(str::trim)
            .find(|name| !name.is_empty())
            .map(str::to_string);
        let photo_url = ["profilePicUrl", "imgUrl"]
            .iter()
            .filter_map(|field| item.get(*field).and_then(Value::as_str))
            .find(|url| !url.is_empty())
            .map(str::to_string);

        contacts.push(RemoteContact {
            phone,
            name,
            photo_url,
        });
    }
    contacts
}
