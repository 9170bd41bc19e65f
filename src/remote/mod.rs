use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::config::RemoteConfig;
use crate::error::GatewayError;
use crate::inventory::{Item, ItemDraft, RowId};

/// Everything the remote store reported on a full read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteSnapshot {
    pub items: Vec<Item>,
    pub last_updated: Option<String>,
}

/// Acknowledgement of a write. Only acknowledgements with `success` set and
/// no `error` ever reach callers as `Ok`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteAck {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WriteAck {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: None,
        }
    }

    fn into_result(self) -> Result<WriteAck, GatewayError> {
        if let Some(error) = self.error.as_deref().filter(|error| !error.trim().is_empty()) {
            return Err(GatewayError::Rejected(error.to_string()));
        }
        if !self.success {
            let reason = if self.message.trim().is_empty() {
                "success flag not set".to_string()
            } else {
                self.message
            };
            return Err(GatewayError::Rejected(reason));
        }
        Ok(self)
    }
}

/// The remote record store. Calls block until the remote answers or the
/// request times out.
pub trait RemoteGateway {
    fn fetch_all(&self) -> Result<RemoteSnapshot, GatewayError>;
    fn add(&self, item: &ItemDraft) -> Result<WriteAck, GatewayError>;
    fn update(&self, id: RowId, item: &ItemDraft) -> Result<WriteAck, GatewayError>;
    fn delete(&self, id: RowId) -> Result<WriteAck, GatewayError>;
}

impl<G: RemoteGateway + ?Sized> RemoteGateway for Arc<G> {
    fn fetch_all(&self) -> Result<RemoteSnapshot, GatewayError> {
        (**self).fetch_all()
    }

    fn add(&self, item: &ItemDraft) -> Result<WriteAck, GatewayError> {
        (**self).add(item)
    }

    fn update(&self, id: RowId, item: &ItemDraft) -> Result<WriteAck, GatewayError> {
        (**self).update(id, item)
    }

    fn delete(&self, id: RowId) -> Result<WriteAck, GatewayError> {
        (**self).delete(id)
    }
}

/// An absent gateway: every call fails with [`GatewayError::NotConfigured`].
impl<G: RemoteGateway> RemoteGateway for Option<G> {
    fn fetch_all(&self) -> Result<RemoteSnapshot, GatewayError> {
        self.as_ref().ok_or(GatewayError::NotConfigured)?.fetch_all()
    }

    fn add(&self, item: &ItemDraft) -> Result<WriteAck, GatewayError> {
        self.as_ref().ok_or(GatewayError::NotConfigured)?.add(item)
    }

    fn update(&self, id: RowId, item: &ItemDraft) -> Result<WriteAck, GatewayError> {
        self.as_ref().ok_or(GatewayError::NotConfigured)?.update(id, item)
    }

    fn delete(&self, id: RowId) -> Result<WriteAck, GatewayError> {
        self.as_ref().ok_or(GatewayError::NotConfigured)?.delete(id)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FetchResponse {
    #[serde(default)]
    items: Vec<Item>,
    #[serde(default)]
    last_updated: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WriteRequest<'a> {
    action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    row_index: Option<RowId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    item: Option<&'a ItemDraft>,
}

fn decode_snapshot(body: &str) -> Result<RemoteSnapshot, GatewayError> {
    let response: FetchResponse =
        serde_json::from_str(body).map_err(|err| GatewayError::Malformed(err.to_string()))?;
    if let Some(error) = response.error.filter(|error| !error.trim().is_empty()) {
        return Err(GatewayError::Rejected(error));
    }
    let total = response.items.len();
    let items: Vec<Item> = response
        .items
        .into_iter()
        .filter(|item| item.is_valid() && item.id.is_assigned())
        .collect();
    if items.len() < total {
        tracing::debug!(
            skipped = total - items.len(),
            "ignoring rows without a name or row index"
        );
    }
    Ok(RemoteSnapshot {
        items,
        last_updated: response.last_updated,
    })
}

fn decode_ack(body: &str) -> Result<WriteAck, GatewayError> {
    serde_json::from_str::<WriteAck>(body)
        .map_err(|err| GatewayError::Malformed(err.to_string()))?
        .into_result()
}

/// [`RemoteGateway`] over the spreadsheet web-app endpoint.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    endpoint: String,
    client: Client,
}

impl HttpGateway {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let endpoint = endpoint.into().trim().to_string();
        if endpoint.is_empty() {
            return Err(GatewayError::NotConfigured);
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| GatewayError::Transport(err.to_string()))?;
        Ok(Self { endpoint, client })
    }

    pub fn from_config(config: &RemoteConfig) -> Result<Self, GatewayError> {
        let endpoint = config.endpoint.as_deref().unwrap_or_default();
        Self::new(endpoint, config.timeout())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn read_body(response: reqwest::blocking::Response) -> Result<String, GatewayError> {
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Status(status.as_u16()));
        }
        Ok(response.text()?)
    }

    fn post(&self, request: &WriteRequest<'_>) -> Result<WriteAck, GatewayError> {
        tracing::debug!(action = request.action, row = ?request.row_index, "posting change");
        let response = self.client.post(&self.endpoint).json(request).send()?;
        decode_ack(&Self::read_body(response)?)
    }
}

impl RemoteGateway for HttpGateway {
    fn fetch_all(&self) -> Result<RemoteSnapshot, GatewayError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("action", "getAll")])
            .header(reqwest::header::ACCEPT, "application/json")
            .send()?;
        decode_snapshot(&Self::read_body(response)?)
    }

    fn add(&self, item: &ItemDraft) -> Result<WriteAck, GatewayError> {
        self.post(&WriteRequest {
            action: "add",
            row_index: None,
            item: Some(item),
        })
    }

    fn update(&self, id: RowId, item: &ItemDraft) -> Result<WriteAck, GatewayError> {
        self.post(&WriteRequest {
            action: "update",
            row_index: Some(id),
            item: Some(item),
        })
    }

    fn delete(&self, id: RowId) -> Result<WriteAck, GatewayError> {
        self.post(&WriteRequest {
            action: "delete",
            row_index: Some(id),
            item: None,
        })
    }
}
