//! Remote authority client.
//!
//! [`RemoteClient`] is the seam between the sync layer and the remote
//! authority. [`HttpRemoteClient`] talks JSON over HTTP; [`mock::InMemoryRemote`]
//! is an in-process authority for tests and demos.

use crate::config::SyncConfig;
use crate::error::{RemoteError, SyncError, SyncResult};
use async_trait::async_trait;
use recordsync_types::{into_fields, strip_identifiers, CanonicalId, Fields, Record};
use reqwest::{Client, Response, StatusCode, Url};
use serde_json::Value;
use tracing::debug;

/// Result type for remote calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Outcome of a remote delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The target was already absent. Callers treat this as success.
    AlreadyDeleted,
}

/// Create/read/update/delete against the remote authority, one request each.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Creates a record. Identifier fields in `fields` are never sent.
    async fn create(&self, fields: &Fields) -> RemoteResult<Record>;

    /// Fetches the complete remote record set.
    async fn list(&self) -> RemoteResult<Vec<Record>>;

    /// Fetches one record.
    async fn get(&self, id: &CanonicalId) -> RemoteResult<Record>;

    /// Replaces a record's fields.
    async fn update(&self, id: &CanonicalId, fields: &Fields) -> RemoteResult<Record>;

    /// Deletes a record. A not-found response is reported as
    /// [`DeleteOutcome::AlreadyDeleted`], not as an error.
    async fn delete(&self, id: &CanonicalId) -> RemoteResult<DeleteOutcome>;

    /// Liveness check.
    async fn ping(&self) -> RemoteResult<()>;
}

fn sendable(fields: &Fields) -> Fields {
    let mut fields = fields.clone();
    strip_identifiers(&mut fields);
    fields
}

// ── HTTP client ─────────────────────────────────────────────────

/// JSON-over-HTTP remote client.
pub struct HttpRemoteClient {
    client: Client,
    records_url: Url,
    health_url: Url,
}

impl HttpRemoteClient {
    /// Builds a client from the remote settings in `config`.
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let base = config.base_url()?;
        let records_url = endpoint(&base, &config.records_path)?;
        let health_url = endpoint(&base, &config.health_path)?;

        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| SyncError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            records_url,
            health_url,
        })
    }

    fn record_url(&self, id: &CanonicalId) -> RemoteResult<Url> {
        let mut url = self.records_url.clone();
        url.path_segments_mut()
            .map_err(|()| RemoteError::transport(format!("cannot address {}", self.records_url)))?
            .pop_if_empty()
            .push(id.as_str());
        Ok(url)
    }
}

fn endpoint(base: &Url, path: &str) -> SyncResult<Url> {
    let joined = format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|e| SyncError::Config(format!("invalid endpoint {joined}: {e}")))
}

fn send_error(err: reqwest::Error) -> RemoteError {
    RemoteError::new(err.status().map(|s| s.as_u16()), err.to_string())
}

/// Reads a response body. Non-success statuses become a [`RemoteError`].
async fn read_body(response: Response) -> RemoteResult<(StatusCode, String)> {
    let status = response.status();
    let body = response.text().await.map_err(|e| {
        RemoteError::new(
            Some(status.as_u16()),
            format!("failed to read response: {e}"),
        )
    })?;

    if !status.is_success() {
        return Err(error_from_body(status, &body));
    }
    Ok((status, body))
}

/// Reads a response body as JSON. An empty success body yields `None`.
async fn read_json(response: Response) -> RemoteResult<Option<Value>> {
    let (status, body) = read_body(response).await?;
    if body.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&body).map(Some).map_err(|e| {
        RemoteError::new(Some(status.as_u16()), format!("malformed response: {e}"))
    })
}

fn error_from_body(status: StatusCode, body: &str) -> RemoteError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|v| v.get("message").or_else(|| v.get("error")))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());

    let err = RemoteError::new(Some(status.as_u16()), message);
    match parsed {
        Some(details) => err.with_details(details),
        None => err,
    }
}

/// Unwraps a `{ "data": ... }` envelope.
fn unwrap_data(value: Value) -> Value {
    match value {
        Value::Object(mut map)
            if map.contains_key("data") && !map.contains_key("id") && !map.contains_key("_id") =>
        {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn parse_record(value: Value, fallback_id: Option<&CanonicalId>) -> RemoteResult<Record> {
    let value = unwrap_data(value);
    match Record::from_remote(value.clone()) {
        Ok(record) => Ok(record),
        Err(e) => match fallback_id {
            Some(id) => into_fields(value)
                .map(|fields| Record::new(id.clone(), fields))
                .map_err(|e| RemoteError::transport(format!("malformed record: {e}"))),
            None => Err(RemoteError::transport(format!("malformed record: {e}"))),
        },
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn create(&self, fields: &Fields) -> RemoteResult<Record> {
        let response = self
            .client
            .post(self.records_url.clone())
            .json(&sendable(fields))
            .send()
            .await
            .map_err(send_error)?;
        let body = read_json(response)
            .await?
            .ok_or_else(|| RemoteError::transport("create returned an empty body"))?;
        let record = parse_record(body, None)?;
        debug!("Remote assigned {}", record.id);
        Ok(record)
    }

    async fn list(&self) -> RemoteResult<Vec<Record>> {
        let response = self
            .client
            .get(self.records_url.clone())
            .send()
            .await
            .map_err(send_error)?;
        let body = read_json(response).await?.unwrap_or(Value::Array(Vec::new()));

        match unwrap_data(body) {
            Value::Array(items) => items
                .into_iter()
                .map(|item| parse_record(item, None))
                .collect(),
            other => Err(RemoteError::transport(format!(
                "malformed list response: expected an array, got {other}"
            ))),
        }
    }

    async fn get(&self, id: &CanonicalId) -> RemoteResult<Record> {
        let response = self
            .client
            .get(self.record_url(id)?)
            .send()
            .await
            .map_err(send_error)?;
        let body = read_json(response)
            .await?
            .ok_or_else(|| RemoteError::transport("get returned an empty body"))?;
        parse_record(body, Some(id))
    }

    async fn update(&self, id: &CanonicalId, fields: &Fields) -> RemoteResult<Record> {
        let response = self
            .client
            .put(self.record_url(id)?)
            .json(&sendable(fields))
            .send()
            .await
            .map_err(send_error)?;
        // Any 2xx means the update was applied. Bodies that are not a
        // record (empty, plain text) echo back what was sent.
        let (_, body) = read_body(response).await?;
        let echoed = || Record::new(id.clone(), fields.clone());
        match serde_json::from_str::<Value>(&body) {
            Ok(value) if value.is_object() => {
                Ok(parse_record(value, Some(id)).unwrap_or_else(|e| {
                    debug!("Update of {} returned an unusable record: {}", id, e);
                    echoed()
                }))
            }
            _ => Ok(echoed()),
        }
    }

    async fn delete(&self, id: &CanonicalId) -> RemoteResult<DeleteOutcome> {
        let response = self
            .client
            .delete(self.record_url(id)?)
            .send()
            .await
            .map_err(send_error)?;
        match read_body(response).await {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(e) if e.is_not_found() => Ok(DeleteOutcome::AlreadyDeleted),
            Err(e) => Err(e),
        }
    }

    async fn ping(&self) -> RemoteResult<()> {
        let response = self
            .client
            .get(self.health_url.clone())
            .send()
            .await
            .map_err(send_error)?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(RemoteError::new(
                Some(status.as_u16()),
                format!("health check returned {status}"),
            ))
        }
    }
}

// ── In-memory authority ─────────────────────────────────────────

/// In-memory remote authority for testing.
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Mutex, MutexGuard, PoisonError};
    use std::time::Duration;

    /// A call received by [`InMemoryRemote`]. Liveness probes are counted
    /// separately, see [`InMemoryRemote::ping_count`].
    #[derive(Debug, Clone, PartialEq)]
    pub enum RemoteCall {
        Create(Fields),
        List,
        Get(CanonicalId),
        Update(CanonicalId, Fields),
        Delete(CanonicalId),
    }

    struct State {
        records: Vec<Record>,
        next_id: u64,
        online: bool,
        failures: VecDeque<RemoteError>,
        rejected_field: Option<String>,
        latency: Duration,
        calls: Vec<RemoteCall>,
        pings: usize,
    }

    /// A single-collection remote authority held in memory.
    ///
    /// Identifiers are assigned as `srv-1`, `srv-2`, ... and never reused.
    pub struct InMemoryRemote {
        state: Mutex<State>,
    }

    impl InMemoryRemote {
        pub fn new() -> Self {
            Self {
                state: Mutex::new(State {
                    records: Vec::new(),
                    next_id: 1,
                    online: true,
                    failures: VecDeque::new(),
                    rejected_field: None,
                    latency: Duration::ZERO,
                    calls: Vec::new(),
                    pings: 0,
                }),
            }
        }

        fn state(&self) -> MutexGuard<'_, State> {
            self.state.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// While offline every call, probes included, fails with no status.
        pub fn set_online(&self, online: bool) {
            self.state().online = online;
        }

        pub fn is_online(&self) -> bool {
            self.state().online
        }

        /// Fails the next record call (not probes) with `error`. Calls stack.
        pub fn fail_next(&self, error: RemoteError) {
            self.state().failures.push_back(error);
        }

        /// Rejects creates and updates carrying `field` with a 422.
        pub fn reject_field(&self, field: impl Into<String>) {
            self.state().rejected_field = Some(field.into());
        }

        /// Delays every call by `latency`.
        pub fn set_latency(&self, latency: Duration) {
            self.state().latency = latency;
        }

        /// Record calls received so far, in arrival order.
        pub fn calls(&self) -> Vec<RemoteCall> {
            self.state().calls.clone()
        }

        pub fn clear_calls(&self) {
            self.state().calls.clear();
        }

        /// Number of liveness probes received.
        pub fn ping_count(&self) -> usize {
            self.state().pings
        }

        /// Seeds a record directly, bypassing failure injection.
        pub fn insert(&self, mut fields: Fields) -> Record {
            strip_identifiers(&mut fields);
            let mut state = self.state();
            let record = Record::new(Self::assign_id(&mut state), fields);
            state.records.push(record.clone());
            record
        }

        /// Removes a record directly, bypassing failure injection.
        pub fn remove(&self, id: &CanonicalId) -> Option<Record> {
            let mut state = self.state();
            let index = Self::position(&state, id)?;
            Some(state.records.remove(index))
        }

        /// Current remote record set, in creation order.
        pub fn records(&self) -> Vec<Record> {
            self.state().records.clone()
        }

        pub fn record(&self, id: &CanonicalId) -> Option<Record> {
            let state = self.state();
            Self::position(&state, id).map(|i| state.records[i].clone())
        }

        fn assign_id(state: &mut State) -> CanonicalId {
            let id = CanonicalId::new(format!("srv-{}", state.next_id));
            state.next_id += 1;
            id
        }

        fn position(state: &State, id: &CanonicalId) -> Option<usize> {
            state
                .records
                .iter()
                .position(|r| r.canonical_id() == Some(id))
        }

        /// Records the call, then applies latency, offline mode and injected failures.
        async fn admit(&self, call: RemoteCall) -> RemoteResult<MutexGuard<'_, State>> {
            let latency = {
                let mut state = self.state();
                state.calls.push(call);
                state.latency
            };
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }

            let mut state = self.state();
            if !state.online {
                return Err(RemoteError::transport("connection refused"));
            }
            if let Some(err) = state.failures.pop_front() {
                return Err(err);
            }
            Ok(state)
        }

        fn check_fields(state: &State, fields: &Fields) -> RemoteResult<()> {
            match &state.rejected_field {
                Some(field) if fields.contains_key(field) => Err(RemoteError::new(
                    Some(422),
                    format!("field {field} is not allowed"),
                )
                .with_details(serde_json::json!({ "field": field }))),
                _ => Ok(()),
            }
        }

        fn not_found(id: &CanonicalId) -> RemoteError {
            RemoteError::new(Some(404), format!("record {id} not found"))
        }
    }

    impl Default for InMemoryRemote {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl RemoteClient for InMemoryRemote {
        async fn create(&self, fields: &Fields) -> RemoteResult<Record> {
            let fields = sendable(fields);
            let mut state = self.admit(RemoteCall::Create(fields.clone())).await?;
            Self::check_fields(&state, &fields)?;
            let record = Record::new(Self::assign_id(&mut state), fields);
            state.records.push(record.clone());
            Ok(record)
        }

        async fn list(&self) -> RemoteResult<Vec<Record>> {
            let state = self.admit(RemoteCall::List).await?;
            Ok(state.records.clone())
        }

        async fn get(&self, id: &CanonicalId) -> RemoteResult<Record> {
            let state = self.admit(RemoteCall::Get(id.clone())).await?;
            Self::position(&state, id)
                .map(|i| state.records[i].clone())
                .ok_or_else(|| Self::not_found(id))
        }

        async fn update(&self, id: &CanonicalId, fields: &Fields) -> RemoteResult<Record> {
            let fields = sendable(fields);
            let mut state = self
                .admit(RemoteCall::Update(id.clone(), fields.clone()))
                .await?;
            Self::check_fields(&state, &fields)?;
            let index = Self::position(&state, id).ok_or_else(|| Self::not_found(id))?;
            state.records[index].fields = fields;
            Ok(state.records[index].clone())
        }

        async fn delete(&self, id: &CanonicalId) -> RemoteResult<DeleteOutcome> {
            let mut state = self.admit(RemoteCall::Delete(id.clone())).await?;
            match Self::position(&state, id) {
                Some(index) => {
                    state.records.remove(index);
                    Ok(DeleteOutcome::Deleted)
                }
                None => Ok(DeleteOutcome::AlreadyDeleted),
            }
        }

        async fn ping(&self) -> RemoteResult<()> {
            let latency = {
                let mut state = self.state();
                state.pings += 1;
                state.latency
            };
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            if self.state().online {
                Ok(())
            } else {
                Err(RemoteError::transport("connection refused"))
            }
        }
    }
}
