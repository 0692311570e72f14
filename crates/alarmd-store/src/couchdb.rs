//! CouchDB trigger store.
//!
//! Plain HTTP against one database. Trigger ids contain `/`, so every document
//! URL is built segment-wise to get it percent-encoded. The change feed is the
//! continuous `_changes` feed read as newline-delimited JSON; a dropped
//! connection is reopened from the last sequence seen.

use std::collections::HashMap;
use std::time::Duration;

use alarmd_core::error::{AlarmError, Result};
use alarmd_core::traits::{Change, ChangeStream, FeedPosition, TriggerStore, WorkerTriggers};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub const VIEWS_DESIGN_DOC: &str = "triggerViews";
pub const FILTERS_DESIGN_DOC: &str = "triggerFilters";
pub const TRIGGERS_BY_WORKER: &str = "triggers_by_worker";

const HEARTBEAT_MS: u64 = 30_000;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// View map: active alarm documents keyed by worker, counted by `_count`.
const VIEW_MAP: &str = "function (doc) { if (doc.maxTriggers && (!doc.status || doc.status.active === true)) { emit(doc.worker || 'worker0', 1); } }";

/// Feed filter: alarm documents of the requested worker.
const FEED_FILTER: &str = "function (doc, req) { return doc.maxTriggers && ((!doc.worker && req.query.worker === 'worker0') || (doc.worker === req.query.worker)); }";

#[derive(Clone)]
pub struct CouchStore {
    client: reqwest::Client,
    db: Url,
    username: Option<String>,
    password: Option<String>,
}

impl CouchStore {
    pub fn new(
        url: &str,
        db_name: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self> {
        let mut db = Url::parse(url)
            .map_err(|e| AlarmError::Config(format!("invalid store url '{url}': {e}")))?;
        db.path_segments_mut()
            .map_err(|_| AlarmError::Config(format!("store url '{url}' cannot be a base")))?
            .pop_if_empty()
            .push(db_name);
        Ok(Self {
            client: reqwest::Client::new(),
            db,
            username: username.map(String::from),
            password: password.map(String::from),
        })
    }

    /// URL of `{db}/{segments...}`, each segment percent-encoded.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.db.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.username {
            Some(user) => builder.basic_auth(user, self.password.as_ref()),
            None => builder,
        }
    }

    /// Create the database and design documents if they are missing.
    pub async fn ensure_database(&self) -> Result<()> {
        let resp = self
            .request(Method::PUT, self.db.clone())
            .send()
            .await
            .map_err(transport)?;
        match resp.status() {
            s if s.is_success() => tracing::info!("🗄️ Created trigger database {}", self.db),
            StatusCode::PRECONDITION_FAILED => {}
            _ => {
                check(resp).await?;
            }
        }

        self.ensure_design_doc(
            VIEWS_DESIGN_DOC,
            json!({
                "views": {
                    TRIGGERS_BY_WORKER: { "map": VIEW_MAP, "reduce": "_count" }
                }
            }),
        )
        .await?;
        self.ensure_design_doc(
            FILTERS_DESIGN_DOC,
            json!({ "filters": { TRIGGERS_BY_WORKER: FEED_FILTER } }),
        )
        .await
    }

    async fn ensure_design_doc(&self, name: &str, body: Value) -> Result<()> {
        let url = self.url(&["_design", name]);
        let resp = self
            .request(Method::GET, url.clone())
            .send()
            .await
            .map_err(transport)?;
        if resp.status() != StatusCode::NOT_FOUND {
            check(resp).await?;
            return Ok(());
        }
        let resp = self
            .request(Method::PUT, url)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        match check(resp).await {
            Ok(_) => {
                tracing::info!("📐 Created design document _design/{name}");
                Ok(())
            }
            // Another host created it first.
            Err(e) if e.is_conflict() => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn view_url(&self) -> Url {
        self.url(&["_design", VIEWS_DESIGN_DOC, "_view", TRIGGERS_BY_WORKER])
    }

    async fn open_feed(&self, worker: &str, since: &str) -> Result<Response> {
        let mut url = self.url(&["_changes"]);
        url.query_pairs_mut()
            .append_pair("feed", "continuous")
            .append_pair("include_docs", "true")
            .append_pair("heartbeat", &HEARTBEAT_MS.to_string())
            .append_pair(
                "filter",
                &format!("{FILTERS_DESIGN_DOC}/{TRIGGERS_BY_WORKER}"),
            )
            .append_pair("worker", worker)
            .append_pair("since", since);
        let resp = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(transport)?;
        check(resp).await
    }
}

fn transport(e: reqwest::Error) -> AlarmError {
    AlarmError::Store(format!("request failed: {e}"))
}

/// Map non-2xx responses onto the store error vocabulary.
async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => AlarmError::NotFound(body),
        StatusCode::CONFLICT => AlarmError::Conflict(body),
        _ => AlarmError::Store(format!("{status}: {body}")),
    })
}

#[derive(Deserialize)]
struct PutResponse {
    rev: String,
}

#[derive(Deserialize)]
struct ViewResponse {
    #[serde(default)]
    rows: Vec<ViewRow>,
}

/// Rows stay raw so one bad document cannot fail the whole response.
#[derive(Deserialize)]
struct ViewRow {
    #[serde(default)]
    id: String,
    #[serde(default)]
    key: Value,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    doc: Option<Value>,
}

#[derive(Deserialize)]
struct FeedLine {
    seq: Option<Value>,
    id: Option<String>,
    #[serde(default)]
    deleted: bool,
    doc: Option<Value>,
}

fn seq_string(seq: &Value) -> String {
    match seq {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse one line of the continuous feed. Heartbeats and the trailing
/// `last_seq` line yield `None`. A document that is not a valid trigger
/// still yields a change, with `malformed` set.
fn parse_feed_line(line: &str) -> Option<Result<Change>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let parsed: FeedLine = match serde_json::from_str(line) {
        Ok(parsed) => parsed,
        Err(e) => return Some(Err(e.into())),
    };
    let id = parsed.id?;
    let seq = parsed.seq.as_ref().map(seq_string).unwrap_or_default();
    Some(Ok(Change::from_raw(id, seq, parsed.deleted, parsed.doc)))
}

/// Pump the continuous feed into `tx`, reconnecting from the last sequence.
async fn pump_feed(
    store: CouchStore,
    worker: String,
    mut resp: Response,
    mut since: String,
    tx: mpsc::Sender<Result<Change>>,
) {
    loop {
        let mut body = resp.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::warn!("⚠️ Change feed read error: {e}");
                    break;
                }
            };
            buffer.extend_from_slice(&chunk);
            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let Some(change) = parse_feed_line(&String::from_utf8_lossy(&line)) else {
                    continue;
                };
                if let Ok(change) = &change {
                    if !change.seq.is_empty() {
                        since = change.seq.clone();
                    }
                }
                if tx.send(change).await.is_err() {
                    return;
                }
            }
        }

        loop {
            if tx.is_closed() {
                return;
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
            match store.open_feed(&worker, &since).await {
                Ok(next) => {
                    tracing::info!("🔁 Change feed reconnected for {worker} at {since}");
                    resp = next;
                    break;
                }
                Err(e) => tracing::warn!("⚠️ Change feed reconnect failed: {e}"),
            }
        }
    }
}

#[async_trait]
impl TriggerStore for CouchStore {
    fn name(&self) -> &str {
        "couchdb"
    }

    async fn get_raw(&self, id: &str) -> Result<Value> {
        let resp = self
            .request(Method::GET, self.url(&[id]))
            .send()
            .await
            .map_err(transport)?;
        let resp = check(resp).await.map_err(|e| match e {
            AlarmError::NotFound(_) => AlarmError::NotFound(id.to_string()),
            other => other,
        })?;
        resp.json().await.map_err(transport)
    }

    async fn insert_raw(&self, id: &str, doc: &Value) -> Result<String> {
        let resp = self
            .request(Method::PUT, self.url(&[id]))
            .json(doc)
            .send()
            .await
            .map_err(transport)?;
        let put: PutResponse = check(resp).await?.json().await.map_err(transport)?;
        Ok(put.rev)
    }

    async fn delete(&self, id: &str, rev: &str) -> Result<()> {
        let mut url = self.url(&[id]);
        url.query_pairs_mut().append_pair("rev", rev);
        let resp = self
            .request(Method::DELETE, url)
            .send()
            .await
            .map_err(transport)?;
        check(resp).await.map(|_| ())
    }

    async fn triggers_by_worker(&self, worker: &str) -> Result<WorkerTriggers> {
        let mut url = self.view_url();
        url.query_pairs_mut()
            .append_pair("key", &Value::String(worker.to_string()).to_string())
            .append_pair("reduce", "false")
            .append_pair("include_docs", "true");
        let resp = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(transport)?;
        let view: ViewResponse = check(resp).await?.json().await.map_err(transport)?;
        let mut triggers = WorkerTriggers::default();
        for row in view.rows {
            if let Some(doc) = row.doc {
                triggers.push_raw(&row.id, doc);
            }
        }
        Ok(triggers)
    }

    async fn worker_counts(&self) -> Result<HashMap<String, u64>> {
        let mut url = self.view_url();
        url.query_pairs_mut().append_pair("group", "true");
        let resp = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(transport)?;
        let view: ViewResponse = check(resp).await?.json().await.map_err(transport)?;
        Ok(view
            .rows
            .into_iter()
            .filter_map(|row| Some((row.key.as_str()?.to_string(), row.value.as_u64()?)))
            .collect())
    }

    async fn changes(&self, worker: &str, since: FeedPosition) -> Result<ChangeStream> {
        let since = match since {
            FeedPosition::Now => "now".to_string(),
            FeedPosition::After(seq) => seq,
        };
        let resp = self.open_feed(worker, &since).await?;
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(pump_feed(
            self.clone(),
            worker.to_string(),
            resp,
            since,
            tx,
        ));
        Ok(ReceiverStream::new(rx).boxed())
    }
}
