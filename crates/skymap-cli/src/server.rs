//! Skymap graph server.
//!
//! Keeps an ordered list of inventory sources and one current graph snapshot.
//! Every change to the source list re-merges all sources, builds a fresh
//! snapshot off to the side and swaps it in, so a request sees either the old
//! graph or the new one in full.
//!
//! Endpoints:
//! - `GET  /healthz`
//! - `GET  /api/graph?regions=a,b&services=x,y`
//! - `GET  /api/filters`, `GET /api/stats`, `GET /api/sources`
//! - `GET  /api/node/<id>`
//! - `GET  /api/export.dot?regions=...&services=...`
//! - `POST /api/upload?name=<file>` (body: one inventory document)
//! - `POST /api/remove_source` (body: `{"index": n}`)
//! - `POST /api/clear`

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use skymap_graph::export::render_dot;
use skymap_graph::{GraphQuery, GraphSnapshot, SnapshotCell};
use skymap_inventory::InventoryDocument;
use tokio::net::TcpListener;
use url::form_urlencoded;

const DEFAULT_UPLOAD_NAME: &str = "upload.json";

#[derive(Debug, Clone)]
struct ServeConfig {
    listen: SocketAddr,
    max_upload_bytes: usize,
    ready_file: Option<PathBuf>,
    inputs: Vec<PathBuf>,
}

impl ServeConfig {
    fn from_args(args: crate::ServeArgs) -> Result<Self> {
        let max_upload_bytes = args
            .max_upload_mb
            .checked_mul(1024 * 1024)
            .and_then(|bytes| usize::try_from(bytes).ok())
            .ok_or_else(|| anyhow!("serve: --max-upload-mb {} is too large", args.max_upload_mb))?;
        Ok(Self {
            listen: args.listen,
            max_upload_bytes,
            ready_file: args.ready_file,
            inputs: args.inputs,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
struct SourceEntry {
    name: String,
    loaded_at: String,
}

/// Source names and documents, kept in load order.
#[derive(Default)]
struct SourceList {
    entries: Vec<SourceEntry>,
    docs: Vec<InventoryDocument>,
}

impl SourceList {
    fn push(&mut self, name: String, loaded_at: DateTime<Utc>, doc: InventoryDocument) {
        self.entries.push(SourceEntry {
            name,
            loaded_at: loaded_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        });
        self.docs.push(doc);
    }

    fn remove(&mut self, index: usize) -> Option<SourceEntry> {
        if index >= self.entries.len() {
            return None;
        }
        self.docs.remove(index);
        Some(self.entries.remove(index))
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.docs.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `sources` is held across a whole rebuild. Readers never touch it: the
/// listing and the snapshot are published copies behind short read locks.
struct ServerState {
    config: ServeConfig,
    sources: Mutex<SourceList>,
    listing: RwLock<Arc<Vec<SourceEntry>>>,
    snapshot: SnapshotCell,
}

/// Counts reported after every source mutation.
#[derive(Debug, Serialize)]
struct MutationResponse {
    #[serde(flatten)]
    outcome: Outcome,
    total_sources: usize,
    nodes: usize,
    edges: usize,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Outcome {
    Added { added: String },
    Removed { removed: String },
    Cleared { status: &'static str },
}

#[derive(Debug, Deserialize)]
struct RemoveSourceRequest {
    index: usize,
}

pub(crate) fn cmd_serve(args: crate::ServeArgs) -> Result<()> {
    let config = ServeConfig::from_args(args)?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow!("failed to initialize tokio runtime: {e}"))?;

    rt.block_on(async move { serve_async(config).await })
}

async fn serve_async(config: ServeConfig) -> Result<()> {
    let initial = tokio::task::spawn_blocking({
        let inputs = config.inputs.clone();
        move || load_initial_sources(&inputs)
    })
    .await
    .map_err(|e| anyhow!("serve: failed to join loader task: {e}"))??;

    let state = Arc::new(ServerState::new(config.clone(), initial));
    if !state.lock_sources()?.is_empty() {
        let state = Arc::clone(&state);
        tokio::task::spawn_blocking(move || state.rebuild())
            .await
            .map_err(|e| anyhow!("serve: failed to join rebuild task: {e}"))??;
    }

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("serve: failed to bind {}", config.listen))?;
    let bound = listener
        .local_addr()
        .context("serve: failed to read bound addr")?;

    let snapshot = state.snapshot.load();
    tracing::info!(
        addr = %bound,
        sources = snapshot.source_count,
        nodes = snapshot.graph.nodes.len(),
        edges = snapshot.graph.edges.len(),
        "listening on http://{bound}"
    );
    if let Some(path) = config.ready_file.as_ref() {
        write_ready_file(path, bound);
    }

    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .context("serve: accept failed")?;
        let io = TokioIo::new(stream);
        let state = Arc::clone(&state);

        tokio::spawn(async move {
            let service = service_fn(move |req| handle_request(req, Arc::clone(&state)));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(peer = %peer, error = %e, "connection error");
            }
        });
    }
}

fn load_initial_sources(paths: &[PathBuf]) -> Result<SourceList> {
    let mut sources = SourceList::default();
    for path in paths {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "skipping missing inventory file");
            continue;
        }
        let doc = InventoryDocument::load(path)
            .with_context(|| format!("serve: failed to load {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        tracing::info!(source = %name, "loaded inventory source");
        sources.push(name, Utc::now(), doc);
    }
    Ok(sources)
}

fn write_ready_file(path: &std::path::Path, bound: SocketAddr) {
    let payload = serde_json::json!({
        "version": "skymap_server_ready_v1",
        "addr": bound.to_string(),
        "pid": std::process::id(),
    });
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let text = serde_json::to_string_pretty(&payload).unwrap_or_default();
    // Readers poll for the final name, so it must appear complete.
    let staging = path.with_extension("tmp");
    let written = std::fs::write(&staging, text).and_then(|()| std::fs::rename(&staging, path));
    if let Err(e) = written {
        tracing::warn!(path = %path.display(), error = %e, "failed to write ready file");
    }
}

impl ServerState {
    fn new(config: ServeConfig, initial: SourceList) -> Self {
        Self {
            config,
            sources: Mutex::new(initial),
            listing: RwLock::new(Arc::new(Vec::new())),
            snapshot: SnapshotCell::new(),
        }
    }

    fn lock_sources(&self) -> Result<std::sync::MutexGuard<'_, SourceList>> {
        self.sources
            .lock()
            .map_err(|_| anyhow!("source list lock poisoned"))
    }

    /// Re-merge every source and install the resulting snapshot.
    fn rebuild(&self) -> Result<Arc<GraphSnapshot>> {
        let sources = self.lock_sources()?;
        Ok(self.publish(&sources))
    }

    /// Rebuild from `sources`, then swap in the matching listing.
    fn publish(&self, sources: &SourceList) -> Arc<GraphSnapshot> {
        let snapshot = self.snapshot.rebuild(&sources.docs);
        *self.listing.write() = Arc::new(sources.entries.clone());
        snapshot
    }

    fn listing(&self) -> Arc<Vec<SourceEntry>> {
        Arc::clone(&self.listing.read())
    }

    /// Apply `change` to the source list and rebuild while still holding the
    /// lock, so snapshots are installed in mutation order. `None` from
    /// `change` means nothing changed and nothing is rebuilt.
    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut SourceList) -> Option<T>,
    ) -> Result<Option<(T, usize, Arc<GraphSnapshot>)>> {
        let mut sources = self.lock_sources()?;
        let Some(out) = change(&mut sources) else {
            return Ok(None);
        };
        let snapshot = self.publish(&sources);
        Ok(Some((out, sources.len(), snapshot)))
    }
}

async fn handle_request(
    req: Request<Incoming>,
    state: Arc<ServerState>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    tracing::debug!(%method, path = %path, "request");

    let resp = match (method, path.as_str()) {
        (Method::GET, "/healthz") => text_response(StatusCode::OK, "ok\n", "text/plain; charset=utf-8"),
        (Method::GET, "/api/graph") => {
            let query = graph_query(req.uri().query());
            let snapshot = state.snapshot.load();
            json_response(StatusCode::OK, &snapshot.query(&query))
        }
        (Method::GET, "/api/filters") => json_response(StatusCode::OK, &state.snapshot.load().filters),
        (Method::GET, "/api/stats") => json_response(StatusCode::OK, &state.snapshot.load().stats),
        (Method::GET, "/api/sources") => json_response(StatusCode::OK, &*state.listing()),
        (Method::GET, "/api/export.dot") => {
            let query = graph_query(req.uri().query());
            let view = state.snapshot.load().query(&query);
            text_response(StatusCode::OK, &render_dot(&view), "text/vnd.graphviz; charset=utf-8")
        }
        (Method::GET, p) if p.starts_with("/api/node/") => handle_node(&state, &p["/api/node/".len()..]),
        (Method::POST, "/api/upload") => return handle_upload(req, &state).await,
        (Method::POST, "/api/remove_source") => {
            let body = req.into_body().collect().await?.to_bytes();
            handle_remove_source(&state, &body).await
        }
        (Method::POST, "/api/clear") => handle_clear(&state).await,
        _ => json_error(StatusCode::NOT_FOUND, "not found"),
    };

    Ok(resp)
}

fn handle_node(state: &ServerState, raw_id: &str) -> Response<Full<Bytes>> {
    let id = match urlencoding::decode(raw_id) {
        Ok(id) => id,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, &format!("invalid node id: {e}")),
    };
    match state.snapshot.load().node_detail(&id) {
        Some((node, edges)) => json_response(
            StatusCode::OK,
            &serde_json::json!({ "node": node, "edges": edges }),
        ),
        None => json_error(StatusCode::NOT_FOUND, &format!("node not found: {id}")),
    }
}

async fn handle_upload(
    req: Request<Incoming>,
    state: &Arc<ServerState>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let limit = state.config.max_upload_bytes;

    let params = parse_query_params(req.uri().query());
    let name = params
        .get("name")
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_UPLOAD_NAME)
        .to_string();

    let body = match Limited::new(req.into_body(), limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.is::<LengthLimitError>() => return Ok(too_large(limit)),
        Err(e) => {
            return Ok(json_error(
                StatusCode::BAD_REQUEST,
                &format!("failed to read upload body: {e}"),
            ))
        }
    };

    let state = Arc::clone(state);
    let result = tokio::task::spawn_blocking(move || -> Result<Response<Full<Bytes>>> {
        let doc = match InventoryDocument::from_slice(&body) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(source = %name, error = %e, "rejected upload");
                return Ok(json_error(
                    StatusCode::BAD_REQUEST,
                    &format!("invalid inventory document: {e}"),
                ));
            }
        };
        let changed = state.mutate(|sources| {
            sources.push(name.clone(), Utc::now(), doc);
            Some(())
        })?;
        let Some(((), total_sources, snapshot)) = changed else {
            return Err(anyhow!("upload did not change the source list"));
        };
        tracing::info!(source = %name, total_sources, "added inventory source");
        Ok(mutation_response(Outcome::Added { added: name }, total_sources, &snapshot))
    })
    .await;

    Ok(match result {
        Ok(Ok(resp)) => resp,
        Ok(Err(e)) => json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
        Err(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("failed to join upload task: {e}"),
        ),
    })
}

async fn handle_remove_source(state: &Arc<ServerState>, body: &[u8]) -> Response<Full<Bytes>> {
    let request: RemoveSourceRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => {
            return json_error(
                StatusCode::BAD_REQUEST,
                &format!("expected {{\"index\": <n>}}: {e}"),
            )
        }
    };

    let index = request.index;
    let state = Arc::clone(state);
    let result = tokio::task::spawn_blocking(move || state.mutate(|sources| sources.remove(index)))
    .await;

    match result {
        Ok(Ok(Some((removed, total_sources, snapshot)))) => {
            tracing::info!(source = %removed.name, total_sources, "removed inventory source");
            mutation_response(Outcome::Removed { removed: removed.name }, total_sources, &snapshot)
        }
        Ok(Ok(None)) => json_error(
            StatusCode::BAD_REQUEST,
            &format!("invalid source index {index}"),
        ),
        Ok(Err(e)) => json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
        Err(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("failed to join remove task: {e}"),
        ),
    }
}

async fn handle_clear(state: &Arc<ServerState>) -> Response<Full<Bytes>> {
    let state = Arc::clone(state);
    let result = tokio::task::spawn_blocking(move || {
        state.mutate(|sources| {
            sources.clear();
            Some(())
        })
    })
    .await;

    match result {
        Ok(Ok(Some(((), total_sources, snapshot)))) => {
            tracing::info!("cleared inventory sources");
            mutation_response(Outcome::Cleared { status: "cleared" }, total_sources, &snapshot)
        }
        Ok(Ok(None)) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "clear did not run"),
        Ok(Err(e)) => json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
        Err(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("failed to join clear task: {e}"),
        ),
    }
}

fn mutation_response(
    outcome: Outcome,
    total_sources: usize,
    snapshot: &GraphSnapshot,
) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::OK,
        &MutationResponse {
            outcome,
            total_sources,
            nodes: snapshot.graph.nodes.len(),
            edges: snapshot.graph.edges.len(),
        },
    )
}

fn too_large(limit: usize) -> Response<Full<Bytes>> {
    json_error(
        StatusCode::PAYLOAD_TOO_LARGE,
        &format!("upload exceeds the {limit} byte limit"),
    )
}

fn graph_query(query: Option<&str>) -> GraphQuery {
    let params = parse_query_params(query);
    GraphQuery::from_params(
        params.get("regions").map(String::as_str),
        params.get("services").map(String::as_str),
    )
}

fn parse_query_params(query: Option<&str>) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let Some(q) = query else {
        return out;
    };
    for (k, v) in form_urlencoded::parse(q.as_bytes()) {
        out.insert(k.into_owned(), v.into_owned());
    }
    out
}

fn text_response(status: StatusCode, body: &str, content_type: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, content_type)
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from_static(b"internal error"))))
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{\"error\":\"serialize\"}".to_vec());
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from_static(b"{\"error\":\"internal\"}"))))
}

fn json_error(status: StatusCode, msg: &str) -> Response<Full<Bytes>> {
    let v = serde_json::json!({ "error": msg });
    json_response(status, &v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_list_keeps_entries_and_documents_aligned() {
        let mut sources = SourceList::default();
        sources.push("a.json".into(), Utc::now(), InventoryDocument::new());
        sources.push("b.json".into(), Utc::now(), InventoryDocument::new());

        assert!(sources.remove(5).is_none());
        let removed = sources.remove(0).unwrap();
        assert_eq!(removed.name, "a.json");
        assert_eq!(sources.len(), 1);
        assert_eq!(sources.docs.len(), 1);
        assert_eq!(sources.entries[0].name, "b.json");

        sources.clear();
        assert!(sources.is_empty());
        assert!(sources.docs.is_empty());
    }

    fn test_state() -> ServerState {
        let config = ServeConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            max_upload_bytes: 1024,
            ready_file: None,
            inputs: Vec::new(),
        };
        ServerState::new(config, SourceList::default())
    }

    #[test]
    fn listing_is_readable_while_the_source_list_is_locked() {
        let state = test_state();
        state
            .mutate(|sources| {
                sources.push("a.json".into(), Utc::now(), InventoryDocument::new());
                Some(())
            })
            .unwrap();

        // A rebuild in progress holds this guard for its whole duration.
        let held = state.lock_sources().unwrap();
        let listing = state.listing();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, "a.json");
        assert_eq!(state.snapshot.load().source_count, 1);
        drop(held);

        state.mutate(|sources| sources.remove(0)).unwrap();
        assert!(state.listing().is_empty());
    }

    #[test]
    fn mutation_payloads_use_flat_wire_names() {
        let body = serde_json::to_value(MutationResponse {
            outcome: Outcome::Cleared { status: "cleared" },
            total_sources: 0,
            nodes: 0,
            edges: 0,
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({ "status": "cleared", "total_sources": 0, "nodes": 0, "edges": 0 })
        );

        let body = serde_json::to_value(MutationResponse {
            outcome: Outcome::Removed { removed: "a.json".into() },
            total_sources: 1,
            nodes: 3,
            edges: 2,
        })
        .unwrap();
        assert_eq!(body["removed"], "a.json");
        assert_eq!(body["total_sources"], 1);
    }

    #[test]
    fn graph_query_decodes_parameters() {
        let query = graph_query(Some("regions=us-east-1%2Cglobal&services=_none_"));
        assert_eq!(
            query.regions,
            skymap_graph::FacetFilter::one_of(["global", "us-east-1"])
        );
        assert_eq!(query.services, skymap_graph::FacetFilter::NoMatches);
        assert!(graph_query(None).is_unfiltered());
    }

    #[test]
    fn missing_startup_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("present.json");
        std::fs::write(&present, r#"{"metadata": {"regions_scanned": ["us-east-1"]}}"#).unwrap();

        let sources =
            load_initial_sources(&[dir.path().join("missing.json"), present]).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources.entries[0].name, "present.json");
    }
}
