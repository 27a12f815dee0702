//! HTTP transport (§6): the axum surface that calls into `iris_core`'s
//! query facade and submission pipeline. Grounded on `dolos-minibf`'s
//! `Router`/`Facade`/`IntoResponse` idiom (`crates/minibf/src/lib.rs`,
//! `error.rs`) — routes extract state, call a facade method, and map
//! its `Result` down to a JSON/CBOR response.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use iris_core::error::{ErrorKind, FacadeError};
use iris_core::facade::is_valid_address;
use iris_core::model::{SelectRequest, Utxo};
use iris_core::Gateway;
use serde::Deserialize;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::{self, TraceLayer};
use tracing::Level;

use crate::config::Settings;

/// Gates every handler touching mempool-visible state (§5 "Global
/// discipline"). Held for the handler's full duration; the nesting
/// order with the per-subsystem locks inside `Gateway` is global then
/// subsystem, never the reverse.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub global_lock: Arc<RwLock<()>>,
    pub config_dir: PathBuf,
}

pub async fn serve(settings: Settings, gateway: Arc<Gateway>) -> Result<(), std::io::Error> {
    let state = AppState {
        gateway: gateway.clone(),
        global_lock: Arc::new(RwLock::new(())),
        config_dir: settings.config_dir.clone(),
    };

    let app = Router::new()
        .route("/api/address/{addr}/utxos", get(address_utxos).post(select_coins))
        .route("/api/block/{block_id}", get(block))
        .route("/api/block/{block_id}/tx/{index}", get(block_tx))
        .route("/api/chain/tip", get(chain_tip))
        .route("/api/parameters", get(parameters))
        .route("/api/policy/{policy_hex}/assets", get(policy_assets))
        .route("/api/policy/{policy_hex}/asset/{asset_hex}/addresses", get(asset_addresses))
        .route("/api/mempool", get(mempool_hashes))
        .route("/api/tx", post(submit_tx))
        .route("/api/tx/{tx_id}", get(tx_content))
        .route("/api/tx/{tx_id}/block", get(tx_block))
        .route("/api/tx/{tx_id}/output/{index}", get(tx_output))
        .route("/api/utxo/{utxo_id}", get(utxo_by_id))
        .route("/config/wallet", get(config_wallet))
        .route("/config/collateral", get(config_collateral))
        .route("/api/health", get(health))
        .with_state(state.clone())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(settings.listen_address).await?;
    tracing::info!(addr = %settings.listen_address, "listening");

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    let tip_poller = tokio::spawn(tip_poller(state.clone()));
    let index_retry = tokio::spawn(index_creation_retry(state.clone()));

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    tip_poller.abort();
    index_retry.abort();
    Ok(())
}

/// §5 background task (a): polls the node's tip every 5s and notifies
/// the chain store once sync is caught up (`syncProgress` starts with
/// "100"), so volatile/immutable resync only happens near the tip.
async fn tip_poller(state: AppState) {
    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    loop {
        ticker.tick().await;
        match state.gateway.bridge.tip().await {
            Ok(tip) if tip.sync_progress.starts_with("100") => {
                if let Err(err) = state.gateway.chain.notify_tip(&tip.hash).await {
                    tracing::warn!(%err, "notify_tip failed");
                }
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(%err, "tip poll failed"),
        }
    }
}

/// §5 background task (b): retries index creation every 120s until it
/// succeeds once, then stops (creating them twice is harmless but
/// pointless).
async fn index_creation_retry(state: AppState) {
    loop {
        match state.gateway.sql.create_indices().await {
            Ok(()) => return,
            Err(err) => {
                tracing::warn!(%err, "create_indices failed, retrying in 120s");
                tokio::time::sleep(Duration::from_secs(120)).await;
            }
        }
    }
}

fn facade_error_response(err: FacadeError) -> Response {
    let status = match err.kind() {
        ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::SubmitFailure => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}

/// The UTXO-by-id consumed case (S5/§4.9): 409 + `Consumed-By` header,
/// with the full UTXO still in the body — unlike `facade_error_response`,
/// which only ever has an error string to report.
fn utxo_consumed_response(utxo: &Utxo) -> Response {
    let mut response = (StatusCode::CONFLICT, Json(utxo)).into_response();
    if let Some(by) = &utxo.consumed_by {
        if let Ok(value) = HeaderValue::from_str(by) {
            response.headers_mut().insert("Consumed-By", value);
        }
    }
    response
}

/// `Accept: application/cbor` → raw bytes; `application/json` →
/// `{cborHex}`; anything else → hex text (§6 "Content negotiation").
fn negotiate(headers: &HeaderMap, raw: Vec<u8>) -> Response {
    let accept = headers.get(axum::http::header::ACCEPT).and_then(|v| v.to_str().ok()).unwrap_or("");
    if accept.contains("application/cbor") {
        ([(axum::http::header::CONTENT_TYPE, "application/cbor")], raw).into_response()
    } else if accept.contains("application/json") {
        Json(serde_json::json!({ "cborHex": hex::encode(raw) })).into_response()
    } else {
        hex::encode(raw).into_response()
    }
}

#[derive(Deserialize)]
struct AddressUtxosQuery {
    asset: Option<String>,
}

async fn address_utxos(
    State(state): State<AppState>,
    Path(addr): Path<String>,
    Query(query): Query<AddressUtxosQuery>,
    headers: HeaderMap,
) -> Response {
    if !is_valid_address(&addr, state.gateway.config.network) {
        return StatusCode::NOT_FOUND.into_response();
    }
    let _guard = state.global_lock.read().await;
    match state.gateway.facade().address_utxos(&addr, query.asset.as_deref()).await {
        Ok(utxos) => {
            let accept = headers.get(axum::http::header::ACCEPT).and_then(|v| v.to_str().ok()).unwrap_or("");
            if accept.contains("application/cbor") {
                let entries: Result<Vec<_>, FacadeError> = utxos.iter().map(iris_core::facade::encode_utxo_cbor_entry).collect();
                match entries {
                    Ok(entries) => {
                        let bytes = iris_core::codec::DecodedValue::list_pref(entries).to_cbor_bytes();
                        ([(axum::http::header::CONTENT_TYPE, "application/cbor")], bytes).into_response()
                    }
                    Err(err) => facade_error_response(err),
                }
            } else {
                Json(utxos).into_response()
            }
        }
        Err(err) => facade_error_response(err),
    }
}

async fn select_coins(
    State(state): State<AppState>,
    Path(addr): Path<String>,
    Json(req): Json<SelectRequest>,
) -> Response {
    if !is_valid_address(&addr, state.gateway.config.network) {
        return StatusCode::NOT_FOUND.into_response();
    }
    let _guard = state.global_lock.write().await;
    match state.gateway.facade().select_coins(&addr, &req).await {
        Ok(utxos) => Json(utxos).into_response(),
        Err(err) => facade_error_response(err),
    }
}

async fn block(State(state): State<AppState>, Path(block_id): Path<String>) -> Response {
    match state.gateway.facade().block(&block_id).await {
        Ok(bytes) => ([(axum::http::header::CONTENT_TYPE, "application/cbor")], bytes).into_response(),
        Err(err) => facade_error_response(err),
    }
}

async fn block_tx(State(state): State<AppState>, Path((block_id, index)): Path<(String, i64)>) -> Response {
    match state.gateway.facade().block_tx(&block_id, index).await {
        Ok(bytes) => ([(axum::http::header::CONTENT_TYPE, "application/cbor")], bytes).into_response(),
        Err(err) => facade_error_response(err),
    }
}

async fn chain_tip(State(state): State<AppState>) -> Response {
    match state.gateway.bridge.tip().await {
        Ok(tip) => Json(tip).into_response(),
        Err(err) => facade_error_response(FacadeError::NodeBridge(err)),
    }
}

async fn parameters(State(state): State<AppState>) -> Response {
    let result = state
        .gateway
        .parameters
        .get(&state.gateway.bridge, &state.gateway.sql, &state.gateway.config)
        .await;
    match result {
        Ok(params) => Json(params).into_response(),
        Err(err) => facade_error_response(FacadeError::NodeBridge(err)),
    }
}

async fn policy_assets(State(state): State<AppState>, Path(policy_hex): Path<String>) -> Response {
    match state.gateway.facade().policy_assets(&policy_hex).await {
        Ok(assets) => Json(assets).into_response(),
        Err(err) => facade_error_response(err),
    }
}

async fn asset_addresses(State(state): State<AppState>, Path((policy_hex, asset_hex)): Path<(String, String)>) -> Response {
    let asset = format!("{policy_hex}{asset_hex}");
    match state.gateway.facade().asset_addresses(&asset).await {
        Ok(addrs) => Json(addrs).into_response(),
        Err(err) => facade_error_response(err),
    }
}

async fn mempool_hashes(State(state): State<AppState>) -> Response {
    let _guard = state.global_lock.read().await;
    let mut hashes = state.gateway.mempool.hashes().await;
    hashes.sort();
    Json(hashes).into_response()
}

async fn submit_tx(State(state): State<AppState>, headers: HeaderMap, body: axum::body::Bytes) -> Response {
    let content_type = headers.get(axum::http::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or("").to_string();
    let _guard = state.global_lock.write().await;
    let params = match state
        .gateway
        .parameters
        .get(&state.gateway.bridge, &state.gateway.sql, &state.gateway.config)
        .await
    {
        Ok(p) => p,
        Err(err) => return facade_error_response(FacadeError::NodeBridge(err)),
    };
    let result = iris_core::submit::submit_tx(
        &body,
        &content_type,
        &state.gateway.config,
        &state.gateway.bridge,
        &params,
        &state.gateway.mempool,
    )
    .await;
    match result {
        Ok(response) => Json(response).into_response(),
        Err(err) => facade_error_response(FacadeError::Submit(err)),
    }
}

async fn tx_content(State(state): State<AppState>, Path(tx_id): Path<String>, headers: HeaderMap) -> Response {
    let _guard = state.global_lock.read().await;
    match state.gateway.facade().tx_by_id(&tx_id).await {
        Ok(bytes) => negotiate(&headers, bytes),
        Err(err) => facade_error_response(err),
    }
}

async fn tx_block(State(state): State<AppState>, Path(tx_id): Path<String>) -> Response {
    match state.gateway.facade().tx_block(&tx_id).await {
        Ok(info) => Json(info).into_response(),
        Err(err) => facade_error_response(err),
    }
}

async fn tx_output(State(state): State<AppState>, Path((tx_id, index)): Path<(String, u32)>, headers: HeaderMap) -> Response {
    let _guard = state.global_lock.read().await;
    match state.gateway.facade().tx_output(&tx_id, index).await {
        Ok(bytes) => negotiate(&headers, bytes),
        Err(err) => facade_error_response(err),
    }
}

async fn utxo_by_id(State(state): State<AppState>, Path(utxo_id): Path<String>, headers: HeaderMap) -> Response {
    if utxo_id.len() < 65 {
        return StatusCode::NOT_FOUND.into_response();
    }
    let (tx_id, index) = utxo_id.split_at(64);
    let Ok(index) = index.parse::<u32>() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let _guard = state.global_lock.read().await;
    match state.gateway.facade().utxo_by_id(tx_id, index).await {
        Ok(utxo) if utxo.is_spent() => utxo_consumed_response(&utxo),
        Ok(utxo) => {
            let accept = headers.get(axum::http::header::ACCEPT).and_then(|v| v.to_str().ok()).unwrap_or("");
            if accept.contains("application/cbor") {
                match iris_core::facade::encode_utxo_cbor_entry(&utxo) {
                    Ok(entry) => ([(axum::http::header::CONTENT_TYPE, "application/cbor")], entry.to_cbor_bytes()).into_response(),
                    Err(err) => facade_error_response(err),
                }
            } else {
                Json(utxo).into_response()
            }
        }
        Err(err) => facade_error_response(err),
    }
}

async fn config_wallet(State(state): State<AppState>) -> Response {
    Json(serde_json::json!({ "configured": state.gateway.config.wallet.mnemonic.is_some() })).into_response()
}

async fn config_collateral(State(state): State<AppState>) -> Response {
    Json(serde_json::json!({ "collateralUtxoId": state.gateway.config.wallet.collateral_utxo_id })).into_response()
}

/// Ambient liveness/readiness probe (SPEC_FULL §3.1 `HealthStatus`):
/// ready iff the node bridge answers a tip query, with the tip
/// attached when it does. No lock — it never observes mempool state.
async fn health(State(state): State<AppState>) -> Response {
    match state.gateway.bridge.tip().await {
        Ok(tip) => Json(serde_json::json!({ "ready": true, "tip": tip })).into_response(),
        Err(_) => Json(serde_json::json!({ "ready": false, "tip": null })).into_response(),
    }
}

pub type Listener = SocketAddr;
