//! Operator endpoint handlers.
//!
//! Responses are the raw JSON forms of the domain types; failures use the
//! error envelope. Mining endpoints answer `null` when the mined block was
//! not accepted onto the chain.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use serde_json::{Value, json};

use crate::core::amount::Amount;
use crate::core::block::Block;
use crate::core::transaction::{Transaction, UnspentTxOut};
use crate::error::{NodeError, Result};
use crate::web::models::{decode_hex, get_param, get_str_param};
use crate::web::server::AppState;

/// Bodies parse leniently; missing or malformed ones surface as missing
/// parameters, in the error envelope.
fn parse_body(bytes: &Bytes) -> Value {
    serde_json::from_slice(bytes).unwrap_or(Value::Null)
}

pub async fn blocks(State(state): State<AppState>) -> Json<Vec<Block>> {
    Json(state.node.get_blocks().await)
}

pub async fn block_by_hash(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<Block>> {
    let hash = decode_hex(&hash)?;
    state
        .node
        .get_block_with_hash(&hash)
        .await
        .map(Json)
        .ok_or_else(|| NodeError::not_found("block not found"))
}

pub async fn transaction_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Transaction>> {
    let id = decode_hex(&id)?;
    state
        .node
        .get_transaction_with_id(&id)
        .await
        .map(Json)
        .ok_or_else(|| NodeError::not_found("transaction not found"))
}

pub async fn address_info(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<Value>> {
    let address = decode_hex(&address)?;
    let unspent_tx_outs = state.node.unspent_tx_outs_for_address(&address).await;
    Ok(Json(json!({ "unspentTxOuts": unspent_tx_outs })))
}

pub async fn unspent_transaction_outputs(
    State(state): State<AppState>,
) -> Json<Vec<UnspentTxOut>> {
    Json(state.node.get_unspent_tx_outs().await)
}

pub async fn my_unspent_transaction_outputs(
    State(state): State<AppState>,
) -> Json<Vec<UnspentTxOut>> {
    Json(state.node.my_unspent_tx_outs().await)
}

pub async fn balance(State(state): State<AppState>) -> Json<Value> {
    let balance = state.node.get_balance().await;
    Json(json!({ "balance": balance }))
}

pub async fn address(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "address": state.node.wallet().get_address_hex() }))
}

pub async fn peers(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "peers": state.engine.peers() }))
}

pub async fn add_peer(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>> {
    let body = parse_body(&body);
    let peer = get_str_param(&body, "peer")?;
    let added = crate::network::connect_to_peer(&state.engine, peer).await?;
    Ok(Json(json!({ "peer_added": added })))
}

pub async fn mine_raw_block(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>> {
    let body = parse_body(&body);
    let data: Vec<Transaction> = serde_json::from_value(get_param(&body, "data")?.clone())
        .map_err(|e| NodeError::bad_request(format!("invalid transaction data: {}", e)))?;
    let block = state.node.mine_raw_block(data).await;
    Ok(Json(serde_json::to_value(block).unwrap_or(Value::Null)))
}

pub async fn mine_block(State(state): State<AppState>) -> Json<Value> {
    let block = state.node.mine_block().await;
    Json(serde_json::to_value(block).unwrap_or(Value::Null))
}

pub async fn mine_transaction(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>> {
    let body = parse_body(&body);
    let (address, amount) = payment_params(&body)?;
    let block = state.node.mine_transaction(address, amount).await?;
    Ok(Json(serde_json::to_value(block).unwrap_or(Value::Null)))
}

pub async fn send_transaction(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Transaction>> {
    let body = parse_body(&body);
    let (address, amount) = payment_params(&body)?;
    let tx = state.node.send_transaction(address, amount).await?;
    Ok(Json(tx))
}

pub async fn transaction_pool(State(state): State<AppState>) -> Json<Vec<Transaction>> {
    Json(state.node.get_pool_transactions().await)
}

/// The `{address, amount}` pair shared by the payment endpoints.
fn payment_params(body: &Value) -> Result<(Vec<u8>, Amount)> {
    let address = decode_hex(get_str_param(body, "address")?)?;
    let amount: Amount = serde_json::from_value(get_param(body, "amount")?.clone())
        .map_err(|e| NodeError::bad_request(format!("invalid amount: {}", e)))?;
    Ok((address, amount))
}
