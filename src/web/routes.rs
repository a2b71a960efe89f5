use axum::{
    Router,
    routing::{get, post},
};

use crate::web::handlers;
use crate::web::server::AppState;

/// The operator API.
pub fn create_routes() -> Router<AppState> {
    Router::new()
        // Blockchain
        .route("/blocks", get(handlers::blocks))
        .route("/block/{hash}", get(handlers::block_by_hash))
        .route("/transaction/{id}", get(handlers::transaction_by_id))
        .route("/address/{address}", get(handlers::address_info))
        .route(
            "/unspentTransactionOutputs",
            get(handlers::unspent_transaction_outputs),
        )
        // Wallet
        .route(
            "/myUnspentTransactionOutputs",
            get(handlers::my_unspent_transaction_outputs),
        )
        .route("/balance", get(handlers::balance))
        .route("/address", get(handlers::address))
        // P2P
        .route("/peers", get(handlers::peers))
        .route("/addPeer", post(handlers::add_peer))
        // Mining and transactions
        .route("/mineRawBlock", post(handlers::mine_raw_block))
        .route("/mineBlock", post(handlers::mine_block))
        .route("/mineTransaction", post(handlers::mine_transaction))
        .route("/sendTransaction", post(handlers::send_transaction))
        .route("/transactionPool", get(handlers::transaction_pool))
}
