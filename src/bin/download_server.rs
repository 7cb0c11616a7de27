use std::{net::SocketAddr, sync::Arc};

use histdata::{
    download_config_from_env, download_router, init_logging, log_app_bind, log_app_start,
    log_store_opened, logging_config_from_env, server_config_from_env, BinanceClient,
    DownloadJobManager, MarketStore, SqliteStore,
};

const BINANCE_TIMEOUT_MS: u64 = 15_000;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start("download_server", &logging_cfg);

    let server_cfg = server_config_from_env();
    let addr: SocketAddr = server_cfg.addr.parse()?;

    let store: Arc<dyn MarketStore> = Arc::new(SqliteStore::open(&server_cfg.store_path)?);
    log_store_opened("download_server", &server_cfg.store_path);

    let binance = match server_cfg.binance_base_url.as_deref() {
        Some(base_url) => BinanceClient::with_base_url(base_url, BINANCE_TIMEOUT_MS)?,
        None => BinanceClient::new()?,
    };
    let manager = DownloadJobManager::new(store, download_config_from_env())
        .with_exchange(Arc::new(binance));

    let app = download_router(Arc::new(manager));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    log_app_bind(bound_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
