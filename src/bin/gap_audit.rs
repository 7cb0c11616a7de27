use std::sync::Arc;

use histdata::{
    download_config_from_env, init_logging, log_app_start, log_store_opened,
    logging_config_from_env, server_config_from_env, DownloadJobManager, SqliteStore, Timeframe,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start("gap_audit", &logging_cfg);

    let symbol = std::env::var("HISTDATA_AUDIT_SYMBOL").unwrap_or_else(|_| "BTCUSDT".to_string());
    let timeframe: Timeframe = std::env::var("HISTDATA_AUDIT_TIMEFRAME")
        .unwrap_or_else(|_| "1h".to_string())
        .parse()?;

    let server_cfg = server_config_from_env();
    let store = SqliteStore::open(&server_cfg.store_path)?;
    log_store_opened("gap_audit", &server_cfg.store_path);

    let manager = DownloadJobManager::new(Arc::new(store), download_config_from_env());
    let status = manager.symbol_data_status(&symbol, timeframe)?;

    let Some(symbol_id) = status.symbol_id else {
        println!("{} is not a known symbol in {}", status.symbol, server_cfg.store_path.display());
        return Ok(());
    };

    println!(
        "Gap audit for {} (id {}) at {} in {}",
        status.symbol,
        symbol_id,
        timeframe,
        server_cfg.store_path.display()
    );

    if !status.has_data {
        println!("  no stored candles");
    }
    for range in &status.available_data {
        println!("  available {} -> {}", range.start, range.end);
    }

    let missing_candles: i64 = status
        .missing_data
        .iter()
        .map(|gap| gap.duration().num_milliseconds() / timeframe.duration_ms())
        .sum();
    for gap in &status.missing_data {
        println!("  missing   {} -> {}", gap.start, gap.end);
    }
    println!(
        "{} available range(s), {} gap(s), ~{} missing candle(s)",
        status.available_data.len(),
        status.missing_data.len(),
        missing_candles
    );

    Ok(())
}
