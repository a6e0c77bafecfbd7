use crate::{Error, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct TickerRow {
    ticker: String,
}

/// Tickers from a CSV with a `ticker` column, in file order.
///
/// Symbols are trimmed and upper-cased; blank rows are skipped.
pub fn load_tickers(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::Reader::from_path(path)?;
    let has_column = reader.headers()?.iter().any(|h| h.trim() == "ticker");
    if !has_column {
        return Err(Error::invalid(format!(
            "{} has no 'ticker' column",
            path.display()
        )));
    }

    let mut tickers = Vec::new();
    for row in reader.deserialize::<TickerRow>() {
        let symbol = row?.ticker.trim().to_uppercase();
        if !symbol.is_empty() {
            tickers.push(symbol);
        }
    }
    Ok(tickers)
}
