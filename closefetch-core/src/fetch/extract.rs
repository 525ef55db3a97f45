//! Close price extraction from an upstream [`PriceTable`].
//!
//! Only the first row of each series is read: the lookup window covers a
//! single day, so a second row would belong to a different session. Within
//! that row the candidate fields are tried in order and the first finite value
//! wins. Missing symbols and rows without any candidate value are skipped
//! silently; an instrument that did not trade that day is not an error.

use crate::data::{PriceField, PriceRow, PriceTable};
use crate::domain::{DatePrices, InstrumentId};

/// First finite value among `fields`, read from the first row.
pub fn first_price(rows: &[PriceRow], fields: &[PriceField]) -> Option<f64> {
    let row = rows.first()?;
    fields.iter().find_map(|field| field.read(row))
}

/// Per-symbol prices for one date group.
pub fn extract_prices(
    table: &PriceTable,
    symbols: &[InstrumentId],
    fields: &[PriceField],
) -> DatePrices {
    match table {
        PriceTable::Flat(rows) => match symbols {
            [only] => first_price(rows, fields)
                .map(|price| (only.clone(), price))
                .into_iter()
                .collect(),
            _ => {
                // A flat table carries no instrument dimension; it cannot be
                // attributed when more than one symbol was requested.
                tracing::debug!(
                    requested = symbols.len(),
                    "flat price table for a multi-symbol lookup, nothing extracted"
                );
                DatePrices::new()
            }
        },
        PriceTable::ByInstrument(by_symbol) => symbols
            .iter()
            .filter_map(|symbol| {
                let rows = by_symbol.get(symbol)?;
                Some((symbol.clone(), first_price(rows, fields)?))
            })
            .collect(),
    }
}
