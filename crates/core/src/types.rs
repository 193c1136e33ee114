//! Core type definitions

use chrono::{DateTime, TimeZone, Utc};
use parity_scale_codec::{Decode, Encode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{CoreError, CoreResult};

/// Number of decimals in the on-chain fixed-point price
pub const PRICE_DECIMALS: u32 = 12;

/// External price providers, declared in failover priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriceSource {
    Binance,
    Coinbase,
    Kraken,
}

impl PriceSource {
    /// All providers, highest priority first
    pub const ALL: [PriceSource; 3] = [
        PriceSource::Binance,
        PriceSource::Coinbase,
        PriceSource::Kraken,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PriceSource::Binance => "Binance",
            PriceSource::Coinbase => "Coinbase",
            PriceSource::Kraken => "Kraken",
        }
    }
}

impl fmt::Display for PriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A freshly fetched BTC/USD price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    price: f64,
    source: PriceSource,
    timestamp_ms: u64,
}

impl PriceQuote {
    /// Quote stamped with the current wall-clock time
    pub fn new(price: f64, source: PriceSource) -> Self {
        Self::at(price, source, Utc::now().timestamp_millis().max(0) as u64)
    }

    pub fn at(price: f64, source: PriceSource, timestamp_ms: u64) -> Self {
        Self {
            price,
            source,
            timestamp_ms,
        }
    }

    pub fn price(&self) -> f64 {
        self.price
    }

    pub fn source(&self) -> PriceSource {
        self.source
    }

    /// Unix epoch milliseconds
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// Price in on-chain fixed-point units
    pub fn scaled(&self) -> CoreResult<u128> {
        scale_price(self.price)
    }
}

/// Oracle entry exactly as stored by the runtime (SCALE encoded)
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct OracleRecord {
    pub value: u128,
    pub source: Vec<u8>,
    pub updated_at: u64,
    pub status: Vec<u8>,
}

/// Oracle entry with its byte fields decoded for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleValue {
    /// Price scaled by 10^12
    pub value: u128,
    pub source: String,
    /// Unix seconds
    pub updated_at: u64,
    pub status: String,
}

impl OracleValue {
    pub fn price(&self) -> CoreResult<Decimal> {
        unscale_price(self.value)
    }

    pub fn updated_at_datetime(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.updated_at)
            .ok()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
    }
}

impl From<OracleRecord> for OracleValue {
    fn from(record: OracleRecord) -> Self {
        Self {
            value: record.value,
            source: String::from_utf8_lossy(&record.source).into_owned(),
            updated_at: record.updated_at,
            status: String::from_utf8_lossy(&record.status).into_owned(),
        }
    }
}

/// Convert a price to fixed-point units: `price * 10^12`, truncated toward zero.
///
/// The float goes through its shortest decimal form first, so `50000.5`
/// becomes exactly `50000500000000000`. The whole and fractional parts are
/// scaled separately so every price whose result fits in `u128` is accepted.
pub fn scale_price(price: f64) -> CoreResult<u128> {
    let invalid = || CoreError::InvalidPrice(price.to_string());

    if !price.is_finite() || price < 0.0 {
        return Err(invalid());
    }

    let decimal = Decimal::try_from(price).map_err(|_| invalid())?;
    let unit = 10u64.pow(PRICE_DECIMALS);

    let mut whole = decimal.trunc();
    whole.rescale(0);
    let mut fraction = (decimal - whole)
        .checked_mul(Decimal::from(unit))
        .ok_or_else(invalid)?
        .trunc();
    fraction.rescale(0);

    let whole = u128::try_from(whole.mantissa()).map_err(|_| invalid())?;
    let fraction = u128::try_from(fraction.mantissa()).map_err(|_| invalid())?;

    whole
        .checked_mul(u128::from(unit))
        .and_then(|scaled| scaled.checked_add(fraction))
        .ok_or_else(invalid)
}

/// Inverse of [`scale_price`]
pub fn unscale_price(value: u128) -> CoreResult<Decimal> {
    let mantissa = i128::try_from(value).map_err(|_| CoreError::InvalidPrice(value.to_string()))?;
    Decimal::try_from_i128_with_scale(mantissa, PRICE_DECIMALS)
        .map_err(|_| CoreError::InvalidPrice(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_scale_price() {
        assert_eq!(scale_price(50000.50).unwrap(), 50_000_500_000_000_000);
        assert_eq!(scale_price(50000.0).unwrap(), 50_000_000_000_000_000);
        assert_eq!(scale_price(0.1).unwrap(), 100_000_000_000);
        assert_eq!(scale_price(0.0).unwrap(), 0);
    }

    #[test]
    fn test_scale_price_truncates() {
        // 13th decimal is dropped, never rounded up
        assert_eq!(scale_price(0.0000000000025).unwrap(), 2);
    }

    #[test]
    fn test_scale_price_large_values() {
        assert_eq!(scale_price(1e17).unwrap(), 10u128.pow(29));
        assert_eq!(scale_price(1e22).unwrap(), 10u128.pow(34));
        assert_eq!(scale_price(12_345_678_901.25).unwrap(), 12_345_678_901_250_000_000_000);
        // 10^39 does not fit in u128
        assert!(scale_price(1e27).is_err());
    }

    #[test]
    fn test_scale_price_rejects_invalid() {
        assert!(scale_price(-1.0).is_err());
        assert!(scale_price(f64::NAN).is_err());
        assert!(scale_price(f64::INFINITY).is_err());
    }

    #[test]
    fn test_unscale_price() {
        let price = unscale_price(50_000_500_000_000_000).unwrap();
        assert_eq!(price, Decimal::from_str("50000.5").unwrap());
    }

    #[test]
    fn test_record_roundtrip_into_value() {
        let record = OracleRecord {
            value: 50_000_000_000_000_000,
            source: b"Binance".to_vec(),
            updated_at: 1000,
            status: b"success".to_vec(),
        };
        let decoded = OracleRecord::decode(&mut &record.encode()[..]).unwrap();
        let value = OracleValue::from(decoded);

        assert_eq!(value.source, "Binance");
        assert_eq!(value.status, "success");
        assert_eq!(value.updated_at, 1000);
        assert_eq!(value.price().unwrap(), Decimal::from(50_000));
        assert_eq!(value.updated_at_datetime().unwrap().timestamp(), 1000);
    }

    #[test]
    fn test_source_priority_order() {
        let names: Vec<_> = PriceSource::ALL.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["Binance", "Coinbase", "Kraken"]);
    }
}
