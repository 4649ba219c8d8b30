// =============================================================================
// Pip Scale: symbol -> pip size
// =============================================================================
//
// Rule order (first match wins):
//
//   0. Crypto ticker prefix  -> BTC 1.0 above 10 000, ETH 0.1 above 1 000,
//                               otherwise the ticker's override or
//                               AmbiguousPipSize
//   1. JPY marker            -> 0.01
//   2. Gold (XAU / GOLD)     -> 0.10
//   3. Silver (XAG / SILVER) -> 0.01
//   4. price > 100           -> 0.01
//   5. 10 <= price <= 100    -> quote-currency table, else AmbiguousPipSize
//   6. otherwise             -> 0.0001
//
// Rule 5 covers low-denomination exotics (USDMXN ~18, USDTHB ~35, USDINR ~83)
// where the price alone does not say whether the pip is 0.0001 or 0.01.
//
// Crypto symbols also carry a volatility multiplier (BTC 2.5, ETH 3.0, alts
// 4.0) that widens the strategy stop range, and trade around the clock with a
// liquidity multiplier in place of the FX session multiplier.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Timelike, Utc};

use crate::error::SymbolFault;

pub const STANDARD_PIP: f64 = 0.0001;
pub const JPY_PIP: f64 = 0.01;
pub const GOLD_PIP: f64 = 0.10;
pub const SILVER_PIP: f64 = 0.01;

const AMBIGUOUS_LOW: f64 = 10.0;
const AMBIGUOUS_HIGH: f64 = 100.0;

/// Quote currencies with a known pip when quoted between 10 and 100.
const BUILTIN_QUOTE_PIPS: &[(&str, f64)] = &[
    ("THB", 0.01),
    ("INR", 0.01),
    ("RUB", 0.01),
    ("PHP", 0.01),
    ("MXN", 0.0001),
    ("ZAR", 0.0001),
    ("TRY", 0.0001),
    ("NOK", 0.0001),
    ("SEK", 0.0001),
    ("CZK", 0.0001),
    ("DKK", 0.0001),
    ("CNH", 0.0001),
    ("HKD", 0.0001),
];

pub const BTC_PIP: f64 = 1.0;
pub const ETH_PIP: f64 = 0.1;

const BTC_PIP_PRICE: f64 = 10_000.0;
const ETH_PIP_PRICE: f64 = 1_000.0;

/// Ticker prefixes recognised as crypto, longest first.
const CRYPTO_TICKERS: &[&str] = &[
    "LINK", "BTC", "XBT", "ETH", "LTC", "XRP", "BCH", "EOS", "ADA", "DOT", "UNI",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoAsset {
    Bitcoin,
    Ether,
    /// Any other listed ticker; the ticker is kept for override lookup.
    Alt(&'static str),
}

impl CryptoAsset {
    /// Detect by ticker prefix so FX codes like AUDCAD never match.
    pub fn detect(symbol: &str) -> Option<Self> {
        let s = symbol.to_uppercase();
        let ticker = CRYPTO_TICKERS.iter().find(|t| s.starts_with(*t))?;
        Some(match *ticker {
            "BTC" | "XBT" => Self::Bitcoin,
            "ETH" => Self::Ether,
            other => Self::Alt(other),
        })
    }

    pub fn ticker(&self) -> &'static str {
        match self {
            Self::Bitcoin => "BTC",
            Self::Ether => "ETH",
            Self::Alt(t) => t,
        }
    }

    /// Stop ranges are widened by this factor.
    pub fn volatility_multiplier(&self) -> f64 {
        match self {
            Self::Bitcoin => 2.5,
            Self::Ether => 3.0,
            Self::Alt(_) => 4.0,
        }
    }
}

/// Liquidity multiplier by UTC hour: US hours 1.0, Asian hours 0.9,
/// otherwise 0.8.
pub fn crypto_session_multiplier(now: DateTime<Utc>) -> f64 {
    match now.hour() {
        13..=21 => 1.0,
        0..=7 => 0.9,
        _ => 0.8,
    }
}

/// Stateless resolver. The quote table is fixed at construction.
#[derive(Debug, Clone)]
pub struct PipScale {
    quote_pips: HashMap<String, f64>,
}

impl Default for PipScale {
    fn default() -> Self {
        Self::new(&HashMap::new())
    }
}

impl PipScale {
    /// Built-in quote table merged with `overrides` (override wins). Keys are
    /// quote currencies or crypto tickers.
    pub fn new(overrides: &HashMap<String, f64>) -> Self {
        let mut quote_pips: HashMap<String, f64> = BUILTIN_QUOTE_PIPS
            .iter()
            .map(|(c, p)| (c.to_string(), *p))
            .collect();
        for (ccy, pip) in overrides {
            quote_pips.insert(ccy.to_uppercase(), *pip);
        }
        Self { quote_pips }
    }

    pub fn resolve(&self, symbol: &str, last_price: f64) -> Result<f64, SymbolFault> {
        let s = symbol.to_uppercase();

        if let Some(asset) = CryptoAsset::detect(&s) {
            return self.resolve_crypto(symbol, asset, last_price);
        }

        if s.contains("JPY") {
            return Ok(JPY_PIP);
        }
        if s.contains("XAU") || s.contains("GOLD") {
            return Ok(GOLD_PIP);
        }
        if s.contains("XAG") || s.contains("SILVER") {
            return Ok(SILVER_PIP);
        }

        if !(last_price.is_finite() && last_price > 0.0) {
            return Err(SymbolFault::stale(
                symbol,
                format!("no usable price ({})", last_price),
            ));
        }

        if last_price > AMBIGUOUS_HIGH {
            return Ok(JPY_PIP);
        }
        if last_price >= AMBIGUOUS_LOW {
            return quote_currency(&s)
                .and_then(|q| self.quote_pips.get(q).copied())
                .ok_or_else(|| SymbolFault::AmbiguousPipSize {
                    symbol: symbol.to_string(),
                    price: last_price,
                });
        }
        Ok(STANDARD_PIP)
    }

    fn resolve_crypto(
        &self,
        symbol: &str,
        asset: CryptoAsset,
        last_price: f64,
    ) -> Result<f64, SymbolFault> {
        if let Some(pip) = self.quote_pips.get(asset.ticker()) {
            return Ok(*pip);
        }
        match asset {
            CryptoAsset::Bitcoin if last_price > BTC_PIP_PRICE => Ok(BTC_PIP),
            CryptoAsset::Ether if last_price > ETH_PIP_PRICE => Ok(ETH_PIP),
            _ => Err(SymbolFault::AmbiguousPipSize {
                symbol: symbol.to_string(),
                price: last_price,
            }),
        }
    }
}

/// Letters 4-6 of a six-letter pair code, ignoring broker suffixes.
fn quote_currency(upper: &str) -> Option<&str> {
    let code = upper.get(0..6)?;
    if code.chars().all(|c| c.is_ascii_alphabetic()) {
        upper.get(3..6)
    } else {
        None
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn majors_use_standard_pip() {
        let p = PipScale::default();
        assert_eq!(p.resolve("EURUSD", 1.0850).unwrap(), STANDARD_PIP);
        assert_eq!(p.resolve("gbpusd.pro", 1.27).unwrap(), STANDARD_PIP);
    }

    #[test]
    fn jpy_wins_regardless_of_price() {
        let p = PipScale::default();
        assert_eq!(p.resolve("USDJPY", 150.2).unwrap(), JPY_PIP);
        assert_eq!(p.resolve("EURJPYzero", 0.5).unwrap(), JPY_PIP);
        assert_eq!(p.resolve("GBPJPY", -1.0).unwrap(), JPY_PIP);
    }

    #[test]
    fn metals() {
        let p = PipScale::default();
        assert_eq!(p.resolve("XAUUSD", 2300.0).unwrap(), GOLD_PIP);
        assert_eq!(p.resolve("GOLD", 2300.0).unwrap(), GOLD_PIP);
        assert_eq!(p.resolve("XAGUSD", 28.0).unwrap(), SILVER_PIP);
    }

    #[test]
    fn high_denomination_exotic() {
        let p = PipScale::default();
        assert_eq!(p.resolve("USDHUF", 360.0).unwrap(), JPY_PIP);
    }

    #[test]
    fn ambiguous_band_uses_quote_table() {
        let p = PipScale::default();
        assert_eq!(p.resolve("USDMXN", 18.2).unwrap(), 0.0001);
        assert_eq!(p.resolve("USDTHB", 35.4).unwrap(), 0.01);
        assert_eq!(p.resolve("USDINR", 83.1).unwrap(), 0.01);
    }

    #[test]
    fn unknown_exotic_in_band_is_ambiguous() {
        let p = PipScale::default();
        let err = p.resolve("USDKES", 55.0).unwrap_err();
        assert!(matches!(err, SymbolFault::AmbiguousPipSize { .. }));
    }

    #[test]
    fn override_resolves_unknown_exotic() {
        let mut o = HashMap::new();
        o.insert("kes".to_string(), 0.01);
        let p = PipScale::new(&o);
        assert_eq!(p.resolve("USDKES", 55.0).unwrap(), 0.01);
    }

    #[test]
    fn crypto_majors_use_coin_pips() {
        let p = PipScale::default();
        assert_eq!(p.resolve("BTCUSD", 60_000.0).unwrap(), BTC_PIP);
        assert_eq!(p.resolve("xbtusd", 60_000.0).unwrap(), BTC_PIP);
        assert_eq!(p.resolve("ETHUSDT", 3_000.0).unwrap(), ETH_PIP);
    }

    #[test]
    fn crypto_without_known_pip_is_ambiguous() {
        let p = PipScale::default();
        assert!(matches!(
            p.resolve("BTCUSD", 8_000.0),
            Err(SymbolFault::AmbiguousPipSize { .. })
        ));
        assert!(matches!(
            p.resolve("LTCUSD", 85.0),
            Err(SymbolFault::AmbiguousPipSize { .. })
        ));

        let mut o = HashMap::new();
        o.insert("LTC".to_string(), 0.01);
        assert_eq!(PipScale::new(&o).resolve("LTCUSD", 85.0).unwrap(), 0.01);
    }

    #[test]
    fn crypto_detection_ignores_fx_codes() {
        assert_eq!(CryptoAsset::detect("BTCUSD"), Some(CryptoAsset::Bitcoin));
        assert_eq!(CryptoAsset::detect("LINKUSD"), Some(CryptoAsset::Alt("LINK")));
        assert_eq!(CryptoAsset::detect("AUDCAD"), None);
        assert_eq!(CryptoAsset::detect("EURUSD"), None);
        assert_eq!(CryptoAsset::Alt("XRP").volatility_multiplier(), 4.0);
    }

    #[test]
    fn crypto_liquidity_by_hour() {
        use chrono::TimeZone;
        let at = |h| Utc.with_ymd_and_hms(2024, 3, 5, h, 0, 0).unwrap();
        assert_eq!(crypto_session_multiplier(at(15)), 1.0);
        assert_eq!(crypto_session_multiplier(at(3)), 0.9);
        assert_eq!(crypto_session_multiplier(at(10)), 0.8);
        assert_eq!(crypto_session_multiplier(at(22)), 0.8);
    }

    #[test]
    fn bad_price_is_stale_data() {
        let p = PipScale::default();
        assert!(matches!(
            p.resolve("EURUSD", f64::NAN),
            Err(SymbolFault::StaleOrMissingMarketData { .. })
        ));
    }
}
