//! Typed views over the schema-less parameter map.
//!
//! The wire format stays an open string-keyed map of scalars; these accessors
//! give call sites type safety at the point of use without constraining what
//! the storage layer accepts. Missing or mistyped values fall back to the
//! block's registry defaults rather than erroring — malformed configurations
//! are reported by the backend at execution time.

use crate::types::{ParamMap, ParamValue};

/// Borrowed typed view over a node's parameter map.
#[derive(Debug, Clone, Copy)]
pub struct Params<'a>(pub &'a ParamMap);

impl<'a> Params<'a> {
    pub fn number(&self, key: &str) -> Option<f64> {
        match self.0.get(key)? {
            ParamValue::Number(n) => Some(*n),
            ParamValue::Text(s) => s.parse().ok(),
            ParamValue::Flag(_) => None,
        }
    }

    pub fn text(&self, key: &str) -> Option<&'a str> {
        match self.0.get(key)? {
            ParamValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn flag(&self, key: &str) -> Option<bool> {
        match self.0.get(key)? {
            ParamValue::Flag(b) => Some(*b),
            _ => None,
        }
    }

    pub fn period(&self) -> Option<u32> {
        let n = self.number("period")?;
        if n.is_finite() && n >= 1.0 {
            Some(n as u32)
        } else {
            None
        }
    }
}

/// `feature.rsi` / `feature.sma` / `feature.ema` parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorParams<'a> {
    pub period: u32,
    pub source: &'a str,
}

impl<'a> IndicatorParams<'a> {
    pub fn read(params: &'a ParamMap) -> Self {
        let view = Params(params);
        Self {
            period: view.period().unwrap_or(14),
            source: view.text("source").unwrap_or("close"),
        }
    }
}

/// `signal.threshold` parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdParams {
    pub buy_below: f64,
    pub sell_above: f64,
}

impl ThresholdParams {
    pub fn read(params: &ParamMap) -> Self {
        let view = Params(params);
        Self {
            buy_below: view.number("buy_below").unwrap_or(30.0),
            sell_above: view.number("sell_above").unwrap_or(70.0),
        }
    }
}

/// `risk.stop_loss` parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopLossParams {
    pub percent: f64,
    pub trailing: bool,
}

impl StopLossParams {
    pub fn read(params: &ParamMap) -> Self {
        let view = Params(params);
        Self {
            percent: view.number("percent").unwrap_or(5.0),
            trailing: view.flag("trailing").unwrap_or(false),
        }
    }
}
