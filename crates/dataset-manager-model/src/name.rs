// SPDX-License-Identifier: Apache-2.0

use crate::ValidationError;
use std::fmt::{Display, Formatter};

pub const SYMBOL_MAX_LEN: usize = 32;
pub const TIMEFRAME_MAX_LEN: usize = 8;

/// Trading pair such as `ETHUSDT`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[non_exhaustive]
pub struct Symbol(String);

impl Symbol {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let s = input.trim();
        if s.is_empty() {
            return Err(ValidationError("symbol must not be empty".to_string()));
        }
        if s.len() > SYMBOL_MAX_LEN {
            return Err(ValidationError(format!(
                "symbol exceeds max length {SYMBOL_MAX_LEN}"
            )));
        }
        if !s.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()) {
            return Err(ValidationError(
                "symbol must match [A-Z0-9]+".to_string(),
            ));
        }
        Ok(Self(s.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Candle interval such as `1m`, `4h` or `1M`: digits then a unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[non_exhaustive]
pub struct Timeframe(String);

impl Timeframe {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let s = input.trim();
        if s.is_empty() {
            return Err(ValidationError("timeframe must not be empty".to_string()));
        }
        if s.len() > TIMEFRAME_MAX_LEN {
            return Err(ValidationError(format!(
                "timeframe exceeds max length {TIMEFRAME_MAX_LEN}"
            )));
        }
        let unit_at = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| ValidationError("timeframe is missing a unit".to_string()))?;
        let (count, unit) = s.split_at(unit_at);
        if count.is_empty() {
            return Err(ValidationError(
                "timeframe must start with a count".to_string(),
            ));
        }
        if !unit.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError(
                "timeframe must match [0-9]+[A-Za-z]+".to_string(),
            ));
        }
        Ok(Self(s.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Timeframe {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Request name `SYMBOL-timeframe`, the key clients ask the manager for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[non_exhaustive]
pub struct DatasetName {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
}

impl DatasetName {
    pub fn new(symbol: &str, timeframe: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            symbol: Symbol::parse(symbol)?,
            timeframe: Timeframe::parse(timeframe)?,
        })
    }

    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        let (symbol, timeframe) = trimmed.rsplit_once('-').ok_or_else(|| {
            ValidationError(format!(
                "dataset name `{trimmed}` must look like SYMBOL-timeframe"
            ))
        })?;
        Self::new(symbol, timeframe)
    }

    #[must_use]
    pub fn canonical_string(&self) -> String {
        format!("{}-{}", self.symbol, self.timeframe)
    }
}

impl Display for DatasetName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.symbol, self.timeframe)
    }
}

impl std::str::FromStr for DatasetName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
