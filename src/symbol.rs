//! Domain values: symbols, parsed results and operations

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Separator used to join the two inputs of a combine request
pub const COMBINE_SEPARATOR: &str = "+";

/// An opaque, case-sensitive game concept such as `"Mechanical"`.
///
/// Any non-empty string is accepted and passed through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Create a symbol, rejecting the empty string
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(Error::invalid_input("symbol must not be empty"));
        }
        Ok(Self(value))
    }

    /// Borrow the symbol text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Symbol::new(value).map_err(serde::de::Error::custom)
    }
}

/// One concept and its pictographic label
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolResult {
    /// Concept word(s)
    pub symbol: String,
    /// Emoji label
    pub emoji: String,
}

impl SymbolResult {
    pub(crate) fn new(symbol: impl Into<String>, emoji: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            emoji: emoji.into(),
        }
    }

    /// The fixed fallback value `{ symbol: "", emoji: "" }`
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether this is the fallback sentinel
    pub fn is_empty(&self) -> bool {
        self.symbol.is_empty() && self.emoji.is_empty()
    }
}

/// Ordered pair of results produced by a split, serialized as a JSON array
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolPair(pub SymbolResult, pub SymbolResult);

impl SymbolPair {
    /// Two copies of the empty fallback
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether both halves are the fallback sentinel
    pub fn is_empty(&self) -> bool {
        self.0.is_empty() && self.1.is_empty()
    }
}

/// The two memoized operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Two symbols into one
    Combine,
    /// One symbol into two
    Split,
}

impl Operation {
    /// Name of the LoRA adapter that specialises the model for this operation
    pub fn adapter_name(&self) -> &'static str {
        match self {
            Operation::Combine => "add",
            Operation::Split => "split",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Combine => f.write_str("combine"),
            Operation::Split => f.write_str("split"),
        }
    }
}

/// Text sent to the prompt builder for a combine request
pub fn combine_text(first: &Symbol, second: &Symbol) -> String {
    format!("{}{}{}", first, COMBINE_SEPARATOR, second)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_symbol_rejected() {
        let err = Symbol::new("").unwrap_err();
        assert!(err.is_input_error());
        assert_eq!(Symbol::new("Mechanical").unwrap().as_str(), "Mechanical");
    }

    #[test]
    fn test_symbol_is_case_sensitive() {
        assert_ne!(Symbol::new("fire").unwrap(), Symbol::new("Fire").unwrap());
    }

    #[test]
    fn test_combine_text_keeps_order() {
        let mouse = Symbol::new("Mouse").unwrap();
        let cat = Symbol::new("Cat").unwrap();
        assert_eq!(combine_text(&mouse, &cat), "Mouse+Cat");
        assert_eq!(combine_text(&cat, &mouse), "Cat+Mouse");
    }

    #[test]
    fn test_pair_serializes_as_array() {
        let pair = SymbolPair(
            SymbolResult::new("Water", "💧"),
            SymbolResult::new("Fire", "🔥"),
        );
        let json = serde_json::to_value(&pair).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"symbol": "Water", "emoji": "💧"},
                {"symbol": "Fire", "emoji": "🔥"}
            ])
        );
    }

    #[test]
    fn test_fallback_shapes() {
        assert_eq!(
            serde_json::to_value(SymbolResult::empty()).unwrap(),
            serde_json::json!({"symbol": "", "emoji": ""})
        );
        assert!(SymbolPair::empty().is_empty());
        assert_eq!(Operation::Combine.adapter_name(), "add");
        assert_eq!(Operation::Split.adapter_name(), "split");
    }
}
