//! Database models for ledger records.

use serde::{Deserialize, Serialize};

/// Classification of a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Nature {
    /// A plain income or expense
    #[default]
    Normal,
    /// Money someone owes this ledger (receivable)
    Asset,
    /// Money this ledger owes someone (payable)
    Liability,
}

impl Nature {
    /// Convert the nature to its wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Asset => "ASSET",
            Self::Liability => "LIABILITY",
        }
    }

    /// Parse a nature from its wire representation. Unknown values map to
    /// `Normal`.
    pub fn parse(s: &str) -> Self {
        match s {
            "ASSET" => Self::Asset,
            "LIABILITY" => Self::Liability,
            _ => Self::Normal,
        }
    }

    /// Whether records of this nature carry an obligation amount.
    pub fn is_obligation(&self) -> bool {
        matches!(self, Self::Asset | Self::Liability)
    }
}

/// A single ledger record stored locally.
///
/// `timestamp` (milliseconds) is both the sort key and the identity seed for
/// the record's remote location; `id` is the local row id only.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: Option<i64>,
    /// Full text the user typed, e.g. `"-50 Coffee"`
    pub original_text: String,
    pub amount: f64,
    pub description: String,
    pub timestamp: i64,
    pub nature: Nature,
    pub obligation_amount: f64,
}

impl Record {
    /// Create an unsaved record, deriving its obligation amount.
    pub fn new(
        original_text: impl Into<String>,
        amount: f64,
        description: impl Into<String>,
        timestamp: i64,
        nature: Nature,
    ) -> Self {
        Self {
            id: None,
            original_text: original_text.into(),
            amount,
            description: description.into(),
            timestamp,
            nature,
            obligation_amount: Self::obligation_for(nature, amount),
        }
    }

    /// Obligation amount implied by a nature and an amount.
    pub fn obligation_for(nature: Nature, amount: f64) -> f64 {
        if nature.is_obligation() {
            -amount
        } else {
            0.0
        }
    }

    /// Recompute `obligation_amount` after `amount` or `nature` changed.
    pub fn refresh_obligation(&mut self) {
        self.obligation_amount = Self::obligation_for(self.nature, self.amount);
    }
}
