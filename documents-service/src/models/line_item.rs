//! Line item model for documents-service.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// VAT rate bucket assigned per line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VatCategory {
    Normal,
    Reduced,
    SuperReduced,
    Exempt,
    ReverseCharge,
}

impl VatCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            VatCategory::Normal => "normal",
            VatCategory::Reduced => "reduced",
            VatCategory::SuperReduced => "super_reduced",
            VatCategory::Exempt => "exempt",
            VatCategory::ReverseCharge => "reverse_charge",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(VatCategory::Normal),
            "reduced" => Some(VatCategory::Reduced),
            "super_reduced" => Some(VatCategory::SuperReduced),
            "exempt" => Some(VatCategory::Exempt),
            "reverse_charge" => Some(VatCategory::ReverseCharge),
            _ => None,
        }
    }

    /// Rate in percent. Reverse charge is recorded locally at 0%.
    pub fn rate(&self) -> Decimal {
        match self {
            VatCategory::Normal => Decimal::from(24),
            VatCategory::Reduced => Decimal::from(13),
            VatCategory::SuperReduced => Decimal::from(6),
            VatCategory::Exempt | VatCategory::ReverseCharge => Decimal::ZERO,
        }
    }

    /// Authority VAT category code.
    pub fn authority_code(&self) -> u8 {
        match self {
            VatCategory::Normal => 1,
            VatCategory::Reduced => 2,
            VatCategory::SuperReduced => 3,
            VatCategory::Exempt => 7,
            VatCategory::ReverseCharge => 8,
        }
    }
}

/// Per-line discount, either a percentage of the gross or a fixed amount.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum LineDiscount {
    #[default]
    None,
    Percent(Decimal),
    Amount(Decimal),
}

impl LineDiscount {
    pub fn kind(&self) -> &'static str {
        match self {
            LineDiscount::None => "none",
            LineDiscount::Percent(_) => "percent",
            LineDiscount::Amount(_) => "amount",
        }
    }

    pub fn value(&self) -> Decimal {
        match self {
            LineDiscount::None => Decimal::ZERO,
            LineDiscount::Percent(v) | LineDiscount::Amount(v) => *v,
        }
    }

    pub fn from_parts(kind: &str, value: Decimal) -> Option<Self> {
        match kind {
            "none" => Some(LineDiscount::None),
            "percent" => Some(LineDiscount::Percent(value)),
            "amount" => Some(LineDiscount::Amount(value)),
            _ => None,
        }
    }
}

/// Computed line of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub line_id: Uuid,
    pub document_id: Uuid,
    pub line_number: i32,
    pub description: String,
    pub quantity: Decimal,
    pub unit: String,
    pub unit_price: Decimal,
    pub discount: LineDiscount,
    pub discount_amount: Decimal,
    pub vat_category: VatCategory,
    pub vat_rate: Decimal,
    pub net_amount: Decimal,
    pub vat_amount: Decimal,
    pub total_amount: Decimal,
    /// Authority income classification category, e.g. `category1_1`.
    pub income_classification: Option<String>,
}

/// Input for adding a line.
#[derive(Debug, Clone)]
pub struct NewLineItem {
    pub description: String,
    pub quantity: Decimal,
    pub unit: String,
    pub unit_price: Decimal,
    pub discount: LineDiscount,
    pub vat_category: VatCategory,
    pub income_classification: Option<String>,
}

/// Input for updating a line; unset fields keep their value.
#[derive(Debug, Clone, Default)]
pub struct UpdateLineItem {
    pub description: Option<String>,
    pub quantity: Option<Decimal>,
    pub unit: Option<String>,
    pub unit_price: Option<Decimal>,
    pub discount: Option<LineDiscount>,
    pub vat_category: Option<VatCategory>,
    pub income_classification: Option<String>,
    pub expected_version: Option<i64>,
}
