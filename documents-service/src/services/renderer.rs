//! Rendering collaborator used when a document is sent.

use crate::error::DocumentResult;
use crate::models::{Document, LineItem};
use std::fmt::Write;

/// Produces the byte payload delivered to the recipient (PDF, email body, ...).
pub trait DocumentRenderer: Send + Sync {
    fn render(&self, document: &Document, lines: &[LineItem]) -> DocumentResult<Vec<u8>>;

    fn content_type(&self) -> &'static str;
}

/// Plain-text rendering, used where no richer renderer is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextRenderer;

impl DocumentRenderer for TextRenderer {
    fn render(&self, document: &Document, lines: &[LineItem]) -> DocumentResult<Vec<u8>> {
        let mut out = String::new();
        let number = document.number.as_deref().unwrap_or("(unnumbered)");
        // Writing to a String cannot fail.
        let _ = writeln!(out, "{} {}", document.document_type, number);
        let _ = writeln!(out, "Issued: {}", document.issue_date);
        if let Some(due) = document.due_date {
            let _ = writeln!(out, "Due: {}", due);
        }
        let _ = writeln!(out, "Bill to: {}", document.counterparty.name);
        if let Some(vat) = &document.counterparty.vat_number {
            let _ = writeln!(out, "VAT: {}", vat);
        }
        let _ = writeln!(out);

        for line in lines {
            let _ = writeln!(
                out,
                "{:>3}  {}  {} {} x {}  net {}  vat {}% {}  total {}",
                line.line_number,
                line.description,
                line.quantity,
                line.unit,
                line.unit_price,
                line.net_amount,
                line.vat_rate,
                line.vat_amount,
                line.total_amount
            );
        }

        let totals = &document.totals;
        let _ = writeln!(out);
        let _ = writeln!(out, "Subtotal: {} {}", totals.subtotal, document.currency);
        if !totals.discount_amount.is_zero() {
            let _ = writeln!(out, "Discount: -{}", totals.discount_amount);
        }
        let _ = writeln!(out, "VAT: {}", totals.vat_amount);
        if !totals.withholding_amount.is_zero() {
            let _ = writeln!(out, "Withholding: -{}", totals.withholding_amount);
        }
        if !totals.other_charges.is_zero() {
            let _ = writeln!(out, "Other charges: {}", totals.other_charges);
        }
        let _ = writeln!(out, "Total: {} {}", totals.total, document.currency);
        let _ = writeln!(out, "Balance due: {}", document.balance_due);

        Ok(out.into_bytes())
    }

    fn content_type(&self) -> &'static str {
        "text/plain; charset=utf-8"
    }
}
