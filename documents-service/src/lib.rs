//! Fiscal document issuance: sequential numbering, VAT totals, lifecycle
//! transitions, tax authority certification and an audit trail.

pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod startup;
