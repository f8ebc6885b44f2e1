//! Services module for documents-service.

pub mod audit;
pub mod calculator;
pub mod compliance;
pub mod database;
pub mod documents;
pub mod lifecycle;
pub mod memory;
pub mod metrics;
pub mod numbering;
pub mod renderer;
pub mod store;

pub use audit::{AuditLog, AuditRecorder};
pub use compliance::{
    AuthorityClient, BulkSubmitOutcome, BulkSubmitReport, ComplianceAuthority, ComplianceGateway,
    StatusReport,
};
pub use database::Database;
pub use documents::{DocumentService, SendOutcome};
pub use memory::MemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use numbering::{NumberScope, NumberingGenerator};
pub use renderer::{DocumentRenderer, TextRenderer};
pub use store::DocumentStore;
