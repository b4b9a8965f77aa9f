// Rekap Kas - Core Library
// Ingests extracted payment statements into a per-unit cash ledger and
// reconciles balances against manual disbursements.

pub mod balance;
pub mod classify;
pub mod dedup;
pub mod document;
pub mod error;
pub mod ingest;
pub mod ledger;
pub mod normalize;

// Re-export commonly used types
pub use balance::{available_cash, request_disbursement, unit_recap, UnitRecap};
pub use classify::RowClassifier;
pub use dedup::DeduplicationEngine;
pub use document::{ExtractedDocument, ExtractedPage, ExtractedTable, Row};
pub use error::{DisbursementError, StoreError};
pub use ingest::{ingest, scan_document, IngestReport};
pub use ledger::{
    Disbursement, Event, Ledger, PaymentMethod, Transaction, TransactionFilter, Unit,
};
pub use normalize::{parse_amount, parse_timestamp, truncate_seconds};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
