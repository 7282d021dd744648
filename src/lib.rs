//! # Ledger Import
//!
//! Import pipeline merging transaction exports from several institutions
//! (credit-card statements, checking/loan statements, payment-gateway
//! exports) into one duplicate-free, ordered, balance-reconciled ledger per
//! account.
//!
//! ## Features
//!
//! - **Filtering**: status blacklists, zero amounts and currency allow-lists
//! - **Deduplication**: fingerprint index over stored raw records plus order-id
//!   matching against canonical transactions
//! - **Sequencing**: stable ordering of same-second transactions across re-imports
//! - **Balance reconciliation**: forward, backward and embedded-balance checks
//! - **Overlap validation**: re-imported windows must agree day by day
//! - **Audit**: one append-only batch entry per run
//! - **Storage abstraction**: trait-based storage with all-or-nothing commits
//!
//! ## Quick Start
//!
//! ```rust
//! use bigdecimal::BigDecimal;
//! use chrono::NaiveDate;
//! use ledger_import::{
//!     utils::MemoryStorage, ImportPipeline, ImportRequest, InstitutionPolicy,
//!     PolicyRegistry, RawTransactionRecord, SourceDescriptor,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ledger_import::ImportError> {
//! let registry = PolicyRegistry::new().with("cmb_credit", InstitutionPolicy::new());
//! let pipeline = ImportPipeline::new(MemoryStorage::new(), registry);
//!
//! let purchase = RawTransactionRecord::new()
//!     .date(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap().and_hms_opt(10, 0, 0).unwrap())
//!     .amount(BigDecimal::from(-42))
//!     .order_id("2024030512345");
//! let request = ImportRequest::new(
//!     "credit-card",
//!     SourceDescriptor::new("cmb_credit", "2024-03.pdf"),
//!     vec![purchase],
//! )
//! .with_closing_balance(BigDecimal::from(958));
//!
//! let result = pipeline.import(request.clone()).await?;
//! assert_eq!(result.accepted, 1);
//! assert_eq!(result.balance, Some(BigDecimal::from(958)));
//!
//! // Importing the same statement again changes nothing
//! let again = pipeline.import(request).await?;
//! assert_eq!((again.accepted, again.duplicates), (0, 1));
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod config;
pub mod dedup;
pub mod filter;
pub mod identity;
pub mod overlap;
pub mod pipeline;
pub mod reconciliation;
pub mod sequence;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::{InstitutionConfig, PipelineConfig, SourceOrder};
pub use identity::AccountIdentity;
pub use pipeline::*;
pub use traits::*;
pub use types::*;
