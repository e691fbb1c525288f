//! # Backoffice Ledger
//!
//! Accounting core for a small-business back office: a hierarchical chart
//! of accounts, weighted-average stock costing, templated posting of
//! business events into double-entry journal entries, and the balance
//! reports built on top of them.
//!
//! ## Features
//!
//! - **Account directory**: hierarchical chart with explicit parent links and
//!   migration of legacy prefix-inferred parents
//! - **Costing**: weighted average cost per product and warehouse
//! - **Posting**: sales, purchases, stock, treasury, payroll and manual entries
//!   turned into balanced journal entries, committed atomically with their
//!   stock effects
//! - **Reporting**: account statements, hierarchical trial balance, balance
//!   sheet, income statement and dashboard totals
//! - **Storage abstraction**: the engine only talks to [`LedgerStorage`]
//!
//! ## Quick Start
//!
//! ```rust
//! use backoffice_ledger::{BusinessEvent, JournalEntryBuilder, Ledger, MemoryStorage};
//! use bigdecimal::BigDecimal;
//! use chrono::NaiveDate;
//!
//! # tokio_test_block(async {
//! let mut ledger = Ledger::new(MemoryStorage::new());
//! ledger.setup_standard_chart_of_accounts().await.unwrap();
//!
//! let opening = JournalEntryBuilder::new(
//!     "OPEN-1".to_string(),
//!     NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
//!     "Opening balance".to_string(),
//! )
//! .debit("11010101", BigDecimal::from(1000), None)
//! .credit("3101", BigDecimal::from(1000), None)
//! .build()
//! .unwrap();
//! ledger.post_business_event(BusinessEvent::Manual(opening)).await.unwrap();
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f);
//! # }
//! ```

pub mod config;
pub mod ledger;
pub mod observability;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::*;
pub use ledger::*;
pub use traits::*;
pub use types::*;
pub use utils::memory_storage::MemoryStorage;

// Re-export manual entry patterns for convenience
pub use ledger::journal::patterns;
