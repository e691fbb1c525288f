//! Traits for storage abstraction and extensibility

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;

use crate::types::*;

/// Everything one business event changes, committed as a single unit.
///
/// Storage backends must apply a changeset atomically: every precondition
/// (`NotFound` for removals, `DuplicateReference` for new entries,
/// `DuplicateCode` for new accounts, `StockConflict` for stale stock reads)
/// is checked before anything is written, and a failed commit leaves no
/// trace.
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    /// Accounts created as a side effect (auto-provisioned system accounts)
    pub new_accounts: Vec<Account>,
    /// References of entries removed before `new_entries` are inserted
    pub removed_entries: Vec<String>,
    pub new_entries: Vec<JournalEntry>,
    /// Final state of every stock position touched
    pub stock_positions: Vec<StockPosition>,
    /// Positions that did not exist before the reversed movements
    pub removed_stock_positions: Vec<StockKey>,
    /// Stock positions as they were read when the changeset was prepared.
    /// The commit is refused if any of them has changed since.
    pub expected_stock: Vec<(StockKey, Option<StockPosition>)>,
}

impl Changeset {
    pub fn is_empty(&self) -> bool {
        self.new_accounts.is_empty()
            && self.removed_entries.is_empty()
            && self.new_entries.is_empty()
            && self.stock_positions.is_empty()
            && self.removed_stock_positions.is_empty()
    }
}

/// Storage abstraction for the ledger system
///
/// This trait allows the ledger core to work with any storage backend
/// (PostgreSQL, SQLite, in-memory, etc.) by implementing these methods.
#[async_trait]
pub trait LedgerStorage: Send + Sync {
    /// Save a new account; fails with `DuplicateCode` if the code exists
    async fn save_account(&mut self, account: &Account) -> LedgerResult<()>;

    /// Get an account by code
    async fn get_account(&self, code: &str) -> LedgerResult<Option<Account>>;

    /// List all accounts, optionally filtered by type
    async fn list_accounts(&self, account_type: Option<AccountType>) -> LedgerResult<Vec<Account>>;

    /// Replace an existing account
    async fn update_account(&mut self, account: &Account) -> LedgerResult<()>;

    /// Remove an account
    async fn delete_account(&mut self, code: &str) -> LedgerResult<()>;

    /// Get a journal entry by reference number
    async fn get_entry(&self, reference_no: &str) -> LedgerResult<Option<JournalEntry>>;

    /// Entries with `start <= entry_date <= end`, ordered by `(entry_date, sequence)`
    async fn get_entries(
        &self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> LedgerResult<Vec<JournalEntry>>;

    /// Entries touching one account, ordered by `(entry_date, sequence)`
    async fn get_account_entries(
        &self,
        account_code: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> LedgerResult<Vec<JournalEntry>>;

    /// Get the stock position of a product in a warehouse
    async fn get_stock_position(&self, key: &StockKey) -> LedgerResult<Option<StockPosition>>;

    /// All stock positions
    async fn list_stock_positions(&self) -> LedgerResult<Vec<StockPosition>>;

    /// Apply a changeset atomically and return the stored entries (with
    /// their assigned sequence numbers)
    async fn commit(&mut self, changes: Changeset) -> LedgerResult<Vec<JournalEntry>>;
}

/// Trait for implementing custom account validation rules
pub trait AccountValidator: Send + Sync {
    /// Validate an account before saving
    fn validate_account(&self, account: &Account) -> LedgerResult<()>;
}

/// Trait for implementing custom journal entry validation rules
pub trait EntryValidator: Send + Sync {
    /// Validate an entry before it is committed
    fn validate_entry(&self, entry: &JournalEntry) -> LedgerResult<()>;
}

/// Default account validator with basic rules
pub struct DefaultAccountValidator;

impl AccountValidator for DefaultAccountValidator {
    fn validate_account(&self, account: &Account) -> LedgerResult<()> {
        if account.code.trim().is_empty() {
            return Err(LedgerError::Validation(
                "Account code cannot be empty".to_string(),
            ));
        }

        if account.name.trim().is_empty() {
            return Err(LedgerError::Validation(
                "Account name cannot be empty".to_string(),
            ));
        }

        if account.parent_code.as_deref() == Some(account.code.as_str()) {
            return Err(LedgerError::InvalidParent {
                code: account.code.clone(),
                parent: account.code.clone(),
            });
        }

        Ok(())
    }
}

/// Default entry validator with the double-entry rules
pub struct DefaultEntryValidator;

impl EntryValidator for DefaultEntryValidator {
    fn validate_entry(&self, entry: &JournalEntry) -> LedgerResult<()> {
        entry.validate()
    }
}

/// Directories owned by collaborating modules (customers, suppliers,
/// products, warehouses). Each maps an id to the account code it is linked
/// to; `None` means "use the system default account".
pub trait ReferenceData: Send + Sync {
    fn customer_account(&self, customer_id: &str) -> Option<String>;

    fn supplier_account(&self, supplier_id: &str) -> Option<String>;

    /// Inventory account of a warehouse
    fn warehouse_account(&self, warehouse_id: &str) -> Option<String>;

    fn product_accounts(&self, product_id: &str) -> ProductAccounts;
}

/// Accounts a product is linked to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductAccounts {
    pub sales_account: Option<String>,
    pub cogs_account: Option<String>,
}

/// Reference data with no links at all: every posting falls back to the
/// configured system accounts.
#[derive(Debug, Clone, Default)]
pub struct NoReferenceData;

impl ReferenceData for NoReferenceData {
    fn customer_account(&self, _customer_id: &str) -> Option<String> {
        None
    }

    fn supplier_account(&self, _supplier_id: &str) -> Option<String> {
        None
    }

    fn warehouse_account(&self, _warehouse_id: &str) -> Option<String> {
        None
    }

    fn product_accounts(&self, _product_id: &str) -> ProductAccounts {
        ProductAccounts::default()
    }
}

/// In-memory reference data, populated by the embedding application
#[derive(Debug, Clone, Default)]
pub struct StaticReferenceData {
    pub customers: HashMap<String, String>,
    pub suppliers: HashMap<String, String>,
    pub warehouses: HashMap<String, String>,
    pub products: HashMap<String, ProductAccounts>,
}

impl StaticReferenceData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_customer(mut self, customer_id: &str, account_code: &str) -> Self {
        self.customers
            .insert(customer_id.to_string(), account_code.to_string());
        self
    }

    pub fn with_supplier(mut self, supplier_id: &str, account_code: &str) -> Self {
        self.suppliers
            .insert(supplier_id.to_string(), account_code.to_string());
        self
    }

    pub fn with_warehouse(mut self, warehouse_id: &str, account_code: &str) -> Self {
        self.warehouses
            .insert(warehouse_id.to_string(), account_code.to_string());
        self
    }

    pub fn with_product(
        mut self,
        product_id: &str,
        sales_account: Option<&str>,
        cogs_account: Option<&str>,
    ) -> Self {
        self.products.insert(
            product_id.to_string(),
            ProductAccounts {
                sales_account: sales_account.map(str::to_string),
                cogs_account: cogs_account.map(str::to_string),
            },
        );
        self
    }
}

impl ReferenceData for StaticReferenceData {
    fn customer_account(&self, customer_id: &str) -> Option<String> {
        self.customers.get(customer_id).cloned()
    }

    fn supplier_account(&self, supplier_id: &str) -> Option<String> {
        self.suppliers.get(supplier_id).cloned()
    }

    fn warehouse_account(&self, warehouse_id: &str) -> Option<String> {
        self.warehouses.get(warehouse_id).cloned()
    }

    fn product_accounts(&self, product_id: &str) -> ProductAccounts {
        self.products.get(product_id).cloned().unwrap_or_default()
    }
}
