//! Core types and data structures for the ledger and costing system

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Account types following standard accounting principles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AccountType {
    /// Assets - what the business owns (Cash, Inventory, Receivables, etc.)
    Asset,
    /// Liabilities - what the business owes (Suppliers, Tax payable, etc.)
    Liability,
    /// Equity - owner's interest in the business
    Equity,
    /// Revenue - money earned by the business
    Revenue,
    /// Expenses - costs incurred by the business
    Expense,
}

impl AccountType {
    /// The nature an account of this type normally carries.
    ///
    /// Contra accounts (accumulated depreciation is an asset with a credit
    /// nature) override this explicitly when they are created.
    pub fn default_nature(&self) -> Nature {
        match self {
            AccountType::Asset | AccountType::Expense => Nature::Debit,
            AccountType::Liability | AccountType::Equity | AccountType::Revenue => Nature::Credit,
        }
    }

    /// Which financial statement accounts of this type appear on
    pub fn financial_statement(&self) -> FinancialStatement {
        match self {
            AccountType::Asset | AccountType::Liability | AccountType::Equity => {
                FinancialStatement::BalanceSheet
            }
            AccountType::Revenue | AccountType::Expense => FinancialStatement::IncomeStatement,
        }
    }
}

/// Which side of an account increases its balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Nature {
    Debit,
    Credit,
}

impl Nature {
    /// Turn a raw (debit-positive) balance into the balance as presented
    /// for an account of this nature.
    pub fn present(&self, raw_balance: &BigDecimal) -> BigDecimal {
        match self {
            Nature::Debit => raw_balance.clone(),
            Nature::Credit => BigDecimal::from(0) - raw_balance,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FinancialStatement {
    BalanceSheet,
    IncomeStatement,
}

/// Chart of accounts node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Unique account code (e.g. `110201`)
    pub code: String,
    /// Human-readable account name
    pub name: String,
    /// Type of account (Asset, Liability, etc.)
    pub account_type: AccountType,
    /// Side that increases the balance
    pub nature: Nature,
    /// Explicit parent link; `None` for roots
    pub parent_code: Option<String>,
    /// Leaf accounts accept postings, group accounts only roll up
    pub is_transactional: bool,
    pub financial_statement: FinancialStatement,
    /// Cached balance. Never authoritative: reports recompute from the journal.
    pub balance: BigDecimal,
    /// Additional metadata (`provisioned_by` is set for auto-provisioned accounts)
    pub metadata: HashMap<String, String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Metadata key recording which posting auto-provisioned an account
pub const PROVISIONED_BY: &str = "provisioned_by";

impl Account {
    /// Create a new account
    pub fn new(
        code: String,
        name: String,
        account_type: AccountType,
        nature: Nature,
        parent_code: Option<String>,
        is_transactional: bool,
    ) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            code,
            name,
            financial_statement: account_type.financial_statement(),
            account_type,
            nature,
            parent_code,
            is_transactional,
            balance: BigDecimal::from(0),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a transactional leaf with the type's default nature
    pub fn leaf(code: &str, name: &str, account_type: AccountType, parent_code: Option<&str>) -> Self {
        Self::new(
            code.to_string(),
            name.to_string(),
            account_type,
            account_type.default_nature(),
            parent_code.map(str::to_string),
            true,
        )
    }

    /// Create a non-transactional group account with the type's default nature
    pub fn group(code: &str, name: &str, account_type: AccountType, parent_code: Option<&str>) -> Self {
        Self::new(
            code.to_string(),
            name.to_string(),
            account_type,
            account_type.default_nature(),
            parent_code.map(str::to_string),
            false,
        )
    }

    /// Update the cached balance by a raw debit/credit movement
    pub fn apply_line(&mut self, debit: &BigDecimal, credit: &BigDecimal) {
        self.balance = &self.balance + debit - credit;
        self.updated_at = chrono::Utc::now().naive_utc();
    }

    /// Code of the posting that auto-provisioned this account, if any
    pub fn provisioned_by(&self) -> Option<&str> {
        self.metadata.get(PROVISIONED_BY).map(String::as_str)
    }
}

/// Lifecycle status of a journal entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryStatus {
    /// Stored but excluded from every balance
    Draft,
    Posted,
}

/// Distinguishes the automatic rounding line from ordinary lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LineKind {
    Regular,
    Rounding,
}

/// Individual debit/credit line within a journal entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalLine {
    pub account_code: String,
    pub debit: BigDecimal,
    pub credit: BigDecimal,
    /// Informational grouping tag, outside the balance invariant
    pub cost_center: Option<String>,
    pub description: Option<String>,
    pub kind: LineKind,
}

impl JournalLine {
    /// Create a debit line
    pub fn debit(account_code: impl Into<String>, amount: BigDecimal, description: Option<String>) -> Self {
        Self {
            account_code: account_code.into(),
            debit: amount,
            credit: BigDecimal::from(0),
            cost_center: None,
            description,
            kind: LineKind::Regular,
        }
    }

    /// Create a credit line
    pub fn credit(account_code: impl Into<String>, amount: BigDecimal, description: Option<String>) -> Self {
        Self {
            account_code: account_code.into(),
            debit: BigDecimal::from(0),
            credit: amount,
            cost_center: None,
            description,
            kind: LineKind::Regular,
        }
    }

    /// Tag the line with a cost center
    pub fn with_cost_center(mut self, cost_center: Option<String>) -> Self {
        self.cost_center = cost_center;
        self
    }

    /// Raw movement of the line, debit-positive
    pub fn net(&self) -> BigDecimal {
        &self.debit - &self.credit
    }

    pub fn is_rounding(&self) -> bool {
        self.kind == LineKind::Rounding
    }
}

/// Identifies one stock position
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub product_id: String,
    pub warehouse_id: String,
}

impl StockKey {
    pub fn new(product_id: impl Into<String>, warehouse_id: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            warehouse_id: warehouse_id.into(),
        }
    }
}

impl std::fmt::Display for StockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.product_id, self.warehouse_id)
    }
}

/// Quantity and weighted-average unit cost of one product in one warehouse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockPosition {
    pub key: StockKey,
    /// Units or area on hand; negative only under the negative-stock override
    pub quantity: BigDecimal,
    pub weighted_average_cost: BigDecimal,
}

impl StockPosition {
    /// An empty position (nothing on hand, zero cost)
    pub fn empty(key: StockKey) -> Self {
        Self {
            key,
            quantity: BigDecimal::from(0),
            weighted_average_cost: BigDecimal::from(0),
        }
    }

    /// Value of the stock on hand at the current average cost
    pub fn value(&self) -> BigDecimal {
        &self.quantity * &self.weighted_average_cost
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovementKind {
    Receipt,
    Issue,
}

/// One costing mutation, recorded on the journal entry that caused it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockMovement {
    pub key: StockKey,
    pub kind: MovementKind,
    pub quantity: BigDecimal,
    pub unit_cost: BigDecimal,
    /// `quantity * unit_cost`, the amount handed to the posting engine
    pub valuation: BigDecimal,
    /// Position before the movement; `None` if it did not exist yet
    pub before: Option<StockPosition>,
    pub after: StockPosition,
}

/// Monetary value produced by the costing engine for a stock operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Valuation {
    pub quantity: BigDecimal,
    pub amount: BigDecimal,
}

impl Valuation {
    /// Sum the valuations of a set of movements of one kind
    pub fn of_movements<'a>(
        movements: impl IntoIterator<Item = &'a StockMovement>,
        kind: MovementKind,
    ) -> Self {
        let mut quantity = BigDecimal::from(0);
        let mut amount = BigDecimal::from(0);
        for movement in movements.into_iter().filter(|m| m.kind == kind) {
            quantity += &movement.quantity;
            amount += &movement.valuation;
        }
        Self { quantity, amount }
    }
}

/// Kind of business event an entry was posted from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    #[default]
    Manual,
    SalesInvoice,
    PurchaseInvoice,
    StockReceipt,
    StockIssue,
    StockTransfer,
    Treasury,
    Payroll,
}

/// Balanced set of debit/credit lines recording one business event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: String,
    /// Unique key; also the idempotency and reversal key
    pub reference_no: String,
    pub entry_date: NaiveDate,
    pub description: String,
    pub status: EntryStatus,
    pub lines: Vec<JournalLine>,
    /// Stock mutations performed in the same logical operation
    pub stock_movements: Vec<StockMovement>,
    #[serde(default)]
    pub source: EntrySource,
    /// Customer or supplier the entry was raised against
    #[serde(default)]
    pub party_id: Option<String>,
    /// Document this entry was raised against: the supplier invoice of a
    /// receipt, or the sales invoice (job order) of an issue
    #[serde(default)]
    pub document_ref: Option<String>,
    /// Pieces per product named on the document: billed on a purchase
    /// invoice, received on a stock receipt
    #[serde(default)]
    pub item_quantities: BTreeMap<String, BigDecimal>,
    /// Insertion order, assigned by storage on commit
    pub sequence: u64,
    pub created_at: NaiveDateTime,
}

impl JournalEntry {
    /// Create an empty posted entry
    pub fn new(reference_no: String, entry_date: NaiveDate, description: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            reference_no,
            entry_date,
            description,
            status: EntryStatus::Posted,
            lines: Vec::new(),
            stock_movements: Vec::new(),
            source: EntrySource::Manual,
            party_id: None,
            document_ref: None,
            item_quantities: BTreeMap::new(),
            sequence: 0,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    pub fn add_line(&mut self, line: JournalLine) {
        self.lines.push(line);
    }

    /// Calculate total debits
    pub fn total_debit(&self) -> BigDecimal {
        self.lines.iter().map(|l| &l.debit).sum()
    }

    /// Calculate total credits
    pub fn total_credit(&self) -> BigDecimal {
        self.lines.iter().map(|l| &l.credit).sum()
    }

    /// `Σdebit − Σcredit`
    pub fn imbalance(&self) -> BigDecimal {
        self.total_debit() - self.total_credit()
    }

    /// Check if the entry balances exactly
    pub fn is_balanced(&self) -> bool {
        self.imbalance() == BigDecimal::from(0)
    }

    pub fn is_posted(&self) -> bool {
        self.status == EntryStatus::Posted
    }

    /// Lines touching the given account
    pub fn lines_for<'a>(&'a self, account_code: &'a str) -> impl Iterator<Item = &'a JournalLine> + 'a {
        self.lines.iter().filter(move |l| l.account_code == account_code)
    }

    pub fn touches(&self, account_code: &str) -> bool {
        self.lines.iter().any(|l| l.account_code == account_code)
    }

    pub fn rounding_line(&self) -> Option<&JournalLine> {
        self.lines.iter().find(|l| l.is_rounding())
    }

    /// Structural checks shared by every posting path
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.reference_no.trim().is_empty() {
            return Err(LedgerError::Validation(
                "Journal entry reference number cannot be empty".to_string(),
            ));
        }

        if self.lines.is_empty() && self.stock_movements.is_empty() {
            return Err(LedgerError::Validation(format!(
                "Journal entry '{}' has no lines",
                self.reference_no
            )));
        }

        let zero = BigDecimal::from(0);
        for line in &self.lines {
            if line.debit < zero || line.credit < zero {
                return Err(LedgerError::Validation(format!(
                    "Negative amount on account '{}' in entry '{}'",
                    line.account_code, self.reference_no
                )));
            }
            if line.debit == zero && line.credit == zero {
                return Err(LedgerError::Validation(format!(
                    "Zero line on account '{}' in entry '{}'",
                    line.account_code, self.reference_no
                )));
            }
        }

        if !self.is_balanced() {
            let debit = self.total_debit();
            let credit = self.total_credit();
            return Err(LedgerError::ImbalancedEntry {
                reference: self.reference_no.clone(),
                delta: &debit - &credit,
                debit,
                credit,
            });
        }

        Ok(())
    }
}

/// Errors that can occur in the ledger system
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Account code already exists: {0}")]
    DuplicateCode(String),
    #[error("Parent account '{parent}' of '{code}' does not exist")]
    InvalidParent { code: String, parent: String },
    #[error("Entry '{reference}' is not balanced: debit = {debit}, credit = {credit}, delta = {delta}")]
    ImbalancedEntry {
        reference: String,
        debit: BigDecimal,
        credit: BigDecimal,
        delta: BigDecimal,
    },
    #[error("Required account '{code}' is missing (entry '{reference}')")]
    MissingAccount { code: String, reference: String },
    #[error("Insufficient stock for {key}: requested {requested}, available {available}")]
    InsufficientStock {
        key: StockKey,
        requested: BigDecimal,
        available: BigDecimal,
    },
    #[error("Stock position {key} changed after it was read; retry the operation")]
    StockConflict { key: StockKey },
    #[error(
        "Receipt exceeds document '{document}' for product '{product_id}': ordered {ordered}, already received {received}, requested {requested}"
    )]
    OverReceipt {
        document: String,
        product_id: String,
        ordered: BigDecimal,
        received: BigDecimal,
        requested: BigDecimal,
    },
    #[error("Reference already posted: {0}")]
    DuplicateReference(String),
    #[error("No journal entry with reference: {0}")]
    NotFound(String),
    #[error("Account not found: {0}")]
    AccountNotFound(String),
    #[error("Account '{code}' is a group account and cannot take postings (entry '{reference}')")]
    NotTransactional { code: String, reference: String },
    #[error("Account '{0}' is referenced by journal lines or child accounts")]
    AccountInUse(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
