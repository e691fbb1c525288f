//! Main ledger orchestrator that coordinates accounts, costing, posting and reporting

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::config::LedgerConfig;
use crate::ledger::aggregate::*;
use crate::ledger::costing::{CostingEngine, StockBook, StockUnit};
use crate::ledger::posting::{
    BusinessEvent, IssueItem, PostingEngine, PostingOutcome, ReceiptItem, StockIssue, StockReceipt, StockTransfer,
};
use crate::ledger::{AccountDirectory, JournalStore};
use crate::traits::*;
use crate::types::*;

/// Main ledger system that orchestrates all accounting operations
pub struct Ledger<S: LedgerStorage> {
    storage: S,
    account_directory: AccountDirectory<S>,
    journal: JournalStore<S>,
    aggregator: BalanceAggregator<S>,
    costing: CostingEngine,
    config: LedgerConfig,
    reference_data: Box<dyn ReferenceData>,
}

impl<S: LedgerStorage + Clone> Ledger<S> {
    /// Create a new ledger with the given storage backend
    pub fn new(storage: S) -> Self {
        Self::assemble(storage, LedgerConfig::default())
    }

    /// Create a new ledger with a deployment configuration
    pub fn with_config(storage: S, config: LedgerConfig) -> LedgerResult<Self> {
        config.validate()?;
        Ok(Self::assemble(storage, config))
    }

    fn assemble(storage: S, config: LedgerConfig) -> Self {
        Self {
            account_directory: AccountDirectory::new(storage.clone()),
            journal: JournalStore::new(storage.clone()),
            aggregator: BalanceAggregator::new(storage.clone(), config.clone()),
            costing: CostingEngine::from_config(&config),
            storage,
            config,
            reference_data: Box::new(NoReferenceData),
        }
    }

    /// Create a new ledger with custom validators
    pub fn with_validators(
        storage: S,
        config: LedgerConfig,
        account_validator: Box<dyn AccountValidator>,
        entry_validator: Box<dyn EntryValidator>,
    ) -> LedgerResult<Self> {
        let mut ledger = Self::with_config(storage.clone(), config)?;
        ledger.account_directory = AccountDirectory::with_validator(storage.clone(), account_validator);
        ledger.journal = JournalStore::with_validator(storage, entry_validator);
        Ok(ledger)
    }

    /// Use the given customer/supplier/product/warehouse links
    pub fn with_reference_data(mut self, reference_data: impl ReferenceData + 'static) -> Self {
        self.reference_data = Box::new(reference_data);
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // Account operations
    /// Create a new account
    pub async fn create_account(
        &mut self,
        code: String,
        name: String,
        account_type: AccountType,
        nature: Nature,
        parent_code: Option<String>,
        is_transactional: bool,
    ) -> LedgerResult<Account> {
        self.account_directory
            .create_account(code, name, account_type, nature, parent_code, is_transactional)
            .await
    }

    /// Get an account by code
    pub async fn get_account(&self, code: &str) -> LedgerResult<Option<Account>> {
        self.account_directory.get_account(code).await
    }

    /// List all accounts
    pub async fn list_accounts(&self) -> LedgerResult<Vec<Account>> {
        self.account_directory.list_accounts().await
    }

    /// List accounts by type
    pub async fn list_accounts_by_type(&self, account_type: AccountType) -> LedgerResult<Vec<Account>> {
        self.account_directory.list_accounts_by_type(account_type).await
    }

    pub async fn children(&self, code: &str) -> LedgerResult<Vec<Account>> {
        self.account_directory.children(code).await
    }

    pub async fn account_path(&self, code: &str) -> LedgerResult<Vec<Account>> {
        self.account_directory.account_path(code).await
    }

    /// Update an account's name or metadata
    pub async fn update_account(&mut self, account: &Account) -> LedgerResult<Account> {
        self.account_directory.update_account(account).await
    }

    /// Delete an account
    pub async fn delete_account(&mut self, code: &str) -> LedgerResult<()> {
        self.account_directory.delete_account(code).await
    }

    /// Write explicit parent links for imported accounts
    pub async fn migrate_inferred_parents(&mut self) -> LedgerResult<Vec<String>> {
        self.account_directory.migrate_inferred_parents().await
    }

    /// Setup the standard chart of accounts
    pub async fn setup_standard_chart_of_accounts(&mut self) -> LedgerResult<HashMap<String, Account>> {
        crate::ledger::account::utils::create_standard_chart(&mut self.account_directory).await
    }

    /// Provision every configured system account. Run at startup, before
    /// postings are accepted.
    pub async fn ensure_system_accounts(&mut self) -> LedgerResult<Vec<Account>> {
        self.account_directory.ensure_system_accounts(&self.config).await
    }

    // Posting operations
    /// Post a business event: cost its stock movements, build the entry and
    /// commit entry, stock positions and any provisioned accounts together.
    pub async fn post_business_event(&mut self, event: BusinessEvent) -> LedgerResult<JournalEntry> {
        let reference = event.reference_no();
        if self.journal.find_by_reference(&reference).await?.is_some() {
            return Err(LedgerError::DuplicateReference(reference));
        }

        let changes = self.prepare(&event, None).await?;
        let provisioned = account_codes(&changes.new_accounts);
        let entry = self.commit_single(changes).await?;

        log_provisioned(&provisioned, &entry.reference_no);
        tracing::info!(
            reference = %entry.reference_no,
            lines = entry.lines.len(),
            movements = entry.stock_movements.len(),
            total = %entry.total_debit(),
            status = ?entry.status,
            "journal entry posted"
        );
        Ok(entry)
    }

    /// Delete a posted event: its journal entry is removed and its stock
    /// movements are undone in the same commit.
    pub async fn reverse_by_reference(&mut self, reference_no: &str) -> LedgerResult<JournalEntry> {
        let entry = self.journal.find_required(reference_no).await?;

        let keys = entry.stock_movements.iter().map(|m| m.key.clone());
        let mut book = StockBook::load(&self.storage, keys).await?;
        self.costing.reverse_all(&mut book, &entry.stock_movements);
        let mut changes = Changeset {
            removed_entries: vec![entry.reference_no.clone()],
            ..Changeset::default()
        };
        book.apply_to(&mut changes);
        self.storage.commit(changes).await?;

        tracing::info!(
            reference = %entry.reference_no,
            movements = entry.stock_movements.len(),
            "journal entry deleted"
        );
        Ok(entry)
    }

    /// Replace a posted event with a new version: the old entry (if any) is
    /// deleted, its stock undone and the new event posted, all in one commit.
    pub async fn repost(&mut self, reference_no: &str, event: BusinessEvent) -> LedgerResult<JournalEntry> {
        let old = self.journal.find_by_reference(reference_no).await?;

        let changes = self.prepare(&event, old.as_ref()).await?;
        let provisioned = account_codes(&changes.new_accounts);
        let entry = self.commit_single(changes).await?;

        log_provisioned(&provisioned, &entry.reference_no);
        tracing::info!(
            old_reference = reference_no,
            replaced = old.is_some(),
            reference = %entry.reference_no,
            total = %entry.total_debit(),
            "journal entry reposted"
        );
        Ok(entry)
    }

    /// Post a draft entry so it counts in balances
    pub async fn approve_draft(&mut self, reference_no: &str) -> LedgerResult<JournalEntry> {
        let draft = self.journal.find_required(reference_no).await?;
        if draft.is_posted() {
            return Err(LedgerError::Validation(format!(
                "Entry '{reference_no}' is already posted"
            )));
        }

        let mut entry = draft.clone();
        entry.status = EntryStatus::Posted;
        self.journal.validator().validate_entry(&entry)?;
        let outcome = PostingOutcome {
            entry,
            system_accounts: Default::default(),
            rounding: None,
        };
        self.resolve_accounts(&outcome).await?;

        let entry = self
            .commit_single(Changeset {
                removed_entries: vec![draft.reference_no.clone()],
                new_entries: vec![outcome.entry],
                ..Changeset::default()
            })
            .await?;
        tracing::info!(reference = %entry.reference_no, "draft approved");
        Ok(entry)
    }

    async fn prepare(&self, event: &BusinessEvent, replacing: Option<&JournalEntry>) -> LedgerResult<Changeset> {
        if let BusinessEvent::StockReceipt(receipt) = event {
            self.check_receipt_against_document(receipt, replacing).await?;
        }

        let mut keys = event.stock_keys();
        if let Some(old) = replacing {
            keys.extend(old.stock_movements.iter().map(|m| m.key.clone()));
        }
        let mut book = StockBook::load(&self.storage, keys).await?;

        let mut changes = Changeset::default();
        if let Some(old) = replacing {
            self.costing.reverse_all(&mut book, &old.stock_movements);
            changes.removed_entries.push(old.reference_no.clone());
        }

        let outcome = PostingEngine::new(&self.config, &self.costing, &*self.reference_data)
            .build(event, &mut book)?;
        self.journal.validator().validate_entry(&outcome.entry)?;
        changes.new_accounts = self.resolve_accounts(&outcome).await?;

        book.apply_to(&mut changes);
        changes.new_entries.push(outcome.entry);
        Ok(changes)
    }

    /// A receipt against a posted purchase invoice may not take more of a
    /// product than the invoice billed, counting earlier receipts against the
    /// same document. Free-text documents and invoices without item lines
    /// are not checked.
    async fn check_receipt_against_document(
        &self,
        receipt: &StockReceipt,
        replacing: Option<&JournalEntry>,
    ) -> LedgerResult<()> {
        let Some(document) = receipt.supplier_document.as_deref() else {
            return Ok(());
        };
        let invoice = match self.journal.find_by_reference(document).await? {
            Some(entry) if entry.source == EntrySource::PurchaseInvoice && !entry.item_quantities.is_empty() => entry,
            _ => return Ok(()),
        };

        let mut requested: BTreeMap<&str, BigDecimal> = BTreeMap::new();
        for item in &receipt.items {
            *requested
                .entry(item.product_id.as_str())
                .or_insert_with(|| BigDecimal::from(0)) += &item.quantity;
        }

        let replaced = replacing.map(|e| e.reference_no.as_str());
        let earlier: Vec<JournalEntry> = self
            .journal
            .entries(None, None)
            .await?
            .into_iter()
            .filter(|e| {
                e.source == EntrySource::StockReceipt
                    && e.document_ref.as_deref() == Some(document)
                    && Some(e.reference_no.as_str()) != replaced
            })
            .collect();

        for (product_id, quantity) in requested {
            let ordered = invoice
                .item_quantities
                .get(product_id)
                .cloned()
                .unwrap_or_else(|| BigDecimal::from(0));
            let received: BigDecimal = earlier
                .iter()
                .filter_map(|e| e.item_quantities.get(product_id))
                .sum();
            if &received + &quantity > ordered {
                tracing::warn!(
                    reference = %receipt.reference_no,
                    document,
                    product = product_id,
                    "receipt exceeds the purchase invoice"
                );
                return Err(LedgerError::OverReceipt {
                    document: document.to_string(),
                    product_id: product_id.to_string(),
                    ordered,
                    received,
                    requested: quantity,
                });
            }
        }
        Ok(())
    }

    /// Every line must hit an existing transactional account. Missing system
    /// accounts the template fell back to are provisioned only when the
    /// configuration allows it; the returned accounts join the commit.
    async fn resolve_accounts(&self, outcome: &PostingOutcome) -> LedgerResult<Vec<Account>> {
        let reference = &outcome.entry.reference_no;
        let mut provisioned = Vec::new();
        let mut checked = HashSet::new();

        for line in &outcome.entry.lines {
            let code = &line.account_code;
            if !checked.insert(code.clone()) {
                continue;
            }
            match self.account_directory.get_account(code).await? {
                Some(account) if !account.is_transactional => {
                    return Err(LedgerError::NotTransactional {
                        code: code.clone(),
                        reference: reference.clone(),
                    });
                }
                Some(_) => {}
                None => {
                    let system_account = self
                        .config
                        .system_account_for(code)
                        .filter(|a| outcome.system_accounts.contains(a));
                    match system_account {
                        Some(system_account) if self.config.auto_provision_system_accounts => {
                            let spec = system_account.spec();
                            let account = self
                                .account_directory
                                .provisioned_account(code, spec.name, spec.account_type, spec.nature, reference)
                                .await?;
                            provisioned.push(account);
                        }
                        _ => {
                            return Err(LedgerError::MissingAccount {
                                code: code.clone(),
                                reference: reference.clone(),
                            });
                        }
                    }
                }
            }
        }

        Ok(provisioned)
    }

    async fn commit_single(&mut self, changes: Changeset) -> LedgerResult<JournalEntry> {
        let mut stored = self.storage.commit(changes).await?;
        stored
            .pop()
            .ok_or_else(|| LedgerError::Storage("commit returned no entry".to_string()))
    }

    // Stock operations
    /// Receive stock into a warehouse: posts a stock receipt (inventory
    /// against purchase clearing) and returns its valuation.
    pub async fn receive_stock(
        &mut self,
        reference_no: &str,
        date: NaiveDate,
        product_id: &str,
        warehouse_id: &str,
        quantity: BigDecimal,
        unit_cost: BigDecimal,
    ) -> LedgerResult<Valuation> {
        let event = BusinessEvent::StockReceipt(StockReceipt {
            reference_no: reference_no.to_string(),
            date,
            warehouse_id: warehouse_id.to_string(),
            items: vec![ReceiptItem {
                product_id: product_id.to_string(),
                quantity,
                unit: StockUnit::Each,
                unit_cost,
            }],
            supplier_document: None,
        });
        let entry = self.post_business_event(event).await?;
        Ok(Valuation::of_movements(&entry.stock_movements, MovementKind::Receipt))
    }

    /// Issue stock to consumption: posts a stock issue (cost of activity
    /// against inventory) and returns the cost taken out.
    pub async fn issue_stock(
        &mut self,
        reference_no: &str,
        date: NaiveDate,
        product_id: &str,
        warehouse_id: &str,
        quantity: BigDecimal,
    ) -> LedgerResult<Valuation> {
        let event = BusinessEvent::StockIssue(StockIssue {
            reference_no: reference_no.to_string(),
            date,
            warehouse_id: warehouse_id.to_string(),
            items: vec![IssueItem {
                product_id: product_id.to_string(),
                quantity,
                unit: StockUnit::Each,
            }],
            cost_center: None,
            job_order: None,
        });
        let entry = self.post_business_event(event).await?;
        Ok(Valuation::of_movements(&entry.stock_movements, MovementKind::Issue))
    }

    /// Move stock between warehouses as a posted transfer. Returns the
    /// value moved.
    pub async fn transfer_stock(
        &mut self,
        reference_no: &str,
        date: NaiveDate,
        product_id: &str,
        from_warehouse: &str,
        to_warehouse: &str,
        quantity: BigDecimal,
    ) -> LedgerResult<Valuation> {
        let event = BusinessEvent::StockTransfer(StockTransfer {
            reference_no: reference_no.to_string(),
            date,
            from_warehouse: from_warehouse.to_string(),
            to_warehouse: to_warehouse.to_string(),
            items: vec![IssueItem {
                product_id: product_id.to_string(),
                quantity,
                unit: StockUnit::Each,
            }],
        });
        let entry = self.post_business_event(event).await?;
        Ok(Valuation::of_movements(&entry.stock_movements, MovementKind::Issue))
    }

    pub async fn stock_position(&self, product_id: &str, warehouse_id: &str) -> LedgerResult<Option<StockPosition>> {
        self.storage
            .get_stock_position(&StockKey::new(product_id, warehouse_id))
            .await
    }

    // Journal queries
    /// Get a journal entry by reference
    pub async fn get_entry(&self, reference_no: &str) -> LedgerResult<Option<JournalEntry>> {
        self.journal.find_by_reference(reference_no).await
    }

    /// Get all entries within a date range
    pub async fn entries(
        &self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> LedgerResult<Vec<JournalEntry>> {
        self.journal.entries(start_date, end_date).await
    }

    /// Get entries for a specific account
    pub async fn account_entries(
        &self,
        account_code: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> LedgerResult<Vec<JournalEntry>> {
        self.journal
            .find_for_account(account_code, start_date, end_date)
            .await
    }

    // Balance and reporting operations
    /// Raw (debit-positive) balance as of a date
    pub async fn account_balance(&self, code: &str, as_of: Option<NaiveDate>) -> LedgerResult<BigDecimal> {
        self.aggregator.account_balance(code, as_of).await
    }

    /// Balance signed by the account's nature
    pub async fn presented_balance(&self, code: &str, as_of: Option<NaiveDate>) -> LedgerResult<BigDecimal> {
        self.aggregator.presented_balance(code, as_of).await
    }

    pub async fn statement(
        &self,
        code: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> LedgerResult<AccountStatement> {
        self.aggregator.statement(code, from, to).await
    }

    pub async fn trial_balance(
        &self,
        level: TrialBalanceLevel,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> LedgerResult<TrialBalance> {
        self.aggregator.trial_balance(level, from, to).await
    }

    pub async fn subtree_balance(&self, code: &str, as_of: Option<NaiveDate>) -> LedgerResult<BigDecimal> {
        self.aggregator.subtree_balance(code, as_of).await
    }

    pub async fn dashboard(&self, from: NaiveDate, to: NaiveDate) -> LedgerResult<DashboardSummary> {
        self.aggregator.dashboard(from, to).await
    }

    /// Generate a balance sheet as of a specific date
    pub async fn balance_sheet(&self, as_of_date: NaiveDate) -> LedgerResult<BalanceSheet> {
        self.aggregator.balance_sheet(as_of_date).await
    }

    /// Generate an income statement for a date range
    pub async fn income_statement(&self, start_date: NaiveDate, end_date: NaiveDate) -> LedgerResult<IncomeStatement> {
        self.aggregator.income_statement(start_date, end_date).await
    }

    pub async fn cost_center_totals(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> LedgerResult<Vec<CostCenterTotal>> {
        self.aggregator.cost_center_totals(from, to).await
    }

    pub async fn stock_value(&self) -> LedgerResult<BigDecimal> {
        self.aggregator.stock_value().await
    }

    pub async fn job_profitability(&self, invoice_reference: &str) -> LedgerResult<JobProfitability> {
        self.aggregator.job_profitability(invoice_reference).await
    }

    pub async fn sales_by_customer(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> LedgerResult<Vec<CustomerSales>> {
        self.aggregator.sales_by_customer(from, to).await
    }

    /// Validate the integrity of the ledger
    pub async fn validate_integrity(&self, as_of_date: NaiveDate) -> LedgerResult<LedgerIntegrityReport> {
        let trial_balance = self
            .trial_balance(TrialBalanceLevel::Roots, None, Some(as_of_date))
            .await?;
        let balance_sheet = self.balance_sheet(as_of_date).await?;

        let mut issues = Vec::new();

        let all_entries = self.entries(None, None).await?;
        for entry in all_entries.iter().filter(|e| e.entry_date <= as_of_date) {
            if !entry.is_balanced() {
                issues.push(format!(
                    "Entry '{}' is not balanced: delta = {}",
                    entry.reference_no,
                    entry.imbalance()
                ));
            }
        }

        if !trial_balance.is_balanced {
            issues.push(format!(
                "Trial balance is not balanced: debits = {}, credits = {}",
                trial_balance.total_period_debit, trial_balance.total_period_credit
            ));
        }

        let total_liabilities_equity = &balance_sheet.total_liabilities + &balance_sheet.total_equity;
        if !balance_sheet.is_balanced {
            issues.push(format!(
                "Balance sheet is not balanced: assets = {}, liabilities + equity = {}",
                balance_sheet.total_assets, total_liabilities_equity
            ));
        }

        // Cached balances cover the whole journal, not just up to as_of_date
        for account in self.list_accounts().await? {
            let recomputed = self.account_balance(&account.code, None).await?;
            if recomputed != account.balance {
                issues.push(format!(
                    "Cached balance of '{}' is {}, journal says {}",
                    account.code, account.balance, recomputed
                ));
            }
        }

        // Stock is only moved together with inventory lines, so the book
        // value must match the inventory accounts up to cost rounding.
        let stock_value = self.stock_value().await?;
        let mut inventory_balance = BigDecimal::from(0);
        for code in &self.config.dashboard.inventory {
            match self.subtree_balance(code, None).await {
                Ok(balance) => inventory_balance += balance,
                Err(LedgerError::AccountNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        let movements = all_entries
            .iter()
            .filter(|e| e.is_posted())
            .map(|e| e.stock_movements.len())
            .sum::<usize>()
            .max(1);
        let allowed = &self.config.rounding_tolerance * BigDecimal::from(movements as u64);
        if (&stock_value - &inventory_balance).abs() > allowed {
            issues.push(format!(
                "Stock value {} does not match inventory accounts {}",
                stock_value.round(2),
                inventory_balance
            ));
        }

        if !self.config.allow_negative_stock {
            for position in self.storage.list_stock_positions().await? {
                if position.quantity < BigDecimal::from(0) {
                    issues.push(format!(
                        "Stock position {} is negative: {}",
                        position.key, position.quantity
                    ));
                }
            }
        }

        Ok(LedgerIntegrityReport {
            as_of_date,
            is_valid: issues.is_empty(),
            issues,
            trial_balance_total_debits: trial_balance.total_period_debit,
            trial_balance_total_credits: trial_balance.total_period_credit,
            balance_sheet_total_assets: balance_sheet.total_assets,
            balance_sheet_total_liabilities_equity: total_liabilities_equity,
        })
    }
}

fn account_codes(accounts: &[Account]) -> Vec<String> {
    accounts.iter().map(|a| a.code.clone()).collect()
}

fn log_provisioned(codes: &[String], reference: &str) {
    for code in codes {
        tracing::warn!(code = %code, triggered_by = %reference, "account auto-provisioned");
    }
}

/// Report on ledger integrity and validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerIntegrityReport {
    pub as_of_date: NaiveDate,
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub trial_balance_total_debits: BigDecimal,
    pub trial_balance_total_credits: BigDecimal,
    pub balance_sheet_total_assets: BigDecimal,
    pub balance_sheet_total_liabilities_equity: BigDecimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::costing::StockUnit;
    use crate::ledger::journal::JournalEntryBuilder;
    use crate::ledger::posting::*;
    use crate::utils::memory_storage::MemoryStorage;

    fn dec(value: &str) -> BigDecimal {
        value.parse().unwrap()
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, day).unwrap()
    }

    async fn ledger() -> Ledger<MemoryStorage> {
        let mut ledger = Ledger::new(MemoryStorage::new());
        ledger.setup_standard_chart_of_accounts().await.unwrap();
        ledger
    }

    fn receipt(reference: &str, quantity: &str, unit_cost: &str) -> BusinessEvent {
        BusinessEvent::StockReceipt(StockReceipt {
            reference_no: reference.to_string(),
            date: date(1),
            warehouse_id: "W1".to_string(),
            items: vec![ReceiptItem {
                product_id: "P1".to_string(),
                quantity: dec(quantity),
                unit: StockUnit::Each,
                unit_cost: dec(unit_cost),
            }],
            supplier_document: None,
        })
    }

    fn stocked_sale(reference: &str, quantity: &str) -> BusinessEvent {
        let mut invoice = SalesInvoice::new(reference, date(5), None);
        invoice.items.push(SalesItem {
            product_id: "P1".to_string(),
            warehouse_id: Some("W1".to_string()),
            quantity: dec(quantity),
            unit: StockUnit::Each,
            price: dec("100"),
        });
        invoice.tax = dec("14");
        invoice.discount = dec("5");
        BusinessEvent::SalesInvoice(invoice)
    }

    #[tokio::test]
    async fn sale_posts_revenue_and_cost_together() {
        let mut ledger = ledger().await;
        ledger.post_business_event(receipt("GRN-1", "10", "5")).await.unwrap();
        ledger.post_business_event(receipt("GRN-2", "10", "7")).await.unwrap();

        let entry = ledger.post_business_event(stocked_sale("INV-1", "5")).await.unwrap();

        assert!(entry.is_balanced());
        assert_eq!(entry.total_debit(), dec("144"));
        assert_eq!(ledger.account_balance("5100", None).await.unwrap(), dec("30"));
        assert_eq!(ledger.account_balance("110301", None).await.unwrap(), dec("90"));
        let position = ledger.stock_position("P1", "W1").await.unwrap().unwrap();
        assert_eq!(position.quantity, dec("15"));
        assert_eq!(position.weighted_average_cost, dec("6"));
        assert_eq!(ledger.stock_value().await.unwrap(), dec("90"));
    }

    #[tokio::test]
    async fn deleting_a_sale_restores_stock_exactly() {
        let mut ledger = ledger().await;
        ledger.post_business_event(receipt("GRN-1", "3", "4.333333")).await.unwrap();
        let before = ledger.stock_position("P1", "W1").await.unwrap();
        let entries_before = ledger.entries(None, None).await.unwrap().len();

        ledger.post_business_event(stocked_sale("INV-1", "2")).await.unwrap();
        ledger.reverse_by_reference("INV-1").await.unwrap();

        assert_eq!(ledger.stock_position("P1", "W1").await.unwrap(), before);
        assert_eq!(ledger.entries(None, None).await.unwrap().len(), entries_before);
        assert!(ledger.get_entry("INV-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_issue_commits_nothing() {
        let mut ledger = ledger().await;
        ledger.post_business_event(receipt("GRN-1", "1", "5")).await.unwrap();

        let result = ledger.post_business_event(stocked_sale("INV-1", "2")).await;

        assert!(matches!(result, Err(LedgerError::InsufficientStock { .. })));
        assert!(ledger.get_entry("INV-1").await.unwrap().is_none());
        let position = ledger.stock_position("P1", "W1").await.unwrap().unwrap();
        assert_eq!(position.quantity, dec("1"));
    }

    #[tokio::test]
    async fn duplicate_references_are_rejected() {
        let mut ledger = ledger().await;
        ledger.post_business_event(receipt("GRN-1", "1", "5")).await.unwrap();
        let result = ledger.post_business_event(receipt("GRN-1", "1", "5")).await;
        assert!(matches!(result, Err(LedgerError::DuplicateReference(r)) if r == "GRN-1"));
        let position = ledger.stock_position("P1", "W1").await.unwrap().unwrap();
        assert_eq!(position.quantity, dec("1"));
    }

    #[tokio::test]
    async fn repost_replaces_entry_and_stock_in_one_step() {
        let mut ledger = ledger().await;
        ledger.post_business_event(receipt("GRN-1", "10", "6")).await.unwrap();
        ledger.post_business_event(stocked_sale("INV-1", "2")).await.unwrap();

        let entry = ledger.repost("INV-1", stocked_sale("INV-1", "4")).await.unwrap();

        assert_eq!(entry.reference_no, "INV-1");
        assert_eq!(ledger.account_balance("5100", None).await.unwrap(), dec("24"));
        let position = ledger.stock_position("P1", "W1").await.unwrap().unwrap();
        assert_eq!(position.quantity, dec("6"));
    }

    #[tokio::test]
    async fn repost_without_a_previous_version_just_posts() {
        let mut ledger = ledger().await;
        ledger.post_business_event(receipt("GRN-1", "10", "6")).await.unwrap();

        ledger.repost("INV-9", stocked_sale("INV-9", "1")).await.unwrap();

        assert!(ledger.get_entry("INV-9").await.unwrap().is_some());
        assert!(matches!(
            ledger.repost("INV-8", stocked_sale("INV-9", "1")).await,
            Err(LedgerError::DuplicateReference(_))
        ));
    }

    #[tokio::test]
    async fn missing_system_accounts_fail_fast_by_default() {
        let mut ledger = Ledger::new(MemoryStorage::new());

        let result = ledger.post_business_event(receipt("GRN-1", "1", "5")).await;

        assert!(matches!(
            result,
            Err(LedgerError::MissingAccount { code, reference }) if code == "110301" && reference == "GRN-1"
        ));
        assert!(ledger.stock_position("P1", "W1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn auto_provisioning_creates_accounts_in_the_same_commit() {
        let config = LedgerConfig::default().with_auto_provision(true);
        let mut ledger = Ledger::with_config(MemoryStorage::new(), config).unwrap();

        ledger.post_business_event(receipt("GRN-1", "2", "5")).await.unwrap();

        let inventory = ledger.get_account("110301").await.unwrap().unwrap();
        assert_eq!(inventory.provisioned_by(), Some("GRN-1"));
        assert_eq!(ledger.account_balance("110301", None).await.unwrap(), dec("10"));
        assert_eq!(ledger.account_balance("2200", None).await.unwrap(), dec("-10"));
    }

    #[tokio::test]
    async fn linked_accounts_are_never_provisioned() {
        let config = LedgerConfig::default().with_auto_provision(true);
        let reference_data = StaticReferenceData::new().with_warehouse("W1", "110399");
        let mut ledger = Ledger::with_config(MemoryStorage::new(), config)
            .unwrap()
            .with_reference_data(reference_data);

        let result = ledger.post_business_event(receipt("GRN-1", "2", "5")).await;

        assert!(matches!(result, Err(LedgerError::MissingAccount { code, .. }) if code == "110399"));
        assert!(ledger.list_accounts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn group_accounts_do_not_take_postings() {
        let mut ledger = ledger().await;
        let manual = JournalEntryBuilder::new("MAN-1".to_string(), date(2), "Wrong".to_string())
            .debit("1101", dec("10"), None)
            .credit("3101", dec("10"), None)
            .build()
            .unwrap();

        let result = ledger.post_business_event(BusinessEvent::Manual(manual)).await;

        assert!(matches!(result, Err(LedgerError::NotTransactional { code, .. }) if code == "1101"));
    }

    #[tokio::test]
    async fn drafts_count_only_after_approval() {
        let mut ledger = ledger().await;
        let manual = JournalEntryBuilder::new("MAN-2".to_string(), date(2), "Accrual".to_string())
            .draft()
            .debit("5306", dec("40"), None)
            .credit("11010101", dec("40"), None)
            .build()
            .unwrap();
        ledger.post_business_event(BusinessEvent::Manual(manual)).await.unwrap();
        assert_eq!(ledger.account_balance("5306", None).await.unwrap(), dec("0"));

        ledger.approve_draft("MAN-2").await.unwrap();

        assert_eq!(ledger.account_balance("5306", None).await.unwrap(), dec("40"));
        assert!(matches!(
            ledger.approve_draft("MAN-2").await,
            Err(LedgerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn stock_operations_post_their_inventory_lines() {
        let mut ledger = ledger().await;
        let received = ledger
            .receive_stock("OPEN-P9", date(1), "P9", "W1", dec("10"), dec("5"))
            .await
            .unwrap();
        assert_eq!(received.amount, dec("50"));
        assert_eq!(ledger.account_balance("110301", None).await.unwrap(), dec("50"));
        assert_eq!(ledger.account_balance("2200", None).await.unwrap(), dec("-50"));

        let moved = ledger
            .transfer_stock("TRF-1", date(2), "P9", "W1", "W2", dec("4"))
            .await
            .unwrap();
        assert_eq!(moved.amount, dec("20"));

        let issued = ledger
            .issue_stock("ISS-1", date(3), "P9", "W2", dec("1"))
            .await
            .unwrap();
        assert_eq!(issued.amount, dec("5"));

        assert_eq!(ledger.entries(None, None).await.unwrap().len(), 3);
        assert_eq!(ledger.account_balance("110301", None).await.unwrap(), dec("45"));
        assert_eq!(ledger.account_balance("5100", None).await.unwrap(), dec("5"));
        assert_eq!(ledger.stock_value().await.unwrap(), dec("45"));
        assert!(ledger.validate_integrity(date(30)).await.unwrap().is_valid);
    }

    #[tokio::test]
    async fn integrity_flags_stock_that_drifts_from_the_books() {
        let mut storage = MemoryStorage::new();
        let mut ledger = Ledger::new(storage.clone());
        ledger.setup_standard_chart_of_accounts().await.unwrap();
        ledger.post_business_event(receipt("GRN-1", "10", "5")).await.unwrap();
        assert!(ledger.validate_integrity(date(30)).await.unwrap().is_valid);

        storage
            .commit(Changeset {
                stock_positions: vec![StockPosition {
                    key: StockKey::new("P1", "W1"),
                    quantity: dec("20"),
                    weighted_average_cost: dec("5"),
                }],
                ..Changeset::default()
            })
            .await
            .unwrap();

        let report = ledger.validate_integrity(date(30)).await.unwrap();
        assert!(!report.is_valid);
        assert!(report.issues.iter().any(|i| i.contains("does not match inventory")));
    }

    /// Delegates to memory storage but gives other tasks a chance to run
    /// between reading a stock position and committing.
    #[derive(Clone, Default)]
    struct InterleavingStorage(MemoryStorage);

    #[async_trait::async_trait]
    impl LedgerStorage for InterleavingStorage {
        async fn save_account(&mut self, account: &Account) -> LedgerResult<()> {
            self.0.save_account(account).await
        }

        async fn get_account(&self, code: &str) -> LedgerResult<Option<Account>> {
            self.0.get_account(code).await
        }

        async fn list_accounts(&self, account_type: Option<AccountType>) -> LedgerResult<Vec<Account>> {
            self.0.list_accounts(account_type).await
        }

        async fn update_account(&mut self, account: &Account) -> LedgerResult<()> {
            self.0.update_account(account).await
        }

        async fn delete_account(&mut self, code: &str) -> LedgerResult<()> {
            self.0.delete_account(code).await
        }

        async fn get_entry(&self, reference_no: &str) -> LedgerResult<Option<JournalEntry>> {
            self.0.get_entry(reference_no).await
        }

        async fn get_entries(
            &self,
            start_date: Option<NaiveDate>,
            end_date: Option<NaiveDate>,
        ) -> LedgerResult<Vec<JournalEntry>> {
            self.0.get_entries(start_date, end_date).await
        }

        async fn get_account_entries(
            &self,
            account_code: &str,
            start_date: Option<NaiveDate>,
            end_date: Option<NaiveDate>,
        ) -> LedgerResult<Vec<JournalEntry>> {
            self.0.get_account_entries(account_code, start_date, end_date).await
        }

        async fn get_stock_position(&self, key: &StockKey) -> LedgerResult<Option<StockPosition>> {
            let position = self.0.get_stock_position(key).await;
            tokio::task::yield_now().await;
            position
        }

        async fn list_stock_positions(&self) -> LedgerResult<Vec<StockPosition>> {
            self.0.list_stock_positions().await
        }

        async fn commit(&mut self, changes: Changeset) -> LedgerResult<Vec<JournalEntry>> {
            self.0.commit(changes).await
        }
    }

    #[tokio::test]
    async fn concurrent_sales_cannot_both_take_the_same_stock() {
        let storage = InterleavingStorage::default();
        let mut first = Ledger::new(storage.clone());
        first.setup_standard_chart_of_accounts().await.unwrap();
        first.post_business_event(receipt("GRN-1", "10", "5")).await.unwrap();
        let mut second = Ledger::new(storage.clone());

        let (a, b) = tokio::join!(
            first.post_business_event(stocked_sale("INV-A", "4")),
            second.post_business_event(stocked_sale("INV-B", "4")),
        );

        assert!(a.is_ok() != b.is_ok(), "a: {a:?}, b: {b:?}");
        let refused = if a.is_err() { a } else { b };
        assert!(matches!(refused, Err(LedgerError::StockConflict { .. })));

        let position = first.stock_position("P1", "W1").await.unwrap().unwrap();
        assert_eq!(position.quantity, dec("6"));
        assert_eq!(first.entries(None, None).await.unwrap().len(), 2);
        assert_eq!(first.stock_value().await.unwrap(), dec("30"));
        assert_eq!(first.account_balance("110301", None).await.unwrap(), dec("30"));
        assert!(first.validate_integrity(date(30)).await.unwrap().is_valid);

        // A retry reads the new position and goes through
        second.post_business_event(stocked_sale("INV-C", "4")).await.unwrap();
        let position = second.stock_position("P1", "W1").await.unwrap().unwrap();
        assert_eq!(position.quantity, dec("2"));
    }

    fn purchase_of(reference: &str, product: &str, quantity: &str) -> BusinessEvent {
        let mut invoice = PurchaseInvoice::new(reference, date(1), dec("100"));
        invoice.supplier_id = Some("S1".to_string());
        invoice.items.push(PurchaseItem {
            product_id: product.to_string(),
            quantity: dec(quantity),
        });
        BusinessEvent::PurchaseInvoice(invoice)
    }

    fn receipt_against(reference: &str, document: &str, product: &str, quantity: &str) -> BusinessEvent {
        BusinessEvent::StockReceipt(StockReceipt {
            reference_no: reference.to_string(),
            date: date(2),
            warehouse_id: "W1".to_string(),
            items: vec![ReceiptItem {
                product_id: product.to_string(),
                quantity: dec(quantity),
                unit: StockUnit::Each,
                unit_cost: dec("10"),
            }],
            supplier_document: Some(document.to_string()),
        })
    }

    #[tokio::test]
    async fn receipts_cannot_exceed_the_purchase_invoice() {
        let mut ledger = ledger().await;
        ledger.post_business_event(purchase_of("PUR-1", "P1", "10")).await.unwrap();
        ledger
            .post_business_event(receipt_against("GRN-1", "PUR-1", "P1", "6"))
            .await
            .unwrap();

        let result = ledger
            .post_business_event(receipt_against("GRN-2", "PUR-1", "P1", "5"))
            .await;
        assert!(matches!(
            result,
            Err(LedgerError::OverReceipt { ordered, received, requested, .. })
                if ordered == dec("10") && received == dec("6") && requested == dec("5")
        ));
        assert!(ledger.get_entry("GRN-2").await.unwrap().is_none());

        ledger
            .post_business_event(receipt_against("GRN-2", "PUR-1", "P1", "4"))
            .await
            .unwrap();
        // A corrected receipt is measured without its own earlier version
        ledger
            .repost("GRN-1", receipt_against("GRN-1", "PUR-1", "P1", "5"))
            .await
            .unwrap();

        let unbilled = ledger
            .post_business_event(receipt_against("GRN-3", "PUR-1", "P2", "1"))
            .await;
        assert!(matches!(
            unbilled,
            Err(LedgerError::OverReceipt { product_id, .. }) if product_id == "P2"
        ));
        ledger
            .post_business_event(receipt_against("GRN-4", "DN-77", "P2", "50"))
            .await
            .unwrap();
        assert_eq!(ledger.stock_position("P1", "W1").await.unwrap().unwrap().quantity, dec("9"));
    }

    #[tokio::test]
    async fn job_costs_follow_issues_linked_to_the_invoice() {
        let mut ledger = ledger().await;
        ledger.post_business_event(receipt("GRN-1", "10", "5")).await.unwrap();
        ledger.post_business_event(stocked_sale("INV-1", "2")).await.unwrap();
        ledger
            .post_business_event(BusinessEvent::StockIssue(StockIssue {
                reference_no: "ISS-1".to_string(),
                date: date(6),
                warehouse_id: "W1".to_string(),
                items: vec![IssueItem {
                    product_id: "P1".to_string(),
                    quantity: dec("3"),
                    unit: StockUnit::Each,
                }],
                cost_center: None,
                job_order: Some("INV-1".to_string()),
            }))
            .await
            .unwrap();

        let job = ledger.job_profitability("INV-1").await.unwrap();
        assert_eq!(job.revenue, dec("100"));
        assert_eq!(job.material_cost, dec("25"));
        assert_eq!(job.profit, dec("75"));
        assert_eq!(job.margin_percent, Some(dec("75")));

        let sales = ledger.sales_by_customer(None, None).await.unwrap();
        assert_eq!(sales.len(), 1);
        assert_eq!(sales[0].invoices, 1);
        assert_eq!(sales[0].cost, dec("25"));
    }

    #[tokio::test]
    async fn invalid_configuration_is_refused() {
        let config = LedgerConfig {
            cost_scale: 40,
            ..LedgerConfig::default()
        };
        assert!(matches!(
            Ledger::with_config(MemoryStorage::new(), config),
            Err(LedgerError::Config(_))
        ));
    }

    #[tokio::test]
    async fn integrity_report_is_clean_after_normal_activity() {
        let mut ledger = ledger().await;
        ledger.post_business_event(receipt("GRN-1", "10", "6")).await.unwrap();
        ledger.post_business_event(stocked_sale("INV-1", "2")).await.unwrap();
        ledger.post_business_event(stocked_sale("INV-2", "3")).await.unwrap();
        ledger.reverse_by_reference("INV-1").await.unwrap();

        let report = ledger.validate_integrity(date(30)).await.unwrap();

        assert!(report.is_valid, "issues: {:?}", report.issues);
        assert_eq!(report.trial_balance_total_debits, report.trial_balance_total_credits);
    }
}
