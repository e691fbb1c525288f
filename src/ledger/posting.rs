//! Posting templates: business events to balanced journal entries

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::{LedgerConfig, SystemAccount};
use crate::ledger::costing::{CostingEngine, StockBook, StockUnit};
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::{validate_non_negative_amount, validate_positive_amount};

/// Decimal places kept on journal line amounts
pub const MONEY_SCALE: i64 = 2;

fn money(amount: &BigDecimal) -> BigDecimal {
    amount.round(MONEY_SCALE)
}

/// One sold line. Items with a warehouse carry stock and are costed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesItem {
    pub product_id: String,
    pub warehouse_id: Option<String>,
    /// Pieces sold; converted to stock units through `unit`
    pub quantity: BigDecimal,
    #[serde(default)]
    pub unit: StockUnit,
    /// Revenue of the line before discount and tax
    pub price: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesInvoice {
    pub reference_no: String,
    pub date: NaiveDate,
    pub customer_id: Option<String>,
    pub items: Vec<SalesItem>,
    /// Extra services billed on top of the items
    pub extra_services: BigDecimal,
    pub discount: BigDecimal,
    pub tax: BigDecimal,
    pub withholding: BigDecimal,
    /// Document total as issued; computed from the parts when absent
    pub final_total: Option<BigDecimal>,
    pub cost_center: Option<String>,
}

impl SalesInvoice {
    pub fn new(reference_no: &str, date: NaiveDate, customer_id: Option<&str>) -> Self {
        let zero = BigDecimal::from(0);
        Self {
            reference_no: reference_no.to_string(),
            date,
            customer_id: customer_id.map(str::to_string),
            items: Vec::new(),
            extra_services: zero.clone(),
            discount: zero.clone(),
            tax: zero.clone(),
            withholding: zero,
            final_total: None,
            cost_center: None,
        }
    }

    pub fn subtotal(&self) -> BigDecimal {
        self.items.iter().map(|item| &item.price).sum()
    }

    /// `subtotal + extra − discount + tax − withholding`
    pub fn computed_total(&self) -> BigDecimal {
        self.subtotal() + &self.extra_services - &self.discount + &self.tax - &self.withholding
    }
}

/// Product line billed on a purchase invoice; receipts against the invoice
/// may not exceed it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseItem {
    pub product_id: String,
    pub quantity: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseInvoice {
    pub reference_no: String,
    pub date: NaiveDate,
    /// Shown on the supplier line; postings always go to general suppliers
    pub supplier_id: Option<String>,
    #[serde(default)]
    pub items: Vec<PurchaseItem>,
    pub subtotal: BigDecimal,
    pub extra_costs: BigDecimal,
    pub tax: BigDecimal,
    pub withholding: BigDecimal,
    pub discount: BigDecimal,
    pub final_total: Option<BigDecimal>,
    pub cost_center: Option<String>,
}

impl PurchaseInvoice {
    pub fn new(reference_no: &str, date: NaiveDate, subtotal: BigDecimal) -> Self {
        let zero = BigDecimal::from(0);
        Self {
            reference_no: reference_no.to_string(),
            date,
            supplier_id: None,
            items: Vec::new(),
            subtotal,
            extra_costs: zero.clone(),
            tax: zero.clone(),
            withholding: zero.clone(),
            discount: zero,
            final_total: None,
            cost_center: None,
        }
    }

    /// `subtotal + extra + tax − withholding − discount`
    pub fn computed_total(&self) -> BigDecimal {
        &self.subtotal + &self.extra_costs + &self.tax - &self.withholding - &self.discount
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptItem {
    pub product_id: String,
    pub quantity: BigDecimal,
    #[serde(default)]
    pub unit: StockUnit,
    /// Cost of one piece
    pub unit_cost: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueItem {
    pub product_id: String,
    pub quantity: BigDecimal,
    #[serde(default)]
    pub unit: StockUnit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockReceipt {
    pub reference_no: String,
    pub date: NaiveDate,
    pub warehouse_id: String,
    pub items: Vec<ReceiptItem>,
    /// Supplier document the goods arrived with
    pub supplier_document: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockIssue {
    pub reference_no: String,
    pub date: NaiveDate,
    pub warehouse_id: String,
    pub items: Vec<IssueItem>,
    pub cost_center: Option<String>,
    /// Sales invoice the material was consumed for
    #[serde(default)]
    pub job_order: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockTransfer {
    pub reference_no: String,
    pub date: NaiveDate,
    pub from_warehouse: String,
    pub to_warehouse: String,
    pub items: Vec<IssueItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreasuryDirection {
    /// Money coming into the treasury
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreasuryTransaction {
    pub reference_no: String,
    pub date: NaiveDate,
    pub direction: TreasuryDirection,
    /// Defaults to the main treasury
    pub treasury_account: Option<String>,
    /// Counterpart account (customer, supplier, expense...)
    pub target_account: String,
    pub amount: BigDecimal,
    pub description: Option<String>,
    pub cost_center: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayrollLine {
    pub employee_id: String,
    pub gross: BigDecimal,
    pub monthly_loan: BigDecimal,
    pub permanent_loan: BigDecimal,
    pub penalties: BigDecimal,
}

impl PayrollLine {
    pub fn net(&self) -> BigDecimal {
        &self.gross - &self.monthly_loan - &self.permanent_loan - &self.penalties
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayrollRun {
    /// Defaults to `PAY-<month>`
    pub reference_no: Option<String>,
    /// Payroll month, e.g. `2024-05`
    pub month: String,
    pub date: NaiveDate,
    pub lines: Vec<PayrollLine>,
    pub treasury_account: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualEntry {
    pub reference_no: String,
    pub date: NaiveDate,
    pub description: String,
    pub lines: Vec<JournalLine>,
    pub status: EntryStatus,
}

/// Business events the ledger knows how to post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BusinessEvent {
    SalesInvoice(SalesInvoice),
    PurchaseInvoice(PurchaseInvoice),
    StockReceipt(StockReceipt),
    StockIssue(StockIssue),
    StockTransfer(StockTransfer),
    TreasuryTransaction(TreasuryTransaction),
    PayrollRun(PayrollRun),
    Manual(ManualEntry),
}

impl BusinessEvent {
    /// Reference the resulting journal entry is stored under
    pub fn reference_no(&self) -> String {
        match self {
            BusinessEvent::SalesInvoice(e) => e.reference_no.clone(),
            BusinessEvent::PurchaseInvoice(e) => e.reference_no.clone(),
            BusinessEvent::StockReceipt(e) => e.reference_no.clone(),
            BusinessEvent::StockIssue(e) => e.reference_no.clone(),
            BusinessEvent::StockTransfer(e) => e.reference_no.clone(),
            BusinessEvent::TreasuryTransaction(e) => e.reference_no.clone(),
            BusinessEvent::PayrollRun(e) => e
                .reference_no
                .clone()
                .unwrap_or_else(|| format!("PAY-{}", e.month)),
            BusinessEvent::Manual(e) => e.reference_no.clone(),
        }
    }

    pub fn date(&self) -> NaiveDate {
        match self {
            BusinessEvent::SalesInvoice(e) => e.date,
            BusinessEvent::PurchaseInvoice(e) => e.date,
            BusinessEvent::StockReceipt(e) => e.date,
            BusinessEvent::StockIssue(e) => e.date,
            BusinessEvent::StockTransfer(e) => e.date,
            BusinessEvent::TreasuryTransaction(e) => e.date,
            BusinessEvent::PayrollRun(e) => e.date,
            BusinessEvent::Manual(e) => e.date,
        }
    }

    /// System accounts the template may post to
    pub fn required_accounts(&self) -> &'static [SystemAccount] {
        use SystemAccount::*;
        match self {
            BusinessEvent::SalesInvoice(_) => &[
                GeneralCustomers,
                WithholdingReceivable,
                DiscountAllowed,
                DefaultSales,
                OutputVat,
                ServiceRevenue,
                DefaultCogs,
                DefaultInventory,
                Rounding,
            ],
            BusinessEvent::PurchaseInvoice(_) => &[
                PurchaseClearing,
                PurchaseExpenses,
                InputVat,
                GeneralSuppliers,
                WithholdingPayable,
                DiscountEarned,
                Rounding,
            ],
            BusinessEvent::StockReceipt(_) => &[DefaultInventory, PurchaseClearing],
            BusinessEvent::StockIssue(_) => &[DefaultCogs, DefaultInventory],
            BusinessEvent::StockTransfer(_) => &[DefaultInventory],
            BusinessEvent::TreasuryTransaction(_) => &[MainTreasury],
            BusinessEvent::PayrollRun(_) => &[
                Salaries,
                EmployeeMonthlyLoans,
                EmployeePermanentLoans,
                EmployeePenalties,
                MainTreasury,
                Rounding,
            ],
            BusinessEvent::Manual(_) => &[],
        }
    }

    /// Stock positions the event reads or writes
    pub fn stock_keys(&self) -> Vec<StockKey> {
        match self {
            BusinessEvent::SalesInvoice(e) => e
                .items
                .iter()
                .filter_map(|item| {
                    item.warehouse_id
                        .as_ref()
                        .map(|wh| StockKey::new(item.product_id.clone(), wh.clone()))
                })
                .collect(),
            BusinessEvent::StockReceipt(e) => e
                .items
                .iter()
                .map(|item| StockKey::new(item.product_id.clone(), e.warehouse_id.clone()))
                .collect(),
            BusinessEvent::StockIssue(e) => e
                .items
                .iter()
                .map(|item| StockKey::new(item.product_id.clone(), e.warehouse_id.clone()))
                .collect(),
            BusinessEvent::StockTransfer(e) => e
                .items
                .iter()
                .flat_map(|item| {
                    [
                        StockKey::new(item.product_id.clone(), e.from_warehouse.clone()),
                        StockKey::new(item.product_id.clone(), e.to_warehouse.clone()),
                    ]
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Kind recorded on the resulting entry
    pub fn source(&self) -> EntrySource {
        match self {
            BusinessEvent::SalesInvoice(_) => EntrySource::SalesInvoice,
            BusinessEvent::PurchaseInvoice(_) => EntrySource::PurchaseInvoice,
            BusinessEvent::StockReceipt(_) => EntrySource::StockReceipt,
            BusinessEvent::StockIssue(_) => EntrySource::StockIssue,
            BusinessEvent::StockTransfer(_) => EntrySource::StockTransfer,
            BusinessEvent::TreasuryTransaction(_) => EntrySource::Treasury,
            BusinessEvent::PayrollRun(_) => EntrySource::Payroll,
            BusinessEvent::Manual(_) => EntrySource::Manual,
        }
    }

    pub fn is_manual(&self) -> bool {
        matches!(self, BusinessEvent::Manual(_))
    }
}

/// Entry built from an event, with the system accounts it fell back to
#[derive(Debug, Clone)]
pub struct PostingOutcome {
    pub entry: JournalEntry,
    pub system_accounts: BTreeSet<SystemAccount>,
    /// Difference absorbed by the rounding line, `Σdebit − Σcredit` before it
    pub rounding: Option<BigDecimal>,
}

struct EntryDraft<'a> {
    config: &'a LedgerConfig,
    entry: JournalEntry,
    system_accounts: BTreeSet<SystemAccount>,
    cost_center: Option<String>,
}

impl<'a> EntryDraft<'a> {
    fn new(config: &'a LedgerConfig, reference_no: String, date: NaiveDate, description: String) -> Self {
        Self {
            config,
            entry: JournalEntry::new(reference_no, date, description),
            system_accounts: BTreeSet::new(),
            cost_center: None,
        }
    }

    fn system(&mut self, account: SystemAccount) -> String {
        self.system_accounts.insert(account);
        self.config.account_code(account)
    }

    fn linked_or(&mut self, linked: Option<String>, fallback: SystemAccount) -> String {
        match linked {
            Some(code) => code,
            None => self.system(fallback),
        }
    }

    fn debit(&mut self, code: String, amount: &BigDecimal, description: Option<String>) {
        let amount = money(amount);
        if amount != BigDecimal::from(0) {
            self.entry.add_line(
                JournalLine::debit(code, amount, description).with_cost_center(self.cost_center.clone()),
            );
        }
    }

    fn credit(&mut self, code: String, amount: &BigDecimal, description: Option<String>) {
        let amount = money(amount);
        if amount != BigDecimal::from(0) {
            self.entry.add_line(
                JournalLine::credit(code, amount, description).with_cost_center(self.cost_center.clone()),
            );
        }
    }

    fn debit_system(&mut self, account: SystemAccount, amount: &BigDecimal, description: &str) {
        if money(amount) != BigDecimal::from(0) {
            let code = self.system(account);
            self.debit(code, amount, Some(description.to_string()));
        }
    }

    fn credit_system(&mut self, account: SystemAccount, amount: &BigDecimal, description: &str) {
        if money(amount) != BigDecimal::from(0) {
            let code = self.system(account);
            self.credit(code, amount, Some(description.to_string()));
        }
    }
}

/// Append a rounding line for any residual `Σdebit − Σcredit`.
///
/// Every non-zero difference gets a line, including ones at or below
/// `tolerance`, so an imbalanced entry is never stored. The tolerance only
/// decides how loudly the difference is logged: above it is a warning,
/// at or below it a debug record.
///
/// Returns the absorbed difference, or `None` if the entry already
/// balanced.
pub fn apply_rounding(
    entry: &mut JournalEntry,
    rounding_account: &str,
    tolerance: &BigDecimal,
) -> Option<BigDecimal> {
    let difference = entry.imbalance();
    let zero = BigDecimal::from(0);
    if difference == zero {
        return None;
    }

    if difference.abs() > *tolerance {
        tracing::warn!(
            reference = %entry.reference_no,
            difference = %difference,
            "rounding difference above tolerance"
        );
    } else {
        tracing::debug!(reference = %entry.reference_no, difference = %difference, "rounding line added");
    }

    let mut line = if difference > zero {
        JournalLine::credit(rounding_account, difference.clone(), Some("Rounding difference".to_string()))
    } else {
        JournalLine::debit(rounding_account, difference.abs(), Some("Rounding difference".to_string()))
    };
    line.kind = LineKind::Rounding;
    entry.add_line(line);
    Some(difference)
}

fn add_quantity(quantities: &mut BTreeMap<String, BigDecimal>, product_id: &str, quantity: &BigDecimal) {
    *quantities
        .entry(product_id.to_string())
        .or_insert_with(|| BigDecimal::from(0)) += quantity;
}

/// Builds journal entries from business events
pub struct PostingEngine<'a> {
    config: &'a LedgerConfig,
    costing: &'a CostingEngine,
    reference_data: &'a dyn ReferenceData,
}

impl<'a> PostingEngine<'a> {
    pub fn new(
        config: &'a LedgerConfig,
        costing: &'a CostingEngine,
        reference_data: &'a dyn ReferenceData,
    ) -> Self {
        Self {
            config,
            costing,
            reference_data,
        }
    }

    /// Build the entry for an event, costing its stock movements in `book`.
    ///
    /// Nothing is persisted here; on error the caller drops the book.
    pub fn build(&self, event: &BusinessEvent, book: &mut StockBook) -> LedgerResult<PostingOutcome> {
        let mut draft = match event {
            BusinessEvent::SalesInvoice(invoice) => self.sales_invoice(invoice, book)?,
            BusinessEvent::PurchaseInvoice(invoice) => self.purchase_invoice(invoice)?,
            BusinessEvent::StockReceipt(receipt) => self.stock_receipt(receipt, book)?,
            BusinessEvent::StockIssue(issue) => self.stock_issue(issue, book)?,
            BusinessEvent::StockTransfer(transfer) => self.stock_transfer(transfer, book)?,
            BusinessEvent::TreasuryTransaction(transaction) => self.treasury(transaction)?,
            BusinessEvent::PayrollRun(run) => self.payroll(run)?,
            BusinessEvent::Manual(manual) => {
                let mut entry =
                    JournalEntry::new(manual.reference_no.clone(), manual.date, manual.description.clone());
                entry.status = manual.status;
                entry.lines = manual.lines.clone();
                return Ok(PostingOutcome {
                    entry,
                    system_accounts: BTreeSet::new(),
                    rounding: None,
                });
            }
        };
        draft.entry.source = event.source();

        let rounding = if draft.entry.is_balanced() {
            None
        } else {
            let code = draft.system(SystemAccount::Rounding);
            apply_rounding(&mut draft.entry, &code, &self.config.rounding_tolerance)
        };

        Ok(PostingOutcome {
            entry: draft.entry,
            system_accounts: draft.system_accounts,
            rounding,
        })
    }

    fn sales_invoice(&self, invoice: &SalesInvoice, book: &mut StockBook) -> LedgerResult<EntryDraft<'a>> {
        for amount in [&invoice.extra_services, &invoice.discount, &invoice.tax, &invoice.withholding] {
            validate_non_negative_amount(amount, "Invoice amount")?;
        }

        let mut draft = EntryDraft::new(
            self.config,
            invoice.reference_no.clone(),
            invoice.date,
            format!("Sales invoice {}", invoice.reference_no),
        );
        draft.cost_center = invoice.cost_center.clone();
        draft.entry.party_id = invoice.customer_id.clone();

        let linked_customer = invoice
            .customer_id
            .as_deref()
            .and_then(|id| self.reference_data.customer_account(id));
        let customer = draft.linked_or(linked_customer, SystemAccount::GeneralCustomers);

        let mut revenue: Vec<(String, BigDecimal)> = Vec::new();
        let mut cost_lines: Vec<(String, String, BigDecimal, String)> = Vec::new();
        for item in &invoice.items {
            validate_non_negative_amount(&item.price, "Item price")?;
            let accounts = self.reference_data.product_accounts(&item.product_id);
            let sales_account = draft.linked_or(accounts.sales_account, SystemAccount::DefaultSales);
            match revenue.iter_mut().find(|(code, _)| *code == sales_account) {
                Some((_, total)) => *total += &item.price,
                None => revenue.push((sales_account, item.price.clone())),
            }

            if let Some(warehouse_id) = &item.warehouse_id {
                let key = StockKey::new(item.product_id.clone(), warehouse_id.clone());
                let movement = self
                    .costing
                    .issue(book, &key, &item.unit.quantity_for(&item.quantity))?;
                let cogs = draft.linked_or(accounts.cogs_account, SystemAccount::DefaultCogs);
                let inventory = draft.linked_or(
                    self.reference_data.warehouse_account(warehouse_id),
                    SystemAccount::DefaultInventory,
                );
                cost_lines.push((cogs, inventory, movement.valuation.clone(), item.product_id.clone()));
                draft.entry.stock_movements.push(movement);
            }
        }

        let total = invoice
            .final_total
            .clone()
            .unwrap_or_else(|| invoice.computed_total());
        draft.debit(customer, &total, Some(format!("Invoice {}", invoice.reference_no)));
        draft.debit_system(SystemAccount::WithholdingReceivable, &invoice.withholding, "Withholding tax");
        draft.debit_system(SystemAccount::DiscountAllowed, &invoice.discount, "Discount allowed");
        for (code, amount) in revenue {
            draft.credit(code, &amount, Some(format!("Sales {}", invoice.reference_no)));
        }
        draft.credit_system(SystemAccount::OutputVat, &invoice.tax, "Output VAT");
        draft.credit_system(SystemAccount::ServiceRevenue, &invoice.extra_services, "Extra services");

        for (cogs, inventory, amount, product_id) in cost_lines {
            draft.debit(cogs, &amount, Some(format!("Cost of {product_id}")));
            draft.credit(inventory, &amount, Some(format!("Issued {product_id}")));
        }

        Ok(draft)
    }

    fn purchase_invoice(&self, invoice: &PurchaseInvoice) -> LedgerResult<EntryDraft<'a>> {
        validate_non_negative_amount(&invoice.subtotal, "Purchase subtotal")?;
        for amount in [&invoice.extra_costs, &invoice.tax, &invoice.withholding, &invoice.discount] {
            validate_non_negative_amount(amount, "Invoice amount")?;
        }

        let mut draft = EntryDraft::new(
            self.config,
            invoice.reference_no.clone(),
            invoice.date,
            format!("Purchase invoice {}", invoice.reference_no),
        );
        draft.cost_center = invoice.cost_center.clone();
        draft.entry.party_id = invoice.supplier_id.clone();
        for item in &invoice.items {
            validate_positive_amount(&item.quantity, "Purchased quantity")?;
            add_quantity(&mut draft.entry.item_quantities, &item.product_id, &item.quantity);
        }

        let total = invoice
            .final_total
            .clone()
            .unwrap_or_else(|| invoice.computed_total());
        let supplier_label = match &invoice.supplier_id {
            Some(id) => format!("Invoice {} ({id})", invoice.reference_no),
            None => format!("Invoice {}", invoice.reference_no),
        };

        draft.debit_system(SystemAccount::PurchaseClearing, &invoice.subtotal, "Goods received clearing");
        draft.debit_system(SystemAccount::PurchaseExpenses, &invoice.extra_costs, "Extra purchase costs");
        draft.debit_system(SystemAccount::InputVat, &invoice.tax, "Input VAT");
        draft.credit_system(SystemAccount::GeneralSuppliers, &total, &supplier_label);
        draft.credit_system(SystemAccount::WithholdingPayable, &invoice.withholding, "Withholding tax");
        draft.credit_system(SystemAccount::DiscountEarned, &invoice.discount, "Trade discount");

        Ok(draft)
    }

    fn stock_receipt(&self, receipt: &StockReceipt, book: &mut StockBook) -> LedgerResult<EntryDraft<'a>> {
        let mut draft = EntryDraft::new(
            self.config,
            receipt.reference_no.clone(),
            receipt.date,
            format!("Stock receipt into {}", receipt.warehouse_id),
        );
        let inventory = draft.linked_or(
            self.reference_data.warehouse_account(&receipt.warehouse_id),
            SystemAccount::DefaultInventory,
        );
        let document = receipt.supplier_document.as_deref().unwrap_or("-");
        draft.entry.document_ref = receipt.supplier_document.clone();

        for item in &receipt.items {
            let key = StockKey::new(item.product_id.clone(), receipt.warehouse_id.clone());
            let movement = self.costing.receive(
                book,
                &key,
                &item.unit.quantity_for(&item.quantity),
                &item.unit.unit_cost_for(&item.unit_cost)?,
            )?;
            let valuation = movement.valuation.clone();
            draft.entry.stock_movements.push(movement);
            add_quantity(&mut draft.entry.item_quantities, &item.product_id, &item.quantity);

            draft.debit(inventory.clone(), &valuation, Some(format!("Received {}", item.product_id)));
            draft.credit_system(
                SystemAccount::PurchaseClearing,
                &valuation,
                &format!("Received {} ({document})", item.product_id),
            );
        }

        Ok(draft)
    }

    fn stock_issue(&self, issue: &StockIssue, book: &mut StockBook) -> LedgerResult<EntryDraft<'a>> {
        let mut draft = EntryDraft::new(
            self.config,
            issue.reference_no.clone(),
            issue.date,
            format!("Stock issue from {}", issue.warehouse_id),
        );
        draft.cost_center = issue.cost_center.clone();
        draft.entry.document_ref = issue.job_order.clone();
        let inventory = draft.linked_or(
            self.reference_data.warehouse_account(&issue.warehouse_id),
            SystemAccount::DefaultInventory,
        );

        for item in &issue.items {
            let key = StockKey::new(item.product_id.clone(), issue.warehouse_id.clone());
            let movement = self
                .costing
                .issue(book, &key, &item.unit.quantity_for(&item.quantity))?;
            let valuation = movement.valuation.clone();
            draft.entry.stock_movements.push(movement);

            let cogs = draft.linked_or(
                self.reference_data.product_accounts(&item.product_id).cogs_account,
                SystemAccount::DefaultCogs,
            );
            draft.debit(cogs, &valuation, Some(format!("Consumed {}", item.product_id)));
            draft.credit(inventory.clone(), &valuation, Some(format!("Issued {}", item.product_id)));
        }

        Ok(draft)
    }

    fn stock_transfer(&self, transfer: &StockTransfer, book: &mut StockBook) -> LedgerResult<EntryDraft<'a>> {
        let mut draft = EntryDraft::new(
            self.config,
            transfer.reference_no.clone(),
            transfer.date,
            format!(
                "Stock transfer {} -> {}",
                transfer.from_warehouse, transfer.to_warehouse
            ),
        );
        let source = draft.linked_or(
            self.reference_data.warehouse_account(&transfer.from_warehouse),
            SystemAccount::DefaultInventory,
        );
        let destination = draft.linked_or(
            self.reference_data.warehouse_account(&transfer.to_warehouse),
            SystemAccount::DefaultInventory,
        );

        for item in &transfer.items {
            let (issued, received) = self.costing.transfer(
                book,
                &item.product_id,
                &transfer.from_warehouse,
                &transfer.to_warehouse,
                &item.unit.quantity_for(&item.quantity),
            )?;
            let valuation = issued.valuation.clone();
            draft.entry.stock_movements.push(issued);
            draft.entry.stock_movements.push(received);

            draft.debit(destination.clone(), &valuation, Some(format!("Transfer in {}", item.product_id)));
            draft.credit(source.clone(), &valuation, Some(format!("Transfer out {}", item.product_id)));
        }

        Ok(draft)
    }

    fn treasury(&self, transaction: &TreasuryTransaction) -> LedgerResult<EntryDraft<'a>> {
        validate_positive_amount(&transaction.amount, "Treasury amount")?;

        let description = transaction
            .description
            .clone()
            .unwrap_or_else(|| format!("Treasury {:?}", transaction.direction));
        let mut draft = EntryDraft::new(
            self.config,
            transaction.reference_no.clone(),
            transaction.date,
            description.clone(),
        );
        draft.cost_center = transaction.cost_center.clone();
        let treasury = draft.linked_or(transaction.treasury_account.clone(), SystemAccount::MainTreasury);
        let target = transaction.target_account.clone();

        match transaction.direction {
            TreasuryDirection::Inbound => {
                draft.debit(treasury, &transaction.amount, Some(description.clone()));
                draft.credit(target, &transaction.amount, Some(description));
            }
            TreasuryDirection::Outbound => {
                draft.debit(target, &transaction.amount, Some(description.clone()));
                draft.credit(treasury, &transaction.amount, Some(description));
            }
        }

        Ok(draft)
    }

    fn payroll(&self, run: &PayrollRun) -> LedgerResult<EntryDraft<'a>> {
        let zero = BigDecimal::from(0);
        let mut gross = zero.clone();
        let mut monthly = zero.clone();
        let mut permanent = zero.clone();
        let mut penalties = zero.clone();
        let mut net = zero;
        for line in &run.lines {
            for amount in [&line.gross, &line.monthly_loan, &line.permanent_loan, &line.penalties] {
                validate_non_negative_amount(amount, "Payroll amount")?;
            }
            if line.net() < BigDecimal::from(0) {
                return Err(LedgerError::Validation(format!(
                    "Deductions of employee '{}' exceed the gross salary",
                    line.employee_id
                )));
            }
            gross += &line.gross;
            monthly += &line.monthly_loan;
            permanent += &line.permanent_loan;
            penalties += &line.penalties;
            net += line.net();
        }

        let reference = run
            .reference_no
            .clone()
            .unwrap_or_else(|| format!("PAY-{}", run.month));
        let mut draft = EntryDraft::new(self.config, reference, run.date, format!("Payroll {}", run.month));

        draft.debit_system(SystemAccount::Salaries, &gross, "Gross salaries");
        draft.credit_system(SystemAccount::EmployeeMonthlyLoans, &monthly, "Monthly advances recovered");
        draft.credit_system(SystemAccount::EmployeePermanentLoans, &permanent, "Loan instalments recovered");
        draft.credit_system(SystemAccount::EmployeePenalties, &penalties, "Penalties");
        if money(&net) != BigDecimal::from(0) {
            let treasury = draft.linked_or(run.treasury_account.clone(), SystemAccount::MainTreasury);
            draft.credit(treasury, &net, Some("Net salaries paid".to_string()));
        }

        Ok(draft)
    }
}
