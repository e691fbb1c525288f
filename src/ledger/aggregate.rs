//! Balance aggregation: statements, trial balance and financial reports.
//!
//! Every figure is recomputed from posted journal entries. Balances are
//! raw (debit-positive) unless a field says it is presented, in which case
//! the sign follows the account's nature.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::config::LedgerConfig;
use crate::ledger::costing;
use crate::traits::*;
use crate::types::*;

fn zero() -> BigDecimal {
    BigDecimal::from(0)
}

/// One line of an account statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRow {
    pub date: NaiveDate,
    pub reference_no: String,
    pub entry_description: String,
    pub line_description: Option<String>,
    pub debit: BigDecimal,
    pub credit: BigDecimal,
    /// Running raw balance after this row
    pub balance: BigDecimal,
    /// Other accounts on the same entry
    pub counterparties: Vec<String>,
    pub cost_center: Option<String>,
}

/// General-ledger view of one account over a period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountStatement {
    pub account_code: String,
    pub account_name: String,
    pub nature: Nature,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub opening_balance: BigDecimal,
    pub rows: Vec<LedgerRow>,
    pub period_debit: BigDecimal,
    pub period_credit: BigDecimal,
    pub closing_balance: BigDecimal,
}

impl AccountStatement {
    /// `period_debit − period_credit`
    pub fn delta_over_period(&self) -> BigDecimal {
        &self.period_debit - &self.period_credit
    }

    pub fn presented_closing(&self) -> BigDecimal {
        self.nature.present(&self.closing_balance)
    }
}

/// Which nodes of the computed tree a trial balance lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialBalanceLevel {
    /// Transactional accounts with any opening or period activity
    Leaves,
    /// Non-transactional (group) accounts
    Groups,
    /// Accounts without a parent
    Roots,
}

/// One account in the trial balance tree, with its subtree rolled up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialBalanceNode {
    pub code: String,
    pub name: String,
    pub account_type: Option<AccountType>,
    pub parent_code: Option<String>,
    pub is_transactional: bool,
    pub depth: usize,
    pub opening: BigDecimal,
    pub period_debit: BigDecimal,
    pub period_credit: BigDecimal,
    pub closing: BigDecimal,
}

impl TrialBalanceNode {
    fn empty(code: &str) -> Self {
        Self {
            code: code.to_string(),
            name: code.to_string(),
            account_type: None,
            parent_code: None,
            is_transactional: true,
            depth: 0,
            opening: zero(),
            period_debit: zero(),
            period_credit: zero(),
            closing: zero(),
        }
    }

    fn has_activity(&self) -> bool {
        self.opening != zero() || self.period_debit != zero() || self.period_credit != zero()
    }

    fn absorb(&mut self, child: &TrialBalanceNode) {
        self.opening += &child.opening;
        self.period_debit += &child.period_debit;
        self.period_credit += &child.period_credit;
        self.closing += &child.closing;
    }

    /// Closing balance when it sits on the debit side
    pub fn closing_debit(&self) -> BigDecimal {
        if self.closing > zero() {
            self.closing.clone()
        } else {
            zero()
        }
    }

    /// Closing balance when it sits on the credit side
    pub fn closing_credit(&self) -> BigDecimal {
        if self.closing < zero() {
            self.closing.abs()
        } else {
            zero()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialBalance {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub level: TrialBalanceLevel,
    pub rows: Vec<TrialBalanceNode>,
    /// Totals over root nodes, whatever the level
    pub total_opening: BigDecimal,
    pub total_period_debit: BigDecimal,
    pub total_period_credit: BigDecimal,
    pub total_closing: BigDecimal,
    pub is_balanced: bool,
}

/// Presented balance of one account in a financial statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub balance: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSheet {
    pub as_of_date: NaiveDate,
    pub assets: Vec<AccountBalance>,
    pub liabilities: Vec<AccountBalance>,
    pub equity: Vec<AccountBalance>,
    pub total_assets: BigDecimal,
    pub total_liabilities: BigDecimal,
    /// Equity accounts plus the undistributed result to date
    pub total_equity: BigDecimal,
    pub net_income: BigDecimal,
    pub is_balanced: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomeStatement {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub revenue: Vec<AccountBalance>,
    pub expenses: Vec<AccountBalance>,
    pub total_revenue: BigDecimal,
    pub total_expenses: BigDecimal,
    pub net_income: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostCenterTotal {
    pub cost_center: String,
    pub debit: BigDecimal,
    pub credit: BigDecimal,
}

/// Headline figures for the back-office dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub from: NaiveDate,
    pub to: NaiveDate,
    /// Net revenue recognised in the period
    pub period_sales: BigDecimal,
    pub cash: BigDecimal,
    pub receivables: BigDecimal,
    pub payables: BigDecimal,
    pub stock_value: BigDecimal,
}

/// Material issued for a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMaterial {
    /// Entry that moved the stock: the invoice itself or a linked issue
    pub reference_no: String,
    pub date: NaiveDate,
    pub product_id: String,
    pub quantity: BigDecimal,
    pub cost: BigDecimal,
}

/// Revenue of one sales invoice against the material consumed for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProfitability {
    pub invoice_reference: String,
    pub date: NaiveDate,
    pub customer_id: Option<String>,
    /// Net credit to revenue accounts on the invoice
    pub revenue: BigDecimal,
    pub material_cost: BigDecimal,
    pub profit: BigDecimal,
    /// `profit / revenue * 100`; `None` without revenue
    pub margin_percent: Option<BigDecimal>,
    pub materials: Vec<JobMaterial>,
}

/// Sales totals of one customer over a period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerSales {
    /// `None` collects walk-in sales
    pub customer_id: Option<String>,
    pub invoices: usize,
    pub revenue: BigDecimal,
    pub cost: BigDecimal,
    pub profit: BigDecimal,
}

/// Read-side aggregation over the journal
pub struct BalanceAggregator<S: LedgerStorage> {
    storage: S,
    config: LedgerConfig,
}

impl<S: LedgerStorage> BalanceAggregator<S> {
    pub fn new(storage: S, config: LedgerConfig) -> Self {
        Self { storage, config }
    }

    async fn posted_entries(
        &self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> LedgerResult<Vec<JournalEntry>> {
        let mut entries = self.storage.get_entries(start_date, end_date).await?;
        entries.retain(JournalEntry::is_posted);
        Ok(entries)
    }

    /// Raw balance of one account over posted entries up to `as_of`
    pub async fn account_balance(&self, code: &str, as_of: Option<NaiveDate>) -> LedgerResult<BigDecimal> {
        if self.storage.get_account(code).await?.is_none() {
            return Err(LedgerError::AccountNotFound(code.to_string()));
        }
        let entries = self.storage.get_account_entries(code, None, as_of).await?;
        Ok(entries
            .iter()
            .filter(|e| e.is_posted())
            .flat_map(|e| e.lines_for(code))
            .map(JournalLine::net)
            .sum())
    }

    /// Balance signed by the account's nature (credit accounts positive
    /// when in credit)
    pub async fn presented_balance(&self, code: &str, as_of: Option<NaiveDate>) -> LedgerResult<BigDecimal> {
        let account = self
            .storage
            .get_account(code)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(code.to_string()))?;
        let raw = self.account_balance(code, as_of).await?;
        Ok(account.nature.present(&raw))
    }

    /// Opening balance, rows with a running balance, and closing balance of
    /// one account. Both bounds are inclusive.
    pub async fn statement(
        &self,
        code: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> LedgerResult<AccountStatement> {
        let account = self
            .storage
            .get_account(code)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(code.to_string()))?;

        let entries = self.storage.get_account_entries(code, None, to).await?;

        let mut opening = zero();
        let mut period_debit = zero();
        let mut period_credit = zero();
        let mut rows = Vec::new();
        let mut running = zero();

        for entry in entries.iter().filter(|e| e.is_posted()) {
            let in_period = from.is_none_or(|from| entry.entry_date >= from);
            if !in_period {
                for line in entry.lines_for(code) {
                    opening += line.net();
                }
                running = opening.clone();
                continue;
            }

            let mut counterparties: Vec<String> = entry
                .lines
                .iter()
                .filter(|l| l.account_code != code)
                .map(|l| l.account_code.clone())
                .collect();
            counterparties.sort();
            counterparties.dedup();

            for line in entry.lines_for(code) {
                running += line.net();
                period_debit += &line.debit;
                period_credit += &line.credit;
                rows.push(LedgerRow {
                    date: entry.entry_date,
                    reference_no: entry.reference_no.clone(),
                    entry_description: entry.description.clone(),
                    line_description: line.description.clone(),
                    debit: line.debit.clone(),
                    credit: line.credit.clone(),
                    balance: running.clone(),
                    counterparties: counterparties.clone(),
                    cost_center: line.cost_center.clone(),
                });
            }
        }

        let closing_balance = &opening + &period_debit - &period_credit;
        Ok(AccountStatement {
            account_code: account.code,
            account_name: account.name,
            nature: account.nature,
            from,
            to,
            opening_balance: opening,
            rows,
            period_debit,
            period_credit,
            closing_balance,
        })
    }

    /// Compute every node of the chart for the period, then roll leaves up
    /// along explicit parent links.
    async fn trial_balance_tree(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> LedgerResult<BTreeMap<String, TrialBalanceNode>> {
        let accounts = self.storage.list_accounts(None).await?;
        let entries = self.posted_entries(None, to).await?;

        let mut nodes: BTreeMap<String, TrialBalanceNode> = accounts
            .into_iter()
            .map(|account| {
                let node = TrialBalanceNode {
                    code: account.code.clone(),
                    name: account.name,
                    account_type: Some(account.account_type),
                    parent_code: account.parent_code,
                    is_transactional: account.is_transactional,
                    depth: 0,
                    opening: zero(),
                    period_debit: zero(),
                    period_credit: zero(),
                    closing: zero(),
                };
                (account.code, node)
            })
            .collect();

        for entry in &entries {
            let in_period = from.is_none_or(|from| entry.entry_date >= from);
            for line in &entry.lines {
                let node = nodes.entry(line.account_code.clone()).or_insert_with(|| {
                    tracing::warn!(code = %line.account_code, "journal line on unknown account");
                    TrialBalanceNode::empty(&line.account_code)
                });
                if in_period {
                    node.period_debit += &line.debit;
                    node.period_credit += &line.credit;
                } else {
                    node.opening += line.net();
                }
            }
        }
        for node in nodes.values_mut() {
            node.closing = &node.opening + &node.period_debit - &node.period_credit;
        }

        // Parents that do not exist are treated as absent
        let known: HashSet<String> = nodes.keys().cloned().collect();
        for node in nodes.values_mut() {
            if node.parent_code.as_ref().is_some_and(|p| !known.contains(p)) {
                node.parent_code = None;
            }
        }

        let parents: HashMap<String, Option<String>> = nodes
            .iter()
            .map(|(code, node)| (code.clone(), node.parent_code.clone()))
            .collect();
        let mut depths: HashMap<String, usize> = HashMap::new();
        for code in parents.keys() {
            let depth = depth_of(code, &parents, &mut depths)?;
            depths.insert(code.clone(), depth);
        }

        // Deepest first, so each child is complete before it is absorbed
        let mut order: Vec<(usize, String)> = depths.iter().map(|(c, d)| (*d, c.clone())).collect();
        order.sort_by(|a, b| b.cmp(a));
        for (depth, code) in order {
            let Some(node) = nodes.get_mut(&code) else {
                continue;
            };
            node.depth = depth;
            let Some(parent) = node.parent_code.clone() else {
                continue;
            };
            let child = node.clone();
            if let Some(parent_node) = nodes.get_mut(&parent) {
                parent_node.absorb(&child);
            }
        }

        Ok(nodes)
    }

    /// Trial balance at the requested level. Totals are taken over roots,
    /// so they cover the whole chart at every level.
    pub async fn trial_balance(
        &self,
        level: TrialBalanceLevel,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> LedgerResult<TrialBalance> {
        let nodes = self.trial_balance_tree(from, to).await?;

        let mut total_opening = zero();
        let mut total_period_debit = zero();
        let mut total_period_credit = zero();
        let mut total_closing = zero();
        for root in nodes.values().filter(|n| n.parent_code.is_none()) {
            total_opening += &root.opening;
            total_period_debit += &root.period_debit;
            total_period_credit += &root.period_credit;
            total_closing += &root.closing;
        }

        let rows: Vec<TrialBalanceNode> = nodes
            .into_values()
            .filter(|node| match level {
                TrialBalanceLevel::Leaves => node.is_transactional && node.has_activity(),
                TrialBalanceLevel::Groups => !node.is_transactional,
                TrialBalanceLevel::Roots => node.parent_code.is_none(),
            })
            .collect();

        let is_balanced = total_period_debit == total_period_credit
            && total_opening == zero()
            && total_closing == zero();

        Ok(TrialBalance {
            from,
            to,
            level,
            rows,
            total_opening,
            total_period_debit,
            total_period_credit,
            total_closing,
            is_balanced,
        })
    }

    /// Raw balance of an account and all its descendants
    pub async fn subtree_balance(&self, code: &str, as_of: Option<NaiveDate>) -> LedgerResult<BigDecimal> {
        let nodes = self.trial_balance_tree(None, as_of).await?;
        nodes
            .get(code)
            .map(|node| node.closing.clone())
            .ok_or_else(|| LedgerError::AccountNotFound(code.to_string()))
    }

    /// Headline figures: period sales, cash, receivables, payables and stock
    pub async fn dashboard(&self, from: NaiveDate, to: NaiveDate) -> LedgerResult<DashboardSummary> {
        let closing = self.trial_balance_tree(None, Some(to)).await?;
        let period = self.trial_balance_tree(Some(from), Some(to)).await?;

        let sum_groups = |codes: &[String]| -> BigDecimal {
            codes
                .iter()
                .filter_map(|code| closing.get(code))
                .map(|node| node.closing.clone())
                .sum()
        };
        let groups = &self.config.dashboard;
        let cash = sum_groups(&groups.cash);
        let receivables = sum_groups(&groups.receivables);
        let payables = Nature::Credit.present(&sum_groups(&groups.payables));

        let period_sales: BigDecimal = period
            .values()
            .filter(|n| n.parent_code.is_none() && n.account_type == Some(AccountType::Revenue))
            .map(|n| &n.period_credit - &n.period_debit)
            .sum();

        Ok(DashboardSummary {
            from,
            to,
            period_sales,
            cash,
            receivables,
            payables,
            stock_value: self.stock_value().await?,
        })
    }

    async fn leaf_balances(
        &self,
        account_type: AccountType,
        from: Option<NaiveDate>,
        to: NaiveDate,
    ) -> LedgerResult<(Vec<AccountBalance>, BigDecimal)> {
        let accounts = self.storage.list_accounts(Some(account_type)).await?;
        let entries = self.posted_entries(from, Some(to)).await?;

        let mut raw: HashMap<&str, BigDecimal> = HashMap::new();
        for line in entries.iter().flat_map(|e| e.lines.iter()) {
            *raw.entry(line.account_code.as_str()).or_insert_with(zero) += line.net();
        }

        let nature = account_type.default_nature();
        let mut rows = Vec::new();
        let mut total = zero();
        for account in accounts.iter().filter(|a| a.is_transactional) {
            let Some(balance) = raw.get(account.code.as_str()) else {
                continue;
            };
            if *balance == zero() {
                continue;
            }
            let presented = nature.present(balance);
            total += &presented;
            rows.push(AccountBalance {
                code: account.code.clone(),
                name: account.name.clone(),
                account_type,
                balance: presented,
            });
        }
        Ok((rows, total))
    }

    /// Balance sheet as of a date; the result to date is carried in equity
    pub async fn balance_sheet(&self, as_of_date: NaiveDate) -> LedgerResult<BalanceSheet> {
        let (assets, total_assets) = self.leaf_balances(AccountType::Asset, None, as_of_date).await?;
        let (liabilities, total_liabilities) =
            self.leaf_balances(AccountType::Liability, None, as_of_date).await?;
        let (equity, equity_accounts) = self.leaf_balances(AccountType::Equity, None, as_of_date).await?;
        let (_, revenue) = self.leaf_balances(AccountType::Revenue, None, as_of_date).await?;
        let (_, expenses) = self.leaf_balances(AccountType::Expense, None, as_of_date).await?;

        let net_income = revenue - expenses;
        let total_equity = &equity_accounts + &net_income;
        let is_balanced = total_assets == &total_liabilities + &total_equity;

        Ok(BalanceSheet {
            as_of_date,
            assets,
            liabilities,
            equity,
            total_assets,
            total_liabilities,
            total_equity,
            net_income,
            is_balanced,
        })
    }

    /// Revenue and expenses recognised between two dates (inclusive)
    pub async fn income_statement(&self, start_date: NaiveDate, end_date: NaiveDate) -> LedgerResult<IncomeStatement> {
        let (revenue, total_revenue) = self
            .leaf_balances(AccountType::Revenue, Some(start_date), end_date)
            .await?;
        let (expenses, total_expenses) = self
            .leaf_balances(AccountType::Expense, Some(start_date), end_date)
            .await?;
        let net_income = &total_revenue - &total_expenses;

        Ok(IncomeStatement {
            start_date,
            end_date,
            revenue,
            expenses,
            total_revenue,
            total_expenses,
            net_income,
        })
    }

    /// Debit and credit totals per cost center tag
    pub async fn cost_center_totals(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> LedgerResult<Vec<CostCenterTotal>> {
        let entries = self.posted_entries(from, to).await?;
        let mut totals: BTreeMap<String, (BigDecimal, BigDecimal)> = BTreeMap::new();
        for line in entries.iter().flat_map(|e| e.lines.iter()) {
            if let Some(cost_center) = &line.cost_center {
                let (debit, credit) = totals
                    .entry(cost_center.clone())
                    .or_insert_with(|| (zero(), zero()));
                *debit += &line.debit;
                *credit += &line.credit;
            }
        }
        Ok(totals
            .into_iter()
            .map(|(cost_center, (debit, credit))| CostCenterTotal {
                cost_center,
                debit,
                credit,
            })
            .collect())
    }

    /// Revenue, material cost and margin of one sales invoice.
    ///
    /// Material cost is the stock the invoice issued itself plus every stock
    /// issue whose job order names the invoice.
    pub async fn job_profitability(&self, invoice_reference: &str) -> LedgerResult<JobProfitability> {
        let entries = self.posted_entries(None, None).await?;
        let invoice = entries
            .iter()
            .find(|e| e.reference_no == invoice_reference && e.source == EntrySource::SalesInvoice)
            .ok_or_else(|| LedgerError::NotFound(invoice_reference.to_string()))?;
        let account_types = self.account_types().await?;

        let revenue = revenue_of(invoice, &account_types);
        let materials = job_materials(invoice, &entries);
        let material_cost: BigDecimal = materials.iter().map(|m| &m.cost).sum();
        let profit = &revenue - &material_cost;
        let margin_percent = if revenue == zero() {
            None
        } else {
            Some((&profit * BigDecimal::from(100) / &revenue).round(2))
        };

        Ok(JobProfitability {
            invoice_reference: invoice.reference_no.clone(),
            date: invoice.entry_date,
            customer_id: invoice.party_id.clone(),
            revenue,
            material_cost,
            profit,
            margin_percent,
            materials,
        })
    }

    /// Invoice count, revenue and material cost per customer for invoices
    /// dated within the period. Linked stock issues count whatever their date.
    pub async fn sales_by_customer(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> LedgerResult<Vec<CustomerSales>> {
        let entries = self.posted_entries(None, None).await?;
        let account_types = self.account_types().await?;

        let mut totals: BTreeMap<Option<String>, (usize, BigDecimal, BigDecimal)> = BTreeMap::new();
        let invoices = entries.iter().filter(|e| {
            e.source == EntrySource::SalesInvoice
                && from.map_or(true, |from| e.entry_date >= from)
                && to.map_or(true, |to| e.entry_date <= to)
        });
        for invoice in invoices {
            let cost: BigDecimal = job_materials(invoice, &entries).iter().map(|m| &m.cost).sum();
            let (count, revenue, total_cost) = totals
                .entry(invoice.party_id.clone())
                .or_insert_with(|| (0, zero(), zero()));
            *count += 1;
            *revenue += revenue_of(invoice, &account_types);
            *total_cost += cost;
        }

        Ok(totals
            .into_iter()
            .map(|(customer_id, (invoices, revenue, cost))| CustomerSales {
                customer_id,
                invoices,
                profit: &revenue - &cost,
                revenue,
                cost,
            })
            .collect())
    }

    async fn account_types(&self) -> LedgerResult<HashMap<String, AccountType>> {
        Ok(self
            .storage
            .list_accounts(None)
            .await?
            .into_iter()
            .map(|a| (a.code, a.account_type))
            .collect())
    }

    /// Value of all stock on hand at average cost
    pub async fn stock_value(&self) -> LedgerResult<BigDecimal> {
        let positions = self.storage.list_stock_positions().await?;
        Ok(costing::stock_value(&positions))
    }
}

fn revenue_of(entry: &JournalEntry, account_types: &HashMap<String, AccountType>) -> BigDecimal {
    entry
        .lines
        .iter()
        .filter(|l| account_types.get(&l.account_code) == Some(&AccountType::Revenue))
        .map(|l| &l.credit - &l.debit)
        .sum()
}

fn job_materials(invoice: &JournalEntry, entries: &[JournalEntry]) -> Vec<JobMaterial> {
    let linked = entries.iter().filter(|e| {
        e.source == EntrySource::StockIssue
            && e.document_ref
                .as_deref()
                .is_some_and(|job| job.eq_ignore_ascii_case(&invoice.reference_no))
    });
    std::iter::once(invoice)
        .chain(linked)
        .flat_map(|entry| {
            entry
                .stock_movements
                .iter()
                .filter(|m| m.kind == MovementKind::Issue)
                .map(move |m| JobMaterial {
                    reference_no: entry.reference_no.clone(),
                    date: entry.entry_date,
                    product_id: m.key.product_id.clone(),
                    quantity: m.quantity.clone(),
                    cost: m.valuation.clone(),
                })
        })
        .collect()
}

fn depth_of(
    code: &str,
    parents: &HashMap<String, Option<String>>,
    memo: &mut HashMap<String, usize>,
) -> LedgerResult<usize> {
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut current = code.to_string();
    let base = loop {
        if let Some(depth) = memo.get(&current) {
            break *depth;
        }
        if !seen.insert(current.clone()) {
            return Err(LedgerError::Validation(format!(
                "Cycle in account hierarchy at '{current}'"
            )));
        }
        match parents.get(&current).cloned().flatten() {
            Some(parent) => {
                chain.push(current);
                current = parent;
            }
            None => {
                memo.insert(current.clone(), 0);
                break 0;
            }
        }
    };

    let mut depth = base;
    for code in chain.into_iter().rev() {
        depth += 1;
        memo.insert(code, depth);
    }
    Ok(memo.get(code).copied().unwrap_or(base))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::account::{utils::create_standard_chart, AccountDirectory};
    use crate::utils::memory_storage::MemoryStorage;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    async fn seeded() -> MemoryStorage {
        let storage = MemoryStorage::new();
        let mut directory = AccountDirectory::new(storage.clone());
        create_standard_chart(&mut directory).await.unwrap();
        storage
    }

    async fn post(storage: &mut MemoryStorage, reference: &str, day: u32, lines: Vec<JournalLine>) {
        let mut entry = JournalEntry::new(reference.to_string(), date(day), reference.to_string());
        entry.lines = lines;
        storage
            .commit(Changeset {
                new_entries: vec![entry],
                ..Changeset::default()
            })
            .await
            .unwrap();
    }

    fn dec(value: i64) -> BigDecimal {
        BigDecimal::from(value)
    }

    async fn sample() -> MemoryStorage {
        let mut storage = seeded().await;
        post(
            &mut storage,
            "OPEN",
            1,
            vec![
                JournalLine::debit("11010101", dec(1000), None),
                JournalLine::credit("3101", dec(1000), None),
            ],
        )
        .await;
        post(
            &mut storage,
            "SALE",
            10,
            vec![
                JournalLine::debit("110201", dec(300), None),
                JournalLine::credit("4101", dec(300), None).with_cost_center(Some("SHOP".to_string())),
            ],
        )
        .await;
        post(
            &mut storage,
            "RENT",
            20,
            vec![
                JournalLine::debit("5306", dec(120), None).with_cost_center(Some("ADMIN".to_string())),
                JournalLine::credit("11010101", dec(120), None),
            ],
        )
        .await;
        storage
    }

    #[tokio::test]
    async fn statement_carries_opening_and_running_balance() {
        let storage = sample().await;
        let aggregator = BalanceAggregator::new(storage, LedgerConfig::default());

        let statement = aggregator
            .statement("11010101", Some(date(5)), Some(date(31)))
            .await
            .unwrap();

        assert_eq!(statement.opening_balance, dec(1000));
        assert_eq!(statement.rows.len(), 1);
        assert_eq!(statement.rows[0].balance, dec(880));
        assert_eq!(statement.rows[0].counterparties, vec!["5306"]);
        assert_eq!(statement.closing_balance, dec(880));
        assert_eq!(statement.delta_over_period(), dec(-120));
    }

    #[tokio::test]
    async fn trial_balance_rolls_up_to_balanced_roots() {
        let storage = sample().await;
        let aggregator = BalanceAggregator::new(storage, LedgerConfig::default());

        let roots = aggregator
            .trial_balance(TrialBalanceLevel::Roots, Some(date(5)), Some(date(31)))
            .await
            .unwrap();
        assert!(roots.is_balanced);
        assert_eq!(roots.total_period_debit, dec(420));
        let assets = roots.rows.iter().find(|n| n.code == "1").unwrap();
        assert_eq!(assets.opening, dec(1000));
        assert_eq!(assets.closing, dec(1180));

        let groups = aggregator
            .trial_balance(TrialBalanceLevel::Groups, Some(date(5)), Some(date(31)))
            .await
            .unwrap();
        let cash = groups.rows.iter().find(|n| n.code == "1101").unwrap();
        assert_eq!(cash.closing, dec(880));
        assert_eq!(cash.depth, 2);

        let leaves = aggregator
            .trial_balance(TrialBalanceLevel::Leaves, None, None)
            .await
            .unwrap();
        let codes: Vec<&str> = leaves.rows.iter().map(|n| n.code.as_str()).collect();
        assert_eq!(codes, vec!["11010101", "110201", "3101", "4101", "5306"]);
    }

    #[tokio::test]
    async fn drafts_do_not_count() {
        let mut storage = sample().await;
        let mut draft = JournalEntry::new("DRAFT".to_string(), date(15), "pending".to_string());
        draft.status = EntryStatus::Draft;
        draft.add_line(JournalLine::debit("5306", dec(50), None));
        draft.add_line(JournalLine::credit("11010101", dec(50), None));
        storage
            .commit(Changeset {
                new_entries: vec![draft],
                ..Changeset::default()
            })
            .await
            .unwrap();
        let aggregator = BalanceAggregator::new(storage, LedgerConfig::default());

        assert_eq!(aggregator.account_balance("5306", None).await.unwrap(), dec(120));
        let statement = aggregator.statement("5306", None, None).await.unwrap();
        assert_eq!(statement.rows.len(), 1);
    }

    #[tokio::test]
    async fn reports_agree_with_each_other() {
        let storage = sample().await;
        let aggregator = BalanceAggregator::new(storage, LedgerConfig::default());

        let sheet = aggregator.balance_sheet(date(31)).await.unwrap();
        assert!(sheet.is_balanced);
        assert_eq!(sheet.total_assets, dec(1180));
        assert_eq!(sheet.net_income, dec(180));

        let income = aggregator.income_statement(date(1), date(31)).await.unwrap();
        assert_eq!(income.total_revenue, dec(300));
        assert_eq!(income.total_expenses, dec(120));
        assert_eq!(income.net_income, sheet.net_income);

        assert_eq!(
            aggregator.presented_balance("3101", None).await.unwrap(),
            dec(1000)
        );
        assert_eq!(aggregator.subtree_balance("11", None).await.unwrap(), dec(1180));
    }

    #[tokio::test]
    async fn dashboard_and_cost_centers() {
        let storage = sample().await;
        let aggregator = BalanceAggregator::new(storage, LedgerConfig::default());

        let dashboard = aggregator.dashboard(date(1), date(31)).await.unwrap();
        assert_eq!(dashboard.period_sales, dec(300));
        assert_eq!(dashboard.cash, dec(880));
        assert_eq!(dashboard.receivables, dec(300));
        assert_eq!(dashboard.payables, dec(0));
        assert_eq!(dashboard.stock_value, dec(0));

        let totals = aggregator.cost_center_totals(None, None).await.unwrap();
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0].cost_center, "ADMIN");
        assert_eq!(totals[0].debit, dec(120));
        assert_eq!(totals[1].credit, dec(300));
    }

    fn issued(product: &str, quantity: i64, unit_cost: i64) -> StockMovement {
        let key = StockKey::new(product, "W1");
        StockMovement {
            kind: MovementKind::Issue,
            quantity: dec(quantity),
            unit_cost: dec(unit_cost),
            valuation: dec(quantity * unit_cost),
            before: None,
            after: StockPosition::empty(key.clone()),
            key,
        }
    }

    async fn commit(storage: &mut MemoryStorage, entry: JournalEntry) {
        storage
            .commit(Changeset {
                new_entries: vec![entry],
                ..Changeset::default()
            })
            .await
            .unwrap();
    }

    fn invoice(reference: &str, day: u32, customer: Option<&str>, revenue: i64) -> JournalEntry {
        let mut entry = JournalEntry::new(reference.to_string(), date(day), reference.to_string());
        entry.source = EntrySource::SalesInvoice;
        entry.party_id = customer.map(str::to_string);
        entry.lines = vec![
            JournalLine::debit("110201", dec(revenue), None),
            JournalLine::credit("4101", dec(revenue), None),
        ];
        entry
    }

    fn job_issue(reference: &str, day: u32, job: &str, movement: StockMovement) -> JournalEntry {
        let mut entry = JournalEntry::new(reference.to_string(), date(day), reference.to_string());
        entry.source = EntrySource::StockIssue;
        entry.document_ref = Some(job.to_string());
        entry.lines = vec![
            JournalLine::debit("5100", movement.valuation.clone(), None),
            JournalLine::credit("110301", movement.valuation.clone(), None),
        ];
        entry.stock_movements.push(movement);
        entry
    }

    #[tokio::test]
    async fn job_profitability_charges_linked_issues_to_the_invoice() {
        let mut storage = seeded().await;
        let mut sale = invoice("INV-7", 10, Some("C1"), 500);
        sale.lines.push(JournalLine::debit("5100", dec(60), None));
        sale.lines.push(JournalLine::credit("110301", dec(60), None));
        sale.stock_movements.push(issued("P1", 6, 10));
        commit(&mut storage, sale).await;
        commit(&mut storage, job_issue("ISS-1", 12, "inv-7", issued("P2", 4, 35))).await;
        commit(&mut storage, job_issue("ISS-2", 12, "INV-8", issued("P2", 1, 35))).await;
        let aggregator = BalanceAggregator::new(storage, LedgerConfig::default());

        let job = aggregator.job_profitability("INV-7").await.unwrap();

        assert_eq!(job.customer_id.as_deref(), Some("C1"));
        assert_eq!(job.revenue, dec(500));
        assert_eq!(job.material_cost, dec(200));
        assert_eq!(job.profit, dec(300));
        assert_eq!(job.margin_percent, Some(dec(60)));
        assert_eq!(job.materials.len(), 2);
        assert_eq!(job.materials[1].reference_no, "ISS-1");
        assert!(matches!(
            aggregator.job_profitability("ISS-1").await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn sales_are_grouped_by_customer_within_the_period() {
        let mut storage = seeded().await;
        commit(&mut storage, invoice("INV-1", 2, Some("C1"), 100)).await;
        commit(&mut storage, invoice("INV-2", 8, Some("C1"), 250)).await;
        commit(&mut storage, invoice("INV-3", 9, None, 40)).await;
        commit(&mut storage, invoice("INV-4", 25, Some("C2"), 900)).await;
        commit(&mut storage, job_issue("ISS-1", 26, "INV-2", issued("P1", 5, 10))).await;
        let aggregator = BalanceAggregator::new(storage, LedgerConfig::default());

        let sales = aggregator.sales_by_customer(Some(date(1)), Some(date(20))).await.unwrap();

        assert_eq!(sales.len(), 2);
        assert_eq!(sales[0].customer_id, None);
        assert_eq!(sales[0].revenue, dec(40));
        let c1 = &sales[1];
        assert_eq!(c1.customer_id.as_deref(), Some("C1"));
        assert_eq!(c1.invoices, 2);
        assert_eq!(c1.revenue, dec(350));
        assert_eq!(c1.cost, dec(50));
        assert_eq!(c1.profit, dec(300));
    }

    #[tokio::test]
    async fn unknown_accounts_are_reported() {
        let aggregator = BalanceAggregator::new(seeded().await, LedgerConfig::default());
        assert!(matches!(
            aggregator.statement("9999", None, None).await,
            Err(LedgerError::AccountNotFound(_))
        ));
    }
}
