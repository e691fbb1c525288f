//! Ledger configuration: posting policy, system account codes and report groups

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::types::*;

/// Accounts the posting templates rely on. Each has a default code from the
/// standard chart; deployments may remap codes in [`LedgerConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SystemAccount {
    GeneralCustomers,
    GeneralSuppliers,
    OutputVat,
    InputVat,
    WithholdingReceivable,
    WithholdingPayable,
    DiscountAllowed,
    DiscountEarned,
    ServiceRevenue,
    DefaultSales,
    PurchaseExpenses,
    PurchaseClearing,
    DefaultInventory,
    DefaultCogs,
    Salaries,
    EmployeeMonthlyLoans,
    EmployeePermanentLoans,
    EmployeePenalties,
    MainTreasury,
    Rounding,
}

/// Code, name, type and nature used when a system account is provisioned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemAccountSpec {
    pub code: &'static str,
    pub name: &'static str,
    pub account_type: AccountType,
    pub nature: Nature,
}

impl SystemAccount {
    pub const ALL: [SystemAccount; 20] = [
        SystemAccount::GeneralCustomers,
        SystemAccount::GeneralSuppliers,
        SystemAccount::OutputVat,
        SystemAccount::InputVat,
        SystemAccount::WithholdingReceivable,
        SystemAccount::WithholdingPayable,
        SystemAccount::DiscountAllowed,
        SystemAccount::DiscountEarned,
        SystemAccount::ServiceRevenue,
        SystemAccount::DefaultSales,
        SystemAccount::PurchaseExpenses,
        SystemAccount::PurchaseClearing,
        SystemAccount::DefaultInventory,
        SystemAccount::DefaultCogs,
        SystemAccount::Salaries,
        SystemAccount::EmployeeMonthlyLoans,
        SystemAccount::EmployeePermanentLoans,
        SystemAccount::EmployeePenalties,
        SystemAccount::MainTreasury,
        SystemAccount::Rounding,
    ];

    pub fn spec(&self) -> SystemAccountSpec {
        use AccountType::*;
        let (code, name, account_type) = match self {
            SystemAccount::GeneralCustomers => ("110201", "Trade Customers", Asset),
            SystemAccount::GeneralSuppliers => ("210101", "Trade Suppliers", Liability),
            SystemAccount::OutputVat => ("210301", "VAT Payable (Sales)", Liability),
            SystemAccount::InputVat => ("110403", "VAT Recoverable (Purchases)", Asset),
            SystemAccount::WithholdingReceivable => ("110404", "Withholding Tax Receivable", Asset),
            SystemAccount::WithholdingPayable => ("210202", "Withholding Tax Payable", Liability),
            SystemAccount::DiscountAllowed => ("5200", "Discount Allowed", Expense),
            SystemAccount::DiscountEarned => ("4200", "Discount Earned", Revenue),
            SystemAccount::ServiceRevenue => ("410104", "Service Revenue", Revenue),
            SystemAccount::DefaultSales => ("4101", "Sales Revenue", Revenue),
            SystemAccount::PurchaseExpenses => ("5105", "Purchase Expenses", Expense),
            SystemAccount::PurchaseClearing => ("2200", "Suppliers - Goods Received Clearing", Liability),
            SystemAccount::DefaultInventory => ("110301", "Raw Materials Store", Asset),
            SystemAccount::DefaultCogs => ("5100", "Cost of Activity", Expense),
            SystemAccount::Salaries => ("5300", "Salaries and Wages", Expense),
            SystemAccount::EmployeeMonthlyLoans => ("1203", "Employee Advances (Monthly)", Asset),
            SystemAccount::EmployeePermanentLoans => ("1204", "Employee Loans (Permanent)", Asset),
            SystemAccount::EmployeePenalties => ("4901", "Employee Deductions", Revenue),
            SystemAccount::MainTreasury => ("11010101", "Main Treasury", Asset),
            SystemAccount::Rounding => ("5900", "Rounding Differences", Expense),
        };
        SystemAccountSpec {
            code,
            name,
            account_type,
            nature: account_type.default_nature(),
        }
    }
}

/// Account groups whose subtree balances feed the dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardGroups {
    pub cash: Vec<String>,
    pub receivables: Vec<String>,
    pub payables: Vec<String>,
    /// Accounts that carry stock value; checked against the stock book
    #[serde(default = "default_inventory_groups")]
    pub inventory: Vec<String>,
}

fn default_inventory_groups() -> Vec<String> {
    vec!["1103".to_string()]
}

impl Default for DashboardGroups {
    fn default() -> Self {
        Self {
            cash: vec!["1101".to_string()],
            receivables: vec!["1102".to_string()],
            payables: vec!["2101".to_string()],
            inventory: default_inventory_groups(),
        }
    }
}

/// Deployment policy for the ledger core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Differences above this are logged as suspicious when rounded away
    pub rounding_tolerance: BigDecimal,
    /// Allow issues beyond the quantity on hand
    pub allow_negative_stock: bool,
    /// Create missing system accounts during posting instead of failing
    pub auto_provision_system_accounts: bool,
    /// Decimal places kept on weighted-average unit costs
    pub cost_scale: i64,
    /// Code overrides for system accounts
    pub system_accounts: HashMap<SystemAccount, String>,
    pub dashboard: DashboardGroups,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rounding_tolerance: BigDecimal::from(1) / BigDecimal::from(100),
            allow_negative_stock: false,
            auto_provision_system_accounts: false,
            cost_scale: 6,
            system_accounts: HashMap::new(),
            dashboard: DashboardGroups::default(),
        }
    }
}

impl LedgerConfig {
    /// Code configured for a system account
    pub fn account_code(&self, account: SystemAccount) -> String {
        self.system_accounts
            .get(&account)
            .cloned()
            .unwrap_or_else(|| account.spec().code.to_string())
    }

    /// System account configured under the given code, if any
    pub fn system_account_for(&self, code: &str) -> Option<SystemAccount> {
        SystemAccount::ALL
            .into_iter()
            .find(|account| self.account_code(*account) == code)
    }

    pub fn with_negative_stock(mut self, allow: bool) -> Self {
        self.allow_negative_stock = allow;
        self
    }

    pub fn with_auto_provision(mut self, enabled: bool) -> Self {
        self.auto_provision_system_accounts = enabled;
        self
    }

    pub fn with_system_account(mut self, account: SystemAccount, code: &str) -> Self {
        self.system_accounts.insert(account, code.to_string());
        self
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.rounding_tolerance < BigDecimal::from(0) {
            return Err(LedgerError::Config(
                "rounding_tolerance cannot be negative".to_string(),
            ));
        }
        if !(0..=18).contains(&self.cost_scale) {
            return Err(LedgerError::Config(format!(
                "cost_scale must be between 0 and 18, got {}",
                self.cost_scale
            )));
        }
        for (account, code) in &self.system_accounts {
            if code.trim().is_empty() {
                return Err(LedgerError::Config(format!(
                    "empty code configured for {account:?}"
                )));
            }
        }
        Ok(())
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> LedgerResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| LedgerError::Config(e.to_string()))?;
        fs::write(path, json).map_err(|e| LedgerError::Config(e.to_string()))
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> LedgerResult<Self> {
        let data = fs::read_to_string(path).map_err(|e| LedgerError::Config(e.to_string()))?;
        let parsed = serde_json::from_str::<LedgerConfig>(&data)
            .map_err(|e| LedgerError::Config(e.to_string()))?;
        parsed.validate()?;
        Ok(parsed)
    }
}
