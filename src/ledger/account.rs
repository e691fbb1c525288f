//! Chart of accounts: the account directory and its parent-link tree

use std::collections::{HashMap, HashSet};

use crate::config::{LedgerConfig, SystemAccount};
use crate::traits::*;
use crate::types::*;

/// Account directory for handling chart of accounts operations
pub struct AccountDirectory<S: LedgerStorage> {
    pub(crate) storage: S,
    validator: Box<dyn AccountValidator>,
}

impl<S: LedgerStorage> AccountDirectory<S> {
    /// Create a new account directory
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            validator: Box::new(DefaultAccountValidator),
        }
    }

    /// Create a new account directory with custom validator
    pub fn with_validator(storage: S, validator: Box<dyn AccountValidator>) -> Self {
        Self { storage, validator }
    }

    /// Create a new account.
    ///
    /// The parent must already exist, so the tree stays acyclic by
    /// construction.
    pub async fn create_account(
        &mut self,
        code: String,
        name: String,
        account_type: AccountType,
        nature: Nature,
        parent_code: Option<String>,
        is_transactional: bool,
    ) -> LedgerResult<Account> {
        let account = Account::new(code, name, account_type, nature, parent_code, is_transactional);

        self.validator.validate_account(&account)?;

        if self.storage.get_account(&account.code).await?.is_some() {
            return Err(LedgerError::DuplicateCode(account.code));
        }

        if let Some(ref parent_code) = account.parent_code {
            if self.storage.get_account(parent_code).await?.is_none() {
                return Err(LedgerError::InvalidParent {
                    code: account.code.clone(),
                    parent: parent_code.clone(),
                });
            }
        }

        self.storage.save_account(&account).await?;
        tracing::debug!(code = %account.code, parent = ?account.parent_code, "account created");

        Ok(account)
    }

    /// Get an account by code
    pub async fn get_account(&self, code: &str) -> LedgerResult<Option<Account>> {
        self.storage.get_account(code).await
    }

    /// Get an account by code, returning an error if not found
    pub async fn get_account_required(&self, code: &str) -> LedgerResult<Account> {
        self.storage
            .get_account(code)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(code.to_string()))
    }

    /// List all accounts, ordered by code
    pub async fn list_accounts(&self) -> LedgerResult<Vec<Account>> {
        self.storage.list_accounts(None).await
    }

    /// List accounts by type
    pub async fn list_accounts_by_type(
        &self,
        account_type: AccountType,
    ) -> LedgerResult<Vec<Account>> {
        self.storage.list_accounts(Some(account_type)).await
    }

    /// Direct children of an account
    pub async fn children(&self, code: &str) -> LedgerResult<Vec<Account>> {
        let all_accounts = self.list_accounts().await?;
        Ok(all_accounts
            .into_iter()
            .filter(|account| account.parent_code.as_deref() == Some(code))
            .collect())
    }

    /// Ancestor chain from the root down to the account itself
    pub async fn account_path(&self, code: &str) -> LedgerResult<Vec<Account>> {
        let mut path = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(code.to_string());

        while let Some(code) = current {
            if !seen.insert(code.clone()) {
                return Err(LedgerError::Validation(format!(
                    "Cycle in account hierarchy at '{code}'"
                )));
            }
            let account = self.get_account_required(&code).await?;
            current = account.parent_code.clone();
            path.insert(0, account);
        }

        Ok(path)
    }

    /// Number of ancestors above the account (roots have depth 0)
    pub async fn depth(&self, code: &str) -> LedgerResult<usize> {
        Ok(self.account_path(code).await?.len().saturating_sub(1))
    }

    /// Rename an account or replace its metadata. Code, type, nature and
    /// parent are fixed once the account exists.
    pub async fn update_account(&mut self, account: &Account) -> LedgerResult<Account> {
        self.validator.validate_account(account)?;

        let mut existing = self.get_account_required(&account.code).await?;
        if existing.parent_code != account.parent_code
            || existing.account_type != account.account_type
            || existing.nature != account.nature
        {
            return Err(LedgerError::Validation(format!(
                "Only the name and metadata of account '{}' can be changed",
                account.code
            )));
        }

        existing.name = account.name.clone();
        existing.metadata = account.metadata.clone();
        existing.updated_at = chrono::Utc::now().naive_utc();
        self.storage.update_account(&existing).await?;
        Ok(existing)
    }

    /// Delete an account that nothing references yet
    pub async fn delete_account(&mut self, code: &str) -> LedgerResult<()> {
        self.get_account_required(code).await?;

        if !self.children(code).await?.is_empty() {
            return Err(LedgerError::AccountInUse(code.to_string()));
        }
        if !self
            .storage
            .get_account_entries(code, None, None)
            .await?
            .is_empty()
        {
            return Err(LedgerError::AccountInUse(code.to_string()));
        }

        self.storage.delete_account(code).await
    }

    /// Declared parent of an account, falling back to the legacy code-prefix
    /// rule for accounts that have none.
    pub async fn resolve_parent(&self, code: &str) -> LedgerResult<Option<String>> {
        if let Some(account) = self.get_account(code).await? {
            if account.parent_code.is_some() {
                return Ok(account.parent_code);
            }
        }
        Ok(compat::infer_parent_code(code))
    }

    /// One-time import step: give every parentless account the parent the
    /// code-prefix rule infers, when that parent exists and the link does
    /// not close a cycle. Returns the migrated codes.
    pub async fn migrate_inferred_parents(&mut self) -> LedgerResult<Vec<String>> {
        let accounts = self.list_accounts().await?;
        let mut parents: HashMap<String, Option<String>> = accounts
            .iter()
            .map(|a| (a.code.clone(), a.parent_code.clone()))
            .collect();

        let mut migrated = Vec::new();
        for mut account in accounts.into_iter().filter(|a| a.parent_code.is_none()) {
            let Some(parent) = compat::infer_parent_code(&account.code) else {
                continue;
            };
            if !parents.contains_key(&parent) || compat::reaches(&parents, &parent, &account.code) {
                continue;
            }

            account.parent_code = Some(parent.clone());
            account.updated_at = chrono::Utc::now().naive_utc();
            self.storage.update_account(&account).await?;
            parents.insert(account.code.clone(), Some(parent));
            migrated.push(account.code);
        }

        if !migrated.is_empty() {
            tracing::info!(count = migrated.len(), "migrated inferred parent links");
        }
        Ok(migrated)
    }

    /// Build (but do not save) an auto-provisioned transactional account.
    /// It is attached to the inferred parent when that parent exists.
    pub async fn provisioned_account(
        &self,
        code: &str,
        name: &str,
        account_type: AccountType,
        nature: Nature,
        triggered_by: &str,
    ) -> LedgerResult<Account> {
        let parent = match compat::infer_parent_code(code) {
            Some(parent) if self.get_account(&parent).await?.is_some() => Some(parent),
            _ => None,
        };
        let mut account = Account::new(
            code.to_string(),
            name.to_string(),
            account_type,
            nature,
            parent,
            true,
        );
        account
            .metadata
            .insert(PROVISIONED_BY.to_string(), triggered_by.to_string());
        Ok(account)
    }

    /// Get-or-create. Creation is logged as an audit event.
    pub async fn provision_if_missing(
        &mut self,
        code: &str,
        name: &str,
        account_type: AccountType,
        nature: Nature,
        triggered_by: &str,
    ) -> LedgerResult<Account> {
        if let Some(existing) = self.get_account(code).await? {
            return Ok(existing);
        }

        let account = self
            .provisioned_account(code, name, account_type, nature, triggered_by)
            .await?;
        self.validator.validate_account(&account)?;
        self.storage.save_account(&account).await?;
        tracing::warn!(
            code = %account.code,
            name = %account.name,
            parent = ?account.parent_code,
            triggered_by,
            "account auto-provisioned"
        );
        Ok(account)
    }

    /// Provision every configured system account that does not exist yet.
    /// Returns the accounts that were created.
    pub async fn ensure_system_accounts(
        &mut self,
        config: &LedgerConfig,
    ) -> LedgerResult<Vec<Account>> {
        let mut created = Vec::new();
        for system_account in SystemAccount::ALL {
            let code = config.account_code(system_account);
            if self.get_account(&code).await?.is_some() {
                continue;
            }
            let spec = system_account.spec();
            let account = self
                .provision_if_missing(
                    &code,
                    spec.name,
                    spec.account_type,
                    spec.nature,
                    "ensure_system_accounts",
                )
                .await?;
            created.push(account);
        }
        Ok(created)
    }
}

/// Legacy hierarchy rule: parents were derived from the code itself.
///
/// Only [`AccountDirectory::resolve_parent`] and the one-time
/// [`AccountDirectory::migrate_inferred_parents`] import step use it;
/// rollups follow explicit parent links.
pub mod compat {
    use std::collections::{HashMap, HashSet};

    /// `1102-0007` → `1102`; `110201` → `11`; codes shorter than four
    /// characters have no inferred parent.
    pub fn infer_parent_code(code: &str) -> Option<String> {
        if let Some((prefix, _)) = code.split_once('-') {
            return (!prefix.is_empty()).then(|| prefix.to_string());
        }
        if code.chars().count() >= 4 {
            let prefix: String = code.chars().take(2).collect();
            return (prefix != code).then_some(prefix);
        }
        None
    }

    /// Whether following parent links up from `start` arrives at `target`
    pub(crate) fn reaches(
        parents: &HashMap<String, Option<String>>,
        start: &str,
        target: &str,
    ) -> bool {
        let mut seen = HashSet::new();
        let mut current = Some(start.to_string());
        while let Some(code) = current {
            if code == target {
                return true;
            }
            if !seen.insert(code.clone()) {
                return true;
            }
            current = parents.get(&code).cloned().flatten();
        }
        false
    }
}

/// Utility functions for working with accounts
pub mod utils {
    use super::*;

    struct SeedAccount {
        code: &'static str,
        name: &'static str,
        account_type: AccountType,
        nature: Option<Nature>,
        parent: Option<&'static str>,
        transactional: bool,
    }

    const fn group(
        code: &'static str,
        name: &'static str,
        account_type: AccountType,
        parent: Option<&'static str>,
    ) -> SeedAccount {
        SeedAccount {
            code,
            name,
            account_type,
            nature: None,
            parent,
            transactional: false,
        }
    }

    const fn leaf(
        code: &'static str,
        name: &'static str,
        account_type: AccountType,
        parent: &'static str,
    ) -> SeedAccount {
        SeedAccount {
            code,
            name,
            account_type,
            nature: None,
            parent: Some(parent),
            transactional: true,
        }
    }

    use AccountType::*;

    /// Parents are listed before their children.
    const STANDARD_CHART: &[SeedAccount] = &[
        group("1", "Assets", Asset, None),
        group("11", "Current Assets", Asset, Some("1")),
        group("1101", "Cash and Cash Equivalents", Asset, Some("11")),
        group("110101", "Cash Boxes", Asset, Some("1101")),
        leaf("11010101", "Main Treasury", Asset, "110101"),
        group("110102", "Banks", Asset, Some("1101")),
        leaf("11010201", "Bank Current Account", Asset, "110102"),
        group("1102", "Customers and Debtors", Asset, Some("11")),
        leaf("110201", "Trade Customers", Asset, "1102"),
        group("1103", "Inventory", Asset, Some("11")),
        leaf("110301", "Raw Materials Store", Asset, "1103"),
        group("1104", "Other Debit Balances", Asset, Some("11")),
        leaf("110403", "VAT Recoverable (Purchases)", Asset, "1104"),
        leaf("110404", "Withholding Tax Receivable", Asset, "1104"),
        group("12", "Non-current Assets", Asset, Some("1")),
        group("1201", "Fixed Assets", Asset, Some("12")),
        leaf("120103", "Machinery and Equipment", Asset, "1201"),
        SeedAccount {
            code: "1202",
            name: "Accumulated Depreciation",
            account_type: Asset,
            nature: Some(Nature::Credit),
            parent: Some("12"),
            transactional: false,
        },
        SeedAccount {
            code: "120201",
            name: "Accumulated Depreciation - Machinery",
            account_type: Asset,
            nature: Some(Nature::Credit),
            parent: Some("1202"),
            transactional: true,
        },
        leaf("1203", "Employee Advances (Monthly)", Asset, "12"),
        leaf("1204", "Employee Loans (Permanent)", Asset, "12"),
        group("2", "Liabilities", Liability, None),
        group("21", "Current Liabilities", Liability, Some("2")),
        group("2101", "Suppliers", Liability, Some("21")),
        leaf("210101", "Trade Suppliers", Liability, "2101"),
        group("2102", "Withholdings Payable", Liability, Some("21")),
        leaf("210202", "Withholding Tax Payable", Liability, "2102"),
        group("2103", "Other Credit Balances", Liability, Some("21")),
        leaf("210301", "VAT Payable (Sales)", Liability, "2103"),
        group("22", "Clearing Accounts", Liability, Some("2")),
        leaf("2200", "Suppliers - Goods Received Clearing", Liability, "22"),
        group("3", "Equity", Equity, None),
        leaf("3101", "Paid-in Capital", Equity, "3"),
        leaf("3201", "Retained Earnings", Equity, "3"),
        group("4", "Revenue", Revenue, None),
        group("41", "Operating Revenue", Revenue, Some("4")),
        leaf("4101", "Sales Revenue", Revenue, "41"),
        leaf("410104", "Service Revenue", Revenue, "41"),
        group("42", "Discounts Earned", Revenue, Some("4")),
        leaf("4200", "Discount Earned", Revenue, "42"),
        group("49", "Other Income", Revenue, Some("4")),
        leaf("4901", "Employee Deductions", Revenue, "49"),
        group("5", "Expenses", Expense, None),
        group("51", "Cost of Sales", Expense, Some("5")),
        leaf("5100", "Cost of Activity", Expense, "51"),
        leaf("5101", "Materials and Supplies", Expense, "51"),
        leaf("5102", "Direct Labour", Expense, "51"),
        leaf("5105", "Purchase Expenses", Expense, "51"),
        group("52", "Selling and Marketing", Expense, Some("5")),
        leaf("5200", "Discount Allowed", Expense, "52"),
        leaf("5201", "Advertising", Expense, "52"),
        group("53", "General and Administrative", Expense, Some("5")),
        leaf("5300", "Salaries and Wages", Expense, "53"),
        leaf("5306", "Utilities", Expense, "53"),
        group("59", "Other Expenses", Expense, Some("5")),
        leaf("5900", "Rounding Differences", Expense, "59"),
    ];

    /// Create the standard chart of accounts, keyed by code. Every default
    /// system account code is part of it.
    pub async fn create_standard_chart<S: LedgerStorage>(
        directory: &mut AccountDirectory<S>,
    ) -> LedgerResult<HashMap<String, Account>> {
        let mut accounts = HashMap::new();

        for seed in STANDARD_CHART {
            let account = directory
                .create_account(
                    seed.code.to_string(),
                    seed.name.to_string(),
                    seed.account_type,
                    seed.nature.unwrap_or(seed.account_type.default_nature()),
                    seed.parent.map(str::to_string),
                    seed.transactional,
                )
                .await?;
            accounts.insert(account.code.clone(), account);
        }

        Ok(accounts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::memory_storage::MemoryStorage;

    async fn directory_with_chart() -> AccountDirectory<MemoryStorage> {
        let mut directory = AccountDirectory::new(MemoryStorage::new());
        utils::create_standard_chart(&mut directory).await.unwrap();
        directory
    }

    #[test]
    fn prefix_rule_matches_legacy_codes() {
        assert_eq!(compat::infer_parent_code("1102-0007").as_deref(), Some("1102"));
        assert_eq!(compat::infer_parent_code("110201").as_deref(), Some("11"));
        assert_eq!(compat::infer_parent_code("5900").as_deref(), Some("59"));
        assert_eq!(compat::infer_parent_code("11"), None);
        assert_eq!(compat::infer_parent_code("-7"), None);
    }

    #[tokio::test]
    async fn create_rejects_duplicates_and_unknown_parents() {
        let mut directory = directory_with_chart().await;

        let duplicate = directory
            .create_account(
                "4101".to_string(),
                "Again".to_string(),
                AccountType::Revenue,
                Nature::Credit,
                Some("41".to_string()),
                true,
            )
            .await;
        assert!(matches!(duplicate, Err(LedgerError::DuplicateCode(c)) if c == "4101"));

        let orphan = directory
            .create_account(
                "7001".to_string(),
                "Orphan".to_string(),
                AccountType::Expense,
                Nature::Debit,
                Some("70".to_string()),
                true,
            )
            .await;
        assert!(matches!(orphan, Err(LedgerError::InvalidParent { parent, .. }) if parent == "70"));
    }

    #[tokio::test]
    async fn path_runs_from_root_to_account() {
        let directory = directory_with_chart().await;

        let path: Vec<String> = directory
            .account_path("11010101")
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.code)
            .collect();
        assert_eq!(path, vec!["1", "11", "1101", "110101", "11010101"]);
        assert_eq!(directory.depth("11010101").await.unwrap(), 4);
        assert_eq!(directory.depth("1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn migration_links_only_to_existing_parents() {
        let mut directory = directory_with_chart().await;
        for code in ["1102-0001", "4105", "7777-1"] {
            directory
                .storage
                .save_account(&Account::leaf(code, "Imported", AccountType::Asset, None))
                .await
                .unwrap();
        }

        let migrated = directory.migrate_inferred_parents().await.unwrap();

        assert_eq!(migrated, vec!["1102-0001", "4105"]);
        let sub = directory.get_account_required("1102-0001").await.unwrap();
        assert_eq!(sub.parent_code.as_deref(), Some("1102"));
        assert!(directory
            .get_account_required("7777-1")
            .await
            .unwrap()
            .parent_code
            .is_none());
        // Roots of the seeded tree have no inferable parent
        assert!(directory.get_account_required("1").await.unwrap().parent_code.is_none());
    }

    #[tokio::test]
    async fn resolve_parent_prefers_declared_links() {
        let directory = directory_with_chart().await;
        // The prefix rule would say 11
        assert_eq!(
            directory.resolve_parent("11010101").await.unwrap().as_deref(),
            Some("110101")
        );
        assert_eq!(directory.resolve_parent("1").await.unwrap(), None);
        // Unknown codes fall back to the prefix rule
        assert_eq!(directory.resolve_parent("1102-0009").await.unwrap().as_deref(), Some("1102"));
    }

    #[tokio::test]
    async fn provisioning_is_idempotent_and_tagged() {
        let mut directory = AccountDirectory::new(MemoryStorage::new());
        let first = directory
            .provision_if_missing("5900", "Rounding", AccountType::Expense, Nature::Debit, "SALE-1")
            .await
            .unwrap();
        let second = directory
            .provision_if_missing("5900", "Other name", AccountType::Expense, Nature::Debit, "SALE-2")
            .await
            .unwrap();

        assert_eq!(first.provisioned_by(), Some("SALE-1"));
        assert_eq!(second.name, "Rounding");
        assert_eq!(directory.list_accounts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ensure_system_accounts_fills_the_gaps_only() {
        let mut directory = directory_with_chart().await;
        let config = LedgerConfig::default().with_system_account(SystemAccount::Rounding, "5999");

        let created = directory.ensure_system_accounts(&config).await.unwrap();

        assert_eq!(created.len(), 1);
        assert_eq!(created[0].code, "5999");
        assert_eq!(created[0].parent_code.as_deref(), Some("59"));
        assert!(directory.ensure_system_accounts(&config).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_refuses_groups_and_referenced_accounts() {
        let mut directory = directory_with_chart().await;
        assert!(matches!(
            directory.delete_account("1101").await,
            Err(LedgerError::AccountInUse(_))
        ));

        let mut entry = JournalEntry::new(
            "MAN-1".to_string(),
            chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            "Opening".to_string(),
        );
        entry.add_line(JournalLine::debit("11010101", bigdecimal::BigDecimal::from(50), None));
        entry.add_line(JournalLine::credit("3101", bigdecimal::BigDecimal::from(50), None));
        directory
            .storage
            .commit(Changeset {
                new_entries: vec![entry],
                ..Changeset::default()
            })
            .await
            .unwrap();

        assert!(matches!(
            directory.delete_account("3101").await,
            Err(LedgerError::AccountInUse(_))
        ));
        directory.delete_account("5306").await.unwrap();
        assert!(directory.get_account("5306").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_keeps_the_tree_fixed() {
        let mut directory = directory_with_chart().await;
        let mut account = directory.get_account_required("5306").await.unwrap();
        account.name = "Electricity and Water".to_string();
        let updated = directory.update_account(&account).await.unwrap();
        assert_eq!(updated.name, "Electricity and Water");

        account.parent_code = Some("52".to_string());
        assert!(matches!(
            directory.update_account(&account).await,
            Err(LedgerError::Validation(_))
        ));
    }
}
