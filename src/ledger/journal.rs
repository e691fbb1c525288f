//! Journal store and manual entry building

use bigdecimal::BigDecimal;
use chrono::NaiveDate;

use crate::ledger::posting::ManualEntry;
use crate::traits::*;
use crate::types::*;

/// Journal store keyed by reference number
pub struct JournalStore<S: LedgerStorage> {
    storage: S,
    validator: Box<dyn EntryValidator>,
}

impl<S: LedgerStorage> JournalStore<S> {
    /// Create a new journal store
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            validator: Box::new(DefaultEntryValidator),
        }
    }

    /// Create a new journal store with custom validator
    pub fn with_validator(storage: S, validator: Box<dyn EntryValidator>) -> Self {
        Self { storage, validator }
    }

    pub(crate) fn validator(&self) -> &dyn EntryValidator {
        self.validator.as_ref()
    }

    /// Store a single entry. Fails with `DuplicateReference` if the
    /// reference is taken.
    pub async fn post(&mut self, entry: JournalEntry) -> LedgerResult<JournalEntry> {
        self.validator.validate_entry(&entry)?;

        let mut stored = self
            .storage
            .commit(Changeset {
                new_entries: vec![entry],
                ..Changeset::default()
            })
            .await?;
        stored
            .pop()
            .ok_or_else(|| LedgerError::Storage("commit returned no entry".to_string()))
    }

    pub async fn find_by_reference(&self, reference_no: &str) -> LedgerResult<Option<JournalEntry>> {
        self.storage.get_entry(reference_no).await
    }

    /// Get an entry by reference, returning an error if not found
    pub async fn find_required(&self, reference_no: &str) -> LedgerResult<JournalEntry> {
        self.storage
            .get_entry(reference_no)
            .await?
            .ok_or_else(|| LedgerError::NotFound(reference_no.to_string()))
    }

    /// Remove an entry. Stock effects are not touched here; use
    /// [`crate::Ledger::reverse_by_reference`] for business events.
    pub async fn delete_by_reference(&mut self, reference_no: &str) -> LedgerResult<JournalEntry> {
        let entry = self.find_required(reference_no).await?;
        self.storage
            .commit(Changeset {
                removed_entries: vec![reference_no.to_string()],
                ..Changeset::default()
            })
            .await?;
        Ok(entry)
    }

    /// Entries touching an account, ordered by date then insertion
    pub async fn find_for_account(
        &self,
        account_code: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> LedgerResult<Vec<JournalEntry>> {
        self.storage
            .get_account_entries(account_code, start_date, end_date)
            .await
    }

    /// All entries within a date range, ordered by date then insertion
    pub async fn entries(
        &self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> LedgerResult<Vec<JournalEntry>> {
        self.storage.get_entries(start_date, end_date).await
    }
}

/// Builder for operator-entered journal entries
#[derive(Debug)]
pub struct JournalEntryBuilder {
    manual: ManualEntry,
}

impl JournalEntryBuilder {
    /// Start a manual entry under an explicit reference
    pub fn new(reference_no: String, date: NaiveDate, description: String) -> Self {
        Self {
            manual: ManualEntry {
                reference_no,
                date,
                description,
                lines: Vec::new(),
                status: EntryStatus::Posted,
            },
        }
    }

    /// Start a manual entry with a generated `MAN-` reference
    pub fn generated(date: NaiveDate, description: String) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self::new(format!("MAN-{}", &id[..12]), date, description)
    }

    /// Save as a draft that is excluded from balances until approved
    pub fn draft(mut self) -> Self {
        self.manual.status = EntryStatus::Draft;
        self
    }

    /// Add a debit line
    pub fn debit(mut self, account_code: &str, amount: BigDecimal, description: Option<String>) -> Self {
        self.manual
            .lines
            .push(JournalLine::debit(account_code, amount, description));
        self
    }

    /// Add a credit line
    pub fn credit(mut self, account_code: &str, amount: BigDecimal, description: Option<String>) -> Self {
        self.manual
            .lines
            .push(JournalLine::credit(account_code, amount, description));
        self
    }

    /// Add a custom line
    pub fn line(mut self, line: JournalLine) -> Self {
        self.manual.lines.push(line);
        self
    }

    /// Build the manual entry, rejecting it unless it balances exactly
    pub fn build(self) -> LedgerResult<ManualEntry> {
        let mut entry = JournalEntry::new(
            self.manual.reference_no.clone(),
            self.manual.date,
            self.manual.description.clone(),
        );
        entry.lines = self.manual.lines.clone();
        entry.validate()?;
        Ok(self.manual)
    }
}

/// Common manual entry patterns
pub mod patterns {
    use super::*;

    /// Opening balance: debit an asset, credit equity
    pub fn opening_balance(
        reference_no: String,
        date: NaiveDate,
        asset_account: &str,
        equity_account: &str,
        amount: BigDecimal,
    ) -> LedgerResult<ManualEntry> {
        JournalEntryBuilder::new(reference_no, date, "Opening balance".to_string())
            .debit(asset_account, amount.clone(), Some("Opening balance".to_string()))
            .credit(equity_account, amount, Some("Capital contribution".to_string()))
            .build()
    }

    /// Reclassify an amount from one account to another
    pub fn reclassification(
        reference_no: String,
        date: NaiveDate,
        description: String,
        to_account: &str,
        from_account: &str,
        amount: BigDecimal,
    ) -> LedgerResult<ManualEntry> {
        JournalEntryBuilder::new(reference_no, date, description)
            .debit(to_account, amount.clone(), None)
            .credit(from_account, amount, None)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::memory_storage::MemoryStorage;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, day).unwrap()
    }

    fn entry(reference: &str, day: u32, amount: i64) -> JournalEntry {
        let mut entry = JournalEntry::new(reference.to_string(), date(day), "test".to_string());
        entry.add_line(JournalLine::debit("11010101", BigDecimal::from(amount), None));
        entry.add_line(JournalLine::credit("3101", BigDecimal::from(amount), None));
        entry
    }

    #[tokio::test]
    async fn references_are_unique() {
        let mut store = JournalStore::new(MemoryStorage::new());
        store.post(entry("J-1", 1, 10)).await.unwrap();

        let result = store.post(entry("J-1", 2, 20)).await;

        assert!(matches!(result, Err(LedgerError::DuplicateReference(r)) if r == "J-1"));
        let stored = store.find_by_reference("J-1").await.unwrap().unwrap();
        assert_eq!(stored.total_debit(), BigDecimal::from(10));
    }

    #[tokio::test]
    async fn delete_removes_exactly_one_entry() {
        let mut store = JournalStore::new(MemoryStorage::new());
        store.post(entry("J-1", 1, 10)).await.unwrap();
        store.post(entry("J-2", 1, 20)).await.unwrap();

        let removed = store.delete_by_reference("J-1").await.unwrap();

        assert_eq!(removed.reference_no, "J-1");
        let left = store.entries(None, None).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].reference_no, "J-2");
        assert!(matches!(
            store.delete_by_reference("J-1").await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn account_queries_respect_the_date_range() {
        let mut store = JournalStore::new(MemoryStorage::new());
        store.post(entry("J-1", 1, 10)).await.unwrap();
        store.post(entry("J-2", 10, 20)).await.unwrap();
        store.post(entry("J-3", 20, 30)).await.unwrap();

        let found = store
            .find_for_account("3101", Some(date(5)), Some(date(20)))
            .await
            .unwrap();
        let refs: Vec<&str> = found.iter().map(|e| e.reference_no.as_str()).collect();
        assert_eq!(refs, vec!["J-2", "J-3"]);
        assert!(store
            .find_for_account("5306", None, None)
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn builder_rejects_unbalanced_manual_entries() {
        let result = JournalEntryBuilder::new("MAN-1".to_string(), date(1), "Fix".to_string())
            .debit("5306", BigDecimal::from(100), None)
            .credit("11010101", BigDecimal::from(99), None)
            .build();

        match result {
            Err(LedgerError::ImbalancedEntry {
                reference,
                debit,
                credit,
                delta,
            }) => {
                assert_eq!(reference, "MAN-1");
                assert_eq!(debit, BigDecimal::from(100));
                assert_eq!(credit, BigDecimal::from(99));
                assert_eq!(delta, BigDecimal::from(1));
            }
            other => panic!("expected imbalance, got {other:?}"),
        }
    }

    #[test]
    fn generated_references_are_prefixed() {
        let manual = JournalEntryBuilder::generated(date(1), "Draft".to_string())
            .draft()
            .debit("5306", BigDecimal::from(5), None)
            .credit("11010101", BigDecimal::from(5), None)
            .build()
            .unwrap();
        assert!(manual.reference_no.starts_with("MAN-"));
        assert_eq!(manual.status, EntryStatus::Draft);
    }

    #[test]
    fn opening_balance_pattern_balances() {
        let manual = patterns::opening_balance(
            "OPEN-1".to_string(),
            date(1),
            "11010101",
            "3101",
            BigDecimal::from(10_000),
        )
        .unwrap();
        assert_eq!(manual.lines.len(), 2);
    }
}
