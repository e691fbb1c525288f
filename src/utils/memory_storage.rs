//! In-memory storage implementation for testing and embedding

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::traits::*;
use crate::types::*;

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<String, Account>,
    entries: HashMap<String, JournalEntry>,
    stock: HashMap<StockKey, StockPosition>,
    next_sequence: u64,
}

impl Tables {
    fn apply_to_cached_balances(&mut self, entry: &JournalEntry, reverse: bool) {
        if !entry.is_posted() {
            return;
        }
        for line in &entry.lines {
            if let Some(account) = self.accounts.get_mut(&line.account_code) {
                if reverse {
                    account.apply_line(&line.credit, &line.debit);
                } else {
                    account.apply_line(&line.debit, &line.credit);
                }
            }
        }
    }

    fn sorted_entries<F>(&self, filter: F) -> Vec<JournalEntry>
    where
        F: Fn(&JournalEntry) -> bool,
    {
        let mut entries: Vec<JournalEntry> =
            self.entries.values().filter(|e| filter(e)).cloned().collect();
        entries.sort_by(|a, b| {
            a.entry_date
                .cmp(&b.entry_date)
                .then(a.sequence.cmp(&b.sequence))
        });
        entries
    }
}

fn in_range(date: NaiveDate, start: Option<NaiveDate>, end: Option<NaiveDate>) -> bool {
    start.is_none_or(|s| date >= s) && end.is_none_or(|e| date <= e)
}

/// In-memory storage. Clones share the same tables, so one instance can be
/// handed to every component of a [`crate::Ledger`].
///
/// A single lock guards all tables: a commit is applied while holding the
/// write lock, so readers never observe half of a changeset.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all data
    pub fn clear(&self) -> LedgerResult<()> {
        *self.write()? = Tables::default();
        Ok(())
    }

    /// Number of stored journal entries
    pub fn entry_count(&self) -> LedgerResult<usize> {
        Ok(self.read()?.entries.len())
    }

    fn read(&self) -> LedgerResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| LedgerError::Storage("memory storage lock poisoned".to_string()))
    }

    fn write(&self) -> LedgerResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| LedgerError::Storage("memory storage lock poisoned".to_string()))
    }
}

#[async_trait]
impl LedgerStorage for MemoryStorage {
    async fn save_account(&mut self, account: &Account) -> LedgerResult<()> {
        let mut tables = self.write()?;
        if tables.accounts.contains_key(&account.code) {
            return Err(LedgerError::DuplicateCode(account.code.clone()));
        }
        tables
            .accounts
            .insert(account.code.clone(), account.clone());
        Ok(())
    }

    async fn get_account(&self, code: &str) -> LedgerResult<Option<Account>> {
        Ok(self.read()?.accounts.get(code).cloned())
    }

    async fn list_accounts(&self, account_type: Option<AccountType>) -> LedgerResult<Vec<Account>> {
        let tables = self.read()?;
        let mut accounts: Vec<Account> = tables
            .accounts
            .values()
            .filter(|account| account_type.is_none_or(|t| account.account_type == t))
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(accounts)
    }

    async fn update_account(&mut self, account: &Account) -> LedgerResult<()> {
        let mut tables = self.write()?;
        match tables.accounts.get_mut(&account.code) {
            Some(existing) => {
                *existing = account.clone();
                Ok(())
            }
            None => Err(LedgerError::AccountNotFound(account.code.clone())),
        }
    }

    async fn delete_account(&mut self, code: &str) -> LedgerResult<()> {
        if self.write()?.accounts.remove(code).is_some() {
            Ok(())
        } else {
            Err(LedgerError::AccountNotFound(code.to_string()))
        }
    }

    async fn get_entry(&self, reference_no: &str) -> LedgerResult<Option<JournalEntry>> {
        Ok(self.read()?.entries.get(reference_no).cloned())
    }

    async fn get_entries(
        &self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> LedgerResult<Vec<JournalEntry>> {
        let tables = self.read()?;
        Ok(tables.sorted_entries(|e| in_range(e.entry_date, start_date, end_date)))
    }

    async fn get_account_entries(
        &self,
        account_code: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> LedgerResult<Vec<JournalEntry>> {
        let tables = self.read()?;
        Ok(tables.sorted_entries(|e| {
            e.touches(account_code) && in_range(e.entry_date, start_date, end_date)
        }))
    }

    async fn get_stock_position(&self, key: &StockKey) -> LedgerResult<Option<StockPosition>> {
        Ok(self.read()?.stock.get(key).cloned())
    }

    async fn list_stock_positions(&self) -> LedgerResult<Vec<StockPosition>> {
        let tables = self.read()?;
        let mut positions: Vec<StockPosition> = tables.stock.values().cloned().collect();
        positions.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(positions)
    }

    async fn commit(&mut self, changes: Changeset) -> LedgerResult<Vec<JournalEntry>> {
        let mut tables = self.write()?;

        // Preconditions first; nothing below this block may fail.
        {
            let mut new_codes = HashSet::new();
            for account in &changes.new_accounts {
                if tables.accounts.contains_key(&account.code) || !new_codes.insert(&account.code) {
                    return Err(LedgerError::DuplicateCode(account.code.clone()));
                }
            }
            for reference in &changes.removed_entries {
                if !tables.entries.contains_key(reference) {
                    return Err(LedgerError::NotFound(reference.clone()));
                }
            }
            let mut new_references = HashSet::new();
            for entry in &changes.new_entries {
                let freed = changes.removed_entries.contains(&entry.reference_no);
                if (tables.entries.contains_key(&entry.reference_no) && !freed)
                    || !new_references.insert(&entry.reference_no)
                {
                    return Err(LedgerError::DuplicateReference(entry.reference_no.clone()));
                }
            }
            for (key, expected) in &changes.expected_stock {
                if tables.stock.get(key) != expected.as_ref() {
                    tracing::warn!(key = %key, "stock position changed since it was read");
                    return Err(LedgerError::StockConflict { key: key.clone() });
                }
            }
        }

        for account in changes.new_accounts {
            tables.accounts.insert(account.code.clone(), account);
        }
        for reference in &changes.removed_entries {
            if let Some(old) = tables.entries.remove(reference) {
                tables.apply_to_cached_balances(&old, true);
            }
        }
        let mut stored = Vec::with_capacity(changes.new_entries.len());
        for mut entry in changes.new_entries {
            tables.next_sequence += 1;
            entry.sequence = tables.next_sequence;
            tables.apply_to_cached_balances(&entry, false);
            tables
                .entries
                .insert(entry.reference_no.clone(), entry.clone());
            stored.push(entry);
        }
        for key in &changes.removed_stock_positions {
            tables.stock.remove(key);
        }
        for position in changes.stock_positions {
            tables.stock.insert(position.key.clone(), position);
        }

        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    fn entry(reference: &str, day: u32) -> JournalEntry {
        let mut entry = JournalEntry::new(
            reference.to_string(),
            NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            "test".to_string(),
        );
        entry.add_line(JournalLine::debit("1101", BigDecimal::from(10), None));
        entry.add_line(JournalLine::credit("4101", BigDecimal::from(10), None));
        entry
    }

    #[tokio::test]
    async fn failed_commit_leaves_no_trace() {
        let mut storage = MemoryStorage::new();
        storage
            .commit(Changeset {
                new_entries: vec![entry("A", 1)],
                ..Changeset::default()
            })
            .await
            .unwrap();

        let key = StockKey::new("P1", "W1");
        let result = storage
            .commit(Changeset {
                new_accounts: vec![Account::leaf("5900", "Rounding", AccountType::Expense, None)],
                new_entries: vec![entry("A", 2)],
                stock_positions: vec![StockPosition::empty(key.clone())],
                ..Changeset::default()
            })
            .await;

        assert!(matches!(result, Err(LedgerError::DuplicateReference(r)) if r == "A"));
        assert!(storage.get_account("5900").await.unwrap().is_none());
        assert!(storage.get_stock_position(&key).await.unwrap().is_none());
        assert_eq!(storage.entry_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn removal_frees_the_reference_for_reinsertion() {
        let mut storage = MemoryStorage::new();
        storage
            .commit(Changeset {
                new_entries: vec![entry("A", 1)],
                ..Changeset::default()
            })
            .await
            .unwrap();

        let stored = storage
            .commit(Changeset {
                removed_entries: vec!["A".to_string()],
                new_entries: vec![entry("A", 3)],
                ..Changeset::default()
            })
            .await
            .unwrap();

        assert_eq!(stored[0].sequence, 2);
        let found = storage.get_entry("A").await.unwrap().unwrap();
        assert_eq!(found.entry_date, NaiveDate::from_ymd_opt(2024, 1, 3).unwrap());
    }

    #[tokio::test]
    async fn entries_are_ordered_by_date_then_insertion() {
        let mut storage = MemoryStorage::new();
        for (reference, day) in [("C", 5), ("A", 2), ("B", 2)] {
            storage
                .commit(Changeset {
                    new_entries: vec![entry(reference, day)],
                    ..Changeset::default()
                })
                .await
                .unwrap();
        }

        let refs: Vec<String> = storage
            .get_entries(None, None)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.reference_no)
            .collect();
        assert_eq!(refs, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn stale_stock_reads_are_refused() {
        let mut storage = MemoryStorage::new();
        let key = StockKey::new("P1", "W1");
        let ten = StockPosition {
            key: key.clone(),
            quantity: BigDecimal::from(10),
            weighted_average_cost: BigDecimal::from(5),
        };
        storage
            .commit(Changeset {
                stock_positions: vec![ten.clone()],
                expected_stock: vec![(key.clone(), None)],
                ..Changeset::default()
            })
            .await
            .unwrap();

        // Written against a read taken before the position existed
        let result = storage
            .commit(Changeset {
                new_entries: vec![entry("A", 1)],
                stock_positions: vec![StockPosition::empty(key.clone())],
                expected_stock: vec![(key.clone(), None)],
                ..Changeset::default()
            })
            .await;

        assert!(matches!(result, Err(LedgerError::StockConflict { key: k }) if k == key));
        assert_eq!(storage.get_stock_position(&key).await.unwrap(), Some(ten));
        assert_eq!(storage.entry_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn removing_unknown_reference_is_not_found() {
        let mut storage = MemoryStorage::new();
        let result = storage
            .commit(Changeset {
                removed_entries: vec!["missing".to_string()],
                ..Changeset::default()
            })
            .await;
        assert!(matches!(result, Err(LedgerError::NotFound(_))));
    }
}
