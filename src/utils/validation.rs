//! Validation utilities

use crate::traits::*;
use crate::types::*;
use bigdecimal::BigDecimal;

/// Validate that an amount is positive
pub fn validate_positive_amount(amount: &BigDecimal, what: &str) -> LedgerResult<()> {
    if *amount <= BigDecimal::from(0) {
        Err(LedgerError::Validation(format!(
            "{what} must be positive, got {amount}"
        )))
    } else {
        Ok(())
    }
}

/// Validate that an amount is zero or positive
pub fn validate_non_negative_amount(amount: &BigDecimal, what: &str) -> LedgerResult<()> {
    if *amount < BigDecimal::from(0) {
        Err(LedgerError::Validation(format!(
            "{what} cannot be negative, got {amount}"
        )))
    } else {
        Ok(())
    }
}

/// Validate that an account code is valid
pub fn validate_account_code(code: &str) -> LedgerResult<()> {
    if code.trim().is_empty() {
        return Err(LedgerError::Validation(
            "Account code cannot be empty".to_string(),
        ));
    }

    if code.len() > 32 {
        return Err(LedgerError::Validation(format!(
            "Account code '{code}' cannot exceed 32 characters"
        )));
    }

    // Sub-ledger codes use a dash separator (e.g. 1102-0001)
    if !code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(LedgerError::Validation(format!(
            "Account code '{code}' can only contain alphanumeric characters, dashes, and underscores"
        )));
    }

    Ok(())
}

/// Validate that an account name is valid
pub fn validate_account_name(name: &str) -> LedgerResult<()> {
    if name.trim().is_empty() {
        return Err(LedgerError::Validation(
            "Account name cannot be empty".to_string(),
        ));
    }

    if name.len() > 100 {
        return Err(LedgerError::Validation(
            "Account name cannot exceed 100 characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate a journal reference number
pub fn validate_reference(reference: &str) -> LedgerResult<()> {
    if reference.trim().is_empty() {
        return Err(LedgerError::Validation(
            "Reference number cannot be empty".to_string(),
        ));
    }

    if reference.len() > 64 {
        return Err(LedgerError::Validation(format!(
            "Reference number '{reference}' cannot exceed 64 characters"
        )));
    }

    Ok(())
}

/// Entry validator with stricter checks on references and descriptions
pub struct EnhancedEntryValidator;

impl EntryValidator for EnhancedEntryValidator {
    fn validate_entry(&self, entry: &JournalEntry) -> LedgerResult<()> {
        entry.validate()?;
        validate_reference(&entry.reference_no)?;

        if entry.description.len() > 500 {
            return Err(LedgerError::Validation(format!(
                "Description of entry '{}' cannot exceed 500 characters",
                entry.reference_no
            )));
        }

        for line in &entry.lines {
            validate_account_code(&line.account_code)?;
            if line.debit > BigDecimal::from(0) && line.credit > BigDecimal::from(0) {
                return Err(LedgerError::Validation(format!(
                    "Line on account '{}' in entry '{}' carries both a debit and a credit",
                    line.account_code, entry.reference_no
                )));
            }
        }

        Ok(())
    }
}

/// Account validator with format checks on code and name
pub struct EnhancedAccountValidator;

impl AccountValidator for EnhancedAccountValidator {
    fn validate_account(&self, account: &Account) -> LedgerResult<()> {
        DefaultAccountValidator.validate_account(account)?;
        validate_account_code(&account.code)?;
        validate_account_name(&account.name)?;
        if let Some(parent) = &account.parent_code {
            validate_account_code(parent)?;
        }
        Ok(())
    }
}
