// Deduplication on the 5-tuple identity key (unit, minute-truncated
// timestamp, student, description, amount).
//
// Two layers: the in-batch scan keeps the pre-commit duplicate count honest
// and avoids store round-trips for rows repeated within one document; the
// store query catches anything ingested in an earlier run. The storage-layer
// UNIQUE constraint remains the final guard if a race slips past both.

use crate::error::StoreError;
use crate::ledger::{Ledger, Transaction};

pub struct DeduplicationEngine;

impl DeduplicationEngine {
    pub fn new() -> Self {
        DeduplicationEngine
    }

    /// Check a candidate against the in-flight batch, then the persisted
    /// store.
    pub fn is_duplicate(
        &self,
        candidate: &Transaction,
        batch: &[Transaction],
        ledger: &Ledger,
    ) -> Result<bool, StoreError> {
        if batch.iter().any(|t| t.same_identity(candidate)) {
            return Ok(true);
        }

        ledger.transaction_exists(candidate)
    }
}

impl Default for DeduplicationEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{PaymentMethod, Unit};
    use chrono::NaiveDate;

    fn sample_tx(student: &str, amount: f64) -> Transaction {
        Transaction {
            unit: Unit::Smp,
            happened_at: NaiveDate::from_ymd_opt(2024, 1, 5)
                .unwrap()
                .and_hms_opt(14, 37, 0)
                .unwrap(),
            student_name: student.to_string(),
            description: "Bayar SPP".to_string(),
            method: PaymentMethod::Cash,
            amount,
        }
    }

    #[test]
    fn test_duplicate_within_batch() {
        let ledger = Ledger::open_in_memory().unwrap();
        let engine = DeduplicationEngine::new();

        let batch = vec![sample_tx("Budi", 150000.0)];
        let candidate = sample_tx("Budi", 150000.0);

        assert!(engine.is_duplicate(&candidate, &batch, &ledger).unwrap());
    }

    #[test]
    fn test_duplicate_against_store() {
        let ledger = Ledger::open_in_memory().unwrap();
        let engine = DeduplicationEngine::new();

        ledger
            .insert_batch(&[sample_tx("Budi", 150000.0)], "tester")
            .unwrap();

        let candidate = sample_tx("Budi", 150000.0);
        assert!(engine.is_duplicate(&candidate, &[], &ledger).unwrap());
    }

    #[test]
    fn test_any_field_difference_is_not_duplicate() {
        let ledger = Ledger::open_in_memory().unwrap();
        let engine = DeduplicationEngine::new();

        let batch = vec![sample_tx("Budi", 150000.0)];

        // Different student
        assert!(!engine
            .is_duplicate(&sample_tx("Siti", 150000.0), &batch, &ledger)
            .unwrap());

        // Different amount
        assert!(!engine
            .is_duplicate(&sample_tx("Budi", 150001.0), &batch, &ledger)
            .unwrap());

        // Different minute
        let mut shifted = sample_tx("Budi", 150000.0);
        shifted.happened_at = NaiveDate::from_ymd_opt(2024, 1, 5)
            .unwrap()
            .and_hms_opt(14, 38, 0)
            .unwrap();
        assert!(!engine.is_duplicate(&shifted, &batch, &ledger).unwrap());
    }

    #[test]
    fn test_method_difference_still_duplicate() {
        let ledger = Ledger::open_in_memory().unwrap();
        let engine = DeduplicationEngine::new();

        let batch = vec![sample_tx("Budi", 150000.0)];
        let mut candidate = sample_tx("Budi", 150000.0);
        candidate.method = PaymentMethod::ParentBalance;

        // Method is not part of the identity key
        assert!(engine.is_duplicate(&candidate, &batch, &ledger).unwrap());
    }
}
