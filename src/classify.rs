// Row classification: one extracted table row either becomes a candidate
// transaction or is skipped. Skips are silent and uncounted; scanned tables
// are full of footers, annotations and half-empty rows, and none of that is
// an error.

use crate::document::Row;
use crate::ledger::{PaymentMethod, Transaction, Unit};
use crate::normalize::{parse_amount, parse_timestamp};
use chrono::NaiveDateTime;

// Expected cell order in a statement table row
const COL_TIMESTAMP: usize = 1;
const COL_STUDENT: usize = 2;
const COL_DESCRIPTION_A: usize = 3;
const COL_DESCRIPTION_B: usize = 4;
const COL_AMOUNT: usize = 5;

/// Marker the statement puts in the amount column of its total row.
const TOTAL_ROW_MARKER: &str = "JUMLAH";

/// Classifies rows for a single target unit.
pub struct RowClassifier {
    unit: Unit,
}

impl RowClassifier {
    pub fn new(unit: Unit) -> Self {
        RowClassifier { unit }
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    /// Apply the classification rules in order. Returns `None` for any row
    /// that is not a valid candidate: table footers, rows with a missing
    /// date or student, non-positive amounts, unrecognized payment methods.
    ///
    /// `now` is the fallback timestamp for unparseable date cells.
    pub fn classify(&self, row: &Row, now: NaiveDateTime) -> Option<Transaction> {
        // 1. Footer detection: empty amount cell or the total-row marker
        let amount_raw = cell(row, COL_AMOUNT)?;
        if amount_raw == TOTAL_ROW_MARKER {
            return None;
        }

        // 2. Amount parse; zero means unusable and is filtered below
        let amount = parse_amount(&amount_raw);

        // 3-5. Method detection and token stripping on the combined blob
        let blob = format!(
            "{}{}",
            cell(row, COL_DESCRIPTION_A).unwrap_or_default(),
            cell(row, COL_DESCRIPTION_B).unwrap_or_default()
        );
        let method = detect_method(&blob);
        let description = strip_method_tokens(&blob);

        // 6. Student name is the first line of the student cell; the rest
        // is annotation noise
        let student_name = cell(row, COL_STUDENT)
            .map(|s| s.lines().next().unwrap_or("").trim().to_string())
            .unwrap_or_default();

        // 7. Validity gate
        let timestamp_raw = cell(row, COL_TIMESTAMP)?;
        if student_name.is_empty() || amount <= 0.0 {
            return None;
        }
        let method = method?;

        Some(Transaction {
            unit: self.unit,
            happened_at: parse_timestamp(&timestamp_raw, now),
            student_name,
            description,
            method,
            amount,
        })
    }
}

fn cell(row: &Row, index: usize) -> Option<String> {
    row.get(index)
        .and_then(|c| c.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn detect_method(blob: &str) -> Option<PaymentMethod> {
    if blob.contains(PaymentMethod::Cash.token()) {
        Some(PaymentMethod::Cash)
    } else if blob.contains(PaymentMethod::ParentBalance.token()) {
        Some(PaymentMethod::ParentBalance)
    } else {
        None
    }
}

/// Remove the method tokens from the description blob, collapse newlines to
/// spaces, trim.
fn strip_method_tokens(blob: &str) -> String {
    blob.replace(PaymentMethod::Cash.token(), "")
        .replace(PaymentMethod::ParentBalance.token(), "")
        .replace('\n', " ")
        .trim()
        .to_string()
}
