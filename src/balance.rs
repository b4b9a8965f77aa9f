// Balance reconciliation: available cash is always recomputed from full
// persisted history, never cached, so every read is consistent with the
// store at that moment.

use crate::error::{DisbursementError, StoreError};
use crate::ledger::{Disbursement, Ledger, Transaction, TransactionFilter, Unit};
use serde::Serialize;

/// Number of disbursements shown in a recap.
const RECAP_DISBURSEMENT_LIMIT: u32 = 10;
/// Number of transactions shown in a recap.
const RECAP_TRANSACTION_LIMIT: u32 = 100;

/// Cumulative inflow minus cumulative disbursed for the unit.
pub fn available_cash(ledger: &Ledger, unit: Unit) -> Result<f64, StoreError> {
    let inflow = ledger.total_inflow(unit)?;
    let disbursed = ledger.total_disbursed(unit)?;
    Ok(inflow - disbursed)
}

/// Validate and record a disbursement.
///
/// The balance check itself runs inside the store's disbursement
/// transaction; this layer only rejects non-positive amounts up front.
pub fn request_disbursement(
    ledger: &Ledger,
    unit: Unit,
    amount: f64,
    note: Option<String>,
    actor: &str,
) -> Result<Disbursement, DisbursementError> {
    if amount <= 0.0 {
        return Err(DisbursementError::InvalidAmount(amount));
    }

    ledger.record_disbursement(unit, amount, note, actor)
}

/// Read-only aggregation for one unit's recap view.
///
/// Per-method totals honor the filter; available cash is always computed
/// over unfiltered history (a date filter narrows what you look at, not how
/// much cash the unit holds).
#[derive(Debug, Serialize)]
pub struct UnitRecap {
    pub unit: Unit,
    /// Sum of filtered Cash transactions.
    pub total_cash: f64,
    /// Sum of filtered Saldo Ortu transactions.
    pub total_parent_balance: f64,
    /// Unfiltered inflow minus unfiltered disbursed.
    pub available_cash: f64,
    pub recent_disbursements: Vec<Disbursement>,
    pub transactions: Vec<Transaction>,
    pub distinct_descriptions: Vec<String>,
}

pub fn unit_recap(
    ledger: &Ledger,
    unit: Unit,
    filter: &TransactionFilter,
) -> Result<UnitRecap, StoreError> {
    let (total_cash, total_parent_balance) = ledger.method_totals(unit, filter)?;

    Ok(UnitRecap {
        unit,
        total_cash,
        total_parent_balance,
        available_cash: available_cash(ledger, unit)?,
        recent_disbursements: ledger.recent_disbursements(unit, RECAP_DISBURSEMENT_LIMIT)?,
        transactions: ledger.transactions_filtered(unit, filter, RECAP_TRANSACTION_LIMIT)?,
        distinct_descriptions: ledger.distinct_descriptions(unit)?,
    })
}
