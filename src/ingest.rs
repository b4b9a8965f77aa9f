// Ingestion orchestrator: drives an extracted document through the
// classifier and the dedup engine, then commits the surviving batch in one
// atomic store transaction.

use crate::classify::RowClassifier;
use crate::dedup::DeduplicationEngine;
use crate::document::ExtractedDocument;
use crate::error::StoreError;
use crate::ledger::{Ledger, Transaction, Unit};
use chrono::{Local, NaiveDateTime};

/// Outcome of one ingestion run. `accepted` is only durable once the commit
/// inside [`ingest`] has succeeded; on error nothing was persisted.
#[derive(Debug)]
pub struct IngestReport {
    pub accepted: Vec<Transaction>,
    pub duplicates: usize,
}

/// Scan every table of the document for the given unit: classify each data
/// row, drop duplicates (counted), accumulate the batch. Does not persist.
///
/// The first row of every table is assumed to be a header and is never
/// classified. Row order is preserved so the duplicate count is
/// deterministic.
pub fn scan_document(
    document: &ExtractedDocument,
    unit: Unit,
    ledger: &Ledger,
    now: NaiveDateTime,
) -> Result<IngestReport, StoreError> {
    let classifier = RowClassifier::new(unit);
    let dedup = DeduplicationEngine::new();

    let mut accepted: Vec<Transaction> = Vec::new();
    let mut duplicates = 0;

    for page in &document.pages {
        for table in &page.tables {
            // Structural header row, never data
            for row in table.rows.iter().skip(1) {
                let Some(candidate) = classifier.classify(row, now) else {
                    continue;
                };

                if dedup.is_duplicate(&candidate, &accepted, ledger)? {
                    duplicates += 1;
                    continue;
                }

                accepted.push(candidate);
            }
        }
    }

    Ok(IngestReport {
        accepted,
        duplicates,
    })
}

/// Full ingestion: scan, then commit the accepted batch atomically. A late
/// uniqueness violation (e.g. the same file ingested concurrently from two
/// sessions) rolls the whole batch back and surfaces as
/// `StoreError::UniqueViolation` with zero records saved.
pub fn ingest(
    document: &ExtractedDocument,
    unit: Unit,
    ledger: &Ledger,
    actor: &str,
) -> Result<IngestReport, StoreError> {
    let now = Local::now().naive_local();
    let report = scan_document(document, unit, ledger, now)?;
    ledger.insert_batch(&report.accepted, actor)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{ExtractedPage, ExtractedTable, Row};
    use crate::ledger::PaymentMethod;
    use chrono::NaiveDate;

    fn fixed_now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn data_row(no: &str, ts: &str, student: &str, desc: &str, method: &str, amount: &str) -> Row {
        vec![
            Some(no.to_string()),
            Some(ts.to_string()),
            Some(student.to_string()),
            Some(desc.to_string()),
            Some(method.to_string()),
            Some(amount.to_string()),
        ]
    }

    fn header_row() -> Row {
        ["NO", "TANGGAL", "SISWA", "KETERANGAN", "METODE", "JUMLAH"]
            .iter()
            .map(|s| Some(s.to_string()))
            .collect()
    }

    fn statement(rows: Vec<Row>) -> ExtractedDocument {
        let mut all = vec![header_row()];
        all.extend(rows);
        ExtractedDocument {
            pages: vec![ExtractedPage {
                tables: vec![ExtractedTable { rows: all }],
            }],
        }
    }

    #[test]
    fn test_three_rows_one_persisted_duplicate() {
        let ledger = Ledger::open_in_memory().unwrap();

        // Pre-persist the transaction that row 2 will duplicate
        ledger
            .insert_batch(
                &[Transaction {
                    unit: Unit::Smp,
                    happened_at: NaiveDate::from_ymd_opt(2024, 1, 5)
                        .unwrap()
                        .and_hms_opt(14, 37, 0)
                        .unwrap(),
                    student_name: "Budi".to_string(),
                    description: "Bayar SPP".to_string(),
                    method: PaymentMethod::Cash,
                    amount: 150000.0,
                }],
                "tester",
            )
            .unwrap();

        let doc = statement(vec![
            data_row("1", "05-01-2024 14:37", "Budi", "Bayar SPP", "Cash", "150.000"),
            data_row("2", "05-01-2024 15:02", "Siti", "Bayar Seragam", "Saldo Ortu", "275.500"),
            data_row("3", "06-01-2024 09:10", "Andi", "Bayar SPP", "Cash", "150.000"),
        ]);

        let report = ingest(&doc, Unit::Smp, &ledger, "tester").unwrap();
        assert_eq!(report.accepted.len(), 2);
        assert_eq!(report.duplicates, 1);
        // 1 pre-existing + 2 new
        assert_eq!(ledger.transaction_count().unwrap(), 3);
    }

    #[test]
    fn test_reingest_is_idempotent() {
        let ledger = Ledger::open_in_memory().unwrap();
        let doc = statement(vec![
            data_row("1", "05-01-2024 14:37", "Budi", "Bayar SPP", "Cash", "150.000"),
            data_row("2", "05-01-2024 15:02", "Siti", "Bayar Seragam", "Saldo Ortu", "275.500"),
        ]);

        let first = ingest(&doc, Unit::Smp, &ledger, "tester").unwrap();
        assert_eq!(first.accepted.len(), 2);
        assert_eq!(first.duplicates, 0);

        let second = ingest(&doc, Unit::Smp, &ledger, "tester").unwrap();
        assert_eq!(second.accepted.len(), 0);
        assert_eq!(second.duplicates, 2);
        assert_eq!(ledger.transaction_count().unwrap(), 2);
    }

    #[test]
    fn test_duplicate_within_single_document() {
        let ledger = Ledger::open_in_memory().unwrap();
        let doc = statement(vec![
            data_row("1", "05-01-2024 14:37", "Budi", "Bayar SPP", "Cash", "150.000"),
            data_row("2", "05-01-2024 14:37", "Budi", "Bayar SPP", "Cash", "150.000"),
        ]);

        let report = ingest(&doc, Unit::Smp, &ledger, "tester").unwrap();
        assert_eq!(report.accepted.len(), 1);
        assert_eq!(report.duplicates, 1);
    }

    #[test]
    fn test_noise_rows_skipped_without_counting() {
        let ledger = Ledger::open_in_memory().unwrap();
        let doc = statement(vec![
            data_row("1", "05-01-2024 14:37", "Budi", "Bayar SPP", "Cash", "150.000"),
            // footer
            vec![None, None, None, None, None, Some("JUMLAH".to_string())],
            // unknown method
            data_row("2", "05-01-2024 15:00", "Siti", "Bayar SPP", "Transfer", "150.000"),
            // missing student
            vec![
                Some("3".to_string()),
                Some("05-01-2024 15:10".to_string()),
                None,
                Some("Bayar SPP".to_string()),
                Some("Cash".to_string()),
                Some("150.000".to_string()),
            ],
        ]);

        let report = ingest(&doc, Unit::Smp, &ledger, "tester").unwrap();
        assert_eq!(report.accepted.len(), 1);
        // Skips are not duplicates
        assert_eq!(report.duplicates, 0);
    }

    #[test]
    fn test_same_rows_different_units_both_accepted() {
        let ledger = Ledger::open_in_memory().unwrap();
        let doc = statement(vec![data_row(
            "1",
            "05-01-2024 14:37",
            "Budi",
            "Bayar SPP",
            "Cash",
            "150.000",
        )]);

        let smp = ingest(&doc, Unit::Smp, &ledger, "tester").unwrap();
        let sma = ingest(&doc, Unit::Sma, &ledger, "tester").unwrap();

        // Unit is part of the identity key, so this is not a duplicate
        assert_eq!(smp.accepted.len(), 1);
        assert_eq!(sma.accepted.len(), 1);
        assert_eq!(sma.duplicates, 0);
        assert_eq!(ledger.transaction_count().unwrap(), 2);
    }

    #[test]
    fn test_tables_with_only_header_yield_nothing() {
        let ledger = Ledger::open_in_memory().unwrap();
        let doc = ExtractedDocument {
            pages: vec![
                ExtractedPage {
                    tables: vec![ExtractedTable {
                        rows: vec![header_row()],
                    }],
                },
                ExtractedPage { tables: vec![] },
            ],
        };

        let report = scan_document(&doc, Unit::Smp, &ledger, fixed_now()).unwrap();
        assert!(report.accepted.is_empty());
        assert_eq!(report.duplicates, 0);
    }
}
