use anyhow::{bail, Context, Result};
use std::env;
use std::path::{Path, PathBuf};

use rekap_kas::{
    ingest, request_disbursement, unit_recap, ExtractedDocument, Ledger, StoreError,
    TransactionFilter, Unit,
};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("ingest") => run_ingest(&args[2..]),
        Some("disburse") => run_disburse(&args[2..]),
        Some("recap") => run_recap(&args[2..]),
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn print_usage() {
    println!("rekap-kas {}", rekap_kas::VERSION);
    println!();
    println!("Usage:");
    println!("  rekap-kas ingest <extracted.json> <unit>");
    println!("  rekap-kas disburse <unit> <amount> [note]");
    println!("  rekap-kas recap <unit> [start YYYY-MM-DD] [end YYYY-MM-DD]");
    println!();
    println!("Units: SMP, SMA, MTS");
    println!("Database path comes from REKAP_DB (default: rekap.db)");
}

fn db_path() -> PathBuf {
    env::var("REKAP_DB")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("rekap.db"))
}

fn actor() -> String {
    env::var("USER").unwrap_or_else(|_| "operator".to_string())
}

fn parse_unit(raw: &str) -> Result<Unit> {
    Unit::from_code(raw).with_context(|| {
        let codes: Vec<&str> = Unit::ALL.iter().map(|u| u.code()).collect();
        format!("Unknown unit '{}' (expected one of: {})", raw, codes.join(", "))
    })
}

fn run_ingest(args: &[String]) -> Result<()> {
    let [doc_path, unit_raw] = args else {
        bail!("Usage: rekap-kas ingest <extracted.json> <unit>");
    };
    let unit = parse_unit(unit_raw)?;
    let path = Path::new(doc_path);

    let ledger = Ledger::open(&db_path())?;
    let document = ExtractedDocument::load(path)?;

    let result = ingest(&document, unit, &ledger, &actor());

    // The extracted dump is transient input; discard it whether or not the
    // commit succeeded
    if let Err(e) = std::fs::remove_file(path) {
        eprintln!("Warning: could not remove {}: {}", path.display(), e);
    }

    match result {
        Ok(report) => {
            println!(
                "✓ {} transactions saved for unit {}",
                report.accepted.len(),
                unit.code()
            );
            if report.duplicates > 0 {
                println!("✓ {} duplicates ignored", report.duplicates);
            }
            Ok(())
        }
        Err(StoreError::UniqueViolation) => {
            bail!(
                "Commit rejected: the database found duplicate transactions. \
                 Nothing from this batch was saved."
            )
        }
        Err(e) => Err(e.into()),
    }
}

fn run_disburse(args: &[String]) -> Result<()> {
    let (unit_raw, amount_raw, note) = match args {
        [u, a] => (u, a, None),
        [u, a, n] => (u, a, Some(n.clone())),
        _ => bail!("Usage: rekap-kas disburse <unit> <amount> [note]"),
    };
    let unit = parse_unit(unit_raw)?;
    let amount = rekap_kas::parse_amount(amount_raw);

    let ledger = Ledger::open(&db_path())?;
    let disbursement = request_disbursement(&ledger, unit, amount, note, &actor())?;

    println!(
        "✓ Disbursement of {:.2} recorded for unit {} (id {})",
        disbursement.amount,
        unit.code(),
        disbursement.id
    );
    Ok(())
}

fn run_recap(args: &[String]) -> Result<()> {
    let Some(unit_raw) = args.first() else {
        bail!("Usage: rekap-kas recap <unit> [start YYYY-MM-DD] [end YYYY-MM-DD]");
    };
    let unit = parse_unit(unit_raw)?;

    let parse_date = |raw: &String| {
        chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .with_context(|| format!("Invalid date '{}' (expected YYYY-MM-DD)", raw))
    };
    let filter = TransactionFilter {
        start_date: args.get(1).map(parse_date).transpose()?,
        end_date: args.get(2).map(parse_date).transpose()?,
        ..Default::default()
    };

    let ledger = Ledger::open(&db_path())?;
    let recap = unit_recap(&ledger, unit, &filter)?;

    println!("Recap for unit {}", unit.code());
    println!("  Total Cash:         {:.2}", recap.total_cash);
    println!("  Total Saldo Ortu:   {:.2}", recap.total_parent_balance);
    println!("  Available cash:     {:.2}", recap.available_cash);

    if !recap.recent_disbursements.is_empty() {
        println!("\nRecent disbursements:");
        for d in &recap.recent_disbursements {
            println!(
                "  {} {:>14.2}  {}  {}",
                d.issued_at.format("%Y-%m-%d %H:%M"),
                d.amount,
                d.issued_by,
                d.note.as_deref().unwrap_or("-")
            );
        }
    }

    if !recap.transactions.is_empty() {
        println!("\nTransactions ({} shown):", recap.transactions.len());
        for t in &recap.transactions {
            println!(
                "  {} {:>14.2}  {:<10}  {}  ({})",
                t.happened_at.format("%Y-%m-%d %H:%M"),
                t.amount,
                t.method.token(),
                t.student_name,
                t.description
            );
        }
    }

    Ok(())
}
