// SQLite-backed ledger for unit payment recaps.
//
// Two append-only stores share the "unit" key: extracted payment
// transactions and manual cash disbursements. The transactions table carries
// the 5-tuple uniqueness constraint (unit, timestamp, student, description,
// amount) as the authoritative duplicate guard; the pre-commit checks in the
// dedup engine only exist to avoid round-trips and give an accurate count.
//
// All access goes through one connection behind a mutex, so a disbursement's
// balance check and insert run serialized inside a single immediate
// transaction. That is what upholds balance non-negativity under concurrent
// requests.

use crate::error::{DisbursementError, StoreError};
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, Type, ValueRef};
use rusqlite::{params, Connection, ToSql, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

// ============================================================================
// DOMAIN ENUMS
// ============================================================================

/// Organizational unit owning an independent cash ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    #[serde(rename = "SMP")]
    Smp,
    #[serde(rename = "SMA")]
    Sma,
    #[serde(rename = "MTS")]
    Mts,
}

impl Unit {
    pub const ALL: [Unit; 3] = [Unit::Smp, Unit::Sma, Unit::Mts];

    /// Code used in storage and user input
    pub fn code(&self) -> &'static str {
        match self {
            Unit::Smp => "SMP",
            Unit::Sma => "SMA",
            Unit::Mts => "MTS",
        }
    }

    pub fn from_code(code: &str) -> Option<Unit> {
        match code.trim().to_uppercase().as_str() {
            "SMP" => Some(Unit::Smp),
            "SMA" => Some(Unit::Sma),
            "MTS" => Some(Unit::Mts),
            _ => None,
        }
    }
}

impl ToSql for Unit {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.code().into())
    }
}

impl FromSql for Unit {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Unit::from_code(value.as_str()?).ok_or(FromSqlError::InvalidType)
    }
}

/// How a payment was made, as tagged in the statement's description column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    ParentBalance,
}

impl PaymentMethod {
    /// The literal token the statement embeds in the description cells.
    pub fn token(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "Cash",
            PaymentMethod::ParentBalance => "Saldo Ortu",
        }
    }
}

impl ToSql for PaymentMethod {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.token().into())
    }
}

impl FromSql for PaymentMethod {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "Cash" => Ok(PaymentMethod::Cash),
            "Saldo Ortu" => Ok(PaymentMethod::ParentBalance),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

// ============================================================================
// PERSISTED MODELS
// ============================================================================

/// One extracted payment record. Append-only; never updated or deleted by
/// the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub unit: Unit,
    /// Minute precision: seconds are always zero.
    pub happened_at: NaiveDateTime,
    pub student_name: String,
    /// Free text with the payment-method tokens already removed.
    pub description: String,
    pub method: PaymentMethod,
    pub amount: f64,
}

impl Transaction {
    /// Exact equality on the 5-tuple identity key. Method is NOT part of the
    /// key: the same payment extracted twice must collide even if a method
    /// tag was misread.
    pub fn same_identity(&self, other: &Transaction) -> bool {
        self.unit == other.unit
            && self.happened_at == other.happened_at
            && self.student_name == other.student_name
            && self.description == other.description
            && self.amount == other.amount
    }
}

/// A manual cash hand-off reducing a unit's available balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Disbursement {
    pub id: String,
    pub unit: Unit,
    pub amount: f64,
    pub note: Option<String>,
    pub issued_by: String,
    pub issued_at: NaiveDateTime,
}

/// Audit-trail entry, written in the same transaction as the change it
/// records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

/// Optional narrowing applied to recap transaction queries. Disbursement
/// totals are never filtered; only the transaction side is.
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    /// Inclusive start of the date range.
    pub start_date: Option<chrono::NaiveDate>,
    /// Inclusive end of the date range.
    pub end_date: Option<chrono::NaiveDate>,
    /// Exact-match description.
    pub description: Option<String>,
    /// Exact-match payment method.
    pub method: Option<PaymentMethod>,
}

// ============================================================================
// LEDGER
// ============================================================================

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn format_ts(dt: NaiveDateTime) -> String {
    dt.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_ts(col: usize, raw: &str) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map_err(|_| rusqlite::Error::InvalidColumnType(col, "timestamp".to_string(), Type::Text))
}

pub struct Ledger {
    conn: Mutex<Connection>,
}

impl Ledger {
    /// Open (or create) a ledger database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::setup(&conn)?;
        Ok(Ledger {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory ledger, used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::setup(&conn)?;
        Ok(Ledger {
            conn: Mutex::new(conn),
        })
    }

    fn setup(conn: &Connection) -> Result<(), StoreError> {
        // WAL mode for crash recovery
        conn.pragma_update(None, "journal_mode", "WAL")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                unit TEXT NOT NULL,
                happened_at TEXT NOT NULL,
                student_name TEXT NOT NULL,
                description TEXT NOT NULL,
                method TEXT NOT NULL,
                amount REAL NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(unit, happened_at, student_name, description, amount)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS disbursements (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                disbursement_uuid TEXT UNIQUE NOT NULL,
                unit TEXT NOT NULL,
                amount REAL NOT NULL,
                note TEXT,
                issued_by TEXT NOT NULL,
                issued_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id TEXT UNIQUE NOT NULL,
                timestamp TEXT NOT NULL,
                event_type TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                data TEXT NOT NULL,
                actor TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_transactions_unit ON transactions(unit)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_disbursements_unit ON disbursements(unit)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
            [],
        )?;

        Ok(())
    }

    // Recover the connection even if a previous holder panicked; the guard
    // only protects serialization, not data invariants.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ------------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------------

    /// Exact-match existence query on the 5-tuple identity key.
    pub fn transaction_exists(&self, tx: &Transaction) -> Result<bool, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT 1 FROM transactions
             WHERE unit = ?1 AND happened_at = ?2 AND student_name = ?3
               AND description = ?4 AND amount = ?5
             LIMIT 1",
        )?;

        let found = stmt
            .query_row(
                params![
                    tx.unit,
                    format_ts(tx.happened_at),
                    tx.student_name,
                    tx.description,
                    tx.amount,
                ],
                |_| Ok(()),
            )
            .map(|_| true);

        match found {
            Ok(v) => Ok(v),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist a whole ingestion batch in one transaction, plus an audit
    /// event. If any row trips the uniqueness constraint the entire batch is
    /// rolled back and `StoreError::UniqueViolation` is returned: zero
    /// records durably saved.
    pub fn insert_batch(&self, batch: &[Transaction], actor: &str) -> Result<usize, StoreError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;

        for record in batch {
            tx.execute(
                "INSERT INTO transactions (unit, happened_at, student_name, description, method, amount)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.unit,
                    format_ts(record.happened_at),
                    record.student_name,
                    record.description,
                    record.method,
                    record.amount,
                ],
            )?;
        }

        let unit = batch[0].unit;
        let total: f64 = batch.iter().map(|t| t.amount).sum();
        let event = Event::new(
            "batch_ingested",
            "unit",
            unit.code(),
            serde_json::json!({
                "inserted": batch.len(),
                "total_amount": total,
            }),
            actor,
        );
        insert_event(&tx, &event)?;

        tx.commit()?;
        Ok(batch.len())
    }

    pub fn transaction_count(&self) -> Result<i64, StoreError> {
        let count =
            self.conn()
                .query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Sum of all persisted transaction amounts for a unit, both methods
    /// combined.
    pub fn total_inflow(&self, unit: Unit) -> Result<f64, StoreError> {
        let total = self.conn().query_row(
            "SELECT COALESCE(SUM(amount), 0) FROM transactions WHERE unit = ?1",
            params![unit],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    /// Per-method sums over the filtered transaction set:
    /// (cash, parent balance).
    pub fn method_totals(
        &self,
        unit: Unit,
        filter: &TransactionFilter,
    ) -> Result<(f64, f64), StoreError> {
        let (clauses, owned) = filter_clauses(filter);
        let sql = format!(
            "SELECT method, COALESCE(SUM(amount), 0) FROM transactions
             WHERE unit = ?{clauses} GROUP BY method"
        );

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let mut sql_params: Vec<&dyn ToSql> = vec![&unit];
        for p in &owned {
            sql_params.push(p);
        }

        let mut total_cash = 0.0;
        let mut total_parent = 0.0;
        let rows = stmt.query_map(&sql_params[..], |row| {
            let method: PaymentMethod = row.get(0)?;
            let total: f64 = row.get(1)?;
            Ok((method, total))
        })?;

        for row in rows {
            let (method, total) = row?;
            match method {
                PaymentMethod::Cash => total_cash = total,
                PaymentMethod::ParentBalance => total_parent = total,
            }
        }

        Ok((total_cash, total_parent))
    }

    /// Most recent transactions matching the filter, newest first.
    pub fn transactions_filtered(
        &self,
        unit: Unit,
        filter: &TransactionFilter,
        limit: u32,
    ) -> Result<Vec<Transaction>, StoreError> {
        let (clauses, owned) = filter_clauses(filter);
        let sql = format!(
            "SELECT unit, happened_at, student_name, description, method, amount
             FROM transactions
             WHERE unit = ?{clauses}
             ORDER BY happened_at DESC
             LIMIT {limit}"
        );

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let mut sql_params: Vec<&dyn ToSql> = vec![&unit];
        for p in &owned {
            sql_params.push(p);
        }

        let transactions = stmt
            .query_map(&sql_params[..], |row| {
                let ts: String = row.get(1)?;
                Ok(Transaction {
                    unit: row.get(0)?,
                    happened_at: parse_ts(1, &ts)?,
                    student_name: row.get(2)?,
                    description: row.get(3)?,
                    method: row.get(4)?,
                    amount: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(transactions)
    }

    /// Distinct descriptions seen for a unit, ordered ascending.
    pub fn distinct_descriptions(&self, unit: Unit) -> Result<Vec<String>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT description FROM transactions
             WHERE unit = ?1 ORDER BY description",
        )?;

        let descriptions = stmt
            .query_map(params![unit], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(descriptions)
    }

    // ------------------------------------------------------------------------
    // Disbursements
    // ------------------------------------------------------------------------

    /// Sum of all recorded disbursements for a unit.
    pub fn total_disbursed(&self, unit: Unit) -> Result<f64, StoreError> {
        let total = self.conn().query_row(
            "SELECT COALESCE(SUM(amount), 0) FROM disbursements WHERE unit = ?1",
            params![unit],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    /// Record a disbursement, enforcing balance non-negativity.
    ///
    /// The balance is recomputed inside the same immediate transaction as
    /// the insert, so two concurrent requests for the same unit can never
    /// both pass the check.
    pub fn record_disbursement(
        &self,
        unit: Unit,
        amount: f64,
        note: Option<String>,
        actor: &str,
    ) -> Result<Disbursement, DisbursementError> {
        let mut conn = self.conn();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;

        let inflow: f64 = tx
            .query_row(
                "SELECT COALESCE(SUM(amount), 0) FROM transactions WHERE unit = ?1",
                params![unit],
                |row| row.get(0),
            )
            .map_err(StoreError::from)?;
        let disbursed: f64 = tx
            .query_row(
                "SELECT COALESCE(SUM(amount), 0) FROM disbursements WHERE unit = ?1",
                params![unit],
                |row| row.get(0),
            )
            .map_err(StoreError::from)?;

        let available = inflow - disbursed;
        if amount > available {
            return Err(DisbursementError::InsufficientFunds {
                requested: amount,
                available,
            });
        }

        let disbursement = Disbursement {
            id: uuid::Uuid::new_v4().to_string(),
            unit,
            amount,
            note,
            issued_by: actor.to_string(),
            issued_at: Local::now().naive_local(),
        };

        tx.execute(
            "INSERT INTO disbursements (disbursement_uuid, unit, amount, note, issued_by, issued_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                disbursement.id,
                disbursement.unit,
                disbursement.amount,
                disbursement.note,
                disbursement.issued_by,
                format_ts(disbursement.issued_at),
            ],
        )
        .map_err(StoreError::from)?;

        let event = Event::new(
            "disbursement_recorded",
            "unit",
            unit.code(),
            serde_json::json!({
                "disbursement_id": disbursement.id,
                "amount": amount,
                "available_before": available,
            }),
            actor,
        );
        insert_event(&tx, &event).map_err(DisbursementError::Store)?;

        tx.commit().map_err(StoreError::from)?;
        Ok(disbursement)
    }

    /// Most recent disbursements for a unit, newest first.
    pub fn recent_disbursements(
        &self,
        unit: Unit,
        limit: u32,
    ) -> Result<Vec<Disbursement>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT disbursement_uuid, unit, amount, note, issued_by, issued_at
             FROM disbursements
             WHERE unit = ?1
             ORDER BY issued_at DESC, id DESC
             LIMIT ?2",
        )?;

        let disbursements = stmt
            .query_map(params![unit, limit], |row| {
                let ts: String = row.get(5)?;
                Ok(Disbursement {
                    id: row.get(0)?,
                    unit: row.get(1)?,
                    amount: row.get(2)?,
                    note: row.get(3)?,
                    issued_by: row.get(4)?,
                    issued_at: parse_ts(5, &ts)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(disbursements)
    }

    // ------------------------------------------------------------------------
    // Audit trail
    // ------------------------------------------------------------------------

    pub fn events_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<Event>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
             FROM events
             WHERE entity_type = ?1 AND entity_id = ?2
             ORDER BY timestamp DESC, id DESC",
        )?;

        let events = stmt
            .query_map(params![entity_type, entity_id], |row| {
                let timestamp_str: String = row.get(1)?;
                let data_json: String = row.get(5)?;

                Ok(Event {
                    event_id: row.get(0)?,
                    timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                        .map_err(|_| {
                            rusqlite::Error::InvalidColumnType(
                                1,
                                "timestamp".to_string(),
                                Type::Text,
                            )
                        })?
                        .with_timezone(&Utc),
                    event_type: row.get(2)?,
                    entity_type: row.get(3)?,
                    entity_id: row.get(4)?,
                    data: serde_json::from_str(&data_json).map_err(|_| {
                        rusqlite::Error::InvalidColumnType(5, "data".to_string(), Type::Text)
                    })?,
                    actor: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(events)
    }
}

/// Insert an audit event inside an existing transaction.
fn insert_event(conn: &Connection, event: &Event) -> Result<(), StoreError> {
    let data_json = serde_json::to_string(&event.data)
        .map_err(|e| StoreError::Storage(rusqlite::Error::ToSqlConversionFailure(Box::new(e))))?;

    conn.execute(
        "INSERT INTO events (event_id, timestamp, event_type, entity_type, entity_id, data, actor)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Build the optional WHERE clauses for a transaction filter. Returns the
/// SQL fragment (appended after the mandatory unit clause) and the owned
/// parameter values in positional order.
fn filter_clauses(filter: &TransactionFilter) -> (String, Vec<String>) {
    let mut sql = String::new();
    let mut owned: Vec<String> = Vec::new();

    if let Some(start) = filter.start_date {
        owned.push(format!("{} 00:00:00", start.format("%Y-%m-%d")));
        sql.push_str(" AND happened_at >= ?");
    }
    if let Some(end) = filter.end_date {
        // Inclusive end: compare strictly below the next day's midnight
        let next = end.succ_opt().unwrap_or(end);
        owned.push(format!("{} 00:00:00", next.format("%Y-%m-%d")));
        sql.push_str(" AND happened_at < ?");
    }
    if let Some(description) = &filter.description {
        owned.push(description.clone());
        sql.push_str(" AND description = ?");
    }
    if let Some(method) = filter.method {
        owned.push(method.token().to_string());
        sql.push_str(" AND method = ?");
    }

    (sql, owned)
}

// ============================================================================
// TESTS
// ============================================================================
