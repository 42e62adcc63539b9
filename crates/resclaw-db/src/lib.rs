//! SQLite persistence for Resclaw.
//!
//! Single-file database holding areas, customers, reservation slots, and
//! reservation attempts. The connection sits behind a `Mutex` so the axum
//! handlers, the scheduler timers, and the callback consumer can share one
//! handle; SQLite serializes row updates underneath, and the callback path
//! uses an explicit transaction so the customer + attempt mutation commits
//! as a unit.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::Mutex;

use resclaw_core::types::{
    Area, Customer, ReservationAttempt, ReservationSlot, ReservationStatus,
};

/// Resclaw database — owns every long-lived record.
pub struct ReservationDb {
    conn: Mutex<Connection>,
}

/// Result of applying an external callback.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    /// No customer carries the given national id; nothing was changed.
    CustomerNotFound,
    /// Status applied. `attempt_id` is the resolved attempt, or None when
    /// no unresolved attempt existed (status update still committed).
    Applied {
        customer_id: i64,
        attempt_id: Option<i64>,
    },
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_ts_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc))
}

fn row_to_area(row: &rusqlite::Row) -> rusqlite::Result<Area> {
    Ok(Area {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        link: row.get(3)?,
        is_active: row.get::<_, i32>(4)? != 0,
        created_at: parse_ts(&row.get::<_, String>(5)?),
        updated_at: parse_ts(&row.get::<_, String>(6)?),
    })
}

fn row_to_customer(row: &rusqlite::Row) -> rusqlite::Result<Customer> {
    Ok(Customer {
        id: row.get(0)?,
        name: row.get(1)?,
        phone_number: row.get(2)?,
        national_id: row.get(3)?,
        area_id: row.get(4)?,
        reservation_status: ReservationStatus::parse(&row.get::<_, String>(5)?),
        created_at: parse_ts(&row.get::<_, String>(6)?),
        updated_at: parse_ts(&row.get::<_, String>(7)?),
    })
}

fn row_to_slot(row: &rusqlite::Row) -> rusqlite::Result<ReservationSlot> {
    Ok(ReservationSlot {
        id: row.get(0)?,
        area_id: row.get(1)?,
        scheduled_datetime: parse_ts(&row.get::<_, String>(2)?),
        is_processed: row.get::<_, i32>(3)? != 0,
        created_at: parse_ts(&row.get::<_, String>(4)?),
        updated_at: parse_ts(&row.get::<_, String>(5)?),
    })
}

fn row_to_attempt(row: &rusqlite::Row) -> rusqlite::Result<ReservationAttempt> {
    let request_payload: Option<String> = row.get(4)?;
    let response_payload: Option<String> = row.get(9)?;
    Ok(ReservationAttempt {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        reservation_slot_id: row.get(2)?,
        request_sent_at: parse_ts_opt(row.get(3)?),
        request_payload: request_payload.and_then(|s| serde_json::from_str(&s).ok()),
        response_received_at: parse_ts_opt(row.get(5)?),
        response_status: row
            .get::<_, Option<String>>(6)?
            .map(|s| ReservationStatus::parse(&s)),
        response_code: row.get(7)?,
        response_message: row.get(8)?,
        response_payload: response_payload.and_then(|s| serde_json::from_str(&s).ok()),
        created_at: parse_ts(&row.get::<_, String>(10)?),
        updated_at: parse_ts(&row.get::<_, String>(11)?),
    })
}

const ATTEMPT_COLS: &str = "id, customer_id, reservation_slot_id, request_sent_at, \
     request_payload, response_received_at, response_status, response_code, \
     response_message, response_payload, created_at, updated_at";

impl ReservationDb {
    /// Open or create the database. Pass `:memory:` for tests.
    pub fn open(path: &Path) -> Result<Self, String> {
        let conn = Connection::open(path).map_err(|e| format!("DB open: {e}"))?;

        // WAL for concurrent reads while timers and handlers write
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .ok();

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| format!("Lock: {e}"))?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS areas (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL DEFAULT '',
                link TEXT NOT NULL DEFAULT '',
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS customers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                phone_number TEXT NOT NULL,
                national_id TEXT NOT NULL UNIQUE,
                area_id INTEGER NOT NULL REFERENCES areas(id) ON DELETE CASCADE,
                reservation_status TEXT NOT NULL DEFAULT 'OPEN',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS reservation_slots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                area_id INTEGER NOT NULL REFERENCES areas(id) ON DELETE CASCADE,
                scheduled_datetime TEXT NOT NULL,
                is_processed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS reservation_attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                customer_id INTEGER NOT NULL REFERENCES customers(id) ON DELETE CASCADE,
                reservation_slot_id INTEGER NOT NULL REFERENCES reservation_slots(id) ON DELETE CASCADE,
                request_sent_at TEXT,
                request_payload TEXT,
                response_received_at TEXT,
                response_status TEXT,
                response_code INTEGER,
                response_message TEXT,
                response_payload TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_customers_area_status
                ON customers(area_id, reservation_status);
            CREATE INDEX IF NOT EXISTS idx_attempts_customer
                ON reservation_attempts(customer_id, response_received_at);
            ",
        )
        .map_err(|e| format!("Migration: {e}"))?;
        Ok(())
    }

    // ── Areas ──────────────────────────────

    /// Create an area.
    pub fn create_area(&self, name: &str, description: &str, link: &str) -> Result<Area, String> {
        let conn = self.conn.lock().map_err(|e| format!("Lock: {e}"))?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO areas (name, description, link, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![name, description, link, now],
        )
        .map_err(|e| format!("Create area: {e}"))?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_area(id)?
            .ok_or_else(|| "Create area: row vanished".to_string())
    }

    /// Get a single area.
    pub fn get_area(&self, id: i64) -> Result<Option<Area>, String> {
        let conn = self.conn.lock().map_err(|e| format!("Lock: {e}"))?;
        match conn.query_row(
            "SELECT id, name, description, link, is_active, created_at, updated_at
             FROM areas WHERE id=?1",
            params![id],
            row_to_area,
        ) {
            Ok(a) => Ok(Some(a)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(format!("Get area: {e}")),
        }
    }

    /// List all areas.
    pub fn list_areas(&self) -> Result<Vec<Area>, String> {
        let conn = self.conn.lock().map_err(|e| format!("Lock: {e}"))?;
        let mut stmt = conn
            .prepare(
                "SELECT id, name, description, link, is_active, created_at, updated_at
                 FROM areas ORDER BY name",
            )
            .map_err(|e| format!("Prepare: {e}"))?;
        let areas = stmt
            .query_map([], row_to_area)
            .map_err(|e| format!("Query: {e}"))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(areas)
    }

    /// Update an area.
    pub fn update_area(
        &self,
        id: i64,
        name: &str,
        description: &str,
        link: &str,
        is_active: bool,
    ) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| format!("Lock: {e}"))?;
        conn.execute(
            "UPDATE areas SET name=?1, description=?2, link=?3, is_active=?4, updated_at=?5
             WHERE id=?6",
            params![name, description, link, is_active as i32, Utc::now().to_rfc3339(), id],
        )
        .map_err(|e| format!("Update area: {e}"))?;
        Ok(())
    }

    /// Delete an area (cascades to its customers and slots).
    pub fn delete_area(&self, id: i64) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| format!("Lock: {e}"))?;
        conn.execute("DELETE FROM areas WHERE id=?1", params![id])
            .map_err(|e| format!("Delete area: {e}"))?;
        Ok(())
    }

    // ── Customers ──────────────────────────────

    /// Create a customer (status starts OPEN).
    pub fn create_customer(
        &self,
        name: &str,
        phone_number: &str,
        national_id: &str,
        area_id: i64,
    ) -> Result<Customer, String> {
        let conn = self.conn.lock().map_err(|e| format!("Lock: {e}"))?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO customers (name, phone_number, national_id, area_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![name, phone_number, national_id, area_id, now],
        )
        .map_err(|e| format!("Create customer: {e}"))?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_customer(id)?
            .ok_or_else(|| "Create customer: row vanished".to_string())
    }

    /// Get a customer by id.
    pub fn get_customer(&self, id: i64) -> Result<Option<Customer>, String> {
        let conn = self.conn.lock().map_err(|e| format!("Lock: {e}"))?;
        match conn.query_row(
            "SELECT id, name, phone_number, national_id, area_id, reservation_status,
                    created_at, updated_at
             FROM customers WHERE id=?1",
            params![id],
            row_to_customer,
        ) {
            Ok(c) => Ok(Some(c)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(format!("Get customer: {e}")),
        }
    }

    /// Get a customer by the stable external key.
    pub fn get_customer_by_national_id(&self, national_id: &str) -> Result<Option<Customer>, String> {
        let conn = self.conn.lock().map_err(|e| format!("Lock: {e}"))?;
        match conn.query_row(
            "SELECT id, name, phone_number, national_id, area_id, reservation_status,
                    created_at, updated_at
             FROM customers WHERE national_id=?1",
            params![national_id],
            row_to_customer,
        ) {
            Ok(c) => Ok(Some(c)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(format!("Get customer: {e}")),
        }
    }

    /// List customers, optionally filtered by area and/or status.
    pub fn list_customers(
        &self,
        area_id: Option<i64>,
        status: Option<ReservationStatus>,
    ) -> Result<Vec<Customer>, String> {
        let conn = self.conn.lock().map_err(|e| format!("Lock: {e}"))?;
        let mut stmt = conn
            .prepare(
                "SELECT id, name, phone_number, national_id, area_id, reservation_status,
                        created_at, updated_at
                 FROM customers
                 WHERE (?1 IS NULL OR area_id = ?1)
                   AND (?2 IS NULL OR reservation_status = ?2)
                 ORDER BY id",
            )
            .map_err(|e| format!("Prepare: {e}"))?;
        let customers = stmt
            .query_map(params![area_id, status.map(|s| s.as_str())], row_to_customer)
            .map_err(|e| format!("Query: {e}"))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(customers)
    }

    /// OPEN customers in one area — the dispatch routine's eligibility scan.
    pub fn open_customers_in_area(&self, area_id: i64) -> Result<Vec<Customer>, String> {
        self.list_customers(Some(area_id), Some(ReservationStatus::Open))
    }

    /// Update customer contact fields.
    pub fn update_customer(
        &self,
        id: i64,
        name: &str,
        phone_number: &str,
        area_id: i64,
    ) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| format!("Lock: {e}"))?;
        conn.execute(
            "UPDATE customers SET name=?1, phone_number=?2, area_id=?3, updated_at=?4 WHERE id=?5",
            params![name, phone_number, area_id, Utc::now().to_rfc3339(), id],
        )
        .map_err(|e| format!("Update customer: {e}"))?;
        Ok(())
    }

    /// Delete a customer (cascades to its attempts).
    pub fn delete_customer(&self, id: i64) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| format!("Lock: {e}"))?;
        conn.execute("DELETE FROM customers WHERE id=?1", params![id])
            .map_err(|e| format!("Delete customer: {e}"))?;
        Ok(())
    }

    // ── Reservation slots ──────────────────────────────

    /// Create a slot.
    pub fn create_slot(&self, area_id: i64, at: DateTime<Utc>) -> Result<ReservationSlot, String> {
        let conn = self.conn.lock().map_err(|e| format!("Lock: {e}"))?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO reservation_slots (area_id, scheduled_datetime, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)",
            params![area_id, at.to_rfc3339(), now],
        )
        .map_err(|e| format!("Create slot: {e}"))?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_slot(id)?
            .ok_or_else(|| "Create slot: row vanished".to_string())
    }

    /// Get a slot by id.
    pub fn get_slot(&self, id: i64) -> Result<Option<ReservationSlot>, String> {
        let conn = self.conn.lock().map_err(|e| format!("Lock: {e}"))?;
        match conn.query_row(
            "SELECT id, area_id, scheduled_datetime, is_processed, created_at, updated_at
             FROM reservation_slots WHERE id=?1",
            params![id],
            row_to_slot,
        ) {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(format!("Get slot: {e}")),
        }
    }

    /// List slots, optionally filtered by area and processed flag.
    pub fn list_slots(
        &self,
        area_id: Option<i64>,
        is_processed: Option<bool>,
    ) -> Result<Vec<ReservationSlot>, String> {
        let conn = self.conn.lock().map_err(|e| format!("Lock: {e}"))?;
        let mut stmt = conn
            .prepare(
                "SELECT id, area_id, scheduled_datetime, is_processed, created_at, updated_at
                 FROM reservation_slots
                 WHERE (?1 IS NULL OR area_id = ?1)
                   AND (?2 IS NULL OR is_processed = ?2)
                 ORDER BY scheduled_datetime DESC",
            )
            .map_err(|e| format!("Prepare: {e}"))?;
        let slots = stmt
            .query_map(params![area_id, is_processed.map(|b| b as i32)], row_to_slot)
            .map_err(|e| format!("Query: {e}"))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(slots)
    }

    /// All slots not yet processed — what `recover_pending` re-arms.
    pub fn pending_slots(&self) -> Result<Vec<ReservationSlot>, String> {
        self.list_slots(None, Some(false))
    }

    /// Move a slot to a new instant.
    pub fn update_slot_datetime(&self, id: i64, at: DateTime<Utc>) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| format!("Lock: {e}"))?;
        conn.execute(
            "UPDATE reservation_slots SET scheduled_datetime=?1, updated_at=?2 WHERE id=?3",
            params![at.to_rfc3339(), Utc::now().to_rfc3339(), id],
        )
        .map_err(|e| format!("Update slot: {e}"))?;
        Ok(())
    }

    /// Mark a slot processed. Irreversible.
    pub fn mark_slot_processed(&self, id: i64) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| format!("Lock: {e}"))?;
        conn.execute(
            "UPDATE reservation_slots SET is_processed=1, updated_at=?1 WHERE id=?2",
            params![Utc::now().to_rfc3339(), id],
        )
        .map_err(|e| format!("Mark slot processed: {e}"))?;
        Ok(())
    }

    /// Delete a slot (cascades to its attempts).
    pub fn delete_slot(&self, id: i64) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| format!("Lock: {e}"))?;
        conn.execute("DELETE FROM reservation_slots WHERE id=?1", params![id])
            .map_err(|e| format!("Delete slot: {e}"))?;
        Ok(())
    }

    // ── Reservation attempts ──────────────────────────────

    /// Record the outbound half of a dispatch attempt.
    pub fn create_attempt(
        &self,
        customer_id: i64,
        slot_id: i64,
        request_payload: &serde_json::Value,
    ) -> Result<ReservationAttempt, String> {
        let conn = self.conn.lock().map_err(|e| format!("Lock: {e}"))?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO reservation_attempts
                 (customer_id, reservation_slot_id, request_sent_at, request_payload,
                  created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?3, ?3)",
            params![customer_id, slot_id, now, request_payload.to_string()],
        )
        .map_err(|e| format!("Create attempt: {e}"))?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_attempt(id)?
            .ok_or_else(|| "Create attempt: row vanished".to_string())
    }

    /// Get an attempt by id.
    pub fn get_attempt(&self, id: i64) -> Result<Option<ReservationAttempt>, String> {
        let conn = self.conn.lock().map_err(|e| format!("Lock: {e}"))?;
        match conn.query_row(
            &format!("SELECT {ATTEMPT_COLS} FROM reservation_attempts WHERE id=?1"),
            params![id],
            row_to_attempt,
        ) {
            Ok(a) => Ok(Some(a)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(format!("Get attempt: {e}")),
        }
    }

    /// List attempts, optionally filtered by customer and/or slot.
    pub fn list_attempts(
        &self,
        customer_id: Option<i64>,
        slot_id: Option<i64>,
    ) -> Result<Vec<ReservationAttempt>, String> {
        let conn = self.conn.lock().map_err(|e| format!("Lock: {e}"))?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ATTEMPT_COLS} FROM reservation_attempts
                 WHERE (?1 IS NULL OR customer_id = ?1)
                   AND (?2 IS NULL OR reservation_slot_id = ?2)
                 ORDER BY created_at DESC, id DESC"
            ))
            .map_err(|e| format!("Prepare: {e}"))?;
        let attempts = stmt
            .query_map(params![customer_id, slot_id], row_to_attempt)
            .map_err(|e| format!("Query: {e}"))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(attempts)
    }

    /// Most recently created attempt for a customer that has no inbound
    /// result yet, across all slots.
    pub fn latest_unresolved_attempt(
        &self,
        customer_id: i64,
    ) -> Result<Option<ReservationAttempt>, String> {
        let conn = self.conn.lock().map_err(|e| format!("Lock: {e}"))?;
        match conn.query_row(
            &format!(
                "SELECT {ATTEMPT_COLS} FROM reservation_attempts
                 WHERE customer_id=?1 AND response_received_at IS NULL
                 ORDER BY created_at DESC, id DESC LIMIT 1"
            ),
            params![customer_id],
            row_to_attempt,
        ) {
            Ok(a) => Ok(Some(a)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(format!("Latest unresolved attempt: {e}")),
        }
    }

    /// Store the synchronous transport acknowledgement on an attempt.
    /// The authoritative result arrives later through the callback.
    pub fn set_attempt_ack(&self, id: i64, data: &serde_json::Value) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| format!("Lock: {e}"))?;
        conn.execute(
            "UPDATE reservation_attempts SET response_payload=?1, updated_at=?2 WHERE id=?3",
            params![data.to_string(), Utc::now().to_rfc3339(), id],
        )
        .map_err(|e| format!("Set attempt ack: {e}"))?;
        Ok(())
    }

    // ── Callback reconciliation ──────────────────────────────

    /// Apply an external status callback: update the customer's status and
    /// resolve the correlated attempt in one transaction. Either both
    /// mutations commit or neither does.
    ///
    /// Correlation: when `attempt_id` names an unresolved attempt of this
    /// customer, that entry is resolved; otherwise the most recently created
    /// unresolved attempt is used. The message is stored byte-for-byte.
    pub fn apply_callback(
        &self,
        national_id: &str,
        status: ReservationStatus,
        response_code: i64,
        message: &str,
        additional_data: &serde_json::Value,
        attempt_id: Option<i64>,
    ) -> Result<CallbackOutcome, String> {
        let mut conn = self.conn.lock().map_err(|e| format!("Lock: {e}"))?;
        let tx = conn
            .transaction()
            .map_err(|e| format!("Callback tx: {e}"))?;

        let customer_id: i64 = match tx.query_row(
            "SELECT id FROM customers WHERE national_id=?1",
            params![national_id],
            |row| row.get(0),
        ) {
            Ok(id) => id,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Ok(CallbackOutcome::CustomerNotFound);
            }
            Err(e) => return Err(format!("Callback lookup: {e}")),
        };

        let now = Utc::now();
        tx.execute(
            "UPDATE customers SET reservation_status=?1, updated_at=?2 WHERE id=?3",
            params![status.as_str(), now.to_rfc3339(), customer_id],
        )
        .map_err(|e| format!("Callback customer update: {e}"))?;

        let target: Option<i64> = match attempt_id {
            Some(id) => match tx.query_row(
                "SELECT id FROM reservation_attempts
                 WHERE id=?1 AND customer_id=?2 AND response_received_at IS NULL",
                params![id, customer_id],
                |row| row.get(0),
            ) {
                Ok(id) => Some(id),
                Err(rusqlite::Error::QueryReturnedNoRows) => None,
                Err(e) => return Err(format!("Callback attempt lookup: {e}")),
            },
            None => match tx.query_row(
                "SELECT id FROM reservation_attempts
                 WHERE customer_id=?1 AND response_received_at IS NULL
                 ORDER BY created_at DESC, id DESC LIMIT 1",
                params![customer_id],
                |row| row.get(0),
            ) {
                Ok(id) => Some(id),
                Err(rusqlite::Error::QueryReturnedNoRows) => None,
                Err(e) => return Err(format!("Callback attempt lookup: {e}")),
            },
        };

        if let Some(aid) = target {
            let response_payload = serde_json::json!({
                "status": status.as_str(),
                "code": response_code,
                "message": message,
                "additional_data": additional_data,
                "timestamp": now.to_rfc3339(),
            });
            tx.execute(
                "UPDATE reservation_attempts
                 SET response_received_at=?1, response_status=?2, response_code=?3,
                     response_message=?4, response_payload=?5, updated_at=?1
                 WHERE id=?6",
                params![
                    now.to_rfc3339(),
                    status.as_str(),
                    response_code,
                    message,
                    response_payload.to_string(),
                    aid
                ],
            )
            .map_err(|e| format!("Callback attempt update: {e}"))?;
        }

        tx.commit().map_err(|e| format!("Callback commit: {e}"))?;
        Ok(CallbackOutcome::Applied {
            customer_id,
            attempt_id: target,
        })
    }

    // ── Stats ──────────────────────────────

    /// Aggregated counts for the dashboard.
    pub fn stats(&self) -> Result<serde_json::Value, String> {
        let conn = self.conn.lock().map_err(|e| format!("Lock: {e}"))?;

        let count = |sql: &str| -> Result<i64, String> {
            conn.query_row(sql, [], |row| row.get(0))
                .map_err(|e| format!("Stats: {e}"))
        };

        let total = count("SELECT COUNT(*) FROM customers")?;
        let open = count("SELECT COUNT(*) FROM customers WHERE reservation_status='OPEN'")?;
        let success = count("SELECT COUNT(*) FROM customers WHERE reservation_status='SUCCESS'")?;
        let failed = count("SELECT COUNT(*) FROM customers WHERE reservation_status='FAILED'")?;
        let pending_slots = count("SELECT COUNT(*) FROM reservation_slots WHERE is_processed=0")?;
        let processed_slots = count("SELECT COUNT(*) FROM reservation_slots WHERE is_processed=1")?;
        let attempts = count("SELECT COUNT(*) FROM reservation_attempts")?;
        let resolved =
            count("SELECT COUNT(*) FROM reservation_attempts WHERE response_received_at IS NOT NULL")?;

        let success_rate = if total > 0 {
            success as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        let mut stmt = conn
            .prepare(
                "SELECT a.id, a.name,
                        COUNT(c.id),
                        SUM(CASE WHEN c.reservation_status='OPEN' THEN 1 ELSE 0 END),
                        SUM(CASE WHEN c.reservation_status='SUCCESS' THEN 1 ELSE 0 END),
                        SUM(CASE WHEN c.reservation_status='FAILED' THEN 1 ELSE 0 END)
                 FROM areas a LEFT JOIN customers c ON c.area_id = a.id
                 GROUP BY a.id, a.name ORDER BY a.name",
            )
            .map_err(|e| format!("Prepare: {e}"))?;
        let by_area: Vec<serde_json::Value> = stmt
            .query_map([], |row| {
                Ok(serde_json::json!({
                    "area_id": row.get::<_, i64>(0)?,
                    "area_name": row.get::<_, String>(1)?,
                    "customers": row.get::<_, i64>(2)?,
                    "open": row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                    "success": row.get::<_, Option<i64>>(4)?.unwrap_or(0),
                    "failed": row.get::<_, Option<i64>>(5)?.unwrap_or(0),
                }))
            })
            .map_err(|e| format!("Query: {e}"))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(serde_json::json!({
            "customers": { "total": total, "open": open, "success": success, "failed": failed },
            "success_rate": success_rate,
            "slots": { "pending": pending_slots, "processed": processed_slots },
            "attempts": { "total": attempts, "resolved": resolved },
            "by_area": by_area,
        }))
    }
}
