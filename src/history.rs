// =============================================================================
// History Store — append-only trade event log with CSV and SQLite sinks
// =============================================================================
//
// Every event is written to both sinks. The CSV is the authoritative
// archive: append-only, never rewritten. SQLite is the query index: same
// columns plus an autoincrement id, indexed on timestamp and position_id,
// trimmed to a 24-hour retention window on open.
//
// Sink failures are logged and never propagated; losing a history write
// must not fail the trade that produced it.
//
// The event log is also the durable source of truth for positions: on
// restart a position is reconstructed by folding its event stream.
// =============================================================================

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde_json::json;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::position::{Position, PositionStatus};
use crate::types::{OrderSide, OrderStatus, Scenario};

/// Pseudo position id used for account-level alerts with no real position.
pub const ALERT_POSITION_ID: &str = "ALERT";

/// Hours of data kept in the SQLite index.
const RETENTION_HOURS: i64 = 24;

/// Fixed CSV column order. The header is written exactly once per file.
const CSV_HEADER: &str = "timestamp,event_type,position_id,scenario,exchange_a,exchange_b,\
symbol_a,symbol_b,order_type,side,quantity,price,pnl,status,error_message,metadata";

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS trades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    event_type TEXT NOT NULL,
    position_id TEXT,
    scenario TEXT,
    exchange_a TEXT,
    exchange_b TEXT,
    symbol_a TEXT,
    symbol_b TEXT,
    order_type TEXT,
    side TEXT,
    quantity REAL,
    price REAL,
    pnl REAL,
    status TEXT,
    error_message TEXT,
    metadata TEXT
);
CREATE INDEX IF NOT EXISTS idx_timestamp ON trades(timestamp);
CREATE INDEX IF NOT EXISTS idx_position_id ON trades(position_id);
";

/// Lifecycle event types, in the WHERE-clause form used by queries.
const LIFECYCLE_EVENTS_SQL: &str =
    "('position_created','position_opened','position_closed','position_error')";

// =============================================================================
// Events
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    PositionCreated,
    PositionOpened,
    PositionClosed,
    PositionError,
    OrderPlaced,
    OrderCancelled,
    OrderRollback,
    OrderFailed,
    InsufficientBalance,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PositionCreated => "position_created",
            Self::PositionOpened => "position_opened",
            Self::PositionClosed => "position_closed",
            Self::PositionError => "position_error",
            Self::OrderPlaced => "order_placed",
            Self::OrderCancelled => "order_cancelled",
            Self::OrderRollback => "order_rollback",
            Self::OrderFailed => "order_failed",
            Self::InsufficientBalance => "insufficient_balance",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "position_created" => Some(Self::PositionCreated),
            "position_opened" => Some(Self::PositionOpened),
            "position_closed" => Some(Self::PositionClosed),
            "position_error" => Some(Self::PositionError),
            "order_placed" => Some(Self::OrderPlaced),
            "order_cancelled" => Some(Self::OrderCancelled),
            "order_rollback" => Some(Self::OrderRollback),
            "order_failed" => Some(Self::OrderFailed),
            "insufficient_balance" => Some(Self::InsufficientBalance),
            _ => None,
        }
    }

}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the trade history.
#[derive(Debug, Clone)]
pub struct HistoryEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub position_id: String,
    pub scenario: String,
    pub exchange_a: String,
    pub exchange_b: String,
    pub symbol_a: String,
    pub symbol_b: String,
    pub order_type: String,
    pub side: String,
    pub quantity: f64,
    pub price: f64,
    pub pnl: f64,
    pub status: String,
    pub error_message: String,
    /// Free-form JSON object; `Null` stands for "no metadata".
    pub metadata: serde_json::Value,
}

impl HistoryEvent {
    /// Event seeded with a position's identifying columns.
    fn for_position(event_type: EventType, position: &Position) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            position_id: position.id.to_string(),
            scenario: position.scenario.to_string(),
            exchange_a: position.venue_a.clone(),
            exchange_b: position.venue_b.clone(),
            symbol_a: position.symbol_a.clone(),
            symbol_b: position.symbol_b.clone(),
            order_type: String::new(),
            side: String::new(),
            quantity: 0.0,
            price: 0.0,
            pnl: 0.0,
            status: String::new(),
            error_message: String::new(),
            metadata: serde_json::Value::Null,
        }
    }

    fn metadata_str(&self) -> String {
        if self.metadata.is_null() {
            String::new()
        } else {
            self.metadata.to_string()
        }
    }
}

// =============================================================================
// Store
// =============================================================================

pub struct HistoryStore {
    csv_path: PathBuf,
    conn: Mutex<Connection>,
}

impl HistoryStore {
    /// Open (or create) the history store under `data_dir`.
    ///
    /// Writes the CSV header when the file is new and trims SQLite rows
    /// older than the retention window.
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;

        let csv_path = data_dir.join("trades.csv");
        if !csv_path.exists() {
            std::fs::write(&csv_path, format!("{CSV_HEADER}\n"))
                .with_context(|| format!("failed to initialise {}", csv_path.display()))?;
        }

        let db_path = data_dir.join("trades.db");
        let conn = Connection::open(&db_path)
            .with_context(|| format!("failed to open {}", db_path.display()))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to initialise trades schema")?;

        let cutoff = (Utc::now() - Duration::hours(RETENTION_HOURS)).to_rfc3339();
        let removed = conn
            .execute("DELETE FROM trades WHERE timestamp < ?1", params![cutoff])
            .context("failed to trim old trade rows")?;
        if removed > 0 {
            debug!(removed, "trimmed trade rows past retention window");
        }

        info!(data_dir = %data_dir.display(), "history store opened");
        Ok(Self {
            csv_path,
            conn: Mutex::new(conn),
        })
    }

    // -------------------------------------------------------------------------
    // Recording
    // -------------------------------------------------------------------------

    /// Write an event to both sinks, best-effort.
    pub fn record(&self, event: &HistoryEvent) {
        if let Err(e) = self.append_csv(event) {
            error!(error = %e, event_type = %event.event_type, "failed to write history CSV");
        }
        if let Err(e) = self.insert_sqlite(event) {
            error!(error = %e, event_type = %event.event_type, "failed to write history index");
        }
    }

    fn append_csv(&self, event: &HistoryEvent) -> Result<()> {
        let fields = [
            event.timestamp.to_rfc3339(),
            event.event_type.to_string(),
            event.position_id.clone(),
            event.scenario.clone(),
            event.exchange_a.clone(),
            event.exchange_b.clone(),
            event.symbol_a.clone(),
            event.symbol_b.clone(),
            event.order_type.clone(),
            event.side.clone(),
            event.quantity.to_string(),
            event.price.to_string(),
            event.pnl.to_string(),
            event.status.clone(),
            event.error_message.clone(),
            event.metadata_str(),
        ];
        let line = fields
            .iter()
            .map(|f| csv_escape(f))
            .collect::<Vec<_>>()
            .join(",");

        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("failed to open {}", self.csv_path.display()))?;
        writeln!(file, "{line}").context("failed to append CSV row")?;
        Ok(())
    }

    fn insert_sqlite(&self, event: &HistoryEvent) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO trades (
                timestamp, event_type, position_id, scenario,
                exchange_a, exchange_b, symbol_a, symbol_b,
                order_type, side, quantity, price, pnl,
                status, error_message, metadata
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                event.timestamp.to_rfc3339(),
                event.event_type.as_str(),
                event.position_id,
                event.scenario,
                event.exchange_a,
                event.exchange_b,
                event.symbol_a,
                event.symbol_b,
                event.order_type,
                event.side,
                event.quantity,
                event.price,
                event.pnl,
                event.status,
                event.error_message,
                event.metadata_str(),
            ],
        )
        .context("failed to insert trade row")?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Convenience recorders
    // -------------------------------------------------------------------------

    pub fn record_position_created(&self, position: &Position) {
        let mut event = HistoryEvent::for_position(EventType::PositionCreated, position);
        event.status = position.status.to_string();
        event.metadata = json!({
            "leg_a_side": position.side_a.as_str(),
            "leg_b_side": position.side_b.as_str(),
            "leg_a_quantity": position.qty_a,
            "leg_b_quantity": position.qty_b,
        });
        self.record(&event);
        info!(position_id = %position.id, "recorded position creation");
    }

    pub fn record_position_opened(&self, position: &Position) {
        let mut event = HistoryEvent::for_position(EventType::PositionOpened, position);
        event.status = "opened".to_string();
        event.price = position.entry_spread;
        event.metadata = json!({
            "entry_price_a": position.entry_price_a,
            "entry_price_b": position.entry_price_b,
            "order_id_a": position.order_id_a,
            "order_id_b": position.order_id_b,
        });
        self.record(&event);
        info!(position_id = %position.id, "recorded position opening");
    }

    pub fn record_position_closed(&self, position: &Position) {
        let mut event = HistoryEvent::for_position(EventType::PositionClosed, position);
        event.status = "closed".to_string();
        event.pnl = position.pnl.unwrap_or(0.0);
        event.metadata = json!({ "exit_spread": position.exit_spread });
        self.record(&event);
        info!(
            position_id = %position.id,
            pnl = position.pnl.unwrap_or(0.0),
            "recorded position close"
        );
    }

    pub fn record_position_error(&self, position: &Position, error_message: &str) {
        let mut event = HistoryEvent::for_position(EventType::PositionError, position);
        event.status = "error".to_string();
        event.error_message = error_message.to_string();
        self.record(&event);
        error!(position_id = %position.id, error = %error_message, "recorded position error");
    }

    pub fn record_order_placed(
        &self,
        position: &Position,
        side: OrderSide,
        quantity: f64,
        price: f64,
        status: OrderStatus,
        order_id: &str,
    ) {
        let mut event = HistoryEvent::for_position(EventType::OrderPlaced, position);
        event.order_type = "market".to_string();
        event.side = side.to_string();
        event.quantity = quantity;
        event.price = price;
        event.status = status.to_string();
        event.metadata = json!({ "order_id": order_id });
        self.record(&event);
        debug!(
            position_id = %position.id,
            side = %side,
            quantity,
            price,
            "recorded order placement"
        );
    }

    pub fn record_order_cancelled(&self, position: &Position, side: OrderSide, order_id: &str) {
        let mut event = HistoryEvent::for_position(EventType::OrderCancelled, position);
        event.order_type = "market".to_string();
        event.side = side.to_string();
        event.status = "cancelled".to_string();
        event.metadata = json!({ "order_id": order_id });
        self.record(&event);
        debug!(position_id = %position.id, order_id, "recorded order cancellation");
    }

    pub fn record_order_rollback(
        &self,
        position: &Position,
        side: OrderSide,
        quantity: f64,
        price: f64,
        status: OrderStatus,
        reason: &str,
        original_order_id: &str,
        rollback_order_id: &str,
    ) {
        let mut event = HistoryEvent::for_position(EventType::OrderRollback, position);
        event.order_type = "market".to_string();
        event.side = side.to_string();
        event.quantity = quantity;
        event.price = price;
        event.status = status.to_string();
        event.metadata = json!({
            "reason": reason,
            "original_order_id": original_order_id,
            "rollback_order_id": rollback_order_id,
        });
        self.record(&event);
        info!(
            position_id = %position.id,
            original_order_id,
            rollback_order_id,
            "recorded order rollback"
        );
    }

    pub fn record_order_failed(
        &self,
        position: &Position,
        side: OrderSide,
        quantity: f64,
        error_message: &str,
    ) {
        let mut event = HistoryEvent::for_position(EventType::OrderFailed, position);
        event.order_type = "market".to_string();
        event.side = side.to_string();
        event.quantity = quantity;
        event.error_message = error_message.to_string();
        self.record(&event);
        error!(position_id = %position.id, error = %error_message, "recorded order failure");
    }

    pub fn record_insufficient_balance(
        &self,
        exchange: &str,
        symbol: &str,
        required: f64,
        available: f64,
    ) {
        let event = HistoryEvent {
            timestamp: Utc::now(),
            event_type: EventType::InsufficientBalance,
            position_id: ALERT_POSITION_ID.to_string(),
            scenario: "alert".to_string(),
            exchange_a: exchange.to_string(),
            exchange_b: String::new(),
            symbol_a: symbol.to_string(),
            symbol_b: String::new(),
            order_type: String::new(),
            side: String::new(),
            quantity: 0.0,
            price: 0.0,
            pnl: 0.0,
            status: String::new(),
            error_message: String::new(),
            metadata: json!({
                "exchange": exchange,
                "symbol": symbol,
                "required": required,
                "available": available,
                "shortfall": required - available,
            }),
        };
        self.record(&event);
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Events from the last `hours`, newest first.
    pub fn recent_trades(&self, hours: i64) -> Result<Vec<HistoryEvent>> {
        let cutoff = (Utc::now() - Duration::hours(hours)).to_rfc3339();
        self.query_events(
            "SELECT timestamp, event_type, position_id, scenario, exchange_a, exchange_b,
                    symbol_a, symbol_b, order_type, side, quantity, price, pnl, status,
                    error_message, metadata
             FROM trades WHERE timestamp > ?1 ORDER BY timestamp DESC, id DESC",
            params![cutoff],
        )
    }

    /// Every event for one position, oldest first.
    pub fn position_history(&self, position_id: &str) -> Result<Vec<HistoryEvent>> {
        self.query_events(
            "SELECT timestamp, event_type, position_id, scenario, exchange_a, exchange_b,
                    symbol_a, symbol_b, order_type, side, quantity, price, pnl, status,
                    error_message, metadata
             FROM trades WHERE position_id = ?1 ORDER BY timestamp ASC, id ASC",
            params![position_id],
        )
    }

    fn query_events(
        &self,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<HistoryEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql).context("failed to prepare query")?;
        let rows = stmt
            .query_map(args, |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                    row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                    row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                    row.get::<_, Option<String>>(7)?.unwrap_or_default(),
                    row.get::<_, Option<String>>(8)?.unwrap_or_default(),
                    row.get::<_, Option<String>>(9)?.unwrap_or_default(),
                    row.get::<_, Option<f64>>(10)?.unwrap_or(0.0),
                    row.get::<_, Option<f64>>(11)?.unwrap_or(0.0),
                    row.get::<_, Option<f64>>(12)?.unwrap_or(0.0),
                    row.get::<_, Option<String>>(13)?.unwrap_or_default(),
                    row.get::<_, Option<String>>(14)?.unwrap_or_default(),
                    row.get::<_, Option<String>>(15)?.unwrap_or_default(),
                ))
            })
            .context("failed to run query")?;

        let mut events = Vec::new();
        for row in rows {
            let (
                timestamp,
                event_type,
                position_id,
                scenario,
                exchange_a,
                exchange_b,
                symbol_a,
                symbol_b,
                order_type,
                side,
                quantity,
                price,
                pnl,
                status,
                error_message,
                metadata,
            ) = row.context("failed to read trade row")?;

            let Some(event_type) = EventType::parse(&event_type) else {
                debug!(event_type = %event_type, "skipping row with unknown event type");
                continue;
            };
            let timestamp = DateTime::parse_from_rfc3339(&timestamp)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());
            let metadata = if metadata.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null)
            };

            events.push(HistoryEvent {
                timestamp,
                event_type,
                position_id,
                scenario,
                exchange_a,
                exchange_b,
                symbol_a,
                symbol_b,
                order_type,
                side,
                quantity,
                price,
                pnl,
                status,
                error_message,
                metadata,
            });
        }
        Ok(events)
    }

    /// Reconstruct a position by folding its event stream.
    ///
    /// `position_created` seeds the legs; the latest lifecycle event wins
    /// for status; `position_opened` supplies entry prices and order ids;
    /// `position_closed` supplies pnl and exit spread.
    pub fn load_position(&self, position_id: &str) -> Result<Option<Position>> {
        let events = self.position_history(position_id)?;
        Ok(fold_position(&events))
    }

    /// All known positions, optionally filtered by status.
    pub fn list_positions(
        &self,
        status_filter: Option<PositionStatus>,
    ) -> Result<Vec<Position>> {
        let ids: Vec<String> = {
            let conn = self.conn.lock();
            let mut stmt = conn
                .prepare(
                    "SELECT DISTINCT position_id FROM trades
                     WHERE position_id != '' AND position_id != ?1",
                )
                .context("failed to prepare position listing")?;
            let rows = stmt
                .query_map(params![ALERT_POSITION_ID], |row| row.get::<_, String>(0))
                .context("failed to list position ids")?;
            rows.collect::<rusqlite::Result<_>>()
                .context("failed to read position ids")?
        };

        let mut positions = Vec::new();
        for id in ids {
            if let Some(position) = self.load_position(&id)? {
                if status_filter.map_or(true, |s| position.status == s) {
                    positions.push(position);
                }
            }
        }
        Ok(positions)
    }

    /// Number of distinct positions whose latest lifecycle event left them
    /// opened.
    pub fn count_open_positions(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT COUNT(*) FROM trades t
             WHERE t.event_type IN {LIFECYCLE_EVENTS_SQL}
               AND t.position_id != '' AND t.position_id != ?1
               AND t.id = (
                   SELECT MAX(t2.id) FROM trades t2
                   WHERE t2.position_id = t.position_id
                     AND t2.event_type IN {LIFECYCLE_EVENTS_SQL}
               )
               AND t.status = 'opened'"
        );
        let count: i64 = conn
            .query_row(&sql, params![ALERT_POSITION_ID], |row| row.get(0))
            .context("failed to count open positions")?;
        Ok(count as usize)
    }
}

impl std::fmt::Debug for HistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryStore")
            .field("csv_path", &self.csv_path)
            .finish()
    }
}

// =============================================================================
// Fold
// =============================================================================

/// Fold an ordered event stream into a position.
///
/// Returns `None` without a seeding `position_created` event or when the
/// position id is not a UUID (alert rows).
fn fold_position(events: &[HistoryEvent]) -> Option<Position> {
    let created = events
        .iter()
        .find(|e| e.event_type == EventType::PositionCreated)?;
    let id = Uuid::parse_str(&created.position_id).ok()?;
    let scenario = Scenario::parse(&created.scenario)?;

    let side_of = |value: &serde_json::Value| match value.as_str() {
        Some("sell") => OrderSide::Sell,
        _ => OrderSide::Buy,
    };

    let mut position = Position {
        id,
        scenario,
        venue_a: created.exchange_a.clone(),
        symbol_a: created.symbol_a.clone(),
        side_a: side_of(&created.metadata["leg_a_side"]),
        qty_a: created.metadata["leg_a_quantity"].as_f64().unwrap_or(0.0),
        venue_b: created.exchange_b.clone(),
        symbol_b: created.symbol_b.clone(),
        side_b: side_of(&created.metadata["leg_b_side"]),
        qty_b: created.metadata["leg_b_quantity"].as_f64().unwrap_or(0.0),
        entry_price_a: 0.0,
        entry_price_b: 0.0,
        entry_spread: 0.0,
        order_id_a: None,
        order_id_b: None,
        status: PositionStatus::Pending,
        created_at: created.timestamp,
        opened_at: None,
        closed_at: None,
        exit_spread: None,
        pnl: None,
    };

    // Chronological replay: each lifecycle event overwrites status, so the
    // latest one wins and replayed duplicates stay idempotent.
    for event in events {
        match event.event_type {
            EventType::PositionCreated => {}
            EventType::PositionOpened => {
                position.entry_price_a =
                    event.metadata["entry_price_a"].as_f64().unwrap_or(0.0);
                position.entry_price_b =
                    event.metadata["entry_price_b"].as_f64().unwrap_or(0.0);
                position.order_id_a = event.metadata["order_id_a"]
                    .as_str()
                    .map(|s| s.to_string());
                position.order_id_b = event.metadata["order_id_b"]
                    .as_str()
                    .map(|s| s.to_string());
                position.entry_spread = event.price;
                position.opened_at = Some(event.timestamp);
                position.status = PositionStatus::Opened;
            }
            EventType::PositionClosed => {
                position.pnl = Some(event.pnl);
                position.exit_spread = event.metadata["exit_spread"].as_f64();
                position.closed_at = Some(event.timestamp);
                position.status = PositionStatus::Closed;
            }
            EventType::PositionError => {
                position.status = PositionStatus::Error;
            }
            _ => {}
        }
    }

    Some(position)
}

/// Quote a CSV field when it contains a delimiter, quote, or newline.
fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_position() -> Position {
        Position::new(Scenario::A, "binance", "BTCUSDT", 1.0, "okx", "BTCUSDT", 1.0)
    }

    #[test]
    fn csv_header_is_written_once() {
        let dir = tempdir().unwrap();
        let store = HistoryStore::new(dir.path()).unwrap();
        let position = sample_position();
        store.record_position_created(&position);
        drop(store);

        // Re-open: header must not repeat.
        let store = HistoryStore::new(dir.path()).unwrap();
        store.record_position_error(&position, "boom");
        drop(store);

        let content = std::fs::read_to_string(dir.path().join("trades.csv")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
        assert!(lines[1].contains("position_created"));
        assert!(lines[2].contains("position_error"));
    }

    #[test]
    fn metadata_with_commas_stays_on_one_csv_line() {
        let dir = tempdir().unwrap();
        let store = HistoryStore::new(dir.path()).unwrap();
        store.record_insufficient_balance("binance", "BTCUSDT", 16666.67, 100.0);

        let content = std::fs::read_to_string(dir.path().join("trades.csv")).unwrap();
        assert_eq!(content.lines().count(), 2);
        let row = content.lines().nth(1).unwrap();
        // JSON metadata is quoted, with inner quotes doubled.
        assert!(row.contains("\"{\"\"available\"\""));
    }

    #[test]
    fn recent_trades_are_newest_first() {
        let dir = tempdir().unwrap();
        let store = HistoryStore::new(dir.path()).unwrap();
        let position = sample_position();
        store.record_position_created(&position);
        store.record_position_error(&position, "late event");

        let trades = store.recent_trades(24).unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].event_type, EventType::PositionError);
        assert_eq!(trades[1].event_type, EventType::PositionCreated);
    }

    #[test]
    fn position_history_is_oldest_first() {
        let dir = tempdir().unwrap();
        let store = HistoryStore::new(dir.path()).unwrap();
        let mut position = sample_position();
        store.record_position_created(&position);
        position.order_id_a = Some("a-1".to_string());
        position.order_id_b = Some("b-1".to_string());
        position.mark_opened(48000.0, 46000.0);
        store.record_position_opened(&position);

        let events = store.position_history(&position.id.to_string()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::PositionCreated);
        assert_eq!(events[1].event_type, EventType::PositionOpened);
    }

    #[test]
    fn load_position_round_trips_a_full_lifecycle() {
        let dir = tempdir().unwrap();
        let store = HistoryStore::new(dir.path()).unwrap();

        let mut position = sample_position();
        store.record_position_created(&position);
        position.order_id_a = Some("a-1".to_string());
        position.order_id_b = Some("b-1".to_string());
        position.mark_opened(48000.0, 46000.0);
        store.record_position_opened(&position);
        position.status = PositionStatus::Closing;
        position.mark_closed(46500.0, 46400.0);
        store.record_position_closed(&position);

        let loaded = store
            .load_position(&position.id.to_string())
            .unwrap()
            .expect("position should reconstruct");

        assert_eq!(loaded.id, position.id);
        assert_eq!(loaded.status, PositionStatus::Closed);
        assert_eq!(loaded.entry_price_a, 48000.0);
        assert_eq!(loaded.entry_price_b, 46000.0);
        assert_eq!(loaded.order_id_a.as_deref(), Some("a-1"));
        assert_eq!(loaded.order_id_b.as_deref(), Some("b-1"));
        assert!((loaded.entry_spread - position.entry_spread).abs() < 1e-9);
        assert!((loaded.exit_spread.unwrap() - position.exit_spread.unwrap()).abs() < 1e-9);
        assert!((loaded.pnl.unwrap() - position.pnl.unwrap()).abs() < 1e-9);
    }

    #[test]
    fn duplicate_opened_events_do_not_double_open() {
        let dir = tempdir().unwrap();
        let store = HistoryStore::new(dir.path()).unwrap();

        let mut position = sample_position();
        store.record_position_created(&position);
        position.mark_opened(100.0, 99.0);
        store.record_position_opened(&position);
        store.record_position_opened(&position);
        position.status = PositionStatus::Closing;
        position.mark_closed(100.5, 100.0);
        store.record_position_closed(&position);

        let loaded = store
            .load_position(&position.id.to_string())
            .unwrap()
            .unwrap();
        // Status derives from the latest lifecycle event, not accumulation.
        assert_eq!(loaded.status, PositionStatus::Closed);
        assert_eq!(store.count_open_positions().unwrap(), 0);
    }

    #[test]
    fn count_open_positions_tracks_latest_lifecycle_event() {
        let dir = tempdir().unwrap();
        let store = HistoryStore::new(dir.path()).unwrap();

        let mut open_a = sample_position();
        store.record_position_created(&open_a);
        open_a.mark_opened(100.0, 99.0);
        store.record_position_opened(&open_a);

        let mut open_b = sample_position();
        store.record_position_created(&open_b);
        open_b.mark_opened(101.0, 100.0);
        store.record_position_opened(&open_b);

        assert_eq!(store.count_open_positions().unwrap(), 2);

        open_b.status = PositionStatus::Closing;
        open_b.mark_closed(100.2, 100.1);
        store.record_position_closed(&open_b);
        assert_eq!(store.count_open_positions().unwrap(), 1);

        store.record_position_error(&open_a, "hedge failed");
        assert_eq!(store.count_open_positions().unwrap(), 0);
    }

    #[test]
    fn list_positions_filters_by_status_and_skips_alerts() {
        let dir = tempdir().unwrap();
        let store = HistoryStore::new(dir.path()).unwrap();

        let mut opened = sample_position();
        store.record_position_created(&opened);
        opened.mark_opened(100.0, 99.0);
        store.record_position_opened(&opened);

        let pending = sample_position();
        store.record_position_created(&pending);

        store.record_insufficient_balance("binance", "BTCUSDT", 10.0, 1.0);

        let all = store.list_positions(None).unwrap();
        assert_eq!(all.len(), 2);

        let open_only = store.list_positions(Some(PositionStatus::Opened)).unwrap();
        assert_eq!(open_only.len(), 1);
        assert_eq!(open_only[0].id, opened.id);
    }

    #[test]
    fn retention_trims_old_rows_on_open() {
        let dir = tempdir().unwrap();
        {
            let store = HistoryStore::new(dir.path()).unwrap();
            let old = (Utc::now() - Duration::hours(48)).to_rfc3339();
            store
                .conn
                .lock()
                .execute(
                    "INSERT INTO trades (timestamp, event_type, position_id, status)
                     VALUES (?1, 'position_error', 'stale', 'error')",
                    params![old],
                )
                .unwrap();
            let position = sample_position();
            store.record_position_created(&position);
        }

        let store = HistoryStore::new(dir.path()).unwrap();
        let trades = store.recent_trades(24 * 30).unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].event_type, EventType::PositionCreated);
    }

    #[test]
    fn restart_recovers_open_position_from_events() {
        let dir = tempdir().unwrap();
        let mut position = sample_position();

        // First process: write {position_created, position_opened} and exit.
        {
            let store = HistoryStore::new(dir.path()).unwrap();
            store.record_position_created(&position);
            position.order_id_a = Some("a-7".to_string());
            position.order_id_b = Some("b-7".to_string());
            position.mark_opened(48000.0, 46000.0);
            store.record_position_opened(&position);
        }

        // Fresh process: the event log alone answers every query.
        let store = HistoryStore::new(dir.path()).unwrap();
        let loaded = store
            .load_position(&position.id.to_string())
            .unwrap()
            .expect("position survives restart");
        assert_eq!(loaded.status, PositionStatus::Opened);
        assert_eq!(loaded.entry_price_a, 48000.0);
        assert_eq!(loaded.entry_price_b, 46000.0);
        assert_eq!(loaded.order_id_a.as_deref(), Some("a-7"));
        assert_eq!(loaded.order_id_b.as_deref(), Some("b-7"));

        let open = store.list_positions(Some(PositionStatus::Opened)).unwrap();
        assert!(open.iter().any(|p| p.id == position.id));
        assert!(store.count_open_positions().unwrap() >= 1);
    }

    #[test]
    fn insufficient_balance_metadata_has_shortfall() {
        let dir = tempdir().unwrap();
        let store = HistoryStore::new(dir.path()).unwrap();
        store.record_insufficient_balance("binance", "BTCUSDT", 150.0, 100.0);

        let trades = store.recent_trades(1).unwrap();
        assert_eq!(trades.len(), 1);
        let event = &trades[0];
        assert_eq!(event.event_type, EventType::InsufficientBalance);
        assert_eq!(event.position_id, ALERT_POSITION_ID);
        assert_eq!(event.metadata["required"].as_f64().unwrap(), 150.0);
        assert_eq!(event.metadata["available"].as_f64().unwrap(), 100.0);
        assert_eq!(event.metadata["shortfall"].as_f64().unwrap(), 50.0);
    }
}
