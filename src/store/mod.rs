//! Relational store access: item master lookups, BOM component relations,
//! catalog listing for similarity search, and durable batch checkpoints.

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::Db;
use crate::error::{BomGraphError, Result};

/// One item-master row.
#[derive(Debug, Clone)]
pub struct ItemRecord {
    pub item_code: String,
    pub item_name: String,
    pub spec_text: Option<String>,
    pub characteristic_code: Option<String>,
    /// SQLite CURRENT_TIMESTAMP text (`YYYY-MM-DD HH:MM:SS`); lexical order
    /// equals chronological order, which the scorer relies on for recency
    /// tie-breaks.
    pub created_at: String,
}

/// One parent → component relation row, in stored sequence order.
#[derive(Debug, Clone)]
pub struct ComponentRow {
    pub component_code: String,
    pub quantity: f64,
    pub effective_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub characteristic_code: Option<String>,
}

/// Durable batch-job checkpoint (pause state plus the exact item order).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCheckpoint {
    pub job_id: String,
    pub kind: String,
    pub cursor: u64,
    pub total_items: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_item: Option<String>,
    pub items: Vec<String>,
}

fn parse_opt_date(value: Option<String>) -> Result<Option<NaiveDate>> {
    match value {
        None => Ok(None),
        Some(s) => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
            .map(Some)
            .map_err(|e| BomGraphError::Parse(format!("bad date '{}': {}", s, e))),
    }
}

/// Fetch one item-master row, None when the code is unknown.
pub async fn get_item(db: &Db, item_code: &str) -> Result<Option<ItemRecord>> {
    let code = item_code.to_string();
    db.with_connection(move |conn| {
        conn.query_row(
            "SELECT item_code, item_name, spec_text, characteristic_code, created_at \
             FROM items WHERE item_code = ?1",
            [&code],
            |row| {
                Ok(ItemRecord {
                    item_code: row.get(0)?,
                    item_name: row.get(1)?,
                    spec_text: row.get(2)?,
                    characteristic_code: row.get(3)?,
                    created_at: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(BomGraphError::Database)
    })
    .await
}

/// Fetch the direct components of a parent, ordered by stored sequence.
/// Unknown parents return an empty list; the resolver distinguishes
/// "unknown item" via [`get_item`].
pub async fn get_direct_components(db: &Db, parent_code: &str) -> Result<Vec<ComponentRow>> {
    let code = parent_code.to_string();
    db.with_connection(move |conn| {
        let mut stmt = conn.prepare(
            "SELECT component_code, quantity, effective_date, expiry_date, characteristic_code \
             FROM bom_components WHERE parent_code = ?1 ORDER BY seq, component_code",
        )?;
        let rows = stmt.query_map([&code], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (component_code, quantity, eff, exp, characteristic_code) = row?;
            out.push(ComponentRow {
                component_code,
                quantity,
                effective_date: parse_opt_date(eff)?,
                expiry_date: parse_opt_date(exp)?,
                characteristic_code,
            });
        }
        Ok(out)
    })
    .await
}

/// List catalog entries eligible for similarity search (items that carry a
/// specification), newest first.
pub async fn list_catalog(db: &Db) -> Result<Vec<ItemRecord>> {
    db.with_connection(|conn| {
        let mut stmt = conn.prepare(
            "SELECT item_code, item_name, spec_text, characteristic_code, created_at \
             FROM items WHERE spec_text IS NOT NULL AND spec_text != '' \
             ORDER BY created_at DESC, item_code",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ItemRecord {
                item_code: row.get(0)?,
                item_name: row.get(1)?,
                spec_text: row.get(2)?,
                characteristic_code: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    })
    .await
}

/// List every item code, in stable order. Used to seed export-all batches.
pub async fn list_item_codes(db: &Db) -> Result<Vec<String>> {
    db.with_connection(|conn| {
        let mut stmt = conn.prepare("SELECT item_code FROM items ORDER BY item_code")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    })
    .await
}

/// Insert or replace an item-master row.
pub async fn upsert_item(
    db: &Db,
    item_code: &str,
    item_name: &str,
    spec_text: Option<&str>,
    characteristic_code: Option<&str>,
) -> Result<()> {
    let code = item_code.to_string();
    let name = item_name.to_string();
    let spec = spec_text.map(str::to_string);
    let characteristic = characteristic_code.map(str::to_string);
    db.with_connection(move |conn| {
        conn.execute(
            "INSERT INTO items (item_code, item_name, spec_text, characteristic_code) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(item_code) DO UPDATE SET \
                 item_name = excluded.item_name, \
                 spec_text = excluded.spec_text, \
                 characteristic_code = excluded.characteristic_code",
            params![code, name, spec, characteristic],
        )?;
        Ok(())
    })
    .await
}

/// Insert one parent → component relation.
#[allow(clippy::too_many_arguments)]
pub async fn insert_component(
    db: &Db,
    parent_code: &str,
    component_code: &str,
    quantity: f64,
    effective_date: Option<NaiveDate>,
    expiry_date: Option<NaiveDate>,
    characteristic_code: Option<&str>,
    seq: i64,
) -> Result<()> {
    let parent = parent_code.to_string();
    let component = component_code.to_string();
    let characteristic = characteristic_code.map(str::to_string);
    let eff = effective_date.map(|d| d.format("%Y-%m-%d").to_string());
    let exp = expiry_date.map(|d| d.format("%Y-%m-%d").to_string());
    db.with_connection(move |conn| {
        conn.execute(
            "INSERT INTO bom_components \
             (parent_code, component_code, quantity, effective_date, expiry_date, characteristic_code, seq) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![parent, component, quantity, eff, exp, characteristic, seq],
        )?;
        Ok(())
    })
    .await
}

/// Write (or overwrite) a durable job checkpoint.
pub async fn save_checkpoint(db: &Db, checkpoint: &JobCheckpoint) -> Result<()> {
    let cp = checkpoint.clone();
    let items_json = serde_json::to_string(&cp.items)
        .map_err(|e| BomGraphError::Parse(format!("checkpoint items: {}", e)))?;
    db.with_connection(move |conn| {
        conn.execute(
            "INSERT INTO batch_checkpoints \
             (job_id, kind, cursor, total_items, success_count, failure_count, last_item, items_json, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, CURRENT_TIMESTAMP) \
             ON CONFLICT(job_id) DO UPDATE SET \
                 cursor = excluded.cursor, \
                 success_count = excluded.success_count, \
                 failure_count = excluded.failure_count, \
                 last_item = excluded.last_item, \
                 updated_at = CURRENT_TIMESTAMP",
            params![
                cp.job_id,
                cp.kind,
                cp.cursor as i64,
                cp.total_items as i64,
                cp.success_count as i64,
                cp.failure_count as i64,
                cp.last_item,
                items_json,
            ],
        )?;
        Ok(())
    })
    .await
}

/// Load a durable checkpoint, None when the job never persisted one.
pub async fn load_checkpoint(db: &Db, job_id: &str) -> Result<Option<JobCheckpoint>> {
    let id = job_id.to_string();
    let row = db
        .with_connection(move |conn| {
            conn.query_row(
                "SELECT job_id, kind, cursor, total_items, success_count, failure_count, last_item, items_json \
                 FROM batch_checkpoints WHERE job_id = ?1",
                [&id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                },
            )
            .optional()
            .map_err(BomGraphError::Database)
        })
        .await?;

    match row {
        None => Ok(None),
        Some((job_id, kind, cursor, total, success, failure, last_item, items_json)) => {
            let items: Vec<String> = serde_json::from_str(&items_json)
                .map_err(|e| BomGraphError::Parse(format!("checkpoint items: {}", e)))?;
            Ok(Some(JobCheckpoint {
                job_id,
                kind,
                cursor: cursor as u64,
                total_items: total as u64,
                success_count: success as u64,
                failure_count: failure as u64,
                last_item,
                items,
            }))
        }
    }
}

/// Remove a durable checkpoint once its job reaches a terminal state.
pub async fn delete_checkpoint(db: &Db, job_id: &str) -> Result<()> {
    let id = job_id.to_string();
    db.with_connection(move |conn| {
        conn.execute("DELETE FROM batch_checkpoints WHERE job_id = ?1", [&id])?;
        Ok(())
    })
    .await
}
