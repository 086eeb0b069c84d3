//! Record loading for the bundled schema.

use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use serde_json::Value;

pub fn insert_instance(conn: &Connection, id: &str, doc: &Value) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO instance (id, jsonb) VALUES (?1, ?2)",
        params![id, doc.to_string()],
    )
    .with_context(|| format!("insert instance {id}"))?;
    Ok(())
}

pub fn insert_holdings_record(
    conn: &Connection,
    id: &str,
    instance_id: &str,
    doc: &Value,
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO holdings_record (id, instance_id, jsonb) VALUES (?1, ?2, ?3)",
        params![id, instance_id, doc.to_string()],
    )
    .with_context(|| format!("insert holdings record {id}"))?;
    Ok(())
}

pub fn insert_item(conn: &Connection, id: &str, holdings_record_id: &str, doc: &Value) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO item (id, holdings_record_id, jsonb) VALUES (?1, ?2, ?3)",
        params![id, holdings_record_id, doc.to_string()],
    )
    .with_context(|| format!("insert item {id}"))?;
    Ok(())
}

pub fn insert_authority(conn: &Connection, id: &str, doc: &Value) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO authority (id, jsonb) VALUES (?1, ?2)",
        params![id, doc.to_string()],
    )
    .with_context(|| format!("insert authority {id}"))?;
    Ok(())
}
