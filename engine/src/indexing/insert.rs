//! Index row persistence.
//!
//! Runs only inside a store transaction: the caller clears superseded rows
//! and inserts the new version's rows in the same transaction that writes
//! the version row, so readers never observe a document without its indexes.

use super::{IndexRow, IndexValue};
use crate::Result;
use sqlx::PgConnection;

const INDEX_TABLES: &[&str] = &[
    "search_token",
    "search_string",
    "search_date",
    "search_reference",
    "search_quantity",
    "search_number",
    "search_uri",
    "search_special",
];

/// Delete every index row for a resource, across all variants.
pub(crate) async fn clear_rows(
    conn: &mut PgConnection,
    resource_type: &str,
    resource_id: &str,
) -> Result<()> {
    for table in INDEX_TABLES {
        sqlx::query(&format!(
            "DELETE FROM {table} WHERE resource_type = $1 AND resource_id = $2"
        ))
        .bind(resource_type)
        .bind(resource_id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Insert the extracted rows for one resource version.
pub(crate) async fn insert_rows(
    conn: &mut PgConnection,
    resource_type: &str,
    resource_id: &str,
    version_id: i32,
    rows: &[IndexRow],
) -> Result<()> {
    for row in rows {
        insert_row(conn, resource_type, resource_id, version_id, row).await?;
    }
    Ok(())
}

async fn insert_row(
    conn: &mut PgConnection,
    resource_type: &str,
    resource_id: &str,
    version_id: i32,
    row: &IndexRow,
) -> Result<()> {
    match &row.value {
        IndexValue::Token { system, code, text } => {
            sqlx::query(
                "INSERT INTO search_token
                     (resource_type, resource_id, version_id, parameter_name, occurrence, system, code, display)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(resource_type)
            .bind(resource_id)
            .bind(version_id)
            .bind(&row.param)
            .bind(row.occurrence)
            .bind(system)
            .bind(code)
            .bind(text)
            .execute(&mut *conn)
            .await?;
        }
        IndexValue::String { value, original } => {
            sqlx::query(
                "INSERT INTO search_string
                     (resource_type, resource_id, version_id, parameter_name, occurrence, value, original)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(resource_type)
            .bind(resource_id)
            .bind(version_id)
            .bind(&row.param)
            .bind(row.occurrence)
            .bind(value)
            .bind(original)
            .execute(&mut *conn)
            .await?;
        }
        IndexValue::Date {
            range_start,
            range_end,
            precision,
        } => {
            sqlx::query(
                "INSERT INTO search_date
                     (resource_type, resource_id, version_id, parameter_name, occurrence, range_start, range_end, precision)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(resource_type)
            .bind(resource_id)
            .bind(version_id)
            .bind(&row.param)
            .bind(row.occurrence)
            .bind(range_start)
            .bind(range_end)
            .bind(precision.as_str())
            .execute(&mut *conn)
            .await?;
        }
        IndexValue::Reference {
            target_type,
            target_id,
            target_url,
        } => {
            sqlx::query(
                "INSERT INTO search_reference
                     (resource_type, resource_id, version_id, parameter_name, occurrence, target_type, target_id, target_url)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(resource_type)
            .bind(resource_id)
            .bind(version_id)
            .bind(&row.param)
            .bind(row.occurrence)
            .bind(target_type)
            .bind(target_id)
            .bind(target_url)
            .execute(&mut *conn)
            .await?;
        }
        IndexValue::Quantity {
            value,
            system,
            code,
            unit,
            canonical_value,
            canonical_code,
        } => {
            sqlx::query(
                "INSERT INTO search_quantity
                     (resource_type, resource_id, version_id, parameter_name, occurrence, value, system, code, unit, canonical_value, canonical_code)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            )
            .bind(resource_type)
            .bind(resource_id)
            .bind(version_id)
            .bind(&row.param)
            .bind(row.occurrence)
            .bind(value)
            .bind(system)
            .bind(code)
            .bind(unit)
            .bind(canonical_value)
            .bind(canonical_code)
            .execute(&mut *conn)
            .await?;
        }
        IndexValue::Number { value } => {
            sqlx::query(
                "INSERT INTO search_number
                     (resource_type, resource_id, version_id, parameter_name, occurrence, value)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(resource_type)
            .bind(resource_id)
            .bind(version_id)
            .bind(&row.param)
            .bind(row.occurrence)
            .bind(value)
            .execute(&mut *conn)
            .await?;
        }
        IndexValue::Uri { value } => {
            sqlx::query(
                "INSERT INTO search_uri
                     (resource_type, resource_id, version_id, parameter_name, occurrence, value)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(resource_type)
            .bind(resource_id)
            .bind(version_id)
            .bind(&row.param)
            .bind(row.occurrence)
            .bind(value)
            .execute(&mut *conn)
            .await?;
        }
        IndexValue::Geo {
            latitude,
            longitude,
        } => {
            sqlx::query(
                "INSERT INTO search_special
                     (resource_type, resource_id, version_id, parameter_name, occurrence, latitude, longitude)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(resource_type)
            .bind(resource_id)
            .bind(version_id)
            .bind(&row.param)
            .bind(row.occurrence)
            .bind(latitude)
            .bind(longitude)
            .execute(&mut *conn)
            .await?;
        }
    }
    Ok(())
}
