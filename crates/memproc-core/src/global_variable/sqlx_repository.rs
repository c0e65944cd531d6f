//! Postgres-backed `GlobalVariableRepository`.
//!
//! `rename` runs as a single transaction so a crash mid-rewrite can never
//! leave some blocks pointing at the old name and others at the new one.
//! Three reference shapes are rewritten, matched against the static
//! tables in the parent module:
//!
//!  - direct columns: exact string equality against the bare name or the
//!    `GV:<name>` canonical form;
//!  - JSON array columns: each array element compared the same way,
//!    individually rewritten;
//!  - alias-marker columns: the JSONB object's values are scanned as text
//!    for the literal substring `@GV:<old>`, replaced with `@GV:<new>`.

use sqlx::{PgPool, Row};

use crate::error::MemprocError;

use super::usage_index::UsageIndex;
use super::{
    GlobalVariable, GlobalVariableRepository, GlobalVariableType, UsageRef, ALIAS_MARKER_COLUMNS,
    DIRECT_REFERENCE_COLUMNS, JSON_ARRAY_REFERENCE_COLUMNS,
};

pub struct SqlxGlobalVariableRepository {
    pool: PgPool,
    usage_index: Option<UsageIndex>,
}

impl SqlxGlobalVariableRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, usage_index: None }
    }

    /// Same as `new`, but consults `usage_index` as a read cache in front
    /// of `find_usages`'s Postgres scan, and keeps it in sync on rename.
    pub fn with_usage_index(pool: PgPool, usage_index: UsageIndex) -> Self {
        Self { pool, usage_index: Some(usage_index) }
    }

    fn row_to_variable(row: &sqlx::postgres::PgRow) -> Result<GlobalVariable, MemprocError> {
        let type_str: String = row.get("var_type");
        let var_type = match type_str.as_str() {
            "boolean" => GlobalVariableType::Boolean,
            "float" => GlobalVariableType::Float,
            other => {
                return Err(MemprocError::Configuration(format!(
                    "unknown global variable type '{other}'"
                )))
            }
        };
        Ok(GlobalVariable {
            id: row.get("id"),
            name: row.get("name"),
            var_type,
            is_disabled: row.get("is_disabled"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait::async_trait]
impl GlobalVariableRepository for SqlxGlobalVariableRepository {
    async fn get_by_name(&self, name: &str) -> Result<Option<GlobalVariable>, MemprocError> {
        let row = sqlx::query("SELECT id, name, var_type, is_disabled, created_at, updated_at FROM global_variables WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_variable).transpose()
    }

    async fn rename(&self, old: &str, new: &str) -> Result<GlobalVariable, MemprocError> {
        if !crate::reference::is_valid_global_variable_name(new) {
            return Err(MemprocError::Configuration(format!(
                "'{new}' is not a valid global variable name"
            )));
        }
        if self.get_by_name(new).await?.is_some() {
            return Err(MemprocError::Configuration(format!(
                "global variable '{new}' already exists"
            )));
        }

        let mut tx = self.pool.begin().await?;

        let renamed = sqlx::query(
            "UPDATE global_variables SET name = $1, updated_at = now() WHERE name = $2 RETURNING id",
        )
        .bind(new)
        .bind(old)
        .fetch_optional(&mut *tx)
        .await?;
        if renamed.is_none() {
            return Err(MemprocError::Configuration(format!(
                "global variable '{old}' does not exist"
            )));
        }

        let bare_old = old.to_string();
        let prefixed_old = format!("GV:{old}");
        let bare_new = new.to_string();
        let prefixed_new = format!("GV:{new}");

        for (table, columns) in DIRECT_REFERENCE_COLUMNS {
            for column in *columns {
                let query = format!(
                    "UPDATE {table} SET {column} = $1 WHERE {column} = $2",
                );
                sqlx::query(&query).bind(&prefixed_new).bind(&prefixed_old).execute(&mut *tx).await?;
                let query = format!(
                    "UPDATE {table} SET {column} = $1 WHERE {column} = $2",
                );
                sqlx::query(&query).bind(&bare_new).bind(&bare_old).execute(&mut *tx).await?;
            }
        }

        for (table, column) in JSON_ARRAY_REFERENCE_COLUMNS {
            // Rewrite each JSON string array element matching either form.
            // jsonb_agg over a per-element CASE keeps ordering stable.
            let query = format!(
                "UPDATE {table} SET {column} = (
                     SELECT jsonb_agg(
                         CASE
                             WHEN elem #>> '{{}}' = $1 THEN to_jsonb($2::text)
                             WHEN elem #>> '{{}}' = $3 THEN to_jsonb($4::text)
                             ELSE elem
                         END
                     )
                     FROM jsonb_array_elements({column}) AS elem
                 )
                 WHERE {column} @> to_jsonb($1::text) OR {column} @> to_jsonb($3::text)",
            );
            sqlx::query(&query)
                .bind(&prefixed_old)
                .bind(&prefixed_new)
                .bind(&bare_old)
                .bind(&bare_new)
                .execute(&mut *tx)
                .await?;
        }

        for (table, column) in ALIAS_MARKER_COLUMNS {
            let query = format!(
                "UPDATE {table} SET {column} = replace({column}::text, $1, $2)::jsonb
                 WHERE {column}::text LIKE '%' || $1 || '%'",
            );
            sqlx::query(&query)
                .bind(format!("@GV:{old}"))
                .bind(format!("@GV:{new}"))
                .execute(&mut *tx)
                .await?;
        }

        let row = sqlx::query(
            "SELECT id, name, var_type, is_disabled, created_at, updated_at FROM global_variables WHERE name = $1",
        )
        .bind(new)
        .fetch_one(&mut *tx)
        .await?;
        let variable = Self::row_to_variable(&row)?;

        tx.commit().await?;

        if let Some(usage_index) = &self.usage_index {
            // Best-effort: a failed invalidation just means the old name's
            // entry lives out its TTL and the new name has a cache miss
            // until the next find_usages call recomputes it.
            if let Err(err) = usage_index.invalidate(old).await {
                tracing::warn!(old, %err, "failed to invalidate usage index entry after rename");
            }
            if let Err(err) = usage_index.invalidate(new).await {
                tracing::warn!(new, %err, "failed to invalidate usage index entry after rename");
            }
        }

        Ok(variable)
    }

    async fn delete(&self, name: &str) -> Result<(), MemprocError> {
        let usages = self.find_usages(name).await?;
        if !usages.is_empty() {
            return Err(MemprocError::Configuration(format!(
                "global variable '{name}' is referenced by {} block(s)",
                usages.len()
            )));
        }
        sqlx::query("DELETE FROM global_variables WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_usages(&self, name: &str) -> Result<Vec<UsageRef>, MemprocError> {
        if let Some(usage_index) = &self.usage_index {
            match usage_index.get(name).await {
                Ok(Some(cached)) => return Ok(cached),
                Ok(None) => {}
                Err(err) => tracing::warn!(name, %err, "usage index read failed, falling back to full scan"),
            }
        }

        let bare = name.to_string();
        let prefixed = format!("GV:{name}");
        let mut out = Vec::new();

        for (table, columns) in DIRECT_REFERENCE_COLUMNS {
            for column in *columns {
                let query = format!("SELECT id FROM {table} WHERE {column} = $1 OR {column} = $2");
                let rows = sqlx::query(&query).bind(&bare).bind(&prefixed).fetch_all(&self.pool).await?;
                out.extend(rows.into_iter().map(|row| UsageRef {
                    block_kind: (*table).to_string(),
                    block_id: row.get("id"),
                }));
            }
        }

        for (table, column) in JSON_ARRAY_REFERENCE_COLUMNS {
            let query = format!(
                "SELECT id FROM {table} WHERE {column} @> to_jsonb($1::text) OR {column} @> to_jsonb($2::text)",
            );
            let rows = sqlx::query(&query).bind(&bare).bind(&prefixed).fetch_all(&self.pool).await?;
            out.extend(rows.into_iter().map(|row| UsageRef {
                block_kind: (*table).to_string(),
                block_id: row.get("id"),
            }));
        }

        for (table, column) in ALIAS_MARKER_COLUMNS {
            let query = format!("SELECT id FROM {table} WHERE {column}::text LIKE '%' || $1 || '%'");
            let rows = sqlx::query(&query)
                .bind(format!("@GV:{name}"))
                .fetch_all(&self.pool)
                .await?;
            out.extend(rows.into_iter().map(|row| UsageRef {
                block_kind: (*table).to_string(),
                block_id: row.get("id"),
            }));
        }

        if let Some(usage_index) = &self.usage_index {
            if let Err(err) = usage_index.put(name, &out).await {
                tracing::warn!(name, %err, "failed to populate usage index cache");
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_reference_tables_cover_every_block_kind_with_a_named_reference() {
        let tables: Vec<&str> = DIRECT_REFERENCE_COLUMNS.iter().map(|(t, _)| *t).collect();
        assert!(tables.contains(&"timeout_blocks"));
        assert!(tables.contains(&"pid_tuning_sessions"));
    }
}
