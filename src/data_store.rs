// src/data_store.rs
//! Write-side interface to the practice-management database. The command
//! center only ever mutates through this boundary; tenant scoping and
//! row-level constraints are enforced here and by the database itself,
//! never bypassed.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use thiserror::Error;

use crate::command_center::types::Record;
use crate::models::auth::TenantContext;

/// Typed outcome of a rejected mutation, surfaced verbatim in the
/// conversation. The pipeline never retries any of these automatically.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Payload rejected by the store's constraints; message shown verbatim
    #[error("{0}")]
    Validation(String),
    /// Target row vanished between staging and confirmation
    #[error("o registro não existe mais")]
    NotFound,
    #[error("permissão negada pelo banco de dados")]
    PermissionDenied,
    #[error("{0}")]
    Unknown(String),
}

#[async_trait]
pub trait DataStore: Send + Sync {
    async fn insert(
        &self,
        ctx: &TenantContext,
        table: &str,
        dados: &Record,
    ) -> Result<(), StoreError>;

    async fn update(
        &self,
        ctx: &TenantContext,
        table: &str,
        record_id: &str,
        changes: &Record,
    ) -> Result<(), StoreError>;

    async fn delete(
        &self,
        ctx: &TenantContext,
        table: &str,
        record_id: &str,
    ) -> Result<(), StoreError>;
}

/// Tables the agent is allowed to mutate. Anything else is rejected before
/// reaching the database.
const AGENT_TABLES: &[&str] = &[
    "clientes",
    "processos",
    "tarefas",
    "audiencias",
    "documentos",
    "lancamentos",
];

pub struct PgDataStore {
    pool: PgPool,
}

impl PgDataStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn checked_table(table: &str) -> Result<&str, StoreError> {
        AGENT_TABLES
            .iter()
            .find(|t| **t == table)
            .copied()
            .ok_or_else(|| StoreError::Validation(format!("tabela não permitida: {}", table)))
    }

    fn checked_column(column: &str) -> Result<&str, StoreError> {
        let valid = !column.is_empty()
            && column
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
            && !column.starts_with(|c: char| c.is_ascii_digit());
        if valid {
            Ok(column)
        } else {
            Err(StoreError::Validation(format!(
                "coluna inválida: {}",
                column
            )))
        }
    }

    /// Force the tenant id into the payload so an agent-proposed record can
    /// never cross tenants.
    fn scoped(ctx: &TenantContext, record: &Record) -> Record {
        let mut scoped = record.clone();
        scoped.insert(
            "escritorio_id".to_string(),
            Value::from(ctx.escritorio_id),
        );
        scoped
    }
}

#[async_trait]
impl DataStore for PgDataStore {
    async fn insert(
        &self,
        ctx: &TenantContext,
        table: &str,
        dados: &Record,
    ) -> Result<(), StoreError> {
        let table = Self::checked_table(table)?;
        for column in dados.keys() {
            Self::checked_column(column)?;
        }

        let payload = Value::Object(Self::scoped(ctx, dados));
        let sql = format!(
            "INSERT INTO {table} SELECT * FROM jsonb_populate_record(NULL::{table}, $1)"
        );

        sqlx::query(&sql)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        tracing::info!("📝 Inserted record into {} for tenant {}", table, ctx.escritorio_id);
        Ok(())
    }

    async fn update(
        &self,
        ctx: &TenantContext,
        table: &str,
        record_id: &str,
        changes: &Record,
    ) -> Result<(), StoreError> {
        let table = Self::checked_table(table)?;
        if changes.is_empty() {
            return Err(StoreError::Validation(
                "nenhum campo para atualizar".to_string(),
            ));
        }

        let mut columns = Vec::with_capacity(changes.len());
        for column in changes.keys() {
            columns.push(Self::checked_column(column)?);
        }
        let column_list = columns.join(", ");

        let sql = format!(
            "UPDATE {table} SET ({column_list}) = \
             (SELECT {column_list} FROM jsonb_populate_record(NULL::{table}, $1)) \
             WHERE id::text = $2 AND escritorio_id = $3"
        );

        let result = sqlx::query(&sql)
            .bind(Value::Object(changes.clone()))
            .bind(record_id)
            .bind(ctx.escritorio_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        tracing::info!("📝 Updated {} record {} for tenant {}", table, record_id, ctx.escritorio_id);
        Ok(())
    }

    async fn delete(
        &self,
        ctx: &TenantContext,
        table: &str,
        record_id: &str,
    ) -> Result<(), StoreError> {
        let table = Self::checked_table(table)?;

        let sql = format!("DELETE FROM {table} WHERE id::text = $1 AND escritorio_id = $2");

        let result = sqlx::query(&sql)
            .bind(record_id)
            .bind(ctx.escritorio_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        tracing::info!("🗑️ Deleted {} record {} for tenant {}", table, record_id, ctx.escritorio_id);
        Ok(())
    }
}

/// Map database rejections onto the pipeline's error taxonomy. Constraint
/// violations keep the database's own message so the user sees it verbatim.
fn map_sqlx_error(error: sqlx::Error) -> StoreError {
    match &error {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            Some("23502") | Some("23503") | Some("23505") | Some("23514") | Some("22P02")
            | Some("22001") | Some("22003") => StoreError::Validation(db_err.message().to_string()),
            Some("42501") => StoreError::PermissionDenied,
            _ => StoreError::Unknown(db_err.message().to_string()),
        },
        _ => StoreError::Unknown(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tables_are_rejected() {
        assert!(matches!(
            PgDataStore::checked_table("usuarios_admin"),
            Err(StoreError::Validation(_))
        ));
        assert!(PgDataStore::checked_table("clientes").is_ok());
    }

    #[test]
    fn column_names_are_validated() {
        assert!(PgDataStore::checked_column("numero_processo").is_ok());
        assert!(PgDataStore::checked_column("1coluna").is_err());
        assert!(PgDataStore::checked_column("nome; DROP TABLE clientes").is_err());
        assert!(PgDataStore::checked_column("").is_err());
    }

    #[test]
    fn tenant_id_is_forced_into_insert_payloads() {
        let ctx = TenantContext {
            user_id: 1,
            escritorio_id: 7,
        };
        let mut record = Record::new();
        record.insert("nome".to_string(), Value::from("Acme"));
        record.insert("escritorio_id".to_string(), Value::from(999));

        let scoped = PgDataStore::scoped(&ctx, &record);
        assert_eq!(scoped.get("escritorio_id"), Some(&Value::from(7)));
    }
}
