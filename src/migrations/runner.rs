//! Applies migrations and keeps the ledger
//!
//! Every applied migration gets a ledger row; `up` skips anything already
//! recorded, so re-running is harmless. Each migration runs inside its
//! own transaction together with its ledger insert, so a failed body
//! leaves no ledger entry behind.

use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};

use crate::database::Database;
use crate::error::{OrmError, OrmResult};
use crate::model::Model;
use crate::query::QueryBuilder;
use crate::value::DatabaseValue;

use super::definitions::{Migration, MigrationRecord, LEDGER_TABLE};

impl Model for MigrationRecord {
    fn table_name() -> &'static str {
        LEDGER_TABLE
    }

    fn primary_key(&self) -> Option<JsonValue> {
        Some(JsonValue::String(self.id.clone()))
    }

    fn set_primary_key(&mut self, value: JsonValue) {
        if let Some(id) = value.as_str() {
            self.id = id.to_string();
        }
    }

    fn uses_timestamps() -> bool {
        false
    }
}

pub struct MigrationRunner {
    migrations: Vec<Migration>,
}

impl MigrationRunner {
    pub fn new(mut migrations: Vec<Migration>) -> Self {
        migrations.sort_by(|a, b| a.id.cmp(&b.id));
        Self { migrations }
    }

    /// Loads every `.sql` file in `dir`, ordered by numeric prefix.
    pub async fn load_dir(dir: impl AsRef<Path>) -> OrmResult<Self> {
        let dir = dir.as_ref();
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| OrmError::Migration(format!("cannot read {}: {}", dir.display(), e)))?;
        let mut migrations = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| OrmError::Migration(format!("cannot read {}: {}", dir.display(), e)))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("sql") {
                continue;
            }
            let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
                OrmError::Migration(format!("cannot read {}: {}", path.display(), e))
            })?;
            migrations.push(Migration::parse(&path, &content)?);
        }
        Ok(Self::new(migrations))
    }

    /// Writes a numbered stub file into `dir` and returns its path.
    pub async fn create_stub(dir: impl AsRef<Path>, name: &str) -> OrmResult<PathBuf> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| OrmError::Migration(format!("cannot create {}: {}", dir.display(), e)))?;

        // Unfilled stubs don't parse as migrations, so number off
        // filenames alone.
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| OrmError::Migration(format!("cannot read {}: {}", dir.display(), e)))?;
        let mut highest = 0u32;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| OrmError::Migration(format!("cannot read {}: {}", dir.display(), e)))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("sql") {
                continue;
            }
            if let Some(prefix) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.split('_').next())
                .and_then(|s| s.parse::<u32>().ok())
            {
                highest = highest.max(prefix);
            }
        }
        let next = highest + 1;
        let path = dir.join(format!("{:04}_{}.sql", next, name));
        tokio::fs::write(&path, "-- up\n\n-- down\n")
            .await
            .map_err(|e| OrmError::Migration(format!("cannot write {}: {}", path.display(), e)))?;
        Ok(path)
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    async fn ensure_ledger(&self, db: &Database) -> OrmResult<()> {
        if !db.kind().is_relational() {
            // Document stores create collections on first insert.
            return Ok(());
        }
        let stmt = crate::adapter::Statement::Sql {
            sql: format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 id VARCHAR(255) PRIMARY KEY, \
                 name VARCHAR(255) NOT NULL, \
                 batch BIGINT NOT NULL, \
                 applied_at VARCHAR (64) NOT NULL)",
                LEDGER_TABLE
            ),
            params: Vec::new(),
        };
        db.execute_invalidating(LEDGER_TABLE, &stmt)
            .await
            .map_err(|e| OrmError::Migration(format!("ledger setup failed: {}", e)))?;
        Ok(())
    }

    async fn applied(&self, db: &Database) -> OrmResult<Vec<MigrationRecord>> {
        let rows = QueryBuilder::<MigrationRecord>::table(LEDGER_TABLE)
            .order_by_asc("id")
            .get(db)
            .await
            .map_err(|e| OrmError::Migration(format!("ledger read failed: {}", e)))?;
        rows.iter()
            .map(MigrationRecord::from_row)
            .collect::<OrmResult<Vec<_>>>()
            .map_err(|e| OrmError::Migration(format!("ledger row unreadable: {}", e)))
    }

    /// Each loaded migration with whether the ledger says it ran.
    pub async fn status(&self, db: &Database) -> OrmResult<Vec<(Migration, bool)>> {
        self.ensure_ledger(db).await?;
        let applied = self.applied(db).await?;
        Ok(self
            .migrations
            .iter()
            .map(|m| {
                let done = applied.iter().any(|r| r.id == m.id);
                (m.clone(), done)
            })
            .collect())
    }

    /// Applies every pending migration, in order. Returns how many ran.
    pub async fn up(&self, db: &Database) -> OrmResult<usize> {
        self.ensure_ledger(db).await?;
        let applied = self.applied(db).await?;
        let batch = applied.iter().map(|r| r.batch).max().unwrap_or(0) + 1;

        let mut count = 0;
        for migration in &self.migrations {
            if applied.iter().any(|r| r.id == migration.id) {
                continue;
            }
            self.apply_one(db, migration, batch).await?;
            count += 1;
        }
        if count > 0 {
            tracing::info!(batch, count, "migrations applied");
        }
        Ok(count)
    }

    async fn apply_one(&self, db: &Database, migration: &Migration, batch: i64) -> OrmResult<()> {
        tracing::info!(migration = %migration.full_name(), "applying");
        let statements: Vec<crate::adapter::Statement> = migration
            .up_statements()
            .into_iter()
            .map(|sql| crate::adapter::Statement::Sql {
                sql,
                params: Vec::new(),
            })
            .collect();
        let ledger_insert = crate::adapter::Statement::Sql {
            sql: format!(
                "INSERT INTO {} (id, name, batch, applied_at) VALUES ($1, $2, $3, $4)",
                LEDGER_TABLE
            ),
            params: vec![
                DatabaseValue::String(migration.id.clone()),
                DatabaseValue::String(migration.name.clone()),
                DatabaseValue::Int64(batch),
                DatabaseValue::String(chrono::Utc::now().to_rfc3339()),
            ],
        };
        let ledger_insert = self.rewrite_placeholders(db, ledger_insert);

        db.transaction(move |tx| {
            Box::pin(async move {
                for stmt in &statements {
                    tx.execute(stmt).await?;
                }
                tx.execute(&ledger_insert).await?;
                Ok(())
            })
        })
        .await
        .map_err(|e| {
            OrmError::Migration(format!("{} failed: {}", migration.full_name(), e))
        })?;
        Ok(())
    }

    /// Rolls the most recent batch back, newest migration first.
    pub async fn down(&self, db: &Database) -> OrmResult<usize> {
        self.ensure_ledger(db).await?;
        let applied = self.applied(db).await?;
        let Some(last_batch) = applied.iter().map(|r| r.batch).max() else {
            return Ok(0);
        };

        let mut records: Vec<&MigrationRecord> =
            applied.iter().filter(|r| r.batch == last_batch).collect();
        records.sort_by(|a, b| b.id.cmp(&a.id));

        let mut count = 0;
        for record in records {
            let migration = self
                .migrations
                .iter()
                .find(|m| m.id == record.id)
                .ok_or_else(|| {
                    OrmError::Migration(format!(
                        "applied migration {} has no local file to roll back with",
                        record.id
                    ))
                })?;
            if migration.down_sql.is_empty() {
                return Err(OrmError::Migration(format!(
                    "{} has no `-- down` section",
                    migration.full_name()
                )));
            }
            self.revert_one(db, migration).await?;
            count += 1;
        }
        tracing::info!(batch = last_batch, count, "batch rolled back");
        Ok(count)
    }

    async fn revert_one(&self, db: &Database, migration: &Migration) -> OrmResult<()> {
        tracing::info!(migration = %migration.full_name(), "reverting");
        let statements: Vec<crate::adapter::Statement> = migration
            .down_statements()
            .into_iter()
            .map(|sql| crate::adapter::Statement::Sql {
                sql,
                params: Vec::new(),
            })
            .collect();
        let ledger_delete = self.rewrite_placeholders(
            db,
            crate::adapter::Statement::Sql {
                sql: format!("DELETE FROM {} WHERE id = $1", LEDGER_TABLE),
                params: vec![DatabaseValue::String(migration.id.clone())],
            },
        );

        db.transaction(move |tx| {
            Box::pin(async move {
                for stmt in &statements {
                    tx.execute(stmt).await?;
                }
                tx.execute(&ledger_delete).await?;
                Ok(())
            })
        })
        .await
        .map_err(|e| {
            OrmError::Migration(format!(
                "rollback of {} failed: {}",
                migration.full_name(),
                e
            ))
        })?;
        Ok(())
    }

    /// Ledger statements are written with `$n` placeholders; MySQL wants `?`.
    fn rewrite_placeholders(
        &self,
        db: &Database,
        stmt: crate::adapter::Statement,
    ) -> crate::adapter::Statement {
        match (db.kind(), stmt) {
            (crate::config::BackendKind::MySql, crate::adapter::Statement::Sql { sql, params }) => {
                let mut rewritten = sql;
                for n in (1..=params.len()).rev() {
                    rewritten = rewritten.replace(&format!("${}", n), "?");
                }
                crate::adapter::Statement::Sql {
                    sql: rewritten,
                    params,
                }
            }
            (_, stmt) => stmt,
        }
    }
}
