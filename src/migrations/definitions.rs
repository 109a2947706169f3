//! Migration files and ledger records
//!
//! A migration is one `.sql` file named `<seq>_<name>.sql` containing an
//! `-- up` section and an optional `-- down` section.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{OrmError, OrmResult};

/// Table (or collection) the runner records applied migrations in.
pub const LEDGER_TABLE: &str = "polyorm_migrations";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Ordering key, the numeric prefix of the filename.
    pub id: String,
    pub name: String,
    pub up_sql: String,
    pub down_sql: String,
}

impl Migration {
    pub fn full_name(&self) -> String {
        format!("{}_{}", self.id, self.name)
    }

    /// Parses `0001_create_users.sql` content into its sections.
    pub fn parse(path: &Path, content: &str) -> OrmResult<Self> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| OrmError::Migration(format!("unreadable filename: {:?}", path)))?;
        let (id, name) = stem.split_once('_').ok_or_else(|| {
            OrmError::Migration(format!(
                "migration filename must look like 0001_create_users.sql, got {}",
                stem
            ))
        })?;
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
            return Err(OrmError::Migration(format!(
                "migration prefix must be numeric, got '{}' in {}",
                id, stem
            )));
        }

        let mut up = String::new();
        let mut down = String::new();
        let mut target: Option<&mut String> = None;
        for line in content.lines() {
            let marker = line.trim().to_ascii_lowercase();
            match marker.as_str() {
                "-- up" => {
                    target = Some(&mut up);
                    continue;
                }
                "-- down" => {
                    target = Some(&mut down);
                    continue;
                }
                _ => {}
            }
            if let Some(section) = target.as_deref_mut() {
                section.push_str(line);
                section.push('\n');
            }
        }

        if up.trim().is_empty() {
            return Err(OrmError::Migration(format!(
                "migration {} has no `-- up` section",
                stem
            )));
        }

        Ok(Self {
            id: id.to_string(),
            name: name.to_string(),
            up_sql: up.trim().to_string(),
            down_sql: down.trim().to_string(),
        })
    }

    /// Naive statement split on `;`. Good enough for DDL; statements
    /// containing literal semicolons need one statement per migration.
    pub fn up_statements(&self) -> Vec<String> {
        split_statements(&self.up_sql)
    }

    pub fn down_statements(&self) -> Vec<String> {
        split_statements(&self.down_sql)
    }
}

fn split_statements(sql: &str) -> Vec<String> {
    sql.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// One row of the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub id: String,
    pub name: String,
    pub batch: i64,
    pub applied_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const SAMPLE: &str = "\
-- up
CREATE TABLE users (id BIGINT PRIMARY KEY);
CREATE INDEX users_name_idx ON users (name);

-- down
DROP TABLE users;
";

    #[test]
    fn parses_sections_and_filename() {
        let path = PathBuf::from("migrations/0001_create_users.sql");
        let migration = Migration::parse(&path, SAMPLE).unwrap();
        assert_eq!(migration.id, "0001");
        assert_eq!(migration.name, "create_users");
        assert_eq!(migration.up_statements().len(), 2);
        assert_eq!(migration.down_statements(), vec!["DROP TABLE users"]);
    }

    #[test]
    fn missing_up_section_is_an_error() {
        let path = PathBuf::from("0002_noop.sql");
        let err = Migration::parse(&path, "-- down\nDROP TABLE x;").unwrap_err();
        assert!(matches!(err, OrmError::Migration(_)));
    }

    #[test]
    fn non_numeric_prefix_is_rejected() {
        let path = PathBuf::from("first_create_users.sql");
        assert!(Migration::parse(&path, SAMPLE).is_err());
    }

    #[test]
    fn down_section_is_optional() {
        let path = PathBuf::from("0003_seed.sql");
        let migration = Migration::parse(&path, "-- up\nINSERT INTO t VALUES (1);").unwrap();
        assert!(migration.down_statements().is_empty());
    }
}
