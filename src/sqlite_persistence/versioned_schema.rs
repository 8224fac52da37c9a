use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection};

/// Offset added to schema versions stored in `PRAGMA user_version`, so that a
/// database created by something else is never mistaken for ours.
pub const BASE_DB_VERSION: usize = 40000;

#[macro_export]
macro_rules! sqlite_column {
    ($name:expr, $sql_type:expr $(, $field:ident = $value:expr)*) => {
        {
            #[allow(unused_mut)]
            let mut column = Column {
                name: $name,
                sql_type: $sql_type,
                is_primary_key: false,
                non_null: false,
            };
            $(
                column.$field = $value;
            )*
            column
        }
    };
}

#[derive(Debug, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
    Real,
}

impl SqlType {
    fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
        }
    }
}

pub struct Column {
    pub name: &'static str,
    pub sql_type: &'static SqlType,
    pub is_primary_key: bool,
    pub non_null: bool,
}

pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column],
    /// (index name, indexed column expression)
    pub indices: &'static [(&'static str, &'static str)],
}

impl Table {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        let columns = self
            .columns
            .iter()
            .map(|column| {
                let mut definition = format!("{} {}", column.name, column.sql_type.as_sql());
                if column.is_primary_key {
                    definition.push_str(" PRIMARY KEY");
                }
                if column.non_null {
                    definition.push_str(" NOT NULL");
                }
                definition
            })
            .collect::<Vec<_>>()
            .join(", ");
        conn.execute(&format!("CREATE TABLE {} ({});", self.name, columns), params![])?;

        for (index_name, expression) in self.indices {
            conn.execute(
                &format!("CREATE INDEX {} ON {}({});", index_name, self.name, expression),
                params![],
            )?;
        }
        Ok(())
    }

    /// Check that the live table has exactly the expected columns, in order,
    /// and that every expected index exists.
    pub fn validate(&self, conn: &Connection) -> Result<()> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", self.name))?;
        let actual: Vec<(String, String, bool, bool)> = stmt
            .query_map(params![], |row| {
                Ok((
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i32>(3)? == 1,
                    row.get::<_, i32>(5)? > 0,
                ))
            })?
            .collect::<rusqlite::Result<_>>()?;

        if actual.len() != self.columns.len() {
            bail!(
                "Table {} has {} columns, expected {}",
                self.name,
                actual.len(),
                self.columns.len()
            );
        }

        for ((name, sql_type, non_null, is_primary_key), expected) in
            actual.iter().zip(self.columns.iter())
        {
            if name != expected.name {
                bail!(
                    "Table {} column name mismatch: expected {}, got {}",
                    self.name,
                    expected.name,
                    name
                );
            }
            if sql_type != expected.sql_type.as_sql() {
                bail!(
                    "Table {} column {} type mismatch: expected {}, got {}",
                    self.name,
                    name,
                    expected.sql_type.as_sql(),
                    sql_type
                );
            }
            if *non_null != expected.non_null || *is_primary_key != expected.is_primary_key {
                bail!("Table {} column {} constraints mismatch", self.name, name);
            }
        }

        for (index_name, _) in self.indices {
            let exists = conn
                .query_row(
                    "SELECT 1 FROM sqlite_master WHERE type='index' AND name=?1 AND tbl_name=?2",
                    params![index_name, self.name],
                    |_| Ok(true),
                )
                .unwrap_or(false);
            if !exists {
                bail!("Table {} is missing index '{}'", self.name, index_name);
            }
        }
        Ok(())
    }
}

pub struct VersionedSchema {
    pub version: usize,
    pub tables: &'static [Table],
    /// Upgrades a database at the previous version to this one.
    pub migration: Option<fn(&Connection) -> Result<()>>,
}

impl VersionedSchema {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table.create(conn)?;
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + self.version),
            [],
        )?;
        Ok(())
    }

    pub fn validate(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table
                .validate(conn)
                .with_context(|| format!("Schema version {} validation failed", self.version))?;
        }
        Ok(())
    }
}

/// Read the schema version of an open database, relative to `BASE_DB_VERSION`.
pub fn read_schema_version(conn: &Connection) -> Result<i64> {
    let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    Ok(raw_version - BASE_DB_VERSION as i64)
}

/// Bring a database to the latest schema, creating it when empty and running
/// every pending migration in one transaction otherwise.
pub fn open_versioned(conn: &mut Connection, schemas: &[VersionedSchema]) -> Result<()> {
    let Some(latest) = schemas.last() else {
        bail!("No schema versions defined");
    };

    let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if raw_version == 0 {
        let tx = conn.transaction()?;
        latest.create(&tx)?;
        tx.commit()?;
        return Ok(());
    }

    let db_version = read_schema_version(conn)?;
    let Some(current) = schemas.iter().find(|s| s.version as i64 == db_version) else {
        bail!("Unknown database schema version {}", db_version);
    };
    current.validate(conn)?;

    if current.version < latest.version {
        let tx = conn.transaction()?;
        for schema in schemas.iter().filter(|s| s.version > current.version) {
            if let Some(migration) = schema.migration {
                migration(&tx).with_context(|| {
                    format!("Failed to run migration to version {}", schema.version)
                })?;
            }
        }
        tx.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + latest.version),
            [],
        )?;
        tx.commit()?;
    }
    Ok(())
}
