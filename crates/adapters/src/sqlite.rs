use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use askql_core::config::{DatabaseConfig, DriverKind};
use askql_core::database::{
    CellValue, Connector, DatabaseConnection, DatabaseError, QueryResult, QueryRow,
};
use askql_core::schema::{ColumnSchema, ForeignKeySchema, SchemaCatalog, TableSchema};
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use tracing::debug;

const IN_MEMORY: &str = ":memory:";

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteConnector;

#[async_trait]
impl Connector for SqliteConnector {
    async fn connect(
        &self,
        config: &DatabaseConfig,
    ) -> Result<Arc<dyn DatabaseConnection>, DatabaseError> {
        let path = database_path(config)?;
        let connection = run_blocking(move || open(&path)).await?;
        Ok(Arc::new(SqliteConnection {
            inner: Arc::new(Mutex::new(Some(connection))),
        }))
    }
}

/// One rusqlite handle shared behind a mutex; `None` once closed.
pub struct SqliteConnection {
    inner: Arc<Mutex<Option<Connection>>>,
}

impl SqliteConnection {
    async fn with_connection<T, F>(&self, work: F) -> Result<T, DatabaseError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        run_blocking(move || {
            let guard = inner
                .lock()
                .map_err(|_| DatabaseError::new("sqlite connection lock poisoned"))?;
            let connection = guard
                .as_ref()
                .ok_or_else(|| DatabaseError::new("sqlite connection is closed"))?;
            work(connection).map_err(to_database_error)
        })
        .await
    }
}

#[async_trait]
impl DatabaseConnection for SqliteConnection {
    fn driver(&self) -> DriverKind {
        DriverKind::Sqlite
    }

    async fn schema(&self) -> Result<String, DatabaseError> {
        let catalog = self.with_connection(load_catalog).await?;
        Ok(catalog.render())
    }

    async fn execute(&self, sql: &str) -> Result<QueryResult, DatabaseError> {
        let sql = sql.to_string();
        self.with_connection(move |connection| run_statement(connection, &sql))
            .await
    }

    async fn close(&self) -> Result<(), DatabaseError> {
        let inner = Arc::clone(&self.inner);
        run_blocking(move || {
            let connection = inner
                .lock()
                .map_err(|_| DatabaseError::new("sqlite connection lock poisoned"))?
                .take();
            if let Some(connection) = connection {
                connection
                    .close()
                    .map_err(|(_, error)| to_database_error(error))?;
            }
            Ok(())
        })
        .await
    }
}

fn database_path(config: &DatabaseConfig) -> Result<String, DatabaseError> {
    if let Some(file) = &config.file {
        return Ok(file.to_string_lossy().into_owned());
    }

    let url = config
        .url()
        .ok_or_else(|| DatabaseError::new("sqlite needs a database file"))?;
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    if path.is_empty() {
        return Err(DatabaseError::new("sqlite needs a database file"));
    }
    Ok(path.to_string())
}

fn open(path: &str) -> Result<Connection, DatabaseError> {
    let connection = if path == IN_MEMORY {
        Connection::open_in_memory()
    } else {
        if !path.starts_with("file:") && !PathBuf::from(path).exists() {
            return Err(DatabaseError::new(format!(
                "sqlite database `{path}` does not exist"
            )));
        }
        Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI,
        )
    }
    .map_err(to_database_error)?;

    // Forces the file header to be read so a non-database file fails here.
    connection
        .query_row("SELECT count(*) FROM sqlite_master", [], |_| Ok(()))
        .map_err(to_database_error)?;
    debug!(path, "sqlite database opened");
    Ok(connection)
}

fn load_catalog(connection: &Connection) -> Result<SchemaCatalog, rusqlite::Error> {
    let mut statement = connection.prepare(
        "SELECT name FROM sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
         ORDER BY name",
    )?;
    let table_names = statement
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut tables = Vec::with_capacity(table_names.len());
    for name in table_names {
        let quoted = quote_identifier(&name);

        let mut columns_statement = connection.prepare(&format!("PRAGMA table_info({quoted})"))?;
        let columns = columns_statement
            .query_map([], |row| {
                let data_type: String = row.get(2)?;
                let primary_key = row.get::<_, i64>(5)? > 0;
                Ok(ColumnSchema {
                    name: row.get(1)?,
                    auto_increment: primary_key && data_type.eq_ignore_ascii_case("INTEGER"),
                    data_type,
                    nullable: row.get::<_, i64>(3)? == 0,
                    default_value: row.get(4)?,
                    primary_key,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut keys_statement =
            connection.prepare(&format!("PRAGMA foreign_key_list({quoted})"))?;
        let foreign_keys = keys_statement
            .query_map([], |row| {
                let id: i64 = row.get(0)?;
                let referenced_table: String = row.get(2)?;
                Ok(ForeignKeySchema {
                    constraint_name: format!("fk_{name}_{id}"),
                    column_name: row.get(3)?,
                    referenced_column: row
                        .get::<_, Option<String>>(4)?
                        .unwrap_or_else(|| "rowid".to_string()),
                    referenced_table,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        tables.push(TableSchema {
            name,
            columns,
            foreign_keys,
        });
    }

    Ok(SchemaCatalog {
        database: None,
        tables,
    })
}

fn run_statement(connection: &Connection, sql: &str) -> Result<QueryResult, rusqlite::Error> {
    let mut statement = connection.prepare(sql)?;
    if statement.column_count() == 0 {
        let affected = statement.execute([])?;
        return Ok(QueryResult::affected(u64::try_from(affected).unwrap_or(u64::MAX)));
    }

    let columns = statement
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    let width = columns.len();

    let mut rows = Vec::new();
    let mut cursor = statement.query([])?;
    while let Some(row) = cursor.next()? {
        let values = (0..width)
            .map(|index| row.get_ref(index).map(value_to_cell))
            .collect::<Result<Vec<_>, _>>()?;
        rows.push(QueryRow::new(values));
    }

    Ok(QueryResult::new(columns, rows))
}

fn value_to_cell(value: ValueRef<'_>) -> CellValue {
    match value {
        ValueRef::Null => CellValue::Null,
        ValueRef::Integer(value) => CellValue::Int(value),
        ValueRef::Real(value) => CellValue::Float(value),
        ValueRef::Text(bytes) => CellValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => CellValue::Bytes(bytes.to_vec()),
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

async fn run_blocking<T, F>(work: F) -> Result<T, DatabaseError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, DatabaseError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|error| DatabaseError::new(format!("sqlite worker failed: {error}")))?
}

fn to_database_error(error: rusqlite::Error) -> DatabaseError {
    DatabaseError::new(error.to_string())
}
