use std::sync::Arc;

use askql_core::config::{DatabaseConfig, DriverKind};
use askql_core::database::{
    CellValue, Connector, DatabaseConnection, DatabaseError, QueryResult, QueryRow,
};
use askql_core::schema::{ColumnSchema, ForeignKeySchema, SchemaCatalog, TableSchema};
use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Opts, OptsBuilder, Pool, Row, Value};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlConnector;

#[async_trait]
impl Connector for MysqlConnector {
    async fn connect(
        &self,
        config: &DatabaseConfig,
    ) -> Result<Arc<dyn DatabaseConnection>, DatabaseError> {
        let pool = Pool::new(opts_from_config(config)?);
        let mut conn = pool.get_conn().await.map_err(to_database_error)?;
        conn.ping().await.map_err(to_database_error)?;
        drop(conn);
        debug!(host = config.host_or_default(), "mysql connection verified");

        Ok(Arc::new(MysqlConnection { pool }))
    }
}

#[derive(Debug)]
pub struct MysqlConnection {
    pool: Pool,
}

impl MysqlConnection {
    async fn load_catalog(&self, conn: &mut Conn) -> Result<SchemaCatalog, mysql_async::Error> {
        let database: Option<String> = conn.query_first("SELECT DATABASE()").await?.flatten();
        let Some(database) = database else {
            return Ok(SchemaCatalog::default());
        };

        let table_names = conn
            .exec_map(
                "SELECT TABLE_NAME \
                 FROM information_schema.TABLES \
                 WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE' \
                 ORDER BY TABLE_NAME",
                (database.clone(),),
                |table_name: String| table_name,
            )
            .await?;

        let mut tables = Vec::with_capacity(table_names.len());
        for table in table_names {
            let columns = conn
                .exec_map(
                    "SELECT COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE, COLUMN_DEFAULT, COLUMN_KEY, EXTRA \
                     FROM information_schema.COLUMNS \
                     WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
                     ORDER BY ORDINAL_POSITION",
                    (database.clone(), table.clone()),
                    |(name, data_type, nullable, default_value, key, extra): (
                        String,
                        String,
                        String,
                        Option<String>,
                        String,
                        String,
                    )| ColumnSchema {
                        name,
                        data_type,
                        nullable: nullable.eq_ignore_ascii_case("YES"),
                        default_value,
                        primary_key: key.eq_ignore_ascii_case("PRI"),
                        auto_increment: extra.to_ascii_lowercase().contains("auto_increment"),
                    },
                )
                .await?;

            let foreign_keys = conn
                .exec_map(
                    "SELECT CONSTRAINT_NAME, COLUMN_NAME, REFERENCED_TABLE_NAME, REFERENCED_COLUMN_NAME \
                     FROM information_schema.KEY_COLUMN_USAGE \
                     WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
                       AND REFERENCED_TABLE_NAME IS NOT NULL \
                     ORDER BY CONSTRAINT_NAME, ORDINAL_POSITION",
                    (database.clone(), table.clone()),
                    |(constraint_name, column_name, referenced_table, referenced_column): (
                        String,
                        String,
                        String,
                        String,
                    )| ForeignKeySchema {
                        constraint_name,
                        column_name,
                        referenced_table,
                        referenced_column,
                    },
                )
                .await?;

            tables.push(TableSchema {
                name: table,
                columns,
                foreign_keys,
            });
        }

        Ok(SchemaCatalog {
            database: Some(database),
            tables,
        })
    }
}

#[async_trait]
impl DatabaseConnection for MysqlConnection {
    fn driver(&self) -> DriverKind {
        DriverKind::Mysql
    }

    async fn schema(&self) -> Result<String, DatabaseError> {
        let mut conn = self.pool.get_conn().await.map_err(to_database_error)?;
        let catalog = self
            .load_catalog(&mut conn)
            .await
            .map_err(to_database_error)?;
        if catalog.database.is_none() {
            return Err(DatabaseError::new(
                "no database selected; set one in the connection settings",
            ));
        }
        Ok(catalog.render())
    }

    async fn execute(&self, sql: &str) -> Result<QueryResult, DatabaseError> {
        let mut conn = self.pool.get_conn().await.map_err(to_database_error)?;
        let mut result = conn.query_iter(sql).await.map_err(to_database_error)?;

        let columns = result
            .columns()
            .map(|columns| {
                columns
                    .iter()
                    .map(|column| column.name_str().into_owned())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let rows = result
            .collect::<Row>()
            .await
            .map_err(to_database_error)?
            .into_iter()
            .map(row_to_query_row)
            .collect::<Vec<_>>();
        let affected = result.affected_rows();
        drop(result);

        Ok(QueryResult {
            rows_affected: if columns.is_empty() { Some(affected) } else { None },
            columns,
            rows,
        })
    }

    async fn close(&self) -> Result<(), DatabaseError> {
        self.pool
            .clone()
            .disconnect()
            .await
            .map_err(to_database_error)
    }
}

fn opts_from_config(config: &DatabaseConfig) -> Result<Opts, DatabaseError> {
    if let Some(url) = config.url() {
        return Opts::from_url(url).map_err(|error| DatabaseError::new(error.to_string()));
    }

    let mut builder = OptsBuilder::default()
        .ip_or_hostname(config.host_or_default().to_string())
        .tcp_port(config.port_or_default().unwrap_or(3306))
        .user(config.user.clone());

    if let Some(password) = &config.password {
        builder = builder.pass(Some(password.clone()));
    }

    if let Some(database) = &config.database {
        builder = builder.db_name(Some(database.clone()));
    }

    Ok(Opts::from(builder))
}

fn row_to_query_row(row: Row) -> QueryRow {
    let values = row
        .unwrap()
        .into_iter()
        .map(mysql_value_to_cell)
        .collect::<Vec<_>>();
    QueryRow::new(values)
}

fn mysql_value_to_cell(value: Value) -> CellValue {
    match value {
        Value::NULL => CellValue::Null,
        Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(text) => CellValue::Text(text),
            Err(error) => CellValue::Bytes(error.into_bytes()),
        },
        Value::Int(value) => CellValue::Int(value),
        Value::UInt(value) => CellValue::UInt(value),
        Value::Float(value) => CellValue::Float(f64::from(value)),
        Value::Double(value) => CellValue::Float(value),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            let date = format!("{year:04}-{month:02}-{day:02}");
            let text = match (hour, minute, second, micros) {
                (0, 0, 0, 0) => date,
                (_, _, _, 0) => format!("{date} {hour:02}:{minute:02}:{second:02}"),
                _ => format!("{date} {hour:02}:{minute:02}:{second:02}.{micros:06}"),
            };
            CellValue::Text(text)
        }
        Value::Time(is_negative, days, hours, minutes, seconds, micros) => {
            let sign = if is_negative { "-" } else { "" };
            let total_hours = days * 24 + u32::from(hours);
            let text = if micros == 0 {
                format!("{sign}{total_hours:02}:{minutes:02}:{seconds:02}")
            } else {
                format!("{sign}{total_hours:02}:{minutes:02}:{seconds:02}.{micros:06}")
            };
            CellValue::Text(text)
        }
    }
}

fn to_database_error(error: mysql_async::Error) -> DatabaseError {
    DatabaseError::new(error.to_string())
}

#[cfg(test)]
mod tests {
    use askql_core::config::{DatabaseConfig, DriverKind};
    use askql_core::database::CellValue;
    use mysql_async::Value;

    use super::{mysql_value_to_cell, opts_from_config};

    #[test]
    fn value_conversion_keeps_types() {
        assert_eq!(mysql_value_to_cell(Value::NULL), CellValue::Null);
        assert_eq!(
            mysql_value_to_cell(Value::Bytes(b"hello".to_vec())),
            CellValue::Text("hello".to_string())
        );
        assert_eq!(
            mysql_value_to_cell(Value::Bytes(vec![0xff, 0xfe])),
            CellValue::Bytes(vec![0xff, 0xfe])
        );
        assert_eq!(mysql_value_to_cell(Value::Int(-8)), CellValue::Int(-8));
        assert_eq!(mysql_value_to_cell(Value::UInt(8)), CellValue::UInt(8));
    }

    #[test]
    fn temporal_values_drop_empty_components() {
        assert_eq!(
            mysql_value_to_cell(Value::Date(2024, 2, 29, 0, 0, 0, 0)).to_string(),
            "2024-02-29"
        );
        assert_eq!(
            mysql_value_to_cell(Value::Date(2024, 2, 29, 13, 5, 9, 0)).to_string(),
            "2024-02-29 13:05:09"
        );
        assert_eq!(
            mysql_value_to_cell(Value::Time(true, 1, 2, 3, 4, 500)).to_string(),
            "-26:03:04.000500"
        );
    }

    #[test]
    fn opts_use_host_port_user_and_database() {
        let mut config = DatabaseConfig::new(DriverKind::Mysql);
        config.host = Some("db.internal".to_string());
        config.port = Some(3307);
        config.user = Some("reporter".to_string());
        config.database = Some("shop".to_string());

        let opts = opts_from_config(&config).expect("opts should build");
        assert_eq!(opts.ip_or_hostname(), "db.internal");
        assert_eq!(opts.tcp_port(), 3307);
        assert_eq!(opts.user(), Some("reporter"));
        assert_eq!(opts.db_name(), Some("shop"));
    }

    #[test]
    fn url_takes_precedence_over_fields() {
        let mut config = DatabaseConfig::new(DriverKind::Mysql);
        config.url = Some("mysql://app@localhost:3310/orders".to_string());
        config.host = Some("ignored".to_string());

        let opts = opts_from_config(&config).expect("url should parse");
        assert_eq!(opts.tcp_port(), 3310);
        assert_eq!(opts.db_name(), Some("orders"));

        config.url = Some("postgres://nope".to_string());
        assert!(opts_from_config(&config).is_err());
    }
}
