use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use askql_core::config::{DatabaseConfig, DriverKind, SslMode};
use askql_core::database::{
    CellValue, Connector, DatabaseConnection, DatabaseError, QueryResult, QueryRow,
};
use askql_core::schema::{ColumnSchema, ForeignKeySchema, SchemaCatalog, TableSchema};
use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::task::AbortHandle;
use tokio_postgres::config::SslMode as WireSslMode;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, warn};

const COLUMNS_SQL: &str = "\
SELECT c.table_name, c.column_name, c.data_type, c.is_nullable, c.column_default,
       EXISTS (
         SELECT 1
         FROM information_schema.table_constraints tc
         JOIN information_schema.key_column_usage k
           ON tc.constraint_name = k.constraint_name
          AND tc.table_schema = k.table_schema
          AND tc.table_name = k.table_name
         WHERE tc.constraint_type = 'PRIMARY KEY'
           AND k.table_schema = c.table_schema
           AND k.table_name = c.table_name
           AND k.column_name = c.column_name
       ) AS is_primary,
       c.is_identity
FROM information_schema.columns c
JOIN information_schema.tables t
  ON t.table_schema = c.table_schema AND t.table_name = c.table_name
WHERE c.table_schema = current_schema() AND t.table_type = 'BASE TABLE'
ORDER BY c.table_name, c.ordinal_position";

const FOREIGN_KEYS_SQL: &str = "\
SELECT tc.table_name, tc.constraint_name, kcu.column_name,
       ccu.table_name AS foreign_table, ccu.column_name AS foreign_column
FROM information_schema.table_constraints tc
JOIN information_schema.key_column_usage kcu
  ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema
JOIN information_schema.constraint_column_usage ccu
  ON ccu.constraint_name = tc.constraint_name AND ccu.table_schema = tc.table_schema
WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = current_schema()
ORDER BY tc.table_name, tc.constraint_name";

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresConnector;

#[async_trait]
impl Connector for PostgresConnector {
    async fn connect(
        &self,
        config: &DatabaseConfig,
    ) -> Result<Arc<dyn DatabaseConnection>, DatabaseError> {
        let client_config = client_config(config)?;
        let (client, driver) = match client_config.get_ssl_mode() {
            WireSslMode::Disable => {
                let (client, connection) = client_config
                    .connect(NoTls)
                    .await
                    .map_err(to_database_error)?;
                (client, spawn_driver(connection))
            }
            _ => {
                let tls = tls_connector(config.sslmode)?;
                let (client, connection) = client_config
                    .connect(tls)
                    .await
                    .map_err(to_database_error)?;
                (client, spawn_driver(connection))
            }
        };

        client
            .simple_query("SELECT 1")
            .await
            .map_err(to_database_error)?;
        debug!("postgres connection verified");

        Ok(Arc::new(PostgresConnection { client, driver }))
    }
}

fn spawn_driver<F>(connection: F) -> AbortHandle
where
    F: Future<Output = Result<(), tokio_postgres::Error>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(error) = connection.await {
            warn!(%error, "postgres connection closed with error");
        }
    })
    .abort_handle()
}

pub struct PostgresConnection {
    client: Client,
    driver: AbortHandle,
}

impl PostgresConnection {
    async fn load_catalog(&self) -> Result<SchemaCatalog, tokio_postgres::Error> {
        let database = self
            .client
            .simple_query("SELECT current_database()")
            .await?
            .into_iter()
            .find_map(|message| match message {
                SimpleQueryMessage::Row(row) => row.get(0).map(str::to_string),
                _ => None,
            });

        let mut tables: BTreeMap<String, TableSchema> = BTreeMap::new();
        for row in data_rows(self.client.simple_query(COLUMNS_SQL).await?) {
            let table_name = text(&row, 0);
            let default_value = row.get(4).map(str::to_string);
            let column = ColumnSchema {
                name: text(&row, 1),
                data_type: text(&row, 2),
                nullable: row.get(3).is_some_and(|value| value.eq_ignore_ascii_case("YES")),
                auto_increment: default_value
                    .as_deref()
                    .is_some_and(|value| value.starts_with("nextval("))
                    || row.get(6).is_some_and(|value| value.eq_ignore_ascii_case("YES")),
                default_value,
                primary_key: row.get(5) == Some("t"),
            };
            tables
                .entry(table_name.clone())
                .or_insert_with(|| TableSchema::new(table_name))
                .columns
                .push(column);
        }

        for row in data_rows(self.client.simple_query(FOREIGN_KEYS_SQL).await?) {
            if let Some(table) = tables.get_mut(&text(&row, 0)) {
                table.foreign_keys.push(ForeignKeySchema {
                    constraint_name: text(&row, 1),
                    column_name: text(&row, 2),
                    referenced_table: text(&row, 3),
                    referenced_column: text(&row, 4),
                });
            }
        }

        Ok(SchemaCatalog {
            database,
            tables: tables.into_values().collect(),
        })
    }
}

#[async_trait]
impl DatabaseConnection for PostgresConnection {
    fn driver(&self) -> DriverKind {
        DriverKind::Postgres
    }

    async fn schema(&self) -> Result<String, DatabaseError> {
        let catalog = self.load_catalog().await.map_err(to_database_error)?;
        Ok(catalog.render())
    }

    async fn execute(&self, sql: &str) -> Result<QueryResult, DatabaseError> {
        let messages = self
            .client
            .simple_query(sql)
            .await
            .map_err(to_database_error)?;
        Ok(collect_result(messages))
    }

    async fn close(&self) -> Result<(), DatabaseError> {
        self.driver.abort();
        Ok(())
    }
}

/// Keeps the last statement that described columns, plus its row count.
fn collect_result(messages: Vec<SimpleQueryMessage>) -> QueryResult {
    let mut result = QueryResult::default();
    let mut columns: Option<Vec<String>> = None;
    let mut rows = Vec::new();

    for message in messages {
        match message {
            SimpleQueryMessage::RowDescription(description) => {
                columns = Some(
                    description
                        .iter()
                        .map(|column| column.name().to_string())
                        .collect(),
                );
                rows.clear();
            }
            SimpleQueryMessage::Row(row) => {
                if columns.is_none() {
                    columns = Some(
                        row.columns()
                            .iter()
                            .map(|column| column.name().to_string())
                            .collect(),
                    );
                }
                let values = (0..row.len())
                    .map(|index| CellValue::from(row.get(index)))
                    .collect();
                rows.push(QueryRow::new(values));
            }
            SimpleQueryMessage::CommandComplete(count) => {
                if let Some(columns) = columns.take() {
                    result = QueryResult::new(columns, std::mem::take(&mut rows));
                } else {
                    result = QueryResult::affected(count);
                }
            }
            _ => {}
        }
    }

    if let Some(columns) = columns {
        result = QueryResult::new(columns, rows);
    }
    result
}

fn data_rows(messages: Vec<SimpleQueryMessage>) -> impl Iterator<Item = SimpleQueryRow> {
    messages.into_iter().filter_map(|message| match message {
        SimpleQueryMessage::Row(row) => Some(row),
        _ => None,
    })
}

fn text(row: &SimpleQueryRow, index: usize) -> String {
    row.get(index).unwrap_or_default().to_string()
}

fn connection_string(config: &DatabaseConfig) -> String {
    if let Some(url) = config.url() {
        return url.to_string();
    }

    let mut out = format!("host={}", quote_value(config.host_or_default()));
    if let Some(port) = config.port_or_default() {
        out.push_str(&format!(" port={port}"));
    }
    if let Some(user) = &config.user {
        out.push_str(&format!(" user={}", quote_value(user)));
    }
    if let Some(password) = &config.password {
        out.push_str(&format!(" password={}", quote_value(password)));
    }
    if let Some(database) = &config.database {
        out.push_str(&format!(" dbname={}", quote_value(database)));
    }
    out.push_str(&format!(" sslmode={}", wire_ssl_mode_name(config.sslmode)));
    out
}

/// A configured sslmode overrides whatever the url asks for.
fn client_config(config: &DatabaseConfig) -> Result<Config, DatabaseError> {
    let mut client_config = connection_string(config)
        .parse::<Config>()
        .map_err(to_database_error)?;
    if config.sslmode != SslMode::Disable {
        client_config.ssl_mode(wire_ssl_mode(config.sslmode));
    }
    Ok(client_config)
}

/// The driver only knows disable, prefer and require; certificate checks
/// happen in the TLS connector.
fn wire_ssl_mode(mode: SslMode) -> WireSslMode {
    match mode {
        SslMode::Disable => WireSslMode::Disable,
        SslMode::Allow | SslMode::Prefer => WireSslMode::Prefer,
        SslMode::Require | SslMode::VerifyCa | SslMode::VerifyFull => WireSslMode::Require,
    }
}

fn wire_ssl_mode_name(mode: SslMode) -> &'static str {
    match wire_ssl_mode(mode) {
        WireSslMode::Disable => "disable",
        WireSslMode::Prefer => "prefer",
        _ => "require",
    }
}

fn tls_connector(mode: SslMode) -> Result<MakeRustlsConnect, DatabaseError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|error| DatabaseError::new(format!("tls setup failed: {error}")))?;

    let tls = if mode.verifies_certificate() {
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        builder.with_root_certificates(roots).with_no_client_auth()
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(EncryptOnly { provider }))
            .with_no_client_auth()
    };
    Ok(MakeRustlsConnect::new(tls))
}

/// libpq `require` semantics: encrypt, but accept any server certificate.
/// Handshake signatures are still checked.
#[derive(Debug)]
struct EncryptOnly {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for EncryptOnly {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

fn quote_value(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}

fn to_database_error(error: tokio_postgres::Error) -> DatabaseError {
    match error.as_db_error() {
        Some(db_error) => DatabaseError::new(format!(
            "{}: {}",
            db_error.severity(),
            db_error.message()
        )),
        None => DatabaseError::new(error.to_string()),
    }
}
