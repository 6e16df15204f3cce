mod logging;

use std::error::Error;
use std::path::{Path, PathBuf};

use askql_adapters::default_registry;
use askql_core::config::{self, AppConfig, ConfigError, DriverKind, ProviderKind, SslMode};
use askql_core::history::PromptHistory;
use askql_core::registry::BackendRegistry;
use askql_tui::TuiError;
use clap::Parser;
use tracing::{info, warn};

/// Ask your database questions in plain language.
#[derive(Debug, Parser)]
#[command(name = "askql", version, about)]
struct Cli {
    /// Path to config.toml (defaults to the askql config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Database type (postgres, mysql, sqlite)
    #[arg(long, visible_alias = "driver")]
    dbtype: Option<DriverKind>,

    /// Connection string; other connection flags are ignored when set
    #[arg(long)]
    connection: Option<String>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long)]
    user: Option<String>,

    #[arg(long)]
    password: Option<String>,

    /// Database name
    #[arg(long)]
    db: Option<String>,

    /// SQLite database file
    #[arg(long)]
    file: Option<PathBuf>,

    /// PostgreSQL SSL mode (disable, allow, prefer, require, verify-ca, verify-full)
    #[arg(long)]
    sslmode: Option<SslMode>,

    /// AI provider (openai, claude, gemini, ollama)
    #[arg(long)]
    provider: Option<ProviderKind>,

    /// Model name (defaults to the provider's default)
    #[arg(long)]
    model: Option<String>,

    /// Environment variable holding the provider API key
    #[arg(long)]
    api_key_env: Option<String>,

    /// Provider endpoint override
    #[arg(long)]
    base_url: Option<String>,

    /// Connection timeout in seconds
    #[arg(long)]
    timeout_connection: Option<u64>,

    /// Query execution timeout in seconds
    #[arg(long)]
    timeout_query: Option<u64>,

    /// Schema fetch timeout in seconds
    #[arg(long)]
    timeout_schema: Option<u64>,

    /// AI generation timeout in seconds
    #[arg(long)]
    timeout_ai: Option<u64>,
}

impl Cli {
    fn config_dir(&self) -> Result<PathBuf, ConfigError> {
        match self.config.as_deref().and_then(Path::parent) {
            Some(parent) if !parent.as_os_str().is_empty() => Ok(parent.to_path_buf()),
            Some(_) => Ok(PathBuf::from(".")),
            None => config::default_config_dir(),
        }
    }

    fn config_path(&self, config_dir: &Path) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| config_dir.join(config::CONFIG_FILE_NAME))
    }

    /// Flags win over values read from the config file.
    fn apply(&self, config: &mut AppConfig) {
        let database = &mut config.database;
        if let Some(driver) = self.dbtype {
            database.driver = driver;
        }
        overlay(&mut database.url, &self.connection);
        overlay(&mut database.host, &self.host);
        overlay(&mut database.port, &self.port);
        overlay(&mut database.user, &self.user);
        overlay(&mut database.password, &self.password);
        overlay(&mut database.database, &self.db);
        overlay(&mut database.file, &self.file);
        if let Some(sslmode) = self.sslmode {
            database.sslmode = sslmode;
        }

        let ai = &mut config.ai;
        if let Some(provider) = self.provider {
            ai.provider = provider;
        }
        overlay(&mut ai.model, &self.model);
        overlay(&mut ai.api_key_env, &self.api_key_env);
        overlay(&mut ai.base_url, &self.base_url);

        let timeouts = &mut config.timeouts;
        for (slot, flag) in [
            (&mut timeouts.connect_secs, self.timeout_connection),
            (&mut timeouts.query_secs, self.timeout_query),
            (&mut timeouts.schema_secs, self.timeout_schema),
            (&mut timeouts.ai_secs, self.timeout_ai),
        ] {
            if let Some(secs) = flag.filter(|secs| *secs > 0) {
                *slot = secs;
            }
        }
    }
}

fn overlay<T: Clone>(slot: &mut Option<T>, flag: &Option<T>) {
    if let Some(value) = flag {
        *slot = Some(value.clone());
    }
}

fn load_history(path: &Path) -> PromptHistory {
    match PromptHistory::load_from_path(path) {
        Ok(history) => history,
        Err(error) => {
            warn!(%error, "prompt history unavailable, keeping it in memory");
            PromptHistory::in_memory()
        }
    }
}

fn run_app(
    cli: Cli,
    run_tui: impl FnOnce(AppConfig, BackendRegistry, PromptHistory) -> Result<(), TuiError>,
) -> Result<(), Box<dyn Error>> {
    let config_dir = cli.config_dir()?;
    let mut config = AppConfig::load_from_path(cli.config_path(&config_dir))?;
    cli.apply(&mut config);
    config.validate()?;

    let history = load_history(&config.history_path(&config_dir));
    info!(
        driver = %config.database.driver,
        provider = %config.ai.provider,
        "starting askql"
    );
    run_tui(config, default_registry(), history)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let _guard = logging::init_tracing(&cli.config_dir()?.join("logs"))?;
    run_app(cli, askql_tui::run)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io;
    use std::path::Path;

    use askql_core::config::{DriverKind, ProviderKind, SslMode};
    use askql_tui::TuiError;
    use clap::Parser;
    use tempfile::TempDir;

    use super::{run_app, Cli};

    fn cli(config_path: &Path, extra: &[&str]) -> Cli {
        let mut args = vec![
            "askql".to_string(),
            "--config".to_string(),
            config_path.display().to_string(),
        ];
        args.extend(extra.iter().map(ToString::to_string));
        Cli::try_parse_from(args).expect("arguments should parse")
    }

    fn write_config(dir: &TempDir, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join("config.toml");
        fs::write(&path, contents).expect("config should be written");
        path
    }

    #[test]
    fn run_app_hands_file_config_to_the_tui() {
        let temp = TempDir::new().expect("temp dir should be created");
        let path = write_config(
            &temp,
            "[database]\ndriver = \"sqlite\"\nfile = \"shop.db\"\n\n[ai]\nprovider = \"ollama\"\n",
        );

        let mut called = false;
        let result = run_app(cli(&path, &[]), |config, registry, history| {
            called = true;
            assert_eq!(config.database.driver, DriverKind::Sqlite);
            assert_eq!(config.ai.provider, ProviderKind::Ollama);
            assert!(registry.drivers().contains(&DriverKind::Sqlite));
            assert!(history.is_empty());
            Ok(())
        });

        assert!(result.is_ok());
        assert!(called);
    }

    #[test]
    fn flags_override_the_config_file() {
        let temp = TempDir::new().expect("temp dir should be created");
        let path = write_config(
            &temp,
            "[database]\ndriver = \"mysql\"\nuser = \"file-user\"\n\n[timeouts]\nquery_secs = 12\n",
        );

        let args = [
            "--dbtype",
            "postgres",
            "--user",
            "flag-user",
            "--db",
            "shop",
            "--sslmode",
            "verify-full",
            "--provider",
            "claude",
            "--model",
            "claude-haiku-4-5",
            "--timeout-ai",
            "90",
            "--timeout-query",
            "0",
        ];
        let result = run_app(cli(&path, &args), |config, _, _| {
            assert_eq!(config.database.driver, DriverKind::Postgres);
            assert_eq!(config.database.user.as_deref(), Some("flag-user"));
            assert_eq!(config.database.database.as_deref(), Some("shop"));
            assert_eq!(config.database.sslmode, SslMode::VerifyFull);
            assert_eq!(config.ai.provider, ProviderKind::Claude);
            assert_eq!(config.ai.model(), Some("claude-haiku-4-5"));
            assert_eq!(config.timeouts.ai_secs, 90);
            assert_eq!(config.timeouts.query_secs, 12);
            Ok(())
        });

        assert!(result.is_ok());
    }

    #[test]
    fn invalid_configuration_stops_before_the_tui() {
        let temp = TempDir::new().expect("temp dir should be created");
        let path = write_config(&temp, "[database]\ndriver = \"sqlite\"\n");

        let result = run_app(cli(&path, &[]), |_, _, _| {
            panic!("tui should not start with an invalid config")
        });

        let error = result.expect_err("validation should fail");
        assert!(error.to_string().contains("sqlite requires a database file"));
    }

    #[test]
    fn history_is_loaded_from_the_config_directory() {
        let temp = TempDir::new().expect("temp dir should be created");
        let path = write_config(&temp, "[database]\ndriver = \"sqlite\"\nfile = \"x.db\"\n");
        fs::write(temp.path().join("history"), "count users\nlist orders\n")
            .expect("history should be written");

        let result = run_app(cli(&path, &[]), |_, _, history| {
            assert_eq!(history.entries(), ["count users", "list orders"]);
            assert_eq!(history.path(), Some(temp.path().join("history").as_path()));
            Ok(())
        });

        assert!(result.is_ok());
    }

    #[test]
    fn run_app_propagates_tui_errors() {
        let temp = TempDir::new().expect("temp dir should be created");
        let path = write_config(&temp, "[database]\ndriver = \"sqlite\"\nfile = \"x.db\"\n");

        let result = run_app(cli(&path, &[]), |_, _, _| {
            Err(TuiError::Io(io::Error::other("boom")))
        });

        assert!(result.is_err());
    }

    #[test]
    fn unknown_driver_is_rejected_by_the_parser() {
        let result = Cli::try_parse_from(["askql", "--dbtype", "oracle"]);
        assert!(result.is_err());
    }

    #[test]
    fn unknown_sslmode_is_rejected_by_the_parser() {
        let result = Cli::try_parse_from(["askql", "--sslmode", "sometimes"]);
        assert!(result.is_err());

        let cli = Cli::try_parse_from(["askql", "--sslmode", "Require"])
            .expect("sslmode should parse case-insensitively");
        assert_eq!(cli.sslmode, Some(SslMode::Require));
    }
}
