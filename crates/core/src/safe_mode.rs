use std::fmt;

use thiserror::Error;

/// Statement prefixes a generated query may start with.
const GENERATED_SQL_KEYWORDS: [&str; 8] = [
    "SELECT", "INSERT", "UPDATE", "DELETE", "WITH", "CREATE", "ALTER", "DROP",
];

/// Leading keywords that need confirmation before running.
const DANGEROUS_KEYWORDS: [&str; 7] = [
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlRiskReason {
    MultiStatement,
    WriteOperation(String),
    DdlOperation(String),
    TransactionControl(String),
    SessionMutation(String),
    UnknownStatement(String),
    Empty,
}

impl fmt::Display for SqlRiskReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MultiStatement => f.write_str("multiple statements"),
            Self::WriteOperation(keyword) => write!(f, "{keyword} writes data"),
            Self::DdlOperation(keyword) => write!(f, "{keyword} changes the schema"),
            Self::TransactionControl(keyword) => write!(f, "{keyword} controls transactions"),
            Self::SessionMutation(keyword) => write!(f, "{keyword} changes session state"),
            Self::UnknownStatement(keyword) => write!(f, "{keyword} is not a plain read"),
            Self::Empty => f.write_str("empty statement"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlSafetyAssessment {
    pub statement_count: usize,
    pub primary_keyword: Option<String>,
    pub reasons: Vec<SqlRiskReason>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidSql {
    #[error("query is empty")]
    Empty,
    #[error("query must start with one of {expected}, got `{found}`")]
    UnexpectedKeyword { found: String, expected: String },
}

/// True when the leading keyword writes data or changes the schema.
///
/// Only the first keyword is looked at, so `WITH ... UPDATE` passes as safe.
#[must_use]
pub fn is_dangerous(sql: &str) -> bool {
    leading_keyword(sql).is_some_and(|keyword| DANGEROUS_KEYWORDS.contains(&keyword.as_str()))
}

/// Shape check for generator output before it is gated and executed.
pub fn validate_generated_sql(sql: &str) -> Result<(), InvalidSql> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(InvalidSql::Empty);
    }

    let keyword = leading_keyword(trimmed).unwrap_or_default();
    if GENERATED_SQL_KEYWORDS.contains(&keyword.as_str()) {
        return Ok(());
    }

    let found = trimmed.split_whitespace().next().unwrap_or_default();
    Err(InvalidSql::UnexpectedKeyword {
        found: found.chars().take(32).collect(),
        expected: GENERATED_SQL_KEYWORDS.join(", "),
    })
}

/// Explains why a statement was gated; shown next to the confirmation prompt.
#[must_use]
pub fn assess_sql_safety(sql: &str) -> SqlSafetyAssessment {
    let statements = split_statements(sql);
    let statement_count = statements.len();
    let mut reasons = Vec::new();

    if statement_count == 0 {
        reasons.push(SqlRiskReason::Empty);
    }
    if statement_count > 1 {
        reasons.push(SqlRiskReason::MultiStatement);
    }

    let primary_keyword = statements
        .first()
        .and_then(|statement| first_keyword(statement));
    for statement in &statements {
        let Some(keyword) = first_keyword(statement) else {
            continue;
        };

        if is_safe_read_keyword(&keyword) {
            continue;
        }

        let reason = if is_write_keyword(&keyword) {
            SqlRiskReason::WriteOperation(keyword)
        } else if is_ddl_keyword(&keyword) {
            SqlRiskReason::DdlOperation(keyword)
        } else if is_transaction_keyword(&keyword) {
            SqlRiskReason::TransactionControl(keyword)
        } else if is_session_mutation_keyword(&keyword) {
            SqlRiskReason::SessionMutation(keyword)
        } else {
            SqlRiskReason::UnknownStatement(keyword)
        };
        if !reasons.contains(&reason) {
            reasons.push(reason);
        }
    }

    SqlSafetyAssessment {
        statement_count,
        primary_keyword,
        reasons,
    }
}

fn leading_keyword(sql: &str) -> Option<String> {
    let keyword = sql
        .trim_start()
        .chars()
        .take_while(|ch| ch.is_ascii_alphabetic())
        .collect::<String>();
    if keyword.is_empty() {
        None
    } else {
        Some(keyword.to_ascii_uppercase())
    }
}

fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = sql.chars().peekable();

    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut in_backtick = false;
    let mut in_line_comment = false;
    let mut in_block_comment = false;

    while let Some(ch) = chars.next() {
        if in_line_comment {
            if ch == '\n' {
                in_line_comment = false;
            }
            continue;
        }

        if in_block_comment {
            if ch == '*' && chars.peek() == Some(&'/') {
                chars.next();
                in_block_comment = false;
            }
            continue;
        }

        let quoted = in_single_quote || in_double_quote || in_backtick;
        if !quoted {
            if ch == '-' && chars.peek() == Some(&'-') {
                chars.next();
                in_line_comment = true;
                continue;
            }

            if ch == '/' && chars.peek() == Some(&'*') {
                chars.next();
                in_block_comment = true;
                continue;
            }
        }

        match ch {
            '\'' if !in_double_quote && !in_backtick => {
                in_single_quote = !in_single_quote;
                current.push(ch);
            }
            '"' if !in_single_quote && !in_backtick => {
                in_double_quote = !in_double_quote;
                current.push(ch);
            }
            '`' if !in_single_quote && !in_double_quote => {
                in_backtick = !in_backtick;
                current.push(ch);
            }
            ';' if !quoted => {
                let statement = current.trim();
                if !statement.is_empty() {
                    statements.push(statement.to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    let trailing = current.trim();
    if !trailing.is_empty() {
        statements.push(trailing.to_string());
    }

    statements
}

fn first_keyword(statement: &str) -> Option<String> {
    statement
        .split(|ch: char| ch.is_whitespace() || ch == '(')
        .find(|part| !part.is_empty())
        .map(str::to_ascii_uppercase)
}

fn is_safe_read_keyword(keyword: &str) -> bool {
    matches!(
        keyword,
        "SELECT" | "SHOW" | "DESCRIBE" | "DESC" | "EXPLAIN" | "WITH" | "VALUES" | "TABLE"
    )
}

fn is_write_keyword(keyword: &str) -> bool {
    matches!(
        keyword,
        "INSERT" | "UPDATE" | "DELETE" | "REPLACE" | "MERGE" | "UPSERT" | "COPY" | "LOAD" | "CALL"
    )
}

fn is_ddl_keyword(keyword: &str) -> bool {
    matches!(
        keyword,
        "CREATE" | "ALTER" | "DROP" | "TRUNCATE" | "RENAME" | "VACUUM" | "REINDEX" | "ANALYZE"
    )
}

fn is_transaction_keyword(keyword: &str) -> bool {
    matches!(
        keyword,
        "START" | "BEGIN" | "COMMIT" | "ROLLBACK" | "SAVEPOINT" | "LOCK" | "UNLOCK"
    )
}

fn is_session_mutation_keyword(keyword: &str) -> bool {
    matches!(
        keyword,
        "SET" | "RESET" | "GRANT" | "REVOKE" | "PRAGMA" | "ATTACH" | "DETACH" | "USE"
    )
}
