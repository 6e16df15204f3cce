//! Structured schema snapshots and their prompt rendering.
//!
//! Adapters collect a [`SchemaCatalog`] from the engine's catalog tables and
//! hand the rendered text to the session, which passes it verbatim to the
//! generator.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default_value: Option<String>,
    pub primary_key: bool,
    pub auto_increment: bool,
}

impl ColumnSchema {
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            default_value: None,
            primary_key: false,
            auto_increment: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeySchema {
    pub constraint_name: String,
    pub column_name: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    pub foreign_keys: Vec<ForeignKeySchema>,
}

impl TableSchema {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundReference {
    pub table: String,
    pub column: String,
    pub referenced_column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SchemaCatalog {
    pub database: Option<String>,
    pub tables: Vec<TableSchema>,
}

impl SchemaCatalog {
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|table| table.name == name)
    }

    /// Tables holding a foreign key that points at `table_name`.
    #[must_use]
    pub fn inbound_references(&self, table_name: &str) -> Vec<InboundReference> {
        let mut references = Vec::new();
        for candidate in &self.tables {
            for foreign_key in &candidate.foreign_keys {
                if foreign_key.referenced_table == table_name {
                    references.push(InboundReference {
                        table: candidate.name.clone(),
                        column: foreign_key.column_name.clone(),
                        referenced_column: foreign_key.referenced_column.clone(),
                    });
                }
            }
        }

        references.sort_unstable_by(|left, right| {
            left.table
                .cmp(&right.table)
                .then_with(|| left.column.cmp(&right.column))
        });
        references
    }

    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::from("DATABASE SCHEMA:\n");
        if let Some(database) = &self.database {
            out.push_str(&format!("Database: {database}\n"));
        }
        out.push('\n');

        for table in &self.tables {
            out.push_str(&format!("TABLE: {}\n", table.name));
            out.push_str("Columns:\n");
            for column in &table.columns {
                out.push_str(&format!("  {} {}", column.name, column.data_type));
                out.push_str(if column.nullable { " NULL" } else { " NOT NULL" });
                if let Some(default_value) = &column.default_value {
                    out.push_str(&format!(" DEFAULT {default_value}"));
                }
                if column.primary_key {
                    out.push_str(" PRIMARY KEY");
                }
                if column.auto_increment {
                    out.push_str(" AUTO_INCREMENT");
                }
                out.push('\n');
            }

            if !table.foreign_keys.is_empty() {
                out.push_str("Foreign keys:\n");
                for foreign_key in &table.foreign_keys {
                    out.push_str(&format!(
                        "  {}: {} REFERENCES {}({})\n",
                        foreign_key.constraint_name,
                        foreign_key.column_name,
                        foreign_key.referenced_table,
                        foreign_key.referenced_column
                    ));
                }
            }

            let inbound = self.inbound_references(&table.name);
            if !inbound.is_empty() {
                out.push_str("Referenced by:\n");
                for reference in inbound {
                    out.push_str(&format!(
                        "  {}.{} -> {}\n",
                        reference.table, reference.column, reference.referenced_column
                    ));
                }
            }

            out.push('\n');
        }

        out
    }
}
