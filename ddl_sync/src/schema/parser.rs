//! DDL ingestion
//!
//! Bridges `sqlparser`'s statement stream into schema tree fragments, one
//! fragment per statement. Nothing downstream of this module sees parser types.

use sqlparser::ast::{
    AlterColumnOperation, AlterTableOperation, ColumnDef, ColumnOption, Ident, ObjectName,
    ObjectType, Statement, TableConstraint,
};
use sqlparser::dialect::{
    Dialect as SqlDialect, GenericDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect,
};
use sqlparser::parser::Parser;

use crate::config::Dialect;
use crate::error::{Error, Result};
use crate::schema::types::{attr, Node, NodeAction, NodeKind, SchemaTree};
use crate::utils::naming::{get_constraint_name, normalize_identifier};

/// Marker separating the forward and reverse halves of a co-located migration file
pub const DOWN_MARKER: &str = "-- +migrate Down";

/// DDL parser producing schema tree fragments
pub struct DdlParser {
    dialect: Dialect,
    sql_dialect: Box<dyn SqlDialect>,
}

impl DdlParser {
    pub fn new(dialect: Dialect) -> Self {
        let sql_dialect: Box<dyn SqlDialect> = match dialect {
            Dialect::Postgres => Box::new(PostgreSqlDialect {}),
            Dialect::Generic => Box::new(GenericDialect {}),
            Dialect::Mysql => Box::new(MySqlDialect {}),
            Dialect::Sqlite => Box::new(SQLiteDialect {}),
        };

        Self { dialect, sql_dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Parse DDL text into one fragment per statement.
    ///
    /// Statements that carry no structural change (DML, comments, grants...)
    /// are skipped. A co-located `-- +migrate Down` section is ignored.
    pub fn parse_fragments(&self, sql: &str, source_name: &str) -> Result<Vec<SchemaTree>> {
        let sql = strip_down_section(sql);
        let statements = Parser::parse_sql(&*self.sql_dialect, sql)
            .map_err(|e| Error::parse(source_name, e))?;

        let mut fragments = Vec::with_capacity(statements.len());
        for statement in &statements {
            let nodes = self.statement_nodes(statement);
            if nodes.is_empty() {
                tracing::debug!(source = source_name, "Skipping non-structural statement");
                continue;
            }

            let mut fragment = SchemaTree::new(self.dialect.as_str());
            fragment.root.children = nodes;
            fragments.push(fragment);
        }

        Ok(fragments)
    }

    fn statement_nodes(&self, statement: &Statement) -> Vec<Node> {
        match statement {
            Statement::CreateTable(create) => {
                let table_name = object_name(&create.name);
                tracing::debug!(table = %table_name, "Parsed CREATE TABLE");

                let mut table = Node::table(table_name.clone()).with_action(NodeAction::Create);
                for column in &create.columns {
                    table.children.push(column_node(column));
                }
                for constraint in &create.constraints {
                    if let Some(node) = self.constraint_node(&table_name, constraint) {
                        table.children.push(node);
                    }
                }
                vec![table]
            }
            Statement::AlterTable { name, operations, .. } => {
                let table_name = object_name(name);
                tracing::debug!(
                    table = %table_name,
                    operations = operations.len(),
                    "Parsed ALTER TABLE"
                );

                let mut table = Node::table(table_name.clone()).with_action(NodeAction::Alter);
                for operation in operations {
                    match self.alter_operation_node(&table_name, operation) {
                        Some(node) => table.children.push(node),
                        None => tracing::debug!(
                            table = %table_name,
                            operation = %operation,
                            "Ignoring unsupported ALTER TABLE operation"
                        ),
                    }
                }
                if table.children.is_empty() {
                    Vec::new()
                } else {
                    vec![table]
                }
            }
            Statement::Drop { object_type: ObjectType::Table, names, .. } => names
                .iter()
                .map(|name| Node::table(object_name(name)).with_action(NodeAction::Drop))
                .collect(),
            Statement::Drop { object_type: ObjectType::Index, names, .. } => names
                .iter()
                .map(|name| Node::index(object_name(name)).with_action(NodeAction::Drop))
                .collect(),
            Statement::CreateIndex(index) => {
                let table_name = object_name(&index.table_name);
                let columns: Vec<String> = index
                    .columns
                    .iter()
                    .map(|c| c.expr.to_string())
                    .collect();
                let name = match &index.name {
                    Some(name) => object_name(name),
                    None => get_constraint_name(
                        &normalize_identifier(&table_name),
                        &columns.iter().map(|c| normalize_identifier(c)).collect::<Vec<_>>(),
                        "idx",
                        self.dialect,
                    ),
                };
                tracing::debug!(index = %name, table = %table_name, "Parsed CREATE INDEX");

                vec![Node::index(name)
                    .with_attr(attr::TABLE, table_name)
                    .with_attr(attr::COLUMNS, columns)
                    .with_attr(attr::UNIQUE, index.unique)
                    .with_action(NodeAction::Create)]
            }
            _ => Vec::new(),
        }
    }

    fn alter_operation_node(
        &self,
        table_name: &str,
        operation: &AlterTableOperation,
    ) -> Option<Node> {
        match operation {
            AlterTableOperation::AddColumn { column_def, .. } => {
                Some(column_node(column_def).with_action(NodeAction::Create))
            }
            AlterTableOperation::DropColumn { column_name, .. } => {
                Some(
                    Node::new(NodeKind::Column, column_name.value.clone())
                        .with_action(NodeAction::Drop),
                )
            }
            AlterTableOperation::AlterColumn { column_name, op } => {
                let column = Node::new(NodeKind::Column, column_name.value.clone());
                let node = match op {
                    AlterColumnOperation::SetDataType { data_type, .. } => column
                        .with_attr(attr::TYPE, data_type.to_string())
                        .with_action(NodeAction::AlterType),
                    AlterColumnOperation::SetNotNull => column.with_action(NodeAction::SetNotNull),
                    AlterColumnOperation::DropNotNull => {
                        column.with_action(NodeAction::DropNotNull)
                    }
                    AlterColumnOperation::SetDefault { value } => column
                        .with_attr(attr::DEFAULT, value.to_string())
                        .with_action(NodeAction::SetDefault),
                    AlterColumnOperation::DropDefault => {
                        column.with_action(NodeAction::DropDefault)
                    }
                    _ => return None,
                };
                Some(node)
            }
            AlterTableOperation::AddConstraint(constraint) => self
                .constraint_node(table_name, constraint)
                .map(|node| node.with_action(NodeAction::Create)),
            AlterTableOperation::DropConstraint { name, .. } => {
                Some(Node::constraint(name.value.clone()).with_action(NodeAction::Drop))
            }
            _ => None,
        }
    }

    /// Table-level constraint clause as a Constraint node.
    /// Unnamed constraints get the name PostgreSQL would give them.
    fn constraint_node(&self, table_name: &str, constraint: &TableConstraint) -> Option<Node> {
        let table_key = normalize_identifier(table_name);

        match constraint {
            TableConstraint::Unique { name, columns, .. } => {
                let columns = ident_values(columns);
                let name = self.constraint_name(name, &table_key, &columns, "key");
                Some(
                    Node::constraint(name)
                        .with_attr(attr::KIND, "unique")
                        .with_attr(attr::COLUMNS, columns)
                        .with_attr(attr::UNIQUE, true),
                )
            }
            TableConstraint::PrimaryKey { name, columns, .. } => {
                let columns = ident_values(columns);
                let name = self.constraint_name(name, &table_key, &[], "pkey");
                Some(
                    Node::constraint(name)
                        .with_attr(attr::KIND, "primary_key")
                        .with_attr(attr::COLUMNS, columns)
                        .with_attr(attr::PRIMARY_KEY, true),
                )
            }
            TableConstraint::ForeignKey {
                name,
                columns,
                foreign_table,
                referred_columns,
                ..
            } => {
                let columns = ident_values(columns);
                let name = self.constraint_name(name, &table_key, &columns, "fkey");
                Some(
                    Node::constraint(name)
                        .with_attr(attr::KIND, "foreign_key")
                        .with_attr(attr::COLUMNS, columns)
                        .with_attr(attr::REFERENCES, object_name(foreign_table))
                        .with_attr(attr::REFERENCED_COLUMNS, ident_values(referred_columns)),
                )
            }
            TableConstraint::Check { name, expr, .. } => {
                let name = self.constraint_name(name, &table_key, &[], "check");
                Some(
                    Node::constraint(name)
                        .with_attr(attr::KIND, "check")
                        .with_attr(attr::CHECK, expr.to_string()),
                )
            }
            other => {
                tracing::debug!(
                    table = table_name,
                    constraint = %other,
                    "Ignoring unsupported table constraint"
                );
                None
            }
        }
    }

    fn constraint_name(
        &self,
        declared: &Option<Ident>,
        table_key: &str,
        columns: &[String],
        suffix: &str,
    ) -> String {
        match declared {
            Some(ident) => ident.value.clone(),
            None => {
                let columns: Vec<String> =
                    columns.iter().map(|c| normalize_identifier(c)).collect();
                get_constraint_name(table_key, &columns, suffix, self.dialect)
            }
        }
    }
}

impl Default for DdlParser {
    fn default() -> Self {
        Self::new(Dialect::default())
    }
}

/// The forward half of a migration file
pub fn strip_down_section(sql: &str) -> &str {
    match sql.find(DOWN_MARKER) {
        Some(pos) => &sql[..pos],
        None => sql,
    }
}

/// Unqualified object name (`public.users` -> `users`)
fn object_name(name: &ObjectName) -> String {
    name.0
        .last()
        .map(|ident| ident.value.clone())
        .unwrap_or_default()
}

fn ident_values(idents: &[Ident]) -> Vec<String> {
    idents.iter().map(|ident| ident.value.clone()).collect()
}

/// Column definition with its inline modifiers folded into attributes
fn column_node(column: &ColumnDef) -> Node {
    let mut node = Node::column(column.name.value.clone(), column.data_type.to_string());
    let mut nullable = true;

    for option in &column.options {
        match &option.option {
            ColumnOption::NotNull => nullable = false,
            ColumnOption::Null => nullable = true,
            ColumnOption::Default(expr) => node.set_attr(attr::DEFAULT, expr.to_string()),
            ColumnOption::Unique { is_primary: true, .. } => {
                nullable = false;
                node.set_attr(attr::PRIMARY_KEY, true);
            }
            ColumnOption::Unique { is_primary: false, .. } => node.set_attr(attr::UNIQUE, true),
            ColumnOption::ForeignKey {
                foreign_table,
                referred_columns,
                ..
            } => {
                let reference = format!(
                    "{}({})",
                    object_name(foreign_table),
                    ident_values(referred_columns).join(", ")
                );
                node.set_attr(attr::FOREIGN_KEY, reference);
            }
            ColumnOption::Check(expr) => node.set_attr(attr::CHECK, expr.to_string()),
            _ => {}
        }
    }

    node.set_attr(attr::NULLABLE, nullable);
    node
}
