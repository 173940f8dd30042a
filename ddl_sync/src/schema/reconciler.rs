//! Chronological schema reconciler
//!
//! Replays an ordered history of DDL fragments into a single canonical schema
//! tree, without touching a live database.

use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashSet;

use crate::config::Dialect;
use crate::schema::types::{attr, Node, NodeAction, NodeKind, SchemaTree};
use crate::utils::naming::{get_constraint_name, normalize_identifier, unique_constraint_name};

/// One parsed historical statement, tagged with when and where it came from
#[derive(Debug, Clone)]
pub struct TimedFragment {
    pub tree: SchemaTree,
    /// Unix timestamp of the migration file; 0 when it could not be determined
    pub time_key: i64,
    pub provenance: String,
}

impl TimedFragment {
    pub fn new(tree: SchemaTree, time_key: i64, provenance: impl Into<String>) -> Self {
        Self {
            tree,
            time_key,
            provenance: provenance.into(),
        }
    }
}

/// A non-fatal problem met while replaying history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileWarning {
    pub provenance: String,
    pub time_key: i64,
    pub message: String,
}

/// Where a surviving object was last (re-)defined
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectOrigin {
    pub kind: NodeKind,
    pub table: String,
    pub name: String,
    pub time_key: i64,
    pub provenance: String,
}

/// Output of one reconciliation run
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub schema: SchemaTree,
    pub warnings: Vec<ReconcileWarning>,
    pub origins: Vec<ObjectOrigin>,
}

/// Replays fragments in time order.
///
/// Every call to [`Reconciler::reconcile`] works on its own fresh state, so a
/// single reconciler can serve several modules, one run after another or from
/// separate threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reconciler {
    dialect: Dialect,
}

impl Reconciler {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    /// Sort fragments by time key (stable, so ties keep input order) and replay them.
    pub fn reconcile(&self, mut fragments: Vec<TimedFragment>) -> Reconciliation {
        fragments.sort_by_key(|fragment| fragment.time_key);

        let mut state = ReconciliationState::new(self.dialect);
        for fragment in &fragments {
            state.apply_fragment(fragment);
        }

        let reconciliation = state.build_schema();
        tracing::info!(
            fragments = fragments.len(),
            tables = reconciliation.schema.tables().count(),
            indexes = reconciliation.schema.indexes().count(),
            warnings = reconciliation.warnings.len(),
            "Reconciled schema history"
        );
        reconciliation
    }
}

#[derive(Debug, Clone)]
struct Tracked {
    node: Node,
    effective_as_of: i64,
    provenance: String,
}

impl Tracked {
    fn new(mut node: Node, fragment: &TimedFragment) -> Self {
        node.clear_actions();
        Self {
            node,
            effective_as_of: fragment.time_key,
            provenance: fragment.provenance.clone(),
        }
    }

    fn touch(&mut self, fragment: &TimedFragment) {
        self.effective_as_of = fragment.time_key;
        self.provenance = fragment.provenance.clone();
    }
}

#[derive(Debug, Clone)]
struct TableState {
    name: String,
    columns: IndexMap<String, Tracked>,
    constraints: IndexMap<String, Tracked>,
}

struct ReconciliationState {
    dialect: Dialect,
    tables: IndexMap<String, TableState>,
    dropped: HashSet<String>,
    indexes: IndexMap<String, Tracked>,
    warnings: Vec<ReconcileWarning>,
}

impl ReconciliationState {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            tables: IndexMap::new(),
            dropped: HashSet::new(),
            indexes: IndexMap::new(),
            warnings: Vec::new(),
        }
    }

    fn warn(&mut self, fragment: &TimedFragment, message: String) {
        tracing::warn!(
            provenance = %fragment.provenance,
            time_key = fragment.time_key,
            "{}",
            message
        );
        self.warnings.push(ReconcileWarning {
            provenance: fragment.provenance.clone(),
            time_key: fragment.time_key,
            message,
        });
    }

    fn apply_fragment(&mut self, fragment: &TimedFragment) {
        for node in &fragment.tree.root.children {
            if node.name.trim().is_empty() {
                self.warn(fragment, format!("Skipping unnamed {} node", node.kind));
                continue;
            }

            match node.kind {
                NodeKind::Table => self.apply_table(fragment, node),
                NodeKind::Index => self.apply_index(fragment, node),
                other => self.warn(
                    fragment,
                    format!("Skipping top-level {} node '{}'", other, node.name),
                ),
            }
        }
    }

    fn apply_table(&mut self, fragment: &TimedFragment, node: &Node) {
        let key = normalize_identifier(&node.name);

        match node.action {
            // A declaration without an explicit action is a create
            Some(NodeAction::Create) | None => self.create_table(fragment, node, key),
            Some(NodeAction::Alter) => self.alter_table(fragment, node, &key),
            Some(NodeAction::Drop) => {
                tracing::debug!(
                    table = %node.name,
                    provenance = %fragment.provenance,
                    "Replaying DROP TABLE"
                );
                self.tables.shift_remove(&key);
                self.dropped.insert(key);
            }
            Some(other) => self.warn(
                fragment,
                format!("Unsupported action {:?} on table '{}'", other, node.name),
            ),
        }
    }

    fn create_table(&mut self, fragment: &TimedFragment, node: &Node, key: String) {
        if self.dropped.contains(&key) {
            // Tables stay dropped for the rest of the replay, even if created again
            self.warn(
                fragment,
                format!(
                    "Ignoring CREATE TABLE '{}': table was dropped earlier in the history",
                    node.name
                ),
            );
            return;
        }

        tracing::debug!(
            table = %node.name,
            provenance = %fragment.provenance,
            "Replaying CREATE TABLE"
        );

        let mut table = TableState {
            name: node.name.clone(),
            columns: IndexMap::new(),
            constraints: IndexMap::new(),
        };

        for child in &node.children {
            let child_key = normalize_identifier(&child.name);
            let slot = match child.kind {
                NodeKind::Column => &mut table.columns,
                NodeKind::Constraint => &mut table.constraints,
                other => {
                    self.warn(
                        fragment,
                        format!("Skipping {} '{}' inside table '{}'", other, child.name, node.name),
                    );
                    continue;
                }
            };
            if slot.contains_key(&child_key) {
                self.warn(
                    fragment,
                    format!("Duplicate {} '{}' in table '{}'", child.kind, child.name, node.name),
                );
                continue;
            }
            slot.insert(child_key, Tracked::new(child.clone(), fragment));
        }

        if self.tables.contains_key(&key) {
            tracing::debug!(table = %node.name, "Table created again, replacing tracked state");
        }
        self.tables.insert(key, table);
    }

    fn alter_table(&mut self, fragment: &TimedFragment, node: &Node, key: &str) {
        if self.dropped.contains(key) {
            self.warn(
                fragment,
                format!("Ignoring ALTER TABLE '{}': table was dropped", node.name),
            );
            return;
        }
        if !self.tables.contains_key(key) {
            self.warn(
                fragment,
                format!("Ignoring ALTER TABLE '{}': table was never created", node.name),
            );
            return;
        }

        for child in &node.children {
            let outcome = match child.kind {
                NodeKind::Column => self.alter_column(fragment, key, child),
                NodeKind::Constraint => self.alter_constraint(fragment, key, child),
                other => Err(format!("Unsupported {} '{}' in ALTER TABLE", other, child.name)),
            };
            if let Err(message) = outcome {
                self.warn(fragment, format!("{} (table '{}')", message, node.name));
            }
        }
    }

    fn alter_column(
        &mut self,
        fragment: &TimedFragment,
        table_key: &str,
        child: &Node,
    ) -> Result<(), String> {
        let Some(table) = self.tables.get_mut(table_key) else {
            return Ok(());
        };
        let column_key = normalize_identifier(&child.name);

        tracing::debug!(
            table = %table.name,
            column = %child.name,
            action = ?child.action,
            provenance = %fragment.provenance,
            "Replaying column change"
        );

        match child.action {
            Some(NodeAction::Create) => {
                if table.columns.contains_key(&column_key) {
                    return Err(format!(
                        "Column '{}' already exists, keeping the existing definition",
                        child.name
                    ));
                }
                table.columns.insert(column_key, Tracked::new(child.clone(), fragment));
                Ok(())
            }
            Some(NodeAction::Drop) => {
                if table.columns.shift_remove(&column_key).is_none() {
                    tracing::debug!(
                        column = %child.name,
                        "DROP COLUMN on missing column, nothing to do"
                    );
                    return Ok(());
                }

                // Constraints and indexes over the column go with it
                let uses_column = |node: &Node| {
                    node.list_attr(attr::COLUMNS)
                        .iter()
                        .any(|c| normalize_identifier(c) == column_key)
                };
                table.constraints.retain(|_, tracked| !uses_column(&tracked.node));
                self.indexes.retain(|_, tracked| {
                    let on_table = tracked
                        .node
                        .text_attr(attr::TABLE)
                        .map_or(false, |t| normalize_identifier(t) == table_key);
                    !(on_table && uses_column(&tracked.node))
                });
                Ok(())
            }
            Some(action) => {
                let Some(tracked) = table.columns.get_mut(&column_key) else {
                    return Err(format!("Column '{}' not found for {:?}", child.name, action));
                };
                match action {
                    NodeAction::AlterType => {
                        let Some(data_type) = child.data_type() else {
                            return Err(format!(
                                "Type change for column '{}' has no type",
                                child.name
                            ));
                        };
                        tracked.node.set_attr(attr::TYPE, data_type);
                    }
                    NodeAction::DropNotNull => tracked.node.set_attr(attr::NULLABLE, true),
                    NodeAction::SetNotNull => tracked.node.set_attr(attr::NULLABLE, false),
                    NodeAction::SetDefault => match child.attr(attr::DEFAULT) {
                        Some(value) => tracked.node.set_attr(attr::DEFAULT, value.clone()),
                        None => {
                            return Err(format!(
                                "SET DEFAULT for column '{}' has no value",
                                child.name
                            ))
                        }
                    },
                    NodeAction::DropDefault => {
                        tracked.node.remove_attr(attr::DEFAULT);
                    }
                    other => {
                        return Err(format!(
                            "Unsupported action {:?} on column '{}'",
                            other, child.name
                        ))
                    }
                }
                tracked.touch(fragment);
                Ok(())
            }
            None => Err(format!("Column '{}' carries no action", child.name)),
        }
    }

    fn alter_constraint(
        &mut self,
        fragment: &TimedFragment,
        table_key: &str,
        child: &Node,
    ) -> Result<(), String> {
        let dialect = self.dialect;
        let Some(table) = self.tables.get_mut(table_key) else {
            return Ok(());
        };
        let constraint_key = normalize_identifier(&child.name);

        match child.action {
            Some(NodeAction::Create) => {
                if table.constraints.contains_key(&constraint_key) {
                    return Err(format!(
                        "Constraint '{}' already exists, keeping the existing definition",
                        child.name
                    ));
                }
                table.constraints.insert(constraint_key, Tracked::new(child.clone(), fragment));
                Ok(())
            }
            Some(NodeAction::Drop) => {
                if table.constraints.shift_remove(&constraint_key).is_some() {
                    return Ok(());
                }
                // The constraint may have been declared inline on a column
                let table_name = normalize_identifier(&table.name);
                for tracked in table.columns.values_mut() {
                    let column = normalize_identifier(&tracked.node.name);
                    if tracked.node.flag(attr::UNIQUE)
                        && unique_constraint_name(&table_name, &column, dialect) == constraint_key
                    {
                        tracked.node.remove_attr(attr::UNIQUE);
                        tracked.touch(fragment);
                        return Ok(());
                    }
                    if tracked.node.flag(attr::PRIMARY_KEY)
                        && get_constraint_name(&table_name, &[], "pkey", dialect) == constraint_key
                    {
                        tracked.node.remove_attr(attr::PRIMARY_KEY);
                        tracked.touch(fragment);
                        return Ok(());
                    }
                }
                tracing::debug!(
                    constraint = %child.name,
                    "DROP CONSTRAINT on missing constraint, nothing to do"
                );
                Ok(())
            }
            other => Err(format!("Unsupported action {:?} on constraint '{}'", other, child.name)),
        }
    }

    fn apply_index(&mut self, fragment: &TimedFragment, node: &Node) {
        let key = normalize_identifier(&node.name);

        match node.action {
            Some(NodeAction::Create) | None => {
                if self.indexes.contains_key(&key) {
                    self.warn(
                        fragment,
                        format!(
                            "Index '{}' already exists, keeping the existing definition",
                            node.name
                        ),
                    );
                    return;
                }
                tracing::debug!(
                    index = %node.name,
                    provenance = %fragment.provenance,
                    "Replaying CREATE INDEX"
                );
                self.indexes.insert(key, Tracked::new(node.clone(), fragment));
            }
            Some(NodeAction::Drop) => {
                if self.indexes.shift_remove(&key).is_none() {
                    tracing::debug!(
                        index = %node.name,
                        "DROP INDEX on missing index, nothing to do"
                    );
                }
            }
            Some(other) => self.warn(
                fragment,
                format!("Unsupported action {:?} on index '{}'", other, node.name),
            ),
        }
    }

    /// Consume the state into a canonical tree: one Table per surviving table
    /// (columns in insertion order, then table-level constraints), then indexes.
    fn build_schema(self) -> Reconciliation {
        let mut schema = SchemaTree::new(self.dialect.as_str());
        let mut origins = Vec::new();

        for table in self.tables.into_values() {
            let mut node = Node::table(table.name.clone());
            for tracked in table.columns.into_values().chain(table.constraints.into_values()) {
                origins.push(ObjectOrigin {
                    kind: tracked.node.kind,
                    table: table.name.clone(),
                    name: tracked.node.name.clone(),
                    time_key: tracked.effective_as_of,
                    provenance: tracked.provenance,
                });
                node.children.push(tracked.node);
            }
            schema.push(node);
        }

        for tracked in self.indexes.into_values() {
            origins.push(ObjectOrigin {
                kind: NodeKind::Index,
                table: tracked.node.text_attr(attr::TABLE).unwrap_or_default().to_string(),
                name: tracked.node.name.clone(),
                time_key: tracked.effective_as_of,
                provenance: tracked.provenance,
            });
            schema.push(tracked.node);
        }

        Reconciliation {
            schema,
            warnings: self.warnings,
            origins,
        }
    }
}
