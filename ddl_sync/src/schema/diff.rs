//! Schema difference calculator
//!
//! Compares a baseline tree (reconciled from history) with a target tree
//! (declared by the modules) and produces the forward and reverse change sets
//! that move one into the other.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::config::Dialect;
use crate::schema::types::{attr, Node, NodeKind, SchemaTree};
use crate::utils::naming::{normalize_identifier, unique_constraint_name};

/// Kind of structural delta
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    CreateTable,
    DropTable,
    AddColumn,
    DropColumn,
    AlterColumnType,
    DropNotNull,
    SetDefault,
    AddConstraint,
    DropConstraint,
    CreateIndex,
    DropIndex,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A single structural delta.
///
/// `payload` is the definition of the object the change creates, removes or
/// retypes: the new definition for creates and type changes, the removed
/// definition for drops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub operation: Operation,
    pub target_table: String,
    /// Column, constraint or index name; empty for table-level operations
    pub object_name: String,
    pub payload: Option<Node>,
    pub reversible: bool,
}

impl Change {
    pub fn new(
        operation: Operation,
        target_table: impl Into<String>,
        object_name: impl Into<String>,
        payload: Option<Node>,
    ) -> Self {
        Self {
            operation,
            target_table: target_table.into(),
            object_name: object_name.into(),
            payload,
            reversible: true,
        }
    }

    fn irreversible(mut self) -> Self {
        self.reversible = false;
        self
    }

    /// `table` or `table.object`, for logs and audit comments
    pub fn qualified_name(&self) -> String {
        if self.object_name.is_empty() {
            self.target_table.clone()
        } else {
            format!("{}.{}", self.target_table, self.object_name)
        }
    }
}

/// An ordered list of changes plus the time it was generated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub changes: Vec<Change>,
    pub timestamp: DateTime<Utc>,
}

impl ChangeSet {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            changes: Vec::new(),
            timestamp,
        }
    }

    pub fn push(&mut self, change: Change) {
        self.changes.push(change);
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Change> {
        self.changes.iter()
    }

    /// The operations in order, mostly useful for assertions and logs
    pub fn operations(&self) -> Vec<Operation> {
        self.changes.iter().map(|c| c.operation).collect()
    }
}

/// Forward and reverse change sets for one diff run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDiff {
    pub forward: ChangeSet,
    pub reverse: ChangeSet,
}

impl SchemaDiff {
    /// Diff `baseline` against `target`, stamped with the current time
    pub fn generate(baseline: &SchemaTree, target: &SchemaTree) -> Self {
        Self::generate_at(baseline, target, Utc::now())
    }

    /// Diff `baseline` against `target` with a fixed timestamp
    pub fn generate_at(
        baseline: &SchemaTree,
        target: &SchemaTree,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let dialect = Dialect::from_name(&target.dialect);
        let mut forward = ChangeSet::new(timestamp);
        let mut reverse = ChangeSet::new(timestamp);

        // Indexes that disappear or change go before the columns and tables
        // they cover, so the rollback recreates them last
        for index in baseline.indexes() {
            let unchanged = target
                .find_index(&index.name)
                .map_or(false, |other| same_index(index, other));
            if unchanged {
                continue;
            }

            let table = index.text_attr(attr::TABLE).unwrap_or_default();
            let payload = Some(index.clone());
            let mut drop = Change::new(Operation::DropIndex, table, &index.name, payload.clone());
            let mut create = Change::new(Operation::CreateIndex, table, &index.name, payload);
            if table.is_empty() || index.list_attr(attr::COLUMNS).is_empty() {
                tracing::warn!(index = %index.name, "Dropped index has no recorded definition");
                drop = drop.irreversible();
                create = create.irreversible();
            }
            forward.push(drop);
            reverse.push(create);
        }

        // Tables in the target, referenced tables first
        for table in dependency_order(target.tables()) {
            match baseline.find_table(&table.name) {
                Some(existing) => {
                    let (table_forward, table_reverse) = compare_tables(existing, table, dialect);
                    forward.changes.extend(table_forward);
                    reverse.changes.extend(table_reverse);
                }
                None => {
                    tracing::debug!(table = %table.name, "Table added");
                    let name = table.name.as_str();
                    let payload = Some(table.clone());
                    forward.push(Change::new(Operation::CreateTable, name, "", payload.clone()));
                    reverse.push(Change::new(Operation::DropTable, name, "", payload));
                }
            }
        }

        for index in target.indexes() {
            let unchanged = baseline
                .find_index(&index.name)
                .map_or(false, |other| same_index(index, other));
            if unchanged {
                continue;
            }

            let table = index.text_attr(attr::TABLE).unwrap_or_default();
            let payload = Some(index.clone());
            forward.push(Change::new(Operation::CreateIndex, table, &index.name, payload.clone()));
            reverse.push(Change::new(Operation::DropIndex, table, &index.name, payload));
        }

        // Tables only the baseline knows about, referencing tables first
        for table in dependency_order(baseline.tables()).into_iter().rev() {
            if target.find_table(&table.name).is_none() {
                tracing::debug!(table = %table.name, "Table removed");
                let payload = Some(table.clone());
                forward.push(Change::new(Operation::DropTable, &table.name, "", payload.clone()));
                reverse.push(Change::new(Operation::CreateTable, &table.name, "", payload));
            }
        }

        // Undo in the exact opposite order of application
        reverse.changes.reverse();

        tracing::info!(
            forward = forward.len(),
            reverse = reverse.len(),
            "Calculated schema differences"
        );

        Self { forward, reverse }
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty() && self.reverse.is_empty()
    }

    /// Changes, forward or reverse, that cannot be safely undone
    pub fn irreversible(&self) -> impl Iterator<Item = &Change> + '_ {
        self.forward
            .iter()
            .chain(self.reverse.iter())
            .filter(|change| !change.reversible)
    }
}

/// Tables a table points at through foreign keys, lowercased, self
/// references excluded
fn referenced_tables(table: &Node) -> Vec<String> {
    let own = normalize_identifier(&table.name);
    let from_constraints = table
        .children_of_kind(NodeKind::Constraint)
        .filter_map(|c| c.text_attr(attr::REFERENCES));
    // Inline references are recorded as `table(column, ...)`
    let from_columns = table
        .children_of_kind(NodeKind::Column)
        .filter_map(|c| c.text_attr(attr::FOREIGN_KEY))
        .map(|reference| reference.split('(').next().unwrap_or_default());

    let mut referenced: Vec<String> = Vec::new();
    for name in from_constraints.chain(from_columns) {
        let key = normalize_identifier(name.trim());
        if !key.is_empty() && key != own && !referenced.contains(&key) {
            referenced.push(key);
        }
    }
    referenced
}

/// Stable topological sort: each table comes after the tables it
/// references, otherwise declared order is kept. Cycles fall back to
/// declared order.
fn dependency_order<'a>(tables: impl Iterator<Item = &'a Node>) -> Vec<&'a Node> {
    let mut pending: Vec<(&Node, Vec<String>)> =
        tables.map(|t| (t, referenced_tables(t))).collect();
    let known: HashSet<String> = pending
        .iter()
        .map(|(t, _)| normalize_identifier(&t.name))
        .collect();
    let mut placed: HashSet<String> = HashSet::new();
    let mut ordered = Vec::with_capacity(pending.len());

    while !pending.is_empty() {
        let ready = pending.iter().position(|(_, deps)| {
            deps.iter().all(|d| placed.contains(d) || !known.contains(d))
        });
        let at = ready.unwrap_or_else(|| {
            tracing::warn!(
                table = %pending[0].0.name,
                "Foreign keys form a cycle, keeping declared order"
            );
            0
        });
        let (table, _) = pending.remove(at);
        placed.insert(normalize_identifier(&table.name));
        ordered.push(table);
    }

    ordered
}

/// A table-level constraint as seen by the differ
struct CanonicalConstraint {
    node: Node,
    /// Column carrying the inline `UNIQUE` this entry was synthesized from
    inline_column: Option<String>,
}

/// Table constraints plus inline unique columns rewritten as equivalent
/// table-level constraints, keyed by lowercase name
fn canonical_constraints(table: &Node, dialect: Dialect) -> IndexMap<String, CanonicalConstraint> {
    let mut constraints = IndexMap::new();

    for constraint in table.children_of_kind(NodeKind::Constraint) {
        constraints.insert(
            normalize_identifier(&constraint.name),
            CanonicalConstraint {
                node: constraint.clone(),
                inline_column: None,
            },
        );
    }

    let table_key = normalize_identifier(&table.name);
    for column in table.children_of_kind(NodeKind::Column) {
        if !column.flag(attr::UNIQUE) {
            continue;
        }
        let column_key = normalize_identifier(&column.name);
        let name = unique_constraint_name(&table_key, &column_key, dialect);
        constraints.entry(name.clone()).or_insert_with(|| CanonicalConstraint {
            node: Node::constraint(name)
                .with_attr(attr::KIND, "unique")
                .with_attr(attr::COLUMNS, vec![column.name.clone()])
                .with_attr(attr::UNIQUE, true),
            inline_column: Some(column_key),
        });
    }

    constraints
}

fn column_keys(table: &Node) -> HashSet<String> {
    table
        .children_of_kind(NodeKind::Column)
        .map(|c| normalize_identifier(&c.name))
        .collect()
}

fn same_type(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.trim().eq_ignore_ascii_case(b.trim()),
        (None, None) => true,
        _ => false,
    }
}

fn same_index(a: &Node, b: &Node) -> bool {
    let columns = |n: &Node| -> Vec<String> {
        n.list_attr(attr::COLUMNS)
            .iter()
            .map(|c| normalize_identifier(c))
            .collect()
    };

    same_type(a.text_attr(attr::TABLE), b.text_attr(attr::TABLE))
        && columns(a) == columns(b)
        && a.flag(attr::UNIQUE) == b.flag(attr::UNIQUE)
}

/// Compare two versions of the same table.
///
/// Returns the forward changes and their inverses, both in application
/// order; the caller reverses the aggregate inverse list once every table
/// has been compared.
pub fn compare_tables(old: &Node, new: &Node, dialect: Dialect) -> (Vec<Change>, Vec<Change>) {
    let mut forward = Vec::new();
    let mut reverse = Vec::new();
    let table = new.name.as_str();

    let old_columns = column_keys(old);
    let new_columns = column_keys(new);
    let old_constraints = canonical_constraints(old, dialect);
    let new_constraints = canonical_constraints(new, dialect);

    // An inline unique on a column that is itself added or dropped travels
    // with that column's definition
    let carried_by_column = |constraint: &CanonicalConstraint| {
        constraint.inline_column.as_ref().map_or(false, |column| {
            !(old_columns.contains(column) && new_columns.contains(column))
        })
    };

    for (key, constraint) in &old_constraints {
        if new_constraints.contains_key(key) || carried_by_column(constraint) {
            continue;
        }
        let node = &constraint.node;
        let payload = Some(node.clone());
        let mut drop = Change::new(Operation::DropConstraint, table, &node.name, payload.clone());
        let mut add = Change::new(Operation::AddConstraint, table, &node.name, payload);
        if node.list_attr(attr::COLUMNS).is_empty() && node.text_attr(attr::CHECK).is_none() {
            tracing::warn!(
                table,
                constraint = %node.name,
                "Dropped constraint has no recorded definition"
            );
            drop = drop.irreversible();
            add = add.irreversible();
        }
        forward.push(drop);
        reverse.push(add);
    }

    // New constraints on new columns can only be added once the column exists
    let mut deferred = Vec::new();
    for (key, constraint) in &new_constraints {
        if old_constraints.contains_key(key) || carried_by_column(constraint) {
            continue;
        }
        let node = &constraint.node;
        let add = Change::new(Operation::AddConstraint, table, &node.name, Some(node.clone()));
        let drop = Change::new(Operation::DropConstraint, table, &node.name, Some(node.clone()));
        let needs_new_column = node
            .list_attr(attr::COLUMNS)
            .iter()
            .any(|c| !old_columns.contains(&normalize_identifier(c)));
        if needs_new_column {
            deferred.push((add, drop));
        } else {
            forward.push(add);
            reverse.push(drop);
        }
    }

    for column in new.children_of_kind(NodeKind::Column) {
        match old.find_child_of_kind(NodeKind::Column, &column.name) {
            None => {
                tracing::debug!(table, column = %column.name, "Column added");
                let payload = Some(column.clone());
                let add = Change::new(Operation::AddColumn, table, &column.name, payload.clone());
                forward.push(add);
                reverse.push(Change::new(Operation::DropColumn, table, &column.name, payload));
            }
            Some(existing) if !same_type(existing.data_type(), column.data_type()) => {
                tracing::debug!(
                    table,
                    column = %column.name,
                    from = existing.data_type().unwrap_or_default(),
                    to = column.data_type().unwrap_or_default(),
                    "Column type changed"
                );
                forward.push(Change::new(
                    Operation::AlterColumnType,
                    table,
                    &column.name,
                    Some(column.clone()),
                ));
                reverse.push(Change::new(
                    Operation::AlterColumnType,
                    table,
                    &existing.name,
                    Some(existing.clone()),
                ));
            }
            Some(_) => {}
        }
    }

    for (add, drop) in deferred {
        forward.push(add);
        reverse.push(drop);
    }

    for column in old.children_of_kind(NodeKind::Column) {
        if new.find_child_of_kind(NodeKind::Column, &column.name).is_some() {
            continue;
        }
        tracing::debug!(table, column = %column.name, "Column removed");
        let payload = Some(column.clone());
        let mut drop = Change::new(Operation::DropColumn, table, &column.name, payload.clone());
        let mut add = Change::new(Operation::AddColumn, table, &column.name, payload);
        if column.data_type().map_or(true, |t| t.trim().is_empty()) {
            tracing::warn!(table, column = %column.name, "Dropped column has no recorded type");
            drop = drop.irreversible();
            add = add.irreversible();
        }
        forward.push(drop);
        reverse.push(add);
    }

    (forward, reverse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn ts() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn tree(nodes: Vec<Node>) -> SchemaTree {
        let mut tree = SchemaTree::new("postgres");
        for node in nodes {
            tree.push(node);
        }
        tree
    }

    fn table(name: &str, columns: &[(&str, &str)]) -> Node {
        columns
            .iter()
            .fold(Node::table(name), |t, (c, ty)| t.with_child(Node::column(*c, *ty)))
    }

    fn unique(name: &str, columns: &[&str]) -> Node {
        Node::constraint(name)
            .with_attr(attr::KIND, "unique")
            .with_attr(attr::COLUMNS, columns.iter().map(|c| c.to_string()).collect::<Vec<_>>())
            .with_attr(attr::UNIQUE, true)
    }

    fn index(name: &str, table: &str, columns: &[&str]) -> Node {
        Node::index(name)
            .with_attr(attr::TABLE, table)
            .with_attr(attr::COLUMNS, columns.iter().map(|c| c.to_string()).collect::<Vec<_>>())
            .with_attr(attr::UNIQUE, false)
    }

    fn summary(set: &ChangeSet) -> Vec<(Operation, String)> {
        set.iter().map(|c| (c.operation, c.qualified_name())).collect()
    }

    /// Apply a change set to a canonical tree
    fn apply(tree: &SchemaTree, changes: &ChangeSet) -> SchemaTree {
        let mut tree = tree.clone();
        for change in changes.iter() {
            let payload = change.payload.clone().unwrap();
            let children = &mut tree.root.children;
            let table_pos = children
                .iter()
                .position(|n| n.kind == NodeKind::Table && n.name_matches(&change.target_table));
            match change.operation {
                Operation::CreateTable | Operation::CreateIndex => children.push(payload),
                Operation::DropTable => {
                    children.remove(table_pos.unwrap());
                }
                Operation::DropIndex => children.retain(|n| {
                    !(n.kind == NodeKind::Index && n.name_matches(&change.object_name))
                }),
                Operation::AddColumn => {
                    let table = &mut children[table_pos.unwrap()];
                    let at = table.children.iter().filter(|c| c.kind == NodeKind::Column).count();
                    table.children.insert(at, payload);
                }
                Operation::AddConstraint => children[table_pos.unwrap()].children.push(payload),
                Operation::DropColumn | Operation::DropConstraint => children[table_pos.unwrap()]
                    .children
                    .retain(|c| !c.name_matches(&change.object_name)),
                Operation::AlterColumnType => {
                    let table = &mut children[table_pos.unwrap()];
                    let column = table
                        .children
                        .iter_mut()
                        .find(|c| c.name_matches(&change.object_name))
                        .unwrap();
                    column.set_attr(attr::TYPE, payload.data_type().unwrap());
                }
                Operation::DropNotNull | Operation::SetDefault => unreachable!(),
            }
        }
        tree
    }

    fn assert_same_schema(actual: &SchemaTree, expected: &SchemaTree) {
        let names = |t: &SchemaTree| {
            let mut names: Vec<_> = t
                .root
                .children
                .iter()
                .map(|n| normalize_identifier(&n.name))
                .collect();
            names.sort();
            names
        };
        assert_eq!(names(actual), names(expected));
        for node in &expected.root.children {
            let other = actual.root.find_child_of_kind(node.kind, &node.name).unwrap();
            assert!(
                node.structurally_equal(other),
                "{} differs: {:#?} vs {:#?}",
                node.name,
                other,
                node
            );
        }
    }

    #[test]
    fn test_users_type_change_and_new_column() {
        let baseline = tree(vec![table("users", &[("id", "int"), ("name", "string")])]);
        let target = tree(vec![table(
            "users",
            &[("id", "int4"), ("name", "string"), ("email", "string")],
        )]);

        let diff = SchemaDiff::generate_at(&baseline, &target, ts());

        assert_eq!(
            summary(&diff.forward),
            vec![
                (Operation::AlterColumnType, "users.id".to_string()),
                (Operation::AddColumn, "users.email".to_string()),
            ]
        );
        assert_eq!(
            summary(&diff.reverse),
            vec![
                (Operation::DropColumn, "users.email".to_string()),
                (Operation::AlterColumnType, "users.id".to_string()),
            ]
        );
        assert_eq!(diff.forward.changes[0].payload.as_ref().unwrap().data_type(), Some("int4"));
        assert_eq!(diff.reverse.changes[1].payload.as_ref().unwrap().data_type(), Some("int"));
        assert_eq!(diff.forward.changes[1].payload.as_ref().unwrap().data_type(), Some("string"));
    }

    #[test]
    fn test_new_table_created_and_reverse_drops_it() {
        let baseline = tree(vec![]);
        let target = tree(vec![table("orders", &[("id", "int")])]);

        let diff = SchemaDiff::generate_at(&baseline, &target, ts());

        assert_eq!(summary(&diff.forward), vec![(Operation::CreateTable, "orders".to_string())]);
        assert_eq!(summary(&diff.reverse), vec![(Operation::DropTable, "orders".to_string())]);
        let created = diff.forward.changes[0].payload.as_ref().unwrap();
        assert!(created.structurally_equal(&target.root.children[0]));
    }

    #[test]
    fn test_dropped_table_keeps_definition_for_rollback() {
        let legacy = table("legacy", &[("id", "int"), ("payload", "jsonb")]);
        let baseline = tree(vec![legacy.clone()]);
        let target = tree(vec![]);

        let diff = SchemaDiff::generate_at(&baseline, &target, ts());

        assert_eq!(diff.forward.operations(), vec![Operation::DropTable]);
        assert_eq!(diff.reverse.operations(), vec![Operation::CreateTable]);
        assert!(diff.reverse.changes[0].payload.as_ref().unwrap().structurally_equal(&legacy));
    }

    #[test]
    fn test_identical_trees_produce_no_changes() {
        let schema = tree(vec![
            table("users", &[("id", "int"), ("email", "text")])
                .with_child(unique("users_email_key", &["email"])),
            index("users_email_idx", "users", &["email"]),
        ]);

        let diff = SchemaDiff::generate_at(&schema, &schema.clone(), ts());
        assert!(diff.is_empty());
        assert!(diff.forward.is_empty());
        assert!(diff.reverse.is_empty());
    }

    #[test]
    fn test_type_comparison_ignores_case_and_other_attributes() {
        let baseline = tree(vec![table("users", &[("id", "INT")])]);
        let mut target_table = table("users", &[("id", "int")]);
        target_table.children[0].set_attr(attr::NULLABLE, false);
        target_table.children[0].set_attr(attr::DEFAULT, "0");
        let target = tree(vec![target_table]);

        assert!(SchemaDiff::generate_at(&baseline, &target, ts()).is_empty());
    }

    #[test]
    fn test_inline_unique_matches_table_constraint() {
        let mut inline = table("users", &[("id", "int"), ("email", "text")]);
        inline.children[1].set_attr(attr::UNIQUE, true);
        let clause = table("users", &[("id", "int"), ("email", "text")])
            .with_child(unique("users_email_key", &["email"]));

        let diff =
            SchemaDiff::generate_at(&tree(vec![inline.clone()]), &tree(vec![clause.clone()]), ts());
        assert!(diff.is_empty());

        let diff = SchemaDiff::generate_at(&tree(vec![clause]), &tree(vec![inline]), ts());
        assert!(diff.is_empty());
    }

    #[test]
    fn test_constraint_drops_before_adds() {
        let columns = [("id", "int"), ("email", "text"), ("name", "text")];
        let baseline =
            tree(vec![table("users", &columns).with_child(unique("users_email_key", &["email"]))]);
        let target =
            tree(vec![table("users", &columns).with_child(unique("users_name_key", &["name"]))]);

        let diff = SchemaDiff::generate_at(&baseline, &target, ts());

        assert_eq!(
            summary(&diff.forward),
            vec![
                (Operation::DropConstraint, "users.users_email_key".to_string()),
                (Operation::AddConstraint, "users.users_name_key".to_string()),
            ]
        );
        assert_eq!(
            summary(&diff.reverse),
            vec![
                (Operation::DropConstraint, "users.users_name_key".to_string()),
                (Operation::AddConstraint, "users.users_email_key".to_string()),
            ]
        );
    }

    #[test]
    fn test_inline_unique_toggled_on_existing_column() {
        let baseline = tree(vec![table("users", &[("email", "text")])]);
        let mut target_table = table("users", &[("email", "text")]);
        target_table.children[0].set_attr(attr::UNIQUE, true);
        let target = tree(vec![target_table]);

        let diff = SchemaDiff::generate_at(&baseline, &target, ts());

        assert_eq!(
            summary(&diff.forward),
            vec![(Operation::AddConstraint, "users.users_email_key".to_string())]
        );
        let payload = diff.forward.changes[0].payload.as_ref().unwrap();
        assert_eq!(payload.list_attr(attr::COLUMNS).to_vec(), vec!["email".to_string()]);
    }

    #[test]
    fn test_inline_unique_on_added_column_travels_with_column() {
        let baseline = tree(vec![table("users", &[("id", "int")])]);
        let mut target_table = table("users", &[("id", "int"), ("email", "text")]);
        target_table.children[1].set_attr(attr::UNIQUE, true);
        let target = tree(vec![target_table]);

        let diff = SchemaDiff::generate_at(&baseline, &target, ts());

        assert_eq!(diff.forward.operations(), vec![Operation::AddColumn]);
        assert!(diff.forward.changes[0].payload.as_ref().unwrap().flag(attr::UNIQUE));
        assert_eq!(diff.reverse.operations(), vec![Operation::DropColumn]);
    }

    #[test]
    fn test_constraint_on_new_column_added_after_column() {
        let baseline = tree(vec![table("users", &[("id", "int")])]);
        let target = tree(vec![table("users", &[("id", "int"), ("email", "text")])
            .with_child(unique("users_email_uq", &["email"]))]);

        let diff = SchemaDiff::generate_at(&baseline, &target, ts());

        assert_eq!(diff.forward.operations(), vec![Operation::AddColumn, Operation::AddConstraint]);
        assert_eq!(
            diff.reverse.operations(),
            vec![Operation::DropConstraint, Operation::DropColumn]
        );
    }

    #[test]
    fn test_reverse_is_global_mirror_of_forward() {
        let baseline = tree(vec![
            table("users", &[("id", "int"), ("nickname", "text")]),
            table("legacy", &[("id", "int")]),
            index("users_nickname_idx", "users", &["nickname"]),
        ]);
        let target = tree(vec![
            table("accounts", &[("id", "int")]),
            table("users", &[("id", "bigint"), ("email", "text")]),
            index("accounts_id_idx", "accounts", &["id"]),
        ]);

        let diff = SchemaDiff::generate_at(&baseline, &target, ts());

        assert_eq!(
            summary(&diff.forward),
            vec![
                (Operation::DropIndex, "users.users_nickname_idx".to_string()),
                (Operation::CreateTable, "accounts".to_string()),
                (Operation::AlterColumnType, "users.id".to_string()),
                (Operation::AddColumn, "users.email".to_string()),
                (Operation::DropColumn, "users.nickname".to_string()),
                (Operation::CreateIndex, "accounts.accounts_id_idx".to_string()),
                (Operation::DropTable, "legacy".to_string()),
            ]
        );

        let inverse = |op: Operation| match op {
            Operation::CreateTable => Operation::DropTable,
            Operation::DropTable => Operation::CreateTable,
            Operation::AddColumn => Operation::DropColumn,
            Operation::DropColumn => Operation::AddColumn,
            Operation::AddConstraint => Operation::DropConstraint,
            Operation::DropConstraint => Operation::AddConstraint,
            Operation::CreateIndex => Operation::DropIndex,
            Operation::DropIndex => Operation::CreateIndex,
            other => other,
        };
        let expected: Vec<_> = diff
            .forward
            .iter()
            .rev()
            .map(|c| (inverse(c.operation), c.qualified_name()))
            .collect();
        assert_eq!(summary(&diff.reverse), expected);
    }

    #[test]
    fn test_rollback_restores_column_before_its_index() {
        let baseline = tree(vec![
            table("users", &[("id", "int"), ("nickname", "text")]),
            index("users_nickname_idx", "users", &["nickname"]),
        ]);
        let target = tree(vec![table("users", &[("id", "int")])]);

        let diff = SchemaDiff::generate_at(&baseline, &target, ts());

        assert_eq!(
            summary(&diff.forward),
            vec![
                (Operation::DropIndex, "users.users_nickname_idx".to_string()),
                (Operation::DropColumn, "users.nickname".to_string()),
            ]
        );
        assert_eq!(
            summary(&diff.reverse),
            vec![
                (Operation::AddColumn, "users.nickname".to_string()),
                (Operation::CreateIndex, "users.users_nickname_idx".to_string()),
            ]
        );
    }

    #[test]
    fn test_new_tables_created_after_the_tables_they_reference() {
        let orders = table("orders", &[("id", "int"), ("user_id", "int")]).with_child(
            Node::constraint("orders_user_id_fkey")
                .with_attr(attr::KIND, "foreign_key")
                .with_attr(attr::COLUMNS, vec!["user_id".to_string()])
                .with_attr(attr::REFERENCES, "users"),
        );
        let mut lines = table("order_lines", &[("id", "int"), ("order_id", "int")]);
        lines.children[1].set_attr(attr::FOREIGN_KEY, "Orders(id)");
        let target = tree(vec![
            lines,
            orders,
            table("audit", &[("id", "int")]),
            table("users", &[("id", "int")]),
        ]);

        let diff = SchemaDiff::generate_at(&tree(vec![]), &target, ts());

        assert_eq!(
            summary(&diff.forward),
            vec![
                (Operation::CreateTable, "audit".to_string()),
                (Operation::CreateTable, "users".to_string()),
                (Operation::CreateTable, "orders".to_string()),
                (Operation::CreateTable, "order_lines".to_string()),
            ]
        );
        assert_eq!(
            summary(&diff.reverse),
            vec![
                (Operation::DropTable, "order_lines".to_string()),
                (Operation::DropTable, "orders".to_string()),
                (Operation::DropTable, "users".to_string()),
                (Operation::DropTable, "audit".to_string()),
            ]
        );
    }

    #[test]
    fn test_foreign_key_cycle_keeps_declared_order() {
        let mut a = table("a", &[("id", "int"), ("b_id", "int")]);
        a.children[1].set_attr(attr::FOREIGN_KEY, "b(id)");
        let mut b = table("b", &[("id", "int"), ("a_id", "int")]);
        b.children[1].set_attr(attr::FOREIGN_KEY, "a(id)");
        let mut selfref = table("nodes", &[("id", "int"), ("parent_id", "int")]);
        selfref.children[1].set_attr(attr::FOREIGN_KEY, "nodes(id)");

        let diff = SchemaDiff::generate_at(&tree(vec![]), &tree(vec![selfref, a, b]), ts());

        let tables: Vec<_> = diff.forward.iter().map(|c| c.target_table.clone()).collect();
        assert_eq!(tables, vec!["nodes", "a", "b"]);
    }

    #[test]
    fn test_modified_index_is_recreated() {
        let baseline = tree(vec![
            table("users", &[("id", "int"), ("email", "text")]),
            index("users_lookup_idx", "users", &["id"]),
        ]);
        let target = tree(vec![
            table("users", &[("id", "int"), ("email", "text")]),
            index("users_lookup_idx", "users", &["email"]),
        ]);

        let diff = SchemaDiff::generate_at(&baseline, &target, ts());

        assert_eq!(diff.forward.operations(), vec![Operation::DropIndex, Operation::CreateIndex]);
        assert_eq!(
            diff.forward.changes[1].payload.as_ref().unwrap().list_attr(attr::COLUMNS).to_vec(),
            vec!["email".to_string()]
        );
        assert_eq!(diff.reverse.operations(), vec![Operation::DropIndex, Operation::CreateIndex]);
        assert_eq!(
            diff.reverse.changes[1].payload.as_ref().unwrap().list_attr(attr::COLUMNS).to_vec(),
            vec!["id".to_string()]
        );
    }

    #[test]
    fn test_round_trip() {
        let baseline = tree(vec![
            table("users", &[("id", "int"), ("name", "text")])
                .with_child(unique("users_name_key", &["name"])),
            table("legacy", &[("id", "int")]),
            index("users_name_idx", "users", &["name"]),
        ]);
        let target = tree(vec![
            table("users", &[("id", "int4"), ("name", "text"), ("email", "text")])
                .with_child(unique("users_email_key", &["email"])),
            table("orders", &[("id", "int"), ("user_id", "int")]),
            index("orders_user_idx", "orders", &["user_id"]),
        ]);

        let diff = SchemaDiff::generate_at(&baseline, &target, ts());
        assert_eq!(diff.irreversible().count(), 0);

        let migrated = apply(&baseline, &diff.forward);
        assert_same_schema(&migrated, &target);

        let rolled_back = apply(&migrated, &diff.reverse);
        assert_same_schema(&rolled_back, &baseline);
    }

    #[test]
    fn test_diff_is_deterministic() {
        let baseline = tree(vec![table("a", &[("id", "int")]), table("b", &[("id", "int")])]);
        let target = tree(vec![
            table("c", &[("id", "int")]),
            table("a", &[("id", "text"), ("x", "int")]),
            table("d", &[("id", "int")]),
        ]);

        let first = SchemaDiff::generate_at(&baseline, &target, ts());
        let second = SchemaDiff::generate_at(&baseline, &target, ts());
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_lost_definitions_are_irreversible() {
        let baseline = tree(vec![
            Node::table("users")
                .with_child(Node::new(NodeKind::Column, "mystery"))
                .with_child(Node::constraint("users_opaque")),
            Node::index("orphan_idx"),
        ]);
        let target = tree(vec![Node::table("users")]);

        let diff = SchemaDiff::generate_at(&baseline, &target, ts());

        assert_eq!(
            diff.forward.operations(),
            vec![Operation::DropIndex, Operation::DropConstraint, Operation::DropColumn]
        );
        assert!(diff.forward.iter().all(|c| !c.reversible));
        assert!(diff.reverse.iter().all(|c| !c.reversible));
        assert_eq!(diff.irreversible().count(), 6);
    }

    #[test]
    fn test_table_names_compare_case_insensitively() {
        let baseline = tree(vec![table("Users", &[("ID", "int")])]);
        let target = tree(vec![table("users", &[("id", "int")])]);

        assert!(SchemaDiff::generate_at(&baseline, &target, ts()).is_empty());
    }
}
