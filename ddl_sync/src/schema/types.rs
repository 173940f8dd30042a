//! Schema element tree
//!
//! A generic node graph (tables, columns, constraints, indexes) shared by the
//! DDL parser, the reconciler and the differ. Parents own their children
//! outright; there are no back references.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Attribute names used across the crate
pub mod attr {
    pub const TYPE: &str = "type";
    pub const NULLABLE: &str = "nullable";
    pub const DEFAULT: &str = "default";
    pub const UNIQUE: &str = "unique";
    pub const PRIMARY_KEY: &str = "primaryKey";
    pub const FOREIGN_KEY: &str = "foreignKey";
    pub const CHECK: &str = "check";
    pub const KIND: &str = "kind";
    pub const COLUMNS: &str = "columns";
    pub const REFERENCES: &str = "references";
    pub const REFERENCED_COLUMNS: &str = "referencedColumns";
    pub const TABLE: &str = "table";
}

/// Kind of a schema node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Root,
    Table,
    Column,
    Constraint,
    Index,
}

/// What a fragment node does when replayed. Canonical trees carry none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeAction {
    Create,
    Alter,
    Drop,
    AlterType,
    SetNotNull,
    DropNotNull,
    SetDefault,
    DropDefault,
}

/// Value stored in a node's attribute bag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Text(String),
    List(Vec<String>),
}

impl AttrValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            AttrValue::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Text(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<Vec<String>> for AttrValue {
    fn from(value: Vec<String>) -> Self {
        AttrValue::List(value)
    }
}

/// A typed element of the schema graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    /// Case preserved as declared; compared case-insensitively
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub attributes: IndexMap<String, AttrValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<NodeAction>,
}

impl Node {
    pub fn new(kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            children: Vec::new(),
            attributes: IndexMap::new(),
            action: None,
        }
    }

    pub fn table(name: impl Into<String>) -> Self {
        Self::new(NodeKind::Table, name)
    }

    /// Column node with its `type` attribute set
    pub fn column(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self::new(NodeKind::Column, name).with_attr(attr::TYPE, data_type.into())
    }

    pub fn constraint(name: impl Into<String>) -> Self {
        Self::new(NodeKind::Constraint, name)
    }

    pub fn index(name: impl Into<String>) -> Self {
        Self::new(NodeKind::Index, name)
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_action(mut self, action: NodeAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attributes.get(key)
    }

    pub fn text_attr(&self, key: &str) -> Option<&str> {
        self.attr(key).and_then(AttrValue::as_text)
    }

    /// Boolean attribute, absent counts as false
    pub fn flag(&self, key: &str) -> bool {
        self.attr(key).and_then(AttrValue::as_bool).unwrap_or(false)
    }

    pub fn list_attr(&self, key: &str) -> &[String] {
        self.attr(key).and_then(AttrValue::as_list).unwrap_or(&[])
    }

    pub fn set_attr(&mut self, key: &str, value: impl Into<AttrValue>) {
        self.attributes.insert(key.to_string(), value.into());
    }

    /// Remove an attribute, keeping the order of the remaining ones
    pub fn remove_attr(&mut self, key: &str) -> Option<AttrValue> {
        self.attributes.shift_remove(key)
    }

    /// Column data type, if this node has one
    pub fn data_type(&self) -> Option<&str> {
        self.text_attr(attr::TYPE)
    }

    pub fn name_matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// First child with the given name (case-insensitive)
    pub fn find_child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name_matches(name))
    }

    pub fn find_child_of_kind(&self, kind: NodeKind, name: &str) -> Option<&Node> {
        self.children
            .iter()
            .find(|c| c.kind == kind && c.name_matches(name))
    }

    /// Children of one kind, in declaration order
    pub fn children_of_kind(&self, kind: NodeKind) -> impl Iterator<Item = &Node> + '_ {
        self.children.iter().filter(move |c| c.kind == kind)
    }

    /// Names compared case-insensitively, children compared in order,
    /// attributes compared by value; fragment actions are ignored.
    pub fn structurally_equal(&self, other: &Node) -> bool {
        self.kind == other.kind
            && self.name_matches(&other.name)
            && self.attributes.len() == other.attributes.len()
            && self
                .attributes
                .iter()
                .all(|(k, v)| other.attributes.get(k) == Some(v))
            && self.children.len() == other.children.len()
            && self
                .children
                .iter()
                .zip(&other.children)
                .all(|(a, b)| a.structurally_equal(b))
    }

    /// Drop fragment actions from this node and its descendants
    pub fn clear_actions(&mut self) {
        self.action = None;
        for child in &mut self.children {
            child.clear_actions();
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::Root => "root",
            NodeKind::Table => "table",
            NodeKind::Column => "column",
            NodeKind::Constraint => "constraint",
            NodeKind::Index => "index",
        };
        f.write_str(name)
    }
}

/// The state of the world at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaTree {
    pub root: Node,
    /// Source dialect the tree was parsed from
    pub dialect: String,
}

impl SchemaTree {
    /// An empty, root-only tree
    pub fn new(dialect: impl Into<String>) -> Self {
        Self {
            root: Node::new(NodeKind::Root, ""),
            dialect: dialect.into(),
        }
    }

    pub fn push(&mut self, node: Node) {
        self.root.children.push(node);
    }

    pub fn tables(&self) -> impl Iterator<Item = &Node> + '_ {
        self.root.children_of_kind(NodeKind::Table)
    }

    pub fn indexes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.root.children_of_kind(NodeKind::Index)
    }

    pub fn find_table(&self, name: &str) -> Option<&Node> {
        self.root.find_child_of_kind(NodeKind::Table, name)
    }

    pub fn find_index(&self, name: &str) -> Option<&Node> {
        self.root.find_child_of_kind(NodeKind::Index, name)
    }

    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }

    pub fn structurally_equal(&self, other: &SchemaTree) -> bool {
        self.root.structurally_equal(&other.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> Node {
        Node::table("Users")
            .with_child(Node::column("ID", "INT"))
            .with_child(Node::column("name", "TEXT"))
            .with_child(
                Node::constraint("users_name_key")
                    .with_attr(attr::COLUMNS, vec!["name".to_string()]),
            )
    }

    #[test]
    fn test_new_tree_is_root_only() {
        let tree = SchemaTree::new("postgres");
        assert_eq!(tree.root.kind, NodeKind::Root);
        assert!(tree.is_empty());
        assert!(tree.find_table("users").is_none());
    }

    #[test]
    fn test_find_child_is_case_insensitive() {
        let table = users();
        assert_eq!(table.find_child("id").map(|c| c.name.as_str()), Some("ID"));
        assert!(table.find_child_of_kind(NodeKind::Constraint, "USERS_NAME_KEY").is_some());
        assert!(table.find_child_of_kind(NodeKind::Column, "users_name_key").is_none());
        assert!(table.find_child("missing").is_none());
    }

    #[test]
    fn test_children_of_kind_keeps_declaration_order() {
        let names: Vec<_> = users()
            .children_of_kind(NodeKind::Column)
            .map(|c| c.name.clone())
            .collect();
        assert_eq!(names, vec!["ID", "name"]);
    }

    #[test]
    fn test_structural_equality_ignores_case_and_actions() {
        let a = users();
        let mut b = users().with_action(NodeAction::Create);
        b.name = "users".to_string();
        assert!(a.structurally_equal(&b));

        let mut c = users();
        c.children.swap(0, 1);
        assert!(!a.structurally_equal(&c));
    }

    #[test]
    fn test_attribute_helpers() {
        let mut col = Node::column("email", "TEXT").with_attr(attr::UNIQUE, true);
        assert!(col.flag(attr::UNIQUE));
        assert!(!col.flag(attr::PRIMARY_KEY));
        assert_eq!(col.data_type(), Some("TEXT"));
        col.remove_attr(attr::UNIQUE);
        assert!(!col.flag(attr::UNIQUE));
        assert!(col.list_attr(attr::COLUMNS).is_empty());
    }
}
