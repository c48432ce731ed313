//! Privileged object graph and its walker.
//!
//! After sudo, the guest holds a path-accumulating proxy. Each `get`,
//! `set`, or `call` on it crosses the bridge as one explicit [`TreeOp`]
//! message, interpreted here over a typed graph — no reflection over host
//! internals.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde::Deserialize;

use super::{HostFuture, HostValue};
use crate::{LashError, Result};

/// A host function reachable as a tree leaf.
pub type TreeFn = Rc<dyn Fn(Vec<HostValue>) -> HostFuture<HostValue>>;

/// A node in the privileged object graph.
pub enum TreeNode {
    /// A plain value leaf; copied out on `get`.
    Value(HostValue),
    /// A callable leaf; invoked on `call`, reads as nil on `get`.
    Func(TreeFn),
    /// An interior node.
    Branch(BTreeMap<String, TreeNode>),
}

impl TreeNode {
    /// An empty branch.
    pub fn branch() -> Self {
        TreeNode::Branch(BTreeMap::new())
    }

    /// Build a branch from an iterator of named children.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, TreeNode)>,
    {
        TreeNode::Branch(entries.into_iter().collect())
    }

    /// Wrap a host function as a callable leaf.
    pub fn func<F>(f: F) -> Self
    where
        F: Fn(Vec<HostValue>) -> HostFuture<HostValue> + 'static,
    {
        TreeNode::Func(Rc::new(f))
    }

    /// Copy this subtree into a transferable value.
    ///
    /// Callables cannot cross the boundary by value and read as null.
    pub fn to_value(&self) -> HostValue {
        match self {
            TreeNode::Value(v) => v.clone(),
            TreeNode::Func(_) => HostValue::Null,
            TreeNode::Branch(children) => {
                let map = children
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect();
                HostValue::Object(map)
            }
        }
    }
}

impl std::fmt::Debug for TreeNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TreeNode::Value(v) => write!(f, "Value({})", v),
            TreeNode::Func(_) => write!(f, "Func"),
            TreeNode::Branch(children) => f.debug_map().entries(children.iter()).finish(),
        }
    }
}

/// Verb of a privileged tree operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeVerb {
    Get,
    Set,
    Call,
}

/// One privileged operation message from the guest proxy.
#[derive(Debug, Deserialize)]
pub struct TreeOp {
    /// Accumulated property path.
    #[serde(default)]
    pub path: Vec<String>,
    /// Operation verb.
    pub verb: TreeVerb,
    /// Arguments: the value to set, or call arguments.
    #[serde(default)]
    pub args: Vec<HostValue>,
}

/// Apply one operation to the graph.
///
/// `set` creates missing branches along the path; `get` on a missing path
/// reads as null; `call` on anything but a `Func` leaf is an error.
pub async fn walk(root: &Rc<RefCell<TreeNode>>, op: TreeOp) -> Result<HostValue> {
    let Some((leaf, parents)) = op.path.split_last() else {
        return Err(LashError::Data("empty sudo path".to_string()));
    };

    match op.verb {
        TreeVerb::Get => {
            let tree = root.borrow();
            let Some(parent) = descend(&tree, parents) else {
                return Ok(HostValue::Null);
            };
            let TreeNode::Branch(children) = parent else {
                return Ok(HostValue::Null);
            };
            Ok(children.get(leaf).map(TreeNode::to_value).unwrap_or(HostValue::Null))
        }
        TreeVerb::Set => {
            let value = op.args.into_iter().next().unwrap_or(HostValue::Null);
            let mut tree = root.borrow_mut();
            let parent = descend_mut(&mut tree, parents)?;
            parent.insert(leaf.clone(), TreeNode::Value(value));
            Ok(HostValue::Null)
        }
        TreeVerb::Call => {
            // Clone the callable out so the borrow is released before awaiting.
            let func = {
                let tree = root.borrow();
                let parent = descend(&tree, parents);
                let child = parent.and_then(|p| match p {
                    TreeNode::Branch(children) => children.get(leaf),
                    _ => None,
                });
                match child {
                    Some(TreeNode::Func(f)) => Rc::clone(f),
                    _ => return Err(LashError::NotCallable(op.path.join("."))),
                }
            };
            func(op.args).await
        }
    }
}

fn descend<'a>(mut node: &'a TreeNode, path: &[String]) -> Option<&'a TreeNode> {
    for segment in path {
        match node {
            TreeNode::Branch(children) => node = children.get(segment)?,
            _ => return None,
        }
    }
    Some(node)
}

/// Descend mutably, creating empty branches for missing segments.
fn descend_mut<'a>(
    node: &'a mut TreeNode,
    path: &[String],
) -> Result<&'a mut BTreeMap<String, TreeNode>> {
    let mut current = node;
    for segment in path {
        let TreeNode::Branch(children) = current else {
            return Err(LashError::Data(format!(
                "sudo path segment '{}' is not traversable",
                segment
            )));
        };
        current = children
            .entry(segment.clone())
            .or_insert_with(TreeNode::branch);
    }
    match current {
        TreeNode::Branch(children) => Ok(children),
        _ => Err(LashError::Data("sudo path leaf parent is not a branch".to_string())),
    }
}
