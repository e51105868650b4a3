use std::{collections::HashMap, fmt, sync::Arc};

use thiserror::Error;
use tracing::debug;

use crate::{
    binding::{BindingDecl, BindingProducer},
    call_site::CallSite,
    example::ExampleBody,
};

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Invalid context node handle: {0:?}")]
    InvalidHandle(NodeId),
}

/// setup/teardown フック。context に各スロット最大 1 つ保持される。
pub type HookFn = Arc<dyn Fn() + Send + Sync>;

/// Arena 上の context ノードを指すハンドル。所有権は持たない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

/// context の子要素。宣言順が実行順であり報告順でもある。
pub enum ChildNode {
    Context(NodeId),
    Leaf(LeafNode),
}

/// 1 つの example 宣言 (it / specify / pending)。
pub struct LeafNode {
    pub call_site: CallSite,
    pub description: Option<String>,
    pub is_pending: bool,
    pub is_focused: bool,
    pub(crate) body: Option<ExampleBody>,
}

impl LeafNode {
    /// "it" 宣言。説明つきの leaf。
    pub fn it(call_site: CallSite, description: impl Into<String>, body: ExampleBody) -> Self {
        Self {
            call_site,
            description: Some(description.into()),
            is_pending: false,
            is_focused: false,
            body: Some(body),
        }
    }

    /// "specify" 宣言。説明は親の中の位置から合成される。
    pub fn specify(call_site: CallSite, body: ExampleBody) -> Self {
        Self {
            call_site,
            description: None,
            is_pending: false,
            is_focused: false,
            body: Some(body),
        }
    }

    /// pending 宣言。body もフックも評価されないが、報告上のスロットは占める。
    pub fn pending(call_site: CallSite, description: impl Into<String>) -> Self {
        Self {
            call_site,
            description: Some(description.into()),
            is_pending: true,
            is_focused: false,
            body: None,
        }
    }

    pub fn focused(mut self) -> Self {
        self.is_focused = true;
        self
    }
}

impl fmt::Debug for LeafNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeafNode")
            .field("call_site", &self.call_site)
            .field("description", &self.description)
            .field("is_pending", &self.is_pending)
            .field("is_focused", &self.is_focused)
            .finish_non_exhaustive()
    }
}

pub struct ContextNode {
    pub call_site: CallSite,
    pub description: Option<String>,
    pub parent: Option<NodeId>,
    pub(crate) children: Vec<ChildNode>,
    pub(crate) bindings: Vec<BindingDecl>,
    pub(crate) before_all: Option<HookFn>,
    pub(crate) after_all: Option<HookFn>,
    pub(crate) before_each: Option<HookFn>,
    pub(crate) after_each: Option<HookFn>,
    pub(crate) matcher_namespaces: Vec<String>,
    pub is_focused: bool,
}

impl ContextNode {
    fn new(call_site: CallSite, description: Option<String>, parent: Option<NodeId>) -> Self {
        Self {
            call_site,
            description,
            parent,
            children: Vec::new(),
            bindings: Vec::new(),
            before_all: None,
            after_all: None,
            before_each: None,
            after_each: None,
            matcher_namespaces: Vec::new(),
            is_focused: false,
        }
    }
}

/// context 木の arena 表現。ノードは index で参照され、子リストだけが所有権を持つ。
/// 木は一度組み立てられた後は読み取り専用として扱われる。
pub struct ContextArena {
    nodes: Vec<ContextNode>,
}

impl ContextArena {
    /// root context を 1 つ持つ arena を作る。root は説明を持たない。
    pub fn new(call_site: CallSite) -> Self {
        Self {
            nodes: vec![ContextNode::new(call_site, None, None)],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn get(&self, id: NodeId) -> Result<&ContextNode, ContextError> {
        self.nodes.get(id.0).ok_or(ContextError::InvalidHandle(id))
    }

    fn get_mut(&mut self, id: NodeId) -> Result<&mut ContextNode, ContextError> {
        self.nodes
            .get_mut(id.0)
            .ok_or(ContextError::InvalidHandle(id))
    }

    pub fn description(&self, id: NodeId) -> Result<Option<&str>, ContextError> {
        Ok(self.get(id)?.description.as_deref())
    }

    pub fn matcher_namespaces(&self, id: NodeId) -> Result<&[String], ContextError> {
        Ok(&self.get(id)?.matcher_namespaces)
    }

    pub fn add_child_context(
        &mut self,
        parent: NodeId,
        call_site: CallSite,
        description: impl Into<String>,
    ) -> Result<NodeId, ContextError> {
        self.get(parent)?;
        let id = NodeId(self.nodes.len());
        self.nodes
            .push(ContextNode::new(call_site, Some(description.into()), Some(parent)));
        self.get_mut(parent)?.children.push(ChildNode::Context(id));
        Ok(id)
    }

    pub fn add_leaf(&mut self, parent: NodeId, leaf: LeafNode) -> Result<(), ContextError> {
        self.get_mut(parent)?.children.push(ChildNode::Leaf(leaf));
        Ok(())
    }

    /// 同一ノード内の同名宣言は置き換え (後勝ち)。子孫での再宣言は
    /// shadow するだけで祖先側は変更されない。
    pub fn add_binding(&mut self, node: NodeId, decl: BindingDecl) -> Result<(), ContextError> {
        let bindings = &mut self.get_mut(node)?.bindings;
        if let Some(existing) = bindings.iter_mut().find(|b| b.name == decl.name) {
            debug!(binding = %decl.name, "binding redeclared on the same context, latest wins");
            *existing = decl;
        } else {
            bindings.push(decl);
        }
        Ok(())
    }

    pub fn add_matcher_namespace(
        &mut self,
        node: NodeId,
        namespace: impl Into<String>,
    ) -> Result<(), ContextError> {
        self.get_mut(node)?.matcher_namespaces.push(namespace.into());
        Ok(())
    }

    pub fn set_before_all(&mut self, node: NodeId, hook: HookFn) -> Result<(), ContextError> {
        let slot = &mut self.get_mut(node)?.before_all;
        if slot.is_some() {
            debug!(node = ?node, "beforeAll redeclared, latest wins");
        }
        *slot = Some(hook);
        Ok(())
    }

    pub fn set_after_all(&mut self, node: NodeId, hook: HookFn) -> Result<(), ContextError> {
        let slot = &mut self.get_mut(node)?.after_all;
        if slot.is_some() {
            debug!(node = ?node, "afterAll redeclared, latest wins");
        }
        *slot = Some(hook);
        Ok(())
    }

    pub fn set_before_each(&mut self, node: NodeId, hook: HookFn) -> Result<(), ContextError> {
        let slot = &mut self.get_mut(node)?.before_each;
        if slot.is_some() {
            debug!(node = ?node, "beforeEach redeclared, latest wins");
        }
        *slot = Some(hook);
        Ok(())
    }

    pub fn set_after_each(&mut self, node: NodeId, hook: HookFn) -> Result<(), ContextError> {
        let slot = &mut self.get_mut(node)?.after_each;
        if slot.is_some() {
            debug!(node = ?node, "afterEach redeclared, latest wins");
        }
        *slot = Some(hook);
        Ok(())
    }

    pub fn focus(&mut self, node: NodeId) -> Result<(), ContextError> {
        self.get_mut(node)?.is_focused = true;
        Ok(())
    }

    /// root からこのノードまでのハンドル列 (両端を含む)
    pub fn ancestors_root_to(&self, node: NodeId) -> Result<Vec<NodeId>, ContextError> {
        let mut chain = vec![node];
        let mut current = node;
        while let Some(parent) = self.get(current)?.parent {
            chain.push(parent);
            current = parent;
        }
        chain.reverse();
        Ok(chain)
    }

    /// root から重ねた束縛表。子孫の同名宣言が勝つ。
    pub fn binding_chain(
        &self,
        node: NodeId,
    ) -> Result<HashMap<String, BindingProducer>, ContextError> {
        let mut merged = HashMap::new();
        for id in self.ancestors_root_to(node)? {
            for decl in &self.get(id)?.bindings {
                merged.insert(decl.name.clone(), decl.producer.clone());
            }
        }
        Ok(merged)
    }

    pub(crate) fn any_focused(&self) -> bool {
        self.nodes.iter().any(|node| {
            node.is_focused
                || node.children.iter().any(|child| match child {
                    ChildNode::Leaf(leaf) => leaf.is_focused,
                    ChildNode::Context(_) => false,
                })
        })
    }

    /// 子ハンドルと親ハンドルが arena の範囲内にあることの確認
    pub(crate) fn validate(&self) -> Result<(), ContextError> {
        for node in &self.nodes {
            if let Some(parent) = node.parent {
                self.get(parent)?;
            }
            for child in &node.children {
                if let ChildNode::Context(id) = child {
                    self.get(*id)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::value::Value;

    fn site(line: u32) -> CallSite {
        CallSite::new("context_test.rs", line)
    }

    #[test]
    fn test_children_preserve_declaration_order() {
        let mut arena = ContextArena::new(site(1));
        let root = arena.root();
        let a = arena.add_child_context(root, site(2), "a").unwrap();
        let b = arena.add_child_context(root, site(3), "b").unwrap();

        let children: Vec<NodeId> = arena
            .get(root)
            .unwrap()
            .children
            .iter()
            .filter_map(|c| match c {
                ChildNode::Context(id) => Some(*id),
                ChildNode::Leaf(_) => None,
            })
            .collect();
        assert_eq!(children, vec![a, b]);
    }

    #[test]
    fn test_hook_slot_overwrite_keeps_latest() {
        let mut arena = ContextArena::new(site(1));
        let root = arena.root();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = calls.clone();
        arena
            .set_before_each(root, Arc::new(move || first.store(1, Ordering::SeqCst)))
            .unwrap();
        let second = calls.clone();
        arena
            .set_before_each(root, Arc::new(move || second.store(2, Ordering::SeqCst)))
            .unwrap();

        let hook = arena.get(root).unwrap().before_each.clone().unwrap();
        hook();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_binding_redeclared_in_same_node_replaces() {
        let mut arena = ContextArena::new(site(1));
        let root = arena.root();
        arena
            .add_binding(root, BindingDecl::new("name", || Value::Integer(1)))
            .unwrap();
        arena
            .add_binding(root, BindingDecl::new("name", || Value::Integer(2)))
            .unwrap();

        assert_eq!(arena.get(root).unwrap().bindings.len(), 1);
        let chain = arena.binding_chain(root).unwrap();
        assert_eq!((chain["name"])(), Value::Integer(2));
    }

    #[test]
    fn test_descendant_binding_shadows_without_mutating_ancestor() {
        let mut arena = ContextArena::new(site(1));
        let root = arena.root();
        let inner = arena.add_child_context(root, site(2), "inner").unwrap();
        let sibling = arena.add_child_context(root, site(3), "sibling").unwrap();

        arena
            .add_binding(root, BindingDecl::new("subject", || Value::from("root")))
            .unwrap();
        arena
            .add_binding(inner, BindingDecl::new("subject", || Value::from("inner")))
            .unwrap();

        let inner_chain = arena.binding_chain(inner).unwrap();
        let sibling_chain = arena.binding_chain(sibling).unwrap();
        assert_eq!((inner_chain["subject"])(), Value::from("inner"));
        assert_eq!((sibling_chain["subject"])(), Value::from("root"));
    }

    #[test]
    fn test_ancestors_root_to_order() {
        let mut arena = ContextArena::new(site(1));
        let root = arena.root();
        let mid = arena.add_child_context(root, site(2), "mid").unwrap();
        let leaf_ctx = arena.add_child_context(mid, site(3), "leaf").unwrap();

        assert_eq!(
            arena.ancestors_root_to(leaf_ctx).unwrap(),
            vec![root, mid, leaf_ctx]
        );
    }

    #[test]
    fn test_invalid_handle_is_an_error() {
        let arena = ContextArena::new(site(1));
        let bogus = NodeId(99);
        assert!(matches!(
            arena.get(bogus),
            Err(ContextError::InvalidHandle(_))
        ));
    }

    #[test]
    fn test_any_focused_detects_leaf_focus() {
        let mut arena = ContextArena::new(site(1));
        let root = arena.root();
        assert!(!arena.any_focused());
        arena
            .add_leaf(root, LeafNode::pending(site(2), "p").focused())
            .unwrap();
        assert!(arena.any_focused());
    }
}
