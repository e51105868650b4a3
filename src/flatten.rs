use tracing::debug;

use crate::{
    context::{ChildNode, ContextArena, ContextError, LeafNode, NodeId},
    example::{Example, ExampleState},
};

/// 木を一度だけ深さ優先で歩き、宣言順どおりの Example 列を作る。
/// どこかに focus があれば、focus された leaf / 祖先を持つものだけが
/// 実行対象になり、残りはフックも body も評価せず Skipped になる。
pub(crate) fn flatten(arena: &ContextArena) -> Result<Vec<Example>, ContextError> {
    let mut flattener = Flattener {
        arena,
        any_focused: arena.any_focused(),
        examples: Vec::new(),
    };
    let mut chain = Vec::new();
    flattener.visit(arena.root(), &mut chain, false)?;
    debug!(
        examples = flattener.examples.len(),
        focused = flattener.any_focused,
        "context tree flattened"
    );
    Ok(flattener.examples)
}

struct Flattener<'a> {
    arena: &'a ContextArena,
    any_focused: bool,
    examples: Vec<Example>,
}

impl Flattener<'_> {
    fn visit(
        &mut self,
        node: NodeId,
        chain: &mut Vec<NodeId>,
        focused_above: bool,
    ) -> Result<(), ContextError> {
        let ctx = self.arena.get(node)?;
        let focused = focused_above || ctx.is_focused;
        chain.push(node);

        let first_below = self.examples.len();
        let mut leaf_seq = 0;
        for child in &ctx.children {
            match child {
                ChildNode::Leaf(leaf) => {
                    leaf_seq += 1;
                    let example = self.make_example(leaf, chain, focused, leaf_seq);
                    self.examples.push(example);
                }
                ChildNode::Context(id) => self.visit(*id, chain, focused)?,
            }
        }

        // この context の subtree 内で最後の activation に afterAll の期日を刻む。
        // 内側の context が先に終わるので、刻まれる順は leaf→root になる。
        if self.examples.len() > first_below {
            if let Some(last) = self.examples.last_mut() {
                last.last_in_contexts.push(node);
            }
        }

        chain.pop();
        Ok(())
    }

    fn make_example(
        &self,
        leaf: &LeafNode,
        chain: &[NodeId],
        focused_above: bool,
        leaf_seq: usize,
    ) -> Example {
        let runnable = !self.any_focused || focused_above || leaf.is_focused;
        let description = leaf
            .description
            .clone()
            .unwrap_or_else(|| format!("example {}", leaf_seq));
        let mut parts: Vec<&str> = Vec::new();
        for id in chain {
            if let Ok(Some(context_description)) =
                self.arena.get(*id).map(|node| node.description.as_deref())
            {
                parts.push(context_description);
            }
        }
        parts.push(&description);
        let full_description = parts.join(" ");

        let state = if leaf.is_pending || !runnable {
            ExampleState::Skipped
        } else {
            ExampleState::Pending
        };

        Example {
            identifier: String::new(), // suite が採番する
            description,
            full_description,
            call_site: leaf.call_site.clone(),
            ancestor_chain: chain.to_vec(),
            body: leaf.body.clone(),
            is_pending: leaf.is_pending,
            last_in_contexts: Vec::new(),
            state,
            failures: Vec::new(),
        }
    }
}
