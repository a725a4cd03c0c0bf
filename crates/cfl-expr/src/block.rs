use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ExprError;
use crate::expr::{CompoundExpr, Expr};

/// Index of a block inside the [`BlockArena`] of one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Binding environment with an optional lexical parent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    parent: Option<BlockId>,
    bindings: IndexMap<String, CompoundExpr>,
}

impl Block {
    pub fn parent(&self) -> Option<BlockId> {
        self.parent
    }

    pub fn get(&self, name: &str) -> Option<&CompoundExpr> {
        self.bindings.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn bindings(&self) -> impl Iterator<Item = (&str, &CompoundExpr)> {
        self.bindings.iter().map(|(name, ce)| (name.as_str(), ce))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Owner of every block reachable from one query's expressions.
///
/// Parent links and lambda bodies refer to blocks by [`BlockId`], so the
/// lexical chain is acyclic by construction and cloning a query's state never
/// aliases another query's blocks. Slots released by [`BlockArena::collect`]
/// are handed out again by later allocations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockArena {
    blocks: Vec<Block>,
    #[serde(default)]
    free: Vec<BlockId>,
}

impl BlockArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an empty block. Panics if `parent` was not allocated by this arena.
    pub fn alloc(&mut self, parent: Option<BlockId>) -> BlockId {
        if let Some(parent) = parent {
            assert!(parent.index() < self.blocks.len(), "unknown parent block {parent}");
        }
        self.insert(Block {
            parent,
            bindings: IndexMap::new(),
        })
    }

    /// Copy a block's bindings into a fresh block with the same parent.
    pub fn clone_block(&mut self, id: BlockId) -> BlockId {
        let copy = self.get(id).clone();
        self.insert(copy)
    }

    fn insert(&mut self, block: Block) -> BlockId {
        if let Some(id) = self.free.pop() {
            self.blocks[id.index()] = block;
            return id;
        }
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(block);
        id
    }

    pub fn get(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn parent(&self, id: BlockId) -> Option<BlockId> {
        self.get(id).parent
    }

    /// Insert or replace a binding, returning the previous value.
    pub fn bind(
        &mut self,
        id: BlockId,
        name: impl Into<String>,
        value: CompoundExpr,
    ) -> Option<CompoundExpr> {
        self.blocks[id.index()].bindings.insert(name.into(), value)
    }

    /// Binding defined directly in `id`, without climbing to parents.
    pub fn get_local(&self, id: BlockId, name: &str) -> Result<&CompoundExpr, ExprError> {
        self.get(id)
            .get(name)
            .ok_or_else(|| ExprError::NotBound(name.to_string()))
    }

    /// Resolve `name` through the parent chain starting at `id`.
    pub fn lookup(&self, id: BlockId, name: &str) -> Result<&CompoundExpr, ExprError> {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let block = self.get(current);
            if let Some(value) = block.get(name) {
                return Ok(value);
            }
            cursor = block.parent;
        }
        Err(ExprError::NotBound(name.to_string()))
    }

    /// Release every block not reachable from `roots` or from the `live`
    /// terms. Reachability follows parents, lambda bodies and conditional
    /// branches, both in the terms and in the bindings of reachable blocks.
    /// Returns the number of blocks released.
    pub fn collect(&mut self, roots: &[BlockId], live: &[CompoundExpr]) -> usize {
        let before = self.len();
        let mut marked = vec![false; self.blocks.len()];
        let mut pending = roots.to_vec();
        for ce in live {
            ce.referenced_blocks(&mut pending);
        }
        while let Some(id) = pending.pop() {
            match marked.get_mut(id.index()) {
                Some(seen) if !*seen => *seen = true,
                _ => continue,
            }
            let block = &self.blocks[id.index()];
            pending.extend(block.parent);
            for value in block.bindings.values() {
                value.referenced_blocks(&mut pending);
            }
        }

        let keep = marked.iter().rposition(|seen| *seen).map_or(0, |last| last + 1);
        self.blocks.truncate(keep);
        self.free.clear();
        for (idx, seen) in marked.into_iter().take(keep).enumerate() {
            if !seen {
                self.blocks[idx] = Block::default();
                self.free.push(BlockId(idx as u32));
            }
        }
        before - self.len()
    }

    /// Whether `ce` still contains a qualified ticket anywhere: inside nested
    /// applications, curries and conditions, or in a declared output of a
    /// residual conditional's branches.
    pub fn holds_ticket(&self, ce: &CompoundExpr) -> bool {
        ce.iter().any(|se| match se {
            Expr::Ticket(_) => true,
            Expr::Name(_) | Expr::Str(_) | Expr::Lambda(_) => false,
            Expr::Apply(apply) => {
                self.holds_ticket(&apply.task)
                    || apply.bindings.values().any(|value| self.holds_ticket(value))
            }
            Expr::Curry(curry) => {
                curry.task.as_ref().is_some_and(|task| self.holds_ticket(task))
                    || curry.bindings.values().any(|value| self.holds_ticket(value))
            }
            Expr::Cond(cond) => {
                self.holds_ticket(&cond.condition)
                    || [cond.then_block, cond.else_block].into_iter().any(|branch| {
                        cond.prototype.outputs.iter().any(|output| {
                            self.blocks
                                .get(branch.index())
                                .and_then(|block| block.get(output))
                                .is_some_and(|value| self.holds_ticket(value))
                        })
                    })
            }
        })
    }

    /// Number of live blocks.
    pub fn len(&self) -> usize {
        self.blocks.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
