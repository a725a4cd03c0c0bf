use crate::block::{BlockArena, BlockId};
use crate::expr::CompoundExpr;

/// Root block of a query plus its externally visible targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopLevelContext {
    arena: BlockArena,
    root: BlockId,
    targets: Vec<CompoundExpr>,
}

impl TopLevelContext {
    pub fn new() -> Self {
        let mut arena = BlockArena::new();
        let root = arena.alloc(None);
        Self {
            arena,
            root,
            targets: Vec::new(),
        }
    }

    pub fn root(&self) -> BlockId {
        self.root
    }

    pub fn arena(&self) -> &BlockArena {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut BlockArena {
        &mut self.arena
    }

    /// Bind a name in the root block.
    pub fn bind(&mut self, name: impl Into<String>, value: CompoundExpr) {
        self.arena.bind(self.root, name, value);
    }

    pub fn add_target(&mut self, target: CompoundExpr) {
        self.targets.push(target);
    }

    pub fn targets(&self) -> &[CompoundExpr] {
        &self.targets
    }

    /// Swap in the targets of a finished reduction pass.
    pub fn replace_targets(&mut self, targets: Vec<CompoundExpr>) {
        self.targets = targets;
    }

    /// Split into the arena and the target list for one reduction pass.
    pub fn parts_mut(&mut self) -> (&mut BlockArena, BlockId, &mut Vec<CompoundExpr>) {
        (&mut self.arena, self.root, &mut self.targets)
    }

    /// Concatenation of all targets.
    pub fn current_expr(&self) -> CompoundExpr {
        let mut out = CompoundExpr::nil();
        for target in &self.targets {
            out.append(target.clone());
        }
        out
    }
}

impl Default for TopLevelContext {
    fn default() -> Self {
        Self::new()
    }
}
