//! The symbol table: lexically nested scopes resolving identifiers to
//! local, free (captured), global or builtin bindings.
//!
//! Scopes form an arena. A fork with `block = true` opens a new lexical
//! block inside the same function (sharing its local slots); `block = false`
//! opens a fresh function scope. Lookup walks the block chain first, then
//! enclosing functions; a local found in an enclosing function is promoted
//! to a free variable in every intervening function scope.

use ahash::AHashMap;

use crate::{builtins::Builtin, intern::StringId};

/// The four binding kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScopeKind {
    Local,
    Free,
    Global,
    Builtin,
}

/// Handle to a symbol in the table's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SymbolId(u32);

impl SymbolId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
pub(crate) struct SymbolData {
    pub name: StringId,
    pub scope: ScopeKind,
    /// Local slot, free index or builtin id, depending on the kind.
    pub index: u16,
    pub constant: bool,
    pub variadic: bool,
    /// Set when the binding is written after definition; propagated up the
    /// `original` chain so enclosing locals know a capture writes them.
    pub assigned: bool,
    /// For free symbols: the captured symbol in the enclosing scope.
    pub original: Option<SymbolId>,
}

#[derive(Debug)]
struct Scope {
    parent: Option<usize>,
    /// True for a lexical block within the same function.
    block: bool,
    store: AHashMap<StringId, SymbolId>,
    /// Free symbols of this function scope: the enclosing-scope symbols
    /// they capture, in free-index order. Only used on function roots.
    free: Vec<SymbolId>,
    /// Local slot counter. Only used on function roots.
    num_locals: u16,
}

/// Errors surfaced to the compiler, which attaches positions.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SymbolError {
    Redefined,
    /// The 256-local cap was hit.
    Limit,
}

pub(crate) struct SymbolTable {
    symbols: Vec<SymbolData>,
    scopes: Vec<Scope>,
    current: usize,
    max_locals: u16,
    /// Interned name of the `_` sentinel, which may be redefined freely.
    blank: StringId,
}

impl std::fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolTable")
            .field("scopes", &self.scopes.len())
            .field("symbols", &self.symbols.len())
            .finish()
    }
}

impl SymbolTable {
    pub fn new(max_locals: u16, blank: StringId) -> Self {
        Self {
            symbols: Vec::new(),
            scopes: vec![Scope {
                parent: None,
                block: false,
                store: AHashMap::new(),
                free: Vec::new(),
                num_locals: 0,
            }],
            current: 0,
            max_locals,
            blank,
        }
    }

    /// Opens a child scope and makes it current.
    pub fn fork(&mut self, block: bool) {
        self.scopes.push(Scope {
            parent: Some(self.current),
            block,
            store: AHashMap::new(),
            free: Vec::new(),
            num_locals: 0,
        });
        self.current = self.scopes.len() - 1;
    }

    /// Returns to the parent scope, yielding the scope just left.
    pub fn leave(&mut self) -> usize {
        let left = self.current;
        self.current = self.scopes[left].parent.expect("cannot leave the root scope");
        left
    }

    /// True at the top level of the module.
    #[must_use]
    pub fn at_top_level(&self) -> bool {
        self.current == 0
    }

    /// The current scope's index.
    #[must_use]
    pub fn current(&self) -> usize {
        self.current
    }

    #[must_use]
    pub fn symbol(&self, id: SymbolId) -> &SymbolData {
        &self.symbols[id.index()]
    }

    /// The function root of a scope: itself, or the nearest non-block
    /// ancestor.
    fn function_root(&self, mut scope: usize) -> usize {
        while self.scopes[scope].block {
            scope = self.scopes[scope].parent.expect("block scope has a parent");
        }
        scope
    }

    /// Number of local slots used by the function owning the given scope.
    #[must_use]
    pub fn num_locals(&self, scope: usize) -> u16 {
        self.scopes[self.function_root(scope)].num_locals
    }

    /// The enclosing-scope symbols captured by the given function scope, in
    /// free-index order.
    #[must_use]
    pub fn free_captures(&self, scope: usize) -> Vec<SymbolId> {
        self.scopes[self.function_root(scope)].free.clone()
    }

    fn alloc(&mut self, data: SymbolData) -> SymbolId {
        let id = SymbolId(u32::try_from(self.symbols.len()).expect("symbol arena exceeds u32"));
        self.symbols.push(data);
        id
    }

    /// Defines a local in the current scope. Redefinition within one block
    /// fails, except for the `_` sentinel and cached builtin entries, which
    /// a local may shadow.
    pub fn define(&mut self, name: StringId) -> Result<SymbolId, SymbolError> {
        let blank = name == self.blank;
        if !blank
            && let Some(&existing) = self.scopes[self.current].store.get(&name)
            && self.symbols[existing.index()].scope != ScopeKind::Builtin
        {
            return Err(SymbolError::Redefined);
        }
        let root = self.function_root(self.current);
        let slot = self.scopes[root].num_locals;
        if slot >= self.max_locals {
            return Err(SymbolError::Limit);
        }
        self.scopes[root].num_locals += 1;
        let id = self.alloc(SymbolData {
            name,
            scope: ScopeKind::Local,
            index: slot,
            constant: false,
            variadic: false,
            assigned: false,
            original: None,
        });
        if !blank {
            self.scopes[self.current].store.insert(name, id);
        }
        Ok(id)
    }

    /// Defines a constant local.
    pub fn define_const(&mut self, name: StringId) -> Result<SymbolId, SymbolError> {
        let id = self.define(name)?;
        self.symbols[id.index()].constant = true;
        Ok(id)
    }

    /// Declares a parameter, optionally variadic. Parameters are ordinary
    /// locals occupying the first slots.
    pub fn define_param(&mut self, name: StringId, variadic: bool) -> Result<SymbolId, SymbolError> {
        let id = self.define(name)?;
        self.symbols[id.index()].variadic = variadic;
        Ok(id)
    }

    /// Declares a global name in the current (top-level) scope.
    pub fn define_global(&mut self, name: StringId) -> Result<SymbolId, SymbolError> {
        if self.scopes[self.current].store.contains_key(&name) {
            return Err(SymbolError::Redefined);
        }
        let id = self.alloc(SymbolData {
            name,
            scope: ScopeKind::Global,
            index: 0,
            constant: false,
            variadic: false,
            assigned: false,
            original: None,
        });
        self.scopes[self.current].store.insert(name, id);
        Ok(id)
    }

    /// Marks a symbol written, propagating up the `original` chain.
    pub fn mark_assigned(&mut self, id: SymbolId) {
        let mut cursor = Some(id);
        while let Some(sym) = cursor {
            self.symbols[sym.index()].assigned = true;
            cursor = self.symbols[sym.index()].original;
        }
    }

    /// Resolves a name per the scope regime: block chain, then enclosing
    /// functions with free promotion, then builtins. The caller supplies
    /// the builtin the name would resolve to, if any.
    pub fn resolve(&mut self, name: StringId, builtin: Option<Builtin>) -> Option<SymbolId> {
        if let Some(found) = self.resolve_from(self.current, name) {
            return Some(found);
        }
        // Builtins resolve last and are cached in the root scope.
        let builtin = builtin?;
        let id = self.alloc(SymbolData {
            name,
            scope: ScopeKind::Builtin,
            index: u16::from(builtin as u8),
            constant: true,
            variadic: false,
            assigned: false,
            original: None,
        });
        self.scopes[0].store.insert(name, id);
        Some(id)
    }

    fn resolve_from(&mut self, scope: usize, name: StringId) -> Option<SymbolId> {
        // Search the block chain of the current function, innermost first.
        let mut s = scope;
        loop {
            if let Some(&sym) = self.scopes[s].store.get(&name) {
                return Some(sym);
            }
            if !self.scopes[s].block {
                break;
            }
            s = self.scopes[s].parent.expect("block scope has a parent");
        }
        let func_root = s;
        let parent = self.scopes[func_root].parent?;
        let found = self.resolve_from(parent, name)?;
        match self.symbols[found.index()].scope {
            // Globals and builtins are reachable from anywhere without
            // capture.
            ScopeKind::Global | ScopeKind::Builtin => Some(found),
            ScopeKind::Local | ScopeKind::Free => {
                // Promote to a free variable of this function.
                let free_index =
                    u16::try_from(self.scopes[func_root].free.len()).expect("free list exceeds u16 range");
                let constant = self.symbols[found.index()].constant;
                let id = self.alloc(SymbolData {
                    name,
                    scope: ScopeKind::Free,
                    index: free_index,
                    constant,
                    variadic: false,
                    assigned: false,
                    original: Some(found),
                });
                self.scopes[func_root].free.push(found);
                self.scopes[func_root].store.insert(name, id);
                Some(id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::intern::Interns;

    use super::*;

    #[test]
    fn test_define_and_resolve_local() {
        let mut interns = Interns::new();
        let blank = interns.intern("_");
        let a = interns.intern("a");
        let mut table = SymbolTable::new(256, blank);
        let id = table.define(a).unwrap();
        assert_eq!(table.symbol(id).scope, ScopeKind::Local);
        assert_eq!(table.symbol(id).index, 0);
        assert_eq!(table.resolve(a, None), Some(id));
    }

    #[test]
    fn test_redefinition_fails_except_blank() {
        let mut interns = Interns::new();
        let blank = interns.intern("_");
        let a = interns.intern("a");
        let mut table = SymbolTable::new(256, blank);
        table.define(a).unwrap();
        assert_eq!(table.define(a), Err(SymbolError::Redefined));
        table.define(blank).unwrap();
        table.define(blank).unwrap();
    }

    #[test]
    fn test_block_shares_locals_and_shadows() {
        let mut interns = Interns::new();
        let blank = interns.intern("_");
        let a = interns.intern("a");
        let mut table = SymbolTable::new(256, blank);
        table.define(a).unwrap();
        table.fork(true);
        let inner = table.define(a).unwrap();
        // Shadowing in a block allocates a fresh slot in the same function.
        assert_eq!(table.symbol(inner).index, 1);
        let scope = table.leave();
        assert_eq!(table.num_locals(scope), 2);
    }

    #[test]
    fn test_free_promotion_through_two_functions() {
        let mut interns = Interns::new();
        let blank = interns.intern("_");
        let x = interns.intern("x");
        let mut table = SymbolTable::new(256, blank);
        let outer = table.define(x).unwrap();

        table.fork(false); // middle function
        table.fork(false); // inner function
        let resolved = table.resolve(x, None).unwrap();
        assert_eq!(table.symbol(resolved).scope, ScopeKind::Free);
        assert_eq!(table.symbol(resolved).index, 0);

        let inner_scope = table.leave();
        let inner_free = table.free_captures(inner_scope);
        assert_eq!(inner_free.len(), 1);
        // The inner function captures the middle function's free symbol,
        // which in turn captures the outer local.
        let middle_sym = inner_free[0];
        assert_eq!(table.symbol(middle_sym).scope, ScopeKind::Free);
        assert_eq!(table.symbol(middle_sym).original, Some(outer));

        let middle_scope = table.leave();
        assert_eq!(table.free_captures(middle_scope), vec![outer]);
    }

    #[test]
    fn test_assigned_propagates_to_original() {
        let mut interns = Interns::new();
        let blank = interns.intern("_");
        let x = interns.intern("x");
        let mut table = SymbolTable::new(256, blank);
        let outer = table.define(x).unwrap();
        table.fork(false);
        let free = table.resolve(x, None).unwrap();
        table.mark_assigned(free);
        assert!(table.symbol(outer).assigned);
    }

    #[test]
    fn test_symbol_limit() {
        let mut interns = Interns::new();
        let blank = interns.intern("_");
        let mut table = SymbolTable::new(2, blank);
        table.define(interns.intern("a")).unwrap();
        table.define(interns.intern("b")).unwrap();
        assert_eq!(table.define(interns.intern("c")), Err(SymbolError::Limit));
    }
}
