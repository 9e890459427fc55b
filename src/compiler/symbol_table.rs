//! Name resolution for the compiler.
//!
//! Scopes form a stack mirroring the nesting of the code being compiled.
//! A scope is either a function scope (the program root counts as one) or a
//! block scope nested inside one. Blocks share their function's slot space:
//! a block's first index is its parent's next index, and the function's
//! `max_definition` is the number of slots it needs.
//!
//! Resolving a name that lives in an enclosing function turns it into a free
//! variable of every function scope crossed on the way, recording the outer
//! symbol so the closure can capture it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolScope {
    Global,
    Local,
    Builtin,
    Free,
    /// The function literal currently being compiled, referred to by the
    /// name it is being bound to.
    Function,
}

impl fmt::Display for SymbolScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SymbolScope::Global => "GLOBAL",
            SymbolScope::Local => "LOCAL",
            SymbolScope::Builtin => "BUILTIN",
            SymbolScope::Free => "FREE",
            SymbolScope::Function => "FUNCTION",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub index: usize,
}

#[derive(Debug, Clone, Default)]
struct Scope {
    block: bool,
    store: HashMap<String, Symbol>,
    num_definition: usize,
    max_definition: usize,
    /// Outer symbols captured by this function, in capture order.
    free_symbols: Vec<Symbol>,
}

/// What a function scope needs once it is closed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeSummary {
    pub free_symbols: Vec<Symbol>,
    pub num_locals: usize,
}

#[derive(Debug, Clone)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
    builtins: Vec<Symbol>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    /// An empty table holding only the global scope.
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::default()],
            builtins: Vec::new(),
        }
    }

    /// A global table with every builtin function registered.
    pub fn with_builtins() -> Self {
        let mut table = Self::new();
        for (idx, b) in crate::objects::BUILTINS.iter().enumerate() {
            table.define_builtin(idx, b.name);
        }
        table
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    fn top(&self) -> usize {
        self.scopes.len() - 1
    }

    /// True when definitions land in global slots: every scope above the
    /// root is a block.
    pub fn in_global(&self) -> bool {
        self.scopes.iter().skip(1).all(|s| s.block)
    }

    fn next_index(&self, at: usize) -> usize {
        let scope = &self.scopes[at];
        if scope.block && at > 0 {
            self.next_index(at - 1) + scope.num_definition
        } else {
            scope.num_definition
        }
    }

    fn update_max_defs(&mut self, mut at: usize, n: usize) {
        loop {
            let scope = &mut self.scopes[at];
            if n > scope.max_definition {
                scope.max_definition = n;
            }
            if !scope.block || at == 0 {
                break;
            }
            at -= 1;
        }
    }

    /// Define `name` in the current scope.
    pub fn define(&mut self, name: &str) -> Symbol {
        let top = self.top();
        let index = self.next_index(top);
        let scope = if self.in_global() {
            SymbolScope::Global
        } else {
            SymbolScope::Local
        };
        let symbol = Symbol {
            name: name.to_string(),
            scope,
            index,
        };
        let current = &mut self.scopes[top];
        current.num_definition += 1;
        current.store.insert(name.to_string(), symbol.clone());
        self.update_max_defs(top, index + 1);
        symbol
    }

    /// Bind `name` to the function being compiled. Takes no slot.
    pub fn define_function(&mut self, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            scope: SymbolScope::Function,
            index: 0,
        };
        let top = self.top();
        self.scopes[top]
            .store
            .insert(name.to_string(), symbol.clone());
        symbol
    }

    /// Register a builtin function at its fixed registry index.
    pub fn define_builtin(&mut self, index: usize, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            scope: SymbolScope::Builtin,
            index,
        };
        self.scopes[0]
            .store
            .insert(name.to_string(), symbol.clone());
        self.builtins.push(symbol.clone());
        symbol
    }

    pub fn builtin_symbols(&self) -> &[Symbol] {
        &self.builtins
    }

    /// Look `name` up from the current scope outwards. Returns the symbol as
    /// seen from the current scope and the number of scopes crossed.
    pub fn resolve(&mut self, name: &str) -> Option<(Symbol, usize)> {
        let top = self.top();
        let (found_at, mut symbol) = (0..=top)
            .rev()
            .find_map(|i| self.scopes[i].store.get(name).map(|s| (i, s.clone())))?;

        for at in found_at + 1..=top {
            let scope = &mut self.scopes[at];
            if scope.block || matches!(symbol.scope, SymbolScope::Global | SymbolScope::Builtin) {
                continue;
            }
            scope.free_symbols.push(symbol.clone());
            symbol = Symbol {
                name: name.to_string(),
                scope: SymbolScope::Free,
                index: scope.free_symbols.len() - 1,
            };
            scope.store.insert(name.to_string(), symbol.clone());
        }

        Some((symbol, top - found_at))
    }

    /// The symbol `name` is bound to in the innermost scope, without
    /// looking further out.
    pub fn resolve_local(&self, name: &str) -> Option<&Symbol> {
        self.scopes[self.top()].store.get(name)
    }

    /// Open a nested scope.
    pub fn fork(&mut self, block: bool) {
        self.scopes.push(Scope {
            block,
            ..Scope::default()
        });
    }

    /// Close the innermost scope.
    pub fn leave(&mut self) -> ScopeSummary {
        if self.scopes.len() == 1 {
            return self.summary();
        }
        let scope = self.scopes.pop().unwrap_or_default();
        // top-level blocks are done for good: later globals must not reuse
        // their slots since closures may still read them
        if scope.block && self.scopes.len() == 1 {
            let root = &mut self.scopes[0];
            root.num_definition = root.num_definition.max(root.max_definition);
        }
        ScopeSummary {
            free_symbols: scope.free_symbols,
            num_locals: scope.max_definition,
        }
    }

    /// Drop scopes opened after `depth` was recorded.
    pub fn truncate(&mut self, depth: usize) {
        while self.scopes.len() > depth.max(1) {
            self.leave();
        }
    }

    fn summary(&self) -> ScopeSummary {
        ScopeSummary {
            free_symbols: self.scopes[0].free_symbols.clone(),
            num_locals: self.scopes[0].max_definition,
        }
    }

    /// Number of global slots used so far.
    pub fn max_globals(&self) -> usize {
        self.scopes[0].max_definition
    }

    /// Globals defined at the top level, by name.
    pub fn globals(&self) -> Vec<Symbol> {
        let mut out: Vec<Symbol> = self.scopes[0]
            .store
            .values()
            .filter(|s| s.scope == SymbolScope::Global)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.index);
        out
    }

    /// Names visible at the top level, global or builtin.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.scopes[0].store.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global(name: &str, index: usize) -> Symbol {
        Symbol {
            name: name.into(),
            scope: SymbolScope::Global,
            index,
        }
    }

    fn local(name: &str, index: usize) -> Symbol {
        Symbol {
            name: name.into(),
            scope: SymbolScope::Local,
            index,
        }
    }

    fn free(name: &str, index: usize) -> Symbol {
        Symbol {
            name: name.into(),
            scope: SymbolScope::Free,
            index,
        }
    }

    fn resolved(table: &mut SymbolTable, name: &str) -> (Symbol, usize) {
        table
            .resolve(name)
            .unwrap_or_else(|| panic!("'{}' not resolved", name))
    }

    #[test]
    fn test_define_and_resolve() {
        let mut t = SymbolTable::new();
        assert_eq!(t.define("a"), global("a", 0));
        assert_eq!(t.define("b"), global("b", 1));

        t.fork(false);
        assert_eq!(t.define("c"), local("c", 0));
        assert_eq!(t.define("d"), local("d", 1));

        t.fork(false);
        assert_eq!(t.define("e"), local("e", 0));

        t.fork(true);
        assert_eq!(t.define("f"), local("f", 1));

        assert_eq!(resolved(&mut t, "a"), (global("a", 0), 3));
        assert_eq!(resolved(&mut t, "f"), (local("f", 1), 0));
        assert_eq!(resolved(&mut t, "e"), (local("e", 0), 1));
        // crossing a function boundary makes it free
        assert_eq!(resolved(&mut t, "c"), (free("c", 0), 2));
        assert_eq!(resolved(&mut t, "d"), (free("d", 1), 2));
        // second lookup hits the stored free symbol
        assert_eq!(resolved(&mut t, "c"), (free("c", 0), 1));

        let summary = {
            t.leave();
            t.leave()
        };
        assert_eq!(summary.free_symbols, vec![local("c", 0), local("d", 1)]);
        assert_eq!(summary.num_locals, 2);
    }

    #[test]
    fn test_nested_free_variables_chain_through_each_function() {
        let mut t = SymbolTable::new();
        t.fork(false);
        t.define("a");
        t.fork(false);
        t.fork(false);
        assert_eq!(resolved(&mut t, "a"), (free("a", 0), 2));
        let inner = t.leave();
        // the middle function captured it first
        assert_eq!(inner.free_symbols, vec![free("a", 0)]);
        let middle = t.leave();
        assert_eq!(middle.free_symbols, vec![local("a", 0)]);
    }

    #[test]
    fn test_global_blocks_share_slots_between_siblings() {
        let mut t = SymbolTable::new();
        t.fork(true);
        assert_eq!(t.define("a"), global("a", 0));
        t.fork(true);
        assert_eq!(t.define("b"), global("b", 1));
        t.leave();
        t.fork(true);
        assert_eq!(t.define("b"), global("b", 1));
        t.leave();
        t.leave();
        assert_eq!(t.max_globals(), 2);
        // later top-level definitions start after the block's slots
        assert_eq!(t.define("c"), global("c", 2));
    }

    #[test]
    fn test_builtins_are_never_free() {
        let mut t = SymbolTable::with_builtins();
        t.fork(false);
        let (sym, _) = resolved(&mut t, "len");
        assert_eq!(sym.scope, SymbolScope::Builtin);
        assert_eq!(sym.index, 0);
        assert!(t.leave().free_symbols.is_empty());
    }

    #[test]
    fn test_function_self_symbol() {
        let mut t = SymbolTable::new();
        t.fork(false);
        t.define_function("fib");
        t.define("n");
        assert_eq!(resolved(&mut t, "fib").0.scope, SymbolScope::Function);
        t.fork(false);
        assert_eq!(resolved(&mut t, "fib").0, free("fib", 0));
        let inner = t.leave();
        assert_eq!(inner.free_symbols[0].scope, SymbolScope::Function);
    }

    #[test]
    fn test_unresolved() {
        let mut t = SymbolTable::new();
        assert!(t.resolve("nope").is_none());
    }
}
