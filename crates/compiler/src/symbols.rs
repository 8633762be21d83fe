//! Symbols and lexical scopes.
//!
//! Symbols and scopes are arena-allocated per compilation and referenced by
//! typed indices, so the AST can hold symbol references without a pointer
//! graph. The host-facing [`SymbolTable`] is the bag of globals handed to
//! [`Compiler::compile`](crate::Compiler::compile); it is interned into the
//! root scope when compilation starts.

use std::collections::{BTreeMap, HashMap};

use cranelift::codegen::ir;
use cranelift_module::FuncId;

use crate::builtins::Intrinsic;
use crate::types::TypeId;

// ============================================================================
//                                 SYMBOLS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(u32);

/// A value bound to a variable during code generation: one SSA lane per
/// element, tagged with the epoch of the backend function that produced it.
/// SSA values are meaningless outside their function, so a cross-epoch read
/// is rejected.
#[derive(Debug, Clone)]
pub struct BoundValue {
    pub epoch: u32,
    pub lanes: Vec<ir::Value>,
}

#[derive(Debug)]
pub struct VariableSymbol {
    pub name: String,
    /// Declared type, if any; filled in with the inferred type when the
    /// variable is bound.
    pub ty: Option<TypeId>,
    pub value: Option<BoundValue>,
}

#[derive(Debug)]
pub struct FunctionSymbol {
    pub name: String,
    /// Formal arguments, each a `Variable` symbol with a declared type.
    pub args: Vec<SymbolId>,
    pub return_type: TypeId,
    /// Backend handle, set when the function is declared to the JIT module.
    pub func: Option<FuncId>,
}

/// The single script-level function: inputs in, named outputs out.
#[derive(Debug)]
pub struct ToplevelSymbol {
    pub name: String,
    pub args: Vec<SymbolId>,
    pub returns: Vec<SymbolId>,
}

/// A host-registered global constant.
#[derive(Debug, Clone)]
pub enum ConstantValue {
    Real(f64),
    Vector(Vec<f64>),
}

#[derive(Debug)]
pub enum Symbol {
    Variable(VariableSymbol),
    Function(FunctionSymbol),
    Toplevel(ToplevelSymbol),
    Constant { name: String, value: ConstantValue },
    Intrinsic { name: String, op: Intrinsic },
}

impl Symbol {
    pub fn name(&self) -> &str {
        match self {
            Symbol::Variable(v) => &v.name,
            Symbol::Function(f) => &f.name,
            Symbol::Toplevel(t) => &t.name,
            Symbol::Constant { name, .. } => name,
            Symbol::Intrinsic { name, .. } => name,
        }
    }

    /// Does this symbol have a runtime value?
    pub fn is_valued(&self) -> bool {
        matches!(self, Symbol::Variable(_) | Symbol::Constant { .. })
    }

    /// Can this symbol be called?
    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Symbol::Function(_) | Symbol::Toplevel(_) | Symbol::Intrinsic { .. }
        )
    }
}

#[derive(Debug, Default)]
pub struct SymbolArena {
    symbols: Vec<Symbol>,
}

impl SymbolArena {
    pub fn new() -> Self {
        SymbolArena::default()
    }

    pub fn add(&mut self, symbol: Symbol) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(symbol);
        id
    }

    pub fn add_variable(&mut self, name: &str, ty: Option<TypeId>) -> SymbolId {
        self.add(Symbol::Variable(VariableSymbol {
            name: name.to_string(),
            ty,
            value: None,
        }))
    }

    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0 as usize]
    }

    /// The symbol as a variable. Panics if it is anything else; callers have
    /// already checked `is_valued`/kind.
    pub fn variable(&self, id: SymbolId) -> &VariableSymbol {
        match self.get(id) {
            Symbol::Variable(v) => v,
            other => panic!("symbol '{}' is not a variable", other.name()),
        }
    }

    pub fn variable_mut(&mut self, id: SymbolId) -> &mut VariableSymbol {
        match self.get_mut(id) {
            Symbol::Variable(v) => v,
            other => panic!("symbol '{}' is not a variable", other.name()),
        }
    }

    pub fn function(&self, id: SymbolId) -> &FunctionSymbol {
        match self.get(id) {
            Symbol::Function(f) => f,
            other => panic!("symbol '{}' is not a function", other.name()),
        }
    }

    pub fn function_mut(&mut self, id: SymbolId) -> &mut FunctionSymbol {
        match self.get_mut(id) {
            Symbol::Function(f) => f,
            other => panic!("symbol '{}' is not a function", other.name()),
        }
    }

    pub fn toplevel(&self, id: SymbolId) -> &ToplevelSymbol {
        match self.get(id) {
            Symbol::Toplevel(t) => t,
            other => panic!("symbol '{}' is not a toplevel", other.name()),
        }
    }
}

// ============================================================================
//                              LEXICAL SCOPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeId(u32);

/// One lexical scope. `Singleton` scopes hold the one binding a `let`
/// introduces; `Multiple` scopes hold function formals or the globals.
#[derive(Debug)]
enum ScopeEntries {
    Empty,
    Singleton { name: String, symbol: SymbolId },
    Multiple(HashMap<String, SymbolId>),
}

#[derive(Debug)]
struct Scope {
    parent: Option<ScopeId>,
    entries: ScopeEntries,
}

#[derive(Debug, Default)]
pub struct ScopeArena {
    scopes: Vec<Scope>,
}

impl ScopeArena {
    pub fn new() -> Self {
        ScopeArena::default()
    }

    fn push(&mut self, parent: Option<ScopeId>, entries: ScopeEntries) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope { parent, entries });
        id
    }

    pub fn empty(&mut self, parent: Option<ScopeId>) -> ScopeId {
        self.push(parent, ScopeEntries::Empty)
    }

    pub fn singleton(&mut self, parent: Option<ScopeId>, name: &str, symbol: SymbolId) -> ScopeId {
        self.push(
            parent,
            ScopeEntries::Singleton {
                name: name.to_string(),
                symbol,
            },
        )
    }

    pub fn multiple(&mut self, parent: Option<ScopeId>) -> ScopeId {
        self.push(parent, ScopeEntries::Multiple(HashMap::new()))
    }

    /// Add a binding to a `Multiple` scope. Shadowing an outer scope is the
    /// point; adding to an `Empty` or full `Singleton` scope is a bug in the
    /// caller.
    pub fn add(&mut self, scope: ScopeId, name: &str, symbol: SymbolId) {
        match &mut self.scopes[scope.0 as usize].entries {
            ScopeEntries::Multiple(map) => {
                map.insert(name.to_string(), symbol);
            }
            _ => panic!("cannot add '{}' to a fixed scope", name),
        }
    }

    /// Walk the parent chain and return the first binding of `name`.
    pub fn resolve(&self, scope: ScopeId, name: &str) -> Option<SymbolId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let scope = &self.scopes[id.0 as usize];
            match &scope.entries {
                ScopeEntries::Singleton { name: n, symbol } if n == name => return Some(*symbol),
                ScopeEntries::Multiple(map) => {
                    if let Some(&symbol) = map.get(name) {
                        return Some(symbol);
                    }
                }
                _ => {}
            }
            current = scope.parent;
        }
        None
    }
}

// ============================================================================
//                           HOST-FACING GLOBALS
// ============================================================================

#[derive(Debug, Clone)]
pub(crate) enum GlobalEntry {
    Real(f64),
    Vector(Vec<f64>),
    Intrinsic(Intrinsic),
}

/// The table of global symbols a script compiles against.
///
/// [`SymbolTable::standard`] contains the built-in operators and maths
/// library; hosts register additional constants with [`add_real`] and
/// [`add_vector`]. An empty table is legal but leaves even `1 + 2`
/// unresolvable, since operators themselves are table entries.
///
/// [`add_real`]: SymbolTable::add_real
/// [`add_vector`]: SymbolTable::add_vector
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    // Ordered so interning is deterministic run to run.
    pub(crate) entries: BTreeMap<String, GlobalEntry>,
}

impl SymbolTable {
    /// An empty table with no built-ins at all.
    pub fn new() -> Self {
        SymbolTable::default()
    }

    /// The standard table: operators plus the maths library.
    pub fn standard() -> Self {
        let mut table = SymbolTable::new();
        crate::builtins::install_standard(&mut table);
        table
    }

    /// Register a global real constant.
    pub fn add_real(&mut self, name: &str, value: f64) {
        self.entries
            .insert(name.to_string(), GlobalEntry::Real(value));
    }

    /// Register a global vector constant; its type is `vector*len`.
    pub fn add_vector(&mut self, name: &str, value: Vec<f64>) {
        self.entries
            .insert(name.to_string(), GlobalEntry::Vector(value));
    }

    pub(crate) fn add_intrinsic(&mut self, name: &str, op: Intrinsic) {
        self.entries
            .insert(name.to_string(), GlobalEntry::Intrinsic(op));
    }

    /// Intern every global into fresh symbols under a new root scope.
    pub(crate) fn intern(
        &self,
        symbols: &mut SymbolArena,
        scopes: &mut ScopeArena,
    ) -> ScopeId {
        let root = scopes.multiple(None);
        for (name, entry) in &self.entries {
            let symbol = match entry {
                GlobalEntry::Real(v) => symbols.add(Symbol::Constant {
                    name: name.clone(),
                    value: ConstantValue::Real(*v),
                }),
                GlobalEntry::Vector(v) => symbols.add(Symbol::Constant {
                    name: name.clone(),
                    value: ConstantValue::Vector(v.clone()),
                }),
                GlobalEntry::Intrinsic(op) => symbols.add(Symbol::Intrinsic {
                    name: name.clone(),
                    op: *op,
                }),
            };
            scopes.add(root, name, symbol);
        }
        root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeRegistry;

    #[test]
    fn test_resolve_walks_parents() {
        let mut symbols = SymbolArena::new();
        let mut scopes = ScopeArena::new();
        let registry = TypeRegistry::new();

        let outer_sym = symbols.add_variable("x", Some(registry.real()));
        let shadow_sym = symbols.add_variable("x", Some(registry.real()));
        let other_sym = symbols.add_variable("y", None);

        let root = scopes.multiple(None);
        scopes.add(root, "x", outer_sym);
        scopes.add(root, "y", other_sym);
        let inner = scopes.singleton(Some(root), "x", shadow_sym);

        // Shadowing: the inner scope wins for x, falls through for y.
        assert_eq!(scopes.resolve(inner, "x"), Some(shadow_sym));
        assert_eq!(scopes.resolve(inner, "y"), Some(other_sym));
        assert_eq!(scopes.resolve(root, "x"), Some(outer_sym));
        assert_eq!(scopes.resolve(inner, "z"), None);
    }

    #[test]
    fn test_empty_scope_defers_to_parent() {
        let mut symbols = SymbolArena::new();
        let mut scopes = ScopeArena::new();

        let symbol = symbols.add_variable("x", None);
        let root = scopes.multiple(None);
        scopes.add(root, "x", symbol);

        // An empty scope holds nothing of its own; every lookup walks
        // straight through to the parent chain.
        let empty = scopes.empty(Some(root));
        assert_eq!(scopes.resolve(empty, "x"), Some(symbol));
        assert_eq!(scopes.resolve(empty, "y"), None);

        let orphan = scopes.empty(None);
        assert_eq!(scopes.resolve(orphan, "x"), None);
    }

    #[test]
    fn test_valued_and_callable() {
        let mut symbols = SymbolArena::new();
        let registry = TypeRegistry::new();
        let var = symbols.add_variable("x", None);
        let fun = symbols.add(Symbol::Function(FunctionSymbol {
            name: "f".to_string(),
            args: vec![],
            return_type: registry.real(),
            func: None,
        }));
        assert!(symbols.get(var).is_valued());
        assert!(!symbols.get(var).is_callable());
        assert!(symbols.get(fun).is_callable());
        assert!(!symbols.get(fun).is_valued());
    }

    #[test]
    fn test_interning_globals() {
        let mut table = SymbolTable::new();
        table.add_real("gravity", 9.81);
        table.add_vector("up", vec![0.0, 0.0, 1.0]);

        let mut symbols = SymbolArena::new();
        let mut scopes = ScopeArena::new();
        let root = table.intern(&mut symbols, &mut scopes);

        let g = scopes.resolve(root, "gravity").unwrap();
        assert!(matches!(
            symbols.get(g),
            Symbol::Constant {
                value: ConstantValue::Real(v),
                ..
            } if *v == 9.81
        ));
        assert!(scopes.resolve(root, "down").is_none());
    }
}
