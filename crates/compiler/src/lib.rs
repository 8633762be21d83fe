//! Calculon: an embeddable JIT compiler for a tiny pure-functional
//! calculation language.
//!
//! A script is a single expression. The host supplies it together with a
//! type signature declaring the inputs and outputs, plus a [`SymbolTable`]
//! of globals; the compiler parses, resolves, type-checks and emits native
//! code, returning a [`CompiledProgram`] whose `Entrypoint` is directly
//! callable with a C calling convention.
//!
//! ```ignore
//! use calculon::{Compiler, Precision, SymbolTable};
//!
//! let mut compiler = Compiler::new(Precision::Double);
//! let program = compiler.compile(
//!     "(n: real) : (r: real)",
//!     "if n < 0 then -n else n",
//!     &SymbolTable::standard(),
//! )?;
//! let f: extern "C" fn(f64, *mut f64) = unsafe { std::mem::transmute(program.entry_ptr()) };
//! let mut r = 0.0;
//! f(-4.0, &mut r);
//! assert_eq!(r, 4.0);
//! ```
//!
//! The language has `let` bindings (variables and functions, including
//! recursive ones), conditions with short-circuit `and`/`or`, and
//! first-class `vector*N` values of any width with `{...}` literals,
//! `{*N e}` splats, `v.x`/`v.y`/`v.z` accessors and `v{k}` subscripts.
//! There are no statements, no mutation and no I/O; compiled code is pure.

pub mod ast;
pub mod builtins;
pub mod codegen;
pub mod errors;
pub mod jit;
pub mod lexer;
pub mod parser;
pub mod resolver;
pub mod symbols;
pub mod types;

pub use errors::{CompilationError, ErrorKind, Position};
pub use jit::{CompiledProgram, ParamType, Parameter, ProgramSignature};
pub use symbols::SymbolTable;
pub use types::Precision;

use tracing::debug;

use crate::ast::Ast;
use crate::codegen::CodeGen;
use crate::parser::Parser;
use crate::resolver::Resolver;
use crate::symbols::{ScopeArena, Symbol, SymbolArena, ToplevelSymbol};
use crate::types::TypeRegistry;

/// A compiler instance: the chosen real precision plus the type alias map.
///
/// Instances are independent; each call to [`compile`](Self::compile)
/// produces a self-contained [`CompiledProgram`].
pub struct Compiler {
    precision: Precision,
    types: TypeRegistry,
}

impl Compiler {
    pub fn new(precision: Precision) -> Self {
        Compiler {
            precision,
            types: TypeRegistry::new(),
        }
    }

    /// Define a type alias usable in signatures, e.g. `vec3` for
    /// `vector*3`. Aliases of aliases are rejected here, at definition time.
    pub fn define_alias(&mut self, name: &str, canonical: &str) -> Result<(), CompilationError> {
        self.types
            .register_alias(name, canonical)
            .map_err(|message| CompilationError::type_mismatch(Position::default(), message))
    }

    /// Compile a script against a toplevel signature and a table of globals.
    ///
    /// `signature` has the form `(inputs) : (outputs)`; parameter types
    /// default to `real`. The script is one expression; with a single
    /// output its value is the result, with several the script binds each
    /// output name with `let` and ends in `return`.
    pub fn compile(
        &mut self,
        signature: &str,
        script: &str,
        globals: &SymbolTable,
    ) -> Result<CompiledProgram, CompilationError> {
        let mut ast = Ast::new();
        let mut symbols = SymbolArena::new();
        let mut scopes = ScopeArena::new();

        debug!("parsing type signature");
        let (args, returns) = Parser::new(signature, &mut ast, &mut symbols, &mut self.types)?
            .parse_toplevel_signature()?;
        let function = symbols.add(Symbol::Toplevel(ToplevelSymbol {
            name: "<toplevel>".to_string(),
            args,
            returns,
        }));

        debug!("parsing script");
        let toplevel = Parser::new(script, &mut ast, &mut symbols, &mut self.types)?
            .parse_toplevel(function)?;

        debug!("resolving symbols");
        let root = globals.intern(&mut symbols, &mut scopes);
        Resolver::new(&mut ast, &mut symbols, &mut scopes).resolve(toplevel, root)?;

        debug!("generating code");
        let codegen = CodeGen::new(self.precision, &ast, &mut symbols, &mut self.types)?;
        let program = codegen.compile(toplevel)?;
        debug!(precision = ?self.precision, "compilation complete");
        Ok(program)
    }
}
