//! Symbol resolution.
//!
//! A pre-order pass over the AST that installs a scope at every frame and
//! binds each `Variable`, `FunctionCall` and `Return` to its symbol. Scopes
//! are created lazily and reused if already present, so resolving twice
//! yields the same bindings.

use crate::ast::{Ast, NodeId, NodeKind};
use crate::errors::CompilationError;
use crate::symbols::{ScopeArena, ScopeId, SymbolArena, SymbolId};

pub struct Resolver<'ctx> {
    ast: &'ctx mut Ast,
    symbols: &'ctx mut SymbolArena,
    scopes: &'ctx mut ScopeArena,
    /// Names of the toplevel outputs, resolved afresh at every `return`.
    output_names: Vec<String>,
}

impl<'ctx> Resolver<'ctx> {
    pub fn new(
        ast: &'ctx mut Ast,
        symbols: &'ctx mut SymbolArena,
        scopes: &'ctx mut ScopeArena,
    ) -> Self {
        Resolver {
            ast,
            symbols,
            scopes,
            output_names: Vec::new(),
        }
    }

    /// Resolve the whole script. `globals` is the root scope holding the
    /// interned host symbol table.
    pub fn resolve(&mut self, toplevel: NodeId, globals: ScopeId) -> Result<(), CompilationError> {
        let NodeKind::Toplevel { function, body } = &self.ast.get(toplevel).kind else {
            panic!("resolver must start at the toplevel");
        };
        let (function, body) = (*function, *body);

        // The toplevel scope layers the input and output parameters over the
        // globals.
        if self.ast.get(toplevel).scope.is_none() {
            let scope = self.scopes.multiple(Some(globals));
            let symbol = self.symbols.toplevel(function);
            let params: Vec<SymbolId> =
                symbol.args.iter().chain(symbol.returns.iter()).copied().collect();
            for param in params {
                let name = self.symbols.variable(param).name.clone();
                self.scopes.add(scope, &name, param);
            }
            self.ast.get_mut(toplevel).scope = Some(scope);
        }

        self.output_names = self
            .symbols
            .toplevel(function)
            .returns
            .iter()
            .map(|&r| self.symbols.variable(r).name.clone())
            .collect();

        self.resolve_node(body)
    }

    /// The scope a node resolves names against: the table of its nearest
    /// enclosing frame.
    fn enclosing_scope(&self, node: NodeId) -> ScopeId {
        let frame = self
            .ast
            .frame_of(node)
            .expect("every expression sits under the toplevel frame");
        self.ast
            .get(frame)
            .scope
            .expect("frames are scoped before their children resolve")
    }

    fn lookup(&self, node: NodeId, name: &str) -> Result<SymbolId, CompilationError> {
        self.scopes
            .resolve(self.enclosing_scope(node), name)
            .ok_or_else(|| CompilationError::symbol(self.ast.get(node).position, name))
    }

    fn resolve_node(&mut self, node: NodeId) -> Result<(), CompilationError> {
        let position = self.ast.get(node).position;

        match &self.ast.get(node).kind {
            NodeKind::Constant(_) | NodeKind::Boolean(_) => Ok(()),

            NodeKind::Variable { id, .. } => {
                let id = id.clone();
                let symbol = self.lookup(node, &id)?;
                if !self.symbols.get(symbol).is_valued() {
                    return Err(CompilationError::symbol_misuse(
                        position,
                        format!(
                            "attempt to get the value of '{}', which is not a variable",
                            id
                        ),
                    ));
                }
                let NodeKind::Variable { symbol: slot, .. } = &mut self.ast.get_mut(node).kind
                else {
                    unreachable!()
                };
                *slot = Some(symbol);
                Ok(())
            }

            NodeKind::FunctionCall { id, args, .. } => {
                let id = id.clone();
                let args = args.clone();
                let symbol = self.lookup(node, &id)?;
                if !self.symbols.get(symbol).is_callable() {
                    return Err(CompilationError::symbol_misuse(
                        position,
                        format!("attempt to call '{}', which is not a function", id),
                    ));
                }
                let NodeKind::FunctionCall { target, .. } = &mut self.ast.get_mut(node).kind
                else {
                    unreachable!()
                };
                *target = Some(symbol);

                for arg in args {
                    self.resolve_node(arg)?;
                }
                Ok(())
            }

            NodeKind::Vector { elements } => {
                for element in elements.clone() {
                    self.resolve_node(element)?;
                }
                Ok(())
            }

            NodeKind::Splat { element, .. } => self.resolve_node(*element),

            NodeKind::Condition {
                condition,
                then,
                otherwise,
            } => {
                let (condition, then, otherwise) = (*condition, *then, *otherwise);
                self.resolve_node(condition)?;
                self.resolve_node(then)?;
                self.resolve_node(otherwise)
            }

            NodeKind::DefineVariable {
                id,
                declared,
                value,
                body,
                ..
            } => {
                let (id, declared, value, body) = (id.clone(), *declared, *value, *body);

                if self.ast.get(node).scope.is_none() {
                    let parent = self.ast.get(node).parent;
                    let parent_scope = parent.map(|p| self.enclosing_scope(p));
                    let symbol = self.symbols.add_variable(&id, declared);
                    let scope = self.scopes.singleton(parent_scope, &id, symbol);
                    let ast_node = self.ast.get_mut(node);
                    ast_node.scope = Some(scope);
                    let NodeKind::DefineVariable { symbol: slot, .. } = &mut ast_node.kind
                    else {
                        unreachable!()
                    };
                    *slot = Some(symbol);
                }

                // The value is resolved against the outer frame: the name
                // being bound is not in scope in its own initialiser.
                let parent = self.ast.get(node).parent;
                self.ast.set_parent(value, parent);
                self.resolve_node(value)?;
                self.resolve_node(body)
            }

            NodeKind::DefineFunction {
                function,
                definition,
                body,
            } => {
                let (function, definition, body) = (*function, *definition, *body);

                if self.ast.get(node).scope.is_none() {
                    let parent = self.ast.get(node).parent;
                    let parent_scope = parent.map(|p| self.enclosing_scope(p));
                    let name = self.symbols.function(function).name.clone();
                    let scope = self.scopes.singleton(parent_scope, &name, function);
                    self.ast.get_mut(node).scope = Some(scope);
                }

                // Both the definition and the body see the new scope, so the
                // function may call itself.
                self.resolve_node(definition)?;
                self.resolve_node(body)
            }

            NodeKind::FunctionBody { function, body } => {
                let (function, body) = (*function, *body);

                if self.ast.get(node).scope.is_none() {
                    let parent = self.ast.get(node).parent;
                    let parent_scope = parent.map(|p| self.enclosing_scope(p));
                    let scope = self.scopes.multiple(parent_scope);
                    for &arg in &self.symbols.function(function).args.clone() {
                        let name = self.symbols.variable(arg).name.clone();
                        self.scopes.add(scope, &name, arg);
                    }
                    self.ast.get_mut(node).scope = Some(scope);
                }

                self.resolve_node(body)
            }

            NodeKind::Return { .. } => {
                // Each output name is resolved at the return's own position,
                // so let-bindings of an output name shadow the parameter.
                let mut outputs = Vec::with_capacity(self.output_names.len());
                for name in self.output_names.clone() {
                    outputs.push(self.lookup(node, &name)?);
                }
                let NodeKind::Return { outputs: slot } = &mut self.ast.get_mut(node).kind else {
                    unreachable!()
                };
                *slot = outputs;
                Ok(())
            }

            NodeKind::Toplevel { .. } => {
                panic!("nested toplevel");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::symbols::{Symbol, SymbolTable, ToplevelSymbol};
    use crate::types::TypeRegistry;

    #[derive(Debug)]
    struct Resolved {
        ast: Ast,
        symbols: SymbolArena,
        root: NodeId,
    }

    fn resolve_script(signature: &str, script: &str) -> Result<Resolved, CompilationError> {
        let mut ast = Ast::new();
        let mut symbols = SymbolArena::new();
        let mut types = TypeRegistry::new();
        let mut scopes = ScopeArena::new();

        let (args, returns) = Parser::new(signature, &mut ast, &mut symbols, &mut types)?
            .parse_toplevel_signature()?;
        let function = symbols.add(Symbol::Toplevel(ToplevelSymbol {
            name: "<toplevel>".to_string(),
            args,
            returns,
        }));

        let root = Parser::new(script, &mut ast, &mut symbols, &mut types)?
            .parse_toplevel(function)?;

        let globals = SymbolTable::standard().intern(&mut symbols, &mut scopes);
        Resolver::new(&mut ast, &mut symbols, &mut scopes).resolve(root, globals)?;
        Ok(Resolved { ast, symbols, root })
    }

    fn find_variable(resolved: &Resolved, node: NodeId, name: &str) -> Option<SymbolId> {
        let mut stack = vec![node];
        while let Some(node) = stack.pop() {
            if let NodeKind::Variable { id, symbol } = &resolved.ast.get(node).kind {
                if id == name {
                    return *symbol;
                }
            }
            match &resolved.ast.get(node).kind {
                NodeKind::Vector { elements } => stack.extend(elements),
                NodeKind::Splat { element, .. } => stack.push(*element),
                NodeKind::FunctionCall { args, .. } => stack.extend(args),
                NodeKind::Condition {
                    condition,
                    then,
                    otherwise,
                } => stack.extend([condition, then, otherwise]),
                NodeKind::DefineVariable { value, body, .. } => stack.extend([value, body]),
                NodeKind::DefineFunction {
                    definition, body, ..
                } => stack.extend([definition, body]),
                NodeKind::FunctionBody { body, .. } => stack.push(*body),
                NodeKind::Toplevel { body, .. } => stack.push(*body),
                _ => {}
            }
        }
        None
    }

    #[test]
    fn test_binds_parameters() {
        let resolved = resolve_script("(n: real) : (r: real)", "n * 2").unwrap();
        let n = find_variable(&resolved, resolved.root, "n").unwrap();
        assert!(resolved.symbols.get(n).is_valued());
    }

    #[test]
    fn test_let_shadows_parameter() {
        let resolved = resolve_script("(n: real) : (r: real)", "let n = 1 in n").unwrap();
        let toplevel = resolved.symbols.toplevel(match &resolved.ast.get(resolved.root).kind {
            NodeKind::Toplevel { function, .. } => *function,
            _ => unreachable!(),
        });
        let param = toplevel.args[0];
        let bound = find_variable(&resolved, resolved.root, "n").unwrap();
        assert_ne!(bound, param);
    }

    #[test]
    fn test_let_value_sees_outer_binding() {
        // The n in the initialiser is the parameter, not the new binding.
        let resolved = resolve_script("(n: real) : (r: real)", "let n = n in n").unwrap();
        let NodeKind::DefineVariable { value, .. } = &resolved.ast.get(match &resolved
            .ast
            .get(resolved.root)
            .kind
        {
            NodeKind::Toplevel { body, .. } => *body,
            _ => unreachable!(),
        })
        .kind
        else {
            panic!("expected let");
        };
        let toplevel = resolved.symbols.toplevel(match &resolved.ast.get(resolved.root).kind {
            NodeKind::Toplevel { function, .. } => *function,
            _ => unreachable!(),
        });
        let initialiser_n = find_variable(&resolved, *value, "n").unwrap();
        assert_eq!(initialiser_n, toplevel.args[0]);
    }

    #[test]
    fn test_recursion_resolves() {
        assert!(
            resolve_script(
                "(n: real) : (r: real)",
                "let f(x) = if x <= 1 then 1 else x * f(x - 1) in f(n)"
            )
            .is_ok()
        );
    }

    #[test]
    fn test_unresolved_symbol() {
        let err = resolve_script("(n: real) : (r: real)", "foo").unwrap_err();
        assert!(err.message.contains("unresolved symbol 'foo'"));
    }

    #[test]
    fn test_calling_a_variable() {
        let err = resolve_script("(n: real) : (r: real)", "n(1)").unwrap_err();
        assert!(err.message.contains("not a function"));
    }

    #[test]
    fn test_valuing_a_function() {
        let err =
            resolve_script("(n: real) : (r: real)", "let f(x) = x in f + 1").unwrap_err();
        assert!(err.message.contains("not a variable"));
    }

    #[test]
    fn test_scope_isolation() {
        // The binding introduced by a let is invisible outside its body.
        let err =
            resolve_script("(n: real) : (r: real)", "(let x = 1 in x) + x").unwrap_err();
        assert!(err.message.contains("unresolved symbol 'x'"));
    }

    #[test]
    fn test_resolver_idempotent() {
        let mut ast = Ast::new();
        let mut symbols = SymbolArena::new();
        let mut types = TypeRegistry::new();
        let mut scopes = ScopeArena::new();

        let (args, returns) =
            Parser::new("(n: real) : (r: real)", &mut ast, &mut symbols, &mut types)
                .unwrap()
                .parse_toplevel_signature()
                .unwrap();
        let function = symbols.add(Symbol::Toplevel(ToplevelSymbol {
            name: "<toplevel>".to_string(),
            args,
            returns,
        }));
        let root = Parser::new("let x = n in x + n", &mut ast, &mut symbols, &mut types)
            .unwrap()
            .parse_toplevel(function)
            .unwrap();

        let globals = SymbolTable::standard().intern(&mut symbols, &mut scopes);
        Resolver::new(&mut ast, &mut symbols, &mut scopes)
            .resolve(root, globals)
            .unwrap();
        let first = format!("{:?}", ast);

        Resolver::new(&mut ast, &mut symbols, &mut scopes)
            .resolve(root, globals)
            .unwrap();
        assert_eq!(first, format!("{:?}", ast));
    }

    #[test]
    fn test_return_resolves_output_bindings() {
        let resolved =
            resolve_script("(n: real) : (r: real)", "let r = n * 2 in return").unwrap();
        // The return's resolved output is the let binding, not the bare
        // output parameter.
        let mut stack = vec![resolved.root];
        let mut found = None;
        while let Some(node) = stack.pop() {
            match &resolved.ast.get(node).kind {
                NodeKind::Return { outputs } => found = Some(outputs.clone()),
                NodeKind::DefineVariable { value, body, .. } => stack.extend([value, body]),
                NodeKind::Toplevel { body, .. } => stack.push(*body),
                _ => {}
            }
        }
        let outputs = found.expect("script ends in return");
        assert_eq!(outputs.len(), 1);
        let toplevel = resolved.symbols.toplevel(match &resolved.ast.get(resolved.root).kind {
            NodeKind::Toplevel { function, .. } => *function,
            _ => unreachable!(),
        });
        assert_ne!(outputs[0], toplevel.returns[0]);
    }
}
