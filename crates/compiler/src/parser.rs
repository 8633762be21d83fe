//! Recursive-descent parser for Calculon scripts and type signatures.
//!
//! Binary operators are parsed by precedence climbing and rewritten into
//! calls to `method <op>` symbols; the parser carries no semantics of its
//! own. The short-circuit forms `and`/`or` are the exception: they desugar
//! into conditions so the right-hand side stays lazy.
//!
//! ```text
//! toplevelsignature := paramlist ':' paramlist
//! functionsignature := paramlist typespec?
//! paramlist         := '(' (ident typespec? (',' ident typespec?)*)? ')'
//! typespec          := ':' ident ('*' integer)?
//! expr              := binary(0)
//! binary(p)         := unary ( OP rhs )*          for OP with precedence >= p
//! unary             := ('-' | 'not') tight | tight
//! tight             := leaf ( '.' ident call-args? | '{' expr (',' expr)* '}' )*
//! leaf              := NUMBER | '(' expr ')' | vector
//!                    | 'let' let-tail | 'if' if-tail | ident call-args?
//! vector            := '{' ( '*' integer expr | expr (',' expr)* ) '}'
//! ```

use crate::ast::{Ast, NodeId, NodeKind};
use crate::errors::{CompilationError, Position};
use crate::lexer::{Lexer, TokenKind};
use crate::symbols::{FunctionSymbol, Symbol, SymbolArena, SymbolId};
use crate::types::{TypeId, TypeRegistry};

/// Binding strength of a binary operator; higher binds tighter.
fn precedence(op: &str) -> Option<u32> {
    match op {
        "and" | "or" => Some(5),
        "<" | "<=" | ">" | ">=" | "==" | "!=" => Some(10),
        "+" | "-" => Some(20),
        "*" | "/" => Some(30),
        _ => None,
    }
}

pub struct Parser<'a, 'ctx> {
    lexer: Lexer<'a>,
    ast: &'ctx mut Ast,
    symbols: &'ctx mut SymbolArena,
    types: &'ctx mut TypeRegistry,
}

impl<'a, 'ctx> Parser<'a, 'ctx> {
    pub fn new(
        source: &'a str,
        ast: &'ctx mut Ast,
        symbols: &'ctx mut SymbolArena,
        types: &'ctx mut TypeRegistry,
    ) -> Result<Self, CompilationError> {
        Ok(Parser {
            lexer: Lexer::new(source)?,
            ast,
            symbols,
            types,
        })
    }

    // ------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------

    fn syntax_error(&self, message: impl Into<String>) -> CompilationError {
        CompilationError::syntax(self.lexer.position(), message)
    }

    fn expect(&mut self, token: TokenKind) -> Result<(), CompilationError> {
        if self.lexer.token() != token {
            return Err(self.syntax_error(format!("expected {}", token.name())));
        }
        self.lexer.next()
    }

    fn expect_operator(&mut self, op: &str) -> Result<(), CompilationError> {
        if self.lexer.token() != TokenKind::Operator || self.lexer.id() != op {
            return Err(self.syntax_error(format!("expected '{}'", op)));
        }
        self.lexer.next()
    }

    fn expect_identifier(&mut self, id: &str) -> Result<(), CompilationError> {
        if self.lexer.token() != TokenKind::Identifier || self.lexer.id() != id {
            return Err(self.syntax_error(format!("expected '{}'", id)));
        }
        self.lexer.next()
    }

    fn expect_end(&mut self, what: &str) -> Result<(), CompilationError> {
        if self.lexer.token() != TokenKind::EndOfFile {
            return Err(self.syntax_error(format!("expected end of {}", what)));
        }
        Ok(())
    }

    fn parse_identifier(&mut self) -> Result<(String, Position), CompilationError> {
        if self.lexer.token() != TokenKind::Identifier {
            return Err(self.syntax_error("expected identifier"));
        }
        let id = self.lexer.id().to_string();
        let position = self.lexer.position();
        self.lexer.next()?;
        Ok((id, position))
    }

    /// After a list element: either a comma, or the close paren the caller
    /// will consume.
    fn parse_list_separator(&mut self) -> Result<(), CompilationError> {
        match self.lexer.token() {
            TokenKind::Comma => self.lexer.next(),
            TokenKind::CloseParen => Ok(()),
            _ => Err(self.syntax_error("expected comma or close parenthesis")),
        }
    }

    // ------------------------------------------------------------------
    // Signatures
    // ------------------------------------------------------------------

    /// `: ident ('*' integer)?` — returns `None` when there is no colon, so
    /// callers apply their own default.
    fn parse_typespec(&mut self) -> Result<Option<TypeId>, CompilationError> {
        if self.lexer.token() != TokenKind::Colon {
            return Ok(None);
        }
        self.lexer.next()?;

        if self.lexer.token() != TokenKind::Identifier {
            return Err(self.syntax_error("expected a type name"));
        }
        let position = self.lexer.position();
        let mut name = self.lexer.id().to_string();
        self.lexer.next()?;

        if self.lexer.token() == TokenKind::Operator && self.lexer.id() == "*" {
            self.lexer.next()?;
            if self.lexer.token() != TokenKind::Number {
                return Err(self.syntax_error("invalid n-vector type specifier"));
            }
            let size = self.lexer.real();
            if size.fract() != 0.0 || size > u32::MAX as f64 {
                return Err(self.syntax_error("n-vector size must be an integer"));
            }
            if size < 1.0 {
                return Err(self.syntax_error("n-vector size must be greater than 0"));
            }
            name = format!("{}*{}", name, size as u32);
            self.lexer.next()?;
        }

        match self.types.find(&name) {
            Some(ty) => Ok(Some(ty)),
            None => Err(CompilationError::syntax(
                position,
                format!("expected a type name, not '{}'", name),
            )),
        }
    }

    /// `(ident typespec?, ...)` — each parameter becomes a Variable symbol;
    /// the type defaults to `real`.
    fn parse_paramlist(&mut self) -> Result<Vec<SymbolId>, CompilationError> {
        self.expect(TokenKind::OpenParen)?;

        let mut params = Vec::new();
        while self.lexer.token() != TokenKind::CloseParen {
            let (id, _) = self.parse_identifier()?;
            let ty = self.parse_typespec()?.unwrap_or_else(|| self.types.real());
            params.push(self.symbols.add_variable(&id, Some(ty)));
            self.parse_list_separator()?;
        }

        self.expect(TokenKind::CloseParen)?;
        Ok(params)
    }

    /// `(args) typespec?`, the signature of a `let` function.
    fn parse_function_signature(
        &mut self,
    ) -> Result<(Vec<SymbolId>, Option<TypeId>), CompilationError> {
        let args = self.parse_paramlist()?;
        let return_type = self.parse_typespec()?;
        Ok((args, return_type))
    }

    /// `(inputs) : (outputs)`, the external signature of the whole script.
    /// Parameters must be marshallable (reals or vectors) and uniquely
    /// named; the signature stream must contain nothing else.
    pub fn parse_toplevel_signature(
        &mut self,
    ) -> Result<(Vec<SymbolId>, Vec<SymbolId>), CompilationError> {
        let position = self.lexer.position();
        let inputs = self.parse_paramlist()?;
        self.expect(TokenKind::Colon)?;
        let outputs = self.parse_paramlist()?;
        self.expect_end("signature")?;

        // Names are unique across the whole signature: an output sharing an
        // input's name would shadow it in the toplevel scope.
        let mut seen = Vec::new();
        for &param in inputs.iter().chain(outputs.iter()) {
            let variable = self.symbols.variable(param);
            if seen.contains(&&variable.name) {
                return Err(CompilationError::syntax(
                    position,
                    format!("duplicate parameter '{}'", variable.name),
                ));
            }
            let ty = variable.ty.unwrap_or_else(|| self.types.real());
            if ty != self.types.real() && self.types.vector_width(ty).is_none() {
                return Err(CompilationError::type_mismatch(
                    position,
                    format!(
                        "toplevel parameter '{}' must be a real or a vector",
                        variable.name
                    ),
                ));
            }
            seen.push(&self.symbols.variable(param).name);
        }

        Ok((inputs, outputs))
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    /// Parse the whole script as one expression wrapped in `Toplevel`.
    pub fn parse_toplevel(&mut self, function: SymbolId) -> Result<NodeId, CompilationError> {
        let position = self.lexer.position();
        let body = self.parse_expression()?;
        self.expect_end("script")?;
        Ok(self
            .ast
            .add(position, NodeKind::Toplevel { function, body }))
    }

    fn parse_expression(&mut self) -> Result<NodeId, CompilationError> {
        self.parse_binary(0)
    }

    fn parse_binary(&mut self, min_precedence: u32) -> Result<NodeId, CompilationError> {
        let mut lhs = self.parse_unary()?;

        loop {
            let id = match self.lexer.token() {
                TokenKind::Operator => self.lexer.id().to_string(),
                TokenKind::Identifier if matches!(self.lexer.id(), "and" | "or") => {
                    self.lexer.id().to_string()
                }
                _ => break,
            };

            let position = self.lexer.position();
            let p = match precedence(&id) {
                Some(p) => p,
                None => return Err(self.syntax_error(format!("unrecognised operator '{}'", id))),
            };
            if p < min_precedence {
                break;
            }

            self.lexer.next()?;
            let rhs = self.parse_binary(p + 1)?;

            lhs = match id.as_str() {
                // x and y  ==  if x then y else false
                "and" => {
                    let falsity = self.ast.add(position, NodeKind::Boolean(false));
                    self.ast.add(
                        position,
                        NodeKind::Condition {
                            condition: lhs,
                            then: rhs,
                            otherwise: falsity,
                        },
                    )
                }
                // x or y  ==  if x then true else y
                "or" => {
                    let truth = self.ast.add(position, NodeKind::Boolean(true));
                    self.ast.add(
                        position,
                        NodeKind::Condition {
                            condition: lhs,
                            then: truth,
                            otherwise: rhs,
                        },
                    )
                }
                _ => self.method_call(position, &id, vec![lhs, rhs]),
            };
        }

        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<NodeId, CompilationError> {
        let is_neg = self.lexer.token() == TokenKind::Operator && self.lexer.id() == "-";
        let is_not = self.lexer.token() == TokenKind::Identifier && self.lexer.id() == "not";

        if is_neg || is_not {
            let position = self.lexer.position();
            let id = self.lexer.id().to_string();
            self.lexer.next()?;
            let value = self.parse_tight()?;
            return Ok(self.method_call(position, &id, vec![value]));
        }

        self.parse_tight()
    }

    /// Postfix member access and subscripting, binding tighter than unary
    /// operators.
    fn parse_tight(&mut self) -> Result<NodeId, CompilationError> {
        let mut value = self.parse_leaf()?;

        loop {
            match self.lexer.token() {
                // x.id or x.id(args...)  ->  method id(x, args...)
                TokenKind::Dot => {
                    let position = self.lexer.position();
                    self.lexer.next()?;
                    let (id, _) = self.parse_identifier()?;

                    let mut args = vec![value];
                    if self.lexer.token() == TokenKind::OpenParen {
                        args.extend(self.parse_call_args()?);
                    }
                    value = self.method_call(position, &id, args);
                }

                // x{i, ...}  ->  method [](x, i, ...)
                TokenKind::OpenBlock => {
                    let position = self.lexer.position();
                    self.lexer.next()?;

                    let mut args = vec![value];
                    loop {
                        args.push(self.parse_expression()?);
                        if self.lexer.token() != TokenKind::Comma {
                            break;
                        }
                        self.lexer.next()?;
                    }
                    self.expect(TokenKind::CloseBlock)?;
                    value = self.method_call(position, "[]", args);
                }

                _ => break,
            }
        }

        Ok(value)
    }

    fn parse_leaf(&mut self) -> Result<NodeId, CompilationError> {
        match self.lexer.token() {
            TokenKind::Number => {
                let position = self.lexer.position();
                let value = self.lexer.real();
                self.lexer.next()?;
                Ok(self.ast.add(position, NodeKind::Constant(value)))
            }

            TokenKind::OpenParen => {
                self.lexer.next()?;
                let value = self.parse_expression()?;
                self.expect(TokenKind::CloseParen)?;
                Ok(value)
            }

            TokenKind::OpenBlock => self.parse_vector(),

            TokenKind::Identifier => match self.lexer.id() {
                "let" => self.parse_let(),
                "if" => self.parse_if(),
                _ => self.parse_variable_or_function_call(),
            },

            _ => Err(self.syntax_error("expected an expression")),
        }
    }

    fn parse_variable_or_function_call(&mut self) -> Result<NodeId, CompilationError> {
        let (id, position) = self.parse_identifier()?;

        // return is never a call and never a variable.
        if id == "return" {
            return Ok(self.ast.add(position, NodeKind::Return { outputs: vec![] }));
        }

        if self.lexer.token() == TokenKind::OpenParen {
            let args = self.parse_call_args()?;
            return Ok(self.ast.add(
                position,
                NodeKind::FunctionCall {
                    id,
                    args,
                    target: None,
                },
            ));
        }

        let kind = match id.as_str() {
            "true" => NodeKind::Boolean(true),
            "false" => NodeKind::Boolean(false),
            "pi" => NodeKind::Constant(std::f64::consts::PI),
            "Inf" => NodeKind::Constant(f64::INFINITY),
            "NaN" => NodeKind::Constant(f64::NAN),
            _ => NodeKind::Variable { id, symbol: None },
        };
        Ok(self.ast.add(position, kind))
    }

    fn parse_call_args(&mut self) -> Result<Vec<NodeId>, CompilationError> {
        self.expect(TokenKind::OpenParen)?;

        let mut args = Vec::new();
        while self.lexer.token() != TokenKind::CloseParen {
            args.push(self.parse_expression()?);
            self.parse_list_separator()?;
        }

        self.expect(TokenKind::CloseParen)?;
        Ok(args)
    }

    /// `{*N e}` splat or `{e, ...}` literal.
    fn parse_vector(&mut self) -> Result<NodeId, CompilationError> {
        let position = self.lexer.position();
        self.expect(TokenKind::OpenBlock)?;

        if self.lexer.token() == TokenKind::Operator && self.lexer.id() == "*" {
            self.lexer.next()?;
            if self.lexer.token() != TokenKind::Number {
                return Err(self.syntax_error("expected a vector element count"));
            }
            let size = self.lexer.real();
            if size.fract() != 0.0 || size > u32::MAX as f64 {
                return Err(self.syntax_error("vector element count must be an integer"));
            }
            if size < 1.0 {
                return Err(self.syntax_error("vector element count must be greater than 0"));
            }
            self.lexer.next()?;

            let element = self.parse_expression()?;
            self.expect(TokenKind::CloseBlock)?;
            return Ok(self.ast.add(
                position,
                NodeKind::Splat {
                    element,
                    width: size as u32,
                },
            ));
        }

        let mut elements = Vec::new();
        loop {
            elements.push(self.parse_expression()?);
            if self.lexer.token() != TokenKind::Comma {
                break;
            }
            self.lexer.next()?;
        }
        self.expect(TokenKind::CloseBlock)?;

        Ok(self.ast.add(position, NodeKind::Vector { elements }))
    }

    fn parse_if(&mut self) -> Result<NodeId, CompilationError> {
        let position = self.lexer.position();
        self.expect_identifier("if")?;

        let condition = self.parse_expression()?;
        self.expect_identifier("then")?;
        let then = self.parse_expression()?;
        self.expect_identifier("else")?;
        let otherwise = self.parse_expression()?;

        Ok(self.ast.add(
            position,
            NodeKind::Condition {
                condition,
                then,
                otherwise,
            },
        ))
    }

    /// `let name [: type] = value in body` or
    /// `let name [: type] (args) [: type] = value in body`.
    fn parse_let(&mut self) -> Result<NodeId, CompilationError> {
        let position = self.lexer.position();
        self.expect_identifier("let")?;

        let (id, _) = self.parse_identifier()?;
        let declared = self.parse_typespec()?;

        if self.lexer.token() == TokenKind::OpenParen {
            // Function definition. A return type after the argument list
            // wins over one written after the name.
            let (args, signature_type) = self.parse_function_signature()?;
            let return_type = signature_type
                .or(declared)
                .unwrap_or_else(|| self.types.real());

            let function = self.symbols.add(Symbol::Function(FunctionSymbol {
                name: id,
                args,
                return_type,
                func: None,
            }));

            self.expect_operator("=")?;
            let value = self.parse_expression()?;
            let definition = self
                .ast
                .add(position, NodeKind::FunctionBody { function, body: value });

            self.expect_identifier("in")?;
            let body = self.parse_expression()?;
            Ok(self.ast.add(
                position,
                NodeKind::DefineFunction {
                    function,
                    definition,
                    body,
                },
            ))
        } else {
            // Variable definition.
            self.expect_operator("=")?;
            let value = self.parse_expression()?;
            self.expect_identifier("in")?;
            let body = self.parse_expression()?;
            Ok(self.ast.add(
                position,
                NodeKind::DefineVariable {
                    id,
                    declared,
                    symbol: None,
                    value,
                    body,
                },
            ))
        }
    }

    fn method_call(&mut self, position: Position, id: &str, args: Vec<NodeId>) -> NodeId {
        self.ast.add(
            position,
            NodeKind::FunctionCall {
                id: format!("method {}", id),
                args,
                target: None,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Result<(Ast, NodeId), CompilationError> {
        let mut ast = Ast::new();
        let mut symbols = SymbolArena::new();
        let mut types = TypeRegistry::new();
        let mut parser = Parser::new(source, &mut ast, &mut symbols, &mut types)?;
        let root = parser.parse_expression()?;
        parser.expect_end("script")?;
        Ok((ast, root))
    }

    fn call_id(ast: &Ast, node: NodeId) -> String {
        match &ast.get(node).kind {
            NodeKind::FunctionCall { id, .. } => id.clone(),
            other => panic!("expected a call, got {:?}", other),
        }
    }

    #[test]
    fn test_binary_precedence() {
        // 1 + 2 * 3 parses as 1 + (2 * 3)
        let (ast, root) = parse("1 + 2 * 3").unwrap();
        assert_eq!(call_id(&ast, root), "method +");
        let NodeKind::FunctionCall { args, .. } = &ast.get(root).kind else {
            unreachable!()
        };
        assert!(matches!(ast.get(args[0]).kind, NodeKind::Constant(v) if v == 1.0));
        assert_eq!(call_id(&ast, args[1]), "method *");
    }

    #[test]
    fn test_left_associativity() {
        // 10 - 2 - 3 parses as (10 - 2) - 3
        let (ast, root) = parse("10 - 2 - 3").unwrap();
        let NodeKind::FunctionCall { args, .. } = &ast.get(root).kind else {
            unreachable!()
        };
        assert_eq!(call_id(&ast, args[0]), "method -");
        assert!(matches!(ast.get(args[1]).kind, NodeKind::Constant(v) if v == 3.0));
    }

    #[test]
    fn test_unary_minus_is_method_call() {
        let (ast, root) = parse("-x").unwrap();
        assert_eq!(call_id(&ast, root), "method -");
        let NodeKind::FunctionCall { args, .. } = &ast.get(root).kind else {
            unreachable!()
        };
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn test_method_sugar() {
        // v.x -> method x(v); v.dot(w) -> method dot(v, w); v{1} -> method [](v, 1)
        let (ast, root) = parse("v.x").unwrap();
        assert_eq!(call_id(&ast, root), "method x");

        let (ast, root) = parse("v.dot(w)").unwrap();
        assert_eq!(call_id(&ast, root), "method dot");
        let NodeKind::FunctionCall { args, .. } = &ast.get(root).kind else {
            unreachable!()
        };
        assert_eq!(args.len(), 2);

        let (ast, root) = parse("v{1}").unwrap();
        assert_eq!(call_id(&ast, root), "method []");
    }

    #[test]
    fn test_and_desugars_to_condition() {
        let (ast, root) = parse("a and b").unwrap();
        let NodeKind::Condition { otherwise, .. } = &ast.get(root).kind else {
            panic!("expected a condition");
        };
        assert!(matches!(ast.get(*otherwise).kind, NodeKind::Boolean(false)));
    }

    #[test]
    fn test_special_identifiers() {
        let (ast, root) = parse("pi").unwrap();
        assert!(
            matches!(ast.get(root).kind, NodeKind::Constant(v) if v == std::f64::consts::PI)
        );
        let (ast, root) = parse("Inf").unwrap();
        assert!(matches!(ast.get(root).kind, NodeKind::Constant(v) if v.is_infinite()));
        let (ast, root) = parse("NaN").unwrap();
        assert!(matches!(ast.get(root).kind, NodeKind::Constant(v) if v.is_nan()));
        let (ast, root) = parse("true").unwrap();
        assert!(matches!(ast.get(root).kind, NodeKind::Boolean(true)));
    }

    #[test]
    fn test_vector_literal_and_splat() {
        let (ast, root) = parse("{1, 2, 3}").unwrap();
        let NodeKind::Vector { elements } = &ast.get(root).kind else {
            panic!("expected a vector");
        };
        assert_eq!(elements.len(), 3);

        let (ast, root) = parse("{*4 0}").unwrap();
        assert!(matches!(ast.get(root).kind, NodeKind::Splat { width: 4, .. }));
    }

    #[test]
    fn test_let_variable_and_function() {
        let (ast, root) = parse("let x = 1 in x + x").unwrap();
        assert!(matches!(ast.get(root).kind, NodeKind::DefineVariable { .. }));

        let (ast, root) = parse("let f(x, y): real = x * y in f(2, 3)").unwrap();
        assert!(matches!(ast.get(root).kind, NodeKind::DefineFunction { .. }));
    }

    #[test]
    fn test_deterministic() {
        let source = "let sq(x) = x*x in if n < 0 then sq(-n) else {n, sq(n)}.y";
        let (first, _) = parse(source).unwrap();
        let (second, _) = parse(source).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_signature_parsing() {
        let mut ast = Ast::new();
        let mut symbols = SymbolArena::new();
        let mut types = TypeRegistry::new();
        let mut parser = Parser::new(
            "(a, v: vector*3) : (out: real)",
            &mut ast,
            &mut symbols,
            &mut types,
        )
        .unwrap();
        let (inputs, outputs) = parser.parse_toplevel_signature().unwrap();
        assert_eq!(inputs.len(), 2);
        assert_eq!(outputs.len(), 1);
        // An omitted type defaults to real.
        assert_eq!(symbols.variable(inputs[0]).ty, Some(types.real()));
        assert_eq!(symbols.variable(inputs[1]).ty, Some(types.vector(3)));
    }

    #[test]
    fn test_signature_rejects_junk() {
        for signature in [
            "(n: vector*0) : (r)",     // zero-width vector
            "(n: vector) : (r)",       // vector without a width
            "(n: frob) : (r)",         // unknown type
            "(n: boolean) : (r)",      // not marshallable
            "(n, n) : (r)",            // duplicate name
            "(n) : (n)",               // output shadowing an input
            "(n) : (r) trailing",      // junk after the signature
            "(n)",                     // missing outputs
        ] {
            let mut ast = Ast::new();
            let mut symbols = SymbolArena::new();
            let mut types = TypeRegistry::new();
            let result = Parser::new(signature, &mut ast, &mut symbols, &mut types)
                .and_then(|mut p| p.parse_toplevel_signature());
            assert!(result.is_err(), "accepted {:?}", signature);
        }
    }

    #[test]
    fn test_expression_errors() {
        for source in [
            "1 +",              // missing rhs
            "let x = 1",        // missing in
            "let x 1 in x",     // missing =
            "if x then 1",      // missing else
            "{1, 2",            // unterminated vector
            "(1",               // unterminated paren
            "1 = 2",            // '=' is not an expression operator
            "1 2",              // not a single expression
        ] {
            assert!(parse(source).is_err(), "accepted {:?}", source);
        }
    }
}
