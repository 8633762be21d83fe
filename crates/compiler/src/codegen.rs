//! Code generation: resolved AST to Cranelift IR.
//!
//! Values are scalarized: a `real` or `boolean` is one SSA value, a
//! `vector*N` is N of them, so arbitrary vector widths cost nothing the
//! backend has to know about. Conditions become two blocks joined by block
//! parameters; `let` functions become separate `Linkage::Local` functions in
//! the same JIT module, declared before their bodies are compiled so
//! recursion resolves.
//!
//! ABI summary:
//! - `Entrypoint` (exported): scalar inputs by value, vector inputs as
//!   pointers to flat arrays loaded on entry, every output as a pointer
//!   stored before return.
//! - internal functions: scalars by value; vector arguments and returns
//!   through caller-allocated stack slots.

use std::collections::HashMap;

use cranelift::codegen::ir::condcodes::FloatCC;
use cranelift::codegen::ir::{
    self, AbiParam, InstBuilder, MemFlags, StackSlotData, StackSlotKind, Value,
};
use cranelift::frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::JITModule;
use cranelift_module::{FuncId, Linkage, Module};

use crate::ast::{Ast, NodeId, NodeKind};
use crate::builtins::{ArithOp, CompareOp, Intrinsic, Math1, Math2};
use crate::errors::{CompilationError, Position};
use crate::jit::{CompiledProgram, ParamType, Parameter, ProgramSignature};
use crate::symbols::{BoundValue, ConstantValue, Symbol, SymbolArena, SymbolId};
use crate::types::{Precision, TypeId, TypeRegistry};

/// A typed value under construction: one SSA lane per element.
#[derive(Debug, Clone)]
struct RValue {
    ty: TypeId,
    lanes: Vec<Value>,
}

/// What emitting an expression produced: a value, or the marker that a
/// `return` has already marshalled the outputs.
enum Emitted {
    Value(RValue),
    Returned,
}

/// An output parameter of the entry function: its declared symbol and the
/// pointer it is marshalled through.
#[derive(Clone)]
struct OutputSlot {
    symbol: SymbolId,
    ty: TypeId,
    ptr: Value,
}

pub struct CodeGen<'ctx> {
    module: JITModule,
    ast: &'ctx Ast,
    symbols: &'ctx mut SymbolArena,
    types: &'ctx mut TypeRegistry,
    precision: Precision,
    real_type: ir::Type,
    ptr_type: ir::Type,

    /// Which backend function bindings currently belong to. SSA values are
    /// meaningless across functions, so reads check this.
    current_epoch: u32,
    next_epoch: u32,

    /// Output slots of the entry function; `Some` only while its body is
    /// being emitted, which is what confines `return` to the toplevel.
    outputs: Option<Vec<OutputSlot>>,

    /// Imported host shims, declared once per module.
    imported: HashMap<String, FuncId>,
    /// Disambiguates same-named nested functions in the module namespace.
    func_seq: u32,
    /// Textual IR of every compiled function, for `dump()`.
    clif: Vec<String>,
}

impl<'ctx> CodeGen<'ctx> {
    pub fn new(
        precision: Precision,
        ast: &'ctx Ast,
        symbols: &'ctx mut SymbolArena,
        types: &'ctx mut TypeRegistry,
    ) -> Result<Self, CompilationError> {
        let module = crate::jit::create_module()?;
        let real_type = match precision {
            Precision::Float => ir::types::F32,
            Precision::Double => ir::types::F64,
        };
        let ptr_type = module.target_config().pointer_type();
        Ok(CodeGen {
            module,
            ast,
            symbols,
            types,
            precision,
            real_type,
            ptr_type,
            current_epoch: 0,
            next_epoch: 1,
            outputs: None,
            imported: HashMap::new(),
            func_seq: 0,
            clif: Vec::new(),
        })
    }

    /// Compile the resolved toplevel and finalize the module into a callable
    /// program.
    pub fn compile(mut self, toplevel: NodeId) -> Result<CompiledProgram, CompilationError> {
        let entry = self.compile_toplevel(toplevel)?;
        let signature = self.describe_signature(toplevel);
        crate::jit::finish(self.module, entry, self.clif.join("\n"), signature)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn position(&self, node: NodeId) -> Position {
        self.ast.get(node).position
    }

    fn real_bytes(&self) -> i32 {
        self.precision.size() as i32
    }

    /// SSA type of one lane of a value of type `ty`.
    fn lane_type(&self, ty: TypeId) -> ir::Type {
        if ty == self.types.boolean() {
            ir::types::I8
        } else {
            self.real_type
        }
    }

    fn real_const(&self, b: &mut FunctionBuilder, value: f64) -> Value {
        match self.precision {
            Precision::Float => b.ins().f32const(value as f32),
            Precision::Double => b.ins().f64const(value),
        }
    }

    fn fresh_epoch(&mut self) -> u32 {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        epoch
    }

    /// Load the N lanes of a flat vector through `ptr`.
    fn load_lanes(&self, b: &mut FunctionBuilder, ptr: Value, width: u32) -> Vec<Value> {
        (0..width as i32)
            .map(|i| {
                b.ins()
                    .load(self.real_type, MemFlags::trusted(), ptr, i * self.real_bytes())
            })
            .collect()
    }

    /// Store lanes contiguously through `ptr`.
    fn store_lanes(&self, b: &mut FunctionBuilder, ptr: Value, lanes: &[Value]) {
        for (i, &lane) in lanes.iter().enumerate() {
            b.ins()
                .store(MemFlags::trusted(), lane, ptr, i as i32 * self.real_bytes());
        }
    }

    /// Spill a vector value to a fresh stack slot and return its address.
    fn spill_to_slot(&self, b: &mut FunctionBuilder, lanes: &[Value]) -> Value {
        let size = lanes.len() as u32 * self.precision.size();
        let align = self.precision.size().trailing_zeros() as u8;
        let slot =
            b.create_sized_stack_slot(StackSlotData::new(StackSlotKind::ExplicitSlot, size, align));
        let addr = b.ins().stack_addr(self.ptr_type, slot, 0);
        self.store_lanes(b, addr, lanes);
        addr
    }

    // ------------------------------------------------------------------
    // Toplevel
    // ------------------------------------------------------------------

    fn compile_toplevel(&mut self, node: NodeId) -> Result<FuncId, CompilationError> {
        let NodeKind::Toplevel { function, body } = &self.ast.get(node).kind else {
            return Err(CompilationError::internal("codegen must start at the toplevel"));
        };
        let (function, body) = (*function, *body);
        let toplevel = self.symbols.toplevel(function);
        let args = toplevel.args.clone();
        let returns = toplevel.returns.clone();

        // External signature: scalars by value, vectors by pointer, every
        // output by pointer.
        let mut sig = self.module.make_signature();
        for &arg in &args {
            let ty = self.param_type(arg);
            if self.types.vector_width(ty).is_some() {
                sig.params.push(AbiParam::new(self.ptr_type));
            } else {
                sig.params.push(AbiParam::new(self.real_type));
            }
        }
        for _ in &returns {
            sig.params.push(AbiParam::new(self.ptr_type));
        }

        let entry_id = self
            .module
            .declare_function("Entrypoint", Linkage::Export, &sig)
            .map_err(|e| CompilationError::internal(format!("declaring Entrypoint: {}", e)))?;

        let mut ctx = self.module.make_context();
        ctx.func.signature = sig;
        let mut fbx = FunctionBuilderContext::new();
        {
            let mut b = FunctionBuilder::new(&mut ctx.func, &mut fbx);
            let block = b.create_block();
            b.append_block_params_for_function_params(block);
            b.switch_to_block(block);
            b.seal_block(block);
            let params = b.block_params(block).to_vec();

            self.current_epoch = self.fresh_epoch();
            let mut index = 0;
            for &arg in &args {
                let ty = self.param_type(arg);
                let lanes = match self.types.vector_width(ty) {
                    Some(width) => self.load_lanes(&mut b, params[index], width),
                    None => vec![params[index]],
                };
                let epoch = self.current_epoch;
                self.symbols.variable_mut(arg).value = Some(BoundValue { epoch, lanes });
                index += 1;
            }

            let mut slots = Vec::with_capacity(returns.len());
            for &ret in &returns {
                slots.push(OutputSlot {
                    symbol: ret,
                    ty: self.param_type(ret),
                    ptr: params[index],
                });
                index += 1;
            }
            self.outputs = Some(slots);

            match self.emit(&mut b, body)? {
                Emitted::Returned => {}
                Emitted::Value(value) => {
                    let slots = self.outputs.clone().unwrap_or_default();
                    if slots.len() != 1 {
                        return Err(CompilationError::type_mismatch(
                            self.position(body),
                            format!(
                                "a script with {} outputs must end with 'return'",
                                slots.len()
                            ),
                        ));
                    }
                    let slot = &slots[0];
                    if value.ty != slot.ty {
                        return Err(CompilationError::type_mismatch(
                            self.position(body),
                            format!(
                                "type mismatch: the script returns '{}' but output '{}' is declared as '{}'",
                                self.types.name(value.ty),
                                self.symbols.variable(slot.symbol).name,
                                self.types.name(slot.ty)
                            ),
                        ));
                    }
                    self.store_lanes(&mut b, slot.ptr, &value.lanes);
                }
            }

            b.ins().return_(&[]);
            b.finalize();
        }
        self.outputs = None;

        self.clif.push(format!("; Entrypoint\n{}", ctx.func.display()));
        self.module
            .define_function(entry_id, &mut ctx)
            .map_err(|e| CompilationError::internal(format!("defining Entrypoint: {}", e)))?;
        self.module.clear_context(&mut ctx);
        Ok(entry_id)
    }

    /// Declared type of a signature parameter symbol.
    fn param_type(&self, param: SymbolId) -> TypeId {
        self.symbols
            .variable(param)
            .ty
            .unwrap_or_else(|| self.types.real())
    }

    fn describe_signature(&self, toplevel: NodeId) -> ProgramSignature {
        let NodeKind::Toplevel { function, .. } = &self.ast.get(toplevel).kind else {
            unreachable!()
        };
        let describe = |params: &[SymbolId]| {
            params
                .iter()
                .map(|&p| {
                    let variable = self.symbols.variable(p);
                    let ty = match variable.ty.and_then(|t| self.types.vector_width(t)) {
                        Some(width) => ParamType::Vector(width),
                        None => ParamType::Real,
                    };
                    Parameter {
                        name: variable.name.clone(),
                        ty,
                    }
                })
                .collect()
        };
        let symbol = self.symbols.toplevel(*function);
        ProgramSignature {
            inputs: describe(&symbol.args),
            outputs: describe(&symbol.returns),
            precision: self.precision,
        }
    }

    // ------------------------------------------------------------------
    // Functions
    // ------------------------------------------------------------------

    /// Compile a `let` function's definition as its own backend function.
    fn compile_function(
        &mut self,
        function: SymbolId,
        definition: NodeId,
    ) -> Result<(), CompilationError> {
        let NodeKind::FunctionBody { body, .. } = &self.ast.get(definition).kind else {
            return Err(CompilationError::internal("malformed function definition"));
        };
        let body = *body;
        let position = self.position(definition);

        let symbol = self.symbols.function(function);
        let name = symbol.name.clone();
        let args = symbol.args.clone();
        let return_type = symbol.return_type;

        // Internal ABI: scalars by value, vectors by pointer; a vector
        // return becomes a trailing out-pointer.
        let mut sig = self.module.make_signature();
        for &arg in &args {
            let ty = self.param_type(arg);
            if self.types.vector_width(ty).is_some() {
                sig.params.push(AbiParam::new(self.ptr_type));
            } else {
                sig.params.push(AbiParam::new(self.lane_type(ty)));
            }
        }
        let vector_return = self.types.vector_width(return_type).is_some();
        if vector_return {
            sig.params.push(AbiParam::new(self.ptr_type));
        } else {
            sig.returns.push(AbiParam::new(self.lane_type(return_type)));
        }

        let module_name = format!("{}.{}", name, self.func_seq);
        self.func_seq += 1;
        let func_id = self
            .module
            .declare_function(&module_name, Linkage::Local, &sig)
            .map_err(|e| CompilationError::internal(format!("declaring '{}': {}", name, e)))?;
        // Set before compiling the body so recursive calls resolve.
        self.symbols.function_mut(function).func = Some(func_id);

        let mut ctx = self.module.make_context();
        ctx.func.signature = sig;
        let mut fbx = FunctionBuilderContext::new();

        let saved_epoch = self.current_epoch;
        let saved_outputs = self.outputs.take();
        self.current_epoch = self.fresh_epoch();

        {
            let mut b = FunctionBuilder::new(&mut ctx.func, &mut fbx);
            let block = b.create_block();
            b.append_block_params_for_function_params(block);
            b.switch_to_block(block);
            b.seal_block(block);
            let params = b.block_params(block).to_vec();

            for (index, &arg) in args.iter().enumerate() {
                let ty = self.param_type(arg);
                let lanes = match self.types.vector_width(ty) {
                    Some(width) => self.load_lanes(&mut b, params[index], width),
                    None => vec![params[index]],
                };
                let epoch = self.current_epoch;
                self.symbols.variable_mut(arg).value = Some(BoundValue { epoch, lanes });
            }

            let value = self.emit_value(&mut b, body)?;
            if value.ty != return_type {
                return Err(CompilationError::type_mismatch(
                    position,
                    format!(
                        "function '{}' does not return the type it is declared to return",
                        name
                    ),
                ));
            }

            if vector_return {
                let out_ptr = params[args.len()];
                self.store_lanes(&mut b, out_ptr, &value.lanes);
                b.ins().return_(&[]);
            } else {
                b.ins().return_(&[value.lanes[0]]);
            }
            b.finalize();
        }

        self.current_epoch = saved_epoch;
        self.outputs = saved_outputs;

        self.clif
            .push(format!("; {}\n{}", module_name, ctx.func.display()));
        self.module
            .define_function(func_id, &mut ctx)
            .map_err(|e| CompilationError::internal(format!("defining '{}': {}", name, e)))?;
        self.module.clear_context(&mut ctx);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    /// Emit an expression that must produce a value.
    fn emit_value(
        &mut self,
        b: &mut FunctionBuilder,
        node: NodeId,
    ) -> Result<RValue, CompilationError> {
        match self.emit(b, node)? {
            Emitted::Value(value) => Ok(value),
            Emitted::Returned => Err(CompilationError::type_mismatch(
                self.position(node),
                "'return' is only allowed at the end of the script",
            )),
        }
    }

    /// Emit an expression that must produce a `real`.
    fn emit_real(
        &mut self,
        b: &mut FunctionBuilder,
        node: NodeId,
    ) -> Result<Value, CompilationError> {
        let value = self.emit_value(b, node)?;
        if value.ty != self.types.real() {
            return Err(CompilationError::type_mismatch(
                self.position(node),
                "type mismatch: expected a real",
            ));
        }
        Ok(value.lanes[0])
    }

    fn emit(&mut self, b: &mut FunctionBuilder, node: NodeId) -> Result<Emitted, CompilationError> {
        let position = self.position(node);

        match &self.ast.get(node).kind {
            NodeKind::Constant(value) => {
                let value = *value;
                let lane = self.real_const(b, value);
                Ok(Emitted::Value(RValue {
                    ty: self.types.real(),
                    lanes: vec![lane],
                }))
            }

            NodeKind::Boolean(value) => {
                let lane = b.ins().iconst(ir::types::I8, *value as i64);
                Ok(Emitted::Value(RValue {
                    ty: self.types.boolean(),
                    lanes: vec![lane],
                }))
            }

            NodeKind::Variable { id, symbol } => {
                let id = id.clone();
                let symbol = symbol
                    .ok_or_else(|| CompilationError::internal("unresolved variable in codegen"))?;
                self.emit_variable(b, &id, symbol, position).map(Emitted::Value)
            }

            NodeKind::Vector { elements } => {
                let elements = elements.clone();
                let mut lanes = Vec::with_capacity(elements.len());
                for element in &elements {
                    lanes.push(self.emit_real(b, *element)?);
                }
                let ty = self.types.vector(lanes.len() as u32);
                Ok(Emitted::Value(RValue { ty, lanes }))
            }

            NodeKind::Splat { element, width } => {
                let (element, width) = (*element, *width);
                let lane = self.emit_real(b, element)?;
                Ok(Emitted::Value(RValue {
                    ty: self.types.vector(width),
                    lanes: vec![lane; width as usize],
                }))
            }

            NodeKind::FunctionCall { id, args, target } => {
                let id = id.clone();
                let args = args.clone();
                let target = target
                    .ok_or_else(|| CompilationError::internal("unresolved call in codegen"))?;

                // Arguments are evaluated strictly, left to right, before
                // dispatch.
                let mut values = Vec::with_capacity(args.len());
                for &arg in &args {
                    values.push(self.emit_value(b, arg)?);
                }

                let intrinsic = match self.symbols.get(target) {
                    Symbol::Intrinsic { op, .. } => Some(*op),
                    Symbol::Function(_) => None,
                    _ => {
                        return Err(CompilationError::internal("call target is not callable"));
                    }
                };
                match intrinsic {
                    Some(op) => self
                        .emit_intrinsic(b, op, &id, &values, &args, position)
                        .map(Emitted::Value),
                    None => self
                        .emit_user_call(b, target, &id, &values, position)
                        .map(Emitted::Value),
                }
            }

            NodeKind::Condition {
                condition,
                then,
                otherwise,
            } => {
                let (condition, then, otherwise) = (*condition, *then, *otherwise);
                self.emit_condition(b, condition, then, otherwise, position)
                    .map(Emitted::Value)
            }

            NodeKind::DefineVariable {
                id,
                declared,
                symbol,
                value,
                body,
            } => {
                let id = id.clone();
                let (declared, symbol, value, body) = (*declared, *symbol, *value, *body);
                let symbol = symbol
                    .ok_or_else(|| CompilationError::internal("unresolved let in codegen"))?;

                let bound = self.emit_value(b, value)?;
                if let Some(declared) = declared {
                    if declared != bound.ty {
                        return Err(CompilationError::type_mismatch(
                            self.position(value),
                            format!(
                                "type mismatch: '{}' is declared as '{}' but initialised with '{}'",
                                id,
                                self.types.name(declared),
                                self.types.name(bound.ty)
                            ),
                        ));
                    }
                }

                let epoch = self.current_epoch;
                let variable = self.symbols.variable_mut(symbol);
                variable.ty = Some(bound.ty);
                variable.value = Some(BoundValue {
                    epoch,
                    lanes: bound.lanes,
                });

                self.emit(b, body)
            }

            NodeKind::DefineFunction {
                function,
                definition,
                body,
            } => {
                let (function, definition, body) = (*function, *definition, *body);
                self.compile_function(function, definition)?;
                self.emit(b, body)
            }

            NodeKind::FunctionBody { .. } => {
                Err(CompilationError::internal("function body outside a definition"))
            }

            NodeKind::Return { outputs } => {
                let resolved = outputs.clone();
                self.emit_return(b, &resolved, position)
            }

            NodeKind::Toplevel { .. } => Err(CompilationError::internal("nested toplevel")),
        }
    }

    fn emit_variable(
        &mut self,
        b: &mut FunctionBuilder,
        id: &str,
        symbol: SymbolId,
        position: Position,
    ) -> Result<RValue, CompilationError> {
        match self.symbols.get(symbol) {
            Symbol::Constant { value, .. } => match value.clone() {
                ConstantValue::Real(v) => {
                    let lane = self.real_const(b, v);
                    Ok(RValue {
                        ty: self.types.real(),
                        lanes: vec![lane],
                    })
                }
                ConstantValue::Vector(vs) => {
                    let lanes: Vec<Value> = vs.iter().map(|&v| self.real_const(b, v)).collect();
                    Ok(RValue {
                        ty: self.types.vector(lanes.len() as u32),
                        lanes,
                    })
                }
            },
            Symbol::Variable(variable) => {
                let ty = variable.ty;
                let bound = variable.value.clone().ok_or_else(|| {
                    CompilationError::symbol_misuse(
                        position,
                        format!("attempt to use '{}' before it has a value", id),
                    )
                })?;
                if bound.epoch != self.current_epoch {
                    return Err(CompilationError::symbol_misuse(
                        position,
                        format!("variable '{}' cannot be used inside a nested function", id),
                    ));
                }
                let ty = ty.ok_or_else(|| CompilationError::internal("untyped binding"))?;
                Ok(RValue {
                    ty,
                    lanes: bound.lanes,
                })
            }
            _ => Err(CompilationError::internal("variable is not valued")),
        }
    }

    fn emit_condition(
        &mut self,
        b: &mut FunctionBuilder,
        condition: NodeId,
        then: NodeId,
        otherwise: NodeId,
        position: Position,
    ) -> Result<RValue, CompilationError> {
        let cond = self.emit_value(b, condition)?;
        if cond.ty != self.types.boolean() {
            return Err(CompilationError::type_mismatch(
                self.position(condition),
                "type mismatch: expected a boolean",
            ));
        }

        let then_block = b.create_block();
        let else_block = b.create_block();
        b.ins()
            .brif(cond.lanes[0], then_block, &[], else_block, &[]);
        b.seal_block(then_block);
        b.seal_block(else_block);

        // Branches are evaluated lazily, each in its own block; the join
        // block's parameters are the phi values.
        b.switch_to_block(then_block);
        let then_value = self.emit_value(b, then)?;
        let merge_block = b.create_block();
        for _ in 0..then_value.lanes.len() {
            b.append_block_param(merge_block, self.lane_type(then_value.ty));
        }
        b.ins().jump(merge_block, &then_value.lanes);

        b.switch_to_block(else_block);
        let else_value = self.emit_value(b, otherwise)?;
        if else_value.ty != then_value.ty {
            return Err(CompilationError::type_mismatch(
                position,
                format!(
                    "type mismatch: condition branches have different types '{}' and '{}'",
                    self.types.name(then_value.ty),
                    self.types.name(else_value.ty)
                ),
            ));
        }
        b.ins().jump(merge_block, &else_value.lanes);

        b.seal_block(merge_block);
        b.switch_to_block(merge_block);
        Ok(RValue {
            ty: then_value.ty,
            lanes: b.block_params(merge_block).to_vec(),
        })
    }

    fn emit_return(
        &mut self,
        b: &mut FunctionBuilder,
        resolved: &[SymbolId],
        position: Position,
    ) -> Result<Emitted, CompilationError> {
        let Some(slots) = self.outputs.clone() else {
            return Err(CompilationError::type_mismatch(
                position,
                "'return' is only allowed at the end of the script",
            ));
        };

        for (slot, &source) in slots.iter().zip(resolved) {
            let name = self.symbols.variable(slot.symbol).name.clone();
            let Symbol::Variable(variable) = self.symbols.get(source) else {
                return Err(CompilationError::symbol_misuse(
                    position,
                    format!("output '{}' does not name a value", name),
                ));
            };
            let ty = variable.ty;
            let bound = variable.value.clone().ok_or_else(|| {
                CompilationError::symbol_misuse(
                    position,
                    format!("output parameter '{}' is never given a value", name),
                )
            })?;
            if bound.epoch != self.current_epoch {
                return Err(CompilationError::symbol_misuse(
                    position,
                    format!("variable '{}' cannot be used inside a nested function", name),
                ));
            }
            let ty = ty.ok_or_else(|| CompilationError::internal("untyped binding"))?;
            if ty != slot.ty {
                return Err(CompilationError::type_mismatch(
                    position,
                    format!(
                        "type mismatch: output '{}' is declared as '{}' but bound to '{}'",
                        name,
                        self.types.name(slot.ty),
                        self.types.name(ty)
                    ),
                ));
            }
            self.store_lanes(b, slot.ptr, &bound.lanes);
        }

        Ok(Emitted::Returned)
    }

    fn emit_user_call(
        &mut self,
        b: &mut FunctionBuilder,
        target: SymbolId,
        name: &str,
        args: &[RValue],
        position: Position,
    ) -> Result<RValue, CompilationError> {
        let function = self.symbols.function(target);
        let formals = function.args.clone();
        let return_type = function.return_type;
        let func_id = function
            .func
            .ok_or_else(|| CompilationError::internal("call before declaration"))?;

        if args.len() != formals.len() {
            return Err(CompilationError::type_mismatch(
                position,
                format!(
                    "'{}' takes {} argument(s) but {} were supplied",
                    name,
                    formals.len(),
                    args.len()
                ),
            ));
        }
        for (index, (&formal, actual)) in formals.iter().zip(args).enumerate() {
            let declared = self.param_type(formal);
            if actual.ty != declared {
                return Err(CompilationError::type_mismatch(
                    position,
                    format!(
                        "type mismatch: argument {} of '{}' is declared as '{}' but '{}' was passed",
                        index + 1,
                        name,
                        self.types.name(declared),
                        self.types.name(actual.ty)
                    ),
                ));
            }
        }

        let mut call_args = Vec::with_capacity(args.len() + 1);
        for actual in args {
            if self.types.vector_width(actual.ty).is_some() {
                call_args.push(self.spill_to_slot(b, &actual.lanes));
            } else {
                call_args.push(actual.lanes[0]);
            }
        }

        let vector_return = self.types.vector_width(return_type);
        let return_ptr = vector_return.map(|width| {
            let size = width * self.precision.size();
            let align = self.precision.size().trailing_zeros() as u8;
            let slot = b.create_sized_stack_slot(StackSlotData::new(
                StackSlotKind::ExplicitSlot,
                size,
                align,
            ));
            b.ins().stack_addr(self.ptr_type, slot, 0)
        });
        if let Some(ptr) = return_ptr {
            call_args.push(ptr);
        }

        let func_ref = self.module.declare_func_in_func(func_id, b.func);
        let call = b.ins().call(func_ref, &call_args);

        let lanes = match (vector_return, return_ptr) {
            (Some(width), Some(ptr)) => self.load_lanes(b, ptr, width),
            _ => vec![b.inst_results(call)[0]],
        };
        Ok(RValue {
            ty: return_type,
            lanes,
        })
    }

    // ------------------------------------------------------------------
    // Intrinsics
    // ------------------------------------------------------------------

    /// Pair two operands up for a pointwise operation: exact scalar or
    /// equal-width vector match first, then scalar broadcast. `None` means
    /// the combination is unsupported.
    fn broadcast(&self, a: &RValue, c: &RValue) -> Option<(Vec<Value>, Vec<Value>, TypeId)> {
        let real = self.types.real();
        let wa = self.types.vector_width(a.ty);
        let wc = self.types.vector_width(c.ty);
        match (wa, wc) {
            (None, None) if a.ty == real && c.ty == real => {
                Some((a.lanes.clone(), c.lanes.clone(), real))
            }
            (Some(n), Some(m)) if n == m => Some((a.lanes.clone(), c.lanes.clone(), a.ty)),
            (Some(n), None) if c.ty == real => {
                Some((a.lanes.clone(), vec![c.lanes[0]; n as usize], a.ty))
            }
            (None, Some(m)) if a.ty == real => {
                Some((vec![a.lanes[0]; m as usize], c.lanes.clone(), c.ty))
            }
            _ => None,
        }
    }

    fn emit_intrinsic(
        &mut self,
        b: &mut FunctionBuilder,
        op: Intrinsic,
        name: &str,
        args: &[RValue],
        arg_nodes: &[NodeId],
        position: Position,
    ) -> Result<RValue, CompilationError> {
        let fail = || CompilationError::intrinsic(position, name);
        let real = self.types.real();
        let boolean = self.types.boolean();

        match op {
            Intrinsic::Arith(arith) => match args {
                // Unary minus arrives as `method -` with one argument.
                [value] if arith == ArithOp::Sub => {
                    if value.ty != real && self.types.vector_width(value.ty).is_none() {
                        return Err(fail());
                    }
                    let lanes = value.lanes.iter().map(|&v| b.ins().fneg(v)).collect();
                    Ok(RValue {
                        ty: value.ty,
                        lanes,
                    })
                }
                [lhs, rhs] => {
                    let (lv, rv, ty) = self.broadcast(lhs, rhs).ok_or_else(fail)?;
                    let lanes = lv
                        .iter()
                        .zip(&rv)
                        .map(|(&l, &r)| match arith {
                            ArithOp::Add => b.ins().fadd(l, r),
                            ArithOp::Sub => b.ins().fsub(l, r),
                            ArithOp::Mul => b.ins().fmul(l, r),
                            ArithOp::Div => b.ins().fdiv(l, r),
                        })
                        .collect();
                    Ok(RValue { ty, lanes })
                }
                _ => Err(fail()),
            },

            Intrinsic::Compare(compare) => {
                let [lhs, rhs] = args else { return Err(fail()) };
                if lhs.ty == real && rhs.ty == real {
                    let cc = match compare {
                        CompareOp::Lt => FloatCC::LessThan,
                        CompareOp::Le => FloatCC::LessThanOrEqual,
                        CompareOp::Gt => FloatCC::GreaterThan,
                        CompareOp::Ge => FloatCC::GreaterThanOrEqual,
                        CompareOp::Eq => FloatCC::Equal,
                        CompareOp::Ne => FloatCC::NotEqual,
                    };
                    let lane = b.ins().fcmp(cc, lhs.lanes[0], rhs.lanes[0]);
                    return Ok(RValue {
                        ty: boolean,
                        lanes: vec![lane],
                    });
                }

                // Equality is defined pointwise on equal-width vectors;
                // ordering on vectors is not defined at all.
                let widths = (
                    self.types.vector_width(lhs.ty),
                    self.types.vector_width(rhs.ty),
                );
                match (compare, widths) {
                    (CompareOp::Eq, (Some(n), Some(m))) if n == m => {
                        let mut result = b.ins().fcmp(FloatCC::Equal, lhs.lanes[0], rhs.lanes[0]);
                        for (&l, &r) in lhs.lanes.iter().zip(&rhs.lanes).skip(1) {
                            let lane = b.ins().fcmp(FloatCC::Equal, l, r);
                            result = b.ins().band(result, lane);
                        }
                        Ok(RValue {
                            ty: boolean,
                            lanes: vec![result],
                        })
                    }
                    (CompareOp::Ne, (Some(n), Some(m))) if n == m => {
                        let mut result =
                            b.ins().fcmp(FloatCC::NotEqual, lhs.lanes[0], rhs.lanes[0]);
                        for (&l, &r) in lhs.lanes.iter().zip(&rhs.lanes).skip(1) {
                            let lane = b.ins().fcmp(FloatCC::NotEqual, l, r);
                            result = b.ins().bor(result, lane);
                        }
                        Ok(RValue {
                            ty: boolean,
                            lanes: vec![result],
                        })
                    }
                    _ => Err(fail()),
                }
            }

            Intrinsic::Not => {
                let [value] = args else { return Err(fail()) };
                if value.ty != boolean {
                    return Err(fail());
                }
                let lane = b.ins().bxor_imm(value.lanes[0], 1);
                Ok(RValue {
                    ty: boolean,
                    lanes: vec![lane],
                })
            }

            Intrinsic::Index => {
                let [value, _index] = args else { return Err(fail()) };
                let width = self.types.vector_width(value.ty).ok_or_else(fail)?;
                // The index must be a literal constant so extraction can be
                // resolved at compile time.
                let index = match &self.ast.get(arg_nodes[1]).kind {
                    NodeKind::Constant(index) => *index,
                    _ => {
                        return Err(CompilationError::type_mismatch(
                            position,
                            "vector index must be a constant number",
                        ));
                    }
                };
                if index.fract() != 0.0 || index < 0.0 || index >= width as f64 {
                    return Err(CompilationError::type_mismatch(
                        position,
                        format!(
                            "vector index {} is out of range for '{}'",
                            index,
                            self.types.name(value.ty)
                        ),
                    ));
                }
                Ok(RValue {
                    ty: real,
                    lanes: vec![value.lanes[index as usize]],
                })
            }

            Intrinsic::Lane(lane) => {
                let [value] = args else { return Err(fail()) };
                let width = self.types.vector_width(value.ty).ok_or_else(fail)?;
                if u32::from(lane) >= width {
                    return Err(fail());
                }
                Ok(RValue {
                    ty: real,
                    lanes: vec![value.lanes[lane as usize]],
                })
            }

            Intrinsic::Math1(math) => {
                let [value] = args else { return Err(fail()) };
                if value.ty != real && self.types.vector_width(value.ty).is_none() {
                    return Err(fail());
                }
                let mut lanes = Vec::with_capacity(value.lanes.len());
                for &lane in &value.lanes {
                    lanes.push(self.emit_math1(b, math, lane)?);
                }
                Ok(RValue {
                    ty: value.ty,
                    lanes,
                })
            }

            Intrinsic::Math2(math) => {
                let [lhs, rhs] = args else { return Err(fail()) };
                let (lv, rv, ty) = self.broadcast(lhs, rhs).ok_or_else(fail)?;
                let mut lanes = Vec::with_capacity(lv.len());
                for (&l, &r) in lv.iter().zip(&rv) {
                    lanes.push(self.emit_math2(b, math, l, r)?);
                }
                Ok(RValue { ty, lanes })
            }

            Intrinsic::Sum => {
                let [value] = args else { return Err(fail()) };
                self.types.vector_width(value.ty).ok_or_else(fail)?;
                let sum = self.fold_add(b, &value.lanes);
                Ok(RValue {
                    ty: real,
                    lanes: vec![sum],
                })
            }

            Intrinsic::Dot => {
                let [lhs, rhs] = args else { return Err(fail()) };
                let (n, m) = (
                    self.types.vector_width(lhs.ty).ok_or_else(fail)?,
                    self.types.vector_width(rhs.ty).ok_or_else(fail)?,
                );
                if n != m {
                    return Err(fail());
                }
                let products: Vec<Value> = lhs
                    .lanes
                    .iter()
                    .zip(&rhs.lanes)
                    .map(|(&l, &r)| b.ins().fmul(l, r))
                    .collect();
                let sum = self.fold_add(b, &products);
                Ok(RValue {
                    ty: real,
                    lanes: vec![sum],
                })
            }

            Intrinsic::Magnitude => {
                let [value] = args else { return Err(fail()) };
                self.types.vector_width(value.ty).ok_or_else(fail)?;
                let squares: Vec<Value> = value
                    .lanes
                    .iter()
                    .map(|&lane| b.ins().fmul(lane, lane))
                    .collect();
                let sum = self.fold_add(b, &squares);
                let magnitude = b.ins().sqrt(sum);
                Ok(RValue {
                    ty: real,
                    lanes: vec![magnitude],
                })
            }

            Intrinsic::Cross => {
                let [lhs, rhs] = args else { return Err(fail()) };
                if self.types.vector_width(lhs.ty) != Some(3)
                    || self.types.vector_width(rhs.ty) != Some(3)
                {
                    return Err(fail());
                }
                let (a, c) = (&lhs.lanes, &rhs.lanes);
                let pairs = [(1, 2), (2, 0), (0, 1)];
                let lanes = pairs
                    .iter()
                    .map(|&(i, j)| {
                        let left = b.ins().fmul(a[i], c[j]);
                        let right = b.ins().fmul(a[j], c[i]);
                        b.ins().fsub(left, right)
                    })
                    .collect();
                Ok(RValue {
                    ty: self.types.vector(3),
                    lanes,
                })
            }
        }
    }

    fn fold_add(&self, b: &mut FunctionBuilder, lanes: &[Value]) -> Value {
        let mut sum = lanes[0];
        for &lane in &lanes[1..] {
            sum = b.ins().fadd(sum, lane);
        }
        sum
    }

    fn emit_math1(
        &mut self,
        b: &mut FunctionBuilder,
        math: Math1,
        lane: Value,
    ) -> Result<Value, CompilationError> {
        Ok(match math {
            Math1::Sqrt => b.ins().sqrt(lane),
            Math1::Abs => b.ins().fabs(lane),
            Math1::Floor => b.ins().floor(lane),
            Math1::Ceil => b.ins().ceil(lane),
            Math1::Round => b.ins().nearest(lane),
            _ => {
                let shim = math.shim().unwrap_or_default();
                self.call_shim(b, shim, &[lane])?
            }
        })
    }

    fn emit_math2(
        &mut self,
        b: &mut FunctionBuilder,
        math: Math2,
        lhs: Value,
        rhs: Value,
    ) -> Result<Value, CompilationError> {
        Ok(match math {
            Math2::Min => b.ins().fmin(lhs, rhs),
            Math2::Max => b.ins().fmax(lhs, rhs),
            _ => {
                let shim = math.shim().unwrap_or_default();
                self.call_shim(b, shim, &[lhs, rhs])?
            }
        })
    }

    /// Call a host maths shim, declaring the import on first use. The `f`
    /// suffix selects the single-precision variant.
    fn call_shim(
        &mut self,
        b: &mut FunctionBuilder,
        base: &str,
        args: &[Value],
    ) -> Result<Value, CompilationError> {
        let name = match self.precision {
            Precision::Double => base.to_string(),
            Precision::Float => format!("{}f", base),
        };

        let func_id = match self.imported.get(&name) {
            Some(&func_id) => func_id,
            None => {
                let mut sig = self.module.make_signature();
                for _ in args {
                    sig.params.push(AbiParam::new(self.real_type));
                }
                sig.returns.push(AbiParam::new(self.real_type));
                let func_id = self
                    .module
                    .declare_function(&name, Linkage::Import, &sig)
                    .map_err(|e| {
                        CompilationError::internal(format!("declaring shim '{}': {}", name, e))
                    })?;
                self.imported.insert(name, func_id);
                func_id
            }
        };

        let func_ref = self.module.declare_func_in_func(func_id, b.func);
        let call = b.ins().call(func_ref, args);
        Ok(b.inst_results(call)[0])
    }
}
