// Lowers a checked program into the typed SSA module. Control flow becomes
// explicit blocks with one terminator each; scope entry/exit is paired on
// every path, including error exits.

use std::collections::HashMap;

use thiserror::Error;
use tracing::trace;

use crate::frontend::ast::*;
use crate::sema::scope::{ObjDecl, ObjId, ObjKind};
use crate::sema::types::{BasicKind, FuncType, NameId, Type};
use crate::sema::{Program, SelStep};

use super::{
    BinOp, BlockId, Callee, CastOp, FcmpPred, FuncId, GepIndex, GlobalId, IcmpPred, Inst, IrType,
    Module, Terminator, ValueId,
};

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("{line}:{column}: unsupported construct in IR emission: {what}")]
    Unsupported {
        what: String,
        line: usize,
        column: usize,
    },
    #[error("{line}:{column}: internal error: {message}")]
    Internal {
        message: String,
        line: usize,
        column: usize,
    },
}

impl EmitError {
    fn unsupported(span: &Span, what: impl Into<String>) -> Self {
        EmitError::Unsupported {
            what: what.into(),
            line: span.line,
            column: span.column,
        }
    }

    fn internal(span: &Span, message: impl Into<String>) -> Self {
        EmitError::Internal {
            message: message.into(),
            line: span.line,
            column: span.column,
        }
    }
}

type EmitResult<T> = Result<T, EmitError>;

/// An IR value paired with its semantic type. Addressable values also
/// carry the pointer locating their storage.
#[derive(Clone, Debug)]
pub struct TypedValue {
    pub value: ValueId,
    pub ty: Type,
    pub addr: Option<ValueId>,
}

impl TypedValue {
    fn rvalue(value: ValueId, ty: Type) -> Self {
        TypedValue {
            value,
            ty,
            addr: None,
        }
    }

    fn addressable(value: ValueId, ty: Type, addr: ValueId) -> Self {
        TypedValue {
            value,
            ty,
            addr: Some(addr),
        }
    }
}

/// Storage binding for a named object inside the current function.
#[derive(Clone, Debug)]
struct Slot {
    ptr: ValueId,
    ty: Type,
}

enum CallValue {
    Void,
    One(TypedValue),
    Tuple(ValueId, Vec<Type>),
}

struct FnCtx {
    results: Vec<Type>,
}

struct RuntimeFns {
    newgoroutine: FuncId,
    goalloc: FuncId,
    gopanic: FuncId,
    makechan: FuncId,
    makemap: FuncId,
}

/// Lower a checked program into an IR module.
pub fn lower(prog: &Program) -> EmitResult<Module> {
    let mut e = Emitter::new(prog);
    e.declare_functions()?;
    e.emit_bodies()?;
    e.emit_package_init()?;
    Ok(e.module)
}

struct Emitter<'a> {
    prog: &'a Program,
    module: Module,
    runtime: RuntimeFns,
    cur_func: FuncId,
    cur_block: Option<BlockId>,
    func_ids: HashMap<ObjId, FuncId>,
    global_ids: HashMap<ObjId, GlobalId>,
    bindings: Vec<HashMap<ObjId, Slot>>,
    fn_stack: Vec<FnCtx>,
    /// (continue target, break target), innermost last.
    loop_stack: Vec<(BlockId, BlockId)>,
    named_irs: HashMap<NameId, String>,
    go_counter: usize,
}

impl<'a> Emitter<'a> {
    fn new(prog: &'a Program) -> Self {
        let mut module = Module::new("main");
        let byte_ptr = IrType::I8.ptr_to();
        let thunk_ty = IrType::Func {
            params: vec![byte_ptr.clone()],
            ret: Box::new(IrType::Void),
        }
        .ptr_to();
        let runtime = RuntimeFns {
            newgoroutine: module.declare_external(
                "newgoroutine",
                vec![thunk_ty, byte_ptr.clone(), IrType::I32],
                IrType::Void,
            ),
            goalloc: module.declare_external("goalloc", vec![IrType::I32], byte_ptr.clone()),
            gopanic: module.declare_external("gopanic", vec![byte_ptr.clone()], IrType::Void),
            makechan: module.declare_external("makechan", vec![IrType::I32], byte_ptr.clone()),
            makemap: module.declare_external("makemap", vec![IrType::I32], byte_ptr),
        };
        Emitter {
            prog,
            module,
            runtime,
            cur_func: 0,
            cur_block: None,
            func_ids: HashMap::new(),
            global_ids: HashMap::new(),
            bindings: Vec::new(),
            fn_stack: Vec::new(),
            loop_stack: Vec::new(),
            named_irs: HashMap::new(),
            go_counter: 0,
        }
    }

    // ----- small helpers -----

    fn emit(&mut self, inst: Inst) -> EmitResult<ValueId> {
        let block = self.cur_block.ok_or_else(|| {
            EmitError::internal(&Span::default(), "no insertion block")
        })?;
        Ok(self.module.function_mut(self.cur_func).push_inst(block, inst))
    }

    fn terminate(&mut self, term: Terminator) {
        if let Some(block) = self.cur_block {
            self.module.function_mut(self.cur_func).terminate(block, term);
        }
    }

    fn block_terminated(&self, block: BlockId) -> bool {
        self.module.function(self.cur_func).is_terminated(block)
    }

    fn const_i32(&mut self, v: i64) -> EmitResult<ValueId> {
        self.emit(Inst::ConstInt {
            ty: IrType::I32,
            value: v,
        })
    }

    fn scoped<T>(&mut self, f: impl FnOnce(&mut Self) -> EmitResult<T>) -> EmitResult<T> {
        self.bindings.push(HashMap::new());
        let out = f(self);
        self.bindings.pop();
        out
    }

    fn lookup_slot(&self, obj: ObjId) -> Option<Slot> {
        for scope in self.bindings.iter().rev() {
            if let Some(slot) = scope.get(&obj) {
                return Some(slot.clone());
            }
        }
        None
    }

    fn bind(&mut self, obj: ObjId, slot: Slot) {
        if let Some(scope) = self.bindings.last_mut() {
            scope.insert(obj, slot);
        }
    }

    fn sem_type(&self, e: &Expr) -> EmitResult<Type> {
        self.prog
            .type_of(e.id)
            .cloned()
            .ok_or_else(|| EmitError::internal(&e.span, "expression was not type checked"))
    }

    fn obj_type(&self, obj: ObjId, span: &Span) -> EmitResult<Type> {
        self.prog
            .objects
            .get(obj)
            .typ
            .clone()
            .ok_or_else(|| EmitError::internal(span, "object has no type"))
    }

    // ----- type mapping -----

    fn to_ir(&mut self, t: &Type, span: &Span) -> EmitResult<IrType> {
        Ok(match t {
            Type::Basic(k) => match k.default_typed() {
                BasicKind::Bool => IrType::I1,
                BasicKind::Int | BasicKind::Uint => IrType::I32,
                BasicKind::Int8 | BasicKind::Uint8 => IrType::I8,
                BasicKind::Int16 | BasicKind::Uint16 => IrType::I16,
                BasicKind::Int32 | BasicKind::Uint32 => IrType::I32,
                BasicKind::Int64 | BasicKind::Uint64 | BasicKind::Uintptr => IrType::I64,
                BasicKind::Float32 => IrType::F32,
                BasicKind::Float64 => IrType::F64,
                BasicKind::Complex64 => IrType::Struct(vec![IrType::F32, IrType::F32]),
                BasicKind::Complex128 => IrType::Struct(vec![IrType::F64, IrType::F64]),
                BasicKind::String => IrType::Struct(vec![IrType::I8.ptr_to(), IrType::I32]),
                _ => return Err(EmitError::internal(span, "untyped kind reached emission")),
            },
            Type::Named(nid) => {
                if let Some(name) = self.named_irs.get(nid) {
                    return Ok(IrType::NamedRef(name.clone()));
                }
                let name = self
                    .prog
                    .objects
                    .get(self.prog.table.get(*nid).obj)
                    .name
                    .clone();
                self.named_irs.insert(*nid, name.clone());
                let index = self.module.declare_named_type(name.clone());
                let under = self.prog.table.underlying(t);
                let ir = self.to_ir(&under, span)?;
                self.module.define_named_type(index, ir);
                IrType::NamedRef(name)
            }
            Type::Pointer { base } => self.to_ir(base, span)?.ptr_to(),
            Type::Array { elt, len } => IrType::Array(Box::new(self.to_ir(elt, span)?), *len),
            Type::Slice { elt } => {
                IrType::Struct(vec![self.to_ir(elt, span)?.ptr_to(), IrType::I32])
            }
            Type::Map { .. } | Type::Chan { .. } => IrType::I8.ptr_to(),
            Type::Struct(s) => {
                let mut fields = Vec::with_capacity(s.fields.len());
                for f in &s.fields {
                    let ft = self.obj_type(*f, span)?;
                    fields.push(self.to_ir(&ft, span)?);
                }
                IrType::Struct(fields)
            }
            Type::Interface { .. } => {
                IrType::Struct(vec![IrType::I8.ptr_to(), IrType::I8.ptr_to()])
            }
            Type::Func(ft) => {
                let mut params = Vec::new();
                if let Some(recv) = ft.recv {
                    let rt = self.obj_type(recv, span)?;
                    params.push(self.to_ir(&rt, span)?);
                }
                for p in &ft.params {
                    let pt = self.obj_type(*p, span)?;
                    params.push(self.to_ir(&pt, span)?);
                }
                let ret = self.results_ir(&ft.results, span)?;
                IrType::Func {
                    params,
                    ret: Box::new(ret),
                }
                .ptr_to()
            }
            Type::Bad { msg } => {
                return Err(EmitError::internal(span, format!("bad type: {}", msg)))
            }
        })
    }

    fn results_ir(&mut self, results: &[ObjId], span: &Span) -> EmitResult<IrType> {
        match results.len() {
            0 => Ok(IrType::Void),
            1 => {
                let rt = self.obj_type(results[0], span)?;
                self.to_ir(&rt, span)
            }
            _ => {
                let mut tys = Vec::with_capacity(results.len());
                for r in results {
                    let rt = self.obj_type(*r, span)?;
                    tys.push(self.to_ir(&rt, span)?);
                }
                Ok(IrType::Struct(tys))
            }
        }
    }

    fn struct_field(&self, t: &Type, index: usize, span: &Span) -> EmitResult<(ObjId, Type)> {
        match self.prog.table.underlying(t) {
            Type::Struct(s) => {
                let f = *s.fields.get(index).ok_or_else(|| {
                    EmitError::internal(span, "field index out of range")
                })?;
                Ok((f, self.obj_type(f, span)?))
            }
            _ => Err(EmitError::internal(span, "field access on non-struct")),
        }
    }

    // ----- declarations -----

    fn method_symbol(&self, ft: &FuncType, name: &str) -> String {
        let recv_name = ft
            .recv
            .and_then(|r| self.prog.objects.get(r).typ.clone())
            .map(|t| {
                let t = match t {
                    Type::Pointer { base } => *base,
                    other => other,
                };
                match t {
                    Type::Named(nid) => self
                        .prog
                        .objects
                        .get(self.prog.table.get(nid).obj)
                        .name
                        .clone(),
                    other => format!("{}", other.pretty(&self.prog.objects, &self.prog.table)),
                }
            })
            .unwrap_or_else(|| "_".to_string());
        format!("{}.{}", recv_name, name)
    }

    fn declare_functions(&mut self) -> EmitResult<()> {
        for file in &self.prog.files {
            for decl in &file.decls {
                match decl {
                    Decl::Func(fd) => {
                        let Some(obj) = self.prog.defs.get(&fd.name.id).copied() else {
                            continue;
                        };
                        let Some(Type::Func(ft)) = self.prog.objects.get(obj).typ.clone() else {
                            return Err(EmitError::internal(
                                &fd.span,
                                "function without signature",
                            ));
                        };
                        let name = if fd.recv.is_some() {
                            self.method_symbol(&ft, &fd.name.name)
                        } else {
                            fd.name.name.clone()
                        };
                        let mut params = Vec::new();
                        if let Some(recv) = ft.recv {
                            let rt = self.obj_type(recv, &fd.span)?;
                            params.push(self.to_ir(&rt, &fd.span)?);
                        }
                        for p in &ft.params {
                            let pt = self.obj_type(*p, &fd.span)?;
                            params.push(self.to_ir(&pt, &fd.span)?);
                        }
                        let ret = self.results_ir(&ft.results, &fd.span)?;
                        let fid = if fd.body.is_some() {
                            self.module.add_function(name, params, ret)
                        } else {
                            self.module.declare_external(name, params, ret)
                        };
                        self.func_ids.insert(obj, fid);
                    }
                    Decl::Gen(gen) => {
                        if gen.keyword != DeclKeyword::Var {
                            continue;
                        }
                        for spec in &gen.specs {
                            let Spec::Value(vs) = spec else { continue };
                            for name in &vs.names {
                                if name.is_blank() {
                                    continue;
                                }
                                let Some(obj) = self.prog.defs.get(&name.id).copied() else {
                                    continue;
                                };
                                let t = self.obj_type(obj, &name.span)?;
                                let ir = self.to_ir(&t, &name.span)?;
                                let gid = self.module.add_global(name.name.clone(), ir);
                                self.global_ids.insert(obj, gid);
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    // ----- function bodies -----

    fn emit_bodies(&mut self) -> EmitResult<()> {
        for file in &self.prog.files {
            for decl in &file.decls {
                let Decl::Func(fd) = decl else { continue };
                let Some(body) = &fd.body else { continue };
                let Some(obj) = self.prog.defs.get(&fd.name.id).copied() else {
                    continue;
                };
                let fid = self.func_ids[&obj];
                let Some(Type::Func(ft)) = self.prog.objects.get(obj).typ.clone() else {
                    continue;
                };
                self.emit_function_body(fid, &ft, body, &fd.span)?;
            }
        }
        Ok(())
    }

    fn emit_function_body(
        &mut self,
        fid: FuncId,
        ft: &FuncType,
        body: &Block,
        span: &Span,
    ) -> EmitResult<()> {
        self.cur_func = fid;
        let entry = self.module.function_mut(fid).add_block("entry");
        self.cur_block = Some(entry);
        let results = ft
            .results
            .iter()
            .map(|r| self.obj_type(*r, span))
            .collect::<EmitResult<Vec<_>>>()?;
        self.fn_stack.push(FnCtx { results });

        let out = self.scoped(|e| {
            let mut index = 0usize;
            if let Some(recv) = ft.recv {
                e.bind_param(recv, index, span)?;
                index += 1;
            }
            for p in &ft.params {
                e.bind_param(*p, index, span)?;
                index += 1;
            }
            e.lower_stmts(&body.stmts)
        });
        self.fn_stack.pop();
        out?;

        if let Some(block) = self.cur_block {
            if !self.block_terminated(block) {
                self.terminate(Terminator::Ret(None));
            }
        }
        self.cur_block = None;
        Ok(())
    }

    /// Spill a parameter into stack storage so it is addressable.
    fn bind_param(&mut self, obj: ObjId, index: usize, span: &Span) -> EmitResult<()> {
        let name = self.prog.objects.get(obj).name.clone();
        if name.is_empty() || name == "_" {
            return Ok(());
        }
        let t = self.obj_type(obj, span)?;
        let ir = self.to_ir(&t, span)?;
        let param = self.module.function(self.cur_func).param(index);
        let slot = self.emit(Inst::Alloca { ty: ir, name })?;
        self.emit(Inst::Store {
            value: param,
            ptr: slot,
        })?;
        self.bind(obj, Slot { ptr: slot, ty: t });
        Ok(())
    }

    /// Package-level variable initializers run in a synthesized init
    /// function, in declaration order.
    fn emit_package_init(&mut self) -> EmitResult<()> {
        let mut work: Vec<(GlobalId, Expr, Type, Span)> = Vec::new();
        for file in &self.prog.files {
            for decl in &file.decls {
                let Decl::Gen(gen) = decl else { continue };
                if gen.keyword != DeclKeyword::Var {
                    continue;
                }
                for spec in &gen.specs {
                    let Spec::Value(vs) = spec else { continue };
                    if vs.values.is_empty() {
                        continue;
                    }
                    if vs.values.len() != vs.names.len() {
                        return Err(EmitError::unsupported(
                            &vs.span,
                            "multi-value package variable initializer",
                        ));
                    }
                    for (name, value) in vs.names.iter().zip(&vs.values) {
                        if name.is_blank() {
                            continue;
                        }
                        let Some(obj) = self.prog.defs.get(&name.id).copied() else {
                            continue;
                        };
                        let Some(&gid) = self.global_ids.get(&obj) else {
                            continue;
                        };
                        let t = self.obj_type(obj, &name.span)?;
                        work.push((gid, value.clone(), t, name.span.clone()));
                    }
                }
            }
        }
        if work.is_empty() {
            return Ok(());
        }

        let fid = self.module.add_function("init", Vec::new(), IrType::Void);
        self.cur_func = fid;
        let entry = self.module.function_mut(fid).add_block("entry");
        self.cur_block = Some(entry);
        self.fn_stack.push(FnCtx { results: Vec::new() });
        let out = self.scoped(|e| {
            for (gid, value, t, span) in &work {
                let ir = e.to_ir(t, span)?;
                let addr = e.emit(Inst::GlobalAddr {
                    global: *gid,
                    ty: ir.ptr_to(),
                })?;
                let v = e.lower_expr(value)?;
                let v = e.convert(v, t, span)?;
                e.emit(Inst::Store {
                    value: v.value,
                    ptr: addr,
                })?;
            }
            Ok(())
        });
        self.fn_stack.pop();
        out?;
        self.terminate(Terminator::Ret(None));
        self.cur_block = None;
        Ok(())
    }

    // ----- value abstraction -----

    /// Coerce `v` to semantic type `to`, inserting representation casts
    /// where the IR layouts differ. Identity conversions are free.
    fn convert(&mut self, v: TypedValue, to: &Type, span: &Span) -> EmitResult<TypedValue> {
        if to.is_bad() {
            return Err(EmitError::internal(span, "conversion to bad type"));
        }
        let from_ir = self.to_ir(&v.ty, span)?;
        let to_ir = self.to_ir(to, span)?;
        if from_ir == to_ir {
            return Ok(TypedValue {
                value: v.value,
                ty: to.clone(),
                addr: v.addr,
            });
        }
        let value = match (&from_ir, &to_ir) {
            (IrType::Ptr(_), IrType::Ptr(_)) => self.emit(Inst::Cast {
                op: CastOp::Bitcast,
                value: v.value,
                ty: to_ir,
            })?,
            (f, t) if f.int_bits().is_some() && t.int_bits().is_some() => {
                let fb = f.int_bits().unwrap();
                let tb = t.int_bits().unwrap();
                let op = if tb < fb {
                    CastOp::Trunc
                } else if matches!(
                    v.ty,
                    Type::Basic(
                        BasicKind::Uint
                            | BasicKind::Uint8
                            | BasicKind::Uint16
                            | BasicKind::Uint32
                            | BasicKind::Uint64
                            | BasicKind::Uintptr
                    )
                ) {
                    CastOp::Zext
                } else {
                    CastOp::Sext
                };
                self.emit(Inst::Cast {
                    op,
                    value: v.value,
                    ty: to_ir,
                })?
            }
            (f, t) if f.int_bits().is_some() && t.is_float() => self.emit(Inst::Cast {
                op: CastOp::Sitofp,
                value: v.value,
                ty: to_ir,
            })?,
            (f, t) if f.is_float() && t.int_bits().is_some() => self.emit(Inst::Cast {
                op: CastOp::Fptosi,
                value: v.value,
                ty: to_ir,
            })?,
            (IrType::F32, IrType::F64) => self.emit(Inst::Cast {
                op: CastOp::Fpext,
                value: v.value,
                ty: to_ir,
            })?,
            (IrType::F64, IrType::F32) => self.emit(Inst::Cast {
                op: CastOp::Fptrunc,
                value: v.value,
                ty: to_ir,
            })?,
            _ => {
                return Err(EmitError::unsupported(
                    span,
                    format!(
                        "conversion from {} to {}",
                        v.ty.pretty(&self.prog.objects, &self.prog.table),
                        to.pretty(&self.prog.objects, &self.prog.table)
                    ),
                ))
            }
        };
        Ok(TypedValue::rvalue(value, to.clone()))
    }

    /// Apply a binary operator. Comparisons yield bool; arithmetic keeps
    /// the typed operand's semantic type.
    fn binary_op(
        &mut self,
        op: BinaryOp,
        lhs: TypedValue,
        rhs: TypedValue,
        span: &Span,
    ) -> EmitResult<TypedValue> {
        let (lhs, rhs, ty) = if lhs.ty.is_untyped() && !rhs.ty.is_untyped() {
            let ty = rhs.ty.clone();
            (self.convert(lhs, &ty, span)?, rhs, ty)
        } else if rhs.ty.is_untyped() && !lhs.ty.is_untyped() {
            let ty = lhs.ty.clone();
            let rhs = self.convert(rhs, &ty, span)?;
            (lhs, rhs, ty)
        } else {
            let ty = lhs.ty.clone();
            (lhs, rhs, ty)
        };
        let ir = self.to_ir(&ty, span)?;
        let is_float = ir.is_float();

        if op.is_comparison() {
            let value = if is_float {
                let pred = match op {
                    BinaryOp::Eql => FcmpPred::Oeq,
                    BinaryOp::Neq => FcmpPred::One,
                    BinaryOp::Lss => FcmpPred::Olt,
                    BinaryOp::Leq => FcmpPred::Ole,
                    BinaryOp::Gtr => FcmpPred::Ogt,
                    _ => FcmpPred::Oge,
                };
                self.emit(Inst::Fcmp {
                    pred,
                    lhs: lhs.value,
                    rhs: rhs.value,
                })?
            } else {
                let pred = match op {
                    BinaryOp::Eql => IcmpPred::Eq,
                    BinaryOp::Neq => IcmpPred::Ne,
                    BinaryOp::Lss => IcmpPred::Slt,
                    BinaryOp::Leq => IcmpPred::Sle,
                    BinaryOp::Gtr => IcmpPred::Sgt,
                    _ => IcmpPred::Sge,
                };
                self.emit(Inst::Icmp {
                    pred,
                    lhs: lhs.value,
                    rhs: rhs.value,
                })?
            };
            return Ok(TypedValue::rvalue(value, Type::Basic(BasicKind::Bool)));
        }

        let bin = match (op, is_float) {
            (BinaryOp::Add, false) => BinOp::Add,
            (BinaryOp::Add, true) => BinOp::FAdd,
            (BinaryOp::Sub, false) => BinOp::Sub,
            (BinaryOp::Sub, true) => BinOp::FSub,
            (BinaryOp::Mul, false) => BinOp::Mul,
            (BinaryOp::Mul, true) => BinOp::FMul,
            (BinaryOp::Div, false) => BinOp::SDiv,
            (BinaryOp::Div, true) => BinOp::FDiv,
            (BinaryOp::Rem, false) => BinOp::SRem,
            (BinaryOp::And, false) => BinOp::And,
            (BinaryOp::Or, false) => BinOp::Or,
            (BinaryOp::Xor, false) => BinOp::Xor,
            (BinaryOp::Shl, false) => BinOp::Shl,
            (BinaryOp::Shr, false) => BinOp::AShr,
            _ => {
                return Err(EmitError::unsupported(
                    span,
                    format!("binary operator {:?}", op),
                ))
            }
        };
        let value = self.emit(Inst::Binary {
            op: bin,
            lhs: lhs.value,
            rhs: rhs.value,
            ty: ir,
        })?;
        Ok(TypedValue::rvalue(value, ty))
    }

    // ----- expressions -----

    fn lower_obj_value(&mut self, obj: ObjId, span: &Span) -> EmitResult<TypedValue> {
        if let Some(slot) = self.lookup_slot(obj) {
            let ir = self.to_ir(&slot.ty, span)?;
            let value = self.emit(Inst::Load {
                ptr: slot.ptr,
                ty: ir,
            })?;
            return Ok(TypedValue::addressable(value, slot.ty, slot.ptr));
        }
        if let Some(&gid) = self.global_ids.get(&obj) {
            let t = self.obj_type(obj, span)?;
            let ir = self.to_ir(&t, span)?;
            let addr = self.emit(Inst::GlobalAddr {
                global: gid,
                ty: ir.clone().ptr_to(),
            })?;
            let value = self.emit(Inst::Load { ptr: addr, ty: ir })?;
            return Ok(TypedValue::addressable(value, t, addr));
        }
        if let Some(&fid) = self.func_ids.get(&obj) {
            let t = self.obj_type(obj, span)?;
            let ir = self.to_ir(&t, span)?;
            let value = self.emit(Inst::FuncAddr { func: fid, ty: ir })?;
            return Ok(TypedValue::rvalue(value, t));
        }

        let o = self.prog.objects.get(obj);
        if o.kind == ObjKind::Con {
            match o.name.as_str() {
                "true" | "false" if o.decl.is_none() => {
                    let value = self.emit(Inst::ConstInt {
                        ty: IrType::I1,
                        value: (o.name == "true") as i64,
                    })?;
                    return Ok(TypedValue::rvalue(value, Type::Basic(BasicKind::Bool)));
                }
                "nil" if o.decl.is_none() => {
                    return Err(EmitError::unsupported(span, "untyped nil"));
                }
                _ => {}
            }
            // User constant: lower its initializer and coerce to the
            // declared type.
            if let Some(ObjDecl::Value(spec)) = o.decl.clone() {
                let name = o.name.clone();
                let t = self.obj_type(obj, span)?;
                if let Some(i) = spec.names.iter().position(|n| n.name == name) {
                    if let Some(value) = spec.values.get(i) {
                        let v = self.lower_expr(value)?;
                        return self.convert(v, &t, span);
                    }
                }
            }
            return Err(EmitError::internal(span, "constant without value"));
        }
        Err(EmitError::internal(
            span,
            format!("no storage for {}", o.name),
        ))
    }

    fn lower_expr(&mut self, e: &Expr) -> EmitResult<TypedValue> {
        match &e.kind {
            ExprKind::Ident(name) => {
                let obj = self.prog.obj_of(e.id).ok_or_else(|| {
                    EmitError::internal(&e.span, format!("unresolved identifier {}", name))
                })?;
                self.lower_obj_value(obj, &e.span)
            }

            ExprKind::BasicLit { kind, value } => {
                let t = self.sem_type(e)?;
                let ir = self.to_ir(&t, &e.span)?;
                match kind {
                    LitKind::Int => {
                        let n = parse_int(value).ok_or_else(|| {
                            EmitError::internal(&e.span, "invalid integer literal")
                        })?;
                        let v = self.emit(Inst::ConstInt { ty: ir, value: n })?;
                        Ok(TypedValue::rvalue(v, t))
                    }
                    LitKind::Float => {
                        let n: f64 = value.parse().map_err(|_| {
                            EmitError::internal(&e.span, "invalid float literal")
                        })?;
                        let v = self.emit(Inst::ConstFloat { ty: ir, value: n })?;
                        Ok(TypedValue::rvalue(v, t))
                    }
                    LitKind::Char => {
                        let c = value.chars().next().ok_or_else(|| {
                            EmitError::internal(&e.span, "empty rune literal")
                        })?;
                        let v = self.emit(Inst::ConstInt {
                            ty: ir,
                            value: c as i64,
                        })?;
                        Ok(TypedValue::rvalue(v, t))
                    }
                    LitKind::Str => {
                        let v = self.emit(Inst::ConstStr {
                            value: value.clone(),
                        })?;
                        Ok(TypedValue::rvalue(v, t))
                    }
                    LitKind::Imag => {
                        Err(EmitError::unsupported(&e.span, "imaginary literal"))
                    }
                }
            }

            ExprKind::Paren(inner) => self.lower_expr(inner),

            ExprKind::Binary { op, x, y } => match op {
                BinaryOp::LAnd | BinaryOp::LOr => self.lower_short_circuit(*op, x, y),
                _ => {
                    let lhs = self.lower_expr(x)?;
                    let rhs = self.lower_expr(y)?;
                    self.binary_op(*op, lhs, rhs, &e.span)
                }
            },

            ExprKind::Unary { op, x } => match op {
                UnaryOp::Pos => self.lower_expr(x),
                UnaryOp::Neg => {
                    let v = self.lower_expr(x)?;
                    let ir = self.to_ir(&v.ty, &e.span)?;
                    let zero = if ir.is_float() {
                        self.emit(Inst::ConstFloat {
                            ty: ir.clone(),
                            value: 0.0,
                        })?
                    } else {
                        self.emit(Inst::ConstInt {
                            ty: ir.clone(),
                            value: 0,
                        })?
                    };
                    let op = if ir.is_float() { BinOp::FSub } else { BinOp::Sub };
                    let value = self.emit(Inst::Binary {
                        op,
                        lhs: zero,
                        rhs: v.value,
                        ty: ir,
                    })?;
                    Ok(TypedValue::rvalue(value, v.ty))
                }
                UnaryOp::Not => {
                    let v = self.lower_expr(x)?;
                    let one = self.emit(Inst::ConstInt {
                        ty: IrType::I1,
                        value: 1,
                    })?;
                    let value = self.emit(Inst::Binary {
                        op: BinOp::Xor,
                        lhs: v.value,
                        rhs: one,
                        ty: IrType::I1,
                    })?;
                    Ok(TypedValue::rvalue(value, v.ty))
                }
                UnaryOp::Complement => {
                    let v = self.lower_expr(x)?;
                    let ir = self.to_ir(&v.ty, &e.span)?;
                    let ones = self.emit(Inst::ConstInt {
                        ty: ir.clone(),
                        value: -1,
                    })?;
                    let value = self.emit(Inst::Binary {
                        op: BinOp::Xor,
                        lhs: v.value,
                        rhs: ones,
                        ty: ir,
                    })?;
                    Ok(TypedValue::rvalue(value, v.ty))
                }
                UnaryOp::Addr => {
                    let (ptr, ty) = self.lower_addr(x)?;
                    Ok(TypedValue::rvalue(
                        ptr,
                        Type::Pointer { base: Box::new(ty) },
                    ))
                }
                UnaryOp::Recv => Err(EmitError::unsupported(&e.span, "channel receive")),
            },

            ExprKind::Star(_) | ExprKind::Selector { .. } | ExprKind::Index { .. } => {
                let (ptr, ty) = self.lower_addr(e)?;
                let ir = self.to_ir(&ty, &e.span)?;
                let value = self.emit(Inst::Load { ptr, ty: ir })?;
                Ok(TypedValue::addressable(value, ty, ptr))
            }

            ExprKind::Call { fun, args } => match self.lower_call(e, fun, args)? {
                CallValue::One(v) => Ok(v),
                CallValue::Void => Err(EmitError::internal(
                    &e.span,
                    "void call used as value",
                )),
                CallValue::Tuple(..) => Err(EmitError::unsupported(
                    &e.span,
                    "multi-value call in single-value context",
                )),
            },

            ExprKind::CompositeLit { .. } => {
                Err(EmitError::unsupported(&e.span, "composite literal"))
            }
            ExprKind::FuncLit { .. } => {
                Err(EmitError::unsupported(&e.span, "function literal"))
            }
            ExprKind::Slice { .. } => Err(EmitError::unsupported(&e.span, "slice expression")),
            ExprKind::TypeAssert { .. } => {
                Err(EmitError::unsupported(&e.span, "type assertion"))
            }
            _ => Err(EmitError::internal(&e.span, "expected value expression")),
        }
    }

    fn lower_short_circuit(
        &mut self,
        op: BinaryOp,
        x: &Expr,
        y: &Expr,
    ) -> EmitResult<TypedValue> {
        let lhs = self.lower_expr(x)?;
        let slot = self.emit(Inst::Alloca {
            ty: IrType::I1,
            name: "logtmp".to_string(),
        })?;
        self.emit(Inst::Store {
            value: lhs.value,
            ptr: slot,
        })?;
        let func = self.module.function_mut(self.cur_func);
        let rhs_block = func.add_block("rhs");
        let done_block = func.add_block("done");
        match op {
            // a || b: a true short-circuits; a && b: a false does.
            BinaryOp::LOr => self.terminate(Terminator::CondBr {
                cond: lhs.value,
                then_bb: done_block,
                else_bb: rhs_block,
            }),
            _ => self.terminate(Terminator::CondBr {
                cond: lhs.value,
                then_bb: rhs_block,
                else_bb: done_block,
            }),
        }
        self.cur_block = Some(rhs_block);
        let rhs = self.lower_expr(y)?;
        self.emit(Inst::Store {
            value: rhs.value,
            ptr: slot,
        })?;
        self.terminate(Terminator::Br(done_block));
        self.cur_block = Some(done_block);
        let value = self.emit(Inst::Load {
            ptr: slot,
            ty: IrType::I1,
        })?;
        Ok(TypedValue::rvalue(value, Type::Basic(BasicKind::Bool)))
    }

    /// Compute the address of an lvalue; returns the pointer and the
    /// semantic type of the storage it locates.
    fn lower_addr(&mut self, e: &Expr) -> EmitResult<(ValueId, Type)> {
        match &e.kind {
            ExprKind::Paren(inner) => self.lower_addr(inner),

            ExprKind::Ident(name) => {
                let obj = self.prog.obj_of(e.id).ok_or_else(|| {
                    EmitError::internal(&e.span, format!("unresolved identifier {}", name))
                })?;
                if let Some(slot) = self.lookup_slot(obj) {
                    return Ok((slot.ptr, slot.ty));
                }
                if let Some(&gid) = self.global_ids.get(&obj) {
                    let t = self.obj_type(obj, &e.span)?;
                    let ir = self.to_ir(&t, &e.span)?;
                    let addr = self.emit(Inst::GlobalAddr {
                        global: gid,
                        ty: ir.ptr_to(),
                    })?;
                    return Ok((addr, t));
                }
                Err(EmitError::unsupported(
                    &e.span,
                    format!("{} is not addressable", name),
                ))
            }

            ExprKind::Star(inner) => {
                let v = self.lower_expr(inner)?;
                let elem = self.prog.table.deref(&v.ty).ok_or_else(|| {
                    EmitError::internal(&e.span, "dereference of non-pointer")
                })?;
                Ok((v.value, elem))
            }

            ExprKind::Selector { x, .. } => {
                let path = self.prog.selections.get(&e.id).cloned().ok_or_else(|| {
                    EmitError::unsupported(&e.span, "selector is not a field access")
                })?;
                let (mut ptr, mut ty) = self.lower_addr(x)?;
                for step in path {
                    match step {
                        SelStep::Deref => {
                            let ir = self.to_ir(&ty, &e.span)?;
                            let loaded = self.emit(Inst::Load { ptr, ty: ir })?;
                            ty = self.prog.table.deref(&ty).ok_or_else(|| {
                                EmitError::internal(&e.span, "selector deref of non-pointer")
                            })?;
                            ptr = loaded;
                        }
                        SelStep::Field(i) => {
                            let (_, field_ty) = self.struct_field(&ty, i, &e.span)?;
                            let field_ir = self.to_ir(&field_ty, &e.span)?;
                            ptr = self.emit(Inst::Gep {
                                ptr,
                                indices: vec![GepIndex::Const(0), GepIndex::Const(i as u64)],
                                ty: field_ir.ptr_to(),
                            })?;
                            ty = field_ty;
                        }
                    }
                }
                Ok((ptr, ty))
            }

            ExprKind::Index { x, index } => {
                let idx = self.lower_expr(index)?;
                let idx = self.convert(idx, &Type::Basic(BasicKind::Int), &e.span)?;
                let container_ty = match self.prog.type_of(x.id) {
                    Some(t) => t.clone(),
                    None => self.sem_type(x)?,
                };
                match self.prog.table.underlying(&container_ty) {
                    Type::Array { elt, .. } => {
                        let (ptr, _) = self.lower_addr(x)?;
                        let elt_ir = self.to_ir(&elt, &e.span)?;
                        let gep = self.emit(Inst::Gep {
                            ptr,
                            indices: vec![GepIndex::Const(0), GepIndex::Value(idx.value)],
                            ty: elt_ir.ptr_to(),
                        })?;
                        Ok((gep, *elt))
                    }
                    Type::Pointer { base } => match self.prog.table.underlying(&base) {
                        Type::Array { elt, .. } => {
                            let v = self.lower_expr(x)?;
                            let elt_ir = self.to_ir(&elt, &e.span)?;
                            let gep = self.emit(Inst::Gep {
                                ptr: v.value,
                                indices: vec![GepIndex::Const(0), GepIndex::Value(idx.value)],
                                ty: elt_ir.ptr_to(),
                            })?;
                            Ok((gep, *elt))
                        }
                        _ => Err(EmitError::internal(&e.span, "index of pointer to non-array")),
                    },
                    Type::Slice { elt } => {
                        let (slice_ptr, _) = self.lower_addr(x)?;
                        let elt_ir = self.to_ir(&elt, &e.span)?;
                        let data_ptr_ptr = self.emit(Inst::Gep {
                            ptr: slice_ptr,
                            indices: vec![GepIndex::Const(0), GepIndex::Const(0)],
                            ty: elt_ir.clone().ptr_to().ptr_to(),
                        })?;
                        let data = self.emit(Inst::Load {
                            ptr: data_ptr_ptr,
                            ty: elt_ir.clone().ptr_to(),
                        })?;
                        let gep = self.emit(Inst::Gep {
                            ptr: data,
                            indices: vec![GepIndex::Value(idx.value)],
                            ty: elt_ir.ptr_to(),
                        })?;
                        Ok((gep, *elt))
                    }
                    _ => Err(EmitError::unsupported(
                        &e.span,
                        "index expression is not addressable",
                    )),
                }
            }

            _ => Err(EmitError::unsupported(
                &e.span,
                "expression is not addressable",
            )),
        }
    }

    // ----- calls -----

    fn is_type_expr(&self, e: &Expr) -> bool {
        match &e.kind {
            ExprKind::Ident(_) | ExprKind::Selector { .. } => self
                .prog
                .obj_of(e.id)
                .map(|o| self.prog.objects.get(o).kind == ObjKind::Typ)
                .unwrap_or(false),
            ExprKind::Paren(inner) | ExprKind::Star(inner) => self.is_type_expr(inner),
            ExprKind::ArrayType { .. }
            | ExprKind::StructType { .. }
            | ExprKind::FuncType { .. }
            | ExprKind::InterfaceType { .. }
            | ExprKind::MapType { .. }
            | ExprKind::ChanType { .. } => true,
            _ => false,
        }
    }

    fn lower_call(&mut self, e: &Expr, fun: &Expr, args: &[Expr]) -> EmitResult<CallValue> {
        // Conversion: the call expression's checked type is the target.
        if args.len() == 1 && self.is_type_expr(fun) {
            let target = self.sem_type(e)?;
            let v = self.lower_expr(&args[0])?;
            return Ok(CallValue::One(self.convert(v, &target, &e.span)?));
        }

        // Builtins.
        if let ExprKind::Ident(name) = &fun.unparen().kind {
            if let Some(obj) = self.prog.obj_of(fun.unparen().id) {
                if self.prog.objects.get(obj).is_builtin() {
                    let name = name.clone();
                    return self.lower_builtin(e, &name, args);
                }
            }
        }

        // Resolve a direct target when the callee names a function or
        // method; otherwise call through a function value.
        let mut call_args: Vec<TypedValue> = Vec::new();
        let (callee, ft) = match &fun.unparen().kind {
            ExprKind::Selector { x: recv_expr, .. } => {
                let obj = self.prog.obj_of(fun.unparen().id);
                match obj.and_then(|o| self.func_ids.get(&o).map(|f| (o, *f))) {
                    Some((obj, fid)) => {
                        let Some(Type::Func(ft)) = self.prog.objects.get(obj).typ.clone() else {
                            return Err(EmitError::internal(&fun.span, "method without type"));
                        };
                        if let Some(recv) = ft.recv {
                            let want = self.obj_type(recv, &fun.span)?;
                            let recv_val = self.lower_receiver(recv_expr, &want)?;
                            call_args.push(recv_val);
                        }
                        (Callee::Direct(fid), ft)
                    }
                    None => {
                        let v = self.lower_expr(fun)?;
                        let Type::Func(ft) = self.prog.table.underlying(&v.ty) else {
                            return Err(EmitError::internal(&fun.span, "call of non-function"));
                        };
                        (Callee::Indirect(v.value), ft)
                    }
                }
            }
            ExprKind::Ident(_) => {
                let obj = self.prog.obj_of(fun.unparen().id).ok_or_else(|| {
                    EmitError::internal(&fun.span, "unresolved callee")
                })?;
                let Some(Type::Func(ft)) = self.prog.objects.get(obj).typ.clone() else {
                    return Err(EmitError::internal(&fun.span, "call of non-function"));
                };
                match self.func_ids.get(&obj) {
                    Some(&fid) => (Callee::Direct(fid), ft),
                    None => {
                        let v = self.lower_obj_value(obj, &fun.span)?;
                        (Callee::Indirect(v.value), ft)
                    }
                }
            }
            _ => {
                let v = self.lower_expr(fun)?;
                let Type::Func(ft) = self.prog.table.underlying(&v.ty) else {
                    return Err(EmitError::internal(&fun.span, "call of non-function"));
                };
                (Callee::Indirect(v.value), ft)
            }
        };

        for (i, arg) in args.iter().enumerate() {
            let v = self.lower_expr(arg)?;
            let v = match ft.params.get(i) {
                Some(p) => {
                    let want = self.obj_type(*p, &arg.span)?;
                    let want = match (&want, ft.is_variadic && i + 1 == ft.params.len()) {
                        (Type::Slice { elt }, true) => (**elt).clone(),
                        _ => want,
                    };
                    self.convert(v, &want, &arg.span)?
                }
                None => v,
            };
            call_args.push(v);
        }

        let ret_ir = self.results_ir(&ft.results, &e.span)?;
        let value = self.emit(Inst::Call {
            callee,
            args: call_args.iter().map(|v| v.value).collect(),
            ty: ret_ir,
        })?;
        match ft.results.len() {
            0 => Ok(CallValue::Void),
            1 => {
                let rt = self.obj_type(ft.results[0], &e.span)?;
                Ok(CallValue::One(TypedValue::rvalue(value, rt)))
            }
            _ => {
                let tys = ft
                    .results
                    .iter()
                    .map(|r| self.obj_type(*r, &e.span))
                    .collect::<EmitResult<Vec<_>>>()?;
                Ok(CallValue::Tuple(value, tys))
            }
        }
    }

    /// Produce the receiver argument, auto-referencing an addressable
    /// value for pointer receivers.
    fn lower_receiver(&mut self, recv_expr: &Expr, want: &Type) -> EmitResult<TypedValue> {
        let v = self.lower_expr(recv_expr)?;
        if let Type::Pointer { .. } = want {
            if !matches!(self.prog.table.underlying(&v.ty), Type::Pointer { .. }) {
                let addr = v.addr.ok_or_else(|| {
                    EmitError::unsupported(&recv_expr.span, "receiver is not addressable")
                })?;
                return Ok(TypedValue::rvalue(addr, want.clone()));
            }
        }
        self.convert(v, want, &recv_expr.span)
    }

    fn lower_builtin(&mut self, e: &Expr, name: &str, args: &[Expr]) -> EmitResult<CallValue> {
        match name {
            "len" => {
                let arg = &args[0];
                let t = self.sem_type(arg)?;
                match self.prog.table.underlying(&t) {
                    Type::Array { len, .. } => {
                        let v = self.const_i32(len as i64)?;
                        Ok(CallValue::One(TypedValue::rvalue(
                            v,
                            Type::Basic(BasicKind::Int),
                        )))
                    }
                    Type::Slice { .. } | Type::Basic(BasicKind::String) => {
                        let v = self.lower_expr(arg)?;
                        let value = self.emit(Inst::ExtractValue {
                            agg: v.value,
                            index: 1,
                            ty: IrType::I32,
                        })?;
                        Ok(CallValue::One(TypedValue::rvalue(
                            value,
                            Type::Basic(BasicKind::Int),
                        )))
                    }
                    _ => Err(EmitError::unsupported(&e.span, "len of this type")),
                }
            }
            "new" => {
                let t = self.sem_type(e)?;
                let base = self.prog.table.deref(&t).ok_or_else(|| {
                    EmitError::internal(&e.span, "new without pointer result")
                })?;
                let base_ir = self.to_ir(&base, &e.span)?;
                let size = self.emit(Inst::SizeOf { ty: base_ir.clone() })?;
                let raw = self.emit(Inst::Call {
                    callee: Callee::Direct(self.runtime.goalloc),
                    args: vec![size],
                    ty: IrType::I8.ptr_to(),
                })?;
                let typed = self.emit(Inst::Cast {
                    op: CastOp::Bitcast,
                    value: raw,
                    ty: base_ir.ptr_to(),
                })?;
                Ok(CallValue::One(TypedValue::rvalue(typed, t)))
            }
            "make" => {
                let t = self.sem_type(e)?;
                match self.prog.table.underlying(&t) {
                    Type::Chan { elt, .. } => {
                        let elt_ir = self.to_ir(&elt, &e.span)?;
                        let size = self.emit(Inst::SizeOf { ty: elt_ir })?;
                        let v = self.emit(Inst::Call {
                            callee: Callee::Direct(self.runtime.makechan),
                            args: vec![size],
                            ty: IrType::I8.ptr_to(),
                        })?;
                        Ok(CallValue::One(TypedValue::rvalue(v, t)))
                    }
                    Type::Map { elt, .. } => {
                        let elt_ir = self.to_ir(&elt, &e.span)?;
                        let size = self.emit(Inst::SizeOf { ty: elt_ir })?;
                        let v = self.emit(Inst::Call {
                            callee: Callee::Direct(self.runtime.makemap),
                            args: vec![size],
                            ty: IrType::I8.ptr_to(),
                        })?;
                        Ok(CallValue::One(TypedValue::rvalue(v, t)))
                    }
                    Type::Slice { elt } => {
                        let n = match args.get(1) {
                            Some(arg) => {
                                let v = self.lower_expr(arg)?;
                                self.convert(v, &Type::Basic(BasicKind::Int), &arg.span)?
                                    .value
                            }
                            None => self.const_i32(0)?,
                        };
                        let elt_ir = self.to_ir(&elt, &e.span)?;
                        let elt_size = self.emit(Inst::SizeOf {
                            ty: elt_ir.clone(),
                        })?;
                        let bytes = self.emit(Inst::Binary {
                            op: BinOp::Mul,
                            lhs: n,
                            rhs: elt_size,
                            ty: IrType::I32,
                        })?;
                        let raw = self.emit(Inst::Call {
                            callee: Callee::Direct(self.runtime.goalloc),
                            args: vec![bytes],
                            ty: IrType::I8.ptr_to(),
                        })?;
                        let data = self.emit(Inst::Cast {
                            op: CastOp::Bitcast,
                            value: raw,
                            ty: elt_ir.clone().ptr_to(),
                        })?;
                        let slice_ir = self.to_ir(&t, &e.span)?;
                        let slot = self.emit(Inst::Alloca {
                            ty: slice_ir.clone(),
                            name: "mk".to_string(),
                        })?;
                        let data_ptr = self.emit(Inst::Gep {
                            ptr: slot,
                            indices: vec![GepIndex::Const(0), GepIndex::Const(0)],
                            ty: elt_ir.ptr_to().ptr_to(),
                        })?;
                        self.emit(Inst::Store {
                            value: data,
                            ptr: data_ptr,
                        })?;
                        let len_ptr = self.emit(Inst::Gep {
                            ptr: slot,
                            indices: vec![GepIndex::Const(0), GepIndex::Const(1)],
                            ty: IrType::I32.ptr_to(),
                        })?;
                        self.emit(Inst::Store { value: n, ptr: len_ptr })?;
                        let v = self.emit(Inst::Load {
                            ptr: slot,
                            ty: slice_ir,
                        })?;
                        Ok(CallValue::One(TypedValue::rvalue(v, t)))
                    }
                    _ => Err(EmitError::unsupported(&e.span, "make of this type")),
                }
            }
            "panic" => {
                let v = self.lower_expr(&args[0])?;
                let ir = self.to_ir(&v.ty, &e.span)?;
                let slot = self.emit(Inst::Alloca {
                    ty: ir,
                    name: "panicarg".to_string(),
                })?;
                self.emit(Inst::Store {
                    value: v.value,
                    ptr: slot,
                })?;
                let raw = self.emit(Inst::Cast {
                    op: CastOp::Bitcast,
                    value: slot,
                    ty: IrType::I8.ptr_to(),
                })?;
                self.emit(Inst::Call {
                    callee: Callee::Direct(self.runtime.gopanic),
                    args: vec![raw],
                    ty: IrType::Void,
                })?;
                Ok(CallValue::Void)
            }
            _ => Err(EmitError::unsupported(
                &e.span,
                format!("builtin {}", name),
            )),
        }
    }

    // ----- statements -----

    fn lower_stmts(&mut self, stmts: &[Stmt]) -> EmitResult<()> {
        for stmt in stmts {
            self.lower_stmt(stmt)?;
        }
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> EmitResult<()> {
        trace!(line = stmt.span.line, "lower statement");
        match &stmt.kind {
            StmtKind::Empty => Ok(()),

            StmtKind::Branch(kind) => match kind {
                BranchKind::Fallthrough => Ok(()),
                BranchKind::Break => {
                    let (_, done) = *self.loop_stack.last().ok_or_else(|| {
                        EmitError::unsupported(&stmt.span, "break outside loop")
                    })?;
                    self.terminate(Terminator::Br(done));
                    Ok(())
                }
                BranchKind::Continue => {
                    let (next, _) = *self.loop_stack.last().ok_or_else(|| {
                        EmitError::unsupported(&stmt.span, "continue outside loop")
                    })?;
                    self.terminate(Terminator::Br(next));
                    Ok(())
                }
            },

            StmtKind::Labeled { stmt, .. } => self.lower_stmt(stmt),

            StmtKind::Block(b) => self.scoped(|e| e.lower_stmts(&b.stmts)),

            StmtKind::Expr(e) => {
                match &e.unparen().kind {
                    ExprKind::Call { fun, args } => {
                        self.lower_call(e.unparen(), fun, args)?;
                    }
                    _ => {
                        self.lower_expr(e)?;
                    }
                }
                Ok(())
            }

            StmtKind::Decl(gen) => self.lower_decl_stmt(gen),

            StmtKind::Assign { lhs, tok, rhs } => self.lower_assign(lhs, *tok, rhs, &stmt.span),

            StmtKind::IncDec { x, inc } => {
                let (ptr, ty) = self.lower_addr(x)?;
                let ir = self.to_ir(&ty, &stmt.span)?;
                let value = self.emit(Inst::Load {
                    ptr,
                    ty: ir.clone(),
                })?;
                let one = self.emit(Inst::ConstInt {
                    ty: ir.clone(),
                    value: 1,
                })?;
                let op = if *inc { BinOp::Add } else { BinOp::Sub };
                let next = self.emit(Inst::Binary {
                    op,
                    lhs: value,
                    rhs: one,
                    ty: ir,
                })?;
                self.emit(Inst::Store {
                    value: next,
                    ptr,
                })?;
                Ok(())
            }

            StmtKind::Return { results } => self.lower_return(results, &stmt.span),

            StmtKind::If {
                init,
                cond,
                body,
                els,
            } => self.lower_if(init.as_deref(), cond, body, els.as_deref()),

            StmtKind::For {
                init,
                cond,
                post,
                body,
            } => self.lower_for(init.as_deref(), cond.as_ref(), post.as_deref(), body),

            StmtKind::Switch { init, tag, cases } => {
                self.lower_switch(init.as_deref(), tag.as_ref(), cases, &stmt.span)
            }

            StmtKind::Go { call } => self.lower_go(call),

            StmtKind::Range { .. } => {
                Err(EmitError::unsupported(&stmt.span, "range statement"))
            }
        }
    }

    fn lower_decl_stmt(&mut self, gen: &GenDecl) -> EmitResult<()> {
        for spec in &gen.specs {
            let Spec::Value(vs) = spec else { continue };
            if gen.keyword == DeclKeyword::Const {
                // Constants materialize at use sites.
                continue;
            }
            for (i, name) in vs.names.iter().enumerate() {
                if name.is_blank() {
                    if let Some(value) = vs.values.get(i) {
                        self.lower_expr(value)?;
                    }
                    continue;
                }
                let Some(obj) = self.prog.defs.get(&name.id).copied() else {
                    continue;
                };
                let t = self.obj_type(obj, &name.span)?;
                let ir = self.to_ir(&t, &name.span)?;
                let slot = self.emit(Inst::Alloca {
                    ty: ir,
                    name: name.name.clone(),
                })?;
                if let Some(value) = vs.values.get(i) {
                    let v = self.lower_expr(value)?;
                    let v = self.convert(v, &t, &name.span)?;
                    self.emit(Inst::Store {
                        value: v.value,
                        ptr: slot,
                    })?;
                }
                self.bind(obj, Slot { ptr: slot, ty: t });
            }
        }
        Ok(())
    }

    fn lower_assign(
        &mut self,
        lhs: &[Expr],
        tok: AssignTok,
        rhs: &[Expr],
        span: &Span,
    ) -> EmitResult<()> {
        // One multi-value producer feeding several destinations extracts
        // each tuple component; otherwise sides pair up.
        let mut values: Vec<TypedValue> = Vec::new();
        if rhs.len() == 1 && lhs.len() > 1 {
            let r = rhs[0].unparen();
            let ExprKind::Call { fun, args } = &r.kind else {
                return Err(EmitError::unsupported(
                    span,
                    "multi-value assignment source",
                ));
            };
            match self.lower_call(r, fun, args)? {
                CallValue::Tuple(agg, tys) => {
                    for (i, ty) in tys.iter().enumerate() {
                        let ir = self.to_ir(ty, span)?;
                        let v = self.emit(Inst::ExtractValue {
                            agg,
                            index: i,
                            ty: ir,
                        })?;
                        values.push(TypedValue::rvalue(v, ty.clone()));
                    }
                }
                _ => {
                    return Err(EmitError::internal(
                        span,
                        "expected multi-value call result",
                    ))
                }
            }
        } else {
            for r in rhs {
                values.push(self.lower_expr(r)?);
            }
        }

        for (i, l) in lhs.iter().enumerate() {
            let Some(value) = values.get(i).cloned() else { continue };
            let target = l.unparen();
            match &target.kind {
                ExprKind::Ident(name) if name == "_" => {}
                ExprKind::Ident(_) if tok == AssignTok::Define => {
                    let Some(obj) = self.prog.obj_of(target.id) else {
                        return Err(EmitError::internal(&target.span, "unresolved :="));
                    };
                    if self.prog.defs.contains_key(&target.id) {
                        // Fresh variable: allocate, store, bind.
                        let t = self.obj_type(obj, &target.span)?;
                        let v = self.convert(value, &t, &target.span)?;
                        let ir = self.to_ir(&t, &target.span)?;
                        let name = self.prog.objects.get(obj).name.clone();
                        let slot = self.emit(Inst::Alloca { ty: ir, name })?;
                        self.emit(Inst::Store {
                            value: v.value,
                            ptr: slot,
                        })?;
                        self.bind(obj, Slot { ptr: slot, ty: t });
                    } else {
                        // := re-assigning a variable from the same block.
                        let (ptr, ty) = self.lower_addr(target)?;
                        let v = self.convert(value, &ty, &target.span)?;
                        self.emit(Inst::Store {
                            value: v.value,
                            ptr,
                        })?;
                    }
                }
                _ => {
                    let (ptr, ty) = self.lower_addr(target)?;
                    let v = self.convert(value, &ty, &target.span)?;
                    self.emit(Inst::Store {
                        value: v.value,
                        ptr,
                    })?;
                }
            }
        }
        Ok(())
    }

    fn lower_return(&mut self, results: &[Expr], span: &Span) -> EmitResult<()> {
        let declared = self
            .fn_stack
            .last()
            .map(|c| c.results.clone())
            .unwrap_or_default();
        match results.len() {
            0 => {
                self.terminate(Terminator::Ret(None));
            }
            1 => {
                let v = self.lower_expr(&results[0])?;
                let v = match declared.first() {
                    Some(want) => self.convert(v, want, span)?,
                    None => v,
                };
                self.terminate(Terminator::Ret(Some(v.value)));
            }
            _ => {
                let mut vals = Vec::with_capacity(results.len());
                for (i, r) in results.iter().enumerate() {
                    let v = self.lower_expr(r)?;
                    let v = match declared.get(i) {
                        Some(want) => self.convert(v, want, span)?,
                        None => v,
                    };
                    vals.push(v.value);
                }
                self.terminate(Terminator::RetAggregate(vals));
            }
        }
        Ok(())
    }

    fn lower_if(
        &mut self,
        init: Option<&Stmt>,
        cond: &Expr,
        body: &Block,
        els: Option<&Stmt>,
    ) -> EmitResult<()> {
        let curr = self
            .cur_block
            .ok_or_else(|| EmitError::internal(&cond.span, "if outside block"))?;
        let func = self.module.function_mut(self.cur_func);
        let endif = func.add_block("endif");
        func.move_block_after(endif, curr);
        let (if_block, else_block) = if els.is_some() {
            let eb = func.insert_block_before(endif, "else");
            let ib = func.insert_block_before(eb, "if");
            (ib, eb)
        } else {
            (func.insert_block_before(endif, "if"), endif)
        };

        self.scoped(|e| {
            if let Some(init) = init {
                e.lower_stmt(init)?;
            }
            let cond_val = e.lower_expr(cond)?;
            e.terminate(Terminator::CondBr {
                cond: cond_val.value,
                then_bb: if_block,
                else_bb: else_block,
            });

            e.cur_block = Some(if_block);
            e.scoped(|e| e.lower_stmts(&body.stmts))?;
            if let Some(cur) = e.cur_block {
                if !e.block_terminated(cur) {
                    e.terminate(Terminator::Br(endif));
                }
            }

            if let Some(els) = els {
                e.cur_block = Some(else_block);
                e.lower_stmt(els)?;
                if let Some(cur) = e.cur_block {
                    if !e.block_terminated(cur) {
                        e.terminate(Terminator::Br(endif));
                    }
                }
            }
            Ok(())
        })?;

        // Arms that ended in a nested join block were patched above, so
        // endif is the single continuation point; later statements emit
        // here.
        self.cur_block = Some(endif);
        Ok(())
    }

    fn lower_for(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        post: Option<&Stmt>,
        body: &Block,
    ) -> EmitResult<()> {
        let func = self.module.function_mut(self.cur_func);
        let cond_block = cond.map(|_| func.add_block("cond"));
        let loop_block = func.add_block("loop");
        let post_block = post.map(|_| func.add_block("post"));
        let done_block = func.add_block("done");

        // Where continue lands: the post statement if there is one, then
        // the condition, then the loop head.
        let continue_target = post_block.or(cond_block).unwrap_or(loop_block);

        self.scoped(|e| {
            if let Some(init) = init {
                e.lower_stmt(init)?;
            }
            match (cond, cond_block) {
                (Some(cond), Some(cb)) => {
                    e.terminate(Terminator::Br(cb));
                    e.cur_block = Some(cb);
                    let cond_val = e.lower_expr(cond)?;
                    e.terminate(Terminator::CondBr {
                        cond: cond_val.value,
                        then_bb: loop_block,
                        else_bb: done_block,
                    });
                }
                _ => e.terminate(Terminator::Br(loop_block)),
            }

            e.cur_block = Some(loop_block);
            e.loop_stack.push((continue_target, done_block));
            let body_out = e.scoped(|e| e.lower_stmts(&body.stmts));
            e.loop_stack.pop();
            body_out?;

            let back_edge = cond_block.unwrap_or(loop_block);
            if let Some(cur) = e.cur_block {
                if !e.block_terminated(cur) {
                    e.terminate(Terminator::Br(post_block.unwrap_or(back_edge)));
                }
            }
            if let (Some(post), Some(pb)) = (post, post_block) {
                e.cur_block = Some(pb);
                e.lower_stmt(post)?;
                e.terminate(Terminator::Br(back_edge));
            }
            Ok(())
        })?;

        self.cur_block = Some(done_block);
        Ok(())
    }

    fn lower_switch(
        &mut self,
        init: Option<&Stmt>,
        tag: Option<&Expr>,
        cases: &[CaseClause],
        span: &Span,
    ) -> EmitResult<()> {
        self.scoped(|e| {
            if let Some(init) = init {
                e.lower_stmt(init)?;
            }
            // No tag means the constant true.
            let tag_val = match tag {
                Some(tag) => e.lower_expr(tag)?,
                None => {
                    let v = e.emit(Inst::ConstInt {
                        ty: IrType::I1,
                        value: 1,
                    })?;
                    TypedValue::rvalue(v, Type::Basic(BasicKind::Bool))
                }
            };
            if cases.is_empty() {
                return Ok(());
            }

            let curr = e
                .cur_block
                .ok_or_else(|| EmitError::internal(span, "switch outside block"))?;
            let func = e.module.function_mut(e.cur_func);
            let end_block = func.add_block("end");
            func.move_block_after(end_block, curr);
            let mut case_blocks = Vec::with_capacity(cases.len());
            for i in 0..cases.len() {
                case_blocks.push(func.insert_block_before(end_block, format!("case{}", i)));
            }
            let mut stmt_blocks = Vec::with_capacity(cases.len());
            for i in 0..cases.len() {
                stmt_blocks.push(func.insert_block_before(end_block, format!("body{}", i)));
            }

            e.terminate(Terminator::Br(case_blocks[0]));
            for (i, clause) in cases.iter().enumerate() {
                e.cur_block = Some(case_blocks[i]);
                let next_block = if i + 1 < case_blocks.len() {
                    case_blocks[i + 1]
                } else {
                    end_block
                };

                if clause.exprs.is_empty() {
                    // default clause
                    e.terminate(Terminator::Br(stmt_blocks[i]));
                } else {
                    let first = e.lower_expr(&clause.exprs[0])?;
                    let mut result =
                        e.binary_op(BinaryOp::Eql, first, tag_val.clone(), span)?;
                    for extra in &clause.exprs[1..] {
                        result = e.fold_case_or(result, extra, &tag_val, span)?;
                    }
                    e.terminate(Terminator::CondBr {
                        cond: result.value,
                        then_bb: stmt_blocks[i],
                        else_bb: next_block,
                    });
                }

                e.cur_block = Some(stmt_blocks[i]);
                // fallthrough redirects the terminator at the next case's
                // statement block rather than the end.
                let mut branch_target = end_block;
                let case_out = e.scoped(|e| {
                    for s in &clause.body {
                        if let StmtKind::Branch(BranchKind::Fallthrough) = &s.kind {
                            if i + 1 < stmt_blocks.len() {
                                branch_target = stmt_blocks[i + 1];
                            }
                        } else {
                            e.lower_stmt(s)?;
                        }
                    }
                    Ok(())
                });
                case_out?;
                if let Some(cur) = e.cur_block {
                    if !e.block_terminated(cur) {
                        e.terminate(Terminator::Br(branch_target));
                    }
                }
            }

            e.cur_block = Some(end_block);
            Ok(())
        })
    }

    /// Fold one more case expression into the match result with a
    /// short-circuit OR.
    fn fold_case_or(
        &mut self,
        acc: TypedValue,
        expr: &Expr,
        tag: &TypedValue,
        span: &Span,
    ) -> EmitResult<TypedValue> {
        let slot = self.emit(Inst::Alloca {
            ty: IrType::I1,
            name: "casetmp".to_string(),
        })?;
        self.emit(Inst::Store {
            value: acc.value,
            ptr: slot,
        })?;
        let func = self.module.function_mut(self.cur_func);
        let rhs_block = func.add_block("case.or");
        let done_block = func.add_block("case.or.done");
        self.terminate(Terminator::CondBr {
            cond: acc.value,
            then_bb: done_block,
            else_bb: rhs_block,
        });
        self.cur_block = Some(rhs_block);
        let v = self.lower_expr(expr)?;
        let eq = self.binary_op(BinaryOp::Eql, v, tag.clone(), span)?;
        self.emit(Inst::Store {
            value: eq.value,
            ptr: slot,
        })?;
        self.terminate(Terminator::Br(done_block));
        self.cur_block = Some(done_block);
        let value = self.emit(Inst::Load {
            ptr: slot,
            ty: IrType::I1,
        })?;
        Ok(TypedValue::rvalue(value, Type::Basic(BasicKind::Bool)))
    }

    /// Spawn lowering: evaluate the arguments into a stack struct, emit a
    /// trampoline taking one pointer, hand both to the runtime, then fill
    /// the trampoline body and restore the insertion point.
    fn lower_go(&mut self, call: &Expr) -> EmitResult<()> {
        let call = call.unparen();
        let ExprKind::Call { fun, args } = &call.kind else {
            return Err(EmitError::internal(&call.span, "go without call"));
        };

        let target_obj = match &fun.unparen().kind {
            ExprKind::Ident(_) | ExprKind::Selector { .. } => self.prog.obj_of(fun.unparen().id),
            _ => None,
        };
        let target = target_obj
            .and_then(|o| self.func_ids.get(&o).copied())
            .ok_or_else(|| {
                EmitError::unsupported(&fun.span, "go with an indirect callee")
            })?;
        let Some(Type::Func(ft)) = target_obj.and_then(|o| self.prog.objects.get(o).typ.clone())
        else {
            return Err(EmitError::internal(&fun.span, "go target without type"));
        };
        if ft.recv.is_some() {
            return Err(EmitError::unsupported(&fun.span, "go with a method value"));
        }
        if ft.is_variadic {
            return Err(EmitError::unsupported(&fun.span, "go with a variadic target"));
        }

        let param_tys = ft
            .params
            .iter()
            .map(|p| self.obj_type(*p, &call.span))
            .collect::<EmitResult<Vec<_>>>()?;

        // Pack arguments into a struct in the caller's frame.
        let byte_ptr = IrType::I8.ptr_to();
        let (args_struct_ir, args_mem, args_size) = if !args.is_empty() {
            let mut field_irs = Vec::with_capacity(param_tys.len());
            for t in &param_tys {
                field_irs.push(self.to_ir(t, &call.span)?);
            }
            let struct_ir = IrType::Struct(field_irs.clone());
            let mem = self.emit(Inst::Alloca {
                ty: struct_ir.clone(),
                name: "goargs".to_string(),
            })?;
            for (i, arg) in args.iter().enumerate() {
                let v = self.lower_expr(arg)?;
                let v = match param_tys.get(i) {
                    Some(want) => self.convert(v, want, &arg.span)?,
                    None => v,
                };
                let slot = self.emit(Inst::Gep {
                    ptr: mem,
                    indices: vec![GepIndex::Const(0), GepIndex::Const(i as u64)],
                    ty: field_irs[i].clone().ptr_to(),
                })?;
                self.emit(Inst::Store {
                    value: v.value,
                    ptr: slot,
                })?;
            }
            let size = self.emit(Inst::SizeOf {
                ty: struct_ir.clone(),
            })?;
            (Some(struct_ir), mem, size)
        } else {
            let mem = self.emit(Inst::ConstNull {
                ty: byte_ptr.clone(),
            })?;
            let size = self.const_i32(0)?;
            (None, mem, size)
        };

        // The trampoline presents a uniform single-pointer signature.
        let thunk_param_ir = match &args_struct_ir {
            Some(s) => s.clone().ptr_to(),
            None => byte_ptr.clone(),
        };
        let thunk_name = format!("go_thunk_{}", self.go_counter);
        self.go_counter += 1;
        let thunk = self
            .module
            .add_function(thunk_name, vec![thunk_param_ir.clone()], IrType::Void);

        let thunk_fnptr_ir = IrType::Func {
            params: vec![thunk_param_ir],
            ret: Box::new(IrType::Void),
        }
        .ptr_to();
        let thunk_addr = self.emit(Inst::FuncAddr {
            func: thunk,
            ty: thunk_fnptr_ir,
        })?;
        let uniform_fnptr_ir = IrType::Func {
            params: vec![byte_ptr.clone()],
            ret: Box::new(IrType::Void),
        }
        .ptr_to();
        let fn_arg = self.emit(Inst::Cast {
            op: CastOp::Bitcast,
            value: thunk_addr,
            ty: uniform_fnptr_ir,
        })?;
        let args_arg = self.emit(Inst::Cast {
            op: CastOp::Bitcast,
            value: args_mem,
            ty: byte_ptr,
        })?;
        self.emit(Inst::Call {
            callee: Callee::Direct(self.runtime.newgoroutine),
            args: vec![fn_arg, args_arg, args_size],
            ty: IrType::Void,
        })?;

        // Fill in the trampoline, then put the cursor back.
        let saved_func = self.cur_func;
        let saved_block = self.cur_block;
        self.cur_func = thunk;
        let entry = self.module.function_mut(thunk).add_block("entry");
        self.cur_block = Some(entry);

        let mut reloaded = Vec::with_capacity(args.len());
        if let Some(struct_ir) = &args_struct_ir {
            let IrType::Struct(field_irs) = struct_ir else {
                return Err(EmitError::internal(&call.span, "bad args struct"));
            };
            let base = self.module.function(thunk).param(0);
            for (i, field_ir) in field_irs.clone().into_iter().enumerate() {
                let slot = self.emit(Inst::Gep {
                    ptr: base,
                    indices: vec![GepIndex::Const(0), GepIndex::Const(i as u64)],
                    ty: field_ir.clone().ptr_to(),
                })?;
                let v = self.emit(Inst::Load {
                    ptr: slot,
                    ty: field_ir,
                })?;
                reloaded.push(v);
            }
        }
        let ret_ir = self.results_ir(&ft.results, &call.span)?;
        self.emit(Inst::Call {
            callee: Callee::Direct(target),
            args: reloaded,
            ty: ret_ir,
        })?;
        self.terminate(Terminator::Ret(None));

        self.cur_func = saved_func;
        self.cur_block = saved_block;
        Ok(())
    }
}

fn parse_int(s: &str) -> Option<i64> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::parse_int;

    #[test]
    fn integer_literals_parse_in_both_bases() {
        assert_eq!(parse_int("42"), Some(42));
        assert_eq!(parse_int("0x2a"), Some(42));
        assert_eq!(parse_int("x"), None);
    }
}
