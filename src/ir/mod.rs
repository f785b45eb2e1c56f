// IR core data structures: typed values, basic blocks, functions, and the
// module container the backend consumes. Block ids are stable; textual
// ordering lives in a separate order list so blocks can be inserted and
// moved the way structured-control lowering wants.

pub mod lower;

pub type BlockId = usize;
pub type ValueId = usize;
pub type FuncId = usize;
pub type GlobalId = usize;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IrType {
    Void,
    I1,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Ptr(Box<IrType>),
    Array(Box<IrType>, u64),
    Struct(Vec<IrType>),
    Func {
        params: Vec<IrType>,
        ret: Box<IrType>,
    },
    /// Reference to a module-level named type; breaks recursive layouts.
    NamedRef(String),
}

impl IrType {
    pub fn ptr_to(self) -> IrType {
        IrType::Ptr(Box::new(self))
    }

    pub fn pointee(&self) -> Option<&IrType> {
        match self {
            IrType::Ptr(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, IrType::F32 | IrType::F64)
    }

    pub fn int_bits(&self) -> Option<u32> {
        match self {
            IrType::I1 => Some(1),
            IrType::I8 => Some(8),
            IrType::I16 => Some(16),
            IrType::I32 => Some(32),
            IrType::I64 => Some(64),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    SDiv,
    SRem,
    And,
    Or,
    Xor,
    Shl,
    AShr,
    FAdd,
    FSub,
    FMul,
    FDiv,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IcmpPred {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FcmpPred {
    Oeq,
    One,
    Olt,
    Ole,
    Ogt,
    Oge,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CastOp {
    Bitcast,
    Trunc,
    Sext,
    Zext,
    Fpext,
    Fptrunc,
    Sitofp,
    Fptosi,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GepIndex {
    Const(u64),
    Value(ValueId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Callee {
    Direct(FuncId),
    Indirect(ValueId),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Inst {
    ConstInt {
        ty: IrType,
        value: i64,
    },
    ConstFloat {
        ty: IrType,
        value: f64,
    },
    /// String constant; materializes as `{ i8*, i32 }`.
    ConstStr {
        value: String,
    },
    ConstNull {
        ty: IrType,
    },
    FuncAddr {
        func: FuncId,
        ty: IrType,
    },
    GlobalAddr {
        global: GlobalId,
        ty: IrType,
    },
    Alloca {
        ty: IrType,
        name: String,
    },
    Load {
        ptr: ValueId,
        ty: IrType,
    },
    Store {
        value: ValueId,
        ptr: ValueId,
    },
    Gep {
        ptr: ValueId,
        indices: Vec<GepIndex>,
        /// Resulting pointer type.
        ty: IrType,
    },
    ExtractValue {
        agg: ValueId,
        index: usize,
        ty: IrType,
    },
    Binary {
        op: BinOp,
        lhs: ValueId,
        rhs: ValueId,
        ty: IrType,
    },
    Icmp {
        pred: IcmpPred,
        lhs: ValueId,
        rhs: ValueId,
    },
    Fcmp {
        pred: FcmpPred,
        lhs: ValueId,
        rhs: ValueId,
    },
    Call {
        callee: Callee,
        args: Vec<ValueId>,
        /// Result type; `Void` for procedure calls.
        ty: IrType,
    },
    Cast {
        op: CastOp,
        value: ValueId,
        ty: IrType,
    },
    /// Size of a type as an `i32`.
    SizeOf {
        ty: IrType,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum ValueDef {
    Param(usize),
    Inst(Inst),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Terminator {
    Br(BlockId),
    CondBr {
        cond: ValueId,
        then_bb: BlockId,
        else_bb: BlockId,
    },
    Ret(Option<ValueId>),
    RetAggregate(Vec<ValueId>),
}

#[derive(Clone, Debug)]
pub struct Block {
    pub name: String,
    pub insts: Vec<ValueId>,
    pub term: Option<Terminator>,
}

#[derive(Clone, Debug)]
pub struct Global {
    pub name: String,
    pub ty: IrType,
}

/// A module-level named type. `ty` is `None` while the definition is still
/// being built (recursive layouts reference it through `NamedRef` first).
#[derive(Clone, Debug)]
pub struct NamedTypeDef {
    pub name: String,
    pub ty: Option<IrType>,
}

#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    pub params: Vec<IrType>,
    pub ret: IrType,
    /// Declared only; no body is emitted.
    pub is_external: bool,
    pub values: Vec<ValueDef>,
    blocks: Vec<Block>,
    /// Layout order; every id in here indexes `blocks`.
    pub block_order: Vec<BlockId>,
}

impl Function {
    fn new(name: String, params: Vec<IrType>, ret: IrType, is_external: bool) -> Self {
        let values = (0..params.len()).map(ValueDef::Param).collect();
        Function {
            name,
            params,
            ret,
            is_external,
            values,
            blocks: Vec::new(),
            block_order: Vec::new(),
        }
    }

    pub fn param(&self, i: usize) -> ValueId {
        debug_assert!(i < self.params.len());
        i
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id]
    }

    fn alloc_block(&mut self, name: impl Into<String>) -> BlockId {
        self.blocks.push(Block {
            name: name.into(),
            insts: Vec::new(),
            term: None,
        });
        self.blocks.len() - 1
    }

    /// Append a block at the end of the layout.
    pub fn add_block(&mut self, name: impl Into<String>) -> BlockId {
        let id = self.alloc_block(name);
        self.block_order.push(id);
        id
    }

    /// Insert a block immediately before `before` in the layout.
    pub fn insert_block_before(&mut self, before: BlockId, name: impl Into<String>) -> BlockId {
        let id = self.alloc_block(name);
        let pos = self
            .block_order
            .iter()
            .position(|b| *b == before)
            .unwrap_or(self.block_order.len());
        self.block_order.insert(pos, id);
        id
    }

    /// Move `block` directly after `after` in the layout.
    pub fn move_block_after(&mut self, block: BlockId, after: BlockId) {
        self.block_order.retain(|b| *b != block);
        let pos = self
            .block_order
            .iter()
            .position(|b| *b == after)
            .map(|p| p + 1)
            .unwrap_or(self.block_order.len());
        self.block_order.insert(pos, block);
    }

    pub fn last_block(&self) -> Option<BlockId> {
        self.block_order.last().copied()
    }

    pub fn push_inst(&mut self, block: BlockId, inst: Inst) -> ValueId {
        self.values.push(ValueDef::Inst(inst));
        let v = self.values.len() - 1;
        self.blocks[block].insts.push(v);
        v
    }

    pub fn is_terminated(&self, block: BlockId) -> bool {
        self.blocks[block].term.is_some()
    }

    /// Install a terminator unless the block already has one; lowering
    /// patches fallthrough edges this way without clobbering returns.
    pub fn terminate(&mut self, block: BlockId, term: Terminator) {
        let b = &mut self.blocks[block];
        if b.term.is_none() {
            b.term = Some(term);
        }
    }

    pub fn value_type(&self, v: ValueId) -> IrType {
        match &self.values[v] {
            ValueDef::Param(i) => self.params[*i].clone(),
            ValueDef::Inst(inst) => match inst {
                Inst::ConstInt { ty, .. }
                | Inst::ConstFloat { ty, .. }
                | Inst::ConstNull { ty }
                | Inst::FuncAddr { ty, .. }
                | Inst::GlobalAddr { ty, .. }
                | Inst::Load { ty, .. }
                | Inst::Gep { ty, .. }
                | Inst::ExtractValue { ty, .. }
                | Inst::Binary { ty, .. }
                | Inst::Call { ty, .. }
                | Inst::Cast { ty, .. } => ty.clone(),
                Inst::ConstStr { .. } => {
                    IrType::Struct(vec![IrType::I8.ptr_to(), IrType::I32])
                }
                Inst::Alloca { ty, .. } => ty.clone().ptr_to(),
                Inst::Store { .. } => IrType::Void,
                Inst::Icmp { .. } | Inst::Fcmp { .. } => IrType::I1,
                Inst::SizeOf { .. } => IrType::I32,
            },
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Module {
    pub name: String,
    pub functions: Vec<Function>,
    pub globals: Vec<Global>,
    pub types: Vec<NamedTypeDef>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Module {
            name: name.into(),
            functions: Vec::new(),
            globals: Vec::new(),
            types: Vec::new(),
        }
    }

    /// Register a named type, initially opaque. Returns its index.
    pub fn declare_named_type(&mut self, name: impl Into<String>) -> usize {
        self.types.push(NamedTypeDef {
            name: name.into(),
            ty: None,
        });
        self.types.len() - 1
    }

    pub fn define_named_type(&mut self, index: usize, ty: IrType) {
        self.types[index].ty = Some(ty);
    }

    pub fn named_type(&self, name: &str) -> Option<&IrType> {
        self.types
            .iter()
            .find(|t| t.name == name)
            .and_then(|t| t.ty.as_ref())
    }

    pub fn add_function(
        &mut self,
        name: impl Into<String>,
        params: Vec<IrType>,
        ret: IrType,
    ) -> FuncId {
        self.functions
            .push(Function::new(name.into(), params, ret, false));
        self.functions.len() - 1
    }

    pub fn declare_external(
        &mut self,
        name: impl Into<String>,
        params: Vec<IrType>,
        ret: IrType,
    ) -> FuncId {
        self.functions
            .push(Function::new(name.into(), params, ret, true));
        self.functions.len() - 1
    }

    pub fn add_global(&mut self, name: impl Into<String>, ty: IrType) -> GlobalId {
        self.globals.push(Global {
            name: name.into(),
            ty,
        });
        self.globals.len() - 1
    }

    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id]
    }

    pub fn function_mut(&mut self, id: FuncId) -> &mut Function {
        &mut self.functions[id]
    }

    pub fn lookup_function(&self, name: &str) -> Option<FuncId> {
        self.functions.iter().position(|f| f.name == name)
    }

    /// The type a direct or indirect call through `callee` produces.
    pub fn signature_of(&self, callee: &Callee, func: FuncId) -> (Vec<IrType>, IrType) {
        match callee {
            Callee::Direct(f) => {
                let f = self.function(*f);
                (f.params.clone(), f.ret.clone())
            }
            Callee::Indirect(v) => {
                let vt = self.function(func).value_type(*v);
                match vt.pointee() {
                    Some(IrType::Func { params, ret }) => (params.clone(), (**ret).clone()),
                    _ => (Vec::new(), IrType::Void),
                }
            }
        }
    }
}
