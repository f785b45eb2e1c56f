use std::collections::HashMap;
use std::fmt;

use crate::frontend::ast::ChanDir;
use crate::sema::scope::{ObjId, Objects};

/// Index into [`TypeTable`]. One per user type declaration.
pub type NameId = usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BasicKind {
    Bool,
    Int,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Uintptr,
    Float32,
    Float64,
    Complex64,
    Complex128,
    String,
    UntypedInt,
    UntypedRune,
    UntypedFloat,
    UntypedComplex,
}

impl BasicKind {
    pub fn is_untyped(self) -> bool {
        matches!(
            self,
            BasicKind::UntypedInt
                | BasicKind::UntypedRune
                | BasicKind::UntypedFloat
                | BasicKind::UntypedComplex
        )
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            BasicKind::Int
                | BasicKind::Int8
                | BasicKind::Int16
                | BasicKind::Int32
                | BasicKind::Int64
                | BasicKind::Uint
                | BasicKind::Uint8
                | BasicKind::Uint16
                | BasicKind::Uint32
                | BasicKind::Uint64
                | BasicKind::Uintptr
                | BasicKind::UntypedInt
                | BasicKind::UntypedRune
        )
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            BasicKind::Float32 | BasicKind::Float64 | BasicKind::UntypedFloat
        )
    }

    pub fn is_complex(self) -> bool {
        matches!(
            self,
            BasicKind::Complex64 | BasicKind::Complex128 | BasicKind::UntypedComplex
        )
    }

    /// The typed kind an untyped constant defaults to when no context pins
    /// it. Typed kinds default to themselves.
    pub fn default_typed(self) -> BasicKind {
        match self {
            BasicKind::UntypedInt => BasicKind::Int,
            BasicKind::UntypedRune => BasicKind::Int32,
            BasicKind::UntypedFloat => BasicKind::Float64,
            BasicKind::UntypedComplex => BasicKind::Complex128,
            k => k,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BasicKind::Bool => "bool",
            BasicKind::Int => "int",
            BasicKind::Int8 => "int8",
            BasicKind::Int16 => "int16",
            BasicKind::Int32 => "int32",
            BasicKind::Int64 => "int64",
            BasicKind::Uint => "uint",
            BasicKind::Uint8 => "uint8",
            BasicKind::Uint16 => "uint16",
            BasicKind::Uint32 => "uint32",
            BasicKind::Uint64 => "uint64",
            BasicKind::Uintptr => "uintptr",
            BasicKind::Float32 => "float32",
            BasicKind::Float64 => "float64",
            BasicKind::Complex64 => "complex64",
            BasicKind::Complex128 => "complex128",
            BasicKind::String => "string",
            BasicKind::UntypedInt => "untyped int",
            BasicKind::UntypedRune => "untyped rune",
            BasicKind::UntypedFloat => "untyped float",
            BasicKind::UntypedComplex => "untyped complex",
        }
    }
}

/// Position of an untyped constant kind in the promotion order
/// integer < rune < floating-point < complex. `None` for typed kinds.
pub fn untyped_priority(kind: BasicKind) -> Option<u8> {
    match kind {
        BasicKind::UntypedInt => Some(0),
        BasicKind::UntypedRune => Some(1),
        BasicKind::UntypedFloat => Some(2),
        BasicKind::UntypedComplex => Some(3),
        _ => None,
    }
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct StructType {
    /// Field objects, declaration order. Anonymous fields have empty names.
    pub fields: Vec<ObjId>,
    pub tags: Vec<String>,
    /// Field name (or embedded type name) to position in `fields`.
    pub field_indices: HashMap<String, usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FuncType {
    pub recv: Option<ObjId>,
    pub params: Vec<ObjId>,
    pub results: Vec<ObjId>,
    pub is_variadic: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Type {
    Basic(BasicKind),
    /// A declared named type; data lives in the [`TypeTable`] so the graph
    /// may be cyclic.
    Named(NameId),
    Pointer {
        base: Box<Type>,
    },
    Array {
        elt: Box<Type>,
        len: u64,
    },
    Slice {
        elt: Box<Type>,
    },
    Map {
        key: Box<Type>,
        elt: Box<Type>,
    },
    Chan {
        dir: ChanDir,
        elt: Box<Type>,
    },
    Struct(StructType),
    Interface {
        /// Method objects sorted by name.
        methods: Vec<ObjId>,
    },
    Func(FuncType),
    /// Sentinel for a failed type; consumers short-circuit without
    /// reporting again.
    Bad {
        msg: String,
    },
}

impl Type {
    pub fn bad(msg: impl Into<String>) -> Type {
        Type::Bad { msg: msg.into() }
    }

    pub fn is_bad(&self) -> bool {
        matches!(self, Type::Bad { .. })
    }

    pub fn is_untyped(&self) -> bool {
        matches!(self, Type::Basic(k) if k.is_untyped())
    }

    pub fn pretty<'a>(&'a self, objects: &'a Objects, table: &'a TypeTable) -> TypePretty<'a> {
        TypePretty {
            ty: self,
            objects,
            table,
        }
    }
}

/// Arena entry for one named type. `underlying` is installed only at the
/// end of the declaration's own resolution; `None` in between is the
/// in-progress mark that terminates recursion and flags illegal cycles.
#[derive(Clone, Debug)]
pub struct NamedType {
    pub obj: ObjId,
    pub underlying: Option<Type>,
    /// Method objects sorted by name.
    pub methods: Vec<ObjId>,
}

#[derive(Default, Debug)]
pub struct TypeTable {
    named: Vec<NamedType>,
}

impl TypeTable {
    pub fn alloc(&mut self, obj: ObjId) -> NameId {
        self.named.push(NamedType {
            obj,
            underlying: None,
            methods: Vec::new(),
        });
        self.named.len() - 1
    }

    pub fn get(&self, id: NameId) -> &NamedType {
        &self.named[id]
    }

    pub fn get_mut(&mut self, id: NameId) -> &mut NamedType {
        &mut self.named[id]
    }

    pub fn in_progress(&self, id: NameId) -> bool {
        self.named[id].underlying.is_none()
    }

    /// The structural type with named wrappers stripped. Never returns a
    /// `Named`; a still-unresolved name yields `Bad`.
    pub fn underlying(&self, t: &Type) -> Type {
        match t {
            Type::Named(id) => match &self.named[*id].underlying {
                Some(u) => u.clone(),
                None => Type::bad("incomplete type"),
            },
            _ => t.clone(),
        }
    }

    /// Pointer base type, looking through named wrappers. `None` when the
    /// type is not a pointer.
    pub fn deref(&self, t: &Type) -> Option<Type> {
        match self.underlying(t) {
            Type::Pointer { base } => Some(*base),
            _ => None,
        }
    }
}

pub struct TypePretty<'a> {
    ty: &'a Type,
    objects: &'a Objects,
    table: &'a TypeTable,
}

impl fmt::Display for TypePretty<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_type(self.ty, self.objects, self.table, f)
    }
}

fn fmt_type(
    ty: &Type,
    objects: &Objects,
    table: &TypeTable,
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result {
    match ty {
        Type::Basic(k) => write!(f, "{}", k.name()),
        Type::Named(id) => write!(f, "{}", objects.get(table.get(*id).obj).name),
        Type::Pointer { base } => {
            write!(f, "*")?;
            fmt_type(base, objects, table, f)
        }
        Type::Array { elt, len } => {
            write!(f, "[{}]", len)?;
            fmt_type(elt, objects, table, f)
        }
        Type::Slice { elt } => {
            write!(f, "[]")?;
            fmt_type(elt, objects, table, f)
        }
        Type::Map { key, elt } => {
            write!(f, "map[")?;
            fmt_type(key, objects, table, f)?;
            write!(f, "]")?;
            fmt_type(elt, objects, table, f)
        }
        Type::Chan { dir, elt } => {
            match dir {
                ChanDir::Both => write!(f, "chan ")?,
                ChanDir::Send => write!(f, "chan<- ")?,
                ChanDir::Recv => write!(f, "<-chan ")?,
            }
            fmt_type(elt, objects, table, f)
        }
        Type::Struct(s) => {
            write!(f, "struct {{")?;
            for (i, field) in s.fields.iter().enumerate() {
                if i > 0 {
                    write!(f, ";")?;
                }
                let obj = objects.get(*field);
                if !obj.name.is_empty() {
                    write!(f, " {}", obj.name)?;
                }
                match &obj.typ {
                    Some(t) => {
                        write!(f, " ")?;
                        fmt_type(t, objects, table, f)?;
                    }
                    None => write!(f, " ?")?,
                }
            }
            write!(f, " }}")
        }
        Type::Interface { methods } => {
            if methods.is_empty() {
                write!(f, "interface {{}}")
            } else {
                write!(f, "interface {{ ")?;
                for (i, m) in methods.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{}", objects.get(*m).name)?;
                }
                write!(f, " }}")
            }
        }
        Type::Func(ft) => {
            write!(f, "func(")?;
            for (i, p) in ft.params.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                if ft.is_variadic && i == ft.params.len() - 1 {
                    write!(f, "...")?;
                }
                match &objects.get(*p).typ {
                    Some(t) => fmt_type(t, objects, table, f)?,
                    None => write!(f, "?")?,
                }
            }
            write!(f, ")")?;
            match ft.results.len() {
                0 => Ok(()),
                1 => {
                    write!(f, " ")?;
                    match &objects.get(ft.results[0]).typ {
                        Some(t) => fmt_type(t, objects, table, f),
                        None => write!(f, "?"),
                    }
                }
                _ => {
                    write!(f, " (")?;
                    for (i, r) in ft.results.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        match &objects.get(*r).typ {
                            Some(t) => fmt_type(t, objects, table, f)?,
                            None => write!(f, "?")?,
                        }
                    }
                    write!(f, ")")
                }
            }
        }
        Type::Bad { msg } => write!(f, "<bad: {}>", msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sema::scope::{ObjKind, Objects};

    #[test]
    fn priority_orders_the_untyped_family() {
        assert!(untyped_priority(BasicKind::UntypedInt) < untyped_priority(BasicKind::UntypedRune));
        assert!(
            untyped_priority(BasicKind::UntypedRune) < untyped_priority(BasicKind::UntypedFloat)
        );
        assert!(
            untyped_priority(BasicKind::UntypedFloat) < untyped_priority(BasicKind::UntypedComplex)
        );
        assert_eq!(untyped_priority(BasicKind::Int), None);
    }

    #[test]
    fn underlying_never_returns_a_name() {
        let mut objects = Objects::default();
        let obj = objects.alloc(ObjKind::Typ, "Celsius");
        let mut table = TypeTable::default();
        let id = table.alloc(obj);
        table.get_mut(id).underlying = Some(Type::Basic(BasicKind::Float64));

        let named = Type::Named(id);
        let u = table.underlying(&named);
        assert_eq!(u, Type::Basic(BasicKind::Float64));
        assert!(!matches!(u, Type::Named(_)));
    }

    #[test]
    fn in_progress_name_underlies_to_bad() {
        let mut objects = Objects::default();
        let obj = objects.alloc(ObjKind::Typ, "Loop");
        let mut table = TypeTable::default();
        let id = table.alloc(obj);
        assert!(table.in_progress(id));
        assert!(table.underlying(&Type::Named(id)).is_bad());
    }

    #[test]
    fn deref_looks_through_named_pointers() {
        let mut objects = Objects::default();
        let obj = objects.alloc(ObjKind::Typ, "P");
        let mut table = TypeTable::default();
        let id = table.alloc(obj);
        table.get_mut(id).underlying = Some(Type::Pointer {
            base: Box::new(Type::Basic(BasicKind::Int)),
        });

        assert_eq!(
            table.deref(&Type::Named(id)),
            Some(Type::Basic(BasicKind::Int))
        );
        assert_eq!(table.deref(&Type::Basic(BasicKind::Int)), None);
    }
}
