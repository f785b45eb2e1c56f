pub mod scope;
pub mod types;

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::frontend::ast::*;
use crate::frontend::diagnostic::{Diagnostic, Diagnostics};
use crate::frontend::suggest;
use crate::sema::scope::{ObjData, ObjDecl, ObjId, ObjKind, Objects, ScopeId, Scopes};
use crate::sema::types::{
    untyped_priority, BasicKind, FuncType, StructType, Type, TypeTable,
};

/// One step of a resolved selector's access path: follow a field index, or
/// load through a pointer first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelStep {
    Deref,
    Field(usize),
}

/// Everything the checker learned about a file set, consumed by IR
/// emission and by tooling.
#[derive(Debug)]
pub struct Program {
    pub files: Vec<File>,
    pub objects: Objects,
    pub table: TypeTable,
    /// Type of every expression the checker visited, keyed by node id.
    pub expr_types: HashMap<ExprId, Type>,
    /// Use-site identifier (and selector) resolution.
    pub uses: HashMap<ExprId, ObjId>,
    /// Declaration-site identifier resolution.
    pub defs: HashMap<ExprId, ObjId>,
    /// Field access paths for resolved field selectors.
    pub selections: HashMap<ExprId, Vec<SelStep>>,
    /// Receiver type object to its methods, sorted by name once the
    /// receiver type resolves.
    pub methods: HashMap<ObjId, Vec<ObjId>>,
    /// Package-scope objects in declaration order.
    pub package_objects: Vec<ObjId>,
}

impl Program {
    pub fn obj_of(&self, id: ExprId) -> Option<ObjId> {
        self.uses
            .get(&id)
            .copied()
            .or_else(|| self.defs.get(&id).copied())
    }

    pub fn type_of(&self, id: ExprId) -> Option<&Type> {
        self.expr_types.get(&id)
    }
}

/// Type check a set of source files belonging to one package.
///
/// Objects are annotated in place, expression types land in the returned
/// map, and all semantic errors accumulate; the result is `Err` exactly
/// when at least one diagnostic was produced.
pub fn check(files: Vec<File>) -> Result<Program, Diagnostics> {
    let mut files = files;
    let mut c = Checker::new();
    debug!(files = files.len(), "type checking package");

    for file in &mut files {
        c.decompose_repeat_consts(file);
    }
    c.declare_files(&files);
    c.resolve_files(&files);
    c.collect_methods(&files);

    for obj in c.package_objects.clone() {
        c.check_obj(obj, false);
    }

    // Method bodies run after every named type has resolved, so they never
    // observe a partially built receiver type.
    for file in &files {
        for decl in &file.decls {
            if let Decl::Func(fd) = decl {
                if fd.recv.is_none() {
                    continue;
                }
                if let Some(obj) = c.defs.get(&fd.name.id).copied() {
                    c.check_obj(obj, false);
                    if let Some(body) = &fd.body {
                        c.push_result_context(obj);
                        c.check_block_stmts(body);
                        c.result_stack.pop();
                    }
                }
            }
        }
    }

    c.diags.dedup_multiples();
    if c.diags.is_empty() {
        Ok(Program {
            files,
            objects: c.objects,
            table: c.table,
            expr_types: c.expr_types,
            uses: c.uses,
            defs: c.defs,
            selections: c.selections,
            methods: c.methods,
            package_objects: c.package_objects,
        })
    } else {
        Err(c.diags)
    }
}

struct Checker {
    objects: Objects,
    scopes: Scopes,
    package: ScopeId,
    table: TypeTable,
    diags: Diagnostics,
    expr_types: HashMap<ExprId, Type>,
    uses: HashMap<ExprId, ObjId>,
    defs: HashMap<ExprId, ObjId>,
    selections: HashMap<ExprId, Vec<SelStep>>,
    methods: HashMap<ObjId, Vec<ObjId>>,
    package_objects: Vec<ObjId>,
    /// Declared result types of the functions whose bodies are being
    /// checked, innermost last.
    result_stack: Vec<Vec<Option<Type>>>,
}

impl Checker {
    fn new() -> Self {
        let mut objects = Objects::default();
        let mut scopes = Scopes::new(&mut objects);
        let package = scopes.push(scopes.universe);
        Checker {
            objects,
            scopes,
            package,
            table: TypeTable::default(),
            diags: Diagnostics::default(),
            expr_types: HashMap::new(),
            uses: HashMap::new(),
            defs: HashMap::new(),
            selections: HashMap::new(),
            methods: HashMap::new(),
            package_objects: Vec::new(),
            result_stack: Vec::new(),
        }
    }

    fn error(&mut self, span: &Span, msg: impl Into<String>) -> String {
        let msg = msg.into();
        self.diags.push(msg.clone(), Some(span.clone()));
        msg
    }

    /// Report and hand back the matching `Bad` type.
    fn bad(&mut self, span: &Span, msg: impl Into<String>) -> Type {
        Type::Bad {
            msg: self.error(span, msg),
        }
    }

    fn type_str(&self, t: &Type) -> String {
        format!("{}", t.pretty(&self.objects, &self.table))
    }

    fn ident_obj(&self, id: ExprId) -> Option<ObjId> {
        self.uses
            .get(&id)
            .copied()
            .or_else(|| self.defs.get(&id).copied())
    }

    fn push_result_context(&mut self, fun: ObjId) {
        let results = match self.objects.get(fun).typ.as_ref() {
            Some(Type::Func(ft)) => ft
                .results
                .iter()
                .map(|r| self.objects.get(*r).typ.clone())
                .collect(),
            _ => Vec::new(),
        };
        self.result_stack.push(results);
    }

    // ----- pass: repeat-constant decomposition -----

    /// In a const group, a spec with neither type nor values inherits both
    /// from the nearest preceding complete spec.
    fn decompose_repeat_consts(&mut self, file: &mut File) {
        for decl in &mut file.decls {
            let Decl::Gen(gen) = decl else { continue };
            if gen.keyword != DeclKeyword::Const {
                continue;
            }
            let mut pred: Option<(Option<Expr>, Vec<Expr>)> = None;
            for spec in &mut gen.specs {
                let Spec::Value(vs) = spec else { continue };
                if !vs.values.is_empty() {
                    pred = Some((vs.ty.clone(), vs.values.clone()));
                } else if let Some((ty, values)) = &pred {
                    vs.ty = ty.clone();
                    vs.values = values.clone();
                } else {
                    self.error(&vs.span, "missing value in constant declaration");
                }
            }
        }
    }

    // ----- pass: top-level declaration -----

    fn declare_object(
        &mut self,
        scope: ScopeId,
        ident: &Ident,
        kind: ObjKind,
        decl: Option<ObjDecl>,
    ) -> ObjId {
        let obj = self.objects.alloc(kind, ident.name.clone());
        self.objects.get_mut(obj).decl = decl;
        self.defs.insert(ident.id, obj);
        if !ident.is_blank() {
            if self.scopes.declare(scope, obj, &self.objects).is_err() {
                self.error(
                    &ident.span,
                    format!("{} redeclared in this block", ident.name),
                );
            }
        }
        obj
    }

    fn declare_files(&mut self, files: &[File]) {
        for file in files {
            for decl in &file.decls {
                match decl {
                    Decl::Gen(gen) => {
                        let kind = match gen.keyword {
                            DeclKeyword::Const => ObjKind::Con,
                            DeclKeyword::Var => ObjKind::Var,
                            DeclKeyword::Type => ObjKind::Typ,
                        };
                        for spec in &gen.specs {
                            match spec {
                                Spec::Value(vs) => {
                                    for name in &vs.names {
                                        let obj = self.declare_object(
                                            self.package,
                                            name,
                                            kind,
                                            Some(ObjDecl::Value(vs.clone())),
                                        );
                                        self.package_objects.push(obj);
                                    }
                                }
                                Spec::Type(ts) => {
                                    let obj = self.declare_object(
                                        self.package,
                                        &ts.name,
                                        ObjKind::Typ,
                                        Some(ObjDecl::Type(ts.clone())),
                                    );
                                    self.package_objects.push(obj);
                                }
                            }
                        }
                    }
                    Decl::Func(fd) => {
                        if fd.recv.is_none() {
                            let obj = self.declare_object(
                                self.package,
                                &fd.name,
                                ObjKind::Fun,
                                Some(ObjDecl::Func(fd.clone())),
                            );
                            self.package_objects.push(obj);
                        } else {
                            // Methods do not enter the package scope.
                            let obj = self.objects.alloc(ObjKind::Fun, fd.name.name.clone());
                            self.objects.get_mut(obj).decl = Some(ObjDecl::Func(fd.clone()));
                            self.defs.insert(fd.name.id, obj);
                        }
                    }
                }
            }
        }
    }

    // ----- pass: method collection -----

    fn collect_methods(&mut self, files: &[File]) {
        for file in files {
            for decl in &file.decls {
                let Decl::Func(fd) = decl else { continue };
                let Some(recv) = &fd.recv else { continue };
                let base = match &recv.ty.unparen().kind {
                    ExprKind::Star(inner) => inner.unparen(),
                    _ => recv.ty.unparen(),
                };
                let recv_obj = match &base.kind {
                    ExprKind::Ident(_) => self.ident_obj(base.id),
                    _ => None,
                };
                match recv_obj {
                    Some(obj) if self.objects.get(obj).kind == ObjKind::Typ => {
                        if let Some(m) = self.defs.get(&fd.name.id).copied() {
                            self.methods.entry(obj).or_default().push(m);
                        }
                    }
                    _ => {
                        self.error(&recv.span, "invalid receiver type");
                    }
                }
            }
        }
    }

    // ----- pass: identifier resolution -----

    fn resolve_files(&mut self, files: &[File]) {
        for file in files {
            for decl in &file.decls {
                match decl {
                    Decl::Gen(gen) => self.resolve_gen_decl(gen, self.package, true),
                    Decl::Func(fd) => self.resolve_func_decl(fd),
                }
            }
        }
    }

    fn resolve_gen_decl(&mut self, gen: &GenDecl, scope: ScopeId, top_level: bool) {
        let kind = match gen.keyword {
            DeclKeyword::Const => ObjKind::Con,
            DeclKeyword::Var => ObjKind::Var,
            DeclKeyword::Type => ObjKind::Typ,
        };
        for spec in &gen.specs {
            match spec {
                Spec::Value(vs) => {
                    if let Some(ty) = &vs.ty {
                        self.resolve_expr(ty, scope);
                    }
                    for value in &vs.values {
                        self.resolve_expr(value, scope);
                    }
                    if !top_level {
                        for name in &vs.names {
                            self.declare_object(scope, name, kind, Some(ObjDecl::Value(vs.clone())));
                        }
                    }
                }
                Spec::Type(ts) => {
                    if !top_level {
                        self.declare_object(scope, &ts.name, ObjKind::Typ, Some(ObjDecl::Type(ts.clone())));
                    }
                    self.resolve_expr(&ts.ty, scope);
                }
            }
        }
    }

    fn resolve_func_decl(&mut self, fd: &FuncDecl) {
        if let Some(recv) = &fd.recv {
            self.resolve_expr(&recv.ty, self.package);
        }
        let fn_scope = self.scopes.push(self.package);
        if let Some(recv) = &fd.recv {
            for name in &recv.names {
                self.declare_object(fn_scope, name, ObjKind::Var, Some(ObjDecl::Field(recv.clone())));
            }
        }
        self.resolve_signature(&fd.params, &fd.results, fn_scope);
        if let Some(body) = &fd.body {
            self.resolve_block(body, fn_scope);
        }
    }

    fn resolve_signature(&mut self, params: &[Field], results: &[Field], fn_scope: ScopeId) {
        for field in params.iter().chain(results) {
            self.resolve_expr(&field.ty, fn_scope);
            for name in &field.names {
                self.declare_object(fn_scope, name, ObjKind::Var, Some(ObjDecl::Field(field.clone())));
            }
        }
    }

    fn resolve_block(&mut self, block: &Block, parent: ScopeId) {
        let scope = self.scopes.push(parent);
        for stmt in &block.stmts {
            self.resolve_stmt(stmt, scope);
        }
    }

    fn resolve_stmt(&mut self, stmt: &Stmt, scope: ScopeId) {
        match &stmt.kind {
            StmtKind::Empty | StmtKind::Branch(_) => {}
            StmtKind::Assign { lhs, tok, rhs } => {
                for r in rhs {
                    self.resolve_expr(r, scope);
                }
                match tok {
                    AssignTok::Assign => {
                        for l in lhs {
                            self.resolve_expr(l, scope);
                        }
                    }
                    AssignTok::Define => {
                        for l in lhs {
                            match &l.unparen().kind {
                                ExprKind::Ident(name) if name == "_" => {}
                                ExprKind::Ident(name) => {
                                    if let Some(prev) = self.scopes.lookup_local(scope, name) {
                                        // Redefinition in the same block
                                        // reuses the existing variable.
                                        self.uses.insert(l.id, prev);
                                    } else {
                                        let obj = self.objects.alloc(ObjKind::Var, name.clone());
                                        self.defs.insert(l.id, obj);
                                        let _ = self.scopes.declare(scope, obj, &self.objects);
                                    }
                                }
                                _ => {
                                    self.error(&l.span, "non-name on left side of :=");
                                }
                            }
                        }
                    }
                }
            }
            StmtKind::Block(b) => self.resolve_block(b, scope),
            StmtKind::Expr(e) => self.resolve_expr(e, scope),
            StmtKind::Decl(gen) => self.resolve_gen_decl(gen, scope, false),
            StmtKind::For {
                init,
                cond,
                post,
                body,
            } => {
                let header = self.scopes.push(scope);
                if let Some(init) = init {
                    self.resolve_stmt(init, header);
                }
                if let Some(cond) = cond {
                    self.resolve_expr(cond, header);
                }
                if let Some(post) = post {
                    self.resolve_stmt(post, header);
                }
                self.resolve_block(body, header);
            }
            StmtKind::If {
                init,
                cond,
                body,
                els,
            } => {
                let header = self.scopes.push(scope);
                if let Some(init) = init {
                    self.resolve_stmt(init, header);
                }
                self.resolve_expr(cond, header);
                self.resolve_block(body, header);
                if let Some(els) = els {
                    self.resolve_stmt(els, header);
                }
            }
            StmtKind::IncDec { x, .. } => self.resolve_expr(x, scope),
            StmtKind::Labeled { stmt, .. } => self.resolve_stmt(stmt, scope),
            StmtKind::Range {
                key,
                value,
                define,
                x,
                body,
            } => {
                self.resolve_expr(x, scope);
                let header = self.scopes.push(scope);
                for slot in [key, value] {
                    let Some(e) = slot else { continue };
                    match (&e.unparen().kind, define) {
                        (ExprKind::Ident(name), true) if name != "_" => {
                            let obj = self.objects.alloc(ObjKind::Var, name.clone());
                            self.defs.insert(e.id, obj);
                            let _ = self.scopes.declare(header, obj, &self.objects);
                        }
                        (ExprKind::Ident(name), _) if name == "_" => {}
                        _ => self.resolve_expr(e, header),
                    }
                }
                self.resolve_block(body, header);
            }
            StmtKind::Return { results } => {
                for e in results {
                    self.resolve_expr(e, scope);
                }
            }
            StmtKind::Switch { init, tag, cases } => {
                let header = self.scopes.push(scope);
                if let Some(init) = init {
                    self.resolve_stmt(init, header);
                }
                if let Some(tag) = tag {
                    self.resolve_expr(tag, header);
                }
                for case in cases {
                    let case_scope = self.scopes.push(header);
                    for e in &case.exprs {
                        self.resolve_expr(e, case_scope);
                    }
                    for s in &case.body {
                        self.resolve_stmt(s, case_scope);
                    }
                }
            }
            StmtKind::Go { call } => self.resolve_expr(call, scope),
        }
    }

    fn resolve_expr(&mut self, e: &Expr, scope: ScopeId) {
        match &e.kind {
            ExprKind::Bad | ExprKind::BasicLit { .. } => {}
            ExprKind::Ident(name) => {
                if name == "_" {
                    return;
                }
                match self.scopes.lookup(scope, name) {
                    Some(obj) => {
                        self.uses.insert(e.id, obj);
                    }
                    None => {
                        let mut d = Diagnostic::new(
                            format!("undefined: {}", name),
                            Some(e.span.clone()),
                        );
                        let candidates = self.scopes.visible_names(scope);
                        if let Some(h) = suggest::did_you_mean(name, &candidates) {
                            d = d.help(h);
                        }
                        self.diags.push_diag(d);
                    }
                }
            }
            ExprKind::CompositeLit { ty, elts } => {
                self.resolve_expr(ty, scope);
                for e in elts {
                    self.resolve_expr(e, scope);
                }
            }
            ExprKind::FuncLit {
                params,
                results,
                body,
            } => {
                let fn_scope = self.scopes.push(scope);
                self.resolve_signature(params, results, fn_scope);
                self.resolve_block(body, fn_scope);
            }
            ExprKind::Paren(inner)
            | ExprKind::Star(inner)
            | ExprKind::Ellipsis(inner) => self.resolve_expr(inner, scope),
            ExprKind::Selector { x, .. } => self.resolve_expr(x, scope),
            ExprKind::Index { x, index } => {
                self.resolve_expr(x, scope);
                self.resolve_expr(index, scope);
            }
            ExprKind::Slice { x, low, high } => {
                self.resolve_expr(x, scope);
                if let Some(low) = low {
                    self.resolve_expr(low, scope);
                }
                if let Some(high) = high {
                    self.resolve_expr(high, scope);
                }
            }
            ExprKind::TypeAssert { x, ty } => {
                self.resolve_expr(x, scope);
                self.resolve_expr(ty, scope);
            }
            ExprKind::Call { fun, args } => {
                self.resolve_expr(fun, scope);
                for a in args {
                    self.resolve_expr(a, scope);
                }
            }
            ExprKind::Unary { x, .. } => self.resolve_expr(x, scope),
            ExprKind::Binary { x, y, .. } => {
                self.resolve_expr(x, scope);
                self.resolve_expr(y, scope);
            }
            ExprKind::ArrayType { len, elt } => {
                if let Some(len) = len {
                    self.resolve_expr(len, scope);
                }
                self.resolve_expr(elt, scope);
            }
            ExprKind::StructType { fields } | ExprKind::InterfaceType { methods: fields } => {
                for field in fields {
                    self.resolve_expr(&field.ty, scope);
                }
            }
            ExprKind::FuncType { params, results } => {
                for field in params.iter().chain(results) {
                    self.resolve_expr(&field.ty, scope);
                }
            }
            ExprKind::MapType { key, value } => {
                self.resolve_expr(key, scope);
                self.resolve_expr(value, scope);
            }
            ExprKind::ChanType { elt, .. } => self.resolve_expr(elt, scope),
        }
    }

    // ----- object resolution -----

    fn check_obj(&mut self, obj: ObjId, cycle_ok: bool) {
        if self.objects.get(obj).typ.is_some() {
            // Already type checked.
            return;
        }
        trace!(name = %self.objects.get(obj).name, "resolving object");
        let kind = self.objects.get(obj).kind;
        let decl = self.objects.get(obj).decl.clone();
        match kind {
            ObjKind::Bad | ObjKind::Pkg => {}

            ObjKind::Con => {
                let Some(ObjDecl::Value(spec)) = decl else {
                    // true/false carry a type already; nil stays untyped.
                    return;
                };
                if let Some(ty_expr) = &spec.ty {
                    let t = self.make_type(ty_expr, cycle_ok);
                    for name in &spec.names {
                        if let Some(o) = self.defs.get(&name.id).copied() {
                            if self.objects.get(o).typ.is_none() {
                                self.objects.get_mut(o).typ = Some(t.clone());
                            }
                        }
                    }
                }
                for (i, name) in spec.names.iter().enumerate() {
                    if let Some(value) = spec.values.get(i) {
                        let assignee = self.defs.get(&name.id).copied();
                        self.check_expr(value, Some(&[assignee]));
                    }
                }
                if self.objects.get(obj).typ.is_none() {
                    self.objects.get_mut(obj).typ = Some(Type::bad("missing constant value"));
                }
            }

            ObjKind::Typ => {
                let name_id = self.table.alloc(obj);
                // Mark the object before recursing so cycles terminate.
                self.objects.get_mut(obj).typ = Some(Type::Named(name_id));
                let Some(ObjDecl::Type(spec)) = decl else {
                    self.table.get_mut(name_id).underlying =
                        Some(Type::bad("type without declaration"));
                    return;
                };
                let t = self.make_type(&spec.ty, cycle_ok);
                let under = self.table.underlying(&t);
                self.table.get_mut(name_id).underlying = Some(under);
                if let Some(mut methobjs) = self.methods.get(&obj).cloned() {
                    methobjs.sort_by(|a, b| {
                        self.objects.get(*a).name.cmp(&self.objects.get(*b).name)
                    });
                    self.table.get_mut(name_id).methods = methobjs.clone();
                    self.methods.insert(obj, methobjs.clone());
                    for m in methobjs {
                        self.check_obj(m, cycle_ok);
                    }
                }
            }

            ObjKind::Var => match decl {
                Some(ObjDecl::Value(spec)) => {
                    if let Some(ty_expr) = &spec.ty {
                        let t = self.make_type(ty_expr, cycle_ok);
                        for name in &spec.names {
                            if let Some(o) = self.defs.get(&name.id).copied() {
                                if self.objects.get(o).typ.is_none() {
                                    self.objects.get_mut(o).typ = Some(t.clone());
                                }
                            }
                        }
                    }
                    if spec.values.len() == 1 && spec.names.len() > 1 {
                        let assignees: Vec<Option<ObjId>> = spec
                            .names
                            .iter()
                            .map(|n| self.defs.get(&n.id).copied())
                            .collect();
                        self.check_expr(&spec.values[0], Some(&assignees));
                    } else if spec.values.len() == spec.names.len() {
                        for (i, name) in spec.names.iter().enumerate() {
                            let assignee = self.defs.get(&name.id).copied();
                            self.check_expr(&spec.values[i], Some(&[assignee]));
                        }
                    }
                    if self.objects.get(obj).typ.is_none() {
                        self.objects.get_mut(obj).typ =
                            Some(Type::bad("variable without type or value"));
                    }
                }
                Some(ObjDecl::Field(field)) => {
                    let t = self.make_type(&field.ty, cycle_ok);
                    for name in &field.names {
                        if let Some(o) = self.defs.get(&name.id).copied() {
                            if self.objects.get(o).typ.is_none() {
                                self.objects.get_mut(o).typ = Some(t.clone());
                            }
                        }
                    }
                    if self.objects.get(obj).typ.is_none() {
                        self.objects.get_mut(obj).typ = Some(t);
                    }
                }
                _ => {
                    self.objects.get_mut(obj).typ =
                        Some(Type::bad("variable used before its declaration"));
                }
            },

            ObjKind::Fun => {
                let Some(ObjDecl::Func(fd)) = decl else {
                    // Builtins carry no type; call sites dispatch on them.
                    return;
                };
                let ft = self.make_signature(&fd, cycle_ok);
                self.objects.get_mut(obj).typ = Some(ft);
                if fd.recv.is_none() {
                    if let Some(body) = &fd.body {
                        self.push_result_context(obj);
                        self.check_block_stmts(body);
                        self.result_stack.pop();
                    }
                }
            }
        }
    }

    // ----- type construction -----

    fn make_signature(&mut self, fd: &FuncDecl, cycle_ok: bool) -> Type {
        let recv = fd.recv.as_ref().map(|field| {
            if let Some(name) = field.names.first() {
                if let Some(o) = self.defs.get(&name.id).copied() {
                    self.check_obj(o, cycle_ok);
                    return o;
                }
            }
            let o = self.objects.alloc(ObjKind::Var, "_");
            let t = self.make_type(&field.ty, cycle_ok);
            self.objects.get_mut(o).typ = Some(t);
            o
        });
        let (params, is_variadic) = self.collect_params(&fd.params, true);
        let (results, _) = self.collect_params(&fd.results, true);
        Type::Func(FuncType {
            recv,
            params,
            results,
            is_variadic,
        })
    }

    fn collect_params(&mut self, fields: &[Field], cycle_ok: bool) -> (Vec<ObjId>, bool) {
        let mut objs = Vec::new();
        let mut is_variadic = false;
        for field in fields {
            let mut ty_expr = &field.ty;
            let mut variadic_here = false;
            if let ExprKind::Ellipsis(inner) = &ty_expr.kind {
                ty_expr = inner;
                variadic_here = true;
                is_variadic = true;
            }
            let mut t = self.make_type(ty_expr, cycle_ok);
            if variadic_here {
                t = Type::Slice { elt: Box::new(t) };
            }
            if field.names.is_empty() {
                let o = self.objects.alloc(ObjKind::Var, "");
                self.objects.get_mut(o).decl = Some(ObjDecl::Field(field.clone()));
                self.objects.get_mut(o).typ = Some(t.clone());
                objs.push(o);
            } else {
                for name in &field.names {
                    let o = self.defs.get(&name.id).copied().unwrap_or_else(|| {
                        let o = self.objects.alloc(ObjKind::Var, name.name.clone());
                        self.defs.insert(name.id, o);
                        o
                    });
                    if self.objects.get(o).decl.is_none() {
                        self.objects.get_mut(o).decl = Some(ObjDecl::Field(field.clone()));
                    }
                    if self.objects.get(o).typ.is_none() {
                        self.objects.get_mut(o).typ = Some(t.clone());
                    }
                    objs.push(o);
                }
            }
        }
        (objs, is_variadic)
    }

    fn collect_struct(&mut self, fields: &[Field], cycle_ok: bool) -> Type {
        let mut objs = Vec::new();
        let mut tags = Vec::new();
        for field in fields {
            let t = self.make_type(&field.ty, cycle_ok);
            let tag = field.tag.clone().unwrap_or_default();
            if field.names.is_empty() {
                tags.push(tag);
                let o = self.objects.alloc(ObjKind::Var, "");
                self.objects.get_mut(o).decl = Some(ObjDecl::Field(field.clone()));
                self.objects.get_mut(o).typ = Some(t);
                objs.push(o);
            } else {
                for name in &field.names {
                    let o = self.objects.alloc(ObjKind::Var, name.name.clone());
                    self.objects.get_mut(o).decl = Some(ObjDecl::Field(field.clone()));
                    self.objects.get_mut(o).typ = Some(t.clone());
                    self.defs.insert(name.id, o);
                    objs.push(o);
                    tags.push(tag.clone());
                }
            }
        }

        let mut field_indices = HashMap::new();
        for (i, &f) in objs.iter().enumerate() {
            let obj = self.objects.get(f);
            if obj.name.is_empty() {
                // Embedded fields are keyed by the embedded type's name,
                // with one pointer indirection allowed.
                let mut t = obj.typ.clone().unwrap_or_else(|| Type::bad("missing type"));
                if let Type::Pointer { base } = t {
                    t = *base;
                }
                match t {
                    Type::Named(nid) => {
                        let name = self.objects.get(self.table.get(nid).obj).name.clone();
                        field_indices.insert(name, i);
                    }
                    Type::Basic(k) => {
                        field_indices.insert(k.name().to_string(), i);
                    }
                    Type::Bad { .. } => {}
                    _ => {
                        let span = fields
                            .iter()
                            .find(|f| f.names.is_empty())
                            .map(|f| f.span.clone())
                            .unwrap_or_default();
                        self.error(&span, "invalid embedded field type");
                    }
                }
            } else if obj.name != "_" {
                field_indices.insert(obj.name.clone(), i);
            }
        }
        Type::Struct(StructType {
            fields: objs,
            tags,
            field_indices,
        })
    }

    fn collect_interface(&mut self, fields: &[Field], cycle_ok: bool) -> Type {
        let mut methods: Vec<ObjId> = Vec::new();
        for field in fields {
            let t = self.make_type(&field.ty, cycle_ok);
            if field.names.is_empty() {
                match self.table.underlying(&t) {
                    Type::Interface { methods: embedded } => methods.extend(embedded),
                    Type::Bad { .. } => {}
                    _ => {
                        self.error(
                            &field.span,
                            "interface contains embedded non-interface type",
                        );
                    }
                }
            } else {
                for name in &field.names {
                    let o = self.objects.alloc(ObjKind::Fun, name.name.clone());
                    self.objects.get_mut(o).decl = Some(ObjDecl::Field(field.clone()));
                    self.objects.get_mut(o).typ = Some(t.clone());
                    self.defs.insert(name.id, o);
                    methods.push(o);
                }
            }
        }
        methods.sort_by(|a, b| self.objects.get(*a).name.cmp(&self.objects.get(*b).name));
        Type::Interface { methods }
    }

    fn const_length(&mut self, e: &Expr) -> u64 {
        let e = e.unparen();
        match &e.kind {
            ExprKind::BasicLit {
                kind: LitKind::Int,
                value,
            } => match value.parse::<u64>() {
                Ok(n) => n,
                Err(_) => {
                    self.error(&e.span, "invalid array length");
                    0
                }
            },
            ExprKind::Ident(_) => {
                if let Some(obj) = self.ident_obj(e.id) {
                    self.check_obj(obj, true);
                    if self.objects.get(obj).kind == ObjKind::Con {
                        if let Some(ObjDecl::Value(spec)) = self.objects.get(obj).decl.clone() {
                            let name = &self.objects.get(obj).name;
                            if let Some(i) = spec.names.iter().position(|n| &n.name == name) {
                                if let Some(v) = spec.values.get(i) {
                                    return self.const_length(v);
                                }
                            }
                        }
                    }
                }
                self.error(&e.span, "array length must be a constant integer");
                0
            }
            _ => {
                self.error(&e.span, "array length must be a constant integer");
                0
            }
        }
    }

    /// Build a type from a type expression. With `cycle_ok` unset, a named
    /// type whose underlying is still being computed is an illegal cycle;
    /// element positions that introduce indirection always accept cycles.
    fn make_type(&mut self, x: &Expr, cycle_ok: bool) -> Type {
        match &x.kind {
            ExprKind::Bad => Type::bad("bad expression"),

            ExprKind::Ident(name) => {
                let Some(obj) = self.ident_obj(x.id) else {
                    // Resolution already reported this one.
                    return Type::bad("unresolved identifier");
                };
                if self.objects.get(obj).kind != ObjKind::Typ {
                    return self.bad(&x.span, format!("{} is not a type", name));
                }
                self.check_obj(obj, cycle_ok);
                let t = self
                    .objects
                    .get(obj)
                    .typ
                    .clone()
                    .unwrap_or_else(|| Type::bad("unresolved type"));
                if !cycle_ok {
                    if let Type::Named(nid) = &t {
                        if self.table.in_progress(*nid) {
                            return self.bad(
                                &x.span,
                                format!("illegal cycle in declaration of {}", name),
                            );
                        }
                    }
                }
                t
            }

            ExprKind::Paren(inner) => self.make_type(inner, cycle_ok),

            ExprKind::Selector { x: base, sel } => {
                if let ExprKind::Ident(pkg_name) = &base.unparen().kind {
                    if let Some(obj) = self.ident_obj(base.id) {
                        if self.objects.get(obj).kind != ObjKind::Pkg {
                            return self.bad(
                                &base.span,
                                format!("{} is not a package", pkg_name),
                            );
                        }
                        match self.objects.get(obj).data.clone() {
                            ObjData::PkgScope(scope) => {
                                let Some(member) = self.scopes.lookup_local(scope, &sel.name)
                                else {
                                    return self.bad(
                                        &sel.span,
                                        format!("undefined: {}.{}", pkg_name, sel.name),
                                    );
                                };
                                if self.objects.get(member).kind != ObjKind::Typ {
                                    return self.bad(
                                        &sel.span,
                                        format!("{}.{} is not a type", pkg_name, sel.name),
                                    );
                                }
                                self.uses.insert(sel.id, member);
                                self.check_obj(member, cycle_ok);
                                return self
                                    .objects
                                    .get(member)
                                    .typ
                                    .clone()
                                    .unwrap_or_else(|| Type::bad("unresolved type"));
                            }
                            _ => {
                                return self.bad(
                                    &sel.span,
                                    format!("undefined: {}.{}", pkg_name, sel.name),
                                );
                            }
                        }
                    }
                }
                self.bad(&x.span, "expected qualified identifier")
            }

            ExprKind::Star(inner) => Type::Pointer {
                base: Box::new(self.make_type(inner, true)),
            },

            ExprKind::ArrayType { len: Some(len), elt } => Type::Array {
                len: self.const_length(len),
                elt: Box::new(self.make_type(elt, cycle_ok)),
            },
            ExprKind::ArrayType { len: None, elt } => Type::Slice {
                elt: Box::new(self.make_type(elt, true)),
            },

            ExprKind::StructType { fields } => self.collect_struct(fields, cycle_ok),

            ExprKind::FuncType { params, results } => {
                let (params, is_variadic) = self.collect_params(params, true);
                let (results, _) = self.collect_params(results, true);
                Type::Func(FuncType {
                    recv: None,
                    params,
                    results,
                    is_variadic,
                })
            }

            ExprKind::InterfaceType { methods } => self.collect_interface(methods, cycle_ok),

            ExprKind::MapType { key, value } => Type::Map {
                key: Box::new(self.make_type(key, true)),
                elt: Box::new(self.make_type(value, true)),
            },

            ExprKind::ChanType { dir, elt } => Type::Chan {
                dir: *dir,
                elt: Box::new(self.make_type(elt, true)),
            },

            _ => self.bad(&x.span, "expected type expression"),
        }
    }

    fn is_type_expr(&self, x: &Expr) -> bool {
        match &x.kind {
            ExprKind::Ident(_) => self
                .ident_obj(x.id)
                .map(|o| self.objects.get(o).kind == ObjKind::Typ)
                .unwrap_or(false),
            ExprKind::Paren(inner) | ExprKind::Star(inner) => self.is_type_expr(inner),
            ExprKind::Selector { x: base, sel } => {
                if let Some(obj) = self.ident_obj(base.id) {
                    if let ObjData::PkgScope(scope) = &self.objects.get(obj).data {
                        return self
                            .scopes
                            .lookup_local(*scope, &sel.name)
                            .map(|m| self.objects.get(m).kind == ObjKind::Typ)
                            .unwrap_or(false);
                    }
                }
                false
            }
            ExprKind::ArrayType { .. }
            | ExprKind::StructType { .. }
            | ExprKind::FuncType { .. }
            | ExprKind::InterfaceType { .. }
            | ExprKind::MapType { .. }
            | ExprKind::ChanType { .. } => true,
            _ => false,
        }
    }

    // ----- expression checking -----

    fn propagate_single(&mut self, assignees: Option<&[Option<ObjId>]>, t: &Type) {
        if let Some([Some(obj)]) = assignees {
            if self.objects.get(*obj).typ.is_none() {
                self.objects.get_mut(*obj).typ = Some(t.clone());
            }
        }
    }

    /// Fill `(value, ok)` destination slots.
    fn propagate_pair(&mut self, assignees: Option<&[Option<ObjId>]>, value: &Type) {
        let Some(slots) = assignees else { return };
        if slots.len() < 2 {
            return;
        }
        if let Some(obj) = slots[0] {
            if self.objects.get(obj).typ.is_none() {
                self.objects.get_mut(obj).typ = Some(value.clone());
            }
        }
        if let Some(obj) = slots[1] {
            if self.objects.get(obj).typ.is_none() {
                self.objects.get_mut(obj).typ = Some(Type::Basic(BasicKind::Bool));
            }
        }
    }

    /// Check an expression in operand position, mapping "no value" to a
    /// silent `Bad` the caller can short-circuit on.
    fn check_operand(&mut self, x: &Expr) -> Type {
        self.check_expr(x, None)
            .unwrap_or_else(|| Type::bad("expression has no value"))
    }

    /// Check an expression, memoize its type, and propagate it into a
    /// single untyped assignee. `None` means the expression produces no
    /// value (void call) or a multi-value tuple consumed by its assignees.
    fn check_expr(&mut self, x: &Expr, assignees: Option<&[Option<ObjId>]>) -> Option<Type> {
        if let Some(t) = self.expr_types.get(&x.id).cloned() {
            // Repeat-constant groups share value nodes; assignees still
            // need the memoized type.
            self.propagate_single(assignees, &t);
            return Some(t);
        }
        let t = self.check_expr_inner(x, assignees)?;
        self.expr_types.insert(x.id, t.clone());
        self.propagate_single(assignees, &t);
        Some(t)
    }

    fn check_expr_inner(
        &mut self,
        x: &Expr,
        assignees: Option<&[Option<ObjId>]>,
    ) -> Option<Type> {
        match &x.kind {
            ExprKind::Bad => Some(Type::bad("bad expression")),

            ExprKind::Ident(name) => {
                let Some(obj) = self.ident_obj(x.id) else {
                    // Resolution already reported this one.
                    return Some(Type::bad("unresolved identifier"));
                };
                let o = self.objects.get(obj);
                if o.is_builtin() {
                    return Some(self.bad(&x.span, format!("{} must be called", name)));
                }
                if o.kind == ObjKind::Con && name == "nil" && o.decl.is_none() {
                    return Some(Type::bad("untyped nil"));
                }
                if !matches!(o.kind, ObjKind::Var | ObjKind::Con | ObjKind::Fun) {
                    return Some(self.bad(
                        &x.span,
                        format!("{} is neither a function, variable nor constant", name),
                    ));
                }
                self.check_obj(obj, true);
                Some(
                    self.objects
                        .get(obj)
                        .typ
                        .clone()
                        .unwrap_or_else(|| Type::bad("unresolved object")),
                )
            }

            ExprKind::BasicLit { kind, .. } => Some(Type::Basic(match kind {
                LitKind::Int => BasicKind::UntypedInt,
                LitKind::Float => BasicKind::UntypedFloat,
                LitKind::Imag => BasicKind::UntypedComplex,
                LitKind::Char => BasicKind::UntypedRune,
                LitKind::Str => BasicKind::String,
            })),

            ExprKind::CompositeLit { ty, elts } => {
                let t = self.make_type(ty, true);
                for e in elts {
                    self.check_expr(e, None);
                }
                Some(t)
            }

            ExprKind::Binary { op, x: xe, y: ye } => {
                let xt = self.check_operand(xe);
                let yt = self.check_operand(ye);
                if xt.is_bad() {
                    return Some(xt);
                }
                if yt.is_bad() {
                    return Some(yt);
                }
                if op.is_comparison() {
                    return Some(Type::Basic(BasicKind::Bool));
                }
                if op.is_shift() {
                    return Some(Type::Basic(BasicKind::Int));
                }
                let xp = match &xt {
                    Type::Basic(k) => untyped_priority(*k),
                    _ => None,
                };
                let yp = match &yt {
                    Type::Basic(k) => untyped_priority(*k),
                    _ => None,
                };
                match (xp, yp) {
                    (Some(px), Some(py)) => {
                        // Both untyped: the kind later in the sequence
                        // integer, rune, float, complex wins and the other
                        // operand is re-typed to match.
                        if px >= py {
                            self.expr_types.insert(ye.id, xt.clone());
                            Some(xt)
                        } else {
                            self.expr_types.insert(xe.id, yt.clone());
                            Some(yt)
                        }
                    }
                    (Some(_), None) => {
                        self.expr_types.insert(xe.id, yt.clone());
                        Some(yt)
                    }
                    (None, Some(_)) => {
                        self.expr_types.insert(ye.id, xt.clone());
                        Some(xt)
                    }
                    (None, None) => Some(xt),
                }
            }

            ExprKind::Unary { op, x: xe } => {
                let t = self.check_operand(xe);
                if t.is_bad() {
                    return Some(t);
                }
                match op {
                    UnaryOp::Pos | UnaryOp::Neg | UnaryOp::Not | UnaryOp::Complement => Some(t),
                    UnaryOp::Addr => Some(Type::Pointer { base: Box::new(t) }),
                    UnaryOp::Recv => match self.table.underlying(&t) {
                        Type::Chan { elt, .. } => {
                            self.propagate_pair(assignees, &elt);
                            Some(*elt)
                        }
                        _ => Some(self.bad(&x.span, "cannot receive from non-channel")),
                    },
                }
            }

            ExprKind::Star(inner) => {
                let t = self.check_operand(inner);
                if t.is_bad() {
                    return Some(t);
                }
                match self.table.underlying(&t) {
                    Type::Pointer { base } => Some(*base),
                    _ => Some(self.bad(&x.span, "cannot dereference non-pointer")),
                }
            }

            ExprKind::Call { fun, args } => self.check_call(x, fun, args, assignees),

            ExprKind::Selector { x: base, sel } => self.check_selector(x, base, sel),

            ExprKind::Index { x: xe, index } => {
                self.check_expr(index, None);
                let ct = self.check_operand(xe);
                match self.table.underlying(&ct) {
                    Type::Bad { .. } => Some(ct),
                    Type::Pointer { base } => match self.table.underlying(&base) {
                        Type::Array { elt, .. } => Some(*elt),
                        _ => Some(
                            self.bad(&x.span, "attempted to index a pointer to non-array type"),
                        ),
                    },
                    Type::Array { elt, .. } => Some(*elt),
                    Type::Slice { elt } => Some(*elt),
                    Type::Map { key, elt } => {
                        if self
                            .expr_types
                            .get(&index.id)
                            .map(|t| t.is_untyped())
                            .unwrap_or(false)
                        {
                            self.expr_types.insert(index.id, (*key).clone());
                        }
                        self.propagate_pair(assignees, &elt);
                        Some(*elt)
                    }
                    Type::Basic(BasicKind::String) => Some(Type::Basic(BasicKind::Uint8)),
                    other => {
                        let shown = self.type_str(&other);
                        Some(self.bad(
                            &x.span,
                            format!("{} type does not support indexing", shown),
                        ))
                    }
                }
            }

            ExprKind::Paren(inner) => self.check_expr(inner, assignees),

            ExprKind::TypeAssert { x: xe, ty } => {
                self.check_expr(xe, None);
                let to = self.make_type(ty, true);
                self.propagate_pair(assignees, &to);
                Some(to)
            }

            ExprKind::Slice { x: xe, low, high } => {
                if let Some(low) = low {
                    self.check_expr(low, None);
                }
                if let Some(high) = high {
                    self.check_expr(high, None);
                }
                let lhs = self.check_operand(xe);
                match self.table.underlying(&lhs) {
                    Type::Pointer { base } => match self.table.underlying(&base) {
                        Type::Array { elt, .. } => Some(Type::Slice { elt }),
                        _ => Some(self.bad(&x.span, "invalid type for slice expression")),
                    },
                    Type::Array { elt, .. } => Some(Type::Slice { elt }),
                    Type::Slice { .. } => Some(lhs),
                    Type::Basic(BasicKind::String) => Some(lhs),
                    _ => Some(self.bad(&x.span, "invalid type for slice expression")),
                }
            }

            ExprKind::FuncLit {
                params,
                results,
                body,
            } => {
                let (params, is_variadic) = self.collect_params(params, false);
                let (results, _) = self.collect_params(results, false);
                let ft = FuncType {
                    recv: None,
                    params,
                    results,
                    is_variadic,
                };
                self.result_stack.push(
                    ft.results
                        .iter()
                        .map(|r| self.objects.get(*r).typ.clone())
                        .collect(),
                );
                self.check_block_stmts(body);
                self.result_stack.pop();
                Some(Type::Func(ft))
            }

            _ => Some(self.bad(&x.span, "type used as expression")),
        }
    }

    fn check_call(
        &mut self,
        x: &Expr,
        fun: &Expr,
        args: &[Expr],
        assignees: Option<&[Option<ObjId>]>,
    ) -> Option<Type> {
        // A type expression applied to one argument is a conversion.
        if args.len() == 1 && self.is_type_expr(fun) {
            let t = self.make_type(fun, true);
            self.check_expr(&args[0], None);
            return Some(t);
        }

        // unsafe.Sizeof / Alignof / Offsetof.
        if let ExprKind::Selector { x: base, sel } = &fun.kind {
            if let Some(obj) = self.ident_obj(base.id) {
                if matches!(self.objects.get(obj).data, ObjData::UnsafePkg) {
                    match sel.name.as_str() {
                        "Sizeof" | "Alignof" | "Offsetof" => {
                            if sel.name == "Offsetof" {
                                if let Some(arg) = args.first() {
                                    if !matches!(arg.unparen().kind, ExprKind::Selector { .. }) {
                                        return Some(self.bad(
                                            &arg.span,
                                            format!("invalid expression unsafe.{}", sel.name),
                                        ));
                                    }
                                }
                            }
                            if args.is_empty() {
                                return Some(self.bad(
                                    &x.span,
                                    format!("missing argument for unsafe.{}", sel.name),
                                ));
                            }
                            if args.len() > 1 {
                                return Some(self.bad(
                                    &x.span,
                                    format!("extra arguments for unsafe.{}", sel.name),
                                ));
                            }
                            self.check_expr(&args[0], None);
                            return Some(Type::Basic(BasicKind::Uintptr));
                        }
                        _ => {
                            return Some(
                                self.bad(&sel.span, format!("undefined: unsafe.{}", sel.name)),
                            );
                        }
                    }
                }
            }
        }

        if let ExprKind::Ident(name) = &fun.unparen().kind {
            if let Some(obj) = self.ident_obj(fun.unparen().id) {
                if self.objects.get(obj).is_builtin() {
                    let name = name.clone();
                    return self.check_builtin_call(x, &name, args);
                }
                if self.objects.get(obj).kind == ObjKind::Typ {
                    // Conversion through a named type; arity checked here
                    // because the one-argument fast path missed.
                    self.check_obj(obj, false);
                    if args.len() != 1 {
                        self.error(&x.span, "type conversion requires exactly one argument");
                    }
                    for arg in args {
                        self.check_expr(arg, None);
                    }
                    return Some(
                        self.objects
                            .get(obj)
                            .typ
                            .clone()
                            .unwrap_or_else(|| Type::bad("unresolved type")),
                    );
                }
            }
        }

        let fun_t = self.check_operand(fun);
        if fun_t.is_bad() {
            return Some(fun_t);
        }
        let ft = match self.table.underlying(&fun_t) {
            Type::Func(ft) => ft,
            _ => return Some(self.bad(&x.span, "cannot call non-function")),
        };

        // Arity against the declared signature.
        let fixed = if ft.is_variadic {
            ft.params.len().saturating_sub(1)
        } else {
            ft.params.len()
        };
        if args.len() < fixed {
            self.error(&x.span, "not enough arguments in call");
        } else if !ft.is_variadic && args.len() > ft.params.len() {
            self.error(&x.span, "too many arguments in call");
        }

        for (i, arg) in args.iter().enumerate() {
            let param_ty = if i < fixed {
                ft.params.get(i).and_then(|p| self.objects.get(*p).typ.clone())
            } else if ft.is_variadic {
                ft.params.last().and_then(|p| {
                    match self.objects.get(*p).typ.clone() {
                        Some(Type::Slice { elt }) => Some(*elt),
                        other => other,
                    }
                })
            } else {
                None
            };
            let at = self.check_operand(arg);
            if let Some(pt) = param_ty {
                if at.is_untyped() && !pt.is_untyped() && !pt.is_bad() {
                    // Pin the literal to the parameter's type.
                    self.expr_types.insert(arg.id, pt);
                }
            }
        }

        for r in &ft.results {
            self.check_obj(*r, false);
        }
        if let Some(slots) = assignees {
            if slots.len() > 1 {
                for (i, r) in ft.results.iter().enumerate() {
                    if let Some(Some(obj)) = slots.get(i) {
                        if self.objects.get(*obj).typ.is_none() {
                            self.objects.get_mut(*obj).typ = self.objects.get(*r).typ.clone();
                        }
                    }
                }
            }
        }
        if ft.results.len() == 1 {
            return Some(
                self.objects
                    .get(ft.results[0])
                    .typ
                    .clone()
                    .unwrap_or_else(|| Type::bad("unresolved result")),
            );
        }
        None
    }

    fn check_builtin_call(&mut self, x: &Expr, name: &str, args: &[Expr]) -> Option<Type> {
        let arity = |c: &mut Self, want: usize| -> bool {
            if args.len() < want {
                c.error(&x.span, format!("not enough arguments in call to {}", name));
                false
            } else if args.len() > want {
                c.error(&x.span, format!("too many arguments in call to {}", name));
                false
            } else {
                true
            }
        };
        match name {
            "len" => {
                if arity(self, 1) {
                    self.check_expr(&args[0], None);
                }
                Some(Type::Basic(BasicKind::Int))
            }
            "copy" => {
                if arity(self, 2) {
                    self.check_expr(&args[0], None);
                    self.check_expr(&args[1], None);
                }
                Some(Type::Basic(BasicKind::Int))
            }
            "delete" => {
                if !arity(self, 2) {
                    return None;
                }
                let m = self.check_operand(&args[0]);
                match self.table.underlying(&m) {
                    Type::Map { key, .. } => {
                        let kt = self.check_operand(&args[1]);
                        if kt.is_untyped() {
                            self.expr_types.insert(args[1].id, *key);
                        }
                        None
                    }
                    Type::Bad { .. } => None,
                    _ => {
                        self.error(&x.span, "delete must be called with a map type");
                        None
                    }
                }
            }
            "make" => {
                if args.is_empty() {
                    self.error(&x.span, format!("not enough arguments in call to {}", name));
                    return Some(Type::bad("missing make argument"));
                }
                let t = self.make_type(&args[0], true);
                for arg in &args[1..] {
                    self.check_expr(arg, None);
                }
                Some(t)
            }
            "new" => {
                if !arity(self, 1) {
                    return Some(Type::bad("invalid new call"));
                }
                let t = self.make_type(&args[0], true);
                Some(Type::Pointer { base: Box::new(t) })
            }
            "print" | "println" => {
                for arg in args {
                    self.check_expr(arg, None);
                }
                None
            }
            "real" | "imag" => {
                if !arity(self, 1) {
                    return Some(Type::bad("invalid call"));
                }
                let at = self.check_operand(&args[0]);
                match self.table.underlying(&at) {
                    Type::Basic(BasicKind::Complex64) => Some(Type::Basic(BasicKind::Float32)),
                    Type::Basic(BasicKind::Complex128) => Some(Type::Basic(BasicKind::Float64)),
                    Type::Basic(BasicKind::UntypedComplex) => {
                        Some(Type::Basic(BasicKind::UntypedFloat))
                    }
                    Type::Bad { .. } => Some(at),
                    _ => Some(self.bad(
                        &x.span,
                        format!("{} must be called with a complex type", name),
                    )),
                }
            }
            "panic" => {
                if arity(self, 1) {
                    self.check_expr(&args[0], None);
                }
                None
            }
            _ => Some(self.bad(&x.span, format!("internal error: unhandled builtin {}", name))),
        }
    }

    fn check_selector(&mut self, x: &Expr, base: &Expr, sel: &Ident) -> Option<Type> {
        // Qualified identifier through a package object.
        if let ExprKind::Ident(pkg_name) = &base.unparen().kind {
            if let Some(obj) = self.ident_obj(base.id) {
                if self.objects.get(obj).kind == ObjKind::Pkg {
                    match self.objects.get(obj).data.clone() {
                        ObjData::PkgScope(scope) => {
                            let Some(member) = self.scopes.lookup_local(scope, &sel.name) else {
                                return Some(self.bad(
                                    &sel.span,
                                    format!("undefined: {}.{}", pkg_name, sel.name),
                                ));
                            };
                            self.uses.insert(x.id, member);
                            self.check_obj(member, false);
                            return Some(
                                self.objects
                                    .get(member)
                                    .typ
                                    .clone()
                                    .unwrap_or_else(|| Type::bad("unresolved object")),
                            );
                        }
                        _ => {
                            return Some(self.bad(
                                &sel.span,
                                format!("undefined: {}.{}", pkg_name, sel.name),
                            ));
                        }
                    }
                }
            }
        }

        let name = sel.name.clone();
        let t = self.check_operand(base);
        if t.is_bad() {
            return Some(t);
        }

        let mut resolved: Option<(ObjId, Option<Vec<SelStep>>)> = None;

        if let Type::Interface { methods } = self.table.underlying(&t) {
            let hit = methods
                .binary_search_by(|m| self.objects.get(*m).name.as_str().cmp(name.as_str()));
            if let Ok(i) = hit {
                resolved = Some((methods[i], None));
            }
        } else {
            // Breadth-first over embedded fields: the full breadth of each
            // level is searched before descending, and more than one match
            // on a level is an ambiguity.
            let mut curr: Vec<(Type, Vec<SelStep>)> = vec![(t.clone(), Vec::new())];
            while resolved.is_none() && !curr.is_empty() {
                let mut found = 0usize;
                let mut next: Vec<(Type, Vec<SelStep>)> = Vec::new();
                for (mut ty, mut path) in curr {
                    // Selectors look through pointers to structs; pointer
                    // types cannot themselves carry methods.
                    if let Type::Pointer { base } = self.table.underlying(&ty) {
                        if matches!(self.table.underlying(&base), Type::Struct(_)) {
                            ty = *base;
                            path.push(SelStep::Deref);
                        }
                    }

                    if let Type::Named(nid) = &ty {
                        let methods = self.table.get(*nid).methods.clone();
                        let hit = methods.binary_search_by(|m| {
                            self.objects.get(*m).name.as_str().cmp(name.as_str())
                        });
                        if let Ok(i) = hit {
                            resolved = Some((methods[i], None));
                            found += 1;
                        }
                    }

                    if let Type::Struct(s) = self.table.underlying(&ty) {
                        if let Some(&i) = s.field_indices.get(&name) {
                            let mut p = path.clone();
                            p.push(SelStep::Field(i));
                            resolved = Some((s.fields[i], Some(p)));
                            found += 1;
                        } else {
                            for (i, f) in s.fields.iter().enumerate() {
                                if self.objects.get(*f).name.is_empty() {
                                    self.check_obj(*f, false);
                                    if let Some(ft) = self.objects.get(*f).typ.clone() {
                                        let mut p = path.clone();
                                        p.push(SelStep::Field(i));
                                        next.push((ft, p));
                                    }
                                }
                            }
                        }
                    }
                }
                if found > 1 {
                    let shown = self.type_str(&t);
                    return Some(self.bad(
                        &x.span,
                        format!("ambiguous selector {}.{}", shown, name),
                    ));
                }
                curr = next;
            }
        }

        match resolved {
            Some((obj, path)) => {
                self.uses.insert(x.id, obj);
                if let Some(path) = path {
                    self.selections.insert(x.id, path);
                }
                self.check_obj(obj, false);
                Some(
                    self.objects
                        .get(obj)
                        .typ
                        .clone()
                        .unwrap_or_else(|| Type::bad("unresolved object")),
                )
            }
            None => {
                let shown = self.type_str(&t);
                Some(self.bad(
                    &x.span,
                    format!("failed to resolve selector {}.{}", shown, name),
                ))
            }
        }
    }

    // ----- statement checking -----

    fn check_block_stmts(&mut self, block: &Block) {
        for stmt in &block.stmts {
            self.check_stmt(stmt);
        }
    }

    fn check_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Empty | StmtKind::Branch(_) => {}

            StmtKind::Assign { lhs, rhs, .. } => {
                if rhs.len() == 1 {
                    let assignees: Vec<Option<ObjId>> = lhs
                        .iter()
                        .map(|e| match &e.unparen().kind {
                            ExprKind::Ident(name) if name != "_" => self.ident_obj(e.id),
                            ExprKind::Ident(_) => None,
                            _ => {
                                self.check_expr(e, None);
                                None
                            }
                        })
                        .collect();
                    self.check_expr(&rhs[0], Some(&assignees));
                } else {
                    for (i, r) in rhs.iter().enumerate() {
                        match lhs.get(i).map(|e| e.unparen()) {
                            Some(l) => match &l.kind {
                                ExprKind::Ident(name) if name != "_" => {
                                    let assignee = self.ident_obj(l.id);
                                    self.check_expr(r, Some(&[assignee]));
                                }
                                ExprKind::Ident(_) => {
                                    self.check_expr(r, None);
                                }
                                _ => {
                                    self.check_expr(l, None);
                                    self.check_expr(r, None);
                                }
                            },
                            None => {
                                self.check_expr(r, None);
                            }
                        }
                    }
                }
            }

            StmtKind::Block(b) => self.check_block_stmts(b),

            StmtKind::Expr(e) => {
                self.check_expr(e, None);
            }

            StmtKind::Decl(gen) => {
                for spec in &gen.specs {
                    match spec {
                        Spec::Value(vs) => {
                            for name in &vs.names {
                                if let Some(obj) = self.defs.get(&name.id).copied() {
                                    self.check_obj(obj, true);
                                }
                            }
                        }
                        Spec::Type(ts) => {
                            if let Some(obj) = self.defs.get(&ts.name.id).copied() {
                                self.check_obj(obj, true);
                            }
                        }
                    }
                }
            }

            StmtKind::For {
                init,
                cond,
                post,
                body,
            } => {
                if let Some(init) = init {
                    self.check_stmt(init);
                }
                if let Some(cond) = cond {
                    self.check_expr(cond, None);
                }
                if let Some(post) = post {
                    self.check_stmt(post);
                }
                self.check_block_stmts(body);
            }

            StmtKind::If {
                init,
                cond,
                body,
                els,
            } => {
                if let Some(init) = init {
                    self.check_stmt(init);
                }
                self.check_expr(cond, None);
                self.check_block_stmts(body);
                if let Some(els) = els {
                    self.check_stmt(els);
                }
            }

            StmtKind::IncDec { x, .. } => {
                self.check_expr(x, None);
            }

            StmtKind::Labeled { stmt, .. } => self.check_stmt(stmt),

            StmtKind::Range {
                key,
                value,
                x,
                body,
                ..
            } => {
                let ct = self.check_operand(x);
                let (k, v): (Type, Option<Type>) = match self.table.underlying(&ct) {
                    Type::Pointer { base } => match self.table.underlying(&base) {
                        Type::Array { elt, .. } => (Type::Basic(BasicKind::Int), Some(*elt)),
                        _ => {
                            self.error(&stmt.span, "invalid type for range");
                            return;
                        }
                    },
                    Type::Array { elt, .. } | Type::Slice { elt } => {
                        (Type::Basic(BasicKind::Int), Some(*elt))
                    }
                    Type::Map { key, elt } => (*key, Some(*elt)),
                    Type::Chan { elt, .. } => {
                        if value.is_some() {
                            self.error(&stmt.span, "too many variables in range");
                            return;
                        }
                        (*elt, None)
                    }
                    Type::Bad { .. } => return,
                    _ => {
                        self.error(&stmt.span, "invalid type for range");
                        return;
                    }
                };

                if let Some(e) = key {
                    self.bind_range_var(e, &k);
                }
                if let (Some(e), Some(v)) = (value, &v) {
                    self.bind_range_var(e, v);
                }
                self.check_block_stmts(body);
            }

            StmtKind::Return { results } => {
                let declared = self.result_stack.last().cloned().unwrap_or_default();
                for (i, e) in results.iter().enumerate() {
                    let t = self.check_expr(e, None);
                    if results.len() == declared.len() {
                        if let (Some(t), Some(Some(want))) = (t, declared.get(i)) {
                            if t.is_untyped() && !want.is_untyped() && !want.is_bad() {
                                self.expr_types.insert(e.id, want.clone());
                            }
                        }
                    }
                }
            }

            StmtKind::Switch { init, tag, cases } => {
                if let Some(init) = init {
                    self.check_stmt(init);
                }
                // An omitted tag behaves as the constant true.
                if let Some(tag) = tag {
                    self.check_expr(tag, None);
                }
                for case in cases {
                    for e in &case.exprs {
                        self.check_expr(e, None);
                    }
                    for s in &case.body {
                        self.check_stmt(s);
                    }
                }
            }

            StmtKind::Go { call } => {
                if !matches!(call.unparen().kind, ExprKind::Call { .. }) {
                    self.error(&stmt.span, "expression in go must be function call");
                }
                self.check_expr(call, None);
            }
        }
    }

    fn bind_range_var(&mut self, e: &Expr, t: &Type) {
        match &e.unparen().kind {
            ExprKind::Ident(name) if name == "_" => {}
            ExprKind::Ident(_) => match self.ident_obj(e.id) {
                Some(obj) if self.objects.get(obj).typ.is_none() => {
                    self.objects.get_mut(obj).typ = Some(t.clone());
                    self.expr_types.insert(e.id, t.clone());
                }
                _ => {
                    self.check_expr(e, None);
                }
            },
            _ => {
                self.check_expr(e, None);
            }
        }
    }
}
