//! AST construction helpers standing in for the external parser.

#![allow(dead_code)]

use std::cell::Cell;

use gofront::frontend::ast::*;

pub struct Ast {
    next: Cell<usize>,
}

impl Ast {
    pub fn new() -> Ast {
        Ast { next: Cell::new(0) }
    }

    fn fresh(&self) -> (ExprId, Span) {
        let id = self.next.get();
        self.next.set(id + 1);
        // Distinct positions keep diagnostics from collapsing in dedup.
        let span = Span {
            start: id,
            end: id + 1,
            line: id + 1,
            column: 1,
        };
        (id, span)
    }

    pub fn expr(&self, kind: ExprKind) -> Expr {
        let (id, span) = self.fresh();
        Expr::new(id, kind, span)
    }

    pub fn name(&self, s: &str) -> Ident {
        let (id, span) = self.fresh();
        Ident {
            id,
            name: s.to_string(),
            span,
        }
    }

    pub fn ident(&self, s: &str) -> Expr {
        self.expr(ExprKind::Ident(s.to_string()))
    }

    pub fn int(&self, v: i64) -> Expr {
        self.expr(ExprKind::BasicLit {
            kind: LitKind::Int,
            value: v.to_string(),
        })
    }

    pub fn float(&self, v: &str) -> Expr {
        self.expr(ExprKind::BasicLit {
            kind: LitKind::Float,
            value: v.to_string(),
        })
    }

    pub fn str_lit(&self, s: &str) -> Expr {
        self.expr(ExprKind::BasicLit {
            kind: LitKind::Str,
            value: s.to_string(),
        })
    }

    pub fn star(&self, e: Expr) -> Expr {
        self.expr(ExprKind::Star(Box::new(e)))
    }

    pub fn addr(&self, e: Expr) -> Expr {
        self.expr(ExprKind::Unary {
            op: UnaryOp::Addr,
            x: Box::new(e),
        })
    }

    pub fn recv(&self, e: Expr) -> Expr {
        self.expr(ExprKind::Unary {
            op: UnaryOp::Recv,
            x: Box::new(e),
        })
    }

    pub fn bin(&self, op: BinaryOp, x: Expr, y: Expr) -> Expr {
        self.expr(ExprKind::Binary {
            op,
            x: Box::new(x),
            y: Box::new(y),
        })
    }

    pub fn call(&self, fun: Expr, args: Vec<Expr>) -> Expr {
        self.expr(ExprKind::Call {
            fun: Box::new(fun),
            args,
        })
    }

    pub fn sel(&self, x: Expr, field: &str) -> Expr {
        let sel = self.name(field);
        self.expr(ExprKind::Selector {
            x: Box::new(x),
            sel,
        })
    }

    pub fn index(&self, x: Expr, i: Expr) -> Expr {
        self.expr(ExprKind::Index {
            x: Box::new(x),
            index: Box::new(i),
        })
    }

    pub fn field(&self, names: &[&str], ty: Expr) -> Field {
        let (_, span) = self.fresh();
        Field {
            names: names.iter().map(|n| self.name(n)).collect(),
            ty,
            tag: None,
            span,
        }
    }

    pub fn embedded(&self, ty: Expr) -> Field {
        let (_, span) = self.fresh();
        Field {
            names: Vec::new(),
            ty,
            tag: None,
            span,
        }
    }

    pub fn result(&self, ty: Expr) -> Field {
        self.embedded(ty)
    }

    pub fn struct_ty(&self, fields: Vec<Field>) -> Expr {
        self.expr(ExprKind::StructType { fields })
    }

    pub fn chan_ty(&self, elt: Expr) -> Expr {
        self.expr(ExprKind::ChanType {
            dir: ChanDir::Both,
            elt: Box::new(elt),
        })
    }

    pub fn map_ty(&self, key: Expr, value: Expr) -> Expr {
        self.expr(ExprKind::MapType {
            key: Box::new(key),
            value: Box::new(value),
        })
    }

    pub fn array_ty(&self, len: Expr, elt: Expr) -> Expr {
        self.expr(ExprKind::ArrayType {
            len: Some(Box::new(len)),
            elt: Box::new(elt),
        })
    }

    pub fn slice_ty(&self, elt: Expr) -> Expr {
        self.expr(ExprKind::ArrayType {
            len: None,
            elt: Box::new(elt),
        })
    }

    pub fn value_spec(&self, names: &[&str], ty: Option<Expr>, values: Vec<Expr>) -> Spec {
        let (_, span) = self.fresh();
        Spec::Value(ValueSpec {
            names: names.iter().map(|n| self.name(n)).collect(),
            ty,
            values,
            span,
        })
    }

    pub fn gen_decl(&self, keyword: DeclKeyword, specs: Vec<Spec>) -> Decl {
        let (_, span) = self.fresh();
        Decl::Gen(GenDecl {
            keyword,
            specs,
            span,
        })
    }

    pub fn type_decl(&self, name: &str, ty: Expr) -> Decl {
        let (_, span) = self.fresh();
        self.gen_decl(
            DeclKeyword::Type,
            vec![Spec::Type(TypeSpec {
                name: self.name(name),
                ty,
                span,
            })],
        )
    }

    pub fn var_decl(&self, names: &[&str], ty: Option<Expr>, values: Vec<Expr>) -> Decl {
        self.gen_decl(DeclKeyword::Var, vec![self.value_spec(names, ty, values)])
    }

    pub fn const_decl(&self, specs: Vec<Spec>) -> Decl {
        self.gen_decl(DeclKeyword::Const, specs)
    }

    pub fn func(
        &self,
        name: &str,
        params: Vec<Field>,
        results: Vec<Field>,
        body: Vec<Stmt>,
    ) -> Decl {
        let (_, span) = self.fresh();
        Decl::Func(FuncDecl {
            name: self.name(name),
            recv: None,
            params,
            results,
            body: Some(self.block(body)),
            span,
        })
    }

    pub fn method(
        &self,
        recv: Field,
        name: &str,
        params: Vec<Field>,
        results: Vec<Field>,
        body: Vec<Stmt>,
    ) -> Decl {
        let (_, span) = self.fresh();
        Decl::Func(FuncDecl {
            name: self.name(name),
            recv: Some(recv),
            params,
            results,
            body: Some(self.block(body)),
            span,
        })
    }

    pub fn block(&self, stmts: Vec<Stmt>) -> Block {
        let (_, span) = self.fresh();
        Block { stmts, span }
    }

    pub fn stmt(&self, kind: StmtKind) -> Stmt {
        let (_, span) = self.fresh();
        Stmt { kind, span }
    }

    pub fn assign(&self, lhs: Vec<Expr>, rhs: Vec<Expr>) -> Stmt {
        self.stmt(StmtKind::Assign {
            lhs,
            tok: AssignTok::Assign,
            rhs,
        })
    }

    pub fn define(&self, lhs: Vec<Expr>, rhs: Vec<Expr>) -> Stmt {
        self.stmt(StmtKind::Assign {
            lhs,
            tok: AssignTok::Define,
            rhs,
        })
    }

    pub fn var_stmt(&self, names: &[&str], ty: Option<Expr>, values: Vec<Expr>) -> Stmt {
        let (_, span) = self.fresh();
        self.stmt(StmtKind::Decl(GenDecl {
            keyword: DeclKeyword::Var,
            specs: vec![self.value_spec(names, ty, values)],
            span,
        }))
    }

    pub fn expr_stmt(&self, e: Expr) -> Stmt {
        self.stmt(StmtKind::Expr(e))
    }

    pub fn ret(&self, results: Vec<Expr>) -> Stmt {
        self.stmt(StmtKind::Return { results })
    }

    pub fn if_stmt(&self, cond: Expr, body: Vec<Stmt>, els: Option<Stmt>) -> Stmt {
        let body = self.block(body);
        self.stmt(StmtKind::If {
            init: None,
            cond,
            body,
            els: els.map(Box::new),
        })
    }

    pub fn for_stmt(
        &self,
        init: Option<Stmt>,
        cond: Option<Expr>,
        post: Option<Stmt>,
        body: Vec<Stmt>,
    ) -> Stmt {
        let body = self.block(body);
        self.stmt(StmtKind::For {
            init: init.map(Box::new),
            cond,
            post: post.map(Box::new),
            body,
        })
    }

    pub fn switch(&self, tag: Option<Expr>, cases: Vec<CaseClause>) -> Stmt {
        self.stmt(StmtKind::Switch {
            init: None,
            tag,
            cases,
        })
    }

    pub fn case(&self, exprs: Vec<Expr>, body: Vec<Stmt>) -> CaseClause {
        let (_, span) = self.fresh();
        CaseClause { exprs, body, span }
    }

    pub fn fallthrough_stmt(&self) -> Stmt {
        self.stmt(StmtKind::Branch(BranchKind::Fallthrough))
    }

    pub fn break_stmt(&self) -> Stmt {
        self.stmt(StmtKind::Branch(BranchKind::Break))
    }

    pub fn incdec(&self, x: Expr, inc: bool) -> Stmt {
        self.stmt(StmtKind::IncDec { x, inc })
    }

    pub fn go(&self, call: Expr) -> Stmt {
        self.stmt(StmtKind::Go { call })
    }

    pub fn file(&self, decls: Vec<Decl>) -> File {
        File {
            package: "main".to_string(),
            decls,
        }
    }
}
