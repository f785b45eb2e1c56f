//! Type checker integration tests: object resolution, selector search,
//! assignee propagation, and error reporting.

mod common;

use common::Ast;
use gofront::frontend::ast::BinaryOp;
use gofront::sema::scope::ObjId;
use gofront::sema::types::{BasicKind, Type};
use gofront::sema::{check, Program, SelStep};

fn check_ok(files: Vec<gofront::frontend::ast::File>) -> Program {
    match check(files) {
        Ok(p) => p,
        Err(diags) => {
            let msgs: Vec<&str> = diags.items.iter().map(|d| d.message.as_str()).collect();
            panic!("unexpected diagnostics: {:?}", msgs);
        }
    }
}

fn find_object(p: &Program, name: &str) -> ObjId {
    let mut hit = None;
    for id in 0..p.objects.len() {
        if p.objects.get(id).name == name {
            assert!(hit.is_none(), "more than one object named {}", name);
            hit = Some(id);
        }
    }
    hit.unwrap_or_else(|| panic!("no object named {}", name))
}

fn named_name(p: &Program, t: &Type) -> String {
    match t {
        Type::Named(nid) => p.objects.get(p.table.get(*nid).obj).name.clone(),
        other => panic!("expected named type, got {:?}", other),
    }
}

#[test]
fn mutually_recursive_types_resolve() {
    let a = Ast::new();
    // type A struct { b *B }; type B struct { a *A }
    let ty_a = a.type_decl("A", a.struct_ty(vec![a.field(&["b"], a.star(a.ident("B")))]));
    let ty_b = a.type_decl("B", a.struct_ty(vec![a.field(&["a"], a.star(a.ident("A")))]));
    // func main() { var x A; var y B; x.b = &y; y.a = &x; p := x.b.a.b.a }
    let chain = a.sel(
        a.sel(a.sel(a.sel(a.ident("x"), "b"), "a"), "b"),
        "a",
    );
    let chain_id = chain.id;
    let body = vec![
        a.var_stmt(&["x"], Some(a.ident("A")), vec![]),
        a.var_stmt(&["y"], Some(a.ident("B")), vec![]),
        a.assign(
            vec![a.sel(a.ident("x"), "b")],
            vec![a.addr(a.ident("y"))],
        ),
        a.assign(
            vec![a.sel(a.ident("y"), "a")],
            vec![a.addr(a.ident("x"))],
        ),
        a.define(vec![a.ident("p")], vec![chain]),
    ];
    let file = a.file(vec![ty_a, ty_b, a.func("main", vec![], vec![], body)]);

    let p = check_ok(vec![file]);
    // Invariant: a clean check leaves no Bad types on package objects.
    for &obj in &p.package_objects {
        let t = p.objects.get(obj).typ.as_ref().expect("object untyped");
        assert!(!t.is_bad(), "{} has a bad type", p.objects.get(obj).name);
    }
    // x.b.a.b.a is the *A-typed field of B.
    let t = p.type_of(chain_id).expect("chain not typed");
    match t {
        Type::Pointer { base } => assert_eq!(named_name(&p, base), "A"),
        other => panic!("expected *A, got {:?}", other),
    }
}

#[test]
fn embedded_selector_resolves_one_level_deep() {
    let a = Ast::new();
    let ty_base = a.type_decl("Base", a.struct_ty(vec![a.field(&["n"], a.ident("int"))]));
    let ty_outer = a.type_decl("Outer", a.struct_ty(vec![a.embedded(a.ident("Base"))]));
    let sel = a.sel(a.ident("o"), "n");
    let sel_id = sel.id;
    let body = vec![
        a.var_stmt(&["o"], Some(a.ident("Outer")), vec![]),
        a.assign(vec![sel], vec![a.int(42)]),
    ];
    let file = a.file(vec![ty_base, ty_outer, a.func("set", vec![], vec![], body)]);

    let p = check_ok(vec![file]);
    assert_eq!(p.type_of(sel_id), Some(&Type::Basic(BasicKind::Int)));
    // One level past Outer into Base.n.
    assert_eq!(
        p.selections.get(&sel_id),
        Some(&vec![SelStep::Field(0), SelStep::Field(0)])
    );
}

#[test]
fn selector_through_pointer_auto_derefs() {
    let a = Ast::new();
    let ty_base = a.type_decl("Base", a.struct_ty(vec![a.field(&["n"], a.ident("int"))]));
    let ty_outer = a.type_decl("Outer", a.struct_ty(vec![a.embedded(a.ident("Base"))]));
    let sel = a.sel(a.ident("p"), "n");
    let sel_id = sel.id;
    let body = vec![a.assign(vec![sel], vec![a.int(3)])];
    let file = a.file(vec![
        ty_base,
        ty_outer,
        a.func(
            "set",
            vec![a.field(&["p"], a.star(a.ident("Outer")))],
            vec![],
            body,
        ),
    ]);

    let p = check_ok(vec![file]);
    let path = p.selections.get(&sel_id).expect("no selection path");
    assert_eq!(path[0], SelStep::Deref);
    assert_eq!(&path[1..], &[SelStep::Field(0), SelStep::Field(0)]);
}

#[test]
fn pointer_embedding_registers_base_name() {
    let a = Ast::new();
    let ty_inner = a.type_decl("Inner", a.struct_ty(vec![a.field(&["x"], a.ident("int"))]));
    let ty_q = a.type_decl("Q", a.struct_ty(vec![a.embedded(a.star(a.ident("Inner")))]));
    let sel = a.sel(a.ident("q"), "x");
    let sel_id = sel.id;
    let body = vec![
        a.var_stmt(&["q"], Some(a.ident("Q")), vec![]),
        a.assign(vec![sel], vec![a.int(1)]),
    ];
    let file = a.file(vec![ty_inner, ty_q, a.func("f", vec![], vec![], body)]);

    let p = check_ok(vec![file]);
    // The embedded *Inner field is registered under "Inner".
    let q = find_object(&p, "Q");
    let Some(Type::Named(nid)) = p.objects.get(q).typ.as_ref() else {
        panic!("Q is not a named type");
    };
    match p.table.get(*nid).underlying.as_ref() {
        Some(Type::Struct(s)) => assert_eq!(s.field_indices.get("Inner"), Some(&0)),
        other => panic!("unexpected underlying: {:?}", other),
    }
    // Access steps: embedded field, pointer load, then the field itself.
    assert_eq!(
        p.selections.get(&sel_id),
        Some(&vec![SelStep::Field(0), SelStep::Deref, SelStep::Field(0)])
    );
}

#[test]
fn ambiguous_selector_is_reported() {
    let a = Ast::new();
    let ty_a = a.type_decl("A", a.struct_ty(vec![a.field(&["x"], a.ident("int"))]));
    let ty_b = a.type_decl("B", a.struct_ty(vec![a.field(&["x"], a.ident("int"))]));
    let ty_c = a.type_decl(
        "C",
        a.struct_ty(vec![a.embedded(a.ident("A")), a.embedded(a.ident("B"))]),
    );
    let body = vec![
        a.var_stmt(&["c"], Some(a.ident("C")), vec![]),
        a.define(vec![a.ident("v")], vec![a.sel(a.ident("c"), "x")]),
    ];
    let file = a.file(vec![ty_a, ty_b, ty_c, a.func("f", vec![], vec![], body)]);

    let diags = check(vec![file]).expect_err("ambiguity not reported");
    assert!(
        diags
            .items
            .iter()
            .any(|d| d.message.contains("ambiguous selector")),
        "got: {:?}",
        diags.items.iter().map(|d| &d.message).collect::<Vec<_>>()
    );
}

#[test]
fn illegal_cycle_is_reported() {
    let a = Ast::new();
    let file = a.file(vec![
        a.type_decl("A", a.ident("B")),
        a.type_decl("B", a.ident("A")),
    ]);
    let diags = check(vec![file]).expect_err("cycle not reported");
    assert!(diags
        .items
        .iter()
        .any(|d| d.message.contains("illegal cycle")));
}

#[test]
fn multi_return_fills_assignee_slots() {
    let a = Ast::new();
    let f = a.func(
        "f",
        vec![],
        vec![a.result(a.ident("int")), a.result(a.ident("bool"))],
        vec![a.ret(vec![a.int(0), a.ident("true")])],
    );
    let g = a.func(
        "g",
        vec![],
        vec![],
        vec![a.define(
            vec![a.ident("x"), a.ident("ok")],
            vec![a.call(a.ident("f"), vec![])],
        )],
    );
    let p = check_ok(vec![a.file(vec![f, g])]);
    let x = find_object(&p, "x");
    let ok = find_object(&p, "ok");
    assert_eq!(p.objects.get(x).typ, Some(Type::Basic(BasicKind::Int)));
    assert_eq!(p.objects.get(ok).typ, Some(Type::Basic(BasicKind::Bool)));
}

#[test]
fn channel_receive_fills_value_and_ok_slots() {
    let a = Ast::new();
    let f = a.func(
        "f",
        vec![a.field(&["ch"], a.chan_ty(a.ident("int")))],
        vec![],
        vec![a.define(
            vec![a.ident("v"), a.ident("ok")],
            vec![a.recv(a.ident("ch"))],
        )],
    );
    let p = check_ok(vec![a.file(vec![f])]);
    let v = find_object(&p, "v");
    let ok = find_object(&p, "ok");
    assert_eq!(p.objects.get(v).typ, Some(Type::Basic(BasicKind::Int)));
    assert_eq!(p.objects.get(ok).typ, Some(Type::Basic(BasicKind::Bool)));
}

#[test]
fn untyped_priority_picks_the_later_kind() {
    let a = Ast::new();
    let lit = a.int(1);
    let lit_id = lit.id;
    let sum = a.bin(BinaryOp::Add, lit, a.float("2.5"));
    let sum_id = sum.id;
    let file = a.file(vec![a.var_decl(&["x"], None, vec![sum])]);

    let p = check_ok(vec![file]);
    assert_eq!(
        p.type_of(sum_id),
        Some(&Type::Basic(BasicKind::UntypedFloat))
    );
    // The integer operand is re-typed to the winner.
    assert_eq!(
        p.type_of(lit_id),
        Some(&Type::Basic(BasicKind::UntypedFloat))
    );
    let x = find_object(&p, "x");
    assert_eq!(
        p.objects.get(x).typ,
        Some(Type::Basic(BasicKind::UntypedFloat))
    );
}

#[test]
fn comparisons_yield_bool_and_shifts_yield_int() {
    let a = Ast::new();
    let cmp = a.bin(BinaryOp::Lss, a.ident("n"), a.int(10));
    let cmp_id = cmp.id;
    let shift = a.bin(BinaryOp::Shl, a.ident("n"), a.int(2));
    let shift_id = shift.id;
    let f = a.func(
        "f",
        vec![a.field(&["n"], a.ident("int"))],
        vec![],
        vec![
            a.define(vec![a.ident("c")], vec![cmp]),
            a.define(vec![a.ident("s")], vec![shift]),
        ],
    );
    let p = check_ok(vec![a.file(vec![f])]);
    assert_eq!(p.type_of(cmp_id), Some(&Type::Basic(BasicKind::Bool)));
    assert_eq!(p.type_of(shift_id), Some(&Type::Basic(BasicKind::Int)));
}

#[test]
fn string_index_yields_byte() {
    let a = Ast::new();
    let idx = a.index(a.ident("s"), a.int(0));
    let idx_id = idx.id;
    let f = a.func(
        "f",
        vec![a.field(&["s"], a.ident("string"))],
        vec![],
        vec![a.define(vec![a.ident("b")], vec![idx])],
    );
    let p = check_ok(vec![a.file(vec![f])]);
    assert_eq!(p.type_of(idx_id), Some(&Type::Basic(BasicKind::Uint8)));
}

#[test]
fn repeat_constants_inherit_type_and_value() {
    let a = Ast::new();
    let decl = a.const_decl(vec![
        a.value_spec(&["one"], None, vec![a.int(1)]),
        a.value_spec(&["two"], None, vec![]),
    ]);
    let p = check_ok(vec![a.file(vec![decl])]);
    let two = find_object(&p, "two");
    assert_eq!(
        p.objects.get(two).typ,
        Some(Type::Basic(BasicKind::UntypedInt))
    );
}

#[test]
fn undefined_name_gets_a_suggestion() {
    let a = Ast::new();
    let f = a.func(
        "f",
        vec![],
        vec![],
        vec![
            a.define(vec![a.ident("count")], vec![a.int(1)]),
            a.incdec(a.ident("cout"), true),
        ],
    );
    let diags = check(vec![a.file(vec![f])]).expect_err("missing name not reported");
    let diag = diags
        .items
        .iter()
        .find(|d| d.message == "undefined: cout")
        .expect("no undefined diagnostic");
    assert!(
        diag.help.as_deref().unwrap_or("").contains("count"),
        "no suggestion in {:?}",
        diag.help
    );
}

#[test]
fn unknown_selector_is_reported() {
    let a = Ast::new();
    let ty = a.type_decl("T", a.struct_ty(vec![a.field(&["n"], a.ident("int"))]));
    let body = vec![
        a.var_stmt(&["t"], Some(a.ident("T")), vec![]),
        a.define(vec![a.ident("v")], vec![a.sel(a.ident("t"), "missing")]),
    ];
    let diags =
        check(vec![a.file(vec![ty, a.func("f", vec![], vec![], body)])]).expect_err("no error");
    assert!(diags
        .items
        .iter()
        .any(|d| d.message.contains("failed to resolve selector")));
}

#[test]
fn method_selector_resolves_via_sorted_method_list() {
    let a = Ast::new();
    let ty = a.type_decl("Counter", a.struct_ty(vec![a.field(&["n"], a.ident("int"))]));
    let inc = a.method(
        a.field(&["c"], a.star(a.ident("Counter"))),
        "Inc",
        vec![],
        vec![],
        vec![],
    );
    let get = a.method(
        a.field(&["c"], a.star(a.ident("Counter"))),
        "Get",
        vec![],
        vec![a.result(a.ident("int"))],
        vec![a.ret(vec![a.int(0)])],
    );
    let sel = a.sel(a.ident("c"), "Get");
    let sel_id = sel.id;
    let user = a.func(
        "user",
        vec![a.field(&["c"], a.ident("Counter"))],
        vec![],
        vec![a.define(vec![a.ident("got")], vec![a.call(sel, vec![])])],
    );
    let p = check_ok(vec![a.file(vec![ty, inc, get, user])]);
    // The selector resolved to the Get method object.
    let m = p.uses.get(&sel_id).copied().expect("selector unresolved");
    assert_eq!(p.objects.get(m).name, "Get");
    let got = find_object(&p, "got");
    assert_eq!(p.objects.get(got).typ, Some(Type::Basic(BasicKind::Int)));
}

#[test]
fn expression_types_are_memoized_per_node() {
    let a = Ast::new();
    let lit = a.int(7);
    let lit_id = lit.id;
    let file = a.file(vec![a.var_decl(&["x"], Some(a.ident("int")), vec![lit])]);
    let p = check_ok(vec![file]);
    // The map holds an entry for every visited node, and repeated lookups
    // see one stable type.
    let first = p.type_of(lit_id).cloned();
    let second = p.type_of(lit_id).cloned();
    assert!(first.is_some());
    assert_eq!(first, second);
}
