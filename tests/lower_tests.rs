//! IR emission integration tests: control-flow shape, terminator
//! discipline, aggregate returns, and the goroutine trampoline.

mod common;

use common::Ast;
use gofront::frontend::ast::{BinaryOp, File};
use gofront::ir::{
    BlockId, Callee, Function, GepIndex, Inst, IrType, Module, Terminator, ValueDef,
};
use gofront::sema::check;

fn compile(files: Vec<File>) -> Module {
    let p = match check(files) {
        Ok(p) => p,
        Err(diags) => {
            let msgs: Vec<&str> = diags.items.iter().map(|d| d.message.as_str()).collect();
            panic!("unexpected diagnostics: {:?}", msgs);
        }
    };
    gofront::lower(&p).expect("lowering failed")
}

fn func<'m>(m: &'m Module, name: &str) -> &'m Function {
    m.functions
        .iter()
        .find(|f| f.name == name)
        .unwrap_or_else(|| panic!("no function named {}", name))
}

fn block_id(f: &Function, name: &str) -> BlockId {
    f.block_order
        .iter()
        .copied()
        .find(|&b| f.block(b).name == name)
        .unwrap_or_else(|| panic!("no block named {} in {}", name, f.name))
}

fn insts(f: &Function) -> Vec<&Inst> {
    f.values
        .iter()
        .filter_map(|v| match v {
            ValueDef::Inst(i) => Some(i),
            ValueDef::Param(_) => None,
        })
        .collect()
}

fn assert_all_terminated(m: &Module) {
    for f in &m.functions {
        if f.is_external {
            continue;
        }
        for &b in &f.block_order {
            assert!(
                f.block(b).term.is_some(),
                "block {} in {} has no terminator",
                f.block(b).name,
                f.name
            );
        }
    }
}

fn string_ir() -> IrType {
    IrType::Struct(vec![IrType::I8.ptr_to(), IrType::I32])
}

#[test]
fn embedded_field_store_walks_the_field_path() {
    let a = Ast::new();
    let ty_base = a.type_decl("Base", a.struct_ty(vec![a.field(&["n"], a.ident("int"))]));
    let ty_outer = a.type_decl("Outer", a.struct_ty(vec![a.embedded(a.ident("Base"))]));
    let body = vec![
        a.var_stmt(&["o"], Some(a.ident("Outer")), vec![]),
        a.assign(vec![a.sel(a.ident("o"), "n")], vec![a.int(42)]),
    ];
    let m = compile(vec![a.file(vec![ty_base, ty_outer, a.func("set", vec![], vec![], body)])]);

    let f = func(&m, "set");
    // The store writes the constant 42 through two struct geps:
    // o.Base then Base.n, both at field index 0.
    let mut stored_42 = false;
    for inst in insts(f) {
        if let Inst::Store { value, .. } = inst {
            if matches!(
                f.values[*value],
                ValueDef::Inst(Inst::ConstInt { value: 42, .. })
            ) {
                stored_42 = true;
            }
        }
    }
    assert!(stored_42, "no store of 42");
    let zero_geps = insts(f)
        .into_iter()
        .filter(|i| {
            matches!(
                i,
                Inst::Gep { indices, .. }
                    if indices == &vec![GepIndex::Const(0), GepIndex::Const(0)]
            )
        })
        .count();
    assert!(zero_geps >= 2, "expected two zero-field geps, got {}", zero_geps);
    assert_all_terminated(&m);
}

#[test]
fn multi_return_uses_an_aggregate() {
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
    let m = compile(vec![a.file(vec![f, g])]);

    let f = func(&m, "f");
    assert_eq!(f.ret, IrType::Struct(vec![IrType::I32, IrType::I1]));
    let entry = block_id(f, "entry");
    match f.block(entry).term.as_ref() {
        Some(Terminator::RetAggregate(vals)) => assert_eq!(vals.len(), 2),
        other => panic!("expected aggregate return, got {:?}", other),
    }

    let g = func(&m, "g");
    let extracts: Vec<usize> = insts(g)
        .into_iter()
        .filter_map(|i| match i {
            Inst::ExtractValue { index, .. } => Some(*index),
            _ => None,
        })
        .collect();
    assert_eq!(extracts, vec![0, 1]);
    let allocas: Vec<&str> = insts(g)
        .into_iter()
        .filter_map(|i| match i {
            Inst::Alloca { name, .. } => Some(name.as_str()),
            _ => None,
        })
        .collect();
    assert!(allocas.contains(&"x") && allocas.contains(&"ok"));
    assert_all_terminated(&m);
}

#[test]
fn go_spawn_packs_args_and_builds_a_trampoline() {
    let a = Ast::new();
    let g = a.func(
        "g",
        vec![
            a.field(&["a"], a.ident("int")),
            a.field(&["b"], a.ident("string")),
        ],
        vec![],
        vec![],
    );
    let spawn = a.func(
        "spawn",
        vec![],
        vec![],
        vec![a.go(a.call(a.ident("g"), vec![a.int(1), a.str_lit("hi")]))],
    );
    let m = compile(vec![a.file(vec![g, spawn])]);

    // The trampoline takes exactly one pointer, to the {i32, string}
    // argument struct, regardless of g's arity.
    let thunk = func(&m, "go_thunk_0");
    assert_eq!(thunk.params.len(), 1);
    let args_struct = IrType::Struct(vec![IrType::I32, string_ir()]);
    assert_eq!(thunk.params[0], args_struct.clone().ptr_to());

    // The caller allocates the struct, stores both arguments, and hands
    // trampoline + pointer + size to the runtime.
    let spawn_fn = func(&m, "spawn");
    assert!(insts(spawn_fn)
        .into_iter()
        .any(|i| matches!(i, Inst::Alloca { ty, .. } if ty == &args_struct)));
    let stores = insts(spawn_fn)
        .into_iter()
        .filter(|i| matches!(i, Inst::Store { .. }))
        .count();
    assert!(stores >= 2, "expected two argument stores, got {}", stores);
    assert!(insts(spawn_fn)
        .into_iter()
        .any(|i| matches!(i, Inst::SizeOf { ty } if ty == &args_struct)));
    let ngr = m.lookup_function("newgoroutine").expect("runtime missing");
    assert!(insts(spawn_fn).into_iter().any(|i| matches!(
        i,
        Inst::Call { callee: Callee::Direct(f), args, .. } if *f == ngr && args.len() == 3
    )));

    // The trampoline reloads both fields and calls g.
    let g_id = m.lookup_function("g").expect("g missing");
    let loads = insts(thunk)
        .into_iter()
        .filter(|i| matches!(i, Inst::Load { .. }))
        .count();
    assert_eq!(loads, 2);
    assert!(insts(thunk).into_iter().any(|i| matches!(
        i,
        Inst::Call { callee: Callee::Direct(f), args, .. } if *f == g_id && args.len() == 2
    )));
    let entry = block_id(thunk, "entry");
    assert_eq!(thunk.block(entry).term, Some(Terminator::Ret(None)));
    assert_all_terminated(&m);
}

#[test]
fn go_with_no_arguments_passes_a_null_pointer() {
    let a = Ast::new();
    let g = a.func("idle", vec![], vec![], vec![]);
    let spawn = a.func(
        "spawn",
        vec![],
        vec![],
        vec![a.go(a.call(a.ident("idle"), vec![]))],
    );
    let m = compile(vec![a.file(vec![g, spawn])]);

    let thunk = func(&m, "go_thunk_0");
    assert_eq!(thunk.params.len(), 1);
    let spawn_fn = func(&m, "spawn");
    assert!(insts(spawn_fn)
        .into_iter()
        .any(|i| matches!(i, Inst::ConstNull { .. })));
    assert!(insts(spawn_fn)
        .into_iter()
        .any(|i| matches!(i, Inst::ConstInt { value: 0, ty: IrType::I32 })));
    assert_all_terminated(&m);
}

#[test]
fn switch_fallthrough_branches_to_the_next_body() {
    let a = Ast::new();
    let decls = vec![
        a.func("a", vec![], vec![], vec![]),
        a.func("b", vec![], vec![], vec![]),
        a.func("c", vec![], vec![], vec![]),
    ];
    let sw = a.func(
        "sw",
        vec![a.field(&["x"], a.ident("int"))],
        vec![],
        vec![a.switch(
            Some(a.ident("x")),
            vec![
                a.case(
                    vec![a.int(1)],
                    vec![
                        a.expr_stmt(a.call(a.ident("a"), vec![])),
                        a.fallthrough_stmt(),
                    ],
                ),
                a.case(vec![a.int(2)], vec![a.expr_stmt(a.call(a.ident("b"), vec![]))]),
                a.case(vec![a.int(3)], vec![a.expr_stmt(a.call(a.ident("c"), vec![]))]),
            ],
        )],
    );
    let mut all = decls;
    all.push(sw);
    let m = compile(vec![a.file(all)]);

    let f = func(&m, "sw");
    let body0 = block_id(f, "body0");
    let body1 = block_id(f, "body1");
    let body2 = block_id(f, "body2");
    let end = block_id(f, "end");
    // case 1 falls through into case 2's body instead of the end block.
    assert_eq!(f.block(body0).term, Some(Terminator::Br(body1)));
    assert_eq!(f.block(body1).term, Some(Terminator::Br(end)));
    assert_eq!(f.block(body2).term, Some(Terminator::Br(end)));
    // Case evaluation blocks chain with conditional branches.
    let case0 = block_id(f, "case0");
    assert!(matches!(
        f.block(case0).term,
        Some(Terminator::CondBr { .. })
    ));
    assert_all_terminated(&m);
}

#[test]
fn tagless_switch_compares_against_true() {
    let a = Ast::new();
    let hit = a.func("hit", vec![], vec![], vec![]);
    let sw = a.func(
        "classify",
        vec![a.field(&["n"], a.ident("int"))],
        vec![],
        vec![a.switch(
            None,
            vec![a.case(
                vec![a.bin(BinaryOp::Gtr, a.ident("n"), a.int(0))],
                vec![a.expr_stmt(a.call(a.ident("hit"), vec![]))],
            )],
        )],
    );
    let m = compile(vec![a.file(vec![hit, sw])]);

    let f = func(&m, "classify");
    // The omitted tag materializes as the constant true; the case clause
    // compares its expression against it.
    assert!(insts(f)
        .into_iter()
        .any(|i| matches!(i, Inst::ConstInt { ty: IrType::I1, value: 1 })));
    assert!(insts(f)
        .into_iter()
        .any(|i| matches!(i, Inst::Icmp { .. })));
    let case0 = block_id(f, "case0");
    assert!(matches!(
        f.block(case0).term,
        Some(Terminator::CondBr { .. })
    ));
    assert_all_terminated(&m);
}

#[test]
fn if_else_produces_the_endif_join() {
    let a = Ast::new();
    let noop1 = a.func("yes", vec![], vec![], vec![]);
    let noop2 = a.func("no", vec![], vec![], vec![]);
    let body = vec![a.if_stmt(
        a.bin(BinaryOp::Gtr, a.ident("n"), a.int(1)),
        vec![a.expr_stmt(a.call(a.ident("yes"), vec![]))],
        Some(a.stmt(gofront::frontend::ast::StmtKind::Block(
            a.block(vec![a.expr_stmt(a.call(a.ident("no"), vec![]))]),
        ))),
    )];
    let f = a.func("branchy", vec![a.field(&["n"], a.ident("int"))], vec![], body);
    let m = compile(vec![a.file(vec![noop1, noop2, f])]);

    let f = func(&m, "branchy");
    let entry = block_id(f, "entry");
    let if_b = block_id(f, "if");
    let else_b = block_id(f, "else");
    let endif = block_id(f, "endif");
    match f.block(entry).term.as_ref() {
        Some(Terminator::CondBr { then_bb, else_bb, .. }) => {
            assert_eq!(*then_bb, if_b);
            assert_eq!(*else_bb, else_b);
        }
        other => panic!("expected conditional branch, got {:?}", other),
    }
    assert_eq!(f.block(if_b).term, Some(Terminator::Br(endif)));
    assert_eq!(f.block(else_b).term, Some(Terminator::Br(endif)));
    assert_all_terminated(&m);
}

#[test]
fn for_loop_shapes_cond_loop_done() {
    let a = Ast::new();
    let body = vec![a.for_stmt(
        Some(a.define(vec![a.ident("i")], vec![a.int(0)])),
        Some(a.bin(BinaryOp::Lss, a.ident("i"), a.int(10))),
        Some(a.incdec(a.ident("i"), true)),
        vec![],
    )];
    let m = compile(vec![a.file(vec![a.func("count", vec![], vec![], body)])]);

    let f = func(&m, "count");
    let cond = block_id(f, "cond");
    let loop_b = block_id(f, "loop");
    let post = block_id(f, "post");
    let done = block_id(f, "done");
    match f.block(cond).term.as_ref() {
        Some(Terminator::CondBr { then_bb, else_bb, .. }) => {
            assert_eq!(*then_bb, loop_b);
            assert_eq!(*else_bb, done);
        }
        other => panic!("expected cond branch, got {:?}", other),
    }
    assert_eq!(f.block(loop_b).term, Some(Terminator::Br(post)));
    assert_eq!(f.block(post).term, Some(Terminator::Br(cond)));
    assert_all_terminated(&m);
}

#[test]
fn break_branches_to_done() {
    let a = Ast::new();
    let body = vec![a.for_stmt(None, None, None, vec![a.break_stmt()])];
    let m = compile(vec![a.file(vec![a.func("once", vec![], vec![], body)])]);
    let f = func(&m, "once");
    let loop_b = block_id(f, "loop");
    let done = block_id(f, "done");
    assert_eq!(f.block(loop_b).term, Some(Terminator::Br(done)));
    assert_all_terminated(&m);
}

#[test]
fn incdec_loads_adds_one_and_stores() {
    let a = Ast::new();
    let body = vec![
        a.var_stmt(&["x"], Some(a.ident("int")), vec![]),
        a.incdec(a.ident("x"), true),
    ];
    let m = compile(vec![a.file(vec![a.func("bump", vec![], vec![], body)])]);
    let f = func(&m, "bump");
    let has_add_one = insts(f).into_iter().any(|i| match i {
        Inst::Binary {
            op: gofront::ir::BinOp::Add,
            rhs,
            ..
        } => matches!(
            f.values[*rhs],
            ValueDef::Inst(Inst::ConstInt { value: 1, .. })
        ),
        _ => false,
    });
    assert!(has_add_one, "no add-one instruction");
    assert!(insts(f).into_iter().any(|i| matches!(i, Inst::Load { .. })));
    assert!(insts(f)
        .into_iter()
        .any(|i| matches!(i, Inst::Store { .. })));
    assert_all_terminated(&m);
}

#[test]
fn package_variable_initializers_run_in_init() {
    let a = Ast::new();
    let file = a.file(vec![a.var_decl(&["answer"], None, vec![a.int(42)])]);
    let m = compile(vec![file]);

    assert!(m.globals.iter().any(|g| g.name == "answer"));
    let init = func(&m, "init");
    assert!(insts(init)
        .into_iter()
        .any(|i| matches!(i, Inst::GlobalAddr { .. })));
    assert!(insts(init)
        .into_iter()
        .any(|i| matches!(i, Inst::Store { .. })));
    assert_all_terminated(&m);
}

#[test]
fn circular_types_compile_through_emission() {
    let a = Ast::new();
    let ty_a = a.type_decl("A", a.struct_ty(vec![a.field(&["b"], a.star(a.ident("B")))]));
    let ty_b = a.type_decl("B", a.struct_ty(vec![a.field(&["a"], a.star(a.ident("A")))]));
    let body = vec![
        a.var_stmt(&["x"], Some(a.ident("A")), vec![]),
        a.var_stmt(&["y"], Some(a.ident("B")), vec![]),
        a.assign(vec![a.sel(a.ident("x"), "b")], vec![a.addr(a.ident("y"))]),
        a.assign(vec![a.sel(a.ident("y"), "a")], vec![a.addr(a.ident("x"))]),
    ];
    let m = compile(vec![a.file(vec![ty_a, ty_b, a.func("main", vec![], vec![], body)])]);

    // Named types register once each and the module stays finite.
    assert!(m.named_type("A").is_some());
    assert!(m.named_type("B").is_some());
    assert_all_terminated(&m);
}
