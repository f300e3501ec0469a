#[cfg(test)]
mod tests {
    use crate::analyzer::type_of;
    use crate::*;
    use proptest::prelude::*;

    fn var(id: &str) -> VarRef {
        VarRef::target(id, id)
    }

    fn set(id: &str, value: Input) -> StackBlock {
        StackBlock::new(StackKind::VarSet {
            var: var(id),
            value,
        })
    }

    fn num_cast(input: Input) -> Input {
        input.to_type(ValueType::NUMBER).expect("numeric cast")
    }

    fn if_cond(condition: Input) -> StackBlock {
        StackBlock::new(StackKind::IfElse {
            condition,
            then_branch: vec![StackBlock::new(StackKind::Nop)],
            else_branch: Vec::new(),
        })
    }

    /// Route `tracing` output through the test harness so `--nocapture`
    /// shows compiler diagnostics. Safe to call from every test; only the
    /// first call installs the subscriber.
    fn init_tracing() {
        use std::sync::Once;
        static INIT: Once = Once::new();
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_test_writer()
                .with_max_level(tracing::Level::DEBUG)
                .try_init();
        });
    }

    fn compile_entry(stack: Stack, yields: bool) -> CompiledScript {
        init_tracing();
        let mut ctx = CompilerContext::new();
        let mut entry = Script::new("top");
        entry.stack = stack;
        entry.yields = yields;
        let mut ir = Ir::new(entry);
        let project =
            compile(&mut ctx, &mut ir, &TargetInfo::sprite()).expect("compile succeeds");
        (*project.entry).clone()
    }

    // ════ Scenario tests ════

    #[test]
    fn test_integer_variable_equality_uses_strict_equals() {
        // x := 3; x := x + 4; if x = 7 ...
        let compiled = compile_entry(
            vec![
                set("x", Input::number(3.0)),
                set(
                    "x",
                    Input::binary(
                        BinaryOp::Add,
                        num_cast(Input::var_get(var("x"))),
                        Input::number(4.0),
                    ),
                ),
                if_cond(Input::binary(
                    BinaryOp::Eq,
                    Input::var_get(var("x")),
                    Input::number(7.0),
                )),
            ],
            false,
        );
        assert!(compiled.factory_source.contains("=== 7"));
        assert!(!compiled.factory_source.contains("compareEqual"));
    }

    #[test]
    fn test_string_variable_equality_lowers_to_string_compare() {
        // s := "hello"; if s = 5 ...
        let compiled = compile_entry(
            vec![
                set("s", Input::string("hello")),
                if_cond(Input::binary(
                    BinaryOp::Eq,
                    Input::var_get(var("s")),
                    Input::number(5.0),
                )),
            ],
            false,
        );
        assert!(compiled
            .factory_source
            .contains(".value.toLowerCase() === \"5\""));
    }

    #[test]
    fn test_loop_fixed_point_keeps_string_refinement() {
        // y := "go"; while p { y := y + 1 }
        let mut entry = Script::new("top");
        entry.is_warp = true;
        entry.stack = vec![
            set("y", Input::string("go")),
            StackBlock::new(StackKind::While {
                condition: Input::constant(true),
                body: vec![set(
                    "y",
                    Input::binary(
                        BinaryOp::Add,
                        num_cast(Input::var_get(var("y"))),
                        Input::number(1.0),
                    ),
                )],
            }),
        ];
        let mut ir = Ir::new(entry);
        analyze(&mut ir);
        let invariant = ir.entry.stack[1]
            .entry_state
            .as_ref()
            .expect("loop entry recorded");
        let y = invariant.get("y");
        assert!(y.is_sometimes(ValueType::STRING));
        assert!(y.is_sometimes(ValueType::POS_INT));
    }

    #[test]
    fn test_one_over_zero_is_exactly_positive_infinity() {
        let mut entry = Script::new("top");
        entry.stack = vec![set(
            "c",
            Input::binary(BinaryOp::Div, Input::number(1.0), Input::number(0.0)),
        )];
        let mut analyzer = Analyzer::new();
        analyzer.analyze_script(&mut entry);
        assert_eq!(analyzer.state().get("c"), ValueType::POS_INF);
    }

    #[test]
    fn test_opposite_infinities_keep_numeric_cast() {
        let sum = Input::binary(
            BinaryOp::Add,
            Input::number(f64::INFINITY),
            Input::number(f64::NEG_INFINITY),
        );
        let cast = sum.to_type(ValueType::NUMBER).expect("numeric cast");
        let mut entry = Script::new("top");
        entry.stack = vec![set("c", cast)];
        let mut ir = Ir::new(entry);
        analyze(&mut ir);
        optimize(&mut ir);
        let StackKind::VarSet { value, .. } = &ir.entry.stack[0].kind else {
            panic!("expected VarSet");
        };
        assert!(matches!(value.kind, InputKind::Cast { .. }));
        assert_eq!(value.ty, ValueType::ZERO);
    }

    #[test]
    fn test_procedure_call_clears_refinements() {
        // x := 3; call P; if x = 3 ... must not specialize on x.
        let mut entry = Script::new("top");
        entry.depended_procedures = vec!["P".to_string()];
        entry.stack = vec![
            set("x", Input::number(3.0)),
            StackBlock::new(StackKind::ProcedureCall {
                code: "P".to_string(),
                arguments: Vec::new(),
            }),
            if_cond(Input::binary(
                BinaryOp::Eq,
                Input::var_get(var("x")),
                Input::number(3.0),
            )),
        ];
        let mut procedure = Script::new("P");
        procedure.is_procedure = true;
        procedure.procedure_code = "P".to_string();
        procedure.stack = vec![StackBlock::new(StackKind::Nop)];
        let mut ir = Ir::new(entry);
        ir.procedures.insert("P".to_string(), procedure);

        let mut ctx = CompilerContext::new();
        let project =
            compile(&mut ctx, &mut ir, &TargetInfo::sprite()).expect("compile succeeds");
        assert!(project.entry.factory_source.contains("compareEqual"));
        assert!(ir.entry.stack[1]
            .exit_state
            .as_ref()
            .map(|s| s.get("x") == ValueType::ANY)
            .unwrap_or(false));
    }

    // ════ Code generation invariants ════

    #[test]
    fn test_yield_appears_iff_script_yields() {
        let plain = compile_entry(vec![set("x", Input::number(1.0))], false);
        assert!(!plain.factory_source.contains("yield"));
        assert!(plain.factory_source.contains("return function fun"));
        assert!(plain.factory_source.contains("retire();"));

        let waiting = compile_entry(
            vec![StackBlock::new(StackKind::Wait {
                seconds: Input::number(1.0),
            })],
            true,
        );
        assert!(waiting.factory_source.contains("yield;"));
        assert!(waiting.factory_source.contains("return function* gen"));
    }

    #[test]
    fn test_yield_in_non_yielding_script_is_fatal() {
        let mut ctx = CompilerContext::new();
        let mut entry = Script::new("top");
        entry.stack = vec![StackBlock::new(StackKind::Wait {
            seconds: Input::number(1.0),
        })];
        let mut ir = Ir::new(entry);
        let err = compile(&mut ctx, &mut ir, &TargetInfo::sprite()).unwrap_err();
        assert!(matches!(err, CompileError::YieldMismatch { .. }));
    }

    #[test]
    fn test_modulo_before_motion_clears_interpolation() {
        let compiled = compile_entry(
            vec![StackBlock::new(StackKind::MotionSetX {
                x: Input::binary(
                    BinaryOp::Mod,
                    num_cast(Input::var_get(var("x"))),
                    Input::number(10.0),
                ),
            })],
            false,
        );
        let source = &compiled.factory_source;
        let reset = source
            .find("target.interpolationData = null;")
            .expect("interpolation reset emitted");
        let set_xy = source.find("target.setXY(").expect("setXY emitted");
        assert!(reset < set_xy);
        assert!(source.contains("mod("));
    }

    #[test]
    fn test_list_get_last_fast_path() {
        let list = ListRef::target("l", "items");
        let compiled = compile_entry(
            vec![set(
                "x",
                Input::new(InputKind::ListGet {
                    list,
                    index: Box::new(Input::string("last")),
                }),
            )],
            false,
        );
        assert!(compiled
            .factory_source
            .contains(".value.length - 1] ?? \"\")"));
    }

    #[test]
    fn test_list_get_numeric_index_fast_path() {
        let list = ListRef::target("l", "items");
        let index = Input::var_get(var("i"))
            .to_type(ValueType::NUMBER_OR_NAN)
            .expect("index cast");
        let compiled = compile_entry(
            vec![set(
                "x",
                Input::new(InputKind::ListGet {
                    list,
                    index: Box::new(index),
                }),
            )],
            false,
        );
        assert!(compiled.factory_source.contains(" - 1] ?? \"\")"));
        assert!(!compiled.factory_source.contains("listGet("));
    }

    #[test]
    fn test_broadcast_and_wait_yields_into_wait_threads() {
        let compiled = compile_entry(
            vec![StackBlock::new(StackKind::EventBroadcastAndWait {
                broadcast: Input::string("go"),
            })],
            true,
        );
        assert!(compiled
            .factory_source
            .contains("yield* waitThreads(startHats(\"event_whenbroadcastreceived\""));
    }

    #[test]
    fn test_costume_name_constant_stays_a_string() {
        let mut ctx = CompilerContext::new();
        let mut entry = Script::new("top");
        entry.stack = vec![StackBlock::new(StackKind::MotionSetX {
            x: Input::string("5"),
        })];
        let mut ir = Ir::new(entry);
        let target = TargetInfo::sprite().with_costumes(&["5"]);
        let project = compile(&mut ctx, &mut ir, &target).expect("compile succeeds");
        assert!(project.entry.factory_source.contains("(+\"5\" || 0)"));
    }

    #[test]
    fn test_setup_bindings_are_deduplicated() {
        let compiled = compile_entry(
            vec![
                set("x", Input::number(1.0)),
                set("x", Input::number(2.0)),
                set("y", Input::number(3.0)),
            ],
            false,
        );
        let source = &compiled.factory_source;
        assert_eq!(
            source.matches("const b0 = target.variables[\"x\"];").count(),
            1
        );
        assert!(source.contains("const b1 = target.variables[\"y\"];"));
    }

    #[test]
    fn test_repeat_shape_and_warp_stuck_yield() {
        let body = vec![set("x", Input::number(1.0))];
        let mut entry = Script::new("top");
        entry.is_warp = true;
        entry.warp_timer = true;
        entry.yields = true;
        entry.stack = vec![StackBlock::new(StackKind::Repeat {
            times: Input::number(10.0),
            body,
        })];
        let mut ctx = CompilerContext::new();
        let mut ir = Ir::new(entry);
        let project =
            compile(&mut ctx, &mut ir, &TargetInfo::sprite()).expect("compile succeeds");
        let source = &project.entry.factory_source;
        assert!(source.contains("for (var a0 = 10; a0 >= 0.5; a0--) {"));
        assert!(source.contains("if (isStuck()) yield;"));
        assert!(!source.contains("\nyield;\n"));
    }

    #[test]
    fn test_yielding_procedure_call_uses_delegation() {
        let mut entry = Script::new("top");
        entry.yields = true;
        entry.depended_procedures = vec!["P".to_string()];
        entry.stack = vec![StackBlock::new(StackKind::ProcedureCall {
            code: "P".to_string(),
            arguments: vec![Input::number(1.0)],
        })];
        let mut procedure = Script::new("P");
        procedure.is_procedure = true;
        procedure.procedure_code = "P".to_string();
        procedure.yields = true;
        procedure.arguments = vec![Argument::string_number("seconds")];
        procedure.stack = vec![StackBlock::new(StackKind::Wait {
            seconds: Input::new(InputKind::ProcedureArg {
                index: 0,
                kind: ArgKind::StringNumber,
            }),
        })];
        let mut ctx = CompilerContext::new();
        let mut ir = Ir::new(entry);
        ir.procedures.insert("P".to_string(), procedure);
        let project =
            compile(&mut ctx, &mut ir, &TargetInfo::sprite()).expect("compile succeeds");
        assert!(project
            .entry
            .factory_source
            .contains("yield* thread.procedures[\"P\"](1);"));
        let compiled_procedure = &project.procedures["P"];
        assert!(compiled_procedure.factory_source.contains("(p0)"));
        assert!(ir.procedures["P"].cached_compile.is_some());
    }

    #[test]
    fn test_empty_procedure_call_emits_nothing() {
        let mut entry = Script::new("top");
        entry.depended_procedures = vec!["P".to_string()];
        entry.stack = vec![StackBlock::new(StackKind::ProcedureCall {
            code: "P".to_string(),
            arguments: Vec::new(),
        })];
        let mut procedure = Script::new("P");
        procedure.is_procedure = true;
        procedure.procedure_code = "P".to_string();
        let mut ctx = CompilerContext::new();
        let mut ir = Ir::new(entry);
        ir.procedures.insert("P".to_string(), procedure);
        let project =
            compile(&mut ctx, &mut ir, &TargetInfo::sprite()).expect("compile succeeds");
        assert!(!project.entry.factory_source.contains("thread.procedures"));
    }

    #[test]
    fn test_debug_mode_logs_each_compiled_script() {
        init_tracing();
        let mut ctx = CompilerContext::new();
        ctx.debug = true;
        let mut entry = Script::new("top");
        entry.stack = vec![set("x", Input::number(1.0))];
        let mut ir = Ir::new(entry);
        // One debug line per compiled script plus the rewrite summary;
        // visible with `--nocapture`. The compile itself must be
        // unaffected by the logging.
        let project =
            compile(&mut ctx, &mut ir, &TargetInfo::sprite()).expect("compile succeeds");
        assert!(project.entry.factory_source.contains("factory0"));
    }

    #[test]
    fn test_observer_sees_each_compile() {
        use std::cell::RefCell;
        use std::rc::Rc;
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let mut ctx = CompilerContext::new();
        ctx.set_observer(Box::new(move |compiled| {
            sink.borrow_mut().push(compiled.factory_name.clone());
        }));
        let mut entry = Script::new("top");
        entry.stack = vec![set("x", Input::number(1.0))];
        let mut ir = Ir::new(entry);
        compile(&mut ctx, &mut ir, &TargetInfo::sprite()).expect("compile succeeds");
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(seen.borrow()[0], "factory0");
    }

    // ════ Property tests ════

    fn eval_tree(input: &Input) -> Value {
        match &input.kind {
            InputKind::Constant(v) => v.clone(),
            InputKind::Cast { kind, value } => kind.apply(&eval_tree(value)),
            InputKind::Binary { op, left, right } => {
                let a = eval_tree(left).to_number();
                let b = eval_tree(right).to_number();
                Value::Number(match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                    _ => panic!("operator not used in trees"),
                })
            }
            InputKind::Unary { op, value } => {
                let v = eval_tree(value).to_number();
                Value::Number(match op {
                    UnaryOp::Abs => v.abs(),
                    UnaryOp::Floor => v.floor(),
                    UnaryOp::Ceil => v.ceil(),
                    _ => panic!("operator not used in trees"),
                })
            }
            _ => panic!("node not used in trees"),
        }
    }

    fn constant_strategy() -> impl Strategy<Value = Input> {
        prop_oneof![
            prop_oneof![
                Just(0.0f64),
                Just(-0.0f64),
                Just(1.0),
                Just(-1.0),
                Just(0.5),
                Just(-2.5),
                Just(3.0),
                Just(1e308),
                Just(-1e308),
                Just(1e-300),
                Just(f64::INFINITY),
                Just(f64::NEG_INFINITY),
                Just(f64::NAN),
            ]
            .prop_map(Input::number),
            prop_oneof![
                Just(""),
                Just("0"),
                Just("3"),
                Just("-2.5"),
                Just("abc"),
                Just("Infinity"),
            ]
            .prop_map(Input::string),
            any::<bool>().prop_map(Input::constant),
        ]
    }

    fn tree_strategy() -> impl Strategy<Value = Input> {
        constant_strategy().prop_recursive(4, 48, 2, |inner| {
            prop_oneof![
                (
                    prop_oneof![
                        Just(BinaryOp::Add),
                        Just(BinaryOp::Sub),
                        Just(BinaryOp::Mul),
                        Just(BinaryOp::Div),
                    ],
                    inner.clone(),
                    inner.clone()
                )
                    .prop_map(|(op, a, b)| Input::binary(op, a, b)),
                (
                    prop_oneof![Just(UnaryOp::Abs), Just(UnaryOp::Floor), Just(UnaryOp::Ceil)],
                    inner.clone()
                )
                    .prop_map(|(op, a)| Input::unary(op, a)),
                inner
                    .clone()
                    .prop_map(|a| a.to_type(ValueType::NUMBER).expect("numeric cast")),
                inner.prop_map(|a| {
                    a.to_type(ValueType::NUMBER_OR_NAN).expect("numeric cast")
                }),
            ]
        })
    }

    fn arbitrary_type() -> impl Strategy<Value = ValueType> {
        any::<u16>().prop_map(ValueType::from_bits_truncate)
    }

    proptest! {
        #[test]
        fn prop_join_laws(a in arbitrary_type(), b in arbitrary_type(), c in arbitrary_type()) {
            prop_assert_eq!(a.join(b), b.join(a));
            prop_assert_eq!(a.join(b).join(c), a.join(b.join(c)));
            prop_assert_eq!(a.join(a), a);
            prop_assert_eq!(a.join(ValueType::empty()), a);
            prop_assert_eq!(a.join(ValueType::ANY), ValueType::ANY);
        }

        #[test]
        fn prop_always_distributes_over_join(
            a in arbitrary_type(),
            b in arbitrary_type(),
            t in arbitrary_type(),
        ) {
            if a.join(b).is_always(t) {
                prop_assert!(a.is_always(t));
                prop_assert!(b.is_always(t));
            }
        }

        #[test]
        fn prop_literal_evaluation_stays_inside_analyzed_type(tree in tree_strategy()) {
            let state = TypeState::new();
            let analyzed = type_of(&tree, &state);
            let actual = ValueType::of_value(&eval_tree(&tree));
            prop_assert!(
                actual.is_always(analyzed),
                "value type {:?} escapes analyzed type {:?}",
                actual,
                analyzed
            );
        }

        #[test]
        fn prop_transfer_functions_are_monotone(
            a in arbitrary_type(),
            b in arbitrary_type(),
            op in prop_oneof![
                Just(BinaryOp::Add),
                Just(BinaryOp::Sub),
                Just(BinaryOp::Mul),
                Just(BinaryOp::Div),
            ],
        ) {
            prop_assume!(!a.is_empty());
            let wider = a | b;
            let expr = Input::binary(
                op,
                Input::var_get(VarRef::target("x", "x"))
                    .to_type(ValueType::NUMBER)
                    .expect("numeric cast"),
                Input::number(1.0),
            );
            let mut narrow_state = TypeState::new();
            narrow_state.set("x", a);
            let mut wide_state = TypeState::new();
            wide_state.set("x", wider);
            let narrow = type_of(&expr, &narrow_state);
            let wide = type_of(&expr, &wide_state);
            prop_assert!(narrow.is_always(wide));
        }
    }

    #[test]
    fn test_nested_loop_analysis_terminates() {
        let inner = vec![set(
            "x",
            Input::binary(
                BinaryOp::Mul,
                num_cast(Input::var_get(var("x"))),
                num_cast(Input::var_get(var("y"))),
            ),
        )];
        let outer = vec![
            set(
                "y",
                Input::binary(
                    BinaryOp::Sub,
                    num_cast(Input::var_get(var("y"))),
                    Input::number(0.5),
                ),
            ),
            StackBlock::new(StackKind::While {
                condition: Input::constant(true),
                body: inner,
            }),
        ];
        let mut entry = Script::new("top");
        entry.is_warp = true;
        entry.stack = vec![
            set("x", Input::number(2.0)),
            set("y", Input::number(4.0)),
            StackBlock::new(StackKind::Repeat {
                times: Input::number(10.0),
                body: outer,
            }),
        ];
        let mut ir = Ir::new(entry);
        analyze(&mut ir);
        optimize(&mut ir);
    }
}
