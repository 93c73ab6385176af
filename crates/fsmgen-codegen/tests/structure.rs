//! Structural properties of lowered units: labels, partitions, control
//! functions, type selection and error accumulation.

use fsmgen_codegen::analysis::{self, MachineFacts};
use fsmgen_codegen::format::c::CFormatter;
use fsmgen_codegen::format::rust::RustFormatter;
use fsmgen_codegen::ir::{self, ArrayId, Func, Label, Lowered, Stmt};
use fsmgen_codegen::liveness::Liveness;
use fsmgen_codegen::shape::split::partition_states;
use fsmgen_codegen::sim::{Machine, Transcript};
use fsmgen_codegen::{CodegenError, GenOptions, Generator, Shape};
use fsmgen_core::action::{Action, InlineItem, InputLoc};
use fsmgen_core::builder::FsmBuilder;
use fsmgen_core::fsm::RedFsm;
use fsmgen_core::keys::{IntType, KeyRange};

fn key(c: u8) -> KeyRange {
    KeyRange::single(c as i64)
}

fn lower(fsm: &RedFsm, shape: Shape) -> Lowered {
    Generator::new(fsm, &CFormatter::new()).lower(shape).unwrap()
}

/// A machine touching most features: a goto out of a transition action,
/// from-state, to-state and eof actions, an end-of-input transition, and an
/// error state for the gaps.
fn busy() -> RedFsm {
    let mut b = FsmBuilder::new(IntType::U8);
    b.ensure_states(6);
    b.set_start(0);
    b.set_final(4, true);
    let jump = b.add_action(Action::named("jump", vec![InlineItem::text("j;"), InlineItem::Goto(3)]));
    let note = b.add_action(Action::new(vec![InlineItem::text("n;")]));
    let leave = b.add_action(Action::new(vec![InlineItem::text("l;")]));
    let done = b.add_action(Action::new(vec![InlineItem::text("d;")]));

    b.add_transition(0, KeyRange::new(b'a' as i64, b'c' as i64), 1, &[]);
    b.add_transition(0, key(b'x'), 2, &[jump]);
    b.add_transition(1, key(b'b'), 2, &[note]);
    b.add_transition(1, key(b'c'), 4, &[]);
    b.add_transition(2, key(b'c'), 4, &[note]);
    b.add_transition(3, key(b'a'), 4, &[]);
    b.set_default(3, 1, &[]);
    b.add_transition(4, key(b'a'), 0, &[]);
    b.add_transition(5, key(b'z'), 4, &[]);

    b.set_to_state_actions(2, &[note]);
    b.set_from_state_actions(1, &[leave]);
    b.set_eof_actions(4, &[done]);
    b.set_eof_transition(1, 4, &[done]);
    b.build().unwrap()
}

fn assert_labels_resolve(block: &[Stmt], what: &str) {
    let defined = ir::defined_labels(block);
    for target in ir::goto_targets(block) {
        assert!(defined.contains(&target), "{what}: jump to undefined {target:?}");
    }
}

#[test]
fn ipgoto_labels_are_defined_exactly_when_live() {
    let fsm = busy();
    let opts = GenOptions::default();
    let live = Liveness::in_place(&fsm, &MachineFacts::of(&fsm), &opts);
    let unit = lower(&fsm, Shape::IpGoto);
    assert_labels_resolve(&unit.exec.body, "ipgoto");

    let defined = ir::defined_labels(&unit.exec.body);
    for s in 0..fsm.state_count() as u32 {
        assert_eq!(defined.contains(&Label::State(s)), live.needs_label(s), "state {s}");
    }
    // The goto target of an action always gets an entry label.
    assert!(live.needs_label(3));
    // State 5 is unreachable and nothing jumps to it.
    assert!(!live.needs_label(5));
}

#[test]
fn goto_shape_labels_resolve() {
    let fsm = busy();
    let unit = lower(&fsm, Shape::Goto);
    assert_labels_resolve(&unit.exec.body, "goto");
    let live = Liveness::dispatch(&fsm);
    for t in 0..fsm.transitions.len() as u32 {
        let defined = ir::defined_labels(&unit.exec.body).contains(&Label::Trans(t));
        assert_eq!(defined, live.trans_needed(t), "transition {t}");
    }
}

#[test]
fn table_search_labels_resolve() {
    let fsm = busy();
    let unit = lower(&fsm, Shape::Table);
    assert_labels_resolve(&unit.exec.body, "table");
    for id in [ArrayId::KeyOffsets, ArrayId::SingleLengths, ArrayId::RangeLengths, ArrayId::IndexOffsets] {
        let array = unit.data.array(id).unwrap();
        assert_eq!(array.values.len(), fsm.state_count(), "{id:?}");
    }
}

#[test]
fn split_units_are_self_contained() {
    let fsm = busy();
    for partitions in 1..=fsm.state_count() {
        let unit = lower(&fsm, Shape::Split { partitions });
        assert_labels_resolve(&unit.exec.body, "selector");
        for part in &unit.exec.partitions {
            assert_labels_resolve(&part.body, &format!("partition {}", part.index));
        }
    }
}

#[test]
fn every_state_lives_in_exactly_one_partition() {
    let fsm = busy();
    let order = analysis::depth_first_order(&fsm);
    for partitions in 1..=fsm.state_count() {
        let map = partition_states(&order, partitions).unwrap();
        let mut sizes = vec![0usize; partitions];
        for &p in &map {
            sizes[p] += 1;
        }
        let (min, max) = (sizes.iter().min().unwrap(), sizes.iter().max().unwrap());
        assert!(*min >= 1 && max - min <= 1, "{partitions}: {sizes:?}");

        let unit = lower(&fsm, Shape::Split { partitions });
        let lowered_map = &unit.data.array(ArrayId::PartitionMap).unwrap().values;
        for s in 0..fsm.state_count() as u32 {
            let owners: Vec<usize> = unit
                .exec
                .partitions
                .iter()
                .filter(|u| ir::defined_labels(&u.body).contains(&Label::Case(s)))
                .map(|u| u.index)
                .collect();
            assert_eq!(owners, [map[s as usize]], "state {s} with {partitions} partitions");
            assert_eq!(lowered_map[s as usize], map[s as usize] as i64);
        }
    }
}

#[test]
fn partition_count_must_fit_the_machine() {
    let fsm = busy();
    let c = CFormatter::new();
    let g = Generator::new(&fsm, &c);
    for partitions in [0, fsm.state_count() + 1] {
        let failure = g.lower(Shape::Split { partitions }).unwrap_err();
        assert!(matches!(
            failure.diagnostics[0].error,
            CodegenError::InvalidPartitions { requested, .. } if requested == partitions
        ));
    }
}

#[test]
fn recursive_call_graph_is_closed() {
    let fsm = busy();
    let unit = lower(&fsm, Shape::Recursive);
    let set = unit.exec.functions.as_ref().unwrap();
    assert!(set.unresolved().is_empty());
    assert!(set.get(Func::EofTrans).is_some());
}

#[test]
fn minimal_machine_has_only_the_phases_it_needs() {
    let mut b = FsmBuilder::new(IntType::U8);
    b.ensure_states(1);
    b.set_start(0);
    b.set_default(0, 0, &[]);
    let fsm = b.build().unwrap();

    let unit = lower(&fsm, Shape::Recursive);
    let set = unit.exec.functions.as_ref().unwrap();
    assert!(set.unresolved().is_empty());
    assert!(set.get(Func::EofTrans).is_none());
    assert!(set.functions.iter().all(|f| !matches!(f.id, Func::Action(_))));
    assert!(unit.init.len() == 1);

    // No stack, no longest-match variables, no optional arrays.
    let flat = lower(&fsm, Shape::Flat);
    for id in [ArrayId::TransActions, ArrayId::ToStateActions, ArrayId::EofTrans, ArrayId::CondKeys] {
        assert!(flat.data.array(id).is_none(), "{id:?}");
    }
}

#[test]
fn values_too_wide_for_every_type_are_reported() {
    let n = 300;
    let mut b = FsmBuilder::new(IntType::U8);
    b.ensure_states(n);
    b.set_start(0);
    for s in 0..n as u32 {
        b.set_default(s, (s + 1) % n as u32, &[]);
    }
    let fsm = b.build().unwrap();

    let narrow = CFormatter::with_int_types(vec![IntType::U8]);
    let failure = Generator::new(&fsm, &narrow).lower(Shape::Flat).unwrap_err();
    assert!(failure.diagnostics.iter().any(|d| matches!(
        d.error,
        CodegenError::NoIntType { array: "trans_targs", min: 0, max: 299 }
    )));

    let unit = Generator::new(&fsm, &CFormatter::new()).lower(Shape::Flat).unwrap();
    assert_eq!(unit.data.array(ArrayId::TransTargs).unwrap().ty, IntType::I16);
}

/// Below zero, zero, and above zero over the whole 64-bit key space.
fn full_width() -> RedFsm {
    let mut b = FsmBuilder::new(IntType::I64);
    b.ensure_states(3);
    b.set_start(0);
    b.add_transition(0, KeyRange::new(i64::MIN, -1), 0, &[]);
    b.add_transition(0, KeyRange::single(0), 1, &[]);
    b.add_transition(0, KeyRange::new(1, i64::MAX), 2, &[]);
    b.set_default(1, 1, &[]);
    b.set_default(2, 2, &[]);
    b.set_final(1, true);
    b.build().unwrap()
}

#[test]
fn dense_tables_over_a_full_width_alphabet_are_refused() {
    let fsm = full_width();
    let failure = Generator::new(&fsm, &CFormatter::new()).lower(Shape::Flat).unwrap_err();
    assert_eq!(failure.diagnostics.len(), 1);
    assert!(matches!(
        failure.diagnostics[0].error,
        CodegenError::TableTooLarge { array: "indicies", entries, limit } if entries > limit
    ));
    assert!(failure.diagnostics[0].to_string().contains("array indicies would need"));
}

#[test]
fn table_shape_handles_a_full_width_alphabet() {
    let fsm = full_width();
    let unit = lower(&fsm, Shape::Table);
    for key in [i64::MIN, -5, 0, 1, i64::MAX] {
        let mut m = Machine::new(&unit, Transcript::new());
        m.init().unwrap();
        m.run(&[key], false).unwrap();
        let expected = fsm.trans(fsm.lookup(0, key).unwrap()).target as i64;
        assert_eq!(m.regs().cs, expected, "key {key}");
    }
}

#[test]
fn errors_accumulate_with_locations() {
    let mut b = FsmBuilder::new(IntType::U8);
    b.ensure_states(2);
    b.set_start(0);
    let lost = b.add_action(Action::named("lost", vec![InlineItem::Goto(40)]).at(InputLoc::new("m.rl", 3, 7)));
    let call = b.add_action(Action::named("deep", vec![InlineItem::Call(41)]).at(InputLoc::new("m.rl", 9, 2)));
    b.add_transition(0, key(b'a'), 1, &[lost]);
    b.add_transition(0, key(b'b'), 1, &[call]);
    b.set_default(0, 0, &[]);
    b.set_default(1, 0, &[]);
    let fsm = b.build().unwrap();

    let failure = Generator::new(&fsm, &CFormatter::new()).lower(Shape::Flat).unwrap_err();
    let lines: Vec<String> = failure.diagnostics.iter().map(ToString::to_string).collect();
    assert_eq!(
        lines,
        [
            "m.rl:3:7: error: action refers to unknown state 40",
            "m.rl:9:2: error: action refers to unknown state 41",
            "m.rl:9:2: error: the flat shape does not support call",
        ]
    );

    // The jump shapes support calls, so only the bad references remain.
    let failure = Generator::new(&fsm, &CFormatter::new()).lower(Shape::Goto).unwrap_err();
    assert_eq!(failure.diagnostics.len(), 2);
}

#[test]
fn rust_target_renders_supported_shapes() {
    let fsm = busy();
    let target = RustFormatter::new();
    let g = Generator::new(&fsm, &target);
    let artifacts = g.generate_all(&[Shape::Flat, Shape::Table, Shape::Recursive]).unwrap();
    assert_eq!(artifacts.len(), 3);
    assert!(artifacts[0].data.contains("static _FSM_TRANS_KEYS"));
    assert!(artifacts[1].data.contains("static _FSM_SINGLE_LENGTHS"));
    assert!(artifacts[2].exec.contains("'fsm: loop"));

    let failure = g.generate_all(&[Shape::Goto, Shape::IpGoto, Shape::Split { partitions: 2 }]).unwrap_err();
    assert_eq!(failure.diagnostics.len(), 3);
}

#[test]
fn c_target_renders_every_shape() {
    let fsm = busy();
    let c = CFormatter::new();
    let shapes = [
        Shape::Flat,
        Shape::Table,
        Shape::Goto,
        Shape::IpGoto,
        Shape::Split { partitions: 3 },
        Shape::Recursive,
    ];
    let artifacts = Generator::new(&fsm, &c).generate_all(&shapes).unwrap();
    for artifact in &artifacts {
        assert!(artifact.data.contains("fsm_start"), "{}", artifact.shape.name());
        let code = std::iter::once(&artifact.exec).chain(&artifact.partitions);
        assert!(code.into_iter().any(|c| c.contains("j;")), "{}", artifact.shape.name());
        assert!(artifact.init.contains("cs = fsm_start;"), "{}", artifact.shape.name());
    }
    assert_eq!(artifacts[4].partitions.len(), 3);
}
