// Criterion benchmarks for fsmgen-codegen.
//
// The machine is synthetic: a keyword trie over a fixed word list, with an
// action on every accepting transition, so table compaction and the jump
// shapes see realistic fan-out.
//
// Run:
//   cargo bench -p fsmgen-codegen

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use fsmgen_codegen::format::c::CFormatter;
use fsmgen_codegen::sim::{Machine, Transcript, bytes};
use fsmgen_codegen::tables::{FlatTables, SearchTables, jump_tables};
use fsmgen_codegen::{Generator, Shape};
use fsmgen_core::action::{Action, InlineItem};
use fsmgen_core::builder::FsmBuilder;
use fsmgen_core::fsm::RedFsm;
use fsmgen_core::keys::{IntType, KeyRange};

const WORDS: &[&str] = &[
    "alignas", "alignof", "auto", "bool", "break", "case", "char", "const", "constexpr", "continue",
    "default", "do", "double", "else", "enum", "extern", "false", "float", "for", "goto", "if",
    "inline", "int", "long", "nullptr", "register", "restrict", "return", "short", "signed",
    "sizeof", "static", "struct", "switch", "true", "typedef", "typeof", "union", "unsigned",
    "void", "volatile", "while",
];

// ---------------------------------------------------------------------------
// Machine construction
// ---------------------------------------------------------------------------

fn keyword_trie() -> RedFsm {
    let mut b = FsmBuilder::new(IntType::U8);
    let start = b.add_state();
    b.set_start(start);
    let mut edges: Vec<(u32, u8, u32)> = Vec::new();
    for (i, word) in WORDS.iter().enumerate() {
        let mut at = start;
        for (j, ch) in word.bytes().enumerate() {
            let found = edges.iter().find(|&&(from, c, _)| from == at && c == ch).map(|e| e.2);
            let next = match found {
                Some(next) => next,
                None => {
                    let next = b.add_state();
                    let last = j + 1 == word.len();
                    let acts = if last {
                        vec![b.add_action(Action::new(vec![InlineItem::text(format!("kw({i});"))]))]
                    } else {
                        Vec::new()
                    };
                    b.add_transition(at, KeyRange::single(ch as i64), next, &acts);
                    edges.push((at, ch, next));
                    next
                }
            };
            at = next;
        }
        b.set_final(at, true);
    }
    for s in 0..b.state_count() as u32 {
        b.set_default(s, start, &[]);
    }
    b.build().expect("keyword trie")
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_compaction(c: &mut Criterion) {
    let fsm = keyword_trie();
    c.bench_function("flat_tables", |b| {
        b.iter(|| FlatTables::build(std::hint::black_box(&fsm)).expect("flat tables"))
    });
    c.bench_function("search_tables", |b| {
        b.iter(|| SearchTables::build(std::hint::black_box(&fsm), &jump_tables(&fsm)))
    });
}

fn bench_generate(c: &mut Criterion) {
    let fsm = keyword_trie();
    let target = CFormatter::new();
    let g = Generator::new(&fsm, &target);
    let mut group = c.benchmark_group("generate");
    for shape in [
        Shape::Flat,
        Shape::Table,
        Shape::Goto,
        Shape::IpGoto,
        Shape::Split { partitions: 4 },
        Shape::Recursive,
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(shape.name()), &shape, |b, &shape| {
            b.iter(|| g.generate(shape).expect("generate"))
        });
    }
    group.finish();
}

fn bench_simulate(c: &mut Criterion) {
    let fsm = keyword_trie();
    let target = CFormatter::new();
    let g = Generator::new(&fsm, &target);
    let input = bytes(&WORDS.join(" ").repeat(8));
    let mut group = c.benchmark_group("simulate");
    for shape in [Shape::Flat, Shape::Table, Shape::IpGoto] {
        let unit = g.lower(shape).expect("lower");
        group.bench_function(shape.name(), |b| {
            b.iter(|| {
                let mut m = Machine::new(&unit, Transcript::new());
                m.init().expect("init");
                m.run(&input, true).expect("run");
                m.host().log.len()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compaction, bench_generate, bench_simulate);
criterion_main!(benches);
