use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use livecircuit::*;

/// Battery feeding a resistor ladder with `rungs` sections
fn ladder_network(rungs: usize) -> Network {
    let mut network = Network::new();
    network.add_battery(NodeId(0), NodeId(1), 10.0);
    for i in 1..=rungs {
        network.add_resistor(NodeId(i), NodeId(i + 1), 1.0);
        network.add_resistor(NodeId(i + 1), NodeId(0), 2.0);
    }
    network
}

fn rc_circuit() -> Circuit {
    let mut circuit = Circuit::new();
    circuit.add(NodeId(0), NodeId(1), ElementKind::Battery { voltage: 5.0, internal_resistance: 0.1 });
    circuit.add(NodeId(1), NodeId(2), ElementKind::Resistor { resistance: 10.0 });
    circuit.add(
        NodeId(2),
        NodeId(0),
        ElementKind::Capacitor { capacitance: 0.01, state: DynamicState::default() },
    );
    circuit
}

fn bench_static_solve(c: &mut Criterion) {
    let mut group = c.benchmark_group("static_solve");

    for rungs in [5, 20, 50, 100].iter() {
        let network = ladder_network(*rungs);
        group.bench_with_input(BenchmarkId::new("ladder", rungs), &network, |b, network| {
            b.iter(|| solve(black_box(network)));
        });
    }

    group.finish();
}

fn bench_transient_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("transient_step");

    let circuit = rc_circuit();
    group.bench_function("rc_16ms", |b| {
        b.iter(|| advance(black_box(&circuit), 0.016));
    });

    group.bench_function("rc_60_frames", |b| {
        b.iter(|| {
            let mut simulator = Simulator::new(circuit.clone());
            for _ in 0..60 {
                simulator.step(1.0 / 60.0);
            }
            simulator.time()
        });
    });

    group.finish();
}

criterion_group!(benches, bench_static_solve, bench_transient_step);
criterion_main!(benches);
