use criterion::{criterion_group, criterion_main, Criterion};
use std::{hint::black_box, time::Duration};

use asset_services::control::{ControllerState, PiController, PiGains};

fn pi_step_bench(c: &mut Criterion) {
    let pi = PiController::new(PiGains {
        kp: 5.0,
        ki: 0.5,
        lambda: 0.5,
    });
    let mut state = ControllerState::default();
    let period = Duration::from_secs(5);

    c.bench_function("pi_step", |b| {
        b.iter(|| {
            let out = pi.step(&mut state, black_box(20.0), black_box(17.5), period);
            assert!((0.0..=100.0).contains(&out));
        })
    });
}

criterion_group!(benches, pi_step_bench);
criterion_main!(benches);
