use criterion::{black_box, criterion_group, criterion_main, Criterion};
use runman_exp::{materialize, BaseConfiguration, ParameterSpec, Sweep};
use runman_core::Parameterised;
use runman_track::{MetricManager, MultiTargetTracker};
use serde_json::json;

fn make_spec() -> ParameterSpec {
    serde_json::from_value(json!({
        "parameters": [
            {"path": "tracker.initiator.min_points", "values": [2, 3, 4]},
            {"path": "tracker.updater.measurement_noise", "min": 0.25, "max": 2.0, "step": 0.25},
            {"path": "tracker.deleter.covar_trace_thresh", "min": 50.0, "max": 250.0, "count": 5}
        ],
        "runs_num": 4
    }))
    .expect("spec")
}

fn bench_expand(c: &mut Criterion) {
    let spec = make_spec();
    let base = BaseConfiguration::<MultiTargetTracker, MetricManager>::from_yaml_str(
        "- detector:\n    groundtruth:\n      seed: 1\n",
    )
    .expect("base");
    let registry = MultiTargetTracker::field_registry();

    c.bench_function("sweep_expand", |b| {
        b.iter(|| {
            let sweep = Sweep::new(black_box(&spec)).expect("sweep");
            black_box(sweep.iter().count())
        });
    });
    c.bench_function("sweep_materialize", |b| {
        let sweep = Sweep::new(&spec).expect("sweep");
        b.iter(|| {
            for combination in sweep.iter() {
                black_box(materialize(&base, &combination, &registry).expect("materialize"));
            }
        });
    });
}

criterion_group!(benches, bench_expand);
criterion_main!(benches);
