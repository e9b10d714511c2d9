use camera_capture::{FrameSource, SimulatedCamera, SimulationConfig};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use detection::{run_detection_cycle, DetectionConfig, DetectionContext};

fn cycle_benchmarks(c: &mut Criterion) {
    let mut source = SimulatedCamera::new(SimulationConfig {
        moving_frames: 1000,
        step: (1, 1),
        ..Default::default()
    })
    .unwrap();
    let frames: Vec<_> = (0..3)
        .map(|n| {
            let mut f = source.grab_image().unwrap();
            f.number = n;
            f
        })
        .collect();

    for (name, config) in [
        ("cycle_640x480_half", DetectionConfig::default()),
        ("cycle_640x480_full", DetectionConfig::full_resolution()),
    ] {
        c.bench_function(name, |b| {
            b.iter_batched(
                || {
                    let mut ctx = DetectionContext::new(config.clone(), frames[0].dim()).unwrap();
                    run_detection_cycle(&mut ctx, &frames[1], &frames[0]).unwrap();
                    ctx
                },
                |mut ctx| {
                    run_detection_cycle(&mut ctx, black_box(&frames[2]), black_box(&frames[1])).unwrap()
                },
                BatchSize::SmallInput,
            )
        });
    }
}

criterion_group!(benches, cycle_benchmarks);
criterion_main!(benches);
