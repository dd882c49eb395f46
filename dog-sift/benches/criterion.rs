use criterion::{criterion_group, criterion_main, Criterion};
use dog_sift::image::GrayFloatImage;
use dog_sift::{CancellationToken, Matcher, Sift};

/// Bright blobs on a dark background with a gentle ramp.
fn synthetic_image(size: usize) -> GrayFloatImage {
    let centers = [(40.0, 60.0), (128.0, 128.0), (200.0, 90.0), (70.0, 210.0)];
    GrayFloatImage::from_fn(size, size, |row, col| {
        let ramp = 0.2 * (row + col) as f32 / (2 * size) as f32;
        let blobs: f32 = centers
            .iter()
            .map(|&(r, c): &(f32, f32)| {
                let d2 = (row as f32 - r).powi(2) + (col as f32 - c).powi(2);
                0.7 * (-d2 / 100.0).exp()
            })
            .sum();
        ramp + blobs
    })
}

fn detect(c: &mut Criterion) {
    let image = synthetic_image(256);
    let sift = Sift::default();
    c.bench_function("detect", |b| b.iter(|| sift.detect(&image)));
    let deep = Sift {
        num_octaves: 4,
        ..Default::default()
    };
    c.bench_function("detect_four_octaves", |b| b.iter(|| deep.detect(&image)));
}

fn match_pairs(c: &mut Criterion) {
    let image = synthetic_image(256);
    let sift = Sift::default();
    let matcher = Matcher::default();
    let keypoints = sift.detect(&image).unwrap().keypoints;
    let subjects: Vec<_> = (0..4)
        .map(|i| {
            matcher
                .subject(format!("image{}", i), &image, keypoints.clone())
                .unwrap()
        })
        .collect();
    c.bench_function("match_all", |b| {
        b.iter(|| matcher.match_all(&subjects, &CancellationToken::new()))
    });
}

criterion_group!(
    name = detector;
    config = Criterion::default().sample_size(10);
    targets = detect, match_pairs
);

fn bench_horizontal_filter(c: &mut Criterion) {
    let image = synthetic_image(256);
    let small_kernel = dog_sift::image::gaussian_kernel(1.0, 7);
    c.bench_function("horizontal_filter_small_kernel", |b| {
        b.iter(|| dog_sift::image::horizontal_filter(&image.0, &small_kernel))
    });
    let large_kernel = dog_sift::image::gaussian_kernel(10.0, 71);
    c.bench_function("horizontal_filter_large_kernel", |b| {
        b.iter(|| dog_sift::image::horizontal_filter(&image.0, &large_kernel))
    });
}

fn bench_vertical_filter(c: &mut Criterion) {
    let image = synthetic_image(256);
    let small_kernel = dog_sift::image::gaussian_kernel(1.0, 7);
    c.bench_function("vertical_filter_small_kernel", |b| {
        b.iter(|| dog_sift::image::vertical_filter(&image.0, &small_kernel))
    });
    let large_kernel = dog_sift::image::gaussian_kernel(10.0, 71);
    c.bench_function("vertical_filter_large_kernel", |b| {
        b.iter(|| dog_sift::image::vertical_filter(&image.0, &large_kernel))
    });
}

fn bench_smooth_more(c: &mut Criterion) {
    let image = synthetic_image(256);
    c.bench_function("smooth_more", |b| {
        b.iter(|| dog_sift::image::smooth_more(&image))
    });
}

criterion_group!(
    name = image_filters;
    config = Criterion::default().sample_size(10);
    targets = bench_horizontal_filter, bench_vertical_filter, bench_smooth_more
);

criterion_main!(detector, image_filters);
