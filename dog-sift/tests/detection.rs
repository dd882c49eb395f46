use dog_sift::{CancellationToken, DefaultFilter, GrayFloatImage, Sift};
use image::{ImageBuffer, Luma};
use log::*;

/// Bright Gaussian blobs of standard deviation 7.6 on a black background.
fn blobs(size: usize, centers: &[(f32, f32)]) -> GrayFloatImage {
    GrayFloatImage::from_fn(size, size, |row, col| {
        centers
            .iter()
            .map(|&(r, c)| {
                let d2 = (row as f32 - r).powi(2) + (col as f32 - c).powi(2);
                (-d2 / (2.0 * 7.6 * 7.6)).exp()
            })
            .sum()
    })
}

#[test]
fn flat_images_have_no_keypoints() {
    let _ = pretty_env_logger::try_init();
    let sift = Sift {
        base_size: 64,
        ..Default::default()
    };
    let detection = sift.detect(&GrayFloatImage::new(64, 64, 0.5)).unwrap();
    assert!(detection.keypoints.is_empty());
    assert_eq!(detection.rejected.extrema, 0);
}

#[test]
fn single_blob_gives_single_keypoint() {
    let _ = pretty_env_logger::try_init();
    let sift = Sift {
        base_size: 64,
        ..Default::default()
    };
    let detection = sift.detect(&blobs(64, &[(32.0, 32.0)])).unwrap();
    info!("{:?}", detection.rejected);
    assert_eq!(detection.keypoints.len(), 1);
    let keypoint = detection.keypoints[0];
    assert_eq!((keypoint.scale, keypoint.row, keypoint.col), (1, 32, 32));
    // A bright blob is a minimum of the later-minus-earlier difference.
    assert!(keypoint.contrast < -sift.contrast_threshold);
    assert!((keypoint.x - 8.0).abs() < 0.05);
    assert!((keypoint.y - 8.0).abs() < 0.05);
    assert!(keypoint.sigma > 2.5 && keypoint.sigma < 3.2);
    // The ring around the blob is found but rejected as an edge.
    assert!(detection.rejected.edge > 0);
    assert_eq!(detection.points(), vec![(keypoint.x, keypoint.y)]);
}

#[test]
fn separate_blobs_are_found_in_scan_order() {
    let _ = pretty_env_logger::try_init();
    let sift = Sift {
        base_size: 128,
        ..Default::default()
    };
    let keypoints = sift
        .detect_with(
            &blobs(128, &[(92.0, 92.0), (36.0, 36.0)]),
            &DefaultFilter,
            &CancellationToken::new(),
        )
        .unwrap()
        .keypoints;
    let positions: Vec<(usize, usize)> = keypoints.iter().map(|kp| (kp.row, kp.col)).collect();
    assert_eq!(positions, vec![(36, 36), (92, 92)]);
}

#[test]
fn keypoints_from_disk_match_keypoints_from_memory() {
    let _ = pretty_env_logger::try_init();
    let image = blobs(256, &[(128.0, 128.0)]);
    let path = std::env::temp_dir().join(format!("dog-sift-detect-{}.png", std::process::id()));
    ImageBuffer::<Luma<u16>, Vec<u16>>::from_fn(256, 256, |x, y| {
        Luma([(image.get(y as usize, x as usize) * 65535.0).round() as u16])
    })
    .save(&path)
    .unwrap();
    let from_disk = Sift::default().extract_path(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(from_disk.len(), 1);
    assert_eq!((from_disk[0].row, from_disk[0].col), (128, 128));
    assert!((from_disk[0].x - 32.0).abs() < 0.05);
    assert!((from_disk[0].y - 32.0).abs() < 0.05);
}

#[test]
fn missing_files_are_reported() {
    let result = Sift::default().extract_path("does/not/exist.png");
    assert!(matches!(result, Err(dog_sift::SiftError::Image(_))));
}
