use akaze::DescriptorKind;
use akaze_features::serialize::load_keypoints;
use akaze_features::{run, Error, Report, RunConfig};
use image::{GenericImageView, GrayImage, Luma};
use imageproc::drawing::draw_filled_circle_mut;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A scratch directory holding a synthetic image of bright and dark disks.
fn scene() -> (TempDir, PathBuf) {
    let _ = pretty_env_logger::try_init();
    let dir = tempfile::tempdir().unwrap();
    let mut image = GrayImage::from_pixel(320, 240, Luma([90u8]));
    let disks = [
        (96, 84, 6),
        (160, 84, 9),
        (224, 84, 5),
        (96, 156, 8),
        (160, 156, 5),
        (224, 156, 10),
    ];
    for (i, &(x, y, radius)) in disks.iter().enumerate() {
        let shade = if i % 2 == 0 { 230u8 } else { 10u8 };
        draw_filled_circle_mut(&mut image, (x, y), radius, Luma([shade]));
    }
    let path = dir.path().join("scene.png");
    image.save(&path).unwrap();
    (dir, path)
}

fn run_config(dir: &Path) -> RunConfig {
    RunConfig {
        display: false,
        scale_space_dir: dir.join("images"),
    }
}

fn run_with(dir: &Path, args: &[&str]) -> Result<Report, Error> {
    run(args.iter().copied(), &run_config(dir))
}

#[test]
fn default_run_writes_full_mldb_rows() {
    let (dir, image) = scene();
    let output = dir.path().join("files").join("keypoints.txt");
    let report = run_with(
        dir.path(),
        &[image.to_str().unwrap(), "--output", output.to_str().unwrap()],
    )
    .unwrap();
    assert!(report.keypoints > 0);
    assert_eq!(report.dimension, 61);
    assert_eq!(report.output_path.as_deref(), Some(output.as_path()));

    let text = std::fs::read_to_string(&output).unwrap();
    let header = text.lines().next().unwrap();
    assert_eq!(header, format!("{} 61", report.keypoints));
    assert_eq!(text.lines().count(), report.keypoints + 1);

    let features = load_keypoints(&output, DescriptorKind::Mldb).unwrap();
    assert_eq!(features.len(), report.keypoints);
    assert!(features.descriptors.iter().all(|row| row.len() == 61));
}

#[test]
fn runs_are_byte_identical() {
    let (dir, image) = scene();
    let first = dir.path().join("first.txt");
    let second = dir.path().join("second.txt");
    let image = image.to_str().unwrap();
    let a = run_with(dir.path(), &[image, "--output", first.to_str().unwrap()]).unwrap();
    let b = run_with(dir.path(), &[image, "--output", second.to_str().unwrap()]).unwrap();
    assert_eq!(a.keypoints, b.keypoints);
    assert_eq!(
        std::fs::read(&first).unwrap(),
        std::fs::read(&second).unwrap()
    );
}

#[test]
fn output_without_value_writes_nothing() {
    let (dir, image) = scene();
    let result = run_with(dir.path(), &[image.to_str().unwrap(), "--output"]);
    assert!(matches!(
        result,
        Err(Error::MissingArgument { flag: "--output" })
    ));
    let entries: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(entries, ["scene.png"]);
}

#[test]
fn keypoints_are_only_saved_on_request() {
    let (dir, image) = scene();
    let report = run_with(dir.path(), &[image.to_str().unwrap()]).unwrap();
    assert!(report.output_path.is_none());
    assert!(report.keypoints > 0);
}

#[test]
fn help_and_missing_image_are_usage_errors() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(run_with(dir.path(), &[]), Err(Error::Usage(_))));
    assert!(matches!(
        run_with(dir.path(), &["--help"]),
        Err(Error::Usage(_))
    ));
    assert!(matches!(
        run_with(dir.path(), &["scene.png", "--verbose", "--help"]),
        Err(Error::Usage(_))
    ));
}

#[test]
fn unreadable_image_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.png");
    match run_with(dir.path(), &[missing.to_str().unwrap()]) {
        Err(Error::ImageLoad { path, .. }) => assert_eq!(path, missing),
        other => panic!("expected an image load error, got {:?}", other),
    }
}

#[test]
fn engine_failures_abort_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tiny.png");
    GrayImage::new(16, 16).save(&path).unwrap();
    let output = dir.path().join("keypoints.txt");
    let result = run_with(
        dir.path(),
        &[path.to_str().unwrap(), "--output", output.to_str().unwrap()],
    );
    assert!(matches!(result, Err(Error::Engine(_))));
    assert!(!output.exists());
}

#[test]
fn scale_space_is_saved_on_request() {
    let (dir, image) = scene();
    run_with(
        dir.path(),
        &[image.to_str().unwrap(), "--save_scale_space", "1"],
    )
    .unwrap();
    let images = dir.path().join("images");
    // 320x240 gives four sublevels in each of the first two octaves and one in the third.
    for index in 0..9 {
        let path = images.join(format!("evolution_{:02}.png", index));
        assert!(path.exists(), "{} is missing", path.display());
    }
    let first = image::open(images.join("evolution_00.png")).unwrap();
    assert_eq!((first.width(), first.height()), (320, 240));
}

#[test]
fn msurf_rows_are_floats() {
    let (dir, image) = scene();
    let output = dir.path().join("msurf.txt");
    let report = run_with(
        dir.path(),
        &[
            image.to_str().unwrap(),
            "--descriptor",
            "1",
            "--output",
            output.to_str().unwrap(),
        ],
    )
    .unwrap();
    assert_eq!(report.dimension, 64);
    let features = load_keypoints(&output, DescriptorKind::Msurf).unwrap();
    assert_eq!(features.len(), report.keypoints);
}

#[test]
fn shortened_binary_rows() {
    let (dir, image) = scene();
    let output = dir.path().join("short.txt");
    let report = run_with(
        dir.path(),
        &[
            image.to_str().unwrap(),
            "--descriptor_size",
            "64",
            "--descriptor_channels",
            "1",
            "--output",
            output.to_str().unwrap(),
        ],
    )
    .unwrap();
    assert_eq!(report.dimension, 8);
    let text = std::fs::read_to_string(&output).unwrap();
    assert!(text.starts_with(&format!("{} 8\n", report.keypoints)));
}

#[cfg(unix)]
#[test]
fn non_utf8_image_path_is_a_load_error() {
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt;

    let dir = tempfile::tempdir().unwrap();
    let mut bytes = dir.path().as_os_str().to_owned().into_vec();
    bytes.extend_from_slice(b"/img_\xff.png");
    let missing = PathBuf::from(OsString::from_vec(bytes));
    match run(vec![missing.clone().into_os_string()], &run_config(dir.path())) {
        Err(Error::ImageLoad { path, .. }) => assert_eq!(path, missing),
        other => panic!("expected an image load error, got {:?}", other),
    }
}
