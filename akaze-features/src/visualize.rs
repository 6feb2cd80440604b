use akaze::KeyPoint;
use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use imageproc::drawing;

const CIRCLE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const CENTER_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const ORIENTATION_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Draw `keypoints` on a color copy of `image`.
///
/// Every keypoint gets a circle as large as its size and a dot at its center.
/// Unless `upright` is set a line from the center shows its orientation.
pub fn draw_keypoints(image: &GrayImage, keypoints: &[KeyPoint], upright: bool) -> RgbImage {
    let mut canvas = DynamicImage::ImageLuma8(image.clone()).to_rgb8();
    for keypoint in keypoints {
        let (x, y) = keypoint.point;
        let center = (x.round() as i32, y.round() as i32);
        let radius = keypoint.size.round().max(1.0);
        drawing::draw_hollow_circle_mut(&mut canvas, center, radius as i32, CIRCLE_COLOR);
        if !upright {
            let tip = (
                x + radius * keypoint.angle.cos(),
                y + radius * keypoint.angle.sin(),
            );
            drawing::draw_line_segment_mut(&mut canvas, (x, y), tip, ORIENTATION_COLOR);
        }
        drawing::draw_filled_circle_mut(&mut canvas, center, 1, CENTER_COLOR);
    }
    canvas
}

/// Open `image` in the default viewer and wait until Enter is pressed.
#[cfg(feature = "display")]
pub fn show(image: &RgbImage) -> Result<(), crate::Error> {
    let path = tempfile::Builder::new()
        .prefix("akaze-keypoints-")
        .suffix(".png")
        .tempfile()
        .map_err(|e| crate::Error::serialization(std::env::temp_dir(), e))?
        .into_temp_path();
    image
        .save(&path)
        .map_err(|e| crate::Error::serialization(&*path, e))?;
    open::that(&path).map_err(|source| crate::Error::Display {
        step: "open the image viewer",
        source,
    })?;
    println!("Press Enter to continue.");
    wait_for_enter(std::io::stdin().lock())
}

#[cfg(feature = "display")]
fn wait_for_enter(mut input: impl std::io::BufRead) -> Result<(), crate::Error> {
    let mut line = String::new();
    input
        .read_line(&mut line)
        .map_err(|source| crate::Error::Display {
            step: "read from stdin",
            source,
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn keypoint(x: f32, y: f32, size: f32, angle: f32) -> KeyPoint {
        KeyPoint {
            point: (x, y),
            response: 1.0,
            size,
            octave: 0,
            class_id: 0,
            angle,
        }
    }

    #[test]
    fn source_is_left_untouched() {
        let source = GrayImage::from_pixel(40, 30, Luma([77]));
        let before = source.clone();
        let overlay = draw_keypoints(&source, &[keypoint(20.0, 15.0, 6.0, 1.0)], false);
        assert_eq!(source, before);
        assert_eq!(overlay.dimensions(), (40, 30));
        assert_eq!(overlay.get_pixel(0, 0), &Rgb([77, 77, 77]));
    }

    #[test]
    fn keypoints_are_marked() {
        let source = GrayImage::from_pixel(40, 30, Luma([0]));
        let overlay = draw_keypoints(&source, &[keypoint(20.0, 15.0, 6.0, 0.0)], false);
        assert_eq!(overlay.get_pixel(20, 15), &CENTER_COLOR);
        assert_eq!(overlay.get_pixel(20, 9), &CIRCLE_COLOR);
        // Angle zero points along +x, past the center dot.
        assert_eq!(overlay.get_pixel(24, 15), &ORIENTATION_COLOR);
    }

    #[test]
    fn upright_keypoints_have_no_orientation_line() {
        let source = GrayImage::from_pixel(40, 30, Luma([0]));
        let overlay = draw_keypoints(&source, &[keypoint(20.0, 15.0, 6.0, 0.0)], true);
        assert_eq!(overlay.get_pixel(24, 15), &Rgb([0, 0, 0]));
    }

    #[test]
    fn keypoints_near_the_border_are_clipped() {
        let source = GrayImage::new(10, 10);
        let overlay = draw_keypoints(&source, &[keypoint(0.5, 9.5, 20.0, 4.0)], false);
        assert_eq!(overlay.dimensions(), (10, 10));
    }

    #[cfg(feature = "display")]
    #[test]
    fn stdin_failures_name_the_display_step() {
        struct Broken;

        impl std::io::Read for Broken {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::ErrorKind::BrokenPipe.into())
            }
        }

        let error = wait_for_enter(std::io::BufReader::new(Broken)).unwrap_err();
        assert!(matches!(
            error,
            crate::Error::Display {
                step: "read from stdin",
                ..
            }
        ));
        assert_eq!(
            error.to_string(),
            "cannot show keypoints, failed to read from stdin"
        );
        assert!(wait_for_enter(&b"\n"[..]).is_ok());
    }
}
