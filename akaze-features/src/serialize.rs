//! Plain text keypoint files.
//!
//! The first line is `<count> <dimension>`. Every following line holds one
//! keypoint as `x y size angle` and then its descriptor row. Real rows are
//! written as floats, binary rows as one decimal integer per byte. Floats use
//! the shortest representation that reads back to the same value.

use crate::pipeline::Features;
use crate::Error;
use akaze::{Descriptor, DescriptorKind, KeyPoint};
use log::*;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("keypoint file is empty")]
    MissingHeader,
    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("header announces {expected} keypoints but {found} were read")]
    CountMismatch { expected: usize, found: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Write `features` to `writer`.
///
/// Fails with [`io::ErrorKind::InvalidInput`] if a row does not have
/// `features.dimension` values or the sequences differ in length.
pub fn write_keypoints<W: Write>(writer: &mut W, features: &Features) -> io::Result<()> {
    if features.keypoints.len() != features.descriptors.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "{} keypoints but {} descriptor rows",
                features.keypoints.len(),
                features.descriptors.len()
            ),
        ));
    }
    writeln!(writer, "{} {}", features.len(), features.dimension)?;
    for (keypoint, descriptor) in features.keypoints.iter().zip(&features.descriptors) {
        if descriptor.len() != features.dimension {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "descriptor row of {} values, expected {}",
                    descriptor.len(),
                    features.dimension
                ),
            ));
        }
        let (x, y) = keypoint.point;
        write!(writer, "{} {} {} {}", x, y, keypoint.size, keypoint.angle)?;
        match descriptor {
            Descriptor::Real(values) => {
                for value in values {
                    write!(writer, " {}", value)?;
                }
            }
            Descriptor::Binary(bytes) => {
                for byte in bytes {
                    write!(writer, " {}", byte)?;
                }
            }
        }
        writeln!(writer)?;
    }
    Ok(())
}

/// Write `features` to the file at `path`, creating missing parent directories.
///
/// A failure partway through leaves a partial file behind.
pub fn save_keypoints(path: impl AsRef<Path>, features: &Features) -> Result<(), Error> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::serialization(path, e))?;
    }
    let file = File::create(path).map_err(|e| Error::serialization(path, e))?;
    let mut writer = BufWriter::new(file);
    write_keypoints(&mut writer, features)
        .and_then(|()| writer.flush())
        .map_err(|e| Error::serialization(path, e))?;
    info!("Saved {} keypoints to {}", features.len(), path.display());
    Ok(())
}

fn malformed(line: usize, reason: impl Into<String>) -> ReadError {
    ReadError::Malformed {
        line,
        reason: reason.into(),
    }
}

fn parse_field<T: std::str::FromStr>(line: usize, field: &str) -> Result<T, ReadError> {
    field
        .parse()
        .map_err(|_| malformed(line, format!("cannot parse {:?}", field)))
}

/// Read a keypoint file back.
///
/// `kind` tells how rows were written. Fields that are not stored in the file
/// (response, octave, class) read back as zero.
pub fn read_keypoints<R: BufRead>(reader: R, kind: DescriptorKind) -> Result<Features, ReadError> {
    let mut lines = reader.lines().enumerate().map(|(index, line)| (index + 1, line));
    let (header_line, header) = match lines.next() {
        Some((number, line)) => (number, line?),
        None => return Err(ReadError::MissingHeader),
    };
    let header: Vec<&str> = header.split_whitespace().collect();
    let [count, dimension] = header[..] else {
        return Err(malformed(header_line, "header must be `<count> <dimension>`"));
    };
    let count: usize = parse_field(header_line, count)?;
    let dimension: usize = parse_field(header_line, dimension)?;

    let mut keypoints = Vec::with_capacity(count);
    let mut descriptors = Vec::with_capacity(count);
    for (number, line) in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 4 + dimension {
            return Err(malformed(
                number,
                format!("expected {} fields, found {}", 4 + dimension, fields.len()),
            ));
        }
        keypoints.push(KeyPoint {
            point: (parse_field(number, fields[0])?, parse_field(number, fields[1])?),
            response: 0.0,
            size: parse_field(number, fields[2])?,
            octave: 0,
            class_id: 0,
            angle: parse_field(number, fields[3])?,
        });
        let payload = &fields[4..];
        let descriptor = if kind.is_binary() {
            Descriptor::Binary(
                payload
                    .iter()
                    .map(|field| parse_field(number, field))
                    .collect::<Result<_, _>>()?,
            )
        } else {
            Descriptor::Real(
                payload
                    .iter()
                    .map(|field| parse_field(number, field))
                    .collect::<Result<_, _>>()?,
            )
        };
        descriptors.push(descriptor);
    }
    if keypoints.len() != count {
        return Err(ReadError::CountMismatch {
            expected: count,
            found: keypoints.len(),
        });
    }
    Ok(Features {
        keypoints,
        descriptors,
        dimension,
    })
}

/// Read the keypoint file at `path`.
pub fn load_keypoints(
    path: impl AsRef<Path>,
    kind: DescriptorKind,
) -> Result<Features, ReadError> {
    read_keypoints(BufReader::new(File::open(path)?), kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypoint(x: f32, y: f32, size: f32, angle: f32) -> KeyPoint {
        KeyPoint {
            point: (x, y),
            response: 0.0,
            size,
            octave: 0,
            class_id: 0,
            angle,
        }
    }

    fn binary_features() -> Features {
        Features {
            keypoints: vec![
                keypoint(12.5, 40.25, 3.2, 0.0),
                keypoint(0.1, 99.999, 9.6, 6.1),
            ],
            descriptors: vec![
                Descriptor::Binary(vec![0, 255, 17]),
                Descriptor::Binary(vec![128, 1, 2]),
            ],
            dimension: 3,
        }
    }

    fn to_text(features: &Features) -> String {
        let mut buffer = Vec::new();
        write_keypoints(&mut buffer, features).unwrap();
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn binary_rows_are_decimal_bytes() {
        assert_eq!(
            to_text(&binary_features()),
            "2 3\n12.5 40.25 3.2 0 0 255 17\n0.1 99.999 9.6 6.1 128 1 2\n"
        );
    }

    #[test]
    fn binary_file_reads_back() {
        let features = binary_features();
        let text = to_text(&features);
        let read = read_keypoints(text.as_bytes(), DescriptorKind::Mldb).unwrap();
        assert_eq!(read, features);
    }

    #[test]
    fn real_rows_keep_every_bit() {
        let features = Features {
            keypoints: vec![keypoint(1.0 / 3.0, 2.0 / 7.0, 1.6e-3, std::f32::consts::PI)],
            descriptors: vec![Descriptor::Real(vec![0.1, -0.2, 1e-8, 0.70710677])],
            dimension: 4,
        };
        let text = to_text(&features);
        assert!(text.starts_with("1 4\n"));
        let read = read_keypoints(text.as_bytes(), DescriptorKind::Msurf).unwrap();
        assert_eq!(read, features);
    }

    #[test]
    fn empty_features_write_a_header_only() {
        let features = Features {
            keypoints: vec![],
            descriptors: vec![],
            dimension: 61,
        };
        assert_eq!(to_text(&features), "0 61\n");
        let read = read_keypoints("0 61\n".as_bytes(), DescriptorKind::Mldb).unwrap();
        assert_eq!(read, features);
    }

    #[test]
    fn inconsistent_features_are_refused() {
        let mut features = binary_features();
        features.descriptors.pop();
        assert!(write_keypoints(&mut Vec::new(), &features).is_err());
        let mut features = binary_features();
        features.dimension = 4;
        assert!(write_keypoints(&mut Vec::new(), &features).is_err());
    }

    #[test]
    fn malformed_files_are_rejected() {
        assert!(matches!(
            read_keypoints("".as_bytes(), DescriptorKind::Mldb),
            Err(ReadError::MissingHeader)
        ));
        assert!(matches!(
            read_keypoints("2\n".as_bytes(), DescriptorKind::Mldb),
            Err(ReadError::Malformed { line: 1, .. })
        ));
        assert!(matches!(
            read_keypoints("1 2\n1 2 3 4 5\n".as_bytes(), DescriptorKind::Mldb),
            Err(ReadError::Malformed { line: 2, .. })
        ));
        assert!(matches!(
            read_keypoints("1 1\n1 2 3 4 256\n".as_bytes(), DescriptorKind::Mldb),
            Err(ReadError::Malformed { line: 2, .. })
        ));
        assert!(matches!(
            read_keypoints("2 1\n1 2 3 4 5\n".as_bytes(), DescriptorKind::Mldb),
            Err(ReadError::CountMismatch {
                expected: 2,
                found: 1
            })
        ));
    }

    #[test]
    fn saving_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("files").join("keypoints.txt");
        save_keypoints(&path, &binary_features()).unwrap();
        let read = load_keypoints(&path, DescriptorKind::Mldb).unwrap();
        assert_eq!(read, binary_features());
    }

    #[test]
    fn unwritable_path_is_a_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened as a file.
        assert!(matches!(
            save_keypoints(dir.path(), &binary_features()),
            Err(Error::Serialization { .. })
        ));
    }
}
