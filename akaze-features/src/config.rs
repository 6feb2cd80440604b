//! Command line parsing.
//!
//! The argument list is a single image path followed by long flags. Flags that
//! take a value consume the next token unconditionally. Numbers are read the
//! way C's `atof`/`atoi` read them: the longest numeric prefix wins and text
//! without one reads as zero. Unrecognized flags are skipped.

use crate::Error;
use akaze::{DescriptorKind, Diffusivity};
use log::*;
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;

/// Where keypoints are written when `--output` is not given.
pub const DEFAULT_OUTPUT_PATH: &str = "../output/files/keypoints.txt";

pub const USAGE: &str = "\
usage: akaze-features image_path [options]

options:
  --soffset <float>              base scale offset (sigma units)
  --omax <int>                   maximum octave evolution of the image
  --nsublevels <int>             number of sublevels per octave
  --dthreshold <float>           detector response threshold
  --sderivatives <float>         smoothing sigma applied before derivatives
  --diffusivity <0..3>           0 PM-G1, 1 PM-G2, 2 Weickert, 3 Charbonnier
  --descriptor <0..2>            0 upright M-SURF, 1 M-SURF, 2 M-LDB
  --descriptor_channels <1..3>   channels of the M-LDB descriptor
  --descriptor_size <int>        M-LDB length in bits, 0 for the full length
  --save_scale_space <0|1>       write every evolution as an image
  --upright <0|1>                skip orientation assignment
  --output <path>                write keypoints and descriptors to <path>
  --verbose                      print the resolved options
  --help                         print this message";

/// Extraction settings of one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Options {
    /// Base scale offset (sigma units)
    pub soffset: f64,
    /// Maximum octave evolution of the image
    pub omax: i32,
    /// Number of sublevels per octave
    pub nsublevels: i32,
    /// Detector response threshold to accept a point
    pub dthreshold: f64,
    pub diffusivity: Diffusivity,
    pub descriptor: DescriptorKind,
    /// M-LDB length in bits, 0 means full length
    pub descriptor_size: u32,
    /// Channels of the M-LDB descriptor, always within `1..=3`
    pub descriptor_channels: u32,
    /// Half size of the M-LDB sampling pattern in units of the keypoint scale
    pub descriptor_pattern_size: i32,
    /// Smoothing sigma applied to each evolution before taking derivatives
    pub sderivatives: f64,
    pub upright: bool,
    pub save_scale_space: bool,
    pub save_keypoints: bool,
    pub verbosity: bool,
    /// Filled in by [`Options::with_image_size`] once the image is loaded.
    pub img_width: u32,
    pub img_height: u32,
}

impl Options {
    pub const DEFAULT: Options = Options {
        soffset: 1.6,
        omax: 4,
        nsublevels: 4,
        dthreshold: 0.001,
        diffusivity: Diffusivity::PmG2,
        descriptor: DescriptorKind::Mldb,
        descriptor_size: 0,
        descriptor_channels: 3,
        descriptor_pattern_size: 10,
        sderivatives: 1.0,
        upright: false,
        save_scale_space: false,
        save_keypoints: false,
        verbosity: false,
        img_width: 0,
        img_height: 0,
    };

    /// The same options with the dimensions of the loaded image.
    pub fn with_image_size(self, img_width: u32, img_height: u32) -> Self {
        Options {
            img_width,
            img_height,
            ..self
        }
    }

    /// Whether keypoints carry no orientation.
    pub fn is_upright(&self) -> bool {
        self.upright || self.descriptor == DescriptorKind::UprightMsurf
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "soffset: {}", self.soffset)?;
        writeln!(f, "omax: {}", self.omax)?;
        writeln!(f, "nsublevels: {}", self.nsublevels)?;
        writeln!(f, "dthreshold: {}", self.dthreshold)?;
        writeln!(
            f,
            "diffusivity: {:?} ({})",
            self.diffusivity,
            self.diffusivity.code()
        )?;
        writeln!(
            f,
            "descriptor: {:?} ({})",
            self.descriptor,
            self.descriptor.code()
        )?;
        writeln!(f, "descriptor_size: {}", self.descriptor_size)?;
        writeln!(f, "descriptor_channels: {}", self.descriptor_channels)?;
        writeln!(f, "descriptor_pattern_size: {}", self.descriptor_pattern_size)?;
        writeln!(f, "sderivatives: {}", self.sderivatives)?;
        writeln!(f, "upright: {}", self.upright)?;
        writeln!(f, "save_scale_space: {}", self.save_scale_space)?;
        writeln!(f, "save_keypoints: {}", self.save_keypoints)?;
        write!(f, "verbosity: {}", self.verbosity)
    }
}

/// The outcome of a successful parse.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub options: Options,
    pub image_path: PathBuf,
    /// Only written to when `options.save_keypoints` is set.
    pub output_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flag {
    Soffset,
    Omax,
    Dthreshold,
    Sderivatives,
    Nsublevels,
    Diffusivity,
    Descriptor,
    DescriptorChannels,
    DescriptorSize,
    SaveScaleSpace,
    Upright,
    Output,
    Verbose,
    Help,
}

const FLAGS: &[(&str, Flag)] = &[
    ("--soffset", Flag::Soffset),
    ("--omax", Flag::Omax),
    ("--dthreshold", Flag::Dthreshold),
    ("--sderivatives", Flag::Sderivatives),
    ("--nsublevels", Flag::Nsublevels),
    ("--diffusivity", Flag::Diffusivity),
    ("--descriptor", Flag::Descriptor),
    ("--descriptor_channels", Flag::DescriptorChannels),
    ("--descriptor_size", Flag::DescriptorSize),
    ("--save_scale_space", Flag::SaveScaleSpace),
    ("--upright", Flag::Upright),
    ("--output", Flag::Output),
    ("--verbose", Flag::Verbose),
    ("--help", Flag::Help),
];

impl Flag {
    fn lookup(token: &str) -> Option<(&'static str, Flag)> {
        FLAGS.iter().copied().find(|&(name, _)| name == token)
    }

    fn takes_value(self) -> bool {
        !matches!(self, Flag::Verbose | Flag::Help)
    }
}

/// Parse the arguments that follow the program name.
///
/// Defaults are in place before the first flag is read. A value-taking flag
/// in last position discards the whole parse, and so does `--help` wherever
/// it appears as a flag. Arguments need not be UTF-8: the image and output
/// paths are kept as given and other tokens are read lossily.
pub fn parse_args<I, S>(args: I) -> Result<Config, Error>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    let mut tokens = args.into_iter().map(Into::into);
    let image_path = match tokens.next() {
        None => return Err(Error::Usage("an image path is required")),
        Some(first) if first == "--help" => return Err(Error::Usage("help requested")),
        Some(path) => PathBuf::from(path),
    };

    let mut options = Options::DEFAULT;
    let mut output_path = PathBuf::from(DEFAULT_OUTPUT_PATH);

    while let Some(token) = tokens.next() {
        let Some((name, flag)) = token.to_str().and_then(Flag::lookup) else {
            warn!("ignoring unrecognized argument {:?}", token);
            continue;
        };
        let raw_value = if flag.takes_value() {
            match tokens.next() {
                Some(value) => value,
                None => return Err(Error::MissingArgument { flag: name }),
            }
        } else {
            OsString::new()
        };
        let text = raw_value.to_string_lossy();
        let value = &*text;
        match flag {
            Flag::Soffset => options.soffset = parse_f64_lenient(name, value),
            Flag::Omax => options.omax = parse_f64_lenient(name, value) as i32,
            Flag::Dthreshold => options.dthreshold = parse_f64_lenient(name, value),
            Flag::Sderivatives => options.sderivatives = parse_f64_lenient(name, value),
            Flag::Nsublevels => options.nsublevels = parse_i32_lenient(name, value),
            Flag::Diffusivity => {
                let code = parse_i32_lenient(name, value);
                match Diffusivity::from_code(code) {
                    Some(diffusivity) => options.diffusivity = diffusivity,
                    None => warn!(
                        "unknown diffusivity {}, keeping {:?}",
                        code, options.diffusivity
                    ),
                }
            }
            Flag::Descriptor => {
                options.descriptor = DescriptorKind::from_code(parse_i32_lenient(name, value))
                    .unwrap_or(DescriptorKind::Mldb);
            }
            Flag::DescriptorChannels => {
                let channels = parse_i32_lenient(name, value);
                options.descriptor_channels = if (1..=3).contains(&channels) {
                    channels as u32
                } else {
                    3
                };
            }
            Flag::DescriptorSize => {
                options.descriptor_size = parse_i32_lenient(name, value).max(0) as u32;
            }
            Flag::SaveScaleSpace => {
                options.save_scale_space = parse_i32_lenient(name, value) != 0;
            }
            Flag::Upright => options.upright = parse_i32_lenient(name, value) != 0,
            Flag::Output => {
                options.save_keypoints = true;
                output_path = PathBuf::from(&raw_value);
            }
            Flag::Verbose => options.verbosity = true,
            Flag::Help => return Err(Error::Usage("help requested")),
        }
    }

    Ok(Config {
        options,
        image_path,
        output_path,
    })
}

/// Length of the longest prefix of `text` that reads as a decimal number.
fn numeric_prefix_len(text: &str, allow_fraction: bool) -> usize {
    let bytes = text.as_bytes();
    let digits_from = |mut i: usize| {
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        i
    };
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    let integer_end = digits_from(end);
    let mut mantissa_digits = integer_end - end;
    end = integer_end;
    if allow_fraction && bytes.get(end) == Some(&b'.') {
        let fraction_end = digits_from(end + 1);
        mantissa_digits += fraction_end - end - 1;
        end = fraction_end;
    }
    if mantissa_digits == 0 {
        return 0;
    }
    if allow_fraction && matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exponent = end + 1;
        if matches!(bytes.get(exponent), Some(b'+' | b'-')) {
            exponent += 1;
        }
        let exponent_end = digits_from(exponent);
        if exponent_end > exponent {
            end = exponent_end;
        }
    }
    end
}

fn parse_f64_lenient(flag: &str, text: &str) -> f64 {
    let trimmed = text.trim_start();
    let prefix = &trimmed[..numeric_prefix_len(trimmed, true)];
    if prefix.len() != trimmed.len() {
        warn!("{} expects a number, read {:?} as {:?}", flag, text, prefix);
    }
    prefix.parse().unwrap_or(0.0)
}

fn parse_i32_lenient(flag: &str, text: &str) -> i32 {
    let trimmed = text.trim_start();
    let prefix = &trimmed[..numeric_prefix_len(trimmed, false)];
    if prefix.len() != trimmed.len() {
        warn!("{} expects an integer, read {:?} as {:?}", flag, text, prefix);
    }
    if prefix.is_empty() {
        return 0;
    }
    prefix.parse::<i64>().map_or_else(
        |_| {
            if prefix.starts_with('-') {
                i32::MIN
            } else {
                i32::MAX
            }
        },
        |value| value.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
    )
}
