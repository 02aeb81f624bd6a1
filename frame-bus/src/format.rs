//! Stream format discovery and the per-format texture layout table.

use std::fmt::{Display, Formatter};

use crate::error::FormatDiscoveryError;
use crate::frame::{CAPS_RAW, CAPS_RAW_RGB, CAPS_RAW_YUV, Caps, RgbLayout};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColourFormat {
    #[default]
    Unknown,
    Planar420,
    Packed422,
    RGB24,
    BGR24,
    ARGB32,
    BGRA32,
}

impl ColourFormat {
    /// Maps the engine's structure description to a colour format.
    pub fn from_caps(caps: &Caps) -> Result<Self, FormatDiscoveryError> {
        if caps.width == 0 || caps.height == 0 {
            return Err(FormatDiscoveryError::InvalidSize {
                width: caps.width,
                height: caps.height,
            });
        }

        match caps.name.as_str() {
            CAPS_RAW_RGB => {
                let rgb = caps
                    .rgb
                    .ok_or_else(|| FormatDiscoveryError::MissingField(caps.name.clone()))?;
                Self::from_rgb_layout(&rgb)
            }
            CAPS_RAW_YUV => {
                let fourcc = caps
                    .fourcc
                    .ok_or_else(|| FormatDiscoveryError::MissingField(caps.name.clone()))?;
                Self::from_fourcc(fourcc)
            }
            CAPS_RAW => {
                let format = caps
                    .format
                    .as_deref()
                    .ok_or_else(|| FormatDiscoveryError::MissingField(caps.name.clone()))?;
                Self::from_format_name(format)
            }
            other => Err(FormatDiscoveryError::UnsupportedName(other.to_string())),
        }
    }

    fn from_rgb_layout(rgb: &RgbLayout) -> Result<Self, FormatDiscoveryError> {
        let masks = (rgb.red_mask, rgb.green_mask, rgb.blue_mask);
        match (rgb.depth, masks) {
            (24, (0x00ff_0000, 0x0000_ff00, 0x0000_00ff)) => Ok(Self::RGB24),
            (24, (0x0000_00ff, 0x0000_ff00, 0x00ff_0000)) => Ok(Self::BGR24),
            (32, (0xff00_0000, 0x00ff_0000, 0x0000_ff00)) => Ok(Self::ARGB32),
            (32, (0x00ff_0000, 0x0000_ff00, 0x0000_00ff)) => Ok(Self::BGRA32),
            (depth, _) => Err(FormatDiscoveryError::UnhandledRgb { depth }),
        }
    }

    fn from_fourcc(fourcc: [u8; 4]) -> Result<Self, FormatDiscoveryError> {
        match &fourcc {
            b"I420" | b"IYUV" | b"YV12" => Ok(Self::Planar420),
            b"YUYV" | b"YUY2" | b"V422" | b"YUNV" | b"UYVY" | b"Y422" | b"UYNV" => {
                Ok(Self::Packed422)
            }
            _ => Err(FormatDiscoveryError::UnhandledFourcc(
                fourcc.iter().map(|&b| b as char).collect(),
            )),
        }
    }

    fn from_format_name(name: &str) -> Result<Self, FormatDiscoveryError> {
        match name {
            "I420" | "IYUV" | "YV12" | "yuv420p" | "yuvj420p" => Ok(Self::Planar420),
            "YUY2" | "YUYV" | "UYVY" | "yuyv422" | "uyvy422" => Ok(Self::Packed422),
            "RGB" | "rgb24" => Ok(Self::RGB24),
            "BGR" | "bgr24" => Ok(Self::BGR24),
            "ARGB" | "argb" => Ok(Self::ARGB32),
            "BGRA" | "bgra" => Ok(Self::BGRA32),
            other => Err(FormatDiscoveryError::UnhandledFormat(other.to_string())),
        }
    }

    pub fn layout(&self) -> Option<&'static FormatLayout> {
        LAYOUTS.iter().find(|l| l.colour == *self)
    }

    pub fn is_uploadable(&self) -> bool {
        self.layout().is_some()
    }
}

impl Display for ColourFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ColourFormat::Unknown => "unknown",
            ColourFormat::Planar420 => "planar 4:2:0",
            ColourFormat::Packed422 => "packed 4:2:2",
            ColourFormat::RGB24 => "RGB24",
            ColourFormat::BGR24 => "BGR24",
            ColourFormat::ARGB32 => "ARGB32",
            ColourFormat::BGRA32 => "BGRA32",
        };
        write!(f, "{}", name)
    }
}

/// Dimensions and colour layout of one pipeline instance, fixed by its first frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamFormat {
    pub width: u32,
    pub height: u32,
    pub colour_format: ColourFormat,
}

impl StreamFormat {
    /// Discovery never fails: unrecognized layouts become `Unknown` so that
    /// frames keep flowing, the consumer just will not upload them.
    pub fn discover(caps: &Caps) -> (Self, Option<FormatDiscoveryError>) {
        let (colour_format, err) = match ColourFormat::from_caps(caps) {
            Ok(c) => (c, None),
            Err(e) => (ColourFormat::Unknown, Some(e)),
        };
        (
            Self {
                width: caps.width,
                height: caps.height,
                colour_format,
            },
            err,
        )
    }

    pub fn is_uploadable(&self) -> bool {
        self.width > 0 && self.height > 0 && self.colour_format.is_uploadable()
    }

    pub fn layout(&self) -> Option<&'static FormatLayout> {
        self.colour_format.layout()
    }
}

impl Display for StreamFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{} {}", self.width, self.height, self.colour_format)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TexelFormat {
    Luminance8,
    Rgb8,
    Bgr8,
    Argb8,
    Bgra8,
}

/// How frames of one colour format map onto a texture.
///
/// YUV formats are uploaded as a single luminance texture and unpacked by the
/// shader, so the texture is wider or taller than the picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatLayout {
    pub colour: ColourFormat,
    pub texel: TexelFormat,
    pub bytes_per_texel: u32,
    // (numerator, denominator) applied to the picture size
    pub width_scale: (u32, u32),
    pub height_scale: (u32, u32),
}

impl FormatLayout {
    /// Texture dimensions for a picture of `width` x `height`, saturating at `u32::MAX`.
    pub fn texture_size(&self, width: u32, height: u32) -> (u32, u32) {
        let scale = |value: u32, (num, den): (u32, u32)| {
            u32::try_from(u64::from(value) * u64::from(num) / u64::from(den)).unwrap_or(u32::MAX)
        };
        (scale(width, self.width_scale), scale(height, self.height_scale))
    }

    /// Payload size of one frame, saturating at `usize::MAX`.
    pub fn frame_bytes(&self, width: u32, height: u32) -> usize {
        let (w, h) = self.texture_size(width, height);
        let bytes = u128::from(w) * u128::from(h) * u128::from(self.bytes_per_texel);
        usize::try_from(bytes).unwrap_or(usize::MAX)
    }
}

static LAYOUTS: [FormatLayout; 6] = [
    FormatLayout {
        colour: ColourFormat::Planar420,
        texel: TexelFormat::Luminance8,
        bytes_per_texel: 1,
        width_scale: (1, 1),
        height_scale: (3, 2),
    },
    FormatLayout {
        colour: ColourFormat::Packed422,
        texel: TexelFormat::Luminance8,
        bytes_per_texel: 1,
        width_scale: (2, 1),
        height_scale: (1, 1),
    },
    FormatLayout {
        colour: ColourFormat::RGB24,
        texel: TexelFormat::Rgb8,
        bytes_per_texel: 3,
        width_scale: (1, 1),
        height_scale: (1, 1),
    },
    FormatLayout {
        colour: ColourFormat::BGR24,
        texel: TexelFormat::Bgr8,
        bytes_per_texel: 3,
        width_scale: (1, 1),
        height_scale: (1, 1),
    },
    FormatLayout {
        colour: ColourFormat::ARGB32,
        texel: TexelFormat::Argb8,
        bytes_per_texel: 4,
        width_scale: (1, 1),
        height_scale: (1, 1),
    },
    FormatLayout {
        colour: ColourFormat::BGRA32,
        texel: TexelFormat::Bgra8,
        bytes_per_texel: 4,
        width_scale: (1, 1),
        height_scale: (1, 1),
    },
];

#[cfg(test)]
#[path = "format_test.rs"]
mod format_test;
