//! Texture-domain enums: semantic categories and block-compressed target
//! encodings.
//!
//! The category of a texture is only used to pick a default encoding and a
//! Remix file suffix; the pipeline never looks at pixel data.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::Error;

// ---------------------------------------------------------------------------
// TextureCategory
// ---------------------------------------------------------------------------

/// Semantic role of an image within a material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureCategory {
    BaseColor,
    Normal,
    Roughness,
    Metallic,
    Emission,
    Opacity,
    Specular,
}

impl TextureCategory {
    /// All categories, in declaration order.
    pub const ALL: [TextureCategory; 7] = [
        Self::BaseColor,
        Self::Normal,
        Self::Roughness,
        Self::Metallic,
        Self::Emission,
        Self::Opacity,
        Self::Specular,
    ];

    /// Encoding used when a task does not name one explicitly.
    pub fn default_encoding(&self) -> TargetEncoding {
        match self {
            Self::BaseColor | Self::Emission => TargetEncoding::Bc7UnormSrgb,
            Self::Normal => TargetEncoding::Bc5Unorm,
            Self::Roughness | Self::Metallic | Self::Opacity | Self::Specular => {
                TargetEncoding::Bc4Unorm
            }
        }
    }

    /// RTX Remix file-name suffix inserted before the container extension.
    pub fn remix_suffix(&self) -> &'static str {
        match self {
            Self::BaseColor => ".a.rtex",
            Self::Normal => ".n.rtex",
            Self::Roughness => ".r.rtex",
            Self::Metallic => ".m.rtex",
            Self::Emission => ".e.rtex",
            Self::Opacity => ".o.rtex",
            Self::Specular => "",
        }
    }

    /// Classify a texture from a node label or image name.
    ///
    /// Falls back to [`TextureCategory::BaseColor`] when no hint matches.
    pub fn infer(name: &str) -> Self {
        let lower = name.to_lowercase();
        let has = |terms: &[&str]| terms.iter().any(|t| lower.contains(t));

        if has(&["normal", "norm", "nrm"]) {
            Self::Normal
        } else if has(&["rough"]) {
            Self::Roughness
        } else if has(&["metal"]) {
            Self::Metallic
        } else if has(&["emit", "emission", "emissive"]) {
            Self::Emission
        } else if has(&["opacity", "alpha"]) {
            Self::Opacity
        } else if has(&["spec"]) {
            Self::Specular
        } else {
            Self::BaseColor
        }
    }
}

impl fmt::Display for TextureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BaseColor => write!(f, "base color"),
            Self::Normal => write!(f, "normal"),
            Self::Roughness => write!(f, "roughness"),
            Self::Metallic => write!(f, "metallic"),
            Self::Emission => write!(f, "emission"),
            Self::Opacity => write!(f, "opacity"),
            Self::Specular => write!(f, "specular"),
        }
    }
}

impl FromStr for TextureCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['_', '-'], " ");
        match normalized.as_str() {
            "base color" | "basecolor" | "albedo" | "diffuse" => Ok(Self::BaseColor),
            "normal" => Ok(Self::Normal),
            "roughness" => Ok(Self::Roughness),
            "metallic" => Ok(Self::Metallic),
            "emission" | "emissive" => Ok(Self::Emission),
            "opacity" | "alpha" => Ok(Self::Opacity),
            "specular" => Ok(Self::Specular),
            _ => Err(Error::Config(format!("unknown texture category '{s}'"))),
        }
    }
}

/// Build the Remix-style output path `<dir>/<stem><suffix>.dds` for an image.
///
/// Any extension on `image_name` is dropped before the suffix is appended.
pub fn remix_output_path(dir: &Path, image_name: &str, category: TextureCategory) -> PathBuf {
    let stem = Path::new(image_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| image_name.to_string());
    dir.join(format!("{stem}{}.dds", category.remix_suffix()))
}

// ---------------------------------------------------------------------------
// TargetEncoding
// ---------------------------------------------------------------------------

/// Block-compressed pixel format handed to the converter's `-f` flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TargetEncoding {
    Bc4Unorm,
    Bc4Snorm,
    Bc5Unorm,
    Bc5Snorm,
    Bc7Unorm,
    Bc7UnormSrgb,
    /// Any other format string, passed through verbatim.
    Custom(String),
}

impl TargetEncoding {
    /// The converter's spelling of this format.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Bc4Unorm => "BC4_UNORM",
            Self::Bc4Snorm => "BC4_SNORM",
            Self::Bc5Unorm => "BC5_UNORM",
            Self::Bc5Snorm => "BC5_SNORM",
            Self::Bc7Unorm => "BC7_UNORM",
            Self::Bc7UnormSrgb => "BC7_UNORM_SRGB",
            Self::Custom(s) => s,
        }
    }
}

impl From<String> for TargetEncoding {
    fn from(s: String) -> Self {
        match s.to_uppercase().as_str() {
            "BC4_UNORM" => Self::Bc4Unorm,
            "BC4_SNORM" => Self::Bc4Snorm,
            "BC5_UNORM" => Self::Bc5Unorm,
            "BC5_SNORM" => Self::Bc5Snorm,
            "BC7_UNORM" => Self::Bc7Unorm,
            "BC7_UNORM_SRGB" => Self::Bc7UnormSrgb,
            _ => Self::Custom(s),
        }
    }
}

impl From<&str> for TargetEncoding {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<TargetEncoding> for String {
    fn from(e: TargetEncoding) -> Self {
        e.as_str().to_string()
    }
}

impl fmt::Display for TargetEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_encodings() {
        assert_eq!(
            TextureCategory::BaseColor.default_encoding(),
            TargetEncoding::Bc7UnormSrgb
        );
        assert_eq!(
            TextureCategory::Emission.default_encoding(),
            TargetEncoding::Bc7UnormSrgb
        );
        assert_eq!(
            TextureCategory::Normal.default_encoding(),
            TargetEncoding::Bc5Unorm
        );
        for c in [
            TextureCategory::Roughness,
            TextureCategory::Metallic,
            TextureCategory::Opacity,
            TextureCategory::Specular,
        ] {
            assert_eq!(c.default_encoding(), TargetEncoding::Bc4Unorm, "{c}");
        }
    }

    #[test]
    fn parse_aliases() {
        assert_eq!(
            "Albedo".parse::<TextureCategory>().unwrap(),
            TextureCategory::BaseColor
        );
        assert_eq!(
            "base_color".parse::<TextureCategory>().unwrap(),
            TextureCategory::BaseColor
        );
        assert_eq!(
            "emissive".parse::<TextureCategory>().unwrap(),
            TextureCategory::Emission
        );
        assert_eq!(
            "ALPHA".parse::<TextureCategory>().unwrap(),
            TextureCategory::Opacity
        );
        assert!("bump".parse::<TextureCategory>().is_err());
    }

    #[test]
    fn display_parses_back() {
        for c in TextureCategory::ALL {
            assert_eq!(c.to_string().parse::<TextureCategory>().unwrap(), c);
        }
    }

    #[test]
    fn infer_from_names() {
        assert_eq!(TextureCategory::infer("brick_nrm.png"), TextureCategory::Normal);
        assert_eq!(TextureCategory::infer("Roughness Map"), TextureCategory::Roughness);
        assert_eq!(TextureCategory::infer("gun_metal"), TextureCategory::Metallic);
        assert_eq!(TextureCategory::infer("lamp_emissive"), TextureCategory::Emission);
        assert_eq!(TextureCategory::infer("leaf_alpha"), TextureCategory::Opacity);
        assert_eq!(TextureCategory::infer("floor_spec"), TextureCategory::Specular);
        assert_eq!(TextureCategory::infer("wall_diffuse"), TextureCategory::BaseColor);
    }

    #[test]
    fn remix_paths() {
        let dir = Path::new("/mod/textures");
        assert_eq!(
            remix_output_path(dir, "brick.png", TextureCategory::Normal),
            PathBuf::from("/mod/textures/brick.n.rtex.dds")
        );
        assert_eq!(
            remix_output_path(dir, "brick", TextureCategory::BaseColor),
            PathBuf::from("/mod/textures/brick.a.rtex.dds")
        );
        assert_eq!(
            remix_output_path(dir, "shine.tga", TextureCategory::Specular),
            PathBuf::from("/mod/textures/shine.dds")
        );
    }

    #[test]
    fn encoding_strings() {
        assert_eq!(TargetEncoding::from("bc7_unorm_srgb"), TargetEncoding::Bc7UnormSrgb);
        assert_eq!(TargetEncoding::Bc5Snorm.as_str(), "BC5_SNORM");
        let custom = TargetEncoding::from("R8G8B8A8_UNORM");
        assert_eq!(custom, TargetEncoding::Custom("R8G8B8A8_UNORM".into()));
        assert_eq!(custom.to_string(), "R8G8B8A8_UNORM");
    }

    #[test]
    fn encoding_serializes_as_plain_string() {
        let json = serde_json::to_string(&TargetEncoding::Bc4Unorm).unwrap();
        assert_eq!(json, "\"BC4_UNORM\"");
        let back: TargetEncoding = serde_json::from_str("\"BC5_UNORM\"").unwrap();
        assert_eq!(back, TargetEncoding::Bc5Unorm);
    }
}
