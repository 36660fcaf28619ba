//! Shared vocabulary: model families, block types, tag types and scalar keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Base model family a LoRA was trained against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ModelFamily {
    #[serde(rename = "SD")]
    Sd,
    #[serde(rename = "SDXL")]
    Sdxl,
    #[serde(rename = "Flux")]
    Flux,
    #[default]
    #[serde(other)]
    Unknown,
}

impl ModelFamily {
    /// Fixed enumeration order used when resolving block vectors.
    pub const ALL: [ModelFamily; 4] = [
        ModelFamily::Unknown,
        ModelFamily::Sd,
        ModelFamily::Sdxl,
        ModelFamily::Flux,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ModelFamily::Sd => "SD",
            ModelFamily::Sdxl => "SDXL",
            ModelFamily::Flux => "Flux",
            ModelFamily::Unknown => "Unknown",
        }
    }

    /// Lenient lookup used for metadata and CLI input. Unrecognized names map
    /// to [`ModelFamily::Unknown`].
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "sd" | "sd1" | "sd15" => ModelFamily::Sd,
            "sdxl" => ModelFamily::Sdxl,
            "flux" => ModelFamily::Flux,
            _ => ModelFamily::Unknown,
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network layout of the adapter, which decides the block mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BlockType {
    #[serde(rename = "lora")]
    Lora,
    #[serde(rename = "lycoris")]
    Lycoris,
    #[default]
    #[serde(other)]
    Unknown,
}

impl BlockType {
    /// Fixed enumeration order used when resolving block vectors.
    pub const ALL: [BlockType; 3] = [BlockType::Unknown, BlockType::Lora, BlockType::Lycoris];

    pub fn as_str(self) -> &'static str {
        match self {
            BlockType::Lora => "lora",
            BlockType::Lycoris => "lycoris",
            BlockType::Unknown => "Unknown",
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "lora" | "lierla" => BlockType::Lora,
            "lycoris" | "lyco" | "c3lier" => BlockType::Lycoris,
            _ => BlockType::Unknown,
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Namespace of an inline tag: `<lora:...>` or `<lyco:...>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagType {
    Lora,
    Lyco,
}

impl TagType {
    pub fn as_str(self) -> &'static str {
        match self {
            TagType::Lora => "lora",
            TagType::Lyco => "lyco",
        }
    }

    /// Case-insensitive parse of the tag namespace.
    pub fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("lora") {
            Some(TagType::Lora)
        } else if name.eq_ignore_ascii_case("lyco") {
            Some(TagType::Lyco)
        } else {
            None
        }
    }

    /// Block type assumed when nothing else resolved one.
    pub fn fallback_block_type(self) -> BlockType {
        match self {
            TagType::Lora => BlockType::Lora,
            TagType::Lyco => BlockType::Lycoris,
        }
    }
}

impl fmt::Display for TagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of named scalar controls carried by every tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKey {
    Te,
    Unet,
    Dyn,
    Start,
    Stop,
}

impl ScalarKey {
    pub const ALL: [ScalarKey; 5] = [
        ScalarKey::Te,
        ScalarKey::Unet,
        ScalarKey::Dyn,
        ScalarKey::Start,
        ScalarKey::Stop,
    ];

    /// Tag key for this control.
    pub fn as_str(self) -> &'static str {
        match self {
            ScalarKey::Te => "te",
            ScalarKey::Unet => "unet",
            ScalarKey::Dyn => "dyn",
            ScalarKey::Start => "start",
            ScalarKey::Stop => "stop",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        ScalarKey::ALL
            .into_iter()
            .find(|key| key.as_str().eq_ignore_ascii_case(name.trim()))
    }

    /// Optional controls carry an enabled flag and may be left out of a tag.
    pub fn is_optional(self) -> bool {
        matches!(self, ScalarKey::Unet | ScalarKey::Dyn)
    }

    /// Step controls hold whole sampling steps.
    pub fn is_step(self) -> bool {
        matches!(self, ScalarKey::Start | ScalarKey::Stop)
    }
}

impl fmt::Display for ScalarKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_serde_names() {
        assert_eq!(serde_json::to_string(&ModelFamily::Sdxl).unwrap(), "\"SDXL\"");
        let fam: ModelFamily = serde_json::from_str("\"Flux\"").unwrap();
        assert_eq!(fam, ModelFamily::Flux);
        let fam: ModelFamily = serde_json::from_str("\"Pony\"").unwrap();
        assert_eq!(fam, ModelFamily::Unknown);
    }

    #[test]
    fn block_type_serde_names() {
        assert_eq!(serde_json::to_string(&BlockType::Lycoris).unwrap(), "\"lycoris\"");
        let bt: BlockType = serde_json::from_str("\"lora\"").unwrap();
        assert_eq!(bt, BlockType::Lora);
    }

    #[test]
    fn tag_type_is_case_insensitive() {
        assert_eq!(TagType::from_name("LoRA"), Some(TagType::Lora));
        assert_eq!(TagType::from_name("LYCO"), Some(TagType::Lyco));
        assert_eq!(TagType::from_name("hypernet"), None);
        assert_eq!(TagType::Lyco.fallback_block_type(), BlockType::Lycoris);
    }

    #[test]
    fn scalar_keys() {
        assert_eq!(ScalarKey::from_name("UNET"), Some(ScalarKey::Unet));
        assert!(ScalarKey::Dyn.is_optional());
        assert!(!ScalarKey::Te.is_optional());
        assert!(ScalarKey::Stop.is_step());
    }
}
