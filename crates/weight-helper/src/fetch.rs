//! Metadata and preview fetch contracts.
//!
//! The session does no I/O. Opening a context hands out [`FetchTicket`]s; the
//! host performs the requests and feeds results back with the ticket. Each
//! ticket carries the generation of the context that issued it, so a result
//! that arrives after the context closed is dropped.

use indexmap::IndexSet;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use weight_helper_core::ModelFamily;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchKind {
    Metadata,
    Preview,
}

/// One outstanding request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchTicket {
    pub kind: FetchKind,
    pub entity: String,
    /// Bypass any server-side cache.
    pub force: bool,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("request cancelled")]
    Cancelled,
    #[error("request failed: {0}")]
    Failed(String),
}

/// Which blocks the model actually trained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BlockRestriction {
    /// No information; every block is editable.
    #[default]
    Unrestricted,
    /// Only the listed labels are editable. Empty means none are.
    Only(IndexSet<String>),
}

impl BlockRestriction {
    pub fn allows(&self, label: &str) -> bool {
        match self {
            BlockRestriction::Unrestricted => true,
            BlockRestriction::Only(labels) => labels.contains(label),
        }
    }

    fn nothing() -> Self {
        BlockRestriction::Only(IndexSet::new())
    }
}

fn deserialize_restriction<'de, D>(deserializer: D) -> Result<BlockRestriction, D::Error>
where
    D: Deserializer<'de>,
{
    let labels: Option<Vec<String>> = Option::deserialize(deserializer)?;
    Ok(match labels {
        None => BlockRestriction::Unrestricted,
        Some(labels) => BlockRestriction::Only(labels.into_iter().collect()),
    })
}

/// Model metadata as returned by the metadata endpoint.
///
/// `usingBlocks: null` means no restriction info; an absent key or an empty
/// list restricts editing to nothing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default)]
    pub algorithm: Option<String>,
    #[serde(default)]
    pub base_model: Option<String>,
    #[serde(default, alias = "modelType")]
    pub model_family: ModelFamily,
    #[serde(default = "BlockRestriction::nothing", deserialize_with = "deserialize_restriction")]
    pub using_blocks: BlockRestriction,
}

impl Metadata {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Preview card data for an entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preview {
    pub model_id: String,
    pub trigger_words: Vec<String>,
    pub negative_trigger_words: Vec<String>,
    pub model_name: String,
    pub thumb_url: String,
    pub has_metadata: bool,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn using_blocks_null_absent_and_list() {
        let meta = Metadata::from_json_str(r#"{"modelType": "SDXL", "usingBlocks": null}"#).unwrap();
        assert_eq!(meta.model_family, ModelFamily::Sdxl);
        assert_eq!(meta.using_blocks, BlockRestriction::Unrestricted);

        let meta = Metadata::from_json_str(r#"{"algorithm": "LoRA"}"#).unwrap();
        assert!(!meta.using_blocks.allows("BASE"));
        assert_eq!(meta.model_family, ModelFamily::Unknown);

        let meta = Metadata::from_json_str(r#"{"modelFamily": "SD", "usingBlocks": ["BASE", "IN01"]}"#).unwrap();
        assert!(meta.using_blocks.allows("IN01"));
        assert!(!meta.using_blocks.allows("IN02"));
    }

    #[test]
    fn preview_fills_missing_fields() {
        let preview: Preview = serde_json::from_str(r#"{"modelId": "42", "triggerWords": ["cat"]}"#).unwrap();
        assert_eq!(preview.model_id, "42");
        assert_eq!(preview.trigger_words, vec!["cat"]);
        assert!(!preview.has_metadata);
    }
}
