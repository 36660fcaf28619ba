//! Weight descriptors for inline LoRA tags.
//!
//! A tag such as `<lora:name:0.8:unet=0.6:lbw=OUTALL>` carries per-layer
//! weights for a model adapter. This crate decodes the tag body into a
//! [`WeightState`], encodes it back, and keeps the block layouts, presets
//! and per-entity history that give those values meaning.
//!
//! # Example
//!
//! ```
//! use weight_helper_core::{
//!     BlockRegistry, BlockType, ControlTable, ModelFamily, ScalarKey, Tag, WeightCodec,
//! };
//!
//! let registry = BlockRegistry::default();
//! let controls = ControlTable::default();
//! let codec = WeightCodec::new(&registry, &controls);
//!
//! let tag: Tag = "<lora:foo:0.8:lbw=1,0,0,0,0,0,0,0,1,1,1,1,1,1,1,1,1>".parse().unwrap();
//! let state = codec.parse(&tag.body, ModelFamily::Unknown, BlockType::Unknown);
//! assert_eq!(state.family, ModelFamily::Sd);
//! assert_eq!(state.scalar(ScalarKey::Te).value, 0.8);
//!
//! // Block values equal to a registered preset are written by name.
//! assert_eq!(codec.serialize(tag.tag_type, &tag.name, &state), "<lora:foo:0.8:lbw=OUTALL>");
//! ```

pub mod codec;
pub mod config;
pub mod ledger;
pub mod preset;
pub mod range;
pub mod registry;
pub mod state;
pub mod tag;
pub mod types;

pub use codec::{format_number, DecodeIssue, Decoded, Encoded, WeightCodec, XYZ_PLACEHOLDER};
pub use config::{ConfigError, ControlConfig, ControlTable, HostOptions, DEFAULT_SAMPLING_STEPS};
pub use ledger::{HistoryEntry, Ledger, LedgerSnapshot};
pub use preset::{parse_preset_lines, PresetLine, PresetTable, BUILTIN_PRESETS};
pub use range::{expand_group, expand_range};
pub use registry::BlockRegistry;
pub use state::{ControlState, WeightState};
pub use tag::{locate_tag, Tag, TagError, TagSpan};
pub use types::{BlockType, ModelFamily, ScalarKey, TagType};
