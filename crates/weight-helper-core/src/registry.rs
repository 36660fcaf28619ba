//! Block registry: per-family block labels, per-(family, block type) masks,
//! display groups and presets.
//!
//! Labels and masks are compiled in. Groups and presets start from compiled-in
//! defaults and may be overridden once from [`HostOptions`]; the registry is
//! immutable afterwards.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::config::HostOptions;
use crate::preset::{parse_preset_lines, PresetTable, BUILTIN_PRESETS};
use crate::range::expand_range;
use crate::types::{BlockType, ModelFamily};

/// Block labels shared by SD and SDXL.
pub const UNET_BLOCKS: [&str; 26] = [
    "BASE", "IN00", "IN01", "IN02", "IN03", "IN04", "IN05", "IN06", "IN07", "IN08", "IN09",
    "IN10", "IN11", "M00", "OUT00", "OUT01", "OUT02", "OUT03", "OUT04", "OUT05", "OUT06",
    "OUT07", "OUT08", "OUT09", "OUT10", "OUT11",
];

/// Block labels of Flux.
pub const FLUX_BLOCKS: [&str; 19] = [
    "FL00", "FL01", "FL02", "FL03", "FL04", "FL05", "FL06", "FL07", "FL08", "FL09", "FL10",
    "FL11", "FL12", "FL13", "FL14", "FL15", "FL16", "FL17", "FL18",
];

const SD_LORA_MASK: [u8; 26] = [
    1, 0, 1, 1, 0, 1, 1, 0, 1, 1, 0, 0, 0, 1, 0, 0, 0, 1, 1, 1, 1, 1, 1, 1, 1, 1,
];
const SD_LYCORIS_MASK: [u8; 26] = [1; 26];
const SDXL_LORA_MASK: [u8; 26] = [
    1, 0, 0, 0, 0, 1, 1, 0, 1, 1, 0, 0, 0, 1, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0, 0,
];
const SDXL_LYCORIS_MASK: [u8; 26] = [
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 0, 0, 0, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 0, 0, 0,
];
const FLUX_MASK: [u8; 19] = [1; 19];
const UNET_NONE_MASK: [u8; 26] = [0; 26];
const FLUX_NONE_MASK: [u8; 19] = [0; 19];

fn default_group_ranges(family: ModelFamily, block_type: BlockType) -> &'static [&'static str] {
    match (family, block_type) {
        (ModelFamily::Sd, BlockType::Lora) => {
            &["BASE", "IN01-IN04", "IN05-IN08", "M00", "OUT03-OUT06", "OUT07-OUT11"]
        }
        (ModelFamily::Sd, BlockType::Lycoris) => {
            &["BASE", "IN00-IN05", "IN06-IN11", "M00", "OUT00-OUT05", "OUT06-OUT11"]
        }
        (ModelFamily::Sdxl, BlockType::Lora) => &["BASE", "IN04-IN08", "M00", "OUT00-OUT05"],
        (ModelFamily::Sdxl, BlockType::Lycoris) => {
            &["BASE", "IN00-IN03", "IN04-IN08", "M00", "OUT00-OUT03", "OUT04-OUT08"]
        }
        (ModelFamily::Flux, BlockType::Lora | BlockType::Lycoris) => {
            &["FL00-FL03", "FL04-FL07", "FL08-FL10", "FL11-FL14", "FL15-FL18"]
        }
        _ => &[],
    }
}

/// Ordered block labels of a family. Empty for [`ModelFamily::Unknown`].
pub fn blocks(family: ModelFamily) -> &'static [&'static str] {
    match family {
        ModelFamily::Sd | ModelFamily::Sdxl => &UNET_BLOCKS,
        ModelFamily::Flux => &FLUX_BLOCKS,
        ModelFamily::Unknown => &[],
    }
}

/// Enable mask over the family-wide label list.
pub fn mask(family: ModelFamily, block_type: BlockType) -> &'static [u8] {
    match (family, block_type) {
        (ModelFamily::Sd, BlockType::Lora) => &SD_LORA_MASK,
        (ModelFamily::Sd, BlockType::Lycoris) => &SD_LYCORIS_MASK,
        (ModelFamily::Sdxl, BlockType::Lora) => &SDXL_LORA_MASK,
        (ModelFamily::Sdxl, BlockType::Lycoris) => &SDXL_LYCORIS_MASK,
        (ModelFamily::Flux, BlockType::Lora | BlockType::Lycoris) => &FLUX_MASK,
        (ModelFamily::Flux, BlockType::Unknown) => &FLUX_NONE_MASK,
        _ => &UNET_NONE_MASK,
    }
}

/// Labels whose mask bit is set, in registry order.
pub fn masked_blocks(family: ModelFamily, block_type: BlockType) -> Vec<&'static str> {
    blocks(family)
        .iter()
        .zip(mask(family, block_type))
        .filter(|(_, bit)| **bit == 1)
        .map(|(label, _)| *label)
        .collect()
}

pub fn masked_count(family: ModelFamily, block_type: BlockType) -> usize {
    mask(family, block_type).iter().filter(|bit| **bit == 1).count()
}

/// Scatters `values` into the masked positions of the family-wide vector,
/// zero-filling unmasked positions. `None` on a length mismatch.
pub fn scatter_masked(family: ModelFamily, block_type: BlockType, values: &[f64]) -> Option<Vec<f64>> {
    let mask = mask(family, block_type);
    if blocks(family).is_empty() || values.len() != masked_count(family, block_type) {
        return None;
    }
    let mut provided = values.iter();
    Some(
        mask.iter()
            .map(|bit| match bit {
                1 => provided.next().copied().unwrap_or(0.0),
                _ => 0.0,
            })
            .collect(),
    )
}

/// Every (family, block type) pair in the fixed resolution order.
pub fn combinations() -> impl Iterator<Item = (ModelFamily, BlockType)> {
    ModelFamily::ALL
        .into_iter()
        .flat_map(|family| BlockType::ALL.into_iter().map(move |bt| (family, bt)))
}

/// Display label of the XYZ sweep toggle.
pub fn xyz_label(family: ModelFamily, block_type: BlockType) -> &'static str {
    match (family, block_type) {
        (ModelFamily::Sd | ModelFamily::Unknown, BlockType::Lora) => "XYZ(17)",
        (ModelFamily::Sdxl, BlockType::Lora) => "XYZ(12)",
        (ModelFamily::Sdxl, BlockType::Lycoris) => "XYZ(20)",
        (ModelFamily::Flux, _) => "XYZ(19)",
        _ => "XYZ(26)",
    }
}

fn block_points_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let label = r"(?:BASE|MID|M00|(?:IN|OUT|FL)\d{1,2})";
        let item = format!(r"{label}(?:-{label})?");
        Regex::new(&format!(r"^\s*{item}(?:\s*,\s*{item})*\s*,?\s*$"))
            .expect("block point pattern is valid")
    })
}

fn single_digit_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([A-Z]+)(\d)\b").expect("digit pattern is valid"))
}

/// Validates and normalizes a block-point override string.
///
/// Accepts `LABEL` or `LABEL-LABEL` items separated by commas, where a label
/// is `BASE`, `MID`, `M00` or `IN`/`OUT`/`FL` followed by one or two digits.
/// `MID` becomes `M00` and single-digit indices are zero-padded. Returns
/// `None` when the string does not follow the grammar.
pub fn parse_block_points(value: &str) -> Option<Vec<String>> {
    if !block_points_regex().is_match(value) {
        return None;
    }
    let tokens = value
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| {
            let t = t.replace("MID", "M00");
            single_digit_regex().replace_all(&t, "${1}0${2}").into_owned()
        })
        .collect();
    Some(tokens)
}

/// Group ranges and presets for every (family, block type).
#[derive(Debug, Clone)]
pub struct BlockRegistry {
    group_ranges: HashMap<(ModelFamily, BlockType), Vec<String>>,
    presets: HashMap<(ModelFamily, BlockType), PresetTable>,
    empty: PresetTable,
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::new(&HostOptions::default())
    }
}

impl BlockRegistry {
    /// Builds the registry from compiled-in defaults, applying the block-point
    /// overrides and preset text found in `opts`.
    pub fn new(opts: &HostOptions) -> Self {
        let mut group_ranges = HashMap::new();
        for (family, block_type) in combinations() {
            let defaults: Vec<String> = default_group_ranges(family, block_type)
                .iter()
                .map(|s| s.to_string())
                .collect();
            let ranges = match opts.block_points(family, block_type) {
                Some(raw) => match parse_block_points(raw) {
                    Some(tokens) => {
                        debug!(%family, %block_type, ?tokens, "block point override applied");
                        tokens
                    }
                    None => {
                        warn!(
                            %family,
                            %block_type,
                            value = raw,
                            "block point definition format is invalid; keeping defaults"
                        );
                        defaults
                    }
                },
                None => defaults,
            };
            group_ranges.insert((family, block_type), ranges);
        }

        let preset_text = opts.lbw_presets.as_deref().unwrap_or(BUILTIN_PRESETS);
        let mut registry = Self {
            group_ranges,
            presets: HashMap::new(),
            empty: PresetTable::new(),
        };
        registry.load_presets(preset_text);
        registry
    }

    /// Replaces every preset table with the lines from `text`.
    pub fn load_presets(&mut self, text: &str) {
        let lines = parse_preset_lines(text);
        self.presets = combinations()
            .map(|(family, bt)| {
                let table = PresetTable::for_block_count(&lines, masked_count(family, bt));
                ((family, bt), table)
            })
            .collect();
    }

    pub fn blocks(&self, family: ModelFamily) -> &'static [&'static str] {
        blocks(family)
    }

    pub fn mask(&self, family: ModelFamily, block_type: BlockType) -> &'static [u8] {
        mask(family, block_type)
    }

    pub fn masked_blocks(&self, family: ModelFamily, block_type: BlockType) -> Vec<&'static str> {
        masked_blocks(family, block_type)
    }

    /// Raw range tokens used for display grouping.
    pub fn group_ranges(&self, family: ModelFamily, block_type: BlockType) -> &[String] {
        self.group_ranges
            .get(&(family, block_type))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Display clusters: each range token expanded and narrowed to masked
    /// labels. Groups left empty by the mask are dropped.
    pub fn groups(&self, family: ModelFamily, block_type: BlockType) -> Vec<Vec<String>> {
        let masked = masked_blocks(family, block_type);
        self.group_ranges(family, block_type)
            .iter()
            .map(|token| {
                expand_range(token)
                    .into_iter()
                    .filter(|label| masked.contains(&label.as_str()))
                    .collect::<Vec<_>>()
            })
            .filter(|group| !group.is_empty())
            .collect()
    }

    pub fn presets(&self, family: ModelFamily, block_type: BlockType) -> &PresetTable {
        self.presets.get(&(family, block_type)).unwrap_or(&self.empty)
    }

    pub fn xyz_label(&self, family: ModelFamily, block_type: BlockType) -> &'static str {
        xyz_label(family, block_type)
    }

    /// Name of the preset whose stored value string equals `joined`.
    ///
    /// `joined` is the comma-joined masked weight vector as it would be
    /// written into a tag.
    pub fn match_preset(&self, family: ModelFamily, block_type: BlockType, joined: &str) -> Option<&str> {
        self.presets(family, block_type).find_by_values(joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masked_count_matches_mask_bits() {
        for (family, bt) in combinations() {
            let ones = mask(family, bt).iter().filter(|b| **b == 1).count();
            assert_eq!(masked_blocks(family, bt).len(), ones, "{family}/{bt}");
            if family != ModelFamily::Unknown {
                assert_eq!(mask(family, bt).len(), blocks(family).len(), "{family}/{bt}");
            }
        }
        assert_eq!(masked_count(ModelFamily::Sd, BlockType::Lora), 17);
        assert_eq!(masked_count(ModelFamily::Sd, BlockType::Lycoris), 26);
        assert_eq!(masked_count(ModelFamily::Sdxl, BlockType::Lora), 12);
        assert_eq!(masked_count(ModelFamily::Sdxl, BlockType::Lycoris), 20);
        assert_eq!(masked_count(ModelFamily::Flux, BlockType::Lora), 19);
        assert_eq!(masked_count(ModelFamily::Unknown, BlockType::Lycoris), 0);
    }

    #[test]
    fn unknown_family_is_empty_not_an_error() {
        let registry = BlockRegistry::default();
        assert!(registry.blocks(ModelFamily::Unknown).is_empty());
        assert!(registry.masked_blocks(ModelFamily::Unknown, BlockType::Lora).is_empty());
        assert!(registry.groups(ModelFamily::Sd, BlockType::Unknown).is_empty());
        assert!(registry.presets(ModelFamily::Unknown, BlockType::Unknown).is_empty());
    }

    #[test]
    fn groups_expand_and_filter_to_masked_labels() {
        let registry = BlockRegistry::default();
        let groups = registry.groups(ModelFamily::Sd, BlockType::Lora);
        assert_eq!(groups[0], vec!["BASE"]);
        // IN01-IN04 under the SD/lora mask keeps IN01, IN02, IN04.
        assert_eq!(groups[1], vec!["IN01", "IN02", "IN04"]);
        assert_eq!(groups[3], vec!["M00"]);
        let total: usize = groups.iter().map(Vec::len).sum();
        assert_eq!(total, 17);
    }

    #[test]
    fn scatter_zero_fills_unmasked_positions() {
        let values: Vec<f64> = (0..12).map(|i| i as f64 + 1.0).collect();
        let full = scatter_masked(ModelFamily::Sdxl, BlockType::Lora, &values).unwrap();
        assert_eq!(full.len(), 26);
        assert_eq!(full[0], 1.0);
        assert_eq!(full[1], 0.0);
        assert_eq!(full[5], 2.0);
        assert!(scatter_masked(ModelFamily::Sdxl, BlockType::Lora, &[1.0]).is_none());
        assert!(scatter_masked(ModelFamily::Unknown, BlockType::Lora, &[]).is_none());
    }

    #[test]
    fn block_points_override_is_normalized() {
        assert_eq!(
            parse_block_points("BASE, IN1-IN4,MID , OUT03-OUT11"),
            Some(vec![
                "BASE".to_string(),
                "IN01-IN04".to_string(),
                "M00".to_string(),
                "OUT03-OUT11".to_string()
            ])
        );
        assert_eq!(parse_block_points("FL00-FL09, FL10-FL18,"), Some(vec![
            "FL00-FL09".to_string(),
            "FL10-FL18".to_string()
        ]));
    }

    #[test]
    fn block_points_override_rejects_bad_grammar() {
        assert_eq!(parse_block_points(""), None);
        assert_eq!(parse_block_points("BASE; IN01"), None);
        assert_eq!(parse_block_points("IN001"), None);
        assert_eq!(parse_block_points("MIDDLE"), None);
    }

    #[test]
    fn malformed_override_keeps_default() {
        let opts = HostOptions {
            lbw_lora_sd_block_points: Some("nonsense".into()),
            lbw_lycoris_sd_block_points: Some("BASE, IN00-IN11, M00, OUT00-OUT11".into()),
            ..HostOptions::default()
        };
        let registry = BlockRegistry::new(&opts);
        assert_eq!(
            registry.group_ranges(ModelFamily::Sd, BlockType::Lora),
            default_group_ranges(ModelFamily::Sd, BlockType::Lora)
        );
        assert_eq!(registry.groups(ModelFamily::Sd, BlockType::Lycoris).len(), 4);
    }

    #[test]
    fn presets_register_by_length() {
        let registry = BlockRegistry::default();
        assert!(registry.presets(ModelFamily::Sd, BlockType::Lora).get("OUTALL").is_some());
        assert!(registry.presets(ModelFamily::Sd, BlockType::Lycoris).get("OUTALL").is_none());
        assert!(registry.presets(ModelFamily::Sd, BlockType::Lycoris).get("ALL0.5").is_some());
        assert!(registry.presets(ModelFamily::Flux, BlockType::Lora).is_empty());
    }

    #[test]
    fn combinations_follow_fixed_order() {
        let all: Vec<_> = combinations().collect();
        assert_eq!(all.len(), 12);
        assert_eq!(all[0], (ModelFamily::Unknown, BlockType::Unknown));
        assert_eq!(all[4], (ModelFamily::Sd, BlockType::Lora));
        assert_eq!(all[11], (ModelFamily::Flux, BlockType::Lycoris));
    }
}
