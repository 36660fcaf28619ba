//! Decoded weight state of one tag instance.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::codec::format_number;
use crate::config::{ControlConfig, ControlTable};
use crate::registry::{blocks, masked_blocks};
use crate::types::{BlockType, ModelFamily, ScalarKey};

/// Value, slider range and enabled flag of one control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlState {
    pub initial_value: f64,
    pub value: f64,
    pub slider_min: f64,
    pub slider_max: f64,
    /// `None` means "not explicit": the control is emitted only when its
    /// value differs from the default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl ControlState {
    pub fn new(value: f64, cfg: &ControlConfig) -> Self {
        let (slider_min, slider_max) = cfg.bounds_for(value);
        Self {
            initial_value: value,
            value,
            slider_min,
            slider_max,
            initial_enabled: None,
            enabled: None,
        }
    }

    pub fn with_enabled(mut self, enabled: Option<bool>) -> Self {
        self.initial_enabled = enabled;
        self.enabled = enabled;
        self
    }

    /// Sets the value, widening the slider range when the value falls
    /// outside it. Values are never clamped.
    pub fn set_value(&mut self, value: f64) {
        self.value = value;
        self.slider_min = self.slider_min.min(value);
        self.slider_max = self.slider_max.max(value);
    }

    pub fn in_bounds(&self) -> bool {
        self.slider_min <= self.value && self.value <= self.slider_max
    }
}

/// Canonical decoded form of one tag.
///
/// `blocks` is keyed by exactly the masked labels of `(family, block_type)`,
/// in registry order. Use [`WeightState::retarget`] to change either.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightState {
    pub family: ModelFamily,
    pub block_type: BlockType,
    scalars: [ControlState; 5],
    blocks: IndexMap<String, ControlState>,
    /// Free-form per-block override expression, carried verbatim.
    pub lbwe: String,
    /// When set, blocks serialize as the `XYZ` placeholder.
    pub xyz: bool,
}

fn scalar_index(key: ScalarKey) -> usize {
    match key {
        ScalarKey::Te => 0,
        ScalarKey::Unet => 1,
        ScalarKey::Dyn => 2,
        ScalarKey::Start => 3,
        ScalarKey::Stop => 4,
    }
}

impl WeightState {
    /// Every scalar at its default, no family and no blocks.
    pub fn new(controls: &ControlTable) -> Self {
        let scalars = ScalarKey::ALL.map(|key| {
            let cfg = controls.scalar(key);
            ControlState::new(cfg.default, cfg)
        });
        Self {
            family: ModelFamily::Unknown,
            block_type: BlockType::Unknown,
            scalars,
            blocks: IndexMap::new(),
            lbwe: String::new(),
            xyz: false,
        }
    }

    pub fn scalar(&self, key: ScalarKey) -> &ControlState {
        &self.scalars[scalar_index(key)]
    }

    pub fn scalar_mut(&mut self, key: ScalarKey) -> &mut ControlState {
        &mut self.scalars[scalar_index(key)]
    }

    pub fn scalars(&self) -> impl Iterator<Item = (ScalarKey, &ControlState)> {
        ScalarKey::ALL.into_iter().zip(self.scalars.iter())
    }

    pub fn blocks(&self) -> &IndexMap<String, ControlState> {
        &self.blocks
    }

    pub fn block(&self, label: &str) -> Option<&ControlState> {
        self.blocks.get(label)
    }

    pub fn block_mut(&mut self, label: &str) -> Option<&mut ControlState> {
        self.blocks.get_mut(label)
    }

    /// Switches to a new (family, block type), re-keying blocks to its masked
    /// set. Labels present before and after keep their state; new labels start
    /// at the block default.
    pub fn retarget(&mut self, family: ModelFamily, block_type: BlockType, block_cfg: &ControlConfig) {
        let mut previous = std::mem::take(&mut self.blocks);
        self.blocks = masked_blocks(family, block_type)
            .into_iter()
            .map(|label| {
                let state = previous
                    .shift_remove(label)
                    .unwrap_or_else(|| ControlState::new(block_cfg.default, block_cfg));
                (label.to_string(), state)
            })
            .collect();
        self.family = family;
        self.block_type = block_type;
    }

    /// Assigns `values` to the masked blocks in order. Returns `false`, leaving
    /// blocks untouched, when the length does not match.
    pub fn set_block_values(&mut self, values: &[f64]) -> bool {
        if values.len() != self.blocks.len() {
            return false;
        }
        for (state, value) in self.blocks.values_mut().zip(values) {
            state.set_value(*value);
        }
        true
    }

    /// Replaces the masked blocks with fresh controls holding `values`, so
    /// both the initial and current value are set.
    pub(crate) fn load_block_values(&mut self, values: &[f64], block_cfg: &ControlConfig) {
        for (control, value) in self.blocks.values_mut().zip(values) {
            *control = ControlState::new(*value, block_cfg);
        }
    }

    pub fn block_values(&self) -> Vec<f64> {
        self.blocks.values().map(|s| s.value).collect()
    }

    /// Masked block values joined with `,` in label order.
    pub fn joined_blocks(&self) -> String {
        self.blocks
            .values()
            .map(|s| format_number(s.value))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Full family-wide vector with unmasked positions at zero.
    pub fn family_vector(&self) -> Vec<f64> {
        blocks(self.family)
            .iter()
            .map(|label| self.blocks.get(*label).map_or(0.0, |s| s.value))
            .collect()
    }

    pub fn blocks_at_default(&self, block_cfg: &ControlConfig) -> bool {
        self.blocks.values().all(|s| s.value == block_cfg.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_value_widens_bounds() {
        let cfg = ControlConfig::new(0.0, 1.0, 1.0, 0.05);
        let mut state = ControlState::new(0.5, &cfg);
        state.set_value(1.7);
        assert_eq!((state.slider_min, state.slider_max), (0.0, 1.7));
        state.set_value(-2.0);
        assert_eq!((state.slider_min, state.slider_max), (-2.0, 1.7));
        assert_eq!(state.value, -2.0);
        assert!(state.in_bounds());
    }

    #[test]
    fn retarget_keeps_shared_labels() {
        let controls = ControlTable::default();
        let mut state = WeightState::new(&controls);
        state.retarget(ModelFamily::Sd, BlockType::Lycoris, controls.block());
        assert_eq!(state.blocks().len(), 26);
        state.block_mut("IN00").unwrap().set_value(0.25);
        state.block_mut("IN01").unwrap().set_value(0.5);

        state.retarget(ModelFamily::Sd, BlockType::Lora, controls.block());
        assert_eq!(state.blocks().len(), 17);
        assert!(state.block("IN00").is_none());
        assert_eq!(state.block("IN01").unwrap().value, 0.5);

        state.retarget(ModelFamily::Sd, BlockType::Lycoris, controls.block());
        assert_eq!(state.block("IN00").unwrap().value, 1.0);
    }

    #[test]
    fn family_vector_zero_fills() {
        let controls = ControlTable::default();
        let mut state = WeightState::new(&controls);
        state.retarget(ModelFamily::Sdxl, BlockType::Lora, controls.block());
        let full = state.family_vector();
        assert_eq!(full.len(), 26);
        assert_eq!(full.iter().filter(|v| **v == 1.0).count(), 12);
    }

    #[test]
    fn block_values_require_matching_length() {
        let controls = ControlTable::default();
        let mut state = WeightState::new(&controls);
        state.retarget(ModelFamily::Flux, BlockType::Lora, controls.block());
        assert!(!state.set_block_values(&[0.0; 3]));
        assert!(state.blocks_at_default(controls.block()));
        assert!(state.set_block_values(&[0.5; 19]));
        assert_eq!(state.joined_blocks().split(',').count(), 19);
        assert!(state.joined_blocks().starts_with("0.5,0.5"));
    }
}
