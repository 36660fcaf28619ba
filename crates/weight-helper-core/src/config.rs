//! Host-provided options and the per-control numeric configuration derived
//! from them.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{BlockType, ModelFamily, ScalarKey};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse host options: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read host options from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Read-only options map supplied by the host at startup.
///
/// Field names follow the host's flat `weight_helper_*` option keys. Every
/// key is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostOptions {
    #[serde(rename = "weight_helper_enabled")]
    pub enabled: bool,
    #[serde(rename = "weight_helper_context_menu_scale")]
    pub context_menu_scale: f64,
    /// Alternate insertion mode: write the tag once on close instead of on
    /// every edit.
    #[serde(rename = "weight_helper_using_execCommand")]
    pub using_exec_command: bool,
    #[serde(rename = "weight_helper_slider_length")]
    pub slider_length: u32,

    #[serde(rename = "weight_helper_te_min")]
    pub te_min: f64,
    #[serde(rename = "weight_helper_te_max")]
    pub te_max: f64,
    #[serde(rename = "weight_helper_te_step")]
    pub te_step: f64,
    #[serde(rename = "weight_helper_te_default")]
    pub te_default: f64,

    #[serde(rename = "weight_helper_unet_min")]
    pub unet_min: f64,
    #[serde(rename = "weight_helper_unet_max")]
    pub unet_max: f64,
    #[serde(rename = "weight_helper_unet_step")]
    pub unet_step: f64,
    #[serde(rename = "weight_helper_unet_default")]
    pub unet_default: f64,

    #[serde(rename = "weight_helper_dyn_min")]
    pub dyn_min: f64,
    #[serde(rename = "weight_helper_dyn_max")]
    pub dyn_max: f64,
    #[serde(rename = "weight_helper_dyn_step")]
    pub dyn_step: f64,
    #[serde(rename = "weight_helper_dyn_default")]
    pub dyn_default: f64,

    #[serde(rename = "weight_helper_lbw_min")]
    pub lbw_min: f64,
    #[serde(rename = "weight_helper_lbw_max")]
    pub lbw_max: f64,
    #[serde(rename = "weight_helper_lbw_step")]
    pub lbw_step: f64,
    #[serde(rename = "weight_helper_lbw_default")]
    pub lbw_default: f64,

    #[serde(rename = "weight_helper_lbw_lora_sd_block_points")]
    pub lbw_lora_sd_block_points: Option<String>,
    #[serde(rename = "weight_helper_lbw_lycoris_sd_block_points")]
    pub lbw_lycoris_sd_block_points: Option<String>,
    #[serde(rename = "weight_helper_lbw_lora_sdxl_block_points")]
    pub lbw_lora_sdxl_block_points: Option<String>,
    #[serde(rename = "weight_helper_lbw_lycoris_sdxl_block_points")]
    pub lbw_lycoris_sdxl_block_points: Option<String>,
    #[serde(rename = "weight_helper_lbw_lora_flux_block_points")]
    pub lbw_lora_flux_block_points: Option<String>,
    #[serde(rename = "weight_helper_lbw_lycoris_flux_block_points")]
    pub lbw_lycoris_flux_block_points: Option<String>,

    /// Preset lines, `NAME:v1,v2,...` one per line.
    #[serde(rename = "weight_helper_lbw_presets")]
    pub lbw_presets: Option<String>,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            context_menu_scale: 0.8,
            using_exec_command: true,
            slider_length: 160,
            te_min: 0.0,
            te_max: 1.0,
            te_step: 0.05,
            te_default: 1.0,
            unet_min: 0.0,
            unet_max: 1.0,
            unet_step: 0.05,
            unet_default: 0.0,
            dyn_min: 0.0,
            dyn_max: 128.0,
            dyn_step: 8.0,
            dyn_default: 0.0,
            lbw_min: 0.0,
            lbw_max: 1.0,
            lbw_step: 0.05,
            lbw_default: 1.0,
            lbw_lora_sd_block_points: None,
            lbw_lycoris_sd_block_points: None,
            lbw_lora_sdxl_block_points: None,
            lbw_lycoris_sdxl_block_points: None,
            lbw_lora_flux_block_points: None,
            lbw_lycoris_flux_block_points: None,
            lbw_presets: None,
        }
    }
}

impl HostOptions {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    /// Block-point override string for a (family, block type), if any.
    pub fn block_points(&self, family: ModelFamily, block_type: BlockType) -> Option<&str> {
        let value = match (family, block_type) {
            (ModelFamily::Sd, BlockType::Lora) => &self.lbw_lora_sd_block_points,
            (ModelFamily::Sd, BlockType::Lycoris) => &self.lbw_lycoris_sd_block_points,
            (ModelFamily::Sdxl, BlockType::Lora) => &self.lbw_lora_sdxl_block_points,
            (ModelFamily::Sdxl, BlockType::Lycoris) => &self.lbw_lycoris_sdxl_block_points,
            (ModelFamily::Flux, BlockType::Lora) => &self.lbw_lora_flux_block_points,
            (ModelFamily::Flux, BlockType::Lycoris) => &self.lbw_lycoris_flux_block_points,
            _ => return None,
        };
        value.as_deref()
    }
}

/// Numeric range, default and step of one control.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlConfig {
    pub min: f64,
    pub max: f64,
    pub default: f64,
    pub step: f64,
}

impl ControlConfig {
    pub const fn new(min: f64, max: f64, default: f64, step: f64) -> Self {
        Self {
            min,
            max,
            default,
            step,
        }
    }

    /// Slider bounds that always contain `value`.
    pub fn bounds_for(&self, value: f64) -> (f64, f64) {
        (value.min(self.min), value.max(self.max))
    }
}

/// Sampling step count assumed before the host reports one.
pub const DEFAULT_SAMPLING_STEPS: u32 = 20;

/// Configuration of every control: the five scalars plus the shared block
/// weight configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlTable {
    te: ControlConfig,
    unet: ControlConfig,
    dyn_: ControlConfig,
    start: ControlConfig,
    stop: ControlConfig,
    block: ControlConfig,
}

impl Default for ControlTable {
    fn default() -> Self {
        Self::from_options(&HostOptions::default(), DEFAULT_SAMPLING_STEPS)
    }
}

impl ControlTable {
    /// Builds the table from host options; `steps` is the host's current
    /// sampling step count, which bounds `start`/`stop` and is the `stop`
    /// default.
    pub fn from_options(opts: &HostOptions, steps: u32) -> Self {
        let steps = f64::from(steps);
        Self {
            te: ControlConfig::new(opts.te_min, opts.te_max, opts.te_default, opts.te_step),
            unet: ControlConfig::new(opts.unet_min, opts.unet_max, opts.unet_default, opts.unet_step),
            dyn_: ControlConfig::new(opts.dyn_min, opts.dyn_max, opts.dyn_default, opts.dyn_step),
            start: ControlConfig::new(0.0, steps, 0.0, 1.0),
            stop: ControlConfig::new(0.0, steps, steps, 1.0),
            block: ControlConfig::new(opts.lbw_min, opts.lbw_max, opts.lbw_default, opts.lbw_step),
        }
    }

    /// Same table with `start`/`stop` rebased on a new step count.
    pub fn with_steps(&self, steps: u32) -> Self {
        let steps = f64::from(steps);
        Self {
            start: ControlConfig::new(0.0, steps, 0.0, 1.0),
            stop: ControlConfig::new(0.0, steps, steps, 1.0),
            ..self.clone()
        }
    }

    pub fn scalar(&self, key: ScalarKey) -> &ControlConfig {
        match key {
            ScalarKey::Te => &self.te,
            ScalarKey::Unet => &self.unet,
            ScalarKey::Dyn => &self.dyn_,
            ScalarKey::Start => &self.start,
            ScalarKey::Stop => &self.stop,
        }
    }

    pub fn block(&self) -> &ControlConfig {
        &self.block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_default_when_keys_missing() {
        let opts = HostOptions::from_json_str("{}").unwrap();
        assert_eq!(opts, HostOptions::default());
        assert!(opts.using_exec_command);
    }

    #[test]
    fn options_read_flat_host_keys() {
        let opts = HostOptions::from_json_str(
            r#"{
                "weight_helper_enabled": false,
                "weight_helper_using_execCommand": false,
                "weight_helper_lbw_max": 2,
                "weight_helper_lbw_lora_sd_block_points": "BASE, IN01-IN08",
                "unrelated_option": 3
            }"#,
        )
        .unwrap();
        assert!(!opts.enabled);
        assert!(!opts.using_exec_command);
        assert_eq!(opts.lbw_max, 2.0);
        assert_eq!(
            opts.block_points(ModelFamily::Sd, BlockType::Lora),
            Some("BASE, IN01-IN08")
        );
        assert_eq!(opts.block_points(ModelFamily::Unknown, BlockType::Lora), None);
    }

    #[test]
    fn options_reject_wrong_types() {
        let err = HostOptions::from_json_str(r#"{"weight_helper_te_min": "low"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn step_controls_follow_sampling_steps() {
        let table = ControlTable::from_options(&HostOptions::default(), 30);
        assert_eq!(table.scalar(ScalarKey::Stop).default, 30.0);
        assert_eq!(table.scalar(ScalarKey::Start).max, 30.0);

        let rebased = table.with_steps(12);
        assert_eq!(rebased.scalar(ScalarKey::Stop).default, 12.0);
        assert_eq!(rebased.scalar(ScalarKey::Te), table.scalar(ScalarKey::Te));
    }

    #[test]
    fn bounds_expand_to_contain_value() {
        let cfg = ControlConfig::new(0.0, 1.0, 1.0, 0.05);
        assert_eq!(cfg.bounds_for(0.5), (0.0, 1.0));
        assert_eq!(cfg.bounds_for(-0.5), (-0.5, 1.0));
        assert_eq!(cfg.bounds_for(3.0), (0.0, 3.0));
    }
}
