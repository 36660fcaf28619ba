//! Weight descriptor codec: tag body text ⇄ [`WeightState`].
//!
//! Decoding is best-effort. Malformed segments are skipped and reported as
//! [`DecodeIssue`]s; a decode never fails outright.

use indexmap::IndexMap;
use thiserror::Error;
use tracing::debug;

use crate::config::ControlTable;
use crate::registry::{combinations, masked_count, BlockRegistry};
use crate::state::{ControlState, WeightState};
use crate::tag::Tag;
use crate::types::{BlockType, ModelFamily, ScalarKey, TagType};

/// Placeholder written instead of block values in sweep mode.
pub const XYZ_PLACEHOLDER: &str = "XYZ";

const POSITIONAL_KEYS: [&str; 2] = ["te", "unet"];
const KEY_ORDER: [&str; 8] = ["te", "unet", "dyn", "start", "stop", "step", "lbw", "lbwe"];

/// A segment the decoder skipped or had to guess about.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeIssue {
    #[error("unknown key `{0}`")]
    UnknownKey(String),
    #[error("invalid number `{value}` for `{key}`")]
    InvalidNumber { key: String, value: String },
    #[error("extra positional segment `{0}`")]
    ExtraPositional(String),
    #[error("unknown preset `{0}`")]
    UnknownPreset(String),
    #[error("no block layout takes {0} weights")]
    UnresolvedBlocks(usize),
    #[error("{len} weights fit {candidates:?}, chose {chosen:?}")]
    AmbiguousBlocks {
        len: usize,
        candidates: Vec<(ModelFamily, BlockType)>,
        chosen: (ModelFamily, BlockType),
    },
}

/// Result of [`WeightCodec::decode`].
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub state: WeightState,
    pub issues: Vec<DecodeIssue>,
}

/// Result of [`WeightCodec::encode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    /// Body with raw numeric block values. Used as the history and lock key.
    pub params: String,
    /// Body with a matching preset name substituted for the block values.
    /// This is what gets written back into the prompt.
    pub body: String,
}

/// Formats a number the way tag values are written: shortest decimal that
/// round-trips, with `-0` printed as `0`.
pub fn format_number(value: f64) -> String {
    if value == 0.0 {
        "0".to_string()
    } else {
        value.to_string()
    }
}

/// Half-up rounding to a whole step.
fn round_step(value: f64) -> f64 {
    (value + 0.5).floor()
}

fn parse_number(key: &str, raw: &str, issues: &mut Vec<DecodeIssue>) -> Option<f64> {
    match raw.trim().parse::<f64>() {
        Ok(n) if n.is_finite() => Some(n),
        _ => {
            issues.push(DecodeIssue::InvalidNumber {
                key: key.to_string(),
                value: raw.to_string(),
            });
            None
        }
    }
}

/// Splits a body into keyed values. Un-keyed segments take the positional
/// keys in order; later occurrences of a key replace earlier ones.
fn split_segments(body: &str, issues: &mut Vec<DecodeIssue>) -> IndexMap<String, String> {
    let mut segments = IndexMap::new();
    let mut positional = 0;
    for segment in body.split(':') {
        if let Some((key, value)) = segment.split_once('=') {
            segments.insert(key.trim().to_ascii_lowercase(), value.to_string());
            continue;
        }
        match POSITIONAL_KEYS.get(positional) {
            Some(key) => {
                segments.insert(key.to_string(), segment.to_string());
            }
            None => issues.push(DecodeIssue::ExtraPositional(segment.to_string())),
        }
        positional += 1;
    }
    for key in segments.keys() {
        if !KEY_ORDER.contains(&key.as_str()) {
            issues.push(DecodeIssue::UnknownKey(key.clone()));
        }
    }
    segments
}

/// Picks the prior combination when it is a candidate, otherwise the first.
fn choose(
    candidates: &[(ModelFamily, BlockType)],
    prior: (ModelFamily, BlockType),
    len: usize,
    issues: &mut Vec<DecodeIssue>,
) -> Option<(ModelFamily, BlockType)> {
    let chosen = if candidates.contains(&prior) {
        prior
    } else {
        *candidates.first()?
    };
    if candidates.len() > 1 {
        issues.push(DecodeIssue::AmbiguousBlocks {
            len,
            candidates: candidates.to_vec(),
            chosen,
        });
    }
    Some(chosen)
}

/// Decoder and encoder bound to one registry and control table.
#[derive(Debug, Clone, Copy)]
pub struct WeightCodec<'a> {
    registry: &'a BlockRegistry,
    controls: &'a ControlTable,
}

impl<'a> WeightCodec<'a> {
    pub fn new(registry: &'a BlockRegistry, controls: &'a ControlTable) -> Self {
        Self { registry, controls }
    }

    pub fn registry(&self) -> &'a BlockRegistry {
        self.registry
    }

    pub fn controls(&self) -> &'a ControlTable {
        self.controls
    }

    /// Decodes a tag body (everything after `<type:name:`).
    ///
    /// `prior_family`/`prior_block_type` are kept when the body carries no
    /// block vector and break ties when several layouts fit one.
    pub fn decode(&self, body: &str, prior_family: ModelFamily, prior_block_type: BlockType) -> Decoded {
        let mut issues = Vec::new();
        let segments = split_segments(body, &mut issues);

        let mut scalars: IndexMap<ScalarKey, f64> = IndexMap::new();
        let mut resolved: Option<((ModelFamily, BlockType), Vec<f64>)> = None;
        let mut lbwe = String::new();
        let mut xyz = false;

        for key in KEY_ORDER {
            let Some(raw) = segments.get(key) else {
                continue;
            };
            match key {
                "step" => {
                    let Some((start, stop)) = raw.split_once('-') else {
                        issues.push(DecodeIssue::InvalidNumber {
                            key: key.to_string(),
                            value: raw.clone(),
                        });
                        continue;
                    };
                    let start = parse_number(key, start, &mut issues);
                    let stop = parse_number(key, stop, &mut issues);
                    if let (Some(start), Some(stop)) = (start, stop) {
                        scalars.insert(ScalarKey::Start, round_step(start));
                        scalars.insert(ScalarKey::Stop, round_step(stop));
                    }
                }
                "lbw" => {
                    if raw.trim() == XYZ_PLACEHOLDER {
                        xyz = true;
                    } else {
                        resolved = self.resolve_blocks(raw, (prior_family, prior_block_type), &mut issues);
                    }
                }
                "lbwe" => lbwe = raw.clone(),
                _ => {
                    let Some(scalar) = ScalarKey::from_name(key) else {
                        continue;
                    };
                    if let Some(n) = parse_number(key, raw, &mut issues) {
                        let n = if scalar.is_step() { round_step(n) } else { n };
                        scalars.insert(scalar, n);
                    }
                }
            }
        }

        let mut state = WeightState::new(self.controls);
        for key in ScalarKey::ALL {
            let cfg = self.controls.scalar(key);
            let control = match scalars.get(&key) {
                Some(value) => {
                    let control = ControlState::new(*value, cfg);
                    if key.is_optional() {
                        control.with_enabled(Some(true))
                    } else {
                        control
                    }
                }
                None => ControlState::new(cfg.default, cfg),
            };
            *state.scalar_mut(key) = control;
        }

        let (family, block_type) = resolved
            .as_ref()
            .map_or((prior_family, prior_block_type), |(combo, _)| *combo);
        state.retarget(family, block_type, self.controls.block());
        if let Some((_, values)) = resolved {
            state.load_block_values(&values, self.controls.block());
        }
        state.lbwe = lbwe;
        state.xyz = xyz;

        for issue in &issues {
            debug!(%issue, body, "tag segment skipped");
        }
        Decoded { state, issues }
    }

    /// [`WeightCodec::decode`] without the diagnostics.
    pub fn parse(&self, body: &str, prior_family: ModelFamily, prior_block_type: BlockType) -> WeightState {
        self.decode(body, prior_family, prior_block_type).state
    }

    /// Resolves an `lbw` value to a layout and its masked values.
    fn resolve_blocks(
        &self,
        raw: &str,
        prior: (ModelFamily, BlockType),
        issues: &mut Vec<DecodeIssue>,
    ) -> Option<((ModelFamily, BlockType), Vec<f64>)> {
        let items: Vec<&str> = raw.split(',').map(str::trim).collect();

        if let [name] = items.as_slice() {
            let found: Vec<((ModelFamily, BlockType), Vec<f64>)> = combinations()
                .filter_map(|combo| {
                    let values = self.registry.presets(combo.0, combo.1).values(name)?;
                    (values.len() == masked_count(combo.0, combo.1)).then_some((combo, values))
                })
                .collect();
            if !found.is_empty() {
                let candidates: Vec<_> = found.iter().map(|(combo, _)| *combo).collect();
                let chosen = choose(&candidates, prior, 1, issues)?;
                return found.into_iter().find(|(combo, _)| *combo == chosen);
            }
            if name.parse::<f64>().is_err() {
                issues.push(DecodeIssue::UnknownPreset(name.to_string()));
                return None;
            }
        }

        let values = items
            .iter()
            .map(|item| parse_number("lbw", item, issues))
            .collect::<Option<Vec<f64>>>()?;
        let candidates: Vec<_> = combinations()
            .filter(|(family, bt)| masked_count(*family, *bt) == values.len())
            .collect();
        if candidates.is_empty() {
            issues.push(DecodeIssue::UnresolvedBlocks(values.len()));
            return None;
        }
        let chosen = choose(&candidates, prior, values.len(), issues)?;
        Some((chosen, values))
    }

    /// Encodes a state into tag body text.
    pub fn encode(&self, state: &WeightState) -> Encoded {
        let mut segments = vec![format_number(state.scalar(ScalarKey::Te).value)];

        let mut next_positional = 1;
        for key in [ScalarKey::Unet, ScalarKey::Dyn] {
            let control = state.scalar(key);
            let default = self.controls.scalar(key).default;
            let emit = match control.enabled {
                Some(enabled) => enabled,
                None => control.value != default,
            };
            if !emit {
                continue;
            }
            let positional = POSITIONAL_KEYS.get(next_positional) == Some(&key.as_str());
            if positional && control.value != default {
                segments.push(format_number(control.value));
                next_positional += 1;
            } else {
                segments.push(format!("{key}={}", format_number(control.value)));
            }
        }

        let start_cfg = self.controls.scalar(ScalarKey::Start);
        let stop_cfg = self.controls.scalar(ScalarKey::Stop);
        let start = state.scalar(ScalarKey::Start).value;
        let mut stop = state.scalar(ScalarKey::Stop).value;
        if stop < 0.0 {
            stop = stop_cfg.default;
        }
        match (start != start_cfg.default, stop != stop_cfg.default) {
            (true, true) => segments.push(format!(
                "step={}-{}",
                format_number(start),
                format_number(stop)
            )),
            (true, false) => segments.push(format!("start={}", format_number(start))),
            (false, true) => segments.push(format!("stop={}", format_number(stop))),
            (false, false) => {}
        }

        let mut params = segments.clone();
        let mut body = segments;
        if state.xyz {
            let segment = format!("lbw={XYZ_PLACEHOLDER}");
            params.push(segment.clone());
            body.push(segment);
        } else if state.family != ModelFamily::Unknown
            && !state.blocks().is_empty()
            && !state.blocks_at_default(self.controls.block())
        {
            let joined = state.joined_blocks();
            let shown = self
                .registry
                .match_preset(state.family, state.block_type, &joined)
                .unwrap_or(&joined);
            body.push(format!("lbw={shown}"));
            params.push(format!("lbw={joined}"));
        }
        if !state.lbwe.is_empty() {
            let segment = format!("lbwe={}", state.lbwe);
            params.push(segment.clone());
            body.push(segment);
        }

        Encoded {
            params: params.join(":"),
            body: body.join(":"),
        }
    }

    /// Full tag text, `<type:name:body>`, with preset substitution.
    pub fn serialize(&self, tag_type: TagType, name: &str, state: &WeightState) -> String {
        Tag::new(tag_type, name, self.encode(state).body).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixtures() -> (BlockRegistry, ControlTable) {
        (BlockRegistry::default(), ControlTable::default())
    }

    #[test]
    fn positional_segments_bind_te_then_unet() {
        let (registry, controls) = fixtures();
        let codec = WeightCodec::new(&registry, &controls);
        let decoded = codec.decode("0.8:0.6:0.4", ModelFamily::Unknown, BlockType::Unknown);
        assert_eq!(decoded.state.scalar(ScalarKey::Te).value, 0.8);
        assert_eq!(decoded.state.scalar(ScalarKey::Unet).value, 0.6);
        assert_eq!(decoded.state.scalar(ScalarKey::Unet).enabled, Some(true));
        assert_eq!(decoded.issues, vec![DecodeIssue::ExtraPositional("0.4".into())]);
    }

    #[test]
    fn absent_optional_scalar_is_not_explicit() {
        let (registry, controls) = fixtures();
        let codec = WeightCodec::new(&registry, &controls);
        let state = codec.parse("0.5", ModelFamily::Sd, BlockType::Lora);
        assert_eq!(state.scalar(ScalarKey::Unet).enabled, None);
        assert_eq!(state.scalar(ScalarKey::Te).enabled, None);
        assert_eq!(state.scalar(ScalarKey::Stop).value, 20.0);
        assert_eq!(state.blocks().len(), 17);
    }

    #[test]
    fn step_overrides_start_and_stop() {
        let (registry, controls) = fixtures();
        let codec = WeightCodec::new(&registry, &controls);
        let state = codec.parse("1:step=2.5-9.4:start=7", ModelFamily::Unknown, BlockType::Unknown);
        assert_eq!(state.scalar(ScalarKey::Start).value, 3.0);
        assert_eq!(state.scalar(ScalarKey::Stop).value, 9.0);
    }

    #[test]
    fn malformed_segments_are_skipped() {
        let (registry, controls) = fixtures();
        let codec = WeightCodec::new(&registry, &controls);
        let decoded = codec.decode("abc:foo=1:dyn=x:unet=0.3", ModelFamily::Unknown, BlockType::Unknown);
        assert_eq!(decoded.state.scalar(ScalarKey::Te).value, 1.0);
        assert_eq!(decoded.state.scalar(ScalarKey::Dyn).enabled, None);
        assert_eq!(decoded.state.scalar(ScalarKey::Unet).value, 0.3);
        assert!(decoded.issues.contains(&DecodeIssue::UnknownKey("foo".into())));
        assert_eq!(
            decoded
                .issues
                .iter()
                .filter(|i| matches!(i, DecodeIssue::InvalidNumber { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn block_vector_resolves_layout_by_length() {
        let (registry, controls) = fixtures();
        let codec = WeightCodec::new(&registry, &controls);
        let lbw = "1,0,0,0,0,1,1,1,1,1,1,0";
        let decoded = codec.decode(&format!("1:lbw={lbw}"), ModelFamily::Unknown, BlockType::Unknown);
        assert_eq!(decoded.state.family, ModelFamily::Sdxl);
        assert_eq!(decoded.state.block_type, BlockType::Lora);
        assert_eq!(decoded.state.joined_blocks(), lbw);
        assert!(decoded.issues.is_empty());
    }

    #[test]
    fn ambiguous_length_prefers_prior_and_is_reported() {
        let (registry, controls) = fixtures();
        let codec = WeightCodec::new(&registry, &controls);
        let lbw = vec!["0.5"; 19].join(",");
        let body = format!("1:lbw={lbw}");

        let decoded = codec.decode(&body, ModelFamily::Flux, BlockType::Lycoris);
        assert_eq!(decoded.state.block_type, BlockType::Lycoris);
        assert!(matches!(decoded.issues[0], DecodeIssue::AmbiguousBlocks { len: 19, .. }));

        let decoded = codec.decode(&body, ModelFamily::Unknown, BlockType::Unknown);
        assert_eq!(decoded.state.family, ModelFamily::Flux);
        assert_eq!(decoded.state.block_type, BlockType::Lora);
    }

    #[test]
    fn unresolved_vector_keeps_prior_layout_at_defaults() {
        let (registry, controls) = fixtures();
        let codec = WeightCodec::new(&registry, &controls);
        let decoded = codec.decode("1:lbw=1,0,1", ModelFamily::Sd, BlockType::Lora);
        assert_eq!(decoded.issues, vec![DecodeIssue::UnresolvedBlocks(3)]);
        assert_eq!(decoded.state.family, ModelFamily::Sd);
        assert!(decoded.state.blocks_at_default(controls.block()));
    }

    #[test]
    fn preset_name_decodes_to_values() {
        let (registry, controls) = fixtures();
        let codec = WeightCodec::new(&registry, &controls);
        let state = codec.parse("1:lbw=OUTALL", ModelFamily::Unknown, BlockType::Unknown);
        assert_eq!((state.family, state.block_type), (ModelFamily::Sd, BlockType::Lora));
        assert_eq!(state.joined_blocks(), "1,0,0,0,0,0,0,0,1,1,1,1,1,1,1,1,1");

        let decoded = codec.decode("1:lbw=NOPE", ModelFamily::Unknown, BlockType::Unknown);
        assert_eq!(decoded.issues, vec![DecodeIssue::UnknownPreset("NOPE".into())]);
    }

    #[test]
    fn xyz_skips_block_decoding() {
        let (registry, controls) = fixtures();
        let codec = WeightCodec::new(&registry, &controls);
        let state = codec.parse("1:lbw=XYZ:lbwe=A", ModelFamily::Sd, BlockType::Lora);
        assert!(state.xyz);
        assert_eq!(state.lbwe, "A");
        assert_eq!(codec.encode(&state).params, "1:lbw=XYZ:lbwe=A");
    }

    #[test]
    fn encode_places_unet_positionally_only_when_off_default() {
        let (registry, controls) = fixtures();
        let codec = WeightCodec::new(&registry, &controls);
        let mut state = WeightState::new(&controls);
        state.scalar_mut(ScalarKey::Unet).enabled = Some(true);
        state.scalar_mut(ScalarKey::Dyn).set_value(16.0);
        assert_eq!(codec.encode(&state).body, "1:unet=0:dyn=16");

        state.scalar_mut(ScalarKey::Unet).set_value(0.5);
        assert_eq!(codec.encode(&state).body, "1:0.5:dyn=16");

        state.scalar_mut(ScalarKey::Unet).enabled = Some(false);
        assert_eq!(codec.encode(&state).body, "1:dyn=16");
    }

    #[test]
    fn encode_start_stop_forms() {
        let (registry, controls) = fixtures();
        let codec = WeightCodec::new(&registry, &controls);
        let mut state = WeightState::new(&controls);
        state.scalar_mut(ScalarKey::Start).set_value(4.0);
        assert_eq!(codec.encode(&state).body, "1:start=4");
        state.scalar_mut(ScalarKey::Stop).set_value(12.0);
        assert_eq!(codec.encode(&state).body, "1:step=4-12");
        state.scalar_mut(ScalarKey::Start).set_value(0.0);
        assert_eq!(codec.encode(&state).body, "1:stop=12");
        state.scalar_mut(ScalarKey::Stop).set_value(-1.0);
        assert_eq!(codec.encode(&state).body, "1");
    }

    #[test]
    fn encode_substitutes_preset_in_body_only() {
        let (registry, controls) = fixtures();
        let codec = WeightCodec::new(&registry, &controls);
        let state = codec.parse("0.7:lbw=1,0,0,0,0,0,0,0,1,1,1,1,1,1,1,1,1", ModelFamily::Unknown, BlockType::Unknown);
        let encoded = codec.encode(&state);
        assert_eq!(encoded.body, "0.7:lbw=OUTALL");
        assert_eq!(encoded.params, "0.7:lbw=1,0,0,0,0,0,0,0,1,1,1,1,1,1,1,1,1");
        assert_eq!(
            codec.serialize(TagType::Lyco, "foo", &state),
            "<lyco:foo:0.7:lbw=OUTALL>"
        );
    }

    #[test]
    fn number_format_drops_negative_zero() {
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(0.25), "0.25");
        assert_eq!(format_number(16.0), "16");
        assert_eq!(format_number(-1.5), "-1.5");
    }
}
