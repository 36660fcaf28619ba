//! Core logic of the `lbw-tag` binary.
//!
//! Usage:
//!   lbw-tag [--options FILE] [--steps N] [--presets FILE] TAG
//!
//! Decodes `TAG`, prints a JSON report of the decoded state and then the
//! normalized tag on the last line.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::Serialize;
use thiserror::Error;
use weight_helper_core::{
    BlockRegistry, BlockType, ConfigError, ControlState, ControlTable, HostOptions, ModelFamily, Tag,
    TagError, TagType, WeightCodec, DEFAULT_SAMPLING_STEPS,
};

pub const USAGE: &str = "usage: lbw-tag [--options FILE] [--steps N] [--presets FILE] TAG";

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{}", USAGE)]
    Usage,
    #[error("missing value for `{0}`")]
    MissingValue(String),
    #[error("invalid step count `{0}`")]
    InvalidSteps(String),
    #[error("unexpected argument `{0}`")]
    UnexpectedArgument(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to read presets from {path:?}: {source}")]
    Presets {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid tag: {0}")]
    Tag(#[from] TagError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Parsed command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Args {
    pub options: Option<PathBuf>,
    pub presets: Option<PathBuf>,
    pub steps: Option<u32>,
    pub tag: String,
}

impl Args {
    /// Parses arguments, program name excluded.
    pub fn parse<I>(args: I) -> Result<Self, CliError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Args::default();
        let mut tag = None;
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--options" => parsed.options = Some(value_of(&arg, args.next())?.into()),
                "--presets" => parsed.presets = Some(value_of(&arg, args.next())?.into()),
                "--steps" => {
                    let raw = value_of(&arg, args.next())?;
                    let steps = raw.parse().map_err(|_| CliError::InvalidSteps(raw))?;
                    parsed.steps = Some(steps);
                }
                "-h" | "--help" => return Err(CliError::Usage),
                _ if tag.is_none() && !arg.starts_with("--") => tag = Some(arg),
                _ => return Err(CliError::UnexpectedArgument(arg)),
            }
        }
        parsed.tag = tag.ok_or(CliError::Usage)?;
        Ok(parsed)
    }
}

fn value_of(flag: &str, value: Option<String>) -> Result<String, CliError> {
    value.ok_or_else(|| CliError::MissingValue(flag.to_string()))
}

/// JSON report printed before the normalized tag.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub entity: String,
    pub tag_type: TagType,
    pub model_family: ModelFamily,
    pub block_type: BlockType,
    pub scalars: IndexMap<String, ControlState>,
    pub blocks: IndexMap<String, f64>,
    pub lbwe: String,
    pub xyz: bool,
    pub preset: Option<String>,
    pub issues: Vec<String>,
    pub params: String,
}

/// Decodes `tag` against `options` and builds the report plus the normalized
/// tag text.
pub fn describe(tag: &str, options: &HostOptions, steps: u32, presets: Option<&str>) -> Result<(Report, String), CliError> {
    let tag: Tag = tag.trim().parse()?;
    let mut registry = BlockRegistry::new(options);
    if let Some(text) = presets {
        registry.load_presets(text);
    }
    let controls = ControlTable::from_options(options, steps);
    let codec = WeightCodec::new(&registry, &controls);

    let decoded = codec.decode(&tag.body, ModelFamily::Unknown, BlockType::Unknown);
    let mut state = decoded.state;
    if state.block_type == BlockType::Unknown {
        let family = state.family;
        state.retarget(family, tag.tag_type.fallback_block_type(), controls.block());
    }
    let encoded = codec.encode(&state);
    let preset = if state.xyz || state.blocks().is_empty() {
        None
    } else {
        registry
            .match_preset(state.family, state.block_type, &state.joined_blocks())
            .map(str::to_string)
    };

    let normalized = Tag::new(tag.tag_type, tag.name.as_str(), encoded.body).to_string();
    let report = Report {
        entity: tag.name,
        tag_type: tag.tag_type,
        model_family: state.family,
        block_type: state.block_type,
        scalars: state
            .scalars()
            .map(|(key, control)| (key.to_string(), control.clone()))
            .collect(),
        blocks: state
            .blocks()
            .iter()
            .map(|(label, control)| (label.clone(), control.value))
            .collect(),
        lbwe: state.lbwe.clone(),
        xyz: state.xyz,
        preset,
        issues: decoded.issues.iter().map(ToString::to_string).collect(),
        params: encoded.params,
    };
    Ok((report, normalized))
}

/// Runs the command and returns what should go to stdout.
pub fn run<I>(args: I) -> Result<String, CliError>
where
    I: IntoIterator<Item = String>,
{
    let args = Args::parse(args)?;
    let options = match &args.options {
        Some(path) => HostOptions::from_file(path)?,
        None => HostOptions::default(),
    };
    let presets = match &args.presets {
        Some(path) => Some(std::fs::read_to_string(path).map_err(|source| CliError::Presets {
            path: path.clone(),
            source,
        })?),
        None => None,
    };
    let steps = args.steps.unwrap_or(DEFAULT_SAMPLING_STEPS);
    let (report, normalized) = describe(&args.tag, &options, steps, presets.as_deref())?;
    let json = serde_json::to_string_pretty(&report)?;
    Ok(format!("{json}\n{normalized}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_flags_and_tag() {
        let parsed = Args::parse(args(&["--steps", "30", "<lora:a:1>", "--presets", "p.txt"])).unwrap();
        assert_eq!(parsed.steps, Some(30));
        assert_eq!(parsed.tag, "<lora:a:1>");
        assert_eq!(parsed.presets, Some(PathBuf::from("p.txt")));
        assert!(parsed.options.is_none());
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(matches!(Args::parse(args(&[])), Err(CliError::Usage)));
        assert!(matches!(Args::parse(args(&["--steps"])), Err(CliError::MissingValue(_))));
        assert!(matches!(
            Args::parse(args(&["--steps", "x", "<lora:a:1>"])),
            Err(CliError::InvalidSteps(_))
        ));
        assert!(matches!(
            Args::parse(args(&["<lora:a:1>", "<lora:b:1>"])),
            Err(CliError::UnexpectedArgument(_))
        ));
    }

    #[test]
    fn describe_applies_tag_type_fallback() {
        let (report, normalized) = describe("<lyco:b:0.5:unet=0.2>", &HostOptions::default(), 20, None).unwrap();
        assert_eq!(report.block_type, BlockType::Lycoris);
        assert_eq!(report.model_family, ModelFamily::Unknown);
        assert!(report.blocks.is_empty());
        assert_eq!(report.scalars["unet"].value, 0.2);
        assert_eq!(normalized, "<lyco:b:0.5:0.2>");
    }

    #[test]
    fn describe_reports_preset_and_issues() {
        let (report, normalized) =
            describe("<lora:foo:0.8:lbw=OUTALL:bogus=1>", &HostOptions::default(), 20, None).unwrap();
        assert_eq!(report.preset.as_deref(), Some("OUTALL"));
        assert_eq!(report.model_family, ModelFamily::Sd);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(normalized, "<lora:foo:0.8:lbw=OUTALL>");
        assert!(report.params.contains("lbw=1,0,0,0,0,0,0,0,1,1,1,1,1,1,1,1,1"));
    }

    #[test]
    fn run_rejects_unparseable_tag() {
        assert!(matches!(run(args(&["lora:a:1"])), Err(CliError::Tag(TagError::Unbracketed))));
    }
}
