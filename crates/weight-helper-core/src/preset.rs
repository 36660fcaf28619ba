//! Named block-weight presets and exact-match lookup.

use indexmap::IndexMap;

/// Presets registered when the host does not supply its own list.
pub const BUILTIN_PRESETS: &str = "\
NONE:0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0
ALL:1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1
INS:1,1,1,1,0,0,0,0,0,0,0,0,0,0,0,0,0
IND:1,0,0,0,1,1,1,0,0,0,0,0,0,0,0,0,0
INALL:1,1,1,1,1,1,1,0,0,0,0,0,0,0,0,0,0
MIDD:1,0,0,0,1,1,1,1,1,1,1,1,0,0,0,0,0
OUTD:1,0,0,0,0,0,0,1,1,1,1,0,0,0,0,0,0
OUTS:1,0,0,0,0,0,0,0,0,0,0,0,1,1,1,1,1
OUTALL:1,0,0,0,0,0,0,0,1,1,1,1,1,1,1,1,1
ALL0.5:0.5,0.5,0.5,0.5,0.5,0.5,0.5,0.5,0.5,0.5,0.5,0.5,0.5,0.5,0.5,0.5,0.5,0.5,0.5,0.5,0.5,0.5,0.5,0.5,0.5,0.5
";

/// One parsed preset line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetLine {
    pub name: String,
    /// Comma-joined values with surrounding whitespace removed.
    pub values: String,
    pub len: usize,
}

/// Parses preset text, one `NAME:v1,v2,...` per line.
///
/// Blank lines and lines that do not split into exactly one name and one
/// value list are ignored.
pub fn parse_preset_lines(text: &str) -> Vec<PresetLine> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let mut parts = line.split(':');
            let (Some(name), Some(values), None) = (parts.next(), parts.next(), parts.next()) else {
                return None;
            };
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            let items: Vec<&str> = values.split(',').map(str::trim).collect();
            Some(PresetLine {
                name: name.to_string(),
                len: items.len(),
                values: items.join(","),
            })
        })
        .collect()
}

/// Presets applicable to one (family, block type), in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresetTable {
    entries: IndexMap<String, String>,
}

impl PresetTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collects the lines whose value count equals `block_count`. A later line
    /// with the same name replaces the earlier one.
    pub fn for_block_count(lines: &[PresetLine], block_count: usize) -> Self {
        let mut table = Self::new();
        if block_count == 0 {
            return table;
        }
        for line in lines.iter().filter(|line| line.len == block_count) {
            table.insert(line.name.clone(), line.values.clone());
        }
        table
    }

    pub fn insert(&mut self, name: impl Into<String>, values: impl Into<String>) {
        self.entries.insert(name.into(), values.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    /// Parsed numeric values of a preset. `None` if the preset is unknown or
    /// any value is not a finite number.
    pub fn values(&self, name: &str) -> Option<Vec<f64>> {
        let raw = self.get(name)?;
        raw.split(',')
            .map(|v| v.trim().parse::<f64>().ok().filter(|n| n.is_finite()))
            .collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First preset whose stored value string equals `joined` exactly.
    ///
    /// No numeric tolerance: `"1.0"` does not match `"1"`. This keeps a preset
    /// name and its value list interchangeable in both directions.
    pub fn find_by_values(&self, joined: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, values)| values.as_str() == joined)
            .map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_skips_malformed_lines() {
        let lines = parse_preset_lines("A:1,0\n\n  B : 0 , 1 \nbroken\nC:1:2\n:1,1\n");
        assert_eq!(
            lines,
            vec![
                PresetLine { name: "A".into(), values: "1,0".into(), len: 2 },
                PresetLine { name: "B".into(), values: "0,1".into(), len: 2 },
            ]
        );
    }

    #[test]
    fn table_filters_by_length() {
        let lines = parse_preset_lines("TWO:1,0\nTHREE:1,0,1\nALSO_TWO:0,0");
        let table = PresetTable::for_block_count(&lines, 2);
        assert_eq!(table.names().collect::<Vec<_>>(), vec!["TWO", "ALSO_TWO"]);
        assert!(PresetTable::for_block_count(&lines, 0).is_empty());
    }

    #[test]
    fn exact_match_only() {
        let mut table = PresetTable::new();
        table.insert("HALF", "0.5,0.5");
        assert_eq!(table.find_by_values("0.5,0.5"), Some("HALF"));
        assert_eq!(table.find_by_values("0.50,0.5"), None);
        assert_eq!(table.values("HALF"), Some(vec![0.5, 0.5]));
        assert_eq!(table.values("MISSING"), None);
    }

    #[test]
    fn builtin_presets_parse() {
        let lines = parse_preset_lines(BUILTIN_PRESETS);
        assert!(lines.iter().any(|l| l.name == "OUTALL" && l.len == 17));
        assert!(lines.iter().any(|l| l.name == "ALL0.5" && l.len == 26));
    }
}
