//! Column value types and metadata stanza parsing.
//!
//! A column stanza in the partition metadata file (`-part.txt`) is
//! line-oriented with case-insensitive keyword prefixes:
//!
//! ```text
//! Begin Column
//! name = "energy"
//! description = "beam energy"
//! data_type = "FLOAT"
//! minimum = 0
//! maximum = 12.5
//! index = <binning precision=2/><encoding equality/>
//! sorted = true
//! End Column
//! ```
//!
//! `Begin Property` is accepted as an alias of `Begin Column`. Unknown lines
//! before `End Column` are skipped with a diagnostic. A stanza without a
//! name or with an unknown data type is rejected.

use crate::error::{Error, Result};
use std::fmt;
use tracing::debug;

/// Value type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ColumnType {
    /// Signed 8-bit integer.
    I8,
    /// Unsigned 8-bit integer.
    U8,
    /// Signed 16-bit integer.
    I16,
    /// Unsigned 16-bit integer.
    U16,
    /// Signed 32-bit integer.
    I32,
    /// Unsigned 32-bit integer.
    U32,
    /// Signed 64-bit integer.
    I64,
    /// Unsigned 64-bit integer.
    U64,
    /// 32-bit floating point.
    F32,
    /// 64-bit floating point.
    F64,
    /// 64-bit object identifier stored as two 32-bit words.
    Oid,
    /// Dictionary-encoded category presenting a u32 identifier surface.
    Category,
    /// NUL-terminated strings presenting a u32 identifier surface.
    Text,
}

impl ColumnType {
    /// Size of one element on disk, or `None` for variable-width TEXT.
    #[must_use]
    pub fn element_size(self) -> Option<usize> {
        match self {
            Self::I8 | Self::U8 => Some(1),
            Self::I16 | Self::U16 => Some(2),
            Self::I32 | Self::U32 | Self::F32 | Self::Category => Some(4),
            Self::I64 | Self::U64 | Self::F64 | Self::Oid => Some(8),
            Self::Text => None,
        }
    }

    /// Returns true for the integer families, including the id surface of
    /// CATEGORY.
    #[must_use]
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Self::I8
                | Self::U8
                | Self::I16
                | Self::U16
                | Self::I32
                | Self::U32
                | Self::I64
                | Self::U64
                | Self::Category
        )
    }

    /// Returns true for F32 and F64.
    #[must_use]
    pub fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    /// Returns true for the unsigned integer families.
    #[must_use]
    pub fn is_unsigned(self) -> bool {
        matches!(self, Self::U8 | Self::U16 | Self::U32 | Self::U64 | Self::Category)
    }

    /// The word written to the metadata file for this type.
    #[must_use]
    pub fn type_word(self) -> &'static str {
        match self {
            Self::I8 => "BYTE",
            Self::U8 => "UBYTE",
            Self::I16 => "SHORT",
            Self::U16 => "USHORT",
            Self::I32 => "INT",
            Self::U32 => "UINT",
            Self::I64 => "LONG",
            Self::U64 => "ULONG",
            Self::F32 => "FLOAT",
            Self::F64 => "DOUBLE",
            Self::Oid => "OID",
            Self::Category => "CATEGORY",
            Self::Text => "TEXT",
        }
    }

    /// Resolves a type word by its first letter, with a second-letter
    /// refinement for the unsigned families.
    ///
    /// Returns `None` for an unrecognized word.
    #[must_use]
    pub fn parse_type_word(word: &str) -> Option<Self> {
        let lower = word.trim().to_ascii_lowercase();
        let mut chars = lower.chars();
        let first = chars.next()?;
        let second = chars.next();
        match first {
            'i' => Some(Self::I32),
            'r' | 'f' => Some(Self::F32),
            'd' => Some(Self::F64),
            'l' => Some(Self::I64),
            'v' => Some(Self::U64),
            'b' => Some(Self::I8),
            'a' => Some(Self::U8),
            'h' => Some(Self::I16),
            'g' => Some(Self::U16),
            'c' | 'k' => Some(Self::Category),
            't' => Some(Self::Text),
            's' => Some(if second == Some('h') {
                Self::I16
            } else {
                Self::Text
            }),
            'u' => Some(match second {
                Some('s') => Self::U16,
                Some('b' | 'c') => Self::U8,
                Some('l') => Self::U64,
                Some('n') => {
                    // "unsigned <word>": consult the first letter of the
                    // following word.
                    let rest = lower
                        .strip_prefix("unsigned")
                        .map(str::trim_start)
                        .unwrap_or("");
                    match rest.chars().next() {
                        Some('s') => Self::U16,
                        Some('b' | 'c') => Self::U8,
                        Some('l') => Self::U64,
                        _ => Self::U32,
                    }
                }
                _ => Self::U32,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_word())
    }
}

/// Parsed static description of a column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSchema {
    /// Column name; unique within a partition, never empty.
    pub name: String,
    /// Value type.
    pub ctype: ColumnType,
    /// Free-text description.
    pub description: String,
    /// Cached lower bound; `lower > upper` means the bounds are unset.
    pub lower: f64,
    /// Cached upper bound.
    pub upper: f64,
    /// Preferred index encoding, free-form.
    pub index_hint: String,
    /// Caller-declared ascending order of the on-disk values.
    pub sorted: bool,
}

impl Default for ColumnSchema {
    fn default() -> Self {
        Self {
            name: String::new(),
            ctype: ColumnType::U32,
            description: String::new(),
            lower: f64::MAX,
            upper: f64::MIN,
            index_hint: String::new(),
            sorted: false,
        }
    }
}

impl ColumnSchema {
    /// Creates a schema with unset bounds.
    pub fn new(name: impl Into<String>, ctype: ColumnType) -> Self {
        let name = name.into();
        Self {
            description: name.clone(),
            name,
            ctype,
            ..Self::default()
        }
    }

    /// Returns true if the cached bounds carry information.
    #[must_use]
    pub fn has_bounds(&self) -> bool {
        self.upper >= self.lower
    }

    /// Reads one column stanza from `lines`.
    ///
    /// The caller has consumed the `Begin Column` line already; reading
    /// stops at the `End` line.
    ///
    /// # Errors
    ///
    /// Returns a schema error when the stanza ends without a valid name, has
    /// an unknown data type, or the input ends before `End Column`.
    pub fn parse_stanza<'a, I>(lines: &mut I) -> Result<Self>
    where
        I: Iterator<Item = &'a str>,
    {
        let mut schema = Self::default();
        let mut bad_type = false;
        let mut terminated = false;

        for raw in lines {
            let line = raw.trim_end();
            if starts_ignore_case(line, "end") {
                terminated = true;
                break;
            }
            if line.trim_start().starts_with('#') || line.trim().is_empty() {
                continue;
            }
            let value = line.split_once('=').map(|(_, v)| v);
            if starts_ignore_case(line, "name") || starts_ignore_case(line, "Property_name") {
                schema.name = parse_string_value(value.unwrap_or(""));
            } else if starts_ignore_case(line, "description")
                || starts_ignore_case(line, "Property_description")
            {
                schema.description = parse_string_value(value.unwrap_or(""));
            } else if starts_ignore_case(line, "minimum") {
                schema.lower = parse_leading_f64(value.unwrap_or(""));
            } else if starts_ignore_case(line, "maximum") {
                schema.upper = parse_leading_f64(value.unwrap_or(""));
            } else if starts_ignore_case(line, "Bins:") {
                schema.index_hint = line[5..].trim().to_string();
            } else if starts_ignore_case(line, "index") {
                schema.index_hint = parse_string_value(value.unwrap_or(""));
            } else if starts_ignore_case(line, "sorted") {
                schema.sorted = is_string_true(value.unwrap_or(""));
            } else if starts_ignore_case(line, "Property_data_type")
                || starts_ignore_case(line, "data_type")
                || starts_ignore_case(line, "type")
            {
                let word = parse_string_value(value.unwrap_or(""));
                match ColumnType::parse_type_word(&word) {
                    Some(t) => schema.ctype = t,
                    None => {
                        debug!(word, "unknown data type in column stanza");
                        bad_type = true;
                    }
                }
            } else {
                debug!(line, "skipping unrecognized line in column stanza");
            }
        }

        if !terminated {
            return Err(Error::Schema(
                "reached end of input while reading a column stanza".to_string(),
            ));
        }
        if schema.name.is_empty() || bad_type {
            return Err(Error::Schema(
                "column stanza does not have a valid name or type".to_string(),
            ));
        }
        if schema.description.is_empty() {
            schema.description.clone_from(&schema.name);
        }
        Ok(schema)
    }

    /// Writes the stanza, mirroring [`ColumnSchema::parse_stanza`].
    ///
    /// Bounds are printed only when set, as unsigned for the unsigned
    /// families, as integers for the signed integer families, and with
    /// shortest round-trip formatting for the floating-point types.
    pub fn write_stanza(&self, out: &mut String) {
        use std::fmt::Write;

        out.push_str("\nBegin Column\n");
        let _ = writeln!(out, "name = \"{}\"", self.name);
        if !self.description.is_empty() {
            let _ = writeln!(out, "description = \"{}\"", self.description);
        }
        let _ = writeln!(out, "data_type = \"{}\"", self.ctype.type_word());
        if self.has_bounds() {
            match self.ctype {
                ColumnType::I8 | ColumnType::I16 | ColumnType::I32 | ColumnType::I64 => {
                    let _ = writeln!(out, "minimum = {}", self.lower as i64);
                    let _ = writeln!(out, "maximum = {}", self.upper as i64);
                }
                ColumnType::F32 => {
                    let _ = writeln!(out, "minimum = {}", self.lower as f32);
                    let _ = writeln!(out, "maximum = {}", self.upper as f32);
                }
                ColumnType::F64 => {
                    let _ = writeln!(out, "minimum = {}", self.lower);
                    let _ = writeln!(out, "maximum = {}", self.upper);
                }
                _ => {
                    let _ = writeln!(out, "minimum = {}", self.lower as u64);
                    let _ = writeln!(out, "maximum = {}", self.upper as u64);
                }
            }
        }
        if !self.index_hint.is_empty() {
            let _ = writeln!(out, "index = {}", self.index_hint);
        }
        if self.sorted {
            out.push_str("sorted = true\n");
        }
        out.push_str("End Column\n");
    }
}

/// Case-insensitive keyword prefix match.
fn starts_ignore_case(line: &str, keyword: &str) -> bool {
    line.len() >= keyword.len() && line[..keyword.len()].eq_ignore_ascii_case(keyword)
}

/// Extracts a possibly quoted string value after `=`.
fn parse_string_value(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches(|c| c == '"' || c == '\'');
    trimmed.trim().to_string()
}

/// Parses the leading numeric token, ignoring trailing content.
fn parse_leading_f64(raw: &str) -> f64 {
    let s = raw.trim_start_matches(|c: char| c.is_whitespace() || c == '=' || c == '"' || c == '\'');
    let end = s
        .char_indices()
        .find(|&(_, c)| {
            !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+' || c == 'e' || c == 'E')
        })
        .map_or(s.len(), |(i, _)| i);
    s[..end].parse().unwrap_or(0.0)
}

/// Accepts the usual spellings of a true flag.
fn is_string_true(raw: &str) -> bool {
    matches!(
        raw.trim().chars().next(),
        Some('t' | 'T' | 'y' | 'Y' | '1')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<ColumnSchema> {
        let mut lines = text.lines();
        ColumnSchema::parse_stanza(&mut lines)
    }

    #[test]
    fn test_parse_minimal_stanza() {
        let schema = parse("name = \"x\"\ndata_type = uI\nsorted = true\nEnd Column\n").unwrap();
        assert_eq!(schema.name, "x");
        assert_eq!(schema.ctype, ColumnType::U32);
        assert!(schema.sorted);
        assert_eq!(schema.description, "x");
    }

    #[test]
    fn test_parse_full_stanza() {
        let schema = parse(
            "name = \"energy\"\n\
             description = \"beam energy\"\n\
             data_type = \"DOUBLE\"\n\
             minimum = 0.5\n\
             maximum = 12.25\n\
             index = <binning precision=2/><encoding equality/>\n\
             End Column\n",
        )
        .unwrap();
        assert_eq!(schema.ctype, ColumnType::F64);
        assert_eq!(schema.lower, 0.5);
        assert_eq!(schema.upper, 12.25);
        assert_eq!(schema.index_hint, "<binning precision=2/><encoding equality/>");
        assert!(schema.has_bounds());
    }

    #[test]
    fn test_unknown_lines_are_skipped() {
        let schema = parse("name = \"a\"\ndata_type = int\nfancy = nope\nEnd Column\n").unwrap();
        assert_eq!(schema.ctype, ColumnType::I32);
    }

    #[test]
    fn test_missing_name_rejected() {
        assert!(parse("data_type = int\nEnd Column\n").is_err());
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(parse("name = \"a\"\ndata_type = quux\nEnd Column\n").is_err());
    }

    #[test]
    fn test_missing_end_rejected() {
        assert!(parse("name = \"a\"\ndata_type = int\n").is_err());
    }

    #[test]
    fn test_type_letter_table() {
        use ColumnType::*;
        let cases = [
            ("int", I32),
            ("I", I32),
            ("real", F32),
            ("float", F32),
            ("double", F64),
            ("long", I64),
            ("v", U64),
            ("byte", I8),
            ("A", U8),
            ("half", I16),
            ("G", U16),
            ("category", Category),
            ("key", Category),
            ("text", Text),
            ("string", Text),
            ("short", I16),
            ("uint", U32),
            ("ushort", U16),
            ("ubyte", U8),
            ("uc", U8),
            ("ulong", U64),
            ("unsigned short", U16),
            ("unsigned byte", U8),
            ("unsigned long", U64),
            ("unsigned int", U32),
        ];
        for (word, expected) in cases {
            assert_eq!(
                ColumnType::parse_type_word(word),
                Some(expected),
                "word {word:?}"
            );
        }
        assert_eq!(ColumnType::parse_type_word("quux"), None);
    }

    #[test]
    fn test_write_parse_roundtrip() {
        let mut schema = ColumnSchema::new("pt", ColumnType::U16);
        schema.description = "transverse momentum".to_string();
        schema.lower = 3.0;
        schema.upper = 12000.0;
        schema.sorted = true;
        schema.index_hint = "<binning none/>".to_string();

        let mut text = String::new();
        schema.write_stanza(&mut text);

        // Skip the Begin line, as the parser expects.
        let mut lines = text.lines().skip_while(|l| !l.starts_with("Begin"));
        lines.next();
        let back = ColumnSchema::parse_stanza(&mut lines).unwrap();
        assert_eq!(back, schema);
    }

    #[test]
    fn test_roundtrip_single_letter_type() {
        // `data_type=uI` resolves by first letter to UINT and survives a
        // serialize/parse cycle unchanged.
        let schema = parse("name=\"x\"\ndata_type=uI\nsorted=true\nEnd Column\n").unwrap();
        let mut text = String::new();
        schema.write_stanza(&mut text);
        let mut lines = text.lines().skip_while(|l| !l.starts_with("Begin"));
        lines.next();
        let back = ColumnSchema::parse_stanza(&mut lines).unwrap();
        assert_eq!(back.ctype, ColumnType::U32);
        assert!(back.sorted);
        assert_eq!(back, schema);
    }
}
