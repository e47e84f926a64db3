use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, Result};

/// Scalar type of one payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
    /// One byte; any non-zero value is `true`.
    Bool,
    /// Skipped bytes; requires `len`.
    Pad,
}

impl FieldType {
    /// Fixed width in bytes, or `None` for padding.
    pub fn width(self) -> Option<usize> {
        match self {
            FieldType::U8 | FieldType::I8 | FieldType::Bool => Some(1),
            FieldType::U16 | FieldType::I16 => Some(2),
            FieldType::U32 | FieldType::I32 | FieldType::F32 => Some(4),
            FieldType::U64 | FieldType::I64 | FieldType::F64 => Some(8),
            FieldType::Pad => None,
        }
    }
}

/// Byte order of multi-byte fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    #[default]
    Little,
    Big,
}

/// How payload bytes map onto fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Fields packed back to back at fixed offsets.
    #[default]
    Flat,
    /// A single-segment Cap'n Proto message whose root struct holds the
    /// fields, listed in ordinal order. Padding is not allowed.
    Capnp,
}

/// One field in a payload layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSpec {
    /// Output key. Optional for padding.
    #[serde(default)]
    pub name: String,
    /// Field type.
    #[serde(rename = "type")]
    pub kind: FieldType,
    /// Byte count, for padding only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub len: Option<usize>,
}

impl FieldSpec {
    /// Bytes this field occupies.
    pub fn size(&self) -> usize {
        self.kind.width().unwrap_or(self.len.unwrap_or(0))
    }
}

/// Limits applied while loading layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutLimits {
    /// Maximum bytes in a layout file.
    pub max_file_size: usize,
    /// Maximum number of fields.
    pub max_fields: usize,
    /// Maximum payload bytes a layout may describe.
    pub max_payload_size: usize,
}

impl Default for LayoutLimits {
    fn default() -> Self {
        Self {
            max_file_size: 64 * 1024,
            max_fields: 512,
            max_payload_size: 64 * 1024,
        }
    }
}

/// Sequential, fixed-offset description of a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PayloadLayout {
    /// Layout name, for logs.
    pub name: String,
    /// Byte order for all multi-byte fields.
    #[serde(default)]
    pub endian: Endian,
    #[serde(default)]
    pub encoding: Encoding,
    /// Fields in wire order (ordinal order for Cap'n Proto).
    pub fields: Vec<FieldSpec>,
}

impl PayloadLayout {
    /// Parse and check a layout from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_json_with_limits(json, &LayoutLimits::default())
    }

    /// Parse and check a layout with explicit limits.
    pub fn from_json_with_limits(json: &str, limits: &LayoutLimits) -> Result<Self> {
        let layout: PayloadLayout = serde_json::from_str(json)?;
        layout.check(limits)?;
        Ok(layout)
    }

    /// Load a layout file.
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_file_with_limits(path, &LayoutLimits::default())
    }

    /// Load a layout file with explicit limits.
    pub fn from_file_with_limits(path: &Path, limits: &LayoutLimits) -> Result<Self> {
        let content = read_limited(path, limits.max_file_size)?;
        Self::from_json_with_limits(&content, limits)
    }

    /// Total bytes covered by the fields, saturating at `usize::MAX`.
    ///
    /// Loaded layouts are checked against [`LayoutLimits::max_payload_size`],
    /// so saturation only shows up for layouts built by hand.
    pub fn size(&self) -> usize {
        self.fields
            .iter()
            .fold(0usize, |total, field| total.saturating_add(field.size()))
    }

    /// Named (non-padding) fields.
    pub fn named_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.kind != FieldType::Pad)
    }

    fn check(&self, limits: &LayoutLimits) -> Result<()> {
        if self.fields.is_empty() {
            return Err(DecodeError::InvalidLayout(format!(
                "layout {} has no fields",
                self.name
            )));
        }
        if self.fields.len() > limits.max_fields {
            return Err(DecodeError::InvalidLayout(format!(
                "field count exceeds configured max ({}): {}",
                limits.max_fields,
                self.fields.len()
            )));
        }

        if self.encoding == Encoding::Capnp && self.endian == Endian::Big {
            return Err(DecodeError::InvalidLayout(
                "Cap'n Proto data is always little-endian".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let mut total = 0usize;
        for (index, field) in self.fields.iter().enumerate() {
            if field.kind == FieldType::Pad && self.encoding == Encoding::Capnp {
                return Err(DecodeError::InvalidLayout(format!(
                    "padding at index {index}: Cap'n Proto layouts place fields themselves"
                )));
            }
            total = total
                .checked_add(field.size())
                .filter(|total| *total <= limits.max_payload_size)
                .ok_or_else(|| {
                    DecodeError::InvalidLayout(format!(
                        "layout {} exceeds configured max payload size ({} bytes) at index {index}",
                        self.name, limits.max_payload_size
                    ))
                })?;

            match (field.kind, field.len) {
                (FieldType::Pad, Some(len)) if len > 0 => continue,
                (FieldType::Pad, _) => {
                    return Err(DecodeError::InvalidLayout(format!(
                        "padding at index {index} needs a positive len"
                    )));
                }
                (_, Some(_)) => {
                    return Err(DecodeError::InvalidLayout(format!(
                        "field {:?} at index {index}: len is only valid for pad",
                        field.name
                    )));
                }
                (_, None) => {}
            }

            if field.name.trim().is_empty() {
                return Err(DecodeError::InvalidLayout(format!(
                    "field at index {index} has no name"
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(DecodeError::InvalidLayout(format!(
                    "duplicate field name: {}",
                    field.name
                )));
            }
        }
        Ok(())
    }
}

pub(crate) fn read_limited(path: &Path, max_bytes: usize) -> Result<String> {
    let file = std::fs::File::open(path)
        .map_err(|err| DecodeError::LoadFailed(format!("{}: {err}", path.display())))?;
    let metadata = file
        .metadata()
        .map_err(|err| DecodeError::LoadFailed(format!("{}: {err}", path.display())))?;
    if metadata.len() > max_bytes as u64 {
        return Err(DecodeError::LoadFailed(format!(
            "{}: file too large ({} bytes, max {max_bytes})",
            path.display(),
            metadata.len()
        )));
    }

    let read_limit = u64::try_from(max_bytes.saturating_add(1)).unwrap_or(u64::MAX);
    let mut content = String::new();
    file.take(read_limit)
        .read_to_string(&mut content)
        .map_err(|err| DecodeError::LoadFailed(format!("{}: {err}", path.display())))?;
    if content.len() > max_bytes {
        return Err(DecodeError::LoadFailed(format!(
            "{}: file grew past {max_bytes} bytes while reading",
            path.display()
        )));
    }
    Ok(content)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    const REFERENCE_LAYOUT: &str = include_str!("../../../schemas/ts_data.layout.json");

    #[test]
    fn parses_minimal_layout() {
        let layout = PayloadLayout::from_json(
            r#"{
                "name": "mini",
                "fields": [
                    { "name": "seq", "type": "u16" },
                    { "type": "pad", "len": 2 },
                    { "name": "volts", "type": "f32" }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(layout.endian, Endian::Little);
        assert_eq!(layout.size(), 8);
        assert_eq!(layout.named_fields().count(), 2);
    }

    #[test]
    fn reference_layout_is_capnp_struct() {
        let layout = PayloadLayout::from_json(REFERENCE_LAYOUT).unwrap();
        assert_eq!(layout.encoding, Encoding::Capnp);
        assert_eq!(layout.named_fields().count(), 37);
    }

    #[test]
    fn rejects_padding_that_overflows_the_total() {
        let err = PayloadLayout::from_json(
            r#"{ "name": "huge", "fields": [
                { "name": "a", "type": "u8" },
                { "type": "pad", "len": 18446744073709551615 }
            ] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::InvalidLayout(msg) if msg.contains("max payload size")));
    }

    #[test]
    fn payload_size_limit_enforced() {
        let limits = LayoutLimits {
            max_payload_size: 8,
            ..LayoutLimits::default()
        };
        let json = r#"{ "name": "x", "fields": [
            { "name": "a", "type": "u64" },
            { "name": "b", "type": "u8" }
        ] }"#;
        assert!(matches!(
            PayloadLayout::from_json_with_limits(json, &limits),
            Err(DecodeError::InvalidLayout(_))
        ));
        assert!(PayloadLayout::from_json(json).is_ok());
    }

    #[test]
    fn size_saturates_for_hand_built_layouts() {
        let layout = PayloadLayout {
            name: "manual".to_string(),
            endian: Endian::Little,
            encoding: Encoding::Flat,
            fields: vec![
                FieldSpec {
                    name: "a".to_string(),
                    kind: FieldType::U8,
                    len: None,
                },
                FieldSpec {
                    name: String::new(),
                    kind: FieldType::Pad,
                    len: Some(usize::MAX),
                },
            ],
        };
        assert_eq!(layout.size(), usize::MAX);
    }

    #[test]
    fn capnp_layouts_reject_padding_and_big_endian() {
        let padded = PayloadLayout::from_json(
            r#"{ "name": "x", "encoding": "capnp", "fields": [
                { "name": "a", "type": "u8" },
                { "type": "pad", "len": 3 }
            ] }"#,
        );
        assert!(matches!(padded, Err(DecodeError::InvalidLayout(_))));

        let big = PayloadLayout::from_json(
            r#"{ "name": "x", "encoding": "capnp", "endian": "big", "fields": [
                { "name": "a", "type": "u8" }
            ] }"#,
        );
        assert!(matches!(big, Err(DecodeError::InvalidLayout(_))));
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = PayloadLayout::from_json(
            r#"{ "name": "dup", "fields": [
                { "name": "a", "type": "u8" },
                { "name": "a", "type": "u8" }
            ] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::InvalidLayout(msg) if msg.contains("duplicate")));
    }

    #[test]
    fn rejects_len_on_scalar_and_missing_len_on_pad() {
        let scalar = PayloadLayout::from_json(
            r#"{ "name": "x", "fields": [ { "name": "a", "type": "u8", "len": 3 } ] }"#,
        );
        assert!(matches!(scalar, Err(DecodeError::InvalidLayout(_))));

        let pad = PayloadLayout::from_json(r#"{ "name": "x", "fields": [ { "type": "pad" } ] }"#);
        assert!(matches!(pad, Err(DecodeError::InvalidLayout(_))));
    }

    #[test]
    fn rejects_unnamed_scalar_and_empty_layout() {
        let unnamed = PayloadLayout::from_json(r#"{ "name": "x", "fields": [ { "type": "u8" } ] }"#);
        assert!(matches!(unnamed, Err(DecodeError::InvalidLayout(_))));

        let empty = PayloadLayout::from_json(r#"{ "name": "x", "fields": [] }"#);
        assert!(matches!(empty, Err(DecodeError::InvalidLayout(_))));
    }

    #[test]
    fn rejects_unknown_type_and_keys() {
        let bad_type =
            PayloadLayout::from_json(r#"{ "name": "x", "fields": [ { "name": "a", "type": "u128" } ] }"#);
        assert!(matches!(bad_type, Err(DecodeError::Json(_))));

        let bad_key = PayloadLayout::from_json(
            r#"{ "name": "x", "fields": [ { "name": "a", "type": "u8", "scale": 2 } ] }"#,
        );
        assert!(matches!(bad_key, Err(DecodeError::Json(_))));
    }

    #[test]
    fn field_count_limit_enforced() {
        let limits = LayoutLimits {
            max_fields: 1,
            ..LayoutLimits::default()
        };
        let result = PayloadLayout::from_json_with_limits(
            r#"{ "name": "x", "fields": [
                { "name": "a", "type": "u8" },
                { "name": "b", "type": "u8" }
            ] }"#,
            &limits,
        );
        assert!(matches!(result, Err(DecodeError::InvalidLayout(_))));
    }

    fn temp_file(tag: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tlmrelay-layout-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("layout.json");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn loads_from_file_and_enforces_size_limit() {
        let path = temp_file("file", REFERENCE_LAYOUT);
        assert_eq!(PayloadLayout::from_file(&path).unwrap().name, "ts_data");

        let limits = LayoutLimits {
            max_file_size: 16,
            ..LayoutLimits::default()
        };
        let err = PayloadLayout::from_file_with_limits(&path, &limits).unwrap_err();
        assert!(matches!(err, DecodeError::LoadFailed(msg) if msg.contains("too large")));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn missing_file_is_load_failure() {
        let err = PayloadLayout::from_file(Path::new("/nonexistent/tlmrelay/layout.json")).unwrap_err();
        assert!(matches!(err, DecodeError::LoadFailed(_)));
    }
}
