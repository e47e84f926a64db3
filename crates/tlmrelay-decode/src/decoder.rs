use std::path::Path;

use jsonschema::Validator;
use serde_json::{Map, Value};
use tracing::debug;

use crate::capnp_struct::CapnpPlan;
use crate::error::{DecodeError, Result};
use crate::layout::{read_limited, Encoding, Endian, FieldType, PayloadLayout};

const MAX_SCHEMA_FILE_SIZE: usize = 1024 * 1024;

/// Turns a packet payload into a structured value for inspection.
///
/// Failures are advisory: callers log them and keep the packet.
pub trait DiagnosticDecoder {
    /// Decode `payload` into a JSON value.
    fn decode(&self, payload: &[u8]) -> Result<Value>;
}

/// Decodes payloads field by field according to a [`PayloadLayout`].
///
/// Flat layouts read packed fields at fixed offsets. Cap'n Proto layouts read
/// the root struct of a single-segment message.
pub struct LayoutDecoder {
    layout: PayloadLayout,
    plan: Option<CapnpPlan>,
    validator: Option<Validator>,
}

impl LayoutDecoder {
    /// Decode with `layout` and no schema check.
    pub fn new(layout: PayloadLayout) -> Self {
        let plan = match layout.encoding {
            Encoding::Capnp => Some(CapnpPlan::new(&layout.fields)),
            Encoding::Flat => None,
        };
        Self {
            layout,
            plan,
            validator: None,
        }
    }

    /// Load the layout from a file.
    pub fn from_layout_file(path: &Path) -> Result<Self> {
        Ok(Self::new(PayloadLayout::from_file(path)?))
    }

    /// Check every decoded value against `schema`.
    pub fn with_schema(mut self, schema: &Value) -> Result<Self> {
        let compiled = jsonschema::validator_for(schema)
            .map_err(|err| DecodeError::CompileFailed(err.to_string()))?;
        self.validator = Some(compiled);
        Ok(self)
    }

    /// Load and compile a JSON Schema file.
    pub fn with_schema_file(self, path: &Path) -> Result<Self> {
        let content = read_limited(path, MAX_SCHEMA_FILE_SIZE)?;
        let schema: Value = serde_json::from_str(&content)?;
        self.with_schema(&schema)
    }

    /// The layout in use.
    pub fn layout(&self) -> &PayloadLayout {
        &self.layout
    }

    /// Whether a schema check is configured.
    pub fn has_schema(&self) -> bool {
        self.validator.is_some()
    }

    fn decode_flat(&self, payload: &[u8]) -> Result<Map<String, Value>> {
        let endian = self.layout.endian;
        let mut object = Map::with_capacity(self.layout.fields.len());
        let mut offset = 0usize;

        for field in &self.layout.fields {
            let bytes = offset
                .checked_add(field.size())
                .and_then(|end| payload.get(offset..end))
                .ok_or(DecodeError::PayloadTooShort {
                    needed: self.layout.size(),
                    actual: payload.len(),
                })?;
            offset += bytes.len();

            if field.kind == FieldType::Pad {
                continue;
            }
            object.insert(field.name.clone(), read_scalar(field.kind, endian, bytes));
        }

        if payload.len() > offset {
            debug!(
                layout = %self.layout.name,
                trailing = payload.len() - offset,
                "payload longer than layout; trailing bytes ignored"
            );
        }
        Ok(object)
    }

    fn validate(&self, value: &Value) -> Result<()> {
        let Some(validator) = &self.validator else {
            return Ok(());
        };

        let mut errors = validator.iter_errors(value);
        if let Some(first) = errors.next() {
            let mut message = first.to_string();
            for err in errors.take(3) {
                message.push_str("; ");
                message.push_str(&err.to_string());
            }
            return Err(DecodeError::ValidationFailed(message));
        }
        Ok(())
    }
}

impl DiagnosticDecoder for LayoutDecoder {
    fn decode(&self, payload: &[u8]) -> Result<Value> {
        let object = match &self.plan {
            Some(plan) => plan.decode(&self.layout.fields, payload)?,
            None => self.decode_flat(payload)?,
        };
        let value = Value::Object(object);
        self.validate(&value)?;
        Ok(value)
    }
}

fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

macro_rules! scalar {
    ($ty:ty, $endian:expr, $bytes:expr) => {
        match $endian {
            Endian::Little => <$ty>::from_le_bytes(array($bytes)),
            Endian::Big => <$ty>::from_be_bytes(array($bytes)),
        }
    };
}

// Non-finite floats map to null.
fn read_scalar(kind: FieldType, endian: Endian, bytes: &[u8]) -> Value {
    match kind {
        FieldType::U8 => Value::from(bytes[0]),
        FieldType::I8 => Value::from(bytes[0] as i8),
        FieldType::Bool => Value::Bool(bytes[0] != 0),
        FieldType::U16 => Value::from(scalar!(u16, endian, bytes)),
        FieldType::I16 => Value::from(scalar!(i16, endian, bytes)),
        FieldType::U32 => Value::from(scalar!(u32, endian, bytes)),
        FieldType::I32 => Value::from(scalar!(i32, endian, bytes)),
        FieldType::U64 => Value::from(scalar!(u64, endian, bytes)),
        FieldType::I64 => Value::from(scalar!(i64, endian, bytes)),
        FieldType::F32 => Value::from(f64::from(scalar!(f32, endian, bytes))),
        FieldType::F64 => Value::from(scalar!(f64, endian, bytes)),
        FieldType::Pad => Value::Null,
    }
}
