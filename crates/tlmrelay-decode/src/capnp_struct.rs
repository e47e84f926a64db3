//! Reading a layout's fields out of a Cap'n Proto root struct.
//!
//! No generated code is involved. Field offsets inside the data section are
//! recomputed from the field list with the same hole-filling allocation the
//! Cap'n Proto compiler uses, so a layout that lists a schema's fields in
//! ordinal order reads the same bytes generated accessors would.

use ::capnp::message::ReaderOptions;
use ::capnp::private::layout::{PointerReader, StructReader};
use ::capnp::serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::Result;
use crate::layout::{FieldSpec, FieldType};

// log2 of the bits in one data word.
const WORD_LG: u32 = 6;

/// Free slots left over in partially used data words, per element size.
///
/// `holes[lg]` is the offset (in units of `1 << lg` bits) of a free slot of
/// that size, or zero when there is none. Offset zero can never be a hole.
#[derive(Debug, Default)]
struct Holes {
    holes: [u32; WORD_LG as usize],
}

impl Holes {
    fn try_allocate(&mut self, lg: u32) -> Option<u32> {
        if lg >= WORD_LG {
            return None;
        }
        let slot = &mut self.holes[lg as usize];
        if *slot != 0 {
            return Some(std::mem::take(slot));
        }
        let next = self.try_allocate(lg + 1)?;
        let result = next * 2;
        self.holes[lg as usize] = result + 1;
        Some(result)
    }

    fn add_holes_at_end(&mut self, mut lg: u32, mut offset: u32) {
        while lg < WORD_LG {
            self.holes[lg as usize] = offset;
            lg += 1;
            offset = (offset + 1) / 2;
        }
    }
}

/// Data-section offsets for every field of a layout.
#[derive(Debug)]
pub(crate) struct CapnpPlan {
    // Parallel to the layout's fields. Padding gets `None`.
    offsets: Vec<Option<u32>>,
    data_words: u32,
}

impl CapnpPlan {
    pub(crate) fn new(fields: &[FieldSpec]) -> Self {
        let mut holes = Holes::default();
        let mut data_words = 0u32;
        let offsets = fields
            .iter()
            .map(|field| {
                let lg = lg_bits(field.kind)?;
                if let Some(offset) = holes.try_allocate(lg) {
                    return Some(offset);
                }
                let offset = data_words << (WORD_LG - lg);
                data_words += 1;
                holes.add_holes_at_end(lg, offset + 1);
                Some(offset)
            })
            .collect();
        Self {
            offsets,
            data_words,
        }
    }

    /// Data words the root struct needs to hold every field.
    pub(crate) fn data_words(&self) -> u32 {
        self.data_words
    }

    /// Decode a flat single-segment message.
    pub(crate) fn decode(&self, fields: &[FieldSpec], payload: &[u8]) -> Result<Map<String, Value>> {
        let mut rest = payload;
        let message = serialize::read_message_from_flat_slice(&mut rest, ReaderOptions::new())?;
        let root: RootStruct<'_> = message.get_root()?;
        let reader = &root.0;

        let present = reader.get_data_section_size() / 64;
        if present < self.data_words {
            debug!(
                present,
                expected = self.data_words,
                "struct data section shorter than layout; missing fields read as zero"
            );
        }
        if !rest.is_empty() {
            debug!(trailing = rest.len(), "bytes after message ignored");
        }

        let mut object = Map::with_capacity(fields.len());
        for (field, offset) in fields.iter().zip(&self.offsets) {
            let Some(offset) = offset else {
                continue;
            };
            object.insert(field.name.clone(), read_field(reader, field.kind, *offset as usize));
        }
        Ok(object)
    }
}

fn lg_bits(kind: FieldType) -> Option<u32> {
    match kind {
        FieldType::Bool => Some(0),
        FieldType::U8 | FieldType::I8 => Some(3),
        FieldType::U16 | FieldType::I16 => Some(4),
        FieldType::U32 | FieldType::I32 | FieldType::F32 => Some(5),
        FieldType::U64 | FieldType::I64 | FieldType::F64 => Some(6),
        FieldType::Pad => None,
    }
}

fn read_field(reader: &StructReader<'_>, kind: FieldType, offset: usize) -> Value {
    match kind {
        FieldType::Bool => Value::Bool(reader.get_bool_field(offset)),
        FieldType::U8 => Value::from(reader.get_data_field::<u8>(offset)),
        FieldType::I8 => Value::from(reader.get_data_field::<i8>(offset)),
        FieldType::U16 => Value::from(reader.get_data_field::<u16>(offset)),
        FieldType::I16 => Value::from(reader.get_data_field::<i16>(offset)),
        FieldType::U32 => Value::from(reader.get_data_field::<u32>(offset)),
        FieldType::I32 => Value::from(reader.get_data_field::<i32>(offset)),
        FieldType::U64 => Value::from(reader.get_data_field::<u64>(offset)),
        FieldType::I64 => Value::from(reader.get_data_field::<i64>(offset)),
        FieldType::F32 => Value::from(f64::from(reader.get_data_field::<f32>(offset))),
        FieldType::F64 => Value::from(reader.get_data_field::<f64>(offset)),
        FieldType::Pad => Value::Null,
    }
}

/// Untyped root struct, read the way generated readers do.
struct RootStruct<'a>(StructReader<'a>);

impl<'a> ::capnp::traits::FromPointerReader<'a> for RootStruct<'a> {
    fn get_from_pointer(
        reader: &PointerReader<'a>,
        default: Option<&'a [::capnp::Word]>,
    ) -> ::capnp::Result<Self> {
        Ok(Self(reader.get_struct(default)?))
    }
}
