//! Interning of unit-local metadata, foreign keys first.

use std::collections::BTreeMap;

use crate::error::{DumpError, DumpResult};
use crate::records::{
    ACCESS_FLAGS_MASK, ClassRecord, EncodedFieldRecord, EncodedMethodRecord, FieldKind,
    FieldRecord, MethodKind, MethodRecord, NO_INDEX, NO_INDEX16, ProtoRecord, StaticValueRecord,
    SymbolKind, TypeRecord,
};
use crate::source::{Frame, MethodInfo, SourceUnit};
use crate::store::SymbolStore;

const VALUE_STRING: u8 = 0x17;
const VALUE_TYPE: u8 = 0x18;
const VALUE_FIELD: u8 = 0x19;
const VALUE_METHOD: u8 = 0x1a;
const VALUE_ENUM: u8 = 0x1b;
const VALUE_ARRAY: u8 = 0x1c;
const VALUE_ANNOTATION: u8 = 0x1d;
const VALUE_NULL: u8 = 0x1e;
const VALUE_BOOLEAN: u8 = 0x1f;

/// Header arg of a re-interned index value: four payload bytes.
const WIDE_INDEX_ARG: u8 = 3 << 5;

/// Result of interning the executing method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImplicitMethod {
    pub method_idx: u32,
    pub class_name_idx: u32,
}

pub(crate) fn narrow(kind: SymbolKind, index: u32) -> DumpResult<u16> {
    u16::try_from(index).map_err(|_| DumpError::IndexOverflow { kind, index })
}

impl SymbolStore {
    pub fn string_from_unit(&self, unit: &dyn SourceUnit, idx: u32) -> DumpResult<u32> {
        let value = unit.string(idx).ok_or(DumpError::MissingString(idx))?;
        Ok(self.intern_string(unit.location(), value))
    }

    pub fn type_from_unit(&self, unit: &dyn SourceUnit, idx: u32) -> DumpResult<u16> {
        let descriptor = unit
            .type_descriptor_idx(idx)
            .ok_or(DumpError::MissingType(idx))?;
        let descriptor_idx = self.string_from_unit(unit, descriptor)?;
        let index = self.intern(unit.location(), TypeRecord { descriptor_idx });
        narrow(SymbolKind::Type, index)
    }

    pub fn proto_from_unit(&self, unit: &dyn SourceUnit, idx: u32) -> DumpResult<u16> {
        let proto = unit.proto_id(idx).ok_or(DumpError::MissingProto(idx))?;
        let shorty_idx = self.string_from_unit(unit, proto.shorty_idx)?;
        let return_type_idx = self.type_from_unit(unit, proto.return_type_idx)?;
        let param_types = proto
            .parameters
            .iter()
            .map(|param| self.type_from_unit(unit, *param))
            .collect::<DumpResult<Vec<_>>>()?;
        let index = self.intern(
            unit.location(),
            ProtoRecord {
                shorty_idx,
                return_type_idx,
                param_types,
            },
        );
        narrow(SymbolKind::Proto, index)
    }

    pub fn field_from_unit(&self, unit: &dyn SourceUnit, idx: u32) -> DumpResult<u32> {
        let field = unit.field_id(idx).ok_or(DumpError::MissingField(idx))?;
        let record = FieldRecord {
            class_idx: self.type_from_unit(unit, field.class_idx)?,
            type_idx: self.type_from_unit(unit, field.type_idx)?,
            name_idx: self.string_from_unit(unit, field.name_idx)?,
        };
        Ok(self.intern(unit.location(), record))
    }

    pub fn method_from_unit(&self, unit: &dyn SourceUnit, idx: u32) -> DumpResult<u32> {
        let method = unit.method_id(idx).ok_or(DumpError::MissingMethod(idx))?;
        let class_idx = self.type_from_unit(unit, method.class_idx)?;
        let proto_idx = self.proto_from_unit(unit, method.proto_idx)?;
        let name_idx = self.string_from_unit(unit, method.name_idx)?;
        Ok(self.intern(
            unit.location(),
            MethodRecord {
                class_idx,
                proto_idx,
                name_idx,
            },
        ))
    }

    pub fn class_from_unit(&self, unit: &dyn SourceUnit, class_def_idx: u32) -> DumpResult<u16> {
        let def = unit
            .class_def(class_def_idx)
            .ok_or(DumpError::MissingClassDef(class_def_idx))?;
        let class_idx = self.type_from_unit(unit, def.class_idx)?;
        let superclass_idx = match def.superclass_idx {
            Some(idx) => self.type_from_unit(unit, idx)?,
            None => NO_INDEX16,
        };
        let interfaces = def
            .interfaces
            .iter()
            .map(|interface| self.type_from_unit(unit, *interface))
            .collect::<DumpResult<Vec<_>>>()?;
        let source_file_idx = match def.source_file_idx {
            Some(idx) => self.string_from_unit(unit, idx)?,
            None => NO_INDEX,
        };
        let index = self.intern(
            unit.location(),
            ClassRecord {
                class_idx,
                access_flags: def.access_flags & ACCESS_FLAGS_MASK,
                superclass_idx,
                interfaces,
                source_file_idx,
            },
        );
        narrow(SymbolKind::Class, index)
    }

    /// Re-encodes a class's static initial values; `NO_INDEX` when it has none.
    pub fn static_values_from_unit(
        &self,
        unit: &dyn SourceUnit,
        class_def_idx: u32,
    ) -> DumpResult<u32> {
        let def = unit
            .class_def(class_def_idx)
            .ok_or(DumpError::MissingClassDef(class_def_idx))?;
        let Some(array) = def.static_values else {
            return Ok(NO_INDEX);
        };
        let class_idx = u32::from(self.class_from_unit(unit, class_def_idx)?);

        let malformed = |offset| DumpError::MalformedStaticValues {
            class_def_idx,
            offset,
        };
        let (count, mut offset) = read_uleb128(&array).ok_or(malformed(0))?;
        let mut values = BTreeMap::new();
        for position in 0..count {
            let header = *array.get(offset).ok_or(malformed(offset))?;
            offset += 1;
            let value_type = header & 0x1f;
            let width = match value_type {
                VALUE_NULL | VALUE_BOOLEAN => 0,
                VALUE_ARRAY | VALUE_ANNOTATION => {
                    return Err(DumpError::UnsupportedValueType {
                        class_def_idx,
                        value_type,
                    });
                }
                _ => usize::from(header >> 5) + 1,
            };
            let payload = array
                .get(offset..offset + width)
                .ok_or(malformed(offset))?;
            offset += width;

            let reinterned = match value_type {
                VALUE_STRING => Some(self.string_from_unit(unit, read_index(payload))?),
                VALUE_TYPE => Some(u32::from(self.type_from_unit(unit, read_index(payload))?)),
                VALUE_FIELD | VALUE_ENUM => Some(self.field_from_unit(unit, read_index(payload))?),
                VALUE_METHOD => Some(self.method_from_unit(unit, read_index(payload))?),
                _ => None,
            };
            let encoded = match reinterned {
                Some(index) => {
                    let mut bytes = vec![value_type | WIDE_INDEX_ARG];
                    bytes.extend_from_slice(&index.to_le_bytes());
                    bytes
                }
                None => {
                    let mut bytes = vec![header];
                    bytes.extend_from_slice(payload);
                    bytes
                }
            };
            values.insert(position, encoded);
        }

        Ok(self.intern(
            unit.location(),
            StaticValueRecord { class_idx, values },
        ))
    }

    /// Interns the encoded field and returns the underlying field index.
    pub fn encoded_field_from_unit(
        &self,
        unit: &dyn SourceUnit,
        field_idx: u32,
        kind: FieldKind,
        access_flags: u32,
    ) -> DumpResult<u32> {
        let index = self.field_from_unit(unit, field_idx)?;
        self.intern(
            unit.location(),
            EncodedFieldRecord {
                kind,
                field_idx: index,
                access_flags: access_flags & ACCESS_FLAGS_MASK,
            },
        );
        Ok(index)
    }

    /// Interns the encoded method and returns the underlying method index.
    pub fn encoded_method_from_unit(
        &self,
        unit: &dyn SourceUnit,
        method_idx: u32,
        kind: MethodKind,
        access_flags: u32,
    ) -> DumpResult<u32> {
        let index = self.method_from_unit(unit, method_idx)?;
        self.intern(
            unit.location(),
            EncodedMethodRecord {
                kind,
                method_idx: index,
                access_flags: access_flags & ACCESS_FLAGS_MASK,
            },
        );
        Ok(index)
    }

    /// Interns the executing method plus, for instance methods of abstract or
    /// interface classes, the descriptor of the receiver's runtime class.
    pub fn implicit_encoded_method(
        &self,
        unit: &dyn SourceUnit,
        method: &MethodInfo,
        frame: &dyn Frame,
    ) -> DumpResult<ImplicitMethod> {
        let kind = if method.is_direct() {
            MethodKind::Direct
        } else {
            MethodKind::Virtual
        };
        let method_idx =
            self.encoded_method_from_unit(unit, method.method_idx, kind, method.access_flags)?;

        let mut class_name_idx = NO_INDEX;
        if method.declared_in_abstract_or_interface() && !method.is_static() {
            let register = receiver_register(unit, method)?;
            if let Some(register) = register
                && let Some(descriptor) = frame.reference_descriptor(register)
            {
                class_name_idx = self.intern_string(unit.location(), &descriptor);
            }
        }
        Ok(ImplicitMethod {
            method_idx,
            class_name_idx,
        })
    }
}

/// Register holding `this`: the ins sit at the top of the frame, receiver first.
fn receiver_register(unit: &dyn SourceUnit, method: &MethodInfo) -> DumpResult<Option<u16>> {
    let id = unit
        .method_id(method.method_idx)
        .ok_or(DumpError::MissingMethod(method.method_idx))?;
    let proto = unit
        .proto_id(id.proto_idx)
        .ok_or(DumpError::MissingProto(id.proto_idx))?;
    let shorty = unit
        .string(proto.shorty_idx)
        .ok_or(DumpError::MissingString(proto.shorty_idx))?;
    let params: u16 = shorty
        .chars()
        .skip(1)
        .map(|c| if matches!(c, 'J' | 'D') { 2 } else { 1 })
        .sum();
    Ok(method
        .registers
        .checked_sub(1)
        .and_then(|top| top.checked_sub(params)))
}

fn read_uleb128(bytes: &[u8]) -> Option<(u32, usize)> {
    let mut result = 0u32;
    for (i, byte) in bytes.iter().take(5).enumerate() {
        result |= u32::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((result, i + 1));
        }
    }
    None
}

fn read_index(payload: &[u8]) -> u32 {
    payload
        .iter()
        .take(4)
        .enumerate()
        .fold(0, |acc, (i, byte)| acc | (u32::from(*byte) << (8 * i)))
}
