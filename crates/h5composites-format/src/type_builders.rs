//! Builders for compound and enumeration datatypes.

#[cfg(not(feature = "std"))]
use alloc::{borrow::ToOwned, boxed::Box, string::String, vec::Vec};

use crate::datatype::{CompoundMember, Datatype, EnumMember};

/// Builds a packed compound datatype: each member starts where the
/// previous one ends.
#[derive(Debug, Clone, Default)]
pub struct CompoundTypeBuilder {
    fields: Vec<(String, Datatype)>,
}

impl CompoundTypeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a named member.
    pub fn field(mut self, name: &str, datatype: Datatype) -> Self {
        self.fields.push((name.to_owned(), datatype));
        self
    }

    /// Append a member in place.
    pub fn push(&mut self, name: &str, datatype: Datatype) -> &mut Self {
        self.fields.push((name.to_owned(), datatype));
        self
    }

    pub fn build(self) -> Datatype {
        let mut offset = 0u64;
        let members = self
            .fields
            .into_iter()
            .map(|(name, datatype)| {
                let byte_offset = offset;
                offset += datatype.type_size() as u64;
                CompoundMember {
                    name,
                    byte_offset,
                    datatype,
                }
            })
            .collect();
        Datatype::Compound {
            size: offset as u32,
            members,
        }
    }
}

/// Builds an enumeration over an integer base type.
#[derive(Debug, Clone)]
pub struct EnumTypeBuilder {
    base: Datatype,
    members: Vec<EnumMember>,
}

impl EnumTypeBuilder {
    /// Start an enumeration over `base`, which should be a fixed-point type.
    pub fn new(base: Datatype) -> Self {
        Self {
            base,
            members: Vec::new(),
        }
    }

    /// Add a name with its integer value, truncated to the base type size.
    pub fn value(mut self, name: &str, value: i64) -> Self {
        let width = self.base.type_size() as usize;
        let bytes = value.to_le_bytes();
        let mut raw = bytes[..width.min(8)].to_vec();
        // sign-extend into wider bases
        raw.resize(width, if value < 0 { 0xFF } else { 0 });
        self.members.push(EnumMember {
            name: name.to_owned(),
            value: raw,
        });
        self
    }

    pub fn build(self) -> Datatype {
        Datatype::Enumeration {
            base_type: Box::new(self.base),
            members: self.members,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compound_members_are_packed() {
        let dt = CompoundTypeBuilder::new()
            .field("a", Datatype::native_u8())
            .field("b", Datatype::native_f64())
            .field("c", Datatype::native_i16())
            .build();
        match dt {
            Datatype::Compound { size, members } => {
                assert_eq!(size, 11);
                let offsets: Vec<u64> = members.iter().map(|m| m.byte_offset).collect();
                assert_eq!(offsets, [0, 1, 9]);
            }
            other => panic!("expected compound, got {other:?}"),
        }
    }

    #[test]
    fn empty_compound_has_zero_size() {
        assert_eq!(CompoundTypeBuilder::new().build().type_size(), 0);
    }

    #[test]
    fn enum_values_use_base_width() {
        let dt = EnumTypeBuilder::new(Datatype::native_i16())
            .value("NEG", -2)
            .value("POS", 258)
            .build();
        match dt {
            Datatype::Enumeration { members, .. } => {
                assert_eq!(members[0].value, [0xFE, 0xFF]);
                assert_eq!(members[1].value, [0x02, 0x01]);
            }
            other => panic!("expected enum, got {other:?}"),
        }
    }
}
