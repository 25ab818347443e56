//! Object header message type identifiers.

/// Header message types this crate reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Nil,
    Dataspace,
    LinkInfo,
    Datatype,
    FillValueOld,
    FillValue,
    Link,
    DataLayout,
    GroupInfo,
    FilterPipeline,
    Attribute,
    ObjectHeaderContinuation,
    SymbolTable,
    ObjectModificationTime,
    AttributeInfo,
    ObjectReferenceCount,
    /// Any other message, kept with its raw type ID.
    Unknown(u16),
}

const KNOWN: [(u16, MessageType); 16] = [
    (0x0000, MessageType::Nil),
    (0x0001, MessageType::Dataspace),
    (0x0002, MessageType::LinkInfo),
    (0x0003, MessageType::Datatype),
    (0x0004, MessageType::FillValueOld),
    (0x0005, MessageType::FillValue),
    (0x0006, MessageType::Link),
    (0x0008, MessageType::DataLayout),
    (0x000A, MessageType::GroupInfo),
    (0x000B, MessageType::FilterPipeline),
    (0x000C, MessageType::Attribute),
    (0x0010, MessageType::ObjectHeaderContinuation),
    (0x0011, MessageType::SymbolTable),
    (0x0012, MessageType::ObjectModificationTime),
    (0x0015, MessageType::AttributeInfo),
    (0x0016, MessageType::ObjectReferenceCount),
];

impl MessageType {
    /// Map a raw type ID onto a `MessageType`.
    pub fn from_u16(val: u16) -> MessageType {
        KNOWN
            .iter()
            .find(|(id, _)| *id == val)
            .map(|(_, mt)| *mt)
            .unwrap_or(MessageType::Unknown(val))
    }

    /// The raw type ID written into object headers.
    pub fn to_u16(self) -> u16 {
        match self {
            MessageType::Unknown(v) => v,
            known => KNOWN
                .iter()
                .find(|(_, mt)| *mt == known)
                .map(|(id, _)| *id)
                .unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_consistent() {
        for (id, mt) in KNOWN {
            assert_eq!(MessageType::from_u16(id), mt);
            assert_eq!(mt.to_u16(), id);
        }
    }

    #[test]
    fn unknown_ids_are_preserved() {
        let mt = MessageType::from_u16(0x0017);
        assert_eq!(mt, MessageType::Unknown(0x0017));
        assert_eq!(mt.to_u16(), 0x0017);
    }
}
