use std::fmt;

/// Multicodec code identifying a concrete encoding.
///
/// Values come from the multicodec table
/// (<https://github.com/multiformats/multicodec/blob/master/table.csv>).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    Json = 0x0200,
    MsgPack = 0x0201,
}

impl Codec {
    /// Look up a codec by its numeric code.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0x0200 => Some(Self::Json),
            0x0201 => Some(Self::MsgPack),
            _ => None,
        }
    }

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::MsgPack => "msgpack",
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#06x})", self.name(), self.code())
    }
}
