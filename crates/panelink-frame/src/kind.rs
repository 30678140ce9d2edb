//! Frame kinds carried in the KIND header byte.

/// Payload-carrying frame that must be acknowledged.
pub const KIND_DATA: u8 = 0;

/// Acknowledgement of a data frame with the same sequence number.
pub const KIND_ACK: u8 = 1;

/// What a frame is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Data,
    Ack,
}

impl FrameKind {
    /// Parse the KIND header byte. Unknown values yield `None`.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            KIND_DATA => Some(Self::Data),
            KIND_ACK => Some(Self::Ack),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::Data => KIND_DATA,
            Self::Ack => KIND_ACK,
        }
    }

    /// Human-readable name for logs and CLI output.
    pub fn name(self) -> &'static str {
        match self {
            Self::Data => "DATA",
            Self::Ack => "ACK",
        }
    }
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
