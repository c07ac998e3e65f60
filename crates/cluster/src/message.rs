use core::fmt;

use crate::Error;

/// Broadcast opcodes exchanged between the two daemons. Exactly 4 bytes in
/// network byte order on the wire, no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// The sender wants to take over as standalone primary.
    Failover = 0,
    /// The sender's hypervisor is unusable.
    Failed = 1,
}

impl Message {
    pub const WIRE_LEN: usize = 4;

    pub fn to_wire(self) -> [u8; Self::WIRE_LEN] {
        (self as u32).to_be_bytes()
    }

    pub fn from_wire(payload: &[u8]) -> Result<Self, Error> {
        let raw: [u8; Self::WIRE_LEN] = payload
            .try_into()
            .map_err(|_| Error::InvalidLength(payload.len()))?;
        match u32::from_be_bytes(raw) {
            0 => Ok(Message::Failover),
            1 => Ok(Message::Failed),
            opcode => Err(Error::UnknownOpcode(opcode)),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Failover => f.write_str("FAILOVER"),
            Message::Failed => f.write_str("FAILED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_byte_order() {
        assert_eq!(Message::Failover.to_wire(), [0, 0, 0, 0]);
        assert_eq!(Message::Failed.to_wire(), [0, 0, 0, 1]);
    }

    #[test]
    fn decode_rejects_bad_frames() {
        assert_eq!(
            Message::from_wire(&Message::Failover.to_wire()).unwrap(),
            Message::Failover
        );
        assert_eq!(
            Message::from_wire(&Message::Failed.to_wire()).unwrap(),
            Message::Failed
        );
        assert!(matches!(
            Message::from_wire(&[0, 0, 1]),
            Err(Error::InvalidLength(3))
        ));
        assert!(matches!(
            Message::from_wire(&[0, 0, 0, 9]),
            Err(Error::UnknownOpcode(9))
        ));
    }
}
