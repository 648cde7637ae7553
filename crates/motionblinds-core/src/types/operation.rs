/// Motion code reported in a device's `operation` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Closing,
    Opening,
    Stopped,
    /// Code 5, sent when the device answers a status query.
    StatusQuery,
    Unknown(u8),
}

impl Operation {
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Closing,
            1 => Self::Opening,
            2 => Self::Stopped,
            5 => Self::StatusQuery,
            other => Self::Unknown(other),
        }
    }

    pub const fn to_u8(self) -> u8 {
        match self {
            Self::Closing => 0,
            Self::Opening => 1,
            Self::Stopped => 2,
            Self::StatusQuery => 5,
            Self::Unknown(v) => v,
        }
    }

    /// `true` for the codes that mean the motor is running.
    pub const fn is_moving(self) -> bool {
        matches!(self, Self::Closing | Self::Opening)
    }
}

#[cfg(test)]
mod tests {
    use super::Operation;

    #[test]
    fn status_query_is_not_motion() {
        assert_eq!(Operation::from_u8(5), Operation::StatusQuery);
        assert!(!Operation::StatusQuery.is_moving());
        assert!(Operation::from_u8(0).is_moving());
        assert!(Operation::from_u8(1).is_moving());
        assert_eq!(Operation::from_u8(9), Operation::Unknown(9));
        assert_eq!(Operation::Unknown(9).to_u8(), 9);
    }
}
