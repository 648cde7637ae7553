/// Blind position as exposed to callers: percent open, `0` closed, `100` open.
///
/// Devices report and accept the inverse orientation (`0` open, `100`
/// closed); [`Position::from_native`] and [`Position::native`] convert
/// between the two. Native values above 100 are clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Position(u8);

impl Position {
    pub const CLOSED: Self = Self(0);
    pub const OPEN: Self = Self(100);

    /// Creates a position from a percent-open value, `None` above 100.
    pub const fn new(percent: u8) -> Option<Self> {
        if percent > 100 {
            None
        } else {
            Some(Self(percent))
        }
    }

    /// Converts a device-native value (`0` open, `100` closed).
    pub const fn from_native(native: u8) -> Self {
        let native = if native > 100 { 100 } else { native };
        Self(100 - native)
    }

    pub const fn percent(self) -> u8 {
        self.0
    }

    /// The value to put on the wire.
    pub const fn native(self) -> u8 {
        100 - self.0
    }
}
