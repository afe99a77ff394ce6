//! Lookup tables between HB04 wire codes and their names.
//!
//! Every table is an enum with a total `code()`/`name()` direction and a
//! fallible `from_code()`/`from_name()` direction. Unknown codes never fall
//! back to a default entry.

use std::fmt;

/// Generates a code/name table enum.
macro_rules! code_table {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = ($code:expr, $label:expr), )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant, )+
        }

        impl $name {
            /// All entries in table order.
            pub const ALL: &'static [$name] = &[ $( $name::$variant, )+ ];

            /// Wire code of this entry.
            pub const fn code(self) -> u8 {
                match self {
                    $( $name::$variant => $code, )+
                }
            }

            /// Name used by the facade API.
            pub const fn name(self) -> &'static str {
                match self {
                    $( $name::$variant => $label, )+
                }
            }

            /// Look up an entry by wire code.
            pub fn from_code(code: u8) -> Option<Self> {
                Self::ALL.iter().copied().find(|e| e.code() == code)
            }

            /// Look up an entry by name.
            pub fn from_name(name: &str) -> Option<Self> {
                Self::ALL.iter().copied().find(|e| e.name() == name)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

code_table! {
    /// Buttons reported in bytes 1 and 2 of an input report.
    pub enum Button {
        /// No button held.
        None = (0x00, ""),
        Reset = (0x17, "reset"),
        Stop = (0x16, "stop"),
        GoZero = (0x01, "go-zero"),
        Start = (0x02, "start"),
        Rewind = (0x03, "rewind"),
        ProbeZ = (0x04, "probe-z"),
        Spindle = (0x0C, "spindle"),
        Half = (0x06, "half"),
        Zero = (0x07, "zero"),
        SafeZ = (0x08, "safe-z"),
        GoHome = (0x09, "go-home"),
        Macro1 = (0x0A, "macro1"),
        Macro2 = (0x0B, "macro2"),
        Macro3 = (0x05, "macro3"),
        Step = (0x0D, "step"),
        Mode = (0x0E, "mode"),
        Macro6 = (0x0F, "macro6"),
        Macro7 = (0x10, "macro7"),
    }
}

impl Button {
    pub fn is_none(self) -> bool {
        self == Button::None
    }
}

code_table! {
    /// Positions of the rotary axis selector.
    ///
    /// The switch is break-before-make, so `Off` normally shows up between
    /// two axes unless it is turned quickly.
    pub enum AxisSwitch {
        Off = (0x00, "off"),
        X = (0x11, "x"),
        Y = (0x12, "y"),
        Z = (0x13, "z"),
        A = (0x18, "a"),
        Spindle = (0x14, "spindle"),
        Feed = (0x15, "feed"),
    }
}

code_table! {
    /// Text shown next to the jog multiplier on the display.
    pub enum Multiplier {
        Blank = (0x0, ""),
        X1 = (0x1, "1"),
        X5 = (0x2, "5"),
        X10 = (0x3, "10"),
        X20 = (0x4, "20"),
        X30 = (0x5, "30"),
        X40 = (0x6, "40"),
        X50 = (0x7, "50"),
        X100 = (0x8, "100"),
        X500 = (0x9, "500"),
        X1000 = (0xA, "1000"),
        /// Shown literally as "P6"; meaning unknown.
        P6 = (0xB, "P6"),
    }
}

code_table! {
    /// Status icons. Shares the status byte with [`Multiplier`].
    pub enum Icon {
        NoIcon = (0x00, "no-icon"),
        /// Same glyph as the go-zero button.
        GoZero = (0x10, "go-zero"),
        /// Work/tool glyph with a strike-through.
        NoTouchoff = (0x20, "no-touchoff"),
        /// Same glyph as the go-home button.
        GoHome = (0x50, "go-home"),
        /// Large "J" with a saw-tooth.
        JSquiggly = (0x60, "j-squiggily"),
    }
}

code_table! {
    /// Unit indicator. Inch mode also adds a fourth decimal to the XYZA digits.
    pub enum Units {
        Mm = (0x00, "mm"),
        Inch = (0x80, "inch"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_sizes() {
        assert_eq!(Button::ALL.len(), 19);
        assert_eq!(AxisSwitch::ALL.len(), 7);
        assert_eq!(Multiplier::ALL.len(), 12);
        assert_eq!(Icon::ALL.len(), 5);
        assert_eq!(Units::ALL.len(), 2);
    }

    #[test]
    fn test_codes_are_unique() {
        for (i, a) in Button::ALL.iter().enumerate() {
            for b in &Button::ALL[i + 1..] {
                assert_ne!(a.code(), b.code(), "{a:?} and {b:?} share a code");
            }
        }
        for (i, a) in AxisSwitch::ALL.iter().enumerate() {
            for b in &AxisSwitch::ALL[i + 1..] {
                assert_ne!(a.code(), b.code());
            }
        }
    }

    #[test]
    fn test_unknown_codes_fail() {
        assert_eq!(AxisSwitch::from_code(0x16), None);
        assert_eq!(Button::from_code(0x11), None);
        assert_eq!(Multiplier::from_code(0x0C), None);
        assert_eq!(Units::from_name("furlong"), None);
    }

    #[test]
    fn test_lookup_by_name() {
        assert_eq!(AxisSwitch::from_code(0x13), Some(AxisSwitch::Z));
        assert_eq!(Button::from_name("probe-z"), Some(Button::ProbeZ));
        assert_eq!(Multiplier::from_name(""), Some(Multiplier::Blank));
        assert_eq!(Icon::from_name("go-home").map(Icon::code), Some(0x50));
        assert_eq!(Units::Inch.to_string(), "inch");
    }
}
