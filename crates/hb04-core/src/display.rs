//! Display attributes (icon, units, multiplier) and frame assembly input.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::axis::{AxisId, AxisSet};
use crate::protocol::codec::FrameContent;
use crate::protocol::tables::{AxisSwitch, Icon, Multiplier, Units};

/// A named display attribute resolved to its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayAttribute {
    Units(Units),
    Icon(Icon),
    Multiplier(Multiplier),
}

impl DisplayAttribute {
    /// Resolve a name, trying units, then icons, then multipliers.
    pub fn lookup(name: &str) -> Option<Self> {
        Units::from_name(name)
            .map(DisplayAttribute::Units)
            .or_else(|| Icon::from_name(name).map(DisplayAttribute::Icon))
            .or_else(|| Multiplier::from_name(name).map(DisplayAttribute::Multiplier))
    }

    /// Every accepted name, in lookup order.
    pub fn names() -> Vec<&'static str> {
        Units::ALL
            .iter()
            .map(|u| u.name())
            .chain(Icon::ALL.iter().map(|i| i.name()))
            .chain(Multiplier::ALL.iter().map(|m| m.name()))
            .collect()
    }
}

/// Icon, units and multiplier currently shown.
///
/// Fields hold table codes; writers only ever store codes taken from the
/// tables, so reads always map back.
#[derive(Debug)]
pub struct DisplayState {
    icon: AtomicU8,
    units: AtomicU8,
    multiplier: AtomicU8,
}

impl DisplayState {
    /// Power-up state of the device.
    pub fn new() -> Self {
        Self {
            icon: AtomicU8::new(Icon::NoIcon.code()),
            units: AtomicU8::new(Units::Mm.code()),
            multiplier: AtomicU8::new(Multiplier::X1.code()),
        }
    }

    pub fn icon(&self) -> Icon {
        Icon::from_code(self.icon.load(Ordering::Relaxed)).unwrap_or(Icon::NoIcon)
    }

    pub fn units(&self) -> Units {
        Units::from_code(self.units.load(Ordering::Relaxed)).unwrap_or(Units::Mm)
    }

    pub fn multiplier(&self) -> Multiplier {
        Multiplier::from_code(self.multiplier.load(Ordering::Relaxed)).unwrap_or(Multiplier::X1)
    }

    pub fn apply(&self, attribute: DisplayAttribute) {
        match attribute {
            DisplayAttribute::Units(u) => self.units.store(u.code(), Ordering::Relaxed),
            DisplayAttribute::Icon(i) => self.icon.store(i.code(), Ordering::Relaxed),
            DisplayAttribute::Multiplier(m) => {
                self.multiplier.store(m.code(), Ordering::Relaxed)
            }
        }
    }

    /// Icon and multiplier share one byte.
    pub fn status_byte(&self) -> u8 {
        self.icon().code() | self.multiplier().code()
    }

    pub fn units_byte(&self) -> u8 {
        self.units().code()
    }
}

impl Default for DisplayState {
    fn default() -> Self {
        Self::new()
    }
}

/// Collect everything the display shows into encoded frame fields.
///
/// The first X/Y/Z slot shows A instead of X while the selector is on A.
pub fn frame_content(axes: &AxisSet, display: &DisplayState, switch: AxisSwitch) -> FrameContent {
    let first = if switch == AxisSwitch::A {
        axes.get(AxisId::A)
    } else {
        axes.get(AxisId::X)
    };
    let y = axes.get(AxisId::Y);
    let z = axes.get(AxisId::Z);
    let feed = axes.get(AxisId::Feed);
    let spindle = axes.get(AxisId::Spindle);

    FrameContent {
        work: [first.work_display(), y.work_display(), z.work_display()],
        machine: [
            first.machine_display(),
            y.machine_display(),
            z.machine_display(),
        ],
        rates: [
            feed.actual_display(),
            spindle.actual_display(),
            feed.setrate_display(),
            spindle.setrate_display(),
        ],
        status: display.status_byte(),
        units: display.units_byte(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::{DisplayBytes, encode_float, encode_frame, encode_int16};

    #[test]
    fn test_lookup_priority() {
        assert_eq!(
            DisplayAttribute::lookup("inch"),
            Some(DisplayAttribute::Units(Units::Inch))
        );
        // "go-zero" is only an icon; buttons are not display attributes.
        assert_eq!(
            DisplayAttribute::lookup("go-zero"),
            Some(DisplayAttribute::Icon(Icon::GoZero))
        );
        assert_eq!(
            DisplayAttribute::lookup("1000"),
            Some(DisplayAttribute::Multiplier(Multiplier::X1000))
        );
        assert_eq!(DisplayAttribute::lookup("x"), None);
    }

    #[test]
    fn test_names_union() {
        let names = DisplayAttribute::names();
        assert_eq!(names.len(), 2 + 5 + 12);
        assert_eq!(&names[..3], &["mm", "inch", "no-icon"]);
        assert!(names.contains(&"P6"));
        assert!(names.contains(&""));
    }

    #[test]
    fn test_power_up_state() {
        let display = DisplayState::new();
        assert_eq!(display.icon(), Icon::NoIcon);
        assert_eq!(display.units(), Units::Mm);
        assert_eq!(display.multiplier(), Multiplier::X1);
        assert_eq!(display.status_byte(), 0x01);
    }

    #[test]
    fn test_status_byte_combines_icon_and_multiplier() {
        let display = DisplayState::new();
        display.apply(DisplayAttribute::Icon(Icon::GoHome));
        display.apply(DisplayAttribute::Multiplier(Multiplier::X100));
        assert_eq!(display.status_byte(), 0x58);
    }

    #[test]
    fn test_inch_sets_units_byte() {
        let axes = AxisSet::new();
        let display = DisplayState::new();
        display.apply(DisplayAttribute::Units(Units::Inch));
        let frame = encode_frame(&frame_content(&axes, &display, AxisSwitch::X)).unwrap();
        assert_eq!(frame[36], 0x80);
    }

    #[test]
    fn test_a_replaces_x_when_selected() {
        let axes = AxisSet::new();
        for (i, id) in [AxisId::X, AxisId::Y, AxisId::Z, AxisId::A].into_iter().enumerate() {
            axes.get(id).set_work_coordinate(i as f64 + 1.25);
            axes.get(id).set_machine_coordinate(-(i as f64) - 10.5);
        }
        let display = DisplayState::new();

        let content = frame_content(&axes, &display, AxisSwitch::A);
        assert_eq!(content.work[0], DisplayBytes::Float(encode_float(4.25)));
        assert_eq!(content.machine[0], DisplayBytes::Float(encode_float(-13.5)));
        let frame = encode_frame(&content).unwrap();
        assert_eq!(&frame[3..7], &encode_float(4.25));
        assert_ne!(&frame[3..7], &encode_float(1.25));

        let content = frame_content(&axes, &display, AxisSwitch::Z);
        assert_eq!(content.work[0], DisplayBytes::Float(encode_float(1.25)));
    }

    #[test]
    fn test_rates_use_actual_and_setrate() {
        let axes = AxisSet::new();
        axes.get(AxisId::Feed).set_work_coordinate(150.0);
        axes.get(AxisId::Feed).set_machine_coordinate(200.0);
        axes.get(AxisId::Spindle).set_work_coordinate(9000.0);
        axes.get(AxisId::Spindle).set_machine_coordinate(12000.0);

        let content = frame_content(&axes, &DisplayState::new(), AxisSwitch::Off);
        assert_eq!(
            content.rates,
            [
                DisplayBytes::Int(encode_int16(150.0)),
                DisplayBytes::Int(encode_int16(9000.0)),
                DisplayBytes::Int(encode_int16(200.0)),
                DisplayBytes::Int(encode_int16(12000.0)),
            ]
        );
    }
}
