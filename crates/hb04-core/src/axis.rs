//! Logical axes shown on the pendant display.
//!
//! The physical axis selector picks between several logical axes; each one
//! keeps a work/machine coordinate pair. Feed and spindle reuse the same pair
//! as actual/setpoint values.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::protocol::codec::{DisplayBytes, encode_float, encode_int16};

/// How an axis is rendered on the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    /// Fixed-point with four decimals (XYZA).
    Float,
    /// Unsigned 16-bit integer (feed/spindle).
    Int16,
}

/// Identifier of one logical axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisId {
    X,
    Y,
    Z,
    A,
    Feed,
    FeedActual,
    Spindle,
    SpindleActual,
}

impl AxisId {
    pub const ALL: [AxisId; 8] = [
        AxisId::X,
        AxisId::Y,
        AxisId::Z,
        AxisId::A,
        AxisId::Feed,
        AxisId::FeedActual,
        AxisId::Spindle,
        AxisId::SpindleActual,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            AxisId::X => "x",
            AxisId::Y => "y",
            AxisId::Z => "z",
            AxisId::A => "a",
            AxisId::Feed => "feed",
            AxisId::FeedActual => "feed-actual",
            AxisId::Spindle => "spindle",
            AxisId::SpindleActual => "spindle-actual",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|id| id.name() == name)
    }

    pub const fn display_mode(self) -> DisplayMode {
        match self {
            AxisId::X | AxisId::Y | AxisId::Z | AxisId::A => DisplayMode::Float,
            _ => DisplayMode::Int16,
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for AxisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An `f64` that can be shared between threads without a lock.
#[derive(Debug, Default)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, v: f64) {
        self.0.store(v.to_bits(), Ordering::Relaxed);
    }
}

/// One logical axis.
///
/// Each coordinate is read and written independently; there is no guarantee
/// that a reader sees both halves of a concurrent two-field update. Stored
/// values are never clamped, only their display encoding is.
#[derive(Debug)]
pub struct Axis {
    id: AxisId,
    work: AtomicF64,
    machine: AtomicF64,
}

impl Axis {
    pub fn new(id: AxisId) -> Self {
        Self {
            id,
            work: AtomicF64::default(),
            machine: AtomicF64::default(),
        }
    }

    pub fn id(&self) -> AxisId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.id.name()
    }

    pub fn mode(&self) -> DisplayMode {
        self.id.display_mode()
    }

    pub fn work_coordinate(&self) -> f64 {
        self.work.load()
    }

    pub fn set_work_coordinate(&self, v: f64) {
        self.work.store(v);
    }

    pub fn machine_coordinate(&self) -> f64 {
        self.machine.load()
    }

    pub fn set_machine_coordinate(&self, v: f64) {
        self.machine.store(v);
    }

    /// Current value of a feed/spindle axis.
    pub fn actual(&self) -> f64 {
        self.work_coordinate()
    }

    /// Target value of a feed/spindle axis.
    pub fn setrate(&self) -> f64 {
        self.machine_coordinate()
    }

    pub fn reset(&self) {
        self.work.store(0.0);
        self.machine.store(0.0);
    }

    /// Encode a value according to this axis's display mode.
    pub fn display(&self, v: f64) -> DisplayBytes {
        match self.mode() {
            DisplayMode::Float => DisplayBytes::Float(encode_float(v)),
            DisplayMode::Int16 => DisplayBytes::Int(encode_int16(v)),
        }
    }

    pub fn work_display(&self) -> DisplayBytes {
        self.display(self.work_coordinate())
    }

    pub fn machine_display(&self) -> DisplayBytes {
        self.display(self.machine_coordinate())
    }

    pub fn actual_display(&self) -> DisplayBytes {
        self.display(self.actual())
    }

    pub fn setrate_display(&self) -> DisplayBytes {
        self.display(self.setrate())
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.mode() {
            DisplayMode::Float => "float",
            DisplayMode::Int16 => "int",
        };
        write!(
            f,
            "{}(wc{}/mc{} {})",
            self.name(),
            self.work_coordinate(),
            self.machine_coordinate(),
            mode
        )
    }
}

/// The fixed set of axes a session owns.
#[derive(Debug)]
pub struct AxisSet {
    axes: [Axis; 8],
}

impl AxisSet {
    pub fn new() -> Self {
        Self {
            axes: AxisId::ALL.map(Axis::new),
        }
    }

    pub fn get(&self, id: AxisId) -> &Axis {
        &self.axes[id.index()]
    }

    pub fn by_name(&self, name: &str) -> Option<&Axis> {
        AxisId::from_name(name).map(|id| self.get(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Axis> {
        self.axes.iter()
    }
}

impl Default for AxisSet {
    fn default() -> Self {
        Self::new()
    }
}
