//! Demo machine driven entirely from the pendant.
//!
//! The knob jogs whichever axis the selector points at, `step` cycles the
//! jog scale, `zero` zeroes the work coordinate and `mode` toggles mm/inch.
//! The motion buttons only light up their icon.

use std::sync::Mutex;

use anyhow::Result;
use hb04_core::{AxisSwitch, Button, Connector, Pendant, PendantEvent, PendantHandle};
use tracing::debug;

#[derive(Debug)]
struct JogState {
    /// Last held button per report slot.
    last_buttons: [Button; 2],
    scale: u32,
    inch: bool,
    /// Jog target; `None` until the selector leaves `off`.
    axis: Option<AxisSwitch>,
}

pub struct Demo<C: Connector> {
    pendant: PendantHandle<C>,
    state: Mutex<JogState>,
}

impl<C: Connector> Demo<C> {
    pub fn new(pendant: PendantHandle<C>) -> Self {
        Self {
            pendant,
            state: Mutex::new(JogState {
                last_buttons: [Button::None; 2],
                scale: 1,
                inch: false,
                axis: None,
            }),
        }
    }

    pub fn scale(&self) -> u32 {
        self.lock().scale
    }

    pub fn selected_axis(&self) -> Option<AxisSwitch> {
        self.lock().axis
    }

    /// Event handler entry point.
    pub fn handle_event(&self, event: &PendantEvent) -> Result<()> {
        debug!(%event, "Pendant event");
        let mut state = self.lock();

        if event.axis != AxisSwitch::Off {
            state.axis = Some(event.axis);
        }

        for (slot, current) in [event.button, event.button2].into_iter().enumerate() {
            let last = state.last_buttons[slot];
            if current.is_none() {
                if !last.is_none() {
                    debug!(button = last.name(), "Button up");
                    state.last_buttons[slot] = Button::None;
                    self.button(&mut state, last, false)?;
                }
            } else if current != last {
                debug!(button = current.name(), "Button down");
                state.last_buttons[slot] = current;
                self.button(&mut state, current, true)?;
            }
        }

        if event.increment != 0 {
            match state.axis {
                Some(axis) => self.jog(axis, event.increment, state.scale)?,
                None => debug!(increment = event.increment, "No axis selected, ignoring knob"),
            }
        }
        Ok(())
    }

    fn button(&self, state: &mut JogState, button: Button, pressed: bool) -> Result<()> {
        let icon = match button {
            Button::GoZero => Some("go-zero"),
            Button::GoHome => Some("go-home"),
            Button::ProbeZ => Some("no-touchoff"),
            Button::SafeZ => Some("j-squiggily"),
            Button::Step | Button::Zero | Button::Mode => None,
            _ => return Ok(()),
        };
        if !pressed {
            return Ok(());
        }

        self.pendant.set_display_attribute("no-icon")?;
        if let Some(icon) = icon {
            self.pendant.set_display_attribute(icon)?;
            return Ok(());
        }

        match button {
            Button::Step => {
                state.scale = next_scale(state.scale, &self.pendant.display_attributes());
                self.pendant
                    .set_display_attribute(&state.scale.to_string())?;
            }
            Button::Zero => {
                if let Some(axis) = state.axis {
                    self.pendant.axis_value(axis.name(), Some(0.0), None)?;
                }
            }
            Button::Mode => {
                state.inch = !state.inch;
                self.pendant
                    .set_display_attribute(if state.inch { "inch" } else { "mm" })?;
            }
            _ => {}
        }
        Ok(())
    }

    fn jog(&self, axis: AxisSwitch, increment: i8, scale: u32) -> Result<()> {
        let delta = jog_delta(axis, increment, scale);
        let Some(reading) = self.pendant.axis(axis.name()) else {
            return Ok(());
        };
        debug!(axis = axis.name(), delta, "Jog");
        self.pendant.axis_value(
            axis.name(),
            Some(reading.work + delta),
            Some(reading.machine + delta),
        )?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, JogState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Knob detents to axis units. Linear axes are scaled by the jog step.
fn jog_delta(axis: AxisSwitch, increment: i8, scale: u32) -> f64 {
    let v = f64::from(increment);
    match axis {
        AxisSwitch::A => v / 1000.0,
        AxisSwitch::X | AxisSwitch::Y | AxisSwitch::Z => v / 10000.0 * f64::from(scale) * 10.0,
        _ => v,
    }
}

/// Next power-of-ten multiplier above `current`, wrapping to 1.
fn next_scale(current: u32, attributes: &[&str]) -> u32 {
    let mut scales: Vec<u32> = attributes
        .iter()
        .filter_map(|name| name.parse::<u32>().ok())
        .filter(|&n| n != 0)
        .collect();
    scales.sort_unstable();
    scales
        .into_iter()
        .find(|&n| n > current && is_power_of_ten(n))
        .unwrap_or(1)
}

fn is_power_of_ten(mut n: u32) -> bool {
    while n >= 10 && n % 10 == 0 {
        n /= 10;
    }
    n == 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use hb04_core::{FatalError, Hb04, Icon, MockConnector, Multiplier, NullObserver, Units};
    use std::sync::Arc;

    fn demo() -> (Hb04<MockConnector>, Demo<MockConnector>) {
        let pendant = Hb04::builder(MockConnector::new())
            .observer(Arc::new(NullObserver))
            .on_fatal(Arc::new(|_: &FatalError| {}))
            .connect();
        let demo = Demo::new(pendant.handle());
        (pendant, demo)
    }

    fn event(button: Button, axis: AxisSwitch, increment: i8) -> PendantEvent {
        PendantEvent {
            button,
            button2: Button::None,
            axis,
            increment,
        }
    }

    #[test]
    fn test_next_scale_cycles_powers_of_ten() {
        let attributes = hb04_core::DisplayAttribute::names();
        assert_eq!(next_scale(1, &attributes), 10);
        assert_eq!(next_scale(10, &attributes), 100);
        assert_eq!(next_scale(100, &attributes), 1000);
        assert_eq!(next_scale(1000, &attributes), 1);
    }

    #[test]
    fn test_jog_delta() {
        let close = |a: f64, b: f64| (a - b).abs() < 1e-12;
        assert!(close(jog_delta(AxisSwitch::A, 5, 100), 0.005));
        assert!(close(jog_delta(AxisSwitch::X, 1, 1), 0.001));
        assert!(close(jog_delta(AxisSwitch::Z, -2, 10), -0.02));
        assert_eq!(jog_delta(AxisSwitch::Feed, 3, 1000), 3.0);
    }

    #[test]
    fn test_knob_jogs_selected_axis() {
        let (pendant, demo) = demo();

        // No axis yet
        demo.handle_event(&event(Button::None, AxisSwitch::Off, 4)).unwrap();
        assert_eq!(demo.selected_axis(), None);

        demo.handle_event(&event(Button::None, AxisSwitch::Feed, 0)).unwrap();
        demo.handle_event(&event(Button::None, AxisSwitch::Off, 7)).unwrap();
        assert_eq!(demo.selected_axis(), Some(AxisSwitch::Feed));

        let feed = pendant.axis("feed").unwrap();
        assert_eq!(feed.work, 7.0);
        assert_eq!(feed.machine, 7.0);
    }

    #[test]
    fn test_step_cycles_multiplier_on_press_only() {
        let (pendant, demo) = demo();

        demo.handle_event(&event(Button::Step, AxisSwitch::X, 0)).unwrap();
        assert_eq!(demo.scale(), 10);
        assert_eq!(pendant.multiplier(), Multiplier::X10);

        // Held: no new edge
        demo.handle_event(&event(Button::Step, AxisSwitch::X, 0)).unwrap();
        assert_eq!(demo.scale(), 10);

        demo.handle_event(&event(Button::None, AxisSwitch::X, 0)).unwrap();
        demo.handle_event(&event(Button::Step, AxisSwitch::X, 0)).unwrap();
        assert_eq!(demo.scale(), 100);
        assert_eq!(pendant.multiplier(), Multiplier::X100);
    }

    #[test]
    fn test_mode_toggles_units_and_clears_icon() {
        let (pendant, demo) = demo();

        demo.handle_event(&event(Button::GoHome, AxisSwitch::X, 0)).unwrap();
        assert_eq!(pendant.icon(), Icon::GoHome);
        demo.handle_event(&event(Button::None, AxisSwitch::X, 0)).unwrap();

        demo.handle_event(&event(Button::Mode, AxisSwitch::X, 0)).unwrap();
        assert_eq!(pendant.units(), Units::Inch);
        assert_eq!(pendant.icon(), Icon::NoIcon);
        demo.handle_event(&event(Button::None, AxisSwitch::X, 0)).unwrap();

        demo.handle_event(&event(Button::Mode, AxisSwitch::X, 0)).unwrap();
        assert_eq!(pendant.units(), Units::Mm);
    }

    #[test]
    fn test_probe_and_safe_z_icons() {
        let (pendant, demo) = demo();

        demo.handle_event(&event(Button::ProbeZ, AxisSwitch::Z, 0)).unwrap();
        assert_eq!(pendant.icon(), Icon::NoTouchoff);

        let chord = PendantEvent {
            button: Button::ProbeZ,
            button2: Button::SafeZ,
            axis: AxisSwitch::Z,
            increment: 0,
        };
        demo.handle_event(&chord).unwrap();
        assert_eq!(pendant.icon(), Icon::JSquiggly);
    }

    #[test]
    fn test_zero_resets_work_coordinate() {
        let (pendant, demo) = demo();
        pendant.axis_value("y", Some(3.5), Some(8.0)).unwrap();

        demo.handle_event(&event(Button::Zero, AxisSwitch::Y, 0)).unwrap();
        let y = pendant.axis("y").unwrap();
        assert_eq!(y.work, 0.0);
        assert_eq!(y.machine, 8.0);
    }

    #[test]
    fn test_unhandled_button_keeps_icon() {
        let (pendant, demo) = demo();
        pendant.set_display_attribute("go-zero").unwrap();

        demo.handle_event(&event(Button::Macro1, AxisSwitch::X, 0)).unwrap();
        assert_eq!(pendant.icon(), Icon::GoZero);
    }
}
