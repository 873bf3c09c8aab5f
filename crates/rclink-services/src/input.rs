//! Controller input sources.
//!
//! Device enumeration lives outside rclink. A device shows up here as an
//! [`AxisReader`] (analog sticks and triggers) or a [`KeyReader`] (keyboard),
//! and is turned into a [`ControlVector`] by [`AnalogInput`] or
//! [`DigitalInput`]. The binary picks one of the two at startup.

use std::io::BufRead;

use tokio::sync::watch;

use rclink_core::ControlVector;

/// Produces the control vector for one loop tick.
pub trait InputSource: Send {
    fn sample(&mut self) -> ControlVector;
}

/// Raw joystick axes, each in [-1, 1].
pub trait AxisReader: Send {
    fn axis(&self, index: usize) -> f32;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Left,
    Right,
    Up,
    Down,
}

pub trait KeyReader: Send {
    fn pressed(&self, key: Key) -> bool;
}

/// Gamepad mapping: lateral from axis 0 (left stick), longitudinal from
/// the negated trigger axis 2.
pub struct AnalogInput<R> {
    reader: R,
}

impl<R: AxisReader> AnalogInput<R> {
    pub const LATERAL_AXIS: usize = 0;
    pub const TRIGGER_AXIS: usize = 2;

    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: AxisReader> InputSource for AnalogInput<R> {
    fn sample(&mut self) -> ControlVector {
        ControlVector::steering_throttle(
            self.reader.axis(Self::LATERAL_AXIS),
            -self.reader.axis(Self::TRIGGER_AXIS),
        )
    }
}

/// Keyboard mapping: each held key contributes ±1.0, opposite keys cancel.
pub struct DigitalInput<R> {
    reader: R,
}

impl<R: KeyReader> DigitalInput<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: KeyReader> InputSource for DigitalInput<R> {
    fn sample(&mut self) -> ControlVector {
        let held = |key| if self.reader.pressed(key) { 1.0f32 } else { 0.0 };
        ControlVector::steering_throttle(
            held(Key::Right) - held(Key::Left),
            held(Key::Up) - held(Key::Down),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Analog,
    Digital,
}

// ── Line-oriented input ───────────────────────────────────────────────────────

/// Keys held on one input line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeldKeys {
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,
}

impl HeldKeys {
    pub fn any(&self) -> bool {
        self.left || self.right || self.up || self.down
    }
}

/// One line of controller input.
///
/// `<lateral> <longitudinal>` sets both axes. A line made only of the key
/// letters `a` (left), `d` (right), `u` (up) and `n` (down) sets the held
/// keys; an empty line releases everything.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputLine {
    Axes { lateral: f32, longitudinal: f32 },
    Keys(HeldKeys),
}

impl Default for InputLine {
    fn default() -> Self {
        InputLine::Keys(HeldKeys::default())
    }
}

impl InputLine {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let mut fields = line.split_whitespace();
        if let (Some(a), Some(b), None) = (fields.next(), fields.next(), fields.next()) {
            if let (Ok(lateral), Ok(longitudinal)) = (a.parse(), b.parse()) {
                return Some(InputLine::Axes {
                    lateral,
                    longitudinal,
                });
            }
        }

        let mut keys = HeldKeys::default();
        for c in line.chars().filter(|c| !c.is_whitespace()) {
            match c.to_ascii_lowercase() {
                'a' => keys.left = true,
                'd' => keys.right = true,
                'u' => keys.up = true,
                'n' => keys.down = true,
                _ => return None,
            }
        }
        Some(InputLine::Keys(keys))
    }

    /// Mapping implied by the first line an operator types.
    pub fn kind(&self) -> InputKind {
        match self {
            InputLine::Keys(keys) if keys.any() => InputKind::Digital,
            _ => InputKind::Analog,
        }
    }
}

/// Latest [`InputLine`] as seen through a watch channel. Reads as raw
/// gamepad axes or as held keys, so it can back either mapping.
#[derive(Clone)]
pub struct LatestLine {
    rx: watch::Receiver<InputLine>,
}

impl LatestLine {
    pub fn new(rx: watch::Receiver<InputLine>) -> Self {
        Self { rx }
    }
}

impl AxisReader for LatestLine {
    fn axis(&self, index: usize) -> f32 {
        match *self.rx.borrow() {
            InputLine::Axes { lateral, .. } if index == 0 => lateral,
            // Trigger axis is negated by the analog mapping.
            InputLine::Axes { longitudinal, .. } if index == 2 => -longitudinal,
            _ => 0.0,
        }
    }
}

impl KeyReader for LatestLine {
    fn pressed(&self, key: Key) -> bool {
        match *self.rx.borrow() {
            InputLine::Keys(held) => match key {
                Key::Left => held.left,
                Key::Right => held.right,
                Key::Up => held.up,
                Key::Down => held.down,
            },
            InputLine::Axes { .. } => false,
        }
    }
}

/// Box the mapping for `kind` over `reader`.
pub fn select<R>(kind: InputKind, reader: R) -> Box<dyn InputSource>
where
    R: AxisReader + KeyReader + 'static,
{
    match kind {
        InputKind::Analog => Box::new(AnalogInput::new(reader)),
        InputKind::Digital => Box::new(DigitalInput::new(reader)),
    }
}

/// Publish every parsable line of `reader` until EOF. Unparsable lines
/// are logged and skipped. Blocking; run it on a dedicated thread.
pub fn feed_lines<R: BufRead>(reader: R, tx: &watch::Sender<InputLine>) -> std::io::Result<()> {
    for line in reader.lines() {
        let line = line?;
        match InputLine::parse(&line) {
            Some(parsed) => {
                tx.send_replace(parsed);
            }
            None => tracing::warn!(line = %line, "unrecognised input line"),
        }
    }
    tracing::debug!("input stream closed");
    Ok(())
}
