//! D-pad focus navigation.
//!
//! TV-class devices expose no pointer input, so reaching a labelled element
//! means pressing directional keys until focus lands on it. [`next_direction`]
//! computes one step from the current focused and target rectangles; the
//! caller re-reads the hierarchy after every press and asks again.
//!
//! Horizontal distance is always closed before vertical distance, matching
//! how grid and row-based launchers move focus.

use std::fmt;

use crate::driver::Button;
use crate::element::Rect;

/// A single directional input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// The D-pad button that moves focus in this direction.
    pub fn button(self) -> Button {
        match self {
            Direction::Up => Button::DpadUp,
            Direction::Down => Button::DpadDown,
            Direction::Left => Button::DpadLeft,
            Direction::Right => Button::DpadRight,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        };
        f.write_str(name)
    }
}

/// Returns the next direction that moves focus from `focused` toward
/// `target`, or `None` when both share the same origin.
pub fn next_direction(focused: &Rect, target: &Rect) -> Option<Direction> {
    use std::cmp::Ordering::*;

    match (focused.x.cmp(&target.x), focused.y.cmp(&target.y)) {
        (Less, _) => Some(Direction::Right),
        (Greater, _) => Some(Direction::Left),
        (Equal, Less) => Some(Direction::Down),
        (Equal, Greater) => Some(Direction::Up),
        (Equal, Equal) => None,
    }
}
