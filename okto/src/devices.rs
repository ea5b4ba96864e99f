//! IO device interface.
use crate::constants::*;

/// Hooks a frontend implements to provide IO devices to the virtual
/// machine.
///
/// The machine core owns no window, keyboard or audio device; the run
/// loop calls these hooks once per tick.
pub trait Devices {
    /// Fill `keypad` with the pressed state of each logical key.
    ///
    /// Called before every tick. Returning `false` asks the run loop to
    /// stop; this doubles as the per-tick shutdown check.
    fn poll_keys(&mut self, keypad: &mut [bool; KEY_COUNT]) -> bool;

    /// Blit the display buffer to screen output.
    ///
    /// Called after every tick with the full 64x32 buffer, one byte per
    /// pixel, values 0 or 1. There is no differential update; a full
    /// redraw is expected each time.
    fn draw(&mut self, display: &[u8; DISPLAY_BUFFER_SIZE]);

    /// Turn the sound buzzer on or off.
    ///
    /// `on` is true while the sound timer holds a non-zero value.
    fn buzz(&mut self, on: bool);
}

/// Canonical physical-to-logical key layout.
///
/// The 16 physical keys, taken in row order from the QWERTY block
///
/// ```text
/// 1 2 3 4
/// Q W E R
/// A S D F
/// Z X C V
/// ```
///
/// map to the Chip-8 digit at the same position in this table.
#[rustfmt::skip]
pub const KEY_LAYOUT: [u8; KEY_COUNT] = [
    0x1, 0x2, 0x3, 0xC,
    0x4, 0x5, 0x6, 0xD,
    0x7, 0x8, 0x9, 0xE,
    0xA, 0x0, 0xB, 0xF,
];
