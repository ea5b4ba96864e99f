//! Constant values of the Chip-8 architecture.
use std::time::Duration;

/// Number of general purpose registers.
pub const REGISTER_COUNT: usize = 0x10; // 16

/// The lower memory space was historically used for the interpreter
/// itself. It is reserved and must stay zero; programs load above it.
pub const MEM_START: usize = 0x200; // 512
pub const MEM_SIZE: usize = 0x1000; // 4096

/// Mask that keeps an address inside the 12-bit memory space.
pub const ADDR_MASK: u16 = 0x0FFF;

/// Levels of nesting allowed in the call stack.
pub const STACK_SIZE: usize = 16;

pub const DISPLAY_WIDTH: usize = 64;
pub const DISPLAY_HEIGHT: usize = 32;
pub const DISPLAY_BUFFER_SIZE: usize = DISPLAY_WIDTH * DISPLAY_HEIGHT;

/// Default instruction rate. Real hardware had no fixed rate, so this
/// is a tunable approximation that most ROMs play well at.
pub const DEFAULT_IPS: u64 = 700;

/// Number of times per second the delay and sound timers count down.
pub const TIMER_FREQUENCY: u64 = 60;

/// Number of nanoseconds in a second
#[doc(hidden)]
pub const NANOS_IN_SECOND: u64 = 1_000_000_000;

/// Interval between hardware timer decrements, 1/60th of a second.
pub const TIMER_INTERVAL: Duration = Duration::from_nanos(NANOS_IN_SECOND / TIMER_FREQUENCY);

/// Number of keys on the keypad (0x0-0xF)
pub const KEY_COUNT: usize = 16;
