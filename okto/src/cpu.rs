//! CPU and memory state.
use crate::constants::*;

/// Core state for a Chip-8 interpreter.
pub(crate) struct Cpu {
    // ------------------------------------------------------------------------
    // Registers
    /// Program counter pointing to the current position in the program.
    pub(crate) pc: u16,
    /// Stack pointer, indicating the next free slot on the call stack.
    pub(crate) sp: usize,
    /// General purpose registers V0-VF.
    ///
    /// Register 15 (VF) doubles as the carry, borrow or collision flag
    /// output of arithmetic, shift and draw instructions.
    pub(crate) registers: [u8; REGISTER_COUNT],
    /// Address register used as a memory base for sprite and block
    /// transfer instructions. Addresses are 12 bits, so only the lowest
    /// bits are used.
    pub(crate) index: u16,
    /// (DT) Delay timer that counts down to 0 at 60 Hz.
    pub(crate) delay_timer: u8,
    /// (ST) Sound timer that counts down to 0 at 60 Hz. The buzzer is on
    /// while it holds a non-zero value.
    pub(crate) sound_timer: u8,
    /// Keypad state, pressed is `true`. Written by the frontend before
    /// each tick.
    pub(crate) keypad: [bool; KEY_COUNT],

    // ------------------------------------------------------------------------
    // Memory
    /// Main memory storage space.
    pub(crate) ram: Box<[u8; MEM_SIZE]>,
    /// Stack of return addresses used when a routine call finishes.
    pub(crate) stack: [u16; STACK_SIZE],
    /// Screen buffer that is drawn to. One byte per pixel, values 0 or 1.
    pub(crate) display: Box<[u8; DISPLAY_BUFFER_SIZE]>,

    // ------------------------------------------------------------------------
    // Control
    /// Interrupt for the run loop.
    pub(crate) trap: bool,
    /// Counters for recoverable runtime faults.
    pub(crate) faults: FaultLog,
}

impl Default for Cpu {
    fn default() -> Self {
        Self {
            pc: MEM_START as u16,
            sp: 0,
            registers: [0; REGISTER_COUNT],
            index: 0,
            delay_timer: 0,
            sound_timer: 0,
            keypad: [false; KEY_COUNT],

            ram: Box::new([0; MEM_SIZE]),
            stack: [0; STACK_SIZE],
            display: Box::new([0; DISPLAY_BUFFER_SIZE]),

            trap: false,
            faults: FaultLog::default(),
        }
    }
}

impl Cpu {
    pub(crate) fn new() -> Self {
        Default::default()
    }

    pub(crate) fn clear_display(&mut self) {
        self.display.fill(0);
    }

    pub(crate) fn set_key(&mut self, key: u8, pressed: bool) {
        if (key as usize) < KEY_COUNT {
            self.keypad[key as usize] = pressed;
        }
    }

    pub(crate) fn key(&self, key: u8) -> bool {
        self.keypad[key as usize & 0xF]
    }

    /// Value of the first key that is pressed down, if any.
    #[inline]
    pub(crate) fn first_key(&self) -> Option<u8> {
        self.keypad.iter().position(|pressed| *pressed).map(|k| k as u8)
    }

    /// Count down the delay timer, floored at zero.
    #[inline]
    pub(crate) fn tick_delay(&mut self) {
        let (val, underflow) = self.delay_timer.overflowing_sub(1);
        if !underflow {
            self.delay_timer = val;
        }
    }

    /// Count down the sound timer, floored at zero.
    #[inline]
    pub(crate) fn tick_sound(&mut self) {
        let (val, underflow) = self.sound_timer.overflowing_sub(1);
        if !underflow {
            self.sound_timer = val;
        }
    }
}

/// Recoverable runtime fault.
///
/// Faults are counted and logged but never halt the machine; the
/// faulting instruction behaves as a no-op and execution proceeds to
/// the next fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// `CALL` with a full call stack. The call is skipped.
    StackOverflow,
    /// `RET` with an empty call stack. No state change.
    StackUnderflow,
    /// Instruction word with no defined handler.
    UnknownOpcode,
    /// Program counter ran outside the 4 KiB address space; it is
    /// wrapped back into range.
    PcOutOfRange,
}

/// Per-kind counters for runtime faults.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FaultLog {
    pub stack_overflow: u64,
    pub stack_underflow: u64,
    pub unknown_opcode: u64,
    pub pc_out_of_range: u64,
}

impl FaultLog {
    pub(crate) fn record(&mut self, fault: Fault) {
        match fault {
            Fault::StackOverflow => self.stack_overflow += 1,
            Fault::StackUnderflow => self.stack_underflow += 1,
            Fault::UnknownOpcode => self.unknown_opcode += 1,
            Fault::PcOutOfRange => self.pc_out_of_range += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.stack_overflow + self.stack_underflow + self.unknown_opcode + self.pc_out_of_range
    }
}
