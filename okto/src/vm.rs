//! Virtual machine.
use std::{
    fmt::{self, Write as _},
    thread,
    time::{Duration, Instant},
};

use log::{trace, warn};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    bytecode::{decode, fetch_word, Operands},
    clock::Scheduler,
    constants::*,
    cpu::{Cpu, Fault, FaultLog},
    devices::Devices,
    error::{VmError, VmResult},
};

pub struct Vm {
    cpu: Cpu,
    scheduler: Scheduler,
    rng: StdRng,
    conf: VmConf,
}

/// VM configuration parameters.
#[derive(Default, Clone)]
pub struct VmConf {
    /// Target instruction rate. `None` selects the default of 700
    /// instructions per second; `Some(Hz(0))` disables pacing entirely.
    pub ips: Option<Hz>,
}

/// Instruction rate, in instructions per second.
#[derive(Debug, Clone, Copy)]
pub struct Hz(pub u64);

impl Default for Hz {
    fn default() -> Self {
        Hz(DEFAULT_IPS)
    }
}

impl From<Hz> for Duration {
    fn from(freq: Hz) -> Self {
        if freq.0 == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(NANOS_IN_SECOND / freq.0)
        }
    }
}

/// Outcome of a single fetch-decode-execute step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Ok,
    /// The display buffer changed.
    Draw,
    /// `Fx0A` (`LD Vx, K`) found no key pressed and rewound the program
    /// counter, so the same instruction executes again next tick.
    KeyWait,
    /// A recoverable fault was recorded; the instruction had no effect.
    Fault(Fault),
}

impl Vm {
    pub fn new(conf: VmConf) -> Self {
        Vm {
            cpu: Cpu::new(),
            scheduler: Scheduler::new(conf.ips.unwrap_or_default().into()),
            // Seeded once at startup; `Cxnn` draws from this for the
            // lifetime of the machine.
            rng: StdRng::from_entropy(),
            conf,
        }
    }

    /// Configuration that was used to instantiate the VM.
    pub fn config(&self) -> &VmConf {
        &self.conf
    }

    /// Copy a program into memory starting at 0x200.
    ///
    /// The whole machine record is zeroed first so a reload does not
    /// leak the previous program, and the program counter is reset.
    /// The reserved area below 0x200 stays zero.
    pub fn load_rom(&mut self, rom: &[u8]) -> VmResult<()> {
        if rom.len() > MEM_SIZE - MEM_START {
            return Err(VmError::RomTooLarge { size: rom.len() });
        }

        self.cpu = Cpu::new();
        self.cpu.ram[MEM_START..MEM_START + rom.len()].copy_from_slice(rom);
        self.scheduler.reset();

        Ok(())
    }

    /// Set the pressed state of one keypad key. Out of range key ids
    /// are ignored.
    pub fn set_key(&mut self, key: u8, pressed: bool) {
        self.cpu.set_key(key, pressed);
    }

    /// Raise the interrupt flag, stopping [`Vm::run`] before its next
    /// tick.
    pub fn interrupt(&mut self) {
        self.cpu.trap = true;
    }

    pub fn pc(&self) -> u16 {
        self.cpu.pc
    }

    pub fn index(&self) -> u16 {
        self.cpu.index
    }

    pub fn register(&self, v: u8) -> u8 {
        self.cpu.registers[v as usize & 0xF]
    }

    pub fn delay_timer(&self) -> u8 {
        self.cpu.delay_timer
    }

    pub fn sound_timer(&self) -> u8 {
        self.cpu.sound_timer
    }

    pub fn memory(&self) -> &[u8; MEM_SIZE] {
        &self.cpu.ram
    }

    pub fn display(&self) -> &[u8; DISPLAY_BUFFER_SIZE] {
        &self.cpu.display
    }

    /// Counters for the recoverable faults recorded so far.
    pub fn faults(&self) -> &FaultLog {
        &self.cpu.faults
    }
}

/// Interpreter
impl Vm {
    /// Drive the machine against a set of frontend devices.
    ///
    /// Each iteration polls the keypad, runs one paced tick, then hands
    /// the frontend the framebuffer and buzzer state. Runs until the
    /// frontend returns `false` from `poll_keys` or an embedder raises
    /// the interrupt flag.
    pub fn run(&mut self, devices: &mut impl Devices) {
        loop {
            if self.cpu.trap {
                self.cpu.trap = false;
                return;
            }
            if !devices.poll_keys(&mut self.cpu.keypad) {
                return;
            }

            self.tick();

            devices.draw(&self.cpu.display);
            devices.buzz(self.cpu.sound_timer > 0);
        }
    }

    /// One paced cycle: fetch-decode-execute, then count down timers at
    /// the 60 Hz cadence, then sleep off the rest of the instruction
    /// budget.
    pub fn tick(&mut self) -> Flow {
        let start = Instant::now();
        let flow = self.step();
        let elapsed = start.elapsed();

        // Timers count down against wall time, not instruction count.
        for _ in 0..self.scheduler.advance(elapsed) {
            self.cpu.tick_delay();
            self.cpu.tick_sound();
        }

        let budget = self.scheduler.budget(elapsed);
        if !budget.is_zero() {
            thread::sleep(budget);
        }

        flow
    }

    /// Run a fixed number of unpaced steps. Timers do not count down.
    pub fn run_steps(&mut self, step_count: usize) {
        for _ in 0..step_count {
            if self.cpu.trap {
                self.cpu.trap = false;
                return;
            }
            self.step();
        }
    }

    /// One unpaced fetch-decode-execute step.
    pub fn step(&mut self) -> Flow {
        // An instruction spanning past 0xFFF is out of range; wrap back
        // into the address space and keep going.
        if self.cpu.pc >= MEM_SIZE as u16 - 1 {
            warn!("program counter out of range: {:04X}", self.cpu.pc);
            self.cpu.pc &= ADDR_MASK;
            self.cpu.faults.record(Fault::PcOutOfRange);
        }

        let word = fetch_word(&self.cpu.ram, self.cpu.pc);
        self.cpu.pc += 2;

        self.exec(word)
    }

    fn exec(&mut self, word: u16) -> Flow {
        let Operands { op, x, y, n, nn, nnn } = decode(word);
        let (x, y) = (x as usize, y as usize);

        match op {
            // Families identified by their low byte or nibble.
            0x0 | 0xE | 0xF => self.exec_misc(word, op, x, nn),
            // 1NNN (JP addr)
            0x1 => {
                trace!("JP {nnn:03X}");
                self.cpu.pc = nnn;
                Flow::Ok
            }
            // 2NNN (CALL addr)
            //
            // Push the current program counter, jump to NNN. With a
            // full stack the call is skipped entirely.
            0x2 => {
                trace!("CALL {nnn:03X}");
                if self.cpu.sp >= STACK_SIZE {
                    warn!("stack overflow at {:03X}", self.cpu.pc.wrapping_sub(2));
                    return self.fault(Fault::StackOverflow);
                }
                self.cpu.stack[self.cpu.sp] = self.cpu.pc;
                self.cpu.sp += 1;
                self.cpu.pc = nnn;
                Flow::Ok
            }
            // 3XNN (SE Vx, byte)
            0x3 => {
                trace!("SE V{x:X}, {nn:02X}");
                if self.cpu.registers[x] == nn {
                    self.cpu.pc += 2;
                }
                Flow::Ok
            }
            // 4XNN (SNE Vx, byte)
            0x4 => {
                trace!("SNE V{x:X}, {nn:02X}");
                if self.cpu.registers[x] != nn {
                    self.cpu.pc += 2;
                }
                Flow::Ok
            }
            // 5XY0 (SE Vx, Vy)
            0x5 => {
                trace!("SE V{x:X}, V{y:X}");
                if self.cpu.registers[x] == self.cpu.registers[y] {
                    self.cpu.pc += 2;
                }
                Flow::Ok
            }
            // 6XNN (LD Vx, byte)
            0x6 => {
                trace!("LD V{x:X}, {nn:02X}");
                self.cpu.registers[x] = nn;
                Flow::Ok
            }
            // 7XNN (ADD Vx, byte)
            //
            // Wrapping add. The carry flag is not touched.
            0x7 => {
                trace!("ADD V{x:X}, {nn:02X}");
                self.cpu.registers[x] = self.cpu.registers[x].wrapping_add(nn);
                Flow::Ok
            }
            // Arithmetic family identified by N.
            0x8 => self.exec_math(word, x, y, n),
            // 9XY0 (SNE Vx, Vy)
            0x9 => {
                trace!("SNE V{x:X}, V{y:X}");
                if self.cpu.registers[x] != self.cpu.registers[y] {
                    self.cpu.pc += 2;
                }
                Flow::Ok
            }
            // ANNN (LD I, addr)
            0xA => {
                trace!("LD I, {nnn:03X}");
                self.cpu.index = nnn;
                Flow::Ok
            }
            // BNNN (JP V0, addr)
            0xB => {
                trace!("JP V0, {nnn:03X}");
                self.cpu.pc = self.cpu.registers[0] as u16 + nnn;
                Flow::Ok
            }
            // CXNN (RND Vx, byte)
            0xC => {
                trace!("RND V{x:X}, {nn:02X}");
                self.cpu.registers[x] = self.rng.gen::<u8>() & nn;
                Flow::Ok
            }
            // DXYN (DRW Vx, Vy, nibble)
            //
            // XOR-blit an 8-bit-wide, N-row sprite read from memory at
            // the address register onto the display at (Vx mod 64,
            // Vy mod 32). Pixels falling outside the frame are clipped,
            // not wrapped. VF reports whether any set pixel was erased.
            0xD => {
                trace!("DRW V{x:X}, V{y:X}, {n:X}");
                let sx = self.cpu.registers[x] as usize % DISPLAY_WIDTH;
                let sy = self.cpu.registers[y] as usize % DISPLAY_HEIGHT;
                let mut collision = false;

                for row in 0..n as usize {
                    let py = sy + row;
                    if py >= DISPLAY_HEIGHT {
                        break;
                    }
                    let sprite = self.cpu.ram[(self.cpu.index as usize + row) & ADDR_MASK as usize];

                    for col in 0..8 {
                        let px = sx + col;
                        if px >= DISPLAY_WIDTH {
                            break;
                        }
                        if sprite >> (7 - col) & 1 == 0 {
                            continue;
                        }
                        let cell = &mut self.cpu.display[py * DISPLAY_WIDTH + px];
                        collision |= *cell == 1;
                        *cell ^= 1;
                    }
                }

                // Always overwritten, even to 0.
                self.cpu.registers[0xF] = collision as u8;
                Flow::Draw
            }
            _ => self.unknown(word),
        }
    }

    /// Execute an arithmetic instruction (8XYN family).
    ///
    /// Every flag-producing arm writes VF last, so an instruction whose
    /// destination is VF itself ends up holding the flag value.
    #[inline]
    fn exec_math(&mut self, word: u16, x: usize, y: usize, n: u8) -> Flow {
        match n {
            // 8XY0 (LD Vx, Vy)
            0x0 => {
                trace!("LD V{x:X}, V{y:X}");
                self.cpu.registers[x] = self.cpu.registers[y];
            }
            // 8XY1 (OR Vx, Vy)
            0x1 => {
                trace!("OR V{x:X}, V{y:X}");
                self.cpu.registers[x] |= self.cpu.registers[y];
            }
            // 8XY2 (AND Vx, Vy)
            0x2 => {
                trace!("AND V{x:X}, V{y:X}");
                self.cpu.registers[x] &= self.cpu.registers[y];
            }
            // 8XY3 (XOR Vx, Vy)
            0x3 => {
                trace!("XOR V{x:X}, V{y:X}");
                self.cpu.registers[x] ^= self.cpu.registers[y];
            }
            // 8XY4 (ADD Vx, Vy)
            //
            // Wrapping add. VF is 1 if the unsigned sum overflowed.
            0x4 => {
                trace!("ADD V{x:X}, V{y:X}");
                let sum = self.cpu.registers[x] as u16 + self.cpu.registers[y] as u16;
                self.cpu.registers[x] = sum as u8;
                self.cpu.registers[0xF] = (sum > 0xFF) as u8;
            }
            // 8XY5 (SUB Vx, Vy)
            //
            // Wrapping subtract. VF is 1 if Vx >= Vy before the
            // subtraction (no borrow).
            0x5 => {
                trace!("SUB V{x:X}, V{y:X}");
                let (vx, vy) = (self.cpu.registers[x], self.cpu.registers[y]);
                self.cpu.registers[x] = vx.wrapping_sub(vy);
                self.cpu.registers[0xF] = (vx >= vy) as u8;
            }
            // 8XY6 (SHR Vx {, Vy})
            //
            // Source quirk: the value is copied from Vy before the
            // shift. VF receives bit 0 of the pre-shift value.
            0x6 => {
                trace!("SHR V{x:X}, V{y:X}");
                let vy = self.cpu.registers[y];
                self.cpu.registers[x] = vy >> 1;
                self.cpu.registers[0xF] = vy & 1;
            }
            // 8XY7 (SUBN Vx, Vy)
            //
            // Vx = Vy - Vx, wrapping. VF is 1 if Vy >= Vx before the
            // subtraction.
            0x7 => {
                trace!("SUBN V{x:X}, V{y:X}");
                let (vx, vy) = (self.cpu.registers[x], self.cpu.registers[y]);
                self.cpu.registers[x] = vy.wrapping_sub(vx);
                self.cpu.registers[0xF] = (vy >= vx) as u8;
            }
            // 8XYE (SHL Vx {, Vy})
            //
            // Same copy-then-shift quirk as SHR. VF receives bit 7 of
            // the pre-shift value.
            0xE => {
                trace!("SHL V{x:X}, V{y:X}");
                let vy = self.cpu.registers[y];
                self.cpu.registers[x] = vy << 1;
                self.cpu.registers[0xF] = (vy >> 7) & 1;
            }
            _ => return self.unknown(word),
        }

        Flow::Ok
    }

    /// Execute a miscellaneous instruction (0x0, 0xE and 0xF families,
    /// identified by the low byte).
    #[inline]
    fn exec_misc(&mut self, word: u16, op: u8, x: usize, nn: u8) -> Flow {
        match (op, nn) {
            // 00E0 (CLS)
            (0x0, 0xE0) => {
                trace!("CLS");
                self.cpu.clear_display();
                Flow::Draw
            }
            // 00EE (RET)
            //
            // Pop the return address into the program counter. With an
            // empty stack the state is left unchanged.
            (0x0, 0xEE) => {
                trace!("RET");
                if self.cpu.sp == 0 {
                    warn!("stack underflow at {:03X}", self.cpu.pc.wrapping_sub(2));
                    return self.fault(Fault::StackUnderflow);
                }
                self.cpu.sp -= 1;
                self.cpu.pc = self.cpu.stack[self.cpu.sp];
                Flow::Ok
            }
            // EX9E (SKP Vx)
            (0xE, 0x9E) => {
                trace!("SKP V{x:X}");
                if self.cpu.key(self.cpu.registers[x]) {
                    self.cpu.pc += 2;
                }
                Flow::Ok
            }
            // EXA1 (SKNP Vx)
            (0xE, 0xA1) => {
                trace!("SKNP V{x:X}");
                if !self.cpu.key(self.cpu.registers[x]) {
                    self.cpu.pc += 2;
                }
                Flow::Ok
            }
            // FX07 (LD Vx, DT)
            (0xF, 0x07) => {
                trace!("LD V{x:X}, DT");
                self.cpu.registers[x] = self.cpu.delay_timer;
                Flow::Ok
            }
            // FX0A (LD Vx, K)
            //
            // Block until a key is pressed. The wait is realized by
            // instruction replay: with no key down the program counter
            // is rewound by 2, so the same instruction runs again next
            // tick while the scheduler keeps ticking.
            (0xF, 0x0A) => {
                trace!("LD V{x:X}, K");
                match self.cpu.first_key() {
                    Some(key) => {
                        self.cpu.registers[x] = key;
                        Flow::Ok
                    }
                    None => {
                        self.cpu.pc = self.cpu.pc.wrapping_sub(2);
                        Flow::KeyWait
                    }
                }
            }
            // FX15 (LD DT, Vx)
            (0xF, 0x15) => {
                trace!("LD DT, V{x:X}");
                self.cpu.delay_timer = self.cpu.registers[x];
                Flow::Ok
            }
            // FX18 (LD ST, Vx)
            (0xF, 0x18) => {
                trace!("LD ST, V{x:X}");
                self.cpu.sound_timer = self.cpu.registers[x];
                Flow::Ok
            }
            // FX1E (ADD I, Vx)
            //
            // No overflow flag.
            (0xF, 0x1E) => {
                trace!("ADD I, V{x:X}");
                self.cpu.index = self.cpu.index.wrapping_add(self.cpu.registers[x] as u16);
                Flow::Ok
            }
            // FX33 (LD B, Vx)
            //
            // Store the three decimal digits of Vx at I, I+1, I+2:
            // hundreds, tens, ones.
            (0xF, 0x33) => {
                trace!("LD B, V{x:X}");
                let addr = self.cpu.index as usize;
                let vx = self.cpu.registers[x];
                self.cpu.ram[addr & ADDR_MASK as usize] = vx / 100 % 10;
                self.cpu.ram[(addr + 1) & ADDR_MASK as usize] = vx / 10 % 10;
                self.cpu.ram[(addr + 2) & ADDR_MASK as usize] = vx % 10;
                Flow::Ok
            }
            // FX55 (LD [I], Vx)
            //
            // Store registers V0 through Vx inclusive at I.
            (0xF, 0x55) => {
                trace!("LD [I], V{x:X}");
                let addr = self.cpu.index as usize;
                for v in 0..=x {
                    self.cpu.ram[(addr + v) & ADDR_MASK as usize] = self.cpu.registers[v];
                }
                Flow::Ok
            }
            // FX65 (LD Vx, [I])
            //
            // Load registers V0 through Vx inclusive from I.
            (0xF, 0x65) => {
                trace!("LD V{x:X}, [I]");
                let addr = self.cpu.index as usize;
                for v in 0..=x {
                    self.cpu.registers[v] = self.cpu.ram[(addr + v) & ADDR_MASK as usize];
                }
                Flow::Ok
            }
            _ => self.unknown(word),
        }
    }

    fn unknown(&mut self, word: u16) -> Flow {
        warn!(
            "unrecognized opcode {word:04X} at {:03X}",
            self.cpu.pc.wrapping_sub(2)
        );
        self.fault(Fault::UnknownOpcode)
    }

    fn fault(&mut self, fault: Fault) -> Flow {
        self.cpu.faults.record(fault);
        Flow::Fault(fault)
    }
}

/// Troubleshooting
impl Vm {
    /// Render the display buffer as a human readable string.
    pub fn dump_display(&self) -> Result<String, fmt::Error> {
        let mut buf = String::new();

        for y in 0..DISPLAY_HEIGHT {
            for x in 0..DISPLAY_WIDTH {
                if self.cpu.display[x + y * DISPLAY_WIDTH] != 0 {
                    write!(buf, "#")?;
                } else {
                    write!(buf, ".")?;
                }
            }
            writeln!(buf)?;
        }

        Ok(buf)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_hz_conversion() {
        let interval: Duration = Hz(60).into();
        assert_eq!(interval.as_millis(), 16);

        let unthrottled: Duration = Hz(0).into();
        assert_eq!(unthrottled, Duration::ZERO);
    }

    /// FX0A (LD Vx, K)
    ///
    /// Wait for a keypress by replaying the same instruction. The net
    /// program counter movement per step must be zero until a key is
    /// observed pressed.
    #[test]
    #[rustfmt::skip]
    fn test_key_wait() {
        let mut vm = Vm::new(VmConf::default());
        vm.load_rom(&[
            0xF1, 0x0A, // LD V1, K
            0x62, 0x42, // LD V2, 0x42  ; sentinel
        ]).unwrap();

        // machine must stall
        for _ in 0..5 {
            assert_eq!(vm.step(), Flow::KeyWait);
            assert_eq!(vm.pc(), MEM_START as u16);
        }

        vm.set_key(0x5, true);

        // machine will now advance
        assert_eq!(vm.step(), Flow::Ok);
        assert_eq!(vm.pc(), MEM_START as u16 + 2);
        assert_eq!(vm.register(1), 0x05);

        vm.step();
        assert_eq!(vm.register(2), 0x42); // sentinel
    }

    /// CXNN (RND Vx, byte)
    ///
    /// The random byte is masked with NN, so a zero mask is always 0.
    #[test]
    fn test_rand_mask() {
        let mut vm = Vm::new(VmConf::default());
        vm.load_rom(&[
            0x60, 0xAA, // LD V0, 0xAA
            0xC0, 0x00, // RND V0, 0x00
        ])
        .unwrap();

        vm.run_steps(2);
        assert_eq!(vm.register(0), 0);
    }

    struct StubDevices {
        polls: usize,
        draws: usize,
        buzzing: bool,
    }

    impl Devices for StubDevices {
        fn poll_keys(&mut self, keypad: &mut [bool; KEY_COUNT]) -> bool {
            keypad[0x5] = true;
            self.polls += 1;
            self.polls <= 3
        }

        fn draw(&mut self, _display: &[u8; DISPLAY_BUFFER_SIZE]) {
            self.draws += 1;
        }

        fn buzz(&mut self, on: bool) {
            self.buzzing = on;
        }
    }

    /// The run loop polls input before each tick and hands the frontend
    /// the framebuffer and buzzer state after it.
    #[test]
    fn test_run_loop_devices() {
        let mut vm = Vm::new(VmConf { ips: Some(Hz(0)) });
        vm.load_rom(&[
            0x60, 0x05, // LD V0, 5
            0xF0, 0x18, // LD ST, V0
            0x12, 0x04, // JP 0x204
        ])
        .unwrap();

        let mut devices = StubDevices {
            polls: 0,
            draws: 0,
            buzzing: false,
        };
        vm.run(&mut devices);

        assert_eq!(devices.polls, 4); // fourth poll requested shutdown
        assert_eq!(devices.draws, 3);
        assert!(devices.buzzing);
    }

    /// The interrupt flag stops the run loop before the next tick.
    #[test]
    fn test_interrupt_stops_run() {
        let mut vm = Vm::new(VmConf { ips: Some(Hz(0)) });
        vm.load_rom(&[0x12, 0x00]).unwrap(); // JP 0x200
        vm.interrupt();

        let mut devices = StubDevices {
            polls: 0,
            draws: 0,
            buzzing: false,
        };
        vm.run(&mut devices);

        assert_eq!(devices.polls, 0);
        assert_eq!(vm.pc(), MEM_START as u16);
    }

    /// A program counter past the end of memory is wrapped and counted,
    /// not a crash.
    #[test]
    fn test_pc_out_of_range() {
        let mut vm = Vm::new(VmConf::default());
        vm.load_rom(&[
            0x1F, 0xFF, // JP 0xFFF
        ])
        .unwrap();

        // Second step fetches at 0xFFF, which spans past the end of
        // memory.
        vm.run_steps(2);
        assert_eq!(vm.faults().pc_out_of_range, 1);

        // The counter keeps wrapping back into range on later steps.
        vm.run_steps(1);
        assert_eq!(vm.faults().pc_out_of_range, 2);
        assert_eq!(vm.pc(), 0x003);
    }
}
