//! Entrypoint for CLI
use std::{env, error::Error, fs, process};

use log::{error, info};
use okto::prelude::*;

static USAGE: &str = r#"
usage: okto ROM

Runs the target Chip-8 ROM file. The machine keeps running until the
process is stopped.
"#;

/// Headless frontend: no keys are ever pressed and the output devices
/// are discarded.
struct Headless;

impl Devices for Headless {
    fn poll_keys(&mut self, _keypad: &mut [bool; KEY_COUNT]) -> bool {
        true
    }

    fn draw(&mut self, _display: &[u8; DISPLAY_BUFFER_SIZE]) {}

    fn buzz(&mut self, _on: bool) {}
}

fn run_rom(filepath: &str) -> Result<(), Box<dyn Error>> {
    let rom = fs::read(filepath)
        .map_err(|err| format!("error opening file {filepath}: {err}"))?;

    let mut vm = Vm::new(VmConf::default());
    vm.load_rom(&rom)?;
    info!("loaded {} byte ROM from {filepath}", rom.len());

    let mut devices = Headless;
    vm.run(&mut devices);

    // Reached through Vm::interrupt; leave the last frame on stdout.
    println!("{}", vm.dump_display()?);
    if vm.faults().total() > 0 {
        info!("run recorded {} recoverable faults", vm.faults().total());
    }

    Ok(())
}

fn main() {
    simple_logger::SimpleLogger::new().env().init().unwrap();

    let Some(filepath) = parse_args() else {
        print_usage();
        // FreeBSD EX_USAGE (64)
        process::exit(64);
    };

    if let Err(err) = run_rom(&filepath) {
        error!("{err}");
        process::exit(1);
    }
}

/// One positional argument: the ROM file path.
fn parse_args() -> Option<String> {
    env::args().nth(1)
}

fn print_usage() {
    println!("{USAGE}");
}
