mod bytecode;
mod clock;
pub mod constants;
mod cpu;
mod devices;
mod error;
mod vm;

pub use self::vm::Hz;

pub mod prelude {
    pub use super::{
        constants::{DISPLAY_BUFFER_SIZE, DISPLAY_HEIGHT, DISPLAY_WIDTH, KEY_COUNT},
        cpu::{Fault, FaultLog},
        devices::{Devices, KEY_LAYOUT},
        error::{VmError, VmResult},
        vm::{Flow, Hz, Vm, VmConf},
    };
}
