//! Result and errors.
use std::fmt::{self, Display, Formatter};
use std::io;

use crate::constants::*;

pub type VmResult<T> = std::result::Result<T, VmError>;

/// Fatal startup errors.
///
/// Runtime faults are deliberately not represented here; they are
/// recoverable and tracked by [`crate::prelude::FaultLog`] instead.
#[derive(Debug)]
pub enum VmError {
    /// Attempt to load a ROM that can't fit in the program area.
    RomTooLarge { size: usize },
    /// ROM file could not be read.
    Io(io::Error),
    Fmt(fmt::Error),
}

impl Display for VmError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::RomTooLarge { size } => write!(
                f,
                "ROM is {size} bytes but only {} bytes of program memory are available",
                MEM_SIZE - MEM_START
            ),
            Self::Io(err) => write!(f, "{}", err),
            Self::Fmt(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for VmError {}

impl From<io::Error> for VmError {
    fn from(err: io::Error) -> Self {
        VmError::Io(err)
    }
}

impl From<fmt::Error> for VmError {
    fn from(err: fmt::Error) -> Self {
        VmError::Fmt(err)
    }
}
