mod conversions;
pub mod fields;
mod iibs;
pub mod decoder;
mod exec;
pub mod processor;
pub mod memory;
pub mod video;
pub mod pd4990a;
pub mod devices;
pub mod sound;
pub mod roms;
pub mod neogeo;

use devices::Signal;
use neogeo::{Machine, SystemType};
use processor::Debugger;
use roms::RomSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("cpu definition #{family} incorrect ({bitmap:#06x})")]
    DecoderMask { family: usize, bitmap: u16 },
    #[error("cpu definition #{family} conflicts ({opcode:#06x})")]
    DecoderCollision { family: usize, opcode: u16 },
    #[error("instruction count not verified ({found}/{expected})")]
    DecoderCount { expected: usize, found: usize },
    #[error("missing rom region: {region}")]
    MissingRegion { region: &'static str },
}

#[derive(Debug, Copy, Clone)]
pub struct Configuration {
    pub system: SystemType,
    pub pal: bool,
    pub raster: bool,
}

pub struct Emulator {
    pub machine: Machine,
}

impl Emulator {
    pub fn new(config: Configuration, roms: RomSet) -> Result<Emulator, CoreError> {
        Ok(Emulator { machine: Machine::new(config, roms)? })
    }

    /// Emulate one field (1/60th of a second, 1/50th in PAL mode).
    pub fn run_field(&mut self) {
        self.machine.run_field();
    }

    /// The 352x256 RGB back-buffer; the visible rect is (16,16)-(336,240).
    pub fn frame(&self) -> &[u32] {
        &self.machine.video.buffer
    }

    /// Drop into the interactive debugger until it is quit.
    pub fn run_debugger(&mut self) {
        let mut debugger = Debugger::new();
        loop {
            match debugger.update(&mut self.machine) {
                Signal::Quit => break,
                _ => {}
            }
        }
    }
}
