// The machine itself: every piece of mutable state lives here, and the
// field scheduler interleaves the 68000, the sound CPU, the sound chip and
// the LSPC against the fixed per-field cycle budgets.

use crate::decoder::{DecodeTables, IpcCache};
use crate::devices::{Inputs, NullSoundChip, NullSoundCpu, SoundChip, SoundCpu, SoundMailbox};
use crate::memory::Pages;
use crate::pd4990a::Pd4990a;
use crate::processor::Cpu;
use crate::roms::RomSet;
use crate::video::Video;
use crate::{Configuration, CoreError};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// 68000 cycles per field.
pub const CPU_68K_TIMESLICE: u32 = 200_000;
/// Z80 cycles per field, drained in NB_INTERLACE sub-slices.
pub const CPU_Z80_TIMESLICE: u32 = 73_333;
pub const NB_INTERLACE: u32 = 256;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SystemType {
    Mvs,
    Aes,
}

impl SystemType {
    /// Driver descriptors encode the system as a byte; anything unknown
    /// falls back to the arcade board.
    pub fn from_code(code: u8) -> SystemType {
        match code {
            0 => SystemType::Aes,
            1 => SystemType::Mvs,
            _ => {
                log::warn!("invalid system type {}, assuming MVS", code);
                SystemType::Mvs
            }
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VectorSource {
    BiosVectors,
    GameVectors,
}

pub fn mvs() -> Configuration {
    Configuration { system: SystemType::Mvs, pal: false, raster: false }
}

pub fn aes() -> Configuration {
    Configuration { system: SystemType::Aes, pal: false, raster: false }
}

/// Frame-skip state: when the host falls behind the field cadence, whole
/// draws are omitted while the machine state stays exact.
pub struct FrameSkip {
    pub enabled: bool,
    skipped: u32,
    deadline: Instant,
    frame: Duration,
}

impl FrameSkip {
    pub fn new(fields_per_second: u32) -> FrameSkip {
        FrameSkip {
            enabled: false,
            skipped: 0,
            deadline: Instant::now(),
            frame: Duration::from_nanos(1_000_000_000 / fields_per_second as u64),
        }
    }
    pub fn reset(&mut self) {
        self.skipped = 0;
        self.deadline = Instant::now();
    }
    /// Decide whether the upcoming draw can be dropped.
    pub fn tick(&mut self) -> bool {
        self.deadline += self.frame;
        if !self.enabled {
            return false;
        }
        let late = Instant::now() > self.deadline + self.frame;
        if late && self.skipped < 8 {
            self.skipped += 1;
            true
        } else {
            self.skipped = 0;
            false
        }
    }
    /// Host-side pacing: wait out the rest of the field.
    pub fn cap(&self) {
        let now = Instant::now();
        if now < self.deadline {
            std::thread::sleep(self.deadline - now);
        }
    }
}

pub struct Scheduler {
    /// Cycles the previous 68K slice overshot by.
    pub leftover: u32,
    pub frame_skip: FrameSkip,
}

impl Scheduler {
    fn new(fields_per_second: u32) -> Scheduler {
        Scheduler { leftover: 0, frame_skip: FrameSkip::new(fields_per_second) }
    }
}

pub struct Machine {
    pub cpu: Cpu,
    pub tables: Rc<DecodeTables>,
    pub cache: IpcCache,
    pub pages: Pages,
    pub roms: RomSet,
    pub ram: Vec<u8>,
    pub sram: Vec<u8>,
    pub memcard: Vec<u8>,
    pub video: Video,
    pub rtc: Pd4990a,
    pub inputs: Inputs,
    pub mailbox: SoundMailbox,
    pub sound_cpu: Box<dyn SoundCpu>,
    pub sound_chip: Box<dyn SoundChip>,
    /// Base of the cartridge window at 0x200000.
    pub bank: u32,
    pub sram_lock: bool,
    pub watchdog: u32,
    pub current_vector: VectorSource,
    pub game_vector: [u8; 0x80],
    pub sma_rng: u16,
    pub config: Configuration,
    pub scheduler: Scheduler,
}

impl Machine {
    pub fn new(config: Configuration, roms: RomSet) -> Result<Machine, CoreError> {
        let tables = Rc::new(DecodeTables::build()?);
        let roms = roms.finish()?;
        let mut game_vector = [0u8; 0x80];
        game_vector.copy_from_slice(&roms.cartridge[..0x80]);
        let mut rtc = Pd4990a::new();
        rtc.seed_from_host();
        let fields_per_second = if config.pal { 50 } else { 60 };
        let mut machine = Machine {
            cpu: Cpu::new(),
            tables,
            cache: IpcCache::new(),
            pages: Pages::build(),
            roms,
            ram: vec![0; 0x10000],
            sram: vec![0; 0x10000],
            memcard: vec![0; 2048],
            video: Video::new(),
            rtc,
            inputs: Inputs::new(config.system == SystemType::Mvs),
            mailbox: SoundMailbox::new(),
            sound_cpu: Box::new(NullSoundCpu),
            sound_chip: Box::new(NullSoundChip),
            bank: 0,
            sram_lock: false,
            watchdog: 0,
            current_vector: VectorSource::GameVectors,
            game_vector,
            sma_rng: 0x2345,
            config,
            scheduler: Scheduler::new(fields_per_second),
        };
        machine.update_all_pal();
        machine.reset();
        Ok(machine)
    }

    pub fn set_sound_cpu(&mut self, cpu: Box<dyn SoundCpu>) {
        self.sound_cpu = cpu;
    }

    pub fn set_sound_chip(&mut self, chip: Box<dyn SoundChip>) {
        self.sound_chip = chip;
    }

    /// System reset: mailbox and SRAM lock drop, the bank register returns
    /// to the first switchable bank, and the CPU takes its reset vector.
    pub fn reset(&mut self) {
        self.sram_lock = false;
        self.sound_cpu.reset(&mut self.mailbox);
        self.bank = if self.roms.cartridge.len() > 0x100000 { 0x100000 } else { 0 };
        self.cpu_reset();
    }

    pub fn lines_per_field(&self) -> u32 {
        if self.config.pal {
            264
        } else {
            262
        }
    }

    /// Run one complete field: Z80/YM interleave, the 68K budget (split per
    /// line when raster interrupts are in use), then the VBLANK epilogue.
    pub fn run_field(&mut self) {
        let z80_slice = CPU_Z80_TIMESLICE / NB_INTERLACE;
        for _ in 0..NB_INTERLACE {
            self.sound_cpu.run(&mut self.mailbox, z80_slice);
            self.sound_chip.update();
        }

        if self.config.raster {
            let lines = self.lines_per_field();
            let per_line = CPU_68K_TIMESLICE / lines;
            self.video.current_line = 0;
            self.video.last_line = 0;
            for _ in 0..lines {
                let budget = per_line.saturating_sub(self.scheduler.leftover);
                self.scheduler.leftover = self.run_68k(budget);
                if self.step_scanline() {
                    self.interrupt(2);
                }
            }
            let budget = per_line.saturating_sub(self.scheduler.leftover);
            self.scheduler.leftover = self.run_68k(budget);
        } else {
            let budget = CPU_68K_TIMESLICE.saturating_sub(self.scheduler.leftover);
            self.scheduler.leftover = self.run_68k(budget);
        }

        self.vblank();
    }

    fn vblank(&mut self) {
        self.rtc.add_retrace(if self.config.pal { 50 } else { 60 });
        self.video.vblank();
        let skip = self.scheduler.frame_skip.tick();
        if !skip {
            let Machine { ref mut video, ref roms, .. } = *self;
            video.draw_screen(roms);
        }
        self.watchdog += 1;
        if self.watchdog > 7 {
            log::info!("watchdog reset {}", self.watchdog);
            self.watchdog = 0;
            self.cpu_reset();
        }
        self.interrupt(1);
    }
}

#[cfg(test)]
pub(crate) mod harness {
    use super::*;
    use crate::roms::RomSet;

    /// A machine with a 1 MiB cartridge whose reset vector points at 0x100
    /// and whose stack lives in work RAM.
    pub fn machine_with(program: &[(usize, u16)]) -> Machine {
        let mut cartridge = vec![0u8; 0x100000];
        let mut put = |addr: usize, word: u16| {
            cartridge[addr] = (word >> 8) as u8;
            cartridge[addr + 1] = word as u8;
        };
        put(0, 0x0010);
        put(2, 0xF300);
        put(4, 0x0000);
        put(6, 0x0100);
        for &(addr, word) in program {
            put(addr, word);
        }
        let mut roms = RomSet::new();
        roms.cartridge = cartridge;
        roms.bios = vec![0; 0x20000];
        roms.zoom_table = RomSet::linear_zoom_table();
        Machine::new(crate::Configuration { system: SystemType::Mvs, pal: false, raster: false }, roms)
            .expect("test machine")
    }

    /// Build the machine and run until the program reaches its STOP.
    pub fn run(program: &[(usize, u16)]) -> Machine {
        let mut m = machine_with(program);
        m.run_68k(20_000);
        assert!(m.cpu.stop, "program did not stop");
        m
    }
}
