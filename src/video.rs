// The LSPC. VRAM register traffic, the raster-interrupt timer, and the
// sprite / fix-layer compositor that renders into a 352x256 host buffer
// with the visible area at (16,16)-(336,240).

use crate::memory::PAL_SENTINEL;
use crate::neogeo::Machine;
use crate::roms::{PenUsage, RomSet};
use bitflags::bitflags;

pub const BUFFER_WIDTH: usize = 352;
pub const BUFFER_HEIGHT: usize = 256;
pub const VISIBLE_WIDTH: i32 = 320;
pub const VISIBLE_HEIGHT: i32 = 224;
pub const RASTER_LINES: i32 = 261;

pub const REG_VRAMADDR: u32 = 0x3C0000;
pub const REG_VRAMRW: u32 = 0x3C0002;
pub const REG_VRAMMOD: u32 = 0x3C0004;
pub const REG_LSPCMODE: u32 = 0x3C0006;
pub const REG_TIMERHIGH: u32 = 0x3C0008;
pub const REG_TIMERLOW: u32 = 0x3C000A;
pub const REG_IRQACK: u32 = 0x3C000C;
pub const REG_TIMERSTOP: u32 = 0x3C000E;

// VRAM word layout
const SCB1: usize = 0x0000;
const FIX_MAP: usize = 0x7000;
const SCB2_SHRINK: usize = 0x8000;
const SCB3_Y: usize = 0x8200;
const SCB4_X: usize = 0x8400;

pub const NB_SPRITES: usize = 381;

bitflags! {
    pub struct Irq2Control: u8 {
        const ANIM_STOP     = 0x08;
        const TIMER_ENABLE  = 0x10;
        const RELOAD_WRITE  = 0x20;
        const RELOAD_VBLANK = 0x40;
        const RELOAD_FIRE   = 0x80;
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FixSource {
    Board,
    Cartridge,
}

pub struct Video {
    /// 64K words of video RAM: sprite tilemaps, fix name table, SCB2-4.
    pub ram: Vec<u16>,
    pub pal_neo: [Vec<u16>; 2],
    pub pal_host: [Vec<u32>; 2],
    pub currentpal: usize,
    pub currentfix: FixSource,
    /// Read latch: VRAMADDR/VRAMRW reads return the previously latched word.
    pub rbuf: u16,
    /// Auto-animation counter and its field divider.
    pub frame_counter: u32,
    pub frame_counter_speed: u32,
    fc: u32,
    pub vptr: u32,
    pub modulo: i16,
    pub irq2control: Irq2Control,
    pub irq2taken: bool,
    pub irq2start: i32,
    pub irq2pos: u32,
    pub current_line: i32,
    pub last_line: i32,
    pub buffer: Vec<u32>,
}

impl Video {
    pub fn new() -> Video {
        Video {
            ram: vec![0; 0x10000],
            pal_neo: [vec![0; 0x1000], vec![0; 0x1000]],
            pal_host: [vec![PAL_SENTINEL; 0x1000], vec![PAL_SENTINEL; 0x1000]],
            currentpal: 0,
            currentfix: FixSource::Board,
            rbuf: 0,
            frame_counter: 0,
            frame_counter_speed: 1,
            fc: 0,
            vptr: 0,
            modulo: 0,
            irq2control: Irq2Control::empty(),
            irq2taken: false,
            irq2start: -1,
            irq2pos: 0,
            current_line: 0,
            last_line: 0,
            buffer: vec![0; BUFFER_WIDTH * BUFFER_HEIGHT],
        }
    }

    pub fn store_register(&mut self, address: u32, data: u16) {
        match address {
            REG_VRAMADDR => {
                self.vptr = data as u32;
                self.rbuf = self.ram[(self.vptr & 0xFFFF) as usize];
            }
            REG_VRAMRW => {
                self.ram[(self.vptr & 0xFFFF) as usize] = data;
                self.vptr = (self.vptr & 0x8000)
                    + ((self.vptr as i32 + self.modulo as i32) as u32 & 0x7FFF);
                self.rbuf = self.ram[(self.vptr & 0xFFFF) as usize];
            }
            REG_VRAMMOD => {
                let value = if data & 0x4000 != 0 { data | 0x8000 } else { data & 0x7FFF };
                self.modulo = value as i16;
            }
            REG_LSPCMODE => {
                self.frame_counter_speed = ((data >> 8) & 0xFF) as u32 + 1;
                self.irq2control = Irq2Control::from_bits_truncate(data as u8);
            }
            REG_TIMERHIGH => {
                let pos = (self.irq2pos & 0xFFFF) | (data as u32) << 16;
                self.write_irq2pos(pos);
            }
            REG_TIMERLOW => {
                let pos = (self.irq2pos & 0xFFFF0000) | data as u32;
                self.write_irq2pos(pos);
            }
            REG_IRQACK => {
                // level latches are not modelled; delivery is immediate
                log::trace!("irq acknowledge {:x}", data);
            }
            REG_TIMERSTOP => {
                log::trace!("timer stop {:x}", data);
            }
            _ => {
                log::error!("unknown video store at {:x}, value = {:x}", address, data);
            }
        }
    }

    fn write_irq2pos(&mut self, data: u32) {
        self.irq2pos = data;
        if self.irq2control.contains(Irq2Control::RELOAD_WRITE) {
            let line = ((self.irq2pos.wrapping_add(0x3B)) / 0x180) as i32;
            self.irq2start = line + self.current_line;
        }
    }

    /// Per-scanline raster bookkeeping. Returns whether IRQ2 fired and, if
    /// so, the visible band that must be redrawn before the program reacts.
    pub fn update_scanline(&mut self) -> (bool, Option<(i32, i32)>) {
        self.irq2taken = false;
        if self.irq2control.contains(Irq2Control::TIMER_ENABLE)
            && self.current_line == self.irq2start
        {
            if self.irq2control.contains(Irq2Control::RELOAD_FIRE) {
                self.irq2start += ((self.irq2pos.wrapping_add(3)) / 0x180) as i32;
            }
            self.irq2taken = true;
        }
        let mut band = None;
        if self.irq2taken {
            if self.last_line >= 21 && self.current_line >= 20 {
                band = Some((self.last_line - 21, self.current_line - 20));
            }
            self.last_line = self.current_line;
        }
        self.current_line += 1;
        (self.irq2taken, band)
    }

    /// VBLANK side of the LSPC: advance the auto-animation counter and
    /// reload the raster timer when programmed to do so.
    pub fn vblank(&mut self) {
        if !self.irq2control.contains(Irq2Control::ANIM_STOP) {
            if self.fc >= self.frame_counter_speed {
                self.fc = 0;
                self.frame_counter = self.frame_counter.wrapping_add(1);
            }
            self.fc += 1;
        }
        if self.irq2control.contains(Irq2Control::RELOAD_VBLANK) {
            self.irq2start = ((self.irq2pos.wrapping_add(0x3B)) / 0x180) as i32;
        }
    }

    fn backdrop(&self) -> u32 {
        self.pal_host[self.currentpal][0xFFF]
    }

    pub fn draw_screen(&mut self, roms: &RomSet) {
        let backdrop = self.backdrop();
        for pixel in self.buffer.iter_mut() {
            *pixel = backdrop;
        }
        self.draw_sprites_band(roms, 0, VISIBLE_HEIGHT);
        self.draw_fix_band(roms, 0, VISIBLE_HEIGHT);
    }

    /// Redraw only the visible lines in [start, end).
    pub fn draw_screen_scanline(&mut self, start: i32, end: i32, roms: &RomSet) {
        let backdrop = self.backdrop();
        let start = start.max(0).min(VISIBLE_HEIGHT);
        let end = end.max(0).min(VISIBLE_HEIGHT);
        for line in start..end {
            let row = (line + 16) as usize * BUFFER_WIDTH;
            for pixel in self.buffer[row..row + BUFFER_WIDTH].iter_mut() {
                *pixel = backdrop;
            }
        }
        self.draw_sprites_band(roms, start, end);
        self.draw_fix_band(roms, start, end);
    }

    fn draw_sprites_band(&mut self, roms: &RomSet, band_start: i32, band_end: i32) {
        let mut y = 0i32;
        let mut x = 0i32;
        let mut tiles = 0u32;
        let mut vzoom = 0xFFu32;
        let mut hshrink = 0xFu32;
        for sprite in 0..NB_SPRITES {
            let shrink_w = self.ram[SCB2_SHRINK + sprite];
            let y_w = self.ram[SCB3_Y + sprite];
            let x_w = self.ram[SCB4_X + sprite];
            let sticky = y_w & 0x40 != 0;
            if sticky {
                // chained sprite: same vertical placement, next column over
                x = (x + hshrink as i32 + 1) & 0x1FF;
            } else {
                vzoom = (shrink_w & 0xFF) as u32;
                hshrink = ((shrink_w >> 8) & 0xF) as u32;
                y = 496 - (y_w >> 7) as i32;
                tiles = (y_w & 0x3F) as u32;
                x = (x_w >> 7) as i32;
            }
            if tiles == 0 {
                continue;
            }
            let full = (tiles * 16).min(512);
            let span = ((vzoom + 1) * full) >> 8;
            for dy in 0..span as i32 {
                let line = (y + dy) & 0x1FF;
                if line < band_start || line >= band_end {
                    continue;
                }
                let pos = roms.zoom_entry(vzoom as usize, (dy & 0xFF) as usize) as u32;
                let mut tile = (pos >> 4) + ((dy as u32) >> 8) * 16;
                if tile >= tiles {
                    tile %= tiles.max(1);
                }
                let w0 = self.ram[SCB1 + (sprite << 6) + tile as usize * 2];
                let w1 = self.ram[SCB1 + (sprite << 6) + tile as usize * 2 + 1];
                let mut tileno = w0 as u32 | (((w1 >> 4) & 0xF) as u32) << 16;
                if w1 & 0x8 != 0 {
                    tileno = (tileno & !7) | (self.frame_counter & 7);
                } else if w1 & 0x4 != 0 {
                    tileno = (tileno & !3) | (self.frame_counter & 3);
                }
                if roms.sprite_usage(tileno) == PenUsage::Invisible {
                    continue;
                }
                let palette = ((w1 >> 8) & 0xFF) as usize;
                let hflip = w1 & 0x1 != 0;
                let vflip = w1 & 0x2 != 0;
                let mut row = (pos & 0xF) as usize;
                if vflip {
                    row = 15 - row;
                }
                let data = match roms.sprite_tile_row(tileno, row) {
                    Some(data) => data,
                    None => continue,
                };
                let out_row = (line + 16) as usize * BUFFER_WIDTH;
                for dx in 0..=hshrink as i32 {
                    let mut col = (roms.zoom_entry(hshrink as usize, dx as usize) >> 4) as usize;
                    if hflip {
                        col = 15 - col;
                    }
                    let byte = data[col >> 1];
                    let pen = if col & 1 != 0 { byte & 0xF } else { byte >> 4 };
                    if pen == 0 {
                        continue;
                    }
                    let px = (x + dx) & 0x1FF;
                    if px >= VISIBLE_WIDTH {
                        continue;
                    }
                    self.buffer[out_row + (px + 16) as usize] =
                        self.pal_host[self.currentpal][palette * 16 + pen as usize];
                }
            }
        }
    }

    fn draw_fix_band(&mut self, roms: &RomSet, band_start: i32, band_end: i32) {
        let (fix_rom, usage) = match self.currentfix {
            FixSource::Board => (&roms.fix_board, &roms.fix_board_usage),
            FixSource::Cartridge => (&roms.fix_cartridge, &roms.fix_cartridge_usage),
        };
        for cy in 0..32usize {
            for r in 0..8usize {
                let line = (cy * 8 + r) as i32 - 16;
                if line < band_start || line >= band_end {
                    continue;
                }
                let out_row = (line + 16) as usize * BUFFER_WIDTH;
                for cx in 0..40usize {
                    let word = self.ram[FIX_MAP + cx * 32 + cy];
                    let tile = (word & 0xFFF) as usize;
                    let palette = (word >> 12) as usize;
                    if usage.get(tile).copied().unwrap_or(PenUsage::Invisible)
                        == PenUsage::Invisible
                    {
                        continue;
                    }
                    let offset = tile * 32 + r * 4;
                    let data = match fix_rom.get(offset..offset + 4) {
                        Some(data) => data,
                        None => continue,
                    };
                    for px in 0..8usize {
                        let byte = data[px >> 1];
                        let pen = if px & 1 != 0 { byte & 0xF } else { byte >> 4 };
                        if pen == 0 {
                            continue;
                        }
                        self.buffer[out_row + 16 + cx * 8 + px] =
                            self.pal_host[self.currentpal][palette * 16 + pen as usize];
                    }
                }
            }
        }
    }
}

impl Machine {
    /// Raster step: one scanline of bookkeeping, plus the band redraw when
    /// the timer fires. Returns whether IRQ2 must be delivered.
    pub fn step_scanline(&mut self) -> bool {
        let (taken, band) = self.video.update_scanline();
        if let Some((start, end)) = band {
            let Machine { ref mut video, ref roms, .. } = *self;
            video.draw_screen_scanline(start, end, roms);
        }
        taken
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vram_modulo_autoincrement() {
        let mut video = Video::new();
        video.store_register(REG_VRAMMOD, 2);
        video.store_register(REG_VRAMADDR, 0x8100);
        for i in 0..4u16 {
            video.store_register(REG_VRAMRW, 0x1111 * (i + 1));
        }
        // bit 15 is preserved, the low 15 bits advance by the modulo
        assert_eq!(video.vptr, 0x8108);
        assert_eq!(video.ram[0x8100], 0x1111);
        assert_eq!(video.ram[0x8102], 0x2222);
        assert_eq!(video.ram[0x8104], 0x3333);
        assert_eq!(video.ram[0x8106], 0x4444);
        // the latch follows the cursor
        assert_eq!(video.rbuf, video.ram[0x8108]);
    }

    #[test]
    fn vram_modulo_sign_extension() {
        let mut video = Video::new();
        video.store_register(REG_VRAMMOD, 0x7FFF);
        assert_eq!(video.modulo, 0x7FFF);
        video.store_register(REG_VRAMMOD, 0x4000);
        assert_eq!(video.modulo as u16, 0xC000);
        video.store_register(REG_VRAMMOD, 0xFFFF);
        assert_eq!(video.modulo, -1);
        video.store_register(REG_VRAMADDR, 0x0010);
        video.store_register(REG_VRAMRW, 0xAAAA);
        assert_eq!(video.vptr, 0x000F);
    }

    #[test]
    fn lspc_mode_splits_speed_and_control() {
        let mut video = Video::new();
        video.store_register(REG_LSPCMODE, 0x0390);
        assert_eq!(video.frame_counter_speed, 4);
        assert!(video.irq2control.contains(Irq2Control::TIMER_ENABLE));
        assert!(video.irq2control.contains(Irq2Control::RELOAD_FIRE));
    }

    #[test]
    fn raster_timer_fires_every_hundred_lines() {
        let mut video = Video::new();
        // enable + reload-on-write + reload-after-fire, 0x180 ticks per line
        video.store_register(REG_LSPCMODE, 0x00B0);
        video.store_register(REG_TIMERHIGH, 0x0000);
        video.store_register(REG_TIMERLOW, 0x9600);
        assert_eq!(video.irq2start, 100);
        let mut fired = Vec::new();
        for line in 0..264 {
            let (taken, _) = video.update_scanline();
            if taken {
                fired.push(line);
            }
        }
        assert_eq!(fired, vec![100, 200]);
    }

    #[test]
    fn auto_animation_advances_with_divider() {
        let mut video = Video::new();
        video.store_register(REG_LSPCMODE, 0x0100); // speed divider of 2
        assert_eq!(video.frame_counter_speed, 2);
        let before = video.frame_counter;
        for _ in 0..9 {
            video.vblank();
        }
        // the divider lets the counter tick once every two fields
        assert_eq!(video.frame_counter - before, 4);
        // bit 3 freezes the counter
        video.store_register(REG_LSPCMODE, 0x0108);
        let frozen = video.frame_counter;
        for _ in 0..8 {
            video.vblank();
        }
        assert_eq!(video.frame_counter, frozen);
    }
}
