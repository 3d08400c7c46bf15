// ROM regions as delivered by a loader/driver front-end, plus the derived
// tables the renderer needs: per-tile pen usage and the zoom lookup ROM.
//
// All program regions keep their big-endian byte order; the bus decodes on
// read. Sprite tiles are expected as 128 bytes per 16x16 tile (16 rows of
// 8 bytes, two pixels per byte, high nibble first); fix tiles as 32 bytes
// per 8x8 character in the same packing.

use crate::CoreError;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PenUsage {
    /// Entirely pen 0: the compositor skips the tile outright.
    Invisible,
    Normal,
}

/// Scrambled-bank (SMA) cartridge description. `unscramble[0]` is the low
/// byte of the magic write address; the other six entries are the source
/// bit of each selector bit. The selector indexes `offsets`.
pub struct SmaProtection {
    pub unscramble: [u8; 7],
    pub offsets: Vec<u32>,
    pub rng_addr: u16,
}

pub struct RomSet {
    pub cartridge: Vec<u8>,
    pub bios: Vec<u8>,
    pub fix_cartridge: Vec<u8>,
    pub fix_board: Vec<u8>,
    pub sprites: Vec<u8>,
    /// The "LO" zoom lookup ROM: row z, entry i gives the source position
    /// (in 1/256ths of the sprite) shown at destination line/column i.
    pub zoom_table: Vec<u8>,
    pub sound_program: Vec<u8>,
    pub sound_bios: Vec<u8>,
    pub samples_a: Vec<u8>,
    pub samples_b: Vec<u8>,
    pub sprite_usage: Vec<PenUsage>,
    pub fix_cartridge_usage: Vec<PenUsage>,
    pub fix_board_usage: Vec<PenUsage>,
    pub sma: Option<SmaProtection>,
}

impl RomSet {
    pub fn new() -> RomSet {
        RomSet {
            cartridge: Vec::new(),
            bios: Vec::new(),
            fix_cartridge: Vec::new(),
            fix_board: Vec::new(),
            sprites: Vec::new(),
            zoom_table: Vec::new(),
            sound_program: Vec::new(),
            sound_bios: Vec::new(),
            samples_a: Vec::new(),
            samples_b: Vec::new(),
            sprite_usage: Vec::new(),
            fix_cartridge_usage: Vec::new(),
            fix_board_usage: Vec::new(),
            sma: None,
        }
    }

    /// Validate the mandatory regions and precompute the usage tables.
    pub fn finish(mut self) -> Result<RomSet, CoreError> {
        if self.cartridge.len() < 0x100 {
            return Err(CoreError::MissingRegion { region: "main cpu cartridge" });
        }
        if self.bios.len() < 0x80 {
            return Err(CoreError::MissingRegion { region: "main cpu bios" });
        }
        self.sprite_usage = pen_usage(&self.sprites, 128);
        self.fix_cartridge_usage = pen_usage(&self.fix_cartridge, 32);
        self.fix_board_usage = pen_usage(&self.fix_board, 32);
        Ok(self)
    }

    pub fn sprite_usage(&self, tile: u32) -> PenUsage {
        self.sprite_usage.get(tile as usize).copied().unwrap_or(PenUsage::Invisible)
    }

    /// One 16-pixel row of a sprite tile, 2 pixels per byte.
    pub fn sprite_tile_row(&self, tile: u32, row: usize) -> Option<&[u8]> {
        let offset = tile as usize * 128 + row * 8;
        self.sprites.get(offset..offset + 8)
    }

    pub fn zoom_entry(&self, zoom: usize, index: usize) -> u8 {
        self.zoom_table.get(zoom * 256 + index).copied().unwrap_or(0)
    }

    /// A synthetic LO ROM that spreads each zoom row linearly over the full
    /// source range; row 0xFF is the identity.
    pub fn linear_zoom_table() -> Vec<u8> {
        let mut table = vec![0u8; 0x10000];
        for zoom in 0..256usize {
            for index in 0..=zoom {
                table[zoom * 256 + index] = (index * 256 / (zoom + 1)) as u8;
            }
        }
        table
    }
}

fn pen_usage(tiles: &[u8], tile_bytes: usize) -> Vec<PenUsage> {
    tiles
        .chunks(tile_bytes)
        .map(|tile| {
            if tile.iter().all(|&b| b == 0) {
                PenUsage::Invisible
            } else {
                PenUsage::Normal
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pen_usage_classifies_tiles() {
        let mut sprites = vec![0u8; 256];
        sprites[128] = 0x10;
        let usage = pen_usage(&sprites, 128);
        assert_eq!(usage, vec![PenUsage::Invisible, PenUsage::Normal]);
    }

    #[test]
    fn linear_zoom_identity_row() {
        let table = RomSet::linear_zoom_table();
        for i in 0..256usize {
            assert_eq!(table[0xFF * 256 + i], i as u8);
        }
        // a half-height row spreads over the full source range
        assert_eq!(table[0x7F * 256], 0);
        assert_eq!(table[0x7F * 256 + 0x7F], 0xFE);
    }

    #[test]
    fn missing_regions_are_reported() {
        let set = RomSet::new();
        assert!(set.finish().is_err());
    }
}
