use neomvs::devices::{SoundCpu, SoundMailbox};
use neomvs::fields::{FLAG_C, FLAG_N, FLAG_V, FLAG_Z};
use neomvs::memory::convert_pal;
use neomvs::neogeo::{self, Machine};
use neomvs::processor::CCR;
use neomvs::roms::{RomSet, SmaProtection};
use std::cell::RefCell;
use std::rc::Rc;

fn cart(size: usize, words: &[(usize, u16)]) -> Vec<u8> {
    let mut cart = vec![0u8; size];
    for &(addr, word) in words {
        cart[addr] = (word >> 8) as u8;
        cart[addr + 1] = word as u8;
    }
    cart
}

fn base_roms(cartridge: Vec<u8>) -> RomSet {
    let mut roms = RomSet::new();
    roms.cartridge = cartridge;
    roms.bios = vec![0; 0x20000];
    roms.zoom_table = RomSet::linear_zoom_table();
    roms
}

fn machine(roms: RomSet) -> Machine {
    Machine::new(neogeo::mvs(), roms).expect("machine construction")
}

/// A machine whose reset vector points at `program`, with the stack in
/// work RAM.
fn boot(program: &[(usize, u16)]) -> Machine {
    let mut words = vec![(0usize, 0x0010u16), (2, 0xF300), (4, 0x0000), (6, 0x0100)];
    words.extend_from_slice(program);
    machine(base_roms(cart(0x100000, &words)))
}

#[test]
fn reset_bootstrap() {
    let roms = base_roms(cart(
        0x100000,
        &[(0, 0x0010), (2, 0x0000), (4, 0x00C0), (6, 0x0000)],
    ));
    let m = machine(roms);
    assert_eq!(m.cpu.pc, 0x00C00000);
    assert_eq!(m.cpu.a(7), 0x00100000);
    assert!(m.cpu.ccr(CCR::S));
    assert_eq!(m.cpu.interrupt_mask(), 7);
}

#[test]
fn bank_switch_write_maps_the_window() {
    let mut cartridge = cart(0x600000, &[(0, 0x0010), (2, 0xF300), (4, 0x0000), (6, 0x0100)]);
    cartridge[0x400000] = 0xAB;
    let mut m = machine(base_roms(cartridge));
    // fresh machine maps the first switchable bank
    assert_eq!(m.bank, 0x100000);
    m.store_byte(0x2FFFF0, 3);
    assert_eq!(m.bank, 0x400000);
    assert_eq!(m.fetch_byte(0x200000), 0xAB);
}

#[test]
fn bank_switch_clamps_to_cartridge_size() {
    let cartridge = cart(0x400000, &[(0, 0x0010), (2, 0xF300), (4, 0x0000), (6, 0x0100)]);
    let mut m = machine(base_roms(cartridge));
    // the last megabyte of a 4 MiB cartridge is bank 3
    m.store_byte(0x2FFFF0, 3);
    assert_eq!(m.bank, 0x400000);
    // anything larger falls back to the first bank
    m.store_byte(0x2FFFF0, 7);
    assert_eq!(m.bank, 0x100000);
    m.store_byte(0x2FFFF0, 4);
    assert_eq!(m.bank, 0x100000);
}

#[test]
fn scrambled_bank_selector() {
    let cartridge = cart(0x200000, &[(0, 0x0010), (2, 0xF300), (4, 0x0000), (6, 0x0100)]);
    let mut roms = base_roms(cartridge);
    let mut offsets = vec![0u32; 64];
    offsets[0x3F] = 0x300000;
    roms.sma = Some(SmaProtection {
        unscramble: [0x50, 0, 2, 4, 6, 8, 10],
        offsets,
        rng_addr: 0,
    });
    let mut m = machine(roms);
    m.store_word(0x2FFF50, 0b0000_0101_0101_0101);
    assert_eq!(m.bank, 0x100000 + 0x300000);
}

#[test]
fn sma_signature_and_rng() {
    let cartridge = cart(0x200000, &[(0, 0x0010), (2, 0xF300), (4, 0x0000), (6, 0x0100)]);
    let mut roms = base_roms(cartridge);
    roms.sma = Some(SmaProtection {
        unscramble: [0x50, 0, 2, 4, 6, 8, 10],
        offsets: vec![0; 64],
        rng_addr: 0xFFCC,
    });
    let mut m = machine(roms);
    assert_eq!(m.fetch_word(0x2FE446), 0x9A37);
    let first = m.fetch_word(0x2FFFCC);
    assert_eq!(first, 0x2345);
    let second = m.fetch_word(0x2FFFCC);
    assert_ne!(second, first);
}

#[test]
fn watchdog_forces_cpu_reset() {
    // the program spins forever and never services the watchdog
    let mut m = boot(&[(0x100, 0x60FE)]);
    for _ in 0..8 {
        m.run_field();
    }
    assert_eq!(m.watchdog, 0);
    assert_eq!(m.cpu.pc, 0x100);
    assert!(m.cache.is_empty());
}

#[test]
fn busy_loop_is_fast_forwarded() {
    // tst.w d0 / beq back to the tst: statically invariant inside the block
    let mut m = boot(&[(0x100, 0x4A40), (0x102, 0x67FC)]);
    let list = m.ipc_list();
    assert!(list.norepeat);
    let leftover = m.run_68k(5000);
    assert_eq!(leftover, 0);
    assert_eq!(m.cpu.pc, 0x100);
}

#[test]
fn arithmetic_loop_runs_to_stop() {
    // d0 = 5+4+3+2+1+0 via dbra, stored to work RAM, then stop
    let mut m = boot(&[
        (0x100, 0x7000), // moveq #0,d0
        (0x102, 0x7205), // moveq #5,d1
        (0x104, 0xD041), // add.w d1,d0
        (0x106, 0x51C9), // dbra d1,0x104
        (0x108, 0xFFFC),
        (0x10A, 0x33C0), // move.w d0,$100000
        (0x10C, 0x0010),
        (0x10E, 0x0000),
        (0x110, 0x4E72), // stop #$2700
        (0x112, 0x2700),
    ]);
    m.run_68k(10_000);
    assert!(m.cpu.stop);
    assert_eq!(m.cpu.dr[0], 15);
    assert_eq!(m.cpu.dr[1] as u16, 0xFFFF);
    assert_eq!(m.fetch_word(0x100000), 15);
}

#[test]
fn nmi_wakes_a_stopped_cpu() {
    let mut m = boot(&[
        (0x100, 0x4E72), // stop #$2700
        (0x102, 0x2700),
        (0x7C, 0x0000), // level 7 auto-vector
        (0x7E, 0x0200),
        (0x200, 0x7E2A), // moveq #42,d7
        (0x202, 0x4E72),
        (0x204, 0x2700),
    ]);
    m.run_68k(100);
    assert!(m.cpu.stop);
    // level 1 is masked by the STOP imm, level 7 is not maskable
    m.interrupt(1);
    assert!(m.cpu.stop);
    m.interrupt(7);
    assert!(!m.cpu.stop);
    assert_eq!(m.cpu.pc, 0x200);
    m.run_68k(100);
    assert_eq!(m.cpu.dr[7], 42);
    assert!(m.cpu.stop);
}

#[test]
fn subroutine_call_and_return() {
    let mut m = boot(&[
        (0x100, 0x4EB9), // jsr $000200
        (0x102, 0x0000),
        (0x104, 0x0200),
        (0x106, 0x4E72), // stop #$2700
        (0x108, 0x2700),
        (0x200, 0x7003), // moveq #3,d0
        (0x202, 0x4E75), // rts
    ]);
    m.run_68k(200);
    assert!(m.cpu.stop);
    assert_eq!(m.cpu.dr[0], 3);
    assert_eq!(m.cpu.a(7), 0x10F300);
}

#[test]
fn movem_spills_and_restores() {
    let mut m = boot(&[
        (0x100, 0x48E7), // movem.l d0-d1/a0,-(a7)
        (0x102, 0xC080),
        (0x104, 0x4CDF), // movem.l (a7)+,d2-d3/a1
        (0x106, 0x020C),
        (0x108, 0x4E72),
        (0x10A, 0x2700),
    ]);
    m.cpu.dr[0] = 0x11111111;
    m.cpu.dr[1] = 0x22222222;
    m.cpu.set_a(0, 0x33333333);
    m.run_68k(200);
    assert!(m.cpu.stop);
    assert_eq!(m.cpu.dr[2], 0x11111111);
    assert_eq!(m.cpu.dr[3], 0x22222222);
    assert_eq!(m.cpu.a(1), 0x33333333);
    assert_eq!(m.cpu.a(7), 0x10F300);
}

#[test]
fn divide_by_zero_takes_vector_five() {
    let mut m = boot(&[
        (0x14, 0x0000), // vector 5
        (0x16, 0x0300),
        (0x100, 0x7200), // moveq #0,d1
        (0x102, 0x80C1), // divu.w d1,d0
        (0x104, 0x60FE), // not reached
        (0x300, 0x4E72),
        (0x302, 0x2700),
    ]);
    m.run_68k(400);
    assert!(m.cpu.stop);
    assert_eq!(m.cpu.pc, 0x304);
}

#[test]
fn flag_liveness_elides_dead_producers() {
    let mut m = boot(&[
        (0x100, 0x7001), // moveq #1,d0
        (0x102, 0x7202), // moveq #2,d1
        (0x104, 0x4E75), // rts
    ]);
    let list = m.ipc_list();
    assert_eq!(list.ipcs.len(), 3);
    // the first moveq's flags are dead: the second one overwrites them
    assert_eq!(list.ipcs[0].set, 0);
    assert_eq!(list.ipcs[1].set, FLAG_N | FLAG_Z | FLAG_V | FLAG_C);
    let words: u16 = list.ipcs.iter().map(|ipc| ipc.wordlen).sum();
    assert_eq!(words, 3);
}

#[test]
fn vector_swap_is_idempotent() {
    let mut roms = base_roms(cart(
        0x100000,
        &[(0, 0x0010), (2, 0xF300), (4, 0x0000), (6, 0x0100)],
    ));
    for i in 0..0x80 {
        roms.bios[i] = 0x11;
    }
    let mut m = machine(roms);
    let original: Vec<u8> = m.roms.cartridge[..0x80].to_vec();
    m.store_byte(0x3A0003, 0);
    m.store_byte(0x3A0003, 0);
    assert!(m.roms.cartridge[..0x80].iter().all(|&b| b == 0x11));
    m.store_byte(0x3A0013, 0);
    m.store_byte(0x3A0013, 0);
    assert_eq!(&m.roms.cartridge[..0x80], original.as_slice());
}

#[test]
fn sram_lock_gates_writes() {
    let mut m = boot(&[]);
    m.store_byte(0xD00010, 0x55);
    assert_eq!(m.fetch_byte(0xD00010), 0x55);
    m.store_byte(0x3A000D, 0);
    m.store_byte(0xD00010, 0xAA);
    assert_eq!(m.fetch_byte(0xD00010), 0x55);
    m.store_byte(0x3A001D, 0);
    m.store_byte(0xD00010, 0xAA);
    assert_eq!(m.fetch_byte(0xD00010), 0xAA);
}

#[test]
fn palette_writes_refresh_the_host_cache() {
    let mut m = boot(&[]);
    // a full-intensity white-ish colour
    m.store_word(0x400022, 0x7FFF);
    assert_eq!(m.fetch_word(0x400022), 0x7FFF);
    assert_eq!(m.video.pal_host[0][0x11], convert_pal(0x7FFF));
    assert_eq!(convert_pal(0x7FFF), 0x00FCFCFC);
    // pen 0 of a palette group becomes the transparency sentinel
    m.store_word(0x400000, 0x7FFF);
    assert_eq!(m.video.pal_host[0][0], 0xF81F);
    // the other bank is reached through the bank toggle
    m.store_byte(0x3A000F, 0);
    m.store_word(0x400022, 0x1234);
    assert_eq!(m.video.pal_neo[1][0x11], 0x1234);
    assert_eq!(m.video.pal_neo[0][0x11], 0x7FFF);
    m.store_byte(0x3A001F, 0);
    assert_eq!(m.fetch_word(0x400022), 0x7FFF);
}

struct SpyZ80 {
    log: Rc<RefCell<Vec<(u8, u32)>>>,
}

impl SoundCpu for SpyZ80 {
    fn run(&mut self, mailbox: &mut SoundMailbox, cycles: u32) {
        self.log.borrow_mut().push((mailbox.command, cycles));
    }
    fn nmi(&mut self, mailbox: &mut SoundMailbox) {
        mailbox.reply = 0xAC;
    }
    fn reset(&mut self, _mailbox: &mut SoundMailbox) {}
}

#[test]
fn sound_command_raises_nmi_and_kicks_the_z80() {
    let mut m = boot(&[]);
    let log = Rc::new(RefCell::new(Vec::new()));
    m.set_sound_cpu(Box::new(SpyZ80 { log: Rc::clone(&log) }));
    m.store_byte(0x320000, 0x42);
    assert_eq!(m.mailbox.command, 0x42);
    assert_eq!(log.borrow().as_slice(), &[(0x42, 300)]);
    assert_eq!(m.fetch_byte(0x320000), 0xAC);
}

#[test]
fn rtc_serial_output_reaches_the_coin_port() {
    fn clock_bit(m: &mut Machine, bit: u8) {
        m.store_byte(0x380000, 0x02 | bit);
        m.store_byte(0x380000, bit);
    }
    fn strobe(m: &mut Machine) {
        m.store_byte(0x380000, 0x04);
        m.store_byte(0x380000, 0x00);
    }
    let mut m = boot(&[]);
    // at rest, only the coin/service switches read back high
    assert_eq!(m.fetch_byte(0x320001), 0x07);
    m.rtc.seconds = 0x01;
    // command 0x3 enters read mode, command 0x1 latches the output register
    for i in 0..4 {
        clock_bit(&mut m, (0x3 >> i) & 1);
    }
    strobe(&mut m);
    for i in 0..4 {
        clock_bit(&mut m, (0x1 >> i) & 1);
    }
    strobe(&mut m);
    // bit 0 of the seconds register now drives DATA_OUT, mixed into bit 7
    assert_eq!(m.fetch_byte(0x320001), 0x87);
}

#[test]
fn vram_reads_return_the_latch() {
    let mut m = boot(&[]);
    m.store_word(0x3C0000, 0x7000);
    m.store_word(0x3C0002, 0xBEEF);
    m.store_word(0x3C0000, 0x7000);
    assert_eq!(m.fetch_word(0x3C0000), 0xBEEF);
    assert_eq!(m.fetch_word(0x3C0002), 0xBEEF);
}

#[test]
fn unmapped_accesses_recover() {
    let mut m = boot(&[]);
    assert_eq!(m.fetch_byte(0x900001), 0xF0);
    assert_eq!(m.fetch_word(0x900000), 0xF0F0);
    assert_eq!(m.fetch_long(0x900000), 0xF0F0F0F0);
    m.store_byte(0x900000, 0x12);
    // a byte write to 0x300001 services the watchdog regardless of region
    m.watchdog = 5;
    m.store_byte(0x300001, 0x00);
    assert_eq!(m.watchdog, 0);
}

#[test]
fn work_ram_is_mirrored() {
    let mut m = boot(&[]);
    m.store_byte(0x1F0003, 0x7A);
    assert_eq!(m.fetch_byte(0x100003), 0x7A);
    m.store_long(0x10FFFC, 0xCAFEBABE);
    assert_eq!(m.fetch_long(0x1FFFFC), 0xCAFEBABE);
}

#[test]
fn sprite_and_fix_pixels_reach_the_buffer() {
    let mut roms = base_roms(cart(
        0x100000,
        &[(0, 0x0010), (2, 0xF300), (4, 0x0000), (6, 0x0100)],
    ));
    // one sprite tile of solid pen 1, and fix character 1 of solid pen 1
    roms.sprites = vec![0x11; 128];
    roms.fix_board = vec![0u8; 64];
    for byte in roms.fix_board[32..64].iter_mut() {
        *byte = 0x11;
    }
    let mut m = machine(roms);
    // colours: sprite palette 1 pen 1, fix palette 2 pen 1
    m.store_word(0x400000 + 0x11 * 2, 0x7FFF);
    m.store_word(0x400000 + 0x21 * 2, 0x0F00);

    let mut vram = |addr: u16, data: u16| {
        m.store_word(0x3C0000, addr);
        m.store_word(0x3C0002, data);
    };
    // sprite 0: full size, one tile, y=0, x=10, palette 1
    vram(0x8000, 0x0FFF);
    vram(0x8200, (496 << 7) | 1);
    vram(0x8400, 10 << 7);
    vram(0x0000, 0x0000);
    vram(0x0001, 0x0100);
    // fix cell at column 0, row 2 (first visible line), character 1, pal 2
    vram(0x7000 + 2, 0x2001);

    let Machine { ref mut video, ref roms, .. } = m;
    video.draw_screen(roms);
    let buffer = &video.buffer;
    // sprite pixel at visible (10, 0)
    assert_eq!(buffer[16 * 352 + 16 + 10], convert_pal(0x7FFF));
    // sprite does not bleed above its own height
    assert_eq!(buffer[(16 + 16) * 352 + 16 + 10], video.pal_host[0][0xFFF]);
    // fix pixel at visible (0, 0) is drawn over the sprite layer
    assert_eq!(buffer[16 * 352 + 16], convert_pal(0x0F00));
}

#[test]
fn raster_field_delivers_irq2() {
    // enable timer + reload-on-write + reload-after-fire from the program
    // itself, then spin; the field loop must deliver IRQ2 and VBLANK
    let mut m = boot(&[
        (0x68, 0x0000), // level 2 auto-vector
        (0x6A, 0x0200),
        (0x64, 0x0000), // level 1 auto-vector
        (0x66, 0x0240),
        (0x100, 0x33FC), // move.w #$00B0,$3C0006
        (0x102, 0x00B0),
        (0x104, 0x003C),
        (0x106, 0x0006),
        (0x108, 0x33FC), // move.w #$9600,$3C000A
        (0x10A, 0x9600),
        (0x10C, 0x003C),
        (0x10E, 0x000A),
        (0x110, 0x027C), // andi.w #$F8FF,sr - unmask interrupts
        (0x112, 0xF8FF),
        (0x114, 0x60FE), // bra.s *
        (0x200, 0x5247), // addq.w #1,d7 - irq2 counter
        (0x202, 0x4E73), // rte
        (0x240, 0x5246), // addq.w #1,d6 - vblank counter
        (0x242, 0x4E73), // rte
    ]);
    m.config.raster = true;
    m.cpu.dr[6] = 0;
    m.cpu.dr[7] = 0;
    m.run_field();
    // two raster hits, at lines 100 and 200
    assert_eq!(m.cpu.dr[7] & 0xFFFF, 2);
    // the vblank interrupt is delivered at field end; its handler runs on
    // the next slice
    m.run_68k(100);
    assert_eq!(m.cpu.dr[6] & 0xFFFF, 1);
}
