use minifb::{Key, Window, WindowOptions};
use neomvs::devices::Button;
use neomvs::neogeo::{self, SystemType};
use neomvs::roms::RomSet;
use neomvs::sound::{RingSource, SampleRing, SilentYm2610, SAMPLE_RATE};
use neomvs::video::{BUFFER_HEIGHT, BUFFER_WIDTH};
use neomvs::{Configuration, Emulator};
use rodio::{OutputStream, Sink};
use std::fs;
use std::path::Path;
use std::process::exit;

fn load_region(dir: &Path, name: &str) -> Vec<u8> {
    fs::read(dir.join(name)).unwrap_or_default()
}

fn load_roms(dir: &Path) -> RomSet {
    let mut roms = RomSet::new();
    roms.cartridge = load_region(dir, "prog.bin");
    roms.bios = load_region(dir, "bios.bin");
    roms.fix_cartridge = load_region(dir, "fix.bin");
    roms.fix_board = load_region(dir, "sfix.bin");
    roms.sprites = load_region(dir, "spr.bin");
    roms.zoom_table = load_region(dir, "lo.bin");
    roms.sound_program = load_region(dir, "m1.bin");
    roms.sound_bios = load_region(dir, "sm1.bin");
    roms.samples_a = load_region(dir, "v1.bin");
    roms.samples_b = load_region(dir, "v2.bin");
    if roms.zoom_table.is_empty() {
        roms.zoom_table = RomSet::linear_zoom_table();
    }
    roms
}

fn usage() -> ! {
    eprintln!("usage: myneogeo [--debug] [--raster] [--pal] [--aes] <romdir>");
    exit(2);
}

fn main() {
    env_logger::init();

    let mut debug = false;
    let mut config = neogeo::mvs();
    let mut romdir = None;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--debug" => debug = true,
            "--raster" => config.raster = true,
            "--pal" => config.pal = true,
            "--aes" => config.system = SystemType::Aes,
            _ => romdir = Some(arg),
        }
    }
    let romdir = match romdir {
        Some(dir) => dir,
        None => usage(),
    };

    let roms = load_roms(Path::new(&romdir));
    let mut emulator = match Emulator::new(config, roms) {
        Ok(emulator) => emulator,
        Err(error) => {
            eprintln!("myneogeo: {}", error);
            exit(1);
        }
    };

    if debug {
        emulator.run_debugger();
        return;
    }

    let ring = SampleRing::new(SAMPLE_RATE as usize / 4);
    let fields: u32 = if config.pal { 50 } else { 60 };
    emulator.machine.set_sound_chip(Box::new(SilentYm2610::new(
        ring.clone(),
        fields * neogeo::NB_INTERLACE,
    )));
    let audio = OutputStream::try_default();
    let _keepalive = match &audio {
        Ok((stream, handle)) => {
            let _ = stream;
            match Sink::try_new(handle) {
                Ok(sink) => {
                    sink.append(RingSource::new(ring.clone()));
                    sink.play();
                    Some(sink)
                }
                Err(error) => {
                    log::warn!("no audio sink: {}", error);
                    None
                }
            }
        }
        Err(error) => {
            log::warn!("no audio device: {}", error);
            None
        }
    };

    let mut window = Window::new(
        "myneogeo",
        BUFFER_WIDTH,
        BUFFER_HEIGHT,
        WindowOptions::default(),
    )
    .unwrap_or_else(|e| {
        eprintln!("myneogeo: {}", e);
        exit(1);
    });

    emulator.machine.scheduler.frame_skip.enabled = true;
    emulator.machine.scheduler.frame_skip.reset();

    while window.is_open() && !window.is_key_down(Key::Escape) {
        let inputs = &mut emulator.machine.inputs;
        inputs.set_p1(Button::Up, window.is_key_down(Key::Up));
        inputs.set_p1(Button::Down, window.is_key_down(Key::Down));
        inputs.set_p1(Button::Left, window.is_key_down(Key::Left));
        inputs.set_p1(Button::Right, window.is_key_down(Key::Right));
        inputs.set_p1(Button::A, window.is_key_down(Key::Z));
        inputs.set_p1(Button::B, window.is_key_down(Key::X));
        inputs.set_p1(Button::C, window.is_key_down(Key::C));
        inputs.set_p1(Button::D, window.is_key_down(Key::V));
        inputs.set_start(0, window.is_key_down(Key::Key1));
        inputs.set_select(0, window.is_key_down(Key::Key3));
        inputs.set_coin(0, window.is_key_down(Key::Key5));
        inputs.test_switch = window.is_key_down(Key::Tab);

        emulator.run_field();

        window
            .update_with_buffer(emulator.frame(), BUFFER_WIDTH, BUFFER_HEIGHT)
            .expect("error updating screen");
        emulator.machine.scheduler.frame_skip.cap();
    }
}
