// NEC PD4990A serial calendar/clock. Three input lines (DATA, CLOCK,
// STROBE) feed a 52-bit shift register; commands are interpreted when the
// strobe line drops. Time advances once per rendered field.

use chrono::{Datelike, Local, Timelike};

const DATA_BIT: u8 = 0x1;
const CLOCK_BIT: u8 = 0x2;
const END_BIT: u8 = 0x4;

pub struct Pd4990a {
    /// BCD time and date; month is plain binary 1..=12.
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub days: u8,
    pub month: u8,
    pub year: u8,
    pub weekday: u8,
    shift_lo: u32,
    shift_hi: u32,
    retraces: u32,
    testwaits: u32,
    maxwaits: u32,
    testbit: u8,
    outputbit: u8,
    bitno: u32,
    reading: bool,
    clock_line: u8,
    command_line: u8,
}

impl Pd4990a {
    pub fn new() -> Pd4990a {
        // the chip powers up on Monday 09/09/73
        Pd4990a {
            seconds: 0x00,
            minutes: 0x00,
            hours: 0x00,
            days: 0x09,
            month: 9,
            year: 0x73,
            weekday: 1,
            shift_lo: 0,
            shift_hi: 0,
            retraces: 0,
            testwaits: 0,
            maxwaits: 1,
            testbit: 0,
            outputbit: 0,
            bitno: 0,
            reading: false,
            clock_line: 0,
            command_line: 0,
        }
    }

    /// Load the host calendar into the chip, the way the original hardware
    /// would have been set by its backup battery.
    pub fn seed_from_host(&mut self) {
        let now = Local::now();
        let bcd = |value: u32| -> u8 { ((value / 10 % 10) as u8) << 4 | (value % 10) as u8 };
        self.seconds = bcd(now.second());
        self.minutes = bcd(now.minute());
        self.hours = bcd(now.hour());
        self.days = bcd(now.day());
        self.month = now.month() as u8;
        self.year = bcd(now.year() as u32 % 100);
        self.weekday = now.weekday().num_days_from_sunday() as u8;
    }

    pub fn read_testbit(&self) -> u8 {
        self.testbit
    }

    pub fn read_databit(&self) -> u8 {
        self.outputbit
    }

    /// One rendered field has passed; `per_second` is 60 for NTSC, 50 for
    /// PAL. Seconds carry in BCD all the way through the calendar.
    pub fn add_retrace(&mut self, per_second: u32) {
        self.testwaits += 1;
        if self.testwaits >= self.maxwaits {
            self.testbit ^= 1;
            self.testwaits = 0;
        }
        self.retraces += 1;
        if self.retraces < per_second {
            return;
        }
        self.retraces = 0;
        self.seconds += 1;
        if self.seconds & 0x0F < 10 {
            return;
        }
        self.seconds &= 0xF0;
        self.seconds += 0x10;
        if self.seconds < 0x60 {
            return;
        }
        self.seconds = 0;
        self.minutes += 1;
        if self.minutes & 0x0F < 10 {
            return;
        }
        self.minutes &= 0xF0;
        self.minutes += 0x10;
        if self.minutes < 0x60 {
            return;
        }
        self.minutes = 0;
        self.hours += 1;
        if self.hours & 0x0F < 10 {
            return;
        }
        self.hours &= 0xF0;
        self.hours += 0x10;
        if self.hours < 0x24 {
            return;
        }
        self.hours = 0;
        self.increment_day();
    }

    fn increment_day(&mut self) {
        self.days += 1;
        if self.days & 0x0F >= 10 {
            self.days &= 0xF0;
            self.days += 0x10;
        }
        self.weekday += 1;
        if self.weekday == 7 {
            self.weekday = 0;
        }
        match self.month {
            1 | 3 | 5 | 7 | 8 | 10 | 12 => {
                if self.days == 0x32 {
                    self.days = 1;
                    self.increment_month();
                }
            }
            2 => {
                let real_year = 2000 + ((self.year >> 4) * 10 + (self.year & 0xF)) as i32;
                let leap = real_year % 4 == 0 && (real_year % 100 != 0 || real_year % 400 == 0);
                let limit = if leap { 0x30 } else { 0x29 };
                if self.days == limit {
                    self.days = 1;
                    self.increment_month();
                }
            }
            _ => {
                if self.days == 0x31 {
                    self.days = 1;
                    self.increment_month();
                }
            }
        }
    }

    fn increment_month(&mut self) {
        self.month += 1;
        if self.month == 13 {
            self.month = 1;
            self.year += 1;
            if self.year & 0x0F >= 10 {
                self.year &= 0xF0;
                self.year += 0x10;
            }
            if self.year == 0xA0 {
                self.year = 0;
            }
        }
    }

    fn read_bit(&mut self) {
        let bitno = self.bitno;
        self.outputbit = match bitno {
            0x00..=0x07 => (self.seconds >> bitno) & 1,
            0x08..=0x0F => (self.minutes >> (bitno - 0x08)) & 1,
            0x10..=0x17 => (self.hours >> (bitno - 0x10)) & 1,
            0x18..=0x1F => (self.days >> (bitno - 0x18)) & 1,
            0x20..=0x23 => (self.weekday >> (bitno - 0x20)) & 1,
            0x24..=0x27 => (self.month >> (bitno - 0x24)) & 1,
            0x28..=0x2F => (self.year >> (bitno - 0x28)) & 1,
            _ => self.outputbit,
        };
    }

    fn reset_bitstream(&mut self) {
        self.shift_lo = 0;
        self.shift_hi = 0;
        self.bitno = 0;
    }

    fn write_bit(&mut self, bit: u8) {
        if self.bitno <= 31 {
            self.shift_lo |= (bit as u32) << self.bitno;
        } else if self.bitno <= 63 {
            self.shift_hi |= (bit as u32) << (self.bitno - 32);
        }
    }

    fn next_bit(&mut self) {
        self.bitno += 1;
        if self.reading {
            self.read_bit();
        }
        if self.reading && self.bitno == 0x34 {
            self.reading = false;
            self.reset_bitstream();
        }
    }

    fn get_command(&self) -> u8 {
        if self.bitno <= 31 {
            (self.shift_lo >> self.bitno.saturating_sub(4)) as u8
        } else {
            (self.shift_hi >> (self.bitno - 32).saturating_sub(4)) as u8
        }
    }

    fn update_date(&mut self) {
        self.seconds = self.shift_lo as u8;
        self.minutes = (self.shift_lo >> 8) as u8;
        self.hours = (self.shift_lo >> 16) as u8;
        self.days = (self.shift_lo >> 24) as u8;
        self.weekday = (self.shift_hi & 0x0F) as u8;
        self.month = ((self.shift_hi >> 4) & 0x0F) as u8;
        self.year = (self.shift_hi >> 8) as u8;
    }

    fn process_command(&mut self) {
        match self.get_command() {
            // load the output register and stream it out bit by bit
            0x1 => {
                self.bitno = 0;
                if self.reading {
                    self.read_bit();
                }
                self.shift_lo = 0;
                self.shift_hi = 0;
            }
            // store the shift register as the current date
            0x2 => {
                self.update_date();
            }
            0x3 => {
                self.reading = true;
            }
            // test output every field
            0x7 => {
                self.maxwaits = 1;
            }
            // test output every half second
            0x8 => {
                self.maxwaits = 30;
            }
            _ => {}
        }
    }

    /// Three-wire serial input; only the low three bits of the written
    /// value matter.
    pub fn write_control(&mut self, data: u8) {
        let data = data & 0x7;
        if self.command_line != 0 && data & END_BIT == 0 {
            // strobe dropped: the shifted-in command takes effect
            self.process_command();
            self.reset_bitstream();
        }
        self.command_line = data & END_BIT;
        if self.clock_line != 0 && data & CLOCK_BIT == 0 {
            // clock falling edge shifts one bit in
            self.write_bit(data & DATA_BIT);
            self.next_bit();
        }
        self.clock_line = data & CLOCK_BIT;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock_bit(rtc: &mut Pd4990a, bit: u8) {
        rtc.write_control(CLOCK_BIT | bit);
        rtc.write_control(bit);
    }

    fn strobe(rtc: &mut Pd4990a) {
        rtc.write_control(END_BIT);
        rtc.write_control(0);
    }

    fn day(rtc: &mut Pd4990a) {
        for _ in 0..60 * 60 * 24 {
            for _ in 0..60 {
                rtc.add_retrace(60);
            }
        }
    }

    #[test]
    fn leap_year_february() {
        let mut rtc = Pd4990a::new();
        rtc.seconds = 0;
        rtc.minutes = 0;
        rtc.hours = 0;
        rtc.days = 0x28;
        rtc.month = 2;
        rtc.year = 0x00; // 2000, a leap year
        day(&mut rtc);
        assert_eq!((rtc.days, rtc.month), (0x29, 2));
        day(&mut rtc);
        assert_eq!((rtc.days, rtc.month), (0x01, 3));
    }

    #[test]
    fn plain_year_february() {
        let mut rtc = Pd4990a::new();
        rtc.seconds = 0;
        rtc.minutes = 0;
        rtc.hours = 0;
        rtc.days = 0x28;
        rtc.month = 2;
        rtc.year = 0x01;
        day(&mut rtc);
        assert_eq!((rtc.days, rtc.month), (0x01, 3));
    }

    #[test]
    fn store_command_loads_the_date() {
        let mut rtc = Pd4990a::new();
        // 52 bits, LSB first: seconds 0x23, minutes 0x59, hours 0x11,
        // days 0x17, weekday 4, month 7, year 0x86, then command 0x2 in the
        // last nibble shifted in
        let lo: u32 = 0x1711_5923;
        let hi: u32 = 0x2_8674;
        for i in 0..32 {
            clock_bit(&mut rtc, ((lo >> i) & 1) as u8);
        }
        for i in 0..20 {
            clock_bit(&mut rtc, ((hi >> i) & 1) as u8);
        }
        strobe(&mut rtc);
        assert_eq!(rtc.seconds, 0x23);
        assert_eq!(rtc.minutes, 0x59);
        assert_eq!(rtc.hours, 0x11);
        assert_eq!(rtc.days, 0x17);
        assert_eq!(rtc.weekday, 4);
        assert_eq!(rtc.month, 7);
        assert_eq!(rtc.year, 0x86);
    }

    #[test]
    fn read_mode_streams_the_seconds() {
        let mut rtc = Pd4990a::new();
        rtc.seconds = 0xA5 & 0x7F;
        // command 0x3: enter read mode
        for i in 0..4 {
            clock_bit(&mut rtc, (0x3 >> i) & 1);
        }
        strobe(&mut rtc);
        // command 0x1: latch the output register
        for i in 0..4 {
            clock_bit(&mut rtc, (0x1 >> i) & 1);
        }
        strobe(&mut rtc);
        let mut value = 0u8;
        for i in 0..8 {
            value |= rtc.read_databit() << i;
            clock_bit(&mut rtc, 0);
        }
        assert_eq!(value, rtc.seconds);
    }
}
