// Definitions of opcode fields and operand kinds; rather than have magic
// numbers everywhere, we opt for rich types wherever it is not too ridiculous.
// The decoder is the naturally messy code responsible for constructing them.

use crate::conversions::Truncate;
use crate::processor::{Cpu, CCR};
use std::fmt;

pub const FLAG_C: u8 = 0x01;
pub const FLAG_V: u8 = 0x02;
pub const FLAG_Z: u8 = 0x04;
pub const FLAG_N: u8 = 0x08;
pub const FLAG_X: u8 = 0x10;
pub const FLAG_ALL: u8 = 0x1F;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Size {
    Byte = 1,
    Word = 2,
    Long = 4,
}

impl Size {
    pub fn from<T>(&self, res: T) -> OpResult
    where
        T: Truncate<u8> + Truncate<u16> + Truncate<u32>,
    {
        match *self {
            Self::Byte => OpResult::Byte(res.truncate()),
            Self::Word => OpResult::Word(res.truncate()),
            Self::Long => OpResult::Long(res.truncate()),
        }
    }
    pub fn zero(&self) -> OpResult {
        self.from(0u8)
    }
    pub fn bytes(&self) -> u32 {
        *self as u32
    }
    pub fn mask(&self) -> u32 {
        match *self {
            Self::Byte => 0xFF,
            Self::Word => 0xFFFF,
            Self::Long => 0xFFFF_FFFF,
        }
    }
    pub fn as_asm(&self) -> &'static str {
        match *self {
            Self::Byte => "b",
            Self::Word => "w",
            Self::Long => "l",
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub enum OpResult {
    Byte(u8),
    Word(u16),
    Long(u32),
}

impl OpResult {
    pub fn inner(&self) -> u32 {
        match *self {
            Self::Byte(b) => b as u32,
            Self::Word(w) => w as u32,
            Self::Long(l) => l,
        }
    }
    pub fn sign_extend(&self) -> i32 {
        match *self {
            Self::Byte(b) => b as i8 as i32,
            Self::Word(w) => w as i16 as i32,
            Self::Long(l) => l as i32,
        }
    }
    pub fn size(&self) -> Size {
        match self {
            Self::Byte(_) => Size::Byte,
            Self::Word(_) => Size::Word,
            Self::Long(_) => Size::Long,
        }
    }
    /// self + other (+X), with the full CCR delta of an ADD.
    pub fn add(&self, other: Self, extend: bool) -> (Self, CCRFlags) {
        let mut ccr = CCRFlags::new();
        let src = other.sign_extend();
        let dest = self.sign_extend();
        let res = dest.wrapping_add(src).wrapping_add(extend as i32);
        let result = self.size().from(res);
        let neg = result.sign_extend() < 0;
        ccr.n = Some(neg);
        ccr.z = Some(result.inner() == 0);
        ccr.v = Some((src < 0 && dest < 0 && !neg) || (src >= 0 && dest >= 0 && neg));
        ccr.c = Some((src < 0 && dest < 0) || (!neg && dest < 0) || (src < 0 && !neg));
        ccr.x = ccr.c;
        (result, ccr)
    }
    /// self - other (-X), with the full CCR delta of a SUB.
    pub fn sub(&self, other: Self, extend: bool) -> (Self, CCRFlags) {
        let mut ccr = CCRFlags::new();
        let src = other.sign_extend();
        let dest = self.sign_extend();
        let res = dest.wrapping_sub(src).wrapping_sub(extend as i32);
        let result = self.size().from(res);
        let neg = result.sign_extend() < 0;
        ccr.n = Some(neg);
        ccr.z = Some(result.inner() == 0);
        ccr.v = Some((src >= 0 && dest < 0 && !neg) || (src < 0 && dest >= 0 && neg));
        ccr.c = Some((src < 0 && dest >= 0) || (neg && dest >= 0) || (src < 0 && neg));
        ccr.x = ccr.c;
        (result, ccr)
    }
    pub fn and(&self, other: Self) -> (Self, CCRFlags) {
        self.bitwise_op(other, |a, b| a & b)
    }
    pub fn or(&self, other: Self) -> (Self, CCRFlags) {
        self.bitwise_op(other, |a, b| a | b)
    }
    pub fn xor(&self, other: Self) -> (Self, CCRFlags) {
        self.bitwise_op(other, |a, b| a ^ b)
    }
    pub fn not(&self) -> (Self, CCRFlags) {
        self.bitwise_op(*self, |a, _| !a)
    }
    /// NZVC delta of a plain move/test of this value.
    pub fn test(&self) -> CCRFlags {
        let mut ccr = CCRFlags::new();
        ccr.n = Some(self.sign_extend() < 0);
        ccr.z = Some(self.inner() == 0);
        ccr.v = Some(false);
        ccr.c = Some(false);
        ccr
    }
    fn bitwise_op<T>(&self, other: Self, fun: T) -> (Self, CCRFlags)
    where
        T: Fn(u32, u32) -> u32,
    {
        let res = fun(self.inner(), other.inner());
        let result = self.size().from(res);
        (result, result.test())
    }
}

impl fmt::Display for OpResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            OpResult::Byte(b) => write!(f, "${:02x}", b),
            OpResult::Word(w) => write!(f, "${:04x}", w),
            OpResult::Long(l) => write!(f, "${:08x}", l),
        }
    }
}

#[derive(Debug)]
pub struct CCRFlags {
    pub c: Option<bool>,
    pub v: Option<bool>,
    pub z: Option<bool>,
    pub n: Option<bool>,
    pub x: Option<bool>,
}

impl CCRFlags {
    pub fn new() -> CCRFlags {
        CCRFlags { c: None, v: None, z: None, n: None, x: None }
    }
    pub fn set(&self, cpu: &mut Cpu) {
        if let Some(value) = self.c {
            cpu.set_ccr(CCR::C, value)
        }
        if let Some(value) = self.v {
            cpu.set_ccr(CCR::V, value)
        }
        if let Some(value) = self.z {
            cpu.set_ccr(CCR::Z, value)
        }
        if let Some(value) = self.n {
            cpu.set_ccr(CCR::N, value)
        }
        if let Some(value) = self.x {
            cpu.set_ccr(CCR::X, value)
        }
    }
}

/// Operand kinds an instruction family can carry. One kind per operand slot;
/// effective-address families get one entry in the IIB table per kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AddrKind {
    Dreg,
    Areg,
    Aind,
    Ainc,
    Adec,
    Adis,
    Aidx,
    AbsW,
    AbsL,
    Pdis,
    Pidx,
    ImmB,
    ImmW,
    ImmL,
    ImmS,
    Imm3,
    Imm4,
    Imm8,
    Imm8s,
    ImmV,
    Ill,
}

impl AddrKind {
    /// Number of opcode bits this kind leaves variable (register numbers and
    /// opcode-embedded immediates).
    pub fn variable_bits(&self) -> u32 {
        match *self {
            Self::Dreg | Self::Areg | Self::Aind | Self::Ainc | Self::Adec | Self::Adis
            | Self::Aidx | Self::Imm3 => 3,
            Self::Imm4 => 4,
            Self::Imm8 | Self::Imm8s => 8,
            Self::ImmV => 12,
            _ => 0,
        }
    }
    pub fn is_memory(&self) -> bool {
        match *self {
            Self::Aind | Self::Ainc | Self::Adec | Self::Adis | Self::Aidx | Self::AbsW
            | Self::AbsL | Self::Pdis | Self::Pidx => true,
            _ => false,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Condition {
    T = 0,
    F = 1,
    HI = 2,
    LS = 3,
    CC = 4,
    CS = 5,
    NE = 6,
    EQ = 7,
    VC = 8,
    VS = 9,
    PL = 10,
    MI = 11,
    GE = 12,
    LT = 13,
    GT = 14,
    LE = 15,
}

impl Condition {
    pub fn from(condition: usize) -> Self {
        match condition & 0xF {
            0 => Self::T,
            1 => Self::F,
            2 => Self::HI,
            3 => Self::LS,
            4 => Self::CC,
            5 => Self::CS,
            6 => Self::NE,
            7 => Self::EQ,
            8 => Self::VC,
            9 => Self::VS,
            10 => Self::PL,
            11 => Self::MI,
            12 => Self::GE,
            13 => Self::LT,
            14 => Self::GT,
            _ => Self::LE,
        }
    }
    /// CCR bits this condition consumes, for flag-liveness bookkeeping.
    pub fn used_flags(&self) -> u8 {
        match *self {
            Self::T | Self::F => 0,
            Self::HI | Self::LS => FLAG_C | FLAG_Z,
            Self::CC | Self::CS => FLAG_C,
            Self::NE | Self::EQ => FLAG_Z,
            Self::VC | Self::VS => FLAG_V,
            Self::PL | Self::MI => FLAG_N,
            Self::GE | Self::LT => FLAG_N | FLAG_V,
            Self::GT | Self::LE => FLAG_N | FLAG_V | FLAG_Z,
        }
    }
    pub fn as_asm(&self) -> &'static str {
        match *self {
            Self::T => "t",
            Self::F => "f",
            Self::HI => "hi",
            Self::LS => "ls",
            Self::CC => "cc",
            Self::CS => "cs",
            Self::NE => "ne",
            Self::EQ => "eq",
            Self::VC => "vc",
            Self::VS => "vs",
            Self::PL => "pl",
            Self::MI => "mi",
            Self::GE => "ge",
            Self::LT => "lt",
            Self::GT => "gt",
            Self::LE => "le",
        }
    }
    pub fn evaluate(&self, cpu: &Cpu) -> bool {
        let c = cpu.ccr(CCR::C);
        let v = cpu.ccr(CCR::V);
        let z = cpu.ccr(CCR::Z);
        let n = cpu.ccr(CCR::N);
        match *self {
            Self::T => true,
            Self::F => false,
            Self::HI => !c && !z,
            Self::LS => c || z,
            Self::CC => !c,
            Self::CS => c,
            Self::NE => !z,
            Self::EQ => z,
            Self::VC => !v,
            Self::VS => v,
            Self::PL => !n,
            Self::MI => n,
            Self::GE => n == v,
            Self::LT => n != v,
            Self::GT => n == v && !z,
            Self::LE => z || n != v,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_asm())
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_asm())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_sets_carry_and_overflow() {
        let (res, ccr) = OpResult::Byte(0x7F).add(OpResult::Byte(1), false);
        assert_eq!(res.inner(), 0x80);
        assert_eq!(ccr.v, Some(true));
        assert_eq!(ccr.c, Some(false));
        assert_eq!(ccr.n, Some(true));

        let (res, ccr) = OpResult::Byte(0xFF).add(OpResult::Byte(1), false);
        assert_eq!(res.inner(), 0);
        assert_eq!(ccr.c, Some(true));
        assert_eq!(ccr.z, Some(true));
    }

    #[test]
    fn sub_borrow() {
        let (res, ccr) = OpResult::Word(0).sub(OpResult::Word(1), false);
        assert_eq!(res.inner(), 0xFFFF);
        assert_eq!(ccr.c, Some(true));
        assert_eq!(ccr.n, Some(true));
        assert_eq!(ccr.v, Some(false));
    }

    #[test]
    fn condition_flag_usage_matches_evaluation() {
        // A condition may only depend on the flags it declares as used.
        for cc in 0..16 {
            let cond = Condition::from(cc);
            let used = cond.used_flags();
            for flags in 0u16..32 {
                let mut a = Cpu::new();
                a.sr = flags;
                let mut b = Cpu::new();
                b.sr = flags | ((!used as u16 & 0x1F) & 0x1F);
                assert_eq!(cond.evaluate(&a), cond.evaluate(&b), "cc {}", cc);
            }
        }
    }
}
