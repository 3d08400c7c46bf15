// Decode-table construction and the pre-decoded instruction cache. At
// startup every instruction family is expanded into the 65,536-entry IIB
// table plus a pair of handlers per opcode (flag-producing / flag-eliding).
// At run time, basic blocks are decoded once into IPC lists keyed by
// (entry pc, cartridge bank) and re-dispatched from the cache.

use crate::exec;
use crate::fields::{AddrKind, Size, FLAG_ALL};
use crate::iibs::{families, Iib, Mnemonic};
use crate::neogeo::Machine;
use crate::CoreError;
use std::rc::Rc;

pub const LEN_IPCLISTTABLE: usize = 1024;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Flow {
    Next,
    End,
}

pub type OpHandler = fn(&mut Machine, &Ipc) -> Flow;

/// One pre-decoded instruction. Operand values are fully extracted: branch
/// targets and pc-relative displacements are absolute, immediates are
/// sign-extended where the encoding calls for it, register numbers are
/// pulled out of the opcode.
#[derive(Clone)]
pub struct Ipc {
    pub opcode: u16,
    pub wordlen: u16,
    pub src: u32,
    pub dst: u32,
    pub used: u8,
    pub set: u8,
    pub stype: AddrKind,
    pub dtype: AddrKind,
    pub size: Size,
    pub sreg: u8,
    pub dreg: u8,
    pub function: OpHandler,
}

pub struct IpcList {
    pub pc: u32,
    pub bank: u32,
    pub clocks: u32,
    pub norepeat: bool,
    pub ipcs: Vec<Ipc>,
}

pub struct IpcCache {
    buckets: Vec<Vec<Rc<IpcList>>>,
}

impl IpcCache {
    pub fn new() -> IpcCache {
        IpcCache { buckets: (0..LEN_IPCLISTTABLE).map(|_| Vec::new()).collect() }
    }
    fn bucket(pc: u32) -> usize {
        (pc >> 1) as usize & (LEN_IPCLISTTABLE - 1)
    }
    pub fn lookup(&self, pc: u32, bank: u32) -> Option<Rc<IpcList>> {
        self.buckets[Self::bucket(pc)]
            .iter()
            .find(|l| l.pc == pc && l.bank == bank)
            .cloned()
    }
    pub fn insert(&mut self, list: Rc<IpcList>) {
        self.buckets[Self::bucket(list.pc)].push(list);
    }
    pub fn clear(&mut self) {
        for bucket in self.buckets.iter_mut() {
            bucket.clear();
        }
    }
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|b| b.is_empty())
    }
}

pub struct DecodeTables {
    pub iibs: Vec<Iib>,
    /// opcode -> index into `iibs`, or None for an illegal pattern
    pub iib_index: Vec<Option<u16>>,
    /// opcode*2 -> flag-eliding handler, opcode*2+1 -> flag-producing handler
    pub functable: Vec<OpHandler>,
    /// byte -> index of its least-significant set bit (MOVEM walking)
    pub movem_bit: [u8; 256],
    pub total_instructions: usize,
}

impl DecodeTables {
    pub fn build() -> Result<DecodeTables, CoreError> {
        let iibs = families();
        let mut iib_index: Vec<Option<u16>> = vec![None; 0x10000];
        let mut functable: Vec<OpHandler> = vec![exec::op_illegal as OpHandler; 0x20000];
        let mut total_instructions = 0usize;

        for (i, iib) in iibs.iter().enumerate() {
            let mut bitmap = iib.mask as u32;
            let mut sbits = 0u32;
            let mut dbits = 0u32;
            for &(kind, pos, dst) in
                [(iib.stype, iib.sbitpos, false), (iib.dtype, iib.dbitpos, true)].iter()
            {
                let bits = kind.variable_bits();
                if bits > 0 {
                    bitmap ^= ((1u32 << bits) - 1) << pos;
                    if dst {
                        dbits = bits;
                    } else {
                        sbits = bits;
                    }
                }
            }
            if bitmap != 0xFFFF {
                return Err(CoreError::DecoderMask { family: i, bitmap: bitmap as u16 });
            }

            let (quiet, flagged) = exec::handler_pair(iib);
            for sbit in 0..(1u32 << sbits) {
                if sbit == 0 && iib.imm_notzero {
                    continue;
                }
                for dbit in 0..(1u32 << dbits) {
                    let word = iib.bits
                        | ((sbit as u16) << iib.sbitpos)
                        | ((dbit as u16) << iib.dbitpos);
                    if iib_index[word as usize].is_some() {
                        return Err(CoreError::DecoderCollision { family: i, opcode: word });
                    }
                    iib_index[word as usize] = Some(i as u16);
                    functable[word as usize * 2] = quiet;
                    functable[word as usize * 2 + 1] = flagged;
                    total_instructions += 1;
                }
            }
        }

        let mapped = iib_index.iter().filter(|e| e.is_some()).count();
        if mapped != total_instructions {
            return Err(CoreError::DecoderCount { expected: total_instructions, found: mapped });
        }

        let mut movem_bit = [8u8; 256];
        for i in 1..256usize {
            for j in 0..8 {
                if i & (1 << j) != 0 {
                    movem_bit[i] = j as u8;
                    break;
                }
            }
        }

        Ok(DecodeTables { iibs, iib_index, functable, movem_bit, total_instructions })
    }
}

fn sign16(word: u16) -> u32 {
    word as i16 as i32 as u32
}

impl Machine {
    /// Look up the IPC list for the current PC, building it on a miss.
    pub fn ipc_list(&mut self) -> Rc<IpcList> {
        let pc = self.cpu.pc & 0xFFFFFF;
        let bank = if pc & 0xF00000 == 0x200000 { self.bank } else { 0 };
        if let Some(list) = self.cache.lookup(pc, bank) {
            return list;
        }
        let list = Rc::new(self.make_ipc_list(pc, bank));
        self.cache.insert(Rc::clone(&list));
        list
    }

    fn make_ipc_list(&mut self, entry: u32, bank: u32) -> IpcList {
        let tables = Rc::clone(&self.tables);
        let mut list =
            IpcList { pc: entry, bank, clocks: 0, norepeat: false, ipcs: Vec::with_capacity(16) };
        let mut pc = entry;
        loop {
            if list.ipcs.len() > 10_000 {
                // a block this long means decoding ran off into data
                log::error!("runaway block @ {:06x}", entry);
                break;
            }
            let (ipc, iib_idx) = self.decode_ipc(&tables, pc);
            pc = pc.wrapping_add(ipc.wordlen as u32 * 2);
            let done = match iib_idx {
                Some(i) => {
                    let iib = &tables.iibs[i];
                    list.clocks += iib.clocks;
                    iib.endblk
                }
                None => {
                    log::error!("invalid instruction @ {:06x} [{:04x}]", pc, ipc.opcode);
                    list.clocks += 4;
                    true
                }
            };
            list.ipcs.push(ipc);
            if done {
                break;
            }
        }

        if list.ipcs.len() == 2 {
            let last =
                tables.iib_index[list.ipcs[1].opcode as usize].map(|i| &tables.iibs[i as usize]);
            let first =
                tables.iib_index[list.ipcs[0].opcode as usize].map(|i| &tables.iibs[i as usize]);
            if let (Some(first), Some(last)) = (first, last) {
                if last.mnemonic == Mnemonic::Bcc && list.ipcs[1].src == list.pc {
                    // 2-instruction block ending in a branch to its own start
                    let operand_kinds = [first.stype, first.dtype];
                    if (first.mnemonic == Mnemonic::Tst || first.mnemonic == Mnemonic::Cmp)
                        && !operand_kinds.contains(&AddrKind::Ainc)
                        && !operand_kinds.contains(&AddrKind::Adec)
                    {
                        // no change can happen inside the block
                        list.norepeat = true;
                    }
                }
            }
        }

        // Flag-liveness back-pass: a producer whose result is never consumed
        // before being overwritten gets the flag-eliding handler.
        let mut required = FLAG_ALL;
        for ipc in list.ipcs.iter_mut().rev() {
            ipc.set &= required;
            required = (required & !ipc.set) | ipc.used;
            let variant = if ipc.set != 0 { 1 } else { 0 };
            ipc.function = tables.functable[ipc.opcode as usize * 2 + variant];
        }

        list
    }

    pub(crate) fn decode_ipc(&mut self, tables: &DecodeTables, addr: u32) -> (Ipc, Option<usize>) {
        let opcode = self.fetch_word(addr);
        let mut ipc = Ipc {
            opcode,
            wordlen: 1,
            src: 0,
            dst: 0,
            used: 0,
            set: 0,
            stype: AddrKind::Ill,
            dtype: AddrKind::Ill,
            size: Size::Word,
            sreg: 0,
            dreg: 0,
            function: exec::op_illegal,
        };
        let iib_idx = match tables.iib_index[opcode as usize] {
            Some(i) => i as usize,
            None => return (ipc, None),
        };
        let iib = &tables.iibs[iib_idx];

        ipc.used = iib.used;
        ipc.set = iib.set;
        ipc.stype = iib.stype;
        ipc.dtype = iib.dtype;
        ipc.size = iib.size.unwrap_or(Size::Word);

        match iib.mnemonic {
            Mnemonic::Bcc | Mnemonic::Bra | Mnemonic::Bsr => {
                // the branch target is resolved now
                let disp = (opcode & 0xFF) as i8 as i32 as u32;
                ipc.src = if disp == 0 {
                    ipc.wordlen += 1;
                    sign16(self.fetch_word(addr.wrapping_add(2)))
                } else {
                    disp
                };
                ipc.src = ipc.src.wrapping_add(addr).wrapping_add(2);
                return (ipc, Some(iib_idx));
            }
            Mnemonic::DBcc => {
                ipc.src = sign16(self.fetch_word(addr.wrapping_add(2)))
                    .wrapping_add(addr)
                    .wrapping_add(2);
                ipc.wordlen += 1;
                ipc.dreg = (opcode & 7) as u8;
                ipc.dst = ipc.dreg as u32;
                return (ipc, Some(iib_idx));
            }
            _ => {}
        }

        let mut ext = addr.wrapping_add(2);
        for &dst_slot in [false, true].iter() {
            let (kind, pos) = if dst_slot {
                (iib.dtype, iib.dbitpos)
            } else {
                (iib.stype, iib.sbitpos)
            };
            let mut value = 0u32;
            let mut reg = 0u8;
            match kind {
                AddrKind::Dreg
                | AddrKind::Areg
                | AddrKind::Aind
                | AddrKind::Ainc
                | AddrKind::Adec => {
                    reg = ((opcode >> pos) & 7) as u8;
                    value = reg as u32;
                }
                AddrKind::Adis => {
                    reg = ((opcode >> pos) & 7) as u8;
                    value = sign16(self.fetch_word(ext));
                    ipc.wordlen += 1;
                    ext = ext.wrapping_add(2);
                }
                AddrKind::Aidx => {
                    reg = ((opcode >> pos) & 7) as u8;
                    let word = self.fetch_word(ext);
                    value = ((word as u8 as i8 as i32 as u32) & 0xFFFFFF)
                        | ((word as u32 >> 8) << 24);
                    ipc.wordlen += 1;
                    ext = ext.wrapping_add(2);
                }
                AddrKind::AbsW => {
                    value = sign16(self.fetch_word(ext));
                    ipc.wordlen += 1;
                    ext = ext.wrapping_add(2);
                }
                AddrKind::AbsL => {
                    value = (self.fetch_word(ext) as u32) << 16
                        | self.fetch_word(ext.wrapping_add(2)) as u32;
                    ipc.wordlen += 2;
                    ext = ext.wrapping_add(4);
                }
                AddrKind::Pdis => {
                    // absolute target: displacement plus the pc of this word
                    value = sign16(self.fetch_word(ext)).wrapping_add(ext);
                    ipc.wordlen += 1;
                    ext = ext.wrapping_add(2);
                }
                AddrKind::Pidx => {
                    let word = self.fetch_word(ext);
                    let base = (word as u8 as i8 as i32 as u32).wrapping_add(ext);
                    value = (base & 0xFFFFFF) | ((word as u32 >> 8) << 24);
                    ipc.wordlen += 1;
                    ext = ext.wrapping_add(2);
                }
                AddrKind::ImmB => {
                    value = (self.fetch_word(ext) & 0xFF) as u32;
                    ipc.wordlen += 1;
                    ext = ext.wrapping_add(2);
                }
                AddrKind::ImmW => {
                    value = self.fetch_word(ext) as u32;
                    ipc.wordlen += 1;
                    ext = ext.wrapping_add(2);
                }
                AddrKind::ImmL => {
                    value = (self.fetch_word(ext) as u32) << 16
                        | self.fetch_word(ext.wrapping_add(2)) as u32;
                    ipc.wordlen += 2;
                    ext = ext.wrapping_add(4);
                }
                AddrKind::ImmS => {
                    value = iib.immvalue;
                }
                AddrKind::Imm3 => {
                    value = ((opcode >> pos) & 7) as u32;
                }
                AddrKind::Imm4 => {
                    value = ((opcode >> pos) & 15) as u32;
                }
                AddrKind::Imm8 => {
                    value = ((opcode >> pos) & 255) as u32;
                }
                AddrKind::Imm8s => {
                    value = ((opcode >> pos) & 255) as u8 as i8 as i32 as u32;
                }
                AddrKind::ImmV => {
                    value = (opcode & 0x0FFF) as u32;
                }
                AddrKind::Ill => {}
            }
            if dst_slot {
                ipc.dst = value;
                ipc.dreg = reg;
            } else {
                ipc.src = value;
                ipc.sreg = reg;
            }
        }

        (ipc, Some(iib_idx))
    }
}
