//! The RISC CPU interpreter: fetch, decode, execute.
//!
//! Three instruction formats (register, memory, branch) selected by the
//! top bits of the instruction word. Register/flag layout, the `step`/`run`
//! shape, and the register-dump `Display` impl follow a straightforward
//! fetch-decode-execute loop over a flat register file.

use crate::fp;
use crate::mmio::Mmio;
use std::fmt;
use termion::cursor;

pub const ROM_START: u32 = 0xFFFFF800;
pub const ROM_WORDS: usize = 512;
pub const IO_START: u32 = 0xFFFFFFC0;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegOp {
    Mov = 0,
    Lsl = 1,
    Asr = 2,
    Ror = 3,
    And = 4,
    Ann = 5,
    Ior = 6,
    Xor = 7,
    Add = 8,
    Sub = 9,
    Mul = 10,
    Div = 11,
    Fad = 12,
    Fsb = 13,
    Fml = 14,
    Fdv = 15,
}

impl RegOp {
    fn from_bits(v: u32) -> Self {
        // SAFETY-free: the match is exhaustive over the 4-bit field.
        match v & 0xF {
            0 => Self::Mov,
            1 => Self::Lsl,
            2 => Self::Asr,
            3 => Self::Ror,
            4 => Self::And,
            5 => Self::Ann,
            6 => Self::Ior,
            7 => Self::Xor,
            8 => Self::Add,
            9 => Self::Sub,
            10 => Self::Mul,
            11 => Self::Div,
            12 => Self::Fad,
            13 => Self::Fsb,
            14 => Self::Fml,
            _ => Self::Fdv,
        }
    }
}

/// The CPU register/flag state plus the memory it's wired to.
pub struct Risc {
    pub pc: u32,
    pub r: [u32; 16],
    pub h: u32,
    pub z: bool,
    pub n: bool,
    pub c: bool,
    pub v: bool,

    // Interrupt state.
    pub i_flag: bool,
    pub e_flag: bool,
    pub p_flag: bool,
    spc: u32,
    sz: bool,
    sn: bool,
    sc: bool,
    sv: bool,

    /// Cooperative-yield budget; decremented by "waiting" MMIO reads and
    /// exhausted to end a `run` batch early.
    pub progress: i32,

    pub mem: Mmio,
}

impl Risc {
    pub fn new(mem: Mmio) -> Self {
        let mut cpu = Risc {
            pc: 0,
            r: [0; 16],
            h: 0,
            z: false,
            n: false,
            c: false,
            v: false,
            i_flag: false,
            e_flag: false,
            p_flag: false,
            spc: 0,
            sz: false,
            sn: false,
            sc: false,
            sv: false,
            progress: 0,
            mem,
        };
        cpu.reset();
        cpu
    }

    pub fn reset(&mut self) {
        self.pc = ROM_START / 4;
    }

    pub fn trigger_interrupt(&mut self) {
        self.p_flag = true;
    }

    /// Run up to `cycles` instructions, stopping early if the progress
    /// budget (reseeded to 20 at the start of each run) is exhausted.
    pub fn run(&mut self, cycles: u32) {
        self.progress = 20;
        for _ in 0..cycles {
            self.step();
            if self.progress <= 0 {
                break;
            }
        }
    }

    fn fetch(&mut self) -> Option<u32> {
        if self.pc < (self.mem.mem_size() / 4) as u32 {
            Some(self.mem.load_word_aligned((self.pc * 4) as usize))
        } else if self.pc >= ROM_START / 4 && self.pc < ROM_START / 4 + ROM_WORDS as u32 {
            Some(self.mem.rom_word((self.pc - ROM_START / 4) as usize))
        } else {
            None
        }
    }

    pub fn step(&mut self) {
        if self.p_flag && self.e_flag && !self.i_flag {
            self.spc = self.pc;
            self.sz = self.z;
            self.sn = self.n;
            self.sc = self.c;
            self.sv = self.v;
            self.i_flag = true;
            self.pc = 1;
        }

        let ir = match self.fetch() {
            Some(w) => w,
            None => {
                eprintln!(
                    "branched into the void (PC=0x{:08X}), resetting",
                    self.pc * 4
                );
                self.reset();
                return;
            }
        };
        self.pc = self.pc.wrapping_add(1);

        let p = (ir >> 31) & 1;
        let q = (ir >> 30) & 1;
        if p == 0 {
            self.exec_register(ir);
        } else if q == 0 {
            self.exec_memory(ir);
        } else {
            self.exec_branch(ir);
        }
    }

    fn exec_register(&mut self, ir: u32) {
        let q = (ir >> 30) & 1 != 0;
        let u = (ir >> 29) & 1 != 0;
        let v = (ir >> 28) & 1 != 0;
        let a = ((ir >> 24) & 0xF) as usize;
        let b = ((ir >> 20) & 0xF) as usize;
        let op = RegOp::from_bits((ir >> 16) & 0xF);
        let im = (ir & 0xFFFF) as u16;

        let b_val = self.r[b];
        let c_val = if !q {
            self.r[(ir & 0xF) as usize]
        } else if !v {
            im as u32
        } else {
            0xFFFF_0000 | im as u32
        };

        let result = match op {
            RegOp::Mov => {
                if !u {
                    c_val
                } else if q {
                    c_val << 16
                } else if v {
                    0xD0 | if self.n { 1 << 31 } else { 0 }
                        | if self.z { 1 << 30 } else { 0 }
                        | if self.c { 1 << 29 } else { 0 }
                        | if self.v { 1 << 28 } else { 0 }
                } else {
                    self.h
                }
            }
            RegOp::Lsl => b_val.wrapping_shl(c_val & 31),
            RegOp::Asr => ((b_val as i32) >> (c_val & 31)) as u32,
            RegOp::Ror => b_val.rotate_right(c_val & 31),
            RegOp::And => b_val & c_val,
            RegOp::Ann => b_val & !c_val,
            RegOp::Ior => b_val | c_val,
            RegOp::Xor => b_val ^ c_val,
            RegOp::Add => {
                let (res, carry) = b_val.overflowing_add(c_val.wrapping_add(if u {
                    self.c as u32
                } else {
                    0
                }));
                self.c = carry;
                self.v = ((b_val ^ res) & (c_val ^ res) & 0x8000_0000) != 0;
                res
            }
            RegOp::Sub => {
                let (res, borrow) = b_val.overflowing_sub(c_val.wrapping_add(if u {
                    self.c as u32
                } else {
                    0
                }));
                self.c = borrow;
                self.v = ((b_val ^ c_val) & (b_val ^ res) & 0x8000_0000) != 0;
                res
            }
            RegOp::Mul => {
                if u {
                    let prod = (b_val as u64) * (c_val as u64);
                    self.h = (prod >> 32) as u32;
                    prod as u32
                } else {
                    let prod = (b_val as i32 as i64) * (c_val as i32 as i64);
                    self.h = (prod >> 32) as u32;
                    prod as u32
                }
            }
            RegOp::Div => {
                if !u {
                    if (c_val as i32) > 0 {
                        let bi = b_val as i32;
                        let ci = c_val as i32;
                        let mut q = bi / ci;
                        let mut r = bi % ci;
                        if r < 0 {
                            q -= 1;
                            r += ci;
                        }
                        self.h = r as u32;
                        q as u32
                    } else {
                        let (q, r) = fp::idiv(b_val as i32, c_val as i32, false);
                        self.h = r;
                        q
                    }
                } else {
                    if c_val != 0 {
                        self.h = b_val % c_val;
                        b_val / c_val
                    } else {
                        let (q, r) = fp::idiv(b_val as i32, c_val as i32, true);
                        self.h = r;
                        q
                    }
                }
            }
            RegOp::Fad => fp::fadd(b_val, c_val, u, false),
            RegOp::Fsb => fp::fadd(b_val, c_val, u, true),
            RegOp::Fml => fp::fmul(b_val, c_val),
            RegOp::Fdv => fp::fdiv(b_val, c_val),
        };

        self.set_register(a, result);
    }

    fn set_register(&mut self, a: usize, value: u32) {
        self.r[a] = value;
        self.z = value == 0;
        self.n = (value as i32) < 0;
    }

    fn exec_memory(&mut self, ir: u32) {
        let u = (ir >> 29) & 1 != 0;
        let v = (ir >> 28) & 1 != 0;
        let a = ((ir >> 24) & 0xF) as usize;
        let b = ((ir >> 20) & 0xF) as usize;
        let off = ir & 0x000F_FFFF;
        let off = sign_extend_20(off);
        let address = self.r[b].wrapping_add(off as u32);

        if u {
            // store
            if v {
                self.mem.store_byte(address as usize, self.r[a] as u8);
            } else {
                self.mem.store_word(address as usize, self.r[a]);
            }
        } else {
            // load
            let value = if v {
                self.mem.load_byte(address as usize) as u32
            } else {
                self.mem.load_word(address as usize)
            };
            self.set_register(a, value);
        }
    }

    fn exec_branch(&mut self, ir: u32) {
        let u = (ir >> 29) & 1 != 0;
        let v = (ir >> 28) & 1 != 0;
        let cond = (ir >> 24) & 0x7;
        let invert = (ir >> 27) & 1 != 0;
        let taken = self.evaluate_condition(cond, invert);

        if cond == 7 && (ir & 0x10) != 0 {
            // IRET, gated on the true condition's reserved bit.
            self.pc = self.spc;
            self.z = self.sz;
            self.n = self.sn;
            self.c = self.sc;
            self.v = self.sv;
            self.i_flag = false;
            self.p_flag = false;
            return;
        }
        if cond == 7 && (ir & 0x20) != 0 {
            self.e_flag = (ir & 1) != 0;
        }

        if v {
            self.r[15] = self.pc * 4;
        }

        if !taken {
            return;
        }

        if u {
            let c = (ir & 0xF) as usize;
            self.pc = self.r[c] / 4;
        } else {
            let off = sign_extend_24(ir & 0x00FF_FFFF);
            self.pc = self.pc.wrapping_add(off as u32);
        }
    }

    /// Evaluate one of the 8 condition codes; `invert` flips the sense
    /// (the ISA's top condition bit).
    fn evaluate_condition(&self, cond: u32, invert: bool) -> bool {
        let raw = match cond {
            0 => self.n,                 // MI
            1 => self.z,                 // EQ
            2 => self.c,                 // CS (unsigned <)
            3 => self.v,                 // VS
            4 => self.c || self.z,       // LS (unsigned <=)
            5 => self.n != self.v,       // LT
            6 => self.z || (self.n != self.v), // LE
            _ => true,                   // always
        };
        if cond == 7 {
            !invert
        } else if invert {
            !raw
        } else {
            raw
        }
    }
}

fn sign_extend_20(v: u32) -> i32 {
    let shifted = (v << 12) as i32;
    shifted >> 12
}

fn sign_extend_24(v: u32) -> i32 {
    let shifted = (v << 8) as i32;
    shifted >> 8
}

/// Renders a fixed-position register dump for an interactive debug console,
/// one `cursor::Goto` row per line so repeated prints overwrite in place
/// instead of scrolling.
impl fmt::Display for Risc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{}PC=0x{:08X}", cursor::Goto(1, 1), self.pc * 4)?;
        for (i, chunk) in self.r.chunks(4).enumerate() {
            writeln!(
                f,
                "{}R{:<2} {:08X} R{:<2} {:08X} R{:<2} {:08X} R{:<2} {:08X}",
                cursor::Goto(1, (i + 2) as u16),
                i * 4,
                chunk[0],
                i * 4 + 1,
                chunk[1],
                i * 4 + 2,
                chunk[2],
                i * 4 + 3,
                chunk[3]
            )?;
        }
        writeln!(
            f,
            "{}Z={} N={} C={} V={} I={} E={} P={}",
            cursor::Goto(1, 6),
            self.z as u8,
            self.n as u8,
            self.c as u8,
            self.v as u8,
            self.i_flag as u8,
            self.e_flag as u8,
            self.p_flag as u8
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::mmio::Mmio;

    fn test_cpu() -> Risc {
        let mem = Mmio::new(&Config::default());
        Risc::new(mem)
    }

    /// ADD with unsigned overflow sets the carry flag.
    #[test]
    fn add_sets_carry_on_overflow() {
        let mut cpu = test_cpu();
        cpu.r[1] = 0xFFFF_FFFF;
        cpu.r[2] = 2;
        // ADD R0, R1, R2  (p=0,q=0,u=0,v=0, op=Add=8, a=0,b=1,c=2)
        let ir = (8u32 << 16) | (1 << 20) | (0 << 24) | 2;
        cpu.exec_register(ir);
        assert_eq!(cpu.r[0], 1);
        assert!(cpu.c);
    }

    /// With `q` set and `v` clear, the immediate operand is zero-extended.
    #[test]
    fn immediate_operand_zero_extends() {
        let mut cpu = test_cpu();
        cpu.r[1] = 0;
        // ADD R0, R1, #5  (q=1,v=0, op=Add=8, a=0,b=1)
        let ir = (1u32 << 30) | (8u32 << 16) | (1 << 20) | (0 << 24) | 5;
        cpu.exec_register(ir);
        assert_eq!(cpu.r[0], 5);
    }

    /// With `q` and `v` both set, the immediate operand is filled with
    /// ones in the high half — not sign-extended, so a small positive
    /// `im` still comes out with `0xFFFF` in the top bits.
    #[test]
    fn immediate_operand_high_ones_fill() {
        let mut cpu = test_cpu();
        cpu.r[1] = 0;
        // ADD R0, R1, #5  (q=1,v=1, op=Add=8, a=0,b=1)
        let ir = (1u32 << 30) | (1 << 28) | (8u32 << 16) | (1 << 20) | (0 << 24) | 5;
        cpu.exec_register(ir);
        assert_eq!(cpu.r[0], 0xFFFF_0005);
    }

    /// Signed DIV with a negative dividend rounds toward negative
    /// infinity and keeps the remainder's sign matching the divisor.
    #[test]
    fn signed_div_negative_dividend_floors() {
        let mut cpu = test_cpu();
        cpu.r[1] = (-7i32) as u32;
        cpu.r[2] = 2;
        let ir = (11u32 << 16) | (1 << 20) | (0 << 24) | 2;
        cpu.exec_register(ir);
        assert_eq!(cpu.r[0] as i32, -4);
        assert_eq!(cpu.h as i32, 1);
    }

    /// IRET restores PC and flags from the shadow registers and
    /// clears the in-handler bit.
    #[test]
    fn iret_restores_shadow_state() {
        let mut cpu = test_cpu();
        cpu.spc = 0x1234;
        cpu.sz = true;
        cpu.i_flag = true;
        // Branch, cond=7 (always), bit4 set (IRET).
        let ir = (7u32 << 24) | 0x10;
        cpu.exec_branch(ir);
        assert_eq!(cpu.pc, 0x1234);
        assert!(cpu.z);
        assert!(!cpu.i_flag);
        assert!(!cpu.p_flag);
    }

    /// MOV with `u` and `q` both set loads the zero-extended immediate
    /// shifted into the upper half.
    #[test]
    fn mov_immediate_high_loads_upper_half() {
        let mut cpu = test_cpu();
        // MOV R3, #0x00AB (q=1,u=1,v=0) -> zero-extended, then <<16.
        let ir = (1u32 << 30) | (1 << 29) | (3 << 24) | 0x00AB;
        cpu.exec_register(ir);
        assert_eq!(cpu.r[3], 0x00AB_0000);
    }

    /// MOV with `u` set, `q` clear, `v` set reads the packed condition
    /// flag word instead of an operand.
    #[test]
    fn mov_flag_word_reads_condition_codes() {
        let mut cpu = test_cpu();
        cpu.n = true;
        cpu.c = true;
        // MOV R0, flags (q=0,u=1,v=1)
        let ir = (1u32 << 29) | (1 << 28) | (0 << 24);
        cpu.exec_register(ir);
        assert_eq!(cpu.r[0], 0xD0 | (1 << 31) | (1 << 29));
    }
}
