use super::{Core, Exception, ExecutionResult};
use crate::bus::{AccessError, Bus};
use crate::registers::{Registers, Specifier};
use crate::system_bus::SystemBus;

/// Applies the per-instruction semantics to a hart's architectural state.
///
/// Every method executes one instruction: it reads and writes the `x`
/// registers, routes loads and stores through the system bus, and leaves the
/// `pc` register pointing at the next instruction. The default next PC is
/// `pc + 4`; jumps and taken branches set it explicitly and do not validate
/// the target's alignment, since a misaligned target faults at the next
/// fetch.
#[derive(Debug)]
pub(super) struct Executor<'c> {
    pub core: &'c mut Core,
}

impl Executor<'_> {
    /// Executes an `addi` instruction.
    ///
    /// > ADDI adds the sign-extended 12-bit immediate to register rs1.
    /// > Arithmetic overflow is ignored and the result is simply the low XLEN
    /// > bits of the result. ADDI rd, rs1, 0 is used to implement the MV rd,
    /// > rs1 assembler pseudoinstruction.
    pub fn addi(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        self.reg_imm_op(dest, src, immediate, |s, imm| s.wrapping_add_signed(imm))
    }

    /// Executes a `slti` instruction.
    ///
    /// > SLTI (set less than immediate) places the value 1 in register rd if
    /// > register rs1 is less than the sign-extended immediate when both are
    /// > treated as signed numbers, else 0 is written to rd.
    pub fn slti(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        self.reg_imm_op(dest, src, immediate, |s, imm| ((s as i32) < imm) as u32)
    }

    /// Executes a `sltiu` instruction.
    ///
    /// > SLTIU is similar but compares the values as unsigned numbers (i.e.,
    /// > the immediate is first sign-extended to XLEN bits then treated as an
    /// > unsigned number). Note, SLTIU rd, rs1, 1 sets rd to 1 if rs1 equals
    /// > zero, otherwise sets rd to 0 (assembler pseudoinstruction SEQZ rd,
    /// > rs).
    pub fn sltiu(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        self.reg_imm_op(dest, src, immediate, |s, imm| (s < (imm as u32)) as u32)
    }

    pub fn andi(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        self.reg_imm_op(dest, src, immediate, |s, imm| s & (imm as u32))
    }

    pub fn ori(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        self.reg_imm_op(dest, src, immediate, |s, imm| s | (imm as u32))
    }

    pub fn xori(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        self.reg_imm_op(dest, src, immediate, |s, imm| s ^ (imm as u32))
    }

    /// Executes a `slli` instruction.
    ///
    /// > SLLI is a logical left shift (zeros are shifted into the lower
    /// > bits).
    ///
    /// # Panics
    ///
    /// `shift_amount_u5` must fit in a u5 (`0..=31`), otherwise this will
    /// panic.
    pub fn slli(
        &mut self,
        dest: Specifier,
        src: Specifier,
        shift_amount_u5: u32,
    ) -> ExecutionResult {
        self.reg_shamt_op(dest, src, shift_amount_u5, |s, shamt| s << shamt)
    }

    /// Executes a `srli` instruction.
    ///
    /// > SRLI is a logical right shift (zeros are shifted into the upper
    /// > bits).
    ///
    /// # Panics
    ///
    /// `shift_amount_u5` must fit in a u5 (`0..=31`), otherwise this will
    /// panic.
    pub fn srli(
        &mut self,
        dest: Specifier,
        src: Specifier,
        shift_amount_u5: u32,
    ) -> ExecutionResult {
        self.reg_shamt_op(dest, src, shift_amount_u5, |s, shamt| s >> shamt)
    }

    /// Executes a `srai` instruction.
    ///
    /// > SRAI is an arithmetic right shift (the original sign bit is copied
    /// > into the vacated upper bits).
    ///
    /// # Panics
    ///
    /// `shift_amount_u5` must fit in a u5 (`0..=31`), otherwise this will
    /// panic.
    pub fn srai(
        &mut self,
        dest: Specifier,
        src: Specifier,
        shift_amount_u5: u32,
    ) -> ExecutionResult {
        self.reg_shamt_op(dest, src, shift_amount_u5, |s, shamt| {
            ((s as i32) >> shamt) as u32
        })
    }

    /// Executes a `lui` instruction.
    ///
    /// > LUI (load upper immediate) is used to build 32-bit constants and
    /// > uses the U-type format. LUI places the U-immediate value in the top
    /// > 20 bits of the destination register rd, filling in the lowest 12
    /// > bits with zeros.
    pub fn lui(&mut self, dest: Specifier, immediate: i32) -> ExecutionResult {
        let registers = &mut self.core.registers;
        registers.set_x(dest, immediate as u32);
        increment_pc(registers);
        Ok(())
    }

    /// Executes an `auipc` instruction.
    ///
    /// > AUIPC (add upper immediate to pc) is used to build pc-relative
    /// > addresses and uses the U-type format. AUIPC forms a 32-bit offset
    /// > from the 20-bit U-immediate, filling in the lowest 12 bits with
    /// > zeros, adds this offset to the address of the AUIPC instruction,
    /// > then places the result in register rd.
    pub fn auipc(&mut self, dest: Specifier, immediate: i32) -> ExecutionResult {
        let registers = &mut self.core.registers;
        let result = registers.pc().wrapping_add_signed(immediate);
        registers.set_x(dest, result);
        increment_pc(registers);
        Ok(())
    }

    pub fn add(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1.wrapping_add(s2))
    }

    pub fn sub(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1.wrapping_sub(s2))
    }

    /// > SLT and SLTU perform signed and unsigned compares respectively,
    /// > writing 1 to rd if rs1 < rs2, 0 otherwise.
    pub fn slt(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as i32) < (s2 as i32)) as u32
        })
    }

    pub fn sltu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| (s1 < s2) as u32)
    }

    pub fn and(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 & s2)
    }

    pub fn or(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 | s2)
    }

    pub fn xor(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 ^ s2)
    }

    /// > SLL, SRL, and SRA perform logical left, logical right, and
    /// > arithmetic right shifts on the value in register rs1 by the shift
    /// > amount held in the lower 5 bits of register rs2.
    pub fn sll(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 << (s2 & 0x1F))
    }

    pub fn srl(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 >> (s2 & 0x1F))
    }

    pub fn sra(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as i32) >> (s2 & 0x1F)) as u32
        })
    }

    pub fn jal(&mut self, dest: Specifier, offset: i32) -> ExecutionResult {
        self.jump_op(dest, |registers| registers.pc().wrapping_add_signed(offset))
    }

    /// The target is computed from the old `rs1` before the link value is
    /// written, so `jalr rd, rs1, imm` works even when `rd == rs1`. Only bit
    /// 0 of the target is cleared; a target left 2-mod-4 becomes a
    /// misaligned-fetch fault one step later.
    pub fn jalr(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.jump_op(dest, |registers| {
            registers.x(base).wrapping_add_signed(offset) & !1
        })
    }

    pub fn beq(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        self.cond_branch(src1, src2, offset, |s1, s2| s1 == s2)
    }

    pub fn bne(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        self.cond_branch(src1, src2, offset, |s1, s2| s1 != s2)
    }

    pub fn blt(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        self.cond_branch(src1, src2, offset, |s1, s2| (s1 as i32) < (s2 as i32))
    }

    pub fn bltu(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        self.cond_branch(src1, src2, offset, |s1, s2| s1 < s2)
    }

    pub fn bge(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        self.cond_branch(src1, src2, offset, |s1, s2| (s1 as i32) >= (s2 as i32))
    }

    pub fn bgeu(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        self.cond_branch(src1, src2, offset, |s1, s2| s1 >= s2)
    }

    pub fn lb(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.load_op(dest, base, offset, |bus, address| {
            bus.read_u8(address).map(|value| value as i8 as u32)
        })
    }

    pub fn lbu(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.load_op(dest, base, offset, |bus, address| {
            bus.read_u8(address).map(|value| value as u32)
        })
    }

    pub fn lh(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.load_op(dest, base, offset, |bus, address| {
            bus.read_u16(address).map(|value| value as i16 as u32)
        })
    }

    pub fn lhu(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.load_op(dest, base, offset, |bus, address| {
            bus.read_u16(address).map(|value| value as u32)
        })
    }

    pub fn lw(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.load_op(dest, base, offset, |bus, address| bus.read_u32(address))
    }

    pub fn sb(&mut self, src: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.store_op(src, base, offset, |bus, address, value| {
            bus.write_u8(address, value as u8)
        })
    }

    pub fn sh(&mut self, src: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.store_op(src, base, offset, |bus, address, value| {
            bus.write_u16(address, value as u16)
        })
    }

    pub fn sw(&mut self, src: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.store_op(src, base, offset, |bus, address, value| {
            bus.write_u32(address, value)
        })
    }

    // Private generic implementations

    fn reg_imm_op<F>(
        &mut self,
        dest: Specifier,
        src: Specifier,
        immediate: i32,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u32, i32) -> u32,
    {
        let registers = &mut self.core.registers;
        registers.set_x(dest, op(registers.x(src), immediate));
        increment_pc(registers);
        Ok(())
    }

    fn reg_shamt_op<F>(
        &mut self,
        dest: Specifier,
        src: Specifier,
        shift_amount_u5: u32,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u32, u32) -> u32,
    {
        if shift_amount_u5 > 31 {
            panic!("out of range u5 used");
        }
        let registers = &mut self.core.registers;
        registers.set_x(dest, op(registers.x(src), shift_amount_u5));
        increment_pc(registers);
        Ok(())
    }

    fn reg_reg_op<F>(
        &mut self,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u32, u32) -> u32,
    {
        let registers = &mut self.core.registers;
        registers.set_x(dest, op(registers.x(src1), registers.x(src2)));
        increment_pc(registers);
        Ok(())
    }

    fn jump_op<F>(&mut self, dest: Specifier, compute_target: F) -> ExecutionResult
    where
        F: FnOnce(&Registers) -> u32,
    {
        let registers = &mut self.core.registers;
        // Compute the target before touching `dest`; they may be the same
        // register.
        let new_pc = compute_target(registers);
        let old_pc = std::mem::replace(registers.pc_mut(), new_pc);
        registers.set_x(dest, old_pc.wrapping_add(4));
        Ok(())
    }

    // Takes the branch if `predicate` returns `true`.
    fn cond_branch<P>(
        &mut self,
        src1: Specifier,
        src2: Specifier,
        offset: i32,
        predicate: P,
    ) -> ExecutionResult
    where
        P: FnOnce(u32, u32) -> bool,
    {
        let registers = &mut self.core.registers;
        if predicate(registers.x(src1), registers.x(src2)) {
            let new_pc = registers.pc().wrapping_add_signed(offset);
            *registers.pc_mut() = new_pc;
        } else {
            increment_pc(registers);
        }
        Ok(())
    }

    fn load_op<F>(&mut self, dest: Specifier, base: Specifier, offset: i32, op: F) -> ExecutionResult
    where
        F: FnOnce(&mut SystemBus, u32) -> Result<u32, AccessError>,
    {
        let address = self.core.registers.x(base).wrapping_add_signed(offset);
        match op(&mut self.core.system_bus, address) {
            Ok(value) => {
                let registers = &mut self.core.registers;
                registers.set_x(dest, value);
                increment_pc(registers);
                Ok(())
            }
            Err(AccessError::MisalignedAccess { .. }) => {
                Err(Exception::LoadAddressMisaligned(address))
            }
            Err(_) => Err(Exception::LoadAccessFault(address)),
        }
    }

    fn store_op<F>(&mut self, src: Specifier, base: Specifier, offset: i32, op: F) -> ExecutionResult
    where
        F: FnOnce(&mut SystemBus, u32, u32) -> Result<(), AccessError>,
    {
        let value = self.core.registers.x(src);
        let address = self.core.registers.x(base).wrapping_add_signed(offset);
        match op(&mut self.core.system_bus, address, value) {
            Ok(()) => {
                increment_pc(&mut self.core.registers);
                Ok(())
            }
            Err(AccessError::MisalignedAccess { .. }) => {
                Err(Exception::StoreAddressMisaligned(address))
            }
            Err(_) => Err(Exception::StoreAccessFault(address)),
        }
    }
}

fn increment_pc(registers: &mut Registers) {
    let pc = registers.pc_mut();
    *pc = pc.wrapping_add(4);
}
