//! Provides the single simulated RV32I hart and its instruction loop.

mod execute;

use crate::bus::{AccessError, Bus};
use crate::instruction::{
    BranchCondition, DecodeError, Instruction, LoadWidth, RegImmOp, RegRegOp, RegShiftImmOp,
    StoreWidth,
};
use crate::registers::Registers;
use crate::resources::sim_control::HaltLine;
use crate::system_bus::SystemBus;
use crate::Alignment;
use execute::Executor;
use log::{debug, trace};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    /// Address to which the hart's PC register is reset. Usually the base of
    /// the instruction memory.
    pub reset_vector: u32,
}

/// A single in-order RV32I hart wired to a system bus.
///
/// > From the perspective of software running in a given execution
/// > environment, a hart is a resource that autonomously fetches and executes
/// > RISC-V instructions within that execution environment.
///
/// One [`step`](Self::step) performs a full fetch → decode → execute cycle
/// and then polls the halt line. The hart moves through three logical states
/// (see [`Status`]): it starts `Running`, and every step either keeps it
/// there, parks it in `Halted` when guest software raised the halt line, or
/// parks it in `Faulted` when the step tripped an [`Exception`]. Both
/// terminal states are stable: further steps are no-ops.
#[derive(Debug)]
pub struct Core {
    config: Config,
    system_bus: SystemBus,
    registers: Registers,
    halt: HaltLine,
    status: Status,
    instret: u64,
}

impl Core {
    pub fn new(system_bus: SystemBus, halt: HaltLine, config: Config) -> Self {
        let registers = Registers::new(config.reset_vector);
        Self {
            config,
            system_bus,
            registers,
            halt,
            status: Status::Running,
            instret: 0,
        }
    }

    /// Provide a read-only view of this hart's configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    pub fn system_bus(&self) -> &SystemBus {
        &self.system_bus
    }

    pub fn system_bus_mut(&mut self) -> &mut SystemBus {
        &mut self.system_bus
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    /// Number of instructions retired since construction or the last reset.
    pub fn instret(&self) -> u64 {
        self.instret
    }

    /// Force the hart back to its reset state. Bus devices are not touched.
    pub fn reset(&mut self) {
        self.registers = Registers::new(self.config.reset_vector);
        self.status = Status::Running;
        self.instret = 0;
        self.halt.clear();
    }

    /// Fetch, decode, and execute one instruction, then poll the halt line.
    ///
    /// A fault transitions the hart to [`Status::Faulted`], recording the
    /// offending PC; a raised halt line transitions it to [`Status::Halted`]
    /// after the instruction that caused it has retired. Stepping a hart in a
    /// terminal state does nothing.
    pub fn step(&mut self) -> &Status {
        if self.status != Status::Running {
            return &self.status;
        }
        let pc = self.registers.pc();
        match self.exec_one(pc) {
            Ok(()) => {
                self.instret += 1;
                if self.halt.is_raised() {
                    debug!("halt line raised, {} instructions retired", self.instret);
                    self.status = Status::Halted;
                }
            }
            Err(cause) => {
                let fault = Fault { pc, cause };
                debug!("{fault}");
                self.status = Status::Faulted(fault);
            }
        }
        &self.status
    }

    /// Steps until the hart leaves the `Running` state.
    pub fn run(&mut self) -> &Status {
        while self.status == Status::Running {
            self.step();
        }
        &self.status
    }

    /// Steps at most `max_steps` times, stopping early on halt or fault.
    ///
    /// A bound on the instruction count is host policy; the returned status
    /// is still `Running` when the bound was the reason to stop.
    pub fn run_steps(&mut self, max_steps: u64) -> &Status {
        for _ in 0..max_steps {
            if self.status != Status::Running {
                break;
            }
            self.step();
        }
        &self.status
    }

    fn exec_one(&mut self, pc: u32) -> ExecutionResult {
        let raw_instruction = self.fetch_instruction(pc)?;
        let instruction = Instruction::decode(raw_instruction)?;
        trace!("{pc:#010x}: {instruction}");
        self.execute_instruction(instruction)
    }

    /// "Independent instruction fetch unit"
    ///
    /// > The base RISC-V ISA has fixed-length 32-bit instructions that must
    /// > be naturally aligned on 32-bit boundaries.
    ///
    /// Jumps and taken branches do not validate their target; a misaligned
    /// target parks here, at the fetch that follows it.
    fn fetch_instruction(&mut self, address: u32) -> Result<u32, Exception> {
        if !Alignment::WORD.is_aligned(address) {
            return Err(Exception::InstructionAddressMisaligned(address));
        }
        self.system_bus
            .read_u32(address)
            .map_err(|err| match err {
                AccessError::MisalignedAccess { .. } => {
                    Exception::InstructionAddressMisaligned(address)
                }
                _ => Exception::InstructionAccessFault(address),
            })
    }

    /// Execute a single decoded instruction on this hart.
    ///
    /// This performs only the instruction-specific operations: updating `x`
    /// registers, accessing memory through the bus, and updating the `pc`
    /// register. The retired-instruction counter and the halt poll belong to
    /// [`step`](Self::step).
    pub fn execute_instruction(&mut self, instruction: Instruction) -> ExecutionResult {
        let mut executor = Executor { core: self };
        match instruction {
            Instruction::OpImm {
                op,
                dest,
                src,
                immediate,
            } => {
                let op = match op {
                    RegImmOp::Addi => Executor::addi,
                    RegImmOp::Slti => Executor::slti,
                    RegImmOp::Sltiu => Executor::sltiu,
                    RegImmOp::Xori => Executor::xori,
                    RegImmOp::Ori => Executor::ori,
                    RegImmOp::Andi => Executor::andi,
                };
                op(&mut executor, dest, src, immediate)
            }
            Instruction::OpShiftImm {
                op,
                dest,
                src,
                shift_amount_u5,
            } => {
                let op = match op {
                    RegShiftImmOp::Slli => Executor::slli,
                    RegShiftImmOp::Srli => Executor::srli,
                    RegShiftImmOp::Srai => Executor::srai,
                };
                op(&mut executor, dest, src, shift_amount_u5)
            }
            Instruction::Auipc { dest, immediate } => executor.auipc(dest, immediate),
            Instruction::Lui { dest, immediate } => executor.lui(dest, immediate),
            Instruction::Op {
                op,
                dest,
                src1,
                src2,
            } => {
                let op = match op {
                    RegRegOp::Add => Executor::add,
                    RegRegOp::Slt => Executor::slt,
                    RegRegOp::Sltu => Executor::sltu,
                    RegRegOp::And => Executor::and,
                    RegRegOp::Or => Executor::or,
                    RegRegOp::Xor => Executor::xor,
                    RegRegOp::Sll => Executor::sll,
                    RegRegOp::Srl => Executor::srl,
                    RegRegOp::Sub => Executor::sub,
                    RegRegOp::Sra => Executor::sra,
                };
                op(&mut executor, dest, src1, src2)
            }
            Instruction::Jal { dest, offset } => executor.jal(dest, offset),
            Instruction::Jalr { dest, base, offset } => executor.jalr(dest, base, offset),
            Instruction::Branch {
                condition,
                src1,
                src2,
                offset,
            } => {
                let op = match condition {
                    BranchCondition::Beq => Executor::beq,
                    BranchCondition::Bne => Executor::bne,
                    BranchCondition::Blt => Executor::blt,
                    BranchCondition::Bltu => Executor::bltu,
                    BranchCondition::Bge => Executor::bge,
                    BranchCondition::Bgeu => Executor::bgeu,
                };
                op(&mut executor, src1, src2, offset)
            }
            Instruction::Load {
                width,
                dest,
                base,
                offset,
            } => {
                let op = match width {
                    LoadWidth::Lb => Executor::lb,
                    LoadWidth::Lh => Executor::lh,
                    LoadWidth::Lw => Executor::lw,
                    LoadWidth::Lbu => Executor::lbu,
                    LoadWidth::Lhu => Executor::lhu,
                };
                op(&mut executor, dest, base, offset)
            }
            Instruction::Store {
                width,
                src,
                base,
                offset,
            } => {
                let op = match width {
                    StoreWidth::Sb => Executor::sb,
                    StoreWidth::Sh => Executor::sh,
                    StoreWidth::Sw => Executor::sw,
                };
                op(&mut executor, src, base, offset)
            }
        }
    }
}

/// The hart's position in its three-state lifecycle.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Status {
    /// The hart will execute an instruction at the next step.
    Running,
    /// Guest software raised the halt line; no further instructions retire.
    Halted,
    /// A step tripped an exception; no further instructions retire.
    Faulted(Fault),
}

/// A fault that parked the hart, reported with the PC of the offending
/// instruction.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
#[error("hart faulted at {pc:#010x}: {cause}")]
pub struct Fault {
    pub pc: u32,
    pub cause: Exception,
}

/// Result of executing a single instruction. [`Ok`] if execution went
/// normal, [`Err`] if an exception occurred.
pub type ExecutionResult = Result<(), Exception>;

/// Exceptions this hart can raise. No trap vectoring is modeled; any
/// exception simply parks the hart in [`Status::Faulted`].
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum Exception {
    /// Instruction address is not on a four-byte aligned boundary in memory.
    /// Raised at fetch time, including for the target of a taken branch or
    /// jump.
    #[error("instruction address misaligned: {0:#010x}")]
    InstructionAddressMisaligned(u32),
    #[error("instruction access fault at {0:#010x}")]
    InstructionAccessFault(u32),
    /// Attempt to execute a word that does not decode to a supported
    /// instruction; carries the raw instruction word.
    #[error("illegal instruction: {0:#010x}")]
    IllegalInstruction(u32),
    #[error("load address misaligned: {0:#010x}")]
    LoadAddressMisaligned(u32),
    #[error("load access fault at {0:#010x}")]
    LoadAccessFault(u32),
    #[error("store address misaligned: {0:#010x}")]
    StoreAddressMisaligned(u32),
    #[error("store access fault at {0:#010x}")]
    StoreAccessFault(u32),
}

impl From<DecodeError> for Exception {
    fn from(err: DecodeError) -> Self {
        Self::IllegalInstruction(err.raw_instruction())
    }
}
