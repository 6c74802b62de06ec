//! Register-level access to the PIO block and its state machines.
//!
//! [`PulsePio`] owns one of the two PIO blocks, keeps track of instruction
//! memory and installs the pulse program; [`StateMachine`] wraps the
//! per-state-machine registers a channel needs. Neither knows anything about
//! duty cycles or frequencies; that lives in [`crate::channel`].

use core::marker::PhantomData;
use core::ops::Deref;
use core::ptr::write_volatile;

use pio::SideSet;

use crate::divider::ClockDivider;
use crate::pac;
use crate::program;
use crate::resets::SubsystemReset;

const PIO_INSTRUCTION_COUNT: usize = 32;

/// PIO block instances able to run the pulse program.
pub trait PIOExt: Deref<Target = pac::pio0::RegisterBlock> + SubsystemReset + Sized {
    /// Pin function routing this block to the pads.
    const FUNCSEL: pac::io_bank0::gpio::gpio_ctrl::FUNCSEL_A;
}

impl PIOExt for pac::PIO0 {
    const FUNCSEL: pac::io_bank0::gpio::gpio_ctrl::FUNCSEL_A =
        pac::io_bank0::gpio::gpio_ctrl::FUNCSEL_A::PIO0;
}

impl PIOExt for pac::PIO1 {
    const FUNCSEL: pac::io_bank0::gpio::gpio_ctrl::FUNCSEL_A =
        pac::io_bank0::gpio::gpio_ctrl::FUNCSEL_A::PIO1;
}

/// Install location of one pulse-program polarity.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoadedProgram {
    pub(crate) offset: u8,
    pub(crate) wrap_source: u8,
    pub(crate) wrap_target: u8,
    pub(crate) sideset_count: u8,
}

/// One PIO block, reset and owned by this driver.
pub struct PulsePio<P: PIOExt> {
    pio: P,
    used_instruction_space: u32, // bit for each instruction slot
    loaded: [Option<LoadedProgram>; 2],
}

impl<P: PIOExt> core::fmt::Debug for PulsePio<P> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("PulsePio")
            .field("used_instruction_space", &self.used_instruction_space)
            .field("pio", &"PIO { .. }")
            .finish()
    }
}

impl<P: PIOExt> PulsePio<P> {
    /// Bring the block out of reset and take ownership of it.
    pub fn new(pio: P, resets: &mut pac::RESETS) -> Self {
        pio.reset_bring_up(resets);
        PulsePio {
            pio,
            used_instruction_space: 0,
            loaded: [None; 2],
        }
    }

    /// Put the block back into reset and release it.
    ///
    /// All channels built on this block must have been deinitialized; the
    /// reset stops anything still running.
    pub fn free(self, resets: &mut pac::RESETS) -> P {
        self.pio.reset_bring_down(resets);
        self.pio
    }

    /// Install the pulse program with the given polarity, or reuse an
    /// earlier install. Channels of the same polarity share one copy.
    pub(crate) fn install(&mut self, invert: bool) -> LoadedProgram {
        if let Some(loaded) = self.loaded[invert as usize] {
            return loaded;
        }

        let program = program::pulse_program(invert);
        let offset = find_free_offset(self.used_instruction_space, program.code.len())
            .expect("both pulse program polarities fit the instruction memory");
        for (i, &raw) in program.code.iter().enumerate() {
            let instr = relocate(raw, offset, program.side_set);
            self.pio
                .instr_mem(usize::from(offset) + i)
                .write(|w| unsafe { w.bits(u32::from(instr)) });
        }
        self.used_instruction_space |= ((1 << program.code.len()) - 1) << offset;

        let loaded = LoadedProgram {
            offset,
            wrap_source: offset + program.wrap.source,
            wrap_target: offset + program.wrap.target,
            sideset_count: program.side_set.bits(),
        };
        self.loaded[invert as usize] = Some(loaded);
        loaded
    }

    pub(crate) fn state_machine(&self, index: u8) -> StateMachine<P> {
        StateMachine {
            block: self.pio.deref(),
            index,
            _phantom: PhantomData,
        }
    }
}

/// Find the highest offset where `len` instructions fit.
fn find_free_offset(used_instruction_space: u32, len: usize) -> Option<u8> {
    if len > PIO_INSTRUCTION_COUNT {
        return None;
    }
    let mask = ((1u64 << len) - 1) as u32;
    (0..=PIO_INSTRUCTION_COUNT - len)
        .rev()
        .find(|&offset| used_instruction_space & (mask << offset) == 0)
        .map(|offset| offset as u8)
}

/// Re-encode one instruction for its install offset.
///
/// Only `JMP` carries an absolute address; everything else passes through
/// unchanged.
fn relocate(raw: u16, offset: u8, side_set: SideSet) -> u16 {
    // The instruction comes out of this crate's own assembler, so decoding
    // cannot fail.
    let mut instr = pio::Instruction::decode(raw, side_set).unwrap();
    if let pio::InstructionOperands::JMP { condition, address } = instr.operands {
        let address = address + offset;
        assert!(
            usize::from(address) < PIO_INSTRUCTION_COUNT,
            "relocated JMP points outside the instruction memory"
        );
        instr.operands = pio::InstructionOperands::JMP { condition, address };
    }
    instr.encode(side_set)
}

/// Registers of a single state machine.
///
/// Holds raw pointers into the register block so that channels do not borrow
/// the [`PulsePio`].
pub(crate) struct StateMachine<P: PIOExt> {
    block: *const pac::pio0::RegisterBlock,
    index: u8,
    _phantom: PhantomData<P>,
}

impl<P: PIOExt> StateMachine<P> {
    fn block(&self) -> &pac::pio0::RegisterBlock {
        // Safety: the block stays mapped for the lifetime of the chip, and
        // every register touched below is either per-state-machine or
        // accessed through its atomic set/clear aliases.
        unsafe { &*self.block }
    }

    fn sm(&self) -> &pac::pio0::SM {
        self.block().sm(usize::from(self.index))
    }

    /// Start and stop the state machine.
    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        // Bits 3:0 are SM_ENABLE.
        let mask = 1 << self.index;
        if enabled {
            self.set_ctrl_bits(mask);
        } else {
            self.clear_ctrl_bits(mask);
        }
    }

    /// Clear transient execution state.
    pub(crate) fn restart(&mut self) {
        // Bits 7:4 are SM_RESTART.
        self.set_ctrl_bits(1 << (self.index + 4));
    }

    /// Restart the fractional clock divider from a clean phase.
    pub(crate) fn restart_clock(&mut self) {
        // Bits 11:8 are CLKDIV_RESTART.
        self.set_ctrl_bits(1 << (self.index + 8));
    }

    fn set_ctrl_bits(&mut self, bits: u32) {
        const ATOMIC_SET_OFFSET: usize = 0x2000;
        // Safety: the atomic alias of the shared CTRL register.
        unsafe {
            write_volatile(
                self.block().ctrl().as_ptr().add(ATOMIC_SET_OFFSET / 4),
                bits,
            );
        }
    }

    fn clear_ctrl_bits(&mut self, bits: u32) {
        const ATOMIC_CLEAR_OFFSET: usize = 0x3000;
        // Safety: the atomic alias of the shared CTRL register.
        unsafe {
            write_volatile(
                self.block().ctrl().as_ptr().add(ATOMIC_CLEAR_OFFSET / 4),
                bits,
            );
        }
    }

    pub(crate) fn set_clock_divider(&mut self, divider: ClockDivider) {
        self.sm().sm_clkdiv().write(|w| {
            unsafe {
                w.int().bits(divider.int());
                w.frac().bits(divider.frac());
            }
            w
        });
    }

    /// Immediately execute one instruction, regardless of whether the state
    /// machine is enabled.
    pub(crate) fn exec_instruction(&mut self, instruction: u16) {
        self.sm()
            .sm_instr()
            .write(|w| unsafe { w.bits(u32::from(instruction)) });
    }

    /// Write an element to the TX FIFO.
    ///
    /// Returns `false` without writing when the FIFO is full.
    pub(crate) fn write_tx(&mut self, value: u32) -> bool {
        // Safety: FSTAT is read-only for software.
        let is_full = self.block().fstat().read().txfull().bits() & (1 << self.index) != 0;
        if is_full {
            return false;
        }

        // Safety: the FIFO register is unique to this state machine.
        self.block()
            .txf(usize::from(self.index))
            .write(|w| unsafe { w.bits(value) });
        true
    }

    /// Discard everything queued in both FIFOs.
    pub(crate) fn clear_fifos(&mut self) {
        // Toggling FJOIN_RX empties the FIFOs as a side effect.
        self.sm().sm_shiftctrl().modify(|_, w| w.fjoin_rx().set_bit());
        self.sm()
            .sm_shiftctrl()
            .modify(|_, w| w.fjoin_rx().clear_bit());
    }

    /// Point execution control and pin mapping at the installed pulse
    /// program and its output pin.
    pub(crate) fn configure_pulse_output(&mut self, pin: u8, loaded: LoadedProgram) {
        self.sm().sm_execctrl().write(|w| {
            // The program uses optional side-set.
            w.side_en().bit(true);
            unsafe {
                w.wrap_top().bits(loaded.wrap_source);
                w.wrap_bottom().bits(loaded.wrap_target);
            }
            w
        });
        self.sm().sm_pinctrl().write(|w| {
            unsafe {
                w.sideset_count().bits(loaded.sideset_count);
                w.sideset_base().bits(pin);
                // SET drives the same single pin: pin direction at start-up
                // and the parked level on deinit.
                w.set_count().bits(1);
                w.set_base().bits(pin);
            }
            w
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_are_allocated_from_the_top() {
        assert_eq!(find_free_offset(0, 6), Some(26));

        let after_first = 0b0011_1111 << 26;
        assert_eq!(find_free_offset(after_first, 6), Some(20));
    }

    #[test]
    fn full_memory_has_no_offset() {
        assert_eq!(find_free_offset(u32::MAX, 6), None);
        assert_eq!(find_free_offset(0, 33), None);
    }

    #[test]
    fn relocation_shifts_jmp_targets_only() {
        let program = program::pulse_program(false);
        let offset = 8;

        let relocated: std::vec::Vec<u16> = program
            .code
            .iter()
            .map(|&raw| relocate(raw, offset, program.side_set))
            .collect();

        // The non-JMP instructions are untouched.
        for index in [0usize, 1, 2, 4] {
            assert_eq!(relocated[index], program.code[index]);
        }
        // The two JMPs now point at their shifted targets.
        let jmp_not_equal = pio::Instruction::decode(relocated[3], program.side_set).unwrap();
        assert!(matches!(
            jmp_not_equal.operands,
            pio::InstructionOperands::JMP {
                condition: pio::JmpCondition::XNotEqualY,
                address: 13,
            }
        ));
        let jmp_dec = pio::Instruction::decode(relocated[5], program.side_set).unwrap();
        assert!(matches!(
            jmp_dec.operands,
            pio::InstructionOperands::JMP {
                condition: pio::JmpCondition::YDecNonZero,
                address: 11,
            }
        ));
    }
}
