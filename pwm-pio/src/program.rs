//! The pulse program.
//!
//! A single fixed micro-program produces the output waveform; it is installed
//! once and never changes at runtime. Duty updates arrive through the TX FIFO:
//!
//! ```text
//! .side_set 1 opt
//! .wrap_target
//!     pull noblock side <inactive> ; period start, fetch the latest hold count
//!     mov x, osr                   ; X = hold count (pull reloads X when the FIFO is empty)
//!     mov y, isr                   ; Y = cycle_length - 1, preloaded at configure time
//! countloop:
//!     jmp x != y, skip
//!     nop side <active>            ; transition point reached
//! skip:
//!     jmp y--, countloop
//! .wrap
//! ```
//!
//! Y runs from `cycle_length - 1` down to 0 every period, two cycles per
//! count (`jmp x != y` plus `jmp y--`). When Y passes the value pulled into X
//! the pin switches to the active level and stays there until the `pull` of
//! the next period, so a FIFO word `v` yields exactly `2 * (v + 1)` active
//! state-machine cycles. A word that can never match Y keeps the pin inactive
//! for the whole period.
//!
//! `pull noblock` falls back to X when the FIFO is empty, which is what makes
//! duty updates glitch-free: the state machine keeps replaying the previous
//! hold count until a new one arrives, and a new one only ever takes effect
//! at a period boundary.
//!
//! The three-instruction reload header and the `nop` at the transition point
//! add four state-machine cycles on top of the `2 * cycle_length` counted
//! ones. That overhead is constant per period, well below the duty
//! resolution at the default cycle length, and excluded from the divider
//! model.

use pio::{
    InstructionOperands, JmpCondition, MovDestination, MovOperation, MovSource, Program,
    SetDestination, SideSet,
};

/// State-machine cycles per counted tick: one `jmp x != y` plus one `jmp y--`.
///
/// Physical constant of the pulse program; the clock divider computation
/// models one output period as `CYCLES_PER_TICK * cycle_length` cycles.
pub const CYCLES_PER_TICK: u32 = 2;

/// Largest supported counter period.
///
/// The countdown register is preloaded with `cycle_length - 1` and FIFO words
/// carry `ticks - 1`, so a full 2^16 period still fits the 16-bit duty range.
pub const MAX_CYCLE_LENGTH: u32 = 1 << 16;

/// FIFO word that never matches the countdown register: the pin stays
/// inactive for the whole period.
pub(crate) const ALWAYS_OFF: u32 = u32::MAX;

/// Map a duty tick count to the word pushed into the TX FIFO.
///
/// `0` becomes the never-matching [`ALWAYS_OFF`] word, anything else is
/// shifted down by one to compensate for the program counting match-inclusive.
/// Tick counts above `cycle_length` are clamped.
pub(crate) fn wire_value(ticks: u32, cycle_length: u32) -> u32 {
    match ticks.min(cycle_length) {
        0 => ALWAYS_OFF,
        ticks => ticks - 1,
    }
}

/// Assemble the pulse program.
///
/// `invert` swaps the two side-set levels, yielding an active-low waveform
/// without touching the per-period logic. This is decided at load time; duty
/// updates never re-encode anything.
pub fn pulse_program(invert: bool) -> Program<{ pio::RP2040_MAX_PROGRAM_SIZE }> {
    let (inactive, active) = if invert { (1, 0) } else { (0, 1) };

    let side_set = SideSet::new(true, 1, false);
    let mut a = pio::Assembler::<{ pio::RP2040_MAX_PROGRAM_SIZE }>::new_with_side_set(side_set);

    let mut wrap_target = a.label();
    let mut wrap_source = a.label();
    let mut countloop = a.label();
    let mut skip = a.label();

    a.bind(&mut wrap_target);
    a.pull_with_side_set(false, false, inactive);
    a.mov(MovDestination::X, MovOperation::None, MovSource::OSR);
    a.mov(MovDestination::Y, MovOperation::None, MovSource::ISR);
    a.bind(&mut countloop);
    a.jmp(JmpCondition::XNotEqualY, &mut skip);
    a.nop_with_side_set(active);
    a.bind(&mut skip);
    a.jmp(JmpCondition::YDecNonZero, &mut countloop);
    a.bind(&mut wrap_source);

    a.assemble_with_wrap(wrap_source, wrap_target)
}

/// `pull` (blocking), executed by the host to preload the OSR.
pub(crate) fn pull_block() -> u16 {
    InstructionOperands::PULL {
        if_empty: false,
        block: true,
    }
    .encode()
}

/// `mov isr, osr`, executed by the host to preload the counter period.
pub(crate) fn mov_isr_from_osr() -> u16 {
    InstructionOperands::MOV {
        destination: MovDestination::ISR,
        op: MovOperation::None,
        source: MovSource::OSR,
    }
    .encode()
}

/// `set pins, <level>`, executed by the host to park the pin after a halt.
pub(crate) fn set_pins(level: u8) -> u16 {
    InstructionOperands::SET {
        destination: SetDestination::PINS,
        data: level,
    }
    .encode()
}

/// `set pindirs, 1`, executed by the host to turn the pin into an output.
pub(crate) fn set_pindirs_output() -> u16 {
    InstructionOperands::SET {
        destination: SetDestination::PINDIRS,
        data: 1,
    }
    .encode()
}

/// `jmp <address>`, executed by the host to enter the program.
pub(crate) fn jmp_to(address: u8) -> u16 {
    InstructionOperands::JMP {
        condition: JmpCondition::Always,
        address,
    }
    .encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pio::Instruction;
    use std::vec::Vec;

    fn decoded(invert: bool) -> Vec<Instruction> {
        let program = pulse_program(invert);
        assert_eq!(program.code.len(), 6);
        program
            .code
            .iter()
            .map(|&raw| Instruction::decode(raw, program.side_set).unwrap())
            .collect()
    }

    #[test]
    fn program_wraps_over_the_whole_body() {
        let program = pulse_program(false);
        assert_eq!(program.wrap.target, 0);
        assert_eq!(program.wrap.source, 5);
        assert_eq!(program.origin, None);
    }

    #[test]
    fn side_set_is_one_optional_bit() {
        let program = pulse_program(false);
        assert!(program.side_set.optional());
        assert!(!program.side_set.pindirs());
        // One data bit plus the enable bit.
        assert_eq!(program.side_set.bits(), 2);
    }

    #[test]
    fn program_matches_the_expected_instruction_sequence() {
        let instructions = decoded(false);

        assert!(matches!(
            instructions[0].operands,
            InstructionOperands::PULL {
                if_empty: false,
                block: false,
            }
        ));
        assert_eq!(instructions[0].side_set, Some(0));

        assert!(matches!(
            instructions[1].operands,
            InstructionOperands::MOV {
                destination: MovDestination::X,
                op: MovOperation::None,
                source: MovSource::OSR,
            }
        ));
        assert!(matches!(
            instructions[2].operands,
            InstructionOperands::MOV {
                destination: MovDestination::Y,
                op: MovOperation::None,
                source: MovSource::ISR,
            }
        ));

        assert!(matches!(
            instructions[3].operands,
            InstructionOperands::JMP {
                condition: JmpCondition::XNotEqualY,
                address: 5,
            }
        ));
        assert_eq!(instructions[3].side_set, None);

        assert_eq!(instructions[4].side_set, Some(1));

        assert!(matches!(
            instructions[5].operands,
            InstructionOperands::JMP {
                condition: JmpCondition::YDecNonZero,
                address: 3,
            }
        ));
    }

    #[test]
    fn inverted_program_swaps_side_set_levels_only() {
        let normal = pulse_program(false);
        let inverted_raw = pulse_program(true);
        let inverted = decoded(true);

        assert_eq!(inverted[0].side_set, Some(1));
        assert_eq!(inverted[4].side_set, Some(0));
        // Everything except the two side-set carrying instructions is identical.
        for (index, (&n, &i)) in normal.code.iter().zip(inverted_raw.code.iter()).enumerate() {
            if index != 0 && index != 4 {
                assert_eq!(n, i);
            }
        }
    }

    #[test]
    fn wire_value_maps_the_duty_range() {
        assert_eq!(wire_value(0, 65536), ALWAYS_OFF);
        assert_eq!(wire_value(1, 65536), 0);
        assert_eq!(wire_value(6500, 65536), 6499);
        assert_eq!(wire_value(65536, 65536), 65535);
        // Out-of-range tick counts clamp to a full period.
        assert_eq!(wire_value(70_000, 65536), 65535);
        assert_eq!(wire_value(5, 4), 3);
    }

    #[test]
    fn preload_instructions_encode_as_documented() {
        // Values from the datasheet's instruction encoding tables.
        assert_eq!(pull_block(), 0x80a0);
        assert_eq!(jmp_to(0), 0x0000);
        assert_eq!(jmp_to(26), 0x001a);
    }
}
