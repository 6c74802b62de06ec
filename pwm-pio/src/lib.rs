//! PWM output on arbitrary GPIO pins, implemented on the RP2040's PIO.
//!
//! The RP2040's dedicated PWM slices are a scarce resource with a fixed pin
//! mapping; a pin either belongs to a slice's A/B channel or it does not.
//! This crate synthesizes an equivalent waveform on a PIO state machine
//! instead, which can drive any bank 0 GPIO.
//!
//! A tiny fixed program (see [`program`]) toggles the pin and counts down a
//! hold value pulled from the TX FIFO, giving a constant period of
//! `2 * cycle_length` state-machine cycles with the high/low transition point
//! set by the last FIFO word. The host side (see [`channel`]) solves the
//! fractional clock divider for a requested frequency, converts duty requests
//! (16-bit value, fraction or nanoseconds) into tick counts and pushes them
//! through a single-slot, latest-wins queue, so duty updates are glitch-free
//! and never stall the CPU on peripheral timing.
//!
//! State machines are claimed from an explicit [`StateMachineAllocator`];
//! pin capability, frequency range and duty range violations surface as
//! [`Error`] values at the call that caused them.
//!
//! See [`channel`] for a usage example.
//!
//! # Crate features
//!
//! * **defmt** -
//!   Implement `defmt::Format` for several types.

#![warn(missing_docs)]
#![no_std]

#[cfg(test)]
extern crate std;

/// Re-export of the PAC
pub use rp2040_pac as pac;

pub mod allocator;
pub mod channel;
pub mod divider;
pub mod duty;
pub mod pio;
pub mod program;
pub(crate) mod resets;
pub mod slot;

pub use allocator::{pin_supports_pio, NoFreeStateMachine, StateMachineAllocator};
pub use channel::{Error, PioPwm, PwmConfig, DEFAULT_CYCLE_LENGTH};
pub use divider::{ClockDivider, FrequencyOutOfRange};
pub use duty::InvalidDuty;
pub use slot::DutySlot;

pub use crate::pio::{PIOExt, PulsePio};

// Re-export crates used in pwm-pio's public API
pub extern crate fugit;
