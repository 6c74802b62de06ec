//! Channel configuration and runtime control.
//!
//! [`PwmConfig`] collects the construction parameters and
//! [`PwmConfig::build`] turns them into a running [`PioPwm`] channel: it
//! derives the clock divider, claims a state machine, installs the pulse
//! program, routes the pin and starts the waveform. From then on the only
//! runtime-mutable state is the duty, updated glitch-free through the TX
//! FIFO; everything else requires a reconfiguration.
//!
//! ```no_run
//! use pwm_pio::fugit::RateExtU32;
//! use pwm_pio::{PulsePio, PwmConfig, StateMachineAllocator};
//!
//! let mut pac = pwm_pio::pac::Peripherals::take().unwrap();
//!
//! // Clocks and the IO bank are assumed to be set up already; the system
//! // clock runs at 125 MHz here.
//! let mut pio = PulsePio::new(pac.PIO0, &mut pac.RESETS);
//! let mut sms = StateMachineAllocator::new();
//!
//! let mut pwm = PwmConfig::new(12, 38_000.Hz())
//!     .duty_u16(6500)
//!     .build(
//!         &mut pio,
//!         &mut sms,
//!         &mut pac.IO_BANK0,
//!         &mut pac.PADS_BANK0,
//!         125_000_000.Hz(),
//!     )
//!     .unwrap();
//!
//! pwm.set_duty_u16(32_768);
//! pwm.deinit(&mut sms);
//! ```

use core::convert::Infallible;

use embedded_hal::pwm::{ErrorType, SetDutyCycle};
use fugit::{HertzU32, NanosDurationU64};

use crate::allocator::{pin_supports_pio, NoFreeStateMachine, StateMachineAllocator};
use crate::divider::{ClockDivider, FrequencyOutOfRange};
use crate::duty::{self, InvalidDuty};
use crate::pac;
use crate::pio::{PIOExt, PulsePio, StateMachine};
use crate::program;
use crate::slot::DutySlot;

/// Default counter period: full 16-bit duty resolution.
pub const DEFAULT_CYCLE_LENGTH: u32 = program::MAX_CYCLE_LENGTH;

/// Errors surfaced while configuring or driving a channel.
///
/// All of them are reported synchronously by the call that caused them;
/// nothing is retried internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The requested frequency is unreachable with this clock and cycle
    /// length.
    FrequencyOutOfRange,
    /// The duty request is outside the representable range.
    InvalidDuty,
    /// Both `duty_u16` and `duty_ns` were given.
    AmbiguousDuty,
    /// All matching state machines are in use.
    NoFreeStateMachine,
    /// The pin cannot be routed to the PIO.
    PinUnsupported,
}

impl From<FrequencyOutOfRange> for Error {
    fn from(_: FrequencyOutOfRange) -> Self {
        Error::FrequencyOutOfRange
    }
}

impl From<InvalidDuty> for Error {
    fn from(_: InvalidDuty) -> Self {
        Error::InvalidDuty
    }
}

impl From<NoFreeStateMachine> for Error {
    fn from(_: NoFreeStateMachine) -> Self {
        Error::NoFreeStateMachine
    }
}

/// Construction parameters for a [`PioPwm`] channel.
#[derive(Debug, Clone, Copy)]
pub struct PwmConfig {
    pin: u8,
    freq: HertzU32,
    duty_u16: Option<u16>,
    duty_ns: Option<NanosDurationU64>,
    invert: bool,
    state_machine: Option<u8>,
    cycle_length: Option<u32>,
}

impl PwmConfig {
    /// Start a configuration for `pin` at the given output frequency.
    ///
    /// Everything else defaults: duty 0, normal polarity, automatically
    /// chosen state machine and cycle length.
    pub fn new(pin: u8, freq: HertzU32) -> Self {
        PwmConfig {
            pin,
            freq,
            duty_u16: None,
            duty_ns: None,
            invert: false,
            state_machine: None,
            cycle_length: None,
        }
    }

    /// Initial duty as a 16-bit value, `0..=65535` mapping to the full range.
    ///
    /// Mutually exclusive with [`Self::duty_ns`].
    pub fn duty_u16(mut self, value: u16) -> Self {
        self.duty_u16 = Some(value);
        self
    }

    /// Initial duty as an active-time per period.
    ///
    /// Mutually exclusive with [`Self::duty_u16`].
    pub fn duty_ns(mut self, value: NanosDurationU64) -> Self {
        self.duty_ns = Some(value);
        self
    }

    /// Produce an active-low waveform. Fixed for the channel's lifetime.
    pub fn invert(mut self, invert: bool) -> Self {
        self.invert = invert;
        self
    }

    /// Claim a specific state machine instead of the lowest free one.
    pub fn state_machine(mut self, index: u8) -> Self {
        self.state_machine = Some(index);
        self
    }

    /// Counter period in ticks, determining the duty resolution
    /// (`1/cycle_length`).
    ///
    /// When set, the value is used as-is and an unreachable frequency fails
    /// with [`Error::FrequencyOutOfRange`]. When left out, the largest
    /// reachable period up to [`DEFAULT_CYCLE_LENGTH`] is chosen, trading
    /// duty resolution for frequency range the way the hardware demands.
    pub fn cycle_length(mut self, cycle_length: u32) -> Self {
        self.cycle_length = Some(cycle_length);
        self
    }

    /// Build the channel and start the waveform.
    ///
    /// `sys_freq` is the clock the PIO runs from. The pin is switched to the
    /// PIO function and driven from the moment this returns.
    ///
    /// On error nothing keeps running and no state machine stays claimed.
    pub fn build<P: PIOExt>(
        self,
        pio: &mut PulsePio<P>,
        sms: &mut StateMachineAllocator,
        io: &mut pac::IO_BANK0,
        pads: &mut pac::PADS_BANK0,
        sys_freq: HertzU32,
    ) -> Result<PioPwm<P>, Error> {
        if !pin_supports_pio(self.pin) {
            return Err(Error::PinUnsupported);
        }

        let cycle_length = resolve_cycle_length(self.cycle_length, self.freq, sys_freq)?;
        let divider = ClockDivider::find(self.freq, sys_freq, cycle_length)?;
        let period_ns = divider.period_nanos(sys_freq, cycle_length);
        let duty_ticks = resolve_initial_ticks(
            self.duty_u16,
            self.duty_ns.map(|d| d.to_nanos()),
            cycle_length,
            period_ns,
        )?;

        // Last fallible step: a failure further down could otherwise leak
        // the claimed state machine.
        let index = sms.acquire(self.state_machine)?;

        let loaded = pio.install(self.invert);
        let mut channel = PioPwm {
            sm: pio.state_machine(index),
            index,
            pin: self.pin,
            invert: self.invert,
            sys_freq,
            cycle_length,
            divider,
            period_ns,
            program_offset: loaded.offset,
            duty_ticks,
            slot: DutySlot::new(),
            active: true,
        };

        let parked = program::set_pins(channel.inactive_level());
        channel.sm.set_enabled(false);
        channel.sm.set_clock_divider(divider);
        channel.sm.configure_pulse_output(self.pin, loaded);
        // Defined level before the pad is handed to the PIO.
        channel.sm.exec_instruction(parked);
        channel.sm.exec_instruction(program::set_pindirs_output());

        pads.gpio(usize::from(self.pin))
            .modify(|_, w| w.ie().set_bit().od().clear_bit());
        io.gpio(usize::from(self.pin))
            .gpio_ctrl()
            .modify(|_, w| w.funcsel().variant(P::FUNCSEL));

        channel.reload();
        Ok(channel)
    }
}

/// Pick the counter period for a frequency request.
fn resolve_cycle_length(
    explicit: Option<u32>,
    freq: HertzU32,
    sys_freq: HertzU32,
) -> Result<u32, FrequencyOutOfRange> {
    match explicit {
        Some(cycle_length) => {
            if cycle_length == 0 || cycle_length > program::MAX_CYCLE_LENGTH {
                Err(FrequencyOutOfRange)
            } else {
                Ok(cycle_length)
            }
        }
        None => {
            // Largest period the clock still reaches at divider 1.0.
            let ticks = u64::from(freq.to_Hz()) * u64::from(program::CYCLES_PER_TICK);
            if ticks == 0 {
                return Err(FrequencyOutOfRange);
            }
            match u64::from(sys_freq.to_Hz()) / ticks {
                0 => Err(FrequencyOutOfRange),
                max => Ok(max.min(u64::from(program::MAX_CYCLE_LENGTH)) as u32),
            }
        }
    }
}

/// Resolve the initial duty from the at-most-one given form.
fn resolve_initial_ticks(
    duty_u16: Option<u16>,
    duty_nanos: Option<u64>,
    cycle_length: u32,
    period_nanos: u64,
) -> Result<u32, Error> {
    match (duty_u16, duty_nanos) {
        (Some(_), Some(_)) => Err(Error::AmbiguousDuty),
        (Some(value), None) => Ok(duty::ticks_from_u16(value, cycle_length)),
        (None, Some(nanos)) => Ok(duty::ticks_from_nanos(nanos, period_nanos, cycle_length)?),
        (None, None) => Ok(0),
    }
}

/// A running PWM channel on a PIO state machine.
///
/// Once built, the waveform runs entirely in hardware; no host involvement
/// is needed to sustain it. Duty updates are pushed through a single-slot
/// queue and take effect at the next period boundary without disturbing the
/// waveform. Frequency changes go through [`PioPwm::set_frequency`], which
/// restarts the program and briefly glitches the output.
///
/// Dropping the channel does **not** stop the hardware. Call
/// [`PioPwm::deinit`] to halt the state machine, park the pin and return the
/// state machine to the allocator.
pub struct PioPwm<P: PIOExt> {
    sm: StateMachine<P>,
    index: u8,
    pin: u8,
    invert: bool,
    sys_freq: HertzU32,
    cycle_length: u32,
    divider: ClockDivider,
    period_ns: u64,
    program_offset: u8,
    duty_ticks: u32,
    slot: DutySlot,
    active: bool,
}

impl<P: PIOExt> PioPwm<P> {
    /// The pin this channel drives.
    pub fn pin(&self) -> u8 {
        self.pin
    }

    /// Index of the state machine running the pulse program.
    pub fn state_machine_index(&self) -> u8 {
        self.index
    }

    /// Whether the channel is still running (i.e. not deinitialized).
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Counter period in ticks; duty resolution is `1/cycle_length`.
    pub fn cycle_length(&self) -> u32 {
        self.cycle_length
    }

    /// Largest accepted duty tick count, equal to the cycle length.
    pub fn max_duty_ticks(&self) -> u32 {
        self.cycle_length
    }

    /// Most recently applied duty, in ticks.
    pub fn duty_ticks(&self) -> u32 {
        self.duty_ticks
    }

    /// The divider the state machine clock runs at.
    pub fn divider(&self) -> ClockDivider {
        self.divider
    }

    /// Output frequency actually produced (after divider rounding).
    pub fn frequency(&self) -> HertzU32 {
        self.divider.output_frequency(self.sys_freq, self.cycle_length)
    }

    /// Actual length of one output period.
    pub fn period(&self) -> NanosDurationU64 {
        NanosDurationU64::from_ticks(self.period_ns)
    }

    /// Set the duty as a tick count, `0..=cycle_length`.
    ///
    /// `0` keeps the pin inactive, `cycle_length` keeps it active for the
    /// whole counted period. Values above `cycle_length` are clamped. The
    /// update is staged latest-wins and takes effect at the next period
    /// boundary; the call never blocks on the peripheral.
    pub fn set_duty_ticks(&mut self, ticks: u32) {
        let ticks = ticks.min(self.cycle_length);
        self.duty_ticks = ticks;
        if self.active {
            self.slot
                .publish(program::wire_value(ticks, self.cycle_length));
            self.flush();
        }
    }

    /// Set the duty from a 16-bit value, `0..=65535` spanning the full range.
    pub fn set_duty_u16(&mut self, value: u16) {
        self.set_duty_ticks(duty::ticks_from_u16(value, self.cycle_length));
    }

    /// Set the duty as a fraction of the period, `0.0..=1.0`.
    pub fn set_duty_fraction(&mut self, fraction: f32) -> Result<(), Error> {
        let ticks = duty::ticks_from_fraction(fraction, self.cycle_length)?;
        self.set_duty_ticks(ticks);
        Ok(())
    }

    /// Set the duty as an active-time per period.
    ///
    /// Fails with [`Error::InvalidDuty`] when the requested time exceeds the
    /// actual period (see [`PioPwm::period`]).
    pub fn set_duty_ns(&mut self, duration: NanosDurationU64) -> Result<(), Error> {
        let ticks = duty::ticks_from_nanos(duration.to_nanos(), self.period_ns, self.cycle_length)?;
        self.set_duty_ticks(ticks);
        Ok(())
    }

    /// Move a staged duty word into the TX FIFO if there is room.
    fn flush(&mut self) {
        if let Some(value) = self.slot.take() {
            if !self.sm.write_tx(value) {
                // FIFO full: keep it staged for the next flush.
                self.slot.publish(value);
            }
        }
    }

    /// Change the output frequency, keeping the cycle length.
    ///
    /// This is a full reload: the state machine stops, the divider is
    /// rewritten and the program restarts, so the output glitches for a few
    /// microseconds. The current duty carries over as a fraction of the new
    /// period. On error the channel keeps running unchanged.
    pub fn set_frequency(&mut self, freq: HertzU32) -> Result<(), Error> {
        let divider = ClockDivider::find(freq, self.sys_freq, self.cycle_length)?;

        self.sm.set_enabled(false);
        self.sm.set_clock_divider(divider);
        self.divider = divider;
        self.period_ns = divider.period_nanos(self.sys_freq, self.cycle_length);
        self.reload();
        Ok(())
    }

    /// Restart the stopped state machine at the top of the pulse program.
    ///
    /// Re-runs the preload sequence: clear the FIFOs, load the counter
    /// period into the ISR, queue the current duty and enable.
    fn reload(&mut self) {
        let _ = self.slot.take();
        self.sm.clear_fifos();
        self.sm.restart();
        self.sm.restart_clock();

        let pushed = self.sm.write_tx(self.cycle_length - 1);
        debug_assert!(pushed);
        self.sm.exec_instruction(program::pull_block());
        self.sm.exec_instruction(program::mov_isr_from_osr());
        self.sm.exec_instruction(program::jmp_to(self.program_offset));

        let pushed = self
            .sm
            .write_tx(program::wire_value(self.duty_ticks, self.cycle_length));
        debug_assert!(pushed);
        self.sm.set_enabled(true);
    }

    /// Stop the channel and release its state machine.
    ///
    /// Halting stops the program at an unspecified point of the current
    /// period, so the pin is explicitly parked at its inactive level
    /// afterwards. Idempotent: calling it again is a no-op. A stopped
    /// channel cannot be restarted; build a new one instead.
    pub fn deinit(&mut self, sms: &mut StateMachineAllocator) {
        if !self.active {
            return;
        }
        let parked = program::set_pins(self.inactive_level());
        self.sm.set_enabled(false);
        self.sm.exec_instruction(parked);
        sms.release(self.index);
        self.active = false;
    }

    fn inactive_level(&self) -> u8 {
        if self.invert {
            1
        } else {
            0
        }
    }
}

impl<P: PIOExt> ErrorType for PioPwm<P> {
    type Error = Infallible;
}

impl<P: PIOExt> SetDutyCycle for PioPwm<P> {
    fn max_duty_cycle(&self) -> u16 {
        u16::MAX
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
        self.set_duty_u16(duty);
        Ok(())
    }
}
