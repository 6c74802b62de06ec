//! Subsystem Resets
//!
//! See [Chapter 2 Section 14](https://datasheets.raspberrypi.com/rp2040/rp2040-datasheet.pdf) for more details.

mod private {
    pub trait SubsystemReset {
        fn reset_bring_up(&self, resets: &mut crate::pac::RESETS);
        fn reset_bring_down(&self, resets: &mut crate::pac::RESETS);
    }
}

pub(crate) use private::SubsystemReset;

macro_rules! generate_reset {
    ($MODULE:ident, $module:ident) => {
        impl SubsystemReset for $crate::pac::$MODULE {
            fn reset_bring_up(&self, resets: &mut $crate::pac::RESETS) {
                resets.reset().modify(|_, w| w.$module().clear_bit());
                while resets.reset_done().read().$module().bit_is_clear() {}
            }
            fn reset_bring_down(&self, resets: &mut $crate::pac::RESETS) {
                resets.reset().modify(|_, w| w.$module().set_bit());
            }
        }
    };
}

generate_reset!(PIO1, pio1);
generate_reset!(PIO0, pio0);
