use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::StatefulOutputPin;
use log::debug;

use super::{TriggerFlag, TriggerKind, TriggerSource};
use crate::error::ThermoError;
use crate::peripherals::{InterruptLine, NoPin};

/// Push button on an edge-triggered GPIO interrupt.
///
/// The falling-edge handler masks the line first, so contact bounce cannot
/// re-enter it, waits out the debounce delay, toggles the status indicator
/// and then posts the flag. The line stays masked until the dispatch loop
/// re-arms it.
pub struct ButtonSource<L, P = NoPin> {
    line: L,
    indicator: Mutex<CriticalSectionRawMutex, RefCell<P>>,
    flag: TriggerFlag,
    debounce_ms: u32,
}

impl<L> ButtonSource<L, NoPin>
where
    L: InterruptLine,
{
    pub const fn new(line: L, debounce_ms: u32) -> Self {
        Self::new_with_indicator(line, NoPin, debounce_ms)
    }
}

impl<L, P> ButtonSource<L, P>
where
    L: InterruptLine,
    P: StatefulOutputPin,
{
    /// Button that toggles `indicator` once per posted press.
    pub const fn new_with_indicator(line: L, indicator: P, debounce_ms: u32) -> Self {
        Self {
            line,
            indicator: Mutex::new(RefCell::new(indicator)),
            flag: TriggerFlag::new(),
            debounce_ms,
        }
    }

    /// Falling-edge interrupt handler.
    pub fn on_falling_edge<D: DelayNs>(&self, delay: &mut D) {
        self.line.disable();
        delay.delay_ms(self.debounce_ms);
        self.indicator.lock(|pin| pin.borrow_mut().toggle().ok());
        self.flag.post();
    }

    pub fn line(&self) -> &L {
        &self.line
    }

    pub fn debounce_ms(&self) -> u32 {
        self.debounce_ms
    }

    pub fn with_indicator<T>(&self, f: impl FnOnce(&mut P) -> T) -> T {
        self.indicator.lock(|pin| f(&mut pin.borrow_mut()))
    }
}

impl<L, P> TriggerSource for ButtonSource<L, P>
where
    L: InterruptLine + Sync,
    P: StatefulOutputPin + Send,
{
    fn kind(&self) -> TriggerKind {
        TriggerKind::Button
    }

    fn flag(&self) -> &TriggerFlag {
        &self.flag
    }

    fn rearm(&self) -> Result<(), ThermoError> {
        self.line.enable();
        debug!("Button interrupt re-enabled");
        Ok(())
    }

    fn disarm(&self) -> Result<(), ThermoError> {
        self.line.disable();
        Ok(())
    }
}
