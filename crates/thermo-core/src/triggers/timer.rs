use core::cell::RefCell;
use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embedded_hal::digital::StatefulOutputPin;
use log::{debug, info};

use super::{TriggerFlag, TriggerKind, TriggerSource};
use crate::error::ThermoError;
use crate::peripherals::{NoPin, PeriodicTimer, TimerConfig};

/// Periodic hardware timer divided down to a slower poll cadence.
///
/// Every compare match clears the pending bit and counts a tick. Once
/// `threshold` ticks have accumulated the counter resets, the timer
/// interrupt is masked, the status indicator toggles and the flag is posted:
/// a 1 Hz timer with a threshold of 5 polls every five seconds.
pub struct TimerSource<T, P = NoPin> {
    timer: Mutex<CriticalSectionRawMutex, RefCell<T>>,
    indicator: Mutex<CriticalSectionRawMutex, RefCell<P>>,
    flag: TriggerFlag,
    ticks: AtomicU32,
    threshold: u32,
}

impl<T> TimerSource<T, NoPin>
where
    T: PeriodicTimer,
{
    /// A threshold of zero behaves like one: every tick posts.
    pub const fn new(timer: T, threshold: u32) -> Self {
        Self::new_with_indicator(timer, NoPin, threshold)
    }
}

impl<T, P> TimerSource<T, P>
where
    T: PeriodicTimer,
    P: StatefulOutputPin,
{
    /// Timer that toggles `indicator` once per posted trigger.
    pub const fn new_with_indicator(timer: T, indicator: P, threshold: u32) -> Self {
        Self {
            timer: Mutex::new(RefCell::new(timer)),
            indicator: Mutex::new(RefCell::new(indicator)),
            flag: TriggerFlag::new(),
            ticks: AtomicU32::new(0),
            threshold: if threshold == 0 { 1 } else { threshold },
        }
    }

    /// Configure the timer, unmask its interrupt and start counting.
    pub fn start(&self, config: &TimerConfig) -> Result<(), ThermoError> {
        self.timer.lock(|timer| {
            let mut timer = timer.borrow_mut();
            timer.stop();
            timer
                .configure(config)
                .map_err(|e| ThermoError::Initialization {
                    peripheral: "continuous timer",
                    code: e.code,
                })?;
            timer.enable_interrupt();
            timer.start();
            Ok::<(), ThermoError>(())
        })?;
        self.ticks.store(0, Ordering::Release);
        info!(
            "Continuous timer started: compare count {}, poll every {} ticks",
            config.compare_count, self.threshold
        );
        Ok(())
    }

    pub fn stop(&self) {
        self.timer.lock(|timer| {
            let mut timer = timer.borrow_mut();
            timer.disable_interrupt();
            timer.stop();
        });
    }

    /// Compare-match interrupt handler.
    pub fn on_interrupt(&self) {
        self.timer.lock(|timer| timer.borrow_mut().clear_pending());

        let ticks = self.ticks.load(Ordering::Acquire) + 1;
        if ticks < self.threshold {
            self.ticks.store(ticks, Ordering::Release);
            return;
        }

        self.ticks.store(0, Ordering::Release);
        self.timer.lock(|timer| timer.borrow_mut().disable_interrupt());
        self.indicator.lock(|pin| pin.borrow_mut().toggle().ok());
        self.flag.post();
    }

    /// Ticks counted towards the next poll.
    pub fn ticks(&self) -> u32 {
        self.ticks.load(Ordering::Acquire)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Run `f` with exclusive access to the timer.
    pub fn with_timer<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.timer.lock(|timer| f(&mut timer.borrow_mut()))
    }

    pub fn with_indicator<R>(&self, f: impl FnOnce(&mut P) -> R) -> R {
        self.indicator.lock(|pin| f(&mut pin.borrow_mut()))
    }
}

impl<T, P> TriggerSource for TimerSource<T, P>
where
    T: PeriodicTimer + Send,
    P: StatefulOutputPin + Send,
{
    fn kind(&self) -> TriggerKind {
        TriggerKind::Timer
    }

    fn flag(&self) -> &TriggerFlag {
        &self.flag
    }

    fn rearm(&self) -> Result<(), ThermoError> {
        self.timer.lock(|timer| timer.borrow_mut().enable_interrupt());
        debug!("Timer interrupt re-enabled");
        Ok(())
    }

    fn disarm(&self) -> Result<(), ThermoError> {
        self.timer.lock(|timer| timer.borrow_mut().disable_interrupt());
        Ok(())
    }
}
