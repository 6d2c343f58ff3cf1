use core::cell::RefCell;
use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embedded_hal::digital::StatefulOutputPin;
use log::{debug, error, info};

use super::{TriggerFlag, TriggerKind, TriggerSource};
use crate::error::ThermoError;
use crate::peripherals::{Rtc, busy_retry};

/// RTC time-of-day alarm turned into a periodic trigger.
///
/// The alarm is one-shot in hardware, so the handler reprograms it to
/// `now + interval` every time it fires. Every RTC register access spins
/// while the RTC reports itself busy.
pub struct RtcAlarmSource<R, P> {
    rtc: Mutex<CriticalSectionRawMutex, RefCell<R>>,
    indicator: Mutex<CriticalSectionRawMutex, RefCell<P>>,
    flag: TriggerFlag,
    interval_secs: u32,
    next_alarm: AtomicU32,
}

impl<R, P> RtcAlarmSource<R, P>
where
    R: Rtc,
    P: StatefulOutputPin,
{
    pub const fn new(rtc: R, indicator: P, interval_secs: u32) -> Self {
        Self {
            rtc: Mutex::new(RefCell::new(rtc)),
            indicator: Mutex::new(RefCell::new(indicator)),
            flag: TriggerFlag::new(),
            interval_secs,
            next_alarm: AtomicU32::new(0),
        }
    }

    /// Program the first alarm and unmask the alarm interrupt.
    pub fn start(&self) -> Result<u32, ThermoError> {
        let init_error = |code| ThermoError::Initialization {
            peripheral: "RTC",
            code,
        };
        self.rtc.lock(|rtc| {
            let mut rtc = rtc.borrow_mut();
            busy_retry(|| rtc.disable_alarm_interrupt()).map_err(init_error)?;
            busy_retry(|| rtc.clear_alarm_flag()).map_err(init_error)
        })?;
        let next = self.reschedule().map_err(|e| match e {
            ThermoError::Peripheral { code, .. } => init_error(code),
            other => other,
        })?;
        self.rtc
            .lock(|rtc| busy_retry(|| rtc.borrow_mut().enable_alarm_interrupt()))
            .map_err(init_error)?;
        info!("RTC alarm armed for t={}s, every {}s", next, self.interval_secs);
        Ok(next)
    }

    /// Alarm interrupt handler.
    pub fn on_alarm(&self) {
        let cleared = self.rtc.lock(|rtc| {
            let mut rtc = rtc.borrow_mut();
            busy_retry(|| rtc.disable_alarm_interrupt())?;
            busy_retry(|| rtc.clear_alarm_flag())
        });
        if let Err(code) = cleared {
            error!("RTC alarm acknowledge failed (code {})", code);
        }

        self.indicator.lock(|pin| pin.borrow_mut().toggle().ok());
        self.flag.post();

        if let Err(e) = self.reschedule() {
            error!("RTC alarm not rescheduled: {}", e);
        }
    }

    /// Read the current time and program the next alarm at
    /// `now + interval`. Returns the programmed alarm time.
    pub fn reschedule(&self) -> Result<u32, ThermoError> {
        let next = self
            .rtc
            .lock(|rtc| {
                let mut rtc = rtc.borrow_mut();
                let now = busy_retry(|| rtc.seconds())?;
                let next = now.wrapping_add(self.interval_secs);
                busy_retry(|| rtc.set_alarm(next))?;
                Ok::<u32, i32>(next)
            })
            .map_err(|code| ThermoError::Peripheral {
                peripheral: "RTC",
                code,
            })?;
        self.next_alarm.store(next, Ordering::Release);
        debug!("Next RTC alarm at t={}s", next);
        Ok(next)
    }

    /// Most recently programmed alarm time in seconds.
    pub fn next_alarm(&self) -> u32 {
        self.next_alarm.load(Ordering::Acquire)
    }

    pub fn interval_secs(&self) -> u32 {
        self.interval_secs
    }

    /// Run `f` with exclusive access to the RTC.
    pub fn with_rtc<T>(&self, f: impl FnOnce(&mut R) -> T) -> T {
        self.rtc.lock(|rtc| f(&mut rtc.borrow_mut()))
    }

    /// Run `f` with exclusive access to the status indicator.
    pub fn with_indicator<T>(&self, f: impl FnOnce(&mut P) -> T) -> T {
        self.indicator.lock(|pin| f(&mut pin.borrow_mut()))
    }
}

impl<R, P> TriggerSource for RtcAlarmSource<R, P>
where
    R: Rtc + Send,
    P: StatefulOutputPin + Send,
{
    fn kind(&self) -> TriggerKind {
        TriggerKind::RtcAlarm
    }

    fn flag(&self) -> &TriggerFlag {
        &self.flag
    }

    fn rearm(&self) -> Result<(), ThermoError> {
        self.rtc
            .lock(|rtc| busy_retry(|| rtc.borrow_mut().enable_alarm_interrupt()))
            .map_err(|code| ThermoError::Peripheral {
                peripheral: "RTC",
                code,
            })?;
        debug!("RTC alarm interrupt re-enabled");
        Ok(())
    }

    fn disarm(&self) -> Result<(), ThermoError> {
        self.rtc
            .lock(|rtc| busy_retry(|| rtc.borrow_mut().disable_alarm_interrupt()))
            .map_err(|code| ThermoError::Peripheral {
                peripheral: "RTC",
                code,
            })
    }
}
