//! Dispatch loop
//!
//! The only consumer of trigger flags and the only initiator of bus
//! transactions. Sources are checked in the order they were added, which is
//! their priority order.

use embedded_hal::digital::StatefulOutputPin;
use heapless::Vec;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::ThermoError;
use crate::peripherals::{BusDriver, NoPin};
use crate::sensors::max31723::{READ_TEMPERATURE, Reading};
use crate::sequencer::{Sequencer, Step, validate_sequence};
use crate::triggers::{TriggerKind, TriggerSource};

/// Maximum number of trigger sources a dispatcher can watch.
pub const MAX_SOURCES: usize = 4;

/// How many pending flags one call to [`Dispatcher::poll`] services.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServicePolicy {
    /// Every pending flag, in priority order
    #[default]
    AllPending,
    /// Only the highest priority pending flag
    OnePerPass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Dispatching,
}

/// Outcome of servicing one trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Serviced {
    pub trigger: TriggerKind,
    pub result: Result<Reading, ThermoError>,
    /// Whether the source was unmasked again. A failed re-arm is retried at
    /// the start of every following pass.
    pub rearm: Result<(), ThermoError>,
}

/// Everything serviced during one pass, in service order.
pub type PassReport = Vec<Serviced, MAX_SOURCES>;

/// Cooperative single-threaded dispatch loop.
///
/// Each serviced trigger gets exactly one run of the step sequence, one
/// report, and exactly one re-arm of its source. A failed sequence is
/// reported and the source is still re-armed, so the next trigger is
/// serviced normally.
pub struct Dispatcher<'a, B, P = NoPin> {
    sequencer: Sequencer<'a, B, P>,
    sources: Vec<&'a dyn TriggerSource, MAX_SOURCES>,
    /// Bit per source whose re-arm failed and is still masked
    unarmed: u32,
    steps: &'a [Step],
    policy: ServicePolicy,
    state: DispatchState,
    last: Option<Serviced>,
}

impl<'a, B, P> Dispatcher<'a, B, P>
where
    B: BusDriver<'a>,
    P: StatefulOutputPin,
{
    /// Create a dispatcher running the two-step temperature read.
    pub fn new(sequencer: Sequencer<'a, B, P>, policy: ServicePolicy) -> Self {
        Self {
            sequencer,
            sources: Vec::new(),
            unarmed: 0,
            steps: &READ_TEMPERATURE,
            policy,
            state: DispatchState::Idle,
            last: None,
        }
    }

    /// Replace the step sequence run for every trigger.
    pub fn with_steps(mut self, steps: &'a [Step]) -> Result<Self, ThermoError> {
        validate_sequence(steps)?;
        self.steps = steps;
        Ok(self)
    }

    /// Watch `source`. Sources added earlier are serviced first.
    pub fn add_source(&mut self, source: &'a dyn TriggerSource) -> Result<(), ThermoError> {
        self.sources
            .push(source)
            .map_err(|_| ThermoError::Configuration("too many trigger sources"))
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    pub fn policy(&self) -> ServicePolicy {
        self.policy
    }

    /// Most recently serviced trigger and its outcome.
    pub fn last_serviced(&self) -> Option<Serviced> {
        self.last
    }

    pub fn sequencer_mut(&mut self) -> &mut Sequencer<'a, B, P> {
        &mut self.sequencer
    }

    /// Number of sources left masked by a failed re-arm.
    pub fn pending_rearms(&self) -> u32 {
        self.unarmed.count_ones()
    }

    /// Whether any watched flag is waiting to be serviced.
    pub fn has_pending(&self) -> bool {
        self.sources.iter().any(|source| source.flag().is_pending())
    }

    /// Check every flag once and service what is pending according to the
    /// policy.
    pub fn poll(&mut self) -> PassReport {
        let mut report = PassReport::new();
        self.retry_rearms();

        for index in 0..self.sources.len() {
            let source = self.sources[index];
            if !source.flag().take() {
                continue;
            }

            self.state = DispatchState::Dispatching;
            let serviced = self.service(index, source);
            // Capacity matches the number of sources
            let _ = report.push(serviced);

            if self.policy == ServicePolicy::OnePerPass {
                break;
            }
        }

        self.state = if self.has_pending() {
            DispatchState::Dispatching
        } else {
            DispatchState::Idle
        };
        report
    }

    fn retry_rearms(&mut self) {
        for index in 0..self.sources.len() {
            if self.unarmed & (1 << index) == 0 {
                continue;
            }
            let source = self.sources[index];
            match source.rearm() {
                Ok(()) => {
                    self.unarmed &= !(1 << index);
                    info!("{}: re-armed after earlier failure", source.kind());
                }
                Err(e) => warn!("{}: re-arm still failing: {}", source.kind(), e),
            }
        }
    }

    fn service(&mut self, index: usize, source: &'a dyn TriggerSource) -> Serviced {
        let trigger = source.kind();
        let result = self.sequencer.run_sequence(self.steps);

        match &result {
            Ok(reading) => info!("{}: Final Temperature: {}", trigger, reading),
            Err(e) => error!("{}: temperature read failed: {}", trigger, e),
        }

        // Finish before re-arming so an edge right after the unmask is kept
        source.flag().finish();
        let rearm = source.rearm();
        if let Err(e) = rearm {
            warn!("{}: re-arm failed, retrying next pass: {}", trigger, e);
            self.unarmed |= 1 << index;
        }

        let serviced = Serviced {
            trigger,
            result,
            rearm,
        };
        self.last = Some(serviced);
        serviced
    }

    /// Poll forever.
    pub fn run(&mut self) -> ! {
        info!(
            "Dispatch loop started: {} trigger sources, {:?}",
            self.sources.len(),
            self.policy
        );
        loop {
            if self.poll().is_empty() {
                core::hint::spin_loop();
            }
        }
    }
}
