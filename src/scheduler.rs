/// Cyclic scheduler: the broadcaster state machine and the alert loop.
///
/// ```text
/// Init → [AcquireRange] → BuildFrame → StopAdvertising → StartAdvertising → Sleep ─┐
///          ▲                                                                       │
///          └───────────────────────────────────────────────────────────────────────┘
/// ```
///
/// `AcquireRange` only runs on anchors that relay a range reading. No phase
/// is terminal: every fault is logged and the cycle carries on with stale
/// data.
use core::fmt::Debug;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

use crate::advert::{self, AdvertisementFrame, Telemetry};
use crate::config::Role;
use crate::error::{Error, Result};
use crate::node::NodeContext;
use crate::proximity::AlertIndicator;
use crate::ranging::{count_to_distance, RangeSource};

/// Radio advertising control.
pub trait Advertiser {
    type Error: Debug;

    fn stop(&mut self) -> core::result::Result<(), Self::Error>;

    /// Start advertising the given raw AD structures.
    fn start(&mut self, ad: &[u8]) -> core::result::Result<(), Self::Error>;
}

impl<A: Advertiser + ?Sized> Advertiser for &mut A {
    type Error = A::Error;

    fn stop(&mut self) -> core::result::Result<(), Self::Error> {
        (**self).stop()
    }

    fn start(&mut self, ad: &[u8]) -> core::result::Result<(), Self::Error> {
        (**self).start(ad)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Init,
    AcquireRange,
    BuildFrame,
    StopAdvertising,
    StartAdvertising,
    Sleep,
}

/// Rebroadcasts this node's telemetry once per tick.
pub struct Broadcaster<'c, M: RawMutex, A, R, D> {
    ctx: &'c NodeContext<M>,
    advertiser: A,
    range: Option<R>,
    delay: D,
    phase: CyclePhase,
    last_range: u16,
    frame: Option<AdvertisementFrame>,
    cycles: u32,
    start_failures: u32,
}

impl<'c, M, A, R, D> Broadcaster<'c, M, A, R, D>
where
    M: RawMutex,
    A: Advertiser,
    R: RangeSource,
    D: DelayNs,
{
    pub fn new(ctx: &'c NodeContext<M>, advertiser: A, range: Option<R>, delay: D) -> Self {
        Self {
            ctx,
            advertiser,
            range,
            delay,
            phase: CyclePhase::Init,
            last_range: 0,
            frame: None,
            cycles: 0,
            start_failures: 0,
        }
    }

    /// Phase the next [`step`](Self::step) will execute.
    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    /// Execute the current phase and advance. Returns the phase executed.
    pub fn step(&mut self) -> CyclePhase {
        let phase = self.phase;
        self.phase = match phase {
            CyclePhase::Init => {
                log::info!(
                    "Broadcaster started: role={} tick={}ms ranging={}",
                    self.ctx.config().role.as_str(),
                    self.ctx.config().timing.broadcast_tick_ms,
                    self.ranging()
                );
                self.first_phase()
            }
            CyclePhase::AcquireRange => {
                self.acquire_range();
                CyclePhase::BuildFrame
            }
            CyclePhase::BuildFrame => {
                match self.build_frame() {
                    Ok(frame) => self.frame = Some(frame),
                    Err(e) => log::warn!("Frame build failed, keeping previous: {}", e),
                }
                CyclePhase::StopAdvertising
            }
            CyclePhase::StopAdvertising => {
                if let Err(e) = self.advertiser.stop() {
                    log::warn!("Advertising stop failed: {:?}", e);
                }
                CyclePhase::StartAdvertising
            }
            CyclePhase::StartAdvertising => {
                if let Some(frame) = &self.frame {
                    if let Err(e) = self.advertiser.start(&frame.to_ad()) {
                        self.start_failures = self.start_failures.wrapping_add(1);
                        log::warn!("{}: {:?}", Error::AdvertisingStartFailure, e);
                    }
                }
                CyclePhase::Sleep
            }
            CyclePhase::Sleep => {
                self.delay.delay_ms(self.ctx.config().timing.broadcast_tick_ms);
                self.cycles = self.cycles.wrapping_add(1);
                self.first_phase()
            }
        };
        phase
    }

    /// Run phases until the end of the next sleep.
    pub fn run_cycle(&mut self) {
        while self.step() != CyclePhase::Sleep {}
    }

    pub fn run(&mut self) -> ! {
        loop {
            self.run_cycle();
        }
    }

    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    pub fn start_failures(&self) -> u32 {
        self.start_failures
    }

    /// Most recent range count (stale if the last acquisition failed).
    pub fn last_range(&self) -> u16 {
        self.last_range
    }

    /// Most recent range count converted with the configured divisor.
    pub fn last_distance(&self) -> u16 {
        count_to_distance(self.last_range, self.ctx.config().ranging.divisor)
    }

    fn ranging(&self) -> bool {
        self.range.is_some() && self.ctx.config().reports_range()
    }

    fn first_phase(&self) -> CyclePhase {
        if self.ranging() {
            CyclePhase::AcquireRange
        } else {
            CyclePhase::BuildFrame
        }
    }

    fn acquire_range(&mut self) {
        let Some(source) = self.range.as_mut() else {
            return;
        };
        match source.acquire() {
            Ok(count) => {
                self.last_range = count;
                log::debug!("Range count {} ({} cm)", count, self.last_distance());
            }
            Err(e) => log::debug!("Range acquisition failed ({}), keeping {}", e, self.last_range),
        }
    }

    fn build_frame(&self) -> Result<AdvertisementFrame> {
        let config = self.ctx.config();
        match config.role {
            Role::Mobile => {
                let snapshot = self.ctx.snapshot();
                advert::encode(&Telemetry::Mobile {
                    records: &snapshot,
                    width: config.range_width,
                })
            }
            Role::Anchor => match config.board_id {
                Some(board_id) if config.reports_range() => advert::encode(&Telemetry::RangeReport {
                    board_id,
                    range: self.last_range,
                }),
                _ => advert::encode(&Telemetry::Idle),
            },
            Role::Base | Role::RangePeer => advert::encode(&Telemetry::Idle),
        }
    }
}

// ── Alert loop ────────────────────────────────────────────────────────

/// One alert tick: reads the flag, drives the output for one tick period.
pub fn alert_tick<M, P, D>(ctx: &NodeContext<M>, indicator: &mut AlertIndicator<P, D>) -> bool
where
    M: RawMutex,
    P: OutputPin,
    D: DelayNs,
{
    let violating = ctx.is_violating();
    if let Err(e) = indicator.tick(violating) {
        log::warn!("Alert output: {}", e);
    }
    violating
}

/// Alert loop. `on_edge` is called whenever the flag changes.
pub fn run_alert_loop<M, P, D, F>(ctx: &NodeContext<M>, indicator: &mut AlertIndicator<P, D>, mut on_edge: F) -> !
where
    M: RawMutex,
    P: OutputPin,
    D: DelayNs,
    F: FnMut(bool),
{
    log::info!("Alert loop started");
    let mut was_violating = false;
    loop {
        let violating = alert_tick(ctx, indicator);
        if violating != was_violating {
            log::info!("Distancing alert {}", if violating { "raised" } else { "cleared" });
            on_edge(violating);
            was_violating = violating;
        }
    }
}
