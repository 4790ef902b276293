/// Periodic sweeps driving the freeze engine
///
/// Sweeps are triggered by named browser alarms rather than in-process
/// timers: the extension's service worker is suspended when idle, and an
/// alarm wakes it back up.
use std::rc::Rc;

use log::{debug, error, info};

use crate::engine::FreezeEngine;
use crate::host::TabHost;
use crate::storage::Storage;

pub const ELIGIBILITY_PERIOD_MINUTES: f64 = 1.0;
pub const ICON_PERIOD_MINUTES: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepKind {
    /// Freeze tabs that have been idle past the timeout
    Eligibility,
    /// Fill in favicons that were unknown when a tab was first seen
    Icons,
    /// Drop registry entries for tabs that no longer exist
    Reconcile,
}

impl SweepKind {
    pub const ALL: [SweepKind; 3] = [SweepKind::Eligibility, SweepKind::Icons, SweepKind::Reconcile];

    /// Alarm name
    pub fn name(self) -> &'static str {
        match self {
            SweepKind::Eligibility => "freezer-eligibility",
            SweepKind::Icons => "freezer-icons",
            SweepKind::Reconcile => "freezer-reconcile",
        }
    }

    pub fn from_name(name: &str) -> Option<SweepKind> {
        SweepKind::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

pub struct Scheduler<H: TabHost, S: Storage> {
    engine: Rc<FreezeEngine<H, S>>,
}

impl<H: TabHost, S: Storage> Scheduler<H, S> {
    pub fn new(engine: Rc<FreezeEngine<H, S>>) -> Self {
        Scheduler { engine }
    }

    /// Reconcile follows the configured cleanup interval
    pub fn period_minutes(&self, kind: SweepKind) -> f64 {
        match kind {
            SweepKind::Eligibility => ELIGIBILITY_PERIOD_MINUTES,
            SweepKind::Icons => ICON_PERIOD_MINUTES,
            SweepKind::Reconcile => f64::from(self.engine.config().get().cleanup_interval_minutes),
        }
    }

    /// `(alarm name, period in minutes)` for every sweep
    pub fn alarms(&self) -> Vec<(&'static str, f64)> {
        SweepKind::ALL
            .into_iter()
            .map(|kind| (kind.name(), self.period_minutes(kind)))
            .collect()
    }

    /// Run the sweep an alarm stands for. `false` for alarms that aren't ours.
    pub async fn on_alarm(&self, name: &str) -> bool {
        match SweepKind::from_name(name) {
            Some(kind) => {
                self.run_sweep(kind).await;
                true
            }
            None => {
                debug!("Ignoring alarm {}", name);
                false
            }
        }
    }

    /// Run one sweep. Errors are logged, never propagated: the next alarm retries.
    pub async fn run_sweep(&self, kind: SweepKind) {
        match kind {
            SweepKind::Eligibility => {
                let frozen = self.engine.run_eligibility_sweep().await;
                if frozen > 0 {
                    info!("Eligibility sweep froze {} tabs", frozen);
                }
            }
            SweepKind::Icons => {
                let resolved = self.engine.resolve_missing_icons().await;
                if resolved > 0 {
                    debug!("Resolved {} missing icons", resolved);
                }
            }
            SweepKind::Reconcile => {
                if let Err(e) = self.engine.reconcile().await {
                    error!("Reconcile sweep failed: {}", e);
                }
            }
        }
    }
}
