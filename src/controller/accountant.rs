//! Energy accountant
//!
//! Integrates predicted power over the wall-clock gap between consecutive ticks. The state is a
//! pure function of the last ledger row, so a restarted engine resumes exactly where the ledger
//! left off.
//!
//! A tick is computed with [`EnergyAccountant::advance`] (no mutation) and only applied with
//! [`EnergyAccountant::commit`] after it has been persisted.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use thiserror::Error;

use crate::domain::EnergyLedgerEntry;

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Accounting state carried between ticks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tracking {
    pub last_timestamp: NaiveDateTime,
    pub cumulative_energy_wh: f64,
    pub daily_energy_wh: f64,
    pub daily_date: NaiveDate,
}

impl Tracking {
    /// Empty ledger: zero energy, anchored at the first reading so its tick integrates nothing.
    pub fn cold_start(first_timestamp: NaiveDateTime) -> Self {
        Self {
            last_timestamp: first_timestamp,
            cumulative_energy_wh: 0.0,
            daily_energy_wh: 0.0,
            daily_date: first_timestamp.date(),
        }
    }

    pub fn from_entry(entry: &EnergyLedgerEntry) -> Self {
        Self {
            last_timestamp: entry.timestamp,
            cumulative_energy_wh: entry.cumulative_energy_wh,
            daily_energy_wh: entry.daily_energy_wh,
            daily_date: entry.timestamp.date(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum AccountState {
    #[default]
    NoHistory,
    Tracking(Tracking),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TickRejection {
    #[error("accountant has not been seeded from the ledger")]
    Unseeded,
    #[error("reading at {current} is older than the last accounted tick at {last}")]
    OutOfOrder {
        last: NaiveDateTime,
        current: NaiveDateTime,
    },
}

/// Result of integrating one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyTick {
    pub timestamp: NaiveDateTime,
    pub power_w: f64,
    pub elapsed_hours: f64,
    pub delta_energy_wh: f64,
    pub cumulative_energy_wh: f64,
    pub daily_energy_wh: f64,
    /// First tick of a new calendar date
    pub day_rolled: bool,
    /// The gap exceeded the configured maximum and was clamped
    pub gap_clamped: bool,
    next: Tracking,
}

#[derive(Debug, Clone)]
pub struct EnergyAccountant {
    state: AccountState,
    max_elapsed: Duration,
}

impl EnergyAccountant {
    pub fn new(max_elapsed: Duration) -> Self {
        Self {
            state: AccountState::NoHistory,
            max_elapsed,
        }
    }

    pub fn state(&self) -> &AccountState {
        &self.state
    }

    pub fn is_seeded(&self) -> bool {
        matches!(self.state, AccountState::Tracking(_))
    }

    /// `NoHistory -> Tracking`, from the ledger's last row or a cold start at `first_timestamp`.
    pub fn seed(&mut self, last: Option<&EnergyLedgerEntry>, first_timestamp: NaiveDateTime) {
        let tracking = match last {
            Some(entry) => Tracking::from_entry(entry),
            None => Tracking::cold_start(first_timestamp),
        };
        self.state = AccountState::Tracking(tracking);
    }

    /// Compute the tick for a reading at `timestamp` with predicted `power_w`.
    ///
    /// Negative gaps are rejected; gaps above the maximum are clamped to it. Negative power
    /// integrates as zero.
    pub fn advance(
        &self,
        timestamp: NaiveDateTime,
        power_w: f64,
    ) -> Result<EnergyTick, TickRejection> {
        let AccountState::Tracking(prev) = self.state else {
            return Err(TickRejection::Unseeded);
        };

        let mut elapsed = timestamp - prev.last_timestamp;
        if elapsed < Duration::zero() {
            return Err(TickRejection::OutOfOrder {
                last: prev.last_timestamp,
                current: timestamp,
            });
        }
        let gap_clamped = elapsed > self.max_elapsed;
        if gap_clamped {
            elapsed = self.max_elapsed;
        }

        let elapsed_hours = elapsed.num_milliseconds() as f64 / 1000.0 / SECONDS_PER_HOUR;
        let power_w = if power_w.is_finite() { power_w.max(0.0) } else { 0.0 };
        let delta_energy_wh = power_w * elapsed_hours;

        let cumulative_energy_wh = (prev.cumulative_energy_wh + delta_energy_wh).max(0.0);
        let date = timestamp.date();
        let day_rolled = date != prev.daily_date;
        let daily_energy_wh = if day_rolled {
            delta_energy_wh
        } else {
            (prev.daily_energy_wh + delta_energy_wh).max(0.0)
        };

        Ok(EnergyTick {
            timestamp,
            power_w,
            elapsed_hours,
            delta_energy_wh,
            cumulative_energy_wh,
            daily_energy_wh,
            day_rolled,
            gap_clamped,
            next: Tracking {
                last_timestamp: timestamp,
                cumulative_energy_wh,
                daily_energy_wh,
                daily_date: date,
            },
        })
    }

    /// Apply a persisted tick.
    pub fn commit(&mut self, tick: &EnergyTick) {
        self.state = AccountState::Tracking(tick.next);
    }

    /// Forget in-memory state; the next tick reseeds from the ledger.
    pub fn reset(&mut self) {
        self.state = AccountState::NoHistory;
    }
}
