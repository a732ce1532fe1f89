//! Poll loop
//!
//! One cooperative loop: fetch the latest reading, sample weather, derive features, predict,
//! account energy, persist the tick, maybe retrain, sleep. The logger and this engine only meet
//! in the store.

pub mod accountant;
pub mod scheduler;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use chrono_tz::Tz;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::database::{Database, DatabaseConfig};
use crate::domain::{format_timestamp, EnergyLedgerEntry, GeoLocation, PredictionRecord, Reading};
use crate::forecast::{
    local_to_utc, solar_altitude_deg, FeatureVector, OpenWeatherClient, WeatherSample,
    WeatherSampler,
};
use crate::ml::{
    Estimate, ModelTrainer, PredictionEngine, StoredModel, TrainingConfig, TrainingDataset,
};
use crate::repo::Repositories;

pub use accountant::{AccountState, EnergyAccountant, EnergyTick, TickRejection, Tracking};
pub use scheduler::RetrainScheduler;

/// Static settings of the poll loop
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub location: GeoLocation,
    pub timezone: Tz,
    pub poll_interval: Duration,
    pub idle_poll_interval: Duration,
    pub retrain_interval_rows: u64,
    pub max_elapsed: chrono::Duration,
    pub artifact_path: PathBuf,
    pub training: TrainingConfig,
}

impl ControllerSettings {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        Ok(Self {
            location: cfg.site.location(),
            timezone: cfg.site.tz()?,
            poll_interval: cfg.engine.poll_interval(),
            idle_poll_interval: cfg.engine.idle_poll_interval(),
            retrain_interval_rows: cfg.engine.retrain_interval_rows,
            max_elapsed: cfg.engine.max_elapsed(),
            artifact_path: cfg.model.artifact_path.clone(),
            training: TrainingConfig::from(&cfg.model),
        })
    }
}

/// What one poll iteration did.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The readings table is empty
    Idle,
    /// The latest reading was already processed
    Duplicate(NaiveDateTime),
    /// The latest reading is older than the last accounted tick; marked processed, nothing stored
    Rejected(TickRejection),
    Ticked(TickReport),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub tick: EnergyTick,
    pub weather: WeatherSample,
    pub estimate: Estimate,
    pub ledger_id: i64,
    pub retrain: Option<RetrainOutcome>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetrainOutcome {
    Swapped { model_id: String, samples: usize },
    Failed(String),
}

pub struct InferenceController {
    settings: ControllerSettings,
    repos: Repositories,
    weather: Arc<dyn WeatherSampler>,
    engine: PredictionEngine,
    accountant: EnergyAccountant,
    scheduler: RetrainScheduler,
    trainer: ModelTrainer,
    last_processed: Option<NaiveDateTime>,
}

impl InferenceController {
    /// Build the loop and resume after the last ledger entry so a restart never re-accounts
    /// the reading it last stored.
    pub async fn new(
        settings: ControllerSettings,
        repos: Repositories,
        weather: Arc<dyn WeatherSampler>,
        engine: PredictionEngine,
    ) -> Result<Self> {
        let last_processed = repos.ledger().latest().await?.map(|e| e.timestamp);
        if let Some(ts) = last_processed {
            info!(timestamp = %format_timestamp(&ts), "resuming after last ledger entry");
        }

        Ok(Self {
            accountant: EnergyAccountant::new(settings.max_elapsed),
            scheduler: RetrainScheduler::new(settings.retrain_interval_rows),
            trainer: ModelTrainer::new(settings.training.clone()),
            settings,
            repos,
            weather,
            engine,
            last_processed,
        })
    }

    pub fn engine(&self) -> &PredictionEngine {
        &self.engine
    }

    pub fn accountant(&self) -> &EnergyAccountant {
        &self.accountant
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    /// Run until `shutdown` resolves. A tick in progress always completes first.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            poll_interval_secs = self.settings.poll_interval.as_secs(),
            retrain_interval_rows = self.scheduler.interval_rows(),
            model_loaded = self.engine.has_model(),
            "poll loop started"
        );

        loop {
            let pause = match self.poll_once().await {
                Ok(PollOutcome::Idle) => self.settings.idle_poll_interval,
                Ok(_) => self.settings.poll_interval,
                Err(e) => {
                    error!(error = %format!("{e:#}"), "poll iteration failed");
                    self.settings.poll_interval
                }
            };

            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested, leaving poll loop");
                    break;
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }

        Ok(())
    }

    /// One iteration of the pipeline, without the trailing sleep.
    pub async fn poll_once(&mut self) -> Result<PollOutcome> {
        let Some(reading) = self.repos.readings().latest().await? else {
            debug!("no readings yet");
            return Ok(PollOutcome::Idle);
        };

        if self.last_processed == Some(reading.timestamp) {
            return Ok(PollOutcome::Duplicate(reading.timestamp));
        }

        let weather = self.weather.sample(self.settings.location).await;
        let features = FeatureVector::derive(&reading, weather);
        debug!(?features, missing = features.missing_count(), "features derived");
        let estimate = self.engine.estimate(&features);

        if !self.accountant.is_seeded() {
            let last = self.repos.ledger().latest().await?;
            self.accountant.seed(last.as_ref(), reading.timestamp);
        }

        let tick = match self.accountant.advance(reading.timestamp, estimate.power_w) {
            Ok(tick) => tick,
            Err(rejection) => {
                warn!(reason = %rejection, "tick skipped");
                self.last_processed = Some(reading.timestamp);
                return Ok(PollOutcome::Rejected(rejection));
            }
        };
        if tick.gap_clamped {
            warn!(
                timestamp = %format_timestamp(&tick.timestamp),
                max_elapsed_secs = self.settings.max_elapsed.num_seconds(),
                "gap since previous tick exceeds maximum, clamped"
            );
        }

        let (prediction, entry) = self.records(&reading, weather, &estimate, &tick);
        let ledger_id = match self.repos.record_tick(prediction.as_ref(), &entry).await {
            Ok(id) => id,
            Err(e) => {
                // nothing was stored; rebuild state from the ledger next time
                self.accountant.reset();
                return Err(e);
            }
        };
        self.accountant.commit(&tick);
        self.last_processed = Some(reading.timestamp);

        info!(
            timestamp = %format_timestamp(&tick.timestamp),
            predicted_power_w = tick.power_w,
            delta_energy_wh = tick.delta_energy_wh,
            cumulative_energy_wh = tick.cumulative_energy_wh,
            daily_energy_wh = tick.daily_energy_wh,
            day_rolled = tick.day_rolled,
            "+{:.4} Wh -> total {:.4} Wh -> today {:.4} Wh",
            tick.delta_energy_wh,
            tick.cumulative_energy_wh,
            tick.daily_energy_wh
        );

        let retrain = match self.repos.readings().count().await {
            Ok(row_count) => self.maybe_retrain(row_count).await,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "could not count readings, retrain check skipped");
                None
            }
        };

        Ok(PollOutcome::Ticked(TickReport {
            tick,
            weather,
            estimate,
            ledger_id,
            retrain,
        }))
    }

    fn records(
        &self,
        reading: &Reading,
        weather: WeatherSample,
        estimate: &Estimate,
        tick: &EnergyTick,
    ) -> (Option<PredictionRecord>, EnergyLedgerEntry) {
        let location = self.settings.location;
        let prediction = estimate.prediction.map(|p| PredictionRecord {
            timestamp: reading.timestamp,
            predicted_power_w: p.power_w,
        });
        let solar_altitude_deg = prediction.as_ref().and_then(|_| {
            local_to_utc(reading.timestamp, self.settings.timezone)
                .map(|utc| solar_altitude_deg(location, utc))
        });

        let entry = EnergyLedgerEntry {
            timestamp: reading.timestamp,
            location,
            irradiance_w_m2: weather.irradiance_w_m2,
            temp_c: weather.temp_c,
            predicted_power_w: tick.power_w,
            cumulative_energy_wh: tick.cumulative_energy_wh,
            daily_energy_wh: tick.daily_energy_wh,
            solar_altitude_deg,
        };
        (prediction, entry)
    }

    async fn maybe_retrain(&mut self, row_count: u64) -> Option<RetrainOutcome> {
        if !self.scheduler.should_retrain(row_count) {
            return None;
        }
        info!(row_count, "retrain triggered");

        let rows = match self.repos.readings().training_rows().await {
            Ok(rows) => rows,
            Err(e) => {
                let reason = format!("{e:#}");
                warn!(error = %reason, "retrain skipped, keeping current model");
                return Some(RetrainOutcome::Failed(reason));
            }
        };

        let trainer = self.trainer.clone();
        let path = self.settings.artifact_path.clone();
        let fitted = tokio::task::spawn_blocking(move || {
            let dataset = TrainingDataset::from_readings(rows);
            let model = trainer.train(&dataset)?;
            let saved = model.save(&path);
            Ok::<_, crate::ml::TrainingError>((model, saved))
        })
        .await;

        let outcome = match fitted {
            Ok(Ok((model, saved))) => {
                if let Err(e) = saved {
                    error!(error = %e, "new model is active but could not be saved");
                }
                let metadata = model.metadata();
                let outcome = RetrainOutcome::Swapped {
                    model_id: metadata.model_id.clone(),
                    samples: metadata.training_samples,
                };
                self.engine.swap(model.into_shared());
                outcome
            }
            Ok(Err(e)) => {
                warn!(error = %e, "retrain failed, keeping current model");
                RetrainOutcome::Failed(e.to_string())
            }
            Err(e) => {
                error!(error = %e, "retrain task aborted, keeping current model");
                RetrainOutcome::Failed(e.to_string())
            }
        };
        Some(outcome)
    }
}

/// Open the store, check it, load the model and build the poll loop.
///
/// Everything here is startup-fatal except a missing model artifact.
pub async fn bootstrap(cfg: &Config) -> Result<InferenceController> {
    let settings = ControllerSettings::from_config(cfg)?;

    let db = Database::open(&DatabaseConfig::from(&cfg.store))
        .await
        .context("store unavailable")?;
    let repos = Repositories::new(db);
    repos.check_orphans().await?;

    let model = StoredModel::load(&cfg.model.artifact_path).with_context(|| {
        format!(
            "refusing to start with unusable model artifact {}",
            cfg.model.artifact_path.display()
        )
    })?;
    if model.is_none() {
        warn!(
            path = %cfg.model.artifact_path.display(),
            "model artifact not found, starting without a model"
        );
    }
    let engine = PredictionEngine::new(model.map(StoredModel::into_shared));

    let weather: Arc<dyn WeatherSampler> = Arc::new(OpenWeatherClient::new(&cfg.weather)?);
    if cfg.weather.api_key.trim().is_empty() {
        warn!("weather.api_key is empty, irradiance and temperature will be reported missing");
    }

    InferenceController::new(settings, repos, weather, engine).await
}
