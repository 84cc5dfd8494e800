//! Schedule tick driver.
//!
//! One recurring job calls `TriggerDispatcher::on_schedule` at a fixed
//! cadence; due-ness itself lives in the dispatcher (workflow interval vs.
//! last schedule-triggered admission), so the tick rate only bounds how
//! quickly a due workflow is noticed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::triggers::dispatcher::TriggerDispatcher;

/// Drives the periodic schedule tick.
pub struct ScheduleTicker {
    job_scheduler: Arc<Mutex<JobScheduler>>,
    dispatcher: TriggerDispatcher,
    tick_secs: u64,
}

impl ScheduleTicker {
    pub async fn new(dispatcher: TriggerDispatcher, tick_secs: u64) -> Result<Self> {
        let job_scheduler = JobScheduler::new()
            .await
            .map_err(|e| Error::Config(format!("Failed to create schedule ticker: {}", e)))?;

        Ok(Self {
            job_scheduler: Arc::new(Mutex::new(job_scheduler)),
            dispatcher,
            tick_secs,
        })
    }

    /// Register the tick job and start the underlying scheduler.
    pub async fn start(&self) -> Result<()> {
        let dispatcher = self.dispatcher.clone();
        let job = Job::new_repeated_async(Duration::from_secs(self.tick_secs), move |_uuid, _lock| {
            let dispatcher = dispatcher.clone();
            Box::pin(async move {
                match dispatcher.on_schedule(Utc::now()).await {
                    Ok(admitted) if !admitted.is_empty() => {
                        info!("Schedule tick admitted {} execution(s)", admitted.len());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("Schedule tick failed: {}", e);
                    }
                }
            })
        })
        .map_err(|e| Error::Config(format!("Failed to build schedule tick job: {}", e)))?;

        {
            let sched = self.job_scheduler.lock().await;
            sched
                .add(job)
                .await
                .map_err(|e| Error::Config(format!("Failed to add schedule tick job: {}", e)))?;
            sched
                .start()
                .await
                .map_err(|e| Error::Config(format!("Failed to start schedule ticker: {}", e)))?;
        }

        info!("Schedule ticker started (every {}s)", self.tick_secs);
        Ok(())
    }

    /// Stop the scheduler gracefully.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut sched = self.job_scheduler.lock().await;
            sched
                .shutdown()
                .await
                .map_err(|e| Error::Config(format!("Failed to stop schedule ticker: {}", e)))?;
        }

        info!("Schedule ticker stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionRegistry;
    use crate::engine::Engine;
    use crate::storage::SqliteStorage;

    #[tokio::test]
    async fn test_ticker_lifecycle() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let engine = Engine::new(ActionRegistry::empty(), storage.clone());
        let dispatcher = TriggerDispatcher::new(storage, engine);

        let ticker = ScheduleTicker::new(dispatcher, 30).await.unwrap();
        ticker.start().await.unwrap();
        ticker.stop().await.unwrap();
    }
}
