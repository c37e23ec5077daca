//! Periodic re-evaluation of active experiments

use chrono::Utc;
use decision::ABTestEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Run one re-evaluation pass and log the interim verdicts
///
/// Active experiments past their scheduled end are flagged but left running.
pub fn reevaluate_once(engine: &ABTestEngine) -> usize {
    for experiment in engine.overdue_experiments(Utc::now()) {
        warn!(
            experiment_id = %experiment.id,
            experiment = %experiment.name,
            scheduled_end = ?experiment.scheduled_end(),
            "Experiment is past its scheduled end"
        );
    }

    let results = engine.reevaluate_active();

    for result in &results {
        info!(
            experiment_id = %result.experiment_id,
            experiment = %result.experiment_name,
            winner = ?result.winner_variant,
            significant = result.is_statistically_significant,
            sample_size = result.total_sample_size,
            "Interim verdict"
        );
    }

    results.len()
}

/// Spawn the re-evaluation loop on the current runtime
pub fn spawn_reevaluation(engine: Arc<ABTestEngine>, interval: Duration) -> JoinHandle<()> {
    info!("Starting re-evaluation job every {:?}", interval);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let evaluated = reevaluate_once(&engine);
            debug!(evaluated, "Re-evaluation pass finished");
        }
    })
}
