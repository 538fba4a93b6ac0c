use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::domain::control_loop::driver::ActionDriver;
use crate::domain::plan::timed_reconfiguration_plan::TimedReconfigurationPlan;
use crate::error::ExecutionError;

/// Runs a plan through a driver, batch by batch. Actions sharing a start
/// time are applied concurrently; a batch starts once the previous one is
/// over.
#[derive(Debug, Clone)]
pub struct PlanExecutor {
    driver: Arc<dyn ActionDriver>,
    timeout: Duration,
}

impl PlanExecutor {
    pub fn new(driver: Arc<dyn ActionDriver>, timeout: Duration) -> Self {
        PlanExecutor { driver, timeout }
    }

    /// Returns the number of applied actions.
    pub async fn execute(&self, plan: &TimedReconfigurationPlan) -> Result<usize, ExecutionError> {
        log::info!("Executing a plan of {} actions through the {} driver", plan.len(), self.driver.name());

        match tokio::time::timeout(self.timeout, self.run(plan)).await {
            Ok(result) => result,
            Err(_) => {
                log::error!("Plan execution did not finish within {:?}", self.timeout);
                Err(ExecutionError::Timeout(self.timeout))
            }
        }
    }

    async fn run(&self, plan: &TimedReconfigurationPlan) -> Result<usize, ExecutionError> {
        self.driver.prepare(plan.source()).await?;

        let mut applied = 0;
        for (start, batch) in plan.execution_batches() {
            log::debug!("t={}: {} actions", start, batch.len());
            let results = join_all(batch.iter().map(|action| self.driver.execute(action))).await;

            for result in results {
                result?;
                applied += 1;
            }
        }
        Ok(applied)
    }
}
