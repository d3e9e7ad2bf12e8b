//! Scripted navigation sequences.
//!
//! A script is a TOML list of steps replayed against a
//! [`NavigationDriver`]:
//!
//! ```toml
//! [[steps]]
//! action = "visit"
//!
//! [[steps]]
//! action = "wait"
//! ms = 300
//!
//! [[steps]]
//! action = "progress"
//! percentage = 40
//!
//! [[steps]]
//! action = "finish"
//! outcome = "completed"
//! ```
//!
//! Interruption is not a step of its own: a `visit` while another visit is
//! in flight interrupts it.

use crate::clock::ManualScheduler;
use crate::driver::NavigationDriver;
use crate::errors::ScriptError;
use crate::transition::Outcome;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// One scripted action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Start a new visit
    Visit,
    /// Let time pass
    Wait { ms: u64 },
    /// Report upload progress for the active visit
    Progress { percentage: f64 },
    /// Finish the active visit
    Finish { outcome: Outcome },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// What a script run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub steps: usize,
    pub visits: usize,
    /// Total simulated wait time
    pub waited_ms: u64,
}

impl Script {
    pub fn load(path: &Path) -> Result<Self, ScriptError> {
        let content = std::fs::read_to_string(path).map_err(|source| ScriptError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ScriptError> {
        let script: Script = toml::from_str(content)?;
        script.validate()?;
        Ok(script)
    }

    /// Structural checks that do not need a driver.
    pub fn validate(&self) -> Result<(), ScriptError> {
        for (idx, step) in self.steps.iter().enumerate() {
            let step_no = idx + 1;
            match step {
                Step::Finish {
                    outcome: Outcome::Interrupted,
                } => {
                    return Err(ScriptError::InvalidStep {
                        step: step_no,
                        message: "interrupted is produced by starting another visit".to_string(),
                    });
                }
                Step::Progress { percentage } if !(0.0..=100.0).contains(percentage) => {
                    return Err(ScriptError::InvalidStep {
                        step: step_no,
                        message: format!("percentage {} is outside 0..=100", percentage),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// A short tour of every outcome.
    pub fn demo() -> Self {
        use Step::*;
        Self {
            steps: vec![
                // Quick visit: the indicator never appears
                Visit,
                Wait { ms: 120 },
                Finish {
                    outcome: Outcome::Completed,
                },
                // Slow upload that completes
                Visit,
                Wait { ms: 400 },
                Progress { percentage: 25.0 },
                Wait { ms: 300 },
                Progress { percentage: 60.0 },
                Wait { ms: 300 },
                Progress { percentage: 100.0 },
                Wait { ms: 500 },
                Finish {
                    outcome: Outcome::Completed,
                },
                // Superseded by a newer visit, which is then cancelled
                Visit,
                Wait { ms: 600 },
                Progress { percentage: 40.0 },
                Wait { ms: 200 },
                Visit,
                Wait { ms: 500 },
                Finish {
                    outcome: Outcome::Cancelled,
                },
            ],
        }
    }

    fn apply(
        step_no: usize,
        step: &Step,
        driver: &mut NavigationDriver,
        summary: &mut RunSummary,
    ) -> Result<Option<Duration>, ScriptError> {
        debug!(step = step_no, ?step, "Applying script step");
        summary.steps += 1;
        let driver_err = |source| ScriptError::Driver {
            step: step_no,
            source,
        };
        match step {
            Step::Visit => {
                driver.visit();
                summary.visits += 1;
            }
            Step::Wait { ms } => {
                summary.waited_ms += ms;
                return Ok(Some(Duration::from_millis(*ms)));
            }
            Step::Progress { percentage } => driver.progress(*percentage).map_err(driver_err)?,
            Step::Finish { outcome } => {
                driver.finish(*outcome).map_err(driver_err)?;
            }
        }
        Ok(None)
    }

    /// Replay on real time.
    pub async fn run(&self, driver: &mut NavigationDriver) -> Result<RunSummary, ScriptError> {
        let mut summary = RunSummary::default();
        for (idx, step) in self.steps.iter().enumerate() {
            if let Some(wait) = Self::apply(idx + 1, step, driver, &mut summary)? {
                tokio::time::sleep(wait).await;
            }
        }
        Ok(summary)
    }

    /// Replay on a virtual clock; waits advance `clock` instead of sleeping.
    pub fn run_manual(
        &self,
        driver: &mut NavigationDriver,
        clock: &ManualScheduler,
    ) -> Result<RunSummary, ScriptError> {
        let mut summary = RunSummary::default();
        for (idx, step) in self.steps.iter().enumerate() {
            if let Some(wait) = Self::apply(idx + 1, step, driver, &mut summary)? {
                clock.advance(wait);
            }
        }
        Ok(summary)
    }
}
