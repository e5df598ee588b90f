//! Per-optimizer learning-rate schedules on top of `burn::lr_scheduler`.

use burn::lr_scheduler::constant::ConstantLr;
use burn::lr_scheduler::step::{StepLrScheduler, StepLrSchedulerConfig};
use burn::lr_scheduler::LrScheduler;
use burn::LearningRate;

use crate::config::{LrPolicy, ScheduleConfig};
use crate::error::{TrainError, TrainResult};
use crate::ADBackend;

#[derive(Debug, Clone)]
enum Scheduler {
    Constant(ConstantLr),
    Step(StepLrScheduler),
}

fn scheduler_step(s: &mut Scheduler) -> LearningRate {
    match s {
        Scheduler::Constant(inner) => LrScheduler::step(inner),
        Scheduler::Step(inner) => LrScheduler::step(inner),
    }
}

/// A burn scheduler plus the rate it last produced.
///
/// The current rate is `base * gamma ^ floor(t / step_size)` where `t` counts
/// [`Schedule::step`] calls since construction, or the iteration passed to
/// [`Schedule::resume_at`].
#[derive(Debug, Clone)]
pub struct Schedule {
    scheduler: Scheduler,
    lr: LearningRate,
}

impl Schedule {
    pub fn new(base_lr: f64, cfg: ScheduleConfig) -> TrainResult<Self> {
        Self::resume_at(base_lr, cfg, 0)
    }

    /// Schedule positioned as if `iteration` steps had already been taken.
    pub fn resume_at(base_lr: f64, cfg: ScheduleConfig, iteration: u64) -> TrainResult<Self> {
        let mut scheduler = match cfg.lr_policy {
            LrPolicy::Constant => Scheduler::Constant(ConstantLr::new(base_lr)),
            LrPolicy::Step => {
                let step_size = usize::try_from(cfg.step_size)
                    .map_err(|_| TrainError::Config(format!("step_size {} too large", cfg.step_size)))?;
                let inner = StepLrSchedulerConfig::new(base_lr, step_size)
                    .with_gamma(cfg.gamma)
                    .init()
                    .map_err(TrainError::Config)?;
                // burn counts from -1; loading `iteration - 1` makes the next step land on `iteration`.
                let index = i32::try_from(iteration)
                    .map_err(|_| TrainError::Config(format!("iteration {iteration} out of range")))?;
                Scheduler::Step(inner.load_record::<ADBackend>(index - 1))
            }
        };
        let lr = scheduler_step(&mut scheduler);
        Ok(Self { scheduler, lr })
    }

    pub fn lr(&self) -> LearningRate {
        self.lr
    }

    /// Advance one iteration and return the new rate.
    pub fn step(&mut self) -> LearningRate {
        self.lr = scheduler_step(&mut self.scheduler);
        self.lr
    }
}
