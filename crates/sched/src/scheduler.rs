use std::time::{Duration, Instant};

use glam::DVec3;

use crate::error::SchedError;
use crate::queue::{LoadQueue, QueueItem};

#[derive(Debug, Clone, PartialEq)]
pub struct StageConfig {
    pub max_in_flight: usize,
    /// Minimum time between queue re-sorts.
    pub sort_interval: Duration,
}

impl StageConfig {
    pub fn download() -> Self {
        Self {
            max_in_flight: 10,
            sort_interval: Duration::from_secs(2),
        }
    }

    pub fn build(workers: usize) -> Self {
        Self {
            max_in_flight: workers.max(1) * 2,
            sort_interval: Duration::from_millis(100),
        }
    }
}

/// One scheduling stage: a priority queue feeding a bounded number of
/// concurrent tasks.
pub struct Stage<J> {
    name: &'static str,
    config: StageConfig,
    queue: LoadQueue<J>,
    in_flight: usize,
    last_sort: Option<Instant>,
    dispatched: u64,
}

impl<J> Stage<J> {
    pub fn new(name: &'static str, config: StageConfig) -> Self {
        Self {
            name,
            config,
            queue: LoadQueue::new(),
            in_flight: 0,
            last_sort: None,
            dispatched: 0,
        }
    }

    pub fn enqueue(&mut self, pos: DVec3, size_factor: f32, job: J) {
        self.queue.push(QueueItem {
            pos,
            size_factor,
            payload: job,
        });
    }

    /// Re-sort if the interval has passed, then hand jobs to `submit` until
    /// the in-flight cap is reached. Returns the number dispatched.
    pub fn pump(
        &mut self,
        now: Instant,
        campos: DVec3,
        mut submit: impl FnMut(J) -> Result<(), SchedError>,
    ) -> Result<usize, SchedError> {
        let due = self
            .last_sort
            .is_none_or(|t| now.saturating_duration_since(t) >= self.config.sort_interval);
        if due && !self.queue.is_empty() {
            self.queue.sort(campos);
            self.last_sort = Some(now);
        }

        let mut count = 0;
        while self.in_flight < self.config.max_in_flight {
            let Some(item) = self.queue.pop_front() else {
                break;
            };
            submit(item.payload)?;
            self.in_flight += 1;
            count += 1;
        }
        if count > 0 {
            self.dispatched += count as u64;
            tracing::debug!(
                stage = self.name,
                count,
                in_flight = self.in_flight,
                queued = self.queue.len(),
                "dispatched"
            );
        }
        Ok(count)
    }

    /// Record that a dispatched task has come back.
    pub fn complete(&mut self) {
        if self.in_flight == 0 {
            tracing::error!(stage = self.name, "completion with nothing in flight");
            return;
        }
        self.in_flight -= 1;
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max: usize, interval_ms: u64) -> StageConfig {
        StageConfig {
            max_in_flight: max,
            sort_interval: Duration::from_millis(interval_ms),
        }
    }

    #[test]
    fn caps_concurrency() {
        let mut stage = Stage::new("test", config(2, 0));
        for i in 0..5 {
            stage.enqueue(DVec3::new(i as f64, 0.0, 0.0), 1.0, i);
        }
        let mut sent = Vec::new();
        let n = stage
            .pump(Instant::now(), DVec3::ZERO, |j| {
                sent.push(j);
                Ok(())
            })
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(sent, [0, 1]);
        assert_eq!(stage.in_flight(), 2);
        assert_eq!(stage.queued(), 3);

        // Nothing more until a slot frees.
        let n = stage.pump(Instant::now(), DVec3::ZERO, |_| Ok(())).unwrap();
        assert_eq!(n, 0);
        stage.complete();
        let n = stage.pump(Instant::now(), DVec3::ZERO, |_| Ok(())).unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn sorts_only_when_interval_elapsed() {
        let mut stage = Stage::new("test", config(1, 1000));
        let t0 = Instant::now();
        stage.enqueue(DVec3::new(100.0, 0.0, 0.0), 1.0, "far");
        stage.enqueue(DVec3::new(1.0, 0.0, 0.0), 1.0, "near");
        let mut sent = Vec::new();
        stage
            .pump(t0, DVec3::ZERO, |j| {
                sent.push(j);
                Ok(())
            })
            .unwrap();
        assert_eq!(sent, ["near"]);
        stage.complete();

        // Added after the sort and the interval has not passed: stays behind "far".
        stage.enqueue(DVec3::new(0.5, 0.0, 0.0), 1.0, "nearest");
        stage
            .pump(t0 + Duration::from_millis(10), DVec3::ZERO, |j| {
                sent.push(j);
                Ok(())
            })
            .unwrap();
        assert_eq!(sent, ["near", "far"]);
        stage.complete();

        stage
            .pump(t0 + Duration::from_millis(1500), DVec3::ZERO, |j| {
                sent.push(j);
                Ok(())
            })
            .unwrap();
        assert_eq!(sent, ["near", "far", "nearest"]);
    }

    #[test]
    fn submit_failure_propagates() {
        let mut stage = Stage::new("test", config(4, 0));
        stage.enqueue(DVec3::ZERO, 1.0, ());
        let err = stage
            .pump(Instant::now(), DVec3::ZERO, |_| Err(SchedError::PoolClosed))
            .unwrap_err();
        assert!(matches!(err, SchedError::PoolClosed));
        assert_eq!(stage.in_flight(), 0);
    }

    #[test]
    fn spurious_completion_is_ignored() {
        let mut stage: Stage<()> = Stage::new("test", config(1, 0));
        stage.complete();
        assert_eq!(stage.in_flight(), 0);
    }
}
