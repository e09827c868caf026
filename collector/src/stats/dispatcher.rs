//! Fixed-size worker pool for aggregation jobs.
//!
//! Idle workers advertise a one-shot job slot into a shared pool; a single
//! dispatch task hands each job from the intake to the next advertised slot,
//! so every job is claimed by exactly one worker. Results come back on one
//! completion stream in no particular order.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex, MutexGuard};
use tokio::task::JoinHandle;

use super::compacter::Compacter;
use super::statistic::{StatPreset, StatValue};
use super::timeframe::Window;

/// One preset over one window of one coin.
#[derive(Debug, Clone)]
pub struct Job {
    pub coin: String,
    pub preset_name: String,
    pub preset: StatPreset,
    pub window: Window,
    pub step: i64,
}

impl Job {
    pub fn compacter(&self) -> Compacter {
        Compacter::new(self.window.basis, self.window.from, self.window.to, self.step)
    }
}

#[derive(Debug, Clone)]
pub struct JobResult {
    pub coin: String,
    pub preset_name: String,
    pub window: Window,
    pub values: Vec<Option<StatValue>>,
}

#[async_trait]
pub trait JobExecutor: Send + Sync + 'static {
    async fn execute(&self, job: &Job) -> Vec<Option<StatValue>>;
}

type Slot = oneshot::Sender<Job>;

pub struct Dispatcher {
    jobs: mpsc::UnboundedSender<Job>,
    results: Mutex<mpsc::UnboundedReceiver<JobResult>>,
    workers: usize,
    _tasks: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawn `workers` workers (at least one) and the dispatch task. They run
    /// until the dispatcher is dropped.
    pub fn start<E: JobExecutor>(workers: usize, executor: Arc<E>) -> Self {
        let workers = workers.max(1);
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        let (pool_tx, pool_rx) = mpsc::channel::<Slot>(workers);

        let mut tasks = Vec::with_capacity(workers + 1);
        for id in 0..workers {
            tasks.push(tokio::spawn(run_worker(
                id,
                executor.clone(),
                pool_tx.clone(),
                result_tx.clone(),
            )));
        }
        tasks.push(tokio::spawn(dispatch(job_rx, pool_rx)));

        tracing::info!("Started stats dispatcher with {} workers", workers);

        Self {
            jobs: job_tx,
            results: Mutex::new(result_rx),
            workers,
            _tasks: tasks,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Queue a job. Returns false if the pool is gone.
    pub fn submit(&self, job: Job) -> bool {
        self.jobs.send(job).is_ok()
    }

    /// Exclusive access to the completion stream.
    pub async fn results(&self) -> MutexGuard<'_, mpsc::UnboundedReceiver<JobResult>> {
        self.results.lock().await
    }
}

async fn dispatch(mut jobs: mpsc::UnboundedReceiver<Job>, mut pool: mpsc::Receiver<Slot>) {
    while let Some(mut job) = jobs.recv().await {
        loop {
            let Some(slot) = pool.recv().await else {
                tracing::warn!("No stats workers left, dropping queued jobs");
                return;
            };
            match slot.send(job) {
                Ok(()) => break,
                Err(returned) => job = returned,
            }
        }
    }
}

async fn run_worker<E: JobExecutor>(
    id: usize,
    executor: Arc<E>,
    pool: mpsc::Sender<Slot>,
    results: mpsc::UnboundedSender<JobResult>,
) {
    loop {
        let (slot, assigned) = oneshot::channel();
        if pool.send(slot).await.is_err() {
            break;
        }
        let Ok(job) = assigned.await else {
            break;
        };

        let values = executor.execute(&job).await;
        let result = JobResult {
            coin: job.coin,
            preset_name: job.preset_name,
            window: job.window,
            values,
        };
        if results.send(result).is_err() {
            break;
        }
    }
    tracing::debug!("Stats worker {} stopped", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::compacter::CompactBasis;
    use crate::stats::statistic::{AggregateMethod, StatKind, ValueType};
    use quickcheck_macros::quickcheck;
    use std::collections::HashSet;
    use std::time::Duration;

    /// Echoes the window bounds after a short, job-dependent delay.
    struct EchoExecutor;

    #[async_trait]
    impl JobExecutor for EchoExecutor {
        async fn execute(&self, job: &Job) -> Vec<Option<StatValue>> {
            tokio::time::sleep(Duration::from_micros((job.window.from % 7) as u64 * 100)).await;
            vec![Some(StatValue::I64(job.window.from)), None]
        }
    }

    fn job(coin: &str, preset_name: &str, n: i64) -> Job {
        Job {
            coin: coin.to_string(),
            preset_name: preset_name.to_string(),
            preset: StatPreset::new(StatKind::Block, "height", AggregateMethod::Max, ValueType::I64),
            window: Window {
                id: format!("w{n}"),
                basis: CompactBasis::Height,
                from: n,
                to: n + 10,
            },
            step: 5,
        }
    }

    async fn run_jobs(workers: usize, jobs: usize) -> Vec<JobResult> {
        let dispatcher = Dispatcher::start(workers, Arc::new(EchoExecutor));
        let mut results = dispatcher.results().await;
        for n in 0..jobs {
            let coin = if n % 2 == 0 { "BTC" } else { "BCH" };
            assert!(dispatcher.submit(job(coin, &format!("P{}", n % 3), n as i64)));
        }

        let mut out = Vec::with_capacity(jobs);
        for _ in 0..jobs {
            out.push(results.recv().await.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_every_job_yields_one_result() {
        let results = run_jobs(4, 50).await;
        assert_eq!(results.len(), 50);

        let ids: HashSet<(String, String, String)> = results
            .iter()
            .map(|r| (r.coin.clone(), r.preset_name.clone(), r.window.id.clone()))
            .collect();
        assert_eq!(ids.len(), 50);

        for r in &results {
            assert_eq!(r.values, vec![Some(StatValue::I64(r.window.from)), None]);
        }
    }

    #[tokio::test]
    async fn test_zero_workers_means_one() {
        let dispatcher = Dispatcher::start(0, Arc::new(EchoExecutor));
        assert_eq!(dispatcher.workers(), 1);
    }

    #[quickcheck]
    fn prop_k_jobs_k_results(workers: u8, jobs: u8) -> bool {
        let workers = 1 + workers as usize % 8;
        let jobs = jobs as usize % 64;

        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let results = rt.block_on(run_jobs(workers, jobs));

        let froms: HashSet<i64> = results.iter().map(|r| r.window.from).collect();
        results.len() == jobs && froms == (0..jobs as i64).collect()
    }
}
