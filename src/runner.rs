//! Bounded job execution
//!
//! Dependency resolution fans out without limit; every job of a build is
//! funneled through one [`Runner`] which is the only throttle on real work.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{MkrunError, Result};
use crate::job::Job;

/// How many jobs may run at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parallelism {
    Bounded(NonZeroUsize),
    Unbounded,
}

impl Parallelism {
    /// Interpret a `--jobs` style value: anything `<= 0` is unbounded.
    pub fn from_jobs(jobs: i64) -> Self {
        usize::try_from(jobs)
            .ok()
            .and_then(NonZeroUsize::new)
            .map_or(Self::Unbounded, Self::Bounded)
    }
}

impl Default for Parallelism {
    /// One worker per available CPU.
    fn default() -> Self {
        Self::Bounded(std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN))
    }
}

struct Envelope {
    job: Job,
    result: oneshot::Sender<Result<()>>,
}

impl Envelope {
    async fn execute(self) {
        let res = self.job.call().await;
        let _ = self.result.send(res);
    }
}

struct Running {
    queue: mpsc::UnboundedSender<Envelope>,
    workers: Vec<JoinHandle<()>>,
}

/// Worker pool executing jobs.
pub struct Runner {
    parallelism: Parallelism,
    running: Mutex<Option<Running>>,
}

impl Runner {
    pub fn new(parallelism: Parallelism) -> Self {
        Self {
            parallelism,
            running: Mutex::new(None),
        }
    }

    pub fn parallelism(&self) -> Parallelism {
        self.parallelism
    }

    /// Launch the workers. Fails if the runner was started and not stopped.
    pub fn start(&self) -> Result<()> {
        let mut running = self.lock();
        if running.is_some() {
            return Err(MkrunError::RunnerRunning);
        }

        let (queue, rx) = mpsc::unbounded_channel::<Envelope>();
        let workers = match self.parallelism {
            Parallelism::Bounded(n) => {
                let rx = Arc::new(tokio::sync::Mutex::new(rx));
                (0..n.get())
                    .map(|id| tokio::spawn(Self::worker(id, Arc::clone(&rx))))
                    .collect()
            }
            Parallelism::Unbounded => vec![tokio::spawn(Self::dispatcher(rx))],
        };
        debug!(parallelism = ?self.parallelism, "runner started");

        *running = Some(Running { queue, workers });
        Ok(())
    }

    /// Queue a job and wait for its result.
    ///
    /// Every `put` must have returned before [`Runner::stop`] is called.
    pub async fn put(&self, job: Job) -> Result<()> {
        let queue = self
            .lock()
            .as_ref()
            .map(|r| r.queue.clone())
            .ok_or(MkrunError::RunnerStopped)?;

        let (tx, rx) = oneshot::channel();
        queue
            .send(Envelope { job, result: tx })
            .map_err(|_| MkrunError::RunnerStopped)?;
        rx.await.map_err(|_| MkrunError::job("job was dropped before it finished"))?
    }

    /// Close the queue and wait for the workers to exit.
    pub async fn stop(&self) {
        let Some(running) = self.lock().take() else {
            return;
        };
        drop(running.queue);
        for worker in running.workers {
            let _ = worker.await;
        }
        debug!("runner stopped");
    }

    pub fn is_running(&self) -> bool {
        self.lock().is_some()
    }

    async fn worker(id: usize, rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>>) {
        loop {
            let next = rx.lock().await.recv().await;
            match next {
                Some(envelope) => envelope.execute().await,
                None => break,
            }
        }
        debug!(worker = id, "runner worker exited");
    }

    async fn dispatcher(mut rx: mpsc::UnboundedReceiver<Envelope>) {
        while let Some(envelope) = rx.recv().await {
            tokio::spawn(envelope.execute());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for Runner {
    fn default() -> Self {
        Self::new(Parallelism::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::future::join_all;
    use tokio::sync::Semaphore;

    #[test]
    fn test_parallelism_from_jobs() {
        assert_eq!(Parallelism::from_jobs(0), Parallelism::Unbounded);
        assert_eq!(Parallelism::from_jobs(-3), Parallelism::Unbounded);
        assert_eq!(
            Parallelism::from_jobs(4),
            Parallelism::Bounded(NonZeroUsize::new(4).unwrap())
        );
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let runner = Runner::new(Parallelism::from_jobs(1));
        runner.start().unwrap();
        assert!(matches!(runner.start(), Err(MkrunError::RunnerRunning)));
        runner.stop().await;
        runner.start().unwrap();
        runner.stop().await;
    }

    #[tokio::test]
    async fn test_put_without_start_fails() {
        let runner = Runner::new(Parallelism::from_jobs(1));
        let res = runner.put(Job::new(|| async { Ok(()) })).await;
        assert!(matches!(res, Err(MkrunError::RunnerStopped)));
    }

    #[tokio::test]
    async fn test_put_returns_job_error() {
        let runner = Runner::new(Parallelism::from_jobs(2));
        runner.start().unwrap();
        let err = runner
            .put(Job::new(|| async { Err(MkrunError::job("failed")) }))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "failed");
        runner.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_worker_runs_one_job_at_a_time() {
        let runner = Runner::new(Parallelism::from_jobs(1));
        runner.start().unwrap();

        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        let puts = (0..8).map(|_| {
            let (active, peak, done) = (active.clone(), peak.clone(), done.clone());
            runner.put(Job::new(move || {
                let (active, peak, done) = (active.clone(), peak.clone(), done.clone());
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }))
        });

        for res in join_all(puts).await {
            res.unwrap();
        }
        runner.stop().await;

        assert_eq!(done.load(Ordering::SeqCst), 8);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unbounded_runs_every_job_concurrently() {
        const N: usize = 6;
        let runner = Runner::new(Parallelism::Unbounded);
        runner.start().unwrap();

        let started = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Semaphore::new(0));

        let puts = join_all((0..N).map(|_| {
            let (started, release) = (started.clone(), release.clone());
            runner.put(Job::new(move || {
                let (started, release) = (started.clone(), release.clone());
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    let _permit = release.acquire().await.unwrap();
                    Ok(())
                }
            }))
        }));

        let releaser = async {
            while started.load(Ordering::SeqCst) < N {
                tokio::task::yield_now().await;
            }
            release.add_permits(N);
        };

        let (results, ()) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(puts, releaser)
        })
        .await
        .expect("jobs did not all start before release");

        assert!(results.into_iter().all(|r| r.is_ok()));
        runner.stop().await;
    }
}
