use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

type Job = Box<dyn FnOnce() -> Result<(), String> + Send>;

struct DeferredTask {
    desc: String,
    run_at: Instant,
    job: Job,
}

/// Deferred work that outlives the event that requested it: delete a
/// notification after its linger time, fetch stream details once the server
/// has finished analyzing a new file. Bounded so a flood of events degrades
/// to dropped (and logged) tasks instead of unbounded memory; a worker that
/// dies never takes the caller down with it.
pub(crate) struct TaskQueue {
    tx: mpsc::SyncSender<DeferredTask>,
    depth: Arc<AtomicUsize>,
    high_water: usize,
}

impl TaskQueue {
    pub(crate) fn start(capacity: usize) -> TaskQueue {
        let (tx, rx) = mpsc::sync_channel::<DeferredTask>(capacity);
        let depth = Arc::new(AtomicUsize::new(0));
        let counter = depth.clone();
        thread::spawn(move || worker(rx, counter));
        TaskQueue { tx, depth, high_water: (capacity * 3 / 4).max(1) }
    }

    pub(crate) fn schedule(
        &self,
        desc: impl Into<String>,
        delay: Duration,
        job: impl FnOnce() -> Result<(), String> + Send + 'static,
    ) {
        let task = DeferredTask {
            desc: desc.into(),
            run_at: Instant::now() + delay,
            job: Box::new(job),
        };
        match self.tx.try_send(task) {
            Ok(()) => {
                let queued = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
                if queued >= self.high_water {
                    eprintln!("[tasks] {queued} tasks outstanding");
                }
            }
            Err(mpsc::TrySendError::Full(task)) => {
                eprintln!("[tasks] queue full, dropping {:?}", task.desc);
            }
            Err(mpsc::TrySendError::Disconnected(task)) => {
                eprintln!("[tasks] worker gone, dropping {:?}", task.desc);
            }
        }
    }

    /// Tasks accepted but not yet run.
    #[cfg(test)]
    fn outstanding(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

fn worker(rx: mpsc::Receiver<DeferredTask>, depth: Arc<AtomicUsize>) {
    let mut pending: Vec<DeferredTask> = Vec::new();
    let mut closed = false;
    loop {
        let now = Instant::now();
        let mut i = 0;
        while i < pending.len() {
            if pending[i].run_at <= now {
                let task = pending.swap_remove(i);
                if let Err(err) = (task.job)() {
                    eprintln!("[tasks] {:?} failed: {err}", task.desc);
                }
                depth.fetch_sub(1, Ordering::Relaxed);
            } else {
                i += 1;
            }
        }
        if closed && pending.is_empty() {
            return;
        }
        let wait = pending
            .iter()
            .map(|t| t.run_at.saturating_duration_since(now))
            .min()
            .unwrap_or(Duration::from_secs(3600));
        if closed {
            thread::sleep(wait);
            continue;
        }
        match rx.recv_timeout(wait) {
            Ok(task) => pending.push(task),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => closed = true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn runs_jobs_after_their_delay() {
        let queue = TaskQueue::start(16);
        let ran = Arc::new(AtomicUsize::new(0));
        let flag = ran.clone();
        queue.schedule("first", Duration::from_millis(20), move || {
            flag.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let flag = ran.clone();
        queue.schedule("second", Duration::from_millis(40), move || {
            flag.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        thread::sleep(Duration::from_millis(200));
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failing_job_does_not_stop_the_worker() {
        let queue = TaskQueue::start(16);
        let ran = Arc::new(AtomicUsize::new(0));
        queue.schedule("broken", Duration::from_millis(10), || Err("boom".into()));
        let flag = ran.clone();
        queue.schedule("after", Duration::from_millis(30), move || {
            flag.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        thread::sleep(Duration::from_millis(200));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn outstanding_count_follows_the_queue() {
        let queue = TaskQueue::start(16);
        queue.schedule("a", Duration::from_millis(30), || Ok(()));
        queue.schedule("b", Duration::from_millis(30), || Ok(()));
        assert_eq!(queue.outstanding(), 2);
        thread::sleep(Duration::from_millis(200));
        assert_eq!(queue.outstanding(), 0);
    }
}
