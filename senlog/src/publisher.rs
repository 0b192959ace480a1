//! The publisher: asynchronous uplink jobs over a shared worker thread.
//!
//! A [`Publisher`] is a transfer driver bound to one remote resource. Its
//! asynchronous jobs are executed by a [`PublishWorker`] — one worker
//! thread and one bounded FIFO queue, shared by however many publishers
//! the application creates. Jobs of one publisher execute in enqueue
//! order; across publishers they interleave by queue order.
//!
//! Each job is attempted up to `retry_cnt + 1` times against the
//! transport; the job's callback fires exactly once with the terminal
//! status. Dropping a publisher blocks until its in-flight jobs have
//! drained, after which no callback of that publisher will ever fire
//! again.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError as ChanTrySendError};

use crate::error::{Error, TransferError};
use crate::net::{RemoteResource, Transport};
use crate::transfer::{TransferDriver, TransferJob, TrySendError};

/// Capacity of the shared job queue.
const WORKER_QUEUE_LEN: usize = 4;

struct QueuedJob {
    job: TransferJob,
    inner: Arc<PubInner>,
}

/// Handle to the shared publisher worker thread.
///
/// Cloning is cheap; the worker stops once the last handle is dropped
/// and every queued job has run.
#[derive(Clone)]
pub struct PublishWorker {
    shared: Arc<WorkerShared>,
}

struct WorkerShared {
    tx: Option<Sender<QueuedJob>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl PublishWorker {
    /// Spawns the worker thread.
    pub fn spawn() -> std::io::Result<Self> {
        let (tx, rx) = bounded(WORKER_QUEUE_LEN);

        let handle = thread::Builder::new()
            .name("publisher".into())
            .spawn(move || worker_loop(rx))?;

        Ok(PublishWorker {
            shared: Arc::new(WorkerShared {
                tx: Some(tx),
                handle: Some(handle),
            }),
        })
    }

    fn tx(&self) -> &Sender<QueuedJob> {
        self.shared
            .tx
            .as_ref()
            .expect("queue sender lives as long as the worker handle")
    }
}

impl Drop for WorkerShared {
    fn drop(&mut self) {
        // Disconnect the queue first so the worker loop can end, then
        // wait for it to drain.
        drop(self.tx.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn worker_loop(rx: Receiver<QueuedJob>) {
    while let Ok(QueuedJob { mut job, inner }) = rx.recv() {
        let res = inner.run_attempts(&mut job);
        job.complete(match res {
            Ok(_) => Ok(()),
            Err(e) => Err(Error::Transfer(e)),
        });
        inner.job_done();
    }
}

struct PubInner {
    resource: RemoteResource,
    transport: Arc<dyn Transport>,
    retry_cnt: u32,
    in_flight: Mutex<u32>,
    drained: Condvar,
}

impl PubInner {
    /// Sends the job's payload, retrying up to `retry_cnt` extra times.
    fn run_attempts(&self, job: &mut TransferJob) -> Result<usize, TransferError> {
        let mut attempt = 0;
        loop {
            match self.transport.send(&self.resource, &mut *job.source) {
                Ok(n) => return Ok(n),
                Err(e) if attempt < self.retry_cnt => {
                    tracing::warn!(error = %e, attempt, "send failed, retrying");
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(error = %e, attempts = attempt + 1, "send failed for good");
                    return Err(e);
                }
            }
        }
    }

    fn job_started(&self) {
        let mut n = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        *n += 1;
    }

    fn job_done(&self) {
        let mut n = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        *n -= 1;
        if *n == 0 {
            self.drained.notify_all();
        }
    }
}

/// Transfer driver pushing packs to one remote resource.
pub struct Publisher {
    inner: Arc<PubInner>,
    worker: PublishWorker,
}

impl Publisher {
    /// Creates a publisher using the default CoAP block-wise transport.
    pub fn new(worker: &PublishWorker, resource: RemoteResource, retry_cnt: u32) -> Self {
        Self::with_transport(
            worker,
            resource,
            retry_cnt,
            Arc::new(crate::net::CoapClient::default()),
        )
    }

    /// Creates a publisher over a custom transport.
    pub fn with_transport(
        worker: &PublishWorker,
        resource: RemoteResource,
        retry_cnt: u32,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Publisher {
            inner: Arc::new(PubInner {
                resource,
                transport,
                retry_cnt,
                in_flight: Mutex::new(0),
                drained: Condvar::new(),
            }),
            worker: worker.clone(),
        }
    }

    /// The remote resource this publisher targets.
    pub fn resource(&self) -> &RemoteResource {
        &self.inner.resource
    }
}

impl TransferDriver for Publisher {
    fn try_send(&self, job: TransferJob) -> Result<(), TrySendError> {
        self.inner.job_started();

        let queued = QueuedJob {
            job,
            inner: Arc::clone(&self.inner),
        };

        match self.worker.tx().try_send(queued) {
            Ok(()) => Ok(()),
            Err(ChanTrySendError::Full(q)) => {
                self.inner.job_done();
                Err(TrySendError::WouldBlock(q.job))
            }
            Err(ChanTrySendError::Disconnected(q)) => {
                self.inner.job_done();
                Err(TrySendError::Shutdown(q.job))
            }
        }
    }

    fn send(&self, job: TransferJob) -> Result<(), TransferError> {
        let mut job = job;
        let res = self.inner.run_attempts(&mut job);
        // Synchronous sends convey their outcome through the return
        // value; the callback stays unfired.
        drop(job);
        res.map(drop)
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        let mut n = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while *n > 0 {
            n = self
                .inner
                .drained
                .wait(n)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memfile::MemFile;
    use crate::transfer::PackSource;
    use std::io::Read;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn resource() -> RemoteResource {
        RemoteResource::new("::1", 5683, "/data")
    }

    /// Transport failing the first `fail_first` attempts, recording
    /// every payload it successfully "sends".
    #[derive(Default)]
    struct MockTransport {
        attempts: AtomicUsize,
        fail_first: usize,
        sent: Mutex<Vec<Vec<u8>>>,
        delay: Option<Duration>,
    }

    impl Transport for MockTransport {
        fn send(
            &self,
            _res: &RemoteResource,
            source: &mut dyn PackSource,
        ) -> Result<usize, TransferError> {
            if let Some(delay) = self.delay {
                thread::sleep(delay);
            }

            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_first {
                return Err(TransferError::Timeout);
            }

            let mut bytes = Vec::new();
            source.read_to_end(&mut bytes)?;
            self.sent.lock().unwrap().push(bytes.clone());
            Ok(bytes.len())
        }
    }

    fn job_with_flag(
        payload: &[u8],
        tx: crossbeam_channel::Sender<bool>,
    ) -> TransferJob {
        TransferJob::new(MemFile::with_data(payload.to_vec())).with_callback(move |status| {
            let _ = tx.send(status.is_ok());
        })
    }

    #[test]
    fn test_retry_until_success() {
        let transport = Arc::new(MockTransport {
            fail_first: 2,
            ..MockTransport::default()
        });
        let worker = PublishWorker::spawn().unwrap();
        let publisher = Publisher::with_transport(
            &worker,
            resource(),
            2,
            Arc::clone(&transport) as Arc<dyn Transport>,
        );

        let (tx, rx) = bounded(1);
        publisher.try_send(job_with_flag(b"pack", tx)).unwrap();

        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_callback_gets_terminal_error() {
        let transport = Arc::new(MockTransport {
            fail_first: usize::MAX,
            ..MockTransport::default()
        });
        let worker = PublishWorker::spawn().unwrap();
        let publisher = Publisher::with_transport(
            &worker,
            resource(),
            1,
            Arc::clone(&transport) as Arc<dyn Transport>,
        );

        let (tx, rx) = bounded(1);
        publisher.try_send(job_with_flag(b"pack", tx)).unwrap();

        // Terminal status is the last error, after retry_cnt + 1 tries.
        assert!(!rx.recv_timeout(Duration::from_secs(5)).unwrap());
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_jobs_execute_in_enqueue_order() {
        let transport = Arc::new(MockTransport::default());
        let worker = PublishWorker::spawn().unwrap();
        let publisher = Publisher::with_transport(
            &worker,
            resource(),
            0,
            Arc::clone(&transport) as Arc<dyn Transport>,
        );

        let (tx, rx) = bounded(3);
        for payload in [b"one".as_slice(), b"two", b"three"] {
            publisher
                .try_send(job_with_flag(payload, tx.clone()))
                .unwrap();
        }
        for _ in 0..3 {
            assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        }

        let sent = transport.sent.lock().unwrap().clone();
        assert_eq!(sent, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
    }

    #[test]
    fn test_drop_waits_for_in_flight_jobs() {
        let transport = Arc::new(MockTransport {
            delay: Some(Duration::from_millis(50)),
            ..MockTransport::default()
        });
        let worker = PublishWorker::spawn().unwrap();
        let publisher = Publisher::with_transport(
            &worker,
            resource(),
            0,
            Arc::clone(&transport) as Arc<dyn Transport>,
        );

        let done = Arc::new(AtomicUsize::new(0));
        let done2 = Arc::clone(&done);
        let job = TransferJob::new(MemFile::with_data(b"slow".to_vec()))
            .with_callback(move |_| {
                done2.fetch_add(1, Ordering::SeqCst);
            });
        publisher.try_send(job).unwrap();

        drop(publisher);
        // By the time drop returns, the callback has fired.
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sync_send_skips_callback() {
        let transport = Arc::new(MockTransport::default());
        let worker = PublishWorker::spawn().unwrap();
        let publisher = Publisher::with_transport(
            &worker,
            resource(),
            0,
            Arc::clone(&transport) as Arc<dyn Transport>,
        );

        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        let job = TransferJob::new(MemFile::with_data(b"sync".to_vec()))
            .with_callback(move |_| {
                fired2.fetch_add(1, Ordering::SeqCst);
            });

        publisher.send(job).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_publishers_share_one_worker() {
        let transport = Arc::new(MockTransport::default());
        let worker = PublishWorker::spawn().unwrap();

        let first = Publisher::with_transport(
            &worker,
            resource(),
            0,
            Arc::clone(&transport) as Arc<dyn Transport>,
        );
        let second = Publisher::with_transport(
            &worker,
            RemoteResource::new("::1", 5684, "/other"),
            0,
            Arc::clone(&transport) as Arc<dyn Transport>,
        );

        let (tx, rx) = bounded(2);
        first.try_send(job_with_flag(b"a", tx.clone())).unwrap();
        second.try_send(job_with_flag(b"b", tx.clone())).unwrap();
        for _ in 0..2 {
            assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        }

        assert_eq!(transport.sent.lock().unwrap().len(), 2);
    }
}
