//! Publisher retry behavior against a scripted transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use senlog::error::TransferError;
use senlog::memfile::MemFile;
use senlog::net::{RemoteResource, Transport};
use senlog::publisher::{PublishWorker, Publisher};
use senlog::transfer::{PackSource, TransferDriver, TransferJob};

/// Transport whose outcomes are scripted per attempt.
struct ScriptedTransport {
    attempts: AtomicUsize,
    script: Vec<bool>,
    sent: Mutex<Vec<Vec<u8>>>,
}

impl ScriptedTransport {
    fn new(script: &[bool]) -> Self {
        ScriptedTransport {
            attempts: AtomicUsize::new(0),
            script: script.to_vec(),
            sent: Mutex::new(Vec::new()),
        }
    }
}

impl Transport for ScriptedTransport {
    fn send(
        &self,
        _res: &RemoteResource,
        source: &mut dyn PackSource,
    ) -> Result<usize, TransferError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        let ok = self.script.get(attempt).copied().unwrap_or(true);
        if !ok {
            return Err(TransferError::Timeout);
        }

        use std::io::{Read, Seek, SeekFrom};
        source.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::new();
        source.read_to_end(&mut bytes)?;
        self.sent.lock().unwrap().push(bytes.clone());
        Ok(bytes.len())
    }
}

#[test]
fn retry_twice_then_succeed() {
    // Fail, fail, success — with retry_cnt = 2 the job completes.
    let transport = Arc::new(ScriptedTransport::new(&[false, false, true]));
    let worker = PublishWorker::spawn().unwrap();
    let publisher = Publisher::with_transport(
        &worker,
        RemoteResource::new("::1", 5683, "/data"),
        2,
        Arc::clone(&transport) as Arc<dyn Transport>,
    );

    let (tx, rx) = mpsc::channel();
    let fired = Arc::new(AtomicUsize::new(0));
    let fired2 = Arc::clone(&fired);

    let job = TransferJob::new(MemFile::with_data(b"pack".to_vec()))
        .with_callback(move |status| {
            fired2.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(status.is_ok());
        });
    publisher.try_send(job).unwrap();

    assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(fired.load(Ordering::SeqCst), 1, "callback fires exactly once");
    assert_eq!(transport.sent.lock().unwrap().len(), 1);
}

#[test]
fn retries_exhausted_reports_last_error() {
    let transport = Arc::new(ScriptedTransport::new(&[false, false, false, false]));
    let worker = PublishWorker::spawn().unwrap();
    let publisher = Publisher::with_transport(
        &worker,
        RemoteResource::new("::1", 5683, "/data"),
        2,
        Arc::clone(&transport) as Arc<dyn Transport>,
    );

    let (tx, rx) = mpsc::channel();
    let job = TransferJob::new(MemFile::with_data(b"pack".to_vec()))
        .with_callback(move |status| {
            let _ = tx.send(status.is_err());
        });
    publisher.try_send(job).unwrap();

    assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    // retry_cnt = 2 means three attempts in total, no more.
    assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
}

#[test]
fn delete_waits_for_drain_and_silences_callbacks() {
    let transport = Arc::new(ScriptedTransport::new(&[true, true]));
    let worker = PublishWorker::spawn().unwrap();
    let publisher = Publisher::with_transport(
        &worker,
        RemoteResource::new("::1", 5683, "/data"),
        0,
        Arc::clone(&transport) as Arc<dyn Transport>,
    );

    let fired = Arc::new(AtomicUsize::new(0));
    for _ in 0..2 {
        let fired2 = Arc::clone(&fired);
        let job = TransferJob::new(MemFile::with_data(b"pack".to_vec()))
            .with_callback(move |_| {
                fired2.fetch_add(1, Ordering::SeqCst);
            });
        publisher.try_send(job).unwrap();
    }

    drop(publisher);
    // After delete returns every submitted callback has already fired.
    assert_eq!(fired.load(Ordering::SeqCst), 2);
}
