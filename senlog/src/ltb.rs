//! Long-term buffering: file pools behind a serial dispatch queue.
//!
//! The LTB subsystem buffers encoded packs on a file system until a
//! publish condition is met, then drains them to an outbound transfer
//! driver. All mutable subsystem state — the instance list, the global
//! file counter, the publishing flag — is owned by one dispatch worker
//! thread; everything that touches it executes serially on that thread.
//! While seemingly roundabout, this removes every fine-grained lock and
//! also serializes the time-consuming file system work so it never blocks
//! producer threads. (The shape is borrowed from serial dispatch queues à
//! la Grand Central Dispatch.)
//!
//! An [`LtbInstance`] is a transfer driver over one pool directory:
//! `try_send` dispatches an ingest unit that copies the job's pack into a
//! hidden temp file, moves it into the pool under a monotone file-id and
//! bumps the counter. When the counter reaches the configured threshold
//! (ANDed with an optional external predicate), a *publish pass* starts:
//! it repeatedly takes the oldest file of the first instance that has a
//! sender, pushes it through the sender's blocking `send` and unlinks it,
//! re-dispatching itself between files so ingests can interleave. The
//! first failure ends the pass and leaves the pool intact for the next
//! one.

use std::fs;
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError as ChanTrySendError};

use crate::error::{Error, LtbError, PoolError};
use crate::pool;
use crate::transfer::{TransferDriver, TransferJob, TrySendError};

/// Capacity of the dispatch queue.
const DISPATCH_QUEUE_LEN: usize = 4;

/// Instance names are truncated to this many characters.
const INSTANCE_NAME_MAX: usize = 8;

/// Callback fired when a publish pass ends.
pub type PublishCallback = Box<dyn FnOnce(Result<(), Error>) + Send>;

/// External publish predicate, evaluated on the dispatch worker.
pub type ExtCondition = Box<dyn Fn() -> bool + Send>;

type Unit = Box<dyn FnOnce(&mut LtbState) + Send>;

enum DispatchMsg {
    /// Run an arbitrary unit against the subsystem state.
    Run(Unit),
    /// Ingest a job into the pool of instance `id`.
    Ingest { id: u64, job: TransferJob },
    /// Run (or continue) a publish pass unconditionally.
    Publish { cb: Option<PublishCallback> },
    /// Start a publish pass unless one is already active.
    ForcePublish { cb: Option<PublishCallback> },
    Shutdown,
}

/// Subsystem configuration.
pub struct LtbConfig {
    /// Publish once this many files sit in the pools.
    pub nb_files_lim: usize,
    /// Optional extra predicate ANDed with the file-count threshold.
    pub ext_cond: Option<ExtCondition>,
}

impl LtbConfig {
    /// Creates a config with the given file-count threshold.
    pub fn new(nb_files_lim: usize) -> Self {
        LtbConfig {
            nb_files_lim,
            ext_cond: None,
        }
    }

    /// Sets the external publish predicate.
    #[must_use]
    pub fn with_ext_cond(mut self, cond: impl Fn() -> bool + Send + 'static) -> Self {
        self.ext_cond = Some(Box::new(cond));
        self
    }
}

/// Configuration of one LTB instance.
pub struct InstanceConfig {
    /// Pool directory; must be unique per instance.
    pub pool_path: PathBuf,
    /// Instance name; truncated to eight characters. Also names the
    /// hidden ingest temp file (`.<name>`) inside the pool directory.
    pub name: String,
    /// Outbound driver used by publish passes. Instances without a
    /// sender only buffer.
    pub sender: Option<Arc<dyn TransferDriver>>,
}

impl InstanceConfig {
    /// Creates an instance config without a sender.
    pub fn new(pool_path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        InstanceConfig {
            pool_path: pool_path.into(),
            name: name.into(),
            sender: None,
        }
    }

    /// Attaches the outbound driver.
    #[must_use]
    pub fn with_sender(mut self, sender: Arc<dyn TransferDriver>) -> Self {
        self.sender = Some(sender);
        self
    }
}

/// A point-in-time snapshot of the subsystem counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LtbStats {
    /// Total pool files across all registered instances.
    pub files: u64,
    /// Whether a publish pass is active.
    pub publishing: bool,
    /// Number of registered instances.
    pub instances: usize,
}

struct InstanceEntry {
    id: u64,
    pooldir: PathBuf,
    name: String,
    sender: Option<Arc<dyn TransferDriver>>,
}

impl InstanceEntry {
    fn tmp_path(&self) -> PathBuf {
        self.pooldir.join(format!(".{}", self.name))
    }
}

/// State owned exclusively by the dispatch worker.
struct LtbState {
    tx: Sender<DispatchMsg>,
    instances: Vec<InstanceEntry>,
    nb_files_total: i64,
    nb_files_lim: usize,
    publishing: bool,
    ext_cond: Option<ExtCondition>,
}

/// The LTB subsystem handle.
///
/// Dropping it shuts the dispatch worker down after the queued units have
/// run. Instances outliving the subsystem fail their operations with
/// [`LtbError::Shutdown`].
pub struct Ltb {
    tx: Sender<DispatchMsg>,
    worker: Option<thread::JoinHandle<()>>,
    next_id: AtomicU64,
}

impl Ltb {
    /// Starts the subsystem and its dispatch worker.
    pub fn new(config: LtbConfig) -> Result<Self, LtbError> {
        let (tx, rx) = bounded(DISPATCH_QUEUE_LEN);

        let state = LtbState {
            tx: tx.clone(),
            instances: Vec::new(),
            nb_files_total: 0,
            nb_files_lim: config.nb_files_lim,
            publishing: false,
            ext_cond: config.ext_cond,
        };

        let worker = thread::Builder::new()
            .name("ltb-dispatcher".into())
            .spawn(move || dispatcher(state, rx))
            .map_err(LtbError::Spawn)?;

        Ok(Ltb {
            tx,
            worker: Some(worker),
            next_id: AtomicU64::new(1),
        })
    }

    /// Registers a new instance over `config.pool_path`.
    ///
    /// Blocks until the worker has linked the instance and folded its
    /// current pool size into the global counter.
    pub fn instance(&self, config: InstanceConfig) -> Result<LtbInstance, LtbError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut name = config.name;
        if name.len() > INSTANCE_NAME_MAX {
            let mut cut = INSTANCE_NAME_MAX;
            while !name.is_char_boundary(cut) {
                cut -= 1;
            }
            name.truncate(cut);
        }

        let entry = InstanceEntry {
            id,
            pooldir: config.pool_path.clone(),
            name: name.clone(),
            sender: config.sender,
        };

        dispatch_sync(&self.tx, move |state| register(state, entry))?;

        Ok(LtbInstance {
            id,
            tx: self.tx.clone(),
            pooldir: config.pool_path,
            name,
        })
    }

    /// Requests a publish pass regardless of the threshold.
    ///
    /// If a pass is already active the request is ignored and `cb` is
    /// dropped without being invoked. Otherwise `cb` fires exactly once
    /// when the pass ends — fully drained, or stopped by the first error.
    pub fn force_publish(
        &self,
        cb: impl FnOnce(Result<(), Error>) + Send + 'static,
    ) -> Result<(), LtbError> {
        self.dispatch(DispatchMsg::ForcePublish {
            cb: Some(Box::new(cb)),
        })
    }

    /// Snapshot of the subsystem counters, observed on the worker.
    pub fn stats(&self) -> Result<LtbStats, LtbError> {
        dispatch_sync(&self.tx, |state| LtbStats {
            files: state.nb_files_total.max(0) as u64,
            publishing: state.publishing,
            instances: state.instances.len(),
        })
    }

    fn dispatch(&self, msg: DispatchMsg) -> Result<(), LtbError> {
        match self.tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(ChanTrySendError::Full(_)) => Err(LtbError::WouldBlock),
            Err(ChanTrySendError::Disconnected(_)) => Err(LtbError::Shutdown),
        }
    }
}

impl Drop for Ltb {
    fn drop(&mut self) {
        let _ = self.tx.send(DispatchMsg::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Dispatches a unit and waits for the worker to run it.
fn dispatch_sync<R: Send + 'static>(
    tx: &Sender<DispatchMsg>,
    f: impl FnOnce(&mut LtbState) -> R + Send + 'static,
) -> Result<R, LtbError> {
    let (done_tx, done_rx) = bounded(1);

    let unit: Unit = Box::new(move |state| {
        let _ = done_tx.send(f(state));
    });

    tx.send(DispatchMsg::Run(unit))
        .map_err(|_| LtbError::Shutdown)?;
    done_rx.recv().map_err(|_| LtbError::Shutdown)
}

/// One LTB instance, usable as a transfer driver.
///
/// Dropping the instance blocks until the worker has unlinked it and
/// subtracted its pool size from the global counter.
pub struct LtbInstance {
    id: u64,
    tx: Sender<DispatchMsg>,
    pooldir: PathBuf,
    name: String,
}

impl LtbInstance {
    /// The (possibly truncated) instance name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The instance's pool directory.
    pub fn pool_path(&self) -> &Path {
        &self.pooldir
    }
}

impl TransferDriver for LtbInstance {
    fn try_send(&self, job: TransferJob) -> Result<(), TrySendError> {
        match self.tx.try_send(DispatchMsg::Ingest { id: self.id, job }) {
            Ok(()) => Ok(()),
            Err(ChanTrySendError::Full(msg)) => Err(TrySendError::WouldBlock(extract_job(msg))),
            Err(ChanTrySendError::Disconnected(msg)) => {
                Err(TrySendError::Shutdown(extract_job(msg)))
            }
        }
    }
}

fn extract_job(msg: DispatchMsg) -> TransferJob {
    match msg {
        DispatchMsg::Ingest { job, .. } => job,
        _ => unreachable!("only ingest messages carry a job back"),
    }
}

impl Drop for LtbInstance {
    fn drop(&mut self) {
        let id = self.id;
        let _ = dispatch_sync(&self.tx, move |state| remove(state, id));
    }
}

/// The dispatch worker loop. Sole owner of [`LtbState`].
fn dispatcher(mut state: LtbState, rx: Receiver<DispatchMsg>) {
    while let Ok(msg) = rx.recv() {
        match msg {
            DispatchMsg::Run(unit) => unit(&mut state),
            DispatchMsg::Ingest { id, job } => ingest(&mut state, id, job),
            DispatchMsg::Publish { cb } => publish(&mut state, cb),
            DispatchMsg::ForcePublish { cb } => {
                if state.publishing {
                    tracing::debug!("publish pass already active, request ignored");
                } else {
                    publish(&mut state, cb);
                }
            }
            DispatchMsg::Shutdown => break,
        }
    }
}

fn register(state: &mut LtbState, entry: InstanceEntry) {
    let size = pool::size(&entry.pooldir).unwrap_or_else(|e| {
        tracing::warn!(instance = %entry.name, error = %e, "cannot read pool size");
        0
    });

    state.nb_files_total += size as i64;
    tracing::info!(
        instance = %entry.name,
        pool = %entry.pooldir.display(),
        size,
        total = state.nb_files_total,
        "instance registered"
    );

    state.instances.push(entry);
}

fn remove(state: &mut LtbState, id: u64) {
    let Some(pos) = state.instances.iter().position(|e| e.id == id) else {
        return;
    };
    let entry = state.instances.remove(pos);

    let size = pool::size(&entry.pooldir).unwrap_or(0);
    state.nb_files_total -= size as i64;
    debug_assert!(state.nb_files_total >= 0);
}

/// Copies a job's pack into the instance's pool.
fn ingest(state: &mut LtbState, id: u64, mut job: TransferJob) {
    let Some(entry) = state.instances.iter().find(|e| e.id == id) else {
        job.complete(Err(Error::Ltb(LtbError::Shutdown)));
        return;
    };
    let pooldir = entry.pooldir.clone();
    let tmp = entry.tmp_path();

    let copied: io::Result<()> = (|| {
        let mut dst = fs::File::create(&tmp)?;
        job.source.seek(SeekFrom::Start(0))?;
        io::copy(&mut job.source, &mut dst)?;
        Ok(())
    })();

    let status = copied
        .map_err(|source| {
            Error::Pool(PoolError::Io {
                path: tmp.clone(),
                source,
            })
        })
        .and_then(|()| {
            let id = pool::move_into(&pooldir, &tmp).map_err(Error::Pool)?;
            state.nb_files_total += 1;
            tracing::debug!(pool = %pooldir.display(), id, "pack buffered");
            Ok(())
        });

    if let Err(e) = &status {
        tracing::warn!(pool = %pooldir.display(), error = %e, "ingest failed");
    }

    update_publish_condition(state);
    job.complete(status);
}

/// Starts a publish pass when the threshold and the external predicate
/// agree and no pass is active.
fn update_publish_condition(state: &mut LtbState) {
    if state.publishing {
        return;
    }

    let ext = state.ext_cond.as_ref().map_or(true, |cond| cond());
    if ext && state.nb_files_total >= state.nb_files_lim as i64 {
        tracing::info!(files = state.nb_files_total, "publish condition met");
        publish(state, None);
    } else {
        tracing::debug!(
            files = state.nb_files_total,
            limit = state.nb_files_lim,
            ext,
            "publish condition unmet"
        );
    }
}

/// Finds the oldest file of the first instance that has a sender.
///
/// Instances are walked newest-registered-first.
fn first_publishable(state: &LtbState) -> Option<(Arc<dyn TransferDriver>, PathBuf)> {
    for entry in state.instances.iter().rev() {
        let Some(sender) = &entry.sender else {
            tracing::debug!(instance = %entry.name, "skipped: no sender");
            continue;
        };

        match pool::oldest(&entry.pooldir) {
            Ok(path) => return Some((Arc::clone(sender), path)),
            Err(PoolError::NotFound(_)) => continue,
            Err(e) => {
                tracing::warn!(instance = %entry.name, error = %e, "pool scan failed");
                continue;
            }
        }
    }
    None
}

/// Ends a publish pass, reporting the outcome exactly once.
fn end_pass(state: &mut LtbState, cb: Option<PublishCallback>, res: Result<(), Error>) {
    match (cb, res) {
        (Some(cb), res) => cb(res),
        (None, Err(e)) => tracing::warn!(error = %e, "publish pass failed"),
        (None, Ok(())) => {}
    }
    state.publishing = false;
}

/// One step of a publish pass: send the oldest publishable file, then
/// tail-dispatch the continuation so other units can interleave between
/// files. The publishing flag stays set across the gap.
fn publish(state: &mut LtbState, cb: Option<PublishCallback>) {
    state.publishing = true;

    let Some((sender, path)) = first_publishable(state) else {
        tracing::debug!("nothing to publish");
        end_pass(state, cb, Ok(()));
        return;
    };

    tracing::info!(file = %path.display(), "publishing pool file");

    let file = match fs::File::open(&path) {
        Ok(f) => f,
        Err(source) => {
            end_pass(state, cb, Err(Error::Pool(PoolError::Io { path, source })));
            return;
        }
    };

    // Blocking send on the dispatch worker is intentional: it prevents
    // interleaving with pool mutations while the sender's own worker
    // still makes progress underneath.
    if let Err(e) = sender.send(TransferJob::new(file)) {
        end_pass(state, cb, Err(Error::Transfer(e)));
        return;
    }

    match fs::remove_file(&path) {
        Ok(()) => state.nb_files_total -= 1,
        Err(e) => {
            tracing::warn!(file = %path.display(), error = %e, "unlink after publish failed");
        }
    }

    match state.tx.try_send(DispatchMsg::Publish { cb }) {
        Ok(()) => {}
        Err(err) => {
            let (cb, reason) = match err {
                ChanTrySendError::Full(DispatchMsg::Publish { cb }) => (cb, LtbError::WouldBlock),
                ChanTrySendError::Disconnected(DispatchMsg::Publish { cb }) => {
                    (cb, LtbError::Shutdown)
                }
                _ => unreachable!("the refused message is the one we sent"),
            };
            end_pass(state, cb, Err(Error::Ltb(reason)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransferError;
    use crate::memfile::MemFile;
    use std::io::Read;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    /// Sender that records every payload it is asked to ship.
    #[derive(Default)]
    struct MockSender {
        sent: Mutex<Vec<Vec<u8>>>,
        fail: bool,
    }

    impl TransferDriver for MockSender {
        fn send(&self, mut job: TransferJob) -> Result<(), TransferError> {
            if self.fail {
                return Err(TransferError::Timeout);
            }
            let mut bytes = Vec::new();
            job.source.read_to_end(&mut bytes).unwrap();
            self.sent.lock().unwrap().push(bytes);
            Ok(())
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not met in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn ingest_pack(instance: &LtbInstance, bytes: &[u8]) {
        let (tx, rx) = bounded(1);
        let job = TransferJob::new(MemFile::with_data(bytes.to_vec()))
            .with_callback(move |status| {
                let _ = tx.send(status.is_ok());
            });
        instance.try_send(job).unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn test_register_counts_existing_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("00000001"), b"old").unwrap();
        std::fs::write(dir.path().join("00000007"), b"older").unwrap();
        std::fs::write(dir.path().join("junk"), b"ignored").unwrap();

        let ltb = Ltb::new(LtbConfig::new(100)).unwrap();
        let _inst = ltb
            .instance(InstanceConfig::new(dir.path(), "pool0"))
            .unwrap();

        let stats = ltb.stats().unwrap();
        assert_eq!(stats.files, 2);
        assert_eq!(stats.instances, 1);
        assert!(!stats.publishing);
    }

    #[test]
    fn test_ingest_assigns_pool_ids() {
        let dir = tempdir().unwrap();
        let ltb = Ltb::new(LtbConfig::new(100)).unwrap();
        let inst = ltb
            .instance(InstanceConfig::new(dir.path(), "pool0"))
            .unwrap();

        ingest_pack(&inst, b"pack-one");
        ingest_pack(&inst, b"pack-two");

        assert_eq!(pool::list(dir.path()).unwrap(), vec![1, 2]);
        assert_eq!(
            std::fs::read(dir.path().join("00000001")).unwrap(),
            b"pack-one"
        );
        assert_eq!(ltb.stats().unwrap().files, 2);
    }

    #[test]
    fn test_instance_name_truncated_for_tmp_file() {
        let dir = tempdir().unwrap();
        let ltb = Ltb::new(LtbConfig::new(100)).unwrap();
        let inst = ltb
            .instance(InstanceConfig::new(dir.path(), "much-too-long-name"))
            .unwrap();

        assert_eq!(inst.name(), "much-too");
        ingest_pack(&inst, b"x");
        // The temp file was consumed by the rename.
        assert!(!dir.path().join(".much-too").exists());
    }

    #[test]
    fn test_instance_name_truncation_respects_char_boundaries() {
        let dir = tempdir().unwrap();
        let ltb = Ltb::new(LtbConfig::new(100)).unwrap();

        // Byte offset 8 falls inside the fourth "é"; the cut backs up to
        // the previous boundary instead of panicking.
        let inst = ltb
            .instance(InstanceConfig::new(dir.path(), "aééééééé"))
            .unwrap();

        assert_eq!(inst.name(), "aééé");
        ingest_pack(&inst, b"x");
        assert_eq!(pool::size(dir.path()).unwrap(), 1);
    }

    #[test]
    fn test_publish_prefers_newest_registered_instance() {
        let dir_a = tempdir().unwrap();
        let dir_b = tempdir().unwrap();
        let sender = Arc::new(MockSender::default());
        let ltb = Ltb::new(LtbConfig::new(100)).unwrap();

        let a = ltb
            .instance(
                InstanceConfig::new(dir_a.path(), "a")
                    .with_sender(Arc::clone(&sender) as Arc<dyn TransferDriver>),
            )
            .unwrap();
        let b = ltb
            .instance(
                InstanceConfig::new(dir_b.path(), "b")
                    .with_sender(Arc::clone(&sender) as Arc<dyn TransferDriver>),
            )
            .unwrap();

        ingest_pack(&a, b"a1");
        ingest_pack(&a, b"a2");
        ingest_pack(&b, b"b1");

        let (tx, rx) = bounded(1);
        ltb.force_publish(move |res| {
            let _ = tx.send(res.is_ok());
        })
        .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());

        // The newest-registered instance drains first.
        let sent = sender.sent.lock().unwrap().clone();
        assert_eq!(
            sent,
            vec![b"b1".to_vec(), b"a1".to_vec(), b"a2".to_vec()]
        );
    }

    #[test]
    fn test_threshold_triggers_publish_in_id_order() {
        let dir = tempdir().unwrap();
        let sender = Arc::new(MockSender::default());
        let ltb = Ltb::new(LtbConfig::new(3)).unwrap();
        let inst = ltb
            .instance(
                InstanceConfig::new(dir.path(), "pool0")
                    .with_sender(Arc::clone(&sender) as Arc<dyn TransferDriver>),
            )
            .unwrap();

        ingest_pack(&inst, b"first");
        ingest_pack(&inst, b"second");
        assert!(sender.sent.lock().unwrap().is_empty());

        ingest_pack(&inst, b"third");

        wait_until(|| ltb.stats().unwrap().files == 0 && !ltb.stats().unwrap().publishing);
        let sent = sender.sent.lock().unwrap().clone();
        assert_eq!(sent, vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()]);
        assert_eq!(pool::size(dir.path()).unwrap(), 0);
    }

    #[test]
    fn test_ext_cond_gates_publishing() {
        let dir = tempdir().unwrap();
        let sender = Arc::new(MockSender::default());
        let ltb = Ltb::new(LtbConfig::new(1).with_ext_cond(|| false)).unwrap();
        let inst = ltb
            .instance(
                InstanceConfig::new(dir.path(), "pool0")
                    .with_sender(Arc::clone(&sender) as Arc<dyn TransferDriver>),
            )
            .unwrap();

        ingest_pack(&inst, b"held-back");
        assert_eq!(ltb.stats().unwrap().files, 1);
        assert!(sender.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_force_publish_drains_and_reports() {
        let dir = tempdir().unwrap();
        let sender = Arc::new(MockSender::default());
        let ltb = Ltb::new(LtbConfig::new(100)).unwrap();
        let inst = ltb
            .instance(
                InstanceConfig::new(dir.path(), "pool0")
                    .with_sender(Arc::clone(&sender) as Arc<dyn TransferDriver>),
            )
            .unwrap();

        ingest_pack(&inst, b"a");
        ingest_pack(&inst, b"b");

        let (tx, rx) = bounded(1);
        ltb.force_publish(move |res| {
            let _ = tx.send(res.is_ok());
        })
        .unwrap();

        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        assert_eq!(sender.sent.lock().unwrap().len(), 2);
        assert_eq!(ltb.stats().unwrap().files, 0);
    }

    #[test]
    fn test_failed_send_leaves_pool_intact() {
        let dir = tempdir().unwrap();
        let sender = Arc::new(MockSender {
            fail: true,
            ..MockSender::default()
        });
        let ltb = Ltb::new(LtbConfig::new(100)).unwrap();
        let inst = ltb
            .instance(
                InstanceConfig::new(dir.path(), "pool0")
                    .with_sender(Arc::clone(&sender) as Arc<dyn TransferDriver>),
            )
            .unwrap();

        ingest_pack(&inst, b"sticky");

        let (tx, rx) = bounded(1);
        ltb.force_publish(move |res| {
            let _ = tx.send(res.is_err());
        })
        .unwrap();

        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        // The file survived for the next pass, counter untouched.
        assert_eq!(ltb.stats().unwrap().files, 1);
        assert_eq!(pool::size(dir.path()).unwrap(), 1);
    }

    #[test]
    fn test_instance_drop_subtracts_pool_size() {
        let dir = tempdir().unwrap();
        let ltb = Ltb::new(LtbConfig::new(100)).unwrap();

        let inst = ltb
            .instance(InstanceConfig::new(dir.path(), "pool0"))
            .unwrap();
        ingest_pack(&inst, b"x");
        assert_eq!(ltb.stats().unwrap().files, 1);

        drop(inst);
        let stats = ltb.stats().unwrap();
        assert_eq!(stats.files, 0);
        assert_eq!(stats.instances, 0);
    }

    #[test]
    fn test_counter_matches_pool_sizes_across_instances() {
        let dir_a = tempdir().unwrap();
        let dir_b = tempdir().unwrap();
        let ltb = Ltb::new(LtbConfig::new(100)).unwrap();

        let a = ltb
            .instance(InstanceConfig::new(dir_a.path(), "a"))
            .unwrap();
        let b = ltb
            .instance(InstanceConfig::new(dir_b.path(), "b"))
            .unwrap();

        ingest_pack(&a, b"1");
        ingest_pack(&b, b"2");
        ingest_pack(&b, b"3");

        let on_disk = pool::size(dir_a.path()).unwrap() + pool::size(dir_b.path()).unwrap();
        assert_eq!(ltb.stats().unwrap().files as usize, on_disk);
        assert_eq!(on_disk, 3);
    }

    #[test]
    fn test_operations_after_shutdown_fail() {
        let dir = tempdir().unwrap();
        let ltb = Ltb::new(LtbConfig::new(100)).unwrap();
        let inst = ltb
            .instance(InstanceConfig::new(dir.path(), "pool0"))
            .unwrap();

        drop(ltb);

        let job = TransferJob::new(MemFile::with_data(vec![1]));
        assert!(matches!(
            inst.try_send(job),
            Err(TrySendError::Shutdown(_))
        ));
    }
}
