//! Multi-threaded stream dispatcher.
//!
//! Up to 16 worker threads, each owning a scalar renderer seeded from its
//! own PRNG window. The dispatcher slices a stream into bounded jobs and
//! hands each to the first worker whose job slot is free; workers post a
//! shared server signal when they finish. Destination offsets are fixed
//! at enqueue time, so output ordering never depends on completion order.
//!
//! Single-writer discipline on each slot: the dispatcher touches a slot
//! only in the Done state, the worker only in Assigned/Working; the slot
//! mutex provides the release/acquire edge between them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::block::BlockGeometry;
use crate::error::{MumError, Result};
use crate::keys::KeyMaterial;
use crate::renderer::scalar::ScalarRenderer;
use crate::renderer::signal::Signal;

/// Upper bound on worker threads (the subkey table holds 16 PRNG windows).
pub const MUM_MAX_THREADS: usize = 16;
/// Upper bound on the bytes handed to one worker per job.
pub const MUM_MAX_BYTES_PER_JOB: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Done,
    Assigned,
    Working,
}

#[derive(Debug, Clone, Copy)]
enum JobKind {
    Encrypt,
    Decrypt,
}

/// One unit of stream work. Owns its input; the worker produces an owned
/// output which the dispatcher copies to the job's destination offset.
struct Job {
    kind: JobKind,
    key: Arc<KeyMaterial>,
    src: Vec<u8>,
    dst_offset: usize,
    seq_num: u16,
}

/// A finished job waiting to be harvested by the dispatcher.
struct JobDone {
    dst_offset: usize,
    out: Vec<u8>,
    result: Result<()>,
}

struct JobSlot {
    state: JobState,
    job: Option<Job>,
    done: Option<JobDone>,
}

struct WorkerShared {
    slot: Mutex<JobSlot>,
    signal: Signal,
    running: AtomicBool,
}

struct Worker {
    shared: Arc<WorkerShared>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.signal.post();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub struct ThreadedRenderer {
    geometry: BlockGeometry,
    key: Option<Arc<KeyMaterial>>,
    /// Serves single-block calls on the dispatcher thread.
    local: ScalarRenderer,
    workers: Vec<Worker>,
    server_signal: Arc<Signal>,
}

impl ThreadedRenderer {
    pub fn new(geometry: BlockGeometry, padding_on: bool, num_threads: usize) -> Self {
        let num_threads = num_threads.min(MUM_MAX_THREADS);
        let server_signal = Arc::new(Signal::new());
        let workers = (1..=num_threads)
            .map(|id| {
                let shared = Arc::new(WorkerShared {
                    slot: Mutex::new(JobSlot {
                        state: JobState::Done,
                        job: None,
                        done: None,
                    }),
                    signal: Signal::new(),
                    running: AtomicBool::new(true),
                });
                let handle = {
                    let shared = shared.clone();
                    let server = server_signal.clone();
                    thread::spawn(move || worker_loop(id, geometry, padding_on, shared, server))
                };
                Worker {
                    shared,
                    handle: Some(handle),
                }
            })
            .collect();
        tracing::debug!("threaded renderer started {} workers", num_threads);
        ThreadedRenderer {
            geometry,
            key: None,
            local: ScalarRenderer::new(geometry, padding_on, 0),
            workers,
            server_signal,
        }
    }

    pub fn init_key(&mut self, key: Arc<KeyMaterial>) {
        self.local.init_key(key.clone());
        // Workers pick the new key up from the next job they receive.
        self.key = Some(key);
    }

    pub fn plaintext_block_size(&self) -> usize {
        self.local.plaintext_block_size()
    }

    pub fn encrypt_block(&mut self, src: &[u8], dst: &mut [u8], seqnum: u16) -> Result<()> {
        if self.workers.is_empty() {
            return Err(MumError::MtRendererNoThreads);
        }
        self.local.encrypt_block(src, dst, seqnum)
    }

    pub fn decrypt_block(&mut self, src: &[u8], dst: &mut [u8]) -> Result<(usize, u16)> {
        if self.workers.is_empty() {
            return Err(MumError::MtRendererNoThreads);
        }
        self.local.decrypt_block(src, dst)
    }

    /// Encrypt a stream across the worker pool. Returns bytes written.
    pub fn encrypt(&mut self, src: &[u8], dst: &mut [u8], seq_start: u16) -> Result<usize> {
        let key = self.key.clone().ok_or(MumError::KeyNotInitialized)?;
        if self.workers.is_empty() {
            return Err(MumError::MtRendererNoThreads);
        }
        let ptbs = self.plaintext_block_size();
        let ebs = self.geometry.encrypted_block_size;
        let job_bytes = (MUM_MAX_BYTES_PER_JOB / ptbs) * ptbs;

        let mut written = 0usize;
        let mut first_error: Option<(usize, MumError)> = None;
        let mut src_off = 0usize;
        let mut dst_off = 0usize;
        let mut seq = seq_start;
        while src_off < src.len() {
            let take = (src.len() - src_off).min(job_bytes);
            let num_blocks = take.div_ceil(ptbs);
            let job = Job {
                kind: JobKind::Encrypt,
                key: key.clone(),
                src: src[src_off..src_off + take].to_vec(),
                dst_offset: dst_off,
                seq_num: seq,
            };
            self.assign(job, dst, &mut written, &mut first_error);
            src_off += take;
            dst_off += num_blocks * ebs;
            seq = seq.wrapping_add(num_blocks as u16);
        }
        self.drain(dst, &mut written, &mut first_error);

        match first_error {
            Some((_, error)) => Err(error),
            None => Ok(written),
        }
    }

    /// Decrypt a stream across the worker pool. Returns bytes written; a
    /// frame failure in any job surfaces after the whole pass completes.
    pub fn decrypt(&mut self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        let key = self.key.clone().ok_or(MumError::KeyNotInitialized)?;
        if self.workers.is_empty() {
            return Err(MumError::MtRendererNoThreads);
        }
        let ptbs = self.plaintext_block_size();
        let ebs = self.geometry.encrypted_block_size;
        if src.len() % ebs != 0 {
            return Err(MumError::InvalidDecryptSize);
        }
        let job_bytes = (MUM_MAX_BYTES_PER_JOB / ebs) * ebs;

        let mut written = 0usize;
        let mut first_error: Option<(usize, MumError)> = None;
        let mut src_off = 0usize;
        let mut dst_off = 0usize;
        while src_off < src.len() {
            let take = (src.len() - src_off).min(job_bytes);
            let num_blocks = take / ebs;
            let job = Job {
                kind: JobKind::Decrypt,
                key: key.clone(),
                src: src[src_off..src_off + take].to_vec(),
                dst_offset: dst_off,
                seq_num: 0,
            };
            self.assign(job, dst, &mut written, &mut first_error);
            src_off += take;
            dst_off += num_blocks * ptbs;
        }
        self.drain(dst, &mut written, &mut first_error);

        match first_error {
            Some((_, error)) => Err(error),
            None => Ok(written),
        }
    }

    /// Hand `job` to the first worker whose slot is free, harvesting any
    /// finished output found along the way; block on the server signal
    /// while every slot is busy.
    fn assign(
        &self,
        job: Job,
        dst: &mut [u8],
        written: &mut usize,
        first_error: &mut Option<(usize, MumError)>,
    ) {
        let mut job = Some(job);
        loop {
            for worker in &self.workers {
                let mut slot = worker.shared.slot.lock().unwrap();
                if slot.state == JobState::Done {
                    harvest(&mut slot, dst, written, first_error);
                    slot.job = job.take();
                    slot.state = JobState::Assigned;
                    drop(slot);
                    worker.shared.signal.post();
                    return;
                }
            }
            self.server_signal.wait();
        }
    }

    /// Wait for every slot to finish and harvest all remaining output.
    fn drain(
        &self,
        dst: &mut [u8],
        written: &mut usize,
        first_error: &mut Option<(usize, MumError)>,
    ) {
        loop {
            let mut pending = false;
            for worker in &self.workers {
                let mut slot = worker.shared.slot.lock().unwrap();
                if slot.state == JobState::Done {
                    harvest(&mut slot, dst, written, first_error);
                } else {
                    pending = true;
                }
            }
            if !pending {
                return;
            }
            self.server_signal.wait();
        }
    }
}

/// Copy a finished job's output to its destination offset and record the
/// earliest-offset failure.
fn harvest(
    slot: &mut JobSlot,
    dst: &mut [u8],
    written: &mut usize,
    first_error: &mut Option<(usize, MumError)>,
) {
    if let Some(done) = slot.done.take() {
        dst[done.dst_offset..done.dst_offset + done.out.len()].copy_from_slice(&done.out);
        *written += done.out.len();
        if let Err(error) = done.result {
            if first_error.map_or(true, |(off, _)| done.dst_offset < off) {
                *first_error = Some((done.dst_offset, error));
            }
        }
    }
}

fn worker_loop(
    id: usize,
    geometry: BlockGeometry,
    padding_on: bool,
    shared: Arc<WorkerShared>,
    server: Arc<Signal>,
) {
    let mut renderer = ScalarRenderer::new(geometry, padding_on, id);
    let mut current_key: Option<Arc<KeyMaterial>> = None;
    loop {
        let job = {
            let mut slot = shared.slot.lock().unwrap();
            if !shared.running.load(Ordering::SeqCst) {
                break;
            }
            if slot.state != JobState::Assigned {
                drop(slot);
                shared.signal.wait();
                continue;
            }
            slot.state = JobState::Working;
            let Some(job) = slot.job.take() else {
                slot.state = JobState::Done;
                continue;
            };
            job
        };

        if current_key
            .as_ref()
            .map_or(true, |k| !Arc::ptr_eq(k, &job.key))
        {
            renderer.init_key(job.key.clone());
            current_key = Some(job.key.clone());
        }

        let ptbs = renderer.plaintext_block_size();
        let ebs = geometry.encrypted_block_size;
        let (mut out, result) = match job.kind {
            JobKind::Encrypt => {
                let mut out = vec![0u8; job.src.len().div_ceil(ptbs) * ebs];
                let result = renderer.encrypt(&job.src, &mut out, job.seq_num);
                finish(out, result)
            }
            JobKind::Decrypt => {
                let mut out = vec![0u8; (job.src.len() / ebs) * ptbs];
                let result = renderer.decrypt(&job.src, &mut out);
                finish(out, result)
            }
        };
        out.shrink_to_fit();

        {
            let mut slot = shared.slot.lock().unwrap();
            slot.done = Some(JobDone {
                dst_offset: job.dst_offset,
                out,
                result,
            });
            slot.state = JobState::Done;
        }
        server.post();
    }
    tracing::trace!("worker {} stopped", id);
}

/// Trim a job buffer to the bytes actually produced; failed jobs emit
/// nothing.
fn finish(mut out: Vec<u8>, result: Result<usize>) -> (Vec<u8>, Result<()>) {
    match result {
        Ok(n) => {
            out.truncate(n);
            (out, Ok(()))
        }
        Err(error) => {
            out.clear();
            (out, Err(error))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockType;
    use crate::keys::{test_key, MUM_KEY_SIZE};

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len)
            .map(|i| (i as u8).wrapping_mul(29).wrapping_add(seed))
            .collect()
    }

    fn threaded(block_type: BlockType, num_threads: usize) -> ThreadedRenderer {
        let geometry = BlockGeometry::new(block_type);
        let mut r = ThreadedRenderer::new(geometry, true, num_threads);
        r.init_key(Arc::new(KeyMaterial::derive(&test_key(30), geometry.num_rows)));
        r
    }

    #[test]
    fn stream_round_trip_across_workers() {
        let mut r = threaded(BlockType::B128, 4);
        let plaintext = pattern(28657, 1);
        let ptbs = r.plaintext_block_size();
        let ebs = r.geometry.encrypted_block_size;
        let num_blocks = plaintext.len().div_ceil(ptbs);

        let mut encrypted = vec![0u8; num_blocks * ebs];
        let n = r.encrypt(&plaintext, &mut encrypted, 0).unwrap();
        assert_eq!(n, num_blocks * ebs);

        let mut decrypted = vec![0u8; num_blocks * ptbs];
        let n = r.decrypt(&encrypted, &mut decrypted).unwrap();
        assert_eq!(n, plaintext.len());
        assert_eq!(&decrypted[..n], &plaintext[..]);
    }

    #[test]
    fn single_worker_round_trips() {
        let mut r = threaded(BlockType::B256, 1);
        let plaintext = pattern(5000, 2);
        let ptbs = r.plaintext_block_size();
        let ebs = r.geometry.encrypted_block_size;
        let num_blocks = plaintext.len().div_ceil(ptbs);

        let mut encrypted = vec![0u8; num_blocks * ebs];
        let n = r.encrypt(&plaintext, &mut encrypted, 9).unwrap();
        let mut decrypted = vec![0u8; num_blocks * ptbs];
        let m = r.decrypt(&encrypted[..n], &mut decrypted).unwrap();
        assert_eq!(&decrypted[..m], &plaintext[..]);
    }

    #[test]
    fn zero_workers_refuse_operations() {
        let geometry = BlockGeometry::new(BlockType::B128);
        let mut r = ThreadedRenderer::new(geometry, true, 0);
        r.init_key(Arc::new(KeyMaterial::derive(&test_key(31), geometry.num_rows)));
        let mut out = vec![0u8; 128];
        assert_eq!(
            r.encrypt(&[1, 2, 3], &mut out, 0).unwrap_err(),
            MumError::MtRendererNoThreads
        );
        assert_eq!(
            r.encrypt_block(&[1, 2, 3], &mut out, 0).unwrap_err(),
            MumError::MtRendererNoThreads
        );
    }

    #[test]
    fn corrupted_stream_reports_an_error() {
        let mut r = threaded(BlockType::B128, 2);
        let plaintext = pattern(1000, 3);
        let ptbs = r.plaintext_block_size();
        let ebs = r.geometry.encrypted_block_size;
        let num_blocks = plaintext.len().div_ceil(ptbs);
        let mut encrypted = vec![0u8; num_blocks * ebs];
        r.encrypt(&plaintext, &mut encrypted, 0).unwrap();

        encrypted[200] ^= 0x80;
        let mut decrypted = vec![0u8; num_blocks * ptbs];
        assert!(r.decrypt(&encrypted, &mut decrypted).is_err());
    }

    #[test]
    fn mismatched_stream_length_is_rejected() {
        let mut r = threaded(BlockType::B128, 2);
        let mut out = vec![0u8; 1024];
        assert_eq!(
            r.decrypt(&vec![0u8; 130], &mut out).unwrap_err(),
            MumError::InvalidDecryptSize
        );
    }

    #[test]
    fn thread_count_is_capped() {
        let geometry = BlockGeometry::new(BlockType::B128);
        let r = ThreadedRenderer::new(geometry, true, 64);
        assert_eq!(r.workers.len(), MUM_MAX_THREADS);
    }

    #[test]
    fn key_size_matches_prng_window_stride() {
        // 16 windows of 16 subkeys must fit the subkey table tail.
        assert_eq!(crate::keys::MUM_PRNG_SUBKEY_INDEX + 16 * 16, crate::keys::MUM_NUM_SUBKEYS);
        assert_eq!(MUM_KEY_SIZE * 16, crate::prng::MUM_PRNG_SUBKEY_SIZE);
    }
}
