//! Execution backends for the round engine.
//!
//! Two variants share one capability set: `Scalar` runs blocks inline on
//! the calling thread, `Threaded` fans a stream out over a worker pool.

mod scalar;
mod signal;
mod threaded;

use std::sync::Arc;

use crate::error::Result;
use crate::keys::KeyMaterial;

pub use scalar::ScalarRenderer;
pub use signal::Signal;
pub use threaded::{ThreadedRenderer, MUM_MAX_BYTES_PER_JOB, MUM_MAX_THREADS};

/// Tagged renderer variants.
pub enum MumRenderer {
    Scalar(ScalarRenderer),
    Threaded(ThreadedRenderer),
}

impl MumRenderer {
    pub fn init_key(&mut self, key: Arc<KeyMaterial>) {
        match self {
            MumRenderer::Scalar(r) => r.init_key(key),
            MumRenderer::Threaded(r) => r.init_key(key),
        }
    }

    pub fn encrypt_block(&mut self, src: &[u8], dst: &mut [u8], seqnum: u16) -> Result<()> {
        match self {
            MumRenderer::Scalar(r) => r.encrypt_block(src, dst, seqnum),
            MumRenderer::Threaded(r) => r.encrypt_block(src, dst, seqnum),
        }
    }

    pub fn decrypt_block(&mut self, src: &[u8], dst: &mut [u8]) -> Result<(usize, u16)> {
        match self {
            MumRenderer::Scalar(r) => r.decrypt_block(src, dst),
            MumRenderer::Threaded(r) => r.decrypt_block(src, dst),
        }
    }

    pub fn encrypt(&mut self, src: &[u8], dst: &mut [u8], seq_start: u16) -> Result<usize> {
        match self {
            MumRenderer::Scalar(r) => r.encrypt(src, dst, seq_start),
            MumRenderer::Threaded(r) => r.encrypt(src, dst, seq_start),
        }
    }

    pub fn decrypt(&mut self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        match self {
            MumRenderer::Scalar(r) => r.decrypt(src, dst),
            MumRenderer::Threaded(r) => r.decrypt(src, dst),
        }
    }
}
