//! Scalar CPU round engine.
//!
//! One block at a time: the block is loaded into ping-pong buffer 0 and
//! run through eight rounds, each a diffusion pass (buffer 0 -> 1) and a
//! confusion pass (buffer 1 -> 0). Decryption applies the inverse passes
//! in reverse round order, confusion first. With padding on, plaintext is
//! framed (random padding, checksum, length, seqnum) before the rounds
//! and the frame is validated after the inverse rounds.

use std::sync::Arc;

use crate::block::{
    BlockGeometry, MUM_CELLS_X, MUM_CELL_SIZE, MUM_MAX_BLOCK_SIZE, MUM_MAX_PADDING_SIZE,
};
use crate::error::{MumError, Result};
use crate::keys::{KeyMaterial, MUM_NUM_ROUNDS};
use crate::prng::Prng;

pub struct ScalarRenderer {
    geometry: BlockGeometry,
    padding_on: bool,
    /// Selects the PRNG seed window inside the subkey table.
    worker_id: usize,
    key: Option<Arc<KeyMaterial>>,
    prng: Option<Prng>,
    ping_pong: [[u8; MUM_MAX_BLOCK_SIZE]; 2],
    payload: [u8; MUM_MAX_BLOCK_SIZE],
    padding: [u8; MUM_MAX_PADDING_SIZE],
    num_encrypted: u64,
    num_decrypted: u64,
}

impl ScalarRenderer {
    pub fn new(geometry: BlockGeometry, padding_on: bool, worker_id: usize) -> Self {
        ScalarRenderer {
            geometry,
            padding_on,
            worker_id,
            key: None,
            prng: None,
            ping_pong: [[0u8; MUM_MAX_BLOCK_SIZE]; 2],
            payload: [0u8; MUM_MAX_BLOCK_SIZE],
            padding: [0u8; MUM_MAX_PADDING_SIZE],
            num_encrypted: 0,
            num_decrypted: 0,
        }
    }

    /// Install derived key material and reseed the padding PRNG from this
    /// renderer's seed window.
    pub fn init_key(&mut self, key: Arc<KeyMaterial>) {
        self.prng = Some(Prng::new(key.prng_window(self.worker_id)));
        self.key = Some(key);
    }

    /// Plaintext bytes carried per encrypted block.
    pub fn plaintext_block_size(&self) -> usize {
        if self.padding_on {
            self.geometry.payload_size
        } else {
            self.geometry.encrypted_block_size
        }
    }

    /// Blocks encrypted since construction.
    pub fn blocks_encrypted(&self) -> u64 {
        self.num_encrypted
    }

    /// Blocks decrypted since construction.
    pub fn blocks_decrypted(&self) -> u64 {
        self.num_decrypted
    }

    /// Encrypt one block. `src` holds the plaintext (at most one block's
    /// payload with padding on, exactly one block without); the encrypted
    /// block is written to `dst`.
    pub fn encrypt_block(&mut self, src: &[u8], dst: &mut [u8], seqnum: u16) -> Result<()> {
        let key = self.key.clone().ok_or(MumError::KeyNotInitialized)?;
        let ebs = self.geometry.encrypted_block_size;

        if self.padding_on {
            if src.len() > self.geometry.payload_size {
                return Err(MumError::InvalidEncryptSize);
            }
            let payload_size = self.geometry.payload_size;
            let padding_size = self.geometry.padding_size;
            self.payload[..src.len()].copy_from_slice(src);
            // Padding first, then the payload tail, so the checksum covers
            // a fully defined payload.
            let prng = self.prng.as_mut().ok_or(MumError::KeyNotInitialized)?;
            prng.fetch(&mut self.padding[..padding_size]);
            if src.len() < payload_size {
                prng.fetch(&mut self.payload[src.len()..payload_size]);
            }
            self.geometry.pack(
                &self.payload[..payload_size],
                src.len(),
                seqnum,
                &self.padding[..padding_size],
                &mut self.ping_pong[0][..ebs],
            )?;
        } else {
            if src.len() != ebs {
                return Err(MumError::InvalidEncryptSize);
            }
            self.ping_pong[0][..ebs].copy_from_slice(src);
        }

        for round in 0..MUM_NUM_ROUNDS {
            self.diffuse(&key, round);
            self.confuse(&key, round);
        }

        dst[..ebs].copy_from_slice(&self.ping_pong[0][..ebs]);
        self.num_encrypted += 1;
        Ok(())
    }

    /// Decrypt one block into `dst` (which must hold one plaintext
    /// block). Returns the recorded payload length and sequence number;
    /// without padding the length is the full block and the sequence
    /// number is 0.
    pub fn decrypt_block(&mut self, src: &[u8], dst: &mut [u8]) -> Result<(usize, u16)> {
        let key = self.key.clone().ok_or(MumError::KeyNotInitialized)?;
        let ebs = self.geometry.encrypted_block_size;
        if src.len() != ebs {
            return Err(MumError::InvalidDecryptSize);
        }
        self.ping_pong[0][..ebs].copy_from_slice(src);

        for round in (0..MUM_NUM_ROUNDS).rev() {
            self.confuse_inv(&key, round);
            self.diffuse_inv(&key, round);
        }
        self.num_decrypted += 1;

        if self.padding_on {
            self.geometry.unpack(&self.ping_pong[0][..ebs], dst)
        } else {
            dst[..ebs].copy_from_slice(&self.ping_pong[0][..ebs]);
            Ok((ebs, 0))
        }
    }

    /// Encrypt a stream of arbitrary length into `dst`, one block per
    /// plaintext-block-size slice; the short final slice keeps its actual
    /// length in the frame. Returns the number of bytes written.
    pub fn encrypt(&mut self, src: &[u8], dst: &mut [u8], mut seqnum: u16) -> Result<usize> {
        let ptbs = self.plaintext_block_size();
        let ebs = self.geometry.encrypted_block_size;
        let mut scratch = [0u8; MUM_MAX_BLOCK_SIZE];
        let mut written = 0;
        let mut offset = 0;
        while offset < src.len() {
            let take = (src.len() - offset).min(ptbs);
            let slice = &src[offset..offset + take];
            if take == ptbs || self.padding_on {
                self.encrypt_block(slice, &mut dst[written..written + ebs], seqnum)?;
            } else {
                // No frame records the length, so zero-extend the tail to
                // a whole block.
                scratch[..take].copy_from_slice(slice);
                scratch[take..ptbs].fill(0);
                self.encrypt_block(&scratch[..ptbs], &mut dst[written..written + ebs], seqnum)?;
            }
            offset += take;
            written += ebs;
            seqnum = seqnum.wrapping_add(1);
        }
        Ok(written)
    }

    /// Decrypt a stream of whole encrypted blocks into `dst`, appending
    /// each block's recorded payload. Returns the number of bytes written.
    pub fn decrypt(&mut self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        let ebs = self.geometry.encrypted_block_size;
        if src.len() % ebs != 0 {
            return Err(MumError::InvalidDecryptSize);
        }
        let mut written = 0;
        for block in src.chunks_exact(ebs) {
            let (length, _seqnum) = self.decrypt_block(block, &mut dst[written..])?;
            written += length;
        }
        Ok(written)
    }

    /// Diffusion pass: ping-pong 0 -> 1. Every destination cell mixes one
    /// masked byte channel from each of four source cells; the masks are
    /// bit-disjoint, so the wrapping adds cannot carry.
    fn diffuse(&mut self, key: &KeyMaterial, round: usize) {
        let [src, dst] = &mut self.ping_pong;
        let src = &src[..];
        let [ma, mb, mc, md] = key.bitmasks[round];
        let pos_x = &key.pos_x[round];
        let pos_y = &key.pos_y[round];
        for y in 0..self.geometry.num_rows {
            for x in 0..MUM_CELLS_X {
                let px = &pos_x[y][x];
                let py = &pos_y[y][x];
                let s1 = cell(src, px[0], py[0]);
                let s2 = cell(src, px[1], py[1]);
                let s3 = cell(src, px[2], py[2]);
                let s4 = cell(src, px[3], py[3]);
                let d = (y * MUM_CELLS_X + x) * MUM_CELL_SIZE;
                dst[d] = (s1[0] & ma)
                    .wrapping_add(s2[2] & mb)
                    .wrapping_add(s3[3] & mc)
                    .wrapping_add(s4[1] & md);
                dst[d + 1] = (s1[2] & ma)
                    .wrapping_add(s2[3] & mb)
                    .wrapping_add(s3[1] & mc)
                    .wrapping_add(s4[0] & md);
                dst[d + 2] = (s1[3] & ma)
                    .wrapping_add(s2[1] & mb)
                    .wrapping_add(s3[0] & mc)
                    .wrapping_add(s4[2] & md);
                dst[d + 3] = (s1[1] & ma)
                    .wrapping_add(s2[0] & mb)
                    .wrapping_add(s3[2] & mc)
                    .wrapping_add(s4[3] & md);
            }
        }
    }

    /// Confusion pass: ping-pong 1 -> 0. Keyed XOR, then the row's byte
    /// substitution; the XOR subkey advances byte-by-byte over the block.
    fn confuse(&mut self, key: &KeyMaterial, round: usize) {
        let [dst, src] = &mut self.ping_pong;
        let clav = key.round_subkey(round);
        let mut i = 0;
        for y in 0..self.geometry.num_rows {
            let prm = &key.permute8[round][y];
            for _ in 0..MUM_CELLS_X * MUM_CELL_SIZE {
                dst[i] = prm[(src[i] ^ clav[i]) as usize];
                i += 1;
            }
        }
    }

    /// Inverse confusion: ping-pong 0 -> 1. Inverse substitution, then XOR.
    fn confuse_inv(&mut self, key: &KeyMaterial, round: usize) {
        let [src, dst] = &mut self.ping_pong;
        let clav = key.round_subkey(round);
        let mut i = 0;
        for y in 0..self.geometry.num_rows {
            let prm = &key.permute8_inv[round][y];
            for _ in 0..MUM_CELLS_X * MUM_CELL_SIZE {
                dst[i] = prm[src[i] as usize] ^ clav[i];
                i += 1;
            }
        }
    }

    /// Inverse diffusion: ping-pong 1 -> 0. For each source cell, collect
    /// the masked channels the forward pass scattered into the four
    /// destination cells named by the inverse position tables.
    fn diffuse_inv(&mut self, key: &KeyMaterial, round: usize) {
        let [dst, src] = &mut self.ping_pong;
        let src = &src[..];
        let [ma, mb, mc, md] = key.bitmasks[round];
        let pos_x_inv = &key.pos_x_inv[round];
        let pos_y_inv = &key.pos_y_inv[round];
        for y in 0..self.geometry.num_rows {
            for x in 0..MUM_CELLS_X {
                let px = &pos_x_inv[y][x];
                let py = &pos_y_inv[y][x];
                let m1 = cell(src, px[0], py[0]);
                let m2 = cell(src, px[1], py[1]);
                let m3 = cell(src, px[2], py[2]);
                let m4 = cell(src, px[3], py[3]);
                let d = (y * MUM_CELLS_X + x) * MUM_CELL_SIZE;
                dst[d] = (m1[0] & ma)
                    .wrapping_add(m2[3] & mb)
                    .wrapping_add(m3[2] & mc)
                    .wrapping_add(m4[1] & md);
                dst[d + 1] = (m1[3] & ma)
                    .wrapping_add(m2[2] & mb)
                    .wrapping_add(m3[1] & mc)
                    .wrapping_add(m4[0] & md);
                dst[d + 2] = (m1[1] & ma)
                    .wrapping_add(m2[0] & mb)
                    .wrapping_add(m3[3] & mc)
                    .wrapping_add(m4[2] & md);
                dst[d + 3] = (m1[2] & ma)
                    .wrapping_add(m2[1] & mb)
                    .wrapping_add(m3[0] & mc)
                    .wrapping_add(m4[3] & md);
            }
        }
    }
}

/// The 4-byte cell at grid coordinate (x, y).
#[inline]
fn cell(block: &[u8], x: u8, y: u8) -> &[u8] {
    let start = (y as usize * MUM_CELLS_X + x as usize) * MUM_CELL_SIZE;
    &block[start..start + MUM_CELL_SIZE]
}
