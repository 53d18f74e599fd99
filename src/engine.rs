//! Engine facade: binds an execution backend, block type, and padding
//! mode to key material, and exposes the block, stream, and file APIs.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::block::{BlockGeometry, BlockType};
use crate::error::{MumError, Result};
use crate::keys::{self, KeyMaterial, MUM_KEY_SIZE};
use crate::renderer::{MumRenderer, ScalarRenderer, ThreadedRenderer};

/// Execution backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineType {
    /// Single-threaded scalar CPU.
    Cpu,
    /// Thread-pool CPU.
    CpuMt,
}

pub struct Engine {
    geometry: BlockGeometry,
    padding_on: bool,
    renderer: MumRenderer,
    key: Option<Arc<KeyMaterial>>,
}

impl Engine {
    /// Build an engine. `num_threads` only applies to [`EngineType::CpuMt`]
    /// (clamped to 16; zero leaves the pool empty and every operation
    /// fails with `MtRendererNoThreads`).
    pub fn new(
        engine_type: EngineType,
        block_type: BlockType,
        padding_on: bool,
        num_threads: usize,
    ) -> Self {
        let geometry = BlockGeometry::new(block_type);
        let renderer = match engine_type {
            EngineType::Cpu => MumRenderer::Scalar(ScalarRenderer::new(geometry, padding_on, 0)),
            EngineType::CpuMt => {
                MumRenderer::Threaded(ThreadedRenderer::new(geometry, padding_on, num_threads))
            }
        };
        Engine {
            geometry,
            padding_on,
            renderer,
            key: None,
        }
    }

    /// Derive subkeys and round tables from a 4096-byte user key.
    pub fn init_key(&mut self, key: &[u8; MUM_KEY_SIZE]) {
        let material = Arc::new(KeyMaterial::derive(key, self.geometry.num_rows));
        self.renderer.init_key(material.clone());
        self.key = Some(material);
    }

    /// Load a raw key file (first 4096 bytes) and initialize the key.
    pub fn load_key(&mut self, path: &Path) -> Result<()> {
        let key = keys::load_key(path)?;
        self.init_key(&key);
        Ok(())
    }

    /// The 4096-byte derived subkey at `index` (0..560).
    pub fn subkey(&self, index: usize) -> Result<&[u8]> {
        self.key
            .as_deref()
            .ok_or(MumError::KeyNotInitialized)?
            .subkey(index)
    }

    /// Plaintext bytes carried per encrypted block.
    pub fn plaintext_block_size(&self) -> usize {
        if self.padding_on {
            self.geometry.payload_size
        } else {
            self.geometry.encrypted_block_size
        }
    }

    /// Size of one encrypted block.
    pub fn encrypted_block_size(&self) -> usize {
        self.geometry.encrypted_block_size
    }

    /// Encrypted size of a plaintext of `plaintext_len` bytes.
    pub fn encrypted_size(&self, plaintext_len: usize) -> usize {
        plaintext_len.div_ceil(self.plaintext_block_size()) * self.encrypted_block_size()
    }

    fn require_key(&self) -> Result<()> {
        if self.key.is_none() {
            return Err(MumError::KeyNotInitialized);
        }
        Ok(())
    }

    /// Encrypt one block of plaintext (at most one block's payload).
    pub fn encrypt_block(&mut self, src: &[u8], seqnum: u16) -> Result<Vec<u8>> {
        self.require_key()?;
        let mut dst = vec![0u8; self.encrypted_block_size()];
        self.renderer.encrypt_block(src, &mut dst, seqnum)?;
        Ok(dst)
    }

    /// Decrypt one encrypted block; returns the recovered plaintext and
    /// its sequence number.
    pub fn decrypt_block(&mut self, src: &[u8]) -> Result<(Vec<u8>, u16)> {
        self.require_key()?;
        if src.len() != self.encrypted_block_size() {
            return Err(MumError::InvalidDecryptSize);
        }
        let mut payload = vec![0u8; self.plaintext_block_size()];
        let (length, seqnum) = self.renderer.decrypt_block(src, &mut payload)?;
        payload.truncate(length);
        Ok((payload, seqnum))
    }

    /// Encrypt a stream of arbitrary length, numbering blocks from
    /// `seq_start`.
    pub fn encrypt(&mut self, src: &[u8], seq_start: u16) -> Result<Vec<u8>> {
        self.require_key()?;
        let mut dst = vec![0u8; self.encrypted_size(src.len())];
        let written = self.renderer.encrypt(src, &mut dst, seq_start)?;
        dst.truncate(written);
        Ok(dst)
    }

    /// Decrypt a stream of whole encrypted blocks.
    pub fn decrypt(&mut self, src: &[u8]) -> Result<Vec<u8>> {
        self.require_key()?;
        let ebs = self.encrypted_block_size();
        if src.len() % ebs != 0 {
            return Err(MumError::InvalidDecryptSize);
        }
        let mut dst = vec![0u8; (src.len() / ebs) * self.plaintext_block_size()];
        let written = self.renderer.decrypt(src, &mut dst)?;
        dst.truncate(written);
        Ok(dst)
    }

    /// Encrypt a whole file.
    pub fn encrypt_file(&mut self, src: &Path, dst: &Path) -> Result<()> {
        self.require_key()?;
        let data = fs::read(src).map_err(|e| {
            tracing::warn!("cannot read {}: {}", src.display(), e);
            MumError::FileIoInput
        })?;
        let encrypted = self.encrypt(&data, 0)?;
        fs::write(dst, &encrypted).map_err(|e| {
            tracing::warn!("cannot write {}: {}", dst.display(), e);
            MumError::FileIoOutput
        })?;
        tracing::info!(
            "encrypted {} -> {} ({} -> {} bytes)",
            src.display(),
            dst.display(),
            data.len(),
            encrypted.len()
        );
        Ok(())
    }

    /// Decrypt a whole file.
    pub fn decrypt_file(&mut self, src: &Path, dst: &Path) -> Result<()> {
        self.require_key()?;
        let data = fs::read(src).map_err(|e| {
            tracing::warn!("cannot read {}: {}", src.display(), e);
            MumError::FileIoInput
        })?;
        let decrypted = self.decrypt(&data)?;
        fs::write(dst, &decrypted).map_err(|e| {
            tracing::warn!("cannot write {}: {}", dst.display(), e);
            MumError::FileIoOutput
        })?;
        tracing::info!(
            "decrypted {} -> {} ({} -> {} bytes)",
            src.display(),
            dst.display(),
            data.len(),
            decrypted.len()
        );
        Ok(())
    }
}

/// Append the block-type extension to a plaintext file name:
/// `notes.txt` -> `notes.txt.mu1`.
pub fn encrypted_file_name(block_type: BlockType, name: &str) -> String {
    format!("{}.mu{}", name, block_type.code())
}

/// Split an encrypted file name into its block type and original name.
pub fn parse_encrypted_file_name(name: &str) -> Result<(BlockType, String)> {
    match block_type_from_file_name(name) {
        Some(block_type) => Ok((block_type, name[..name.len() - 4].to_string())),
        None => Err(MumError::InvalidFileExtension),
    }
}

/// The block type named by a `.mu1`-`.mu6` file extension, if any.
pub fn block_type_from_file_name(name: &str) -> Option<BlockType> {
    let stem_len = name.len().checked_sub(4)?;
    if stem_len == 0 || !name.is_char_boundary(stem_len) {
        return None;
    }
    let code = name[stem_len..].strip_prefix(".mu")?;
    BlockType::from_code(code.parse::<u8>().ok()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::test_key;

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len)
            .map(|i| (i as u8).wrapping_mul(41).wrapping_add(seed))
            .collect()
    }

    fn engine(engine_type: EngineType, block_type: BlockType) -> Engine {
        let mut e = Engine::new(engine_type, block_type, true, 4);
        e.init_key(&test_key(50));
        e
    }

    #[test]
    fn one_byte_round_trip() {
        let mut e = engine(EngineType::Cpu, BlockType::B128);
        let encrypted = e.encrypt_block(&[0x5a], 0).unwrap();
        assert_eq!(encrypted.len(), 128);
        let (plaintext, seqnum) = e.decrypt_block(&encrypted).unwrap();
        assert_eq!(plaintext, vec![0x5a]);
        assert_eq!(seqnum, 0);
    }

    #[test]
    fn full_payload_round_trip() {
        let mut e = engine(EngineType::Cpu, BlockType::B128);
        let plaintext = pattern(e.plaintext_block_size(), 4);
        let encrypted = e.encrypt_block(&plaintext, 12).unwrap();
        let (decrypted, seqnum) = e.decrypt_block(&encrypted).unwrap();
        assert_eq!(decrypted, plaintext);
        assert_eq!(seqnum, 12);
    }

    #[test]
    fn key_not_initialized_is_reported() {
        let mut e = Engine::new(EngineType::Cpu, BlockType::B128, true, 0);
        assert_eq!(
            e.encrypt_block(&[1], 0).unwrap_err(),
            MumError::KeyNotInitialized
        );
        assert_eq!(e.encrypt(&[1], 0).unwrap_err(), MumError::KeyNotInitialized);
        assert_eq!(e.subkey(0).unwrap_err(), MumError::KeyNotInitialized);
    }

    #[test]
    fn stream_round_trip_every_block_type() {
        for block_type in BlockType::ALL {
            let mut e = engine(EngineType::Cpu, block_type);
            let plaintext = pattern(e.plaintext_block_size() * 2 + 11, 7);
            let encrypted = e.encrypt(&plaintext, 0).unwrap();
            assert_eq!(encrypted.len(), e.encrypted_size(plaintext.len()));
            let decrypted = e.decrypt(&encrypted).unwrap();
            assert_eq!(decrypted, plaintext, "{:?}", block_type);
        }
    }

    #[test]
    fn cross_engine_round_trip_28657() {
        // Two engines, same key and block type: either engine decrypts
        // either ciphertext back to the same 28657 bytes.
        let plaintext = pattern(28657, 9);
        let mut cpu = engine(EngineType::Cpu, BlockType::B1024);
        let mut mt = engine(EngineType::CpuMt, BlockType::B1024);

        let from_cpu = cpu.encrypt(&plaintext, 0).unwrap();
        let from_mt = mt.encrypt(&plaintext, 0).unwrap();
        assert_eq!(from_cpu.len(), from_mt.len());

        assert_eq!(cpu.decrypt(&from_mt).unwrap(), plaintext);
        assert_eq!(mt.decrypt(&from_cpu).unwrap(), plaintext);
        assert_eq!(cpu.decrypt(&from_cpu).unwrap(), plaintext);
        assert_eq!(mt.decrypt(&from_mt).unwrap(), plaintext);
    }

    #[test]
    fn tampered_block_is_rejected() {
        let mut e = engine(EngineType::Cpu, BlockType::B128);
        let plaintext = pattern(e.plaintext_block_size(), 6);
        let mut encrypted = e.encrypt_block(&plaintext, 0).unwrap();
        encrypted[77] ^= 0x04;
        assert!(e.decrypt_block(&encrypted).is_err());
    }

    #[test]
    fn foreign_block_size_is_rejected() {
        let mut small = engine(EngineType::Cpu, BlockType::B128);
        let mut large = engine(EngineType::Cpu, BlockType::B256);
        let block = small.encrypt_block(&[1, 2, 3], 0).unwrap();
        // Wrong size outright.
        assert_eq!(
            large.decrypt_block(&block).unwrap_err(),
            MumError::InvalidDecryptSize
        );
        // Two small blocks passed off as one large block still fail frame
        // validation.
        let pair: Vec<u8> = small
            .encrypt_block(&[4, 5, 6], 1)
            .unwrap()
            .into_iter()
            .chain(block)
            .collect();
        assert!(large.decrypt_block(&pair).is_err());
    }

    #[test]
    fn same_plaintext_encrypts_differently() {
        let mut e = engine(EngineType::Cpu, BlockType::B128);
        let plaintext = pattern(e.plaintext_block_size(), 1);
        let a = e.encrypt_block(&plaintext, 5).unwrap();
        let b = e.encrypt_block(&plaintext, 5).unwrap();
        assert_ne!(a, b);
        assert_eq!(e.decrypt_block(&a).unwrap(), (plaintext.clone(), 5));
        assert_eq!(e.decrypt_block(&b).unwrap(), (plaintext, 5));
    }

    #[test]
    fn ciphertext_bit_flip_rate_is_balanced() {
        // Re-encryptions of one plaintext should differ in about half
        // their bits, like independent random blocks.
        let mut e = engine(EngineType::Cpu, BlockType::B128);
        let plaintext = pattern(e.plaintext_block_size(), 77);
        let mut bits_changed = 0u64;
        let mut bits_total = 0u64;
        for _ in 0..1000 {
            let a = e.encrypt_block(&plaintext, 0).unwrap();
            let b = e.encrypt_block(&plaintext, 0).unwrap();
            for (x, y) in a.iter().zip(b.iter()) {
                bits_changed += (x ^ y).count_ones() as u64;
                bits_total += 8;
            }
        }
        let rate = bits_changed as f64 / bits_total as f64;
        assert!((0.47..=0.53).contains(&rate), "bit-flip rate {rate}");
    }

    #[test]
    fn sequence_numbers_count_up_from_start() {
        let mut e = engine(EngineType::Cpu, BlockType::B128);
        let ptbs = e.plaintext_block_size();
        let ebs = e.encrypted_block_size();
        let plaintext = pattern(ptbs * 3, 2);
        let encrypted = e.encrypt(&plaintext, 40).unwrap();
        for (i, block) in encrypted.chunks_exact(ebs).enumerate() {
            let (_, seqnum) = e.decrypt_block(block).unwrap();
            assert_eq!(seqnum, 40 + i as u16);
        }
    }

    #[test]
    fn file_round_trip() {
        let dir = std::env::temp_dir().join("mumblepad-engine-test");
        fs::create_dir_all(&dir).unwrap();
        let plain = dir.join("plain.bin");
        let data = pattern(10000, 3);
        fs::write(&plain, &data).unwrap();

        let encrypted_name = encrypted_file_name(BlockType::B512, "plain.bin");
        let encrypted_path = dir.join(&encrypted_name);
        let decrypted = dir.join("plain.out");

        let mut e = engine(EngineType::Cpu, BlockType::B512);
        e.encrypt_file(&plain, &encrypted_path).unwrap();
        e.decrypt_file(&encrypted_path, &decrypted).unwrap();
        assert_eq!(fs::read(&decrypted).unwrap(), data);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_input_file_maps_to_fileio_input() {
        let mut e = engine(EngineType::Cpu, BlockType::B128);
        let missing = Path::new("/nonexistent/mumblepad-in");
        let out = std::env::temp_dir().join("mumblepad-never-written");
        assert_eq!(
            e.encrypt_file(missing, &out).unwrap_err(),
            MumError::FileIoInput
        );
    }

    #[test]
    fn file_name_helpers() {
        assert_eq!(
            encrypted_file_name(BlockType::B2048, "notes.txt"),
            "notes.txt.mu5"
        );
        assert_eq!(
            parse_encrypted_file_name("notes.txt.mu5").unwrap(),
            (BlockType::B2048, "notes.txt".to_string())
        );
        assert_eq!(
            parse_encrypted_file_name("notes.txt").unwrap_err(),
            MumError::InvalidFileExtension
        );
        assert_eq!(
            parse_encrypted_file_name("notes.mu9").unwrap_err(),
            MumError::InvalidFileExtension
        );
        assert_eq!(block_type_from_file_name("a.mu1"), Some(BlockType::B128));
        assert_eq!(block_type_from_file_name("a.mu7"), None);
        assert_eq!(block_type_from_file_name(".mu1"), None);
        assert_eq!(block_type_from_file_name("mu1"), None);
    }
}
