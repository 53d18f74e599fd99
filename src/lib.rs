//! Mumblepad block cipher.
//!
//! A symmetric block cipher that treats each fixed-size block as a grid
//! of 4-byte cells (32 cells per row, 1-32 rows) and runs it through
//! eight rounds, each pairing a spatial diffusion pass (masked mixing of
//! cells drawn from across the block) with a confusion pass (keyed XOR
//! plus a per-row byte substitution). Six block sizes from 128 to 4096
//! bytes are supported. With padding on, every encrypted block carries a
//! frame - random padding, a checksum, the payload length, and a 16-bit
//! sequence number - so arbitrary-length streams round-trip exactly and
//! identical plaintexts encrypt to different ciphertexts.
//!
//! Encryption runs on a scalar CPU engine or a thread-pool engine; both
//! produce interchangeable ciphertexts for the same key and block type.
//!
//! ```no_run
//! use mumblepad::{BlockType, Engine, EngineType};
//!
//! let mut engine = Engine::new(EngineType::Cpu, BlockType::B1024, true, 1);
//! engine.init_key(&[0u8; 4096]);
//! let encrypted = engine.encrypt(b"attack at dawn", 0).unwrap();
//! let decrypted = engine.decrypt(&encrypted).unwrap();
//! assert_eq!(decrypted, b"attack at dawn");
//! ```

pub mod block;
pub mod engine;
pub mod error;
pub mod keys;
pub mod prng;
pub mod renderer;

pub use block::BlockType;
pub use engine::{Engine, EngineType};
pub use error::{MumError, Result};
