//! Block geometry and the padded frame codec.
//!
//! A block is viewed as a grid of 4-byte cells, 32 cells per row, 1-32
//! rows depending on the block type. With padding on, each encrypted
//! block carries a frame laid out as
//!
//! ```text
//! padA | dataA | padB | checksum[4] | length[2] | seqnum[2] | padC | dataB | padD
//! ```
//!
//! where the pad regions hold random bytes, the payload is split across
//! dataA/dataB, and the 16-bit length field packs the payload length in
//! its low 13 bits and the block-type code in its high 3 bits. All
//! multi-byte fields are little-endian.

use crate::error::{MumError, Result};

/// Cells per row.
pub const MUM_CELLS_X: usize = 32;
/// Bytes per cell.
pub const MUM_CELL_SIZE: usize = 4;
/// Maximum rows in a block grid.
pub const MUM_CELLS_MAX_Y: usize = 32;
/// Largest encrypted block size.
pub const MUM_MAX_BLOCK_SIZE: usize = 4096;
/// Largest total padding carried by a frame (the 4096-byte layout).
pub const MUM_MAX_PADDING_SIZE: usize = 88;

const LENGTH_LENGTH_MASK: u16 = 0x1fff;
const LENGTH_BLOCKTYPE_SHIFT: u16 = 13;

/// The six supported block sizes, identified by the code embedded in each
/// encrypted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    B128 = 1,
    B256 = 2,
    B512 = 3,
    B1024 = 4,
    B2048 = 5,
    B4096 = 6,
}

impl BlockType {
    /// All block types, smallest first.
    pub const ALL: [BlockType; 6] = [
        BlockType::B128,
        BlockType::B256,
        BlockType::B512,
        BlockType::B1024,
        BlockType::B2048,
        BlockType::B4096,
    ];

    /// The 3-bit code stored in the frame length field.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Look up a block type from its frame code.
    pub fn from_code(code: u8) -> Option<BlockType> {
        BlockType::ALL.into_iter().find(|b| b.code() == code)
    }

    /// Encrypted block size in bytes.
    pub fn encrypted_block_size(self) -> usize {
        match self {
            BlockType::B128 => 128,
            BlockType::B256 => 256,
            BlockType::B512 => 512,
            BlockType::B1024 => 1024,
            BlockType::B2048 => 2048,
            BlockType::B4096 => 4096,
        }
    }
}

/// Per-block-size dimensions and frame layout.
///
/// The payload is not a fixed offset from the block size: the 512-byte
/// block carries 492 payload bytes under 12 bytes of padding, while its
/// neighbors carry more.
#[derive(Debug, Clone, Copy)]
pub struct BlockGeometry {
    pub block_type: BlockType,
    pub encrypted_block_size: usize,
    /// Plaintext capacity of one frame (dataA + dataB).
    pub payload_size: usize,
    pub num_rows: usize,
    pub data_a: usize,
    pub data_b: usize,
    pub pad_a: usize,
    pub pad_b: usize,
    pub pad_c: usize,
    pub pad_d: usize,
    /// Total random padding per frame (pad_a + pad_b + pad_c + pad_d).
    pub padding_size: usize,
}

impl BlockGeometry {
    pub fn new(block_type: BlockType) -> Self {
        let (num_rows, data_a, data_b, pads) = match block_type {
            BlockType::B128 => (1, 72, 40, (2, 2, 2, 2)),
            BlockType::B256 => (2, 148, 92, (2, 2, 2, 2)),
            BlockType::B512 => (4, 304, 188, (2, 4, 4, 2)),
            BlockType::B1024 => (8, 618, 382, (4, 4, 4, 4)),
            BlockType::B2048 => (16, 1236, 764, (16, 4, 4, 16)),
            BlockType::B4096 => (32, 2472, 1528, (32, 12, 12, 32)),
        };
        let (pad_a, pad_b, pad_c, pad_d) = pads;
        BlockGeometry {
            block_type,
            encrypted_block_size: block_type.encrypted_block_size(),
            payload_size: data_a + data_b,
            num_rows,
            data_a,
            data_b,
            pad_a,
            pad_b,
            pad_c,
            pad_d,
            padding_size: pad_a + pad_b + pad_c + pad_d,
        }
    }

    fn off_data_a(&self) -> usize {
        self.pad_a
    }

    fn off_checksum(&self) -> usize {
        self.pad_a + self.data_a + self.pad_b
    }

    fn off_length(&self) -> usize {
        self.off_checksum() + 4
    }

    fn off_seqnum(&self) -> usize {
        self.off_length() + 2
    }

    fn off_data_b(&self) -> usize {
        self.off_seqnum() + 2 + self.pad_c
    }

    fn off_pad_d(&self) -> usize {
        self.off_data_b() + self.data_b
    }

    /// Assemble one encrypted-block frame.
    ///
    /// `payload` must already be filled to `payload_size` (random tail
    /// included) so the checksum covers a fully defined payload; `length`
    /// is the number of leading payload bytes that are real plaintext.
    /// `padding` supplies the `padding_size` random bytes for the four pad
    /// regions in A/B/C/D order.
    pub fn pack(
        &self,
        payload: &[u8],
        length: usize,
        seqnum: u16,
        padding: &[u8],
        out: &mut [u8],
    ) -> Result<()> {
        if length > self.payload_size {
            return Err(MumError::InvalidEncryptSize);
        }
        debug_assert_eq!(payload.len(), self.payload_size);
        debug_assert_eq!(padding.len(), self.padding_size);
        debug_assert_eq!(out.len(), self.encrypted_block_size);

        let checksum = checksum32(payload);
        let (data_a, data_b) = payload.split_at(self.data_a);
        // The padding buffer holds the four regions back to back.
        let pad_b_end = self.pad_a + self.pad_b;
        let pad_c_end = pad_b_end + self.pad_c;

        out[..self.pad_a].copy_from_slice(&padding[..self.pad_a]);
        out[self.off_data_a()..][..self.data_a].copy_from_slice(data_a);
        out[self.off_data_a() + self.data_a..][..self.pad_b]
            .copy_from_slice(&padding[self.pad_a..pad_b_end]);
        out[self.off_checksum()..][..4].copy_from_slice(&checksum.to_le_bytes());
        let length_field = length as u16 | ((self.block_type.code() as u16) << LENGTH_BLOCKTYPE_SHIFT);
        out[self.off_length()..][..2].copy_from_slice(&length_field.to_le_bytes());
        out[self.off_seqnum()..][..2].copy_from_slice(&seqnum.to_le_bytes());
        out[self.off_seqnum() + 2..][..self.pad_c].copy_from_slice(&padding[pad_b_end..pad_c_end]);
        out[self.off_data_b()..][..self.data_b].copy_from_slice(data_b);
        out[self.off_pad_d()..][..self.pad_d].copy_from_slice(&padding[pad_c_end..]);
        Ok(())
    }

    /// Validate one decrypted frame and recover its payload.
    ///
    /// Writes the full reassembled payload (dataA followed by dataB) into
    /// `payload` and returns the recorded plaintext length and sequence
    /// number. Validation order: block-type bits, length range, checksum.
    pub fn unpack(&self, packed: &[u8], payload: &mut [u8]) -> Result<(usize, u16)> {
        debug_assert_eq!(packed.len(), self.encrypted_block_size);
        debug_assert!(payload.len() >= self.payload_size);

        payload[..self.data_a].copy_from_slice(&packed[self.off_data_a()..][..self.data_a]);
        payload[self.data_a..self.payload_size]
            .copy_from_slice(&packed[self.off_data_b()..][..self.data_b]);

        let length_field = u16::from_le_bytes([
            packed[self.off_length()],
            packed[self.off_length() + 1],
        ]);
        if (length_field >> LENGTH_BLOCKTYPE_SHIFT) as u8 != self.block_type.code() {
            return Err(MumError::InvalidEncryptedBlockBlocktype);
        }
        let length = (length_field & LENGTH_LENGTH_MASK) as usize;
        if length > self.payload_size {
            return Err(MumError::InvalidEncryptedBlockLength);
        }

        let stored = u32::from_le_bytes([
            packed[self.off_checksum()],
            packed[self.off_checksum() + 1],
            packed[self.off_checksum() + 2],
            packed[self.off_checksum() + 3],
        ]);
        if stored != checksum32(&payload[..self.payload_size]) {
            return Err(MumError::InvalidEncryptedBlockChecksum);
        }

        let seqnum = u16::from_le_bytes([
            packed[self.off_seqnum()],
            packed[self.off_seqnum() + 1],
        ]);
        Ok((length, seqnum))
    }
}

/// Wrapping sum of the little-endian u32 words of `data`.
pub fn checksum32(data: &[u8]) -> u32 {
    let mut checksum = 0u32;
    for word in data.chunks_exact(4) {
        checksum = checksum.wrapping_add(u32::from_le_bytes([word[0], word[1], word[2], word[3]]));
    }
    checksum
}
