//! Deterministic byte-stream generator over a 64 KB subkey pool.
//!
//! An RC4-style state machine with one whitening step: every 64 KB of
//! raw stream is XORed with the subkey pool before it is handed out, so
//! the output depends on all 64 KB of seed material, not only on the
//! 256 bytes mixed into the initial state. Used for frame padding and
//! for the subkey expansion itself.

/// Size of a PRNG seed pool: sixteen 4096-byte subkeys.
pub const MUM_PRNG_SUBKEY_SIZE: usize = 65536;

// The 256-byte state key sits this far before the end of the pool.
const PRNG_KEY_BACKOFF: usize = 256 + 89;

pub struct Prng {
    state: [u8; 256],
    a: u8,
    b: u8,
    read_index: usize,
    subkey_data: Box<[u8; MUM_PRNG_SUBKEY_SIZE]>,
    ready_data: Box<[u8; MUM_PRNG_SUBKEY_SIZE]>,
}

impl Prng {
    /// Build a generator over a 64 KB seed pool.
    pub fn new(subkey_data: &[u8]) -> Self {
        debug_assert_eq!(subkey_data.len(), MUM_PRNG_SUBKEY_SIZE);
        let mut pool = Box::new([0u8; MUM_PRNG_SUBKEY_SIZE]);
        pool.copy_from_slice(subkey_data);
        let mut prng = Prng {
            state: [0u8; 256],
            a: 0,
            b: 0,
            read_index: 0,
            subkey_data: pool,
            ready_data: Box::new([0u8; MUM_PRNG_SUBKEY_SIZE]),
        };
        prng.init();
        prng.regenerate();
        prng
    }

    fn init(&mut self) {
        self.a = 0;
        self.b = 0;
        for (i, s) in self.state.iter_mut().enumerate() {
            *s = i as u8;
        }
        // Key-schedule mix with the 256-byte window 89 bytes before the
        // end of the pool.
        let key_off = MUM_PRNG_SUBKEY_SIZE - PRNG_KEY_BACKOFF;
        let mut j = 0u8;
        for i in 0..256 {
            j = j
                .wrapping_add(self.state[i])
                .wrapping_add(self.subkey_data[key_off + i]);
            self.state.swap(i, j as usize);
        }
    }

    #[inline]
    fn next_byte(&mut self) -> u8 {
        self.a = self.a.wrapping_add(1);
        self.b = self.b.wrapping_add(self.state[self.a as usize]);
        self.state.swap(self.a as usize, self.b as usize);
        let c = self.state[self.a as usize].wrapping_add(self.state[self.b as usize]);
        self.state[c as usize]
    }

    fn regenerate(&mut self) {
        for i in 0..MUM_PRNG_SUBKEY_SIZE {
            let v = self.next_byte();
            self.ready_data[i] = v;
        }
        // Whiten each generated 64 KB with the seed pool.
        for (r, s) in self.ready_data.iter_mut().zip(self.subkey_data.iter()) {
            *r ^= *s;
        }
        self.read_index = 0;
    }

    /// Copy the next `dst.len()` bytes of the stream (at most 64 KB per
    /// call; a short remainder triggers regeneration first).
    pub fn fetch(&mut self, dst: &mut [u8]) {
        if dst.len() > MUM_PRNG_SUBKEY_SIZE - self.read_index {
            self.regenerate();
        }
        dst.copy_from_slice(&self.ready_data[self.read_index..][..dst.len()]);
        self.read_index += dst.len();
    }
}
