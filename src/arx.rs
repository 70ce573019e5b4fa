//! ARX compression-function description: the transition rules a search
//! targets, supplied by the caller as plain tables.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Three-input bitwise Boolean function as an 8-entry truth table.
///
/// Table bit `(x << 2) | (y << 1) | z` holds the output for inputs
/// `(x, y, z)`.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoolFn(u8);

impl BoolFn {
    /// `(x & y) | (!x & z)` — round-1 function of the MD4/MD5 family.
    pub const CHOOSE: Self = Self(0xca);
    /// `x ^ y ^ z`.
    pub const PARITY: Self = Self(0x96);
    /// Majority of the three inputs.
    pub const MAJORITY: Self = Self(0xe8);

    pub const fn from_table(table: u8) -> Self {
        Self(table)
    }

    pub const fn table(self) -> u8 {
        self.0
    }

    pub const fn eval_bit(self, x: bool, y: bool, z: bool) -> bool {
        let idx = ((x as u8) << 2) | ((y as u8) << 1) | z as u8;
        self.0 >> idx & 1 != 0
    }

    /// Bitwise evaluation over whole words.
    pub fn eval(self, x: u32, y: u32, z: u32) -> u32 {
        let mut out = 0u32;
        for idx in 0..8u8 {
            if self.0 >> idx & 1 == 0 {
                continue;
            }
            let xs = if idx & 4 != 0 { x } else { !x };
            let ys = if idx & 2 != 0 { y } else { !y };
            let zs = if idx & 1 != 0 { z } else { !z };
            out |= xs & ys & zs;
        }
        out
    }
}

impl core::fmt::Debug for BoolFn {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "BoolFn({:#04x})", self.0)
    }
}

/// Step tables of an ARX compression function.
///
/// The step relation is
/// `Q[t+1] = Q[t] + rotl(Q[t-3] + f[t](Q[t], Q[t-1], Q[t-2]) + m[schedule[t]] + constants[t], rotations[t])`
/// with the chaining value unpacked into `Q[-3..=0]` and a Davies-Meyer
/// feed-forward after the last step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArxSpec {
    pub steps: usize,
    pub message_words: usize,
    pub schedule: Vec<usize>,
    pub rotations: Vec<u32>,
    pub constants: Vec<u32>,
    pub functions: Vec<BoolFn>,
    pub iv: [u32; 4],
    pub feed_forward: bool,
}

impl ArxSpec {
    /// Full 64-step MD5 tables (RFC 1321).
    pub fn md5() -> Self {
        let mut schedule = Vec::with_capacity(64);
        for i in 0..16 {
            schedule.push(i);
        }
        for i in 0..16 {
            schedule.push((5 * i + 1) % 16);
        }
        for i in 0..16 {
            schedule.push((3 * i + 5) % 16);
        }
        for i in 0..16 {
            schedule.push((7 * i) % 16);
        }

        let mut rotations = Vec::with_capacity(64);
        for round in [[7, 12, 17, 22], [5, 9, 14, 20], [4, 11, 16, 23], [6, 10, 15, 21]] {
            for _ in 0..4 {
                rotations.extend_from_slice(&round);
            }
        }

        let mut functions = Vec::with_capacity(64);
        functions.extend([BoolFn::CHOOSE; 16]);
        // (x & z) | (y & !z)
        functions.extend([BoolFn::from_table(0xe4); 16]);
        functions.extend([BoolFn::PARITY; 16]);
        // y ^ (x | !z)
        functions.extend([BoolFn::from_table(0x39); 16]);

        Self {
            steps: 64,
            message_words: 16,
            schedule,
            rotations,
            constants: MD5_CONSTANTS.to_vec(),
            functions,
            iv: [0x6745_2301, 0xefcd_ab89, 0x98ba_dcfe, 0x1032_5476],
            feed_forward: true,
        }
    }

    /// Small 8-step instance with the same shape, for tests and demos.
    pub fn toy8() -> Self {
        Self {
            steps: 8,
            message_words: 4,
            schedule: vec![0, 1, 2, 3, 3, 2, 1, 0],
            rotations: vec![7, 12, 5, 9, 4, 11, 6, 10],
            constants: MD5_CONSTANTS[..8].to_vec(),
            functions: vec![
                BoolFn::CHOOSE,
                BoolFn::CHOOSE,
                BoolFn::PARITY,
                BoolFn::PARITY,
                BoolFn::MAJORITY,
                BoolFn::MAJORITY,
                BoolFn::PARITY,
                BoolFn::CHOOSE,
            ],
            iv: [0x6745_2301, 0xefcd_ab89, 0x98ba_dcfe, 0x1032_5476],
            feed_forward: true,
        }
    }

    /// Reject malformed tables before any search starts.
    pub fn validate(&self) -> Result<(), Error> {
        if self.steps == 0 {
            return Err(Error::InvalidSpec("step count is zero"));
        }
        if self.schedule.len() != self.steps
            || self.rotations.len() != self.steps
            || self.constants.len() != self.steps
            || self.functions.len() != self.steps
        {
            return Err(Error::InvalidSpec("table lengths disagree with step count"));
        }
        if self.schedule.iter().any(|&w| w >= self.message_words) {
            return Err(Error::InvalidSpec("schedule references message word out of range"));
        }
        if (0..self.message_words).any(|w| !self.schedule.contains(&w)) {
            return Err(Error::InvalidSpec("schedule leaves a message word unused"));
        }
        if self.rotations.iter().any(|&s| s == 0 || s >= 32) {
            return Err(Error::InvalidSpec("rotation amount outside 1..=31"));
        }
        Ok(())
    }

    /// One step of the state recurrence. `window` is `[Q[t], Q[t-1], Q[t-2],
    /// Q[t-3]]`, newest first.
    pub fn step(&self, t: usize, window: [u32; 4], m: u32) -> u32 {
        let f = self.functions[t].eval(window[0], window[1], window[2]);
        let sum = window[3]
            .wrapping_add(f)
            .wrapping_add(m)
            .wrapping_add(self.constants[t]);
        window[0].wrapping_add(sum.rotate_left(self.rotations[t]))
    }

    /// Run the full compression function on one block.
    pub fn compress(&self, iv: [u32; 4], block: &[u32]) -> [u32; 4] {
        debug_assert_eq!(block.len(), self.message_words);
        // Q[-3..=0] = a, d, c, b
        let mut qs = vec![0u32; self.steps + 4];
        qs[0] = iv[0];
        qs[1] = iv[3];
        qs[2] = iv[2];
        qs[3] = iv[1];
        for t in 0..self.steps {
            let window = [qs[t + 3], qs[t + 2], qs[t + 1], qs[t]];
            qs[t + 4] = self.step(t, window, block[self.schedule[t]]);
        }
        let n = self.steps;
        let mut out = [qs[n], qs[n + 3], qs[n + 2], qs[n + 1]];
        if self.feed_forward {
            for (o, i) in out.iter_mut().zip(iv) {
                *o = o.wrapping_add(i);
            }
        }
        out
    }
}

/// Seed differential: which bits differ between the branches before step 0.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeedDifferential {
    pub iv_first: [u32; 4],
    pub iv_second: [u32; 4],
    /// Per-word XOR pattern between the two message blocks.
    pub message_xor: Vec<u32>,
}

impl SeedDifferential {
    /// Identical IVs and a message XOR pattern.
    pub fn from_message_xor(iv: [u32; 4], message_xor: Vec<u32>) -> Self {
        Self { iv_first: iv, iv_second: iv, message_xor }
    }

    /// Identical IVs, identical blocks. Useful as a smoke-test seed: the
    /// branches collapse to a single execution.
    pub fn trivial(iv: [u32; 4], message_words: usize) -> Self {
        Self::from_message_xor(iv, vec![0; message_words])
    }
}

#[rustfmt::skip]
const MD5_CONSTANTS: [u32; 64] = [
    0xd76a_a478, 0xe8c7_b756, 0x2420_70db, 0xc1bd_ceee,
    0xf57c_0faf, 0x4787_c62a, 0xa830_4613, 0xfd46_9501,
    0x6980_98d8, 0x8b44_f7af, 0xffff_5bb1, 0x895c_d7be,
    0x6b90_1122, 0xfd98_7193, 0xa679_438e, 0x49b4_0821,
    0xf61e_2562, 0xc040_b340, 0x265e_5a51, 0xe9b6_c7aa,
    0xd62f_105d, 0x0244_1453, 0xd8a1_e681, 0xe7d3_fbc8,
    0x21e1_cde6, 0xc337_07d6, 0xf4d5_0d87, 0x455a_14ed,
    0xa9e3_e905, 0xfcef_a3f8, 0x676f_02d9, 0x8d2a_4c8a,
    0xfffa_3942, 0x8771_f681, 0x6d9d_6122, 0xfde5_380c,
    0xa4be_ea44, 0x4bde_cfa9, 0xf6bb_4b60, 0xbebf_bc70,
    0x289b_7ec6, 0xeaa1_27fa, 0xd4ef_3085, 0x0488_1d05,
    0xd9d4_d039, 0xe6db_99e5, 0x1fa2_7cf8, 0xc4ac_5665,
    0xf429_2244, 0x432a_ff97, 0xab94_23a7, 0xfc93_a039,
    0x655b_59c3, 0x8f0c_cc92, 0xffef_f47d, 0x8584_5dd1,
    0x6fa8_7e4f, 0xfe2c_e6e0, 0xa301_4314, 0x4e08_11a1,
    0xf753_7e82, 0xbd3a_f235, 0x2ad7_d2bb, 0xeb86_d391,
];
