// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::sync::{Arc, Mutex};

use crate::constants::{PlaneType, TransformSize};
use crate::headers::QuantizerTables;
use crate::symbol_reader::HALF_CDF;
use crate::util::{floor_log2, lock};

/// Multi-symbol arithmetic encoder producing streams `SymbolReader` decodes.
#[derive(Debug)]
pub struct SymbolWriter {
    low: u64,
    range: u32,
    count: i32,
    precarry: Vec<u16>,
}

impl Default for SymbolWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolWriter {
    pub fn new() -> Self {
        SymbolWriter {
            low: 0,
            range: 0x8000,
            count: -9,
            precarry: vec![],
        }
    }

    /// Encodes `symbol` with the decoder-side `cdf` (values ending in 32768).
    pub fn write_symbol(&mut self, symbol: usize, cdf: &[u16], num_symbols: usize) {
        let n = (num_symbols - 1) as u32;
        let s = symbol as u32;
        let fl = if symbol > 0 {
            32768 - cdf[symbol - 1] as u32
        } else {
            32768
        };
        let fh = 32768 - cdf[symbol] as u32;
        let r = self.range;
        let mut low = self.low;
        let range;
        if fl < 32768 {
            let u = ((r >> 8) * (fl >> 6) >> 1) + 4 * (n - (s - 1));
            let v = ((r >> 8) * (fh >> 6) >> 1) + 4 * (n - s);
            low += (r - u) as u64;
            range = u - v;
        } else {
            range = r - (((r >> 8) * (fh >> 6) >> 1) + 4 * (n - s));
        }
        self.normalize(low, range);
    }

    pub fn write_bit(&mut self, bit: bool) {
        self.write_symbol(bit as usize, &HALF_CDF, 2);
    }

    pub fn write_literal(&mut self, value: u32, num_bits: u32) {
        for i in (0..num_bits).rev() {
            self.write_bit((value >> i) & 1 == 1);
        }
    }

    fn normalize(&mut self, mut low: u64, range: u32) {
        let d = 15 - floor_log2(range) as i32;
        let mut c = self.count;
        let mut s = c + d;
        if s >= 0 {
            c += 16;
            let mut m = (1u64 << c) - 1;
            if s >= 8 {
                self.precarry.push((low >> c) as u16);
                low &= m;
                c -= 8;
                m >>= 8;
            }
            self.precarry.push((low >> c) as u16);
            s = c + d - 24;
            low &= m;
        }
        self.low = low << d;
        self.range = range << d;
        self.count = s;
    }

    pub fn finish(mut self) -> Vec<u8> {
        let mut c = self.count;
        let mut e = ((self.low + 0x3FFF) & !0x3FFF) | 0x4000;
        let mut s = 10 + c;
        if s > 0 {
            let mut n = (1u64 << (c + 16)) - 1;
            loop {
                self.precarry.push((e >> (c + 16)) as u16);
                e &= n;
                s -= 8;
                c -= 8;
                n >>= 8;
                if s <= 0 {
                    break;
                }
            }
        }
        let mut out = vec![0u8; self.precarry.len()];
        let mut carry = 0u32;
        for i in (0..self.precarry.len()).rev() {
            carry += self.precarry[i] as u32;
            out[i] = carry as u8;
            carry >>= 8;
        }
        out
    }
}

/// What the decoder asked for when a scripted symbol is drawn.
#[derive(Debug, Clone, Copy)]
pub struct SymbolRequest {
    pub num_symbols: usize,
    /// False for raw bits and literals.
    pub adaptive: bool,
}

pub type SymbolPolicy = Box<dyn FnMut(&SymbolRequest) -> usize + Send>;

/// Symbol source driven by a policy closure. Every choice is also encoded
/// into `writer`, so the same decisions can be replayed through the real
/// arithmetic decoder.
pub struct ScriptedSymbols {
    policy: SymbolPolicy,
    writer: Arc<Mutex<SymbolWriter>>,
}

impl ScriptedSymbols {
    pub fn new(policy: SymbolPolicy) -> (Self, Arc<Mutex<SymbolWriter>>) {
        let writer = Arc::new(Mutex::new(SymbolWriter::new()));
        (
            ScriptedSymbols {
                policy,
                writer: writer.clone(),
            },
            writer,
        )
    }

    pub fn choose(&mut self, cdf: &[u16], num_symbols: usize, adaptive: bool) -> usize {
        let request = SymbolRequest {
            num_symbols,
            adaptive,
        };
        let mut symbol = (self.policy)(&request).min(num_symbols - 1);
        // Zero-probability symbols cannot be coded.
        while symbol > 0 && cdf[symbol] == cdf[symbol - 1] {
            symbol -= 1;
        }
        lock(&self.writer).write_symbol(symbol, cdf, num_symbols);
        symbol
    }
}

/// Policy that always picks symbol 0.
pub fn zeros() -> SymbolPolicy {
    Box::new(|_| 0)
}

/// Quantizer with the same step at every index and no matrices.
#[derive(Debug, Clone, Copy)]
pub struct FlatQuantizer {
    pub dc: i32,
    pub ac: i32,
}

impl Default for FlatQuantizer {
    fn default() -> Self {
        FlatQuantizer { dc: 32, ac: 24 }
    }
}

impl QuantizerTables for FlatQuantizer {
    fn dc_q(&self, _qindex: u8, _bit_depth: u8) -> i32 {
        self.dc
    }

    fn ac_q(&self, _qindex: u8, _bit_depth: u8) -> i32 {
        self.ac
    }

    fn matrix(&self, _level: u8, _plane_type: PlaneType, _tx_size: TransformSize) -> Option<&[u8]> {
        None
    }
}
