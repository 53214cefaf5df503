// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::fmt::Debug;

use byteorder::{BigEndian, ByteOrder};

use crate::util::floor_log2;

pub const EC_PROB_SHIFT: u32 = 6;
pub const EC_MIN_PROB: u32 = 4;
pub const CDF_PROB_TOP: u32 = 1 << 15;

/// CDF used for raw bits and literals. Never adapted.
pub const HALF_CDF: [u16; 3] = [16384, 32768, 0];

/// Moves `cdf` towards the observed `symbol`. `cdf` holds `num_symbols`
/// cumulative values followed by the adaptation counter.
pub fn update_cdf(cdf: &mut [u16], symbol: usize, num_symbols: usize) {
    let count = cdf[num_symbols];
    let rate = 3
        + (count > 15) as u32
        + (count > 31) as u32
        + floor_log2(num_symbols as u32).min(2);
    let mut target = 0u16;
    for (i, value) in cdf.iter_mut().enumerate().take(num_symbols - 1) {
        if i == symbol {
            target = CDF_PROB_TOP as u16;
        }
        if target < *value {
            *value -= (*value - target) >> rate;
        } else {
            *value += (target - *value) >> rate;
        }
    }
    cdf[num_symbols] += (count < 32) as u16;
}

/// Bitstream side of the multi-symbol arithmetic decoder.
struct ArithmeticDecoder<'a> {
    data: &'a [u8],
    position: usize,
    // Unread bits, most significant bit first.
    window: u64,
    window_bits: u32,
    value: u32,
    range: u32,
    max_bits: i64,
}

impl<'a> ArithmeticDecoder<'a> {
    fn new(data: &'a [u8]) -> Self {
        let mut decoder = ArithmeticDecoder {
            data,
            position: 0,
            window: 0,
            window_bits: 0,
            value: 0,
            range: CDF_PROB_TOP,
            max_bits: 8 * data.len() as i64 - 15,
        };
        let num_bits = (data.len() * 8).min(15) as u32;
        let buf = decoder.read_bits(num_bits);
        let padded = buf << (15 - num_bits);
        decoder.value = ((1 << 15) - 1) ^ padded;
        decoder
    }

    fn refill(&mut self) {
        if self.window_bits == 0 && self.position + 8 <= self.data.len() {
            self.window = BigEndian::read_u64(&self.data[self.position..]);
            self.window_bits = 64;
            self.position += 8;
            return;
        }
        while self.window_bits <= 56 && self.position < self.data.len() {
            self.window |= (self.data[self.position] as u64) << (56 - self.window_bits);
            self.window_bits += 8;
            self.position += 1;
        }
    }

    // Bits past the end of the data read as zero.
    fn read_bits(&mut self, num_bits: u32) -> u32 {
        if num_bits == 0 {
            return 0;
        }
        if self.window_bits < num_bits {
            self.refill();
        }
        let bits = (self.window >> (64 - num_bits)) as u32;
        self.window <<= num_bits;
        self.window_bits = self.window_bits.saturating_sub(num_bits);
        bits
    }

    fn decode(&mut self, cdf: &[u16], num_symbols: usize) -> usize {
        let mut current = self.range;
        let mut previous;
        let mut symbol = 0;
        loop {
            previous = current;
            let f = CDF_PROB_TOP - cdf[symbol] as u32;
            current = ((self.range >> 8) * (f >> EC_PROB_SHIFT) >> (7 - EC_PROB_SHIFT))
                + EC_MIN_PROB * (num_symbols - symbol - 1) as u32;
            if self.value >= current {
                break;
            }
            symbol += 1;
        }
        self.range = previous - current;
        self.value -= current;
        self.renormalize();
        symbol
    }

    fn renormalize(&mut self) {
        let bits = 15 - floor_log2(self.range);
        self.range <<= bits;
        let num_bits = (bits as i64).min(self.max_bits.max(0)) as u32;
        let new_data = self.read_bits(num_bits);
        let padded = new_data << (bits - num_bits);
        self.value = padded ^ (((self.value + 1) << bits) - 1);
        self.max_bits -= bits as i64;
    }
}

enum Source<'a> {
    Arithmetic(ArithmeticDecoder<'a>),
    #[cfg(test)]
    Scripted(crate::test_util::ScriptedSymbols),
}

/// Decodes bits, literals and adaptive multi-symbol values from one tile.
pub struct SymbolReader<'a> {
    source: Source<'a>,
    allow_update_cdf: bool,
}

impl Debug for SymbolReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.source {
            Source::Arithmetic(decoder) => write!(
                f,
                "SymbolReader{{ data: [{} bytes], position: {}, range: {}, update_cdf: {} }}",
                decoder.data.len(),
                decoder.position,
                decoder.range,
                self.allow_update_cdf
            ),
            #[cfg(test)]
            Source::Scripted(_) => write!(f, "SymbolReader{{ scripted }}"),
        }
    }
}

impl<'a> SymbolReader<'a> {
    pub fn new(data: &'a [u8], allow_update_cdf: bool) -> Self {
        SymbolReader {
            source: Source::Arithmetic(ArithmeticDecoder::new(data)),
            allow_update_cdf,
        }
    }

    #[cfg(test)]
    pub(crate) fn scripted(
        script: crate::test_util::ScriptedSymbols,
        allow_update_cdf: bool,
    ) -> SymbolReader<'static> {
        SymbolReader {
            source: Source::Scripted(script),
            allow_update_cdf,
        }
    }

    #[cfg_attr(not(test), allow(unused_variables))]
    fn decode(&mut self, cdf: &[u16], num_symbols: usize, adaptive: bool) -> usize {
        match &mut self.source {
            Source::Arithmetic(decoder) => decoder.decode(cdf, num_symbols),
            #[cfg(test)]
            Source::Scripted(script) => script.choose(cdf, num_symbols, adaptive),
        }
    }

    pub fn read_bit(&mut self) -> bool {
        self.decode(&HALF_CDF, 2, false) == 1
    }

    /// Reads `num_bits` raw bits, most significant first.
    pub fn read_literal(&mut self, num_bits: u32) -> u32 {
        let mut literal = 0;
        for _ in 0..num_bits {
            literal = (literal << 1) | self.read_bit() as u32;
        }
        literal
    }

    /// Reads a value below `n` in `floor(log2(n))` bits, or one more for the
    /// largest values.
    pub fn read_non_symmetric(&mut self, n: u32) -> u32 {
        let bits = floor_log2(n) + 1;
        let threshold = (1 << bits) - n;
        let value = self.read_literal(bits - 1);
        if value < threshold {
            value
        } else {
            (value << 1) - threshold + self.read_bit() as u32
        }
    }

    /// Reads one of `N - 1` symbols and adapts `cdf` unless updates are
    /// disabled for the tile.
    pub fn read_symbol<const N: usize>(&mut self, cdf: &mut [u16; N]) -> usize {
        let num_symbols = N - 1;
        let symbol = self.decode(cdf, num_symbols, true);
        if self.allow_update_cdf {
            update_cdf(cdf, symbol, num_symbols);
        }
        symbol
    }

    pub fn read_bool(&mut self, cdf: &mut [u16; 3]) -> bool {
        self.read_symbol(cdf) == 1
    }

    /// Reads a binary symbol from a derived distribution that is not kept.
    pub fn read_bool_with_probability(&mut self, probability_of_one: u16) -> bool {
        let cdf = [(CDF_PROB_TOP as u16).saturating_sub(probability_of_one), 32768, 0];
        self.decode(&cdf, 2, false) == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::SymbolWriter;
    use rand::{Rng, SeedableRng};
    use rand_xorshift::XorShiftRng;
    use test_log::test;

    const fn uniform<const N: usize>() -> [u16; N] {
        let mut cdf = [0u16; N];
        let symbols = N - 1;
        let mut i = 0;
        while i < symbols {
            cdf[i] = ((32768 * (i + 1)) / symbols) as u16;
            i += 1;
        }
        cdf
    }

    #[test]
    fn empty_data_reads_first_symbols() {
        // Past the end the decoder value saturates, selecting symbol 0.
        let mut reader = SymbolReader::new(&[], true);
        let mut cdf = uniform::<5>();
        for _ in 0..64 {
            assert_eq!(reader.read_literal(3), 0);
            assert_eq!(reader.read_symbol(&mut cdf), 0);
        }
    }

    #[test]
    fn non_symmetric_values() {
        let mut writer = SymbolWriter::new();
        // With n = 5, values below 3 take two bits and the others three.
        for value in 0..5u32 {
            if value < 3 {
                writer.write_literal(value, 2);
            } else {
                writer.write_literal((value + 3) >> 1, 2);
                writer.write_bit((value + 3) & 1 == 1);
            }
        }
        // With n = 2, one bit.
        writer.write_bit(true);
        let data = writer.finish();
        let mut reader = SymbolReader::new(&data, true);
        for value in 0..5 {
            assert_eq!(reader.read_non_symmetric(5), value);
        }
        assert_eq!(reader.read_non_symmetric(2), 1);
    }

    #[test]
    fn adaptation_moves_towards_symbol() {
        let mut cdf = uniform::<5>();
        update_cdf(&mut cdf, 0, 4);
        assert!(cdf[0] > 8192);
        assert_eq!(cdf[3], 32768);
        assert_eq!(cdf[4], 1);
        let mut cdf = uniform::<3>();
        for _ in 0..40 {
            update_cdf(&mut cdf, 1, 2);
        }
        assert!(cdf[0] < 16384);
        assert_eq!(cdf[2], 32);
    }

    #[test]
    fn round_trip_adaptive_symbols() {
        let mut rng = XorShiftRng::seed_from_u64(0);
        let mut writer = SymbolWriter::new();
        let mut write_cdfs = (uniform::<3>(), uniform::<9>(), uniform::<17>());
        let mut expected = vec![];
        for _ in 0..2000 {
            match rng.random_range(0..4) {
                0 => {
                    let s = rng.random_range(0..2);
                    writer.write_symbol(s, &write_cdfs.0, 2);
                    update_cdf(&mut write_cdfs.0, s, 2);
                    expected.push((0, s));
                }
                1 => {
                    // Skewed towards small symbols.
                    let s = rng.random_range(0..8).min(rng.random_range(0..8));
                    writer.write_symbol(s, &write_cdfs.1, 8);
                    update_cdf(&mut write_cdfs.1, s, 8);
                    expected.push((1, s));
                }
                2 => {
                    let s = rng.random_range(0..16);
                    writer.write_symbol(s, &write_cdfs.2, 16);
                    update_cdf(&mut write_cdfs.2, s, 16);
                    expected.push((2, s));
                }
                _ => {
                    let bits = rng.random_range(0..1024u32);
                    for i in (0..10).rev() {
                        writer.write_bit((bits >> i) & 1 == 1);
                    }
                    expected.push((3, bits as usize));
                }
            }
        }
        let data = writer.finish();

        let mut reader = SymbolReader::new(&data, true);
        let mut cdfs = (uniform::<3>(), uniform::<9>(), uniform::<17>());
        for (kind, value) in expected {
            let decoded = match kind {
                0 => reader.read_symbol(&mut cdfs.0),
                1 => reader.read_symbol(&mut cdfs.1),
                2 => reader.read_symbol(&mut cdfs.2),
                _ => reader.read_literal(10) as usize,
            };
            assert_eq!(decoded, value);
        }
        assert_eq!(cdfs, write_cdfs);
    }

    #[test]
    fn round_trip_without_adaptation() {
        let mut writer = SymbolWriter::new();
        let cdf = [4000u16, 30000, 32768, 0];
        let symbols = [0usize, 2, 1, 1, 0, 2, 2, 0, 1];
        for &s in &symbols {
            writer.write_symbol(s, &cdf, 3);
        }
        writer.write_symbol(1, &[32768 - 100, 32768, 0], 2);
        let data = writer.finish();
        let mut reader = SymbolReader::new(&data, false);
        let mut read_cdf = cdf;
        for &s in &symbols {
            assert_eq!(reader.read_symbol(&mut read_cdf), s);
        }
        assert_eq!(read_cdf, cdf);
        assert!(reader.read_bool_with_probability(100));
    }
}
