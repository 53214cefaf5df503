// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use av1_macros::CdfContext;

use crate::symbol_reader::CDF_PROB_TOP;

/// A CDF or a nested array of CDFs. The innermost array holds the
/// cumulative values followed by the adaptation counter.
pub trait CdfArray {
    fn uniform() -> Self;
    fn reset_counter(&mut self);
    fn for_each_cdf<F: FnMut(&[u16])>(&self, f: &mut F);
}

impl<const N: usize> CdfArray for [u16; N] {
    fn uniform() -> Self {
        let symbols = N - 1;
        array_init::array_init(|i| {
            if i < symbols {
                (CDF_PROB_TOP as usize * (i + 1) / symbols) as u16
            } else {
                0
            }
        })
    }

    fn reset_counter(&mut self) {
        self[N - 1] = 0;
    }

    fn for_each_cdf<F: FnMut(&[u16])>(&self, f: &mut F) {
        f(self)
    }
}

impl<const N: usize, const M: usize> CdfArray for [[u16; N]; M] {
    fn uniform() -> Self {
        array_init::array_init(|_| CdfArray::uniform())
    }

    fn reset_counter(&mut self) {
        self.iter_mut().for_each(|cdfs| cdfs.reset_counter());
    }

    fn for_each_cdf<F: FnMut(&[u16])>(&self, f: &mut F) {
        self.iter().for_each(|cdf| cdf.for_each_cdf(f));
    }
}

impl<const N: usize, const M: usize, const K: usize> CdfArray for [[[u16; N]; M]; K] {
    fn uniform() -> Self {
        array_init::array_init(|_| CdfArray::uniform())
    }

    fn reset_counter(&mut self) {
        self.iter_mut().for_each(|cdfs| cdfs.reset_counter());
    }

    fn for_each_cdf<F: FnMut(&[u16])>(&self, f: &mut F) {
        self.iter().for_each(|cdfs| cdfs.for_each_cdf(f));
    }
}

impl<const N: usize, const M: usize, const K: usize, const L: usize> CdfArray
    for [[[[u16; N]; M]; K]; L]
{
    fn uniform() -> Self {
        array_init::array_init(|_| CdfArray::uniform())
    }

    fn reset_counter(&mut self) {
        self.iter_mut().for_each(|cdfs| cdfs.reset_counter());
    }

    fn for_each_cdf<F: FnMut(&[u16])>(&self, f: &mut F) {
        self.iter().for_each(|cdfs| cdfs.for_each_cdf(f));
    }
}

/// Every adaptive CDF read by the tile syntax. Array shapes are
/// `[contexts...][symbols + 1]`. Large; keep it boxed.
#[derive(Clone, Debug, PartialEq, Eq, CdfContext)]
pub struct SymbolDecoderContext {
    pub partition_w8: [[u16; 5]; 4],
    pub partition_w16: [[u16; 11]; 4],
    pub partition_w32: [[u16; 11]; 4],
    pub partition_w64: [[u16; 11]; 4],
    pub partition_w128: [[u16; 9]; 4],
    pub segment_id: [[u16; 9]; 3],
    pub segment_id_predicted: [[u16; 3]; 3],
    pub skip: [[u16; 3]; 3],
    pub delta_q: [u16; 5],
    pub delta_lf: [u16; 5],
    pub delta_lf_multi: [[u16; 5]; 4],
    pub intra_block_copy: [u16; 3],
    pub intra_frame_y_mode: [[[u16; 14]; 5]; 5],
    pub y_mode: [[u16; 14]; 4],
    pub uv_mode_cfl_not_allowed: [[u16; 14]; 13],
    pub uv_mode_cfl_allowed: [[u16; 15]; 13],
    pub angle_delta: [[u16; 8]; 8],
    pub cfl_alpha_signs: [u16; 9],
    pub cfl_alpha: [[u16; 17]; 6],
    pub use_filter_intra: [[u16; 3]; 22],
    /// Indexed by block size context, then by the number of neighbours
    /// using a palette.
    pub palette_y_mode: [[[u16; 3]; 3]; 7],
    pub palette_uv_mode: [[u16; 3]; 2],
    pub palette_y_size: [[u16; 8]; 7],
    pub palette_uv_size: [[u16; 8]; 7],
    /// Color index CDFs per palette size, indexed by plane type and color
    /// context.
    pub palette_color_2: [[[u16; 3]; 5]; 2],
    pub palette_color_3: [[[u16; 4]; 5]; 2],
    pub palette_color_4: [[[u16; 5]; 5]; 2],
    pub palette_color_5: [[[u16; 6]; 5]; 2],
    pub palette_color_6: [[[u16; 7]; 5]; 2],
    pub palette_color_7: [[[u16; 8]; 5]; 2],
    pub palette_color_8: [[[u16; 9]; 5]; 2],
    pub filter_intra_mode: [u16; 6],
    pub is_inter: [[u16; 3]; 4],
    pub use_compound_reference: [[u16; 3]; 5],
    pub compound_reference_type: [[u16; 3]; 5],
    pub single_reference: [[[u16; 3]; 6]; 3],
    pub compound_reference: [[[u16; 3]; 3]; 3],
    pub compound_backward_reference: [[[u16; 3]; 2]; 3],
    pub unidirectional_compound_reference: [[[u16; 3]; 3]; 3],
    pub compound_prediction_mode: [[u16; 9]; 8],
    pub new_mv: [[u16; 3]; 6],
    pub zero_mv: [[u16; 3]; 2],
    pub reference_mv: [[u16; 3]; 6],
    pub drl: [[u16; 3]; 3],
    pub interpolation_filter: [[u16; 4]; 16],
    pub mv_joint: [[u16; 5]; 2],
    pub mv_sign: [[[u16; 3]; 2]; 2],
    pub mv_class: [[[u16; 12]; 2]; 2],
    pub mv_class0_bit: [[[u16; 3]; 2]; 2],
    pub mv_class0_fraction: [[[[u16; 5]; 2]; 2]; 2],
    pub mv_class0_high_precision: [[[u16; 3]; 2]; 2],
    pub mv_bit: [[[[u16; 3]; 10]; 2]; 2],
    pub mv_fraction: [[[u16; 5]; 2]; 2],
    pub mv_high_precision: [[[u16; 3]; 2]; 2],
    pub tx_depth_8x8: [[u16; 3]; 3],
    pub tx_depth: [[[u16; 4]; 3]; 3],
    pub tx_split: [[u16; 3]; 21],
    pub all_zero: [[[u16; 3]; 13]; 5],
    pub intra_tx_type_set1: [[[u16; 8]; 13]; 4],
    pub intra_tx_type_set2: [[[u16; 6]; 13]; 4],
    pub inter_tx_type_set1: [[u16; 17]; 4],
    pub inter_tx_type_set2: [[u16; 13]; 4],
    pub inter_tx_type_set3: [[u16; 3]; 4],
    pub eob_pt_16: [[[u16; 6]; 2]; 2],
    pub eob_pt_32: [[[u16; 7]; 2]; 2],
    pub eob_pt_64: [[[u16; 8]; 2]; 2],
    pub eob_pt_128: [[[u16; 9]; 2]; 2],
    pub eob_pt_256: [[[u16; 10]; 2]; 2],
    pub eob_pt_512: [[u16; 11]; 2],
    pub eob_pt_1024: [[u16; 12]; 2],
    pub eob_extra: [[[[u16; 3]; 9]; 2]; 5],
    pub coeff_base_eob: [[[[u16; 4]; 4]; 2]; 5],
    pub coeff_base: [[[[u16; 5]; 42]; 2]; 5],
    pub coeff_base_range: [[[[u16; 5]; 21]; 2]; 4],
    pub dc_sign: [[[u16; 3]; 3]; 2],
}

impl Default for SymbolDecoderContext {
    fn default() -> Self {
        Self::uniform()
    }
}

impl SymbolDecoderContext {
    /// Heap allocated uniform context.
    pub fn boxed() -> Box<Self> {
        Box::new(Self::uniform())
    }

    /// The context saved for the next frame: this one with every adaptation
    /// counter cleared.
    pub fn snapshot_for_next_frame(&self) -> Box<Self> {
        let mut snapshot = Box::new(self.clone());
        snapshot.reset_counters();
        snapshot
    }
}
