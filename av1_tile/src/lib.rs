// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

#![deny(unsafe_code)]
pub mod block_parameters;
pub mod constants;
pub mod dsp;
pub mod error;
pub mod frame;
pub mod frame_buffer;
pub mod headers;
pub mod loop_filter;
pub mod residual_buffer;
pub mod symbol_context;
pub mod symbol_reader;
mod tables;
pub mod threading;
pub mod tile;
pub mod tile_group;
pub mod util;

#[cfg(test)]
mod test_util;
