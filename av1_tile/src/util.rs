// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

mod array2d;
mod bits;
mod blocking_counter;
mod stack;
mod sync;
pub mod tracing_wrappers;
mod vec_helpers;

pub use array2d::*;
pub use bits::*;
pub use blocking_counter::*;
pub use stack::*;
pub use sync::*;
pub use vec_helpers::*;
