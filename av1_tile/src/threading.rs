// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

mod task_queue;
mod wavefront;

pub use task_queue::*;
pub use wavefront::*;
