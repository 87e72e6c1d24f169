// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

mod common;
pub mod config;
pub mod dbus;
pub mod lowmem;
pub mod memory;
pub mod pressure;
pub mod process;
mod psi;
pub mod reclaim;
mod sync;

#[cfg(test)]
mod test_utils;

pub use sync::NoPoison;
