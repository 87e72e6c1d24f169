// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::sync::Mutex;
use std::sync::MutexGuard;

/// lowmemd is compiled to abort on panic, so the engine mutex shared between
/// the pressure loop and the D-Bus handlers can never be poisoned. This helper
/// discards the LockResult without needing unwrap()/expect() at every call site.
pub trait NoPoison<T: ?Sized> {
    fn do_lock(&self) -> MutexGuard<T>;
}

impl<T: ?Sized> NoPoison<T> for Mutex<T> {
    fn do_lock(&self) -> MutexGuard<T> {
        match self.lock() {
            Ok(guard) => guard,
            Err(_) => unreachable!("lowmemd aborts on panic"),
        }
    }
}
