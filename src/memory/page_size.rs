// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use once_cell::sync::Lazy;

static PAGE_SIZE: Lazy<usize> = Lazy::new(|| {
    // SAFETY: sysconf is memory safe.
    unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
});

pub fn get_page_size() -> usize {
    *PAGE_SIZE
}

fn page_size_kb() -> u64 {
    (get_page_size() as u64 / 1024).max(1)
}

pub fn kb_to_pages(kb: u64) -> u64 {
    kb / page_size_kb()
}

pub fn signed_kb_to_pages(kb: i64) -> i64 {
    kb / page_size_kb() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kb_to_pages() {
        let page_kb = get_page_size() as u64 / 1024;
        assert_eq!(kb_to_pages(page_kb * 10), 10);
        assert_eq!(kb_to_pages(page_kb * 10 + page_kb / 2), 10);
        assert_eq!(signed_kb_to_pages(-(page_kb as i64) * 3), -3);
    }
}
