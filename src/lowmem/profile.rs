// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use log::info;

use crate::lowmem::threshold::ThresholdTable;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScreenState {
    #[default]
    Interactive,
    NonInteractive,
}

/// Swaps the active minfree values on display transitions. The cutoff scores
/// are shared by both profiles and never swapped.
///
/// While interactive, the table holds the interactive minfree values. While
/// non-interactive, the table holds the non-interactive values and the
/// interactive ones wait in `interactive_backup`.
#[derive(Clone, Debug)]
pub struct ScreenProfileSwitch {
    state: ScreenState,
    interactive_backup: Vec<u32>,
    non_interactive: Vec<u32>,
}

impl ScreenProfileSwitch {
    pub fn new(non_interactive: Vec<u32>) -> Self {
        ScreenProfileSwitch {
            state: ScreenState::Interactive,
            interactive_backup: Vec::new(),
            non_interactive,
        }
    }

    pub fn state(&self) -> ScreenState {
        self.state
    }

    /// Returns false if the device is already in `next`.
    pub fn transition(&mut self, next: ScreenState, table: &mut ThresholdTable) -> bool {
        if next == self.state {
            return false;
        }
        match next {
            ScreenState::NonInteractive => {
                self.interactive_backup = table.min_free_pages().to_vec();
                table.replace_min_free_pages(self.non_interactive.clone());
            }
            ScreenState::Interactive => {
                table.replace_min_free_pages(std::mem::take(&mut self.interactive_backup));
            }
        }
        info!("Screen is now {:?}", next);
        self.state = next;
        true
    }

    pub fn interactive_min_free_pages<'a>(&'a self, table: &'a ThresholdTable) -> &'a [u32] {
        match self.state {
            ScreenState::Interactive => table.min_free_pages(),
            ScreenState::NonInteractive => &self.interactive_backup,
        }
    }

    pub fn non_interactive_min_free_pages(&self) -> &[u32] {
        &self.non_interactive
    }

    /// A write made while non-interactive lands in the backup, so it takes
    /// effect when the screen turns back on.
    pub fn set_interactive_min_free_pages(&mut self, values: Vec<u32>, table: &mut ThresholdTable) {
        match self.state {
            ScreenState::Interactive => table.replace_min_free_pages(values),
            ScreenState::NonInteractive => self.interactive_backup = values,
        }
    }

    pub fn set_non_interactive_min_free_pages(
        &mut self,
        values: Vec<u32>,
        table: &mut ThresholdTable,
    ) {
        if self.state == ScreenState::NonInteractive {
            table.replace_min_free_pages(values.clone());
        }
        self.non_interactive = values;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ThresholdTable {
        ThresholdTable::new(vec![0, 8], vec![1024, 4096], 6)
    }

    #[test]
    fn test_cycle_restores_min_free_pages() {
        let mut table = table();
        let original = table.clone();
        let mut switch = ScreenProfileSwitch::new(vec![512, 2048]);

        assert!(switch.transition(ScreenState::NonInteractive, &mut table));
        assert_eq!(table.min_free_pages(), &[512, 2048]);
        assert_eq!(table.cutoff_scores(), &[0, 8]);

        assert!(switch.transition(ScreenState::Interactive, &mut table));
        assert_eq!(table, original);
    }

    #[test]
    fn test_repeated_transition_is_ignored() {
        let mut table = table();
        let mut switch = ScreenProfileSwitch::new(vec![512, 2048]);

        assert!(!switch.transition(ScreenState::Interactive, &mut table));
        assert!(switch.transition(ScreenState::NonInteractive, &mut table));
        // A second screen off must not overwrite the backup with the
        // non-interactive values.
        assert!(!switch.transition(ScreenState::NonInteractive, &mut table));
        assert!(switch.transition(ScreenState::Interactive, &mut table));
        assert_eq!(table.min_free_pages(), &[1024, 4096]);
    }

    #[test]
    fn test_writes_while_non_interactive() {
        let mut table = table();
        let mut switch = ScreenProfileSwitch::new(vec![512, 2048]);
        switch.transition(ScreenState::NonInteractive, &mut table);

        switch.set_interactive_min_free_pages(vec![2000, 8000], &mut table);
        assert_eq!(table.min_free_pages(), &[512, 2048]);
        assert_eq!(switch.interactive_min_free_pages(&table), &[2000, 8000]);

        switch.set_non_interactive_min_free_pages(vec![256, 1024], &mut table);
        assert_eq!(table.min_free_pages(), &[256, 1024]);

        switch.transition(ScreenState::Interactive, &mut table);
        assert_eq!(table.min_free_pages(), &[2000, 8000]);
        assert_eq!(switch.non_interactive_min_free_pages(), &[256, 1024]);
    }

    #[test]
    fn test_writes_while_interactive() {
        let mut table = table();
        let mut switch = ScreenProfileSwitch::new(vec![512, 2048]);

        switch.set_non_interactive_min_free_pages(vec![100, 200], &mut table);
        assert_eq!(table.min_free_pages(), &[1024, 4096]);

        switch.set_interactive_min_free_pages(vec![3000, 6000], &mut table);
        assert_eq!(table.min_free_pages(), &[3000, 6000]);

        switch.transition(ScreenState::NonInteractive, &mut table);
        assert_eq!(table.min_free_pages(), &[100, 200]);
    }
}
