use crate::config::BranchConfig;
use crate::uop::{RecoveryInfo, Uop};
use crate::Address;

/// Gshare direction predictor: a global history register xor-folded with the
/// branch address indexes a table of saturating counters.
#[derive(Debug)]
pub struct Gshare {
    pht: Vec<u8>,
    global_hist: u32,
    hist_length: u32,
    ctr_bits: u32,
    perfect: bool,
}

impl Gshare {
    #[must_use]
    pub fn new(config: &BranchConfig) -> Self {
        let weakly_taken = 1u8 << (config.ctr_bits - 1);
        Self {
            pht: vec![weakly_taken; 1 << config.hist_length],
            global_hist: 0,
            hist_length: config.hist_length,
            ctr_bits: config.ctr_bits,
            perfect: config.perfect,
        }
    }

    fn index(&self, pc: Address, hist: u32) -> usize {
        let mask = (1u32 << self.hist_length) - 1;
        let cooked_hist = hist >> (32 - self.hist_length);
        let cooked_addr = (pc >> 2) as u32 & mask;
        (cooked_hist ^ cooked_addr) as usize
    }

    fn taken(&self, entry: u8) -> bool {
        (entry >> (self.ctr_bits - 1)) & 1 == 1
    }

    /// Predicts the branch direction and speculatively shifts the predicted
    /// outcome into the history register. The pre-prediction history and the
    /// repaired history (with the resolved direction) are stored on the
    /// micro-op for training and recovery.
    pub fn predict(&mut self, uop: &mut Uop) -> bool {
        uop.branch_info.pred_global_hist = self.global_hist;
        let pred = if self.perfect {
            uop.dir
        } else {
            let entry = self.pht[self.index(uop.pc, self.global_hist)];
            self.taken(entry)
        };
        self.global_hist >>= 1;
        uop.recovery_info = RecoveryInfo {
            global_hist: self.global_hist | (u32::from(uop.dir) << 31),
        };
        self.global_hist |= u32::from(pred) << 31;
        uop.pred_dir = pred;
        pred
    }

    /// Trains the counter the prediction read, using the prediction-time
    /// history.
    pub fn update(&mut self, uop: &Uop) {
        if self.perfect {
            return;
        }
        let index = self.index(uop.pc, uop.branch_info.pred_global_hist);
        let entry = &mut self.pht[index];
        let max = (1u8 << self.ctr_bits) - 1;
        if uop.dir {
            *entry = (*entry).saturating_add(1).min(max);
        } else {
            *entry = entry.saturating_sub(1);
        }
    }

    /// Restores the history register from a mispredicted branch's repaired
    /// snapshot.
    pub fn recover(&mut self, recovery_info: &RecoveryInfo) {
        self.global_hist = recovery_info.global_hist;
    }
}

#[derive(Clone, Copy, Debug)]
struct BtbEntry {
    tag: Address,
    target: Address,
}

/// Direct-mapped branch target buffer. A miss on a taken direct branch costs
/// a frontend redirect once the target is computed.
#[derive(Debug)]
pub struct Btb {
    entries: Vec<Option<BtbEntry>>,
}

impl Btb {
    #[must_use]
    pub fn new(num_entries: usize) -> Self {
        assert!(num_entries > 0, "btb must have at least one entry");
        Self {
            entries: vec![None; num_entries],
        }
    }

    fn index(&self, pc: Address) -> usize {
        ((pc >> 2) as usize) % self.entries.len()
    }

    /// Looks up the predicted target, `None` on a miss.
    #[must_use]
    pub fn access(&self, pc: Address) -> Option<Address> {
        let entry = self.entries[self.index(pc)]?;
        (entry.tag == pc).then_some(entry.target)
    }

    /// Installs or replaces the target for this branch.
    pub fn update(&mut self, pc: Address, target: Address) {
        let index = self.index(pc);
        self.entries[index] = Some(BtbEntry { tag: pc, target });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uop::CfKind;

    fn branch(pc: Address, dir: bool) -> Uop {
        Uop {
            pc,
            cf: CfKind::Cbr,
            dir,
            ..Uop::default()
        }
    }

    #[test]
    fn counters_train_towards_the_observed_direction() {
        let config = BranchConfig::default();
        let mut gshare = Gshare::new(&config);

        // weakly-taken init predicts taken
        let mut uop = branch(0x40, false);
        assert!(gshare.predict(&mut uop));

        // train not-taken twice at the same history point, then re-predict
        gshare.update(&uop);
        gshare.recover(&uop.recovery_info);
        let mut again = branch(0x40, false);
        again.branch_info.pred_global_hist = uop.branch_info.pred_global_hist;
        gshare.update(&again);

        gshare.global_hist = uop.branch_info.pred_global_hist;
        let mut third = branch(0x40, false);
        assert!(!gshare.predict(&mut third));
    }

    #[test]
    fn recovery_restores_history_with_the_resolved_direction() {
        let config = BranchConfig::default();
        let mut gshare = Gshare::new(&config);
        gshare.global_hist = 0xdead_beef;

        let mut uop = branch(0x80, true);
        let pred = gshare.predict(&mut uop);

        // speculative history carries the prediction in its top bit
        assert_eq!(
            gshare.global_hist,
            (0xdead_beefu32 >> 1) | (u32::from(pred) << 31)
        );

        // recovery rewrites the top bit with the resolved direction
        gshare.recover(&uop.recovery_info);
        assert_eq!(gshare.global_hist, (0xdead_beefu32 >> 1) | (1 << 31));
    }

    #[test]
    fn perfect_mode_always_matches_the_trace() {
        let config = BranchConfig {
            perfect: true,
            ..BranchConfig::default()
        };
        let mut gshare = Gshare::new(&config);
        let mut taken = branch(0x10, true);
        let mut not_taken = branch(0x10, false);
        assert!(gshare.predict(&mut taken));
        assert!(!gshare.predict(&mut not_taken));
    }

    #[test]
    fn btb_misses_until_updated_and_tags_exactly() {
        let mut btb = Btb::new(16);
        assert_eq!(btb.access(0x100), None);
        btb.update(0x100, 0x200);
        assert_eq!(btb.access(0x100), Some(0x200));
        // same set, different tag
        assert_eq!(btb.access(0x100 + 16 * 4), None);
    }
}
