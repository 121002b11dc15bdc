//! Breakpoint and watchpoint bookkeeping.
//!
//! Both managers share one registry model: an ordered map from address to
//! [`Site`]. A site records who wants it alive (the lifetime bitset), how
//! it triggers (mode) and how wide it is. Installation state is a property
//! of the manager, not the site: between `enable()` and `disable()` the
//! debuggee sees traps (or programmed debug registers), outside that
//! window it sees its own unmodified instructions.

pub mod hardware;
pub mod software;

use crate::error::{ErrorCode, Result};
use crate::stop_info::{StopInfo, StopReason};
use crate::types::Address;
use std::collections::BTreeMap;

bitflags! {
    /// Which classes of requestors hold a site alive.
    pub struct Lifetime: u32 {
        /// Protocol-driven; refcounted across repeated adds.
        const PERMANENT = 1 << 0;
        /// Planner-driven; erased by the next `disable()`.
        const TEMP_ONE_SHOT = 1 << 1;
        /// Erased after the first reported hit.
        const TEMP_UNTIL_HIT = 1 << 2;
    }
}

bitflags! {
    /// What kind of access triggers the site.
    pub struct Mode: u32 {
        const EXEC = 1 << 0;
        const READ = 1 << 1;
        const WRITE = 1 << 2;
    }
}

/// A registered, possibly installed, break- or watchpoint.
#[derive(Clone, Debug)]
pub struct Site {
    pub address: Address,
    pub lifetime: Lifetime,
    pub mode: Mode,
    pub size: usize,
    refs: i32,
    /// Last value observed at `address`; drives the software emulation of
    /// read-only hardware watchpoints.
    pub(crate) memory_value: u64,
}

impl PartialEq for Site {
    fn eq(&self, other: &Site) -> bool {
        self.address == other.address
            && self.lifetime == other.lifetime
            && self.mode == other.mode
            && self.size == other.size
    }
}

impl Eq for Site {}

/// What `SiteRegistry::remove` decided.
#[derive(Debug, PartialEq)]
pub(crate) enum RemoveOutcome {
    /// The site still has holders; nothing to uninstall.
    Kept,
    /// The site is gone; uninstall it if currently installed.
    Erased(Site),
}

/// The canonical per-process site map shared by both manager
/// specializations.
#[derive(Default)]
pub(crate) struct SiteRegistry {
    sites: BTreeMap<u64, Site>,
}

impl SiteRegistry {
    pub fn new() -> SiteRegistry {
        SiteRegistry {
            sites: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn clear(&mut self) {
        self.sites.clear();
    }

    pub fn get(&self, address: u64) -> Option<&Site> {
        self.sites.get(&address)
    }

    pub fn get_mut(&mut self, address: u64) -> Option<&mut Site> {
        self.sites.get_mut(&address)
    }

    /// Register (or re-register) a site. An existing entry must agree on
    /// `(mode, size)`; its lifetime bits are folded in and a permanent
    /// re-add bumps the refcount. Returns `true` when the site is new and
    /// needs installing.
    pub fn add(
        &mut self,
        address: Address,
        lifetime: Lifetime,
        size: usize,
        mode: Mode,
    ) -> Result<bool> {
        if let Some(site) = self.sites.get_mut(&address.value()) {
            if site.mode != mode || site.size != size {
                return Err(ErrorCode::InvalidArgument);
            }
            site.lifetime |= lifetime;
            if lifetime.contains(Lifetime::PERMANENT) {
                site.refs += 1;
            }
            return Ok(false);
        }

        let refs = if lifetime.contains(Lifetime::PERMANENT) {
            1
        } else {
            0
        };
        self.sites.insert(
            address.value(),
            Site {
                address,
                lifetime,
                mode,
                size,
                refs,
                memory_value: 0,
            },
        );
        Ok(true)
    }

    /// Drop one holder of the site at `address`. Purely temporary sites
    /// are erased outright; a permanent site is erased only when its last
    /// reference goes away.
    pub fn remove(&mut self, address: Address) -> Result<RemoveOutcome> {
        if !address.is_valid() {
            return Err(ErrorCode::InvalidArgument);
        }

        let site = match self.sites.get_mut(&address.value()) {
            None => return Err(ErrorCode::NotFound),
            Some(site) => site,
        };

        if site.lifetime.contains(Lifetime::PERMANENT) {
            debug_assert!(site.refs > 0);
            site.refs -= 1;
            if site.refs > 0 {
                return Ok(RemoveOutcome::Kept);
            }
            if site.lifetime != Lifetime::PERMANENT {
                // Other temporary holders remain; only the permanent claim
                // is released.
                site.lifetime &= !Lifetime::PERMANENT;
                return Ok(RemoveOutcome::Kept);
            }
        }

        let site = self.sites.remove(&address.value()).unwrap();
        Ok(RemoveOutcome::Erased(site))
    }

    pub fn has(&self, address: Address) -> bool {
        address.is_valid() && self.sites.contains_key(&address.value())
    }

    pub fn enumerate(&self, mut cb: impl FnMut(&Site)) {
        for site in self.sites.values() {
            cb(site);
        }
    }

    /// Attribute a stop at `address` to a site, consuming its
    /// until-first-hit claim.
    pub fn hit(&mut self, address: u64) -> Option<Site> {
        let site = self.sites.get_mut(&address)?;
        site.lifetime &= !Lifetime::TEMP_UNTIL_HIT;
        Some(site.clone())
    }

    /// Drain every site holding a one-shot claim; called from `disable()`.
    pub fn collect_one_shots(&mut self) {
        self.sites
            .retain(|_, site| !site.lifetime.contains(Lifetime::TEMP_ONE_SHOT));
    }

    pub fn addresses(&self) -> Vec<u64> {
        self.sites.keys().copied().collect()
    }
}

/// Map a site's trigger mode to the stop reason reported upstream.
pub(crate) fn fill_stop_reason(site: &Site, index: i32, stop_info: &mut StopInfo) {
    stop_info.watchpoint_index = index;
    stop_info.watchpoint_address = site.address;
    stop_info.reason = if site.mode.contains(Mode::EXEC) {
        StopReason::Breakpoint
    } else if site.mode.contains(Mode::READ) && site.mode.contains(Mode::WRITE) {
        StopReason::AccessWatchpoint
    } else if site.mode.contains(Mode::READ) {
        StopReason::ReadWatchpoint
    } else {
        StopReason::WriteWatchpoint
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(a: u64) -> Address {
        Address::new(a)
    }

    #[test]
    fn add_folds_lifetimes_and_counts_permanents() {
        let mut reg = SiteRegistry::new();
        assert!(reg
            .add(addr(0x1000), Lifetime::PERMANENT, 1, Mode::EXEC)
            .unwrap());
        // Re-adding the same site is not a new installation.
        assert!(!reg
            .add(addr(0x1000), Lifetime::PERMANENT, 1, Mode::EXEC)
            .unwrap());
        assert!(!reg
            .add(addr(0x1000), Lifetime::TEMP_UNTIL_HIT, 1, Mode::EXEC)
            .unwrap());

        let site = reg.get(0x1000).unwrap();
        assert_eq!(site.refs, 2);
        assert!(site.lifetime.contains(Lifetime::PERMANENT));
        assert!(site.lifetime.contains(Lifetime::TEMP_UNTIL_HIT));
    }

    #[test]
    fn add_rejects_conflicting_shape() {
        let mut reg = SiteRegistry::new();
        reg.add(addr(0x1000), Lifetime::PERMANENT, 4, Mode::WRITE)
            .unwrap();
        assert_eq!(
            reg.add(addr(0x1000), Lifetime::PERMANENT, 4, Mode::EXEC),
            Err(ErrorCode::InvalidArgument)
        );
        assert_eq!(
            reg.add(addr(0x1000), Lifetime::PERMANENT, 8, Mode::WRITE),
            Err(ErrorCode::InvalidArgument)
        );
    }

    #[test]
    fn permanent_refcounting() {
        let mut reg = SiteRegistry::new();
        for _ in 0..3 {
            reg.add(addr(0x2000), Lifetime::PERMANENT, 1, Mode::EXEC)
                .unwrap();
        }

        // k-1 removes keep the site installed.
        assert!(matches!(reg.remove(addr(0x2000)), Ok(RemoveOutcome::Kept)));
        assert!(matches!(reg.remove(addr(0x2000)), Ok(RemoveOutcome::Kept)));
        assert!(reg.has(addr(0x2000)));

        // The k-th erases it.
        assert!(matches!(
            reg.remove(addr(0x2000)),
            Ok(RemoveOutcome::Erased(_))
        ));
        assert!(!reg.has(addr(0x2000)));
    }

    #[test]
    fn last_permanent_ref_keeps_other_holders() {
        let mut reg = SiteRegistry::new();
        reg.add(addr(0x3000), Lifetime::PERMANENT, 1, Mode::EXEC)
            .unwrap();
        reg.add(addr(0x3000), Lifetime::TEMP_ONE_SHOT, 1, Mode::EXEC)
            .unwrap();

        // Releasing the permanent claim leaves the one-shot claim alive.
        assert!(matches!(reg.remove(addr(0x3000)), Ok(RemoveOutcome::Kept)));
        let site = reg.get(0x3000).unwrap();
        assert!(!site.lifetime.contains(Lifetime::PERMANENT));
        assert!(site.lifetime.contains(Lifetime::TEMP_ONE_SHOT));
    }

    #[test]
    fn remove_errors() {
        let mut reg = SiteRegistry::new();
        assert_eq!(
            reg.remove(Address::invalid()),
            Err(ErrorCode::InvalidArgument)
        );
        assert_eq!(reg.remove(addr(0x4000)), Err(ErrorCode::NotFound));
    }

    #[test]
    fn hit_consumes_until_hit_claim() {
        let mut reg = SiteRegistry::new();
        reg.add(
            addr(0x5000),
            Lifetime::PERMANENT | Lifetime::TEMP_UNTIL_HIT,
            1,
            Mode::EXEC,
        )
        .unwrap();

        let site = reg.hit(0x5000).unwrap();
        assert!(site.lifetime.contains(Lifetime::PERMANENT));
        assert!(!reg
            .get(0x5000)
            .unwrap()
            .lifetime
            .contains(Lifetime::TEMP_UNTIL_HIT));
        assert!(reg.hit(0x5004).is_none());
    }

    #[test]
    fn one_shot_collection() {
        let mut reg = SiteRegistry::new();
        reg.add(addr(0x6000), Lifetime::TEMP_ONE_SHOT, 2, Mode::EXEC)
            .unwrap();
        reg.add(addr(0x6004), Lifetime::PERMANENT, 2, Mode::EXEC)
            .unwrap();
        reg.collect_one_shots();
        assert!(!reg.has(addr(0x6000)));
        assert!(reg.has(addr(0x6004)));
    }

    #[test]
    fn stop_reason_mapping() {
        let mut reg = SiteRegistry::new();
        reg.add(addr(0x1), Lifetime::PERMANENT, 4, Mode::READ | Mode::WRITE)
            .unwrap();
        let mut info = StopInfo::new();
        fill_stop_reason(reg.get(0x1).unwrap(), 2, &mut info);
        assert_eq!(info.reason, StopReason::AccessWatchpoint);
        assert_eq!(info.watchpoint_index, 2);
        assert_eq!(info.watchpoint_address, addr(0x1));
    }

    #[test]
    fn site_equality_ignores_refs() {
        let mut a = SiteRegistry::new();
        let mut b = SiteRegistry::new();
        a.add(addr(0x10), Lifetime::PERMANENT, 1, Mode::EXEC).unwrap();
        a.add(addr(0x10), Lifetime::PERMANENT, 1, Mode::EXEC).unwrap();
        b.add(addr(0x10), Lifetime::PERMANENT, 1, Mode::EXEC).unwrap();
        assert_eq!(a.get(0x10).unwrap(), b.get(0x10).unwrap());
    }
}
