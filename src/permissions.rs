//! Bitmask permission model.
//!
//! Every user carries a single `u32` in which each bit independently grants
//! one capability. Route guards compare that integer against the flags they
//! require, so compound roles (an admin who also submits projects) are just
//! OR-ed bits rather than a role hierarchy.
//!
//! # Example
//!
//! ```rust
//! use fundraise_gate::permissions::{Permissions, has_any_permission};
//!
//! let bits = (Permissions::SUBMIT_PROJECT | Permissions::MANAGE_TEAM).bits();
//! assert!(has_any_permission(bits, [Permissions::ADMIN, Permissions::MANAGE_TEAM]));
//! assert!(!has_any_permission(bits, [Permissions::ADMIN]));
//! ```

use bitflags::bitflags;

bitflags! {
    /// Capability bits stored on the user record and snapshotted into tokens.
    ///
    /// Bit positions are part of the token payload and the persisted user
    /// record; never renumber an existing flag.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permissions: u32 {
        /// Create and submit projects for review.
        const SUBMIT_PROJECT = 1 << 0;
        /// Read every project, not only owned ones.
        const VIEW_ALL_PROJECTS = 1 << 1;
        /// Invite, remove and edit team members.
        const MANAGE_TEAM = 1 << 2;
        /// Place investments in open projects.
        const INVEST_IN_PROJECTS = 1 << 3;
        /// Approve, cancel and reconcile investment transactions.
        const MANAGE_INVESTMENTS = 1 << 4;
        /// Upload and delete project documents.
        const MANAGE_DOCUMENTS = 1 << 5;
        /// Post comments on projects.
        const COMMENT = 1 << 6;
        /// Edit company profiles.
        const MANAGE_COMPANY = 1 << 7;
        /// Platform administration.
        const ADMIN = 1 << 31;
    }
}

impl Permissions {
    /// Default grant for a user registering as a founder.
    pub const FOUNDER: Self = Self::SUBMIT_PROJECT
        .union(Self::MANAGE_TEAM)
        .union(Self::MANAGE_DOCUMENTS)
        .union(Self::MANAGE_COMPANY)
        .union(Self::COMMENT);

    /// Default grant for a user registering as an investor.
    pub const INVESTOR: Self = Self::VIEW_ALL_PROJECTS
        .union(Self::INVEST_IN_PROJECTS)
        .union(Self::COMMENT);

    /// Interpret a raw bitmask, keeping unknown bits so they round-trip.
    pub const fn from_raw(bits: u32) -> Self {
        Self::from_bits_retain(bits)
    }
}

/// True iff `bitmask & flag != 0`.
#[inline]
pub fn has_permission(bitmask: u32, flag: Permissions) -> bool {
    bitmask & flag.bits() != 0
}

/// True iff at least one of `flags` is set in `bitmask`.
///
/// An empty `flags` list never matches.
#[inline]
pub fn has_any_permission<I>(bitmask: u32, flags: I) -> bool
where
    I: IntoIterator<Item = Permissions>,
{
    flags.into_iter().any(|flag| has_permission(bitmask, flag))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_permission_single_bit() {
        let bits = Permissions::INVEST_IN_PROJECTS.bits();
        assert!(has_permission(bits, Permissions::INVEST_IN_PROJECTS));
        assert!(!has_permission(bits, Permissions::SUBMIT_PROJECT));
    }

    #[test]
    fn test_has_permission_compound_flag_matches_any_bit() {
        let bits = Permissions::COMMENT.bits();
        assert!(has_permission(bits, Permissions::INVESTOR));
    }

    #[test]
    fn test_has_any_permission() {
        let bits = (Permissions::ADMIN | Permissions::SUBMIT_PROJECT).bits();
        assert!(has_any_permission(
            bits,
            [Permissions::MANAGE_TEAM, Permissions::ADMIN]
        ));
        assert!(!has_any_permission(
            bits,
            [Permissions::MANAGE_TEAM, Permissions::INVEST_IN_PROJECTS]
        ));
    }

    #[test]
    fn test_empty_bitmask_never_matches() {
        for flag in Permissions::all().iter() {
            assert!(!has_any_permission(0, [flag]));
        }
    }

    #[test]
    fn test_empty_requirement_never_matches() {
        assert!(!has_any_permission(u32::MAX, []));
    }

    #[test]
    fn test_has_any_matches_bitwise_and_for_all_single_flags() {
        let samples = [0u32, 1, 0b1010_1010, 0x8000_0000, u32::MAX, 0x0000_00ff];
        for bits in samples {
            for a in Permissions::all().iter() {
                for b in Permissions::all().iter() {
                    let expected = bits & a.bits() != 0 || bits & b.bits() != 0;
                    assert_eq!(has_any_permission(bits, [a, b]), expected);
                }
            }
        }
    }

    #[test]
    fn test_admin_is_high_bit() {
        assert_eq!(Permissions::ADMIN.bits(), 0x8000_0000);
    }

    #[test]
    fn test_role_presets_are_disjoint_from_admin() {
        assert!(!Permissions::FOUNDER.contains(Permissions::ADMIN));
        assert!(!Permissions::INVESTOR.contains(Permissions::ADMIN));
        assert!(Permissions::FOUNDER.contains(Permissions::SUBMIT_PROJECT));
        assert!(Permissions::INVESTOR.contains(Permissions::INVEST_IN_PROJECTS));
    }

    #[test]
    fn test_from_raw_keeps_unknown_bits() {
        let raw = (1 << 20) | Permissions::COMMENT.bits();
        assert_eq!(Permissions::from_raw(raw).bits(), raw);
    }
}
