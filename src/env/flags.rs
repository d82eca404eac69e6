//! `open_flags` and the preflight checks run before any side effect
//! (spec.md §4.5.1).

use crate::error::{Error, Result};

bitflags::bitflags! {
    pub struct OpenFlags: u32 {
        const CREATE            = 1 << 0;
        const INIT_CDB          = 1 << 1;
        const INIT_LOCK         = 1 << 2;
        const INIT_LOG          = 1 << 3;
        const INIT_MPOOL        = 1 << 4;
        const INIT_TXN          = 1 << 5;
        const INIT_REP          = 1 << 6;
        const JOIN              = 1 << 7;
        const LOCKDOWN          = 1 << 8;
        const PRIVATE           = 1 << 9;
        const RECOVER           = 1 << 10;
        const RECOVER_FATAL     = 1 << 11;
        const SYSTEM_MEM        = 1 << 12;
        const THREAD            = 1 << 13;
        const USE_ENVIRON       = 1 << 14;
        const USE_ENVIRON_ROOT  = 1 << 15;
    }
}

impl OpenFlags {
    /// Runs the preflight checks of spec.md §4.5.1, none of which may have
    /// any side effect.
    pub fn preflight(self) -> Result<()> {
        if self.contains(OpenFlags::CREATE) && self.contains(OpenFlags::JOIN) {
            return Err(Error::InvalidArgument("CREATE and JOIN are mutually exclusive".into()));
        }
        if self.contains(OpenFlags::PRIVATE) && self.contains(OpenFlags::SYSTEM_MEM) {
            return Err(Error::InvalidArgument("PRIVATE and SYSTEM_MEM are mutually exclusive".into()));
        }
        if self.contains(OpenFlags::RECOVER) && self.contains(OpenFlags::RECOVER_FATAL) {
            return Err(Error::InvalidArgument(
                "RECOVER and RECOVER_FATAL are mutually exclusive".into(),
            ));
        }
        if self.contains(OpenFlags::INIT_REP)
            && !(self.contains(OpenFlags::INIT_TXN) && self.contains(OpenFlags::INIT_LOCK))
        {
            return Err(Error::InvalidArgument("INIT_REP requires INIT_TXN and INIT_LOCK".into()));
        }
        if self.is_recover() && !self.contains(OpenFlags::INIT_TXN) {
            return Err(Error::InvalidArgument("RECOVER* requires INIT_TXN".into()));
        }
        if self.contains(OpenFlags::INIT_CDB) {
            let allowed = OpenFlags::INIT_CDB | OpenFlags::CREATE | OpenFlags::PRIVATE | OpenFlags::THREAD;
            if !allowed.contains(self) {
                return Err(Error::InvalidArgument(
                    "INIT_CDB only combines with CREATE, PRIVATE, THREAD".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn is_recover(self) -> bool {
        self.contains(OpenFlags::RECOVER) || self.contains(OpenFlags::RECOVER_FATAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_join_conflict() {
        let err = (OpenFlags::CREATE | OpenFlags::JOIN).preflight().unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn private_and_system_mem_conflict() {
        let err = (OpenFlags::PRIVATE | OpenFlags::SYSTEM_MEM).preflight().unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn rep_requires_txn_and_lock() {
        let err = OpenFlags::INIT_REP.preflight().unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!((OpenFlags::INIT_REP | OpenFlags::INIT_TXN | OpenFlags::INIT_LOCK)
            .preflight()
            .is_ok());
    }

    #[test]
    fn recover_requires_txn() {
        let err = OpenFlags::RECOVER.preflight().unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!((OpenFlags::RECOVER | OpenFlags::INIT_TXN).preflight().is_ok());
    }

    #[test]
    fn plain_create_is_fine() {
        assert!((OpenFlags::CREATE | OpenFlags::INIT_TXN | OpenFlags::INIT_LOG | OpenFlags::INIT_MPOOL)
            .preflight()
            .is_ok());
    }
}
