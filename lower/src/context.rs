//! The per-thread active lowering.
//!
//! [`lower`](crate::lower) installs an [`ActiveLowering`] for its whole run through a
//! [`LowerGuard`]. The slot is thread-local, so independent lowerings may run on different
//! threads, while a nested call on the same thread is rejected.

use std::cell::RefCell;
use std::marker::PhantomData;

use snafu::{OptionExt, ensure};
use tessel_dtype::IndexType;

use crate::error::{NoActiveLoweringSnafu, ReentrantLoweringSnafu, Result};

/// What passes may read about the lowering in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveLowering {
    pub index_type: IndexType,
    pub warp_size: i64,
}

thread_local! {
    static ACTIVE: RefCell<Option<ActiveLowering>> = const { RefCell::new(None) };
}

/// Holds the thread's lowering slot until dropped.
#[derive(Debug)]
pub struct LowerGuard {
    // Tied to the thread that installed it.
    _not_send: PhantomData<*const ()>,
}

impl LowerGuard {
    pub fn acquire(lowering: ActiveLowering) -> Result<Self> {
        ACTIVE.with(|slot| {
            let mut slot = slot.borrow_mut();
            ensure!(slot.is_none(), ReentrantLoweringSnafu);
            *slot = Some(lowering);
            Ok(Self { _not_send: PhantomData })
        })
    }
}

impl Drop for LowerGuard {
    fn drop(&mut self) {
        ACTIVE.with(|slot| slot.borrow_mut().take());
    }
}

pub fn current() -> Result<ActiveLowering> {
    ACTIVE.with(|slot| slot.borrow().clone()).context(NoActiveLoweringSnafu)
}

pub fn is_active() -> bool {
    ACTIVE.with(|slot| slot.borrow().is_some())
}
