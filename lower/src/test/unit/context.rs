//! The per-thread lowering slot.

use tessel_dtype::IndexType;

use crate::context::*;
use crate::error::Error;

fn active() -> ActiveLowering {
    ActiveLowering { index_type: IndexType::Int32, warp_size: 32 }
}

#[test]
fn test_guard_scopes_the_active_lowering() {
    assert_eq!(current(), Err(Error::NoActiveLowering));
    {
        let _guard = LowerGuard::acquire(active()).unwrap();
        assert!(is_active());
        assert_eq!(current().unwrap().index_type, IndexType::Int32);
    }
    assert!(!is_active());
}

#[test]
fn test_nested_acquire_is_rejected() {
    let _guard = LowerGuard::acquire(active()).unwrap();
    assert_eq!(LowerGuard::acquire(active()).unwrap_err(), Error::ReentrantLowering);
    // The failed attempt leaves the outer lowering in place.
    assert!(is_active());
}

#[test]
fn test_threads_have_independent_slots() {
    let _guard = LowerGuard::acquire(active()).unwrap();
    let other = std::thread::spawn(|| {
        let guard = LowerGuard::acquire(active());
        guard.is_ok()
    });
    assert!(other.join().unwrap());
}
