//! Process-wide manager replacement.
//!
//! Kept in its own test binary: it swaps global state.

use std::sync::Arc;

use memory::manager::{self, BufferManager};
use memory::{policy, BufferObject, DumpPolicy, MemoryError, NullManager, SpillManager};

#[test]
fn test_set_current_manager() {
    assert_eq!(manager::current().name(), "null");

    // refused while a lock is outstanding
    let early = BufferObject::new();
    early.allocate(8, policy::heap()).unwrap();
    let lock = early.lock().unwrap();
    let spill = Arc::new(SpillManager::new(DumpPolicy::Never).unwrap());
    let err = manager::set_current(spill.clone()).unwrap_err();
    assert!(matches!(err, MemoryError::ManagerInUse { outstanding: 1 }));
    drop(lock);

    let previous = manager::set_current(spill.clone()).unwrap();
    assert_eq!(previous.name(), "null");
    assert_eq!(manager::current().name(), "spill");

    // new buffers attach to the spill manager, older ones keep theirs
    let managed = BufferObject::new();
    managed.allocate(8, policy::heap()).unwrap();
    assert!(spill.dump(&managed).unwrap());
    assert!(!spill.dump(&early).unwrap());

    let restored: Arc<dyn BufferManager> = Arc::new(NullManager);
    manager::set_current(restored).unwrap();
    assert_eq!(manager::current().name(), "null");
    assert_eq!(spill.stats().spilled_bytes, 8);
}
