//! Current apartment lookup
//!
//! A thread-keyed side table records which apartment is active on each
//! thread. The table is used for lookup only: entries hold weak references,
//! and ownership of the activation stays with the [`CurrentGuard`] returned
//! by [`enter`].

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use super::core::ApartmentCore;

static NEXT_HOLDER: AtomicU64 = AtomicU64::new(1);

#[derive(Clone)]
struct Entry {
    holder: u64,
    core: Weak<ApartmentCore>,
}

fn table() -> &'static Mutex<HashMap<ThreadId, Entry>> {
    static TABLE: OnceLock<Mutex<HashMap<ThreadId, Entry>>> = OnceLock::new();
    TABLE.get_or_init(Default::default)
}

/// Activation of an apartment on the current thread.
///
/// Dropping the guard restores the previously active apartment, but only if
/// this guard is still the holder of the thread's entry.
#[must_use = "the apartment is only current while the guard is alive"]
pub struct CurrentGuard {
    holder: u64,
    thread: ThreadId,
    previous: Option<Entry>,
    // Guards must be released on the thread that created them
    _not_send: PhantomData<*const ()>,
}

/// Make `core` the current apartment of the calling thread
pub fn enter(core: &Arc<ApartmentCore>) -> CurrentGuard {
    let holder = NEXT_HOLDER.fetch_add(1, Ordering::Relaxed);
    let thread = thread::current().id();
    let entry = Entry {
        holder,
        core: Arc::downgrade(core),
    };
    let previous = table().lock().insert(thread, entry);
    CurrentGuard {
        holder,
        thread,
        previous,
        _not_send: PhantomData,
    }
}

/// The apartment active on the calling thread, if any
pub fn current() -> Option<Arc<ApartmentCore>> {
    let thread = thread::current().id();
    let table = table().lock();
    table.get(&thread).and_then(|entry| entry.core.upgrade())
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        let mut table = table().lock();
        let still_holder = table
            .get(&self.thread)
            .is_some_and(|entry| entry.holder == self.holder);
        if !still_holder {
            return;
        }
        match self.previous.take() {
            Some(previous) => {
                table.insert(self.thread, previous);
            }
            None => {
                table.remove(&self.thread);
            }
        }
    }
}
