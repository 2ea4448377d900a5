//! Writer-preferring reader/writer lock.
//!
//! # Semantics
//!
//! - A reader may enter only while no writer is active **and no writer is
//!   waiting**. Arriving readers therefore queue up behind a waiting writer
//!   instead of starving it.
//! - A writer registers as waiting, then proceeds once there is no active
//!   writer and no active readers.
//! - Releasing the last reader wakes one writer. Releasing a writer wakes
//!   one waiting writer if any, otherwise all readers.
//!
//! At any instant either exactly one writer and zero readers hold the lock,
//! or zero writers hold it. Writer starvation under sustained writer traffic
//! is possible; that is the accepted trade-off.
//!
//! # Example
//!
//! ```
//! use bank_simulator_core_rs::sync::RwLock;
//!
//! let lock = RwLock::new(5);
//! {
//!     let v = lock.read();
//!     assert_eq!(*v, 5);
//! }
//! *lock.write() += 1;
//! assert_eq!(*lock.read(), 6);
//! ```

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex};

#[derive(Debug, Default)]
struct LockState {
    readers: usize,
    writer_active: bool,
    writers_waiting: usize,
}

/// Writer-preferring reader/writer lock guarding a value of type `T`.
#[derive(Debug)]
pub struct RwLock<T: ?Sized> {
    state: Mutex<LockState>,
    can_read: Condvar,
    can_write: Condvar,
    value: UnsafeCell<T>,
}

// Safety: access to `value` is mediated by the reader/writer protocol above;
// a `&T` is only handed out while no writer is active, and a `&mut T` only
// while this thread is the sole holder.
unsafe impl<T: ?Sized + Send> Send for RwLock<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for RwLock<T> {}

impl<T> RwLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            can_read: Condvar::new(),
            can_write: Condvar::new(),
            value: UnsafeCell::new(value),
        }
    }

    /// Consume the lock and return the inner value.
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: ?Sized> RwLock<T> {
    /// Acquire the lock in reader mode, blocking while a writer is active
    /// or waiting.
    pub fn read(&self) -> ReadGuard<'_, T> {
        let mut state = self.state.lock().unwrap();
        while state.writer_active || state.writers_waiting > 0 {
            state = self.can_read.wait(state).unwrap();
        }
        state.readers += 1;
        ReadGuard { lock: self }
    }

    /// Acquire the lock in writer mode, blocking until exclusive.
    pub fn write(&self) -> WriteGuard<'_, T> {
        let mut state = self.state.lock().unwrap();
        state.writers_waiting += 1;
        while state.writer_active || state.readers > 0 {
            state = self.can_write.wait(state).unwrap();
        }
        state.writers_waiting -= 1;
        state.writer_active = true;
        WriteGuard { lock: self }
    }
}

/// RAII guard for reader mode.
pub struct ReadGuard<'a, T: ?Sized> {
    lock: &'a RwLock<T>,
}

impl<T: ?Sized> Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: readers hold shared access for the guard's lifetime.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T: ?Sized> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock().unwrap();
        state.readers -= 1;
        if state.readers == 0 {
            self.lock.can_write.notify_one();
        }
    }
}

/// RAII guard for writer mode.
pub struct WriteGuard<'a, T: ?Sized> {
    lock: &'a RwLock<T>,
}

impl<T: ?Sized> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the writer holds exclusive access for the guard's lifetime.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T: ?Sized> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: as above.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T: ?Sized> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock().unwrap();
        state.writer_active = false;
        if state.writers_waiting > 0 {
            self.lock.can_write.notify_one();
        } else {
            self.lock.can_read.notify_all();
        }
    }
}
