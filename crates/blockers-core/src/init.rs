//! One-shot, thread-safe initialization of a rule family.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use log::warn;
use once_cell::sync::OnceCell;

use crate::error::{Result, RuleFamily};

/// A rule family's loaded state.
///
/// The value is set at most once and never reset. Explicit [`init`](Self::init)
/// calls retry after a failure; the query path makes a single lazy attempt
/// and fails open afterwards.
#[derive(Debug)]
pub struct LazyFamily<T> {
    family: RuleFamily,
    cell: OnceCell<T>,
    attempted: AtomicBool,
    /// Held while a load runs.
    loading: Mutex<()>,
    /// Failed loads so far.
    failures: AtomicU64,
}

impl<T> LazyFamily<T> {
    pub const fn new(family: RuleFamily) -> Self {
        Self {
            family,
            cell: OnceCell::new(),
            attempted: AtomicBool::new(false),
            loading: Mutex::new(()),
            failures: AtomicU64::new(0),
        }
    }

    pub fn family(&self) -> RuleFamily {
        self.family
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }

    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }

    /// Load the family unless it is already loaded.
    ///
    /// Callers that arrive while a load is running wait for it and share its
    /// outcome, success or failure. A call made after a failed load has
    /// finished runs `load` again.
    pub fn init<F>(&self, load: F) -> bool
    where
        F: FnOnce() -> Result<T>,
    {
        self.attempted.store(true, Ordering::Release);
        if self.cell.get().is_some() {
            return true;
        }

        let seen_failures = self.failures.load(Ordering::Acquire);
        let _loading = self.loading.lock().unwrap_or_else(|e| e.into_inner());
        if self.cell.get().is_some() {
            return true;
        }
        if self.failures.load(Ordering::Acquire) != seen_failures {
            return false;
        }

        match load() {
            Ok(value) => self.cell.set(value).is_ok(),
            Err(e) => {
                warn!("Failed to initialize {}: {}", self.family, e);
                self.failures.fetch_add(1, Ordering::Release);
                false
            }
        }
    }

    /// Loaded value, making the first lazy attempt if nobody has tried yet.
    pub fn get_or_attempt<F>(&self, load: F) -> Option<&T>
    where
        F: FnOnce() -> Result<T>,
    {
        if let Some(value) = self.cell.get() {
            return Some(value);
        }
        if self.attempted.swap(true, Ordering::AcqRel) {
            return None;
        }
        self.init(load);
        self.cell.get()
    }
}
