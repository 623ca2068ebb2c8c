//! Reactive state stores.
//!
//! Each store owns one [`StateCell`] and is the only writer of it. Every
//! mutation replaces or edits the whole state inside a single
//! `watch::Sender::send_modify`, so subscribers never observe a half-applied
//! update. Concurrent operations interleave with last-write-wins semantics.

pub mod auth;
pub mod collection;
pub mod configs;
pub mod errors;
pub mod poller;
pub mod vms;

pub use auth::{AuthState, AuthStore};
pub use collection::{CollectionState, CollectionStore, Resource};
pub use configs::ConfigStore;
pub use errors::{ErrorCategory, ErrorPolicy};
pub use poller::{spawn_poller, Refetch};
pub use vms::VmStore;

use tokio::sync::watch;

/// Observable state container.
pub struct StateCell<S> {
    tx: watch::Sender<S>,
}

impl<S: Clone> StateCell<S> {
    pub fn new(initial: S) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Clone of the current state
    pub fn snapshot(&self) -> S {
        self.tx.borrow().clone()
    }

    /// Receiver that yields the current state and is notified on every change
    pub fn subscribe(&self) -> watch::Receiver<S> {
        self.tx.subscribe()
    }

    /// Replace the whole state
    pub fn set(&self, state: S) {
        self.tx.send_replace(state);
    }

    /// Edit the state atomically and notify subscribers
    pub fn update(&self, f: impl FnOnce(&mut S)) {
        self.tx.send_modify(f);
    }

    /// Read a projection without cloning the whole state
    pub fn read<T>(&self, f: impl FnOnce(&S) -> T) -> T {
        f(&self.tx.borrow())
    }
}
