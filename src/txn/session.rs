//! Session - unit-of-work lifecycle for one backend connection
//!
//! A session is the single logical thread of control. Units of work nest:
//! one top-level unit, any number of nested sub-units. Commit and abort are
//! the only suspension points; they are where the pin-tracker safety net
//! runs and where registered observers (the dispatcher's guard reset, for
//! one) are notified.
//!
//! Without this net, every `pin` call site would need its own unwind
//! protection to guarantee a `release` on every exit path. Centralizing the
//! cleanup at the unit-of-work boundary removes that burden at the cost of
//! one bookkeeping list per session.

use crate::cache::PinTracker;
use crate::config::LeakPolicy;
use crate::error::{MetaError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Unit-of-work lifecycle event delivered to registered callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnEvent {
    /// Top-level unit committed
    Commit,
    /// Top-level unit aborted
    Abort,
    /// Nested unit at `depth` committed
    SubCommit { depth: usize },
    /// Nested unit at `depth` aborted
    SubAbort { depth: usize },
}

pub type TxnCallback = Box<dyn Fn(TxnEvent) + Send + Sync>;

/// Unit-of-work coordinator for one connection.
pub struct Session {
    pins: Arc<PinTracker>,
    callbacks: Mutex<Vec<TxnCallback>>,
    active: AtomicBool,
    leak_policy: LeakPolicy,
}

impl Session {
    pub fn new(leak_policy: LeakPolicy) -> Arc<Self> {
        Arc::new(Self {
            pins: Arc::new(PinTracker::new()),
            callbacks: Mutex::new(Vec::new()),
            active: AtomicBool::new(false),
            leak_policy,
        })
    }

    /// The session's pin tracker, threaded to `pin`/`release` call sites.
    pub fn pins(&self) -> &Arc<PinTracker> {
        &self.pins
    }

    /// Register an end-of-unit observer. Callbacks run on every commit and
    /// abort, top-level or nested, after the pin sweep.
    pub fn register_callback(&self, callback: TxnCallback) {
        self.callbacks.lock().push(callback);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Current nesting depth; 0 means only the top-level unit is open.
    pub fn depth(&self) -> usize {
        self.pins.current_depth()
    }

    /// Open the top-level unit of work.
    pub fn begin(&self) -> Result<()> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(MetaError::Transaction(
                "unit of work already active".into(),
            ));
        }
        Ok(())
    }

    /// Commit the top-level unit. Leaked pins are handled per the session's
    /// leak policy; pins on caches that opted out of the commit sweep
    /// survive into the next unit.
    pub fn commit(&self) -> Result<()> {
        self.require_active()?;
        if self.depth() > 0 {
            return Err(MetaError::Transaction(
                "nested units still open at commit".into(),
            ));
        }
        self.pins.sweep_commit(self.leak_policy);
        self.fire(TxnEvent::Commit);
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Abort the top-level unit. Every outstanding pin is unwound
    /// unconditionally; open nested units are discarded with it.
    pub fn abort(&self) -> Result<()> {
        self.require_active()?;
        self.pins.sweep_abort(0);
        while self.depth() > 0 {
            self.pins.exit_nested();
        }
        self.fire(TxnEvent::Abort);
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Open a nested sub-unit.
    pub fn begin_nested(&self) -> Result<()> {
        self.require_active()?;
        self.pins.enter_nested();
        Ok(())
    }

    /// Complete a nested sub-unit. Pins taken inside it must already be
    /// released by the code that took them; survivors are forced out.
    pub fn commit_nested(&self) -> Result<()> {
        let depth = self.nested_depth()?;
        self.pins.sweep_subcommit(depth);
        self.fire(TxnEvent::SubCommit { depth });
        self.pins.exit_nested();
        Ok(())
    }

    /// Abort a nested sub-unit, unwinding only the pins it took.
    pub fn abort_nested(&self) -> Result<()> {
        let depth = self.nested_depth()?;
        self.pins.sweep_abort(depth);
        self.fire(TxnEvent::SubAbort { depth });
        self.pins.exit_nested();
        Ok(())
    }

    fn require_active(&self) -> Result<()> {
        if !self.active.load(Ordering::SeqCst) {
            return Err(MetaError::Transaction("no active unit of work".into()));
        }
        Ok(())
    }

    fn nested_depth(&self) -> Result<usize> {
        self.require_active()?;
        let depth = self.depth();
        if depth == 0 {
            return Err(MetaError::Transaction("no nested unit open".into()));
        }
        Ok(depth)
    }

    fn fire(&self, event: TxnEvent) {
        for callback in self.callbacks.lock().iter() {
            callback(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MetadataCache;
    use parking_lot::Mutex as PlMutex;

    fn cache(name: &str) -> Arc<MetadataCache<u64, String>> {
        let cache = MetadataCache::new(name);
        cache.init().unwrap();
        Arc::new(cache)
    }

    #[test]
    fn test_commit_requires_begin() {
        let session = Session::new(LeakPolicy::Warn);
        assert!(matches!(
            session.commit(),
            Err(MetaError::Transaction(_))
        ));
    }

    #[test]
    fn test_double_begin_rejected() {
        let session = Session::new(LeakPolicy::Warn);
        session.begin().unwrap();
        assert!(matches!(session.begin(), Err(MetaError::Transaction(_))));
    }

    #[test]
    fn test_abort_unwinds_pins_across_caches() {
        let session = Session::new(LeakPolicy::Warn);
        session.begin().unwrap();

        let a = cache("a");
        let b = cache("b");
        a.pin(session.pins());
        a.pin(session.pins());
        b.pin(session.pins());
        assert_eq!(session.pins().outstanding(), 3);

        session.abort().unwrap();
        assert_eq!(session.pins().outstanding(), 0);
        assert_eq!(a.refcount(), 1);
        assert_eq!(b.refcount(), 1);
    }

    #[test]
    fn test_commit_releases_leaked_pin_under_warn() {
        let session = Session::new(LeakPolicy::Warn);
        session.begin().unwrap();
        let a = cache("a");
        a.pin(session.pins());
        session.commit().unwrap();
        assert_eq!(session.pins().outstanding(), 0);
        assert_eq!(a.refcount(), 1);
    }

    #[test]
    fn test_cross_commit_pin_survives_for_opted_out_cache() {
        let session = Session::new(LeakPolicy::Panic);
        session.begin().unwrap();
        let a = cache("a");
        a.set_release_on_commit(false);
        a.pin(session.pins());
        session.commit().unwrap();
        assert_eq!(session.pins().outstanding(), 1);
        assert_eq!(a.refcount(), 2);

        // next unit of work can still release it
        session.begin().unwrap();
        a.release(session.pins()).unwrap();
        session.commit().unwrap();
        assert_eq!(a.refcount(), 1);
    }

    #[test]
    fn test_nested_abort_leaves_outer_pins() {
        let session = Session::new(LeakPolicy::Warn);
        session.begin().unwrap();
        let a = cache("a");
        a.pin(session.pins());

        session.begin_nested().unwrap();
        a.pin(session.pins());
        session.abort_nested().unwrap();

        assert_eq!(session.pins().outstanding(), 1);
        assert_eq!(a.refcount(), 2);
        a.release(session.pins()).unwrap();
        session.commit().unwrap();
    }

    #[test]
    fn test_callbacks_fire_in_order() {
        let session = Session::new(LeakPolicy::Warn);
        let events: Arc<PlMutex<Vec<TxnEvent>>> = Arc::new(PlMutex::new(Vec::new()));
        let sink = events.clone();
        session.register_callback(Box::new(move |event| {
            sink.lock().push(event);
        }));

        session.begin().unwrap();
        session.begin_nested().unwrap();
        session.commit_nested().unwrap();
        session.commit().unwrap();
        session.begin().unwrap();
        session.abort().unwrap();

        assert_eq!(
            events.lock().as_slice(),
            &[
                TxnEvent::SubCommit { depth: 1 },
                TxnEvent::Commit,
                TxnEvent::Abort,
            ]
        );
    }
}
