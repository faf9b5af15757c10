//! Single-call guard for completion callbacks.
//!
//! Every worker and task receives its completion callback wrapped in [`OnlyOnce`].
//! The handle can be cloned and moved into several continuations, but only the
//! first invocation reaches the wrapped function. A second invocation is a
//! programming error and is reported synchronously.

use std::{cell::RefCell, fmt, rc::Rc};

use crate::error::CallbackError;

type Slot<A> = Rc<RefCell<Option<Box<dyn FnOnce(A)>>>>;

/// A clonable callback that may run at most once.
pub struct OnlyOnce<A> {
    slot: Slot<A>,
}

/// Completion callback handed to queue workers and retry attempts.
pub type Done<R, E> = OnlyOnce<Result<R, E>>;

impl<A> Clone for OnlyOnce<A> {
    fn clone(&self) -> Self {
        Self {
            slot: Rc::clone(&self.slot),
        }
    }
}

impl<A> fmt::Debug for OnlyOnce<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnlyOnce")
            .field("called", &self.is_called())
            .finish()
    }
}

impl<A: 'static> OnlyOnce<A> {
    /// Wraps `f` so that it can be invoked through any clone of the handle, once.
    pub fn new(f: impl FnOnce(A) + 'static) -> Self {
        Self {
            slot: Rc::new(RefCell::new(Some(Box::new(f)))),
        }
    }

    /// Invokes the callback.
    ///
    /// # Panics
    ///
    /// Panics if the callback was already called through this handle or any clone.
    pub fn call(&self, arg: A) {
        if let Err(err) = self.try_call(arg) {
            panic!("{err}");
        }
    }

    /// Invokes the callback, returning an error instead of panicking if it already ran.
    ///
    /// # Errors
    ///
    /// `CallbackError::AlreadyCalled` on every invocation after the first.
    pub fn try_call(&self, arg: A) -> Result<(), CallbackError> {
        let f = self
            .slot
            .borrow_mut()
            .take()
            .ok_or(CallbackError::AlreadyCalled)?;
        f(arg);
        Ok(())
    }
}

impl<A> OnlyOnce<A> {
    /// Returns `true` once the callback has been invoked.
    #[must_use]
    pub fn is_called(&self) -> bool {
        self.slot.borrow().is_none()
    }
}

impl<R: 'static, E: 'static> OnlyOnce<Result<R, E>> {
    /// Signals success with `value`.
    pub fn ok(&self, value: R) {
        self.call(Ok(value));
    }

    /// Signals failure with `error`.
    pub fn err(&self, error: E) {
        self.call(Err(error));
    }
}

/// The default callback used wherever a caller does not supply one.
pub fn noop<A>() -> impl FnOnce(A) {
    |_| {}
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn second_call_is_rejected() {
        let hits = Rc::new(Cell::new(0));
        let hits_cl = Rc::clone(&hits);
        let once = OnlyOnce::new(move |n: u32| hits_cl.set(hits_cl.get() + n));
        let clone = once.clone();

        assert_eq!(once.try_call(2), Ok(()));
        assert_eq!(clone.try_call(5), Err(CallbackError::AlreadyCalled));
        assert_eq!(hits.get(), 2);
        assert!(clone.is_called());
    }

    #[test]
    #[should_panic(expected = "callback was already called")]
    fn call_panics_on_reuse() {
        let done: Done<(), ()> = OnlyOnce::new(|_| {});
        done.ok(());
        done.ok(());
    }

    #[test]
    fn callback_may_inspect_its_own_handle() {
        let slot: Rc<RefCell<Option<OnlyOnce<()>>>> = Rc::new(RefCell::new(None));
        let slot_cl = Rc::clone(&slot);
        let once = OnlyOnce::new(move |()| {
            let me = slot_cl.borrow();
            assert!(me.as_ref().is_some_and(OnlyOnce::is_called));
        });
        *slot.borrow_mut() = Some(once.clone());
        once.call(());
    }
}
