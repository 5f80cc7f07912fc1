//! Semantic matching of error chains
//!
//! Codes are the primary key: message text is for humans and often carries
//! interpolated values, codes survive wrapping and the trip across the wire.

use crate::error::{Cause, Error};
use parking_lot::{const_reentrant_mutex, const_rwlock, ReentrantMutex, ReentrantMutexGuard, RwLock};
use std::error::Error as StdError;
use std::sync::Arc;

type SameFn = fn(&(dyn StdError + 'static), &(dyn StdError + 'static)) -> bool;

/// Either side of a comparison: a structured chain or an opaque error.
#[derive(Clone, Copy)]
pub enum ErrorRef<'a> {
    Chain(&'a Error),
    /// Matches the same instance, or an equal `std::io::Error`
    Opaque(&'a (dyn StdError + 'static)),
    /// Matches any error of the same concrete type that compares equal
    Value(&'a (dyn StdError + 'static), SameFn),
}

impl<'a> ErrorRef<'a> {
    /// Refer to an error outside the model by identity.
    ///
    /// Another instance only matches when both are `std::io::Error`s with the
    /// same kind and text. Use [`ErrorRef::value`] for types with `PartialEq`.
    pub fn opaque(err: &'a (dyn StdError + 'static)) -> Self {
        ErrorRef::Opaque(err)
    }

    /// Refer to an error outside the model by value: an observed error
    /// matches when it downcasts to `E` and compares equal.
    pub fn value<E>(err: &'a E) -> Self
    where
        E: StdError + PartialEq + 'static,
    {
        ErrorRef::Value(err, same_value::<E>)
    }
}

impl<'a> From<&'a Error> for ErrorRef<'a> {
    fn from(err: &'a Error) -> Self {
        ErrorRef::Chain(err)
    }
}

/// Whether any link of `err` matches `target`.
///
/// With codes on the target, a link matches when it shares at least one of
/// them. When neither the link nor the target has codes, messages are
/// compared for equality (and the legacy callback is notified on a match).
pub fn is(err: &Error, target: &Error) -> bool {
    walk(err, ErrorRef::Chain(target))
}

/// General form of [`is`] accepting opaque errors and absent values.
///
/// `None` only matches `None`.
pub fn is_ref(err: Option<ErrorRef<'_>>, target: Option<ErrorRef<'_>>) -> bool {
    match (err, target) {
        (None, None) => true,
        (None, Some(_)) | (Some(_), None) => false,
        (Some(ErrorRef::Chain(err)), Some(target)) => walk(err, target),
        (Some(ErrorRef::Opaque(err)), Some(target)) => opaque_is(err, target),
        (Some(ErrorRef::Value(err, _)), Some(target)) => opaque_is(err, target),
    }
}

fn walk(err: &Error, target: ErrorRef<'_>) -> bool {
    let mut link = err;
    loop {
        if let ErrorRef::Chain(target) = target {
            if link_matches(link, target) {
                return true;
            }
        }

        match link.cause() {
            None => return false,
            Some(Cause::Chain(next)) => link = next,
            Some(cause @ Cause::Opaque(_)) => return opaque_is(cause.as_std(), target),
        }
    }
}

/// Standard `source()` unwrapping for an opaque sub-chain. Structured links
/// found inside it are matched with the full rules again.
fn opaque_is(err: &(dyn StdError + 'static), target: ErrorRef<'_>) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(link) = err.downcast_ref::<Error>() {
            return walk(link, target);
        }
        let matched = match target {
            ErrorRef::Chain(_) => false,
            ErrorRef::Opaque(target) => same_error(err, target),
            ErrorRef::Value(target, same) => same_instance(err, target) || same(err, target),
        };
        if matched {
            return true;
        }
        current = err.source();
    }
    false
}

fn same_instance(a: &(dyn StdError + 'static), b: &(dyn StdError + 'static)) -> bool {
    let (pa, pb) = (a as *const dyn StdError, b as *const dyn StdError);
    pa.cast::<()>() == pb.cast::<()>()
}

fn same_error(a: &(dyn StdError + 'static), b: &(dyn StdError + 'static)) -> bool {
    if same_instance(a, b) {
        return true;
    }
    match (a.downcast_ref::<std::io::Error>(), b.downcast_ref::<std::io::Error>()) {
        (Some(a), Some(b)) => a.kind() == b.kind() && a.to_string() == b.to_string(),
        _ => false,
    }
}

fn same_value<E>(a: &(dyn StdError + 'static), b: &(dyn StdError + 'static)) -> bool
where
    E: StdError + PartialEq + 'static,
{
    match (a.downcast_ref::<E>(), b.downcast_ref::<E>()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn link_matches(link: &Error, target: &Error) -> bool {
    if std::ptr::eq(link, target) {
        return true;
    }

    let target_codes = target.link_codes();
    if !target_codes.is_empty() {
        return link.link_codes().iter().any(|c| target_codes.contains(c));
    }

    if link.link_codes().is_empty() && link.message() == target.message() {
        notify_legacy(link, target);
        return true;
    }

    false
}

// =============================================================================
// Legacy comparison callback
// =============================================================================

/// Observer for message-based matches between code-less links.
///
/// Receives `(observed, target)`. Useful for finding comparisons that still
/// rely on message text while migrating to codes.
pub type LegacyCallback = Arc<dyn Fn(&Error, &Error) + Send + Sync>;

static LEGACY_CALLBACK: RwLock<Option<LegacyCallback>> = const_rwlock(None);
static TESTING_LOCK: ReentrantMutex<()> = const_reentrant_mutex(());

/// Install or clear the process-wide legacy callback
pub fn set_legacy_callback(callback: Option<LegacyCallback>) {
    *LEGACY_CALLBACK.write() = callback;
}

/// Install a callback for the current test scope, restored on drop
pub fn legacy_callback_for_testing<F>(callback: F) -> LegacyCallbackGuard
where
    F: Fn(&Error, &Error) + Send + Sync + 'static,
{
    let lock = TESTING_LOCK.lock();
    let previous = LEGACY_CALLBACK.write().replace(Arc::new(callback));
    LegacyCallbackGuard {
        previous,
        _lock: lock,
    }
}

/// Restores the previous legacy callback on drop
#[must_use = "the callback is removed as soon as the guard drops"]
pub struct LegacyCallbackGuard {
    previous: Option<LegacyCallback>,
    _lock: ReentrantMutexGuard<'static, ()>,
}

impl Drop for LegacyCallbackGuard {
    fn drop(&mut self) {
        *LEGACY_CALLBACK.write() = self.previous.take();
    }
}

fn notify_legacy(observed: &Error, target: &Error) {
    let callback = LEGACY_CALLBACK.read().clone();
    if let Some(callback) = callback {
        callback(observed, target);
    }
}
