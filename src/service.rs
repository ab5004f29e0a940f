/*!
 * Services and filters
 *
 * A [`Service`] turns a request into a [`Deferred`] reply. A [`Filter`] sits
 * in front of a service and may rewrite the request, observe or rewrite the
 * reply, or short-circuit the call entirely.
 *
 * ```text
 *   caller ──► outer filter ──► inner filter ──► service
 *          ◄──               ◄──              ◄──
 * ```
 *
 * `outer.and_then_filter(inner).and_then(service)` and
 * `outer.and_then(inner.and_then(service))` build the same chain: the outer
 * filter sees the caller's request first and the inner filter sees the raw
 * reply first.
 *
 * A panic in a filter or in the service it calls never escapes `apply`; it
 * becomes a failed `Deferred` at the filter boundary.
 */

use relay_core_future::{Deferred, RpcError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Asynchronous request handler
pub trait Service<Req, Rep>: Send + Sync {
    /// Handle one request; must return without blocking
    fn apply(&self, request: Req) -> Deferred<Rep>;

    /// Release resources held by this service
    fn close(&self) -> Deferred<()> {
        Deferred::value(())
    }
}

/// Shared, type-erased service
pub type BoxService<Req, Rep> = Arc<dyn Service<Req, Rep>>;

impl<Req, Rep, S> Service<Req, Rep> for Arc<S>
where
    S: Service<Req, Rep> + ?Sized,
{
    fn apply(&self, request: Req) -> Deferred<Rep> {
        (**self).apply(request)
    }

    fn close(&self) -> Deferred<()> {
        (**self).close()
    }
}

/// Service backed by a closure; see [`service_fn`]
pub struct ServiceFn<F> {
    f: F,
}

/// Build a service from a closure returning a `Deferred`
///
/// ```
/// use relay::service::{service_fn, Service};
/// use relay::Deferred;
///
/// let echo = service_fn(|s: String| Deferred::value(s));
/// assert_eq!(echo.apply("hi".to_string()).poll().unwrap().unwrap(), "hi");
/// ```
pub fn service_fn<Req, Rep, F>(f: F) -> ServiceFn<F>
where
    F: Fn(Req) -> Deferred<Rep> + Send + Sync,
{
    ServiceFn { f }
}

impl<Req, Rep, F> Service<Req, Rep> for ServiceFn<F>
where
    Rep: Clone + Send + 'static,
    F: Fn(Req) -> Deferred<Rep> + Send + Sync,
{
    fn apply(&self, request: Req) -> Deferred<Rep> {
        guarded(|| (self.f)(request))
    }
}

/// Behavior wrapped around a service
pub trait Filter<Req, Rep>: Send + Sync {
    /// Handle `request`, calling `next` when appropriate
    fn apply(&self, request: Req, next: &BoxService<Req, Rep>) -> Deferred<Rep>;
}

impl<Req, Rep, F> Filter<Req, Rep> for Arc<F>
where
    F: Filter<Req, Rep> + ?Sized,
{
    fn apply(&self, request: Req, next: &BoxService<Req, Rep>) -> Deferred<Rep> {
        (**self).apply(request, next)
    }
}

/// Composition helpers for filters
pub trait FilterExt<Req, Rep>: Filter<Req, Rep> + Sized + 'static
where
    Req: 'static,
    Rep: Clone + Send + 'static,
{
    /// Put this filter in front of `service`
    fn and_then<S>(self, service: S) -> Filtered<Req, Rep>
    where
        S: Service<Req, Rep> + 'static,
    {
        Filtered {
            filter: Arc::new(self),
            next: Arc::new(service),
        }
    }

    /// Put this filter in front of another filter
    fn and_then_filter<G>(self, inner: G) -> AndThen<Req, Rep>
    where
        G: Filter<Req, Rep> + 'static,
    {
        AndThen {
            outer: Arc::new(self),
            inner: Arc::new(inner),
        }
    }
}

impl<Req, Rep, F> FilterExt<Req, Rep> for F
where
    F: Filter<Req, Rep> + 'static,
    Req: 'static,
    Rep: Clone + Send + 'static,
{
}

/// A filter applied to a service, usable as a service
pub struct Filtered<Req, Rep> {
    filter: Arc<dyn Filter<Req, Rep>>,
    next: BoxService<Req, Rep>,
}

impl<Req, Rep> Clone for Filtered<Req, Rep> {
    fn clone(&self) -> Self {
        Self {
            filter: self.filter.clone(),
            next: self.next.clone(),
        }
    }
}

impl<Req, Rep> Service<Req, Rep> for Filtered<Req, Rep>
where
    Rep: Clone + Send + 'static,
{
    fn apply(&self, request: Req) -> Deferred<Rep> {
        guarded(|| self.filter.apply(request, &self.next))
    }

    fn close(&self) -> Deferred<()> {
        self.next.close()
    }
}

/// Two filters composed into one
pub struct AndThen<Req, Rep> {
    outer: Arc<dyn Filter<Req, Rep>>,
    inner: Arc<dyn Filter<Req, Rep>>,
}

impl<Req, Rep> Filter<Req, Rep> for AndThen<Req, Rep>
where
    Req: 'static,
    Rep: Clone + Send + 'static,
{
    fn apply(&self, request: Req, next: &BoxService<Req, Rep>) -> Deferred<Rep> {
        let inner: BoxService<Req, Rep> = Arc::new(Filtered {
            filter: self.inner.clone(),
            next: next.clone(),
        });
        self.outer.apply(request, &inner)
    }
}

/// Run `f`, turning a panic into a failed `Deferred`
pub(crate) fn guarded<Rep>(f: impl FnOnce() -> Deferred<Rep>) -> Deferred<Rep>
where
    Rep: Clone + Send + 'static,
{
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Deferred::exception(RpcError::panicked(payload)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Appends its tag to the request and to the reply
    struct Tag(&'static str);

    impl Filter<String, String> for Tag {
        fn apply(&self, request: String, next: &BoxService<String, String>) -> Deferred<String> {
            let tag = self.0;
            next.apply(format!("{}>{}", request, tag))
                .map(move |reply| format!("{}<{}", reply, tag))
        }
    }

    fn echo() -> ServiceFn<impl Fn(String) -> Deferred<String> + Send + Sync> {
        service_fn(|s: String| Deferred::value(s))
    }

    fn reply(d: Deferred<String>) -> Result<String, RpcError> {
        d.poll().expect("reply should be immediate")
    }

    #[test]
    fn test_filter_order() {
        let svc = Tag("a").and_then(Tag("b").and_then(echo()));
        assert_eq!(reply(svc.apply("req".into())).unwrap(), "req>a>b<b<a");
    }

    #[test]
    fn test_composition_is_associative() {
        let left = Tag("a").and_then_filter(Tag("b")).and_then_filter(Tag("c")).and_then(echo());
        let right = Tag("a")
            .and_then_filter(Tag("b").and_then_filter(Tag("c")))
            .and_then(echo());
        let nested = Tag("a").and_then(Tag("b").and_then(Tag("c").and_then(echo())));

        let expected = "x>a>b>c<c<b<a";
        assert_eq!(reply(left.apply("x".into())).unwrap(), expected);
        assert_eq!(reply(right.apply("x".into())).unwrap(), expected);
        assert_eq!(reply(nested.apply("x".into())).unwrap(), expected);
    }

    #[test]
    fn test_short_circuit_filter_skips_service() {
        struct Deny;
        impl Filter<String, String> for Deny {
            fn apply(&self, _: String, _: &BoxService<String, String>) -> Deferred<String> {
                Deferred::exception(RpcError::application("denied"))
            }
        }

        let called = Arc::new(Mutex::new(false));
        let flag = called.clone();
        let svc = Deny.and_then(service_fn(move |s: String| {
            *flag.lock().unwrap() = true;
            Deferred::value(s)
        }));

        assert!(matches!(
            reply(svc.apply("x".into())),
            Err(RpcError::Application { .. })
        ));
        assert!(!*called.lock().unwrap());
    }

    #[test]
    fn test_panicking_filter_becomes_failure() {
        struct Boom;
        impl Filter<String, String> for Boom {
            fn apply(&self, _: String, _: &BoxService<String, String>) -> Deferred<String> {
                panic!("filter exploded")
            }
        }

        let svc = Boom.and_then(echo());
        let err = reply(svc.apply("x".into())).unwrap_err();
        assert!(err.to_string().contains("filter exploded"));
    }

    #[test]
    fn test_panicking_service_becomes_failure() {
        let svc = Tag("a").and_then(service_fn(|_: String| -> Deferred<String> {
            panic!("service exploded")
        }));
        let err = reply(svc.apply("x".into())).unwrap_err();
        assert_eq!(err.kind(), "application");
    }

    #[test]
    fn test_boxed_service_and_close() {
        let svc: BoxService<String, String> = Arc::new(Tag("a").and_then(echo()));
        assert_eq!(reply(svc.apply("x".into())).unwrap(), "x>a<a");
        assert!(svc.close().poll().unwrap().is_ok());
    }
}
