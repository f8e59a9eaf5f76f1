use std::{
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use reqwest::Url;

use crate::{Call, CallFactory, DispatchError, QosCondition, Request, UrlSelector};

/// Default ceiling on server-directed redirects per dispatcher.
pub const DEFAULT_MAX_REDIRECTS: usize = 20;

/// Computes the next call after a QoS failure.
///
/// One dispatcher is shared by every request of a client. The redirect
/// budget is counted across all of them for the dispatcher's lifetime, not
/// per request.
pub struct QosDispatcher {
    urls: Arc<dyn UrlSelector>,
    calls: Arc<dyn CallFactory>,
    num_redirects: AtomicUsize,
    max_redirects: usize,
}

impl fmt::Debug for QosDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QosDispatcher")
            .field(
                "base_urls",
                &self
                    .urls
                    .base_urls()
                    .iter()
                    .map(Url::as_str)
                    .collect::<Vec<_>>(),
            )
            .field("redirects_used", &self.redirects_used())
            .field("max_redirects", &self.max_redirects)
            .finish()
    }
}

impl QosDispatcher {
    pub fn new(urls: Arc<dyn UrlSelector>, calls: Arc<dyn CallFactory>) -> Self {
        Self {
            urls,
            calls,
            num_redirects: AtomicUsize::new(0),
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }

    /// Overrides the redirect ceiling.
    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    pub fn max_redirects(&self) -> usize {
        self.max_redirects
    }

    /// Number of `RetryOther` redirects honored so far.
    pub fn redirects_used(&self) -> usize {
        self.num_redirects.load(Ordering::SeqCst)
    }

    pub fn url_selector(&self) -> &Arc<dyn UrlSelector> {
        &self.urls
    }

    pub fn call_factory(&self) -> &Arc<dyn CallFactory> {
        &self.calls
    }

    /// Returns the call to issue after `previous` failed with `condition`.
    ///
    /// - `Throttle`: an unsent clone of `previous`.
    /// - `Unavailable`: the same request moved to the next host in rotation.
    /// - `RetryOther`: the same request moved to the validated redirect
    ///   target; consumes one unit of the redirect budget.
    pub fn next_call(
        &self,
        previous: &Call,
        condition: &QosCondition,
    ) -> Result<Call, DispatchError> {
        match condition {
            QosCondition::Throttle { .. } => Ok(self.calls.clone_call(previous)),
            QosCondition::Unavailable => self.next_host(previous.request()),
            QosCondition::RetryOther(target) => self.redirect(previous.request(), target),
        }
    }

    fn next_host(&self, previous: &Request) -> Result<Call, DispatchError> {
        let redirect_to = self
            .urls
            .redirect_to_next(previous.url())
            .ok_or_else(|| DispatchError::NoNextUrl {
                url: previous.url().clone(),
            })?;

        #[cfg(feature = "tracing")]
        tracing::debug!(from = %previous.url(), to = %redirect_to, "failing over to next host");

        Ok(self.redirected_call(previous, redirect_to))
    }

    fn redirect(&self, previous: &Request, target: &str) -> Result<Call, DispatchError> {
        if !self.try_consume_redirect() {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                url = %previous.url(),
                max_redirects = self.max_redirects,
                "redirect budget exhausted"
            );
            return Err(DispatchError::RedirectBudgetExceeded {
                url: previous.url().clone(),
                max_redirects: self.max_redirects,
            });
        }

        let redirect_to = self
            .urls
            .redirect_to(previous.url(), target)
            .ok_or_else(|| DispatchError::UnresolvedRedirect {
                location: target.to_owned(),
                base_urls: self.urls.base_urls(),
            })?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            from = %previous.url(),
            to = %redirect_to,
            redirects_used = self.redirects_used(),
            "following server redirect"
        );

        Ok(self.redirected_call(previous, redirect_to))
    }

    // Check and increment in one CAS step; the counter never moves past the
    // ceiling.
    fn try_consume_redirect(&self) -> bool {
        let max = self.max_redirects;
        self.num_redirects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < max).then_some(used + 1)
            })
            .is_ok()
    }

    fn redirected_call(&self, previous: &Request, redirect_to: Url) -> Call {
        self.calls.new_call(previous.with_url(redirect_to))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread,
    };

    use reqwest::{
        header::{HeaderValue, AUTHORIZATION},
        Method, Url,
    };

    use super::{QosDispatcher, DEFAULT_MAX_REDIRECTS};
    use crate::{Call, CallFactory, DispatchError, QosCondition, Request, UrlSelector};

    struct FixedSelector {
        next: Option<Url>,
        redirect: Option<Url>,
    }

    impl UrlSelector for FixedSelector {
        fn redirect_to_next(&self, _current: &Url) -> Option<Url> {
            self.next.clone()
        }

        fn redirect_to(&self, _current: &Url, target: &str) -> Option<Url> {
            self.redirect
                .clone()
                .filter(|resolved| resolved.as_str().trim_end_matches('/') == target)
        }

        fn base_urls(&self) -> Vec<Url> {
            vec![Url::parse("https://a").unwrap(), Url::parse("https://b").unwrap()]
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        built: AtomicUsize,
        cloned: AtomicUsize,
    }

    impl CallFactory for CountingFactory {
        fn new_call(&self, request: Request) -> Call {
            self.built.fetch_add(1, Ordering::SeqCst);
            Call::new(request)
        }

        fn clone_call(&self, call: &Call) -> Call {
            self.cloned.fetch_add(1, Ordering::SeqCst);
            call.clone()
        }
    }

    fn previous_call() -> Call {
        Call::new(
            Request::new(Method::POST, Url::parse("https://a/api/things").unwrap())
                .with_header(AUTHORIZATION, HeaderValue::from_static("Bearer t"))
                .with_body(b"payload".to_vec()),
        )
    }

    fn dispatcher(
        next: Option<&str>,
        redirect: Option<&str>,
    ) -> (QosDispatcher, Arc<CountingFactory>) {
        let selector = FixedSelector {
            next: next.map(|raw| Url::parse(raw).unwrap()),
            redirect: redirect.map(|raw| Url::parse(raw).unwrap()),
        };
        let factory = Arc::new(CountingFactory::default());
        (
            QosDispatcher::new(Arc::new(selector), factory.clone()),
            factory,
        )
    }

    #[test]
    fn throttle_clones_previous_call() {
        let (dispatcher, factory) = dispatcher(None, None);
        let previous = previous_call();

        let next = dispatcher
            .next_call(&previous, &QosCondition::throttle())
            .unwrap();

        assert_eq!(next, previous);
        assert_eq!(factory.cloned.load(Ordering::SeqCst), 1);
        assert_eq!(factory.built.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.redirects_used(), 0);
    }

    #[test]
    fn unavailable_moves_request_to_next_host() {
        let (dispatcher, factory) = dispatcher(Some("https://b/api/things"), None);
        let previous = previous_call();

        let next = dispatcher
            .next_call(&previous, &QosCondition::Unavailable)
            .unwrap();

        assert_eq!(next.request().url().as_str(), "https://b/api/things");
        assert_eq!(next.request().method(), previous.request().method());
        assert_eq!(next.request().headers(), previous.request().headers());
        assert_eq!(next.request().body(), previous.request().body());
        assert_eq!(factory.built.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.redirects_used(), 0);
    }

    #[test]
    fn unavailable_without_next_host_is_resolution_failure() {
        let (dispatcher, _) = dispatcher(None, None);

        let err = dispatcher
            .next_call(&previous_call(), &QosCondition::Unavailable)
            .expect_err("no next host must fail");

        assert!(matches!(err, DispatchError::NoNextUrl { .. }));
        assert!(err.is_resolution_failure());
        assert!(err.to_string().contains("failed to determine valid next URL"));
        assert_eq!(dispatcher.redirects_used(), 0);
    }

    #[test]
    fn retry_other_moves_request_to_resolved_target() {
        let (dispatcher, _) = dispatcher(None, Some("https://b"));
        let previous = previous_call();

        let next = dispatcher
            .next_call(&previous, &QosCondition::retry_other("https://b"))
            .unwrap();

        assert_eq!(next.request().url().as_str(), "https://b/");
        assert_eq!(next.request().body(), Some(&b"payload"[..]));
        assert_eq!(dispatcher.redirects_used(), 1);
    }

    #[test]
    fn retry_other_unresolved_names_target_and_base_urls() {
        let (dispatcher, _) = dispatcher(None, Some("https://b"));

        let err = dispatcher
            .next_call(&previous_call(), &QosCondition::retry_other("https://c"))
            .expect_err("unknown target must fail");

        match &err {
            DispatchError::UnresolvedRedirect {
                location,
                base_urls,
            } => {
                assert_eq!(location, "https://c");
                assert_eq!(base_urls.len(), 2);
            }
            other => panic!("expected unresolved redirect, got {other:?}"),
        }
        assert!(err.is_resolution_failure());
    }

    #[test]
    fn twenty_first_redirect_exceeds_budget() {
        let (dispatcher, _) = dispatcher(None, Some("https://b"));
        let previous = previous_call();
        let condition = QosCondition::retry_other("https://b");

        for _ in 0..DEFAULT_MAX_REDIRECTS {
            let next = dispatcher.next_call(&previous, &condition).unwrap();
            assert_eq!(next.request().url().as_str(), "https://b/");
        }

        let err = dispatcher
            .next_call(&previous, &condition)
            .expect_err("21st redirect must fail");
        assert!(err.is_redirect_budget_exceeded());
        assert!(err.to_string().contains("https://a/api/things"));
        assert_eq!(dispatcher.redirects_used(), DEFAULT_MAX_REDIRECTS);
    }

    #[test]
    fn exhausted_budget_fails_even_when_target_is_unresolvable() {
        let (dispatcher, _) = dispatcher(None, None);
        let dispatcher = dispatcher.with_max_redirects(0);

        let err = dispatcher
            .next_call(&previous_call(), &QosCondition::retry_other("https://b"))
            .expect_err("budget must be checked first");
        assert!(err.is_redirect_budget_exceeded());
    }

    #[test]
    fn unresolved_redirect_still_consumes_budget() {
        let (dispatcher, factory) = dispatcher(None, Some("https://b"));
        assert_eq!(dispatcher.redirects_used(), 0);

        let err = dispatcher
            .next_call(&previous_call(), &QosCondition::retry_other("https://c"))
            .expect_err("unknown target must fail");

        assert!(matches!(err, DispatchError::UnresolvedRedirect { .. }));
        assert_eq!(dispatcher.redirects_used(), 1);
        assert_eq!(factory.built.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn budget_is_shared_across_requests() {
        let (dispatcher, _) = dispatcher(None, Some("https://b"));
        let dispatcher = dispatcher.with_max_redirects(2);
        let condition = QosCondition::retry_other("https://b");
        let first = previous_call();
        let second = Call::new(Request::get(Url::parse("https://a/other").unwrap()));

        dispatcher.next_call(&first, &condition).unwrap();
        dispatcher.next_call(&second, &condition).unwrap();
        assert!(dispatcher
            .next_call(&first, &condition)
            .unwrap_err()
            .is_redirect_budget_exceeded());
        assert!(dispatcher
            .next_call(&second, &QosCondition::throttle())
            .is_ok());
    }

    #[test]
    fn concurrent_redirects_never_exceed_budget() {
        let (dispatcher, _) = dispatcher(None, Some("https://b"));
        let successes = AtomicUsize::new(0);
        let failures = AtomicUsize::new(0);
        let condition = QosCondition::retry_other("https://b");

        thread::scope(|scope| {
            for _ in 0..64 {
                scope.spawn(|| {
                    match dispatcher.next_call(&previous_call(), &condition) {
                        Ok(_) => successes.fetch_add(1, Ordering::SeqCst),
                        Err(err) => {
                            assert!(err.is_redirect_budget_exceeded());
                            failures.fetch_add(1, Ordering::SeqCst)
                        }
                    };
                });
            }
        });

        assert_eq!(successes.load(Ordering::SeqCst), DEFAULT_MAX_REDIRECTS);
        assert_eq!(failures.load(Ordering::SeqCst), 64 - DEFAULT_MAX_REDIRECTS);
        assert_eq!(dispatcher.redirects_used(), DEFAULT_MAX_REDIRECTS);
    }
}
