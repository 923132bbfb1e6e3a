//! Request dispatch: normalize, match, run the middleware chain, invoke the
//! handler. The dispatcher is the top-level error boundary: nothing escapes
//! it un-logged or un-converted to a response.

use crate::error::{AppError, RouteError};
use crate::http::{Request, Response};
use crate::router::table::Router;
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Response, AppError>> + Send>>;

/// A route handler: receives the request and the extracted path parameters in
/// template order.
pub type Handler = Arc<dyn Fn(Request, Vec<String>) -> HandlerFuture + Send + Sync>;

/// Wrap an async function or closure as a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Request, Vec<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, AppError>> + Send + 'static,
{
    Arc::new(move |req, params| Box::pin(f(req, params)))
}

/// Middleware decision: continue down the chain, or stop with the response
/// the middleware produced. A halting middleware owns the response; the
/// handler is never invoked.
pub enum Next {
    Continue,
    Halt(Response),
}

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, request: &Request) -> Result<Next, AppError>;
}

pub struct Dispatcher {
    router: Router,
    global_middlewares: Vec<Arc<dyn Middleware>>,
    not_found: Option<Handler>,
    debug: bool,
}

impl Dispatcher {
    pub fn new(router: Router) -> Self {
        Dispatcher {
            router,
            global_middlewares: Vec::new(),
            not_found: None,
            debug: false,
        }
    }

    /// Emit detailed error bodies instead of generic messages.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Global middleware, run before any per-route middleware, in the order
    /// added.
    pub fn add_middleware(&mut self, mw: Arc<dyn Middleware>) -> &mut Self {
        self.global_middlewares.push(mw);
        self
    }

    /// Custom handler for unmatched requests (replaces the default 404).
    pub fn set_not_found(&mut self, handler: Handler) -> &mut Self {
        self.not_found = Some(handler);
        self
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Dispatch a request to a response. Never returns an error: failures are
    /// logged and converted at this boundary.
    pub async fn dispatch(&self, request: Request) -> Response {
        let method = request.method;
        let path = request.path.clone();
        match self.run(request).await {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(%method, %path, error = %err, "request failed");
                err.to_response(self.debug)
            }
        }
    }

    async fn run(&self, request: Request) -> Result<Response, AppError> {
        let path = normalize_path(&request.path);

        let Some(found) = self.router.find(request.method, &path) else {
            if let Some(h) = &self.not_found {
                return h(request, Vec::new()).await;
            }
            return Err(RouteError::NotFound {
                method: request.method.to_string(),
                path,
            }
            .into());
        };

        let route = self.router.route(found.index);
        for mw in self.global_middlewares.iter().chain(route.middlewares.iter()) {
            if let Next::Halt(response) = mw.handle(&request).await? {
                return Ok(response);
            }
        }
        (route.handler)(request, found.params).await
    }
}

/// Strip trailing slashes except for the root path.
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;
    use std::sync::Mutex;

    fn echo(label: &'static str) -> Handler {
        handler(move |_req: Request, params: Vec<String>| async move {
            Ok(Response::ok(format!("{label}:{}", params.join(","))))
        })
    }

    /// Records its tag into a shared log, then continues or halts.
    struct Tagged {
        tag: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        halt: bool,
    }

    #[async_trait]
    impl Middleware for Tagged {
        async fn handle(&self, _request: &Request) -> Result<Next, AppError> {
            self.log.lock().unwrap().push(self.tag);
            if self.halt {
                Ok(Next::Halt(Response::text(403, "halted")))
            } else {
                Ok(Next::Continue)
            }
        }
    }

    fn tagged(tag: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Arc<dyn Middleware> {
        Arc::new(Tagged {
            tag,
            log: log.clone(),
            halt: false,
        })
    }

    #[tokio::test]
    async fn dispatch_binds_positional_params() {
        let mut router = Router::new();
        router.get("/rooms/{room}/computers/{pc}", echo("show")).unwrap();
        let d = Dispatcher::new(router);
        let resp = d.dispatch(Request::new(Method::Get, "/rooms/2/computers/9")).await;
        assert_eq!(resp.body, "show:2,9");
    }

    #[tokio::test]
    async fn trailing_slash_is_normalized() {
        let mut router = Router::new();
        router.get("/contact", echo("contact")).unwrap();
        let d = Dispatcher::new(router);
        let resp = d.dispatch(Request::new(Method::Get, "/contact/")).await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, "contact:");
    }

    #[tokio::test]
    async fn unmatched_request_is_404() {
        let d = Dispatcher::new(Router::new());
        let resp = d.dispatch(Request::new(Method::Get, "/nope")).await;
        assert_eq!(resp.status, 404);
    }

    #[tokio::test]
    async fn custom_not_found_handler_is_used() {
        let mut d = Dispatcher::new(Router::new());
        d.set_not_found(handler(|_req, _params| async {
            Ok(Response::html(404, "<h1>lost</h1>"))
        }));
        let resp = d.dispatch(Request::new(Method::Get, "/nope")).await;
        assert_eq!(resp.status, 404);
        assert_eq!(resp.body, "<h1>lost</h1>");
    }

    #[tokio::test]
    async fn global_middlewares_run_before_route_middlewares() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut router = Router::new();
        router
            .group("/a", vec![tagged("group_a", &log)], |r| {
                r.group("/b", vec![tagged("group_b", &log)], |r| {
                    r.get("/c", echo("c"))?;
                    Ok(())
                })
            })
            .unwrap();
        let mut d = Dispatcher::new(router);
        d.add_middleware(tagged("global", &log));
        let resp = d.dispatch(Request::new(Method::Get, "/a/b/c")).await;
        assert_eq!(resp.status, 200);
        assert_eq!(*log.lock().unwrap(), vec!["global", "group_a", "group_b"]);
    }

    #[tokio::test]
    async fn halting_middleware_short_circuits() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut router = Router::new();
        router.get("/secret", echo("secret")).unwrap().middleware(Arc::new(Tagged {
            tag: "gate",
            log: log.clone(),
            halt: true,
        }));
        let d = Dispatcher::new(router);
        let resp = d.dispatch(Request::new(Method::Get, "/secret")).await;
        assert_eq!(resp.status, 403);
        assert_eq!(resp.body, "halted");
        assert_eq!(*log.lock().unwrap(), vec!["gate"]);
    }

    #[tokio::test]
    async fn handler_error_is_converted_generically() {
        let mut router = Router::new();
        router
            .get("/boom", handler(|_req, _params| async {
                Err(AppError::Handler("kaput".to_string()))
            }))
            .unwrap();
        let d = Dispatcher::new(router);
        let resp = d.dispatch(Request::new(Method::Get, "/boom")).await;
        assert_eq!(resp.status, 500);
        assert!(!resp.body.contains("kaput"));
    }

    #[tokio::test]
    async fn debug_mode_exposes_error_detail() {
        let mut router = Router::new();
        router
            .get("/boom", handler(|_req, _params| async {
                Err(AppError::Handler("kaput".to_string()))
            }))
            .unwrap();
        let d = Dispatcher::new(router).debug(true);
        let resp = d.dispatch(Request::new(Method::Get, "/boom")).await;
        assert_eq!(resp.status, 500);
        assert!(resp.body.contains("kaput"));
    }
}
