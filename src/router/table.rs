//! Ordered route table with grouping, named routes, constraint patterns and
//! reverse URL generation. Templates compile to anchored regexes at
//! registration time, so matching never recompiles.

use crate::error::RouteError;
use crate::http::Method;
use crate::router::dispatch::{Handler, Middleware};
use crate::router::patterns::PatternRegistry;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

const DEFAULT_FRAGMENT: &str = "[^/]+";

#[derive(Clone, Debug)]
struct ParamSpec {
    name: String,
    optional: bool,
}

pub struct Route {
    pub method: Method,
    pub path: String,
    pub handler: Handler,
    pub middlewares: Vec<Arc<dyn Middleware>>,
    pub name: Option<String>,
    constraints: HashMap<String, String>,
    compiled: Regex,
    params: Vec<ParamSpec>,
}

/// Outcome of matching one request path against the table.
#[derive(Clone, Debug)]
pub struct RouteMatch {
    pub index: usize,
    /// Captured values in template order; empty optional captures dropped.
    pub params: Vec<String>,
}

/// Route table. Routes are keyed by `(method, full path)`: registering the
/// same key again replaces the earlier route in place (last registration
/// wins), keeping its original position in the match order.
pub struct Router {
    routes: Vec<Route>,
    index: HashMap<(Method, String), usize>,
    named: HashMap<String, usize>,
    patterns: PatternRegistry,
    base_path: String,
    base_url: Option<String>,
    group_prefix: String,
    group_middlewares: Vec<Arc<dyn Middleware>>,
}

impl Router {
    pub fn new() -> Self {
        Router {
            routes: Vec::new(),
            index: HashMap::new(),
            named: HashMap::new(),
            patterns: PatternRegistry::new(),
            base_path: String::new(),
            base_url: None,
            group_prefix: String::new(),
            group_middlewares: Vec::new(),
        }
    }

    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        let p = base_path.into();
        let p = p.trim_matches('/');
        self.base_path = if p.is_empty() { String::new() } else { format!("/{p}") };
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Register (or replace) a named constraint fragment.
    pub fn pattern(&mut self, name: impl Into<String>, fragment: impl Into<String>) -> &mut Self {
        self.patterns.insert(name, fragment);
        self
    }

    pub fn get(&mut self, path: &str, handler: Handler) -> Result<RouteHandle<'_>, RouteError> {
        self.register(Method::Get, path, handler)
    }

    pub fn post(&mut self, path: &str, handler: Handler) -> Result<RouteHandle<'_>, RouteError> {
        self.register(Method::Post, path, handler)
    }

    pub fn put(&mut self, path: &str, handler: Handler) -> Result<RouteHandle<'_>, RouteError> {
        self.register(Method::Put, path, handler)
    }

    pub fn delete(&mut self, path: &str, handler: Handler) -> Result<RouteHandle<'_>, RouteError> {
        self.register(Method::Delete, path, handler)
    }

    pub fn patch(&mut self, path: &str, handler: Handler) -> Result<RouteHandle<'_>, RouteError> {
        self.register(Method::Patch, path, handler)
    }

    /// Register one handler under several methods.
    pub fn match_any(
        &mut self,
        methods: &[Method],
        path: &str,
        handler: Handler,
    ) -> Result<(), RouteError> {
        for method in methods {
            self.register(*method, path, handler.clone())?;
        }
        Ok(())
    }

    /// Register one handler under every non-HEAD method.
    pub fn any(&mut self, path: &str, handler: Handler) -> Result<(), RouteError> {
        self.match_any(
            &[
                Method::Get,
                Method::Post,
                Method::Put,
                Method::Patch,
                Method::Delete,
                Method::Options,
            ],
            path,
            handler,
        )
    }

    /// Register the conventional CRUD route set for `base` in one call,
    /// skipping actions left unset. Routes are named `{base}.{action}`;
    /// `create` registers before `show` so its literal segment is not
    /// swallowed by `{id}`.
    pub fn resource(&mut self, base: &str, actions: Resource) -> Result<(), RouteError> {
        let base = format!("/{}", base.trim_matches('/'));
        let stem = base.trim_start_matches('/').replace('/', ".");
        let item = format!("{base}/{{id}}");
        if let Some(h) = actions.index {
            self.get(&base, h)?.name(format!("{stem}.index"));
        }
        if let Some(h) = actions.create {
            self.get(&format!("{base}/create"), h)?
                .name(format!("{stem}.create"));
        }
        if let Some(h) = actions.store {
            self.post(&base, h)?.name(format!("{stem}.store"));
        }
        if let Some(h) = actions.show {
            self.get(&item, h)?.name(format!("{stem}.show"));
        }
        if let Some(h) = actions.edit {
            self.get(&format!("{item}/edit"), h)?
                .name(format!("{stem}.edit"));
        }
        if let Some(h) = actions.update {
            self.put(&item, h.clone())?.name(format!("{stem}.update"));
            self.patch(&item, h)?;
        }
        if let Some(h) = actions.destroy {
            self.delete(&item, h)?.name(format!("{stem}.destroy"));
        }
        Ok(())
    }

    /// Register a route under the current group context. Group middlewares
    /// run before middlewares attached to the returned handle.
    pub fn register(
        &mut self,
        method: Method,
        path: &str,
        handler: Handler,
    ) -> Result<RouteHandle<'_>, RouteError> {
        let full_path = join_paths(&self.group_prefix, path);
        let constraints = HashMap::new();
        let (compiled, params) = compile_template(&full_path, &constraints)?;
        let route = Route {
            method,
            path: full_path.clone(),
            handler,
            middlewares: self.group_middlewares.clone(),
            name: None,
            constraints,
            compiled,
            params,
        };
        let key = (method, full_path);
        let idx = match self.index.get(&key) {
            Some(&existing) => {
                self.routes[existing] = route;
                existing
            }
            None => {
                self.routes.push(route);
                let idx = self.routes.len() - 1;
                self.index.insert(key, idx);
                idx
            }
        };
        Ok(RouteHandle { router: self, idx })
    }

    /// Push a prefix + middleware context, run `f`, pop the context. Nested
    /// groups concatenate prefixes and middleware lists outer to inner.
    pub fn group<F>(
        &mut self,
        prefix: &str,
        middlewares: Vec<Arc<dyn Middleware>>,
        f: F,
    ) -> Result<(), RouteError>
    where
        F: FnOnce(&mut Router) -> Result<(), RouteError>,
    {
        let prev_prefix = std::mem::take(&mut self.group_prefix);
        let prev_count = self.group_middlewares.len();
        self.group_prefix = join_paths(&prev_prefix, prefix);
        if self.group_prefix == "/" {
            self.group_prefix.clear();
        }
        self.group_middlewares.extend(middlewares);
        let result = f(self);
        self.group_prefix = prev_prefix;
        self.group_middlewares.truncate(prev_count);
        result
    }

    /// First matching route in registration order, or None.
    pub fn find(&self, method: Method, path: &str) -> Option<RouteMatch> {
        for (index, route) in self.routes.iter().enumerate() {
            if route.method != method {
                continue;
            }
            if let Some(caps) = route.compiled.captures(path) {
                let params = caps
                    .iter()
                    .skip(1)
                    .flatten()
                    .map(|m| m.as_str().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                return Some(RouteMatch { index, params });
            }
        }
        None
    }

    pub fn route(&self, index: usize) -> &Route {
        &self.routes[index]
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn has_named_route(&self, name: &str) -> bool {
        self.named.contains_key(name)
    }

    /// Build a URL for a named route. A value failing its constraint fails
    /// loudly; a required token left unsubstituted fails loudly; optional
    /// tokens left blank are removed.
    pub fn url_for(
        &self,
        name: &str,
        params: &[(&str, &str)],
        absolute: bool,
    ) -> Result<String, RouteError> {
        let idx = self
            .named
            .get(name)
            .ok_or_else(|| RouteError::UnknownRoute(name.to_string()))?;
        let route = &self.routes[*idx];
        let mut path = route.path.clone();

        for (key, value) in params {
            let required_token = format!("{{{key}}}");
            let optional_token = format!("{{{key}?}}");
            if !path.contains(&required_token) && !path.contains(&optional_token) {
                continue;
            }
            if let Some(fragment) = route.constraints.get(*key) {
                let re = anchored(fragment).map_err(|source| RouteError::BadPattern {
                    param: key.to_string(),
                    source,
                })?;
                if !re.is_match(value) {
                    return Err(RouteError::InvalidParameter {
                        param: key.to_string(),
                        value: value.to_string(),
                    });
                }
            }
            path = path.replace(&required_token, value);
            path = path.replace(&optional_token, value);
        }

        if let Some(caps) = required_token_re().captures(&path) {
            return Err(RouteError::MissingParameter {
                route: name.to_string(),
                param: caps[1].to_string(),
            });
        }
        path = optional_token_re().replace_all(&path, "").into_owned();
        while path.len() > 1 && path.ends_with('/') {
            path.pop();
        }

        let relative = format!("{}{}", self.base_path, path);
        match (absolute, &self.base_url) {
            (true, Some(base)) => Ok(format!("{}{}", base.trim_end_matches('/'), relative)),
            _ => Ok(relative),
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// Handlers for the CRUD actions of [`Router::resource`].
#[derive(Default)]
pub struct Resource {
    index: Option<Handler>,
    create: Option<Handler>,
    store: Option<Handler>,
    show: Option<Handler>,
    edit: Option<Handler>,
    update: Option<Handler>,
    destroy: Option<Handler>,
}

impl Resource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(mut self, h: Handler) -> Self {
        self.index = Some(h);
        self
    }

    pub fn create(mut self, h: Handler) -> Self {
        self.create = Some(h);
        self
    }

    pub fn store(mut self, h: Handler) -> Self {
        self.store = Some(h);
        self
    }

    pub fn show(mut self, h: Handler) -> Self {
        self.show = Some(h);
        self
    }

    pub fn edit(mut self, h: Handler) -> Self {
        self.edit = Some(h);
        self
    }

    /// Registered under both PUT and PATCH.
    pub fn update(mut self, h: Handler) -> Self {
        self.update = Some(h);
        self
    }

    pub fn destroy(mut self, h: Handler) -> Self {
        self.destroy = Some(h);
        self
    }
}

/// Fluent continuation for the route just registered.
pub struct RouteHandle<'r> {
    router: &'r mut Router,
    idx: usize,
}

impl<'r> RouteHandle<'r> {
    /// Name the route for reverse URL generation. Last name wins.
    pub fn name(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.router.routes[self.idx].name = Some(name.clone());
        self.router.named.insert(name, self.idx);
        self
    }

    /// Constrain a template parameter to a registered pattern name or a
    /// literal regex fragment. Fails if the parameter is not in the template.
    pub fn constrain(self, param: &str, constraint: &str) -> Result<Self, RouteError> {
        let fragment = self.router.patterns.resolve(constraint).to_string();
        anchored(&fragment).map_err(|source| RouteError::BadPattern {
            param: param.to_string(),
            source,
        })?;
        let route = &mut self.router.routes[self.idx];
        if !route.params.iter().any(|p| p.name == param) {
            return Err(RouteError::UnknownParameter {
                path: route.path.clone(),
                param: param.to_string(),
            });
        }
        route.constraints.insert(param.to_string(), fragment);
        let (compiled, params) = compile_template(&route.path, &route.constraints)?;
        route.compiled = compiled;
        route.params = params;
        Ok(self)
    }

    /// Append a per-route middleware (runs after group middlewares).
    pub fn middleware(self, mw: Arc<dyn Middleware>) -> Self {
        self.router.routes[self.idx].middlewares.push(mw);
        self
    }
}

fn join_paths(prefix: &str, path: &str) -> String {
    let joined = format!("{}/{}", prefix.trim_end_matches('/'), path.trim_matches('/'));
    let trimmed = joined.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Compile a path template to an anchored regex plus its parameter specs in
/// template order. `{name}` captures its constraint; `{name?}` is optional,
/// folding an immediately preceding `/` into the optional group so the
/// parameter can be omitted entirely.
fn compile_template(
    path: &str,
    constraints: &HashMap<String, String>,
) -> Result<(Regex, Vec<ParamSpec>), RouteError> {
    let mut pattern = String::from("^");
    let mut literal = String::new();
    let mut params = Vec::new();
    let mut chars = path.chars();

    while let Some(c) = chars.next() {
        if c != '{' {
            literal.push(c);
            continue;
        }
        let mut name = String::new();
        for c2 in chars.by_ref() {
            if c2 == '}' {
                break;
            }
            name.push(c2);
        }
        let optional = name.ends_with('?');
        if optional {
            name.pop();
        }
        let fragment = constraints
            .get(&name)
            .map(String::as_str)
            .unwrap_or(DEFAULT_FRAGMENT);
        if optional && literal.ends_with('/') {
            literal.pop();
            pattern.push_str(&regex::escape(&literal));
            pattern.push_str(&format!("(?:/({fragment}))?"));
        } else {
            pattern.push_str(&regex::escape(&literal));
            if optional {
                pattern.push_str(&format!("({fragment})?"));
            } else {
                pattern.push_str(&format!("({fragment})"));
            }
        }
        literal.clear();
        params.push(ParamSpec { name, optional });
    }
    pattern.push_str(&regex::escape(&literal));
    pattern.push('$');

    let compiled = Regex::new(&pattern).map_err(|source| RouteError::BadPattern {
        param: path.to_string(),
        source,
    })?;
    Ok((compiled, params))
}

fn anchored(fragment: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{fragment})$"))
}

fn required_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([^}?]+)\}").expect("static pattern"))
}

fn optional_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{[^}]+\?\}").expect("static pattern"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Request, Response};
    use crate::router::dispatch::handler;

    fn noop() -> Handler {
        handler(|_req: Request, _params: Vec<String>| async { Ok(Response::ok("")) })
    }

    #[test]
    fn first_registered_match_wins() {
        let mut router = Router::new();
        router.get("/rooms/{id}", noop()).unwrap().name("by_id").constrain("id", "any").unwrap();
        router.get("/rooms/{slug}", noop()).unwrap().name("by_slug");
        let m = router.find(Method::Get, "/rooms/42").unwrap();
        assert_eq!(router.route(m.index).name.as_deref(), Some("by_id"));
    }

    #[test]
    fn registration_is_keyed_last_wins() {
        let mut router = Router::new();
        router.get("/a", noop()).unwrap().name("first");
        router.get("/a", noop()).unwrap().name("second");
        assert_eq!(router.len(), 1);
        let m = router.find(Method::Get, "/a").unwrap();
        assert_eq!(router.route(m.index).name.as_deref(), Some("second"));
    }

    #[test]
    fn constraint_narrows_match() {
        let mut router = Router::new();
        router
            .get("/users/{id}", noop())
            .unwrap()
            .constrain("id", "int")
            .unwrap();
        assert!(router.find(Method::Get, "/users/7").is_some());
        assert!(router.find(Method::Get, "/users/seven").is_none());
    }

    #[test]
    fn constraining_unknown_parameter_fails() {
        let mut router = Router::new();
        let result = router
            .get("/users/{id}", noop())
            .unwrap()
            .constrain("slug", "any");
        let Err(err) = result else {
            panic!("constraint on a parameter absent from the template must fail");
        };
        assert!(matches!(err, RouteError::UnknownParameter { param, .. } if param == "slug"));
    }

    #[test]
    fn method_must_match() {
        let mut router = Router::new();
        router.post("/submit", noop()).unwrap();
        assert!(router.find(Method::Get, "/submit").is_none());
        assert!(router.find(Method::Post, "/submit").is_some());
    }

    #[test]
    fn params_extracted_in_template_order() {
        let mut router = Router::new();
        router.get("/rooms/{room}/computers/{computer}", noop()).unwrap();
        let m = router.find(Method::Get, "/rooms/3/computers/14").unwrap();
        assert_eq!(m.params, vec!["3".to_string(), "14".to_string()]);
    }

    #[test]
    fn optional_parameter_may_be_omitted() {
        let mut router = Router::new();
        router
            .get("/show/{id?}", noop())
            .unwrap()
            .constrain("id", "int")
            .unwrap();
        let with = router.find(Method::Get, "/show/9").unwrap();
        assert_eq!(with.params, vec!["9".to_string()]);
        let without = router.find(Method::Get, "/show").unwrap();
        assert!(without.params.is_empty());
    }

    #[test]
    fn nested_groups_concatenate_prefixes() {
        let mut router = Router::new();
        router
            .group("/a", Vec::new(), |r| {
                r.group("/b", Vec::new(), |r| {
                    r.get("/c", noop())?.name("abc");
                    Ok(())
                })
            })
            .unwrap();
        assert!(router.find(Method::Get, "/a/b/c").is_some());
        assert_eq!(router.url_for("abc", &[], false).unwrap(), "/a/b/c");
    }

    #[test]
    fn group_context_is_popped_after_use() {
        let mut router = Router::new();
        router
            .group("/admin", Vec::new(), |r| {
                r.get("/panel", noop())?;
                Ok(())
            })
            .unwrap();
        router.get("/home", noop()).unwrap();
        assert!(router.find(Method::Get, "/home").is_some());
        assert!(router.find(Method::Get, "/admin/home").is_none());
    }

    #[test]
    fn url_for_substitutes_and_validates() {
        let mut router = Router::new();
        router
            .get("/users/{id}", noop())
            .unwrap()
            .name("users.show")
            .constrain("id", "int")
            .unwrap();
        assert_eq!(router.url_for("users.show", &[("id", "12")], false).unwrap(), "/users/12");

        let err = router.url_for("users.show", &[("id", "abc")], false).unwrap_err();
        assert!(matches!(err, RouteError::InvalidParameter { param, .. } if param == "id"));
    }

    #[test]
    fn url_for_missing_required_parameter_fails() {
        let mut router = Router::new();
        router.get("/users/{id}", noop()).unwrap().name("users.show");
        let err = router.url_for("users.show", &[], false).unwrap_err();
        assert!(matches!(err, RouteError::MissingParameter { param, .. } if param == "id"));
    }

    #[test]
    fn url_for_blank_optional_is_removed() {
        let mut router = Router::new();
        router.get("/show/{id?}", noop()).unwrap().name("show");
        assert_eq!(router.url_for("show", &[], false).unwrap(), "/show");
        assert_eq!(router.url_for("show", &[("id", "4")], false).unwrap(), "/show/4");
    }

    #[test]
    fn url_for_unknown_name_fails() {
        let router = Router::new();
        assert!(matches!(
            router.url_for("nope", &[], false),
            Err(RouteError::UnknownRoute(_))
        ));
    }

    #[test]
    fn url_for_absolute_uses_base_url_and_path() {
        let mut router = Router::new()
            .with_base_path("jcmvc")
            .with_base_url("https://example.com");
        router.get("/contact", noop()).unwrap().name("contact");
        assert_eq!(router.url_for("contact", &[], false).unwrap(), "/jcmvc/contact");
        assert_eq!(
            router.url_for("contact", &[], true).unwrap(),
            "https://example.com/jcmvc/contact"
        );
    }

    #[test]
    fn custom_pattern_is_usable_as_constraint() {
        let mut router = Router::new();
        router.pattern("year", r"(?:19|20)\d{2}");
        router
            .get("/archive/{year}", noop())
            .unwrap()
            .constrain("year", "year")
            .unwrap();
        assert!(router.find(Method::Get, "/archive/1999").is_some());
        assert!(router.find(Method::Get, "/archive/2999").is_none());
    }

    #[test]
    fn resource_registers_the_crud_set() {
        let mut router = Router::new();
        router
            .resource(
                "photos",
                Resource::new()
                    .index(noop())
                    .create(noop())
                    .store(noop())
                    .show(noop())
                    .edit(noop())
                    .update(noop())
                    .destroy(noop()),
            )
            .unwrap();
        // The literal create segment wins over {id}.
        let m = router.find(Method::Get, "/photos/create").unwrap();
        assert_eq!(router.route(m.index).name.as_deref(), Some("photos.create"));
        assert!(router.find(Method::Get, "/photos").is_some());
        assert!(router.find(Method::Post, "/photos").is_some());
        assert!(router.find(Method::Get, "/photos/9/edit").is_some());
        assert!(router.find(Method::Put, "/photos/9").is_some());
        assert!(router.find(Method::Patch, "/photos/9").is_some());
        assert!(router.find(Method::Delete, "/photos/9").is_some());
        assert_eq!(
            router.url_for("photos.show", &[("id", "9")], false).unwrap(),
            "/photos/9"
        );
    }

    #[test]
    fn partial_resource_skips_absent_actions() {
        let mut router = Router::new();
        router
            .resource("rooms", Resource::new().index(noop()).show(noop()))
            .unwrap();
        assert_eq!(router.len(), 2);
        assert!(router.find(Method::Post, "/rooms").is_none());
    }

    #[test]
    fn root_route_matches_root_only() {
        let mut router = Router::new();
        router.get("/", noop()).unwrap();
        assert!(router.find(Method::Get, "/").is_some());
        assert!(router.find(Method::Get, "/x").is_none());
    }
}
