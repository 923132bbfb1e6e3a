pub mod dispatch;
pub mod patterns;
pub mod table;

pub use dispatch::{handler, Dispatcher, Handler, Middleware, Next};
pub use patterns::PatternRegistry;
pub use table::{Resource, Route, RouteHandle, RouteMatch, Router};
