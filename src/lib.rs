//! Switchyard: a host- and path-routing reverse proxy.

pub mod admin;
pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod proxy;
pub mod routing;
pub mod security;
pub mod upstream;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::{start, RunningProxy, Shutdown};
pub use routing::{RouteTable, RouteTableHandle};
