pub mod endpoints;
pub mod loopback;
pub mod service;
pub mod tokens;

pub use endpoints::{GoogleOauthEndpoints, TokenEndpoint};
pub use service::{GoogleOauthService, SystemBrowser, UrlOpener};
pub use tokens::TokenSet;
