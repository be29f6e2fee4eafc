mod admin;
mod proxy;

pub use admin::admin_router;
pub use proxy::{ProxyState, proxy_router};
