pub mod artifacts;
pub mod config;
pub mod discovery;
pub mod extract;
pub mod fetch;
pub mod loader;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod resolver;

pub mod util {
    pub mod db;
    pub mod env;
}
