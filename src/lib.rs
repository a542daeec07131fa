pub mod database {
    pub mod actions;
    pub mod error;
    pub mod form;
    #[cfg(test)]
    pub mod memory;
    pub mod pagination;
    pub mod postgres;
    pub mod schema;
    pub mod store;
}
pub mod authentication {
    pub mod cryptography;
    pub mod jwt;
    pub mod middleware;
    pub mod permissions;
}
pub mod config;
mod constants;
pub mod export;
pub mod media;
pub mod reply;

pub use authentication::*;
pub use constants::*;
pub use database::*;
