//! Operations behind the api endpoints. Each takes the shared store and the
//! resolved requester and returns a serialisable view.

pub mod annotate;
pub mod ingredients;
pub mod recipes;
pub mod relations;
pub mod shopping_list;
pub mod tags;
pub mod toggles;
pub mod users;
