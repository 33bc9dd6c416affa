pub mod auth;
pub mod collaborators;
pub mod coordinator;
pub mod errors;
pub mod events;
pub mod models;
pub mod providers;
pub mod stream;
pub mod turn;
