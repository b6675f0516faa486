mod auth;

pub use auth::UserContext;
