pub mod auth;
pub mod pagos;
