pub mod api;
pub mod pagos;
