pub mod detect;
pub mod models;
pub mod predict;
pub mod train;
