pub mod fd_model;
pub mod solution;
