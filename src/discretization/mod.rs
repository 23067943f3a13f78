pub mod axis;
pub mod field;
pub mod stencil;
pub mod time;
