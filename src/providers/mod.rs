pub mod busy;
pub mod container;
