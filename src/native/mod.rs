pub mod container;
pub mod transmission;
