pub mod bind;
pub mod lifecycle;
