pub mod frame;
pub mod price;
