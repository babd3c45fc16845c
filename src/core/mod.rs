pub mod item;
pub mod mode;
pub mod request;
