pub mod material;
pub mod principal;
pub mod request;
