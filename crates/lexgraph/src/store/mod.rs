pub mod delint;
pub mod repository;
pub mod surrogate;

pub use repository::ObjectRepository;
pub use surrogate::Surrogate;
