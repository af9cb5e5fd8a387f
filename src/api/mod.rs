pub mod repos;
pub mod search;
