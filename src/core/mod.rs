pub mod dirstore;
pub mod marker;
pub mod models;
pub mod msgstore;
pub mod notify;
pub mod search;
pub mod sort;
pub mod threads;
pub mod tree;
