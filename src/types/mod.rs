pub mod drive;
pub mod search;
