pub mod admin;
pub mod list;
pub mod run;
