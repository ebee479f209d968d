pub mod layout;
pub mod types;
