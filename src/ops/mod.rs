pub mod hierarchy;
pub mod reminder;
pub mod view;
