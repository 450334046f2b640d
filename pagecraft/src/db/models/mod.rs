pub mod credits;
pub mod projects;
pub mod users;
