//! SeaORM entity definitions for the tables the workers read and write.

pub mod app_config;
pub mod junit_test_result;
pub mod notification;
pub mod repository_case;
pub mod repository_case_link;
pub mod test_run;
pub mod test_run_case;
pub mod test_run_result;
pub mod user;
pub mod user_preferences;
