pub mod cold_resume_handler;
pub mod resume_manager;
pub mod warm_resume_manager;
