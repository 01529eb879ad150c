pub mod backup_service;
pub mod date_parser;
pub mod db_utils;
pub mod employee_cache;
pub mod resource_monitor;
pub mod thread_manager;
pub mod validator;
