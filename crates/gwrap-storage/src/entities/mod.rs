pub mod request_logs;

pub use request_logs::Entity as RequestLogs;
