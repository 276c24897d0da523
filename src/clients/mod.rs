pub mod database;
pub mod health;
pub mod publisher;
pub mod rbmq;
