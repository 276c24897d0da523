pub mod event;
pub mod health;
pub mod queue;
pub mod response;
pub mod retry;
pub mod status;
