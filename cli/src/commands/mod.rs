pub mod agent;
pub mod events;
pub mod export;
pub mod health;
pub mod init;
pub mod ml;
pub mod run;
pub mod status;
pub mod sync;
