pub mod config;
pub mod console;
pub mod device;
pub mod fetcher;
pub mod http_client;
pub mod link;
pub mod live;
pub mod ota;
pub mod reboot;
pub mod retry;
pub mod services;
pub mod session;
pub mod status;
pub mod timer;
pub mod view;
pub mod watchdog;

pub use link::WinderLink;
