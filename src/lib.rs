pub mod client;
pub mod config;
pub mod frame;
pub mod history;
pub mod logging;
pub mod params;
pub mod playback;
pub mod present;
pub mod remote;
pub mod runner;
pub mod series;
pub mod synthetic;
