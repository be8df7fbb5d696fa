// Configuration file and display preferences
pub mod config;

// Wire envelopes and validation
pub mod event;

// Reconnecting real-time channel
pub mod channel;

// Bus-stop kiosk client
pub mod kiosk;

// Operator dashboard
pub mod dashboard;
