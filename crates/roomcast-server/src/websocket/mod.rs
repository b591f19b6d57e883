//! Per-connection session handles and the read/write loops behind them.

pub mod connection;
pub mod session;
