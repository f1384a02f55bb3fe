//! Process coordination: graceful shutdown.

pub mod shutdown;

pub use shutdown::{
    wait_for_os_signal, GracefulShutdown, ShutdownConfig, ShutdownPhase, ShutdownSignal,
    ShutdownToken,
};
