//! Background scheduling for sinbin-daemon

mod reconciler;

pub use reconciler::Scheduler;
