//! Stages of the metrics pipeline.
//!
//! The [`scheduler::Pipeline`] drives all other stages: it registers capacity once through the
//! [`registrar`], then repeatedly collects samples with the [`scrape`] client and hands them to the
//! [`dispatch`]er. The [`reporter`] runs on its own task and reads the delivery count.

pub mod dispatch;
pub mod registrar;
pub mod reporter;
pub mod scheduler;
pub mod scrape;
