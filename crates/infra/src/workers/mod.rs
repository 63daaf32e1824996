pub mod reclassify_worker;

pub use reclassify_worker::{ReclassifyWorker, WorkerHandle};
