//! Lógica compartida del pipeline: staging en batches, generación del DAG,
//! envío y seguimiento de jobs, índice de eventos y merge de bases SQLite.

pub mod batch;
pub mod config;
pub mod dag;
pub mod error;
pub mod frames;
pub mod generator;
pub mod index;
pub mod input;
pub mod job;
pub mod merge;
pub mod monitor;
pub mod scheduler;
pub mod status;

pub use batch::{partition, Batch, BatchSplitter};
pub use config::{JobConfig, JobLayout, MergeConfig, MonitorConfig, PipelineConfig};
pub use dag::Dag;
pub use error::{PipelineError, Result};
pub use frames::{count_physics_frames, EventCount, FrameReader, JsonLinesFrames};
pub use generator::JobGenerator;
pub use index::{CountDir, EventCounts, EventIndex, EventIndexEntry, MergeOrder};
pub use input::InputFile;
pub use job::{JobRunStatus, JobSpec};
pub use merge::{DbMerger, MergeReport};
pub use monitor::{Monitor, MonitorReport, MonitorState};
pub use scheduler::{CondorScheduler, Scheduler};
pub use status::{DagmanLog, StatusSource};
