// State machine module for fault task orchestration
//
// Task status transitions and the substage cursors used by multi-step
// executors to checkpoint their progress.

pub mod events;
pub mod states;
pub mod substages;

pub use events::{determine_target_status, TaskEvent};
pub use states::{TaskStatus, TaskType};
pub use substages::{CommandSubstage, TriggerSubstage};
