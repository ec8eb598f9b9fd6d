//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The default number of workers draining the task list.
pub const DEFAULT_WORKER_COUNT: usize = 5;

/// The default number of retry passes over failed tasks.
pub const DEFAULT_RETRIES: usize = 2;

/// The default serialization format of the success-images output.
pub const DEFAULT_OUTPUT_IMAGES_FORMAT: &str = "yaml";
