use emglab_core::EmgError;

pub const SUCCESS: i32 = 0;
pub const EXECUTION_ERROR: i32 = 1;
pub const INPUT_ERROR: i32 = 2;
pub const PARTIAL_FAILURE: i32 = 3;

/// Problems with the files the user pointed us at are input errors
pub fn for_error(error: &EmgError) -> i32 {
    match error {
        EmgError::Io(_)
        | EmgError::Csv(_)
        | EmgError::MalformedRecording(_)
        | EmgError::EmptyDataset(_)
        | EmgError::WindowTooShort { .. }
        | EmgError::ModelLoad(_)
        | EmgError::FeatureCountMismatch { .. }
        | EmgError::InvalidConfig(_) => INPUT_ERROR,
        _ => EXECUTION_ERROR,
    }
}
