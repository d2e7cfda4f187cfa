pub mod constants;
mod timeout;

pub use timeout::{
    MAX_FETCH_TIMEOUT_MS, MAX_NAVIGATION_TIMEOUT_MS, TimeoutError, validate_fetch_timeout,
    validate_navigation_timeout,
};
