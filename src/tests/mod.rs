pub mod common;

mod concurrency_and_timeouts;
mod http_api;
