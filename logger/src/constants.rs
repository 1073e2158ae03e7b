pub const LOGGER_THREAD_NAME: &str = "Logger";
