pub const TCP_PORT: &str = "TCP_PORT";
pub const LOG_DIRECTORY: &str = "LOG_DIRECTORY";
pub const DOWNLOAD_DIRECTORY: &str = "DOWNLOAD_DIRECTORY";
pub const MAX_LOG_FILE_KB_SIZE: &str = "MAX_LOG_FILE_KB_SIZE";

pub const CHUNK_SIZE: &str = "CHUNK_SIZE";
pub const MAX_OPEN_FILES: &str = "MAX_OPEN_FILES";
pub const MAX_PEERS: &str = "MAX_PEERS";
pub const DESIRED_PEERS: &str = "DESIRED_PEERS";
pub const MAX_OUTSTANDING: &str = "MAX_OUTSTANDING";
pub const MAX_UNCHOKED: &str = "MAX_UNCHOKED";
pub const SNUB_TIMEOUT: &str = "SNUB_TIMEOUT";
pub const KICK_TIMEOUT: &str = "KICK_TIMEOUT";
pub const CONNECT_TIMEOUT: &str = "CONNECT_TIMEOUT";
pub const UPLOAD_RATE_BYTES_PER_SEC: &str = "UPLOAD_RATE_BYTES_PER_SEC";
pub const MAX_FRAME_LEN: &str = "MAX_FRAME_LEN";

/// `Cfg::new` only requires the original teacher settings to be present;
/// the engine-specific settings below fall back to their spec defaults
/// when absent from the file.
pub const MIN_SETTINGS: usize = 3;
