use std::fs::File;
use std::io;
use std::io::BufRead;
use std::io::BufReader;
use std::str::FromStr;

use super::constants;

/// Engine-wide configuration, loaded from a flat `NAME=value` file.
///
/// Settings named in the spec's data model default to their documented
/// value when absent from the file; `tcp_port`, `log_directory`,
/// `download_directory` and `max_log_file_kb_size` must be present.
#[derive(Debug, Clone)]
pub struct Cfg {
    pub tcp_port: u16,
    pub log_directory: String,
    pub download_directory: String,
    pub max_log_file_kb_size: u32,

    pub chunk_size: u32,
    pub max_open_files: usize,
    pub max_peers: usize,
    pub desired_peers: usize,
    pub max_outstanding: usize,
    pub max_unchoked: usize,
    pub snub_timeout: u64,
    pub kick_timeout: u64,
    pub connect_timeout: u64,
    pub upload_rate_bytes_per_sec: u64,
    pub max_frame_len: usize,
}

impl Default for Cfg {
    fn default() -> Self {
        Self {
            tcp_port: 6881,
            log_directory: String::from("./log"),
            download_directory: String::from("."),
            max_log_file_kb_size: 1024,
            chunk_size: 16384,
            max_open_files: 50,
            max_peers: 60,
            desired_peers: 30,
            max_outstanding: 20,
            max_unchoked: 4,
            snub_timeout: 30,
            kick_timeout: 120,
            connect_timeout: 30,
            upload_rate_bytes_per_sec: 0,
            max_frame_len: 128 * 1024,
        }
    }
}

impl Cfg {
    /// Builds a `Cfg` from the given path. The format of the config file
    /// must be `{config_name}={config_value}` (without brackets), one
    /// setting per line. Settings not present fall back to their default;
    /// `tcp_port`, `log_directory`, `download_directory` and
    /// `max_log_file_kb_size` must be present or construction fails.
    pub fn new(path: &str) -> io::Result<Self> {
        let mut cfg = Self::default();

        let file = File::open(path)?;
        let reader = BufReader::new(file);

        let mut settings_loaded = 0;

        for line in reader.lines() {
            let current_line = line?;
            if current_line.trim().is_empty() {
                continue;
            }
            let setting: Vec<&str> = current_line.splitn(2, '=').collect();

            if setting.len() != 2 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("Invalid config input: {}", current_line),
                ));
            }
            cfg = Self::load_setting(cfg, setting[0], setting[1])?;
            settings_loaded += 1;
        }
        if settings_loaded < constants::MIN_SETTINGS {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "Minimum number of correct settings were not reached: {}",
                    settings_loaded
                ),
            ));
        }
        if cfg.tcp_port == 0 || cfg.log_directory.is_empty() || cfg.download_directory.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "tcp_port, log_directory and download_directory are required",
            ));
        }
        Ok(cfg)
    }

    fn load_setting(mut self, name: &str, value: &str) -> io::Result<Self> {
        match name {
            constants::TCP_PORT => self.tcp_port = self.parse_value(value, name)?,
            constants::LOG_DIRECTORY => self.log_directory = String::from(value),
            constants::DOWNLOAD_DIRECTORY => self.download_directory = String::from(value),
            constants::MAX_LOG_FILE_KB_SIZE => {
                self.max_log_file_kb_size = self.parse_value(value, name)?
            }
            constants::CHUNK_SIZE => self.chunk_size = self.parse_value(value, name)?,
            constants::MAX_OPEN_FILES => self.max_open_files = self.parse_value(value, name)?,
            constants::MAX_PEERS => self.max_peers = self.parse_value(value, name)?,
            constants::DESIRED_PEERS => self.desired_peers = self.parse_value(value, name)?,
            constants::MAX_OUTSTANDING => self.max_outstanding = self.parse_value(value, name)?,
            constants::MAX_UNCHOKED => self.max_unchoked = self.parse_value(value, name)?,
            constants::SNUB_TIMEOUT => self.snub_timeout = self.parse_value(value, name)?,
            constants::KICK_TIMEOUT => self.kick_timeout = self.parse_value(value, name)?,
            constants::CONNECT_TIMEOUT => self.connect_timeout = self.parse_value(value, name)?,
            constants::UPLOAD_RATE_BYTES_PER_SEC => {
                self.upload_rate_bytes_per_sec = self.parse_value(value, name)?
            }
            constants::MAX_FRAME_LEN => self.max_frame_len = self.parse_value(value, name)?,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("Invalid config setting name: {}", name),
                ))
            }
        }
        Ok(self)
    }

    fn parse_value<F>(&self, value: &str, setting: &str) -> io::Result<F>
    where
        F: FromStr,
    {
        value.parse::<F>().map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Invalid setting: {}, is not a valid type: {}", setting, value),
            )
        })
    }
}
