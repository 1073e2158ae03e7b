use std::env;
use std::path::PathBuf;
use std::time::Duration;

use rand::Rng;

use engine::config::cfg::Cfg;
use engine::metainfo::MetainfoParser;
use engine::overseer::Overseer;
use logger::logger_receiver::Logger;

/// Builds a BEP 20 Azureus-style peer id: `-EN0100-` followed by twelve
/// random bytes.
fn generate_peer_id() -> [u8; 20] {
    let mut id = [0u8; 20];
    id[..8].copy_from_slice(b"-EN0100-");
    rand::thread_rng().fill(&mut id[8..]);
    id
}

fn main() {
    let mut args = env::args().skip(1);
    let file_path = PathBuf::from(
        args.next()
            .expect("usage: engine <torrent-file> [config-file]"),
    );
    let config_path = args.next().unwrap_or_else(|| "engine.cfg".to_string());

    let config = Cfg::new(&config_path).expect("config file not found or incomplete");
    let metainfo = MetainfoParser::parse(&file_path).expect("could not parse torrent file");

    let logger = Logger::new(&config.log_directory, config.max_log_file_kb_size)
        .expect("logger could not be created");
    let logger_sender = logger.new_sender();

    let overseer = Overseer::new(config, logger_sender.clone(), generate_peer_id());
    let torrent = overseer
        .add_torrent(metainfo)
        .expect("could not open torrent's payload files");
    overseer
        .run()
        .expect("could not start the engine's background threads");

    logger_sender.info(&format!("started torrent {}", torrent.metainfo.info.name));

    loop {
        std::thread::sleep(Duration::from_secs(1));
        if torrent.is_complete() {
            logger_sender.info("torrent finished downloading");
            break;
        }
    }

    torrent.stop();
    overseer.shutdown();
}
