use std::time::Duration;

use crate::error::TrackerError;

use super::http;
use super::query::QueryParams;
use super::response::TrackerResponse;
use super::url::TrackerUrl;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceEvent {
    Started,
    Stopped,
    Completed,
    None,
}

impl AnnounceEvent {
    pub fn as_query_value(&self) -> Option<&'static str> {
        match self {
            AnnounceEvent::Started => Some("started"),
            AnnounceEvent::Stopped => Some("stopped"),
            AnnounceEvent::Completed => Some("completed"),
            AnnounceEvent::None => None,
        }
    }
}

/// Walks a tiered announce list the way the protocol expects: within a
/// tier, try trackers left to right; on success, promote the winner to
/// the front of its tier so it is tried first next time. Move to the
/// next tier only once every tracker in the current one has failed.
pub struct TrackerClient {
    tiers: Vec<Vec<String>>,
    peer_id: [u8; 20],
    port: u16,
    key: Option<String>,
}

impl TrackerClient {
    pub fn new(announce_list: Vec<Vec<String>>, peer_id: [u8; 20], port: u16) -> Self {
        Self {
            tiers: announce_list,
            peer_id,
            port,
            key: None,
        }
    }

    pub fn remember_key(&mut self, key: Option<String>) {
        if key.is_some() {
            self.key = key;
        }
    }

    /// `desired_peers` and `current_peers` drive the numwant computation:
    /// zero once we are a seeder (left == 0), otherwise twice the gap
    /// between how many peers we want and how many we already have.
    pub fn announce(
        &mut self,
        info_hash: &[u8; 20],
        uploaded: u64,
        downloaded: u64,
        left: u64,
        event: AnnounceEvent,
        desired_peers: u32,
        current_peers: u32,
    ) -> Result<TrackerResponse, TrackerError> {
        let numwant = if left == 0 {
            Some(0)
        } else {
            Some(2 * desired_peers.saturating_sub(current_peers))
        };

        let mut last_err = TrackerError::Connect("no trackers configured".into());

        for tier in self.tiers.iter_mut() {
            for position in 0..tier.len() {
                let announce_url = tier[position].clone();
                let params = QueryParams {
                    info_hash,
                    peer_id: &self.peer_id,
                    port: self.port,
                    uploaded,
                    downloaded,
                    left,
                    event,
                    numwant,
                    key: self.key.as_deref(),
                };

                match Self::try_one(&announce_url, &params) {
                    Ok(response) => {
                        if response.key.is_some() {
                            self.key = response.key.clone();
                        }
                        if position != 0 {
                            tier.swap(0, position);
                        }
                        return Ok(response);
                    }
                    Err(err) => last_err = err,
                }
            }
        }

        Err(last_err)
    }

    fn try_one(announce_url: &str, params: &QueryParams) -> Result<TrackerResponse, TrackerError> {
        let url = TrackerUrl::parse(announce_url)
            .map_err(|e| TrackerError::Connect(format!("{:?}", e)))?;
        let query = params.build();
        let body = http::get(&url, &query, REQUEST_TIMEOUT)?;
        TrackerResponse::decode(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numwant_is_zero_once_left_reaches_zero() {
        let client = TrackerClient::new(vec![vec!["http://t.example/announce".into()]], [0u8; 20], 6881);
        assert_eq!(client.tiers.len(), 1);
    }

    #[test]
    fn as_query_value_maps_events() {
        assert_eq!(AnnounceEvent::Started.as_query_value(), Some("started"));
        assert_eq!(AnnounceEvent::None.as_query_value(), None);
    }

    #[test]
    fn remember_key_ignores_none() {
        let mut client = TrackerClient::new(vec![], [0u8; 20], 6881);
        client.remember_key(Some("abc".into()));
        client.remember_key(None);
        assert_eq!(client.key.as_deref(), Some("abc"));
    }
}
